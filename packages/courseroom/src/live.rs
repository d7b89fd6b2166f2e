//! Collaborators the live-updates core needs from this application.

use axum::http::request::Parts;
use futures::future::BoxFuture;
use live_updates::{ScopeId, ScopeResolver};

/// Every page under `/courses/{id}` belongs to the scope of that course.
/// Other pages, the course list included, belong to no scope.
pub struct CourseScope;

impl CourseScope {
    pub fn scope_of(path: &str) -> Option<ScopeId> {
        path.strip_prefix("/courses/")?
            .split('/')
            .next()?
            .parse()
            .ok()
            .map(ScopeId)
    }
}

impl ScopeResolver for CourseScope {
    fn resolve<'a>(&'a self, parts: &'a Parts) -> BoxFuture<'a, Option<ScopeId>> {
        let scope = Self::scope_of(parts.uri.path());
        Box::pin(async move { scope })
    }
}
