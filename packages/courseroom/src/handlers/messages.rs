use axum::{
    Form,
    extract::{Path, State},
    response::Redirect,
};
use live_updates::ScopeId;
use serde::Deserialize;
use tracing::debug;

use crate::AppState;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct NewMessage {
    pub author: String,
    pub body: String,
}

/// Store a message and push the course page to everyone viewing it.
pub async fn post_message(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
    Form(form): Form<NewMessage>,
) -> Result<Redirect, AppError> {
    let author = form.author.trim();
    let body = form.body.trim();
    if author.is_empty() || body.is_empty() {
        return Err(AppError::InvalidInput("author and message must not be empty"));
    }
    if state.repository.get_course(course_id).await?.is_none() {
        return Err(AppError::CourseNotFound(course_id));
    }

    let id = state.repository.add_message(course_id, author, body).await?;
    debug!(course = course_id, message = id, "Message posted");
    state.live_updates.notify_scope_changed(ScopeId(course_id));

    Ok(Redirect::to(&format!("/courses/{}", course_id)))
}
