use axum::{
    Form,
    extract::{Path, State},
    response::{Html, Redirect},
};
use live_updates::LiveNonce;
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::error::AppError;
use crate::views;

#[derive(Debug, Deserialize)]
pub struct NewCourse {
    pub name: String,
}

pub async fn index(
    State(state): State<AppState>,
    LiveNonce(nonce): LiveNonce,
) -> Result<Html<String>, AppError> {
    let courses = state.repository.list_courses().await?;
    Ok(Html(views::index_page(&courses, nonce.as_ref()).into_string()))
}

pub async fn create_course(
    State(state): State<AppState>,
    Form(form): Form<NewCourse>,
) -> Result<Redirect, AppError> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidInput("course name must not be empty"));
    }
    let id = state.repository.create_course(name).await?;
    info!(course = id, "Created course {:?}", name);
    Ok(Redirect::to(&format!("/courses/{}", id)))
}

pub async fn course_page(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    LiveNonce(nonce): LiveNonce,
) -> Result<Html<String>, AppError> {
    let course = state
        .repository
        .get_course(id)
        .await?
        .ok_or(AppError::CourseNotFound(id))?;
    let messages = state.repository.list_messages(id).await?;
    Ok(Html(
        views::course_page(&course, &messages, nonce.as_ref()).into_string(),
    ))
}
