use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;
use live_updates::{LiveUpdates, LiveUpdatesConfig, RouterRenderer};

use crate::AppState;
use crate::db::Database;
use crate::live::CourseScope;
use crate::repository::CourseRepository;

async fn wired() -> (AppState, RouterRenderer) {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    crate::db::run_migrations(&pool).await.expect("migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("pragma");

    // Background timers far enough out that they never fire mid-test.
    let live_config = LiveUpdatesConfig {
        heartbeat_interval: Duration::from_secs(3600),
        sweep_interval: Duration::from_secs(3600),
        ..LiveUpdatesConfig::default()
    };
    let renderer = RouterRenderer::new(live_config.max_render_bytes);
    let live_updates = LiveUpdates::new(
        pool.clone(),
        live_config,
        Arc::new(renderer.clone()),
        Arc::new(CourseScope),
    )
    .await
    .expect("live updates");

    let state = AppState {
        db: Arc::new(Database { pool: pool.clone() }),
        repository: Arc::new(CourseRepository::new(pool)),
        live_updates,
    };

    (state, renderer)
}

/// Build a fully-wired `AppState` backed by an in-memory SQLite database.
///
/// The push renderer has no router installed, so use [`test_app`] for
/// anything that dispatches.
pub async fn test_app_state() -> AppState {
    wired().await.0
}

/// The complete router, with the push renderer replaying through it.
pub async fn test_app() -> (Router, AppState) {
    let (state, renderer) = wired().await;
    let app = crate::app(state.clone());
    assert!(renderer.install(app.clone()));
    (app, state)
}

pub fn form_post(uri: &str, body: &'static str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
