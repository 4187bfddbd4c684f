mod analysis;
mod courses;
mod health;
mod live;
mod profiles;
mod runs;
mod speech;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::db::operations::{get_full_course, get_profile_by_username};
use crate::models::{Course, Profile};
use crate::response::{json_error, AppError};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .route("/api/profiles", post(profiles::upsert))
        .route(
            "/api/profiles/:username",
            get(profiles::get_profile).delete(profiles::delete_profile),
        )
        .route(
            "/api/profiles/:username/course",
            get(courses::get_course).post(courses::ensure_course),
        )
        .route(
            "/api/profiles/:username/modules/:module_id/open",
            post(courses::open_module),
        )
        .route(
            "/api/profiles/:username/lessons/:lesson_id/open",
            post(courses::open_lesson),
        )
        .route(
            "/api/profiles/:username/lessons/:lesson_id/runs",
            post(runs::start_run),
        )
        .route("/api/profiles/:username/analysis", post(analysis::analyze))
        .route("/api/profiles/:username/live", get(live::connect))
        .route("/api/runs/:run_id", get(runs::get_run))
        .route("/api/runs/:run_id/submit", post(runs::submit))
        .route("/api/runs/:run_id/reveal", post(runs::reveal))
        .route("/api/runs/:run_id/pronunciation", post(runs::pronunciation))
        .route("/api/speech", post(speech::synthesize))
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "route not found").into_response()
}

pub(crate) async fn load_profile(state: &AppState, username: &str) -> Result<Profile, AppError> {
    get_profile_by_username(&state.db_proxy(), username)
        .await?
        .ok_or_else(|| AppError::not_found(format!("profile {username} not found")))
}

pub(crate) async fn load_course(state: &AppState, profile: &Profile) -> Result<Course, AppError> {
    get_full_course(&state.db_proxy(), &profile.id)
        .await?
        .ok_or_else(|| AppError::not_found("course has not been generated yet"))
}
