use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::operations::{delete_profile as delete_profile_row, upsert_profile};
use crate::models::{CefrLevel, Profile, ProfileDraft};
use crate::response::{ok, AppError};
use crate::services::progress::{xp_threshold, StreakState, StreakStatus};
use crate::state::AppState;

use super::load_profile;

const MAX_USERNAME_LEN: usize = 64;
const MAX_INTERESTS: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertProfileRequest {
    username: String,
    display_name: Option<String>,
    current_level: CefrLevel,
    target_level: CefrLevel,
    #[serde(default)]
    interests: Vec<String>,
}

/// Profile plus values derived for "today".
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    #[serde(flatten)]
    profile: Profile,
    /// Streak as it stands today; zero once it has lapsed.
    current_streak: u32,
    streak_status: StreakStatus,
    next_level_xp: u64,
}

impl ProfileView {
    fn new(profile: Profile, state: &AppState) -> Self {
        let streak = StreakState::of(&profile);
        let today = state.today();
        Self {
            current_streak: streak.current(today),
            streak_status: streak.status(today),
            next_level_xp: xp_threshold(profile.level),
            profile,
        }
    }
}

fn validate(req: UpsertProfileRequest) -> Result<ProfileDraft, AppError> {
    let username = req.username.trim().to_string();
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(AppError::validation(format!(
            "username must be 1-{MAX_USERNAME_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(AppError::validation(
            "username may only contain letters, digits, '.', '_' and '-'",
        ));
    }

    let display_name = req
        .display_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| username.clone());

    let mut interests: Vec<String> = Vec::new();
    for interest in req.interests {
        let interest = interest.trim().to_string();
        if !interest.is_empty() && !interests.contains(&interest) {
            interests.push(interest);
        }
    }
    if interests.len() > MAX_INTERESTS {
        return Err(AppError::validation(format!(
            "at most {MAX_INTERESTS} interests are allowed"
        )));
    }

    Ok(ProfileDraft {
        username,
        display_name,
        current_level: req.current_level,
        target_level: req.target_level,
        interests,
    })
}

pub async fn upsert(
    State(state): State<AppState>,
    Json(req): Json<UpsertProfileRequest>,
) -> Result<Response, AppError> {
    let draft = validate(req)?;
    let profile = upsert_profile(&state.db_proxy(), &draft).await?;
    tracing::info!(username = %profile.username, profile_id = %profile.id, "profile saved");
    Ok(ok(ProfileView::new(profile, &state)).into_response())
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let profile = load_profile(&state, &username).await?;
    Ok(ok(ProfileView::new(profile, &state)).into_response())
}

/// Admin removal; modules and lessons go with the profile.
pub async fn delete_profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    if !delete_profile_row(&state.db_proxy(), &username).await? {
        return Err(AppError::not_found(format!("profile {username} not found")));
    }
    tracing::info!(%username, "profile deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}
