use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::models::TranscriptTurn;
use crate::response::{ok, AppError};
use crate::state::AppState;

use super::load_profile;

#[derive(Debug, Deserialize)]
pub struct AnalysisRequest {
    transcript: Vec<TranscriptTurn>,
}

/// Scores a finished conversation transcript for the learner.
pub async fn analyze(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(req): Json<AnalysisRequest>,
) -> Result<Response, AppError> {
    let profile = load_profile(&state, &username).await?;
    let transcript: Vec<TranscriptTurn> = req
        .transcript
        .into_iter()
        .filter(|turn| !turn.text.trim().is_empty())
        .collect();
    if transcript.is_empty() {
        return Err(AppError::validation("transcript must contain at least one turn"));
    }

    let result = state
        .generator()
        .analyze_conversation(&profile, &transcript)
        .await?;
    tracing::info!(%username, score = result.score, turns = transcript.len(), "conversation analysed");
    Ok(ok(result).into_response())
}
