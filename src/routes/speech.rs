use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::response::{ok, AppError};
use crate::services::audio::{AudioClip, AudioFormat};
use crate::state::AppState;

const MAX_SPEECH_CHARS: usize = 4_000;

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechResponse {
    /// Base64 WAV.
    audio: String,
    format: AudioFormat,
}

pub async fn synthesize(
    State(state): State<AppState>,
    Json(req): Json<SpeechRequest>,
) -> Result<Response, AppError> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err(AppError::validation("text must not be empty"));
    }
    if text.chars().count() > MAX_SPEECH_CHARS {
        return Err(AppError::validation(format!(
            "text must be at most {MAX_SPEECH_CHARS} characters"
        )));
    }

    let wav = state.generator().synthesize_speech(text).await?;
    let clip = AudioClip {
        data: wav,
        format: AudioFormat::Wav,
    };
    Ok(ok(SpeechResponse {
        audio: clip.to_base64(),
        format: clip.format,
    })
    .into_response())
}
