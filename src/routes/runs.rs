use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::models::PronunciationResult;
use crate::response::{ok, AppError};
use crate::services::audio::{AudioClip, AudioFormat};
use crate::services::completion::{complete_lesson, CompletionOutcome};
use crate::services::runs::{
    LessonRun, LessonRuns, RevealResult, RunError, StageSubmission, SubmitResult,
};
use crate::state::AppState;

use super::{load_course, load_profile};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    #[serde(flatten)]
    result: SubmitResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    completion: Option<CompletionOutcome>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RevealResponse {
    #[serde(flatten)]
    result: RevealResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    completion: Option<CompletionOutcome>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PronunciationRequest {
    line: usize,
    /// Base64 recording.
    audio: String,
    #[serde(default = "default_format")]
    format: AudioFormat,
}

fn default_format() -> AudioFormat {
    AudioFormat::Wav
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PronunciationResponse {
    result: PronunciationResult,
    best_score: u8,
}

/// What a finished run needs to fire the completion event.
struct Finished {
    username: String,
    lesson_id: String,
    score: Option<u8>,
}

impl Finished {
    fn of(run: &LessonRun) -> Option<Self> {
        run.is_complete().then(|| Finished {
            username: run.username.clone(),
            lesson_id: run.lesson_id.clone(),
            score: run.final_score(),
        })
    }
}

fn run_not_found(run_id: &str) -> AppError {
    AppError::not_found(format!("lesson run {run_id} not found"))
}

pub async fn start_run(
    State(state): State<AppState>,
    Path((username, lesson_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let profile = load_profile(&state, &username).await?;
    let course = load_course(&state, &profile).await?;
    let (module_idx, lesson_idx) = course
        .locate_lesson(&lesson_id)
        .ok_or_else(|| AppError::not_found(format!("lesson {lesson_id} not found")))?;
    let module = &course.modules[module_idx];

    let content = module.lessons[lesson_idx]
        .content
        .as_ref()
        .filter(|c| c.is_complete())
        .ok_or_else(|| AppError::conflict("lesson content is not ready; open the lesson first"))?;

    let view = state
        .runs()
        .start(LessonRun::new(&profile.username, &module.id, &lesson_id, content));
    tracing::info!(%username, %lesson_id, run_id = %view.id, "lesson run started");
    Ok((StatusCode::CREATED, ok(view)).into_response())
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Response, AppError> {
    let view = state.runs().view(&run_id).ok_or_else(|| run_not_found(&run_id))?;
    Ok(ok(view).into_response())
}

pub async fn submit(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(submission): Json<StageSubmission>,
) -> Result<Response, AppError> {
    let (result, finished) = state
        .runs()
        .with_run(&run_id, |run| {
            run.submit(submission).map(|result| (result, Finished::of(run)))
        })
        .ok_or_else(|| run_not_found(&run_id))??;

    let completion = finish(&state, &run_id, finished).await?;
    Ok(ok(SubmitResponse { result, completion }).into_response())
}

pub async fn reveal(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Response, AppError> {
    let (result, finished) = state
        .runs()
        .with_run(&run_id, |run| run.reveal().map(|result| (result, Finished::of(run))))
        .ok_or_else(|| run_not_found(&run_id))??;

    let completion = finish(&state, &run_id, finished).await?;
    Ok(ok(RevealResponse { result, completion }).into_response())
}

/// Returns the drill to idle unless the evaluation was recorded. Covers the
/// handler future being dropped mid-evaluation when the client goes away.
struct PendingEvaluation {
    runs: Arc<LessonRuns>,
    run_id: String,
    settled: bool,
}

impl PendingEvaluation {
    fn record(mut self, result: &PronunciationResult) -> Option<Result<u8, RunError>> {
        self.settled = true;
        self.runs
            .with_run(&self.run_id, |run| run.record_pronunciation(result))
    }
}

impl Drop for PendingEvaluation {
    fn drop(&mut self) {
        if !self.settled {
            self.runs.with_run(&self.run_id, LessonRun::cancel_pronunciation);
        }
    }
}

pub async fn pronunciation(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(req): Json<PronunciationRequest>,
) -> Result<Response, AppError> {
    let clip = AudioClip::from_base64(&req.audio, req.format)?;
    let runs = state.runs();
    let target = runs
        .with_run(&run_id, |run| run.begin_pronunciation(req.line))
        .ok_or_else(|| run_not_found(&run_id))??;
    let pending = PendingEvaluation {
        runs,
        run_id: run_id.clone(),
        settled: false,
    };

    let result = match state.generator().evaluate_pronunciation(&target, &clip).await {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(%run_id, error = %err, "pronunciation evaluation failed");
            return Err(err.into());
        }
    };

    let best_score = pending
        .record(&result)
        .ok_or_else(|| run_not_found(&run_id))??;
    Ok(ok(PronunciationResponse { result, best_score }).into_response())
}

/// Fires the completion event once a run reaches its last stage. The run is
/// dropped from the registry before persisting.
async fn finish(
    state: &AppState,
    run_id: &str,
    finished: Option<Finished>,
) -> Result<Option<CompletionOutcome>, AppError> {
    let Some(finished) = finished else {
        return Ok(None);
    };
    state.runs().remove(run_id);

    let mut profile = load_profile(state, &finished.username).await?;
    let mut course = load_course(state, &profile).await?;
    let outcome = complete_lesson(
        &state.db_proxy(),
        &mut course,
        &mut profile,
        &finished.lesson_id,
        finished.score,
        state.today(),
    )
    .await?;
    Ok(Some(outcome))
}
