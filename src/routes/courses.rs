use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::db::operations::{get_full_course, save_full_course, save_lesson, save_module};
use crate::models::{Course, Lesson, Module, Profile};
use crate::response::{ok, AppError};
use crate::services::generation_guard::GenerationOutcome;
use crate::state::AppState;

use super::{load_course, load_profile};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CourseResponse {
    course: Course,
    outcome: GenerationOutcome,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModuleResponse<'a> {
    module: &'a Module,
    outcome: GenerationOutcome,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LessonResponse<'a> {
    module_id: &'a str,
    lesson: &'a Lesson,
    outcome: GenerationOutcome,
    /// Next lesson whose content is being prepared in the background.
    #[serde(skip_serializing_if = "Option::is_none")]
    prefetching: Option<String>,
}

/// `data` is `null` until a syllabus exists.
pub async fn get_course(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let profile = load_profile(&state, &username).await?;
    let course = get_full_course(&state.db_proxy(), &profile.id).await?;
    Ok(ok(course).into_response())
}

pub async fn ensure_course(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let profile = load_profile(&state, &username).await?;
    let guard = state.guard();
    let claim = guard.claim_course(&profile.id)?;
    let existing = get_full_course(&state.db_proxy(), &profile.id).await?;

    let (course, outcome) = guard.ensure_course(&claim, &profile, existing).await?;
    if outcome == GenerationOutcome::Generated {
        save_full_course(&state.db_proxy(), &course).await?;
    }
    drop(claim);
    Ok(ok(CourseResponse { course, outcome }).into_response())
}

pub async fn open_module(
    State(state): State<AppState>,
    Path((username, module_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let profile = load_profile(&state, &username).await?;
    let guard = state.guard();
    let claim = guard.claim_module(&module_id)?;
    // Read under the claim so lessons saved by an earlier holder are seen.
    let mut course = load_course(&state, &profile).await?;
    let index = course
        .modules
        .iter()
        .position(|m| m.id == module_id)
        .ok_or_else(|| AppError::not_found(format!("module {module_id} not found")))?;

    let module = &mut course.modules[index];
    let outcome = guard.ensure_module_lessons(&claim, &profile, module).await?;
    if outcome == GenerationOutcome::Generated {
        save_module(&state.db_proxy(), &profile.id, index, module).await?;
    }
    drop(claim);
    Ok(ok(ModuleResponse { module, outcome }).into_response())
}

pub async fn open_lesson(
    State(state): State<AppState>,
    Path((username, lesson_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let profile = load_profile(&state, &username).await?;
    let guard = state.guard();
    let claim = guard.claim_lesson(&lesson_id)?;
    let mut course = load_course(&state, &profile).await?;
    let (module_idx, lesson_idx) = course
        .locate_lesson(&lesson_id)
        .ok_or_else(|| AppError::not_found(format!("lesson {lesson_id} not found")))?;

    let module = &mut course.modules[module_idx];
    let outcome = guard
        .ensure_lesson_content(&claim, &profile, module, &lesson_id)
        .await?;
    if outcome == GenerationOutcome::Generated {
        save_lesson(&state.db_proxy(), &module.id, lesson_idx, &module.lessons[lesson_idx]).await?;
    }
    drop(claim);

    let prefetching = spawn_prefetch(&state, &profile, module, lesson_idx + 1);
    Ok(ok(LessonResponse {
        module_id: &module.id,
        lesson: &module.lessons[lesson_idx],
        outcome,
        prefetching,
    })
    .into_response())
}

/// Warms up the lesson at `index` in the background. The task claims the
/// lesson, re-reads it and writes only that lesson's row.
fn spawn_prefetch(state: &AppState, profile: &Profile, module: &Module, index: usize) -> Option<String> {
    let next = module.lessons.get(index)?;
    if next.content.is_some() {
        return None;
    }
    let lesson_id = next.id.clone();
    let guard = state.guard();
    let proxy = state.db_proxy();
    let profile = profile.clone();
    let id = lesson_id.clone();

    tokio::spawn(async move {
        let Ok(claim) = guard.claim_lesson(&id) else {
            return;
        };
        let mut course = match get_full_course(&proxy, &profile.id).await {
            Ok(Some(course)) => course,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(lesson_id = %id, error = %err, "prefetch could not load course");
                return;
            }
        };
        let Some((module_idx, lesson_idx)) = course.locate_lesson(&id) else {
            return;
        };
        let mut module = course.modules.swap_remove(module_idx);
        if module.lessons[lesson_idx].content.is_some() {
            return;
        }

        let outcome = guard
            .prefetch_lesson_content(&claim, &profile, &mut module, &id)
            .await;
        if outcome == GenerationOutcome::Cached {
            return;
        }
        if let Err(err) = save_lesson(&proxy, &module.id, lesson_idx, &module.lessons[lesson_idx]).await {
            tracing::warn!(lesson_id = %id, error = %err, "failed to persist prefetched lesson");
        }
    });
    Some(lesson_id)
}
