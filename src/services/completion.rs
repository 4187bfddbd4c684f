//! Lesson completion event: marks the lesson, rolls completion up to the
//! module and course, awards XP and records the streak.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::db::operations::{update_lesson_result, update_module_status, update_profile_progress};
use crate::db::DatabaseProxy;
use crate::models::{Course, Profile};
use crate::services::progress::{lesson_xp, LevelProgress, LevelUp, StreakState, StreakUpdate, MODULE_BONUS_XP};

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("lesson {0} is not part of this course")]
    LessonNotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub lesson_id: String,
    pub module_id: String,
    /// Score stored on the lesson; the best across replays.
    pub score: Option<u8>,
    pub first_completion: bool,
    pub module_completed: bool,
    pub course_completed: bool,
    pub xp: LevelUp,
    pub streak: StreakUpdate,
}

/// Pure part of the completion event. XP is only awarded the first time a
/// lesson is completed; a replay keeps the better score and still counts
/// toward the streak.
pub fn apply_lesson_completion(
    course: &mut Course,
    profile: &mut Profile,
    lesson_id: &str,
    score: Option<u8>,
    today: NaiveDate,
) -> Result<CompletionOutcome, CompletionError> {
    let (module_idx, lesson_idx) = course
        .locate_lesson(lesson_id)
        .ok_or_else(|| CompletionError::LessonNotFound(lesson_id.to_string()))?;

    let module = &mut course.modules[module_idx];
    let module_was_completed = module.completed;
    let lesson = &mut module.lessons[lesson_idx];
    let first_completion = !lesson.completed;

    lesson.completed = true;
    lesson.score = match (lesson.score, score) {
        (Some(old), Some(new)) => Some(old.max(new)),
        (old, new) => new.or(old),
    };
    let stored_score = lesson.score;

    let module_completed = module.refresh_completion();
    let module_id = module.id.clone();
    let course_completed = course.is_completed();

    let mut amount = if first_completion { lesson_xp(score) } else { 0 };
    if module_completed && !module_was_completed {
        amount += MODULE_BONUS_XP;
    }
    let mut level = LevelProgress::of(profile);
    let xp = level.award(amount);
    level.apply_to(profile);

    let mut streak_state = StreakState::of(profile);
    let streak = streak_state.record_activity(today);
    streak_state.apply_to(profile);

    Ok(CompletionOutcome {
        lesson_id: lesson_id.to_string(),
        module_id,
        score: stored_score,
        first_completion,
        module_completed,
        course_completed,
        xp,
        streak,
    })
}

/// Applies the completion and persists the lesson result, the module flags
/// and the profile progress before returning. Sibling lesson rows are not
/// written, so content stored by a concurrent prefetch survives.
pub async fn complete_lesson(
    proxy: &DatabaseProxy,
    course: &mut Course,
    profile: &mut Profile,
    lesson_id: &str,
    score: Option<u8>,
    today: NaiveDate,
) -> Result<CompletionOutcome, CompletionError> {
    let outcome = apply_lesson_completion(course, profile, lesson_id, score, today)?;

    let (module_idx, lesson_idx) = course
        .locate_lesson(lesson_id)
        .ok_or_else(|| CompletionError::LessonNotFound(lesson_id.to_string()))?;
    let module = &course.modules[module_idx];
    update_lesson_result(proxy, &module.lessons[lesson_idx]).await?;
    update_module_status(proxy, module).await?;
    update_profile_progress(proxy, profile).await?;

    info!(
        username = %profile.username,
        %lesson_id,
        score = ?outcome.score,
        xp_awarded = outcome.xp.awarded,
        level = profile.level,
        streak = profile.streak,
        "lesson completed"
    );
    Ok(outcome)
}
