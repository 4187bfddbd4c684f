//! Server-side lesson runs: one pipeline plus the exercise sessions built
//! from the lesson's content, keyed by run id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{InteractiveContent, PronunciationResult};
use crate::services::exercises::{
    ExerciseError, FillBlankCheck, FillBlankSession, PronunciationDrill, QuizReport, QuizSession,
    ScrambleCheck, ScrambleSession,
};
use crate::services::lesson_pipeline::{LessonPipeline, PipelineError, Stage, StageRecord};

/// Runs idle for longer than this are dropped when a new run starts.
pub const RUN_TTL_HOURS: i64 = 6;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Exercise(#[from] ExerciseError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "stage", rename_all = "camelCase")]
pub enum StageSubmission {
    Scenario,
    Vocabulary,
    FillInBlank { answers: Vec<usize> },
    Scramble { order: Vec<usize> },
    Quiz { answers: Vec<usize> },
    Pronunciation,
}

impl StageSubmission {
    pub fn stage(&self) -> Stage {
        match self {
            StageSubmission::Scenario => Stage::Scenario,
            StageSubmission::Vocabulary => Stage::Vocabulary,
            StageSubmission::FillInBlank { .. } => Stage::FillInBlank,
            StageSubmission::Scramble { .. } => Stage::Scramble,
            StageSubmission::Quiz { .. } => Stage::Quiz,
            StageSubmission::Pronunciation => Stage::Pronunciation,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StageDetail {
    Acknowledged,
    FillInBlank { check: FillBlankCheck },
    Scramble { result: ScrambleCheck, assembled: String },
    Quiz { report: QuizReport },
    Pronunciation { score: u8 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    pub stage: Stage,
    /// False when the learner has to try the stage again.
    pub advanced: bool,
    pub current: Stage,
    pub detail: StageDetail,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "answers", rename_all = "camelCase")]
pub enum RevealedAnswers {
    None,
    FillInBlank(Vec<String>),
    Scramble(String),
    Quiz(Vec<usize>),
    Pronunciation(Vec<String>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealResult {
    pub stage: Stage,
    pub current: Stage,
    pub revealed: RevealedAnswers,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    pub id: String,
    pub username: String,
    pub module_id: String,
    pub lesson_id: String,
    pub current: Stage,
    pub history: Vec<StageRecord>,
    pub scramble_pool: Vec<String>,
    pub pronunciation_targets: Vec<String>,
    pub pronunciation_best: Vec<Option<u8>>,
    pub final_score: Option<u8>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LessonRun {
    pub id: String,
    pub username: String,
    pub module_id: String,
    pub lesson_id: String,
    pipeline: LessonPipeline,
    quiz: QuizSession,
    fill: FillBlankSession,
    scramble: ScrambleSession,
    drill: PronunciationDrill,
    started_at: DateTime<Utc>,
    touched_at: DateTime<Utc>,
}

impl LessonRun {
    pub fn new(username: &str, module_id: &str, lesson_id: &str, content: &InteractiveContent) -> Self {
        Self::with_scramble(
            username,
            module_id,
            lesson_id,
            content,
            ScrambleSession::new(&content.scramble),
        )
    }

    /// Same as [`LessonRun::new`] with a caller-chosen scramble pool.
    pub fn with_scramble(
        username: &str,
        module_id: &str,
        lesson_id: &str,
        content: &InteractiveContent,
        scramble: ScrambleSession,
    ) -> Self {
        let targets = content
            .conversation
            .learner_lines()
            .map(|line| line.text.clone())
            .collect();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            module_id: module_id.to_string(),
            lesson_id: lesson_id.to_string(),
            pipeline: LessonPipeline::new(),
            quiz: QuizSession::new(content.quiz.clone()),
            fill: FillBlankSession::new(content.fill_in_blanks.clone()),
            scramble,
            drill: PronunciationDrill::new(targets),
            started_at: now,
            touched_at: now,
        }
    }

    pub fn current(&self) -> Stage {
        self.pipeline.current()
    }

    pub fn is_complete(&self) -> bool {
        self.pipeline.is_complete()
    }

    pub fn final_score(&self) -> Option<u8> {
        self.pipeline.final_score()
    }

    pub fn view(&self) -> RunView {
        RunView {
            id: self.id.clone(),
            username: self.username.clone(),
            module_id: self.module_id.clone(),
            lesson_id: self.lesson_id.clone(),
            current: self.pipeline.current(),
            history: self.pipeline.history().to_vec(),
            scramble_pool: self.scramble.pool().to_vec(),
            pronunciation_targets: self.drill.targets().to_vec(),
            pronunciation_best: self.drill.best_scores().to_vec(),
            final_score: self.pipeline.final_score(),
            started_at: self.started_at,
        }
    }

    pub fn submit(&mut self, submission: StageSubmission) -> Result<SubmitResult, RunError> {
        let stage = submission.stage();
        self.pipeline.ensure_current(stage)?;
        self.touched_at = Utc::now();

        let (score, advance, detail) = match submission {
            StageSubmission::Scenario | StageSubmission::Vocabulary => {
                (None, true, StageDetail::Acknowledged)
            }
            StageSubmission::FillInBlank { answers } => {
                for (index, option) in answers.into_iter().enumerate() {
                    self.fill.select(index, option)?;
                }
                let check = self.fill.check();
                (None, check.all_correct, StageDetail::FillInBlank { check })
            }
            StageSubmission::Scramble { order } => {
                self.scramble.reset();
                for token in order {
                    self.scramble.pick(token)?;
                }
                let result = self.scramble.check();
                let assembled = self.scramble.assembled_sentence();
                (
                    None,
                    result == ScrambleCheck::Correct,
                    StageDetail::Scramble { result, assembled },
                )
            }
            StageSubmission::Quiz { answers } => {
                for (index, option) in answers.into_iter().enumerate() {
                    self.quiz.select(index, option)?;
                }
                let report = self.quiz.submit()?;
                (Some(report.score), true, StageDetail::Quiz { report })
            }
            StageSubmission::Pronunciation => {
                let missing = self.drill.best_scores().iter().filter(|b| b.is_none()).count();
                let score = self.drill.score().ok_or(ExerciseError::Unanswered(missing.max(1)))?;
                (Some(score), true, StageDetail::Pronunciation { score })
            }
        };

        if advance {
            self.pipeline.complete_stage(stage, score)?;
        }
        Ok(SubmitResult {
            stage,
            advanced: advance,
            current: self.pipeline.current(),
            detail,
        })
    }

    /// Completes the current stage by showing its answers.
    pub fn reveal(&mut self) -> Result<RevealResult, RunError> {
        let stage = self.pipeline.current();
        self.pipeline.ensure_current(stage)?;
        self.touched_at = Utc::now();

        let revealed = match stage {
            Stage::FillInBlank => RevealedAnswers::FillInBlank(self.fill.reveal()),
            Stage::Scramble => RevealedAnswers::Scramble(self.scramble.reveal()),
            Stage::Quiz => RevealedAnswers::Quiz(self.quiz.reveal()),
            Stage::Pronunciation => {
                self.drill.cancel_evaluation();
                RevealedAnswers::Pronunciation(self.drill.targets().to_vec())
            }
            Stage::Scenario | Stage::Vocabulary | Stage::Completion => RevealedAnswers::None,
        };
        let current = self.pipeline.reveal_stage(stage)?;
        Ok(RevealResult {
            stage,
            current,
            revealed,
        })
    }

    /// Claims the pronunciation drill for `line` and returns the phrase.
    pub fn begin_pronunciation(&mut self, line: usize) -> Result<String, RunError> {
        self.pipeline.ensure_current(Stage::Pronunciation)?;
        self.touched_at = Utc::now();
        Ok(self.drill.begin_evaluation(line)?.to_string())
    }

    pub fn record_pronunciation(&mut self, result: &PronunciationResult) -> Result<u8, RunError> {
        Ok(self.drill.record_result(result)?)
    }

    pub fn cancel_pronunciation(&mut self) {
        self.drill.cancel_evaluation();
    }
}

#[derive(Default)]
pub struct LessonRuns {
    runs: Mutex<HashMap<String, LessonRun>>,
}

impl LessonRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `run`, dropping stale runs first. Returns its view.
    pub fn start(&self, run: LessonRun) -> RunView {
        let view = run.view();
        let mut runs = self.runs.lock();
        let cutoff = Utc::now() - chrono::Duration::hours(RUN_TTL_HOURS);
        runs.retain(|_, r| r.touched_at > cutoff);
        runs.insert(run.id.clone(), run);
        view
    }

    pub fn view(&self, id: &str) -> Option<RunView> {
        self.runs.lock().get(id).map(LessonRun::view)
    }

    /// Runs `f` on the run under the registry lock.
    pub fn with_run<R>(&self, id: &str, f: impl FnOnce(&mut LessonRun) -> R) -> Option<R> {
        self.runs.lock().get_mut(id).map(f)
    }

    pub fn remove(&self, id: &str) -> Option<LessonRun> {
        self.runs.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
