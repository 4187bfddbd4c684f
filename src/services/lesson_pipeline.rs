//! Fixed stage sequence for one lesson run and the final score rule.
//!
//! Stages advance strictly in order. `reveal` is the only shortcut: it
//! completes the current stage without reward, so a revealed graded stage
//! contributes a score of 0. The final score is the minimum over the graded
//! stages (quiz, pronunciation).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Scenario,
    Vocabulary,
    FillInBlank,
    Scramble,
    Quiz,
    Pronunciation,
    Completion,
}

impl Stage {
    pub const ORDER: [Stage; 7] = [
        Stage::Scenario,
        Stage::Vocabulary,
        Stage::FillInBlank,
        Stage::Scramble,
        Stage::Quiz,
        Stage::Pronunciation,
        Stage::Completion,
    ];

    pub fn is_graded(self) -> bool {
        matches!(self, Stage::Quiz | Stage::Pronunciation)
    }

    pub fn next(self) -> Option<Stage> {
        let idx = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Scenario => "scenario",
            Stage::Vocabulary => "vocabulary",
            Stage::FillInBlank => "fillInBlank",
            Stage::Scramble => "scramble",
            Stage::Quiz => "quiz",
            Stage::Pronunciation => "pronunciation",
            Stage::Completion => "completion",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "score", rename_all = "camelCase")]
pub enum StageOutcome {
    Done,
    Scored(u8),
    Revealed,
}

impl StageOutcome {
    /// Score contributed to the aggregate; `None` for informational stages.
    fn graded_score(self, stage: Stage) -> Option<u8> {
        if !stage.is_graded() {
            return None;
        }
        match self {
            StageOutcome::Scored(score) => Some(score),
            StageOutcome::Revealed | StageOutcome::Done => Some(0),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("stage {got} is not current (expected {expected})")]
    OutOfOrder { expected: Stage, got: Stage },
    #[error("stage {0} requires a score")]
    ScoreRequired(Stage),
    #[error("stage {0} is not graded")]
    UnexpectedScore(Stage),
    #[error("score {0} is outside 0..=100")]
    ScoreOutOfRange(u8),
    #[error("lesson run is already complete")]
    AlreadyComplete,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPipeline {
    current: Stage,
    history: Vec<StageRecord>,
}

impl Default for LessonPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl LessonPipeline {
    pub fn new() -> Self {
        Self {
            current: Stage::Scenario,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }

    pub fn is_complete(&self) -> bool {
        self.current == Stage::Completion
    }

    /// Completes `stage`, which must be the current one. Graded stages need
    /// a score, informational stages must not carry one.
    pub fn complete_stage(&mut self, stage: Stage, score: Option<u8>) -> Result<Stage, PipelineError> {
        self.ensure_current(stage)?;
        let outcome = match (stage.is_graded(), score) {
            (true, Some(s)) if s > 100 => return Err(PipelineError::ScoreOutOfRange(s)),
            (true, Some(s)) => StageOutcome::Scored(s),
            (true, None) => return Err(PipelineError::ScoreRequired(stage)),
            (false, Some(_)) => return Err(PipelineError::UnexpectedScore(stage)),
            (false, None) => StageOutcome::Done,
        };
        Ok(self.advance(outcome))
    }

    pub fn reveal_stage(&mut self, stage: Stage) -> Result<Stage, PipelineError> {
        self.ensure_current(stage)?;
        Ok(self.advance(StageOutcome::Revealed))
    }

    /// Weakest graded stage; available once the run reached `Completion`.
    pub fn final_score(&self) -> Option<u8> {
        if !self.is_complete() {
            return None;
        }
        self.history
            .iter()
            .filter_map(|r| r.outcome.graded_score(r.stage))
            .min()
    }

    pub fn ensure_current(&self, stage: Stage) -> Result<(), PipelineError> {
        if self.is_complete() {
            return Err(PipelineError::AlreadyComplete);
        }
        if stage != self.current {
            return Err(PipelineError::OutOfOrder {
                expected: self.current,
                got: stage,
            });
        }
        Ok(())
    }

    fn advance(&mut self, outcome: StageOutcome) -> Stage {
        self.history.push(StageRecord {
            stage: self.current,
            outcome,
        });
        if let Some(next) = self.current.next() {
            self.current = next;
        }
        self.current
    }
}
