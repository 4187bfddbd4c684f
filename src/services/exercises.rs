//! Per-exercise state machines. Each one grades learner input against the
//! generated payload and reports completion, with a score for graded kinds.

use rand::seq::SliceRandom;
use serde::Serialize;
use thiserror::Error;

use crate::models::{FillBlankItem, PronunciationResult, QuizQuestion, ScrambleExercise};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExerciseError {
    #[error("item {index} does not exist (have {len})")]
    NoSuchItem { index: usize, len: usize },
    #[error("option {option} does not exist for item {index}")]
    NoSuchOption { index: usize, option: usize },
    #[error("{0} unanswered item(s) remain")]
    Unanswered(usize),
    #[error("exercise already finished")]
    Finished,
    #[error("an evaluation is already in progress")]
    EvaluationPending,
    #[error("no evaluation is in progress")]
    NoEvaluation,
}

fn percent(correct: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((correct as f64 * 100.0) / total as f64).round() as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizReport {
    pub correct: usize,
    pub total: usize,
    pub score: u8,
}

#[derive(Debug, Clone)]
pub struct QuizSession {
    questions: Vec<QuizQuestion>,
    answers: Vec<Option<usize>>,
    report: Option<QuizReport>,
    revealed: bool,
}

impl QuizSession {
    pub fn new(questions: Vec<QuizQuestion>) -> Self {
        let answers = vec![None; questions.len()];
        Self {
            questions,
            answers,
            report: None,
            revealed: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.report.is_some() || self.revealed
    }

    pub fn select(&mut self, index: usize, option: usize) -> Result<(), ExerciseError> {
        if self.is_finished() {
            return Err(ExerciseError::Finished);
        }
        let question = self.questions.get(index).ok_or(ExerciseError::NoSuchItem {
            index,
            len: self.questions.len(),
        })?;
        if option >= question.options.len() {
            return Err(ExerciseError::NoSuchOption { index, option });
        }
        self.answers[index] = Some(option);
        Ok(())
    }

    pub fn submit(&mut self) -> Result<QuizReport, ExerciseError> {
        if self.is_finished() {
            return Err(ExerciseError::Finished);
        }
        let unanswered = self.answers.iter().filter(|a| a.is_none()).count();
        if unanswered > 0 {
            return Err(ExerciseError::Unanswered(unanswered));
        }
        let correct = self
            .questions
            .iter()
            .zip(&self.answers)
            .filter(|(q, a)| **a == Some(q.correct_index))
            .count();
        let report = QuizReport {
            correct,
            total: self.questions.len(),
            score: percent(correct, self.questions.len()),
        };
        self.report = Some(report);
        Ok(report)
    }

    /// Correct option per question; ends the quiz without a score.
    pub fn reveal(&mut self) -> Vec<usize> {
        self.revealed = true;
        self.questions.iter().map(|q| q.correct_index).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillBlankCheck {
    pub all_correct: bool,
    /// Per item: `Some(true)` correct, `Some(false)` wrong, `None` unanswered.
    pub items: Vec<Option<bool>>,
}

#[derive(Debug, Clone)]
pub struct FillBlankSession {
    items: Vec<FillBlankItem>,
    selections: Vec<Option<usize>>,
    finished: bool,
}

impl FillBlankSession {
    pub fn new(items: Vec<FillBlankItem>) -> Self {
        let selections = vec![None; items.len()];
        Self {
            items,
            selections,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn select(&mut self, index: usize, option: usize) -> Result<(), ExerciseError> {
        if self.finished {
            return Err(ExerciseError::Finished);
        }
        let item = self.items.get(index).ok_or(ExerciseError::NoSuchItem {
            index,
            len: self.items.len(),
        })?;
        if option >= item.options.len() {
            return Err(ExerciseError::NoSuchOption { index, option });
        }
        self.selections[index] = Some(option);
        Ok(())
    }

    /// The exercise finishes only once every item is right.
    pub fn check(&mut self) -> FillBlankCheck {
        let items: Vec<Option<bool>> = self
            .items
            .iter()
            .zip(&self.selections)
            .map(|(item, sel)| sel.map(|s| s == item.correct_index))
            .collect();
        let all_correct = items.iter().all(|i| *i == Some(true));
        if all_correct {
            self.finished = true;
        }
        FillBlankCheck { all_correct, items }
    }

    pub fn reveal(&mut self) -> Vec<String> {
        self.finished = true;
        self.items
            .iter()
            .map(|item| item.sentence.replacen("___", &item.options[item.correct_index], 1))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScrambleCheck {
    Correct,
    Incorrect,
    Incomplete,
}

#[derive(Debug, Clone)]
pub struct ScrambleSession {
    target: Vec<String>,
    /// Shuffled tokens offered to the learner.
    pool: Vec<String>,
    /// Indices into `pool`, in the order picked.
    assembled: Vec<usize>,
    finished: bool,
}

impl ScrambleSession {
    pub fn new(exercise: &ScrambleExercise) -> Self {
        let target: Vec<String> = exercise.words().into_iter().map(str::to_string).collect();
        let mut pool = target.clone();
        if pool.len() > 1 {
            let mut rng = rand::rng();
            pool.shuffle(&mut rng);
            if pool == target {
                pool.rotate_left(1);
            }
        }
        Self::with_pool(target, pool)
    }

    pub fn with_pool(target: Vec<String>, pool: Vec<String>) -> Self {
        Self {
            target,
            pool,
            assembled: Vec::new(),
            finished: false,
        }
    }

    pub fn pool(&self) -> &[String] {
        &self.pool
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn assembled_sentence(&self) -> String {
        self.assembled
            .iter()
            .map(|&i| self.pool[i].as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn pick(&mut self, token: usize) -> Result<(), ExerciseError> {
        if self.finished {
            return Err(ExerciseError::Finished);
        }
        if token >= self.pool.len() || self.assembled.contains(&token) {
            return Err(ExerciseError::NoSuchItem {
                index: token,
                len: self.pool.len(),
            });
        }
        self.assembled.push(token);
        Ok(())
    }

    pub fn reset(&mut self) {
        if !self.finished {
            self.assembled.clear();
        }
    }

    /// Compares words, so duplicate tokens are interchangeable.
    pub fn check(&mut self) -> ScrambleCheck {
        if self.assembled.len() < self.pool.len() {
            return ScrambleCheck::Incomplete;
        }
        let matches = self
            .assembled
            .iter()
            .map(|&i| &self.pool[i])
            .eq(self.target.iter());
        if matches {
            self.finished = true;
            ScrambleCheck::Correct
        } else {
            ScrambleCheck::Incorrect
        }
    }

    pub fn reveal(&mut self) -> String {
        self.finished = true;
        self.target.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DrillState {
    Idle,
    Evaluating { target: usize },
}

/// Pronunciation practice over a list of phrases; keeps the best score per phrase.
#[derive(Debug, Clone)]
pub struct PronunciationDrill {
    targets: Vec<String>,
    best: Vec<Option<u8>>,
    attempts: Vec<u32>,
    state: DrillState,
}

impl PronunciationDrill {
    pub fn new(targets: Vec<String>) -> Self {
        let len = targets.len();
        Self {
            targets,
            best: vec![None; len],
            attempts: vec![0; len],
            state: DrillState::Idle,
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn state(&self) -> DrillState {
        self.state
    }

    pub fn best_scores(&self) -> &[Option<u8>] {
        &self.best
    }

    /// Moves to `Evaluating` and returns the phrase to score.
    pub fn begin_evaluation(&mut self, target: usize) -> Result<&str, ExerciseError> {
        if let DrillState::Evaluating { .. } = self.state {
            return Err(ExerciseError::EvaluationPending);
        }
        if target >= self.targets.len() {
            return Err(ExerciseError::NoSuchItem {
                index: target,
                len: self.targets.len(),
            });
        }
        self.state = DrillState::Evaluating { target };
        Ok(&self.targets[target])
    }

    pub fn record_result(&mut self, result: &PronunciationResult) -> Result<u8, ExerciseError> {
        let DrillState::Evaluating { target } = self.state else {
            return Err(ExerciseError::NoEvaluation);
        };
        let score = result.score.min(100);
        let best = self.best[target].map_or(score, |b| b.max(score));
        self.best[target] = Some(best);
        self.attempts[target] += 1;
        self.state = DrillState::Idle;
        Ok(best)
    }

    /// Evaluation failed upstream; the attempt is discarded.
    pub fn cancel_evaluation(&mut self) {
        self.state = DrillState::Idle;
    }

    pub fn is_complete(&self) -> bool {
        self.best.iter().all(Option::is_some)
    }

    /// Rounded mean of the best score per phrase, once every phrase has one.
    pub fn score(&self) -> Option<u8> {
        if self.targets.is_empty() || !self.is_complete() {
            return None;
        }
        let sum: u32 = self.best.iter().flatten().map(|&s| u32::from(s)).sum();
        Some((f64::from(sum) / self.best.len() as f64).round() as u8)
    }
}
