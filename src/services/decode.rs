//! Strict decoding of model output.
//!
//! Model responses are parsed into typed payloads and then structurally
//! validated; any failure yields a `DecodeError` and the payload is dropped
//! whole.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{
    AnalysisResult, InteractiveContent, LessonOutline, ModuleOutline, PronunciationResult,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("incomplete payload: {0}")]
    Incomplete(String),
}

/// Structural checks that serde alone cannot express.
pub trait Validate {
    fn validate(&self) -> Result<(), DecodeError>;
}

pub fn decode_payload<T>(raw: &str) -> Result<T, DecodeError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_str(strip_code_fence(raw))?;
    value.validate()?;
    Ok(value)
}

/// Removes a surrounding markdown code fence (with optional language tag).
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn incomplete(what: impl Into<String>) -> DecodeError {
    DecodeError::Incomplete(what.into())
}

fn require_text(value: &str, what: &str) -> Result<(), DecodeError> {
    if value.trim().is_empty() {
        Err(incomplete(format!("{what} is empty")))
    } else {
        Ok(())
    }
}

fn require_score(score: u8, what: &str) -> Result<(), DecodeError> {
    if score > 100 {
        Err(incomplete(format!("{what} score {score} exceeds 100")))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyllabusPayload {
    pub modules: Vec<ModuleOutline>,
}

impl Validate for SyllabusPayload {
    fn validate(&self) -> Result<(), DecodeError> {
        if self.modules.is_empty() {
            return Err(incomplete("syllabus has no modules"));
        }
        for module in &self.modules {
            require_text(&module.title, "module title")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleLessonsPayload {
    pub lessons: Vec<LessonOutline>,
}

impl Validate for ModuleLessonsPayload {
    fn validate(&self) -> Result<(), DecodeError> {
        if self.lessons.is_empty() {
            return Err(incomplete("module has no lessons"));
        }
        for lesson in &self.lessons {
            require_text(&lesson.title, "lesson title")?;
        }
        Ok(())
    }
}

/// Decodes a lesson blob read back from storage. Placeholders are accepted;
/// everything else must be as well-formed as freshly generated content.
pub fn decode_stored_content(raw: &str) -> Result<InteractiveContent, DecodeError> {
    let content: InteractiveContent = serde_json::from_str(raw)?;
    check_content_shape(&content)?;
    Ok(content)
}

impl Validate for InteractiveContent {
    fn validate(&self) -> Result<(), DecodeError> {
        check_content_shape(self)?;
        if self.placeholder {
            return Err(incomplete("generated content is flagged as placeholder"));
        }
        Ok(())
    }
}

fn check_content_shape(content: &InteractiveContent) -> Result<(), DecodeError> {
    require_text(&content.scenario, "scenario")?;
    if content.vocabulary.is_empty() {
        return Err(incomplete("vocabulary is empty"));
    }
    if content.quiz.is_empty() {
        return Err(incomplete("quiz is empty"));
    }
    for (i, question) in content.quiz.iter().enumerate() {
        if question.options.len() < 2 || question.correct_index >= question.options.len() {
            return Err(incomplete(format!("quiz question {i} has invalid options")));
        }
    }
    if content.fill_in_blanks.is_empty() {
        return Err(incomplete("fillInBlanks is empty"));
    }
    for (i, item) in content.fill_in_blanks.iter().enumerate() {
        if !item.sentence.contains("___") {
            return Err(incomplete(format!("fill-in-blank {i} has no gap")));
        }
        if item.options.is_empty() || item.correct_index >= item.options.len() {
            return Err(incomplete(format!("fill-in-blank {i} has invalid options")));
        }
    }
    if content.scramble.words().len() < 2 {
        return Err(incomplete("scramble sentence needs at least two words"));
    }
    if content.conversation.learner_lines().next().is_none() {
        return Err(incomplete("conversation has no learner lines"));
    }
    Ok(())
}

impl Validate for PronunciationResult {
    fn validate(&self) -> Result<(), DecodeError> {
        require_score(self.score, "pronunciation")?;
        require_text(&self.feedback, "pronunciation feedback")
    }
}

impl Validate for AnalysisResult {
    fn validate(&self) -> Result<(), DecodeError> {
        require_score(self.score, "analysis")?;
        require_text(&self.summary, "analysis summary")
    }
}
