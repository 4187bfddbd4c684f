//! Lazy, at-most-once generation of syllabus, module lessons and lesson
//! content.
//!
//! Every path that gates a user transition surfaces failures and leaves the
//! entity untouched. Background prefetch never fails: it attaches a
//! placeholder of the real shape, flagged so that the next gated open
//! regenerates it.
//!
//! Callers take a [`GenerationClaim`] before reading the entity and hold it
//! until the result is persisted, so a second request either sees the stored
//! result or gets `InProgress`.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::GenerationTimeouts;
use crate::models::{
    ConversationLine, ConversationScript, Course, FillBlankItem, InteractiveContent, Lesson,
    Module, Profile, QuizQuestion, ScrambleExercise, SpeakerRole, VocabularyItem,
};
use crate::services::ai_client::{AiError, ContentGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GenerationKind {
    Syllabus,
    ModuleLessons,
    LessonContent,
}

impl GenerationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            GenerationKind::Syllabus => "syllabus",
            GenerationKind::ModuleLessons => "module lessons",
            GenerationKind::LessonContent => "lesson content",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GenerationOutcome {
    /// Content already present and well-formed; nothing was called.
    Cached,
    Generated,
    Placeholder,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no AI credential is configured")]
    MissingCredential,
    #[error("{kind} generation timed out after {}s", after.as_secs())]
    TimedOut {
        kind: GenerationKind,
        after: Duration,
    },
    #[error("{kind} generation failed: {source}")]
    Failed {
        kind: GenerationKind,
        #[source]
        source: AiError,
    },
    #[error("generation already in progress for {key}")]
    InProgress { key: String },
    #[error("lesson {0} not found in module")]
    LessonNotFound(String),
}

pub struct GenerationGuard {
    generator: Arc<dyn ContentGenerator>,
    timeouts: GenerationTimeouts,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Exclusive right to generate one entity. Holders read fresh state, generate
/// and persist before letting go; the key is released on drop, on success,
/// error or cancellation.
pub struct GenerationClaim {
    registry: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl GenerationClaim {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for GenerationClaim {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

fn course_key(profile_id: &str) -> String {
    format!("syllabus:{profile_id}")
}

fn module_key(module_id: &str) -> String {
    format!("module:{module_id}")
}

fn lesson_key(lesson_id: &str) -> String {
    format!("lesson:{lesson_id}")
}

impl GenerationGuard {
    pub fn new(generator: Arc<dyn ContentGenerator>, timeouts: GenerationTimeouts) -> Self {
        Self {
            generator,
            timeouts,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn generator(&self) -> Arc<dyn ContentGenerator> {
        Arc::clone(&self.generator)
    }

    pub fn claim_course(&self, profile_id: &str) -> Result<GenerationClaim, GenerationError> {
        self.claim(course_key(profile_id))
    }

    pub fn claim_module(&self, module_id: &str) -> Result<GenerationClaim, GenerationError> {
        self.claim(module_key(module_id))
    }

    pub fn claim_lesson(&self, lesson_id: &str) -> Result<GenerationClaim, GenerationError> {
        self.claim(lesson_key(lesson_id))
    }

    /// Returns `existing` untouched when present, otherwise generates a syllabus.
    pub async fn ensure_course(
        &self,
        claim: &GenerationClaim,
        profile: &Profile,
        existing: Option<Course>,
    ) -> Result<(Course, GenerationOutcome), GenerationError> {
        debug_assert_eq!(claim.key(), course_key(&profile.id));
        if let Some(course) = existing {
            return Ok((course, GenerationOutcome::Cached));
        }

        let outlines = self
            .bounded(
                GenerationKind::Syllabus,
                self.timeouts.syllabus,
                self.generator.generate_syllabus(profile),
            )
            .await?;

        let course = Course {
            profile_id: profile.id.clone(),
            modules: outlines.into_iter().map(Module::from_outline).collect(),
        };
        info!(
            username = %profile.username,
            modules = course.modules.len(),
            "syllabus generated"
        );
        Ok((course, GenerationOutcome::Generated))
    }

    pub async fn ensure_module_lessons(
        &self,
        claim: &GenerationClaim,
        profile: &Profile,
        module: &mut Module,
    ) -> Result<GenerationOutcome, GenerationError> {
        debug_assert_eq!(claim.key(), module_key(&module.id));
        if module.generated && !module.lessons.is_empty() {
            return Ok(GenerationOutcome::Cached);
        }

        let outlines = {
            let snapshot: &Module = module;
            self.bounded(
                GenerationKind::ModuleLessons,
                self.timeouts.module_lessons,
                self.generator.generate_module_lessons(profile, snapshot),
            )
            .await?
        };

        module.lessons = outlines.into_iter().map(Lesson::from_outline).collect();
        module.generated = true;
        module.refresh_completion();
        info!(
            module_id = %module.id,
            lessons = module.lessons.len(),
            "module lessons generated"
        );
        Ok(GenerationOutcome::Generated)
    }

    pub async fn ensure_lesson_content(
        &self,
        claim: &GenerationClaim,
        profile: &Profile,
        module: &mut Module,
        lesson_id: &str,
    ) -> Result<GenerationOutcome, GenerationError> {
        debug_assert_eq!(claim.key(), lesson_key(lesson_id));
        let index = lesson_index(module, lesson_id)?;
        if module.lessons[index].has_complete_content() {
            return Ok(GenerationOutcome::Cached);
        }

        let content = {
            let snapshot: &Module = module;
            self.bounded(
                GenerationKind::LessonContent,
                self.timeouts.lesson_content,
                self.generator
                    .generate_lesson_content(profile, snapshot, &snapshot.lessons[index]),
            )
            .await?
        };

        module.lessons[index].content = Some(content);
        info!(%lesson_id, "lesson content generated");
        Ok(GenerationOutcome::Generated)
    }

    /// Background warm-up of a lesson the learner has not opened yet.
    pub async fn prefetch_lesson_content(
        &self,
        claim: &GenerationClaim,
        profile: &Profile,
        module: &mut Module,
        lesson_id: &str,
    ) -> GenerationOutcome {
        match self.ensure_lesson_content(claim, profile, module, lesson_id).await {
            Ok(outcome) => outcome,
            Err(GenerationError::LessonNotFound(_)) => GenerationOutcome::Cached,
            Err(err) => {
                warn!(%lesson_id, error = %err, "prefetch failed, attaching placeholder");
                if let Some(lesson) = module.lessons.iter_mut().find(|l| l.id == lesson_id) {
                    if lesson.content.is_none() {
                        lesson.content = Some(placeholder_content(&lesson.title));
                    }
                }
                GenerationOutcome::Placeholder
            }
        }
    }

    fn claim(&self, key: String) -> Result<GenerationClaim, GenerationError> {
        let mut registry = self.in_flight.lock();
        if !registry.insert(key.clone()) {
            return Err(GenerationError::InProgress { key });
        }
        Ok(GenerationClaim {
            registry: Arc::clone(&self.in_flight),
            key,
        })
    }

    async fn bounded<T, F>(
        &self,
        kind: GenerationKind,
        limit: Duration,
        call: F,
    ) -> Result<T, GenerationError>
    where
        F: Future<Output = Result<T, AiError>>,
    {
        match tokio::time::timeout(limit, call).await {
            Err(_) => {
                warn!(%kind, timeout_secs = limit.as_secs(), "generation timed out");
                Err(GenerationError::TimedOut { kind, after: limit })
            }
            Ok(Err(AiError::NotConfigured(_))) => Err(GenerationError::MissingCredential),
            Ok(Err(source)) => {
                warn!(%kind, error = %source, "generation failed");
                Err(GenerationError::Failed { kind, source })
            }
            Ok(Ok(value)) => Ok(value),
        }
    }
}

fn lesson_index(module: &Module, lesson_id: &str) -> Result<usize, GenerationError> {
    module
        .lessons
        .iter()
        .position(|l| l.id == lesson_id)
        .ok_or_else(|| GenerationError::LessonNotFound(lesson_id.to_string()))
}

/// Deterministic stand-in with the same shape as generated content.
pub fn placeholder_content(topic: &str) -> InteractiveContent {
    let topic = if topic.trim().is_empty() {
        "today's topic"
    } else {
        topic.trim()
    };

    InteractiveContent {
        scenario: format!("You are practising English about {topic}. Read the dialogue and try the exercises."),
        vocabulary: vec![
            VocabularyItem {
                word: "practice".into(),
                definition: "repeated exercise to improve a skill".into(),
                example: "Daily practice makes speaking easier.".into(),
                part_of_speech: Some("noun".into()),
            },
            VocabularyItem {
                word: "improve".into(),
                definition: "to become better".into(),
                example: "I want to improve my English.".into(),
                part_of_speech: Some("verb".into()),
            },
        ],
        quiz: vec![QuizQuestion {
            question: "Which word means \"to become better\"?".into(),
            options: vec!["improve".into(), "forget".into(), "arrive".into(), "close".into()],
            correct_index: 0,
            explanation: Some("\"Improve\" means to become better.".into()),
        }],
        fill_in_blanks: vec![FillBlankItem {
            sentence: "Daily ___ makes speaking easier.".into(),
            options: vec!["practice".into(), "silence".into(), "weather".into()],
            correct_index: 0,
        }],
        scramble: ScrambleExercise {
            sentence: "I want to improve my English".into(),
            translation: None,
        },
        conversation: ConversationScript {
            title: format!("Talking about {topic}"),
            lines: vec![
                ConversationLine {
                    speaker: "Tutor".into(),
                    role: SpeakerRole::Tutor,
                    text: format!("What would you like to learn about {topic}?"),
                },
                ConversationLine {
                    speaker: "You".into(),
                    role: SpeakerRole::Learner,
                    text: "I would like to learn some useful phrases.".into(),
                },
            ],
        },
        placeholder: true,
    }
}
