//! Learner, course and generated-content types shared by the repository,
//! the generation guard and the HTTP layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// CEFR proficiency, ordered from A1 (lowest) to C2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CefrLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl CefrLevel {
    pub const ALL: [CefrLevel; 6] = [
        CefrLevel::A1,
        CefrLevel::A2,
        CefrLevel::B1,
        CefrLevel::B2,
        CefrLevel::C1,
        CefrLevel::C2,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            CefrLevel::A1 => "A1",
            CefrLevel::A2 => "A2",
            CefrLevel::B1 => "B1",
            CefrLevel::B2 => "B2",
            CefrLevel::C1 => "C1",
            CefrLevel::C2 => "C2",
        }
    }

    pub const fn describe(self) -> &'static str {
        match self {
            CefrLevel::A1 => "beginner",
            CefrLevel::A2 => "elementary",
            CefrLevel::B1 => "intermediate",
            CefrLevel::B2 => "upper intermediate",
            CefrLevel::C1 => "advanced",
            CefrLevel::C2 => "proficient",
        }
    }
}

impl fmt::Display for CefrLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCefrLevel(pub String);

impl fmt::Display for UnknownCefrLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown CEFR level: {}", self.0)
    }
}

impl std::error::Error for UnknownCefrLevel {}

impl FromStr for CefrLevel {
    type Err = UnknownCefrLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        CefrLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == upper)
            .ok_or(UnknownCefrLevel(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub current_level: CefrLevel,
    pub target_level: CefrLevel,
    pub level: u32,
    pub xp: u64,
    pub total_xp: u64,
    pub streak: u32,
    pub longest_streak: u32,
    pub interests: Vec<String>,
    pub last_practice_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Onboarding input for `upsert_profile`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDraft {
    pub username: String,
    pub display_name: String,
    pub current_level: CefrLevel,
    pub target_level: CefrLevel,
    #[serde(default)]
    pub interests: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub profile_id: String,
    pub modules: Vec<Module>,
}

impl Course {
    pub fn module(&self, module_id: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == module_id)
    }

    pub fn module_mut(&mut self, module_id: &str) -> Option<&mut Module> {
        self.modules.iter_mut().find(|m| m.id == module_id)
    }

    /// Index of the module that owns `lesson_id`, plus the lesson's index inside it.
    pub fn locate_lesson(&self, lesson_id: &str) -> Option<(usize, usize)> {
        self.modules.iter().enumerate().find_map(|(mi, module)| {
            module
                .lessons
                .iter()
                .position(|lesson| lesson.id == lesson_id)
                .map(|li| (mi, li))
        })
    }

    pub fn is_completed(&self) -> bool {
        !self.modules.is_empty() && self.modules.iter().all(|m| m.completed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: String,
    pub title: String,
    pub description: String,
    pub generated: bool,
    pub completed: bool,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

impl Module {
    pub fn from_outline(outline: ModuleOutline) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: outline.title,
            description: outline.description,
            generated: false,
            completed: false,
            lessons: Vec::new(),
        }
    }

    /// Re-derives `completed`; a module is complete iff it has lessons and all are complete.
    pub fn refresh_completion(&mut self) -> bool {
        self.completed = !self.lessons.is_empty() && self.lessons.iter().all(|l| l.completed);
        self.completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub score: Option<u8>,
    pub content: Option<InteractiveContent>,
}

impl Lesson {
    pub fn from_outline(outline: LessonOutline) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: outline.title,
            description: outline.description,
            completed: false,
            score: None,
            content: None,
        }
    }

    pub fn has_complete_content(&self) -> bool {
        self.content.as_ref().is_some_and(InteractiveContent::is_complete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleOutline {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonOutline {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveContent {
    pub scenario: String,
    pub vocabulary: Vec<VocabularyItem>,
    pub quiz: Vec<QuizQuestion>,
    pub fill_in_blanks: Vec<FillBlankItem>,
    pub scramble: ScrambleExercise,
    pub conversation: ConversationScript,
    #[serde(default)]
    pub placeholder: bool,
}

impl InteractiveContent {
    pub fn is_complete(&self) -> bool {
        !self.placeholder
            && !self.scenario.trim().is_empty()
            && !self.vocabulary.is_empty()
            && !self.quiz.is_empty()
            && !self.fill_in_blanks.is_empty()
            && self.scramble.words().len() >= 2
            && self.conversation.learner_lines().next().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyItem {
    pub word: String,
    pub definition: String,
    pub example: String,
    #[serde(default)]
    pub part_of_speech: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillBlankItem {
    /// Sentence with a single `___` gap.
    pub sentence: String,
    pub options: Vec<String>,
    pub correct_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrambleExercise {
    pub sentence: String,
    #[serde(default)]
    pub translation: Option<String>,
}

impl ScrambleExercise {
    pub fn words(&self) -> Vec<&str> {
        self.sentence.split_whitespace().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    Tutor,
    Learner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationLine {
    pub speaker: String,
    pub role: SpeakerRole,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationScript {
    pub title: String,
    pub lines: Vec<ConversationLine>,
}

impl ConversationScript {
    pub fn learner_lines(&self) -> impl Iterator<Item = &ConversationLine> {
        self.lines.iter().filter(|l| l.role == SpeakerRole::Learner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PronunciationResult {
    pub score: u8,
    #[serde(default)]
    pub transcript: String,
    pub feedback: String,
    #[serde(default)]
    pub mispronounced_words: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correction {
    pub original: String,
    pub corrected: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub score: u8,
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub corrections: Vec<Correction>,
}

/// One utterance of a live conversation, as transcribed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptTurn {
    pub role: SpeakerRole,
    pub text: String,
}
