use crate::models::{Lesson, Module, Profile, SpeakerRole, TranscriptTurn};

pub const TUTOR_SYSTEM_PROMPT: &str = "You are an expert English teacher who designs \
personalised lessons for adult learners. Always answer with a single JSON object that \
matches the requested shape exactly, without commentary.";

fn learner_summary(profile: &Profile) -> String {
    let interests = if profile.interests.is_empty() {
        "general everyday topics".to_string()
    } else {
        profile.interests.join(", ")
    };
    format!(
        "Learner: {name}. Current CEFR level: {current} ({current_desc}). Target level: {target}. Interests: {interests}.",
        name = profile.display_name,
        current = profile.current_level,
        current_desc = profile.current_level.describe(),
        target = profile.target_level,
    )
}

pub fn syllabus_prompt(profile: &Profile) -> String {
    format!(
        "{summary}\n\
Design a course syllabus of 6 to 8 modules that moves the learner from their current \
level towards the target level, themed around their interests.\n\
Return JSON: {{\"modules\": [{{\"title\": string, \"description\": string}}]}}",
        summary = learner_summary(profile),
    )
}

pub fn module_lessons_prompt(profile: &Profile, module: &Module) -> String {
    format!(
        "{summary}\n\
Module: \"{title}\" - {description}\n\
Break this module into 4 or 5 lessons, each focused on one communicative goal.\n\
Return JSON: {{\"lessons\": [{{\"title\": string, \"description\": string}}]}}",
        summary = learner_summary(profile),
        title = module.title,
        description = module.description,
    )
}

pub fn lesson_content_prompt(profile: &Profile, module: &Module, lesson: &Lesson) -> String {
    format!(
        "{summary}\n\
Module: \"{module_title}\". Lesson: \"{lesson_title}\" - {lesson_description}\n\
Write all exercises at CEFR {level} about this lesson topic.\n\
Return JSON with exactly these keys:\n\
{{\"scenario\": string (a short situation or story, 3-5 sentences),\n\
\"vocabulary\": [{{\"word\": string, \"definition\": string, \"example\": string, \"partOfSpeech\": string}}] (6-8 items),\n\
\"quiz\": [{{\"question\": string, \"options\": [string], \"correctIndex\": number, \"explanation\": string}}] (4 items, 4 options each),\n\
\"fillInBlanks\": [{{\"sentence\": string containing ___ once, \"options\": [string], \"correctIndex\": number}}] (4 items),\n\
\"scramble\": {{\"sentence\": string (6-10 words), \"translation\": string}},\n\
\"conversation\": {{\"title\": string, \"lines\": [{{\"speaker\": string, \"role\": \"tutor\" | \"learner\", \"text\": string}}]}} (6-8 lines, alternating)}}",
        summary = learner_summary(profile),
        module_title = module.title,
        lesson_title = lesson.title,
        lesson_description = lesson.description,
        level = profile.current_level,
    )
}

pub fn pronunciation_prompt(target: &str) -> String {
    format!(
        "The attached recording is a learner reading this phrase aloud: \"{target}\".\n\
Rate how accurately and intelligibly it was pronounced on a 0-100 scale.\n\
Return JSON: {{\"score\": number, \"transcript\": string (what you heard), \
\"feedback\": string (one or two actionable tips), \"mispronouncedWords\": [string]}}"
    )
}

pub fn analysis_prompt(profile: &Profile, transcript: &[TranscriptTurn]) -> String {
    let dialogue = transcript
        .iter()
        .map(|turn| {
            let who = match turn.role {
                SpeakerRole::Tutor => "Tutor",
                SpeakerRole::Learner => "Learner",
            };
            format!("{who}: {}", turn.text)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{summary}\n\
Here is a transcript of a spoken practice conversation:\n{dialogue}\n\
Assess only the learner's English. Return JSON: {{\"score\": number (0-100), \
\"summary\": string, \"strengths\": [string], \"improvements\": [string], \
\"corrections\": [{{\"original\": string, \"corrected\": string, \"explanation\": string}}]}}",
        summary = learner_summary(profile),
    )
}

/// System instructions for a live voice practice session.
pub fn live_instructions(profile: &Profile, topic: Option<&str>) -> String {
    let topic = topic
        .map(|t| format!("Steer the conversation towards: {t}."))
        .unwrap_or_default();
    format!(
        "You are a friendly English conversation partner. {summary} \
Speak at a pace and vocabulary suited to CEFR {level}. Keep replies short, ask one \
question at a time, and gently recast mistakes without lecturing. {topic}",
        summary = learner_summary(profile),
        level = profile.current_level,
    )
}
