use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::config::AiConfig;
use crate::models::{
    AnalysisResult, InteractiveContent, Lesson, LessonOutline, Module, ModuleOutline, Profile,
    PronunciationResult, TranscriptTurn,
};
use crate::services::audio::{pcm16_to_wav, AudioClip, AudioError, OUTPUT_SAMPLE_RATE};
use crate::services::decode::{
    decode_payload, DecodeError, ModuleLessonsPayload, SyllabusPayload, Validate,
};
use crate::services::prompts;

const MAX_RETRIES: usize = 3;
const BASE_BACKOFF_MS: u64 = 200;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI client not configured: {0} is missing")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("response decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("empty response")]
    EmptyChoices,
    #[error("audio conversion failed: {0}")]
    Audio(#[from] AudioError),
}

impl From<serde_json::Error> for AiError {
    fn from(err: serde_json::Error) -> Self {
        AiError::Decode(DecodeError::Json(err))
    }
}

/// Opaque generative capability used by the guard, the exercise routes and
/// the conversation analysis.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_syllabus(&self, profile: &Profile) -> Result<Vec<ModuleOutline>, AiError>;

    async fn generate_module_lessons(
        &self,
        profile: &Profile,
        module: &Module,
    ) -> Result<Vec<LessonOutline>, AiError>;

    async fn generate_lesson_content(
        &self,
        profile: &Profile,
        module: &Module,
        lesson: &Lesson,
    ) -> Result<InteractiveContent, AiError>;

    /// Returns WAV bytes.
    async fn synthesize_speech(&self, text: &str) -> Result<Vec<u8>, AiError>;

    async fn evaluate_pronunciation(
        &self,
        target: &str,
        clip: &AudioClip,
    ) -> Result<PronunciationResult, AiError>;

    async fn analyze_conversation(
        &self,
        profile: &Profile,
        transcript: &[TranscriptTurn],
    ) -> Result<AnalysisResult, AiError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub model: Option<String>,
    pub choices: Vec<ChatChoice>,
}

impl ChatResponse {
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|c| !c.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

/// `ContentGenerator` backed by an OpenAI-compatible HTTP API.
#[derive(Clone)]
pub struct LlmContentClient {
    config: AiConfig,
    client: reqwest::Client,
}

impl LlmContentClient {
    pub fn new(config: AiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    pub fn is_available(&self) -> bool {
        self.config.api_key().is_some()
    }

    fn api_key(&self) -> Result<&str, AiError> {
        self.config.api_key().ok_or(AiError::NotConfigured("AI_API_KEY"))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.api_endpoint.trim_end_matches('/'))
    }

    /// JSON-mode chat completion decoded strictly into `T`.
    async fn complete_json<T>(&self, user_prompt: &str) -> Result<T, AiError>
    where
        T: serde::de::DeserializeOwned + Validate,
    {
        let messages = [
            ChatMessage {
                role: "system".into(),
                content: prompts::TUTOR_SYSTEM_PROMPT.into(),
            },
            ChatMessage {
                role: "user".into(),
                content: user_prompt.into(),
            },
        ];
        let payload = serde_json::json!({
            "model": self.config.text_model,
            "messages": messages,
            "response_format": { "type": "json_object" },
            "stream": false
        });
        let raw = self.chat_content(&payload).await?;
        Ok(decode_payload::<T>(&raw)?)
    }

    async fn chat_content(&self, payload: &serde_json::Value) -> Result<String, AiError> {
        let api_key = self.api_key()?;
        let bytes = self
            .post_with_retry(&self.url("chat/completions"), api_key, payload)
            .await?;
        let response: ChatResponse = serde_json::from_slice(&bytes)?;
        response
            .first_content()
            .map(str::to_string)
            .ok_or(AiError::EmptyChoices)
    }

    async fn post_with_retry(
        &self,
        url: &str,
        api_key: &str,
        payload: &serde_json::Value,
    ) -> Result<Vec<u8>, AiError> {
        let mut last_error: Option<AiError> = None;

        for retry in 0..=MAX_RETRIES {
            match self.client.post(url).bearer_auth(api_key).json(payload).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.bytes().await?.to_vec());
                    }
                    let body = resp.text().await.unwrap_or_default();
                    let err = AiError::HttpStatus { status, body };
                    if retry < MAX_RETRIES && is_retryable(status) {
                        warn!(retry, ?status, url, "AI request failed, retrying");
                        sleep(backoff(retry)).await;
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    if retry < MAX_RETRIES && !e.is_timeout() {
                        warn!(retry, error = %e, url, "AI request error, retrying");
                        sleep(backoff(retry)).await;
                        last_error = Some(AiError::Request(e));
                        continue;
                    }
                    return Err(AiError::Request(e));
                }
            }
        }
        Err(last_error.unwrap_or(AiError::EmptyChoices))
    }
}

#[async_trait]
impl ContentGenerator for LlmContentClient {
    async fn generate_syllabus(&self, profile: &Profile) -> Result<Vec<ModuleOutline>, AiError> {
        let payload: SyllabusPayload = self
            .complete_json(&prompts::syllabus_prompt(profile))
            .await?;
        Ok(payload.modules)
    }

    async fn generate_module_lessons(
        &self,
        profile: &Profile,
        module: &Module,
    ) -> Result<Vec<LessonOutline>, AiError> {
        let payload: ModuleLessonsPayload = self
            .complete_json(&prompts::module_lessons_prompt(profile, module))
            .await?;
        Ok(payload.lessons)
    }

    async fn generate_lesson_content(
        &self,
        profile: &Profile,
        module: &Module,
        lesson: &Lesson,
    ) -> Result<InteractiveContent, AiError> {
        self.complete_json(&prompts::lesson_content_prompt(profile, module, lesson))
            .await
    }

    async fn synthesize_speech(&self, text: &str) -> Result<Vec<u8>, AiError> {
        let api_key = self.api_key()?;
        let payload = serde_json::json!({
            "model": self.config.speech_model,
            "voice": self.config.speech_voice,
            "input": text,
            "response_format": "wav"
        });
        let bytes = self
            .post_with_retry(&self.url("audio/speech"), api_key, &payload)
            .await?;
        if bytes.is_empty() {
            return Err(AiError::EmptyChoices);
        }
        // some compatible providers ignore response_format and send raw PCM16
        if bytes.starts_with(b"RIFF") {
            Ok(bytes)
        } else {
            Ok(pcm16_to_wav(&bytes, OUTPUT_SAMPLE_RATE)?)
        }
    }

    async fn evaluate_pronunciation(
        &self,
        target: &str,
        clip: &AudioClip,
    ) -> Result<PronunciationResult, AiError> {
        let payload = serde_json::json!({
            "model": self.config.pronunciation_model,
            "modalities": ["text"],
            "messages": [
                { "role": "system", "content": prompts::TUTOR_SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": prompts::pronunciation_prompt(target) },
                        {
                            "type": "input_audio",
                            "input_audio": {
                                "data": base64::engine::general_purpose::STANDARD.encode(&clip.data),
                                "format": clip.format.as_str()
                            }
                        }
                    ]
                }
            ]
        });
        let raw = self.chat_content(&payload).await?;
        Ok(decode_payload::<PronunciationResult>(&raw)?)
    }

    async fn analyze_conversation(
        &self,
        profile: &Profile,
        transcript: &[TranscriptTurn],
    ) -> Result<AnalysisResult, AiError> {
        self.complete_json(&prompts::analysis_prompt(profile, transcript))
            .await
    }
}

fn backoff(retry: usize) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS * (1 << retry))
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}
