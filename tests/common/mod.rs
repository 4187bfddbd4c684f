#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;

use lingo_backend::config::{AiConfig, Config, GenerationTimeouts};
use lingo_backend::db::DatabaseProxy;
use lingo_backend::models::{
    AnalysisResult, CefrLevel, Correction, InteractiveContent, Lesson, LessonOutline, Module,
    ModuleOutline, Profile, ProfileDraft, PronunciationResult, TranscriptTurn,
};
use lingo_backend::services::ai_client::{AiError, ContentGenerator};
use lingo_backend::services::audio::{pcm16_to_wav, AudioClip, OUTPUT_SAMPLE_RATE};
use lingo_backend::services::generation_guard::placeholder_content;
use lingo_backend::services::live::{
    channel_pair, LiveChannels, LiveConnector, LiveError, LiveEvent, LiveRequest, OutboundFrame,
};
use lingo_backend::state::AppState;

/// Deterministic stand-in for the AI provider with call counters and
/// switchable failures.
#[derive(Default)]
pub struct MockGenerator {
    pub syllabus_calls: AtomicUsize,
    pub module_calls: AtomicUsize,
    pub content_calls: AtomicUsize,
    pub fail_content: AtomicBool,
    pub missing_credential: AtomicBool,
    pub content_delay: Option<Duration>,
    pub module_delay: Option<Duration>,
    /// While set, pronunciation evaluations stall for several seconds.
    pub slow_evaluation: AtomicBool,
    pub pronunciation_score: u8,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            pronunciation_score: 60,
            ..Default::default()
        }
    }

    pub fn with_content_delay(delay: Duration) -> Self {
        Self {
            content_delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn with_module_delay(delay: Duration) -> Self {
        Self {
            module_delay: Some(delay),
            ..Self::new()
        }
    }

    fn check_credential(&self) -> Result<(), AiError> {
        if self.missing_credential.load(Ordering::SeqCst) {
            return Err(AiError::NotConfigured("AI_API_KEY"));
        }
        Ok(())
    }
}

pub fn real_content(topic: &str) -> InteractiveContent {
    let mut content = placeholder_content(topic);
    content.placeholder = false;
    content
}

#[async_trait]
impl ContentGenerator for MockGenerator {
    async fn generate_syllabus(&self, _profile: &Profile) -> Result<Vec<ModuleOutline>, AiError> {
        self.check_credential()?;
        self.syllabus_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            ModuleOutline {
                title: "Travel".into(),
                description: "Getting around".into(),
            },
            ModuleOutline {
                title: "Food".into(),
                description: "Ordering and cooking".into(),
            },
        ])
    }

    async fn generate_module_lessons(
        &self,
        _profile: &Profile,
        module: &Module,
    ) -> Result<Vec<LessonOutline>, AiError> {
        self.check_credential()?;
        self.module_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.module_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(vec![
            LessonOutline {
                title: format!("{} basics", module.title),
                description: "First steps".into(),
            },
            LessonOutline {
                title: format!("{} in practice", module.title),
                description: "Real situations".into(),
            },
        ])
    }

    async fn generate_lesson_content(
        &self,
        _profile: &Profile,
        _module: &Module,
        lesson: &Lesson,
    ) -> Result<InteractiveContent, AiError> {
        self.check_credential()?;
        self.content_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.content_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_content.load(Ordering::SeqCst) {
            return Err(AiError::EmptyChoices);
        }
        Ok(real_content(&lesson.title))
    }

    async fn synthesize_speech(&self, _text: &str) -> Result<Vec<u8>, AiError> {
        self.check_credential()?;
        Ok(pcm16_to_wav(&[0, 0, 1, 0], OUTPUT_SAMPLE_RATE)?)
    }

    async fn evaluate_pronunciation(
        &self,
        target: &str,
        _clip: &AudioClip,
    ) -> Result<PronunciationResult, AiError> {
        self.check_credential()?;
        if self.slow_evaluation.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(PronunciationResult {
            score: self.pronunciation_score,
            transcript: target.to_string(),
            feedback: "Clear overall.".into(),
            mispronounced_words: vec![],
        })
    }

    async fn analyze_conversation(
        &self,
        _profile: &Profile,
        transcript: &[TranscriptTurn],
    ) -> Result<AnalysisResult, AiError> {
        self.check_credential()?;
        Ok(AnalysisResult {
            score: 75,
            summary: format!("{} turns analysed", transcript.len()),
            strengths: vec!["fluency".into()],
            improvements: vec!["articles".into()],
            corrections: vec![Correction {
                original: "I go yesterday".into(),
                corrected: "I went yesterday".into(),
                explanation: "past tense".into(),
            }],
        })
    }
}

/// Answers every audio frame with a short scripted exchange.
pub struct MockLiveConnector;

#[async_trait]
impl LiveConnector for MockLiveConnector {
    async fn connect(&self, _request: &LiveRequest) -> Result<LiveChannels, LiveError> {
        let (channels, mut remote) = channel_pair();
        tokio::spawn(async move {
            while let Some(frame) = remote.outbound.recv().await {
                let events = match frame {
                    OutboundFrame::Audio(_) => vec![
                        LiveEvent::InputTranscript {
                            text: "I would like a coffee".into(),
                        },
                        LiveEvent::OutputTranscript {
                            text: "Sure, what size?".into(),
                        },
                        LiveEvent::Audio { data: vec![0; 480] },
                        LiveEvent::TurnComplete,
                    ],
                    OutboundFrame::Text(text) => vec![LiveEvent::OutputTranscript { text }],
                    OutboundFrame::AudioStreamEnd => vec![LiveEvent::TurnComplete],
                    OutboundFrame::Close => break,
                };
                for event in events {
                    if remote.events.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(channels)
    }
}

pub struct TestContext {
    pub state: AppState,
    pub generator: Arc<MockGenerator>,
    _dir: TempDir,
}

impl TestContext {
    pub fn app(&self) -> Router {
        lingo_backend::create_app(self.state.clone())
    }
}

pub fn test_config(database_url: &str) -> Config {
    let mut ai = AiConfig::unconfigured();
    ai.timeouts = GenerationTimeouts {
        syllabus: Duration::from_secs(5),
        module_lessons: Duration::from_secs(5),
        lesson_content: Duration::from_millis(500),
    };
    Config {
        host: [127, 0, 0, 1].into(),
        port: 0,
        log_level: "warn".into(),
        log_dir: None,
        database_url: database_url.to_string(),
        streak_utc_offset_minutes: 0,
        ai,
    }
}

pub async fn test_db() -> (DatabaseProxy, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("lingo.db").display());
    let proxy = DatabaseProxy::connect(&url).await.expect("database");
    (proxy, dir)
}

pub async fn test_context_with(generator: MockGenerator) -> TestContext {
    let (proxy, dir) = test_db().await;
    let generator = Arc::new(generator);
    let config = test_config(proxy.url());
    let state = AppState::new(
        config,
        proxy,
        generator.clone(),
        Arc::new(MockLiveConnector),
    );
    TestContext {
        state,
        generator,
        _dir: dir,
    }
}

pub async fn test_context() -> TestContext {
    test_context_with(MockGenerator::new()).await
}

pub fn draft(username: &str) -> ProfileDraft {
    ProfileDraft {
        username: username.to_string(),
        display_name: username.to_uppercase(),
        current_level: CefrLevel::A2,
        target_level: CefrLevel::B1,
        interests: vec!["travel".into(), "food".into()],
    }
}

pub async fn send(app: Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn read_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Sends a request and returns status plus decoded JSON body.
pub async fn call(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let response = send(app, method, uri, body).await;
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return (status, serde_json::Value::Null);
    }
    (status, read_json(response).await)
}
