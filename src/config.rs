use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, Offset, Utc};

const DEFAULT_API_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_TEXT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_SPEECH_MODEL: &str = "gpt-4o-mini-tts";
const DEFAULT_SPEECH_VOICE: &str = "alloy";
const DEFAULT_PRONUNCIATION_MODEL: &str = "gpt-4o-audio-preview";
const DEFAULT_LIVE_MODEL: &str = "gemini-2.0-flash-live-001";
const DEFAULT_LIVE_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_SYLLABUS_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MODULE_LESSONS_TIMEOUT_MS: u64 = 45_000;
const DEFAULT_LESSON_CONTENT_TIMEOUT_MS: u64 = 90_000;

/// Process-wide settings, read once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    /// Set when `ENABLE_FILE_LOGS` is on; defaults next to the database.
    pub log_dir: Option<PathBuf>,
    pub database_url: String,
    pub streak_utc_offset_minutes: i32,
    pub ai: AiConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env_string("PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = env_string("HOST")
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = env_string("RUST_LOG").unwrap_or_else(|| "info".to_string());
        let log_dir = env_flag("ENABLE_FILE_LOGS").then(|| {
            env_string("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir().join("logs"))
        });

        let database_url = env_string("DATABASE_URL")
            .unwrap_or_else(|| format!("sqlite:{}?mode=rwc", default_sqlite_path().display()));

        let streak_utc_offset_minutes = env_string("STREAK_UTC_OFFSET_MINUTES")
            .and_then(|value| value.parse::<i32>().ok())
            .filter(|minutes| minutes.abs() < 24 * 60)
            .unwrap_or(0);

        Self {
            host,
            port,
            log_level,
            log_dir,
            database_url,
            streak_utc_offset_minutes,
            ai: AiConfig::from_env(),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Calendar day used for streak bookkeeping.
    pub fn today(&self) -> NaiveDate {
        let offset = FixedOffset::east_opt(self.streak_utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        Utc::now().with_timezone(&offset).date_naive()
    }
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub api_endpoint: String,
    pub text_model: String,
    pub speech_model: String,
    pub speech_voice: String,
    pub pronunciation_model: String,
    pub live_model: String,
    pub live_endpoint: String,
    pub request_timeout: Duration,
    pub timeouts: GenerationTimeouts,
}

impl AiConfig {
    pub fn from_env() -> Self {
        let api_key = env_string("AI_API_KEY").or_else(|| env_string("LLM_API_KEY"));
        let api_endpoint = normalize_endpoint(
            env_string("AI_API_ENDPOINT").unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
        );

        Self {
            api_key,
            api_endpoint,
            text_model: env_string("AI_TEXT_MODEL").unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            speech_model: env_string("AI_SPEECH_MODEL")
                .unwrap_or_else(|| DEFAULT_SPEECH_MODEL.to_string()),
            speech_voice: env_string("AI_SPEECH_VOICE")
                .unwrap_or_else(|| DEFAULT_SPEECH_VOICE.to_string()),
            pronunciation_model: env_string("AI_PRONUNCIATION_MODEL")
                .unwrap_or_else(|| DEFAULT_PRONUNCIATION_MODEL.to_string()),
            live_model: env_string("AI_LIVE_MODEL").unwrap_or_else(|| DEFAULT_LIVE_MODEL.to_string()),
            live_endpoint: env_string("AI_LIVE_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_LIVE_ENDPOINT.to_string()),
            request_timeout: Duration::from_millis(
                env_u64("AI_REQUEST_TIMEOUT").unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            ),
            timeouts: GenerationTimeouts::from_env(),
        }
    }

    /// A configuration with no credential, used by tests and offline runs.
    pub fn unconfigured() -> Self {
        Self {
            api_key: None,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            speech_model: DEFAULT_SPEECH_MODEL.to_string(),
            speech_voice: DEFAULT_SPEECH_VOICE.to_string(),
            pronunciation_model: DEFAULT_PRONUNCIATION_MODEL.to_string(),
            live_model: DEFAULT_LIVE_MODEL.to_string(),
            live_endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            timeouts: GenerationTimeouts::default(),
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|v| !v.trim().is_empty())
    }
}

/// Upper bounds for generation calls that gate a user transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationTimeouts {
    pub syllabus: Duration,
    pub module_lessons: Duration,
    pub lesson_content: Duration,
}

impl GenerationTimeouts {
    pub fn from_env() -> Self {
        Self {
            syllabus: Duration::from_millis(
                env_u64("SYLLABUS_TIMEOUT_MS").unwrap_or(DEFAULT_SYLLABUS_TIMEOUT_MS),
            ),
            module_lessons: Duration::from_millis(
                env_u64("MODULE_LESSONS_TIMEOUT_MS").unwrap_or(DEFAULT_MODULE_LESSONS_TIMEOUT_MS),
            ),
            lesson_content: Duration::from_millis(
                env_u64("LESSON_CONTENT_TIMEOUT_MS").unwrap_or(DEFAULT_LESSON_CONTENT_TIMEOUT_MS),
            ),
        }
    }
}

impl Default for GenerationTimeouts {
    fn default() -> Self {
        Self {
            syllabus: Duration::from_millis(DEFAULT_SYLLABUS_TIMEOUT_MS),
            module_lessons: Duration::from_millis(DEFAULT_MODULE_LESSONS_TIMEOUT_MS),
            lesson_content: Duration::from_millis(DEFAULT_LESSON_CONTENT_TIMEOUT_MS),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lingo-tutor")
}

pub fn default_sqlite_path() -> PathBuf {
    data_dir().join("data.db")
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str) -> bool {
    env_string(key).is_some_and(|v| v == "true" || v == "1")
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key)?.parse().ok()
}

fn normalize_endpoint(endpoint: String) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.contains("/v1/") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint_appends_version() {
        assert_eq!(
            normalize_endpoint("https://example.com/".to_string()),
            "https://example.com/v1"
        );
        assert_eq!(
            normalize_endpoint("https://example.com/v1".to_string()),
            "https://example.com/v1"
        );
    }

    #[test]
    fn test_blank_api_key_is_treated_as_missing() {
        let mut ai = AiConfig::unconfigured();
        ai.api_key = Some("   ".to_string());
        assert!(ai.api_key().is_none());
    }
}
