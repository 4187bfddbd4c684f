use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::NaiveDate;

use crate::config::Config;
use crate::db::DatabaseProxy;
use crate::services::ai_client::{ContentGenerator, LlmContentClient};
use crate::services::generation_guard::GenerationGuard;
use crate::services::live::{GeminiLiveConnector, LiveConnector};
use crate::services::runs::LessonRuns;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    config: Arc<Config>,
    db_proxy: Arc<DatabaseProxy>,
    guard: Arc<GenerationGuard>,
    live: Arc<dyn LiveConnector>,
    runs: Arc<LessonRuns>,
}

impl AppState {
    pub fn new(
        config: Config,
        db_proxy: DatabaseProxy,
        generator: Arc<dyn ContentGenerator>,
        live: Arc<dyn LiveConnector>,
    ) -> Self {
        let guard = GenerationGuard::new(generator, config.ai.timeouts);
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            config: Arc::new(config),
            db_proxy: Arc::new(db_proxy),
            guard: Arc::new(guard),
            live,
            runs: Arc::new(LessonRuns::new()),
        }
    }

    /// Wires the real AI providers from `config.ai`.
    pub fn from_config(config: Config, db_proxy: DatabaseProxy) -> Self {
        let generator: Arc<dyn ContentGenerator> = Arc::new(LlmContentClient::new(config.ai.clone()));
        let live: Arc<dyn LiveConnector> = Arc::new(GeminiLiveConnector::new(&config.ai));
        Self::new(config, db_proxy, generator, live)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Calendar date used for streaks.
    pub fn today(&self) -> NaiveDate {
        self.config.today()
    }

    pub fn db_proxy(&self) -> Arc<DatabaseProxy> {
        Arc::clone(&self.db_proxy)
    }

    pub fn guard(&self) -> Arc<GenerationGuard> {
        Arc::clone(&self.guard)
    }

    pub fn generator(&self) -> Arc<dyn ContentGenerator> {
        self.guard.generator()
    }

    pub fn live(&self) -> Arc<dyn LiveConnector> {
        Arc::clone(&self.live)
    }

    pub fn runs(&self) -> Arc<LessonRuns> {
        Arc::clone(&self.runs)
    }
}
