use std::env;

/// Process-wide configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub downloads_root: String,

    /// Local model weights directory. Absence disables LLM detection
    /// entirely (pipeline still functions with regex only).
    pub model_dir: Option<String>,
    pub max_new_tokens: u32,
    pub use_ai_detector: bool,
    pub llm_endpoint: String,
    pub llm_timeout_secs: u64,

    pub similarity_blocklist_dir: String,

    pub ingest_port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let model_dir = env::var("MODEL_DIR").ok().filter(|s| !s.trim().is_empty());
        let use_ai_detector = env::var("USE_AI_DETECTOR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(true);

        Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./data/sentinel.db".to_string()),
            downloads_root: env::var("DOWNLOADS_ROOT").unwrap_or_else(|_| "downloads".to_string()),

            model_dir,
            max_new_tokens: env::var("MAX_NEW_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(256),
            use_ai_detector,
            llm_endpoint: env::var("LLM_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:11434/api/generate".to_string()),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),

            similarity_blocklist_dir: env::var("SIMILARITY_BLOCKLIST_DIR")
                .unwrap_or_else(|_| "blocklist".to_string()),

            ingest_port: env::var("INGEST_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8088),
        }
    }

    /// LLM detection is active only when explicitly enabled and a model
    /// directory has been configured.
    pub fn llm_enabled(&self) -> bool {
        self.use_ai_detector && self.model_dir.is_some()
    }

    pub fn log_config(&self) {
        tracing::info!("Configuration:");
        tracing::info!("  database_url: {}", self.database_url);
        tracing::info!("  downloads_root: {}", self.downloads_root);
        tracing::info!("  model_dir: {:?}", self.model_dir);
        tracing::info!("  max_new_tokens: {}", self.max_new_tokens);
        tracing::info!("  use_ai_detector: {}", self.use_ai_detector);
        tracing::info!("  llm_endpoint: {}", self.llm_endpoint);
        tracing::info!("  similarity_blocklist_dir: {}", self.similarity_blocklist_dir);
        tracing::info!("  ingest_port: {}", self.ingest_port);
    }
}
