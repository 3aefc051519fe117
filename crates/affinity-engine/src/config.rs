use crate::context_engine::OrchestratorConfig;
use crate::identity::StaticTokenProvider;
use crate::memory_db::SessionStoreConfig;
use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StorageBackend::Sqlite),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown STORAGE_BACKEND '{}': expected sqlite or memory", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub default_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub llm_timeout_seconds: u64,
    pub llm_max_retries: u32,
    pub llm_retry_backoff_ms: u64,
    pub session_timeout_seconds: u64,
    pub max_messages_per_session: usize,
    pub sweep_interval_seconds: u64,
    pub storage_backend: StorageBackend,
    pub database_path: PathBuf,
    /// JSON character catalog; no catalog when unset.
    pub characters_path: Option<PathBuf>,
    /// `token=user_id` pairs, comma separated.
    pub auth_tokens: String,
    pub intimacy_per_turn: bool,
    pub request_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let config = Self {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            api_port: env::var("API_PORT").unwrap_or_else(|_| "8000".into()).parse()?,
            llm_base_url: env::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            llm_api_key: env::var("LLM_API_KEY").ok().filter(|key| !key.is_empty()),
            default_model: env::var("DEFAULT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            max_tokens: env::var("MAX_TOKENS").unwrap_or_else(|_| "4096".into()).parse()?,
            temperature: env::var("TEMPERATURE").unwrap_or_else(|_| "0.7".into()).parse()?,
            llm_timeout_seconds: env::var("LLM_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "30".into())
                .parse()?,
            llm_max_retries: env::var("LLM_MAX_RETRIES")
                .unwrap_or_else(|_| "2".into())
                .parse()?,
            llm_retry_backoff_ms: env::var("LLM_RETRY_BACKOFF_MS")
                .unwrap_or_else(|_| "500".into())
                .parse()?,
            session_timeout_seconds: env::var("SESSION_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "86400".into())
                .parse()?,
            max_messages_per_session: env::var("MAX_MESSAGES_PER_SESSION")
                .unwrap_or_else(|_| "50".into())
                .parse()?,
            sweep_interval_seconds: env::var("SWEEP_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "3600".into())
                .parse()?,
            storage_backend: env::var("STORAGE_BACKEND")
                .unwrap_or_else(|_| "sqlite".into())
                .parse()?,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./data/affinity.db".into())
                .into(),
            characters_path: env::var("CHARACTERS_PATH")
                .ok()
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            auth_tokens: env::var("AUTH_TOKENS").unwrap_or_default(),
            intimacy_per_turn: env::var("INTIMACY_PER_TURN")
                .unwrap_or_else(|_| "true".into())
                .parse::<bool>()
                .context("INTIMACY_PER_TURN must be true or false")?,
            request_timeout_seconds: env::var("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "120".into())
                .parse()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_messages_per_session == 0 {
            anyhow::bail!("MAX_MESSAGES_PER_SESSION must be at least 1");
        }
        if self.session_timeout_seconds == 0 {
            anyhow::bail!("SESSION_TIMEOUT_SECONDS must be positive");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!("TEMPERATURE must be between 0 and 2, got {}", self.temperature);
        }
        if self.sweep_interval_seconds == 0 {
            anyhow::bail!("SWEEP_INTERVAL_SECONDS must be positive");
        }
        self.token_provider()?;
        Ok(())
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- LLM Endpoint: {}", self.llm_base_url);
        info!("- LLM API Key: {}", if self.llm_api_key.is_some() { "set" } else { "not set" });
        info!("- Model: {} (max tokens {}, temperature {})", self.default_model, self.max_tokens, self.temperature);
        info!(
            "- LLM Timeout: {}s, retries {}, backoff {}ms",
            self.llm_timeout_seconds, self.llm_max_retries, self.llm_retry_backoff_ms
        );
        info!("- Session Timeout: {}s", self.session_timeout_seconds);
        info!("- Max Messages Per Session: {}", self.max_messages_per_session);
        info!("- Sweep Interval: {}s", self.sweep_interval_seconds);
        info!("- Storage: {:?} ({})", self.storage_backend, self.database_path.display());
        match &self.characters_path {
            Some(path) => info!("- Character Catalog: {}", path.display()),
            None => info!("- Character Catalog: not set"),
        }
        info!("- Intimacy Per Turn: {}", self.intimacy_per_turn);
        info!("- Request Timeout: {}s", self.request_timeout_seconds);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }

    pub fn token_provider(&self) -> Result<StaticTokenProvider> {
        StaticTokenProvider::parse(&self.auth_tokens)
    }

    pub fn session_store_config(&self) -> SessionStoreConfig {
        SessionStoreConfig {
            max_messages: self.max_messages_per_session,
            timeout: chrono::Duration::seconds(self.session_timeout_seconds as i64),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            model: self.default_model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            max_retries: self.llm_max_retries,
            retry_backoff: Duration::from_millis(self.llm_retry_backoff_ms),
            intimacy_per_turn: self.intimacy_per_turn,
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
