use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub llm: LlmConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,

    // Secrets (from ENV only)
    #[serde(default)]
    pub id_secret: String,
    #[serde(default)]
    pub openai_api_key: String,
    /// `token:user_id` pairs, comma separated. Stands in for a real auth
    /// provider.
    #[serde(default)]
    pub api_tokens: String,
    #[serde(default)]
    pub mongodb_uri: Option<String>,
    #[serde(default)]
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub enabled: bool,
    pub origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub default_model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// TTL for stream buffer/state keys, seconds.
    pub ttl_secs: u64,
    /// Cancellation poll interval, milliseconds. Bounds how long a
    /// requested abort can go unnoticed.
    pub cancel_poll_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    /// Load configuration from TOML files and environment variables
    ///
    /// Hierarchy (weakest to strongest):
    /// 1. config/default.toml
    /// 2. config/{ENV}.toml (if ENV is set)
    /// 3. Environment variables (SERVER_, STREAM_, LLM_, LOG_ prefixes)
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "dev".to_string());

        let builder = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::default()
                    .prefix("SERVER")
                    .separator("_")
                    .try_parsing(true),
            )
            .add_source(
                Environment::default()
                    .prefix("STREAM")
                    .separator("_")
                    .try_parsing(true),
            )
            .add_source(
                Environment::default()
                    .prefix("LLM")
                    .separator("_")
                    .try_parsing(true),
            )
            .add_source(
                Environment::default()
                    .prefix("LOG")
                    .separator("_")
                    .try_parsing(true),
            );

        let mut cfg: Config = builder.build()?.try_deserialize()?;

        // Secrets come from ENV only, never from TOML.
        cfg.id_secret = std::env::var("BRAID_ID_SECRET").map_err(|_| {
            ConfigError::Message("BRAID_ID_SECRET environment variable is required".to_string())
        })?;
        cfg.openai_api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            ConfigError::Message("OPENAI_API_KEY environment variable is required".to_string())
        })?;
        cfg.api_tokens = std::env::var("BRAID_API_TOKENS").map_err(|_| {
            ConfigError::Message("BRAID_API_TOKENS environment variable is required".to_string())
        })?;
        cfg.mongodb_uri = std::env::var("MONGODB_URI").ok();
        cfg.redis_url = std::env::var("REDIS_URL").ok();

        Ok(cfg)
    }

    /// Load config from a specific path (useful for testing)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = ConfigLoader::builder().add_source(File::from(path.as_ref()));
        builder.build()?.try_deserialize()
    }

    /// Parse the `token:user_id` pairs of `api_tokens`. Malformed entries
    /// are skipped with a warning rather than rejecting the whole config.
    pub fn sessions(&self) -> HashMap<String, String> {
        let mut sessions = HashMap::new();
        for pair in self.api_tokens.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            match pair.split_once(':') {
                Some((token, user_id)) if !token.is_empty() && !user_id.is_empty() => {
                    sessions.insert(token.to_string(), user_id.to_string());
                }
                _ => {
                    tracing::warn!("skipping malformed api token entry");
                }
            }
        }
        sessions
    }
}
