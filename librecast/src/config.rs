//! Configuration management for Recast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::retry::RetryPolicy;
use crate::scheduler::WorkerSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub resync: ResyncConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
    pub generation: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared secret the cron trigger must present. Publishing is disabled
    /// until this is set.
    pub cron_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cron_secret: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_post_timeout_secs")]
    pub post_timeout_secs: u64,
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            post_timeout_secs: default_post_timeout_secs(),
            claim_ttl_secs: default_claim_ttl_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            post_timeout: Duration::from_secs(self.post_timeout_secs),
            claim_ttl_secs: self.claim_ttl_secs,
        }
    }
}

fn default_batch_size() -> usize {
    25
}
fn default_concurrency() -> usize {
    5
}
fn default_post_timeout_secs() -> u64 {
    30
}
fn default_claim_ttl_secs() -> i64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_retries: default_max_retries(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_retries: self.max_retries,
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_jitter_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResyncConfig {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_cooldown_secs() -> i64 {
    300
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformsConfig {
    pub social_post: Option<SocialPostConfig>,
    pub messaging: Option<MessagingConfig>,
    pub feed_host: Option<FeedHostConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialPostConfig {
    #[serde(default = "default_linkedin_api_base")]
    pub api_base: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

fn default_linkedin_api_base() -> String {
    "https://api.linkedin.com".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default = "default_messaging_api_base")]
    pub api_base: String,
    pub from_number: String,
}

fn default_messaging_api_base() -> String {
    "https://api.twilio.com".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedHostConfig {
    pub api_base: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub api_base: String,
    pub api_key: String,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/recast/recast.db".to_string(),
            },
            server: ServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            resync: ResyncConfig::default(),
            platforms: PlatformsConfig::default(),
            generation: None,
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("RECAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("recast").join("config.toml"))
}
