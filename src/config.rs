use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::chunk::ChunkStrategy;
use crate::tier::TierThresholds;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub remote: RemoteConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub tiers: TierThresholds,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Defaults with a local remote, used when no config file is present
    /// (dry runs, tests).
    pub fn minimal() -> Self {
        Self {
            remote: RemoteConfig::default(),
            chunking: ChunkingConfig::default(),
            tiers: TierThresholds::default(),
            dispatch: DispatchConfig::default(),
            archive: ArchiveConfig::default(),
            audit: AuditConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Name of the environment variable holding a bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: default_timeout_secs(),
            api_key_env: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub strategy: ChunkStrategy,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::default(),
            max_words: default_max_words(),
        }
    }
}

fn default_max_words() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Maximum concurrent remote calls (and concurrent extractions).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Chunks per sub-batch for medium and large documents.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_medium_delay_ms")]
    pub medium_delay_ms: u64,
    #[serde(default = "default_large_delay_ms")]
    pub large_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            medium_delay_ms: default_medium_delay_ms(),
            large_delay_ms: default_large_delay_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn medium_delay(&self) -> Duration {
        Duration::from_millis(self.medium_delay_ms)
    }

    pub fn large_delay(&self) -> Duration {
        Duration::from_millis(self.large_delay_ms)
    }
}

fn default_workers() -> usize {
    8
}
fn default_batch_size() -> usize {
    150
}
fn default_medium_delay_ms() -> u64 {
    1_000
}
fn default_large_delay_ms() -> u64 {
    3_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: u64,
    /// Upper bound on the declared uncompressed size of all entries.
    #[serde(default = "default_max_extracted_bytes")]
    pub max_extracted_bytes: u64,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_archive_bytes: default_max_archive_bytes(),
            max_extracted_bytes: default_max_extracted_bytes(),
            exclude_globs: default_exclude_globs(),
        }
    }
}

fn default_max_archive_bytes() -> u64 {
    1024 * 1024 * 1024
}
fn default_max_extracted_bytes() -> u64 {
    4 * 1024 * 1024 * 1024
}
fn default_exclude_globs() -> Vec<String> {
    vec!["__MACOSX/**".to_string(), "**/.DS_Store".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    /// Refuse undo of entries recorded for another user.
    #[serde(default = "default_enforce_ownership")]
    pub enforce_ownership: bool,
    /// Acting user when none is supplied.
    #[serde(default = "default_user")]
    pub default_user: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enforce_ownership: default_enforce_ownership(),
            default_user: default_user(),
        }
    }
}

fn default_enforce_ownership() -> bool {
    true
}
fn default_user() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Browser origins allowed to call the API cross-origin, e.g.
    /// `https://upload.example.com`. Empty means no CORS headers are sent.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    if config.remote.base_url.trim().is_empty() {
        anyhow::bail!("remote.base_url must not be empty");
    }
    if !config.remote.base_url.starts_with("http://")
        && !config.remote.base_url.starts_with("https://")
    {
        anyhow::bail!(
            "remote.base_url must start with http:// or https://, got '{}'",
            config.remote.base_url
        );
    }
    if config.remote.timeout_secs == 0 {
        anyhow::bail!("remote.timeout_secs must be > 0");
    }

    if config.chunking.max_words == 0 {
        anyhow::bail!("chunking.max_words must be > 0");
    }

    if config.tiers.medium_from > config.tiers.large_from {
        anyhow::bail!(
            "tiers.medium_from ({}) must not exceed tiers.large_from ({})",
            config.tiers.medium_from,
            config.tiers.large_from
        );
    }

    if config.dispatch.workers == 0 {
        anyhow::bail!("dispatch.workers must be >= 1");
    }
    if config.dispatch.batch_size == 0 {
        anyhow::bail!("dispatch.batch_size must be >= 1");
    }

    if config.archive.max_archive_bytes == 0 {
        anyhow::bail!("archive.max_archive_bytes must be > 0");
    }

    if config.audit.default_user.trim().is_empty() {
        anyhow::bail!("audit.default_user must not be empty");
    }

    for origin in &config.server.allowed_origins {
        let scheme_ok = origin.starts_with("http://") || origin.starts_with("https://");
        if !scheme_ok || axum::http::HeaderValue::from_str(origin).is_err() {
            anyhow::bail!(
                "server.allowed_origins entries must be http(s) origins, got '{}'",
                origin
            );
        }
    }

    Ok(())
}
