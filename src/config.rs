//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (signing keys) are referenced by env-var name in the config
//! and resolved at runtime via `std::env::var`. Every timing knob has a
//! serde default so a minimal config file stays minimal.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub check: CheckSettings,
    #[serde(default)]
    pub credentials: CredentialSettings,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub regions: RegionSettings,
    pub platforms: PlatformsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { port: default_port() }
    }
}

fn default_port() -> u16 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "syndicate_store.json".to_string()
}

/// Retry loop knobs for the placement orchestrator.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_inter_batch_ms")]
    pub inter_batch_pause_ms: u64,
    #[serde(default = "default_inter_round_ms")]
    pub inter_round_pause_ms: u64,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            batch_size: default_batch_size(),
            inter_batch_pause_ms: default_inter_batch_ms(),
            inter_round_pause_ms: default_inter_round_ms(),
            max_rounds: default_max_rounds(),
        }
    }
}

fn default_batch_size() -> usize {
    5
}
fn default_inter_batch_ms() -> u64 {
    1_000
}
fn default_inter_round_ms() -> u64 {
    2_000
}
fn default_max_rounds() -> u32 {
    5
}

/// Bulk account status check knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct CheckSettings {
    #[serde(default = "default_check_batch")]
    pub batch_size: usize,
    #[serde(default = "default_check_pause_ms")]
    pub inter_batch_pause_ms: u64,
}

impl Default for CheckSettings {
    fn default() -> Self {
        CheckSettings {
            batch_size: default_check_batch(),
            inter_batch_pause_ms: default_check_pause_ms(),
        }
    }
}

fn default_check_batch() -> usize {
    10
}
fn default_check_pause_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialSettings {
    /// Tokens expiring within this margin are treated as stale.
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: i64,
    /// TTL assumed when the token payload carries no usable expiry.
    #[serde(default = "default_fallback_ttl_hours")]
    pub fallback_ttl_hours: i64,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        CredentialSettings {
            safety_margin_secs: default_safety_margin_secs(),
            fallback_ttl_hours: default_fallback_ttl_hours(),
        }
    }
}

fn default_safety_margin_secs() -> i64 {
    300
}
fn default_fallback_ttl_hours() -> i64 {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelaySettings {
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        RelaySettings {
            probe_url: default_probe_url(),
            timeout_secs: default_probe_timeout_secs(),
        }
    }
}

fn default_probe_url() -> String {
    "https://icanhazip.com/".to_string()
}
fn default_probe_timeout_secs() -> u64 {
    10
}

/// Result cutoff times, `HH:MM` in the platform timezone (UTC+7).
#[derive(Debug, Deserialize, Clone)]
pub struct RegionSettings {
    #[serde(default = "default_north_cutoff")]
    pub north_cutoff: String,
    #[serde(default = "default_central_cutoff")]
    pub central_cutoff: String,
    #[serde(default = "default_south_cutoff")]
    pub south_cutoff: String,
}

impl Default for RegionSettings {
    fn default() -> Self {
        RegionSettings {
            north_cutoff: default_north_cutoff(),
            central_cutoff: default_central_cutoff(),
            south_cutoff: default_south_cutoff(),
        }
    }
}

fn default_north_cutoff() -> String {
    "18:30".to_string()
}
fn default_central_cutoff() -> String {
    "17:30".to_string()
}
fn default_south_cutoff() -> String {
    "16:30".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformsConfig {
    pub sgd666: Sgd666Config,
    pub one789: One789Config,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Sgd666Config {
    pub enabled: bool,
    pub api_base: String,
    /// `Origin`/`Referer` header the site expects.
    pub origin: String,
    pub signing_key_env: String,
    #[serde(default = "default_data_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct One789Config {
    pub enabled: bool,
    pub auth_base: String,
    pub play_base: String,
    pub origin: String,
    pub user_pool_id: String,
    pub signing_key_env: String,
    #[serde(default = "default_data_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_data_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
