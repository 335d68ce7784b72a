//! TOML configuration parsing and validation.
//!
//! Secrets (`omdb.api_key`, `auth.jwt_secret`) can be supplied through the
//! environment (`OMDB_API_KEY`, `MREVIEW_JWT_SECRET`), which takes precedence
//! over the file. After loading they are held as [`SecretString`] so they never
//! end up in `Debug` output or logs.

use anyhow::{bail, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    pub omdb: OmdbConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OmdbConfig {
    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub api_key: SecretString,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub jwt_secret: SecretString,
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: i64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: i64,
    #[serde(default = "default_password_iterations")]
    pub password_iterations: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_base_url() -> String {
    "http://www.omdbapi.com/".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_access_ttl() -> i64 {
    3600
}
fn default_refresh_ttl() -> i64 {
    7 * 24 * 3600
}
fn default_password_iterations() -> u32 {
    100_000
}
fn default_log_level() -> String {
    "info".to_string()
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(SecretString::from(raw))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Ok(key) = std::env::var("OMDB_API_KEY") {
        config.omdb.api_key = SecretString::from(key);
    }
    if let Ok(secret) = std::env::var("MREVIEW_JWT_SECRET") {
        config.auth.jwt_secret = SecretString::from(secret);
    }

    config.validate()?;
    Ok(config)
}

impl Config {
    /// Checks the invariants `load_config` guarantees. Exposed so configs
    /// built in-process (tests, embedding binaries) get the same checks.
    pub fn validate(&self) -> Result<()> {
        if self.omdb.api_key.expose_secret().trim().is_empty() {
            bail!("omdb.api_key must be set (or provide OMDB_API_KEY)");
        }
        if self.omdb.timeout_secs == 0 {
            bail!("omdb.timeout_secs must be > 0");
        }
        if self.auth.jwt_secret.expose_secret().is_empty() {
            bail!("auth.jwt_secret must be set (or provide MREVIEW_JWT_SECRET)");
        }
        if self.auth.access_ttl_secs <= 0 || self.auth.refresh_ttl_secs <= 0 {
            bail!("auth token lifetimes must be > 0");
        }
        if self.auth.password_iterations == 0 {
            bail!("auth.password_iterations must be > 0");
        }
        Ok(())
    }
}
