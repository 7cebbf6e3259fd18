//! Configuration file handling (`coursekeeper.toml`).
//!
//! Every field has a serde default so a missing or partial file behaves
//! the same as an explicit one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Malformed `coursekeeper.toml`. Typed so callers can tell a broken
/// config apart from I/O failures.
#[derive(Debug, Error)]
#[error("parse config {path}: {message}")]
pub struct ConfigParseError {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub rest: RestConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            history: HistoryConfig::default(),
            rest: RestConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Rows closer together than this are redundant.
    #[serde(default = "default_gap_ms")]
    pub gap_ms: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            gap_ms: default_gap_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_rest_host")]
    pub host: String,
    #[serde(default = "default_rest_port")]
    pub port: u16,
    /// When set, requests must carry this value in `X-Api-Key`.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            host: default_rest_host(),
            port: default_rest_port(),
            api_key: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("coursekeeper.sqlite3")
}

fn default_gap_ms() -> i64 {
    crate::history::compact::DELETE_GAP_MS
}

fn default_rest_host() -> String {
    "127.0.0.1".to_string()
}

fn default_rest_port() -> u16 {
    8642
}

/// Load `coursekeeper.toml` from `dir`. A missing file yields defaults.
pub fn load(dir: &Path) -> Result<Config> {
    let path = dir.join("coursekeeper.toml");
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("read config {}", path.display()))?;
    let config = toml::from_str(&raw).map_err(|err| ConfigParseError {
        path: path.clone(),
        message: err.message().to_string(),
    })?;
    Ok(config)
}
