// Rust guideline compliant 2026-02-16

//! YAML configuration loading and CLI surface (§6.5), grounded on
//! `original_source/config/loader.py` (`load_config`) and
//! `original_source/models/config.py` (`ServerConfig`, `NginxConfig`,
//! `ElasticsearchConfig`, `DatabaseConfig`, `GeoIpConfig`).

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::sync::Arc<std::io::Error> },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: std::sync::Arc<serde_yaml::Error> },
}

/// CLI surface: a single required argument, the path to the YAML config
/// file (`original_source/main.py`'s `--config` flag).
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "sentinel", about = "Nginx access-log risk-scoring pipeline")]
pub struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub static_path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct NginxConfig {
    pub base_path: String,
    /// May embed one `${fmt}` `strftime` placeholder, expanded against
    /// wall-clock `now` at each scheduler tick to resolve the active file
    /// (§6.2), e.g. `"/var/log/nginx/access-${%Y-%m-%d}.log"`.
    pub log_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElasticsearchConfig {
    #[serde(default = "default_es_url")]
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_es_url() -> String {
    "http://127.0.0.1:9200".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "sqlite://./data/sentinel.db".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoIpConfig {
    #[serde(default = "default_geoip_path")]
    pub data_path: String,
}

fn default_geoip_path() -> String {
    "./data/GeoLite2-City.mmdb".to_owned()
}

/// Top-level configuration document (§6.5), matching the YAML keys
/// `server`, `nginx`, `elasticsearch`, `database`, `geoip`.
#[derive(Debug, Clone, Deserialize)]
pub struct SentinelConfig {
    pub server: ServerConfig,
    pub nginx: NginxConfig,
    #[serde(default = "ElasticsearchConfig::default_value")]
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub geoip: GeoIpConfig,
    /// `record_keep_days` for the C11 maintenance sweep (§4.11), default 7.
    #[serde(default = "default_record_keep_days")]
    pub record_keep_days: u32,
}

fn default_record_keep_days() -> u32 {
    7
}

impl ElasticsearchConfig {
    fn default_value() -> Self {
        Self { url: default_es_url(), username: None, password: None }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: default_database_url() }
    }
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self { data_path: default_geoip_path() }
    }
}

impl SentinelConfig {
    /// Load and parse the YAML file at `path` (`load_config`). Mirrors the
    /// source's "file not found" / "YAML parse error" distinction so the
    /// caller can map either to the non-zero exit code §6.5 requires on
    /// initialization failure.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `path` does not exist,
    /// [`ConfigError::Read`] on an I/O failure, or [`ConfigError::Parse`] if
    /// the file is not valid YAML or is missing a required key.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source: std::sync::Arc::new(source),
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: std::sync::Arc::new(source),
        })
    }
}
