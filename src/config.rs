use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const BASE_URL_ENV: &str = "PBL_API_BASE_URL";
pub const API_VERSION_ENV: &str = "PBL_API_VERSION";
pub const TIMEOUT_ENV: &str = "PBL_API_TIMEOUT_SECS";
pub const SESSION_FILE_ENV: &str = "PBL_SESSION_FILE";

/// Client configuration shared by every role's dispatcher and session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend origin, e.g. `https://pbl.example.edu`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Durable session file; `None` keeps sessions in memory only.
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_version: default_api_version(),
            timeout_secs: default_timeout_secs(),
            session_file: None,
        }
    }
}

impl ClientConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let cfg: ClientConfig = serde_json::from_str(&raw).context("parsing config JSON")?;
        Ok(cfg)
    }

    /// Defaults overridden by `PBL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Load `path` when it exists, otherwise start from defaults; env wins either way.
    pub fn load(path: &str) -> Result<Self> {
        let mut cfg = if std::path::Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            self.base_url = url;
        }
        if let Ok(version) = std::env::var(API_VERSION_ENV) {
            self.api_version = version;
        }
        if let Ok(secs) = std::env::var(TIMEOUT_ENV) {
            self.timeout_secs = secs
                .parse()
                .with_context(|| format!("parsing {TIMEOUT_ENV}={secs}"))?;
        }
        if let Ok(file) = std::env::var(SESSION_FILE_ENV) {
            self.session_file = Some(PathBuf::from(file));
        }
        Ok(())
    }

    /// Versioned API root, e.g. `https://pbl.example.edu/api/v1`.
    pub fn api_base(&self) -> String {
        format!(
            "{}/api/{}",
            self.base_url.trim_end_matches('/'),
            self.api_version.trim_matches('/')
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
