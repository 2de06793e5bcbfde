use crate::constants::{HTTP_TIMEOUT, MAX_MIRRORS, UPDATE_ATTEMPTS, URL_CHAR_LEN};
use crate::utils::fs::default_config_path;
use crate::{AptPilotError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AptPilotConfig {
    #[serde(default)]
    pub updater: UpdaterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdaterConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_mirrors", rename = "max-mirrors")]
    pub max_mirrors: usize,
    #[serde(default = "default_timeout_secs", rename = "timeout-secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts", rename = "max-attempts")]
    pub max_attempts: u32,
    /// Glob patterns of mirror URLs to never use
    #[serde(default)]
    pub blacklist: Vec<String>,
    /// File with extra mirror URLs, one per line
    #[serde(default, rename = "mirror-file", skip_serializing_if = "Option::is_none")]
    pub mirror_file: Option<PathBuf>,
    #[serde(default = "default_url_char_len", rename = "url-char-len")]
    pub url_char_len: usize,
    #[serde(default, rename = "sources-list", skip_serializing_if = "Option::is_none")]
    pub sources_list: Option<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_mirrors: default_max_mirrors(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            blacklist: Vec::new(),
            mirror_file: None,
            url_char_len: default_url_char_len(),
            sources_list: None,
        }
    }
}

fn default_concurrency() -> usize {
    crate::default_concurrency()
}

fn default_max_mirrors() -> usize {
    MAX_MIRRORS
}

fn default_timeout_secs() -> u64 {
    HTTP_TIMEOUT.as_secs()
}

fn default_max_attempts() -> u32 {
    UPDATE_ATTEMPTS
}

fn default_url_char_len() -> usize {
    URL_CHAR_LEN
}

impl AptPilotConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).await?;
        let config: AptPilotConfig = toml::from_str(&contents)
            .map_err(|e| AptPilotError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Load `path`, or the default location when `None`. A missing file
    /// yields the defaults.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Ok(path) => path,
                Err(_) => return Ok(Self::default()),
            },
        };
        if !fs::try_exists(&path).await.unwrap_or(false) {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        debug!("Loading config from {}", path.display());
        Self::load(&path).await
    }
}
