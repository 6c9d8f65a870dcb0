use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::classify::DEFAULT_MARKER;

pub const DEFAULT_USER_AGENT: &str = "doctag/0.1";
pub const DEFAULT_CONFIG_PATH: &str = ".doctag/config.toml";
pub const DEFAULT_CHECKPOINT_PATH: &str = ".doctag/checkpoint.json";
pub const NS_TEMPLATE: i32 = 10;
pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const MAX_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TaggerConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub tagger: TaggerSection,
    #[serde(default)]
    pub checkpoint: CheckpointSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    /// Skip TLS certificate checks. Only for development wikis with self-signed certs.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TaggerSection {
    pub namespace: Option<i32>,
    pub batch_size: Option<usize>,
    pub marker: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    #[default]
    File,
    Page,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CheckpointSection {
    #[serde(default)]
    pub backend: CheckpointBackend,
    pub path: Option<PathBuf>,
    pub page: Option<String>,
}

impl TaggerConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > None.
    pub fn api_url(&self) -> Option<String> {
        if let Some(value) = env_override("WIKI_API_URL") {
            return Some(value);
        }
        self.wiki
            .api_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        if let Some(value) = env_override("WIKI_USER_AGENT") {
            return value;
        }
        self.wiki
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn namespace(&self) -> i32 {
        self.tagger.namespace.unwrap_or(NS_TEMPLATE)
    }

    pub fn batch_size(&self) -> usize {
        self.tagger
            .batch_size
            .unwrap_or(DEFAULT_BATCH_SIZE)
            .clamp(1, MAX_BATCH_SIZE)
    }

    pub fn marker(&self) -> &str {
        self.tagger
            .marker
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_MARKER)
    }

    pub fn summary(&self) -> String {
        match self.tagger.summary.as_deref() {
            Some(summary) if !summary.trim().is_empty() => summary.to_string(),
            _ => format!("Tagged with: {}", self.marker()),
        }
    }

    pub fn checkpoint_path(&self, project_root: &Path) -> PathBuf {
        let path = self
            .checkpoint
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_PATH));
        if path.is_absolute() {
            path
        } else {
            project_root.join(path)
        }
    }

    pub fn checkpoint_page(&self) -> Result<&str> {
        match self.checkpoint.page.as_deref().map(str::trim) {
            Some(page) if !page.is_empty() => Ok(page),
            _ => bail!("[checkpoint] page is required when backend = \"page\""),
        }
    }
}

/// Load and parse a TaggerConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<TaggerConfig> {
    if !config_path.exists() {
        return Ok(TaggerConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: TaggerConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
