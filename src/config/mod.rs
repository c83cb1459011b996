//! Configuration document
//!
//! The YAML file holds global settings, the `defaults:` tier, global
//! notify/webhook pools referenced by name, and the ordered service map.
//! Everything here is the raw, partially-specified form; runtime types
//! resolve it through [`defaults::Tiers`] when a service is built.

pub mod defaults;
pub mod duration;

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::service::Service;

// =============================================================================
// Time-related constants
// =============================================================================

/// Timeout for fetch operations in milliseconds (30 seconds)
pub const FETCH_TIMEOUT_MS: u64 = 30_000;

/// Timeout for Require commands and action commands in milliseconds
pub const COMMAND_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Gap between retries of a failing webhook/command/notification
pub const RETRY_GAP_MS: u64 = 10_000;

/// How long a failed action stays non-runnable after exhausting its tries
pub const FAIL_STAGGER_MS: u64 = 15_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config:\n  {}", .0.join("\n  "))]
    Invalid(Vec<String>),
}

/// Root of the configuration document
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub settings: Settings,
    pub defaults: Defaults,
    pub notify: IndexMap<String, NotifyConfig>,
    pub webhook: IndexMap<String, WebHookConfig>,
    pub service: IndexMap<String, ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub log: LogSettings,
    pub data: DataSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct LogSettings {
    pub level: Option<String>,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct DataSettings {
    pub database_file: Option<PathBuf>,
}

/// Class-default tier
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct Defaults {
    pub service: ServiceConfig,
    pub webhook: WebHookConfig,
    pub command: CommandOptions,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: Option<String>,
    pub options: OptionsConfig,
    pub latest_version: Option<LookupConfig>,
    pub deployed_version: Option<LookupConfig>,
    pub command: Vec<CommandConfig>,
    pub webhook: IndexMap<String, WebHookConfig>,
    pub notify: IndexMap<String, NotifyConfig>,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct OptionsConfig {
    pub interval: Option<String>,
    pub semantic_versioning: Option<bool>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    pub auto_approve: Option<bool>,
    pub web_url: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LookupKind {
    Github,
    Url,
    Manual,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct LookupConfig {
    #[serde(rename = "type")]
    pub kind: Option<LookupKind>,
    /// `owner/repo` for github lookups, the page URL for url lookups
    pub url: Option<String>,
    pub access_token: Option<String>,
    pub allow_invalid_certs: Option<bool>,
    pub use_prerelease: Option<bool>,
    pub url_commands: Vec<UrlCommandConfig>,
    pub require: Option<RequireConfig>,
    pub headers: IndexMap<String, String>,
    pub basic_auth: Option<BasicAuth>,
    /// Dotted path into a JSON response, e.g. `data.release.tag`
    pub json: Option<String>,
    /// Static version for manual lookups
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UrlCommandConfig {
    Regex {
        regex: String,
        #[serde(default)]
        index: i64,
        #[serde(default)]
        template: Option<String>,
        #[serde(default)]
        ignore_failure: bool,
    },
    Split {
        text: String,
        #[serde(default)]
        index: i64,
        #[serde(default)]
        ignore_failure: bool,
    },
    Replace {
        old: String,
        #[serde(default)]
        new: String,
        #[serde(default)]
        ignore_failure: bool,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RequireConfig {
    pub regex_version: Option<String>,
    pub regex_content: Option<String>,
    pub command: Vec<String>,
    pub docker: Option<DockerConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DockerRegistryKind {
    Hub,
    Ghcr,
    Quay,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DockerConfig {
    #[serde(rename = "type")]
    pub kind: DockerRegistryKind,
    pub image: String,
    pub tag: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebHookKind {
    Github,
    Gitlab,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct WebHookConfig {
    #[serde(rename = "type")]
    pub kind: Option<WebHookKind>,
    pub url: Option<String>,
    pub secret: Option<String>,
    pub custom_headers: Option<IndexMap<String, String>>,
    pub desired_status_code: Option<u16>,
    pub delay: Option<String>,
    pub max_tries: Option<u32>,
    pub silent_fails: Option<bool>,
}

/// A command is either a bare argument vector or a map with retry options
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum CommandConfig {
    Args(Vec<String>),
    Detailed {
        args: Vec<String>,
        #[serde(flatten)]
        options: CommandOptions,
    },
}

impl CommandConfig {
    pub fn args(&self) -> &[String] {
        match self {
            CommandConfig::Args(args) => args,
            CommandConfig::Detailed { args, .. } => args,
        }
    }

    pub fn options(&self) -> Option<&CommandOptions> {
        match self {
            CommandConfig::Args(_) => None,
            CommandConfig::Detailed { options, .. } => Some(options),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct CommandOptions {
    pub max_tries: Option<u32>,
    pub delay: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    Generic,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct NotifyConfig {
    #[serde(rename = "type")]
    pub kind: Option<NotifyKind>,
    pub url: Option<String>,
    pub custom_headers: Option<IndexMap<String, String>>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub delay: Option<String>,
    pub max_tries: Option<u32>,
}

impl Config {
    /// Read, parse and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Build every service once, collecting all problems
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        for (id, service) in &self.service {
            if let Err(ConfigError::Invalid(errs)) = Service::from_config(id, service, self) {
                problems.extend(errs);
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Location of the SQLite status database
    pub fn database_file(&self) -> PathBuf {
        self.settings
            .data
            .database_file
            .clone()
            .unwrap_or_else(db_path)
    }
}

/// Returns the path to the data directory for version-watch.
/// Uses $XDG_DATA_HOME/version-watch if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/version-watch,
/// or ./version-watch if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the default path to the status database.
pub fn db_path() -> PathBuf {
    data_dir().join("status.db")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("version-watch")
}
