//! Tracked services
//!
//! A [`Service`] is the validated, fully-defaulted form of one `service:`
//! entry. Its mutable state lives separately in a
//! [`status::StatusHandle`]; [`tracker::Tracker`] ties the two together and
//! [`manager::ServiceManager`] owns every tracker.
//!
//! # Modules
//!
//! - [`status`]: Per-service status and its transitions
//! - [`events`]: Change and save event queues
//! - [`scheduler`]: Recurring poll task with one-in-flight rule
//! - [`approval`]: Auto-approve / hold decision
//! - [`tracker`]: One poll: lookup, resolve, approve, act
//! - [`manager`]: Registry of services and operator operations
//! - [`error`]: Error types for polls and manager operations

pub mod approval;
pub mod error;
pub mod events;
pub mod manager;
pub mod scheduler;
pub mod status;
pub mod tracker;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::action::Actions;
use crate::action::command::Command;
use crate::action::notify::Notify;
use crate::action::webhook::WebHook;
use crate::config::defaults::{
    DEFAULT_ACTIVE, DEFAULT_AUTO_APPROVE, DEFAULT_INTERVAL, DEFAULT_SEMANTIC_VERSIONING, Tiers,
};
use crate::config::duration::parse_duration;
use crate::config::{Config, ConfigError, ServiceConfig};
use crate::lookup::Lookup;
use crate::service::status::ServiceStatus;

/// Placeholder shown instead of secrets in [`Service::detail`]
pub const REDACTED: &str = "<secret>";

#[derive(Debug)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub interval: Duration,
    pub semantic_versioning: bool,
    pub active: bool,
    pub auto_approve: bool,
    pub web_url: Option<String>,
    pub icon: Option<String>,
    pub latest: Lookup,
    pub deployed: Option<Lookup>,
    pub actions: Actions,
    /// The raw section this service was built from
    pub config: ServiceConfig,
}

/// Dashboard row for one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub icon: Option<String>,
    pub web_url: Option<String>,
    pub has_deployed_version: bool,
    pub has_actions: bool,
    pub auto_approve: bool,
    pub latest_version: String,
    pub latest_version_timestamp: Option<DateTime<Utc>>,
    pub deployed_version: String,
    pub deployed_version_timestamp: Option<DateTime<Utc>>,
    pub approved_version: String,
    pub last_queried: Option<DateTime<Utc>>,
    pub webhooks: Vec<ActionState>,
    pub commands: Vec<ActionState>,
}

/// Outcome of one webhook or command for the latest release
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionState {
    /// Webhook id, or the command's index
    pub id: String,
    /// Unset until it runs for this release
    pub failed: Option<bool>,
    pub next_runnable: Option<DateTime<Utc>>,
}

impl Service {
    /// Resolve and validate one `service:` entry against the whole document.
    ///
    /// Every problem is reported, prefixed with `service.<id>.`.
    pub fn from_config(id: &str, config: &ServiceConfig, root: &Config) -> Result<Self, ConfigError> {
        let class = &root.defaults.service;
        let mut problems = Vec::new();
        let located = |section: &str, errs: Vec<String>| -> Vec<String> {
            errs.into_iter()
                .map(|e| format!("service.{}.{}.{}", id, section, e))
                .collect()
        };

        let options = Tiers::new(Some(&config.options), None, Some(&class.options));
        let interval_text = options.get_or(|o| &o.interval, DEFAULT_INTERVAL.to_string());
        let interval = match parse_duration(&interval_text) {
            Ok(interval) if interval.is_zero() => {
                problems.extend(located(
                    "options",
                    vec!["interval: must be greater than zero".to_string()],
                ));
                Duration::ZERO
            }
            Ok(interval) => interval,
            Err(e) => {
                problems.extend(located("options", vec![format!("interval: {}", e)]));
                Duration::ZERO
            }
        };

        let latest = match &config.latest_version {
            Some(lookup) => Lookup::from_config(lookup, class.latest_version.as_ref())
                .map_err(|errs| problems.extend(located("latest_version", errs)))
                .ok(),
            None => {
                problems.push(format!("service.{}.latest_version: required", id));
                None
            }
        };

        let deployed = match &config.deployed_version {
            Some(lookup) => Lookup::from_config(lookup, class.deployed_version.as_ref())
                .map_err(|errs| problems.extend(located("deployed_version", errs)))
                .ok(),
            None => None,
        };

        let mut actions = Actions::default();
        for (index, command) in config.command.iter().enumerate() {
            match Command::from_config(index, command, &root.defaults.command) {
                Ok(command) => actions.commands.push(command),
                Err(errs) => problems.extend(located(&format!("command[{}]", index), errs)),
            }
        }
        for (webhook_id, webhook) in &config.webhook {
            match WebHook::from_config(
                webhook_id,
                webhook,
                root.webhook.get(webhook_id),
                &root.defaults.webhook,
            ) {
                Ok(webhook) => actions.webhooks.push(webhook),
                Err(errs) => problems.extend(located(&format!("webhook.{}", webhook_id), errs)),
            }
        }
        for (notify_id, notify) in &config.notify {
            match Notify::from_config(
                notify_id,
                notify,
                root.notify.get(notify_id),
                &root.defaults.notify,
            ) {
                Ok(notify) => actions.notifies.push(notify),
                Err(errs) => problems.extend(located(&format!("notify.{}", notify_id), errs)),
            }
        }

        let (Some(latest), true) = (latest, problems.is_empty()) else {
            return Err(ConfigError::Invalid(problems));
        };

        let dashboard = Tiers::new(Some(&config.dashboard), None, Some(&class.dashboard));
        Ok(Self {
            id: id.to_string(),
            name: config.name.clone().unwrap_or_else(|| id.to_string()),
            interval,
            semantic_versioning: options
                .get_or(|o| &o.semantic_versioning, DEFAULT_SEMANTIC_VERSIONING),
            active: options.get_or(|o| &o.active, DEFAULT_ACTIVE),
            auto_approve: dashboard.get_or(|d| &d.auto_approve, DEFAULT_AUTO_APPROVE),
            web_url: dashboard.get(|d| &d.web_url),
            icon: dashboard.get(|d| &d.icon),
            latest,
            deployed,
            actions,
            config: config.clone(),
        })
    }

    pub fn summary(&self, status: &ServiceStatus) -> ServiceSummary {
        let snapshot = &status.snapshot;
        ServiceSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            active: self.active,
            icon: self.icon.clone(),
            web_url: self.web_url.clone(),
            has_deployed_version: self.deployed.is_some(),
            has_actions: !self.actions.is_empty(),
            auto_approve: self.auto_approve,
            latest_version: snapshot.latest_version.clone(),
            latest_version_timestamp: snapshot.latest_version_timestamp,
            deployed_version: snapshot.deployed_version.clone(),
            deployed_version_timestamp: snapshot.deployed_version_timestamp,
            approved_version: snapshot.approved_version.clone(),
            last_queried: snapshot.last_queried,
            webhooks: self
                .actions
                .webhooks
                .iter()
                .map(|webhook| ActionState {
                    id: webhook.id().to_string(),
                    failed: status.webhook_fails.get(webhook.id()).copied().flatten(),
                    next_runnable: webhook.next_runnable(),
                })
                .collect(),
            commands: self
                .actions
                .commands
                .iter()
                .map(|command| ActionState {
                    id: command.index().to_string(),
                    failed: status.command_fails.get(command.index()).copied().flatten(),
                    next_runnable: command.next_runnable(),
                })
                .collect(),
        }
    }

    /// The configuration with every secret replaced by [`REDACTED`]
    pub fn detail(&self) -> ServiceConfig {
        let mut config = self.config.clone();
        let redact = |value: &mut Option<String>| {
            if value.is_some() {
                *value = Some(REDACTED.to_string());
            }
        };
        for lookup in [&mut config.latest_version, &mut config.deployed_version]
            .into_iter()
            .flatten()
        {
            redact(&mut lookup.access_token);
            if let Some(auth) = &mut lookup.basic_auth {
                auth.password = REDACTED.to_string();
            }
            if let Some(docker) = lookup.require.as_mut().and_then(|r| r.docker.as_mut()) {
                redact(&mut docker.token);
            }
        }
        for webhook in config.webhook.values_mut() {
            redact(&mut webhook.secret);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
defaults:
  service:
    options:
      interval: 30s
    latest_version:
      access_token: ghp_default
    dashboard:
      auto_approve: true
webhook:
  deploy:
    url: https://ci.example.com/hook
    secret: s3cret
notify:
  chat:
    url: https://chat.example.com
service:
  argus:
    name: Argus
    latest_version:
      type: github
      url: release-argus/Argus
    deployed_version:
      type: url
      url: https://argus.example.com/api/version
      json: build.version
      basic_auth:
        username: admin
        password: hunter2
    command:
      - ["./deploy.sh", "{{ version }}"]
    webhook:
      deploy: {}
    notify:
      chat: {}
    dashboard:
      web_url: https://github.com/release-argus/Argus/releases/tag/{{ version }}
"#;

    fn argus() -> Service {
        let config = Config::from_yaml(CONFIG).unwrap();
        Service::from_config("argus", &config.service["argus"], &config).unwrap()
    }

    #[test]
    fn from_config_resolves_defaults() {
        let service = argus();

        assert_eq!(service.name, "Argus");
        assert_eq!(service.interval, Duration::from_secs(30));
        assert!(service.semantic_versioning);
        assert!(service.active);
        assert!(service.auto_approve);
        assert!(service.deployed.is_some());
        assert_eq!(service.actions.commands.len(), 1);
        assert_eq!(service.actions.webhook_ids(), vec!["deploy".to_string()]);
        assert!(service.actions.notify("chat").is_some());

        let Lookup::Github(github) = &service.latest else {
            panic!("expected github lookup");
        };
        assert_eq!(github.access_token.as_deref(), Some("ghp_default"));
    }

    #[test]
    fn from_config_rejects_zero_interval_and_missing_lookup() {
        let config = Config::from_yaml(
            r#"
service:
  broken:
    options:
      interval: 0s
    command:
      - []
    webhook:
      nowhere: {}
"#,
        )
        .unwrap();

        let Err(ConfigError::Invalid(problems)) =
            Service::from_config("broken", &config.service["broken"], &config)
        else {
            panic!("expected validation failure");
        };
        assert_eq!(
            problems,
            vec![
                "service.broken.options.interval: must be greater than zero".to_string(),
                "service.broken.latest_version: required".to_string(),
                "service.broken.command[0].args: command is empty".to_string(),
                "service.broken.webhook.nowhere.url: required".to_string(),
            ]
        );
    }

    #[test]
    fn detail_redacts_secrets() {
        let detail = argus().detail();

        assert_eq!(
            detail.latest_version.as_ref().unwrap().access_token,
            None,
            "inherited tokens are not part of the service section"
        );
        let deployed = detail.deployed_version.unwrap();
        assert_eq!(deployed.basic_auth.unwrap().password, REDACTED);
        assert_eq!(detail.webhook["deploy"].secret, None);
    }

    #[test]
    fn detail_redacts_explicit_secrets() {
        let mut config = Config::from_yaml(CONFIG).unwrap();
        let mut section = config.service["argus"].clone();
        section.latest_version.as_mut().unwrap().access_token = Some("ghp_mine".to_string());
        section.webhook.get_mut("deploy").unwrap().secret = Some("mine".to_string());
        config.service.insert("argus".to_string(), section.clone());

        let detail = Service::from_config("argus", &section, &config)
            .unwrap()
            .detail();
        assert_eq!(
            detail.latest_version.unwrap().access_token.as_deref(),
            Some(REDACTED)
        );
        assert_eq!(detail.webhook["deploy"].secret.as_deref(), Some(REDACTED));
    }

    #[test]
    fn summary_reflects_status() {
        let service = argus();
        let mut status = ServiceStatus::default();
        status.snapshot.latest_version = "1.2.3".to_string();
        status.webhook_fails.insert("deploy".to_string(), Some(true));
        status.command_fails = vec![None];

        let summary = service.summary(&status);
        assert_eq!(summary.latest_version, "1.2.3");
        assert!(summary.has_deployed_version);
        assert!(summary.has_actions);
        assert_eq!(
            summary.webhooks,
            vec![ActionState {
                id: "deploy".to_string(),
                failed: Some(true),
                next_runnable: None,
            }]
        );
        assert_eq!(summary.commands[0].id, "0");
        assert_eq!(summary.commands[0].failed, None);
        assert_eq!(
            summary.web_url.as_deref(),
            Some("https://github.com/release-argus/Argus/releases/tag/{{ version }}")
        );
    }
}
