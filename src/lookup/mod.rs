//! Version lookup layer
//!
//! Fetches a version string from a source and gates it through the
//! configured Require clauses.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │   Lookup    │────▶│ url_commands │────▶│   Require   │
//! │ (query)     │     │  (pipeline)  │     │  (filters)  │
//! └─────────────┘     └──────────────┘     └─────────────┘
//!        │                                        │
//!        ▼                                        ▼
//! ┌─────────────┐                         ┌─────────────┐
//! │ github/url/ │                         │   docker    │
//! │   manual    │                         │ (registry)  │
//! └─────────────┘                         └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`github`]: GitHub Releases API lookup
//! - [`web`]: Generic URL lookup
//! - [`url_command`]: Regex/split/replace text pipeline
//! - [`require`]: Version, content, command and docker gates
//! - [`docker`]: Container registry tag-existence check
//! - [`error`]: Error types for lookups

pub mod docker;
pub mod error;
pub mod github;
pub mod require;
pub mod url_command;
pub mod web;

use tracing::debug;

use crate::config::defaults::{DEFAULT_ALLOW_INVALID_CERTS, DEFAULT_USE_PRERELEASE, Tiers};
use crate::config::{LookupConfig, LookupKind};
use crate::context::Context;
use crate::lookup::error::LookupError;
use crate::lookup::github::GitHubLookup;
use crate::lookup::require::Require;
use crate::lookup::url_command::UrlCommand;
use crate::lookup::web::UrlLookup;

/// Version fixed in configuration or set by an operator
#[derive(Debug)]
pub struct ManualLookup {
    pub(crate) version: String,
    pub(crate) require: Require,
}

/// A configured version source, dispatched on its kind
#[derive(Debug)]
pub enum Lookup {
    Github(GitHubLookup),
    Url(UrlLookup),
    Manual(ManualLookup),
}

impl Lookup {
    /// Resolve `explicit` over the class default and build the lookup.
    ///
    /// Problems are reported relative to the lookup section.
    pub fn from_config(
        explicit: &LookupConfig,
        class: Option<&LookupConfig>,
    ) -> Result<Self, Vec<String>> {
        let tiers = Tiers::new(Some(explicit), None, class);
        let mut problems = Vec::new();

        let url_commands: Vec<UrlCommand> = explicit
            .url_commands
            .iter()
            .enumerate()
            .filter_map(|(i, command)| {
                UrlCommand::from_config(command)
                    .map_err(|e| problems.push(format!("url_commands[{}]: {}", i, e)))
                    .ok()
            })
            .collect();

        let require = match explicit.require.as_ref().map(Require::from_config) {
            Some(Ok(require)) => require,
            Some(Err(errs)) => {
                problems.extend(errs.into_iter().map(|e| format!("require.{}", e)));
                Require::default()
            }
            None => Require::default(),
        };

        let allow_invalid_certs =
            tiers.get_or(|c| &c.allow_invalid_certs, DEFAULT_ALLOW_INVALID_CERTS);
        let url = explicit.url.clone().unwrap_or_default();

        let lookup = match tiers.get(|c| &c.kind) {
            Some(LookupKind::Github | LookupKind::Url) if url.is_empty() => {
                problems.push("url: required".to_string());
                None
            }
            Some(LookupKind::Github) => Some(Lookup::Github(GitHubLookup::new(
                url,
                tiers.get(|c| &c.access_token),
                allow_invalid_certs,
                tiers.get_or(|c| &c.use_prerelease, DEFAULT_USE_PRERELEASE),
                url_commands,
                require,
            ))),
            Some(LookupKind::Url) => Some(Lookup::Url(UrlLookup {
                url,
                allow_invalid_certs,
                headers: explicit.headers.clone(),
                basic_auth: explicit.basic_auth.clone(),
                json: explicit.json.clone(),
                url_commands,
                require,
            })),
            Some(LookupKind::Manual) => Some(Lookup::Manual(ManualLookup {
                version: explicit.version.clone().unwrap_or_default(),
                require,
            })),
            None => {
                problems.push("type: required (github, url or manual)".to_string());
                None
            }
        };

        if let Some(lookup) = &lookup {
            problems.extend(lookup.check_values());
        }
        match lookup {
            Some(lookup) if problems.is_empty() => Ok(lookup),
            _ => Err(problems),
        }
    }

    pub fn kind(&self) -> LookupKind {
        match self {
            Lookup::Github(_) => LookupKind::Github,
            Lookup::Url(_) => LookupKind::Url,
            Lookup::Manual(_) => LookupKind::Manual,
        }
    }

    pub fn check_values(&self) -> Vec<String> {
        match self {
            Lookup::Github(lookup) => lookup.check_values(),
            Lookup::Url(lookup) => lookup.check_values(),
            Lookup::Manual(_) => Vec::new(),
        }
    }

    fn require(&self) -> &Require {
        match self {
            Lookup::Github(lookup) => &lookup.require,
            Lookup::Url(lookup) => &lookup.require,
            Lookup::Manual(lookup) => &lookup.require,
        }
    }

    fn allow_invalid_certs(&self) -> bool {
        match self {
            Lookup::Github(lookup) => lookup.allow_invalid_certs,
            Lookup::Url(lookup) => lookup.allow_invalid_certs,
            Lookup::Manual(_) => false,
        }
    }

    /// Fetch the raw content the version is extracted from
    pub async fn query(&self, ctx: &Context) -> Result<String, LookupError> {
        match self {
            Lookup::Github(lookup) => lookup.query(ctx).await,
            Lookup::Url(lookup) => lookup.query(ctx).await,
            Lookup::Manual(lookup) => Ok(lookup.version.clone()),
        }
    }

    /// Extract the version from `body` and run every Require gate on it
    pub async fn get_version(
        &self,
        ctx: &Context,
        body: &str,
        semantic_versioning: bool,
    ) -> Result<String, LookupError> {
        let version = match self {
            Lookup::Github(lookup) => lookup.select_version(body, semantic_versioning)?,
            Lookup::Url(lookup) => lookup.select_version(body)?,
            Lookup::Manual(lookup) => {
                if body.is_empty() {
                    return Err(LookupError::InvalidResponse(
                        "no version has been set".to_string(),
                    ));
                }
                lookup.require.check_version(body)?;
                body.to_string()
            }
        };

        let require = self.require();
        require.check_command(&version).await?;
        require
            .check_docker(
                ctx.client(self.allow_invalid_certs()),
                ctx.registries(),
                &version,
            )
            .await?;

        debug!("Found version {}", version);
        Ok(version)
    }

    /// `query` followed by `get_version`
    pub async fn fetch_version(
        &self,
        ctx: &Context,
        semantic_versioning: bool,
    ) -> Result<String, LookupError> {
        let body = self.query(ctx).await?;
        self.get_version(ctx, &body, semantic_versioning).await
    }
}

impl LookupConfig {
    /// Fields set in `overrides` replace those of `self`
    pub fn overlay(&self, overrides: &LookupConfig) -> LookupConfig {
        LookupConfig {
            kind: overrides.kind.or(self.kind),
            url: overrides.url.clone().or_else(|| self.url.clone()),
            access_token: overrides
                .access_token
                .clone()
                .or_else(|| self.access_token.clone()),
            allow_invalid_certs: overrides.allow_invalid_certs.or(self.allow_invalid_certs),
            use_prerelease: overrides.use_prerelease.or(self.use_prerelease),
            url_commands: if overrides.url_commands.is_empty() {
                self.url_commands.clone()
            } else {
                overrides.url_commands.clone()
            },
            require: overrides.require.clone().or_else(|| self.require.clone()),
            headers: if overrides.headers.is_empty() {
                self.headers.clone()
            } else {
                overrides.headers.clone()
            },
            basic_auth: overrides
                .basic_auth
                .clone()
                .or_else(|| self.basic_auth.clone()),
            json: overrides.json.clone().or_else(|| self.json.clone()),
            version: overrides.version.clone().or_else(|| self.version.clone()),
        }
    }
}
