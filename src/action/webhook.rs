//! Outbound webhooks in GitHub (signed push payload) or GitLab (token trigger) form

use std::time::Duration;

use hmac::{Hmac, Mac};
use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::action::error::ActionError;
use crate::action::retry::{Runnable, run_with_retries};
use crate::config::defaults::{
    DEFAULT_WEBHOOK_DELAY, DEFAULT_WEBHOOK_DESIRED_STATUS_CODE, DEFAULT_WEBHOOK_MAX_TRIES,
    DEFAULT_WEBHOOK_SILENT_FAILS, Tiers,
};
use crate::config::duration::parse_duration;
use crate::config::{WebHookConfig, WebHookKind};
use crate::context::Context;
use crate::template::{TemplateVars, render};

type HmacSha256 = Hmac<Sha256>;

const GIT_REF: &str = "refs/heads/master";

/// Minimal push event accepted by GitHub-style webhook receivers
#[derive(Debug, Serialize)]
struct PushPayload<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    before: String,
    after: String,
}

#[derive(Debug)]
pub struct WebHook {
    id: String,
    kind: WebHookKind,
    url: String,
    secret: String,
    custom_headers: IndexMap<String, String>,
    /// 0 accepts any 2xx
    desired_status_code: u16,
    delay: Duration,
    max_tries: u32,
    silent_fails: bool,
    runnable: Runnable,
}

impl WebHook {
    /// Resolve a service webhook through the global pool entry of the same
    /// name and the class default
    pub fn from_config(
        id: &str,
        explicit: &WebHookConfig,
        main: Option<&WebHookConfig>,
        class: &WebHookConfig,
    ) -> Result<Self, Vec<String>> {
        let tiers = Tiers::new(Some(explicit), main, Some(class));
        let mut problems = Vec::new();

        let kind = tiers.get(|c| &c.kind).unwrap_or(WebHookKind::Github);
        let url = tiers.get(|c| &c.url).unwrap_or_default();
        if url.is_empty() {
            problems.push("url: required".to_string());
        }
        let secret = tiers.get(|c| &c.secret).unwrap_or_default();
        if kind == WebHookKind::Gitlab && secret.is_empty() {
            problems.push("secret: required for gitlab webhooks".to_string());
        }
        let delay = parse_duration(&tiers.get_or(|c| &c.delay, DEFAULT_WEBHOOK_DELAY.to_string()))
            .unwrap_or_else(|e| {
                problems.push(format!("delay: {}", e));
                Duration::ZERO
            });

        if !problems.is_empty() {
            return Err(problems);
        }

        Ok(Self {
            id: id.to_string(),
            kind,
            url,
            secret,
            custom_headers: tiers.get(|c| &c.custom_headers).unwrap_or_default(),
            desired_status_code: tiers
                .get_or(|c| &c.desired_status_code, DEFAULT_WEBHOOK_DESIRED_STATUS_CODE),
            delay,
            max_tries: tiers.get_or(|c| &c.max_tries, DEFAULT_WEBHOOK_MAX_TRIES),
            silent_fails: tiers.get_or(|c| &c.silent_fails, DEFAULT_WEBHOOK_SILENT_FAILS),
            runnable: Runnable::default(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> WebHookKind {
        self.kind
    }

    pub fn silent_fails(&self) -> bool {
        self.silent_fails
    }

    pub fn next_runnable(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.runnable.next_runnable()
    }

    fn accepts(&self, status: reqwest::StatusCode) -> bool {
        match self.desired_status_code {
            0 => status.is_success(),
            code => status.as_u16() == code,
        }
    }

    fn wanted(&self) -> String {
        match self.desired_status_code {
            0 => "2XX".to_string(),
            code => code.to_string(),
        }
    }

    fn request(
        &self,
        client: &reqwest::Client,
        vars: &TemplateVars<'_>,
    ) -> Result<reqwest::RequestBuilder, ActionError> {
        let url = render(&self.url, vars);
        let mut request = match self.kind {
            WebHookKind::Github => {
                let payload = PushPayload {
                    git_ref: GIT_REF,
                    before: "0".repeat(40),
                    after: commit_id(vars),
                };
                let body = serde_json::to_vec(&payload)
                    .map_err(|e| ActionError::Signing(e.to_string()))?;
                let signature = sign(&self.secret, &body)?;
                client
                    .post(url.as_ref())
                    .header("Content-Type", "application/json")
                    .header("X-GitHub-Event", "push")
                    .header("X-Hub-Signature-256", format!("sha256={}", signature))
                    .body(body)
            }
            WebHookKind::Gitlab => {
                let url = reqwest::Url::parse_with_params(
                    url.as_ref(),
                    &[("token", self.secret.as_str()), ("ref", "master")],
                )
                .map_err(|e| ActionError::Signing(format!("invalid url: {}", e)))?;
                client
                    .post(url)
                    .header("Content-Type", "application/x-www-form-urlencoded")
            }
        };
        for (key, value) in &self.custom_headers {
            request = request.header(key.as_str(), render(value, vars).as_ref());
        }
        Ok(request)
    }

    async fn try_send(&self, ctx: &Context, vars: &TemplateVars<'_>) -> Result<(), ActionError> {
        let response = self.request(ctx.client(false), vars)?.send().await?;
        let status = response.status();
        if self.accepts(status) {
            Ok(())
        } else {
            Err(ActionError::Status {
                got: status.as_u16(),
                wanted: self.wanted(),
            })
        }
    }

    /// Send with the configured delay and retries.
    ///
    /// Refuses to send before `next_runnable`.
    pub async fn send(&self, ctx: &Context, vars: &TemplateVars<'_>) -> Result<(), ActionError> {
        let label = format!("{}, webhook {}", vars.service_id, self.id);
        let timing = ctx.timing();
        run_with_retries(
            &label,
            &self.runnable,
            self.delay,
            self.max_tries,
            timing.retry_gap,
            timing.fail_stagger,
            || self.try_send(ctx, vars),
        )
        .await
    }
}

/// Hex HMAC-SHA256 of `body` keyed with `secret`
fn sign(secret: &str, body: &[u8]) -> Result<String, ActionError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ActionError::Signing(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Stable 40-char id for the release, standing in for a commit hash
fn commit_id(vars: &TemplateVars<'_>) -> String {
    let digest = Sha256::digest(format!("{}@{}", vars.service_id, vars.version).as_bytes());
    hex::encode(digest)[..40].to_string()
}
