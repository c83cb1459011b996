//! Shared runtime handles passed explicitly to every component

use std::time::Duration;

use crate::config::{FAIL_STAGGER_MS, FETCH_TIMEOUT_MS, RETRY_GAP_MS};
use crate::lookup::docker::RegistryEndpoints;
use crate::lookup::github::DEFAULT_BASE_URL;
use crate::service::events::EventSink;

const USER_AGENT: &str = concat!("version-watch/", env!("CARGO_PKG_VERSION"));

/// Delays used by the action controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Gap between two tries of the same action
    pub retry_gap: Duration,
    /// How long an action stays non-runnable after exhausting its tries
    pub fail_stagger: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            retry_gap: Duration::from_millis(RETRY_GAP_MS),
            fail_stagger: Duration::from_millis(FAIL_STAGGER_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    client: reqwest::Client,
    /// Same as `client` with certificate verification disabled
    insecure_client: reqwest::Client,
    github_api: String,
    registries: RegistryEndpoints,
    timing: Timing,
    events: EventSink,
}

impl Context {
    pub fn new(events: EventSink) -> Result<Self, reqwest::Error> {
        let builder = || {
            reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(Duration::from_millis(FETCH_TIMEOUT_MS))
        };

        Ok(Self {
            client: builder().build()?,
            insecure_client: builder().danger_accept_invalid_certs(true).build()?,
            github_api: DEFAULT_BASE_URL.to_string(),
            registries: RegistryEndpoints::default(),
            timing: Timing::default(),
            events,
        })
    }

    pub fn with_github_api(mut self, base_url: &str) -> Self {
        self.github_api = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn github_api(&self) -> &str {
        &self.github_api
    }

    /// HTTP client honouring the lookup's `allow_invalid_certs`
    pub fn client(&self, allow_invalid_certs: bool) -> &reqwest::Client {
        if allow_invalid_certs {
            &self.insecure_client
        } else {
            &self.client
        }
    }

    pub fn registries(&self) -> &RegistryEndpoints {
        &self.registries
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }
}
