//! One service's poll: lookup → resolve → status → approval → actions

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::action::Target;
use crate::action::notify::NotifySender;
use crate::context::Context;
use crate::lookup::Lookup;
use crate::lookup::error::LookupError;
use crate::service::Service;
use crate::service::approval::{Decision, Gate};
use crate::service::error::PollError;
use crate::service::scheduler::{InFlight, Poller};
use crate::service::status::StatusHandle;
use crate::template::TemplateVars;
use crate::version::resolver::{Resolution, resolve};

/// Misses logged at debug before escalating to warn
const QUIET_MISSES: u32 = 2;

/// What a successful poll observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged(String),
    FirstSeen(String),
    Newer(String),
    Regression { candidate: String, previous: String },
}

impl PollOutcome {
    pub fn version(&self) -> &str {
        match self {
            PollOutcome::Unchanged(v) | PollOutcome::FirstSeen(v) | PollOutcome::Newer(v) => v,
            PollOutcome::Regression { previous, .. } => previous,
        }
    }
}

/// Shared handle to one service; cheap to clone into spawned tasks
#[derive(Clone)]
pub struct Tracker {
    service: Arc<RwLock<Arc<Service>>>,
    status: Arc<StatusHandle>,
    ctx: Arc<Context>,
    notifier: Arc<dyn NotifySender>,
    in_flight: Arc<InFlight>,
    cancel: CancellationToken,
}

impl Tracker {
    pub fn new(
        service: Service,
        status: Arc<StatusHandle>,
        ctx: Arc<Context>,
        notifier: Arc<dyn NotifySender>,
    ) -> Self {
        Self {
            service: Arc::new(RwLock::new(Arc::new(service))),
            status,
            ctx,
            notifier,
            in_flight: InFlight::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Current configuration; a poll keeps the one it started with
    pub fn service(&self) -> Arc<Service> {
        let service = self
            .service
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&*service)
    }

    /// Swap in an edited configuration
    pub fn replace_service(&self, service: Service) {
        let service = Arc::new(service);
        self.status
            .reset_actions(service.actions.webhook_ids(), service.actions.commands.len());
        *self
            .service
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = service;
    }

    pub fn status(&self) -> &Arc<StatusHandle> {
        &self.status
    }

    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop the schedule and discard results of anything still running
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.status.close();
    }

    fn record_misses(&self, service_id: &str, err: &LookupError) {
        let (version_miss, content_miss) = err.regex_misses();
        if version_miss {
            let misses = self.status.record_version_miss();
            log_miss(service_id, "regex_version", misses, err);
        }
        if content_miss {
            let misses = self.status.record_content_miss();
            log_miss(service_id, "regex_content", misses, err);
        }
    }

    /// Find the latest version and apply it to the status.
    ///
    /// Does not check the one-in-flight rule; callers hold the guard.
    pub async fn poll_once(&self) -> Result<PollOutcome, PollError> {
        let service = self.service();
        let id = service.id.as_str();

        let version = match service
            .latest
            .fetch_version(&self.ctx, service.semantic_versioning)
            .await
        {
            Ok(version) => version,
            Err(e) => {
                if e.regex_misses() != (false, false) {
                    self.record_misses(id, &e);
                } else if e.is_transient() {
                    warn!("{}: latest_version lookup failed, retrying next tick: {}", id, e);
                } else {
                    error!("{}: latest_version lookup failed: {}", id, e);
                }
                return Err(e.into());
            }
        };
        if self.cancel.is_cancelled() {
            debug!("{}: service removed, dropping {:?}", id, version);
            return Err(PollError::Cancelled);
        }
        self.status.set_last_queried();

        let previous = self.status.latest_version();
        let resolution = resolve(&version, &previous, service.semantic_versioning)
            .inspect_err(|e| error!("{}: {}", id, e))?;

        let outcome = match resolution {
            Resolution::Same => PollOutcome::Unchanged(version),
            Resolution::Regression => {
                warn!(
                    "{}: found {:?} which is older than the latest {:?}, ignoring",
                    id, version, previous
                );
                PollOutcome::Regression {
                    candidate: version,
                    previous,
                }
            }
            Resolution::FirstSeen => {
                info!("{}: latest version is {}", id, version);
                self.status.set_latest_version(&version, true);
                if service.deployed.is_none() {
                    self.status.set_deployed_version(&version);
                }
                PollOutcome::FirstSeen(version)
            }
            Resolution::Newer => {
                info!("{}: new release {} (was {})", id, version, previous);
                self.status.set_latest_version(&version, false);
                self.handle_new_release(&service, &version).await;
                PollOutcome::Newer(version)
            }
        };

        if let Some(deployed) = &service.deployed {
            if !self.cancel.is_cancelled() {
                self.poll_deployed(&service, deployed).await;
            }
        }
        Ok(outcome)
    }

    async fn handle_new_release(&self, service: &Arc<Service>, version: &str) {
        // flags of the previous release must not count towards this one
        self.status.reset_action_fails();
        let vars = vars(service, version);
        service
            .actions
            .send_notifications(&self.ctx, self.notifier.as_ref(), &vars, None)
            .await;

        match Gate::decide(service) {
            Decision::NoActions => {
                if service.deployed.is_none() {
                    self.status.set_deployed_version(version);
                }
            }
            Decision::AutoApprove => {
                self.status.set_approved_version(version);
                let tracker = self.clone();
                tokio::spawn(async move {
                    tracker.run_actions(Target::All).await;
                });
            }
            Decision::Hold => {
                info!("{}: {} is waiting for approval", service.id, version);
            }
        }
    }

    async fn poll_deployed(&self, service: &Service, deployed: &Lookup) {
        match deployed
            .fetch_version(&self.ctx, service.semantic_versioning)
            .await
        {
            Ok(version) if version != self.status.deployed_version() => {
                info!("{}: deployed version is now {}", service.id, version);
                self.status.set_deployed_version(&version);
            }
            Ok(_) => {}
            Err(e) => warn!("{}: deployed_version lookup failed: {}", service.id, e),
        }
    }

    /// Run the targeted actions for the latest version.
    ///
    /// Returns whether the release is now fully actioned.
    pub async fn run_actions(&self, target: Target) -> bool {
        let service = self.service();
        let version = self.status.latest_version();
        let vars = vars(&service, &version);

        let succeeded = service
            .actions
            .run(
                &self.ctx,
                self.notifier.as_ref(),
                &self.status,
                &vars,
                &target,
                &self.cancel,
            )
            .await;

        if self.cancel.is_cancelled() {
            debug!("{}: service removed, dropping action results", service.id);
            return false;
        }
        if succeeded && service.deployed.is_none() {
            self.status.set_deployed_version(&version);
        }
        succeeded
    }

    /// Operator approval of the latest version
    pub async fn approve(&self, target: Target) -> bool {
        let service = self.service();
        let latest = self.status.latest_version();
        if target == Target::All {
            self.status.set_approved_version(&latest);
        }
        if service.actions.is_empty() {
            if service.deployed.is_none() {
                self.status.set_deployed_version(&latest);
            }
            return true;
        }
        self.run_actions(target).await
    }

    pub fn skip(&self) {
        self.status.skip();
    }
}

fn vars<'a>(service: &'a Service, version: &'a str) -> TemplateVars<'a> {
    TemplateVars::new(&service.id, version).with_web_url(service.web_url.as_deref().unwrap_or(""))
}

fn log_miss(service_id: &str, kind: &str, misses: u32, err: &LookupError) {
    if misses > QUIET_MISSES {
        warn!("{}: {} missed {} times in a row: {}", service_id, kind, misses, err);
    } else {
        debug!("{}: {} miss {}: {}", service_id, kind, misses, err);
    }
}

#[async_trait]
impl Poller for Tracker {
    async fn poll(&self) {
        match self.poll_once().await {
            Ok(outcome) => debug!("{}: poll finished: {:?}", self.status.service_id(), outcome),
            Err(e) => debug!("{}: poll failed: {}", self.status.service_id(), e),
        }
    }
}
