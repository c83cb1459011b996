//! Registry of every tracked service and the operator operations on it
//!
//! ```text
//!   ServiceManager
//!     ├── config   RwLock<Config>                 (pools, class defaults)
//!     ├── services RwLock<IndexMap<id, Entry>>    (tracker + schedule)
//!     └── order    RwLock<Vec<id>>                (dashboard ordering)
//! ```
//!
//! Locks are always taken in that order: services, config, order.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::action::Target;
use crate::action::notify::{Notify, NotifySender};
use crate::config::{Config, ConfigError, LookupConfig, NotifyConfig, ServiceConfig};
use crate::context::Context;
use crate::lookup::Lookup;
use crate::service::error::ManagerError;
use crate::service::events::{ChangeEvent, SaveEvent, StatusSnapshot};
use crate::service::scheduler::Schedule;
use crate::service::status::StatusHandle;
use crate::service::tracker::Tracker;
use crate::service::{Service, ServiceSummary};
use crate::template::TemplateVars;

struct Entry {
    tracker: Tracker,
    /// `None` while inactive or before [`ServiceManager::start`]
    schedule: Option<Schedule>,
}

pub struct ServiceManager {
    config: RwLock<Config>,
    services: RwLock<IndexMap<String, Entry>>,
    order: RwLock<Vec<String>>,
    ctx: Arc<Context>,
    notifier: Arc<dyn NotifySender>,
    started: AtomicBool,
}

impl ServiceManager {
    /// Build every service of `config`, restoring `stored` statuses.
    ///
    /// Nothing is scheduled until [`ServiceManager::start`].
    pub fn load(
        config: Config,
        ctx: Arc<Context>,
        notifier: Arc<dyn NotifySender>,
        mut stored: HashMap<String, StatusSnapshot>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut services = IndexMap::with_capacity(config.service.len());
        for (id, section) in &config.service {
            let service = Service::from_config(id, section, &config)?;
            let tracker = new_tracker(service, &ctx, &notifier);
            if let Some(snapshot) = stored.remove(id) {
                tracker.status().restore(snapshot);
            }
            services.insert(id.clone(), Entry {
                tracker,
                schedule: None,
            });
        }

        for id in stored.into_keys() {
            debug!("Dropping stored status of removed service {}", id);
            ctx.events().save(SaveEvent::Delete { service_id: id });
        }

        let order = services.keys().cloned().collect();
        Ok(Self {
            config: RwLock::new(config),
            services: RwLock::new(services),
            order: RwLock::new(order),
            ctx,
            notifier,
            started: AtomicBool::new(false),
        })
    }

    /// Start the schedule of every active service
    pub async fn start(&self) {
        self.started.store(true, Ordering::Release);
        let mut services = self.services.write().await;
        for entry in services.values_mut() {
            if entry.schedule.is_none() && entry.tracker.service().active {
                entry.schedule = Some(spawn_schedule(&entry.tracker));
            }
        }
        info!("Tracking {} services", services.len());
    }

    /// Stop every schedule and discard in-flight action results
    pub async fn shutdown(&self) {
        let mut services = self.services.write().await;
        for entry in services.values_mut() {
            entry.tracker.cancel();
            entry.schedule = None;
        }
    }

    pub async fn tracker(&self, id: &str) -> Result<Tracker, ManagerError> {
        self.services
            .read()
            .await
            .get(id)
            .map(|entry| entry.tracker.clone())
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))
    }

    pub async fn is_scheduled(&self, id: &str) -> bool {
        self.services
            .read()
            .await
            .get(id)
            .is_some_and(|entry| entry.schedule.is_some())
    }

    /// Query the latest version now.
    ///
    /// Without overrides this is a normal poll and fails with
    /// [`ManagerError::Busy`] while another one is running. With overrides
    /// the lookup is rebuilt with those fields replaced and nothing is
    /// recorded.
    pub async fn refresh(
        &self,
        id: &str,
        overrides: Option<&LookupConfig>,
    ) -> Result<String, ManagerError> {
        let tracker = self.tracker(id).await?;
        let service = tracker.service();

        if let Some(overrides) = overrides {
            let class = self.config.read().await.defaults.service.latest_version.clone();
            let lookup_config = service
                .config
                .latest_version
                .clone()
                .unwrap_or_default()
                .overlay(overrides);
            let lookup =
                Lookup::from_config(&lookup_config, class.as_ref()).map_err(ManagerError::Invalid)?;
            let version = lookup
                .fetch_version(&self.ctx, service.semantic_versioning)
                .await?;
            debug!("{}: refresh with overrides found {}", id, version);
            return Ok(version);
        }

        let Some(_guard) = tracker.in_flight().try_acquire() else {
            return Err(ManagerError::Busy(id.to_string()));
        };
        let outcome = tracker.poll_once().await?;
        Ok(outcome.version().to_string())
    }

    pub async fn order(&self) -> Vec<String> {
        self.order.read().await.clone()
    }

    /// Reorder the dashboard; services missing from `ids` keep their relative
    /// order after the listed ones
    pub async fn set_order(&self, ids: Vec<String>) -> Result<Vec<String>, ManagerError> {
        let services = self.services.read().await;
        if let Some(unknown) = ids.iter().find(|id| !services.contains_key(id.as_str())) {
            return Err(ManagerError::NotFound(unknown.clone()));
        }

        let mut order: Vec<String> = Vec::with_capacity(services.len());
        for id in ids.into_iter().chain(self.order.read().await.iter().cloned()) {
            if !order.contains(&id) {
                order.push(id);
            }
        }

        *self.order.write().await = order.clone();
        self.ctx.events().change(ChangeEvent::Order {
            order: order.clone(),
        });
        Ok(order)
    }

    pub async fn summary(&self, id: &str) -> Result<ServiceSummary, ManagerError> {
        let tracker = self.tracker(id).await?;
        Ok(tracker.service().summary(&tracker.status().get()))
    }

    /// Every service in dashboard order
    pub async fn summaries(&self) -> Vec<ServiceSummary> {
        let services = self.services.read().await;
        let order = self.order.read().await;
        order
            .iter()
            .filter_map(|id| services.get(id))
            .map(|entry| {
                entry
                    .tracker
                    .service()
                    .summary(&entry.tracker.status().get())
            })
            .collect()
    }

    /// The service's configuration with secrets redacted
    pub async fn detail(&self, id: &str) -> Result<ServiceConfig, ManagerError> {
        Ok(self.tracker(id).await?.service().detail())
    }

    /// Approve the latest release for `target` (`all`, `failed`, a webhook id
    /// or `command:<index>`) and run the matching actions in the background.
    ///
    /// The handle resolves to whether the release is fully actioned.
    pub async fn approve(&self, id: &str, target: &str) -> Result<JoinHandle<bool>, ManagerError> {
        let tracker = self.tracker(id).await?;
        if tracker.status().latest_version().is_empty() {
            return Err(ManagerError::NoRelease(id.to_string()));
        }

        let parsed = Target::parse(target);
        if !tracker.service().actions.has_target(&parsed) {
            return Err(ManagerError::UnknownTarget {
                service: id.to_string(),
                target: target.to_string(),
            });
        }

        info!("{}: approved {}", id, target);
        Ok(tokio::spawn(async move { tracker.approve(parsed).await }))
    }

    pub async fn skip(&self, id: &str) -> Result<(), ManagerError> {
        let tracker = self.tracker(id).await?;
        if tracker.status().latest_version().is_empty() {
            return Err(ManagerError::NoRelease(id.to_string()));
        }
        tracker.skip();
        info!("{}: skipped {}", id, tracker.status().latest_version());
        Ok(())
    }

    pub async fn create(&self, id: &str, section: ServiceConfig) -> Result<(), ManagerError> {
        let mut services = self.services.write().await;
        if services.contains_key(id) {
            return Err(ManagerError::AlreadyExists(id.to_string()));
        }

        let mut config = self.config.write().await;
        let service = Service::from_config(id, &section, &config)?;
        config.service.insert(id.to_string(), section);
        drop(config);

        let tracker = new_tracker(service, &self.ctx, &self.notifier);
        let schedule = (self.started.load(Ordering::Acquire) && tracker.service().active)
            .then(|| spawn_schedule(&tracker));
        services.insert(id.to_string(), Entry { tracker, schedule });

        let order = {
            let mut order = self.order.write().await;
            order.push(id.to_string());
            order.clone()
        };
        drop(services);

        info!("{}: created", id);
        self.ctx.events().change(ChangeEvent::Created {
            service_id: id.to_string(),
        });
        self.ctx.events().change(ChangeEvent::Order { order });
        Ok(())
    }

    /// Replace a service's configuration, keeping its versions
    pub async fn edit(&self, id: &str, section: ServiceConfig) -> Result<(), ManagerError> {
        let mut services = self.services.write().await;
        let entry = services
            .get_mut(id)
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;

        let mut config = self.config.write().await;
        let service = Service::from_config(id, &section, &config)?;
        config.service.insert(id.to_string(), section);
        drop(config);

        let (active, interval) = (service.active, service.interval);
        entry.tracker.replace_service(service);
        match &entry.schedule {
            Some(schedule) if active => schedule.set_interval(interval),
            Some(_) => {
                debug!("{}: deactivated", id);
                entry.schedule = None;
            }
            None if active && self.started.load(Ordering::Acquire) => {
                entry.schedule = Some(spawn_schedule(&entry.tracker));
            }
            None => {}
        }
        drop(services);

        info!("{}: edited", id);
        self.ctx.events().change(ChangeEvent::Edited {
            service_id: id.to_string(),
        });
        Ok(())
    }

    /// Remove a service; running actions finish but their results are dropped
    pub async fn delete(&self, id: &str) -> Result<(), ManagerError> {
        let mut services = self.services.write().await;
        let entry = services
            .shift_remove(id)
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;
        entry.tracker.cancel();
        drop(entry);

        self.config.write().await.service.shift_remove(id);
        let order = {
            let mut order = self.order.write().await;
            order.retain(|other| other != id);
            order.clone()
        };
        drop(services);

        info!("{}: deleted", id);
        let events = self.ctx.events();
        events.save(SaveEvent::Delete {
            service_id: id.to_string(),
        });
        events.change(ChangeEvent::Deleted {
            service_id: id.to_string(),
        });
        events.change(ChangeEvent::Order { order });
        Ok(())
    }

    /// Send one notification for the latest version.
    ///
    /// `notify_id` may name a notify of the service or one of the global pool.
    pub async fn test_notify(&self, id: &str, notify_id: &str) -> Result<(), ManagerError> {
        let tracker = self.tracker(id).await?;
        let service = tracker.service();

        let pooled;
        let notify = match service.actions.notify(notify_id) {
            Some(notify) => notify,
            None => {
                let config = self.config.read().await;
                let unknown = || ManagerError::UnknownNotify {
                    service: id.to_string(),
                    notify: notify_id.to_string(),
                };
                let main = config.notify.get(notify_id).ok_or_else(unknown)?;
                pooled = Notify::from_config(
                    notify_id,
                    &NotifyConfig::default(),
                    Some(main),
                    &config.defaults.notify,
                )
                .map_err(ManagerError::Invalid)?;
                &pooled
            }
        };

        let version = tracker.status().latest_version();
        let vars = TemplateVars::new(&service.id, &version)
            .with_web_url(service.web_url.as_deref().unwrap_or(""));
        notify
            .send(&self.ctx, self.notifier.as_ref(), &vars, None)
            .await?;
        Ok(())
    }
}

fn new_tracker(service: Service, ctx: &Arc<Context>, notifier: &Arc<dyn NotifySender>) -> Tracker {
    let status = Arc::new(StatusHandle::new(
        &service.id,
        service.actions.webhook_ids(),
        service.actions.commands.len(),
        ctx.events().clone(),
    ));
    Tracker::new(service, status, Arc::clone(ctx), Arc::clone(notifier))
}

fn spawn_schedule(tracker: &Tracker) -> Schedule {
    let service = tracker.service();
    Schedule::spawn(
        &service.id,
        Arc::new(tracker.clone()),
        Arc::clone(tracker.in_flight()),
        service.interval,
        tracker.cancel_token().child_token(),
    )
}
