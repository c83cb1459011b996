//! Per-service status and its named transitions
//!
//! [`StatusHandle`] is the only way to mutate a service's status. Each
//! transition runs under one mutex and emits its change and save events
//! before the lock is released, so observers see transitions in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use indexmap::IndexMap;

use crate::service::events::{ChangeEvent, EventSink, SaveEvent, StatusDiff, StatusSnapshot};

/// Prefix marking a skipped release in `approved_version`
pub const SKIP_PREFIX: &str = "SKIP_";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStatus {
    pub snapshot: StatusSnapshot,
    pub regex_misses_version: u32,
    pub regex_misses_content: u32,
    /// Tri-state per webhook: unset, failed (`true`), succeeded (`false`)
    pub webhook_fails: IndexMap<String, Option<bool>>,
    pub command_fails: Vec<Option<bool>>,
}

impl ServiceStatus {
    /// Every action has reported success
    pub fn all_actions_succeeded(&self) -> bool {
        self.webhook_fails.values().all(|f| *f == Some(false))
            && self.command_fails.iter().all(|f| *f == Some(false))
    }
}

#[derive(Debug)]
pub struct StatusHandle {
    service_id: String,
    inner: Mutex<ServiceStatus>,
    events: EventSink,
    closed: AtomicBool,
}

impl StatusHandle {
    pub fn new(
        service_id: &str,
        webhook_ids: impl IntoIterator<Item = String>,
        commands: usize,
        events: EventSink,
    ) -> Self {
        let status = ServiceStatus {
            webhook_fails: webhook_ids.into_iter().map(|id| (id, None)).collect(),
            command_fails: vec![None; commands],
            ..Default::default()
        };
        Self {
            service_id: service_id.to_string(),
            inner: Mutex::new(status),
            events,
            closed: AtomicBool::new(false),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    fn lock(&self) -> MutexGuard<'_, ServiceStatus> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the whole status
    pub fn get(&self) -> ServiceStatus {
        self.lock().clone()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn latest_version(&self) -> String {
        self.lock().snapshot.latest_version.clone()
    }

    pub fn deployed_version(&self) -> String {
        self.lock().snapshot.deployed_version.clone()
    }

    pub fn approved_version(&self) -> String {
        self.lock().snapshot.approved_version.clone()
    }

    /// Initial load from persistence; emits nothing
    pub fn restore(&self, stored: StatusSnapshot) {
        self.lock().snapshot = stored;
    }

    /// Stop emitting events; later transitions only touch the in-memory copy
    pub fn close(&self) {
        let _status = self.lock();
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn emit(&self, status: &ServiceStatus, diff: StatusDiff, save: bool) {
        if diff.is_empty() || self.is_closed() {
            return;
        }
        self.events.change(ChangeEvent::Status {
            service_id: self.service_id.clone(),
            diff,
        });
        if save {
            self.events.save(SaveEvent::Save {
                service_id: self.service_id.clone(),
                snapshot: status.snapshot.clone(),
            });
        }
    }

    /// Record a newly resolved latest version.
    ///
    /// A version that is not the first ever seen also resets both regex-miss
    /// counters.
    pub fn set_latest_version(&self, version: &str, first_seen: bool) {
        let mut status = self.lock();
        let now = Utc::now();
        status.snapshot.latest_version = version.to_string();
        status.snapshot.latest_version_timestamp = Some(now);
        if !first_seen {
            status.regex_misses_version = 0;
            status.regex_misses_content = 0;
        }
        let diff = StatusDiff {
            latest_version: Some(version.to_string()),
            latest_version_timestamp: Some(now),
            ..Default::default()
        };
        self.emit(&status, diff, true);
    }

    pub fn set_approved_version(&self, version: &str) {
        let mut status = self.lock();
        self.approve_locked(&mut status, version.to_string());
    }

    /// Mark the current latest version as skipped
    pub fn skip(&self) {
        let mut status = self.lock();
        let skipped = format!("{}{}", SKIP_PREFIX, status.snapshot.latest_version);
        self.approve_locked(&mut status, skipped);
    }

    fn approve_locked(&self, status: &mut ServiceStatus, version: String) {
        if status.snapshot.approved_version == version {
            return;
        }
        status.snapshot.approved_version = version.clone();
        let diff = StatusDiff {
            approved_version: Some(version),
            ..Default::default()
        };
        self.emit(status, diff, true);
    }

    pub fn set_deployed_version(&self, version: &str) {
        let mut status = self.lock();
        if status.snapshot.deployed_version == version {
            return;
        }
        let now = Utc::now();
        status.snapshot.deployed_version = version.to_string();
        status.snapshot.deployed_version_timestamp = Some(now);
        let diff = StatusDiff {
            deployed_version: Some(version.to_string()),
            deployed_version_timestamp: Some(now),
            ..Default::default()
        };
        self.emit(&status, diff, true);
    }

    pub fn set_last_queried(&self) {
        let mut status = self.lock();
        let now = Utc::now();
        status.snapshot.last_queried = Some(now);
        let diff = StatusDiff {
            last_queried: Some(now),
            ..Default::default()
        };
        self.emit(&status, diff, true);
    }

    /// Count a `regex_version` miss, returning the consecutive total
    pub fn record_version_miss(&self) -> u32 {
        let mut status = self.lock();
        status.regex_misses_version += 1;
        status.regex_misses_version
    }

    /// Count a `regex_content` miss, returning the consecutive total
    pub fn record_content_miss(&self) -> u32 {
        let mut status = self.lock();
        status.regex_misses_content += 1;
        status.regex_misses_content
    }

    pub fn set_webhook_fail(&self, id: &str, flag: Option<bool>) {
        let mut status = self.lock();
        let Some(current) = status.webhook_fails.get_mut(id) else {
            return;
        };
        if *current == flag {
            return;
        }
        *current = flag;
        let mut diff = StatusDiff::default();
        diff.webhook_fails.insert(id.to_string(), flag);
        self.emit(&status, diff, false);
    }

    pub fn set_command_fail(&self, index: usize, flag: Option<bool>) {
        let mut status = self.lock();
        let Some(current) = status.command_fails.get_mut(index) else {
            return;
        };
        if *current == flag {
            return;
        }
        *current = flag;
        let mut diff = StatusDiff::default();
        diff.command_fails.insert(index, flag);
        self.emit(&status, diff, false);
    }

    /// Clear every fail flag back to unset
    pub fn reset_action_fails(&self) {
        let mut status = self.lock();
        let mut diff = StatusDiff::default();
        for (id, flag) in status.webhook_fails.iter_mut() {
            if flag.take().is_some() {
                diff.webhook_fails.insert(id.clone(), None);
            }
        }
        for (index, flag) in status.command_fails.iter_mut().enumerate() {
            if flag.take().is_some() {
                diff.command_fails.insert(index, None);
            }
        }
        self.emit(&status, diff, false);
    }

    /// Re-key the fail flags after the service's actions were edited.
    ///
    /// Flags of actions that still exist are kept.
    pub fn reset_actions(&self, webhook_ids: impl IntoIterator<Item = String>, commands: usize) {
        let mut status = self.lock();
        let webhook_fails = webhook_ids
            .into_iter()
            .map(|id| {
                let flag = status.webhook_fails.get(&id).copied().flatten();
                (id, flag)
            })
            .collect();
        status.webhook_fails = webhook_fails;
        status.command_fails.resize(commands, None);
    }

    pub fn webhook_fail(&self, id: &str) -> Option<bool> {
        self.lock().webhook_fails.get(id).copied().flatten()
    }

    pub fn command_fail(&self, index: usize) -> Option<bool> {
        self.lock().command_fails.get(index).copied().flatten()
    }

    pub fn all_actions_succeeded(&self) -> bool {
        self.lock().all_actions_succeeded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::events::EventReceivers;

    fn handle() -> (StatusHandle, EventReceivers) {
        let (sink, receivers) = EventSink::new();
        let handle = StatusHandle::new("argus", vec!["deploy".to_string()], 2, sink);
        (handle, receivers)
    }

    #[test]
    fn set_latest_version_emits_change_and_save() {
        let (status, mut rx) = handle();
        status.set_latest_version("1.0.0", true);

        let Ok(ChangeEvent::Status { service_id, diff }) = rx.change.try_recv() else {
            panic!("expected status change event");
        };
        assert_eq!(service_id, "argus");
        assert_eq!(diff.latest_version.as_deref(), Some("1.0.0"));
        assert!(diff.approved_version.is_none());

        let Ok(SaveEvent::Save { snapshot, .. }) = rx.save.try_recv() else {
            panic!("expected save event");
        };
        assert_eq!(snapshot.latest_version, "1.0.0");
    }

    #[test]
    fn newer_version_resets_miss_counters() {
        let (status, _rx) = handle();
        status.record_version_miss();
        assert_eq!(status.record_content_miss(), 1);
        assert_eq!(status.record_content_miss(), 2);

        status.set_latest_version("1.0.0", true);
        assert_eq!(status.get().regex_misses_content, 2);

        status.set_latest_version("1.1.0", false);
        let current = status.get();
        assert_eq!(current.regex_misses_content, 0);
        assert_eq!(current.regex_misses_version, 0);
    }

    #[test]
    fn miss_counters_emit_nothing() {
        let (status, mut rx) = handle();
        status.record_version_miss();
        status.record_content_miss();

        assert!(rx.change.try_recv().is_err());
        assert!(rx.save.try_recv().is_err());
    }

    #[test]
    fn closed_status_emits_nothing() {
        let (status, mut rx) = handle();
        status.set_latest_version("1.0.0", true);
        assert!(rx.save.try_recv().is_ok());
        assert!(rx.change.try_recv().is_ok());

        status.close();
        status.set_last_queried();
        status.set_latest_version("1.1.0", false);
        status.set_deployed_version("1.1.0");
        status.set_webhook_fail("deploy", Some(true));

        assert!(status.is_closed());
        assert_eq!(status.latest_version(), "1.1.0");
        assert!(rx.change.try_recv().is_err());
        assert!(rx.save.try_recv().is_err());
    }

    #[test]
    fn skip_prefixes_latest_version() {
        let (status, _rx) = handle();
        status.set_latest_version("2.0.0", true);
        status.skip();

        let current = status.get();
        assert_eq!(current.snapshot.approved_version, "SKIP_2.0.0");
        assert!(current.snapshot.approved_version.starts_with(SKIP_PREFIX));
    }

    #[test]
    fn fail_flags_emit_change_events_only() {
        let (status, mut rx) = handle();
        status.set_webhook_fail("deploy", Some(true));
        status.set_command_fail(1, Some(false));

        let Ok(ChangeEvent::Status { diff, .. }) = rx.change.try_recv() else {
            panic!("expected status change event");
        };
        assert_eq!(diff.webhook_fails.get("deploy"), Some(&Some(true)));
        assert!(rx.change.try_recv().is_ok());
        assert!(rx.save.try_recv().is_err());
    }

    #[test]
    fn unknown_action_ids_are_ignored() {
        let (status, mut rx) = handle();
        status.set_webhook_fail("missing", Some(true));
        status.set_command_fail(7, Some(true));

        assert!(rx.change.try_recv().is_err());
    }

    #[test]
    fn all_actions_succeeded_requires_every_flag_false() {
        let (status, _rx) = handle();
        status.set_webhook_fail("deploy", Some(false));
        status.set_command_fail(0, Some(false));
        assert!(!status.all_actions_succeeded());

        status.set_command_fail(1, Some(false));
        assert!(status.all_actions_succeeded());

        status.reset_action_fails();
        assert_eq!(status.webhook_fail("deploy"), None);
        assert!(!status.all_actions_succeeded());
    }

    #[test]
    fn restore_emits_nothing() {
        let (status, mut rx) = handle();
        status.restore(StatusSnapshot {
            latest_version: "1.2.3".to_string(),
            deployed_version: "1.2.2".to_string(),
            ..Default::default()
        });

        assert_eq!(status.latest_version(), "1.2.3");
        assert_eq!(status.deployed_version(), "1.2.2");
        assert!(rx.change.try_recv().is_err());
        assert!(rx.save.try_recv().is_err());
    }

    #[test]
    fn unchanged_versions_emit_nothing() {
        let (status, mut rx) = handle();
        status.set_deployed_version("");
        status.set_approved_version("");

        assert!(rx.change.try_recv().is_err());
    }

    #[test]
    fn reset_actions_keeps_surviving_flags() {
        let (status, _rx) = handle();
        status.set_webhook_fail("deploy", Some(false));
        status.set_command_fail(1, Some(true));

        status.reset_actions(vec!["deploy".to_string(), "notify-ci".to_string()], 1);

        assert_eq!(status.webhook_fail("deploy"), Some(false));
        assert_eq!(status.webhook_fail("notify-ci"), None);
        assert_eq!(status.get().command_fails, vec![None]);
    }
}
