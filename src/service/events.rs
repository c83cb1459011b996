//! Outbound event queues: dashboard change events and persistence save events

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::debug;

/// Persistable part of a service status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub approved_version: String,
    pub deployed_version: String,
    pub deployed_version_timestamp: Option<DateTime<Utc>>,
    pub latest_version: String,
    pub latest_version_timestamp: Option<DateTime<Utc>>,
    pub last_queried: Option<DateTime<Utc>>,
}

/// Fields of a status that changed in one transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusDiff {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_version_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_queried: Option<DateTime<Utc>>,
    /// `None` means the flag was reset
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub webhook_fails: IndexMap<String, Option<bool>>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub command_fails: IndexMap<usize, Option<bool>>,
}

impl StatusDiff {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Status {
        service_id: String,
        diff: StatusDiff,
    },
    Created {
        service_id: String,
    },
    Edited {
        service_id: String,
    },
    Deleted {
        service_id: String,
    },
    Order {
        order: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveEvent {
    Save {
        service_id: String,
        snapshot: StatusSnapshot,
    },
    Delete {
        service_id: String,
    },
}

/// Receiving ends handed to the broadcaster and the persistence sink
#[derive(Debug)]
pub struct EventReceivers {
    pub change: UnboundedReceiver<ChangeEvent>,
    pub save: UnboundedReceiver<SaveEvent>,
}

/// Sending ends of both queues; cloned into every status handle
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    change: Option<UnboundedSender<ChangeEvent>>,
    save: Option<UnboundedSender<SaveEvent>>,
}

impl EventSink {
    pub fn new() -> (Self, EventReceivers) {
        let (change_tx, change_rx) = unbounded_channel();
        let (save_tx, save_rx) = unbounded_channel();
        (
            Self {
                change: Some(change_tx),
                save: Some(save_tx),
            },
            EventReceivers {
                change: change_rx,
                save: save_rx,
            },
        )
    }

    /// A sink that drops every event
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn change(&self, event: ChangeEvent) {
        if let Some(tx) = &self.change {
            if tx.send(event).is_err() {
                debug!("Change event receiver closed");
            }
        }
    }

    pub fn save(&self, event: SaveEvent) {
        if let Some(tx) = &self.save {
            if tx.send(event).is_err() {
                debug!("Save event receiver closed");
            }
        }
    }
}
