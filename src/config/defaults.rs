//! Per-field default resolution
//!
//! Every optional field resolves through the same chain:
//! explicit value → global pool entry (webhooks/notifiers only) → class
//! default from the `defaults:` section → hard default compiled in here.

/// Default polling interval
pub const DEFAULT_INTERVAL: &str = "10m";
pub const DEFAULT_SEMANTIC_VERSIONING: bool = true;
pub const DEFAULT_ACTIVE: bool = true;
pub const DEFAULT_AUTO_APPROVE: bool = false;
pub const DEFAULT_ALLOW_INVALID_CERTS: bool = false;
pub const DEFAULT_USE_PRERELEASE: bool = false;

pub const DEFAULT_WEBHOOK_DELAY: &str = "0s";
pub const DEFAULT_WEBHOOK_MAX_TRIES: u32 = 3;
/// 0 accepts any 2xx response
pub const DEFAULT_WEBHOOK_DESIRED_STATUS_CODE: u16 = 0;
pub const DEFAULT_WEBHOOK_SILENT_FAILS: bool = false;

pub const DEFAULT_COMMAND_MAX_TRIES: u32 = 1;
pub const DEFAULT_COMMAND_DELAY: &str = "0s";

pub const DEFAULT_NOTIFY_DELAY: &str = "0s";
pub const DEFAULT_NOTIFY_MAX_TRIES: u32 = 3;
pub const DEFAULT_NOTIFY_TITLE: &str = "version-watch";
pub const DEFAULT_NOTIFY_MESSAGE: &str = "{{ service_id }} - {{ version }} released";

/// The ordered tiers a config section is resolved through
#[derive(Debug)]
pub struct Tiers<'a, C> {
    tiers: [Option<&'a C>; 3],
}

impl<'a, C> Tiers<'a, C> {
    pub fn new(explicit: Option<&'a C>, main: Option<&'a C>, class: Option<&'a C>) -> Self {
        Self {
            tiers: [explicit, main, class],
        }
    }

    /// First tier that sets the field, if any
    pub fn get<T: Clone>(&self, field: impl Fn(&C) -> &Option<T>) -> Option<T> {
        self.tiers
            .iter()
            .flatten()
            .find_map(|section| field(section).clone())
    }

    /// First tier that sets the field, falling back to the hard default
    pub fn get_or<T: Clone>(&self, field: impl Fn(&C) -> &Option<T>, hard: T) -> T {
        self.get(field).unwrap_or(hard)
    }
}
