use thiserror::Error;

use crate::action::error::ActionError;
use crate::config::ConfigError;
use crate::lookup::error::LookupError;
use crate::version::error::VersionError;

/// Why a single poll did not produce a usable version
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("service was removed during the poll")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("service {0:?} not found")]
    NotFound(String),

    #[error("service {0:?} already exists")]
    AlreadyExists(String),

    #[error("invalid service:\n  {}", .0.join("\n  "))]
    Invalid(Vec<String>),

    #[error("service {0:?} has no release to act on yet")]
    NoRelease(String),

    #[error("service {0:?} is already being queried")]
    Busy(String),

    #[error("service {service:?} has no action {target:?}")]
    UnknownTarget { service: String, target: String },

    #[error("service {service:?} has no notify {notify:?}")]
    UnknownNotify { service: String, notify: String },

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Action(#[from] ActionError),
}

impl From<ConfigError> for ManagerError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid(problems) => ManagerError::Invalid(problems),
            other => ManagerError::Invalid(vec![other.to_string()]),
        }
    }
}

impl From<LookupError> for ManagerError {
    fn from(err: LookupError) -> Self {
        ManagerError::Poll(PollError::Lookup(err))
    }
}
