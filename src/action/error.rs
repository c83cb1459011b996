use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::process::ProcessError;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("not runnable until {0}")]
    NotRunnable(DateTime<Utc>),

    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("got status {got}, wanted {wanted}")]
    Status { got: u16, wanted: String },

    #[error("invalid signing secret: {0}")]
    Signing(String),

    #[error("command failed: {0}")]
    Command(#[from] ProcessError),

    #[error("{0}")]
    Notify(#[from] NotifyError),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("notification rejected with status {0}")]
    Status(u16),

    #[error("notify {0:?} not found")]
    NotFound(String),
}
