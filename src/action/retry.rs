//! Retry loop and runnable bookkeeping shared by webhooks, commands and notifications

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::action::error::ActionError;

/// Private next-runnable timestamp of one action; the fail flag itself lives
/// on the service status
#[derive(Debug, Default)]
pub struct Runnable(Mutex<Option<DateTime<Utc>>>);

impl Runnable {
    fn lock(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refuse to run before `next_runnable`
    pub fn check(&self) -> Result<(), ActionError> {
        match *self.lock() {
            Some(at) if Utc::now() < at => Err(ActionError::NotRunnable(at)),
            _ => Ok(()),
        }
    }

    pub fn succeeded(&self) {
        *self.lock() = None;
    }

    pub fn failed(&self, stagger: Duration) {
        *self.lock() = chrono::Duration::from_std(stagger)
            .ok()
            .map(|stagger| Utc::now() + stagger);
    }

    pub fn next_runnable(&self) -> Option<DateTime<Utc>> {
        *self.lock()
    }
}

/// Wait `delay`, then call `attempt` up to `max_tries` times with `gap` between
/// tries. Records the outcome on `runnable`.
pub async fn run_with_retries<F, Fut>(
    label: &str,
    runnable: &Runnable,
    delay: Duration,
    max_tries: u32,
    gap: Duration,
    stagger: Duration,
    mut attempt: F,
) -> Result<(), ActionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ActionError>>,
{
    runnable.check()?;
    if !delay.is_zero() {
        debug!("{}: waiting {:?} before sending", label, delay);
        sleep(delay).await;
    }

    let max_tries = max_tries.max(1);
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Ok(()) => {
                debug!("{}: succeeded on try {}", label, tries);
                runnable.succeeded();
                return Ok(());
            }
            Err(e) if tries < max_tries => {
                warn!("{}: try {}/{} failed: {}", label, tries, max_tries, e);
                sleep(gap).await;
            }
            Err(e) => {
                warn!("{}: failed {} times: {}", label, tries, e);
                runnable.failed(stagger);
                return Err(e);
            }
        }
    }
}
