//! Per-service recurring poll task
//!
//! Each active service gets one task ticking at its interval. A tick that
//! lands while the previous poll is still running is dropped and counted,
//! never queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The unit of work a schedule runs on every tick
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll(&self);
}

/// At-most-one-in-flight flag shared by the schedule and manual refreshes
#[derive(Debug, Default)]
pub struct InFlight(AtomicBool);

/// Clears the in-flight flag when dropped
#[derive(Debug)]
pub struct InFlightGuard(Arc<InFlight>);

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the flag, or `None` if a poll is already running
    pub fn try_acquire(self: &Arc<Self>) -> Option<InFlightGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(Arc::clone(self)))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.0.store(false, Ordering::Release);
    }
}

/// Handle to a running schedule
#[derive(Debug)]
pub struct Schedule {
    interval: watch::Sender<Duration>,
    cancel: CancellationToken,
    dropped_ticks: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl Schedule {
    /// Start ticking `poller` every `period`; the first tick fires immediately
    pub fn spawn(
        service_id: &str,
        poller: Arc<dyn Poller>,
        in_flight: Arc<InFlight>,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (interval_tx, interval_rx) = watch::channel(period);
        let dropped_ticks = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(run(
            service_id.to_string(),
            poller,
            in_flight,
            interval_rx,
            cancel.clone(),
            Arc::clone(&dropped_ticks),
        ));

        Self {
            interval: interval_tx,
            cancel,
            dropped_ticks,
            task,
        }
    }

    /// Re-arm the timer with a new period; a poll in flight is left alone
    pub fn set_interval(&self, period: Duration) {
        self.interval.send_if_modified(|current| {
            let changed = *current != period;
            *current = period;
            changed
        });
    }

    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Schedule {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    service_id: String,
    poller: Arc<dyn Poller>,
    in_flight: Arc<InFlight>,
    mut interval_rx: watch::Receiver<Duration>,
    cancel: CancellationToken,
    dropped_ticks: Arc<AtomicU64>,
) {
    let period = *interval_rx.borrow_and_update();
    let mut ticker = interval_at(Instant::now(), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!("{}: scheduled every {:?}", service_id, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("{}: schedule stopped", service_id);
                break;
            }
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let period = *interval_rx.borrow_and_update();
                ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                debug!("{}: interval changed to {:?}", service_id, period);
            }
            _ = ticker.tick() => {
                let Some(guard) = in_flight.try_acquire() else {
                    let dropped = dropped_ticks.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!("{}: previous poll still running, tick dropped ({} so far)", service_id, dropped);
                    continue;
                };
                let poller = Arc::clone(&poller);
                tokio::spawn(async move {
                    let _guard = guard;
                    poller.poll().await;
                });
            }
        }
    }
}
