//! [`Cadence`] – a periodic timer tied to a shutdown signal.
//!
//! Replaces open-ended `loop { sleep }` polling: every periodic task in the
//! pipeline owns a `Cadence` and exits as soon as the pipeline's shutdown
//! flag flips (or its sender is dropped).  Ticks that fall behind are
//! skipped, never bunched up.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};

pub struct Cadence {
    interval: Interval,
    shutdown: watch::Receiver<bool>,
}

impl Cadence {
    /// The first tick completes immediately.
    pub fn new(period: Duration, shutdown: watch::Receiver<bool>) -> Self {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval, shutdown }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    /// Wait for the next tick.  Returns `false` once shutdown was requested.
    pub async fn tick(&mut self) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        let sender_gone = tokio::select! {
            _ = self.interval.tick() => false,
            changed = self.shutdown.changed() => changed.is_err(),
        };
        !sender_gone && !*self.shutdown.borrow()
    }
}
