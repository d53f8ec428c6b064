//! [`StalenessWatchdog`] – stop when perception goes quiet.
//!
//! The movement heartbeat keeps resending the last direction.  If the camera
//! stalls or inference keeps failing, that direction would be repeated
//! forever.  The watchdog records the time of the last fresh observation and
//! reports [`Freshness::Stale`] once its deadline has passed; the heartbeat
//! then sends [`Command::Stop`] instead.

use std::time::{Duration, Instant};

use cobot_types::Command;
use tracing::warn;

/// Default perception deadline.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3);

/// Health of the observation stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// An observation arrived within the deadline.
    Fresh,
    /// Nothing arrived within the deadline (or nothing ever arrived).
    Stale,
}

/// Tracks the last fresh observation against a deadline.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use cobot_control::watchdog::{Freshness, StalenessWatchdog};
///
/// let t0 = Instant::now();
/// let mut wd = StalenessWatchdog::new(Duration::from_secs(3));
/// wd.feed(t0);
///
/// assert_eq!(wd.freshness(t0 + Duration::from_secs(2)), Freshness::Fresh);
/// assert_eq!(wd.freshness(t0 + Duration::from_secs(4)), Freshness::Stale);
/// ```
#[derive(Debug, Clone)]
pub struct StalenessWatchdog {
    deadline: Duration,
    last_fresh: Option<Instant>,
    reported: bool,
}

impl StalenessWatchdog {
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            last_fresh: None,
            reported: false,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Record a fresh observation made at `at`.  Older timestamps are ignored.
    pub fn feed(&mut self, at: Instant) {
        if self.last_fresh.is_none_or(|last| at > last) {
            self.last_fresh = Some(at);
            self.reported = false;
        }
    }

    pub fn freshness(&self, now: Instant) -> Freshness {
        match self.last_fresh {
            Some(last) if now.saturating_duration_since(last) <= self.deadline => Freshness::Fresh,
            _ => Freshness::Stale,
        }
    }

    /// Pass `command` through while fresh; replace it with `Stop` once stale.
    ///
    /// The first stale tick after a fresh period is logged at `warn`.
    pub fn guard(&mut self, command: Command, now: Instant) -> Command {
        match self.freshness(now) {
            Freshness::Fresh => command,
            Freshness::Stale => {
                if !self.reported && self.last_fresh.is_some() {
                    warn!(deadline_ms = self.deadline.as_millis() as u64, "perception stale, stopping");
                }
                self.reported = true;
                Command::Stop
            }
        }
    }
}

impl Default for StalenessWatchdog {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_fed_is_stale() {
        let wd = StalenessWatchdog::default();
        assert_eq!(wd.freshness(Instant::now()), Freshness::Stale);
    }

    #[test]
    fn feed_resets_deadline() {
        let t0 = Instant::now();
        let mut wd = StalenessWatchdog::new(Duration::from_millis(500));
        wd.feed(t0);
        wd.feed(t0 + Duration::from_millis(400));
        assert_eq!(wd.freshness(t0 + Duration::from_millis(800)), Freshness::Fresh);
    }

    #[test]
    fn older_feed_is_ignored() {
        let t0 = Instant::now();
        let mut wd = StalenessWatchdog::new(Duration::from_millis(500));
        wd.feed(t0 + Duration::from_millis(400));
        wd.feed(t0);
        assert_eq!(wd.freshness(t0 + Duration::from_millis(800)), Freshness::Fresh);
    }

    #[test]
    fn stale_guard_forces_stop() {
        let t0 = Instant::now();
        let mut wd = StalenessWatchdog::new(Duration::from_secs(3));
        wd.feed(t0);
        assert_eq!(wd.guard(Command::ForwardLeft, t0 + Duration::from_secs(1)), Command::ForwardLeft);
        assert_eq!(wd.guard(Command::ForwardLeft, t0 + Duration::from_secs(4)), Command::Stop);
        // Fresh data lifts the stop.
        wd.feed(t0 + Duration::from_secs(5));
        assert_eq!(wd.guard(Command::Forward, t0 + Duration::from_secs(5)), Command::Forward);
    }
}
