//! [`CommandThrottle`] – outbound command rate cap.
//!
//! A `governor` direct (un-keyed) rate limiter sits in front of the link.
//! Commands beyond the quota are dropped, not queued.  [`Command::Stop`] is
//! never throttled so the robot can always be halted.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

use cobot_types::Command;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::debug;

/// Default cap on outbound commands per second.
pub const DEFAULT_COMMANDS_PER_SECOND: u32 = 10;

pub struct CommandThrottle {
    limiter: DefaultDirectRateLimiter,
    dropped: AtomicU64,
}

impl CommandThrottle {
    /// Allow `per_second` commands per second (minimum 1).
    pub fn per_second(per_second: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            dropped: AtomicU64::new(0),
        }
    }

    /// `true` when `command` may be sent now.
    pub fn admit(&self, command: &Command) -> bool {
        if command.is_stop() {
            return true;
        }
        match self.limiter.check() {
            Ok(()) => true,
            Err(_) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(%command, dropped = total, "command throttled");
                false
            }
        }
    }

    /// Commands rejected so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for CommandThrottle {
    fn default() -> Self {
        Self::per_second(DEFAULT_COMMANDS_PER_SECOND)
    }
}

impl std::fmt::Debug for CommandThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandThrottle")
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_above_quota_is_dropped() {
        let throttle = CommandThrottle::per_second(2);
        assert!(throttle.admit(&Command::Forward));
        assert!(throttle.admit(&Command::Forward));
        assert!(!throttle.admit(&Command::Forward));
        assert_eq!(throttle.dropped(), 1);
    }

    #[test]
    fn stop_always_passes() {
        let throttle = CommandThrottle::per_second(1);
        assert!(throttle.admit(&Command::Left));
        for _ in 0..5 {
            assert!(throttle.admit(&Command::Stop));
        }
        assert_eq!(throttle.dropped(), 0);
    }

    #[test]
    fn zero_rate_is_clamped_to_one() {
        let throttle = CommandThrottle::per_second(0);
        assert!(throttle.admit(&Command::Happy));
        assert!(!throttle.admit(&Command::Happy));
    }
}
