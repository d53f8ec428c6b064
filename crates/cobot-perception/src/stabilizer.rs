//! Temporal stabilization of emotion readings.
//!
//! Raw per-frame classifications flicker.  The stabilizer applies two rules:
//!
//! - **Dwell lock** – an expressive emotion, once emitted, is held for a
//!   fixed time during which new readings are ignored.  When the lock
//!   expires the stabilizer emits [`Emotion::Neutral`] for that tick and
//!   starts counting neutral time from the expiry instant.
//! - **Sleep** – neutral readings held continuously for
//!   [`DwellTimes::sleep_after`] turn into [`Emotion::Sleeping`], which is
//!   held until an expressive reading arrives.
//!
//! The step function is pure: it takes the previous state and returns the
//! next one, so replaying the same readings always yields the same output.

use std::time::{Duration, Instant};

use cobot_types::Emotion;

/// Lock durations per expressive emotion, plus the neutral → sleeping delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DwellTimes {
    pub happy: Duration,
    pub sad: Duration,
    pub angry: Duration,
    pub surprised: Duration,
    pub sleep_after: Duration,
}

impl Default for DwellTimes {
    fn default() -> Self {
        Self {
            happy: Duration::from_secs(7),
            sad: Duration::from_secs(10),
            angry: Duration::from_secs(10),
            surprised: Duration::from_secs(5),
            sleep_after: Duration::from_secs(10),
        }
    }
}

impl DwellTimes {
    /// Lock duration for `emotion`, or `None` for non-expressive states.
    pub fn lock_for(&self, emotion: Emotion) -> Option<Duration> {
        match emotion {
            Emotion::Happy => Some(self.happy),
            Emotion::Sad => Some(self.sad),
            Emotion::Angry => Some(self.angry),
            Emotion::Surprised => Some(self.surprised),
            Emotion::Neutral | Emotion::Sleeping => None,
        }
    }
}

/// Internal timer state carried from one tick to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmotionStabilizer {
    current: Emotion,
    locked_until: Option<Instant>,
    neutral_since: Option<Instant>,
}

impl Default for EmotionStabilizer {
    fn default() -> Self {
        Self {
            current: Emotion::Neutral,
            locked_until: None,
            neutral_since: None,
        }
    }
}

impl EmotionStabilizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last emitted emotion.
    pub fn current(&self) -> Emotion {
        self.current
    }

    /// `true` while a dwell lock is active at `now`.
    pub fn is_locked(&self, now: Instant) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Feed one raw reading and return the stabilized emotion with the next
    /// state.
    pub fn step(&self, dwell: &DwellTimes, reading: Emotion, now: Instant) -> (Emotion, Self) {
        if let Some(until) = self.locked_until {
            if now < until {
                return (self.current, *self);
            }
            let next = Self {
                current: Emotion::Neutral,
                locked_until: None,
                neutral_since: Some(until),
            };
            return (Emotion::Neutral, next);
        }

        if let Some(lock) = dwell.lock_for(reading) {
            let next = Self {
                current: reading,
                locked_until: Some(now + lock),
                neutral_since: None,
            };
            return (reading, next);
        }

        let since = self.neutral_since.unwrap_or(now);
        let emitted = if now.saturating_duration_since(since) >= dwell.sleep_after {
            Emotion::Sleeping
        } else {
            Emotion::Neutral
        };
        let next = Self {
            current: emitted,
            locked_until: None,
            neutral_since: Some(since),
        };
        (emitted, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f32) -> Duration {
        Duration::from_secs_f32(s)
    }

    #[test]
    fn expressive_reading_is_emitted_and_locked() {
        let t0 = Instant::now();
        let dwell = DwellTimes::default();
        let (e, st) = EmotionStabilizer::new().step(&dwell, Emotion::Angry, t0);
        assert_eq!(e, Emotion::Angry);
        assert!(st.is_locked(t0 + secs(9.9)));
        assert!(!st.is_locked(t0 + secs(10.0)));
    }

    #[test]
    fn lock_ignores_other_readings() {
        let t0 = Instant::now();
        let dwell = DwellTimes::default();
        let (_, mut st) = EmotionStabilizer::new().step(&dwell, Emotion::Angry, t0);
        for i in 1..10 {
            let (e, next) = st.step(&dwell, Emotion::Happy, t0 + secs(i as f32));
            assert_eq!(e, Emotion::Angry);
            st = next;
        }
    }

    #[test]
    fn expiry_resets_to_neutral() {
        let t0 = Instant::now();
        let dwell = DwellTimes::default();
        let (_, st) = EmotionStabilizer::new().step(&dwell, Emotion::Angry, t0);
        let (e, st) = st.step(&dwell, Emotion::Happy, t0 + secs(10.0));
        assert_eq!(e, Emotion::Neutral);
        assert!(!st.is_locked(t0 + secs(10.0)));
        // The next expressive reading locks again.
        let (e, _) = st.step(&dwell, Emotion::Happy, t0 + secs(12.0));
        assert_eq!(e, Emotion::Happy);
    }

    #[test]
    fn same_input_within_lock_is_idempotent() {
        let t0 = Instant::now();
        let dwell = DwellTimes::default();
        let (_, st) = EmotionStabilizer::new().step(&dwell, Emotion::Surprised, t0);
        let a = st.step(&dwell, Emotion::Sad, t0 + secs(2.0));
        let b = st.step(&dwell, Emotion::Sad, t0 + secs(2.0));
        assert_eq!(a, b);
        assert_eq!(a.0, Emotion::Surprised);
    }

    #[test]
    fn neutral_for_ten_seconds_sleeps() {
        let t0 = Instant::now();
        let dwell = DwellTimes::default();
        let mut st = EmotionStabilizer::new();
        let mut last = Emotion::Neutral;
        for i in 0..=10 {
            let (e, next) = st.step(&dwell, Emotion::Neutral, t0 + secs(i as f32));
            st = next;
            last = e;
            if i < 10 {
                assert_eq!(e, Emotion::Neutral, "slept early at {i}s");
            }
        }
        assert_eq!(last, Emotion::Sleeping);
        // Held while neutral readings continue.
        let (e, _) = st.step(&dwell, Emotion::Neutral, t0 + secs(30.0));
        assert_eq!(e, Emotion::Sleeping);
    }

    #[test]
    fn expressive_reading_wakes_and_resets_timer() {
        let t0 = Instant::now();
        let dwell = DwellTimes::default();
        let (_, st) = EmotionStabilizer::new().step(&dwell, Emotion::Neutral, t0);
        let (_, st) = st.step(&dwell, Emotion::Neutral, t0 + secs(11.0));
        assert_eq!(st.current(), Emotion::Sleeping);

        let (e, st) = st.step(&dwell, Emotion::Surprised, t0 + secs(12.0));
        assert_eq!(e, Emotion::Surprised);
        // Lock expires at 17 s; neutral time counts from there.
        let (e, st) = st.step(&dwell, Emotion::Neutral, t0 + secs(17.0));
        assert_eq!(e, Emotion::Neutral);
        let (e, _) = st.step(&dwell, Emotion::Neutral, t0 + secs(26.0));
        assert_eq!(e, Emotion::Neutral);
    }

    #[test]
    fn neutral_clock_starts_at_lock_expiry() {
        let t0 = Instant::now();
        let dwell = DwellTimes::default();
        let (_, st) = EmotionStabilizer::new().step(&dwell, Emotion::Surprised, t0);
        // Sparse ticks: first one after the 5 s lock lands at 8 s.
        let (e, st) = st.step(&dwell, Emotion::Neutral, t0 + secs(8.0));
        assert_eq!(e, Emotion::Neutral);
        let (e, _) = st.step(&dwell, Emotion::Neutral, t0 + secs(15.0));
        assert_eq!(e, Emotion::Sleeping);
    }
}
