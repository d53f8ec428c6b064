//! [`Debouncer`] – N-consecutive-frame confirmation.
//!
//! A new value replaces the confirmed one only after it has been seen on
//! `required` consecutive pushes.  With `required = 1` every push is accepted
//! immediately.

/// Holds a confirmed value and the candidate currently being counted.
///
/// # Example
///
/// ```
/// use cobot_perception::smoothing::Debouncer;
///
/// let mut d = Debouncer::new(0u8, 2);
/// assert_eq!(d.push(1), 0);
/// assert_eq!(d.push(1), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Debouncer<T> {
    required: usize,
    confirmed: T,
    candidate: Option<(T, usize)>,
}

impl<T: Copy + PartialEq> Debouncer<T> {
    /// `required` is clamped to at least 1.
    pub fn new(initial: T, required: usize) -> Self {
        Self {
            required: required.max(1),
            confirmed: initial,
            candidate: None,
        }
    }

    pub fn confirmed(&self) -> T {
        self.confirmed
    }

    /// Record one observation and return the confirmed value afterwards.
    pub fn push(&mut self, value: T) -> T {
        if value == self.confirmed {
            self.candidate = None;
            return self.confirmed;
        }

        let count = match self.candidate {
            Some((c, n)) if c == value => n + 1,
            _ => 1,
        };

        if count >= self.required {
            self.confirmed = value;
            self.candidate = None;
        } else {
            self.candidate = Some((value, count));
        }
        self.confirmed
    }

    /// Force the confirmed value and forget any pending candidate.
    pub fn reset(&mut self, value: T) {
        self.confirmed = value;
        self.candidate = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_confirmation_is_immediate() {
        let mut d = Debouncer::new('c', 1);
        assert_eq!(d.push('l'), 'l');
        assert_eq!(d.push('r'), 'r');
    }

    #[test]
    fn interrupted_run_restarts_count() {
        let mut d = Debouncer::new('c', 3);
        d.push('l');
        d.push('l');
        d.push('r');
        assert_eq!(d.push('l'), 'c');
        d.push('l');
        assert_eq!(d.push('l'), 'l');
    }

    #[test]
    fn returning_to_confirmed_clears_candidate() {
        let mut d = Debouncer::new(0, 2);
        d.push(5);
        d.push(0);
        assert_eq!(d.push(5), 0);
    }

    #[test]
    fn zero_required_behaves_like_one() {
        let mut d = Debouncer::new(0, 0);
        assert_eq!(d.push(7), 7);
    }
}
