//! Remaining-time budget of one dispatch operation.
//!
//! The budget is a signed microsecond count decremented by one poll interval
//! per supervision tick. It expires only once it has gone strictly negative,
//! so a 1000 µs budget polled every 100 µs survives ten ticks and expires on
//! the eleventh. A zero timeout means "wait forever".

/// Deadline of an in-flight operation; `None` inside means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline {
    remaining_us: Option<i64>,
}

impl Deadline {
    /// No deadline at all.
    pub const NEVER: Self = Self { remaining_us: None };

    /// Budget of `timeout_us` microseconds; zero means [`Deadline::NEVER`].
    pub fn from_micros(timeout_us: u64) -> Self {
        if timeout_us == 0 {
            return Self::NEVER;
        }
        Self {
            remaining_us: Some(i64::try_from(timeout_us).unwrap_or(i64::MAX)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.remaining_us.is_some()
    }

    /// Charge one supervision tick against the budget.
    pub fn tick(&mut self, elapsed_us: u64) {
        if let Some(remaining) = self.remaining_us.as_mut() {
            let elapsed = i64::try_from(elapsed_us).unwrap_or(i64::MAX);
            *remaining = remaining.saturating_sub(elapsed);
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining_us, Some(remaining) if remaining < 0)
    }

    pub fn remaining_us(&self) -> Option<i64> {
        self.remaining_us
    }
}
