//! Back-off configuration for restore retries.

use std::time::Duration;

/// Exponential back-off applied between failed restore attempts.
///
/// The delay starts at `initial_delay` and doubles after each failure,
/// capped at `max_delay`.
///
/// # Default Values
/// - `initial_delay`: 10 milliseconds
/// - `max_delay`: 1 second
///
/// # Invariants
/// - `initial_delay` must not exceed `max_delay`
/// - `initial_delay` must be at least 1 millisecond
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Ceiling for the doubled delay.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Clamp delays to at least 1 ms and order them.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use amqp_robust::recovery::BackoffConfig;
    ///
    /// let cfg = BackoffConfig {
    ///     initial_delay: Duration::from_millis(250),
    ///     max_delay: Duration::ZERO,
    /// }
    /// .normalized();
    ///
    /// assert_eq!(cfg.initial_delay, Duration::from_millis(1));
    /// assert_eq!(cfg.max_delay, Duration::from_millis(250));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.initial_delay = self.initial_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        if self.initial_delay > self.max_delay {
            std::mem::swap(&mut self.initial_delay, &mut self.max_delay);
        }
        self
    }

    /// Delay to use after `delay`, doubled and capped.
    #[must_use]
    pub fn next_delay(&self, delay: Duration) -> Duration { (delay * 2).min(self.max_delay) }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::BackoffConfig;

    #[test]
    fn delays_double_then_cap() {
        let cfg = BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(80),
        };
        let delays: Vec<_> = std::iter::successors(Some(cfg.initial_delay), |d| {
            Some(cfg.next_delay(*d))
        })
        .take(5)
        .map(|d| d.as_millis())
        .collect();

        assert_eq!(delays, vec![10, 20, 40, 80, 80]);
    }

    #[rstest]
    #[case(Duration::ZERO, Duration::ZERO, Duration::from_millis(1), Duration::from_millis(1))]
    #[case(
        Duration::from_millis(5),
        Duration::from_millis(2),
        Duration::from_millis(2),
        Duration::from_millis(5)
    )]
    fn normalization_orders_and_clamps(
        #[case] initial: Duration,
        #[case] max: Duration,
        #[case] expected_initial: Duration,
        #[case] expected_max: Duration,
    ) {
        let cfg = BackoffConfig {
            initial_delay: initial,
            max_delay: max,
        }
        .normalized();
        assert_eq!(cfg.initial_delay, expected_initial);
        assert_eq!(cfg.max_delay, expected_max);
    }
}
