//! Error backoff handling

use std::time::Duration;

/// Configuration for how to manage backoff when a refresh fails
#[derive(Clone, Debug)]
pub struct ErrorBackoffConfig {
    initial_error_delay: Duration,
    max_error_delay: Duration,
    multiplier: u32,
    max_attempts: Option<u32>,
}

impl Default for ErrorBackoffConfig {
    /// Default backoff configuration
    ///
    /// Uses an initial error delay of 100 ms with a multiplier of 2. Maximum delay is
    /// capped at 15 seconds. Retries continue for as long as the user stays logged in.
    fn default() -> Self {
        Self {
            initial_error_delay: Duration::from_millis(100),
            max_error_delay: Duration::from_secs(15),
            multiplier: 2,
            max_attempts: None,
        }
    }
}

impl ErrorBackoffConfig {
    /// Constructs a new backoff configuration
    ///
    /// When encountering an error for the first time, the backoff will be `initial_error_delay`.
    /// On subsequent errors, the backoff should be multiplied by `multiplier`, with a cap of
    /// `max_error_delay`.
    pub fn new(initial_error_delay: Duration, max_error_delay: Duration, multiplier: u32) -> Self {
        Self {
            initial_error_delay,
            max_error_delay,
            multiplier,
            max_attempts: None,
        }
    }

    /// Retries immediately after every failure, without any delay
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 1)
    }

    /// Gives up after `max_attempts` consecutive failures
    ///
    /// Once given up, no further attempt is made until something asks for a
    /// token again (a new subscriber, a login change or an expiry).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }
}

/// What to do after a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// Try again after the delay
    RetryAfter(Duration),
    /// Too many consecutive failures
    GiveUp,
}

/// A stateful handler that manages error backoff state
#[derive(Debug)]
pub struct ErrorBackoffHandler {
    config: ErrorBackoffConfig,
    last_delay: Option<Duration>,
    failures: u32,
}

impl ErrorBackoffHandler {
    /// Constructs a new handler from an [`ErrorBackoffConfig`].
    pub fn new(config: ErrorBackoffConfig) -> Self {
        Self {
            config,
            last_delay: None,
            failures: 0,
        }
    }

    /// Number of consecutive failures since the last reset
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Reports a success or otherwise forgets earlier failures
    pub fn reset(&mut self) {
        self.last_delay = None;
        self.failures = 0;
    }

    /// Reports a failure and returns what should happen next
    ///
    /// This will apply the values in the backoff configuration, increasing the backoff delay
    /// if required.
    pub fn error(&mut self) -> Backoff {
        self.failures = self.failures.saturating_add(1);

        if let Some(max) = self.config.max_attempts {
            if self.failures >= max {
                return Backoff::GiveUp;
            }
        }

        let new_delay = self
            .last_delay
            .map(|d| {
                d.checked_mul(self.config.multiplier)
                    .unwrap_or(self.config.max_error_delay)
                    .min(self.config.max_error_delay)
            })
            .unwrap_or(self.config.initial_error_delay);
        self.last_delay = Some(new_delay);
        Backoff::RetryAfter(new_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_doubles_up_to_cap() {
        let mut handler = ErrorBackoffHandler::new(ErrorBackoffConfig::default());

        let delays: Vec<_> = (0..10).map(|_| handler.error()).collect();
        assert_eq!(delays[0], Backoff::RetryAfter(Duration::from_millis(100)));
        assert_eq!(delays[1], Backoff::RetryAfter(Duration::from_millis(200)));
        assert_eq!(delays[2], Backoff::RetryAfter(Duration::from_millis(400)));
        assert_eq!(delays[9], Backoff::RetryAfter(Duration::from_secs(15)));
        assert_eq!(handler.failures(), 10);
    }

    #[test]
    fn reset_starts_over() {
        let mut handler = ErrorBackoffHandler::new(ErrorBackoffConfig::default());
        handler.error();
        handler.error();
        handler.reset();

        assert_eq!(handler.failures(), 0);
        assert_eq!(
            handler.error(),
            Backoff::RetryAfter(Duration::from_millis(100))
        );
    }

    #[test]
    fn immediate_never_waits() {
        let mut handler = ErrorBackoffHandler::new(ErrorBackoffConfig::immediate());
        for _ in 0..5 {
            assert_eq!(handler.error(), Backoff::RetryAfter(Duration::ZERO));
        }
    }

    #[test]
    fn gives_up_at_max_attempts() {
        let config = ErrorBackoffConfig::immediate().with_max_attempts(3);
        let mut handler = ErrorBackoffHandler::new(config);

        assert_eq!(handler.error(), Backoff::RetryAfter(Duration::ZERO));
        assert_eq!(handler.error(), Backoff::RetryAfter(Duration::ZERO));
        assert_eq!(handler.error(), Backoff::GiveUp);
    }
}
