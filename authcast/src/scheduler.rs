use authcast_clock::DurationMillis;
use std::{future, pin::Pin, time::Duration};
use tokio::time::{self, Sleep};

/// A one-shot wake-up at token expiry
///
/// Runs on tokio's timer, so pausing and advancing tokio time drives it.
#[derive(Debug, Default)]
pub(crate) struct ExpiryScheduler {
    timer: Option<Pin<Box<Sleep>>>,
    armed_for: Option<Duration>,
}

impl ExpiryScheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replaces any pending wake-up with one `delay` from now
    pub(crate) fn arm(&mut self, delay: DurationMillis) {
        let delay = Duration::from(delay);
        tracing::debug!(delay_ms = delay.as_millis() as u64, "arming expiry timer");
        self.timer = Some(Box::pin(time::sleep(delay)));
        self.armed_for = Some(delay);
    }

    /// Cancels the pending wake-up, returning whether one was pending
    pub(crate) fn disarm(&mut self) -> bool {
        self.armed_for = None;
        if self.timer.take().is_some() {
            tracing::trace!("expiry timer disarmed");
            true
        } else {
            false
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// The delay the pending wake-up was armed with
    pub(crate) fn armed_for(&self) -> Option<Duration> {
        self.armed_for
    }

    /// Completes when the armed timer elapses; never completes while disarmed
    ///
    /// Cancel safe: dropping this future leaves the timer armed.
    pub(crate) async fn fired(&mut self) {
        match &mut self.timer {
            Some(timer) => {
                timer.as_mut().await;
                self.timer = None;
                self.armed_for = None;
            }
            None => future::pending().await,
        }
    }
}
