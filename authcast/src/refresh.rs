use crate::{
    backoff::{Backoff, ErrorBackoffConfig, ErrorBackoffHandler},
    sources::AsyncTokenSource,
    AuthToken, RefreshFailed,
};
use authcast_clock::Clock;
use std::{
    error,
    future::{self, Future},
    pin::Pin,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::watch,
    time::{self, Sleep},
};

/// What the background refresh is currently doing
///
/// Failures never appear on the token stream; this is where they can be observed.
#[derive(Clone, Debug)]
pub enum RefreshStatus {
    /// No refresh is running or pending
    Idle,
    /// A request to the token source is outstanding
    Refreshing {
        /// 1 for a first try, incremented on each retry
        attempt: u32,
    },
    /// The last request failed and another will be made after `delay`
    RetryScheduled {
        /// Consecutive failures so far
        failures: u32,
        /// Wait before the next attempt
        delay: Duration,
        /// The most recent failure
        error: Arc<RefreshFailed>,
    },
    /// Retries were abandoned after too many consecutive failures
    ///
    /// The next subscriber, login change or expiry starts over.
    GaveUp {
        /// Consecutive failures before giving up
        failures: u32,
        /// The most recent failure
        error: Arc<RefreshFailed>,
    },
}

type TokenResult<S> = Result<AuthToken, <S as AsyncTokenSource>::Error>;
type InFlight<S> = Pin<Box<dyn Future<Output = (S, u64, TokenResult<S>)> + Send>>;

#[derive(Debug)]
pub(crate) enum RefreshEvent {
    Succeeded(AuthToken),
    Failed(RefreshFailed),
    /// Completed for a session that has since been logged out of
    Discarded,
    RetryDue,
}

/// Single-flight driver for the token source
///
/// While a request is outstanding, the source itself lives inside the
/// in-flight future, so a second request cannot be started.
pub(crate) struct Refresher<S: AsyncTokenSource> {
    idle: Option<S>,
    in_flight: Option<InFlight<S>>,
    retry: Option<Pin<Box<Sleep>>>,
    backoff: ErrorBackoffHandler,
    generation: u64,
    status: watch::Sender<RefreshStatus>,
}

impl<S> Refresher<S>
where
    S: AsyncTokenSource + 'static,
{
    pub(crate) fn new(
        source: S,
        backoff: ErrorBackoffConfig,
        status: watch::Sender<RefreshStatus>,
    ) -> Self {
        Self {
            idle: Some(source),
            in_flight: None,
            retry: None,
            backoff: ErrorBackoffHandler::new(backoff),
            generation: 0,
            status,
        }
    }

    /// Whether a request is outstanding or a retry is waiting
    pub(crate) fn is_busy(&self) -> bool {
        self.in_flight.is_some() || self.retry.is_some()
    }

    /// Starts a request unless one is already in progress
    pub(crate) fn start(&mut self) -> bool {
        if self.is_busy() {
            tracing::trace!("refresh already in progress");
            return false;
        }

        let mut source = match self.idle.take() {
            Some(source) => source,
            None => {
                tracing::error!("token source missing while no refresh is in flight");
                return false;
            }
        };

        let attempt = self.backoff.failures() + 1;
        tracing::debug!(attempt, "requesting new token");
        self.report(RefreshStatus::Refreshing { attempt });

        let generation = self.generation;
        self.in_flight = Some(Box::pin(async move {
            let result = source.request_token().await;
            (source, generation, result)
        }));
        true
    }

    /// Forgets the current session
    ///
    /// A pending retry is dropped and any outstanding request will complete as
    /// [`RefreshEvent::Discarded`].
    pub(crate) fn invalidate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.retry = None;
        self.backoff.reset();
        self.report(RefreshStatus::Idle);
    }

    /// Books the next attempt after a failure, per the backoff policy
    pub(crate) fn schedule_retry(&mut self, error: RefreshFailed) -> Option<Duration> {
        let error = Arc::new(error);
        match self.backoff.error() {
            Backoff::RetryAfter(delay) => {
                let failures = self.backoff.failures();
                tracing::warn!(
                    error = (&*error as &dyn error::Error),
                    failures,
                    delay_ms = delay.as_millis() as u64,
                    "error requesting token, will retry"
                );
                self.retry = Some(Box::pin(time::sleep(delay)));
                self.report(RefreshStatus::RetryScheduled {
                    failures,
                    delay,
                    error,
                });
                Some(delay)
            }
            Backoff::GiveUp => {
                let failures = self.backoff.failures();
                tracing::warn!(
                    error = (&*error as &dyn error::Error),
                    failures,
                    "error requesting token, giving up"
                );
                self.backoff.reset();
                self.report(RefreshStatus::GaveUp { failures, error });
                None
            }
        }
    }

    /// Waits for the outstanding request or the pending retry
    ///
    /// Never completes while idle. Cancel safe.
    pub(crate) async fn next_event<C: Clock>(&mut self, clock: &C) -> RefreshEvent {
        if let Some(in_flight) = &mut self.in_flight {
            let (source, generation, result) = in_flight.as_mut().await;
            self.in_flight = None;
            self.idle = Some(source);

            if generation != self.generation {
                return RefreshEvent::Discarded;
            }

            return match result {
                Ok(token) => {
                    let now = clock.now();
                    if token.is_valid(now) {
                        self.backoff.reset();
                        self.report(RefreshStatus::Idle);
                        RefreshEvent::Succeeded(token)
                    } else {
                        RefreshEvent::Failed(RefreshFailed::AlreadyExpired {
                            expired_at: token.expires_at(),
                            now,
                        })
                    }
                }
                Err(error) => RefreshEvent::Failed(RefreshFailed::from_source(error)),
            };
        }

        if let Some(retry) = &mut self.retry {
            retry.as_mut().await;
            self.retry = None;
            return RefreshEvent::RetryDue;
        }

        future::pending().await
    }

    fn report(&self, status: RefreshStatus) {
        let _previous = self.status.send_replace(status);
    }

    /// Lets an outstanding request run to completion on its own, ignoring the result
    pub(crate) fn detach(self) {
        if let Some(in_flight) = self.in_flight {
            tokio::spawn(async move {
                let (_source, _generation, result) = in_flight.await;
                tracing::debug!(
                    succeeded = result.is_ok(),
                    "refresh finished after shutdown, result discarded"
                );
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources;
    use authcast_clock::{DurationMillis, TokioClock, UnixMillis};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("issuer unavailable")]
    struct Unavailable;

    fn counting_source(
        clock: TokioClock,
        calls: Arc<AtomicUsize>,
    ) -> impl AsyncTokenSource<Error = Unavailable> {
        sources::from_fn(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                time::sleep(Duration::from_millis(100)).await;
                if n == 1 {
                    Err(Unavailable)
                } else {
                    Ok(AuthToken::with_lifetime(
                        format!("T{}", n),
                        DurationMillis(1_000),
                        &clock,
                    ))
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_ignored_while_in_flight() {
        let clock = TokioClock::starting_at(UnixMillis(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let (status, _) = watch::channel(RefreshStatus::Idle);
        let mut refresher = Refresher::new(
            counting_source(clock, calls.clone()),
            ErrorBackoffConfig::immediate(),
            status,
        );

        assert!(refresher.start());
        assert!(!refresher.start());

        match refresher.next_event(&clock).await {
            RefreshEvent::Failed(RefreshFailed::Source(_)) => {}
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_waits_then_succeeds() {
        let clock = TokioClock::starting_at(UnixMillis(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let (status_tx, status) = watch::channel(RefreshStatus::Idle);
        let mut refresher = Refresher::new(
            counting_source(clock, calls.clone()),
            ErrorBackoffConfig::default(),
            status_tx,
        );

        refresher.start();
        let error = match refresher.next_event(&clock).await {
            RefreshEvent::Failed(error) => error,
            other => panic!("unexpected event: {:?}", other),
        };

        assert_eq!(
            refresher.schedule_retry(error),
            Some(Duration::from_millis(100))
        );
        assert!(matches!(
            *status.borrow(),
            RefreshStatus::RetryScheduled { failures: 1, .. }
        ));
        assert!(!refresher.start(), "backoff must not be bypassed");

        assert!(matches!(
            refresher.next_event(&clock).await,
            RefreshEvent::RetryDue
        ));
        assert!(refresher.start());
        assert!(matches!(
            *status.borrow(),
            RefreshStatus::Refreshing { attempt: 2 }
        ));

        match refresher.next_event(&clock).await {
            RefreshEvent::Succeeded(token) => assert_eq!(token.token().as_str(), "T2"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(*status.borrow(), RefreshStatus::Idle));
        assert!(clock.now() >= UnixMillis(300));
        assert!(clock.now() < UnixMillis(310));
    }

    #[tokio::test(start_paused = true)]
    async fn invalidated_request_is_discarded() {
        let clock = TokioClock::starting_at(UnixMillis(0));
        let calls = Arc::new(AtomicUsize::new(1));
        let (status, _) = watch::channel(RefreshStatus::Idle);
        let mut refresher = Refresher::new(
            counting_source(clock, calls),
            ErrorBackoffConfig::immediate(),
            status,
        );

        refresher.start();
        refresher.invalidate();

        assert!(matches!(
            refresher.next_event(&clock).await,
            RefreshEvent::Discarded
        ));
        assert!(!refresher.is_busy());
        assert!(refresher.start());
    }
}
