use crate::{
    backoff::ErrorBackoffConfig,
    channel::{BroadcastChannel, TokenSubscription},
    gate::{self, Decision, Trigger},
    refresh::{RefreshEvent, RefreshStatus, Refresher},
    scheduler::ExpiryScheduler,
    sources::AsyncTokenSource,
    store::{CacheState, TokenStore},
    AccessToken, TokenCastClosed,
};
use authcast_clock::{Clock, System};
use std::fmt;
use tokio::sync::{mpsc, watch};

/// A handle to a running token cast
///
/// The token cast keeps a valid access token available for as long as the
/// user is logged in, and pushes every new token to all subscribers. Handles
/// are cheap to clone. The background engine shuts down once [`shutdown`] is
/// called or every handle has been dropped.
///
/// [`shutdown`]: TokenCast::shutdown
#[derive(Clone, Debug)]
pub struct TokenCast {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<RefreshStatus>,
}

#[derive(Debug)]
enum Command {
    Attach(mpsc::UnboundedSender<AccessToken>),
    Shutdown,
}

impl TokenCast {
    /// Starts configuring a token cast
    ///
    /// `login` carries the login state; the value it holds right now is the
    /// initial state, and every later send is re-evaluated.
    pub fn builder<S>(source: S, login: watch::Receiver<bool>) -> TokenCastBuilder<S> {
        TokenCastBuilder {
            source,
            login,
            backoff: ErrorBackoffConfig::default(),
            clock: System,
        }
    }

    /// Spawns a token cast with default settings and the system clock
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(source: S, login: watch::Receiver<bool>) -> Self
    where
        S: AsyncTokenSource + 'static,
    {
        Self::builder(source, login).spawn()
    }

    /// Attaches a new subscriber
    ///
    /// If a valid token is cached, the new subscriber receives it right away.
    /// Otherwise, while logged in, a refresh is started unless one is already
    /// running, and the subscriber receives its result.
    pub fn subscribe(&self) -> Result<TokenSubscription, TokenCastClosed> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.commands
            .send(Command::Attach(tx))
            .map_err(|_| TokenCastClosed)?;
        Ok(TokenSubscription::new(rx))
    }

    /// Watches the state of the background refresh
    pub fn status(&self) -> watch::Receiver<RefreshStatus> {
        self.status.clone()
    }

    /// Stops the engine
    ///
    /// Subscriber streams end, timers are dropped and the login state is no
    /// longer watched. A refresh that is already running is allowed to finish,
    /// but its token is thrown away. Calling this more than once is harmless.
    pub fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).is_err() {
            tracing::trace!("token cast already shut down");
        }
    }

    /// Whether the engine has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Completes once the engine has stopped
    pub async fn closed(&self) {
        self.commands.closed().await
    }
}

/// Configuration for a [`TokenCast`]
pub struct TokenCastBuilder<S, C = System> {
    source: S,
    login: watch::Receiver<bool>,
    backoff: ErrorBackoffConfig,
    clock: C,
}

impl<S, C> fmt::Debug for TokenCastBuilder<S, C>
where
    S: fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenCastBuilder")
            .field("source", &self.source)
            .field("logged_in", &*self.login.borrow())
            .field("backoff", &self.backoff)
            .field("clock", &self.clock)
            .finish()
    }
}

impl<S, C> TokenCastBuilder<S, C> {
    /// Sets how failed refreshes are retried
    pub fn with_backoff(mut self, backoff: ErrorBackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Expiry wake-ups run on tokio's timer, so in tests pair paused tokio time
    /// with [`TokioClock`](authcast_clock::TokioClock).
    pub fn with_clock<D>(self, clock: D) -> TokenCastBuilder<S, D> {
        TokenCastBuilder {
            source: self.source,
            login: self.login,
            backoff: self.backoff,
            clock,
        }
    }
}

impl<S, C> TokenCastBuilder<S, C>
where
    S: AsyncTokenSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Spawns the engine onto the current tokio runtime
    pub fn spawn(self) -> TokenCast {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(RefreshStatus::Idle);

        let engine = Engine::new(self.source, self.login, self.backoff, self.clock, status_tx);
        let join = tokio::spawn(engine.run(commands_rx));

        tokio::spawn(async move {
            if let Err(err) = join.await {
                if err.is_panic() {
                    tracing::error!("token cast engine panicked!")
                } else if err.is_cancelled() {
                    tracing::info!("token cast engine was cancelled")
                }
            }
        });

        TokenCast {
            commands: commands_tx,
            status: status_rx,
        }
    }
}

/// Owner of all token state
///
/// Every decision runs on this one task, so nothing here needs locking.
struct Engine<S: AsyncTokenSource, C> {
    store: TokenStore,
    login: watch::Receiver<bool>,
    login_open: bool,
    logged_in: bool,
    refresher: Refresher<S>,
    scheduler: ExpiryScheduler,
    channel: BroadcastChannel,
    clock: C,
}

impl<S, C> Engine<S, C>
where
    S: AsyncTokenSource + 'static,
    C: Clock + Send + Sync + 'static,
{
    fn new(
        source: S,
        mut login: watch::Receiver<bool>,
        backoff: ErrorBackoffConfig,
        clock: C,
        status: watch::Sender<RefreshStatus>,
    ) -> Self {
        let logged_in = *login.borrow_and_update();
        Self {
            store: TokenStore::new(),
            login,
            login_open: true,
            logged_in,
            refresher: Refresher::new(source, backoff, status),
            scheduler: ExpiryScheduler::new(),
            channel: BroadcastChannel::new(),
            clock,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!(logged_in = self.logged_in, "token cast started");

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Attach(tx)) => self.attach(tx),
                    Some(Command::Shutdown) | None => break,
                },
                changed = self.login.changed(), if self.login_open => match changed {
                    Ok(()) => self.login_changed(),
                    Err(_) => {
                        tracing::debug!(
                            logged_in = self.logged_in,
                            "login state source closed, keeping last known state"
                        );
                        self.login_open = false;
                    }
                },
                () = self.scheduler.fired() => self.expiry_fired(),
                event = self.refresher.next_event(&self.clock) => self.refresh_finished(event),
            }
        }

        self.dispose();
    }

    fn attach(&mut self, tx: mpsc::UnboundedSender<AccessToken>) {
        let id = self.channel.attach(tx);
        tracing::debug!(subscriber = id, "subscriber attached");
        self.evaluate(Trigger::Attached(id));
    }

    fn login_changed(&mut self) {
        self.logged_in = *self.login.borrow_and_update();
        tracing::debug!(logged_in = self.logged_in, "login state changed");
        self.evaluate(Trigger::LoginChanged);
    }

    fn evaluate(&mut self, trigger: Trigger) {
        let decision = gate::decide(self.logged_in, self.store.get(), self.clock.now());
        tracing::trace!(?trigger, ?decision, "evaluated token state");

        match decision {
            Decision::Clear => self.clear(),
            Decision::Serve(token) => match trigger {
                Trigger::Attached(id) => {
                    self.channel.replay(id, &token);
                }
                _ => {
                    self.channel.publish(&token);
                }
            },
            Decision::Refresh { expired } => {
                if expired {
                    self.store.clear();
                    self.scheduler.disarm();
                }

                if trigger == Trigger::Expired && !self.channel.has_subscribers() {
                    tracing::debug!("token expired with no subscribers, deferring refresh");
                } else {
                    self.refresher.start();
                }
            }
        }
    }

    fn clear(&mut self) {
        let dropped = self.store.clear();
        let disarmed = self.scheduler.disarm();
        self.refresher.invalidate();
        tracing::debug!(dropped, disarmed, "logged out, token cache cleared");
    }

    fn expiry_fired(&mut self) {
        let now = self.clock.now();
        if self.logged_in {
            if let CacheState::Holding(token) = self.store.get() {
                if token.is_valid(now) {
                    let remaining = token.until_invalid(now);
                    tracing::debug!(
                        remaining_ms = remaining.0,
                        "woke before token expiry, sleeping again"
                    );
                    self.scheduler.arm(remaining);
                    return;
                }
            }
        }

        tracing::debug!("token expired");
        self.evaluate(Trigger::Expired);
    }

    fn refresh_finished(&mut self, event: RefreshEvent) {
        match event {
            RefreshEvent::Succeeded(_) if !*self.login.borrow() => {
                tracing::debug!("logged out while the token was requested, discarding it");
                self.login_changed();
            }
            RefreshEvent::Succeeded(token) => {
                let delay = token.until_invalid(self.clock.now());
                tracing::debug!(
                    expires_at = token.expires_at().0,
                    delay_ms = delay.0,
                    "new token stored, waiting for it to expire"
                );

                let access_token = token.token().to_owned();
                self.store.set(token);
                self.scheduler.arm(delay);
                self.channel.publish(&access_token);
            }
            RefreshEvent::Failed(error) => {
                self.refresher.schedule_retry(error);
            }
            RefreshEvent::RetryDue => self.evaluate(Trigger::Retry),
            RefreshEvent::Discarded => {
                tracing::debug!("discarded token requested before logout");
                self.evaluate(Trigger::Discarded);
            }
        }
    }

    fn dispose(self) {
        let Engine {
            mut scheduler,
            mut channel,
            refresher,
            login,
            ..
        } = self;

        scheduler.disarm();
        channel.close();
        refresher.detach();
        drop(login);

        tracing::info!(attached = channel.attached(), "token cast shut down");
    }
}
