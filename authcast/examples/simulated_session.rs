use authcast::{backoff::ErrorBackoffConfig, sources, AuthToken, RefreshStatus, TokenCast};
use authcast_clock::{DurationMillis, System};
use clap::Parser;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::watch, time};

#[derive(Debug, Parser)]
struct Opts {
    /// How long each issued token stays valid, in milliseconds
    #[arg(short, long, env = "AUTHCAST_TOKEN_LIFETIME_MS", default_value_t = 3_000)]
    lifetime_ms: u64,

    /// Every n-th token request fails (0 disables failures)
    #[arg(short, long, env = "AUTHCAST_FAIL_EVERY", default_value_t = 4)]
    fail_every: u64,

    /// Simulated latency of the token issuer, in milliseconds
    #[arg(long, env = "AUTHCAST_ISSUER_LATENCY_MS", default_value_t = 150)]
    latency_ms: u64,

    /// Toggle the login state this often, in milliseconds
    #[arg(short, long, env = "AUTHCAST_LOGIN_TOGGLE_MS", default_value_t = 7_000)]
    toggle_ms: u64,

    /// Stop after this many seconds
    #[arg(short, long, env = "AUTHCAST_RUN_FOR_SECS", default_value_t = 30)]
    run_for_secs: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("simulated issuer failure on request {0}")]
struct IssuerUnavailable(u64);

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let requests = Arc::new(AtomicU64::new(0));
    let lifetime = DurationMillis(opts.lifetime_ms);
    let latency = Duration::from_millis(opts.latency_ms);
    let fail_every = opts.fail_every;

    let source = sources::from_fn(move || {
        let n = requests.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            time::sleep(latency).await;
            if fail_every != 0 && n % fail_every == 0 {
                Err(IssuerUnavailable(n))
            } else {
                Ok(AuthToken::with_lifetime(
                    format!("token-{}", n),
                    lifetime,
                    &System,
                ))
            }
        }
    });

    let (login_tx, login) = watch::channel(true);

    let cast = TokenCast::builder(source, login)
        .with_backoff(ErrorBackoffConfig::new(
            Duration::from_millis(200),
            Duration::from_secs(5),
            2,
        ))
        .spawn();

    for name in ["alpha", "beta"].iter().copied() {
        let mut tokens = cast.subscribe()?;
        tokio::spawn(async move {
            while let Some(token) = tokens.next().await {
                tracing::info!(subscriber = name, token = format_args!("{:#}", token), "received token");
            }
            tracing::info!(subscriber = name, "token stream ended");
        });
    }

    let mut status = cast.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            match current {
                RefreshStatus::RetryScheduled { failures, delay, error } => tracing::warn!(
                    failures,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "refresh failing"
                ),
                RefreshStatus::GaveUp { failures, error } => {
                    tracing::error!(failures, %error, "refresh abandoned")
                }
                other => tracing::debug!(status = ?other, "refresh status"),
            }
        }
    });

    let mut toggle = time::interval(Duration::from_millis(opts.toggle_ms));
    toggle.tick().await;
    let deadline = time::sleep(Duration::from_secs(opts.run_for_secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = toggle.tick() => {
                let logged_in = !*login_tx.borrow();
                tracing::info!(logged_in, "switching login state");
                login_tx.send_replace(logged_in);
            }
            () = &mut deadline => break,
        }
    }

    cast.shutdown();
    cast.closed().await;
    Ok(())
}
