//! A live, push-based feed of a valid access token
//!
//! Callers that attach a token to outgoing requests should not have to care
//! when that token expires, who else is asking for it, or whether the user
//! just logged out. A [`TokenCast`] takes care of all of that:
//!
//! * While a cached token is valid, it is served from the cache.
//! * When there is no token yet, or the cached one expires, exactly one
//!   refresh is made against the [token source][sources::AsyncTokenSource],
//!   no matter how many subscribers are waiting.
//! * Logging out drops the cached token, cancels the expiry wake-up and stops
//!   retries; logging in again fetches a fresh token.
//! * Failed refreshes are retried with [backoff]. Failures are never pushed
//!   to subscribers, who simply wait for the next good token; the
//!   [status][TokenCast::status] channel shows what is going on.
//!
//! All state lives on a single background task. The only asynchronous
//! boundaries are the token request itself and the timers.
//!
//! # Example
//!
//! ```
//! use authcast::{sources, AuthToken, TokenCast};
//! use authcast_clock::{DurationMillis, System};
//! use tokio::sync::watch;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (logged_in, login_state) = watch::channel(true);
//!
//! let source = sources::from_fn(|| async {
//!     // Exchange credentials with the authority here
//!     Ok::<_, std::io::Error>(AuthToken::with_lifetime(
//!         "opaque-token",
//!         DurationMillis(60_000),
//!         &System,
//!     ))
//! });
//!
//! let cast = TokenCast::spawn(source, login_state);
//! let mut tokens = cast.subscribe().expect("engine is running");
//!
//! let token = tokens.next().await.expect("a token while logged in");
//! assert_eq!(token.as_str(), "opaque-token");
//!
//! logged_in.send_replace(false);
//! cast.shutdown();
//! # }
//! ```
//!
//! Time is injected through [`Clock`](authcast_clock::Clock). Tests run with
//! paused tokio time and a [`TokioClock`](authcast_clock::TokioClock), which
//! moves together with the expiry and retry timers.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod backoff;
mod braids;
mod cast;
mod channel;
mod error;
mod gate;
mod refresh;
mod scheduler;
pub mod sources;
mod store;
mod tokens;

pub use braids::*;
pub use cast::{TokenCast, TokenCastBuilder};
pub use channel::TokenSubscription;
pub use error::{RefreshFailed, TokenCastClosed};
pub use refresh::RefreshStatus;
pub use tokens::AuthToken;
