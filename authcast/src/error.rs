use authcast_clock::UnixMillis;
use std::error;
use thiserror::Error;

/// A refresh attempt did not produce a usable token
///
/// The cause is kept opaque; transient and permanent failures are not told apart.
#[derive(Debug, Error)]
pub enum RefreshFailed {
    /// The token source reported an error
    #[error("token source failed to issue a token")]
    Source(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// The token source issued a token that was already expired on arrival
    #[error("issued token already expired at {expired_at:?} (now {now:?})")]
    AlreadyExpired {
        /// When the token stopped being valid
        expired_at: UnixMillis,
        /// The time at which the token arrived
        now: UnixMillis,
    },
}

impl RefreshFailed {
    pub(crate) fn from_source<E>(error: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        Self::Source(Box::new(error))
    }
}

/// The token cast has been shut down and will not publish any more tokens
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("token cast has been shut down")]
pub struct TokenCastClosed;
