//! Deciding what to do whenever something may have changed

use crate::{store::CacheState, AccessToken};
use authcast_clock::UnixMillis;

/// What caused the gate to be consulted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// A subscriber attached; carries its attachment id
    Attached(u64),
    LoginChanged,
    Expired,
    /// The backoff delay after a failed refresh has passed
    Retry,
    /// A refresh result was thrown away because the user logged out meanwhile
    Discarded,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Logged out: drop the cache and stop all refresh activity
    Clear,
    /// The cached token is still good
    Serve(AccessToken),
    /// A refresh is needed; `expired` means the cached token must go first
    Refresh { expired: bool },
}

pub(crate) fn decide(logged_in: bool, cache: &CacheState, now: UnixMillis) -> Decision {
    if !logged_in {
        return Decision::Clear;
    }

    match cache {
        CacheState::Holding(token) if token.is_valid(now) => {
            Decision::Serve(token.token().to_owned())
        }
        CacheState::Holding(_) => Decision::Refresh { expired: true },
        CacheState::Empty => Decision::Refresh { expired: false },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuthToken;

    fn holding(expires_at: u64) -> CacheState {
        CacheState::Holding(AuthToken::new("T1", UnixMillis(expires_at)))
    }

    #[test]
    fn logged_out_always_clears() {
        assert_eq!(decide(false, &CacheState::Empty, UnixMillis(0)), Decision::Clear);
        assert_eq!(decide(false, &holding(1_000), UnixMillis(0)), Decision::Clear);
    }

    #[test]
    fn valid_token_is_served() {
        assert_eq!(
            decide(true, &holding(1_000), UnixMillis(999)),
            Decision::Serve(AccessToken::from_static("T1"))
        );
    }

    #[test]
    fn expired_token_is_dropped_then_refreshed() {
        assert_eq!(
            decide(true, &holding(1_000), UnixMillis(1_000)),
            Decision::Refresh { expired: true }
        );
    }

    #[test]
    fn empty_cache_refreshes() {
        assert_eq!(
            decide(true, &CacheState::Empty, UnixMillis(0)),
            Decision::Refresh { expired: false }
        );
    }
}
