use authcast_clock::{Clock, DurationMillis, UnixMillis};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

use super::{AccessToken, AccessTokenRef};

/// An access token together with the instant at which it stops being valid
///
/// Tokens are immutable once issued. The only way to obtain a new token is a
/// successful refresh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    token: AccessToken,
    expires_at: UnixMillis,
}

impl AuthToken {
    /// Constructs a token that is valid until `expires_at`
    pub fn new(token: impl Into<AccessToken>, expires_at: UnixMillis) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Constructs a token that is valid for `lifetime` from the clock's current time
    pub fn with_lifetime<C: Clock>(
        token: impl Into<AccessToken>,
        lifetime: DurationMillis,
        clock: &C,
    ) -> Self {
        Self::new(token, clock.now() + lifetime)
    }

    /// Gets the access token
    #[inline]
    pub fn token(&self) -> &AccessTokenRef {
        &self.token
    }

    /// Gets the time at which the token becomes invalid
    #[inline]
    pub fn expires_at(&self) -> UnixMillis {
        self.expires_at
    }

    /// Whether the token is still valid at `now`
    #[inline]
    pub fn is_valid(&self, now: UnixMillis) -> bool {
        now < self.expires_at
    }

    /// Signed number of milliseconds until the token becomes invalid
    ///
    /// Negative once the token has expired. Use [`until_invalid`](Self::until_invalid)
    /// when scheduling.
    pub fn millis_until_invalid(&self, now: UnixMillis) -> i64 {
        let expires_at = i128::from(self.expires_at.0);
        let now = i128::from(now.0);
        let delta = (expires_at - now).clamp(i128::from(i64::MIN), i128::from(i64::MAX));
        i64::try_from(delta).unwrap_or_default()
    }

    /// How much longer the token will be valid, clamped at zero
    #[inline]
    pub fn until_invalid(&self, now: UnixMillis) -> DurationMillis {
        self.expires_at - now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authcast_clock::TestClock;

    #[test]
    fn valid_strictly_before_expiry() {
        let token = AuthToken::new(AccessToken::from_static("T1"), UnixMillis(1_000));

        assert!(token.is_valid(UnixMillis(0)));
        assert!(token.is_valid(UnixMillis(999)));
        assert!(!token.is_valid(UnixMillis(1_000)));
        assert!(!token.is_valid(UnixMillis(1_001)));
    }

    #[test]
    fn millis_until_invalid_goes_negative() {
        let token = AuthToken::new(AccessToken::from_static("T1"), UnixMillis(1_000));

        assert_eq!(token.millis_until_invalid(UnixMillis(400)), 600);
        assert_eq!(token.millis_until_invalid(UnixMillis(1_000)), 0);
        assert_eq!(token.millis_until_invalid(UnixMillis(1_250)), -250);
    }

    #[test]
    fn until_invalid_clamps_at_zero() {
        let token = AuthToken::new(AccessToken::from_static("T1"), UnixMillis(1_000));

        assert_eq!(token.until_invalid(UnixMillis(400)), DurationMillis(600));
        assert_eq!(token.until_invalid(UnixMillis(5_000)), DurationMillis(0));
    }

    #[test]
    fn lifetime_is_measured_from_clock() {
        let clock = TestClock::new(UnixMillis(10_000));
        let token = AuthToken::with_lifetime("T1", DurationMillis(3_600), &clock);

        assert_eq!(token.expires_at(), UnixMillis(13_600));
        assert_eq!(token.token().as_str(), "T1");

        clock.inc(DurationMillis(3_600));
        assert!(!token.is_valid(clock.now()));
    }

    #[test]
    fn serializes_as_plain_fields() {
        let token = AuthToken::new(AccessToken::from_static("T1"), UnixMillis(42));
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, r#"{"token":"T1","expires_at":42}"#);

        let back: AuthToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }
}
