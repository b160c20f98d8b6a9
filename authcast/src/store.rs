use crate::AuthToken;

/// What the store currently holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CacheState {
    Empty,
    Holding(AuthToken),
}

/// The single cached token
///
/// No validation happens here; callers check validity against their clock.
#[derive(Debug)]
pub(crate) struct TokenStore {
    state: CacheState,
}

impl TokenStore {
    pub(crate) const fn new() -> Self {
        Self {
            state: CacheState::Empty,
        }
    }

    pub(crate) fn get(&self) -> &CacheState {
        &self.state
    }

    pub(crate) fn set(&mut self, token: AuthToken) {
        self.state = CacheState::Holding(token);
    }

    /// Returns whether a token was dropped
    pub(crate) fn clear(&mut self) -> bool {
        let was_holding = matches!(self.state, CacheState::Holding(_));
        self.state = CacheState::Empty;
        was_holding
    }
}
