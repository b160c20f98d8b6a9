//! Token sources

use crate::AuthToken;
use async_trait::async_trait;
use std::{error, fmt, future::Future};

/// An asynchronous source for tokens
///
/// This is the operation that actually obtains a new token, be it a remote
/// call or a credential exchange. The engine never calls it concurrently with
/// itself.
#[async_trait]
pub trait AsyncTokenSource: Send + Sync {
    /// The error type returned in the event that retrieving a token fails
    type Error: error::Error + Send + Sync + 'static;

    /// Requests a token from an asynchronous source
    async fn request_token(&mut self) -> Result<AuthToken, Self::Error>;
}

/// A token source backed by an asynchronous closure
///
/// Constructed with [`from_fn`].
pub struct FnTokenSource<F> {
    request: F,
}

impl<F> fmt::Debug for FnTokenSource<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FnTokenSource").finish_non_exhaustive()
    }
}

/// Adapts a closure returning a future into a token source
///
/// ```
/// use authcast::{sources, AuthToken};
/// use authcast_clock::{DurationMillis, System};
///
/// let source = sources::from_fn(|| async {
///     Ok::<_, std::io::Error>(AuthToken::with_lifetime(
///         "opaque-token",
///         DurationMillis(60_000),
///         &System,
///     ))
/// });
/// # let _ = source;
/// ```
pub fn from_fn<F, Fut, E>(request: F) -> FnTokenSource<F>
where
    F: FnMut() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AuthToken, E>> + Send + 'static,
    E: error::Error + Send + Sync + 'static,
{
    FnTokenSource { request }
}

#[async_trait]
impl<F, Fut, E> AsyncTokenSource for FnTokenSource<F>
where
    F: FnMut() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AuthToken, E>> + Send + 'static,
    E: error::Error + Send + Sync + 'static,
{
    type Error = E;

    async fn request_token(&mut self) -> Result<AuthToken, Self::Error> {
        (self.request)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authcast_clock::UnixMillis;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn closure_is_called_per_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut source = from_fn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                Ok::<_, std::io::Error>(AuthToken::new(format!("T{}", n), UnixMillis(1_000)))
            }
        });

        let first = source.request_token().await.unwrap();
        let second = source.request_token().await.unwrap();

        assert_eq!(first.token().as_str(), "T1");
        assert_eq!(second.token().as_str(), "T2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
