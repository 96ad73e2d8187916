use std::{error, fmt, future::Future};

use async_trait::async_trait;

use super::TokenAcquirer;
use crate::{AcquiredToken, TokenRequest};

/// An acquirer backed by an asynchronous function
///
/// Constructed with [`from_fn`].
#[derive(Clone)]
pub struct FnAcquirer<F> {
    f: F,
}

/// Adapts an asynchronous function into a [`TokenAcquirer`]
///
/// The function receives its own copy of the request, so the returned future
/// need not borrow from the caller.
///
/// ```
/// use aliri_clock::{Clock, DurationSecs, System};
/// use aliri_token_cache::{sources, AcquiredToken, AccessToken, TokenCache, TokenRequest};
///
/// let acquirer = sources::from_fn(|request: TokenRequest| async move {
///     let token = AccessToken::new(format!("token-for-{}", request.cache_key()));
///     Ok::<_, std::io::Error>(AcquiredToken::new(token, System.now() + DurationSecs(3600)))
/// });
///
/// let cache = TokenCache::new(acquirer, DurationSecs(300));
/// # let _ = cache;
/// ```
pub fn from_fn<F, Fut, E>(f: F) -> FnAcquirer<F>
where
    F: Fn(TokenRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AcquiredToken, E>> + Send,
    E: error::Error + Send + Sync + 'static,
{
    FnAcquirer { f }
}

impl<F> fmt::Debug for FnAcquirer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAcquirer").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut, E> TokenAcquirer for FnAcquirer<F>
where
    F: Fn(TokenRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AcquiredToken, E>> + Send,
    E: error::Error + Send + Sync + 'static,
{
    type Error = E;

    async fn acquire_token(&self, request: &TokenRequest) -> Result<AcquiredToken, Self::Error> {
        (self.f)(request.clone()).await
    }
}
