//! A concurrency-safe, single-flight token cache
//!
//! [`TokenCache`] sits between request-issuing code and a [`TokenAcquirer`].
//! For each [`CacheKey`] it serves the cached token while that token is fresh,
//! and otherwise ensures that exactly one caller performs the acquisition
//! while every other caller asking for the same key waits for, and shares,
//! its outcome. Callers asking for different keys never wait on each other.
//!
//! There is no background task. Renewal happens inline, in the first call to
//! [`get_token`][TokenCache::get_token] made after a token becomes stale.

use std::{collections::HashMap, fmt, sync::Arc};

use aliri_clock::{Clock, DurationSecs, System, UnixTime};
use parking_lot::Mutex;
use thiserror::Error;

use crate::jitter::{JitterSource, NullJitter};
use crate::sources::TokenAcquirer;
use crate::{CacheKey, TokenLifetimeConfig, TokenRequest, TokenWithLifetime};

mod entry;

use entry::{CacheEntry, Decision};

type Outcome<E> = Result<Arc<TokenWithLifetime>, TokenCacheError<E>>;

/// An error obtaining a token from the cache
#[derive(Debug, Error)]
pub enum TokenCacheError<E> {
    /// The request did not name any scopes
    #[error("no scopes were requested")]
    NoScopes,
    /// The acquirer failed to provide a token
    #[error("unable to acquire token")]
    Acquisition(#[source] Arc<E>),
    /// The acquirer provided a token that had already expired
    #[error("acquired token expired at {expiry} before it could be used")]
    ExpiredOnArrival {
        /// When the acquired token expired
        expiry: UnixTime,
    },
}

impl<E> TokenCacheError<E> {
    /// The underlying acquirer error, if the acquirer failed
    pub fn acquisition_error(&self) -> Option<&E> {
        match self {
            Self::Acquisition(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}

impl<E> Clone for TokenCacheError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::NoScopes => Self::NoScopes,
            Self::Acquisition(error) => Self::Acquisition(Arc::clone(error)),
            Self::ExpiredOnArrival { expiry } => Self::ExpiredOnArrival { expiry: *expiry },
        }
    }
}

/// A token cache keyed by scope set
///
/// Construct one per credential and share it, by reference or behind an
/// [`Arc`], with everything that needs tokens for that credential.
///
/// ```
/// use aliri_clock::{Clock, DurationSecs, System};
/// use aliri_token_cache::{sources, AcquiredToken, AccessToken, TokenCache, TokenRequest};
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() {
/// let acquirer = sources::from_fn(|_: TokenRequest| async {
///     let expiry = System.now() + DurationSecs(3600);
///     Ok::<_, std::io::Error>(AcquiredToken::new(AccessToken::from_static("t0k3n"), expiry))
/// });
///
/// // Renew tokens once they have five minutes or less remaining
/// let cache = TokenCache::new(acquirer, DurationSecs(300));
///
/// let request = TokenRequest::new(["https://storage.example/.default"]);
/// let token = cache.get_token(&request).await.unwrap();
/// assert_eq!(token.access_token().as_str(), "t0k3n");
/// # }
/// ```
pub struct TokenCache<A: TokenAcquirer, C = System, J = NullJitter> {
    acquirer: A,
    lifetime: TokenLifetimeConfig<C, J>,
    entries: Mutex<HashMap<CacheKey, Arc<CacheEntry<A::Error>>>>,
}

impl<A: TokenAcquirer> TokenCache<A> {
    /// Constructs a new token cache
    ///
    /// Tokens for which `acquirer` does not provide an explicit refresh time
    /// become stale, and are renewed on next use, once they have
    /// `refresh_margin` or less remaining before they expire. A zero margin
    /// renews tokens only once they have expired.
    pub fn new(acquirer: A, refresh_margin: DurationSecs) -> Self {
        Self {
            acquirer,
            lifetime: TokenLifetimeConfig::new(refresh_margin),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<A: TokenAcquirer, C, J> TokenCache<A, C, J> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenCache<A, D, J> {
        TokenCache {
            acquirer: self.acquirer,
            lifetime: self.lifetime.with_clock(clock),
            entries: self.entries,
        }
    }

    /// Sets the jitter applied to refresh times derived from the refresh margin
    pub fn with_jitter<K>(self, jitter: K) -> TokenCache<A, C, K> {
        TokenCache {
            acquirer: self.acquirer,
            lifetime: self.lifetime.with_jitter(jitter),
            entries: self.entries,
        }
    }

    /// The underlying acquirer
    pub fn acquirer(&self) -> &A {
        &self.acquirer
    }

    /// The number of keys that have been requested from this cache
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no token has ever been requested from this cache
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops the token cached for the request's key
    ///
    /// The next call for that key will acquire a new token. An acquisition
    /// already in flight is unaffected and still caches its result.
    pub fn invalidate(&self, request: &TokenRequest) -> bool {
        self.existing_entry(request.cache_key())
            .map(|entry| entry.invalidate())
            .unwrap_or(false)
    }

    /// Drops every cached token
    ///
    /// Keys stay known to the cache so that acquisitions in flight remain
    /// single-flighted.
    pub fn clear(&self) {
        let entries: Vec<_> = self.entries.lock().values().cloned().collect();
        for entry in entries {
            entry.invalidate();
        }
    }

    /// The error from the most recent failed acquisition for the request's key
    ///
    /// Cleared by the next successful acquisition.
    pub fn last_error(&self, request: &TokenRequest) -> Option<TokenCacheError<A::Error>> {
        self.existing_entry(request.cache_key())
            .and_then(|entry| entry.last_error())
    }

    fn existing_entry(&self, key: &CacheKey) -> Option<Arc<CacheEntry<A::Error>>> {
        self.entries.lock().get(key).cloned()
    }

    fn entry(&self, key: &CacheKey) -> Arc<CacheEntry<A::Error>> {
        let mut entries = self.entries.lock();
        Arc::clone(entries.entry(key.clone()).or_insert_with(|| {
            tracing::trace!(%key, "tracking new cache key");
            Arc::new(CacheEntry::new())
        }))
    }
}

impl<A, C, J> TokenCache<A, C, J>
where
    A: TokenAcquirer,
    C: Clock,
    J: JitterSource,
{
    /// Gets a token for the request
    ///
    /// Returns the cached token while it is fresh. Otherwise joins the
    /// acquisition already in flight for the same key, or starts one.
    ///
    /// When an acquisition fails, the error is returned if the request that
    /// started it forced a refresh or there is no unexpired token cached for
    /// its key. Otherwise the cached token is returned and the next call tries
    /// again. Every caller sharing an acquisition receives the same result.
    pub async fn get_token(
        &self,
        request: &TokenRequest,
    ) -> Result<Arc<TokenWithLifetime>, TokenCacheError<A::Error>> {
        if request.scopes().is_empty() {
            return Err(TokenCacheError::NoScopes);
        }

        let key = request.cache_key();
        let entry = self.entry(key);
        let force_refresh = request.is_force_refresh();

        loop {
            let now = self.lifetime.clock().now();

            match entry.begin(now, force_refresh) {
                Decision::Serve(token) => {
                    tracing::trace!(
                        %key,
                        stale = token.stale().0,
                        until_stale = token.until_stale_at(now).0,
                        "serving cached token"
                    );
                    return Ok(token);
                }
                Decision::Join(mut outcome) => {
                    tracing::debug!(
                        %key,
                        force_refresh,
                        "waiting on in-flight token acquisition"
                    );

                    let published = match outcome.wait_for(Option::is_some).await {
                        Ok(published) => published.clone(),
                        Err(_) => None,
                    };

                    match published {
                        Some(outcome) => return outcome,
                        None => {
                            tracing::debug!(
                                %key,
                                "in-flight token acquisition was abandoned, re-evaluating"
                            );
                        }
                    }
                }
                Decision::Refresh(attempt) => {
                    let outcome = self.acquire(request).await;
                    return attempt.finish(key, self.lifetime.clock().now(), outcome);
                }
            }
        }
    }

    /// Peeks at the token cached for the request's key without acquiring
    ///
    /// Returns `None` if no token is cached or the cached token has expired.
    pub fn cached_token(&self, request: &TokenRequest) -> Option<Arc<TokenWithLifetime>> {
        let now = self.lifetime.clock().now();
        self.existing_entry(request.cache_key())
            .and_then(|entry| entry.usable_token(now))
    }

    async fn acquire(&self, request: &TokenRequest) -> Outcome<A::Error> {
        tracing::debug!(
            key = %request.cache_key(),
            force_refresh = request.is_force_refresh(),
            "acquiring new token"
        );

        let acquired = self
            .acquirer
            .acquire_token(request)
            .await
            .map_err(|error| TokenCacheError::Acquisition(Arc::new(error)))?;

        let now = self.lifetime.clock().now();
        if acquired.expiry() <= now {
            return Err(TokenCacheError::ExpiredOnArrival {
                expiry: acquired.expiry(),
            });
        }

        let token = self.lifetime.create_token_at(acquired, now);
        tracing::debug!(
            key = %request.cache_key(),
            stale = token.stale().0,
            expiry = token.expiry().0,
            "acquired new token"
        );

        Ok(Arc::new(token))
    }
}

impl<A, C, J> fmt::Debug for TokenCache<A, C, J>
where
    A: TokenAcquirer + fmt::Debug,
    C: fmt::Debug,
    J: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("acquirer", &self.acquirer)
            .field("lifetime", &self.lifetime)
            .field("keys", &self.entries.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}
