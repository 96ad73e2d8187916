//! A single-flight, proactively renewing cache for access tokens
//!
//! Clients of authenticated services attach a short-lived bearer token to
//! every outgoing request. Obtaining one is a round trip to an identity
//! provider: too slow to repeat for every request, yet tokens expire and
//! must be renewed, and many tasks may need one at the same time.
//!
//! [`TokenCache`] handles exactly that. Given a [`TokenAcquirer`][sources::TokenAcquirer]
//! that knows how to obtain a token, it
//!
//! * serves the cached token for a [`TokenRequest`]'s scope set while that
//!   token is fresh, without blocking;
//! * runs at most one acquisition at a time per [`CacheKey`], with every
//!   concurrent caller for that key sharing the result;
//! * never makes callers for one key wait on an acquisition for another;
//! * never hands out a token that has expired.
//!
//! A token becomes _stale_ at its refresh time, either given explicitly by the
//! acquirer or derived from the cache's refresh margin. The first call after
//! that point renews the token before returning. If renewal fails, callers
//! that did not force a refresh keep receiving the cached token until it
//! expires, and every call retries the renewal.
//!
//! ```
//! use aliri_clock::{Clock, DurationSecs, System};
//! use aliri_token_cache::{sources, AcquiredToken, AccessToken, TokenCache, TokenRequest};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let acquirer = sources::from_fn(|request: TokenRequest| async move {
//!     // Perform the real exchange with the identity provider here
//!     let expires_in = DurationSecs(3600);
//!     let refresh_in = DurationSecs(2700);
//!     let now = System.now();
//!     let token = AccessToken::new(format!("token for {}", request.cache_key()));
//!     let acquired = AcquiredToken::new(token, now + expires_in).with_refresh_at(now + refresh_in);
//!     Ok::<_, std::io::Error>(acquired)
//! });
//!
//! let cache = TokenCache::new(acquirer, DurationSecs(60));
//!
//! let request = TokenRequest::new(["api://orders/.default"]);
//! let token = cache.get_token(&request).await?;
//!
//! // After the service rejects the token, bypass the cache
//! let token = cache.get_token(&request.clone().force_refresh()).await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `rand` (default): Provides [`RandomEarlyJitter`][jitter::RandomEarlyJitter], which
//!   spreads derived refresh times so that many processes sharing one identity provider
//!   do not all renew at the same instant.

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

mod braids;
mod cache;
pub mod jitter;
mod key;
pub mod sources;
mod tokens;

pub use braids::*;
pub use cache::{TokenCache, TokenCacheError};
pub use key::{CacheKey, TokenRequest};
pub use tokens::{AcquiredToken, TokenLifetimeConfig, TokenStatus, TokenWithLifetime};
