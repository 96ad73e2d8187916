//! Token acquirers
//!
//! An acquirer performs the actual round trip to an identity provider. The
//! cache treats it as opaque and potentially slow, and calls it only when no
//! usable token is cached for the request's key.

use std::{error, sync::Arc};

use async_trait::async_trait;

use crate::{AcquiredToken, TokenRequest};

mod function;

pub use function::{from_fn, FnAcquirer};

/// An asynchronous source of new tokens
///
/// Implementations must be safe to call concurrently for different requests;
/// the cache only serializes calls that share a [`CacheKey`][crate::CacheKey].
/// Retrying and honoring cancellation are the acquirer's responsibility. Any
/// error it returns, a timeout included, is handed to every caller waiting on
/// that acquisition.
#[async_trait]
pub trait TokenAcquirer: Send + Sync {
    /// The error type returned in the event that acquiring a token fails
    type Error: error::Error + Send + Sync + 'static;

    /// Acquires a new token satisfying `request`
    async fn acquire_token(&self, request: &TokenRequest) -> Result<AcquiredToken, Self::Error>;
}

#[async_trait]
impl<T: TokenAcquirer + ?Sized> TokenAcquirer for Arc<T> {
    type Error = T::Error;

    async fn acquire_token(&self, request: &TokenRequest) -> Result<AcquiredToken, Self::Error> {
        (**self).acquire_token(request).await
    }
}

#[async_trait]
impl<'a, T: TokenAcquirer + ?Sized> TokenAcquirer for &'a T {
    type Error = T::Error;

    async fn acquire_token(&self, request: &TokenRequest) -> Result<AcquiredToken, Self::Error> {
        (**self).acquire_token(request).await
    }
}
