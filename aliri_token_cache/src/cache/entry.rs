use std::sync::Arc;

use aliri_clock::UnixTime;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{Outcome, TokenCacheError};
use crate::{CacheKey, TokenWithLifetime};

pub(super) type OutcomeReceiver<E> = watch::Receiver<Option<Outcome<E>>>;

/// Cached state for a single key
///
/// Only ever mutated under its own lock, which is never held across an
/// acquisition.
pub(super) struct CacheEntry<E> {
    state: Mutex<EntryState<E>>,
}

struct EntryState<E> {
    current: Option<Arc<TokenWithLifetime>>,
    in_flight: Option<InFlight<E>>,
    last_error: Option<TokenCacheError<E>>,
    next_attempt: u64,
}

struct InFlight<E> {
    attempt: u64,
    outcome: OutcomeReceiver<E>,
}

/// What a caller must do after looking at an entry
pub(super) enum Decision<'a, E> {
    /// The cached token is fresh
    Serve(Arc<TokenWithLifetime>),
    /// Another caller is acquiring; wait for its outcome
    Join(OutcomeReceiver<E>),
    /// This caller is now responsible for acquiring
    Refresh(Attempt<'a, E>),
}

impl<E> CacheEntry<E> {
    pub(super) fn new() -> Self {
        Self {
            state: Mutex::new(EntryState {
                current: None,
                in_flight: None,
                last_error: None,
                next_attempt: 0,
            }),
        }
    }

    /// Serves the fresh token, joins the in-flight attempt, or starts a new one
    pub(super) fn begin(&self, now: UnixTime, force_refresh: bool) -> Decision<'_, E> {
        let mut state = self.state.lock();

        if !force_refresh {
            if let Some(current) = state.current.as_ref().filter(|t| now < t.stale()) {
                return Decision::Serve(Arc::clone(current));
            }
        }

        if let Some(in_flight) = &state.in_flight {
            return Decision::Join(in_flight.outcome.clone());
        }

        let attempt = state.next_attempt;
        state.next_attempt = state.next_attempt.wrapping_add(1);

        let (publisher, outcome) = watch::channel(None);
        state.in_flight = Some(InFlight { attempt, outcome });

        Decision::Refresh(Attempt {
            entry: self,
            attempt,
            force_refresh,
            publisher: Some(publisher),
        })
    }

    /// The cached token, if it has not yet expired
    pub(super) fn usable_token(&self, now: UnixTime) -> Option<Arc<TokenWithLifetime>> {
        self.state
            .lock()
            .current
            .as_ref()
            .filter(|t| t.is_valid_at(now))
            .cloned()
    }

    pub(super) fn last_error(&self) -> Option<TokenCacheError<E>> {
        self.state.lock().last_error.clone()
    }

    /// Drops the cached token, returning whether there was one
    pub(super) fn invalidate(&self) -> bool {
        self.state.lock().current.take().is_some()
    }
}

/// An acquisition this caller is responsible for
///
/// Whether a failure falls back to the cached token is decided here, once,
/// from the request that started the attempt. Every caller that joined the
/// attempt receives that same outcome.
///
/// Dropping an unfinished attempt, as happens when the refreshing task is
/// cancelled, releases the entry so that a waiting caller can start over.
pub(super) struct Attempt<'a, E> {
    entry: &'a CacheEntry<E>,
    attempt: u64,
    force_refresh: bool,
    publisher: Option<watch::Sender<Option<Outcome<E>>>>,
}

impl<E> Attempt<'_, E> {
    /// Records the outcome and wakes every caller that joined this attempt
    ///
    /// A failed renewal that was not forced resolves to the cached token
    /// while that token has not expired.
    pub(super) fn finish(
        mut self,
        key: &CacheKey,
        now: UnixTime,
        outcome: Outcome<E>,
    ) -> Outcome<E> {
        let outcome = {
            let mut state = self.entry.state.lock();
            state.release(self.attempt);
            match outcome {
                Ok(token) => {
                    state.current = Some(Arc::clone(&token));
                    state.last_error = None;
                    Ok(token)
                }
                Err(error) => {
                    state.last_error = Some(error.clone());
                    match state.current.as_ref().filter(|t| t.is_valid_at(now)) {
                        Some(token) if !self.force_refresh => {
                            tracing::debug!(
                                %key,
                                attempt = self.attempt,
                                expiry = token.expiry().0,
                                until_expired = token.until_expired_at(now).0,
                                "renewal failed, serving unexpired cached token"
                            );
                            Ok(Arc::clone(token))
                        }
                        _ => Err(error),
                    }
                }
            }
        };

        if let Some(publisher) = self.publisher.take() {
            publisher.send_replace(Some(outcome.clone()));
        }

        outcome
    }
}

impl<E> Drop for Attempt<'_, E> {
    fn drop(&mut self) {
        if self.publisher.is_some() {
            tracing::debug!(attempt = self.attempt, "token acquisition abandoned");
            self.entry.state.lock().release(self.attempt);
        }
    }
}

impl<E> EntryState<E> {
    fn release(&mut self, attempt: u64) {
        if self.in_flight.as_ref().map(|f| f.attempt) == Some(attempt) {
            self.in_flight = None;
        }
    }
}
