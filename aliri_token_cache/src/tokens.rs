use aliri_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::jitter::{JitterSource, NullJitter};
use crate::{AccessToken, AccessTokenRef};

/// A token as returned by a [`TokenAcquirer`][crate::sources::TokenAcquirer]
///
/// The acquirer reports when the token expires and, optionally, when it would
/// prefer the token to be renewed. When no renewal time is given, the cache
/// derives one from its refresh margin.
#[derive(Clone, Debug)]
pub struct AcquiredToken {
    access_token: AccessToken,
    expiry: UnixTime,
    refresh_at: Option<UnixTime>,
}

impl AcquiredToken {
    /// Constructs a new acquired token that expires at `expiry`
    pub fn new(access_token: impl Into<AccessToken>, expiry: UnixTime) -> Self {
        Self {
            access_token: access_token.into(),
            expiry,
            refresh_at: None,
        }
    }

    /// Sets an explicit instant after which the token should be renewed
    pub fn with_refresh_at(mut self, refresh_at: UnixTime) -> Self {
        self.refresh_at = Some(refresh_at);
        self
    }

    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Gets the explicit renewal time, if the acquirer provided one
    #[inline]
    pub fn refresh_at(&self) -> Option<UnixTime> {
        self.refresh_at
    }
}

/// A cached token with its validity window
///
/// Immutable once created. `issued <= stale <= expiry` always holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenWithLifetime {
    access_token: AccessToken,
    issued: UnixTime,
    stale: UnixTime,
    expiry: UnixTime,
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is fresh and valid
    Fresh,
    /// The token is valid, but should be refreshed
    Stale,
    /// The token is no longer valid
    Expired,
}

impl TokenWithLifetime {
    /// Gets the current access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the token's total lifetime, from when it was cached until it expires
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.expiry - self.issued
    }

    /// Gets the time that the token was cached
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time that the token will become stale
    #[inline]
    pub fn stale(&self) -> UnixTime {
        self.stale
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Gets the interval during which the token should be considered fresh
    #[inline]
    pub fn fresh_interval(&self) -> std::ops::Range<UnixTime> {
        self.issued..self.stale
    }

    /// Gets the interval during which the token is valid
    #[inline]
    pub fn valid_interval(&self) -> std::ops::Range<UnixTime> {
        self.issued..self.expiry
    }

    /// Gets the token's lifetime status based on the current time
    /// as reported by the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.token_status_at(clock.now())
    }

    /// Gets the token's lifetime status as of the provided time
    #[inline]
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.stale {
            TokenStatus::Fresh
        } else if time < self.expiry {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }

    /// Whether the token may still be handed out at `time`
    #[inline]
    pub fn is_valid_at(&self, time: UnixTime) -> bool {
        time < self.expiry
    }

    /// Gets a duration for how much longer the token would be fresh as of the
    /// provided time
    #[inline]
    pub fn until_stale_at(&self, time: UnixTime) -> DurationSecs {
        self.stale - time
    }

    /// Gets a duration for how much longer the token would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry - time
    }
}

/// Policy for deciding when a newly acquired token should become stale
///
/// Holds the refresh margin, the clock used to stamp tokens, and the jitter
/// applied to derived refresh times.
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System, J = NullJitter> {
    refresh_margin: DurationSecs,
    clock: C,
    jitter: J,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// No refresh margin: tokens without an explicit refresh time are renewed
    /// only once they expire.
    fn default() -> Self {
        Self::new(DurationSecs::ZERO)
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration
    ///
    /// A token with no explicit refresh time will be considered stale when it
    /// has `refresh_margin` or less remaining before it expires.
    pub fn new(refresh_margin: DurationSecs) -> Self {
        Self {
            refresh_margin,
            clock: System,
            jitter: NullJitter,
        }
    }
}

impl<C, J> TokenLifetimeConfig<C, J> {
    /// Sets a custom clock to be used
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D, J> {
        TokenLifetimeConfig {
            refresh_margin: self.refresh_margin,
            clock,
            jitter: self.jitter,
        }
    }

    /// Sets the jitter applied to derived refresh times
    pub fn with_jitter<K>(self, jitter: K) -> TokenLifetimeConfig<C, K> {
        TokenLifetimeConfig {
            refresh_margin: self.refresh_margin,
            clock: self.clock,
            jitter,
        }
    }

    /// The configured refresh margin
    #[inline]
    pub fn refresh_margin(&self) -> DurationSecs {
        self.refresh_margin
    }

    /// The clock used to stamp tokens
    #[inline]
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C: Clock, J: JitterSource> TokenLifetimeConfig<C, J> {
    /// Stamps an acquired token with its lifetime as of now
    pub fn create_token(&self, acquired: AcquiredToken) -> TokenWithLifetime {
        self.create_token_at(acquired, self.clock.now())
    }

    /// Stamps an acquired token with its lifetime as of `issued`
    pub fn create_token_at(&self, acquired: AcquiredToken, issued: UnixTime) -> TokenWithLifetime {
        let expiry = acquired.expiry.max(issued);

        let stale = match acquired.refresh_at {
            Some(refresh_at) => refresh_at,
            None => self.jitter.jitter(expiry - self.refresh_margin),
        };

        TokenWithLifetime {
            access_token: acquired.access_token,
            issued,
            stale: stale.clamp(issued, expiry),
            expiry,
        }
    }
}
