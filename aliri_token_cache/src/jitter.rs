//! Utilities for adding a bit of jitter to reduce stampeding
//!
//! Jitter only applies to refresh times the cache derives from its refresh
//! margin. A refresh time chosen by the acquirer is used as-is.

use aliri_clock::UnixTime;

/// A type that provides some jittering of time
pub trait JitterSource {
    /// Jitters a given input time
    fn jitter(&self, time: UnixTime) -> UnixTime;
}

/// A jitter source that does not do any jittering of time
#[derive(Clone, Copy, Debug, Default)]
pub struct NullJitter;

impl JitterSource for NullJitter {
    #[inline]
    fn jitter(&self, time: UnixTime) -> UnixTime {
        time
    }
}

#[cfg(feature = "rand")]
mod random {
    use aliri_clock::{DurationSecs, UnixTime};
    use parking_lot::Mutex;
    use rand::{Rng, SeedableRng};

    /// Jitters a value earlier by a random amount
    ///
    /// Times jittered by this type will have a value with a uniform distribution
    /// in the interval `(time - max_jitter, time]`.
    #[derive(Debug)]
    pub struct RandomEarlyJitter<R> {
        max_jitter: DurationSecs,
        rand_source: Mutex<R>,
    }

    impl RandomEarlyJitter<rand::rngs::StdRng> {
        /// Constructs a new instance that will jitter times early up to `max_jitter`.
        pub fn new(max_jitter: DurationSecs) -> Self {
            Self::with_rng(max_jitter, rand::rngs::StdRng::from_entropy())
        }
    }

    impl<R> RandomEarlyJitter<R> {
        /// Constructs a new instance drawing from the given random number generator
        pub fn with_rng(max_jitter: DurationSecs, rng: R) -> Self {
            Self {
                max_jitter,
                rand_source: Mutex::new(rng),
            }
        }
    }

    impl<R: Rng> super::JitterSource for RandomEarlyJitter<R> {
        fn jitter(&self, time: UnixTime) -> UnixTime {
            if self.max_jitter.0 == 0 {
                return time;
            }

            let jitter = self.rand_source.lock().gen_range(0..(self.max_jitter.0));
            time - DurationSecs(jitter)
        }
    }
}

#[cfg(feature = "rand")]
#[cfg_attr(docsrs, doc(cfg(feature = "rand")))]
pub use random::RandomEarlyJitter;
