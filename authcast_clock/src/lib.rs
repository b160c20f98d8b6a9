//! Utilities for messing with time
//!
//! Time is tracked in milliseconds since the Unix epoch. Types included allow
//! swapping out the system clock for a manually driven one, or for one that
//! follows tokio's timer clock so that paused-time tests see a single,
//! coherent notion of "now".

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_must_use
)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

use std::{
    convert::TryFrom,
    ops,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unix time in milliseconds
///
/// The number of milliseconds elapsed since the beginning of the Unix epoch
/// on 1970/01/01 at 00:00:00 UTC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct UnixMillis(pub u64);

/// A span of time in milliseconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct DurationMillis(pub u64);

impl From<SystemTime> for UnixMillis {
    #[inline]
    fn from(t: SystemTime) -> Self {
        let since_epoch = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);

        UnixMillis(saturating_millis(since_epoch))
    }
}

impl From<Duration> for DurationMillis {
    #[inline]
    fn from(d: Duration) -> Self {
        DurationMillis(saturating_millis(d))
    }
}

impl From<DurationMillis> for Duration {
    #[inline]
    fn from(d: DurationMillis) -> Self {
        Duration::from_millis(d.0)
    }
}

fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl ops::Add<DurationMillis> for UnixMillis {
    type Output = UnixMillis;

    #[inline]
    fn add(self, rhs: DurationMillis) -> Self::Output {
        UnixMillis(self.0.saturating_add(rhs.0))
    }
}

/// Saturates at zero when `rhs` is later than `self`
impl ops::Sub for UnixMillis {
    type Output = DurationMillis;

    #[inline]
    fn sub(self, rhs: UnixMillis) -> Self::Output {
        DurationMillis(self.0.saturating_sub(rhs.0))
    }
}

#[cfg(any(feature = "serde", doc))]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl Serialize for UnixMillis {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(any(feature = "serde", doc))]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl<'de> Deserialize<'de> for UnixMillis {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Self(ms))
    }
}

#[cfg(any(feature = "serde", doc))]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl Serialize for DurationMillis {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(any(feature = "serde", doc))]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl<'de> Deserialize<'de> for DurationMillis {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Self(ms))
    }
}

/// Represents a clock, which can tell the current time
pub trait Clock {
    /// Gets the current time according to this clock
    fn now(&self) -> UnixMillis;
}

impl<C: Clock + ?Sized> Clock for &C {
    #[inline]
    fn now(&self) -> UnixMillis {
        (**self).now()
    }
}

/// The system clock as provided by `std::time::SystemTime`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now(&self) -> UnixMillis {
        UnixMillis::from(SystemTime::now())
    }
}

/// A manually driven test clock
///
/// Clones share the same underlying time, so a clone handed to the code under
/// test observes every `set` or `inc` made through the original.
#[derive(Clone, Debug, Default)]
pub struct TestClock(Arc<AtomicU64>);

impl Clock for TestClock {
    #[inline]
    fn now(&self) -> UnixMillis {
        UnixMillis(self.0.load(Ordering::SeqCst))
    }
}

impl TestClock {
    /// Creates a new test clock with the specified time
    pub fn new(time: UnixMillis) -> Self {
        Self(Arc::new(AtomicU64::new(time.0)))
    }

    /// Updates the clock's current time to `val`
    pub fn set(&self, val: UnixMillis) {
        self.0.store(val.0, Ordering::SeqCst);
    }

    /// Moves the clock's current time forward by `inc`
    pub fn inc(&self, inc: DurationMillis) {
        self.0.fetch_add(inc.0, Ordering::SeqCst);
    }
}

#[cfg(feature = "tokio")]
mod tokio_clock {
    use super::{Clock, DurationMillis, System, UnixMillis};
    use tokio::time::Instant;

    /// A clock that advances with tokio's timer clock
    ///
    /// The Unix time is pinned to an [`Instant`] when the clock is created.
    /// Afterwards, the reported time moves exactly as tokio's clock does, so
    /// `tokio::time::pause`, `advance` and auto-advance in paused tests move
    /// this clock and every pending `sleep` together.
    #[derive(Clone, Copy, Debug)]
    pub struct TokioClock {
        origin: UnixMillis,
        anchor: Instant,
    }

    impl TokioClock {
        /// Pins the current system time to the current tokio instant
        pub fn new() -> Self {
            Self::starting_at(System.now())
        }

        /// Pins `origin` to the current tokio instant
        pub fn starting_at(origin: UnixMillis) -> Self {
            Self {
                origin,
                anchor: Instant::now(),
            }
        }
    }

    impl Default for TokioClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for TokioClock {
        #[inline]
        fn now(&self) -> UnixMillis {
            self.origin + DurationMillis::from(self.anchor.elapsed())
        }
    }
}

#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
pub use tokio_clock::TokioClock;
