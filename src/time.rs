//! Local seconds <-> shared-clock microseconds.
//!
//! The host measures time as floating seconds elapsed since its own start.
//! The shared session measures time as integer microseconds on the engine
//! clock. A [`TimeDomain`] ties the two together through an anchor captured
//! once at initialization.
//!
//! Converting to the shared domain truncates toward zero at microsecond
//! resolution, so `to_local(to_shared(t))` may be off from `t` by less than
//! one microsecond. That error is accepted and never corrected.

use core::ops::{Add, Sub};

use crate::engine::SyncEngine;

/// A timestamp on the shared engine clock, in microseconds
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Micros(pub i64);

impl Micros {
    #[inline]
    pub fn count(self) -> i64 {
        self.0
    }

    /// Truncating conversion from floating seconds.
    ///
    /// Non-finite input saturates (NaN maps to zero) rather than failing.
    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        Micros((secs * 1e6) as i64)
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e6
    }
}

impl Add for Micros {
    type Output = Micros;

    #[inline]
    fn add(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Micros {
    type Output = Micros;

    #[inline]
    fn sub(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_sub(rhs.0))
    }
}

/// Mapping between host-local seconds and shared-clock time.
///
/// Create one at system initialization with [`TimeDomain::capture`] and hand
/// it to every clock that needs it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TimeDomain {
    anchor: Micros,
}

impl TimeDomain {
    /// A domain whose local zero sits at `anchor` on the shared clock
    pub fn new(anchor: Micros) -> Self {
        Self { anchor }
    }

    /// Anchor local zero at the engine's current time
    pub fn capture<E: SyncEngine + ?Sized>(engine: &E) -> Self {
        Self::new(engine.clock_micros())
    }

    #[inline]
    pub fn anchor(&self) -> Micros {
        self.anchor
    }

    /// Local seconds to a shared timestamp (truncated to the microsecond)
    #[inline]
    pub fn to_shared(&self, local_secs: f64) -> Micros {
        self.anchor + Micros::from_secs_f64(local_secs)
    }

    /// Shared timestamp to local seconds
    #[inline]
    pub fn to_local(&self, shared: Micros) -> f64 {
        (shared - self.anchor).as_secs_f64()
    }
}
