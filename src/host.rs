//! The host side: slot values, the interpreter, and the clock object.
//!
//! The host runs a single-threaded interpreter guarded by one global lock
//! ([`HostLock`]). It calls into a clock through a [`ClockHandle`], passing
//! raw slot [`Value`]s, and the clock calls back out through
//! [`Interpreter::call`] when its [`Bridge`] is pumped.

use core::fmt;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::bridge::Bridge;
use crate::clock::TempoClock;
use crate::config::ClockConfig;
use crate::engine::SyncEngine;
use crate::error::{ClockError, ClockResult};
use crate::link_clock::{ClockId, LinkClock};
use crate::time::TimeDomain;

/// A host slot value
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Clock(ClockId),
}

impl Value {
    /// The slot as a number. Integers widen to floats; anything else is not
    /// a number.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Int(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Clock(id) => write!(f, "{}", id),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// The host's single-threaded interpreter, as seen by a clock
pub trait Interpreter {
    /// Whatever a handler can throw. Never caught here.
    type Error;

    /// Whether code may currently make blocking OS calls
    fn can_call_os(&self) -> bool;

    fn set_can_call_os(&mut self, allowed: bool);

    /// Run the handler `selector` on `receiver` with `args`
    fn call(&mut self, receiver: Value, selector: &str, args: &[Value]) -> Result<(), Self::Error>;
}

/// The host's single global execution lock.
///
/// Everything that runs interpreter code, including event delivery through
/// [`Bridge::pump`], holds this lock.
pub struct HostLock<I> {
    interp: Mutex<I>,
}

impl<I> HostLock<I> {
    pub fn new(interp: I) -> Self {
        Self {
            interp: Mutex::new(interp),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, I> {
        self.interp.lock()
    }

    /// Run `f` with the lock held
    pub fn with<R>(&self, f: impl FnOnce(&mut I) -> R) -> R {
        f(&mut self.interp.lock())
    }

    pub fn into_inner(self) -> I {
        self.interp.into_inner()
    }
}

fn number(name: &'static str, value: Value) -> ClockResult<f64> {
    match value.as_f64() {
        Some(x) if x.is_finite() => Ok(x),
        _ => Err(ClockError::InvalidOperand { name, found: value }),
    }
}

fn tempo(value: Value) -> ClockResult<f64> {
    match number("tempo", value)? {
        t if t > 0.0 => Ok(t),
        _ => Err(ClockError::InvalidOperand {
            name: "tempo",
            found: value,
        }),
    }
}

/// The host object a synchronized clock lives in.
///
/// A handle is either running (it owns a [`LinkClock`]) or not. Every
/// operation on a handle that is not running fails with
/// [`ClockError::Unavailable`]. Operands are validated before the clock is
/// touched, so a failed call never changes anything.
///
/// ```
/// use tempolink::engine::LoopbackEngine;
/// use tempolink::{ClockConfig, ClockError, ClockHandle, TimeDomain, Value};
///
/// let engine = LoopbackEngine::new(120.0);
/// let domain = TimeDomain::capture(&engine);
/// let config = ClockConfig::new(Value::Float(4.0));
/// let (mut handle, _bridge) =
///     ClockHandle::start(engine, domain, &config, Value::Float(2.0), Value::Int(0), Value::Int(0))
///         .unwrap();
///
/// assert_eq!(handle.num_peers(), Ok(0));
/// assert!(matches!(handle.set_latency(Value::Nil), Err(ClockError::InvalidOperand { .. })));
///
/// handle.stop().unwrap();
/// assert_eq!(handle.num_peers(), Err(ClockError::Unavailable));
/// ```
pub struct ClockHandle<E: SyncEngine> {
    clock: Option<LinkClock<E>>,
}

impl<E: SyncEngine> ClockHandle<E> {
    /// A handle with no clock behind it
    pub fn stopped() -> Self {
        Self { clock: None }
    }

    /// Start a clock on `engine` with the host's tempo, beats and seconds
    pub fn start(
        engine: E,
        domain: TimeDomain,
        config: &ClockConfig,
        tempo_value: Value,
        beats: Value,
        secs: Value,
    ) -> ClockResult<(Self, Bridge)> {
        let tempo = tempo(tempo_value)?;
        let beats = number("beats", beats)?;
        let secs = number("secs", secs)?;
        let (clock, bridge) = LinkClock::new(engine, domain, config, tempo, beats, secs)?;
        Ok((Self { clock: Some(clock) }, bridge))
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.clock.is_some()
    }

    pub fn clock(&self) -> ClockResult<&LinkClock<E>> {
        self.clock.as_ref().ok_or(ClockError::Unavailable)
    }

    /// Tear the clock down. Waits for a callback that is mid-delivery.
    pub fn stop(&mut self) -> ClockResult<()> {
        let clock = self.clock.take().ok_or(ClockError::Unavailable)?;
        debug!(clock = %clock.id(), "stopping clock");
        drop(clock);
        Ok(())
    }

    pub fn tempo(&self) -> ClockResult<f64> {
        Ok(self.clock()?.tempo())
    }

    pub fn beats_to_secs(&self, beats: Value) -> ClockResult<f64> {
        let clock = self.clock()?;
        Ok(clock.beats_to_secs(number("beats", beats)?))
    }

    pub fn secs_to_beats(&self, secs: Value) -> ClockResult<f64> {
        let clock = self.clock()?;
        Ok(clock.secs_to_beats(number("secs", secs)?))
    }

    pub fn set_tempo_at_beat(&self, tempo_value: Value, beats: Value) -> ClockResult<()> {
        let clock = self.clock()?;
        let tempo = tempo(tempo_value)?;
        let beats = number("beats", beats)?;
        clock.set_tempo_at_beat(tempo, beats);
        Ok(())
    }

    pub fn set_tempo_at_time(&self, tempo_value: Value, secs: Value) -> ClockResult<()> {
        let clock = self.clock()?;
        let tempo = tempo(tempo_value)?;
        let secs = number("secs", secs)?;
        clock.set_tempo_at_time(tempo, secs);
        Ok(())
    }

    pub fn set_all(&self, tempo_value: Value, beats: Value, secs: Value) -> ClockResult<()> {
        let clock = self.clock()?;
        let tempo = tempo(tempo_value)?;
        let beats = number("beats", beats)?;
        let secs = number("secs", secs)?;
        clock.set_all(tempo, beats, secs);
        Ok(())
    }

    pub fn set_beats(&self, beats: Value, now: Value) -> ClockResult<()> {
        let clock = self.clock()?;
        let beats = number("beats", beats)?;
        let now = number("secs", now)?;
        clock.set_beats(beats, now);
        Ok(())
    }

    /// Any number is accepted; the range is the caller's business
    pub fn set_quantum(&self, quantum: Value) -> ClockResult<()> {
        let clock = self.clock()?;
        let quantum = quantum.as_f64().ok_or(ClockError::InvalidOperand {
            name: "quantum",
            found: quantum,
        })?;
        clock.set_quantum(quantum);
        Ok(())
    }

    pub fn latency(&self) -> ClockResult<f64> {
        Ok(self.clock()?.latency())
    }

    pub fn set_latency(&self, latency: Value) -> ClockResult<()> {
        let clock = self.clock()?;
        clock.set_latency(number("latency", latency)?);
        Ok(())
    }

    pub fn num_peers(&self) -> ClockResult<usize> {
        Ok(self.clock()?.num_peers())
    }
}

impl<E: SyncEngine> Default for ClockHandle<E> {
    fn default() -> Self {
        Self::stopped()
    }
}
