//! Clock construction settings.

use crate::error::{ClockError, ClockResult};
use crate::host::Value;

/// Default number of undelivered events a clock buffers for the host
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Names of the host-side handlers the bridge calls
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerNames {
    /// Called with `(tempo, beats, secs)`
    pub tempo_changed: String,
    /// Called with `(playing)`
    pub start_stop: String,
    /// Called with `(peers)`
    pub num_peers: String,
}

impl Default for HandlerNames {
    fn default() -> Self {
        Self {
            tempo_changed: "prTempoChanged".into(),
            start_stop: "prStartStopSync".into(),
            num_peers: "prNumPeersChanged".into(),
        }
    }
}

/// Settings read when a [`LinkClock`](crate::LinkClock) is created.
///
/// The quantum comes from a host slot and is only checked at construction
/// time, which fails with [`ClockError::Config`] if it is not a number.
///
/// ```
/// use tempolink::{ClockConfig, Value};
///
/// let config = ClockConfig::new(Value::Float(4.0))
///     .with_latency(0.05)
///     .with_event_capacity(128);
/// assert_eq!(config.quantum().unwrap(), 4.0);
/// ```
#[derive(Clone, Debug)]
pub struct ClockConfig {
    quantum: Value,
    latency: f64,
    event_capacity: usize,
    handlers: HandlerNames,
}

impl ClockConfig {
    /// Settings with the given quantum slot and defaults for the rest
    pub fn new(quantum: Value) -> Self {
        Self {
            quantum,
            latency: 0.0,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            handlers: HandlerNames::default(),
        }
    }

    /// Initial latency compensation in seconds
    pub fn with_latency(mut self, latency: f64) -> Self {
        self.latency = latency;
        self
    }

    /// How many events may wait for the host before new ones are dropped
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerNames) -> Self {
        self.handlers = handlers;
        self
    }

    /// The quantum slot as a number
    pub fn quantum(&self) -> ClockResult<f64> {
        self.quantum.as_f64().ok_or_else(|| ClockError::Config {
            field: "quantum",
            found: self.quantum,
        })
    }

    #[inline]
    pub fn latency(&self) -> f64 {
        self.latency
    }

    #[inline]
    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    #[inline]
    pub fn handlers(&self) -> &HandlerNames {
        &self.handlers
    }
}
