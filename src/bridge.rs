//! Delivery of engine-thread events into the host's single thread.
//!
//! Engine callbacks never call into the host. They compute their payload,
//! push a [`ClockEvent`] onto a bounded lock-free queue and return. The host
//! thread drains the queue through [`Bridge`] while holding its global lock,
//! so a delivery can never interleave with another delivery or with host code
//! touching the same clock, and the engine's locks are never held while the
//! host lock is taken.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rtrb::{Consumer, Producer, PushError, RingBuffer};
use tracing::{trace, warn};

use crate::config::{ClockConfig, HandlerNames};
use crate::host::{HostLock, Interpreter, Value};
use crate::link_clock::ClockId;

/// A change reported by the synchronization engine
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ClockEvent {
    /// The session tempo changed. `tempo` is in beats per second, `beats` is
    /// the beat at elapsed time `secs` under the new tempo.
    TempoChanged { tempo: f64, beats: f64, secs: f64 },
    /// The transport started or stopped
    StartStop { playing: bool },
    /// The number of peers changed
    PeersChanged { peers: usize },
}

impl ClockEvent {
    fn handler<'a>(&self, names: &'a HandlerNames) -> &'a str {
        match self {
            ClockEvent::TempoChanged { .. } => &names.tempo_changed,
            ClockEvent::StartStop { .. } => &names.start_stop,
            ClockEvent::PeersChanged { .. } => &names.num_peers,
        }
    }

    fn args(&self) -> ([Value; 3], usize) {
        match *self {
            ClockEvent::TempoChanged { tempo, beats, secs } => {
                ([Value::Float(tempo), Value::Float(beats), Value::Float(secs)], 3)
            }
            ClockEvent::StartStop { playing } => ([Value::Bool(playing), Value::Nil, Value::Nil], 1),
            ClockEvent::PeersChanged { peers } => {
                ([Value::Int(peers as i64), Value::Nil, Value::Nil], 1)
            }
        }
    }
}

/// Lets callbacks run until closed; closing waits for the running ones
pub(crate) struct CallbackGate {
    open: RwLock<bool>,
}

impl CallbackGate {
    pub(crate) fn new() -> Self {
        Self {
            open: RwLock::new(true),
        }
    }

    /// Run `f` unless the gate is closed
    pub(crate) fn enter<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let open = self.open.read();
        if !*open {
            return None;
        }
        Some(f())
    }

    /// Close the gate, blocking until no callback is inside
    pub(crate) fn close(&self) {
        *self.open.write() = false;
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        *self.open.read()
    }
}

/// Engine-side end of the event queue
pub(crate) struct EventSender {
    // callbacks may come from more than one engine thread
    producer: Mutex<Producer<ClockEvent>>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Queue an event without blocking. A full queue drops it.
    pub(crate) fn push(&self, event: ClockEvent) {
        if let Err(PushError::Full(event)) = self.producer.lock().push(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(?event, "host event queue full, event dropped");
        }
    }
}

pub(crate) fn channel(clock: ClockId, config: &ClockConfig) -> (EventSender, Bridge) {
    let (producer, consumer) = RingBuffer::new(config.event_capacity());
    let dropped = Arc::new(AtomicU64::new(0));
    let sender = EventSender {
        producer: Mutex::new(producer),
        dropped: dropped.clone(),
    };
    let bridge = Bridge {
        clock,
        queue: consumer,
        handlers: config.handlers().clone(),
        dropped,
    };
    (sender, bridge)
}

/// Host-side end of a clock's event queue.
///
/// Owned by the host thread. Each delivered event becomes one call of the
/// matching named handler, with the clock as receiver:
///
/// | event | handler | arguments |
/// |---|---|---|
/// | [`TempoChanged`](ClockEvent::TempoChanged) | `tempo_changed` | tempo, beats, secs |
/// | [`StartStop`](ClockEvent::StartStop) | `start_stop` | playing |
/// | [`PeersChanged`](ClockEvent::PeersChanged) | `num_peers` | peers |
///
/// The bridge keeps working after its clock is dropped; it simply has
/// nothing left to deliver once the queue is drained.
pub struct Bridge {
    clock: ClockId,
    queue: Consumer<ClockEvent>,
    handlers: HandlerNames,
    dropped: Arc<AtomicU64>,
}

impl Bridge {
    #[inline]
    pub fn clock(&self) -> ClockId {
        self.clock
    }

    /// Events waiting for delivery
    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.slots()
    }

    /// Events lost because the queue was full
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Take the next event without delivering it
    pub fn try_next(&mut self) -> Option<ClockEvent> {
        self.queue.pop().ok()
    }

    /// Deliver every queued event to `interp`, in order.
    ///
    /// The caller must already hold the host lock; [`pump`](Self::pump) does
    /// that for you. The interpreter's "may call OS" flag is cleared for the
    /// duration of each handler call and restored afterwards.
    ///
    /// Stops at the first handler error and returns it; events queued behind
    /// the failing one stay queued.
    pub fn deliver_pending<I>(&mut self, interp: &mut I) -> Result<usize, I::Error>
    where
        I: Interpreter + ?Sized,
    {
        let mut delivered = 0;
        while let Ok(event) = self.queue.pop() {
            self.deliver(interp, event)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Acquire the host lock and deliver every queued event
    pub fn pump<I: Interpreter>(&mut self, host: &HostLock<I>) -> Result<usize, I::Error> {
        let mut interp = host.lock();
        self.deliver_pending(&mut *interp)
    }

    fn deliver<I>(&self, interp: &mut I, event: ClockEvent) -> Result<(), I::Error>
    where
        I: Interpreter + ?Sized,
    {
        let selector = event.handler(&self.handlers);
        let (args, len) = event.args();
        trace!(clock = %self.clock, selector, ?event, "delivering clock event");

        let could_call_os = interp.can_call_os();
        interp.set_can_call_os(false);
        let result = interp.call(Value::Clock(self.clock), selector, &args[..len]);
        interp.set_can_call_os(could_call_os);
        result
    }
}
