//! Tempo clock synchronized to a shared session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::bridge::{self, Bridge, CallbackGate, ClockEvent, EventSender};
use crate::clock::{AtomicF64, TempoClock, TempoState};
use crate::config::ClockConfig;
use crate::engine::SyncEngine;
use crate::error::ClockResult;
use crate::session::{read_session, with_session};
use crate::time::TimeDomain;

static CLOCK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique identifier of a clock.
///
/// Passed as the receiver of every host handler call.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ClockId(pub(crate) u64);

impl ClockId {
    fn next() -> Self {
        ClockId(CLOCK_ID_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl core::fmt::Display for ClockId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "clock#{}", self.0)
    }
}

/// State reachable from both the host thread and the engine's callbacks
struct ClockShared {
    id: ClockId,
    domain: TimeDomain,
    quantum: AtomicF64,
    latency: AtomicF64,
    tempo: TempoState,
    gate: CallbackGate,
    events: EventSender,
}

impl ClockShared {
    fn on_tempo_changed<E: SyncEngine>(&self, engine: &E, bpm: f64) {
        // elapsed time from the engine clock, not the host's
        let secs = self.domain.to_local(engine.clock_micros());
        let quantum = self.quantum.load();
        let beats = read_session(engine, |txn| {
            txn.beat_at_time(self.domain.to_shared(secs), quantum)
        });
        let tempo = bpm / 60.0;
        self.tempo.set(tempo);
        self.events.push(ClockEvent::TempoChanged { tempo, beats, secs });
    }
}

/// A [`TempoClock`] whose beats follow a shared session.
///
/// Beats and seconds are converted through the session's timeline, so every
/// peer agrees on which beat falls at which moment. Tempo changes are always
/// anchored at a concrete beat or time: the session is a continuous function
/// of time and peers must agree where the change happens.
///
/// Latency is added on the seconds-to-beats path and subtracted on the
/// beats-to-seconds path, modelling output delay the same way in both
/// directions.
///
/// Changes made by other peers arrive on the engine's thread and are queued
/// on the [`Bridge`] returned by [`LinkClock::new`], for the host thread to
/// deliver.
///
/// Dropping the clock waits for any callback already running, then
/// disconnects. No callback runs after the drop returns.
pub struct LinkClock<E: SyncEngine> {
    shared: Arc<ClockShared>,
    engine: Arc<E>,
}

impl<E: SyncEngine> LinkClock<E> {
    /// Connect to the session and line `base_beats` up with `base_secs`.
    ///
    /// `tempo` is in beats per second. It becomes the session tempo unless
    /// peers are already present, in which case the session's tempo wins.
    ///
    /// Fails with [`ClockError::Config`](crate::ClockError::Config) if the
    /// quantum in `config` is not a number. Nothing is enabled or registered
    /// on the engine in that case.
    pub fn new(
        engine: E,
        domain: TimeDomain,
        config: &ClockConfig,
        tempo: f64,
        base_beats: f64,
        base_secs: f64,
    ) -> ClockResult<(Self, Bridge)> {
        let quantum = config.quantum()?;
        let id = ClockId::next();
        let (events, bridge) = bridge::channel(id, config);

        let shared = Arc::new(ClockShared {
            id,
            domain,
            quantum: AtomicF64::new(quantum),
            latency: AtomicF64::new(config.latency()),
            tempo: TempoState::new(tempo),
            gate: CallbackGate::new(),
            events,
        });
        let engine = Arc::new(engine);

        engine.enable(true);
        engine.enable_start_stop_sync(true);
        register_callbacks(&engine, &shared);

        let at = domain.to_shared(base_secs);
        let alone = engine.num_peers() == 0;
        let bpm = with_session(&*engine, |txn| {
            if alone {
                txn.set_tempo(tempo * 60.0, at);
            }
            txn.request_beat_at_time(base_beats, at, quantum);
            txn.tempo()
        });
        shared.tempo.set(bpm / 60.0);

        debug!(clock = %id, tempo, base_beats, base_secs, quantum, "link clock started");
        Ok((Self { shared, engine }, bridge))
    }

    #[inline]
    pub fn id(&self) -> ClockId {
        self.shared.id
    }

    #[inline]
    pub fn domain(&self) -> TimeDomain {
        self.shared.domain
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    #[inline]
    pub fn quantum(&self) -> f64 {
        self.shared.quantum.load()
    }

    /// Replace the quantum. Phase already established is not realigned.
    pub fn set_quantum(&self, quantum: f64) {
        self.shared.quantum.store(quantum);
        self.shared.tempo.notify();
    }

    #[inline]
    pub fn latency(&self) -> f64 {
        self.shared.latency.load()
    }

    pub fn set_latency(&self, latency: f64) {
        self.shared.latency.store(latency);
    }

    /// Peers currently seen by the engine
    pub fn num_peers(&self) -> usize {
        self.engine.num_peers()
    }
}

fn register_callbacks<E: SyncEngine>(engine: &Arc<E>, shared: &Arc<ClockShared>) {
    // the engine owns these closures, so they hold it weakly
    let weak = Arc::downgrade(engine);
    let clock = shared.clone();
    engine.set_tempo_callback(Box::new(move |bpm| {
        clock.gate.enter(|| {
            if let Some(engine) = weak.upgrade() {
                clock.on_tempo_changed(&*engine, bpm);
            }
        });
    }));

    let clock = shared.clone();
    engine.set_start_stop_callback(Box::new(move |playing| {
        clock.gate.enter(|| clock.events.push(ClockEvent::StartStop { playing }));
    }));

    let clock = shared.clone();
    engine.set_num_peers_callback(Box::new(move |peers| {
        clock.gate.enter(|| clock.events.push(ClockEvent::PeersChanged { peers }));
    }));
}

impl<E: SyncEngine> TempoClock for LinkClock<E> {
    fn tempo_state(&self) -> &TempoState {
        &self.shared.tempo
    }

    fn beats_to_secs(&self, beats: f64) -> f64 {
        let quantum = self.quantum();
        let time = read_session(&*self.engine, |txn| txn.time_at_beat(beats, quantum));
        self.shared.domain.to_local(time) - self.latency()
    }

    fn secs_to_beats(&self, secs: f64) -> f64 {
        let quantum = self.quantum();
        let time = self.shared.domain.to_shared(secs + self.latency());
        read_session(&*self.engine, |txn| txn.beat_at_time(time, quantum))
    }

    fn set_tempo_at_beat(&self, tempo: f64, beats: f64) {
        let quantum = self.quantum();
        with_session(&*self.engine, |txn| {
            // resolve the anchor before the tempo moves under it
            let at = txn.time_at_beat(beats, quantum);
            txn.set_tempo(tempo * 60.0, at);
        });
        self.shared.tempo.set(tempo);
        trace!(clock = %self.id(), tempo, beats, "tempo set at beat");
    }

    fn set_tempo_at_time(&self, tempo: f64, secs: f64) {
        let at = self.shared.domain.to_shared(secs);
        with_session(&*self.engine, |txn| txn.set_tempo(tempo * 60.0, at));
        self.shared.tempo.set(tempo);
        trace!(clock = %self.id(), tempo, secs, "tempo set at time");
    }

    fn set_all(&self, tempo: f64, beats: f64, secs: f64) {
        let quantum = self.quantum();
        let at = self.shared.domain.to_shared(secs);
        with_session(&*self.engine, |txn| {
            txn.set_tempo(tempo * 60.0, at);
            txn.request_beat_at_time(beats, at, quantum);
        });
        self.shared.tempo.set(tempo);
        trace!(clock = %self.id(), tempo, beats, secs, "tempo and beats set");
    }
}

impl<E: SyncEngine> Drop for LinkClock<E> {
    fn drop(&mut self) {
        // waits out a callback that is mid-delivery
        self.shared.gate.close();
        self.engine.enable(false);
        debug!(clock = %self.shared.id, "link clock stopped");
    }
}
