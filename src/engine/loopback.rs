//! In-process synchronization engine
//!
//! [`LoopbackEngine`] keeps one session timeline in memory and fires its
//! change callbacks from a dedicated dispatch thread, the same way a
//! networked engine fires them from its own I/O thread. Remote peers are
//! simulated with [`LoopbackPeer`] handles that join, leave and commit
//! changes to the shared session.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::engine::phase::{Beats, Timeline};
use crate::engine::{
    NumPeersCallback, SessionState, StartStopCallback, SyncEngine, TempoCallback,
};
use crate::time::Micros;

/// Engine time for a [`LoopbackEngine`] that only moves when told to
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    micros: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Micros) -> Self {
        Self {
            micros: Arc::new(AtomicI64::new(start.count())),
        }
    }

    pub fn now(&self) -> Micros {
        Micros(self.micros.load(Ordering::SeqCst))
    }

    pub fn set(&self, time: Micros) {
        self.micros.store(time.count(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(by.as_micros() as i64, Ordering::SeqCst);
    }
}

enum ClockSource {
    System(Instant),
    Manual(ManualClock),
}

impl ClockSource {
    fn now(&self) -> Micros {
        match self {
            ClockSource::System(epoch) => Micros(epoch.elapsed().as_micros() as i64),
            ClockSource::Manual(clock) => clock.now(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct SessionData {
    timeline: Timeline,
    is_playing: bool,
    time_for_is_playing: Micros,
}

/// Session snapshot captured from a [`LoopbackEngine`]
#[derive(Clone, Debug)]
pub struct LoopbackSession {
    data: SessionData,
    /// Defer beat requests to the next phase match while peers are present
    respect_quantum: bool,
}

impl LoopbackSession {
    /// Shared time at which the current transport state took effect
    pub fn time_for_is_playing(&self) -> Micros {
        self.data.time_for_is_playing
    }
}

impl SessionState for LoopbackSession {
    fn tempo(&self) -> f64 {
        self.data.timeline.tempo
    }

    fn set_tempo(&mut self, bpm: f64, at: Micros) {
        self.data.timeline.set_tempo_at(bpm, at);
    }

    fn beat_at_time(&self, time: Micros, quantum: f64) -> f64 {
        self.data
            .timeline
            .phase_encoded_beats(time, Beats::quantum(quantum))
            .to_f64()
    }

    fn time_at_beat(&self, beat: f64, quantum: f64) -> Micros {
        self.data
            .timeline
            .from_phase_encoded_beats(Beats::from_f64(beat), Beats::quantum(quantum))
    }

    fn request_beat_at_time(&mut self, beat: f64, time: Micros, quantum: f64) {
        self.data.timeline.request_beat_at_time(
            Beats::from_f64(beat),
            time,
            Beats::quantum(quantum),
            self.respect_quantum,
        );
    }

    fn is_playing(&self) -> bool {
        self.data.is_playing
    }

    fn set_is_playing(&mut self, playing: bool, at: Micros) {
        self.data.is_playing = playing;
        self.data.time_for_is_playing = at;
    }
}

enum Notice {
    Tempo(f64),
    StartStop(bool),
    Peers(usize),
    Shutdown,
}

#[derive(Default)]
struct Callbacks {
    tempo: Option<TempoCallback>,
    start_stop: Option<StartStopCallback>,
    num_peers: Option<NumPeersCallback>,
}

struct Shared {
    clock: ClockSource,
    session: Mutex<SessionData>,
    enabled: AtomicBool,
    start_stop_sync: AtomicBool,
    peers: AtomicUsize,
    /// Held for the whole duration of a callback invocation
    callbacks: Mutex<Callbacks>,
    notices: Sender<Notice>,
}

impl Shared {
    fn send(&self, notice: Notice) {
        if self.notices.send(notice).is_err() {
            trace!("loopback dispatch thread is gone, notice discarded");
        }
    }

    fn num_peers(&self) -> usize {
        if self.enabled.load(Ordering::SeqCst) {
            self.peers.load(Ordering::SeqCst)
        } else {
            0
        }
    }

    fn capture(&self) -> LoopbackSession {
        LoopbackSession {
            data: *self.session.lock(),
            respect_quantum: self.num_peers() > 0,
        }
    }

    fn commit(&self, state: LoopbackSession) {
        let previous = {
            let mut session = self.session.lock();
            core::mem::replace(&mut *session, state.data)
        };
        trace!(tempo = state.data.timeline.tempo, playing = state.data.is_playing, "session committed");

        if previous.timeline.tempo != state.data.timeline.tempo {
            self.send(Notice::Tempo(state.data.timeline.tempo));
        }
        if previous.is_playing != state.data.is_playing
            && self.start_stop_sync.load(Ordering::SeqCst)
        {
            self.send(Notice::StartStop(state.data.is_playing));
        }
    }
}

fn dispatch(shared: Arc<Shared>, notices: Receiver<Notice>) {
    for notice in notices.iter() {
        let mut callbacks = shared.callbacks.lock();
        match notice {
            Notice::Tempo(bpm) => {
                if let Some(callback) = callbacks.tempo.as_mut() {
                    callback(bpm);
                }
            }
            Notice::StartStop(playing) => {
                if let Some(callback) = callbacks.start_stop.as_mut() {
                    callback(playing);
                }
            }
            Notice::Peers(count) => {
                if let Some(callback) = callbacks.num_peers.as_mut() {
                    callback(count);
                }
            }
            Notice::Shutdown => break,
        }
    }
    trace!("loopback dispatch thread exiting");
}

/// A single-process tempo session.
///
/// Callbacks run on a dispatch thread owned by the engine. Replacing a
/// callback waits for a running invocation to return, so a callback must not
/// register callbacks itself.
///
/// # Example
///
/// ```
/// use tempolink::engine::{LoopbackEngine, SessionState, SyncEngine};
///
/// let engine = LoopbackEngine::new(120.0);
/// let mut session = engine.capture_session_state();
/// session.set_tempo(90.0, engine.clock_micros());
/// engine.commit_session_state(session);
/// assert_eq!(engine.capture_session_state().tempo(), 90.0);
/// ```
pub struct LoopbackEngine {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl LoopbackEngine {
    /// An engine running on the system monotonic clock
    pub fn new(bpm: f64) -> Self {
        Self::with_source(bpm, ClockSource::System(Instant::now()))
    }

    /// An engine whose time is driven by `clock`
    pub fn with_clock(bpm: f64, clock: ManualClock) -> Self {
        Self::with_source(bpm, ClockSource::Manual(clock))
    }

    fn with_source(bpm: f64, clock: ClockSource) -> Self {
        let now = clock.now();
        let (sender, receiver) = unbounded();
        let shared = Arc::new(Shared {
            clock,
            session: Mutex::new(SessionData {
                timeline: Timeline::new(bpm, Beats::ZERO, now),
                is_playing: false,
                time_for_is_playing: now,
            }),
            enabled: AtomicBool::new(false),
            start_stop_sync: AtomicBool::new(false),
            peers: AtomicUsize::new(0),
            callbacks: Mutex::new(Callbacks::default()),
            notices: sender,
        });

        let worker_shared = shared.clone();
        let worker = std::thread::spawn(move || dispatch(worker_shared, receiver));

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// A handle that acts as another peer in this session
    pub fn peer(&self) -> LoopbackPeer {
        LoopbackPeer {
            shared: self.shared.clone(),
            joined: false,
        }
    }

    #[inline]
    pub fn is_start_stop_sync_enabled(&self) -> bool {
        self.shared.start_stop_sync.load(Ordering::SeqCst)
    }
}

impl SyncEngine for LoopbackEngine {
    type Session = LoopbackSession;

    fn enable(&self, enabled: bool) {
        let was = self.shared.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            debug!(enabled, "loopback engine toggled");
            if self.shared.peers.load(Ordering::SeqCst) > 0 {
                self.shared.send(Notice::Peers(self.shared.num_peers()));
            }
        }
    }

    fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    fn enable_start_stop_sync(&self, enabled: bool) {
        self.shared.start_stop_sync.store(enabled, Ordering::SeqCst);
    }

    fn set_tempo_callback(&self, callback: TempoCallback) {
        self.shared.callbacks.lock().tempo = Some(callback);
    }

    fn set_start_stop_callback(&self, callback: StartStopCallback) {
        self.shared.callbacks.lock().start_stop = Some(callback);
    }

    fn set_num_peers_callback(&self, callback: NumPeersCallback) {
        self.shared.callbacks.lock().num_peers = Some(callback);
    }

    fn clock_micros(&self) -> Micros {
        self.shared.clock.now()
    }

    fn capture_session_state(&self) -> LoopbackSession {
        self.shared.capture()
    }

    fn commit_session_state(&self, state: LoopbackSession) {
        self.shared.commit(state);
    }

    fn num_peers(&self) -> usize {
        self.shared.num_peers()
    }
}

impl Drop for LoopbackEngine {
    fn drop(&mut self) {
        self.shared.send(Notice::Shutdown);
        if let Some(worker) = self.worker.take() {
            // dropped from inside a callback: the thread exits on its own
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

/// A simulated remote peer sharing a [`LoopbackEngine`]'s session.
///
/// Changes made through a peer only reach the session while the engine is
/// enabled, just as a disconnected engine never hears from the network.
pub struct LoopbackPeer {
    shared: Arc<Shared>,
    joined: bool,
}

impl LoopbackPeer {
    pub fn join(&mut self) {
        if self.joined {
            return;
        }
        self.joined = true;
        self.shared.peers.fetch_add(1, Ordering::SeqCst);
        if self.shared.enabled.load(Ordering::SeqCst) {
            self.shared.send(Notice::Peers(self.shared.num_peers()));
        }
    }

    pub fn leave(&mut self) {
        if !self.joined {
            return;
        }
        self.joined = false;
        self.shared.peers.fetch_sub(1, Ordering::SeqCst);
        if self.shared.enabled.load(Ordering::SeqCst) {
            self.shared.send(Notice::Peers(self.shared.num_peers()));
        }
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn now(&self) -> Micros {
        self.shared.clock.now()
    }

    /// Capture the session, apply `f`, and commit it as this peer.
    ///
    /// Returns `false` without touching the session while the engine is
    /// disabled.
    pub fn commit<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut LoopbackSession),
    {
        if !self.shared.enabled.load(Ordering::SeqCst) {
            return false;
        }
        let mut session = self.shared.capture();
        f(&mut session);
        self.shared.commit(session);
        true
    }
}

impl Drop for LoopbackPeer {
    fn drop(&mut self) {
        self.leave();
    }
}
