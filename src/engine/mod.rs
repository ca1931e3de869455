//! The synchronization engine contract.
//!
//! A [`SyncEngine`] keeps a distributed shared clock consistent across peers.
//! This crate never talks to the network itself; it only needs the handful of
//! operations below. Anything that can capture and commit a
//! [`SessionState`] and fire the three change callbacks can drive a
//! [`LinkClock`](crate::LinkClock).
//!
//! With the `loopback` feature the crate ships [`LoopbackEngine`], an
//! in-process engine used by the tests, benches and demos.

pub mod phase;

#[cfg(feature = "loopback")]
mod loopback;

#[cfg(feature = "loopback")]
pub use loopback::{LoopbackEngine, LoopbackPeer, LoopbackSession, ManualClock};

use crate::time::Micros;

/// Fired with the new session tempo in BPM
pub type TempoCallback = Box<dyn FnMut(f64) + Send + 'static>;
/// Fired with the new transport state
pub type StartStopCallback = Box<dyn FnMut(bool) + Send + 'static>;
/// Fired with the new number of remote peers
pub type NumPeersCallback = Box<dyn FnMut(usize) + Send + 'static>;

/// A snapshot of the shared session.
///
/// Snapshots are values: mutating one only proposes a change, which becomes
/// visible to peers once it is committed through
/// [`SyncEngine::commit_session_state`].
pub trait SessionState: Send + 'static {
    /// Session tempo in beats per minute
    fn tempo(&self) -> f64;

    /// Propose a new tempo taking effect at `at`
    fn set_tempo(&mut self, bpm: f64, at: Micros);

    /// Beat value at `time`, phase-aligned to `quantum`
    fn beat_at_time(&self, time: Micros, quantum: f64) -> f64;

    /// Shared time at which `beat` occurs, phase-aligned to `quantum`
    fn time_at_beat(&self, beat: f64, quantum: f64) -> Micros;

    /// Propose that `beat` lines up with `time` modulo `quantum`
    fn request_beat_at_time(&mut self, beat: f64, time: Micros, quantum: f64);

    fn is_playing(&self) -> bool;

    fn set_is_playing(&mut self, playing: bool, at: Micros);
}

/// Connection to a shared tempo session.
///
/// Callbacks are invoked on an engine-owned thread. Implementations must
/// drop a callback only after any running invocation of it has returned.
pub trait SyncEngine: Send + Sync + 'static {
    type Session: SessionState;

    fn enable(&self, enabled: bool);

    fn is_enabled(&self) -> bool;

    fn enable_start_stop_sync(&self, enabled: bool);

    fn set_tempo_callback(&self, callback: TempoCallback);

    fn set_start_stop_callback(&self, callback: StartStopCallback);

    fn set_num_peers_callback(&self, callback: NumPeersCallback);

    /// Current time on the engine clock
    fn clock_micros(&self) -> Micros;

    fn capture_session_state(&self) -> Self::Session;

    /// Write a snapshot back. The last committer wins.
    fn commit_session_state(&self, state: Self::Session);

    fn num_peers(&self) -> usize;
}
