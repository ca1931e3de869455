//! Capture / propose / commit over the shared session.
//!
//! A [`Transaction`] owns one captured snapshot. Reads are answered from the
//! snapshot, which may already be stale: remote peers can commit at any time
//! and nothing here re-validates. Mutations only propose a change; committing
//! consumes the transaction and writes the snapshot back, with the last
//! committer winning at the engine. There are no retries.

use tracing::trace;

use crate::engine::{SessionState, SyncEngine};
use crate::time::Micros;

/// One captured session snapshot and whether it carries proposed changes
#[must_use = "a transaction does nothing unless committed"]
pub struct Transaction<S> {
    state: S,
    proposed: bool,
}

impl<S: SessionState> Transaction<S> {
    /// Capture the engine's current session state
    pub fn capture<E>(engine: &E) -> Self
    where
        E: SyncEngine<Session = S> + ?Sized,
    {
        Self {
            state: engine.capture_session_state(),
            proposed: false,
        }
    }

    /// Write the snapshot back if anything was proposed.
    ///
    /// Read-only transactions are not committed, so they can never clobber a
    /// change another peer made after the capture.
    pub fn commit<E>(self, engine: &E)
    where
        E: SyncEngine<Session = S> + ?Sized,
    {
        if self.proposed {
            trace!(tempo = self.state.tempo(), "committing session state");
            engine.commit_session_state(self.state);
        }
    }

    #[inline]
    pub fn is_proposed(&self) -> bool {
        self.proposed
    }

    /// Session tempo in BPM
    #[inline]
    pub fn tempo(&self) -> f64 {
        self.state.tempo()
    }

    #[inline]
    pub fn beat_at_time(&self, time: Micros, quantum: f64) -> f64 {
        self.state.beat_at_time(time, quantum)
    }

    #[inline]
    pub fn time_at_beat(&self, beat: f64, quantum: f64) -> Micros {
        self.state.time_at_beat(beat, quantum)
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    /// Propose `bpm`, taking effect at `at`
    pub fn set_tempo(&mut self, bpm: f64, at: Micros) {
        self.state.set_tempo(bpm, at);
        self.proposed = true;
    }

    /// Propose aligning `beat` with `time` modulo `quantum`
    pub fn request_beat_at_time(&mut self, beat: f64, time: Micros, quantum: f64) {
        self.state.request_beat_at_time(beat, time, quantum);
        self.proposed = true;
    }

    pub fn set_is_playing(&mut self, playing: bool, at: Micros) {
        self.state.set_is_playing(playing, at);
        self.proposed = true;
    }
}

/// Capture, apply `f`, commit
pub fn with_session<E, F, R>(engine: &E, f: F) -> R
where
    E: SyncEngine + ?Sized,
    F: FnOnce(&mut Transaction<E::Session>) -> R,
{
    let mut txn = Transaction::capture(engine);
    let out = f(&mut txn);
    txn.commit(engine);
    out
}

/// Capture and read without ever committing
pub fn read_session<E, F, R>(engine: &E, f: F) -> R
where
    E: SyncEngine + ?Sized,
    F: FnOnce(&Transaction<E::Session>) -> R,
{
    let txn = Transaction::capture(engine);
    f(&txn)
}
