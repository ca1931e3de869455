//! The tempo clock abstraction and its shared tempo cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A cached tempo together with the beat duration derived from it.
///
/// Always read and written as one value so the pair is never seen torn.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Tempo {
    /// Beats per second
    pub tempo: f64,
    /// Seconds per beat
    pub beat_dur: f64,
    /// Bumped on every change and wake-up
    pub generation: u64,
}

/// The tempo a clock currently runs at, plus a signal for whoever schedules
/// against it.
///
/// Every write bumps the generation and wakes threads blocked in
/// [`wait_for_change`](Self::wait_for_change), so a scheduler can re-plan
/// its next wake-up after a tempo or phase change.
pub struct TempoState {
    current: Mutex<Tempo>,
    changed: Condvar,
}

impl TempoState {
    pub fn new(tempo: f64) -> Self {
        Self {
            current: Mutex::new(Tempo {
                tempo,
                beat_dur: 1.0 / tempo,
                generation: 0,
            }),
            changed: Condvar::new(),
        }
    }

    #[inline]
    pub fn get(&self) -> Tempo {
        *self.current.lock()
    }

    /// Store a new tempo (beats per second) and wake waiters
    pub fn set(&self, tempo: f64) {
        let mut current = self.current.lock();
        current.tempo = tempo;
        current.beat_dur = 1.0 / tempo;
        current.generation += 1;
        self.changed.notify_all();
    }

    /// Wake waiters without changing the tempo
    pub fn notify(&self) {
        let mut current = self.current.lock();
        current.generation += 1;
        self.changed.notify_all();
    }

    /// Block until the generation moves past `seen` or `timeout` elapses
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> Tempo {
        let mut current = self.current.lock();
        if current.generation == seen {
            let _ = self.changed.wait_for(&mut current, timeout);
        }
        *current
    }
}

/// An `f64` stored in an atomic
#[derive(Debug, Default)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Conversions between a clock's elapsed seconds and beats, and tempo
/// changes anchored at a given beat or time.
///
/// Tempo values are in beats per second throughout.
pub trait TempoClock {
    fn tempo_state(&self) -> &TempoState;

    #[inline]
    fn tempo(&self) -> f64 {
        self.tempo_state().get().tempo
    }

    #[inline]
    fn beat_dur(&self) -> f64 {
        self.tempo_state().get().beat_dur
    }

    fn beats_to_secs(&self, beats: f64) -> f64;

    fn secs_to_beats(&self, secs: f64) -> f64;

    /// Change tempo so that `beats` keeps the time it has now
    fn set_tempo_at_beat(&self, tempo: f64, beats: f64);

    /// Change tempo at elapsed time `secs`
    fn set_tempo_at_time(&self, tempo: f64, secs: f64);

    /// Set tempo and make `beats` fall at `secs`
    fn set_all(&self, tempo: f64, beats: f64, secs: f64);

    /// Make `beats` the current beat at elapsed time `now`
    fn set_beats(&self, beats: f64, now: f64) {
        self.set_all(self.tempo(), beats, now);
    }
}

#[derive(Clone, Copy, Debug)]
struct Base {
    beats: f64,
    secs: f64,
}

/// A free-running tempo clock: beats advance linearly from a base point
pub struct FreeClock {
    tempo: TempoState,
    base: Mutex<Base>,
}

impl FreeClock {
    pub fn new(tempo: f64, base_beats: f64, base_secs: f64) -> Self {
        Self {
            tempo: TempoState::new(tempo),
            base: Mutex::new(Base {
                beats: base_beats,
                secs: base_secs,
            }),
        }
    }
}

impl TempoClock for FreeClock {
    fn tempo_state(&self) -> &TempoState {
        &self.tempo
    }

    fn beats_to_secs(&self, beats: f64) -> f64 {
        let base = *self.base.lock();
        (beats - base.beats) * self.beat_dur() + base.secs
    }

    fn secs_to_beats(&self, secs: f64) -> f64 {
        let base = *self.base.lock();
        (secs - base.secs) * self.tempo() + base.beats
    }

    fn set_tempo_at_beat(&self, tempo: f64, beats: f64) {
        let mut base = self.base.lock();
        base.secs = (beats - base.beats) * self.beat_dur() + base.secs;
        base.beats = beats;
        self.tempo.set(tempo);
    }

    fn set_tempo_at_time(&self, tempo: f64, secs: f64) {
        let mut base = self.base.lock();
        base.beats = (secs - base.secs) * self.tempo() + base.beats;
        base.secs = secs;
        self.tempo.set(tempo);
    }

    fn set_all(&self, tempo: f64, beats: f64, secs: f64) {
        let mut base = self.base.lock();
        base.beats = beats;
        base.secs = secs;
        self.tempo.set(tempo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn free_clock_is_linear() {
        let clock = FreeClock::new(2.0, 0.0, 0.0);
        assert_eq!(clock.secs_to_beats(1.5), 3.0);
        assert_eq!(clock.beats_to_secs(3.0), 1.5);
    }

    #[test]
    fn tempo_change_at_beat_keeps_that_beat() {
        let clock = FreeClock::new(1.0, 0.0, 0.0);
        clock.set_tempo_at_beat(2.0, 4.0);
        assert_eq!(clock.beats_to_secs(4.0), 4.0);
        assert_eq!(clock.beats_to_secs(6.0), 5.0);
        assert_eq!(clock.beat_dur(), 0.5);
    }

    #[test]
    fn tempo_change_at_time_keeps_that_time() {
        let clock = FreeClock::new(1.0, 0.0, 0.0);
        clock.set_tempo_at_time(4.0, 2.0);
        assert_eq!(clock.secs_to_beats(2.0), 2.0);
        assert_eq!(clock.secs_to_beats(3.0), 6.0);
    }

    #[test]
    fn set_beats_keeps_tempo() {
        let clock = FreeClock::new(2.0, 0.0, 0.0);
        clock.set_beats(16.0, 10.0);
        assert_eq!(clock.secs_to_beats(10.0), 16.0);
        assert_eq!(clock.tempo(), 2.0);
    }

    #[test]
    fn waiters_wake_on_tempo_change() {
        let state = Arc::new(TempoState::new(1.0));
        let seen = state.get().generation;

        let setter = state.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            setter.set(3.0);
        });

        let tempo = state.wait_for_change(seen, Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(tempo.tempo, 3.0);
        assert!(tempo.generation > seen);
    }

    #[test]
    fn wait_times_out_without_change() {
        let state = TempoState::new(1.0);
        let seen = state.get().generation;
        let tempo = state.wait_for_change(seen, Duration::from_millis(10));
        assert_eq!(tempo.generation, seen);
    }
}
