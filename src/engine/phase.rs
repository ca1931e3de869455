//! Timeline and quantum phase arithmetic.
//!
//! Beats are held as fixed-point micro-beats so that phase comparisons are
//! exact. A [`Timeline`] is a straight line through (time_origin, beat_origin)
//! with slope `tempo`. Beat values exposed to clients are "phase encoded":
//! they keep the raw timeline beat's magnitude but take their phase modulo
//! the quantum from the distance to the beat origin, so every peer using the
//! same quantum agrees on where the bar lines fall.
//!
//! A non-positive quantum disables phase alignment.

use core::ops::{Add, Neg, Sub};

use crate::time::Micros;

pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 999.0;
/// Largest quantum honoured, in beats. Bigger ones are clamped down to it
pub const MAX_QUANTUM: f64 = 1e6;

/// Fixed-point beat value (millionths of a beat)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Beats(i64);

impl Beats {
    pub const ZERO: Beats = Beats(0);

    #[inline]
    pub fn from_f64(beats: f64) -> Self {
        Beats((beats * 1e6).round() as i64)
    }

    /// A quantum in beats. Anything that is not a positive number disables
    /// phase alignment
    pub fn quantum(quantum: f64) -> Self {
        if quantum.is_nan() || quantum <= 0.0 {
            return Beats::ZERO;
        }
        Beats::from_f64(quantum.min(MAX_QUANTUM))
    }

    #[inline]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / 1e6
    }
}

impl Add for Beats {
    type Output = Beats;

    #[inline]
    fn add(self, rhs: Beats) -> Beats {
        Beats(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Beats {
    type Output = Beats;

    #[inline]
    fn sub(self, rhs: Beats) -> Beats {
        Beats(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for Beats {
    type Output = Beats;

    #[inline]
    fn neg(self) -> Beats {
        Beats(self.0.saturating_neg())
    }
}

/// Phase of `beats` within `quantum`, always in `[0, quantum)`
pub fn phase(beats: Beats, quantum: Beats) -> Beats {
    let q = quantum.0;
    if q <= 0 {
        return Beats::ZERO;
    }
    Beats(beats.0.rem_euclid(q))
}

/// Smallest value `>= x` whose phase matches `target`'s
pub fn next_phase_match(x: Beats, target: Beats, quantum: Beats) -> Beats {
    let q = quantum.0;
    if q <= 0 {
        return x;
    }
    // both phases lie in [0, q), so neither step can overflow
    let step = phase(target, quantum).0 - phase(x, quantum).0;
    let step = if step < 0 { step + q } else { step };
    Beats(x.0.saturating_add(step))
}

/// Value nearest to `x` whose phase matches `target`'s
pub fn closest_phase_match(x: Beats, target: Beats, quantum: Beats) -> Beats {
    if quantum.0 <= 0 {
        return x;
    }
    let half = Beats::from_f64(0.5 * quantum.to_f64());
    next_phase_match(x - half, target, quantum)
}

/// Clamp a tempo into the range every peer supports
pub fn clamp_tempo(bpm: f64) -> f64 {
    if bpm.is_nan() {
        return MIN_BPM;
    }
    bpm.clamp(MIN_BPM, MAX_BPM)
}

/// A constant-tempo mapping between shared time and beats
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Timeline {
    /// Beats per minute
    pub tempo: f64,
    pub beat_origin: Beats,
    pub time_origin: Micros,
}

impl Timeline {
    pub fn new(tempo: f64, beat_origin: Beats, time_origin: Micros) -> Self {
        Self {
            tempo: clamp_tempo(tempo),
            beat_origin,
            time_origin,
        }
    }

    #[inline]
    fn micros_to_beats(&self, micros: Micros) -> Beats {
        Beats::from_f64(micros.count() as f64 / 60e6 * self.tempo)
    }

    #[inline]
    fn beats_to_micros(&self, beats: Beats) -> Micros {
        Micros((beats.to_f64() / self.tempo * 60e6).round() as i64)
    }

    /// Raw timeline beat at `time`
    pub fn to_beats(&self, time: Micros) -> Beats {
        self.beat_origin + self.micros_to_beats(time - self.time_origin)
    }

    /// Shared time of a raw timeline beat
    pub fn from_beats(&self, beats: Beats) -> Micros {
        self.time_origin + self.beats_to_micros(beats - self.beat_origin)
    }

    /// Phase-encoded beat at `time`
    pub fn phase_encoded_beats(&self, time: Micros, quantum: Beats) -> Beats {
        let beat = self.to_beats(time);
        closest_phase_match(beat, beat - self.beat_origin, quantum)
    }

    /// Shared time of a phase-encoded beat
    pub fn from_phase_encoded_beats(&self, beat: Beats, quantum: Beats) -> Micros {
        if quantum.0 <= 0 {
            return self.from_beats(beat);
        }
        let from_origin = beat - self.beat_origin;
        let origin_offset = from_origin - phase(from_origin, quantum);
        // round up at exactly half a quantum, the inverse of
        // closest_phase_match, or a beat at phase q/2 rounds down twice
        let inverse_phase_offset = closest_phase_match(
            quantum - phase(from_origin, quantum),
            quantum - phase(beat, quantum),
            quantum,
        );
        self.from_beats(self.beat_origin + origin_offset + quantum - inverse_phase_offset)
    }

    /// Change tempo at `at` without moving the beat that falls there
    pub fn set_tempo_at(&mut self, bpm: f64, at: Micros) {
        let pivot = Timeline::new(bpm, self.to_beats(at), at);
        self.tempo = pivot.tempo;
        self.time_origin = pivot.from_beats(self.beat_origin);
    }

    /// Slide the timeline so every beat arrives `shift` beats earlier
    fn shift(&mut self, shift: Beats) {
        let delta = self.from_beats(shift) - self.from_beats(Beats::ZERO);
        self.time_origin = self.time_origin - delta;
    }

    /// Make `beat` the phase-encoded beat at `time`
    pub fn force_beat_at_time(&mut self, beat: Beats, time: Micros, quantum: Beats) {
        let current = self.phase_encoded_beats(time, quantum);
        let closest_in_phase = closest_phase_match(current, beat, quantum);
        // phase first, then magnitude
        self.shift(closest_in_phase - current);
        self.beat_origin = self.beat_origin + beat - closest_in_phase;
    }

    /// Line `beat` up with `time`.
    ///
    /// With `respect_quantum` the beat is deferred to the next point at or
    /// after `time` where it is in phase, so other peers are not disturbed.
    pub fn request_beat_at_time(
        &mut self,
        beat: Beats,
        time: Micros,
        quantum: Beats,
        respect_quantum: bool,
    ) {
        let time = if respect_quantum {
            let at = next_phase_match(self.phase_encoded_beats(time, quantum), beat, quantum);
            self.from_phase_encoded_beats(at, quantum)
        } else {
            time
        };
        self.force_beat_at_time(beat, time, quantum);
    }
}
