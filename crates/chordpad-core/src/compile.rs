//! Pattern-to-performance compilation.
//!
//! Loops a pattern across the whole progression and resolves each signal
//! against the chord sounding where it starts, producing timed, pitched,
//! velocity-assigned notes. Stateless and synchronous; callers throttle.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::pattern::Pattern;
use crate::progression::{ChordStep, Progression, StepId};
use crate::signal::{Signal, SignalId};
use crate::tone::ToneId;
use crate::transport::{DEFAULT_PPQ, TimeBase};

/// Compilation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Ticks per quarter note
    pub ppq: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { ppq: DEFAULT_PPQ }
    }
}

/// One compiled note. Relative fields are pattern-local, absolute fields
/// are measured from the start of the progression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformedNote {
    pub tone_id: ToneId,
    pub signal_id: SignalId,
    /// Pattern loop this note belongs to (0-based)
    pub repetition: u32,
    /// Step whose chord the tone resolved against
    pub step_id: StepId,
    /// Pitched note name; `None` marks a slot with nothing to play
    pub note: Option<String>,
    pub start_division: u32,
    pub end_division: u32,
    pub start_ticks: u64,
    pub end_ticks: u64,
    pub start_ms: f64,
    pub end_ms: f64,
    pub velocity: u8,
    pub absolute_start_ticks: u64,
    pub absolute_end_ticks: u64,
    pub absolute_start_ms: f64,
    pub absolute_end_ms: f64,
}

impl PerformedNote {
    pub fn duration_ms(&self) -> f64 {
        self.absolute_end_ms - self.absolute_start_ms
    }

    /// Identifies this signal occurrence within one playback pass
    pub fn occurrence(&self) -> (SignalId, u32) {
        (self.signal_id, self.repetition)
    }
}

/// Latest absolute end time in a performance, 0 when empty
pub fn performance_end_ms(notes: &[PerformedNote]) -> f64 {
    notes.iter().map(|n| n.absolute_end_ms).fold(0.0, f64::max)
}

/// Pick a velocity: the signal's own range unless it is `[0, 0]`,
/// otherwise the chord step's range.
fn sample_velocity(signal: &Signal, step: &ChordStep, rng: &mut fastrand::Rng) -> u8 {
    let (min, max) = signal
        .velocity_range()
        .unwrap_or((step.min_velocity, step.max_velocity));
    let (min, max) = if min > max { (max, min) } else { (min, max) };
    rng.u8(min..=max)
}

/// Compile a pattern against a progression.
///
/// Empty progressions and patterns without enabled signals compile to an
/// empty performance.
pub fn compile(
    progression: &Progression,
    pattern: &Pattern,
    options: &CompileOptions,
    rng: &mut fastrand::Rng,
) -> Vec<PerformedNote> {
    if progression.is_empty() {
        debug!("Progression is empty, nothing to compile");
        return Vec::new();
    }

    let signals = pattern.signals.enabled_signals();
    if signals.is_empty() {
        debug!("Pattern has no enabled signals, nothing to compile");
        return Vec::new();
    }

    let pattern_beats = pattern.length_beats();
    if pattern_beats <= 0.0 {
        warn!(pattern_beats, "Pattern length must be positive");
        return Vec::new();
    }

    let time = TimeBase::new(progression.bpm(), options.ppq);
    let total_beats = progression.total_beats();
    let repetitions = (total_beats / pattern_beats).ceil() as u32;
    let pattern_divisions = pattern.length_divisions();

    let mut notes = Vec::new();

    for repetition in 0..repetitions {
        let offset_beats = repetition as f64 * pattern_beats;

        for signal in &signals {
            if signal.start_division >= pattern_divisions {
                trace!(signal = signal.id.0, "Signal starts past the pattern loop, skipped");
                continue;
            }

            let start_beats = signal.start_beats();
            let end_beats = signal.end_beats();
            let absolute_beat = offset_beats + start_beats;

            let Some((step, _)) = progression.step_at_beat(absolute_beat) else {
                continue;
            };
            if step.is_rest {
                continue;
            }
            let Some(note) = signal.tone_id.resolve(step.adjusted_notes()) else {
                trace!(tone = %signal.tone_id, step = step.id.0, "Tone did not resolve, skipped");
                continue;
            };

            notes.push(PerformedNote {
                tone_id: signal.tone_id,
                signal_id: signal.id,
                repetition,
                step_id: step.id,
                note: Some(note),
                start_division: signal.start_division,
                end_division: signal.end_division,
                start_ticks: time.beats_to_ticks(start_beats),
                end_ticks: time.beats_to_ticks(end_beats),
                start_ms: time.beats_to_ms(start_beats),
                end_ms: time.beats_to_ms(end_beats),
                velocity: sample_velocity(signal, step, rng),
                absolute_start_ticks: time.beats_to_ticks(offset_beats + start_beats),
                absolute_end_ticks: time.beats_to_ticks(offset_beats + end_beats),
                absolute_start_ms: time.beats_to_ms(offset_beats + start_beats),
                absolute_end_ms: time.beats_to_ms(offset_beats + end_beats),
            });
        }
    }

    notes.sort_by(|a, b| {
        a.absolute_start_ms
            .total_cmp(&b.absolute_start_ms)
            .then(a.tone_id.cmp(&b.tone_id))
            .then(a.signal_id.cmp(&b.signal_id))
    });

    debug!(
        notes = notes.len(),
        repetitions,
        total_beats,
        "Compiled performance"
    );
    notes
}

/// [`compile`] with a seeded generator, for reproducible velocities
pub fn compile_with_seed(
    progression: &Progression,
    pattern: &Pattern,
    options: &CompileOptions,
    seed: u64,
) -> Vec<PerformedNote> {
    let mut rng = fastrand::Rng::with_seed(seed);
    compile(progression, pattern, options, &mut rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternId;
    use crate::signal::SignalSpec;
    use crate::theory::BasicTheory;

    const T0: ToneId = ToneId::new(0, 0);

    fn compile_seeded(progression: &Progression, pattern: &Pattern) -> Vec<PerformedNote> {
        compile_with_seed(progression, pattern, &CompileOptions::default(), 7)
    }

    #[test]
    fn test_c_major_scenario() {
        let mut progression = Progression::new(120.0);
        progression.add_chord(&BasicTheory, "C", 4.0).unwrap();
        let mut pattern = Pattern::new(PatternId(1), 4.0);
        pattern.signals.add_signal(SignalSpec::new(T0, 0, 4));

        let notes = compile_seeded(&progression, &pattern);
        assert_eq!(notes.len(), 1);
        let n = &notes[0];
        assert_eq!(n.note.as_deref(), Some("C4"));
        assert_eq!((n.start_ticks, n.end_ticks), (0, 480));
        assert_eq!((n.start_ms, n.end_ms), (0.0, 500.0));
        assert_eq!((n.absolute_start_ms, n.absolute_end_ms), (0.0, 500.0));
        assert_eq!(n.repetition, 0);
    }

    #[test]
    fn test_empty_inputs() {
        let mut pattern = Pattern::default();
        let progression = Progression::default();
        pattern.signals.add_signal(SignalSpec::new(T0, 0, 4));
        assert!(compile_seeded(&progression, &pattern).is_empty());

        let mut progression = Progression::default();
        progression.add_chord(&BasicTheory, "C", 4.0).unwrap();
        assert!(compile_seeded(&progression, &Pattern::default()).is_empty());

        let mut muted = Pattern::default();
        muted.signals.add_signal(SignalSpec::new(T0, 0, 4).muted(true));
        assert!(compile_seeded(&progression, &muted).is_empty());
    }

    #[test]
    fn test_rest_silences_signal() {
        let mut progression = Progression::new(120.0);
        progression.add_chord(&BasicTheory, "C", 2.0).unwrap();
        progression.add_rest(2.0);

        // Signal inside the rest (beats 2-3)
        let mut in_rest = Pattern::new(PatternId(1), 4.0);
        in_rest.signals.add_signal(SignalSpec::new(T0, 8, 12));
        assert!(compile_seeded(&progression, &in_rest).is_empty());

        // Signal inside the chord (beats 0-1)
        let mut in_chord = Pattern::new(PatternId(2), 4.0);
        in_chord.signals.add_signal(SignalSpec::new(T0, 0, 4));
        assert_eq!(compile_seeded(&progression, &in_chord).len(), 1);
    }

    #[test]
    fn test_repetition_coverage() {
        let mut progression = Progression::new(120.0);
        progression.add_chord(&BasicTheory, "C", 4.0).unwrap();
        progression.add_chord(&BasicTheory, "F", 4.0).unwrap();

        let mut pattern = Pattern::new(PatternId(1), 4.0);
        pattern.signals.add_signal(SignalSpec::new(T0, 2, 6));

        let notes = compile_seeded(&progression, &pattern);
        assert_eq!(notes.len(), 2);
        let (first, second) = (&notes[0], &notes[1]);
        assert_eq!((first.repetition, second.repetition), (0, 1));

        // Pattern-local timing is identical, absolute timing is shifted by 4 beats
        assert_eq!(first.start_ms, second.start_ms);
        assert_eq!(first.start_ticks, second.start_ticks);
        assert_eq!(second.absolute_start_ms - second.start_ms, 2000.0);
        assert_eq!(second.absolute_start_ticks - second.start_ticks, 4 * 480);

        // Each repetition resolves against the chord active at that point
        assert_eq!(first.note.as_deref(), Some("C4"));
        assert_eq!(second.note.as_deref(), Some("F4"));
    }

    #[test]
    fn test_partial_repetition_is_cut_at_progression_end() {
        let mut progression = Progression::new(120.0);
        progression.add_chord(&BasicTheory, "C", 6.0).unwrap();

        let mut pattern = Pattern::new(PatternId(1), 4.0);
        pattern.signals.add_signal(SignalSpec::new(T0, 0, 2));
        pattern.signals.add_signal(SignalSpec::new(ToneId::new(1, 0), 12, 14));

        let notes = compile_seeded(&progression, &pattern);
        // ceil(6 / 4) = 2 loops; the beat-3 signal of loop 1 lands at beat 7
        let starts: Vec<f64> = notes.iter().map(|n| n.absolute_start_ms).collect();
        assert_eq!(starts, vec![0.0, 1500.0, 2000.0]);
    }

    #[test]
    fn test_unresolvable_tone_on_empty_chord_is_skipped() {
        let mut progression = Progression::new(120.0);
        progression.add_chord(&BasicTheory, "C", 4.0).unwrap();
        let mut pattern = Pattern::new(PatternId(1), 4.0);
        // Tone wraps, so even large indices resolve on a real chord
        pattern.signals.add_signal(SignalSpec::new(ToneId::new(7, 0), 0, 4));
        let notes = compile_seeded(&progression, &pattern);
        assert_eq!(notes[0].note.as_deref(), Some("E6"));
    }

    #[test]
    fn test_velocity_sources() {
        let mut progression = Progression::new(120.0);
        let step = progression.add_chord(&BasicTheory, "C", 4.0).unwrap();
        progression.set_velocity_range(step, 40, 40).unwrap();

        let mut pattern = Pattern::new(PatternId(1), 4.0);
        pattern.signals.add_signal(SignalSpec::new(T0, 0, 4));
        pattern.signals.add_signal(SignalSpec::new(ToneId::new(1, 0), 0, 4).velocity(110, 110));

        let notes = compile_seeded(&progression, &pattern);
        let by_tone = |tone: ToneId| notes.iter().find(|n| n.tone_id == tone).unwrap().velocity;
        assert_eq!(by_tone(T0), 40);
        assert_eq!(by_tone(ToneId::new(1, 0)), 110);
    }

    #[test]
    fn test_velocity_within_range_and_seed_deterministic() {
        let mut progression = Progression::new(120.0);
        progression.add_chord(&BasicTheory, "Cmaj7", 16.0).unwrap();
        let mut pattern = Pattern::new(PatternId(1), 1.0);
        pattern.signals.add_signal(SignalSpec::new(T0, 0, 1).velocity(30, 90));

        let a = compile_seeded(&progression, &pattern);
        let b = compile_seeded(&progression, &pattern);
        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
        assert!(a.iter().all(|n| (30..=90).contains(&n.velocity)));
    }

    #[test]
    fn test_signal_past_loop_is_ignored() {
        let mut progression = Progression::new(120.0);
        progression.add_chord(&BasicTheory, "C", 8.0).unwrap();
        let mut pattern = Pattern::new(PatternId(1), 2.0);
        pattern.signals.add_signal(SignalSpec::new(T0, 8, 12));
        assert!(compile_seeded(&progression, &pattern).is_empty());
    }

    #[test]
    fn test_performance_end() {
        let mut progression = Progression::new(60.0);
        progression.add_chord(&BasicTheory, "C", 2.0).unwrap();
        let mut pattern = Pattern::new(PatternId(1), 2.0);
        pattern.signals.add_signal(SignalSpec::new(T0, 4, 12));
        let notes = compile_seeded(&progression, &pattern);
        assert_eq!(performance_end_ms(&notes), 3000.0);
        assert_eq!(performance_end_ms(&[]), 0.0);
    }
}
