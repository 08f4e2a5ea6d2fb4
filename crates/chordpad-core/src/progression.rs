//! Chord progression model and its mutation API

use serde::Serialize;
use tracing::warn;

use crate::error::{ChordpadError, Result};
use crate::signal::clamp_velocity;
use crate::theory::{ChordTheory, Voicing};

pub const DEFAULT_BPM: f64 = 120.0;
pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 400.0;

pub const MIN_STEP_BEATS: f64 = 0.25;
pub const MAX_STEP_BEATS: f64 = 64.0;

pub const MIN_OCTAVE_OFFSET: i8 = -3;
pub const MAX_OCTAVE_OFFSET: i8 = 3;

pub const DEFAULT_MIN_VELOCITY: u8 = 70;
pub const DEFAULT_MAX_VELOCITY: u8 = 100;

/// Unique identifier for progression steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StepId(pub u64);

/// One chord or rest on the progression timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChordStep {
    pub id: StepId,
    pub is_rest: bool,
    /// Tonic without octave; empty for rests
    pub tonic: String,
    /// Chord symbol as entered; empty for rests
    pub symbol: String,
    /// Chord tones before inversion/voicing/octave
    pub notes: Vec<String>,
    /// Voiced notes, lowest first. Re-derived on every chord edit.
    adjusted_notes: Vec<String>,
    pub inversion: u8,
    pub voicing: Voicing,
    pub octave_offset: i8,
    pub duration_beats: f64,
    pub min_velocity: u8,
    pub max_velocity: u8,
}

impl ChordStep {
    fn rest(id: StepId, duration_beats: f64) -> Self {
        Self {
            id,
            is_rest: true,
            tonic: String::new(),
            symbol: String::new(),
            notes: Vec::new(),
            adjusted_notes: Vec::new(),
            inversion: 0,
            voicing: Voicing::Close,
            octave_offset: 0,
            duration_beats: clamp_beats(duration_beats),
            min_velocity: DEFAULT_MIN_VELOCITY,
            max_velocity: DEFAULT_MAX_VELOCITY,
        }
    }

    fn chord(theory: &dyn ChordTheory, id: StepId, symbol: &str, duration_beats: f64) -> Result<Self> {
        let chord = theory.get_chord(symbol)?;
        let mut step = Self {
            is_rest: false,
            tonic: chord.tonic,
            symbol: symbol.trim().to_string(),
            notes: chord.notes,
            ..Self::rest(id, duration_beats)
        };
        step.rederive(theory);
        Ok(step)
    }

    /// Voiced notes the pattern resolves tones against
    pub fn adjusted_notes(&self) -> &[String] {
        &self.adjusted_notes
    }

    fn rederive(&mut self, theory: &dyn ChordTheory) {
        if self.is_rest {
            self.adjusted_notes.clear();
            return;
        }
        self.adjusted_notes =
            theory.get_adjusted_notes(&self.notes, self.inversion, self.voicing, self.octave_offset);
    }
}

fn clamp_beats(beats: f64) -> f64 {
    if !beats.is_finite() {
        return MIN_STEP_BEATS;
    }
    beats.clamp(MIN_STEP_BEATS, MAX_STEP_BEATS)
}

/// Ordered chord/rest steps at one tempo
#[derive(Debug, Clone, Serialize)]
pub struct Progression {
    pub id: u64,
    bpm: f64,
    steps: Vec<ChordStep>,
    next_step_id: u64,
}

impl Default for Progression {
    fn default() -> Self {
        Self {
            id: 1,
            bpm: DEFAULT_BPM,
            steps: Vec::new(),
            next_step_id: 1,
        }
    }
}

impl Progression {
    pub fn new(bpm: f64) -> Self {
        let mut progression = Self::default();
        progression.set_bpm(bpm);
        progression
    }

    fn alloc_id(&mut self) -> StepId {
        let id = StepId(self.next_step_id);
        self.next_step_id += 1;
        id
    }

    fn index_of(&self, id: StepId) -> Result<usize> {
        self.steps
            .iter()
            .position(|s| s.id == id)
            .ok_or(ChordpadError::StepNotFound(id.0))
    }

    fn step_mut(&mut self, id: StepId) -> Result<&mut ChordStep> {
        self.steps
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(ChordpadError::StepNotFound(id.0))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn steps(&self) -> &[ChordStep] {
        &self.steps
    }

    pub fn step(&self, id: StepId) -> Option<&ChordStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sum of step durations
    pub fn total_beats(&self) -> f64 {
        self.steps.iter().map(|s| s.duration_beats).sum()
    }

    /// Milliseconds per beat at the current tempo
    pub fn ms_per_beat(&self) -> f64 {
        60_000.0 / self.bpm
    }

    pub fn duration_ms(&self) -> f64 {
        self.total_beats() * self.ms_per_beat()
    }

    /// Step sounding at `beat` and the beat it starts on.
    ///
    /// Steps cover `[start, start + duration)`; a beat at or past the end
    /// of the progression has no step.
    pub fn step_at_beat(&self, beat: f64) -> Option<(&ChordStep, f64)> {
        if beat < 0.0 {
            return None;
        }
        let mut start = 0.0;
        for step in &self.steps {
            let end = start + step.duration_beats;
            if beat < end {
                return Some((step, start));
            }
            start = end;
        }
        None
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Set tempo, clamped to 20-400 BPM
    pub fn set_bpm(&mut self, bpm: f64) {
        if !bpm.is_finite() {
            warn!(bpm, "Ignoring non-finite tempo");
            return;
        }
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
    }

    pub fn add_chord(&mut self, theory: &dyn ChordTheory, symbol: &str, beats: f64) -> Result<StepId> {
        self.insert_chord(theory, self.steps.len(), symbol, beats)
    }

    /// Insert a chord before `index` (clamped to the end)
    pub fn insert_chord(
        &mut self,
        theory: &dyn ChordTheory,
        index: usize,
        symbol: &str,
        beats: f64,
    ) -> Result<StepId> {
        let id = StepId(self.next_step_id);
        let step = ChordStep::chord(theory, id, symbol, beats)?;
        self.next_step_id += 1;
        let idx = index.min(self.steps.len());
        self.steps.insert(idx, step);
        Ok(id)
    }

    pub fn add_rest(&mut self, beats: f64) -> StepId {
        let id = self.alloc_id();
        self.steps.push(ChordStep::rest(id, beats));
        id
    }

    pub fn remove_step(&mut self, id: StepId) -> Option<ChordStep> {
        let idx = self.index_of(id).ok()?;
        Some(self.steps.remove(idx))
    }

    /// Move a step to `to_index` (clamped to the last position)
    pub fn move_step(&mut self, id: StepId, to_index: usize) -> Result<()> {
        let from = self.index_of(id)?;
        let step = self.steps.remove(from);
        let to = to_index.min(self.steps.len());
        self.steps.insert(to, step);
        Ok(())
    }

    /// Insert a copy right after the original
    pub fn duplicate_step(&mut self, id: StepId) -> Result<StepId> {
        let idx = self.index_of(id)?;
        let new_id = self.alloc_id();
        let copy = ChordStep { id: new_id, ..self.steps[idx].clone() };
        self.steps.insert(idx + 1, copy);
        Ok(new_id)
    }

    /// Replace a step's chord, keeping timing and voicing settings
    pub fn set_chord(&mut self, theory: &dyn ChordTheory, id: StepId, symbol: &str) -> Result<()> {
        let chord = theory.get_chord(symbol)?;
        let step = self.step_mut(id)?;
        step.is_rest = false;
        step.tonic = chord.tonic;
        step.symbol = symbol.trim().to_string();
        step.notes = chord.notes;
        step.inversion %= step.notes.len().max(1) as u8;
        step.rederive(theory);
        Ok(())
    }

    pub fn set_duration(&mut self, id: StepId, beats: f64) -> Result<()> {
        self.step_mut(id)?.duration_beats = clamp_beats(beats);
        Ok(())
    }

    pub fn set_voicing(&mut self, theory: &dyn ChordTheory, id: StepId, voicing: Voicing) -> Result<()> {
        let step = self.step_mut(id)?;
        step.voicing = voicing;
        step.rederive(theory);
        Ok(())
    }

    /// Inversion wraps modulo the chord size
    pub fn set_inversion(&mut self, theory: &dyn ChordTheory, id: StepId, inversion: u8) -> Result<()> {
        let step = self.step_mut(id)?;
        step.inversion = inversion % step.notes.len().max(1) as u8;
        step.rederive(theory);
        Ok(())
    }

    pub fn set_octave_offset(&mut self, theory: &dyn ChordTheory, id: StepId, offset: i8) -> Result<()> {
        let step = self.step_mut(id)?;
        step.octave_offset = offset.clamp(MIN_OCTAVE_OFFSET, MAX_OCTAVE_OFFSET);
        step.rederive(theory);
        Ok(())
    }

    pub fn set_velocity_range(&mut self, id: StepId, min: u8, max: u8) -> Result<()> {
        let step = self.step_mut(id)?;
        (step.min_velocity, step.max_velocity) = clamp_velocity(min, max);
        Ok(())
    }

    /// Drop every step
    pub fn clear(&mut self) {
        self.steps.clear();
    }
}
