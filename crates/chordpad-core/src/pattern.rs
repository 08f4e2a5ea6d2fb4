//! Rhythmic patterns: a loop length plus per-tone signals

use serde::{Deserialize, Serialize};

use crate::signal::{DIVISIONS_PER_BEAT, MAX_DIVISIONS, SignalStore};

/// Unique identifier for patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternId(pub u64);

/// Shortest loop a pattern may have
pub const MIN_PATTERN_BEATS: f64 = 0.25;

/// Longest loop, bounded by the signal grid
pub const MAX_PATTERN_BEATS: f64 = (MAX_DIVISIONS / DIVISIONS_PER_BEAT) as f64;

/// A chord-agnostic rhythm template
#[derive(Debug, Clone, Serialize)]
pub struct Pattern {
    pub id: PatternId,
    /// Pattern name (e.g., "Alberti", "Pulse")
    pub name: String,
    /// Loop period in beats
    length_beats: f64,
    /// Tone rows and their signals
    pub signals: SignalStore,
}

impl Default for Pattern {
    fn default() -> Self {
        Self {
            id: PatternId(1),
            name: String::new(),
            length_beats: 4.0,
            signals: SignalStore::new(),
        }
    }
}

impl Pattern {
    pub fn new(id: PatternId, length_beats: f64) -> Self {
        let mut pattern = Self { id, ..Default::default() };
        pattern.set_length_beats(length_beats);
        pattern
    }

    /// Pattern spanning whole bars
    pub fn from_bars(id: PatternId, bars: u32, beats_per_bar: u32) -> Self {
        Self::new(id, (bars * beats_per_bar) as f64)
    }

    pub fn length_beats(&self) -> f64 {
        self.length_beats
    }

    /// Loop length in divisions (rounded down)
    pub fn length_divisions(&self) -> u32 {
        (self.length_beats * DIVISIONS_PER_BEAT as f64) as u32
    }

    /// Set loop length, clamped to the grid; non-finite input is ignored
    pub fn set_length_beats(&mut self, beats: f64) {
        if !beats.is_finite() {
            return;
        }
        self.length_beats = beats.clamp(MIN_PATTERN_BEATS, MAX_PATTERN_BEATS);
    }

    /// True when at least one signal would sound
    pub fn has_enabled_signals(&self) -> bool {
        self.signals.signals().any(|s| !s.is_muted)
    }
}
