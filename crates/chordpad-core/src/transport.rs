//! Transport state and time conversion

use serde::{Deserialize, Serialize};

/// Default MIDI resolution in ticks per quarter note
pub const DEFAULT_PPQ: u32 = 480;

/// Transport playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportState {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// Tempo and tick resolution for beat conversions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeBase {
    pub bpm: f64,
    pub ppq: u32,
}

impl Default for TimeBase {
    fn default() -> Self {
        Self { bpm: 120.0, ppq: DEFAULT_PPQ }
    }
}

impl TimeBase {
    pub fn new(bpm: f64, ppq: u32) -> Self {
        Self { bpm, ppq }
    }

    /// Milliseconds per beat at current tempo
    pub fn ms_per_beat(&self) -> f64 {
        60_000.0 / self.bpm
    }

    pub fn beats_to_ms(&self, beats: f64) -> f64 {
        beats * self.ms_per_beat()
    }

    /// Whole ticks, rounded to nearest
    pub fn beats_to_ticks(&self, beats: f64) -> u64 {
        (beats * self.ppq as f64).round().max(0.0) as u64
    }

    pub fn ms_to_beats(&self, ms: f64) -> f64 {
        ms / self.ms_per_beat()
    }
}

/// Transport controls and position.
///
/// Position is anchored to a wall-clock reading while playing, so the
/// current position is `position_ms + (now - anchor)` without per-tick
/// accumulation drift.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transport {
    pub state: TransportState,
    /// Position when last anchored, in ms
    position_ms: f64,
    /// Clock reading at which `position_ms` was valid (playing only)
    anchor_ms: Option<f64>,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn play(&mut self, now_ms: f64) {
        self.state = TransportState::Playing;
        self.anchor_ms = Some(now_ms);
    }

    pub fn stop(&mut self) {
        self.state = TransportState::Idle;
        self.position_ms = 0.0;
        self.anchor_ms = None;
    }

    pub fn pause(&mut self, now_ms: f64) {
        self.position_ms = self.position_ms(now_ms);
        self.anchor_ms = None;
        self.state = TransportState::Paused;
    }

    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    /// Position in ms at the given clock reading
    pub fn position_ms(&self, now_ms: f64) -> f64 {
        match (self.state, self.anchor_ms) {
            (TransportState::Playing, Some(anchor)) => self.position_ms + (now_ms - anchor).max(0.0),
            _ => self.position_ms,
        }
    }

    /// Set position; re-anchors when playing
    pub fn set_position_ms(&mut self, position_ms: f64, now_ms: f64) {
        self.position_ms = position_ms.max(0.0);
        if self.is_playing() {
            self.anchor_ms = Some(now_ms);
        }
    }

    /// Format position as MM:SS.ss
    pub fn format_time(&self, now_ms: f64) -> String {
        let secs = self.position_ms(now_ms) / 1000.0;
        let mins = (secs / 60.0) as u32;
        let secs_rem = secs % 60.0;
        format!("{:02}:{:05.2}", mins, secs_rem)
    }
}
