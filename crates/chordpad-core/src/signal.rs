//! Per-tone signal storage with last-write-wins overlap resolution

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChordpadError, Result};
use crate::tone::ToneId;

/// Sub-beat grid resolution (a division is a sixteenth in 4/4)
pub const DIVISIONS_PER_BEAT: u32 = 4;

/// Addressable range of a tone row, in divisions
pub const MAX_DIVISIONS: u32 = 4096;

/// Unique identifier for signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub u64);

/// A note trigger on one tone row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub tone_id: ToneId,
    /// Inclusive start, in divisions from pattern start
    pub start_division: u32,
    /// Exclusive end, always > start
    pub end_division: u32,
    pub min_velocity: u8,
    pub max_velocity: u8,
    pub is_muted: bool,
    /// Logical write order; the newest write wins contested divisions
    pub updated: u64,
}

impl Signal {
    pub fn len_divisions(&self) -> u32 {
        self.end_division.saturating_sub(self.start_division)
    }

    pub fn start_beats(&self) -> f64 {
        self.start_division as f64 / DIVISIONS_PER_BEAT as f64
    }

    pub fn end_beats(&self) -> f64 {
        self.end_division as f64 / DIVISIONS_PER_BEAT as f64
    }

    /// Velocity range set on the signal itself; `[0, 0]` means unset
    pub fn velocity_range(&self) -> Option<(u8, u8)> {
        if self.min_velocity == 0 && self.max_velocity == 0 {
            return None;
        }
        Some((self.min_velocity, self.max_velocity))
    }

    pub fn overlaps(&self, other: &Signal) -> bool {
        self.start_division < other.end_division && other.start_division < self.end_division
    }
}

/// Parameters for a new signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSpec {
    pub tone_id: ToneId,
    pub start_division: u32,
    pub end_division: u32,
    #[serde(default)]
    pub min_velocity: u8,
    #[serde(default)]
    pub max_velocity: u8,
    #[serde(default)]
    pub is_muted: bool,
}

impl SignalSpec {
    pub fn new(tone_id: ToneId, start_division: u32, end_division: u32) -> Self {
        Self {
            tone_id,
            start_division,
            end_division,
            min_velocity: 0,
            max_velocity: 0,
            is_muted: false,
        }
    }

    pub fn velocity(mut self, min: u8, max: u8) -> Self {
        self.min_velocity = min;
        self.max_velocity = max;
        self
    }

    pub fn muted(mut self, muted: bool) -> Self {
        self.is_muted = muted;
        self
    }
}

/// Partial update; `None` fields are left alone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalUpdate {
    pub start_division: Option<u32>,
    pub end_division: Option<u32>,
    pub min_velocity: Option<u8>,
    pub max_velocity: Option<u8>,
    pub is_muted: Option<bool>,
}

impl SignalUpdate {
    fn is_structural(&self) -> bool {
        self.start_division.is_some() || self.end_division.is_some()
    }
}

/// A voice: one tone id and the signals placed on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToneRow {
    pub tone_id: ToneId,
    /// Member signals, ordered by start division after each correction
    pub signal_ids: Vec<SignalId>,
}

impl ToneRow {
    pub fn new(tone_id: ToneId) -> Self {
        Self { tone_id, signal_ids: Vec::new() }
    }
}

/// Clamp a division span into the addressable range, never empty
fn clamp_span(start: u32, end: u32) -> (u32, u32) {
    let start = start.min(MAX_DIVISIONS - 1);
    let end = end.clamp(start + 1, MAX_DIVISIONS);
    (start, end)
}

/// Clamp to MIDI velocity and order the pair
pub(crate) fn clamp_velocity(min: u8, max: u8) -> (u8, u8) {
    let (min, max) = (min.min(127), max.min(127));
    if min > max { (max, min) } else { (min, max) }
}

/// Signal map plus tone rows.
///
/// Serialize-only: every signal enters through `add_signal` so spans are
/// always clamped to the grid.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignalStore {
    signals: HashMap<SignalId, Signal>,
    rows: BTreeMap<ToneId, ToneRow>,
    next_id: u64,
    write_clock: u64,
}

impl SignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_signal_id(&mut self) -> SignalId {
        self.next_id += 1;
        SignalId(self.next_id)
    }

    fn touch(&mut self) -> u64 {
        self.write_clock += 1;
        self.write_clock
    }

    /// Newest logical write stamp handed out
    pub fn write_clock(&self) -> u64 {
        self.write_clock
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get(&self, id: SignalId) -> Option<&Signal> {
        self.signals.get(&id)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// All signals, in no particular order
    pub fn signals(&self) -> impl Iterator<Item = &Signal> {
        self.signals.values()
    }

    /// Non-muted signals ordered by row then start
    pub fn enabled_signals(&self) -> Vec<&Signal> {
        self.rows
            .values()
            .flat_map(|row| row.signal_ids.iter())
            .filter_map(|id| self.signals.get(id))
            .filter(|s| !s.is_muted)
            .collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = &ToneRow> {
        self.rows.values()
    }

    pub fn row(&self, tone_id: ToneId) -> Option<&ToneRow> {
        self.rows.get(&tone_id)
    }

    /// Signals on a row ordered by start division
    pub fn row_signals(&self, tone_id: ToneId) -> Vec<&Signal> {
        let mut signals: Vec<&Signal> = self
            .rows
            .get(&tone_id)
            .map(|row| row.signal_ids.iter().filter_map(|id| self.signals.get(id)).collect())
            .unwrap_or_default();
        signals.sort_by_key(|s| (s.start_division, s.id));
        signals
    }

    /// True when any two signals on the row share a division
    pub fn row_has_overlaps(&self, tone_id: ToneId) -> bool {
        self.row_signals(tone_id)
            .windows(2)
            .any(|pair| pair[0].overlaps(pair[1]))
    }

    // ------------------------------------------------------------------
    // Tone rows
    // ------------------------------------------------------------------

    /// Create an empty row; returns false when it already exists
    pub fn add_tone_row(&mut self, tone_id: ToneId) -> bool {
        if self.rows.contains_key(&tone_id) {
            return false;
        }
        self.rows.insert(tone_id, ToneRow::new(tone_id));
        true
    }

    /// Remove a row together with all of its signals
    pub fn remove_tone_row(&mut self, tone_id: ToneId) -> Option<ToneRow> {
        let row = self.rows.remove(&tone_id)?;
        for id in &row.signal_ids {
            self.signals.remove(id);
        }
        Some(row)
    }

    // ------------------------------------------------------------------
    // Signal mutation
    // ------------------------------------------------------------------

    /// Insert a signal, creating its row on demand.
    ///
    /// The new signal is the newest write on its row, so it survives intact
    /// and carves out whatever it overlaps.
    pub fn add_signal(&mut self, spec: SignalSpec) -> SignalId {
        let id = self.next_signal_id();
        let updated = self.touch();
        let (start, end) = clamp_span(spec.start_division, spec.end_division);
        let (min_velocity, max_velocity) = clamp_velocity(spec.min_velocity, spec.max_velocity);

        self.signals.insert(id, Signal {
            id,
            tone_id: spec.tone_id,
            start_division: start,
            end_division: end,
            min_velocity,
            max_velocity,
            is_muted: spec.is_muted,
            updated,
        });
        self.rows
            .entry(spec.tone_id)
            .or_insert_with(|| ToneRow::new(spec.tone_id))
            .signal_ids
            .push(id);

        self.correct_overlaps(spec.tone_id);
        id
    }

    pub fn remove_signal(&mut self, id: SignalId) -> Option<Signal> {
        let signal = self.signals.remove(&id)?;
        if let Some(row) = self.rows.get_mut(&signal.tone_id) {
            row.signal_ids.retain(|&s| s != id);
        }
        Some(signal)
    }

    /// Apply a partial update. Span changes re-run overlap correction.
    pub fn update_signal(&mut self, id: SignalId, update: SignalUpdate) -> Result<()> {
        let signal = self
            .signals
            .get_mut(&id)
            .ok_or(ChordpadError::SignalNotFound(id.0))?;
        self.write_clock += 1;
        let updated = self.write_clock;

        let start = update.start_division.unwrap_or(signal.start_division);
        let end = update.end_division.unwrap_or(signal.end_division);
        (signal.start_division, signal.end_division) = clamp_span(start, end);

        let min = update.min_velocity.unwrap_or(signal.min_velocity);
        let max = update.max_velocity.unwrap_or(signal.max_velocity);
        (signal.min_velocity, signal.max_velocity) = clamp_velocity(min, max);

        if let Some(muted) = update.is_muted {
            signal.is_muted = muted;
        }
        signal.updated = updated;

        if update.is_structural() {
            let tone_id = signal.tone_id;
            self.correct_overlaps(tone_id);
        }
        Ok(())
    }

    pub fn set_muted(&mut self, id: SignalId, muted: bool) -> Result<()> {
        self.update_signal(id, SignalUpdate { is_muted: Some(muted), ..Default::default() })
    }

    /// Move and/or resize a signal, optionally onto another tone row.
    ///
    /// A new start without a new end keeps the signal's length. Only the
    /// destination row is corrected; the source row just loses coverage.
    pub fn move_signal(
        &mut self,
        id: SignalId,
        new_tone_id: Option<ToneId>,
        new_start: Option<u32>,
        new_end: Option<u32>,
    ) -> Result<()> {
        let signal = self
            .signals
            .get_mut(&id)
            .ok_or(ChordpadError::SignalNotFound(id.0))?;
        self.write_clock += 1;
        let updated = self.write_clock;

        let start = new_start.unwrap_or(signal.start_division);
        let end = match (new_start, new_end) {
            (_, Some(end)) => end,
            (Some(start), None) => start.saturating_add(signal.len_divisions()),
            (None, None) => signal.end_division,
        };
        (signal.start_division, signal.end_division) = clamp_span(start, end);
        signal.updated = updated;

        let source = signal.tone_id;
        let destination = new_tone_id.unwrap_or(source);

        if destination != source {
            signal.tone_id = destination;
            if let Some(row) = self.rows.get_mut(&source) {
                row.signal_ids.retain(|&s| s != id);
            }
            self.rows
                .entry(destination)
                .or_insert_with(|| ToneRow::new(destination))
                .signal_ids
                .push(id);
        }

        self.correct_overlaps(destination);
        Ok(())
    }

    /// Resolve overlaps on one row, newest write winning.
    ///
    /// Each signal is stamped into a division grid in write order. Every
    /// maximal run of one id survives as a signal: the first run keeps the
    /// id, later runs become new signals, and signals with no run left are
    /// deleted.
    pub fn correct_overlaps(&mut self, tone_id: ToneId) {
        let Some(row) = self.rows.get(&tone_id) else {
            return;
        };

        let mut ordered: Vec<&Signal> = row
            .signal_ids
            .iter()
            .filter_map(|id| self.signals.get(id))
            .collect();
        ordered.sort_by_key(|s| (s.updated, s.id));

        let mut grid: Vec<Option<SignalId>> = vec![None; MAX_DIVISIONS as usize];
        for signal in &ordered {
            let end = signal.end_division.min(MAX_DIVISIONS) as usize;
            let start = (signal.start_division as usize).min(end);
            for slot in &mut grid[start..end] {
                *slot = Some(signal.id);
            }
        }

        // Maximal runs of the same id, in timeline order
        let mut runs: Vec<(SignalId, u32, u32)> = Vec::new();
        for (division, slot) in grid.iter().enumerate() {
            let Some(id) = *slot else { continue };
            let division = division as u32;
            match runs.last_mut() {
                Some((last_id, _, end)) if *last_id == id && *end == division => *end += 1,
                _ => runs.push((id, division, division + 1)),
            }
        }

        let original: Vec<SignalId> = ordered.iter().map(|s| s.id).collect();
        let mut survivors: Vec<SignalId> = Vec::with_capacity(runs.len());
        let mut kept: Vec<SignalId> = Vec::new();
        let mut fragments = 0usize;

        for (id, start, end) in runs {
            if kept.contains(&id) {
                let Some(mut fragment) = self.signals.get(&id).cloned() else {
                    continue;
                };
                fragment.id = self.next_signal_id();
                fragment.start_division = start;
                fragment.end_division = end;
                survivors.push(fragment.id);
                self.signals.insert(fragment.id, fragment);
                fragments += 1;
            } else if let Some(signal) = self.signals.get_mut(&id) {
                signal.start_division = start;
                signal.end_division = end;
                kept.push(id);
                survivors.push(id);
            }
        }

        let mut removed = 0usize;
        for id in original.iter().filter(|id| !kept.contains(id)) {
            self.signals.remove(id);
            removed += 1;
        }

        if fragments > 0 || removed > 0 {
            debug!(tone = %tone_id, fragments, removed, "Corrected overlapping signals");
        }

        if let Some(row) = self.rows.get_mut(&tone_id) {
            row.signal_ids = survivors;
        }
    }
}
