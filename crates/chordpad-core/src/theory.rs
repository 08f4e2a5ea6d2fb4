//! Chord theory: symbol lookup, voicing and scale-constrained chord lists

use serde::{Deserialize, Serialize};

use crate::error::{ChordpadError, Result};
use crate::note::NoteName;

/// Octave the chord tonic is placed in before any offset
pub const DEFAULT_CHORD_OCTAVE: i32 = 4;

// ============================================================================
// Scale and Chord Types
// ============================================================================

/// Scale/mode types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleMode {
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    HarmonicMinor,
    MelodicMinor,
    Pentatonic,
    Blues,
    Chromatic,
}

impl ScaleMode {
    pub const ALL: [ScaleMode; 12] = [
        Self::Major,
        Self::Minor,
        Self::Dorian,
        Self::Phrygian,
        Self::Lydian,
        Self::Mixolydian,
        Self::Locrian,
        Self::HarmonicMinor,
        Self::MelodicMinor,
        Self::Pentatonic,
        Self::Blues,
        Self::Chromatic,
    ];

    /// Get scale intervals (semitones from root)
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            Self::Major => &[0, 2, 4, 5, 7, 9, 11],
            Self::Minor => &[0, 2, 3, 5, 7, 8, 10],
            Self::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Self::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            Self::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            Self::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            Self::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            Self::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            Self::MelodicMinor => &[0, 2, 3, 5, 7, 9, 11],
            Self::Pentatonic => &[0, 2, 4, 7, 9],
            Self::Blues => &[0, 3, 5, 6, 7, 10],
            Self::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Major => "Major",
            Self::Minor => "Minor",
            Self::Dorian => "Dorian",
            Self::Phrygian => "Phrygian",
            Self::Lydian => "Lydian",
            Self::Mixolydian => "Mixolydian",
            Self::Locrian => "Locrian",
            Self::HarmonicMinor => "Harmonic Minor",
            Self::MelodicMinor => "Melodic Minor",
            Self::Pentatonic => "Pentatonic",
            Self::Blues => "Blues",
            Self::Chromatic => "Chromatic",
        }
    }

    /// Case-insensitive lookup ignoring spaces, dashes and underscores
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        Self::ALL.into_iter().find(|mode| {
            mode.name().replace(' ', "").to_ascii_lowercase() == wanted
        })
    }
}

/// Chord voicing types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Voicing {
    #[default]
    Close,        // Notes stacked in order
    Open,         // Every other voice up an octave
    Drop2,        // 2nd voice from top dropped an octave
    Drop3,        // 3rd voice from top dropped an octave
    RootBass,     // Root in bass, rest voiced freely
}

/// Chord quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    Major6,
    Minor6,
    Major7,
    Minor7,
    Dominant7,
    Diminished7,
    HalfDiminished7,
    Sus2,
    Sus4,
    Add9,
    Major9,
    Minor9,
    Dominant9,
}

impl ChordQuality {
    /// Get chord intervals from root
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            Self::Major => &[0, 4, 7],
            Self::Minor => &[0, 3, 7],
            Self::Diminished => &[0, 3, 6],
            Self::Augmented => &[0, 4, 8],
            Self::Major6 => &[0, 4, 7, 9],
            Self::Minor6 => &[0, 3, 7, 9],
            Self::Major7 => &[0, 4, 7, 11],
            Self::Minor7 => &[0, 3, 7, 10],
            Self::Dominant7 => &[0, 4, 7, 10],
            Self::Diminished7 => &[0, 3, 6, 9],
            Self::HalfDiminished7 => &[0, 3, 6, 10],
            Self::Sus2 => &[0, 2, 7],
            Self::Sus4 => &[0, 5, 7],
            Self::Add9 => &[0, 4, 7, 14],
            Self::Major9 => &[0, 4, 7, 11, 14],
            Self::Minor9 => &[0, 3, 7, 10, 14],
            Self::Dominant9 => &[0, 4, 7, 10, 14],
        }
    }

    /// Canonical symbol suffix ("" for major, "m7", ...)
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Major => "",
            Self::Minor => "m",
            Self::Diminished => "dim",
            Self::Augmented => "aug",
            Self::Major6 => "6",
            Self::Minor6 => "m6",
            Self::Major7 => "maj7",
            Self::Minor7 => "m7",
            Self::Dominant7 => "7",
            Self::Diminished7 => "dim7",
            Self::HalfDiminished7 => "m7b5",
            Self::Sus2 => "sus2",
            Self::Sus4 => "sus4",
            Self::Add9 => "add9",
            Self::Major9 => "maj9",
            Self::Minor9 => "m9",
            Self::Dominant9 => "9",
        }
    }

    /// Parse a symbol suffix, accepting the common aliases
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let quality = match suffix {
            "" | "M" | "maj" | "major" => Self::Major,
            "m" | "min" | "minor" | "-" => Self::Minor,
            "dim" | "°" | "o" => Self::Diminished,
            "aug" | "+" => Self::Augmented,
            "6" | "maj6" | "M6" => Self::Major6,
            "m6" | "min6" => Self::Minor6,
            "maj7" | "M7" | "Δ7" | "Δ" => Self::Major7,
            "m7" | "min7" | "-7" => Self::Minor7,
            "7" | "dom7" => Self::Dominant7,
            "dim7" | "°7" | "o7" => Self::Diminished7,
            "m7b5" | "ø" | "ø7" | "min7b5" => Self::HalfDiminished7,
            "sus2" => Self::Sus2,
            "sus4" | "sus" => Self::Sus4,
            "add9" => Self::Add9,
            "maj9" | "M9" => Self::Major9,
            "m9" | "min9" => Self::Minor9,
            "9" | "dom9" => Self::Dominant9,
            _ => return None,
        };
        Some(quality)
    }

    /// Classify a stacked triad by its third and fifth
    fn from_triad(third: u8, fifth: u8) -> Option<Self> {
        match (third, fifth) {
            (4, 7) => Some(Self::Major),
            (3, 7) => Some(Self::Minor),
            (3, 6) => Some(Self::Diminished),
            (4, 8) => Some(Self::Augmented),
            _ => None,
        }
    }
}

// ============================================================================
// Chord lookup
// ============================================================================

/// A chord looked up from its symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chord {
    /// Tonic without octave ("C", "Eb")
    pub tonic: String,
    pub quality: ChordQuality,
    /// Octave-qualified chord tones in ascending order, bass first if any
    pub notes: Vec<String>,
    /// Slash-chord bass without octave ("E" in "C/E")
    pub bass: Option<String>,
}

/// Chord theory provider consumed by the progression model
pub trait ChordTheory {
    /// Look up a chord symbol such as "Cmaj7", "F#m" or "C/E"
    fn get_chord(&self, symbol: &str) -> Result<Chord>;

    /// Apply inversion, voicing and octave offset to chord tones.
    ///
    /// Returns octave-qualified names in ascending pitch order.
    fn get_adjusted_notes(
        &self,
        notes: &[String],
        inversion: u8,
        voicing: Voicing,
        octave_offset: i8,
    ) -> Vec<String>;
}

/// Interval-table chord theory
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicTheory;

/// Split a symbol into its root name and the remaining suffix
fn split_root(symbol: &str) -> Option<(NoteName, &str)> {
    let mut chars = symbol.char_indices();
    let (_, letter) = chars.next()?;
    let mut end = letter.len_utf8();
    for (idx, c) in chars {
        match c {
            '#' | 'b' | '♯' | '♭' => end = idx + c.len_utf8(),
            _ => break,
        }
    }
    let root = NoteName::parse(&symbol[..end]).ok()?;
    Some((root, &symbol[end..]))
}

impl ChordTheory for BasicTheory {
    fn get_chord(&self, symbol: &str) -> Result<Chord> {
        let unknown = || ChordpadError::UnknownChord(symbol.to_string());
        let trimmed = symbol.trim();

        let (body, bass) = match trimmed.split_once('/') {
            Some((body, bass)) => (body, Some(bass)),
            None => (trimmed, None),
        };

        let (root, suffix) = split_root(body).ok_or_else(unknown)?;
        let quality = ChordQuality::from_suffix(suffix).ok_or_else(unknown)?;

        let root = root.with_octave(DEFAULT_CHORD_OCTAVE);
        let prefer_flats = root.is_flat_spelled() || root.letter == 'F' && root.accidental == 0;
        let root_midi = root.midi_or(DEFAULT_CHORD_OCTAVE);

        let mut notes: Vec<String> = quality
            .intervals()
            .iter()
            .map(|&interval| {
                if interval == 0 {
                    root.to_string()
                } else {
                    NoteName::from_midi(root_midi + interval as i32, prefer_flats).to_string()
                }
            })
            .collect();

        let bass = match bass {
            Some(bass) => {
                let bass_name = NoteName::parse(bass).map_err(|_| unknown())?;
                if bass_name.octave.is_some() {
                    return Err(unknown());
                }
                notes.insert(0, bass_name.with_octave(DEFAULT_CHORD_OCTAVE - 1).to_string());
                Some(bass_name.to_string())
            }
            None => None,
        };

        Ok(Chord {
            tonic: NoteName { octave: None, ..root }.to_string(),
            quality,
            notes,
            bass,
        })
    }

    fn get_adjusted_notes(
        &self,
        notes: &[String],
        inversion: u8,
        voicing: Voicing,
        octave_offset: i8,
    ) -> Vec<String> {
        let mut names: Vec<NoteName> = notes
            .iter()
            .filter_map(|n| NoteName::parse(n).ok())
            .map(|n| match n.octave {
                Some(_) => n,
                None => n.with_octave(DEFAULT_CHORD_OCTAVE),
            })
            .collect();

        if names.is_empty() {
            return Vec::new();
        }

        let root_class = names[0].pitch_class();
        let midi = |n: &NoteName| n.midi_or(DEFAULT_CHORD_OCTAVE);

        // Apply inversion
        let inv = (inversion as usize) % names.len();
        for _ in 0..inv {
            let first = names.remove(0);
            names.push(first.shift_octaves(1));
        }

        // Apply voicing
        match voicing {
            Voicing::Close => {}  // Already in close position
            Voicing::Open => {
                for (i, note) in names.iter_mut().enumerate() {
                    if i % 2 == 1 {
                        *note = note.shift_octaves(1);
                    }
                }
            }
            Voicing::Drop2 => {
                if names.len() >= 2 {
                    let idx = names.len() - 2;
                    names[idx] = names[idx].shift_octaves(-1);
                }
            }
            Voicing::Drop3 => {
                if names.len() >= 3 {
                    let idx = names.len() - 3;
                    names[idx] = names[idx].shift_octaves(-1);
                }
            }
            Voicing::RootBass => {
                names.sort_by_key(midi);
                if let Some(root_idx) = names.iter().position(|n| n.pitch_class() == root_class) {
                    if root_idx > 0 {
                        let root_note = names.remove(root_idx);
                        names.insert(0, root_note.shift_octaves(-1));
                    }
                }
            }
        }

        names.sort_by_key(midi);
        names
            .into_iter()
            .map(|n| n.shift_octaves(octave_offset as i32).to_string())
            .collect()
    }
}

/// Diatonic triad symbols for each degree of a seven-note scale.
///
/// Scales that are not heptatonic yield an empty list.
pub fn diatonic_chords(root: &str, mode: ScaleMode) -> Result<Vec<String>> {
    let root_name = NoteName::parse(root)?;
    let intervals = mode.intervals();
    if intervals.len() != 7 {
        return Ok(Vec::new());
    }

    let prefer_flats = root_name.is_flat_spelled() || root_name.letter == 'F' && root_name.accidental == 0;
    let root_midi = root_name.midi_or(DEFAULT_CHORD_OCTAVE);
    let degree_interval = |idx: usize| intervals[idx % 7] + if idx >= 7 { 12 } else { 0 };

    let chords = (0..7)
        .filter_map(|degree| {
            let base = degree_interval(degree);
            let third = degree_interval(degree + 2) - base;
            let fifth = degree_interval(degree + 4) - base;
            let quality = ChordQuality::from_triad(third, fifth)?;
            let tonic = NoteName::from_midi(root_midi.saturating_add(base as i32), prefer_flats);
            let tonic = NoteName { octave: None, ..tonic };
            Some(format!("{}{}", tonic, quality.suffix()))
        })
        .collect();

    Ok(chords)
}
