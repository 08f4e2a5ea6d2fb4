//! Pitched note names ("C#4", "Eb3", "G")

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChordpadError, Result};

/// Semitone offset of each natural letter from C
fn letter_semitones(letter: char) -> Option<i32> {
    match letter {
        'C' => Some(0),
        'D' => Some(2),
        'E' => Some(4),
        'F' => Some(5),
        'G' => Some(7),
        'A' => Some(9),
        'B' => Some(11),
        _ => None,
    }
}

const SHARP_NAMES: [(char, i8); 12] = [
    ('C', 0), ('C', 1), ('D', 0), ('D', 1), ('E', 0), ('F', 0),
    ('F', 1), ('G', 0), ('G', 1), ('A', 0), ('A', 1), ('B', 0),
];

const FLAT_NAMES: [(char, i8); 12] = [
    ('C', 0), ('D', -1), ('D', 0), ('E', -1), ('E', 0), ('F', 0),
    ('G', -1), ('G', 0), ('A', -1), ('A', 0), ('B', -1), ('B', 0),
];

/// A spelled note name with an optional octave number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteName {
    /// Natural letter, always uppercase A-G
    pub letter: char,
    /// Sharps (positive) or flats (negative)
    pub accidental: i8,
    /// Scientific pitch octave (C4 = middle C)
    pub octave: Option<i32>,
}

impl NoteName {
    pub fn new(letter: char, accidental: i8, octave: Option<i32>) -> Self {
        Self { letter: letter.to_ascii_uppercase(), accidental, octave }
    }

    /// Parse "C", "c#4", "Bb-1", "F##3"
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || ChordpadError::InvalidNote(s.to_string());
        let s = s.trim();
        let mut chars = s.chars();
        let letter = chars.next().ok_or_else(invalid)?.to_ascii_uppercase();
        letter_semitones(letter).ok_or_else(invalid)?;

        let rest = chars.as_str();
        let mut accidental = 0i8;
        let mut consumed = 0;
        for c in rest.chars() {
            match c {
                '#' | '♯' => accidental = accidental.checked_add(1).ok_or_else(invalid)?,
                'b' | '♭' => accidental = accidental.checked_sub(1).ok_or_else(invalid)?,
                _ => break,
            }
            consumed += c.len_utf8();
        }

        let octave_str = &rest[consumed..];
        let octave = if octave_str.is_empty() {
            None
        } else {
            Some(octave_str.parse::<i32>().map_err(|_| invalid())?)
        };

        Ok(Self { letter, accidental, octave })
    }

    /// Pitch class 0-11 (C = 0)
    pub fn pitch_class(&self) -> u8 {
        let base = letter_semitones(self.letter).unwrap_or(0);
        (base + self.accidental as i32).rem_euclid(12) as u8
    }

    /// MIDI note number, `None` when the octave is unknown
    pub fn midi(&self) -> Option<i32> {
        let base = letter_semitones(self.letter)?;
        let octave = self.octave?;
        octave
            .checked_add(1)?
            .checked_mul(12)?
            .checked_add(base + self.accidental as i32)
    }

    /// MIDI number, treating a missing octave as `default_octave`
    pub fn midi_or(&self, default_octave: i32) -> i32 {
        let base = letter_semitones(self.letter).unwrap_or(0);
        self.octave
            .unwrap_or(default_octave)
            .saturating_add(1)
            .saturating_mul(12)
            .saturating_add(base + self.accidental as i32)
    }

    /// Spell a MIDI number with sharps or flats
    pub fn from_midi(midi: i32, prefer_flats: bool) -> Self {
        let table = if prefer_flats { &FLAT_NAMES } else { &SHARP_NAMES };
        let (letter, accidental) = table[midi.rem_euclid(12) as usize];
        Self { letter, accidental, octave: Some(midi.div_euclid(12) - 1) }
    }

    /// Same spelling moved by whole octaves; octave-less names are unchanged
    pub fn shift_octaves(&self, octaves: i32) -> Self {
        Self {
            octave: self.octave.map(|o| o.saturating_add(octaves)),
            ..*self
        }
    }

    /// Like [`shift_octaves`](Self::shift_octaves), `None` when the octave
    /// would overflow
    pub fn checked_shift_octaves(&self, octaves: i32) -> Option<Self> {
        let octave = match self.octave {
            Some(o) => Some(o.checked_add(octaves)?),
            None => None,
        };
        Some(Self { octave, ..*self })
    }

    pub fn with_octave(&self, octave: i32) -> Self {
        Self { octave: Some(octave), ..*self }
    }

    pub fn is_flat_spelled(&self) -> bool {
        self.accidental < 0
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter)?;
        let symbol = if self.accidental > 0 { '#' } else { 'b' };
        for _ in 0..self.accidental.unsigned_abs() {
            write!(f, "{}", symbol)?;
        }
        if let Some(octave) = self.octave {
            write!(f, "{}", octave)?;
        }
        Ok(())
    }
}

impl FromStr for NoteName {
    type Err = ChordpadError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Move a note name string by whole octaves.
///
/// Names that fail to parse or carry no octave come back unchanged. `None`
/// only when the resulting octave does not fit an `i32`.
pub fn shift_octave(note: &str, octaves: i32) -> Option<String> {
    if octaves == 0 {
        return Some(note.to_string());
    }
    match NoteName::parse(note) {
        Ok(name) if name.octave.is_some() => {
            name.checked_shift_octaves(octaves).map(|n| n.to_string())
        }
        _ => Some(note.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let n = NoteName::parse("C#4").unwrap();
        assert_eq!(n.letter, 'C');
        assert_eq!(n.accidental, 1);
        assert_eq!(n.octave, Some(4));
        assert_eq!(n.to_string(), "C#4");

        assert_eq!(NoteName::parse("bb3").unwrap().to_string(), "Bb3");
        assert_eq!(NoteName::parse("G").unwrap().octave, None);
        assert_eq!(NoteName::parse("C-1").unwrap().midi(), Some(0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(NoteName::parse("").is_err());
        assert!(NoteName::parse("H4").is_err());
        assert!(NoteName::parse("C#x").is_err());
    }

    #[test]
    fn test_midi_conversion() {
        assert_eq!(NoteName::parse("C4").unwrap().midi(), Some(60));
        assert_eq!(NoteName::parse("A4").unwrap().midi(), Some(69));
        assert_eq!(NoteName::parse("B#3").unwrap().midi(), Some(60));
        assert_eq!(NoteName::from_midi(61, false).to_string(), "C#4");
        assert_eq!(NoteName::from_midi(61, true).to_string(), "Db4");
    }

    #[test]
    fn test_shift_octave() {
        assert_eq!(shift_octave("C4", 1).as_deref(), Some("C5"));
        assert_eq!(shift_octave("Eb3", -2).as_deref(), Some("Eb1"));
        assert_eq!(shift_octave("G", 3).as_deref(), Some("G"));
        assert_eq!(shift_octave("???", 1).as_deref(), Some("???"));
        assert_eq!(shift_octave("C4", i32::MAX), None);
        assert_eq!(shift_octave("C-4", i32::MIN), None);
    }

    #[test]
    fn test_extreme_input_does_not_overflow() {
        let sharps = format!("C{}", "#".repeat(130));
        assert!(matches!(NoteName::parse(&sharps), Err(ChordpadError::InvalidNote(_))));
        let flats = format!("E{}", "b".repeat(130));
        assert!(NoteName::parse(&flats).is_err());

        let high = NoteName::parse(&format!("C{}", i32::MAX)).unwrap();
        assert_eq!(high.midi(), None);
        assert_eq!(high.midi_or(4), i32::MAX);
        assert_eq!(high.shift_octaves(1).octave, Some(i32::MAX));
        assert_eq!(high.checked_shift_octaves(1), None);
    }
}
