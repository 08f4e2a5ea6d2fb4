//! Chord-independent tone addressing.
//!
//! A tone id names a *relative* chord tone: `T0` is the lowest tone of
//! whatever chord is active, `T2+1` the third tone an octave up. Indices past
//! the chord size wrap around and climb by octaves, so `T3` on a triad is the
//! root one octave higher while on a seventh chord it is the seventh.
//!
//! Wire format: `T<index>[+N|-N]` with a 0-based index, or the alternate
//! `N<index>[+N|-N]` with a 1-based index. Ids are parsed once into
//! [`ToneId`] and always display in the `T` form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::note::shift_octave;

/// Largest octave suffix a tone id carries; longer suffixes are clamped
pub const MAX_OCTAVE_OFFSET: i32 = 10;

/// Parsed tone identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToneId {
    /// 0-based position into the chord's note list
    pub base_index: u32,
    /// Whole octaves on top of any wrap-around shift
    pub octave_offset: i32,
}

/// Rejected tone id string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid tone id: {0:?}")]
pub struct InvalidToneId(pub String);

impl ToneId {
    pub const fn new(base_index: u32, octave_offset: i32) -> Self {
        Self { base_index, octave_offset }
    }

    /// Parse either encoding; malformed ids yield `None`
    pub fn parse(s: &str) -> Option<Self> {
        let mut chars = s.chars();
        let one_based = match chars.next()? {
            'T' => false,
            'N' => true,
            _ => return None,
        };
        let body = chars.as_str();

        let sign_pos = body.find(['+', '-']);
        let (index_str, offset_str) = match sign_pos {
            Some(pos) => (&body[..pos], Some(&body[pos..])),
            None => (body, None),
        };

        if index_str.is_empty() || !index_str.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let mut base_index: u32 = index_str.parse().ok()?;
        if one_based {
            base_index = base_index.checked_sub(1)?;
        }

        let octave_offset = match offset_str {
            Some(offset) => {
                let digits = &offset[1..];
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                // Only digits remain, so a failed parse means the value overflowed
                let magnitude = digits
                    .parse::<i32>()
                    .map_or(MAX_OCTAVE_OFFSET, |m| m.min(MAX_OCTAVE_OFFSET));
                if offset.starts_with('-') { -magnitude } else { magnitude }
            }
            None => 0,
        };

        Some(Self { base_index, octave_offset })
    }

    /// Resolve against a chord's voiced notes (lowest first).
    ///
    /// Returns `None` for an empty chord, or when the index climbs so many
    /// octaves that the result has no representable octave.
    pub fn resolve(&self, chord_notes: &[String]) -> Option<String> {
        if chord_notes.is_empty() {
            return None;
        }
        let count = u32::try_from(chord_notes.len()).unwrap_or(u32::MAX);
        let cycle = i32::try_from(self.base_index / count).ok()?;
        let note_index = (self.base_index % count) as usize;
        let shift = self.octave_offset.checked_add(cycle)?;

        shift_octave(&chord_notes[note_index], shift)
    }

    /// Same tone with a new octave suffix, clamped like a parsed one
    pub fn with_octave_offset(&self, octave_offset: i32) -> Self {
        Self {
            octave_offset: octave_offset.clamp(-MAX_OCTAVE_OFFSET, MAX_OCTAVE_OFFSET),
            ..*self
        }
    }
}

/// Resolve a raw tone id string against chord notes.
///
/// Malformed ids and empty chords resolve to `None`; callers skip the tone.
pub fn resolve_tone(tone_id: &str, chord_notes: &[String]) -> Option<String> {
    ToneId::parse(tone_id)?.resolve(chord_notes)
}

impl fmt::Display for ToneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.base_index)?;
        if self.octave_offset != 0 {
            write!(f, "{:+}", self.octave_offset)?;
        }
        Ok(())
    }
}

impl FromStr for ToneId {
    type Err = InvalidToneId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| InvalidToneId(s.to_string()))
    }
}

impl TryFrom<String> for ToneId {
    type Error = InvalidToneId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ToneId> for String {
    fn from(id: ToneId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::NoteName;

    fn chord(notes: &[&str]) -> Vec<String> {
        notes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_both_encodings() {
        assert_eq!(ToneId::parse("T0"), Some(ToneId::new(0, 0)));
        assert_eq!(ToneId::parse("T2+1"), Some(ToneId::new(2, 1)));
        assert_eq!(ToneId::parse("T10-2"), Some(ToneId::new(10, -2)));
        assert_eq!(ToneId::parse("N1"), Some(ToneId::new(0, 0)));
        assert_eq!(ToneId::parse("N3+1"), Some(ToneId::new(2, 1)));
    }

    #[test]
    fn test_parse_malformed() {
        for bad in ["", "T", "X1", "T-1", "T1+", "T1+x", "Tx", "N0", "t1", "T1 ", "T1+1+1"] {
            assert_eq!(ToneId::parse(bad), None, "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(ToneId::new(0, 0).to_string(), "T0");
        assert_eq!(ToneId::new(3, 1).to_string(), "T3+1");
        assert_eq!(ToneId::new(1, -2).to_string(), "T1-2");
        assert_eq!(ToneId::parse("N2").unwrap().to_string(), "T1");
    }

    #[test]
    fn test_resolve_basic() {
        let c = chord(&["C4", "E4", "G4"]);
        assert_eq!(resolve_tone("T0", &c).as_deref(), Some("C4"));
        assert_eq!(resolve_tone("T1", &c).as_deref(), Some("E4"));
        assert_eq!(resolve_tone("T3", &c).as_deref(), Some("C5"));
        assert_eq!(resolve_tone("T5-1", &c).as_deref(), Some("G4"));
        assert_eq!(resolve_tone("T0-1", &c).as_deref(), Some("C3"));
    }

    #[test]
    fn test_resolve_empty_or_malformed() {
        assert_eq!(resolve_tone("T0", &[]), None);
        assert_eq!(resolve_tone("bogus", &chord(&["C4"])), None);
    }

    #[test]
    fn test_huge_ids_never_overflow() {
        let c = chord(&["C4"]);
        assert_eq!(ToneId::parse("T0+2147483647"), Some(ToneId::new(0, MAX_OCTAVE_OFFSET)));
        assert_eq!(ToneId::parse("T0-99999999999"), Some(ToneId::new(0, -MAX_OCTAVE_OFFSET)));
        assert_eq!(resolve_tone("T0+2147483647", &c).as_deref(), Some("C14"));

        // Wrap-around pushes the octave past i32
        assert_eq!(resolve_tone("T2147483647+1", &c), None);
        assert_eq!(resolve_tone("T2147483647", &c), None);
        // Cycle count does not fit i32 at all
        assert_eq!(resolve_tone("T4294967295", &c), None);

        let triad = chord(&["C4", "E4", "G4"]);
        assert_eq!(resolve_tone("T4294967295", &triad).as_deref(), Some("C1431655769"));
    }

    #[test]
    fn test_error_message() {
        let err = "X1".parse::<ToneId>().unwrap_err();
        assert_eq!(err.to_string(), "invalid tone id: \"X1\"");
    }

    #[test]
    fn test_resolve_note_without_octave_is_unshifted() {
        let c = chord(&["C", "E", "G"]);
        assert_eq!(resolve_tone("T3+2", &c).as_deref(), Some("C"));
    }

    #[test]
    fn test_cycling_invariant() {
        let chords = [
            chord(&["C4", "E4", "G4"]),
            chord(&["D3", "F#3", "A3", "C4"]),
            chord(&["Eb4", "G4", "Bb4", "D5", "F5"]),
        ];
        for notes in &chords {
            let n = notes.len() as u32;
            for i in 0..12 {
                let low = ToneId::new(i, 0).resolve(notes).unwrap();
                let high = ToneId::new(i + n, 0).resolve(notes).unwrap();
                let low = NoteName::parse(&low).unwrap();
                let high = NoteName::parse(&high).unwrap();
                assert_eq!(low.pitch_class(), high.pitch_class());
                assert_eq!(high.midi().unwrap() - low.midi().unwrap(), 12);
            }
        }
    }

    #[test]
    fn test_octave_suffix_composition() {
        let notes = chord(&["A3", "C4", "E4", "G4"]);
        for i in 0..10 {
            let plain = NoteName::parse(&ToneId::new(i, 0).resolve(&notes).unwrap()).unwrap();
            let up = NoteName::parse(&ToneId::new(i, 1).resolve(&notes).unwrap()).unwrap();
            assert_eq!(up.midi().unwrap() - plain.midi().unwrap(), 12);
        }
    }

    #[test]
    fn test_string_round_trip_through_conversions() {
        let id = ToneId::try_from("N4-1".to_string()).unwrap();
        assert_eq!(String::from(id), "T3-1");
        assert!(ToneId::try_from("T".to_string()).is_err());
        assert_eq!("T7".parse::<ToneId>(), Ok(ToneId::new(7, 0)));
    }
}
