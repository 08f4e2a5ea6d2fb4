//! chordpad-core: Domain model and compiler for the chordpad composer

pub mod compile;
mod error;
pub mod note;
pub mod pattern;
pub mod progression;
pub mod signal;
pub mod theory;
pub mod tone;
mod transport;

pub use compile::{compile, compile_with_seed, performance_end_ms, CompileOptions, PerformedNote};
pub use error::{ChordpadError, Result};
pub use note::{shift_octave, NoteName};
pub use pattern::{Pattern, PatternId};
pub use progression::{ChordStep, Progression, StepId};
pub use signal::{Signal, SignalId, SignalSpec, SignalStore, SignalUpdate, ToneRow};
pub use theory::{
    diatonic_chords, BasicTheory, Chord, ChordQuality, ChordTheory, ScaleMode, Voicing,
};
pub use tone::{resolve_tone, InvalidToneId, ToneId};
pub use transport::{TimeBase, Transport, TransportState, DEFAULT_PPQ};
