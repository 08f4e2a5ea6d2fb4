//! Error types for chordpad

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChordpadError {
    #[error("Unknown chord symbol: {0}")]
    UnknownChord(String),
    #[error("Invalid note name: {0}")]
    InvalidNote(String),
    #[error("Step not found: {0}")]
    StepNotFound(u64),
    #[error("Signal not found: {0}")]
    SignalNotFound(u64),
}

pub type Result<T> = std::result::Result<T, ChordpadError>;
