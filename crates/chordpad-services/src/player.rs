//! Note sinks driven by the playback engine

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use chordpad_core::NoteName;
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlayerError {
    #[error("Unknown note: {0}")]
    UnknownNote(String),
    #[error("Player disconnected")]
    Disconnected,
    #[error("Player backend error: {0}")]
    Backend(String),
}

/// A note to sound
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotePlay {
    /// Pitched note name, e.g. "C#4"
    pub note: String,
    pub velocity: u8,
    /// Sounding length; the sink releases the note on its own after this
    pub duration_secs: f64,
}

/// External sound sink
pub trait Player {
    fn play_note(&mut self, note: &NotePlay) -> Result<(), PlayerError>;
    fn stop_note(&mut self, note: &str) -> Result<(), PlayerError>;
    fn stop_all_notes(&mut self) -> Result<(), PlayerError>;
}

/// Player call as data, for recording and forwarding across threads
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlayerCommand {
    Play(NotePlay),
    Stop(String),
    StopAll,
}

impl PlayerCommand {
    /// Apply this command to a sink
    pub fn apply(&self, player: &mut dyn Player) -> Result<(), PlayerError> {
        match self {
            Self::Play(note) => player.play_note(note),
            Self::Stop(note) => player.stop_note(note),
            Self::StopAll => player.stop_all_notes(),
        }
    }
}

/// Logs every call through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPlayer;

impl Player for LogPlayer {
    fn play_note(&mut self, note: &NotePlay) -> Result<(), PlayerError> {
        let parsed = NoteName::parse(&note.note).map_err(|_| PlayerError::UnknownNote(note.note.clone()))?;
        info!(
            note = %note.note,
            midi = ?parsed.midi(),
            velocity = note.velocity,
            duration_secs = note.duration_secs,
            "Note on"
        );
        Ok(())
    }

    fn stop_note(&mut self, note: &str) -> Result<(), PlayerError> {
        info!(note, "Note off");
        Ok(())
    }

    fn stop_all_notes(&mut self) -> Result<(), PlayerError> {
        info!("All notes off");
        Ok(())
    }
}

/// Records calls into a shared log. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingPlayer {
    calls: Arc<Mutex<Vec<PlayerCommand>>>,
}

impl RecordingPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every call so far
    pub fn calls(&self) -> Vec<PlayerCommand> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Notes started so far, in call order
    pub fn played(&self) -> Vec<NotePlay> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlayerCommand::Play(note) => Some(note),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn record(&self, command: PlayerCommand) -> Result<(), PlayerError> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| PlayerError::Backend("call log poisoned".into()))?;
        calls.push(command);
        Ok(())
    }
}

impl Player for RecordingPlayer {
    fn play_note(&mut self, note: &NotePlay) -> Result<(), PlayerError> {
        self.record(PlayerCommand::Play(note.clone()))
    }

    fn stop_note(&mut self, note: &str) -> Result<(), PlayerError> {
        self.record(PlayerCommand::Stop(note.to_string()))
    }

    fn stop_all_notes(&mut self) -> Result<(), PlayerError> {
        self.record(PlayerCommand::StopAll)
    }
}

/// Sends calls over a channel so a slow sink runs off the scheduling thread
#[derive(Debug, Clone)]
pub struct ChannelPlayer {
    tx: Sender<PlayerCommand>,
}

impl ChannelPlayer {
    pub fn new(tx: Sender<PlayerCommand>) -> Self {
        Self { tx }
    }

    /// Unbounded channel pair
    pub fn channel() -> (Self, Receiver<PlayerCommand>) {
        let (tx, rx) = unbounded();
        (Self::new(tx), rx)
    }

    /// Spawn a worker thread applying commands to `sink`. The worker exits
    /// once every sender is dropped.
    pub fn spawn<P>(mut sink: P) -> (Self, JoinHandle<()>)
    where
        P: Player + Send + 'static,
    {
        let (player, rx) = Self::channel();
        let handle = thread::spawn(move || {
            for command in rx.iter() {
                if let Err(err) = command.apply(&mut sink) {
                    error!(%err, ?command, "Player worker command failed");
                }
            }
        });
        (player, handle)
    }

    fn send(&self, command: PlayerCommand) -> Result<(), PlayerError> {
        self.tx.send(command).map_err(|_| PlayerError::Disconnected)
    }
}

impl Player for ChannelPlayer {
    fn play_note(&mut self, note: &NotePlay) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Play(note.clone()))
    }

    fn stop_note(&mut self, note: &str) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Stop(note.to_string()))
    }

    fn stop_all_notes(&mut self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::StopAll)
    }
}
