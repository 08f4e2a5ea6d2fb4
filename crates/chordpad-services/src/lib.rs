//! chordpad-services: Playback scheduling, note sinks and the editing session

pub mod clock;
pub mod engine;
pub mod player;
pub mod session;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineConfig, NoteKey, PlaybackEngine};
pub use player::{ChannelPlayer, LogPlayer, NotePlay, Player, PlayerCommand, PlayerError, RecordingPlayer};
pub use session::{Session, SessionConfig, SessionEvent};
pub use timer::{TimerHandle, TimerQueue};
