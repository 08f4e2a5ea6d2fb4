//! Playback engine for compiled performances
//!
//! Keeps a wall-clock position, arms note timers a short lookahead ahead of
//! real time and drives a [`Player`]. Everything runs on the caller's thread:
//! [`PlaybackEngine::poll`] is the event-loop turn that fires due timers.

use std::collections::HashMap;

use chordpad_core::{PerformedNote, SignalId, Transport, TransportState, performance_end_ms};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::clock::Clock;
use crate::player::{NotePlay, Player};
use crate::timer::{TimerHandle, TimerQueue};

/// Scheduling intervals, all in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the scheduling tick
    pub tick_interval_ms: f64,
    /// How far ahead of the position notes are armed
    pub lookahead_ms: f64,
    /// Delay after a note ends before it may be armed again
    pub cleanup_margin_ms: f64,
    /// Slack past the end before playback stops itself
    pub end_grace_ms: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50.0,
            lookahead_ms: 200.0,
            cleanup_margin_ms: 10.0,
            end_grace_ms: 100.0,
        }
    }
}

/// Shortest tick period; a zero period would re-arm the tick forever
const MIN_TICK_INTERVAL_MS: f64 = 1.0;

impl EngineConfig {
    /// Clamp intervals into a range the scheduler can run with
    pub fn sanitized(self) -> Self {
        Self {
            tick_interval_ms: self.tick_interval_ms.max(MIN_TICK_INTERVAL_MS),
            lookahead_ms: self.lookahead_ms.max(0.0),
            cleanup_margin_ms: self.cleanup_margin_ms.max(0.0),
            end_grace_ms: self.end_grace_ms.max(0.0),
        }
    }
}

/// One occurrence of a signal: (signal, repetition)
pub type NoteKey = (SignalId, u32);

#[derive(Debug, Clone, PartialEq)]
enum TimerTask {
    Tick,
    NoteOn { key: NoteKey, play: NotePlay },
    NoteRelease { key: NoteKey, note: String },
    Cleanup { key: NoteKey },
}

#[derive(Debug)]
struct Timer {
    /// Transport generation at arming
    generation: u64,
    task: TimerTask,
}

/// Schedules a performance against a clock and a player
pub struct PlaybackEngine<C: Clock, P: Player> {
    clock: C,
    player: P,
    config: EngineConfig,
    transport: Transport,
    performance: Vec<PerformedNote>,
    expected_duration_ms: f64,
    timers: TimerQueue<Timer>,
    tick_timer: Option<TimerHandle>,
    /// Occurrences armed in this pass and their pending timers
    scheduled: HashMap<NoteKey, Vec<TimerHandle>>,
    /// Started notes not yet released, with overlap counts
    sounding: HashMap<String, u32>,
    generation: u64,
}

impl<C: Clock, P: Player> PlaybackEngine<C, P> {
    pub fn new(clock: C, player: P, config: EngineConfig) -> Self {
        Self {
            clock,
            player,
            config: config.sanitized(),
            transport: Transport::new(),
            performance: Vec::new(),
            expected_duration_ms: 0.0,
            timers: TimerQueue::new(),
            tick_timer: None,
            scheduled: HashMap::new(),
            sounding: HashMap::new(),
            generation: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }

    pub fn performance(&self) -> &[PerformedNote] {
        &self.performance
    }

    /// Swap in a new performance. Transport is untouched; already armed
    /// notes play as scheduled and new content is picked up on the next tick.
    pub fn set_performance(&mut self, notes: Vec<PerformedNote>) {
        debug!(notes = notes.len(), "Performance updated");
        self.performance = notes;
    }

    /// Length the progression is expected to run for
    pub fn set_expected_duration_ms(&mut self, ms: f64) {
        self.expected_duration_ms = ms.max(0.0);
    }

    /// Larger of the expected duration and the last note end
    pub fn duration_ms(&self) -> f64 {
        self.expected_duration_ms.max(performance_end_ms(&self.performance))
    }

    pub fn state(&self) -> TransportState {
        self.transport.state
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    pub fn current_time_ms(&self) -> f64 {
        self.transport.position_ms(self.clock.now_ms())
    }

    /// Position as MM:SS.ss
    pub fn format_time(&self) -> String {
        self.transport.format_time(self.clock.now_ms())
    }

    /// Play from the beginning
    pub fn start(&mut self) {
        if self.is_playing() {
            warn!("Playback already running, start ignored");
            return;
        }
        if self.performance.is_empty() {
            warn!("Performance is empty, start ignored");
            return;
        }

        self.cancel_timers();
        self.transport.stop();
        let now = self.clock.now_ms();
        self.transport.play(now);
        self.schedule_tick(now, 0.0);
        info!(
            notes = self.performance.len(),
            duration_ms = self.duration_ms(),
            "Playback started"
        );
    }

    /// Stop from Playing or Paused, release sounding notes and rewind
    pub fn stop(&mut self) {
        if self.transport.state == TransportState::Idle {
            debug!("Playback already stopped");
            return;
        }
        self.cancel_timers();
        self.release_notes();
        self.transport.stop();
        info!("Playback stopped");
    }

    pub fn pause(&mut self) {
        if !self.is_playing() {
            warn!("Playback not running, pause ignored");
            return;
        }
        let now = self.clock.now_ms();
        self.transport.pause(now);
        self.cancel_timers();
        self.release_notes();
        info!(position_ms = self.transport.position_ms(now), "Playback paused");
    }

    pub fn resume(&mut self) {
        if self.transport.state != TransportState::Paused {
            warn!(state = ?self.transport.state, "Playback not paused, resume ignored");
            return;
        }
        if self.performance.is_empty() {
            warn!("Performance is empty, resume ignored");
            return;
        }
        let now = self.clock.now_ms();
        self.transport.play(now);
        self.schedule_tick(now, 0.0);
        info!(position_ms = self.transport.position_ms(now), "Playback resumed");
    }

    /// Move the position. Playback continues from there when running.
    pub fn seek(&mut self, position_ms: f64) {
        let was_playing = self.is_playing();
        let now = self.clock.now_ms();
        if was_playing {
            self.transport.pause(now);
            self.cancel_timers();
            self.release_notes();
        }

        self.transport.set_position_ms(position_ms, now);
        self.scheduled.clear();

        if was_playing {
            self.transport.play(now);
            self.schedule_tick(now, 0.0);
        }
        debug!(position_ms = self.transport.position_ms(now), was_playing, "Seek");
    }

    /// Fire every due timer. Returns how many fired.
    pub fn poll(&mut self) -> usize {
        let mut fired = 0;
        loop {
            let now = self.clock.now_ms();
            let Some(timer) = self.timers.pop_due(now) else {
                break;
            };
            self.dispatch(timer);
            fired += 1;
        }
        fired
    }

    /// Due time of the next armed timer
    pub fn next_due_ms(&self) -> Option<f64> {
        self.timers.next_due_ms()
    }

    fn dispatch(&mut self, timer: Timer) {
        if timer.generation != self.generation {
            trace!(task = ?timer.task, "Ignoring stale timer");
            return;
        }

        match timer.task {
            TimerTask::Tick => self.tick(),
            TimerTask::NoteOn { key, play } => match self.player.play_note(&play) {
                Ok(()) => {
                    trace!(signal = key.0.0, repetition = key.1, note = %play.note, "Note on");
                    *self.sounding.entry(play.note).or_insert(0) += 1;
                }
                Err(err) => {
                    error!(%err, note = %play.note, signal = key.0.0, "Player failed to start note");
                }
            },
            TimerTask::NoteRelease { key, note } => {
                trace!(signal = key.0.0, repetition = key.1, %note, "Note released");
                if let Some(count) = self.sounding.get_mut(&note) {
                    *count -= 1;
                    if *count == 0 {
                        self.sounding.remove(&note);
                    }
                }
            }
            TimerTask::Cleanup { key } => {
                self.scheduled.remove(&key);
            }
        }
    }

    /// Arm notes inside the lookahead window and re-arm the tick.
    ///
    /// Stops itself once the position passes the expected duration plus the
    /// grace margin. Notes still sounding past that point are released.
    fn tick(&mut self) {
        self.tick_timer = None;
        let now = self.clock.now_ms();
        let position = self.transport.position_ms(now);

        if position > self.expected_duration_ms + self.config.end_grace_ms {
            info!(position_ms = position, "Reached end of performance");
            self.stop();
            return;
        }

        let until = position + self.config.lookahead_ms;
        let due: Vec<PerformedNote> = self
            .performance
            .iter()
            .filter(|n| n.absolute_start_ms >= position && n.absolute_start_ms < until)
            .filter(|n| !self.scheduled.contains_key(&n.occurrence()))
            .cloned()
            .collect();

        if !due.is_empty() {
            trace!(armed = due.len(), position_ms = position, until_ms = until, "Arming notes");
        }
        for note in &due {
            self.arm(note, position, now);
        }

        self.schedule_tick(now, self.config.tick_interval_ms);
    }

    fn arm(&mut self, note: &PerformedNote, position: f64, now: f64) {
        let Some(name) = note.note.clone() else {
            return;
        };
        let key = note.occurrence();
        let start_delay = note.absolute_start_ms - position;
        let end_delay = note.absolute_end_ms - position;
        let play = NotePlay {
            note: name.clone(),
            velocity: note.velocity,
            duration_secs: note.duration_ms() / 1000.0,
        };

        let generation = self.generation;
        let handles = vec![
            self.timers.after(now, start_delay, Timer { generation, task: TimerTask::NoteOn { key, play } }),
            self.timers.after(now, end_delay, Timer { generation, task: TimerTask::NoteRelease { key, note: name } }),
            self.timers.after(
                now,
                end_delay + self.config.cleanup_margin_ms,
                Timer { generation, task: TimerTask::Cleanup { key } },
            ),
        ];
        self.scheduled.insert(key, handles);
    }

    fn schedule_tick(&mut self, now: f64, delay_ms: f64) {
        let timer = Timer { generation: self.generation, task: TimerTask::Tick };
        self.tick_timer = Some(self.timers.after(now, delay_ms, timer));
    }

    /// Cancel the tick and every pending note timer, invalidating anything
    /// still in flight
    fn cancel_timers(&mut self) {
        if let Some(handle) = self.tick_timer.take() {
            self.timers.cancel(handle);
        }
        for (_, handles) in self.scheduled.drain() {
            for handle in handles {
                self.timers.cancel(handle);
            }
        }
        self.generation += 1;
    }

    /// Stop each sounding note, then everything
    fn release_notes(&mut self) {
        let mut notes: Vec<String> = self.sounding.drain().map(|(note, _)| note).collect();
        notes.sort();
        for note in notes {
            if let Err(err) = self.player.stop_note(&note) {
                error!(%err, %note, "Player failed to stop note");
            }
        }
        if let Err(err) = self.player.stop_all_notes() {
            error!(%err, "Player failed to stop all notes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::player::{PlayerCommand, PlayerError, RecordingPlayer};
    use chordpad_core::{StepId, ToneId};

    fn performed(signal: u64, repetition: u32, note: &str, start_ms: f64, end_ms: f64) -> PerformedNote {
        PerformedNote {
            tone_id: ToneId::new(0, 0),
            signal_id: SignalId(signal),
            repetition,
            step_id: StepId(1),
            note: Some(note.to_string()),
            start_division: 0,
            end_division: 0,
            start_ticks: 0,
            end_ticks: 0,
            start_ms,
            end_ms,
            velocity: 80,
            absolute_start_ticks: 0,
            absolute_end_ticks: 0,
            absolute_start_ms: start_ms,
            absolute_end_ms: end_ms,
        }
    }

    fn engine_with(notes: Vec<PerformedNote>) -> (PlaybackEngine<ManualClock, RecordingPlayer>, ManualClock, RecordingPlayer) {
        let clock = ManualClock::new();
        let log = RecordingPlayer::new();
        let mut engine = PlaybackEngine::new(clock.clone(), log.clone(), EngineConfig::default());
        engine.set_expected_duration_ms(performance_end_ms(&notes));
        engine.set_performance(notes);
        (engine, clock, log)
    }

    /// Poll now, then every 10 ms for `ms`
    fn run_for<P: Player>(engine: &mut PlaybackEngine<ManualClock, P>, clock: &ManualClock, ms: f64) {
        engine.poll();
        let mut elapsed = 0.0;
        while elapsed < ms {
            clock.advance_ms(10.0);
            elapsed += 10.0;
            engine.poll();
        }
    }

    fn played_names(log: &RecordingPlayer) -> Vec<String> {
        log.played().into_iter().map(|p| p.note).collect()
    }

    #[test]
    fn test_note_fires_once_at_its_time() {
        let (mut engine, clock, log) = engine_with(vec![performed(1, 0, "C4", 100.0, 600.0)]);
        engine.start();
        assert_eq!(engine.state(), TransportState::Playing);

        run_for(&mut engine, &clock, 90.0);
        assert!(log.played().is_empty());

        run_for(&mut engine, &clock, 20.0);
        assert_eq!(played_names(&log), vec!["C4"]);

        run_for(&mut engine, &clock, 400.0);
        let played = log.played();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].velocity, 80);
        assert!((played[0].duration_secs - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_back_to_back_repetitions_both_fire() {
        let (mut engine, clock, log) = engine_with(vec![
            performed(1, 0, "C4", 0.0, 500.0),
            performed(1, 1, "C4", 500.0, 1000.0),
        ]);
        engine.start();
        run_for(&mut engine, &clock, 900.0);
        assert_eq!(played_names(&log), vec!["C4", "C4"]);
    }

    #[test]
    fn test_auto_stop_after_grace() {
        let (mut engine, clock, log) = engine_with(vec![performed(1, 0, "C4", 0.0, 1000.0)]);
        engine.start();
        run_for(&mut engine, &clock, 1090.0);
        assert!(engine.is_playing());

        run_for(&mut engine, &clock, 100.0);
        assert_eq!(engine.state(), TransportState::Idle);
        assert_eq!(engine.current_time_ms(), 0.0);
        assert_eq!(log.calls().last(), Some(&PlayerCommand::StopAll));
        assert!(engine.next_due_ms().is_none());
    }

    #[test]
    fn test_auto_stop_cuts_notes_running_past_expected_end() {
        let (mut engine, clock, log) = engine_with(vec![performed(1, 0, "C4", 0.0, 2500.0)]);
        engine.set_expected_duration_ms(1000.0);
        assert_eq!(engine.duration_ms(), 2500.0);

        engine.start();
        run_for(&mut engine, &clock, 1200.0);
        assert_eq!(engine.state(), TransportState::Idle);
        assert_eq!(
            log.calls(),
            vec![
                PlayerCommand::Play(NotePlay { note: "C4".into(), velocity: 80, duration_secs: 2.5 }),
                PlayerCommand::Stop("C4".into()),
                PlayerCommand::StopAll,
            ]
        );
    }

    #[test]
    fn test_stop_from_paused_rewinds() {
        let (mut engine, clock, log) = engine_with(vec![performed(1, 0, "C4", 0.0, 1000.0)]);
        engine.start();
        run_for(&mut engine, &clock, 300.0);
        engine.pause();
        log.clear();

        engine.stop();
        assert_eq!(engine.state(), TransportState::Idle);
        assert_eq!(engine.current_time_ms(), 0.0);
        // Pause already released C4; only the blanket stop is repeated
        assert_eq!(log.calls(), vec![PlayerCommand::StopAll]);

        // A second stop is a no-op
        engine.stop();
        assert_eq!(log.calls(), vec![PlayerCommand::StopAll]);
        engine.resume();
        assert_eq!(engine.state(), TransportState::Idle);
    }

    #[test]
    fn test_config_is_clamped() {
        let config = EngineConfig {
            tick_interval_ms: 0.0,
            lookahead_ms: -50.0,
            cleanup_margin_ms: f64::NAN,
            end_grace_ms: -1.0,
        }
        .sanitized();
        assert_eq!(config.tick_interval_ms, MIN_TICK_INTERVAL_MS);
        assert_eq!(config.lookahead_ms, 0.0);
        assert_eq!(config.cleanup_margin_ms, 0.0);
        assert_eq!(config.end_grace_ms, 0.0);
    }

    #[test]
    fn test_zero_tick_interval_still_returns_from_poll() {
        let clock = ManualClock::new();
        let log = RecordingPlayer::new();
        let config = EngineConfig { tick_interval_ms: 0.0, ..Default::default() };
        let mut engine = PlaybackEngine::new(clock.clone(), log.clone(), config);
        assert_eq!(engine.config().tick_interval_ms, MIN_TICK_INTERVAL_MS);

        engine.set_expected_duration_ms(100.0);
        engine.set_performance(vec![performed(1, 0, "C4", 0.0, 100.0)]);
        engine.start();
        assert_eq!(engine.poll(), 2);
        assert_eq!(played_names(&log), vec!["C4"]);
    }

    #[test]
    fn test_pause_releases_and_resume_continues() {
        let (mut engine, clock, log) = engine_with(vec![
            performed(1, 0, "C4", 0.0, 1000.0),
            performed(2, 0, "E4", 600.0, 800.0),
        ]);
        engine.start();
        run_for(&mut engine, &clock, 300.0);
        engine.pause();
        assert_eq!(engine.state(), TransportState::Paused);
        assert_eq!(
            log.calls(),
            vec![
                PlayerCommand::Play(NotePlay { note: "C4".into(), velocity: 80, duration_secs: 1.0 }),
                PlayerCommand::Stop("C4".into()),
                PlayerCommand::StopAll,
            ]
        );

        // Nothing fires while paused, position holds
        clock.advance_ms(5000.0);
        assert_eq!(engine.poll(), 0);
        assert_eq!(engine.current_time_ms(), 300.0);
        assert_eq!(engine.format_time(), "00:00.30");

        engine.resume();
        run_for(&mut engine, &clock, 400.0);
        assert_eq!(played_names(&log), vec!["C4", "E4"]);
    }

    #[test]
    fn test_seek_while_playing() {
        let (mut engine, clock, log) = engine_with(vec![
            performed(1, 0, "C4", 0.0, 400.0),
            performed(2, 0, "E4", 1000.0, 1400.0),
        ]);
        engine.start();
        engine.poll();
        engine.seek(900.0);
        assert!(engine.is_playing());
        assert_eq!(engine.current_time_ms(), 900.0);

        run_for(&mut engine, &clock, 200.0);
        assert_eq!(played_names(&log), vec!["C4", "E4"]);
        assert!(log.calls().contains(&PlayerCommand::Stop("C4".into())));
    }

    #[test]
    fn test_seek_when_idle_only_moves_position() {
        let (mut engine, _clock, log) = engine_with(vec![performed(1, 0, "C4", 0.0, 400.0)]);
        engine.seek(-50.0);
        assert_eq!(engine.current_time_ms(), 0.0);
        engine.seek(300.0);
        assert_eq!(engine.current_time_ms(), 300.0);
        assert_eq!(engine.state(), TransportState::Idle);
        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_live_swap_picks_up_new_notes() {
        let (mut engine, clock, log) = engine_with(vec![performed(1, 0, "C4", 0.0, 200.0)]);
        engine.start();
        run_for(&mut engine, &clock, 100.0);

        engine.set_performance(vec![
            performed(1, 0, "C4", 0.0, 200.0),
            performed(5, 0, "G4", 300.0, 500.0),
        ]);
        engine.set_expected_duration_ms(500.0);
        assert!(engine.is_playing());
        run_for(&mut engine, &clock, 300.0);
        assert_eq!(played_names(&log), vec!["C4", "G4"]);
    }

    #[test]
    fn test_ignored_transport_calls() {
        let (mut engine, _clock, log) = engine_with(Vec::new());
        engine.start();
        assert_eq!(engine.state(), TransportState::Idle);
        engine.stop();
        engine.pause();
        engine.resume();
        assert!(log.calls().is_empty());

        engine.set_performance(vec![performed(1, 0, "C4", 0.0, 100.0)]);
        engine.start();
        engine.start();
        engine.resume();
        assert!(engine.is_playing());
    }

    #[test]
    fn test_duration_covers_expected_and_notes() {
        let (mut engine, _clock, _log) = engine_with(vec![performed(1, 0, "C4", 0.0, 2500.0)]);
        engine.set_expected_duration_ms(2000.0);
        assert_eq!(engine.duration_ms(), 2500.0);
        engine.set_expected_duration_ms(3000.0);
        assert_eq!(engine.duration_ms(), 3000.0);
    }

    #[derive(Default)]
    struct FailingPlayer {
        attempts: u32,
    }

    impl Player for FailingPlayer {
        fn play_note(&mut self, _note: &NotePlay) -> Result<(), PlayerError> {
            self.attempts += 1;
            Err(PlayerError::Backend("device gone".into()))
        }

        fn stop_note(&mut self, _note: &str) -> Result<(), PlayerError> {
            Err(PlayerError::Disconnected)
        }

        fn stop_all_notes(&mut self) -> Result<(), PlayerError> {
            Err(PlayerError::Disconnected)
        }
    }

    #[test]
    fn test_player_failures_do_not_halt_playback() {
        let clock = ManualClock::new();
        let mut engine = PlaybackEngine::new(clock.clone(), FailingPlayer::default(), EngineConfig::default());
        engine.set_performance(vec![
            performed(1, 0, "C4", 0.0, 100.0),
            performed(2, 0, "E4", 100.0, 200.0),
        ]);
        engine.start();
        run_for(&mut engine, &clock, 150.0);
        assert_eq!(engine.player().attempts, 2);
        assert!(engine.is_playing());

        engine.stop();
        assert_eq!(engine.state(), TransportState::Idle);
    }
}
