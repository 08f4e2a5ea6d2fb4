//! Editing session: owns the progression, pattern and engine, and keeps the
//! engine's performance in step with edits.

use chordpad_core::{
    BasicTheory, ChordTheory, CompileOptions, Pattern, PerformedNote, Progression, Result, SignalId,
    SignalSpec, SignalUpdate, StepId, ToneId, TransportState, DEFAULT_PPQ, compile,
};
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::engine::{EngineConfig, PlaybackEngine};
use crate::player::Player;

/// Session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Ticks per quarter note for compiled output
    pub ppq: u32,
    /// Minimum spacing between recompiles
    pub recompile_interval_ms: f64,
    /// Fixed velocity seed; random when unset
    pub seed: Option<u64>,
    pub engine: EngineConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ppq: DEFAULT_PPQ,
            recompile_interval_ms: 100.0,
            seed: None,
            engine: EngineConfig::default(),
        }
    }
}

/// Change notifications
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ProgressionChanged,
    PatternChanged,
    PerformanceCompiled { notes: usize, duration_ms: f64 },
    TransportChanged(TransportState),
}

pub struct Session<C: Clock, P: Player> {
    config: SessionConfig,
    theory: Box<dyn ChordTheory>,
    progression: Progression,
    pattern: Pattern,
    engine: PlaybackEngine<C, P>,
    rng: fastrand::Rng,
    dirty: bool,
    last_compile_ms: Option<f64>,
    subscribers: Vec<Sender<SessionEvent>>,
}

impl<C: Clock, P: Player> Session<C, P> {
    pub fn new(clock: C, player: P, config: SessionConfig) -> Self {
        let rng = config.seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);
        Self {
            engine: PlaybackEngine::new(clock, player, config.engine),
            config,
            theory: Box::new(BasicTheory),
            progression: Progression::default(),
            pattern: Pattern::default(),
            rng,
            dirty: true,
            last_compile_ms: None,
            subscribers: Vec::new(),
        }
    }

    /// Replace the chord theory provider
    pub fn with_theory(mut self, theory: Box<dyn ChordTheory>) -> Self {
        self.theory = theory;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn theory(&self) -> &dyn ChordTheory {
        self.theory.as_ref()
    }

    pub fn progression(&self) -> &Progression {
        &self.progression
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn engine(&self) -> &PlaybackEngine<C, P> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PlaybackEngine<C, P> {
        &mut self.engine
    }

    /// Performance currently loaded in the engine
    pub fn performance(&self) -> &[PerformedNote] {
        self.engine.performance()
    }

    /// True when edits are waiting for a recompile
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Receive change notifications. Dropped receivers are pruned on publish.
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // --- Editing ---

    /// Replace the whole progression
    pub fn set_progression(&mut self, progression: Progression) {
        self.progression = progression;
        self.progression_changed();
    }

    /// Replace the whole pattern
    pub fn set_pattern(&mut self, pattern: Pattern) {
        self.pattern = pattern;
        self.pattern_changed();
    }

    /// Edit the progression in place with access to the chord theory
    pub fn with_progression<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut Progression, &dyn ChordTheory) -> R,
    {
        let result = f(&mut self.progression, self.theory.as_ref());
        self.progression_changed();
        result
    }

    /// Edit the pattern in place
    pub fn with_pattern<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut Pattern) -> R,
    {
        let result = f(&mut self.pattern);
        self.pattern_changed();
        result
    }

    pub fn add_chord(&mut self, symbol: &str, beats: f64) -> Result<StepId> {
        self.with_progression(|p, theory| p.add_chord(theory, symbol, beats))
    }

    pub fn add_rest(&mut self, beats: f64) -> StepId {
        self.with_progression(|p, _| p.add_rest(beats))
    }

    pub fn remove_step(&mut self, id: StepId) -> bool {
        self.with_progression(|p, _| p.remove_step(id).is_some())
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.with_progression(|p, _| p.set_bpm(bpm));
    }

    pub fn add_signal(&mut self, spec: SignalSpec) -> SignalId {
        self.with_pattern(|p| p.signals.add_signal(spec))
    }

    pub fn remove_signal(&mut self, id: SignalId) -> bool {
        self.with_pattern(|p| p.signals.remove_signal(id).is_some())
    }

    pub fn update_signal(&mut self, id: SignalId, update: SignalUpdate) -> Result<()> {
        self.with_pattern(|p| p.signals.update_signal(id, update))
    }

    pub fn move_signal(
        &mut self,
        id: SignalId,
        tone_id: Option<ToneId>,
        start_division: Option<u32>,
        end_division: Option<u32>,
    ) -> Result<()> {
        self.with_pattern(|p| p.signals.move_signal(id, tone_id, start_division, end_division))
    }

    pub fn set_pattern_length(&mut self, beats: f64) {
        self.with_pattern(|p| p.set_length_beats(beats));
    }

    fn progression_changed(&mut self) {
        self.dirty = true;
        self.publish(SessionEvent::ProgressionChanged);
    }

    fn pattern_changed(&mut self) {
        self.dirty = true;
        self.publish(SessionEvent::PatternChanged);
    }

    // --- Compilation ---

    /// Compile now and hand the result to the engine
    pub fn recompile(&mut self) {
        let options = CompileOptions { ppq: self.config.ppq };
        let notes = compile(&self.progression, &self.pattern, &options, &mut self.rng);
        let count = notes.len();

        self.engine.set_expected_duration_ms(self.progression.duration_ms());
        self.engine.set_performance(notes);
        self.dirty = false;
        self.last_compile_ms = Some(self.engine.clock().now_ms());

        let duration_ms = self.engine.duration_ms();
        info!(notes = count, duration_ms, "Recompiled performance");
        self.publish(SessionEvent::PerformanceCompiled { notes: count, duration_ms });
    }

    fn recompile_due(&self, now_ms: f64) -> bool {
        self.dirty
            && self
                .last_compile_ms
                .is_none_or(|last| now_ms - last >= self.config.recompile_interval_ms)
    }

    /// Event-loop turn: recompile if edits are pending and the throttle has
    /// elapsed, then fire due engine timers.
    pub fn poll(&mut self) -> usize {
        let now = self.engine.clock().now_ms();
        if self.recompile_due(now) {
            self.recompile();
        }

        let before = self.engine.state();
        let fired = self.engine.poll();
        self.transport_changed(before);
        fired
    }

    // --- Transport ---

    /// Start from the beginning, compiling first if edits are pending
    pub fn play(&mut self) {
        if self.dirty {
            self.recompile();
        }
        let before = self.engine.state();
        self.engine.start();
        self.transport_changed(before);
    }

    pub fn stop(&mut self) {
        let before = self.engine.state();
        self.engine.stop();
        self.transport_changed(before);
    }

    pub fn pause(&mut self) {
        let before = self.engine.state();
        self.engine.pause();
        self.transport_changed(before);
    }

    pub fn resume(&mut self) {
        if self.dirty {
            self.recompile();
        }
        let before = self.engine.state();
        self.engine.resume();
        self.transport_changed(before);
    }

    pub fn seek(&mut self, position_ms: f64) {
        self.engine.seek(position_ms);
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    pub fn current_time_ms(&self) -> f64 {
        self.engine.current_time_ms()
    }

    pub fn duration_ms(&self) -> f64 {
        self.engine.duration_ms()
    }

    fn transport_changed(&mut self, before: TransportState) {
        let after = self.engine.state();
        if after != before {
            debug!(?before, ?after, "Transport state changed");
            self.publish(SessionEvent::TransportChanged(after));
        }
    }
}
