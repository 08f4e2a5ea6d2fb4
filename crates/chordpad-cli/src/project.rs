//! TOML project files

use std::path::Path;

use anyhow::{Context, Result, bail};
use chordpad_core::progression::{DEFAULT_BPM, DEFAULT_MAX_VELOCITY, DEFAULT_MIN_VELOCITY};
use chordpad_core::{ChordTheory, Pattern, PatternId, Progression, SignalSpec, ToneId, Voicing};
use serde::Deserialize;
use tracing::debug;

fn default_bpm() -> f64 {
    DEFAULT_BPM
}

fn default_beats() -> f64 {
    4.0
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectFile {
    #[serde(default = "default_bpm")]
    pub bpm: f64,
    #[serde(default)]
    pub steps: Vec<StepEntry>,
    #[serde(default)]
    pub pattern: PatternEntry,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StepEntry {
    pub chord: Option<String>,
    #[serde(default)]
    pub rest: bool,
    #[serde(default = "default_beats")]
    pub beats: f64,
    pub voicing: Option<Voicing>,
    #[serde(default)]
    pub inversion: u8,
    #[serde(default)]
    pub octave: i8,
    pub min_velocity: Option<u8>,
    pub max_velocity: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PatternEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_beats")]
    pub length_beats: f64,
    #[serde(default)]
    pub signals: Vec<SignalEntry>,
}

impl Default for PatternEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            length_beats: default_beats(),
            signals: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SignalEntry {
    pub tone: ToneId,
    pub start: u32,
    pub end: u32,
    #[serde(default)]
    pub min_velocity: u8,
    #[serde(default)]
    pub max_velocity: u8,
    #[serde(default)]
    pub muted: bool,
}

/// A loaded project, ready for a session
pub(crate) struct Project {
    pub progression: Progression,
    pub pattern: Pattern,
}

impl ProjectFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid project file")
    }

    /// Build the progression and pattern, deriving chord voicings with `theory`
    pub fn build(&self, theory: &dyn ChordTheory) -> Result<Project> {
        let mut progression = Progression::new(self.bpm);

        for (index, entry) in self.steps.iter().enumerate() {
            let id = match (&entry.chord, entry.rest) {
                (_, true) => progression.add_rest(entry.beats),
                (Some(symbol), false) => progression
                    .add_chord(theory, symbol, entry.beats)
                    .with_context(|| format!("Step {}", index + 1))?,
                (None, false) => bail!("Step {} needs a chord or rest = true", index + 1),
            };
            if entry.rest {
                continue;
            }

            if let Some(voicing) = entry.voicing {
                progression.set_voicing(theory, id, voicing)?;
            }
            if entry.inversion != 0 {
                progression.set_inversion(theory, id, entry.inversion)?;
            }
            if entry.octave != 0 {
                progression.set_octave_offset(theory, id, entry.octave)?;
            }
            if entry.min_velocity.is_some() || entry.max_velocity.is_some() {
                progression.set_velocity_range(
                    id,
                    entry.min_velocity.unwrap_or(DEFAULT_MIN_VELOCITY),
                    entry.max_velocity.unwrap_or(DEFAULT_MAX_VELOCITY),
                )?;
            }
        }

        let mut pattern = Pattern::new(PatternId(1), self.pattern.length_beats);
        pattern.name = self.pattern.name.clone();
        for signal in &self.pattern.signals {
            pattern.signals.add_signal(
                SignalSpec::new(signal.tone, signal.start, signal.end)
                    .velocity(signal.min_velocity, signal.max_velocity)
                    .muted(signal.muted),
            );
        }

        debug!(
            steps = progression.len(),
            signals = pattern.signals.len(),
            "Project built"
        );
        Ok(Project { progression, pattern })
    }
}

pub(crate) fn load_project(path: &Path, theory: &dyn ChordTheory) -> Result<Project> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read project {}", path.display()))?;
    ProjectFile::parse(&text)
        .and_then(|file| file.build(theory))
        .with_context(|| format!("Failed to load project {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chordpad_core::BasicTheory;

    const PROJECT: &str = r#"
bpm = 90

[[steps]]
chord = "Am7"
beats = 2
voicing = "Open"

[[steps]]
rest = true
beats = 1

[[steps]]
chord = "G"
inversion = 1
max_velocity = 90

[pattern]
name = "Pulse"
length_beats = 1

[[pattern.signals]]
tone = "T0"
start = 0
end = 2

[[pattern.signals]]
tone = "N2+1"
start = 2
end = 4
min_velocity = 100
max_velocity = 110
"#;

    #[test]
    fn test_build_project() {
        let project = ProjectFile::parse(PROJECT).unwrap().build(&BasicTheory).unwrap();
        let steps = project.progression.steps();
        assert_eq!(project.progression.bpm(), 90.0);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].voicing, Voicing::Open);
        assert!(steps[1].is_rest);
        assert_eq!(steps[2].inversion, 1);
        assert_eq!((steps[2].min_velocity, steps[2].max_velocity), (DEFAULT_MIN_VELOCITY, 90));

        assert_eq!(project.pattern.name, "Pulse");
        assert_eq!(project.pattern.length_beats(), 1.0);
        assert_eq!(project.pattern.signals.len(), 2);
        assert!(project.pattern.signals.row(ToneId::new(1, 1)).is_some());
    }

    #[test]
    fn test_step_without_chord_is_rejected() {
        let file = ProjectFile::parse("[[steps]]\nbeats = 2\n").unwrap();
        assert!(file.build(&BasicTheory).is_err());
    }

    #[test]
    fn test_unknown_chord_is_rejected() {
        let file = ProjectFile::parse("[[steps]]\nchord = \"Cwhat\"\n").unwrap();
        assert!(file.build(&BasicTheory).is_err());
    }

    #[test]
    fn test_bad_tone_id_is_a_parse_error() {
        let text = "[[pattern.signals]]\ntone = \"X1\"\nstart = 0\nend = 1\n";
        assert!(ProjectFile::parse(text).is_err());
    }
}
