//! chordpad: compile and play chord progressions driven by rhythmic patterns

mod config;
mod project;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chordpad_core::{BasicTheory, CompileOptions, ScaleMode, compile_with_seed, diatonic_chords};
use chordpad_services::{
    ChannelPlayer, Clock, LogPlayer, PlaybackEngine, Player, Session, SessionEvent, SystemClock,
};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "chordpad")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Chord progression composer", long_about = None)]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the compiled performance of a project as JSON
    Compile {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,

        /// Velocity seed (overrides the config)
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Play a project in real time through the logging sink
    Play {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,
    },
    /// List the diatonic triads of a scale
    Chords {
        /// Scale root, e.g. "D" or "Bb"
        root: String,
        /// Mode name, e.g. "major", "dorian", "harmonic minor"
        #[arg(default_value = "major")]
        mode: String,
    },
}

/// Longest sleep between event-loop turns
const MAX_IDLE: Duration = Duration::from_millis(5);

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chordpad=info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config(),
    };
    debug!(?config, "Loaded config");

    match args.command {
        Commands::Compile { project, seed } => run_compile(&config, &project, seed),
        Commands::Play { project } => run_play(&config, &project),
        Commands::Chords { root, mode } => run_chords(&root, &mode),
    }
}

fn run_compile(config: &AppConfig, path: &Path, seed: Option<u64>) -> Result<()> {
    let project = project::load_project(path, &BasicTheory)?;
    let options = CompileOptions { ppq: config.session.ppq };
    let seed = seed.or(config.session.seed).unwrap_or(0);
    let notes = compile_with_seed(&project.progression, &project.pattern, &options, seed);

    let json = serde_json::to_string_pretty(&notes).context("Failed to serialize performance")?;
    println!("{json}");
    Ok(())
}

fn run_play(config: &AppConfig, path: &Path) -> Result<()> {
    let project = project::load_project(path, &BasicTheory)?;
    let (player, worker) = ChannelPlayer::spawn(LogPlayer);

    let mut session = Session::new(SystemClock::new(), player, config.session.clone());
    let events = session.subscribe();
    session.set_progression(project.progression);
    session.set_pattern(project.pattern);
    session.play();

    if !session.is_playing() {
        info!("Nothing to play");
    }

    while session.is_playing() {
        session.poll();
        for event in events.try_iter() {
            if let SessionEvent::PerformanceCompiled { notes, duration_ms } = event {
                info!(notes, duration_ms, "Performance ready");
            }
        }

        thread::sleep(idle_time(session.engine()));
    }

    info!("Playback finished");
    drop(session);
    worker
        .join()
        .map_err(|_| anyhow!("Player worker panicked"))?;
    Ok(())
}

/// Time until the engine's next timer, capped at [`MAX_IDLE`]
fn idle_time<C: Clock, P: Player>(engine: &PlaybackEngine<C, P>) -> Duration {
    let now = engine.clock().now_ms();
    engine
        .next_due_ms()
        .map(|due| Duration::from_secs_f64(((due - now) / 1000.0).max(0.0)))
        .unwrap_or(MAX_IDLE)
        .min(MAX_IDLE)
}

fn run_chords(root: &str, mode: &str) -> Result<()> {
    let mode = ScaleMode::from_name(mode).with_context(|| format!("Unknown mode: {mode}"))?;
    let chords = diatonic_chords(root, mode)?;
    if chords.is_empty() {
        println!("{} {} has no diatonic triads", root, mode.name());
        return Ok(());
    }
    println!("{}", chords.join(" "));
    Ok(())
}
