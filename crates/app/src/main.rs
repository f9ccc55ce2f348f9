use std::{
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use haptic_sequencer_core::{
    interpolate, Actuator, ActuatorKind, AppConfig, CommandIntent, CommandTransport,
    DeliveryFailure, Device, DeviceId, LoopPolicy, PlaybackSession, Script,
};
use tracing_subscriber::EnvFilter;

fn main() -> haptic_sequencer_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play(args) => run_play(args),
        Commands::Inspect { script, samples } => run_inspect(&script, samples),
    }
}

fn run_play(args: PlayArgs) -> haptic_sequencer_core::Result<()> {
    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::live_defaults(),
    };
    let tick_interval = config.driver.tick_interval();
    tracing::info!(script = ?args.script, devices = args.devices, "starting playback");

    let mut session = PlaybackSession::with_config(config, LoggingTransport::default());
    let script = session.load_script_file(&args.script)?;

    let events = session.device_events();
    for id in 1..=args.devices {
        events.device_connected(simulated_device(id));
    }

    if let Some(marker) = args.marker {
        session.set_loop(LoopPolicy::LoopToMarker { marker })?;
    } else if args.loop_to_start {
        session.set_loop(LoopPolicy::LoopToStart)?;
    }
    if let Some(time) = args.seek {
        session.seek(time)?;
    }
    session.set_rate(args.rate)?;
    session.play()?;

    let seconds = args.seconds.unwrap_or_else(|| {
        let remaining = (script.duration() - session.time()).max(0.0);
        remaining / args.rate.abs()
    });
    let run_for = Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("cannot run for {seconds} seconds, pass --seconds explicitly"))?;

    let started = Instant::now();
    let mut last = started;
    while started.elapsed() < run_for {
        thread::sleep(tick_interval);
        let now = Instant::now();
        session.tick(now - last);
        last = now;
    }

    session.stop();
    tracing::info!(
        commands = session.transport().sent,
        batches = session.transport().batches,
        "playback finished"
    );
    Ok(())
}

fn run_inspect(path: &Path, samples: usize) -> haptic_sequencer_core::Result<()> {
    let raw = std::fs::read_to_string(path)?;
    let script = Script::parse(&raw)?;

    println!("duration: {:.3}s", script.duration());
    for channel in script.channels() {
        println!(
            "channel `{}`: kind {}, {} keyframes, ends at {:.3}s",
            channel.id(),
            channel.kind(),
            channel.keyframes().len(),
            channel.end_time()
        );
    }

    let steps = samples.max(2) - 1;
    for step in 0..=steps {
        let time = script.duration() * step as f64 / steps as f64;
        let values: Vec<String> = interpolate::sample_script(&script, time)
            .into_iter()
            .map(|(id, value)| format!("{id}={value:.3}"))
            .collect();
        println!("{time:>8.3}s  {}", values.join("  "));
    }
    Ok(())
}

/// A stand-in toy exposing one actuator of every kind at its default
/// resolution.
fn simulated_device(id: u32) -> Device {
    let actuators = ActuatorKind::ALL
        .iter()
        .enumerate()
        .map(|(index, &kind)| Actuator::new(index as u32, kind, 0))
        .collect();
    Device::new(DeviceId(id), format!("simulated toy {id}"), actuators)
}

/// Transport that writes every command to the log instead of a device.
#[derive(Debug, Default)]
struct LoggingTransport {
    sent: usize,
    batches: usize,
}

impl CommandTransport for LoggingTransport {
    fn send(&mut self, intent: &CommandIntent) -> Result<(), DeliveryFailure> {
        self.sent += 1;
        tracing::info!(
            device = %intent.device,
            actuator = intent.actuator,
            kind = %intent.kind,
            level = intent.level,
            at = intent.playback_time,
            "command"
        );
        Ok(())
    }

    fn send_batch(&mut self, batch: &[CommandIntent]) -> Vec<DeliveryFailure> {
        self.batches += 1;
        tracing::debug!(size = batch.len(), "batch");
        batch
            .iter()
            .filter_map(|intent| self.send(intent).err())
            .collect()
    }

    fn supports_batching(&self) -> bool {
        true
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Haptic pattern sequencer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a script against simulated devices, logging every command.
    Play(PlayArgs),
    /// Print a script's channels and a sampled preview of its values.
    Inspect {
        /// Path to a native or funscript JSON document.
        script: PathBuf,
        /// Number of evenly spaced preview samples.
        #[arg(short, long, default_value_t = 11)]
        samples: usize,
    },
}

#[derive(clap::Args, Debug)]
struct PlayArgs {
    /// Path to a native or funscript JSON document.
    script: PathBuf,
    /// Optional engine configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Number of simulated devices to connect.
    #[arg(short, long, default_value_t = 1)]
    devices: u32,
    /// Playback rate multiplier.
    #[arg(short, long, default_value_t = 1.0, allow_negative_numbers = true)]
    rate: f64,
    /// Start position in seconds.
    #[arg(long)]
    seek: Option<f64>,
    /// Loop back to the start at the end of the script.
    #[arg(long = "loop")]
    loop_to_start: bool,
    /// Loop back to this marker (seconds) instead of the start.
    #[arg(long, conflicts_with = "loop_to_start")]
    marker: Option<f64>,
    /// Wall-clock seconds to run. Defaults to one pass of the script.
    #[arg(long)]
    seconds: Option<f64>,
}
