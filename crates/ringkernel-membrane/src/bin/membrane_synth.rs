//! membrane-synth - render a struck membrane to a WAV file or the speakers.
//!
//! # Examples
//!
//! ```bash
//! # Render two seconds of the built-in plate
//! membrane-synth --seconds 2 --wav plate.wav
//!
//! # Load a model file, prefer an NVIDIA adapter, override a coefficient
//! membrane-synth models/plate.json --device nvidia,any --set lambda_two=0.2 --wav out.wav
//!
//! # Listen at two cells and mix them
//! membrane-synth models/plate.json --output 6,8 --listen 18,8 --wav mix.wav
//!
//! # Real-time playback (requires the device-output feature)
//! membrane-synth --play --strike-every 0.5
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ringkernel_membrane::config::{DEFAULT_BLOCK_CAPACITY, DEFAULT_SAMPLE_RATE};
use ringkernel_membrane::device::enumerate_adapters;
use ringkernel_membrane::exciter::DEFAULT_FREQUENCY;
use ringkernel_membrane::playback::Playback;
use ringkernel_membrane::prelude::*;

/// GPU-resident FDTD membrane synthesizer
#[derive(Parser)]
#[command(name = "membrane-synth")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Model description file (default: built-in rectangular plate)
    model: Option<PathBuf>,

    /// Width of the built-in plate in cells
    #[arg(long, default_value_t = 64)]
    width: u32,

    /// Height of the built-in plate in cells
    #[arg(long, default_value_t = 48)]
    height: u32,

    /// Boundary gain applied to edge cells
    #[arg(long, default_value_t = 1.0)]
    boundary: f32,

    /// Excitation cell as x,y
    #[arg(long, value_parser = parse_position)]
    input: Option<(u32, u32)>,

    /// Listener cell as x,y
    #[arg(long, value_parser = parse_position)]
    output: Option<(u32, u32)>,

    /// Additional listener cell as x,y, summed into the output (repeatable)
    #[arg(long, value_parser = parse_position)]
    listen: Vec<(u32, u32)>,

    /// Seconds to render
    #[arg(short, long, default_value_t = 2.0)]
    seconds: f32,

    /// Samples per block
    #[arg(short, long, default_value_t = DEFAULT_BLOCK_CAPACITY)]
    block_size: usize,

    /// Sample rate in Hz
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    /// Adapter preference, comma-separated (discrete, integrated, cpu, any, nvidia, amd, intel)
    #[arg(short, long)]
    device: Option<DevicePreference>,

    /// Coefficient override as name=value (repeatable)
    #[arg(long = "set", value_parser = parse_coefficient)]
    coefficients: Vec<(String, f32)>,

    /// Exciter frequency in Hz
    #[arg(long, default_value_t = DEFAULT_FREQUENCY)]
    frequency: f32,

    /// Exciter burst length in milliseconds
    #[arg(long, default_value_t = 10)]
    excite_ms: u32,

    /// Re-strike interval in seconds (0 strikes once)
    #[arg(long, default_value_t = 0.0)]
    strike_every: f32,

    /// Output WAV file
    #[arg(short, long)]
    wav: Option<PathBuf>,

    /// Log field energy every N blocks (0 disables)
    #[arg(long, default_value_t = 0)]
    snapshot_every: usize,

    /// Play through the default audio device instead of rendering offline
    #[arg(long)]
    play: bool,

    /// List compute adapters and exit
    #[arg(long)]
    list_devices: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn parse_position(s: &str) -> std::result::Result<(u32, u32), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y, got '{s}'"))?;
    let x = x.trim().parse().map_err(|e| format!("bad x '{x}': {e}"))?;
    let y = y.trim().parse().map_err(|e| format!("bad y '{y}': {e}"))?;
    Ok((x, y))
}

fn parse_coefficient(s: &str) -> std::result::Result<(String, f32), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    let value = value
        .trim()
        .parse()
        .map_err(|e| format!("bad value for '{name}': {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

/// Rectangular plate of region 1 inside an empty ring.
fn builtin_plate(width: u32, height: u32) -> ModelDescription {
    let mut ids = Grid::new(width, height);
    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            ids[(x, y)] = 1;
        }
    }

    let mut description = ModelDescription::new(&ids, DEFAULT_MEMBRANE_KERNEL);
    if let Some(controller) = description.controllers.first_mut() {
        controller.coefficients = MembraneCoefficients::default()
            .as_pairs()
            .iter()
            .map(|&(name, value)| (name.to_string(), value))
            .collect();
    }
    description
}

/// Logs field energy instead of drawing.
struct EnergyLog {
    block: usize,
}

impl FieldRenderer for EnergyLog {
    fn render(&mut self, snapshot: &FieldSnapshot<'_>) {
        info!(
            "Block {}: field energy {:.6}, peak {:.6}",
            self.block,
            snapshot.energy(),
            snapshot.peak()
        );
    }
}

fn log_snapshot(engine: &mut Engine, block: usize) -> Result<()> {
    engine.render_simulation(&mut EnergyLog { block })
}

fn strike_interval(cli: &Cli) -> Option<usize> {
    if cli.strike_every > 0.0 {
        Some(((cli.strike_every * cli.sample_rate as f32) as usize).max(1))
    } else {
        None
    }
}

fn render_offline(cli: &Cli, engine: &mut Engine, exciter: &mut WavetableExciter) -> Result<()> {
    let total = (cli.seconds.max(0.0) * cli.sample_rate as f32) as usize;
    let block_size = engine.block_capacity();
    let strike = strike_interval(cli);

    let mut writer = match &cli.wav {
        Some(path) => {
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate: cli.sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            };
            Some(
                hound::WavWriter::create(path, spec)
                    .map_err(|e| EngineError::wav(format!("{}: {}", path.display(), e)))?,
            )
        }
        None => None,
    };

    let mut excitation = vec![0.0f32; block_size];
    let mut output = vec![0.0f32; block_size];
    let mut rendered = 0usize;
    let mut block = 0usize;
    let mut peak = 0.0f32;

    exciter.trigger();
    while rendered < total {
        let n = (total - rendered).min(block_size);

        for (i, sample) in excitation[..n].iter_mut().enumerate() {
            if let Some(interval) = strike {
                if rendered + i > 0 && (rendered + i) % interval == 0 {
                    exciter.trigger();
                }
            }
            *sample = exciter.next_sample();
        }

        match engine.fill_block(&excitation[..n], &mut output[..n]) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                warn!("Block {} replaced by silence: {}", block, e);
                output[..n].fill(0.0);
            }
            Err(e) => return Err(e),
        }

        if let Some(writer) = writer.as_mut() {
            for &sample in &output[..n] {
                writer.write_sample(sample).map_err(|e| EngineError::wav(e.to_string()))?;
            }
        }
        peak = output[..n].iter().fold(peak, |acc, s| acc.max(s.abs()));

        block += 1;
        if cli.snapshot_every > 0 && block % cli.snapshot_every == 0 {
            log_snapshot(engine, block)?;
        }
        rendered += n;
    }

    if let Some(writer) = writer {
        writer.finalize().map_err(|e| EngineError::wav(e.to_string()))?;
    }

    let stats = engine.stats();
    info!(
        "Rendered {} samples in {} blocks (peak {:.4}, mean block {:?}, max {:?}, {} over budget)",
        rendered,
        stats.blocks,
        peak,
        stats.mean_duration(),
        stats.max_duration,
        stats.over_budget
    );
    Ok(())
}

async fn play(cli: &Cli, engine: Engine, exciter: WavetableExciter) -> Result<()> {
    let engine = Arc::new(Mutex::new(engine));
    let exciter = Arc::new(Mutex::new(exciter));
    let playback = Playback::start(engine.clone(), exciter)?;
    playback.trigger();

    let tick = Duration::from_millis(50);
    let total = Duration::from_secs_f32(cli.seconds.max(0.0));
    let strike = (cli.strike_every > 0.0).then(|| Duration::from_secs_f32(cli.strike_every));
    let mut elapsed = Duration::ZERO;
    let mut since_strike = Duration::ZERO;
    let mut ticks = 0usize;

    while elapsed < total {
        tokio::time::sleep(tick).await;
        elapsed += tick;
        since_strike += tick;
        ticks += 1;

        if let Some(interval) = strike {
            if since_strike >= interval {
                playback.trigger();
                since_strike = Duration::ZERO;
            }
        }
        if cli.snapshot_every > 0 && ticks % cli.snapshot_every == 0 {
            let mut engine = engine.lock();
            if let Err(e) = log_snapshot(&mut engine, ticks) {
                warn!("Snapshot failed: {}", e);
            }
        }
    }

    let engine = engine.lock();
    let stats = engine.stats();
    info!(
        "Played {} blocks ({} failed, {} over budget)",
        stats.blocks, stats.failed_blocks, stats.over_budget
    );
    Ok(())
}

fn list_devices() {
    let adapters = enumerate_adapters();
    if adapters.is_empty() {
        println!("No compute adapters found");
        return;
    }
    for (i, adapter) in adapters.iter().enumerate() {
        let vendor = adapter
            .vendor
            .map(|v| format!("{v:?}"))
            .unwrap_or_else(|| "unknown vendor".to_string());
        println!("[{i}] {adapter} - {vendor}");
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.list_devices {
        list_devices();
        return Ok(());
    }

    let mut config = EngineConfig::default()
        .with_block_capacity(cli.block_size)
        .with_sample_rate(cli.sample_rate);
    if let Some(preference) = cli.device.clone() {
        config = config.with_device_preference(preference);
    }

    let description = match &cli.model {
        Some(path) => ModelDescription::from_file(path)?,
        None => builtin_plate(cli.width, cli.height),
    };
    let (width, height) = (description.width(), description.height());
    let input = cli.input.unwrap_or((width / 4, height / 2));
    let output = cli.output.unwrap_or((width * 3 / 4, height / 2));

    let mut engine = Engine::initialize(config).await?;
    if let Some(info) = engine.adapter_info() {
        info!("Adapter: {} ({:?}, {:?})", info.name, info.device_type, info.backend);
    }

    engine
        .create_model_from_description(&description, cli.boundary, input, output)
        .await?;
    for &(x, y) in &cli.listen {
        engine.add_output_position(x, y)?;
    }
    for (name, value) in &cli.coefficients {
        engine.update_coefficient(name, *value)?;
    }

    let mut exciter = WavetableExciter::sine(cli.sample_rate);
    exciter.set_frequency(cli.frequency);
    exciter.set_duration(cli.excite_ms);

    if cli.play {
        play(&cli, engine, exciter).await
    } else {
        render_offline(&cli, &mut engine, &mut exciter)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
