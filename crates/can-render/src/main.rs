//! Can Damonium offline renderer
//!
//! Usage:
//!   can-render --ir can.wav --input dry.wav --output wet.wav
//!   can-render --ir can.wav --input dry.wav --output wet.wav --block-size 128 --self-test reject
//!
//! Feeds the input file through the engine one block at a time, exactly as
//! an audio host would, and writes the result as 32-bit float WAV.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use can_core::SampleBuffer;
use can_engine::{ConvolutionEngine, EngineConfig, LoadOutcome, SelfTestPolicy};
use can_file::{BitDepth, read_audio, write_wav};
use clap::Parser;

#[derive(Parser)]
#[command(name = "can-render", about = "Render audio through an impulse response")]
struct Cli {
    /// Impulse response (WAV, FLAC or AIFF)
    #[arg(long)]
    ir: PathBuf,

    /// Dry input audio
    #[arg(short, long)]
    input: PathBuf,

    /// Where to write the processed audio
    #[arg(short, long)]
    output: PathBuf,

    /// Samples per simulated audio callback
    #[arg(short, long, default_value_t = 512)]
    block_size: usize,

    /// Engine configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pass audio through untouched
    #[arg(long)]
    bypass: bool,

    /// Keep the IR at its recorded rate
    #[arg(long)]
    no_resample: bool,

    /// Self-test policy: off, diagnostic or reject
    #[arg(long)]
    self_test: Option<SelfTestPolicy>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.block_size == 0 {
        bail!("--block-size must be greater than zero");
    }

    let input = read_audio(&cli.input)
        .and_then(|data| data.into_sample_buffer())
        .with_context(|| format!("Failed to read input {}", cli.input.display()))?;
    let config = engine_config(&cli, input.num_channels())?;

    log::info!(
        "Rendering {} ({} ch, {:.2}s @ {} Hz) through {}",
        cli.input.display(),
        input.num_channels(),
        input.duration_secs(),
        input.sample_rate(),
        cli.ir.display()
    );

    let output = render(&cli, config, input)?;
    write_wav(&cli.output, &output, BitDepth::Float32)
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;

    log::info!("Wrote {}", cli.output.display());
    Ok(())
}

/// Config file (or defaults) with the command-line overrides applied
fn engine_config(cli: &Cli, channels: usize) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.bypass |= cli.bypass;
    if cli.no_resample {
        config.resample_ir_on_load = false;
    }
    if let Some(policy) = cli.self_test {
        config.self_test = policy;
    }
    config.channels = channels;
    Ok(config)
}

fn render(cli: &Cli, config: EngineConfig, input: SampleBuffer) -> Result<SampleBuffer> {
    let sample_rate = input.sample_rate();
    let (mut engine, handle) = ConvolutionEngine::new(config).context("Invalid engine configuration")?;

    engine
        .prepare(sample_rate, cli.block_size)
        .context("Failed to prepare engine")?;

    match handle
        .load_file(&cli.ir)
        .with_context(|| format!("Failed to load IR {}", cli.ir.display()))?
    {
        LoadOutcome::Queued => {}
        other => bail!("Unexpected load outcome {:?}", other),
    }

    if let Some(report) = handle.last_self_test() {
        log::info!("Self-test: {:?}, block RMS {:?}", report.verdict, report.block_rms);
    }

    let mut channels = input.into_channels();
    let len = channels[0].len();

    let mut start = 0;
    while start < len {
        let end = (start + cli.block_size).min(len);
        let mut block: Vec<&mut [f32]> = channels.iter_mut().map(|c| &mut c[start..end]).collect();
        engine.process(&mut block);
        start = end;
    }

    let diagnostics = handle.diagnostics();
    if diagnostics.numeric_faults > 0 {
        log::warn!("{} blocks were zeroed by numeric faults", diagnostics.numeric_faults);
    }
    log::info!("Diagnostics: {}", serde_json::to_string(&diagnostics)?);

    Ok(SampleBuffer::new(channels, sample_rate)?)
}
