use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueHint};
use glob::glob;
use serde_json::to_writer_pretty;
use sonoclip::IngestOptions;
use sonoclip::ingest::Ingestor;
use sonoclip::observability::{MetricsCollector, log_snapshot};
use sonoclip::preprocess::PreprocessMode;
use sonoclip::sink::{SinkConfig, SinkOutcome, VideoFormat};
use sonoclip::video::TerminalDisplay;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing()?;

    let options = build_options(&cli)?;
    let metrics = match cli.command {
        Commands::Info { inputs } => info_command(&inputs, options)?,
        Commands::Export { input, output_dir } => export_command(&input, output_dir, options)?,
        Commands::Encode {
            input,
            output_dir,
            video_format,
            codec,
        } => encode_command(&input, output_dir, video_format, codec, options)?,
        Commands::Play { input } => play_command(&input, options)?,
    };

    report_metrics(&metrics, cli.print_metrics, cli.metrics_json.as_deref())
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr so command output on stdout stays machine readable.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

fn build_options(cli: &Cli) -> Result<IngestOptions> {
    let mut options = match &cli.config {
        Some(path) => IngestOptions::load(path)?,
        None => IngestOptions::default(),
    };
    if let Some(mode) = cli.mode {
        options.mode = mode;
    }
    let flags = &cli.overrides;
    let overrides = &mut options.overrides;
    if let Some(value) = &flags.patient_id {
        overrides.patient_id = Some(value.clone());
    }
    if let Some(value) = &flags.patient_name {
        overrides.patient_name = Some(value.clone());
    }
    if let Some(value) = &flags.procedure {
        overrides.procedure = Some(value.clone());
    }
    if let Some(value) = flags.frame_rate {
        overrides.frame_rate = Some(value);
        overrides.frame_delay_ms = None;
    }
    Ok(options)
}

fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut resolved = Vec::new();
    for pattern in patterns {
        let literal = Path::new(pattern);
        if literal.is_file() {
            resolved.push(literal.to_path_buf());
            continue;
        }
        let matches =
            glob(pattern).with_context(|| format!("Invalid glob pattern: {pattern}"))?;
        let mut found = false;
        for entry in matches {
            let path = entry?;
            if path.is_file() {
                resolved.push(path);
                found = true;
            }
        }
        if !found {
            bail!("No files matched input: {pattern}");
        }
    }
    Ok(resolved)
}

fn info_command(inputs: &[String], options: IngestOptions) -> Result<MetricsCollector> {
    let ingestor = Ingestor::new(options);
    let mut videos = Vec::new();
    for path in expand_inputs(inputs)? {
        let video = ingestor
            .ingest(&path)
            .with_context(|| format!("Failed to ingest {}", path.display()))?;
        info!(
            input = %path.display(),
            kind = ?video.kind(),
            frames = video.len(),
            warnings = video.diagnostics().len(),
            "Source ingested"
        );
        videos.push(video);
    }
    let summaries: Vec<_> = videos.iter().map(|video| video.summary()).collect();
    to_writer_pretty(io::stdout().lock(), &summaries).context("Failed to write summary JSON")?;
    println!();
    Ok(ingestor.metrics())
}

fn export_command(
    input: &Path,
    output_dir: Option<PathBuf>,
    options: IngestOptions,
) -> Result<MetricsCollector> {
    let ingestor = Ingestor::new(options);
    let video = ingestor
        .ingest(input)
        .with_context(|| format!("Failed to ingest {}", input.display()))?;
    if video.is_empty() {
        warn!(input = %input.display(), "No frames to export");
    }
    let target = video
        .save_images(output_dir.as_deref().unwrap_or(Path::new("")))
        .with_context(|| format!("Failed to export frames of {}", input.display()))?;
    println!("{}", target.display());
    Ok(ingestor.metrics())
}

fn encode_command(
    input: &Path,
    output_dir: PathBuf,
    video_format: VideoFormat,
    codec: Option<String>,
    mut options: IngestOptions,
) -> Result<MetricsCollector> {
    options.output = Some(SinkConfig {
        directory: output_dir,
        format: video_format,
        codec,
    });
    let ingestor = Ingestor::new(options);
    let video = ingestor
        .ingest(input)
        .with_context(|| format!("Failed to ingest {}", input.display()))?;
    match video.output() {
        Some(SinkOutcome::Written { path, frames }) => {
            info!(output = %path.display(), frames, "Video encoded");
            println!("{}", path.display());
        }
        Some(SinkOutcome::Discarded { path }) => {
            warn!(output = %path.display(), "No frames encoded; output discarded");
        }
        None if video.metadata().is_none() || !video.is_video() => {
            bail!(
                "{} is not a structured multi-frame recording; nothing to encode",
                input.display()
            );
        }
        None => bail!("No encoded output was produced for {}", input.display()),
    }
    Ok(ingestor.metrics())
}

fn play_command(input: &Path, options: IngestOptions) -> Result<MetricsCollector> {
    let ingestor = Ingestor::new(options);
    let video = ingestor
        .ingest(input)
        .with_context(|| format!("Failed to ingest {}", input.display()))?;

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
        .context("Failed to install interrupt handler")?;

    let mut display = TerminalDisplay::new(io::stdout().lock(), video.stem());
    let shown = video.play(&mut display, &cancel)?;
    info!(shown, total = video.len(), "Playback finished");
    Ok(ingestor.metrics())
}

fn report_metrics(
    metrics: &MetricsCollector,
    print_metrics: bool,
    metrics_json: Option<&Path>,
) -> Result<()> {
    if !print_metrics && metrics_json.is_none() {
        return Ok(());
    }
    let snapshot = metrics.snapshot();
    if print_metrics {
        log_snapshot(&snapshot);
    }
    if let Some(path) = metrics_json {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create metrics directory: {}", parent.display())
            })?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, &snapshot)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "sonoclip",
    version,
    about = "Ingest ultrasound recordings into cropped, color-corrected RGB frames"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// YAML or JSON ingestion options.
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_enum)]
    mode: Option<PreprocessMode>,
    #[command(flatten)]
    overrides: OverrideArgs,
    #[arg(long, global = true)]
    print_metrics: bool,
    #[arg(long = "metrics-json", global = true)]
    metrics_json: Option<PathBuf>,
}

#[derive(Args)]
struct OverrideArgs {
    #[arg(long, global = true)]
    patient_id: Option<String>,
    #[arg(long, global = true)]
    patient_name: Option<String>,
    #[arg(long, global = true)]
    procedure: Option<String>,
    #[arg(long, global = true)]
    frame_rate: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print metadata and geometry as JSON.
    Info {
        #[arg(required = true, value_name = "INPUT")]
        inputs: Vec<String>,
    },
    /// Save every frame as a PNG.
    Export {
        input: PathBuf,
        #[arg(long = "output-dir")]
        output_dir: Option<PathBuf>,
    },
    /// Encode the processed frames as a video file.
    Encode {
        input: PathBuf,
        #[arg(long = "output-dir")]
        output_dir: PathBuf,
        #[arg(long = "video-format", value_enum, default_value_t = VideoFormat::Gif)]
        video_format: VideoFormat,
        #[arg(long)]
        codec: Option<String>,
    },
    /// Play the frames on the terminal, honoring the frame delay.
    Play { input: PathBuf },
}
