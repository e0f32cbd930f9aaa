// Command line front-end: runs the extraction and treatment stages of one experiment
// on a directory of frames. Real video containers go through `gait_tester`.

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use zebra_gait::core_modules::geometry::Rect;
use zebra_gait::video::{ContrastSelector, FixedContrast, FrameDirOutput, ImageSequence};
use zebra_gait::{CancelHandle, ExperimentLayout, ExtractionRequest, GaitConfig, Session, TreatmentReport};

#[derive(Parser)]
#[command(name = "zebra_gait")]
#[command(about = "Extract swimming kinematics of a fish from top-down video frames")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment and skeletonize every frame, writing one skeleton record per frame.
    Extract(ExtractArgs),
    /// Compute angles and oscillation summaries from an extracted experiment.
    Treat(CommonArgs),
    /// Extract, then treat.
    Run(ExtractArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// Directory holding every experiment.
    #[arg(long, default_value = "export")]
    export: PathBuf,

    /// Experiment identifier, used as sub-directory and file prefix.
    #[arg(long)]
    exp_id: String,

    /// Frame rate of the recording.
    #[arg(long)]
    fps: f64,

    /// TOML file overriding the default thresholds.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct ExtractArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Directory of frame images, played in file-name order.
    #[arg(long)]
    frames: PathBuf,

    /// Region of interest as `x,y,width,height`. Defaults to the whole frame.
    #[arg(long, value_parser = parse_roi)]
    roi: Option<Rect>,

    /// Segmentation contrast. Defaults to the configured contrast.
    #[arg(long)]
    contrast: Option<f64>,
}

fn parse_roi(s: &str) -> Result<Rect, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(format!("expected x,y,width,height, got `{s}`"));
    }
    let x = parts[0].parse::<i32>().map_err(|e| format!("x: {e}"))?;
    let y = parts[1].parse::<i32>().map_err(|e| format!("y: {e}"))?;
    let width = parts[2].parse::<u32>().map_err(|e| format!("width: {e}"))?;
    let height = parts[3].parse::<u32>().map_err(|e| format!("height: {e}"))?;
    Ok(Rect::new(x, y, width, height))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let common = match &cli.command {
        Commands::Extract(args) | Commands::Run(args) => &args.common,
        Commands::Treat(common) => common,
    };

    // --- 1. Configuration & Layout ---
    let config = match &common.config {
        Some(path) => GaitConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => GaitConfig::default(),
    };
    let layout = ExperimentLayout::new(&common.export, &common.exp_id);
    layout.create_dirs().context("creating the experiment directories")?;
    init_logging(&layout)?;

    let fps = common.fps;
    let session = Session::new(config.clone(), layout.clone())?;

    // --- 2. Cancellation ---
    let (cancel_handle, cancel) = CancelHandle::new();
    tokio::spawn(watch_interrupts(cancel_handle));

    // --- 3. Stages ---
    match cli.command {
        Commands::Extract(args) => {
            let request = extraction_request(&config, &layout, &args)?;
            let summary = session.extract(request, cancel).await?;
            info!(?summary, "extraction done");
        }
        Commands::Treat(_) => {
            let report = session.treat(fps).await?;
            report_undetermined(&report);
        }
        Commands::Run(args) => {
            let request = extraction_request(&config, &layout, &args)?;
            let (summary, report) = session.run(request, cancel).await?;
            info!(?summary, "extraction done");
            report_undetermined(&report);
        }
    }
    Ok(())
}

/// Exit status of a run ended by a repeated interrupt (128 + SIGINT).
const INTERRUPTED_EXIT: i32 = 130;

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// Stop extraction after the current frame.
    Cancel,
    /// Leave at once. Treatment never reads the cancel signal.
    Exit,
}

fn on_interrupt(received: usize) -> Interrupt {
    if received <= 1 { Interrupt::Cancel } else { Interrupt::Exit }
}

async fn watch_interrupts(cancel_handle: CancelHandle) {
    let mut received = 0usize;
    while tokio::signal::ctrl_c().await.is_ok() {
        received += 1;
        match on_interrupt(received) {
            Interrupt::Cancel => {
                warn!("interrupt received, stopping after the current frame (interrupt again to exit now)");
                cancel_handle.cancel();
            }
            Interrupt::Exit => {
                warn!("second interrupt received, exiting");
                std::process::exit(INTERRUPTED_EXIT);
            }
        }
    }
}

fn extraction_request(config: &GaitConfig, layout: &ExperimentLayout, args: &ExtractArgs) -> anyhow::Result<ExtractionRequest> {
    if !args.frames.is_dir() {
        bail!("{} is not a directory of frames", args.frames.display());
    }
    let contrast_selector: Option<Box<dyn ContrastSelector>> = match args.contrast {
        Some(contrast) => Some(Box::new(FixedContrast(config.check_contrast(contrast)?))),
        None => None,
    };
    Ok(ExtractionRequest {
        video: Arc::new(ImageSequence::new(&args.frames)),
        output: Arc::new(FrameDirOutput::new(layout.annotated_dir())),
        roi: args.roi,
        roi_selector: None,
        contrast_selector,
        fps: args.common.fps,
    })
}

fn report_undetermined(report: &TreatmentReport) {
    for which in report.undetermined() {
        warn!(series = which.name(), "no oscillation could be measured");
    }
}

/// Console output filtered by `RUST_LOG` (default `info`), mirrored into the experiment log file.
fn init_logging(layout: &ExperimentLayout) -> anyhow::Result<()> {
    let log_path = layout.log_file();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}
