// THEORY:
// The `session` module runs the two stages of an experiment without blocking the
// caller's async runtime, and is the only place where concurrency appears.
//
// Key architectural principles:
// 1.  **Sequential core, async shell**: a single extraction is strictly sequential
//     (the background model and the validator depend on frame order). It runs on a
//     blocking worker thread so a host (CLI, UI) stays responsive meanwhile.
// 2.  **Cooperative cancellation**: the host keeps a `CancelHandle`; the pipeline
//     holds the matching `CancelSignal` and checks it between two frames. Both sides
//     of the `watch` channel are cheap to clone.
// 3.  **Independent series**: once the kinematics are computed, the oscillation
//     analyses of alpha, beta and gamma share nothing and run concurrently.
// 4.  **Stages never overlap**: treatment only starts from a complete skeleton
//     stream, after extraction returned.

use crate::analysis::oscillation::{OscillationAnalyzer, OscillationSummary};
use crate::analysis::treater::{AngleSeries, KinematicsSeries, KinematicsTreater};
use crate::config::GaitConfig;
use crate::core_modules::geometry::Rect;
use crate::error::{GaitError, Result};
use crate::pipeline::{ExtractionPipeline, RunSummary};
use crate::storage::{self, ExperimentLayout, SkeletonStore};
use crate::video::{ContrastSelector, RoiSelector, VideoInput, VideoOutput};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Host side of the cancellation channel.
#[derive(Clone)]
pub struct CancelHandle {
    cancel_tx: Arc<watch::Sender<bool>>,
}

/// Pipeline side of the cancellation channel.
#[derive(Clone)]
pub struct CancelSignal {
    cancel_rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> (CancelHandle, CancelSignal) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (
            CancelHandle {
                cancel_tx: Arc::new(cancel_tx),
            },
            CancelSignal { cancel_rx },
        )
    }

    pub fn cancel(&self) {
        // Only fails when every signal is gone, and then nobody is left to stop.
        let _ = self.cancel_tx.send(true);
    }
}

impl CancelSignal {
    /// A signal nobody can raise.
    pub fn never() -> CancelSignal {
        CancelHandle::new().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }
}

/// Inputs of one extraction run.
pub struct ExtractionRequest {
    pub video: Arc<dyn VideoInput>,
    pub output: Arc<dyn VideoOutput>,
    pub roi: Option<Rect>,
    pub roi_selector: Option<Box<dyn RoiSelector>>,
    pub contrast_selector: Option<Box<dyn ContrastSelector>>,
    pub fps: f64,
}

/// Everything the treatment stage produced.
#[derive(Debug, Clone)]
pub struct TreatmentReport {
    pub series: KinematicsSeries,
    pub summaries: Vec<(AngleSeries, OscillationSummary)>,
}

impl TreatmentReport {
    /// Series whose oscillation could not be determined.
    pub fn undetermined(&self) -> Vec<AngleSeries> {
        self.summaries
            .iter()
            .filter(|(_, s)| !s.is_determined())
            .map(|(name, _)| *name)
            .collect()
    }
}

/// Owns the configuration and the experiment layout shared by both stages.
#[derive(Clone)]
pub struct Session {
    config: Arc<GaitConfig>,
    layout: ExperimentLayout,
}

impl Session {
    pub fn new(config: GaitConfig, layout: ExperimentLayout) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            layout,
        })
    }

    pub fn layout(&self) -> &ExperimentLayout {
        &self.layout
    }

    /// Runs the extraction pipeline on a blocking worker.
    pub async fn extract(&self, request: ExtractionRequest, cancel: CancelSignal) -> Result<RunSummary> {
        let config = (*self.config).clone();
        let layout = self.layout.clone();
        let task = tokio::task::spawn_blocking(move || {
            let store = SkeletonStore::create(layout)?;
            let mut pipeline = ExtractionPipeline::new(config, request.fps)?;
            if let Some(selector) = request.roi_selector {
                pipeline = pipeline.with_roi_selector(selector);
            }
            if let Some(selector) = request.contrast_selector {
                pipeline = pipeline.with_contrast_selector(selector);
            }
            pipeline.run(
                request.video.as_ref(),
                request.roi,
                request.output.as_ref(),
                &store,
                &cancel,
            )
        });
        task.await.map_err(join_error)?
    }

    /// Loads the skeleton stream, computes the kinematics and analyses every series.
    pub async fn treat(&self, fps: f64) -> Result<TreatmentReport> {
        let config = Arc::clone(&self.config);
        let layout = self.layout.clone();
        let series = tokio::task::spawn_blocking(move || {
            let records = storage::load_skeleton_stream(&layout)?;
            KinematicsTreater::new(&config.kinematics).treat(&records, records.len(), fps)
        })
        .await
        .map_err(join_error)??;
        let series = Arc::new(series);

        let analyses = series.available().into_iter().map(|which| {
            let series = Arc::clone(&series);
            let analyzer = OscillationAnalyzer::new(self.config.oscillation.clone());
            tokio::task::spawn_blocking(move || {
                let summary = analyzer.analyze(&series.time_ms, series.series(which));
                (which, summary)
            })
        });
        let mut summaries = Vec::new();
        for joined in join_all(analyses).await {
            let (which, summary) = joined.map_err(join_error)?;
            if summary.is_determined() {
                info!(
                    series = which.name(),
                    amplitude = summary.mean_amplitude,
                    frequency_hz = summary.frequency_hz,
                    "oscillation summary"
                );
            } else {
                warn!(
                    series = which.name(),
                    extrema = summary.extrema,
                    "oscillation undetermined: fewer than two extrema"
                );
            }
            summaries.push((which, summary));
        }

        let series = Arc::try_unwrap(series).unwrap_or_else(|shared| (*shared).clone());
        let report = TreatmentReport { series, summaries };
        self.export(&report)?;
        Ok(report)
    }

    /// Extraction, then treatment of the fresh skeleton stream.
    pub async fn run(&self, request: ExtractionRequest, cancel: CancelSignal) -> Result<(RunSummary, TreatmentReport)> {
        let fps = request.fps;
        let summary = self.extract(request, cancel).await?;
        let report = self.treat(fps).await?;
        Ok((summary, report))
    }

    /// Writes the CSV table and one binary file per series.
    fn export(&self, report: &TreatmentReport) -> Result<()> {
        storage::write_csv(&self.layout.csv_path(), &report.series, &report.summaries)?;
        storage::write_series(&self.layout.series_path("time"), &report.series.time_ms)?;
        storage::write_series(&self.layout.series_path("ampl"), &report.series.amplitude)?;
        for which in report.series.available() {
            storage::write_series(&self.layout.series_path(which.name()), report.series.series(which))?;
        }
        info!(csv = %self.layout.csv_path().display(), rows = report.series.len(), "kinematics exported");
        Ok(())
    }
}

fn join_error(e: tokio::task::JoinError) -> GaitError {
    GaitError::Io(std::io::Error::other(format!("worker task failed: {e}")))
}
