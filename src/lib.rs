// THEORY:
// This file is the main entry point for the `zebra_gait` library crate. The public
// API is organised around the two stages of an experiment:
//
// 1.  **Extraction** (`pipeline::ExtractionPipeline`): video in, one skeleton record
//     per frame out, plus annotated frames for visual inspection.
// 2.  **Treatment** (`analysis`): skeleton records in, body angles, tail-beat amplitude
//     and oscillation summaries out.
//
// `session::Session` chains both stages on a tokio runtime and is what the command
// line front-end (and the opencv-backed `gait_tester`) drive. The image-processing
// building blocks live in `core_modules` and are public so each stage can be tested
// and reused on its own.

pub mod analysis;
pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod storage;
pub mod video;

pub use config::GaitConfig;
pub use error::{GaitError, Result};
pub use pipeline::{ExtractionPipeline, PipelineState, RunSummary};
pub use session::{CancelHandle, CancelSignal, ExtractionRequest, Session, TreatmentReport};
pub use storage::ExperimentLayout;
