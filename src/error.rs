// THEORY:
// Every failure the engine can raise lives in a single enum. The variants fall into
// two families:
// 1.  **Fatal run errors**: the extraction or treatment stage stops, releases its
//     video handles and propagates the error. `VideoOpen`, `EmptyRoi`,
//     `ExcessiveFailures`, `Cancelled` and `DegenerateSkeleton` belong here.
// 2.  **Plumbing errors**: I/O, decoding and configuration problems surfaced by the
//     surrounding machinery.
//
// Per-frame validation failures are *not* errors. They are counted by the
// `FailureBudget` and only become `ExcessiveFailures` once the budget is spent.

use std::path::PathBuf;
use thiserror::Error;

/// Which of the two failure-budget limits was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetLimit {
    Total,
    Consecutive,
}

impl std::fmt::Display for BudgetLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetLimit::Total => write!(f, "total"),
            BudgetLimit::Consecutive => write!(f, "consecutive"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GaitError {
    #[error("video input: could not open the video reference {source_name}: {reason}")]
    VideoOpen { source_name: String, reason: String },

    #[error("box discovery: region of interest is empty ({width}x{height})")]
    EmptyRoi { width: u32, height: u32 },

    #[error(
        "extraction aborted: too many failed frames: {failed}/{total_frames} \
         ({limit} limit {limit_ratio:.0}% reached, {consecutive} consecutive)"
    )]
    ExcessiveFailures {
        failed: usize,
        consecutive: usize,
        total_frames: usize,
        limit: BudgetLimit,
        /// The crossed limit, as a percentage of the total frame count.
        limit_ratio: f64,
    },

    #[error("extraction cancelled by the operator before frame {frame_index}")]
    Cancelled { frame_index: usize },

    #[error("landmarks: degenerate skeleton in frame {frame_index:?} ({points} usable points, arc length never exceeds the {stage} threshold)")]
    DegenerateSkeleton {
        frame_index: Option<usize>,
        points: usize,
        stage: &'static str,
    },

    #[error("configuration: {0}")]
    InvalidConfig(String),

    #[error("storage: output directory {dir} is in use by another extraction run (if none is running, delete the stale lock {lock})")]
    OutputBusy { dir: PathBuf, lock: PathBuf },

    #[error("storage: corrupt skeleton record {path}: {reason}")]
    CorruptRecord { path: PathBuf, reason: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GaitError {
    /// True for the errors that abort a whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GaitError::VideoOpen { .. }
                | GaitError::EmptyRoi { .. }
                | GaitError::ExcessiveFailures { .. }
                | GaitError::Cancelled { .. }
                | GaitError::DegenerateSkeleton { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GaitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excessive_failure_message_names_the_counts() {
        let err = GaitError::ExcessiveFailures {
            failed: 4,
            consecutive: 2,
            total_frames: 40,
            limit: BudgetLimit::Total,
            limit_ratio: 10.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("too many failed frames: 4/40"), "{msg}");
        assert!(msg.contains("total limit 10%"), "{msg}");
        assert!(err.is_fatal());
    }

    #[test]
    fn io_errors_are_not_fatal_run_errors() {
        let err: GaitError = std::io::Error::other("disk").into();
        assert!(!err.is_fatal());
    }
}
