// THEORY:
// The `storage` module owns the on-disk layout of one experiment. It is the only
// hand-off between the extraction stage and the kinematics stage: extraction writes
// one skeleton record per frame, the treater reads them back in frame order.
//
// Layout under `<export>/<exp_id>/`:
//   skeletons/frame_<index>.json   one record per processed frame (0-based index)
//   annotated/                     annotated frames, when written to a directory
//   logs/log_file.log              run log
//   <exp_id>.csv                   landmark and angle table, then summary rows
//   <exp_id>_<series>.f64          raw series, little-endian f64
//
// Key architectural principles:
// 1.  **Distinguishable sentinel**: a failed frame is stored as the JSON scalar `0`.
//     A valid record is always an array, so `[]` and `[[x, y]]` can never be confused
//     with the sentinel. Read-back compares against the scalar, never the shape.
// 2.  **One writer per directory**: extraction holds a `.lock` file for the lifetime
//     of its `SkeletonStore`; a second run on the same directory gets `OutputBusy`.

use crate::analysis::oscillation::OscillationSummary;
use crate::analysis::treater::{AngleSeries, KinematicsSeries};
use crate::core_modules::geometry::{Point, Skeleton};
use crate::error::{GaitError, Result};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SKELETON_PREFIX: &str = "frame_";
const SKELETON_SUFFIX: &str = ".json";
const LOCK_FILE: &str = ".lock";

/// Paths of one experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentLayout {
    root: PathBuf,
    exp_id: String,
}

impl ExperimentLayout {
    pub fn new(export_dir: impl AsRef<Path>, exp_id: &str) -> Self {
        Self {
            root: export_dir.as_ref().join(exp_id),
            exp_id: exp_id.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exp_id(&self) -> &str {
        &self.exp_id
    }

    pub fn skeleton_dir(&self) -> PathBuf {
        self.root.join("skeletons")
    }

    pub fn annotated_dir(&self) -> PathBuf {
        self.root.join("annotated")
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join("logs").join("log_file.log")
    }

    pub fn csv_path(&self) -> PathBuf {
        self.root.join(format!("{}.csv", self.exp_id))
    }

    pub fn series_path(&self, series: &str) -> PathBuf {
        self.root.join(format!("{}_{}.f64", self.exp_id, series))
    }

    pub fn skeleton_path(&self, frame_index: usize) -> PathBuf {
        self.skeleton_dir()
            .join(format!("{SKELETON_PREFIX}{frame_index:06}{SKELETON_SUFFIX}"))
    }

    pub fn create_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.skeleton_dir())?;
        fs::create_dir_all(self.annotated_dir())?;
        if let Some(logs) = self.log_file().parent() {
            fs::create_dir_all(logs)?;
        }
        Ok(())
    }
}

/// One persisted frame: `None` marks a frame that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkeletonRecord {
    pub frame_index: usize,
    pub skeleton: Option<Skeleton>,
}

/// Exclusive writer of an experiment's skeleton stream.
#[derive(Debug)]
pub struct SkeletonStore {
    layout: ExperimentLayout,
    lock_path: PathBuf,
}

impl SkeletonStore {
    /// Takes the directory lock and clears records left by an earlier run.
    pub fn create(layout: ExperimentLayout) -> Result<Self> {
        layout.create_dirs()?;
        let lock_path = layout.root().join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(GaitError::OutputBusy {
                    dir: layout.root().to_path_buf(),
                    lock: lock_path,
                });
            }
            Err(e) => return Err(e.into()),
        }
        let store = Self { layout, lock_path };

        let mut stale = 0usize;
        for (_, path) in skeleton_files(&store.layout.skeleton_dir())? {
            fs::remove_file(path)?;
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "removed skeleton records of a previous run");
        }
        Ok(store)
    }

    pub fn layout(&self) -> &ExperimentLayout {
        &self.layout
    }

    pub fn write_valid(&self, frame_index: usize, skeleton: &Skeleton) -> Result<()> {
        let pairs: Vec<[i32; 2]> = skeleton.points.iter().map(|p| [p.x, p.y]).collect();
        self.write_value(frame_index, &serde_json::to_value(pairs)?)
    }

    pub fn write_invalid(&self, frame_index: usize) -> Result<()> {
        self.write_value(frame_index, &Value::from(0))
    }

    fn write_value(&self, frame_index: usize, value: &Value) -> Result<()> {
        let file = File::create(self.layout.skeleton_path(frame_index))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
        Ok(())
    }
}

impl Drop for SkeletonStore {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!(path = %self.lock_path.display(), error = %e, "could not release the output lock");
        }
    }
}

/// Reads one record; `Ok(None)` is the failed-frame sentinel.
pub fn read_record(path: &Path) -> Result<Option<Skeleton>> {
    let raw = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| corrupt(path, e.to_string()))?;
    if value == Value::from(0) {
        return Ok(None);
    }
    let pairs: Vec<[i32; 2]> = serde_json::from_value(value).map_err(|e| corrupt(path, e.to_string()))?;
    Ok(Some(Skeleton::new(
        pairs.into_iter().map(|[x, y]| Point::new(x, y)).collect(),
    )))
}

/// All records of an experiment, in frame order.
pub fn load_skeleton_stream(layout: &ExperimentLayout) -> Result<Vec<SkeletonRecord>> {
    let mut records = Vec::new();
    for (frame_index, path) in skeleton_files(&layout.skeleton_dir())? {
        records.push(SkeletonRecord {
            frame_index,
            skeleton: read_record(&path)?,
        });
    }
    Ok(records)
}

/// `(frame_index, path)` of every skeleton record in `dir`, sorted by index.
fn skeleton_files(dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let index = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(SKELETON_PREFIX))
            .and_then(|n| n.strip_suffix(SKELETON_SUFFIX))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(index) = index {
            files.push((index, path));
        }
    }
    files.sort();
    Ok(files)
}

fn corrupt(path: &Path, reason: String) -> GaitError {
    GaitError::CorruptRecord {
        path: path.to_path_buf(),
        reason,
    }
}

// --- Exports ---

/// Header, one row per valid frame, then one `summary` row per analysed series.
pub fn write_csv(
    path: &Path,
    series: &KinematicsSeries,
    summaries: &[(AngleSeries, OscillationSummary)],
) -> Result<()> {
    let torsion = series.tracks_torsion();
    let mut out = BufWriter::new(File::create(path)?);

    let mut header = vec!["time(ms)", "head_x", "head_y", "joint_x", "joint_y"];
    if torsion {
        header.extend(["torsion_x", "torsion_y"]);
    }
    header.extend(["tail_x", "tail_y", "amplitude(px)"]);
    if torsion {
        header.push("alpha(deg)");
    }
    header.push("beta(deg)");
    if torsion {
        header.push("gamma(deg)");
    }
    writeln!(out, "{}", header.join(","))?;

    for (i, lm) in series.landmarks.iter().enumerate() {
        let mut row = vec![series.time_ms[i], lm.head.x, lm.head.y, lm.joint.x, lm.joint.y];
        if let Some(t) = lm.torsion.filter(|_| torsion) {
            row.extend([t.x, t.y]);
        }
        row.extend([lm.tail.x, lm.tail.y, series.amplitude[i]]);
        if torsion {
            row.push(series.alpha[i]);
        }
        row.push(series.beta[i]);
        if torsion {
            row.push(series.gamma[i]);
        }
        let cells: Vec<String> = row.iter().map(f64::to_string).collect();
        writeln!(out, "{}", cells.join(","))?;
    }

    for (name, summary) in summaries {
        writeln!(
            out,
            "summary,{},{},{}",
            name.name(),
            summary.mean_amplitude,
            summary.frequency_hz
        )?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_series(path: &Path, values: &[f64]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for v in values {
        out.write_all(&v.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

pub fn read_series(path: &Path) -> Result<Vec<f64>> {
    let bytes = fs::read(path)?;
    if bytes.len() % 8 != 0 {
        return Err(corrupt(path, format!("{} bytes is not a whole number of f64", bytes.len())));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> (tempfile::TempDir, ExperimentLayout) {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = ExperimentLayout::new(dir.path(), "exp1");
        (dir, layout)
    }

    #[test]
    fn sentinel_is_distinguishable_from_short_skeletons() {
        let (_dir, layout) = layout();
        let store = SkeletonStore::create(layout.clone()).expect("store");
        store.write_invalid(0).expect("sentinel");
        store.write_valid(1, &Skeleton::default()).expect("empty");
        store.write_valid(2, &Skeleton::new(vec![Point::new(3, 4)])).expect("one point");

        assert_eq!(read_record(&layout.skeleton_path(0)).expect("read"), None);
        assert_eq!(read_record(&layout.skeleton_path(1)).expect("read"), Some(Skeleton::default()));
        assert_eq!(
            read_record(&layout.skeleton_path(2)).expect("read"),
            Some(Skeleton::new(vec![Point::new(3, 4)]))
        );
    }

    #[test]
    fn stream_comes_back_in_frame_order() {
        let (_dir, layout) = layout();
        let store = SkeletonStore::create(layout.clone()).expect("store");
        for i in [10usize, 2, 1] {
            store.write_valid(i, &Skeleton::new(vec![Point::new(i as i32, 0)])).expect("write");
        }
        let indices: Vec<usize> = load_skeleton_stream(&layout)
            .expect("load")
            .iter()
            .map(|r| r.frame_index)
            .collect();
        assert_eq!(indices, vec![1, 2, 10]);
    }

    #[test]
    fn second_writer_is_refused_until_the_first_drops() {
        let (_dir, layout) = layout();
        let first = SkeletonStore::create(layout.clone()).expect("first");
        let err = SkeletonStore::create(layout.clone()).err().expect("busy");
        let GaitError::OutputBusy { lock, .. } = &err else {
            panic!("unexpected error {err}");
        };
        assert_eq!(lock, &layout.root().join(LOCK_FILE));
        assert!(err.to_string().contains(&lock.display().to_string()), "{err}");
        drop(first);
        SkeletonStore::create(layout).expect("lock released");
    }

    #[test]
    fn new_store_clears_previous_records() {
        let (_dir, layout) = layout();
        {
            let store = SkeletonStore::create(layout.clone()).expect("store");
            store.write_invalid(7).expect("write");
        }
        let _store = SkeletonStore::create(layout.clone()).expect("store");
        assert!(load_skeleton_stream(&layout).expect("load").is_empty());
    }

    #[test]
    fn corrupt_records_are_reported() {
        let (_dir, layout) = layout();
        layout.create_dirs().expect("dirs");
        let path = layout.skeleton_path(0);
        fs::write(&path, "{\"x\": 1}").expect("write");
        assert!(matches!(read_record(&path), Err(GaitError::CorruptRecord { .. })));
        fs::write(&path, "1").expect("write");
        assert!(matches!(read_record(&path), Err(GaitError::CorruptRecord { .. })));
    }

    #[test]
    fn binary_series_round_trip_keeps_nan() {
        let (_dir, layout) = layout();
        layout.create_dirs().expect("dirs");
        let path = layout.series_path("beta");
        write_series(&path, &[1.5, f64::NAN, -2.0]).expect("write");
        let back = read_series(&path).expect("read");
        assert_eq!(back.len(), 3);
        assert_eq!(back[0], 1.5);
        assert!(back[1].is_nan());
        assert!(path.ends_with("exp1_beta.f64"));

        fs::write(&path, [0u8; 5]).expect("write");
        assert!(read_series(&path).is_err());
    }
}
