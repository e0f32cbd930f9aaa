// THEORY:
// The engine never decodes or encodes a container itself. It talks to the video
// library through four small contracts, so the same pipeline runs on a real video
// (see the opencv-backed `gait_tester` package), on a directory of frames, or on
// frames held in memory by a test.
//
// Key architectural principles:
// 1.  **Re-openable inputs**: a `VideoInput` is a recipe, not a handle. Box discovery
//     and the per-frame pass each open their own `FrameReader`, and every reader
//     releases its decoder when it is dropped.
// 2.  **Explicit sink completion**: a `FrameSink` is flushed with `finish()` on normal
//     completion and simply dropped on every abort path.
// 3.  **Interactive choices are collaborators**: the region of interest and the
//     contrast come from selectors. The defaults need no user at all.

use crate::config::GaitConfig;
use crate::core_modules::geometry::Rect;
use crate::error::{GaitError, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// One decoded colour frame.
pub type Frame = RgbImage;

const FRAME_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

pub trait FrameReader: Send {
    /// Number of frames the container announces.
    fn frame_count(&self) -> usize;
    /// Next frame in temporal order, `None` at end of stream.
    fn read_frame(&mut self) -> Result<Option<Frame>>;
}

pub trait VideoInput: Send + Sync {
    /// Human-readable reference used in error messages and logs.
    fn name(&self) -> String;
    fn open(&self) -> Result<Box<dyn FrameReader>>;
}

pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

pub trait VideoOutput: Send + Sync {
    fn create(&self, width: u32, height: u32, fps: f64) -> Result<Box<dyn FrameSink>>;
}

pub trait RoiSelector: Send + Sync {
    fn select_roi(&self, first_frame: &Frame) -> Result<Rect>;
}

pub trait ContrastSelector: Send + Sync {
    fn select_contrast(&self, first_roi_frame: &Frame) -> Result<f64>;
}

/// Selects the whole frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullFrame;

impl RoiSelector for FullFrame {
    fn select_roi(&self, first_frame: &Frame) -> Result<Rect> {
        Ok(Rect::new(0, 0, first_frame.width(), first_frame.height()))
    }
}

/// Always answers the same contrast.
#[derive(Debug, Clone, Copy)]
pub struct FixedContrast(pub f64);

impl FixedContrast {
    pub fn from_config(config: &GaitConfig) -> Self {
        Self(config.extraction.default_contrast)
    }
}

impl ContrastSelector for FixedContrast {
    fn select_contrast(&self, _first_roi_frame: &Frame) -> Result<f64> {
        Ok(self.0)
    }
}

// --- Image sequence input ---

/// A directory of still frames, played in file-name order.
#[derive(Debug, Clone)]
pub struct ImageSequence {
    dir: PathBuf,
}

impl ImageSequence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn frame_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| self.open_error(e.to_string()))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| self.open_error(e.to_string()))?.path();
            if is_frame_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn open_error(&self, reason: String) -> GaitError {
        GaitError::VideoOpen {
            source_name: self.name(),
            reason,
        }
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl VideoInput for ImageSequence {
    fn name(&self) -> String {
        self.dir.display().to_string()
    }

    fn open(&self) -> Result<Box<dyn FrameReader>> {
        let paths = self.frame_paths()?;
        if paths.is_empty() {
            return Err(self.open_error("no frame images found".into()));
        }
        debug!(source = %self.name(), frames = paths.len(), "opened image sequence");
        Ok(Box::new(ImageSequenceReader { paths, next: 0 }))
    }
}

struct ImageSequenceReader {
    paths: Vec<PathBuf>,
    next: usize,
}

impl FrameReader for ImageSequenceReader {
    fn frame_count(&self) -> usize {
        self.paths.len()
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        Ok(Some(image::open(path)?.to_rgb8()))
    }
}

// --- In-memory input ---

/// Frames already decoded into memory.
#[derive(Debug, Clone)]
pub struct MemoryVideo {
    frames: Arc<Vec<Frame>>,
}

impl MemoryVideo {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: Arc::new(frames),
        }
    }
}

impl VideoInput for MemoryVideo {
    fn name(&self) -> String {
        format!("<memory: {} frames>", self.frames.len())
    }

    fn open(&self) -> Result<Box<dyn FrameReader>> {
        if self.frames.is_empty() {
            return Err(GaitError::VideoOpen {
                source_name: self.name(),
                reason: "video holds no frames".into(),
            });
        }
        Ok(Box::new(MemoryReader {
            frames: Arc::clone(&self.frames),
            next: 0,
        }))
    }
}

struct MemoryReader {
    frames: Arc<Vec<Frame>>,
    next: usize,
}

impl FrameReader for MemoryReader {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let frame = self.frames.get(self.next).cloned();
        self.next += 1;
        Ok(frame)
    }
}

// --- Outputs ---

/// Writes every annotated frame as `frame_<n>.png` into a directory.
#[derive(Debug, Clone)]
pub struct FrameDirOutput {
    dir: PathBuf,
}

impl FrameDirOutput {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl VideoOutput for FrameDirOutput {
    fn create(&self, width: u32, height: u32, fps: f64) -> Result<Box<dyn FrameSink>> {
        std::fs::create_dir_all(&self.dir)?;
        debug!(dir = %self.dir.display(), width, height, fps, "annotated frame output ready");
        Ok(Box::new(FrameDirSink {
            dir: self.dir.clone(),
            written: 0,
        }))
    }
}

struct FrameDirSink {
    dir: PathBuf,
    written: usize,
}

impl FrameSink for FrameDirSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let path = self.dir.join(format!("frame_{:06}.png", self.written));
        frame.save(path)?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        debug!(dir = %self.dir.display(), frames = self.written, "annotated frames written");
        Ok(())
    }
}

/// Discards every frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutput;

impl VideoOutput for NullOutput {
    fn create(&self, _width: u32, _height: u32, _fps: f64) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(NullOutput))
    }
}

impl FrameSink for NullOutput {
    fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps the written frames in memory and records whether the sink was finished.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutput {
    frames: Arc<Mutex<Vec<Frame>>>,
    finished: Arc<Mutex<bool>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl VideoOutput for MemoryOutput {
    fn create(&self, _width: u32, _height: u32, _fps: f64) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(self.clone()))
    }
}

impl FrameSink for MemoryOutput {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        // A push never leaves the list half-written, so a poisoned lock is still usable.
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        *self.finished.lock().unwrap_or_else(PoisonError::into_inner) = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn image_sequence_reads_frames_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        RgbImage::from_pixel(4, 4, Rgb([10, 10, 10]))
            .save(dir.path().join("b.png"))
            .expect("save");
        RgbImage::from_pixel(4, 4, Rgb([200, 200, 200]))
            .save(dir.path().join("a.png"))
            .expect("save");
        std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let mut reader = ImageSequence::new(dir.path()).open().expect("open");
        assert_eq!(reader.frame_count(), 2);
        let first = reader.read_frame().expect("read").expect("frame");
        assert_eq!(first.get_pixel(0, 0), &Rgb([200, 200, 200]));
        assert!(reader.read_frame().expect("read").is_some());
        assert!(reader.read_frame().expect("read").is_none());
    }

    #[test]
    fn missing_or_empty_inputs_fail_to_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ImageSequence::new(dir.path()).open().err().expect("empty dir");
        assert!(matches!(err, GaitError::VideoOpen { .. }));

        let err = ImageSequence::new(dir.path().join("missing")).open().err().expect("missing");
        assert!(matches!(err, GaitError::VideoOpen { .. }));

        assert!(MemoryVideo::new(Vec::new()).open().is_err());
    }

    #[test]
    fn memory_video_is_reopenable() {
        let video = MemoryVideo::new(vec![RgbImage::new(2, 2); 3]);
        for _ in 0..2 {
            let mut reader = video.open().expect("open");
            let mut n = 0;
            while reader.read_frame().expect("read").is_some() {
                n += 1;
            }
            assert_eq!(n, 3);
        }
    }

    #[test]
    fn memory_output_tracks_frames_and_finish() {
        let output = MemoryOutput::new();
        let mut sink = output.create(2, 2, 25.0).expect("create");
        sink.write_frame(&RgbImage::new(2, 2)).expect("write");
        assert_eq!(output.frame_count(), 1);
        assert!(!output.is_finished());
        sink.finish().expect("finish");
        assert!(output.is_finished());
    }

    #[test]
    fn memory_output_survives_a_poisoned_lock() {
        let mut output = MemoryOutput::new();
        let frames = Arc::clone(&output.frames);
        let poisoner = std::thread::spawn(move || {
            let _held = frames.lock().expect("lock");
            panic!("holder panicked");
        });
        assert!(poisoner.join().is_err());
        assert!(output.frames.is_poisoned());

        output.write_frame(&RgbImage::new(2, 2)).expect("write");
        output.finish().expect("finish");
        assert_eq!(output.frame_count(), 1);
        assert!(output.is_finished());
    }
}
