// THEORY:
// The `pipeline` module is the top-level API of the extraction stage. It walks the
// video twice: once to discover the movement box and the contrast, then frame by
// frame to segment, skeletonize and validate the fish.
//
// States: Initializing -> BoxDiscovery -> PerFrame -> Completed | Aborted.
//
// Key architectural principles:
// 1.  **Fail fast, fail whole**: an unreadable video, an empty region of interest, a
//     spent failure budget or an operator cancel stop the run with an error. There is
//     no partial-success return; records already flushed stay on disk.
// 2.  **Per-frame failures are data**: a frame that fails validation is persisted as
//     a sentinel and counted; only the budget turns failures into an abort.
// 3.  **Scoped resources**: the frame readers and the annotated-frame sink live on the
//     stack of `run`, so every exit path releases them. Only normal completion calls
//     `finish()` on the sink.
// 4.  **Cancellation between frames**: the signal is read before every frame of both
//     passes, never in the middle of one.

use crate::config::{ExtractionConfig, GaitConfig, check_fps};
use crate::core_modules::geometry::{Contour, Point, Rect, Skeleton};
use crate::core_modules::movement_box::{self, BoxDiscovery, crop};
use crate::core_modules::preprocessor::{PreprocessFlags, preprocess};
use crate::core_modules::silhouette::{fish_contour, fish_skeleton};
use crate::core_modules::validator::{FailureBudget, FrameValidator, Verdict};
use crate::error::{GaitError, Result};
use crate::session::CancelSignal;
use crate::storage::SkeletonStore;
use crate::video::{ContrastSelector, FixedContrast, Frame, FrameSink, FullFrame, RoiSelector, VideoInput, VideoOutput};
use image::Rgb;
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect as DrawRect;
use tracing::{debug, error, info, warn};

const CONTOUR_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
const SKELETON_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_COLOUR: Rgb<u8> = Rgb([255, 255, 255]);
const BLANK: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Initializing,
    BoxDiscovery,
    PerFrame { frame_index: usize },
    Completed,
    Aborted,
}

/// Outcome of a completed extraction run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub total_frames: usize,
    pub valid_frames: usize,
    pub failed_frames: usize,
    pub contrast: f64,
    pub roi: Rect,
    pub movement_box: Rect,
}

/// The shapes extracted from one frame, with the validator's opinion.
#[derive(Debug, Clone)]
pub struct FrameResult {
    pub contour: Contour,
    pub skeleton: Skeleton,
    pub verdict: Verdict,
}

pub struct ExtractionPipeline {
    config: GaitConfig,
    fps: f64,
    roi_selector: Box<dyn RoiSelector>,
    contrast_selector: Box<dyn ContrastSelector>,
    state: PipelineState,
}

impl ExtractionPipeline {
    pub fn new(config: GaitConfig, fps: f64) -> Result<Self> {
        config.validate()?;
        let fps = check_fps(fps)?;
        let contrast_selector = Box::new(FixedContrast::from_config(&config));
        Ok(Self {
            config,
            fps,
            roi_selector: Box::new(FullFrame),
            contrast_selector,
            state: PipelineState::Initializing,
        })
    }

    pub fn with_roi_selector(mut self, selector: Box<dyn RoiSelector>) -> Self {
        self.roi_selector = selector;
        self
    }

    pub fn with_contrast_selector(mut self, selector: Box<dyn ContrastSelector>) -> Self {
        self.contrast_selector = selector;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Runs both passes over `video`. Without `roi`, the ROI selector is asked.
    pub fn run(
        &mut self,
        video: &dyn VideoInput,
        roi: Option<Rect>,
        output: &dyn VideoOutput,
        store: &SkeletonStore,
        cancel: &CancelSignal,
    ) -> Result<RunSummary> {
        let result = self.walk(video, roi, output, store, cancel);
        match &result {
            Ok(summary) => {
                self.state = PipelineState::Completed;
                info!(
                    total = summary.total_frames,
                    valid = summary.valid_frames,
                    failed = summary.failed_frames,
                    contrast = summary.contrast,
                    "extraction completed"
                );
            }
            Err(e) => {
                let at = self.state;
                self.state = PipelineState::Aborted;
                match e {
                    GaitError::Cancelled { .. } => warn!(state = ?at, "{e}"),
                    _ => error!(state = ?at, "{e}"),
                }
            }
        }
        result
    }

    fn walk(
        &mut self,
        video: &dyn VideoInput,
        roi: Option<Rect>,
        output: &dyn VideoOutput,
        store: &SkeletonStore,
        cancel: &CancelSignal,
    ) -> Result<RunSummary> {
        // --- 1. Initializing ---
        self.state = PipelineState::Initializing;
        let mut reader = video.open()?;
        if cancel.is_cancelled() {
            return Err(GaitError::Cancelled { frame_index: 0 });
        }

        // --- 2. Box discovery ---
        self.state = PipelineState::BoxDiscovery;
        let discovery = movement_box::estimate(
            video,
            roi,
            self.roi_selector.as_ref(),
            self.contrast_selector.as_ref(),
            &self.config,
            cancel,
        )?;

        // --- 3. Per frame ---
        let border = self.config.extraction.blank_border;
        let mut sink = output.create(
            discovery.movement_box.width + 2 * border,
            discovery.movement_box.height + 2 * border,
            self.fps,
        )?;
        let mut validator = FrameValidator::new(&self.config.validation);
        let mut budget = FailureBudget::new(discovery.total_frames, &self.config.validation);
        let mut frame_index = 0usize;
        let mut valid_frames = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(GaitError::Cancelled { frame_index });
            }
            let Some(frame) = reader.read_frame()? else {
                break;
            };
            self.state = PipelineState::PerFrame { frame_index };

            let bordered = self.bordered_crop(&frame, &discovery);
            let result = extract_frame(
                &bordered,
                discovery.contrast,
                &self.config.extraction,
                &mut validator,
            );
            let valid = result.verdict.is_valid();
            if valid {
                valid_frames += 1;
                store.write_valid(frame_index, &result.skeleton)?;
            } else {
                store.write_invalid(frame_index)?;
            }
            if valid || self.config.extraction.write_failed_frames {
                write_annotated(sink.as_mut(), bordered, &result)?;
            }
            debug!(
                frame_index,
                valid,
                shape_distance = result.verdict.shape_distance,
                contained = result.verdict.contained,
                branching = result.verdict.branching,
                skeleton_points = result.skeleton.len(),
                "frame processed"
            );

            budget.record(valid)?;
            frame_index += 1;
        }

        // --- 4. Completed ---
        sink.finish()?;
        if frame_index != discovery.total_frames {
            warn!(
                first_pass = discovery.total_frames,
                second_pass = frame_index,
                "the two passes read a different number of frames"
            );
        }
        Ok(RunSummary {
            total_frames: frame_index,
            valid_frames,
            failed_frames: budget.failed(),
            contrast: discovery.contrast,
            roi: discovery.roi,
            movement_box: discovery.movement_box,
        })
    }

    /// Crop to the movement box, surrounded by a blank border.
    fn bordered_crop(&self, frame: &Frame, discovery: &BoxDiscovery) -> Frame {
        add_border(&crop(frame, &discovery.movement_box), self.config.extraction.blank_border)
    }
}

/// Segments one bordered crop and validates its shapes.
pub fn extract_frame(
    bordered: &Frame,
    contrast: f64,
    config: &ExtractionConfig,
    validator: &mut FrameValidator,
) -> FrameResult {
    let binary = preprocess(bordered, contrast, PreprocessFlags::SEGMENT);
    let contour = fish_contour(&binary, config.fish_area_min, config.fish_area_max, config.canny_sigma);
    let skeleton = fish_skeleton(&binary);
    let verdict = validator.check(&skeleton, &contour);
    FrameResult {
        contour,
        skeleton,
        verdict,
    }
}

/// Surrounds `frame` with `border` blank pixels on every side.
pub fn add_border(frame: &Frame, border: u32) -> Frame {
    let (w, h) = frame.dimensions();
    let mut out = Frame::from_pixel(w + 2 * border, h + 2 * border, BLANK);
    image::imageops::replace(&mut out, frame, border as i64, border as i64);
    out
}

/// Contour in green, skeleton in red, contour bounding box in white.
pub fn annotate(mut canvas: Frame, result: &FrameResult) -> Frame {
    draw_polyline(&mut canvas, &result.contour.points, true, CONTOUR_COLOUR);
    draw_polyline(&mut canvas, &result.skeleton.points, false, SKELETON_COLOUR);
    if let Some(r) = Rect::enclosing(&result.contour.points) {
        draw_hollow_rect_mut(&mut canvas, DrawRect::at(r.x, r.y).of_size(r.width, r.height), BOX_COLOUR);
    }
    canvas
}

fn write_annotated(sink: &mut dyn FrameSink, bordered: Frame, result: &FrameResult) -> Result<()> {
    sink.write_frame(&annotate(bordered, result))
}

fn draw_polyline(canvas: &mut Frame, points: &[Point], closed: bool, colour: Rgb<u8>) {
    let as_f32 = |p: &Point| (p.x as f32, p.y as f32);
    for w in points.windows(2) {
        draw_line_segment_mut(canvas, as_f32(&w[0]), as_f32(&w[1]), colour);
    }
    if let (true, Some(first), Some(last)) = (closed, points.first(), points.last()) {
        draw_line_segment_mut(canvas, as_f32(last), as_f32(first), colour);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ExperimentLayout;
    use crate::video::{MemoryVideo, NullOutput};

    #[test]
    fn border_is_blank_and_keeps_the_crop() {
        let crop = Frame::from_pixel(4, 3, Rgb([10, 20, 30]));
        let out = add_border(&crop, 2);
        assert_eq!(out.dimensions(), (8, 7));
        assert_eq!(out.get_pixel(0, 0), &BLANK);
        assert_eq!(out.get_pixel(2, 2), &Rgb([10, 20, 30]));
        assert_eq!(out.get_pixel(7, 6), &BLANK);
    }

    #[test]
    fn annotation_draws_outline_and_skeleton() {
        let result = FrameResult {
            contour: Contour::new(vec![Point::new(2, 2), Point::new(17, 2), Point::new(17, 9), Point::new(2, 9)]),
            skeleton: Skeleton::new(vec![Point::new(4, 5), Point::new(15, 5)]),
            verdict: Verdict {
                shape_distance: 0.0,
                shape_continuous: true,
                contained: true,
                branching: false,
            },
        };
        let out = annotate(Frame::new(20, 12), &result);
        assert_eq!(out.get_pixel(10, 5), &SKELETON_COLOUR);
        assert_ne!(out.get_pixel(10, 2), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(10, 7), &Rgb([0, 0, 0]));
    }

    #[test]
    fn unreadable_video_aborts_in_initializing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SkeletonStore::create(ExperimentLayout::new(dir.path(), "exp")).expect("store");
        let mut pipeline = ExtractionPipeline::new(GaitConfig::default(), 30.0).expect("pipeline");
        assert_eq!(pipeline.state(), PipelineState::Initializing);

        let err = pipeline
            .run(&MemoryVideo::new(Vec::new()), None, &NullOutput, &store, &CancelSignal::never())
            .err()
            .expect("no frames");
        assert!(matches!(err, GaitError::VideoOpen { .. }));
        assert_eq!(pipeline.state(), PipelineState::Aborted);
    }

    #[test]
    fn rejects_out_of_range_fps() {
        assert!(ExtractionPipeline::new(GaitConfig::default(), 0.0).is_err());
    }
}
