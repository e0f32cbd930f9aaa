// THEORY:
// The `MovementBoxEstimator` runs once per video, before any skeleton is extracted.
// It answers one question: where in the region of interest does the fish ever go?
// Restricting the per-frame pass to that box keeps tank walls, bubbles and labels out
// of the segmentation.
//
// Key architectural principles:
// 1.  **Owned accumulator**: the estimator owns the background model and the running
//     box. Callers feed frames with `observe` and get the final box from `finalize`;
//     the partial state is never exposed.
// 2.  **Area band**: a frame's merged motion rectangle only counts when its area lies
//     in `[box_area_min, box_area_max]`. Tiny rectangles are noise, huge ones are
//     global lighting changes or camera shake.
// 3.  **Monotonic union**: accepted candidates only ever grow the box.
// 4.  **ROI-local until the end**: all work happens in ROI coordinates, the final box
//     is padded, clipped to the ROI, then translated back to frame coordinates.

use crate::config::{ExtractionConfig, GaitConfig};
use crate::core_modules::background::BackgroundModel;
use crate::core_modules::edges::{auto_canny, external_contours, merged_bounding_rect};
use crate::core_modules::geometry::Rect;
use crate::core_modules::preprocessor::{PreprocessFlags, preprocess};
use crate::error::{GaitError, Result};
use crate::session::CancelSignal;
use crate::video::{ContrastSelector, Frame, RoiSelector, VideoInput};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use tracing::{debug, info, warn};

const MASK_DILATIONS: usize = 2;

/// Everything the per-frame pass needs from box discovery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxDiscovery {
    pub total_frames: usize,
    pub contrast: f64,
    /// Region of interest, clipped to the frame.
    pub roi: Rect,
    /// Movement box in frame coordinates.
    pub movement_box: Rect,
}

pub struct MovementBoxEstimator {
    roi: Rect,
    contrast: f64,
    background: BackgroundModel,
    running: Option<Rect>,
    security_border: u32,
    box_area_min: f64,
    box_area_max: f64,
    canny_sigma: f32,
    frames_observed: usize,
    candidates_accepted: usize,
}

impl MovementBoxEstimator {
    pub fn new(config: &ExtractionConfig, roi: Rect, contrast: f64) -> Result<Self> {
        if roi.is_empty() {
            return Err(GaitError::EmptyRoi {
                width: roi.width,
                height: roi.height,
            });
        }
        Ok(Self {
            roi,
            contrast,
            background: BackgroundModel::new(config.background_history, config.background_threshold),
            running: None,
            security_border: config.security_border,
            box_area_min: config.box_area_min,
            box_area_max: config.box_area_max,
            canny_sigma: config.canny_sigma,
            frames_observed: 0,
            candidates_accepted: 0,
        })
    }

    /// Feeds one full frame, in temporal order.
    pub fn observe(&mut self, frame: &Frame) {
        self.frames_observed += 1;
        let crop = crop(frame, &self.roi);
        let gray = preprocess(&crop, self.contrast, PreprocessFlags::BLUR_ONLY);

        let mut mask = self.background.apply(&gray);
        for _ in 0..MASK_DILATIONS {
            mask = dilate(&mask, Norm::LInf, 1);
        }
        let edges = auto_canny(&mask, self.canny_sigma);
        if let Some(candidate) = merged_bounding_rect(&external_contours(&edges)) {
            self.observe_candidate(candidate);
        }
    }

    /// Offers one ROI-local motion rectangle. Returns whether it was accepted.
    pub fn observe_candidate(&mut self, candidate: Rect) -> bool {
        let area = candidate.area();
        if area < self.box_area_min || area > self.box_area_max {
            return false;
        }
        self.candidates_accepted += 1;
        self.running = Some(match self.running {
            Some(current) => current.union(&candidate),
            None => candidate,
        });
        debug!(?candidate, running = ?self.running, "movement candidate accepted");
        true
    }

    /// Pads, clips and translates the accumulated box into frame coordinates.
    pub fn finalize(self) -> Rect {
        let local_bounds = Rect::new(0, 0, self.roi.width, self.roi.height);
        let local = match self.running {
            Some(found) => found.padded_within(self.security_border, &local_bounds),
            None => {
                warn!(
                    frames = self.frames_observed,
                    "no movement candidate fell inside the area band, using the whole region of interest"
                );
                local_bounds
            }
        };
        let movement_box = local.translated(self.roi.x, self.roi.y);
        info!(
            ?movement_box,
            frames = self.frames_observed,
            accepted = self.candidates_accepted,
            "movement box discovered"
        );
        movement_box
    }
}

/// Copies the part of `frame` under `rect`; the rectangle must lie inside the frame.
pub fn crop(frame: &Frame, rect: &Rect) -> Frame {
    image::imageops::crop_imm(
        frame,
        rect.x.max(0) as u32,
        rect.y.max(0) as u32,
        rect.width,
        rect.height,
    )
    .to_image()
}

/// Pass 1: walks the whole video once and returns the total frame count, the contrast
/// and the movement box.
///
/// Without an explicit `roi` the selector is asked on the first frame. The contrast is
/// asked on the first ROI crop and checked against the configured bounds.
///
/// `cancel` is read before every frame. A cancel here reports frame 0, since no frame
/// of the per-frame pass has been processed yet.
pub fn estimate(
    video: &dyn VideoInput,
    roi: Option<Rect>,
    roi_selector: &dyn RoiSelector,
    contrast_selector: &dyn ContrastSelector,
    config: &GaitConfig,
    cancel: &CancelSignal,
) -> Result<BoxDiscovery> {
    let mut reader = video.open()?;
    let Some(first) = reader.read_frame()? else {
        return Err(GaitError::VideoOpen {
            source_name: video.name(),
            reason: "no decodable frame".into(),
        });
    };

    let requested = match roi {
        Some(r) => r,
        None => roi_selector.select_roi(&first)?,
    };
    if requested.is_empty() {
        return Err(GaitError::EmptyRoi {
            width: requested.width,
            height: requested.height,
        });
    }
    let frame_bounds = Rect::new(0, 0, first.width(), first.height());
    let roi = requested.padded_within(0, &frame_bounds);
    if roi != requested {
        warn!(?requested, ?roi, "region of interest clipped to the frame");
    }

    let contrast = config.check_contrast(contrast_selector.select_contrast(&crop(&first, &roi))?)?;
    info!(source = %video.name(), ?roi, contrast, announced = reader.frame_count(), "box discovery started");

    let mut estimator = MovementBoxEstimator::new(&config.extraction, roi, contrast)?;
    estimator.observe(&first);
    loop {
        if cancel.is_cancelled() {
            debug!(observed = estimator.frames_observed, "box discovery interrupted");
            return Err(GaitError::Cancelled { frame_index: 0 });
        }
        let Some(frame) = reader.read_frame()? else {
            break;
        };
        estimator.observe(&frame);
    }
    let total_frames = estimator.frames_observed;
    let movement_box = estimator.finalize();

    Ok(BoxDiscovery {
        total_frames,
        contrast,
        roi,
        movement_box,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{FixedContrast, FullFrame, MemoryVideo};
    use image::Rgb;
    use imageproc::drawing::draw_filled_ellipse_mut;

    fn band(min: f64, max: f64) -> ExtractionConfig {
        ExtractionConfig {
            box_area_min: min,
            box_area_max: max,
            security_border: 5,
            ..ExtractionConfig::default()
        }
    }

    #[test]
    fn union_only_grows_with_accepted_candidates() {
        let mut est = MovementBoxEstimator::new(&band(80.0, 500.0), Rect::new(0, 0, 100, 100), 1.0)
            .expect("roi");
        assert!(est.observe_candidate(Rect::new(10, 10, 20, 20)));
        assert!(est.observe_candidate(Rect::new(5, 5, 10, 10)));
        assert!(!est.observe_candidate(Rect::new(50, 50, 5, 5)));
        assert_eq!(est.running, Some(Rect::new(5, 5, 25, 25)));
    }

    #[test]
    fn finalize_pads_clips_and_translates() {
        let roi = Rect::new(100, 40, 60, 60);
        let mut est = MovementBoxEstimator::new(&band(80.0, 500.0), roi, 1.0).expect("roi");
        est.observe_candidate(Rect::new(2, 10, 20, 20));
        // Padding by 5 clips at the ROI's left edge.
        assert_eq!(est.finalize(), Rect::new(100, 45, 27, 30));
    }

    #[test]
    fn no_candidate_falls_back_to_the_roi() {
        let roi = Rect::new(10, 20, 30, 40);
        let est = MovementBoxEstimator::new(&band(80.0, 500.0), roi, 1.0).expect("roi");
        assert_eq!(est.finalize(), roi);
    }

    #[test]
    fn empty_roi_is_rejected() {
        let err = MovementBoxEstimator::new(&band(80.0, 500.0), Rect::new(0, 0, 0, 10), 1.0)
            .err()
            .expect("empty");
        assert!(matches!(err, GaitError::EmptyRoi { width: 0, height: 10 }));
    }

    #[test]
    fn estimate_finds_the_swimming_fish() {
        let frames: Vec<Frame> = (0..12)
            .map(|i| {
                let mut f = Frame::from_pixel(200, 120, Rgb([220, 220, 220]));
                draw_filled_ellipse_mut(&mut f, (40 + i * 8, 60), 18, 6, Rgb([30, 30, 30]));
                f
            })
            .collect();
        let mut config = GaitConfig::default();
        config.extraction.box_area_min = 100.0;
        config.extraction.box_area_max = 20000.0;

        let found = estimate(
            &MemoryVideo::new(frames),
            None,
            &FullFrame,
            &FixedContrast(1.0),
            &config,
            &CancelSignal::never(),
        )
        .expect("estimate");
        assert_eq!(found.total_frames, 12);
        assert_eq!(found.contrast, 1.0);
        assert_eq!(found.roi, Rect::new(0, 0, 200, 120));
        let b = found.movement_box;
        assert!(b.x <= 60 && b.right() >= 110, "{b:?}");
        assert!(b.y <= 54 && b.bottom() >= 66, "{b:?}");
    }

    #[test]
    fn estimate_rejects_out_of_range_contrast() {
        let video = MemoryVideo::new(vec![Frame::new(20, 20); 2]);
        let err = estimate(
            &video,
            None,
            &FullFrame,
            &FixedContrast(4.0),
            &GaitConfig::default(),
            &CancelSignal::never(),
        )
        .err()
        .expect("bad contrast");
        assert!(matches!(err, GaitError::InvalidConfig(_)));
    }

    #[test]
    fn estimate_stops_on_cancel() {
        let video = MemoryVideo::new(vec![Frame::new(20, 20); 5]);
        let (handle, cancel) = crate::session::CancelHandle::new();
        handle.cancel();
        let err = estimate(&video, None, &FullFrame, &FixedContrast(1.0), &GaitConfig::default(), &cancel)
            .err()
            .expect("cancelled");
        assert!(matches!(err, GaitError::Cancelled { frame_index: 0 }));
    }
}
