// THEORY:
// The `BackgroundModel` is a stateful, learning entity for a whole (ROI-cropped)
// frame. It keeps a per-pixel running average of the scene and reports as foreground
// every pixel that differs from that average by more than a fixed threshold.
//
// Key architectural principles:
// 1.  **Adaptive learning rate**: the first frames are learned quickly (the rate is
//     `1 / frames_seen`), then the rate settles at `1 / history` so a fish resting
//     for a few seconds is not absorbed into the background.
// 2.  **Temporal order matters**: the model must observe frames in the order they
//     were recorded. It is owned by exactly one `MovementBoxEstimator`.
// 3.  **No shadow model**: a pixel is either foreground (255) or background (0).

use image::{GrayImage, Luma};

pub struct BackgroundModel {
    /// Learned mean intensity per pixel, row-major.
    mean: Vec<f32>,
    width: u32,
    height: u32,
    frames_seen: u32,
    history: u32,
    threshold: f32,
}

impl BackgroundModel {
    pub fn new(history: u32, threshold: f32) -> Self {
        Self {
            mean: Vec::new(),
            width: 0,
            height: 0,
            frames_seen: 0,
            history: history.max(1),
            threshold,
        }
    }

    pub fn frames_seen(&self) -> u32 {
        self.frames_seen
    }

    /// Returns the foreground mask of `frame`, then folds the frame into the model.
    ///
    /// The very first frame initialises the model and has an empty mask. A frame of a
    /// different size restarts the learning.
    pub fn apply(&mut self, frame: &GrayImage) -> GrayImage {
        let (width, height) = frame.dimensions();
        if self.frames_seen == 0 || width != self.width || height != self.height {
            self.mean = frame.pixels().map(|p| p.0[0] as f32).collect();
            self.width = width;
            self.height = height;
            self.frames_seen = 1;
            return GrayImage::new(width, height);
        }

        self.frames_seen = self.frames_seen.saturating_add(1);
        let rate = 1.0 / self.frames_seen.min(self.history) as f32;

        let mut mask = GrayImage::new(width, height);
        for ((mean, pixel), out) in self
            .mean
            .iter_mut()
            .zip(frame.pixels())
            .zip(mask.pixels_mut())
        {
            let value = pixel.0[0] as f32;
            if (value - *mean).abs() > self.threshold {
                *out = Luma([255]);
            }
            *mean += rate * (value - *mean);
        }
        mask
    }
}
