// THEORY:
// The `KinematicsTreater` is the first step of the second stage. It reads the
// persisted skeleton stream, skips the failed-frame sentinels and turns every valid
// skeleton into landmarks, three body angles and a time stamp.
//
// Key architectural principles:
// 1.  **Fixed landmark triples**: alpha = head-joint-torsion, beta = head-joint-tail,
//     gamma = joint-torsion-tail. The vertex of every angle is the middle point.
// 2.  **Parallel arrays**: every output vector is indexed by valid-frame order.
//     `frame_indices` maps that order back to the original frame numbers.
// 3.  **Time base**: by default `time = frame_index * (total_frames / fps)`, the
//     historical conversion. `TimeBase::FramePeriod` uses `frame_index * 1000 / fps`.
// 4.  **Undefined angles stay visible**: a degenerate triple yields NaN in the series;
//     the oscillation analyzer skips those samples.

use crate::analysis::angle::angle;
use crate::config::{KinematicsConfig, TimeBase, check_fps};
use crate::core_modules::landmarks::{LandmarkLocator, Landmarks};
use crate::error::{GaitError, Result};
use crate::storage::SkeletonRecord;
use tracing::{debug, info};

/// The three body-angle series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AngleSeries {
    Alpha,
    Beta,
    Gamma,
}

impl AngleSeries {
    pub const ALL: [AngleSeries; 3] = [AngleSeries::Alpha, AngleSeries::Beta, AngleSeries::Gamma];

    pub fn name(&self) -> &'static str {
        match self {
            AngleSeries::Alpha => "alpha",
            AngleSeries::Beta => "beta",
            AngleSeries::Gamma => "gamma",
        }
    }
}

/// Per-valid-frame kinematics of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KinematicsSeries {
    /// Original 0-based frame number of every row.
    pub frame_indices: Vec<usize>,
    pub time_ms: Vec<f64>,
    pub landmarks: Vec<Landmarks>,
    /// Signed distance (px) of the tail from the head-joint axis.
    pub amplitude: Vec<f64>,
    /// Empty when torsion is not tracked.
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
    /// Empty when torsion is not tracked.
    pub gamma: Vec<f64>,
    pub torsion_tracked: bool,
}

impl KinematicsSeries {
    pub fn len(&self) -> usize {
        self.frame_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_indices.is_empty()
    }

    pub fn tracks_torsion(&self) -> bool {
        self.torsion_tracked
    }

    /// The angle series that were computed for this run.
    pub fn available(&self) -> Vec<AngleSeries> {
        if self.tracks_torsion() {
            AngleSeries::ALL.to_vec()
        } else {
            vec![AngleSeries::Beta]
        }
    }

    pub fn series(&self, which: AngleSeries) -> &[f64] {
        match which {
            AngleSeries::Alpha => &self.alpha,
            AngleSeries::Beta => &self.beta,
            AngleSeries::Gamma => &self.gamma,
        }
    }
}

pub struct KinematicsTreater {
    locator: LandmarkLocator,
    track_torsion: bool,
    time_base: TimeBase,
}

impl KinematicsTreater {
    pub fn new(config: &KinematicsConfig) -> Self {
        Self {
            locator: LandmarkLocator::from_config(config),
            track_torsion: config.track_torsion,
            time_base: config.time_base,
        }
    }

    /// `total_frames` is the length of the run, valid or not.
    pub fn treat(&self, records: &[SkeletonRecord], total_frames: usize, fps: f64) -> Result<KinematicsSeries> {
        let fps = check_fps(fps)?;
        let frame_time = match self.time_base {
            TimeBase::RunDuration => total_frames as f64 / fps,
            TimeBase::FramePeriod => 1000.0 / fps,
        };

        let mut out = KinematicsSeries {
            torsion_tracked: self.track_torsion,
            ..KinematicsSeries::default()
        };
        for record in records {
            let Some(skeleton) = &record.skeleton else {
                continue;
            };
            let lm = self.locator.locate(&skeleton.points).map_err(|e| match e {
                GaitError::DegenerateSkeleton { points, stage, .. } => GaitError::DegenerateSkeleton {
                    frame_index: Some(record.frame_index),
                    points,
                    stage,
                },
                other => other,
            })?;

            let beta = angle(lm.head, lm.joint, lm.tail);
            out.frame_indices.push(record.frame_index);
            out.time_ms.push(record.frame_index as f64 * frame_time);
            out.amplitude.push(beta.amplitude);
            out.beta.push(beta.degrees);
            // The locator only places a torsion point when torsion is tracked.
            if let Some(torsion) = lm.torsion {
                out.alpha.push(angle(lm.head, lm.joint, torsion).degrees);
                out.gamma.push(angle(lm.joint, torsion, lm.tail).degrees);
            }
            out.landmarks.push(lm);
        }

        let undefined = out.beta.iter().filter(|b| b.is_nan()).count();
        if undefined > 0 {
            debug!(undefined, "frames with coincident landmarks");
        }
        info!(
            records = records.len(),
            valid = out.len(),
            total_frames,
            fps,
            "kinematics computed"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::geometry::{Point, Skeleton};

    fn bent(tail_dy: i32) -> Skeleton {
        // Straight from x = 0 to 30, then rising by `tail_dy` over the last 30 columns.
        let mut points: Vec<Point> = (0..=30).map(|x| Point::new(x, 50)).collect();
        points.extend((31..=60).map(|x| Point::new(x, 50 - tail_dy * (x - 30) / 30)));
        Skeleton::new(points)
    }

    fn record(frame_index: usize, skeleton: Option<Skeleton>) -> SkeletonRecord {
        SkeletonRecord { frame_index, skeleton }
    }

    #[test]
    fn sentinels_are_skipped_and_indices_kept() {
        let treater = KinematicsTreater::new(&KinematicsConfig::default());
        let records = vec![
            record(0, Some(bent(0))),
            record(1, None),
            record(2, Some(bent(10))),
        ];
        let series = treater.treat(&records, 3, 30.0).expect("treat");
        assert_eq!(series.frame_indices, vec![0, 2]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.alpha.len(), 2);
        assert_eq!(series.gamma.len(), 2);
        // Run-duration time base: index * 3 / 30.
        assert!((series.time_ms[1] - 0.2).abs() < 1e-12);
        // A straight fish has no bend.
        assert_eq!(series.beta[0], 0.0);
        assert!(series.beta[1] > 0.0);
        assert!(series.amplitude[1] > 0.0);
        assert_eq!(series.available(), AngleSeries::ALL.to_vec());
    }

    #[test]
    fn frame_period_time_base_and_no_torsion() {
        let config = KinematicsConfig {
            track_torsion: false,
            time_base: TimeBase::FramePeriod,
            ..KinematicsConfig::default()
        };
        let series = KinematicsTreater::new(&config)
            .treat(&[record(4, Some(bent(5)))], 10, 50.0)
            .expect("treat");
        assert_eq!(series.time_ms, vec![80.0]);
        assert!(series.alpha.is_empty() && series.gamma.is_empty());
        assert!(!series.tracks_torsion());
        assert_eq!(series.available(), vec![AngleSeries::Beta]);
    }

    #[test]
    fn degenerate_skeleton_names_its_frame() {
        let treater = KinematicsTreater::new(&KinematicsConfig::default());
        let records = vec![record(0, Some(bent(0))), record(5, Some(Skeleton::new(vec![Point::new(1, 1)])))];
        let err = treater.treat(&records, 6, 30.0).err().expect("degenerate");
        assert!(matches!(err, GaitError::DegenerateSkeleton { frame_index: Some(5), .. }));
    }

    #[test]
    fn fps_outside_the_accepted_range_is_rejected() {
        let treater = KinematicsTreater::new(&KinematicsConfig::default());
        assert!(matches!(treater.treat(&[], 0, 0.5), Err(GaitError::InvalidConfig(_))));
    }
}
