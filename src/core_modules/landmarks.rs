// THEORY:
// The `LandmarkLocator` turns an unordered skeleton point set into the four anatomical
// points the angle computations need: head, joint, torsion and tail.
//
// Key architectural principles:
// 1.  **Function-like curve**: the skeleton is sorted by x, exact duplicates are
//     dropped and every x that still repeats collapses to one point at the mean y.
//     The result has exactly one point per column, which makes the arc-length walk
//     well defined even where thinning left a small loop.
// 2.  **Cartesian y**: the y axis is negated so that "up" in an angle means up.
// 3.  **Arc-length proportions**: the joint is the first point whose cumulative arc
//     length from the head *strictly exceeds* `proportion_joint` of the total. The
//     torsion point repeats the walk on the sub-curve that starts at the joint.
// 4.  **No silent clamping**: a walk that never crosses its threshold is a
//     `DegenerateSkeleton` error, never an out-of-range index.

use crate::config::{HeadSide, KinematicsConfig};
use crate::core_modules::geometry::{Point, PointF};
use crate::error::{GaitError, Result};

/// The anatomical points of one frame, in Cartesian coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmarks {
    pub head: PointF,
    pub joint: PointF,
    /// Present when torsion tracking is enabled.
    pub torsion: Option<PointF>,
    pub tail: PointF,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkLocator {
    proportion_joint: f64,
    proportion_torsion: Option<f64>,
    head_side: HeadSide,
}

impl LandmarkLocator {
    pub fn new(proportion_joint: f64, proportion_torsion: Option<f64>, head_side: HeadSide) -> Self {
        Self {
            proportion_joint,
            proportion_torsion,
            head_side,
        }
    }

    pub fn from_config(config: &KinematicsConfig) -> Self {
        Self::new(
            config.proportion_joint,
            config.track_torsion.then_some(config.proportion_torsion),
            config.head_side,
        )
    }

    pub fn locate(&self, skeleton: &[Point]) -> Result<Landmarks> {
        let mut curve = ordered_curve(skeleton);
        if self.head_side == HeadSide::Right {
            curve.reverse();
        }
        let degenerate = |stage| GaitError::DegenerateSkeleton {
            frame_index: None,
            points: curve.len(),
            stage,
        };

        let (Some(&head), Some(&tail)) = (curve.first(), curve.last()) else {
            return Err(degenerate("joint"));
        };
        let joint_index = crossing_index(&curve, self.proportion_joint).ok_or_else(|| degenerate("joint"))?;

        let torsion = match self.proportion_torsion {
            Some(proportion) => {
                let offset = crossing_index(&curve[joint_index..], proportion)
                    .ok_or_else(|| degenerate("torsion"))?;
                Some(curve[joint_index + offset])
            }
            None => None,
        };

        Ok(Landmarks {
            head,
            joint: curve[joint_index],
            torsion,
            tail,
        })
    }
}

/// Sorted, de-duplicated, one-point-per-x curve with y pointing up.
pub fn ordered_curve(skeleton: &[Point]) -> Vec<PointF> {
    let mut sorted = skeleton.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut curve: Vec<PointF> = Vec::with_capacity(sorted.len());
    for column in sorted.chunk_by(|a, b| a.x == b.x) {
        let mean_y = column.iter().map(|p| p.y as f64).sum::<f64>() / column.len() as f64;
        curve.push(PointF::new(column[0].x as f64, -mean_y));
    }
    curve
}

/// First index whose cumulative arc length from `curve[0]` exceeds `proportion` of
/// the total length.
fn crossing_index(curve: &[PointF], proportion: f64) -> Option<usize> {
    if curve.len() < 2 {
        return None;
    }
    let total: f64 = curve.windows(2).map(|w| w[0].distance(&w[1])).sum();
    let threshold = proportion * total;
    let mut walked = 0.0;
    for (i, w) in curve.windows(2).enumerate() {
        walked += w[0].distance(&w[1]);
        if walked > threshold {
            return Some(i + 1);
        }
    }
    None
}
