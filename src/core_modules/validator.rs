// THEORY:
// The `FrameValidator` decides whether one frame's skeleton can be trusted, and the
// `FailureBudget` decides whether the run as a whole still can.
//
// Key architectural principles:
// 1.  **Three independent checks**, all of which must pass:
//     a. shape continuity: the Hu distance to the previous frame's outline stays
//        at or below `shape_distance_max`;
//     b. containment: every skeleton point lies strictly inside the bounding box of
//        the outline;
//     c. no branching: points sharing a column span at most `branch_tolerance_px`.
// 2.  **Stateful continuity**: the validator remembers the last outline it saw,
//     valid or not. The first frame is compared against itself.
// 3.  **Failures are counted, not raised**: a failed frame only becomes an error when
//     the budget (total or consecutive share of the run) is spent.

use crate::config::ValidationConfig;
use crate::core_modules::geometry::{Contour, Point, Skeleton};
use crate::core_modules::shape_match::shape_distance;
use crate::error::{BudgetLimit, GaitError, Result};

/// Outcome of the three checks for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub shape_distance: f64,
    pub shape_continuous: bool,
    pub contained: bool,
    pub branching: bool,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        self.shape_continuous && self.contained && !self.branching
    }
}

pub struct FrameValidator {
    previous: Option<Contour>,
    shape_distance_max: f64,
    branch_tolerance_px: i32,
}

impl FrameValidator {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            previous: None,
            shape_distance_max: config.shape_distance_max,
            branch_tolerance_px: config.branch_tolerance_px,
        }
    }

    /// Checks one frame, then remembers its outline for the next call.
    pub fn check(&mut self, skeleton: &Skeleton, contour: &Contour) -> Verdict {
        let previous = self.previous.as_ref().unwrap_or(contour);
        let verdict = evaluate(
            &skeleton.points,
            contour,
            previous,
            self.shape_distance_max,
            self.branch_tolerance_px,
        );
        self.previous = Some(contour.clone());
        verdict
    }
}

/// Runs the three checks against an explicit previous outline.
pub fn evaluate(
    skeleton: &[Point],
    contour: &Contour,
    previous: &Contour,
    shape_distance_max: f64,
    branch_tolerance_px: i32,
) -> Verdict {
    let distance = shape_distance(&contour.points, &previous.points);
    Verdict {
        shape_distance: distance,
        shape_continuous: distance <= shape_distance_max,
        contained: is_contained(skeleton, contour),
        branching: is_branching(skeleton, branch_tolerance_px),
    }
}

/// Every point strictly inside the outline's bounding box. Empty shapes never pass.
pub fn is_contained(skeleton: &[Point], contour: &Contour) -> bool {
    match contour.bounding_box() {
        Some(bbox) if !skeleton.is_empty() => skeleton.iter().all(|p| bbox.strictly_contains(p)),
        _ => false,
    }
}

/// True when two points of one column are more than `tolerance` rows apart.
pub fn is_branching(skeleton: &[Point], tolerance: i32) -> bool {
    let mut sorted = skeleton.to_vec();
    sorted.sort_unstable();
    sorted.chunk_by(|a, b| a.x == b.x).any(|column| {
        // Sorted by (x, y): the column's extremes are its ends.
        let (first, last) = (column[0], column[column.len() - 1]);
        last.y - first.y > tolerance
    })
}

/// Total and consecutive failure counters checked against shares of the run length.
#[derive(Debug, Clone)]
pub struct FailureBudget {
    total_frames: usize,
    max_failure_ratio: f64,
    max_consecutive_ratio: f64,
    failed: usize,
    consecutive: usize,
}

impl FailureBudget {
    pub fn new(total_frames: usize, config: &ValidationConfig) -> Self {
        Self {
            total_frames,
            max_failure_ratio: config.max_failure_ratio,
            max_consecutive_ratio: config.max_consecutive_failure_ratio,
            failed: 0,
            consecutive: 0,
        }
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn consecutive(&self) -> usize {
        self.consecutive
    }

    /// Records one frame outcome and fails once either limit is reached.
    pub fn record(&mut self, valid: bool) -> Result<()> {
        if valid {
            self.consecutive = 0;
        } else {
            self.failed += 1;
            self.consecutive += 1;
        }

        let total = self.total_frames as f64;
        if self.failed as f64 >= self.max_failure_ratio * total {
            return Err(self.exhausted(BudgetLimit::Total, self.max_failure_ratio));
        }
        if self.consecutive as f64 >= self.max_consecutive_ratio * total {
            return Err(self.exhausted(BudgetLimit::Consecutive, self.max_consecutive_ratio));
        }
        Ok(())
    }

    fn exhausted(&self, limit: BudgetLimit, ratio: f64) -> GaitError {
        GaitError::ExcessiveFailures {
            failed: self.failed,
            consecutive: self.consecutive,
            total_frames: self.total_frames,
            limit,
            limit_ratio: ratio * 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rectangle(x: i32, y: i32, w: i32, h: i32) -> Contour {
        Contour::new(vec![
            Point::new(x, y),
            Point::new(x + w, y),
            Point::new(x + w, y + h),
            Point::new(x, y + h),
        ])
    }

    fn line(from: i32, to: i32, y: i32) -> Skeleton {
        Skeleton::new((from..to).map(|x| Point::new(x, y)).collect())
    }

    #[test]
    fn first_frame_is_compared_with_itself() {
        let mut validator = FrameValidator::new(&ValidationConfig::default());
        let verdict = validator.check(&line(5, 35, 10), &rectangle(0, 0, 40, 20));
        assert_eq!(verdict.shape_distance, 0.0);
        assert!(verdict.is_valid());
    }

    #[test]
    fn stretched_outline_breaks_continuity() {
        let mut validator = FrameValidator::new(&ValidationConfig::default());
        assert!(validator.check(&line(5, 35, 10), &rectangle(0, 0, 40, 20)).is_valid());

        let verdict = validator.check(&line(5, 195, 10), &rectangle(0, 0, 200, 20));
        assert!(!verdict.shape_continuous);
        assert!(!verdict.is_valid());

        // The stretched outline is now the reference.
        assert!(validator.check(&line(5, 195, 10), &rectangle(0, 0, 200, 20)).is_valid());
    }

    #[test]
    fn containment_is_strict() {
        let contour = rectangle(0, 0, 40, 20);
        assert!(is_contained(&line(1, 40, 10).points, &contour));
        assert!(!is_contained(&line(0, 40, 10).points, &contour));
        assert!(!is_contained(&line(1, 41, 10).points, &contour));
        assert!(!is_contained(&[], &contour));
        assert!(!is_contained(&line(1, 5, 5).points, &Contour::default()));
    }

    #[test]
    fn forks_wider_than_the_tolerance_are_branches() {
        let mut points = line(0, 10, 10).points;
        points.push(Point::new(4, 13));
        assert!(!is_branching(&points, 3));
        points.push(Point::new(4, 6));
        assert!(is_branching(&points, 3));
    }

    #[test]
    fn budget_aborts_at_the_total_limit() {
        let config = ValidationConfig {
            max_failure_ratio: 0.10,
            max_consecutive_failure_ratio: 1.0,
            ..ValidationConfig::default()
        };
        let mut budget = FailureBudget::new(40, &config);
        for i in 0..3 {
            budget.record(i % 2 == 0).expect("within budget");
        }
        budget.record(false).expect("two failures");
        budget.record(false).expect("three failures");
        let err = budget.record(false).err().expect("four of forty");
        assert!(matches!(
            err,
            GaitError::ExcessiveFailures { failed: 4, limit: BudgetLimit::Total, .. }
        ));
    }

    #[test]
    fn budget_aborts_on_a_failure_streak() {
        let mut budget = FailureBudget::new(100, &ValidationConfig::default());
        for _ in 0..4 {
            budget.record(false).expect("streak under five");
        }
        budget.record(true).expect("reset");
        assert_eq!(budget.consecutive(), 0);
        for _ in 0..4 {
            budget.record(false).expect("streak under five");
        }
        let err = budget.record(false).err().expect("five in a row");
        assert!(matches!(
            err,
            GaitError::ExcessiveFailures { consecutive: 5, failed: 9, limit: BudgetLimit::Consecutive, .. }
        ));
    }
}
