// THEORY:
// Shape continuity between consecutive frames is measured with the seven Hu moment
// invariants of the fish outline. They are insensitive to translation, scale and
// rotation, so a fish that swims across the box keeps the same signature, while a
// contour picked from the wrong blob (or a fish merged with a reflection) does not.
//
// Key architectural principles:
// 1.  **Polygon moments**: raw moments are integrated over the polygon with Green's
//     theorem, so the result depends only on the outline vertices, never on a raster.
//     Clockwise and counter-clockwise outlines give the same moments.
// 2.  **Log-scaled comparison**: invariants span many orders of magnitude. The
//     distance compares `1 / (sign(h) * log10|h|)` term by term and ignores terms
//     that are numerically zero on either side.

use crate::core_modules::geometry::Point;

/// Invariants smaller than this are treated as zero.
const HU_EPSILON: f64 = 1e-5;

/// Raw spatial moments of a closed polygon, up to third order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m20: f64,
    pub m11: f64,
    pub m02: f64,
    pub m30: f64,
    pub m21: f64,
    pub m12: f64,
    pub m03: f64,
}

impl Moments {
    pub fn of_polygon(points: &[Point]) -> Moments {
        let Some(last) = points.last() else {
            return Moments::default();
        };
        let (mut a00, mut a10, mut a01) = (0.0, 0.0, 0.0);
        let (mut a20, mut a11, mut a02) = (0.0, 0.0, 0.0);
        let (mut a30, mut a21, mut a12, mut a03) = (0.0, 0.0, 0.0, 0.0);

        let (mut xp, mut yp) = (last.x as f64, last.y as f64);
        for p in points {
            let (x, y) = (p.x as f64, p.y as f64);
            let dxy = xp * y - x * yp;
            let xs = xp + x;
            let ys = yp + y;

            a00 += dxy;
            a10 += dxy * xs;
            a01 += dxy * ys;
            a20 += dxy * (xp * xs + x * x);
            a11 += dxy * (xp * (ys + yp) + x * (ys + y));
            a02 += dxy * (yp * ys + y * y);
            a30 += dxy * xs * (xp * xp + x * x);
            a03 += dxy * ys * (yp * yp + y * y);
            a21 += dxy * (xp * xp * (3.0 * yp + y) + 2.0 * x * xp * ys + x * x * (yp + 3.0 * y));
            a12 += dxy * (yp * yp * (3.0 * xp + x) + 2.0 * y * yp * xs + y * y * (xp + 3.0 * x));

            xp = x;
            yp = y;
        }

        // Counter-clockwise traversal yields a negative signed area in image coordinates.
        let sign = if a00 < 0.0 { -1.0 } else { 1.0 };
        Moments {
            m00: sign * a00 / 2.0,
            m10: sign * a10 / 6.0,
            m01: sign * a01 / 6.0,
            m20: sign * a20 / 12.0,
            m11: sign * a11 / 24.0,
            m02: sign * a02 / 12.0,
            m30: sign * a30 / 20.0,
            m21: sign * a21 / 60.0,
            m12: sign * a12 / 60.0,
            m03: sign * a03 / 20.0,
        }
    }

    /// The seven Hu invariants. A zero-area polygon yields all zeros.
    pub fn hu_invariants(&self) -> [f64; 7] {
        if self.m00.abs() < f64::EPSILON {
            return [0.0; 7];
        }
        let cx = self.m10 / self.m00;
        let cy = self.m01 / self.m00;

        // --- 1. Central moments ---
        let mu20 = self.m20 - cx * self.m10;
        let mu11 = self.m11 - cx * self.m01;
        let mu02 = self.m02 - cy * self.m01;
        let mu30 = self.m30 - cx * (3.0 * mu20 + cx * self.m10);
        let mu21 = self.m21 - cx * (2.0 * mu11 + cx * self.m01) - cy * mu20;
        let mu12 = self.m12 - cy * (2.0 * mu11 + cy * self.m10) - cx * mu02;
        let mu03 = self.m03 - cy * (3.0 * mu02 + cy * self.m01);

        // --- 2. Scale normalisation ---
        let s2 = 1.0 / (self.m00 * self.m00);
        let s3 = s2 / self.m00.sqrt();
        let (n20, n11, n02) = (mu20 * s2, mu11 * s2, mu02 * s2);
        let (n30, n21, n12, n03) = (mu30 * s3, mu21 * s3, mu12 * s3, mu03 * s3);

        // --- 3. Invariants ---
        let t0 = n30 + n12;
        let t1 = n21 + n03;
        let q0 = n20 - n02;
        let q1 = n30 - 3.0 * n12;
        let q2 = 3.0 * n21 - n03;

        [
            n20 + n02,
            q0 * q0 + 4.0 * n11 * n11,
            q1 * q1 + q2 * q2,
            t0 * t0 + t1 * t1,
            q1 * t0 * (t0 * t0 - 3.0 * t1 * t1) + q2 * t1 * (3.0 * t0 * t0 - t1 * t1),
            q0 * (t0 * t0 - t1 * t1) + 4.0 * n11 * t0 * t1,
            q2 * t0 * (t0 * t0 - 3.0 * t1 * t1) - q1 * t1 * (3.0 * t0 * t0 - t1 * t1),
        ]
    }
}

/// Hu-moment distance between two outlines; 0.0 means identical shapes.
///
/// Returns `f64::MAX` when only one of the two outlines has a measurable shape.
pub fn shape_distance(a: &[Point], b: &[Point]) -> f64 {
    let ha = Moments::of_polygon(a).hu_invariants();
    let hb = Moments::of_polygon(b).hu_invariants();

    let mut any_a = false;
    let mut any_b = false;
    let mut distance = 0.0;
    for (&va, &vb) in ha.iter().zip(hb.iter()) {
        let (ma, mb) = (va.abs(), vb.abs());
        any_a |= ma > HU_EPSILON;
        any_b |= mb > HU_EPSILON;
        if ma > HU_EPSILON && mb > HU_EPSILON {
            let la = 1.0 / (va.signum() * ma.log10());
            let lb = 1.0 / (vb.signum() * mb.log10());
            distance += (lb - la).abs();
        }
    }
    if any_a != any_b { f64::MAX } else { distance }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rectangle(x: i32, y: i32, w: i32, h: i32) -> Vec<Point> {
        vec![
            Point::new(x, y),
            Point::new(x + w, y),
            Point::new(x + w, y + h),
            Point::new(x, y + h),
        ]
    }

    #[test]
    fn rectangle_moments_match_closed_form() {
        let m = Moments::of_polygon(&rectangle(0, 0, 4, 2));
        assert!((m.m00 - 8.0).abs() < 1e-9);
        assert!((m.m10 - 16.0).abs() < 1e-9);
        assert!((m.m01 - 8.0).abs() < 1e-9);

        let mut reversed = rectangle(0, 0, 4, 2);
        reversed.reverse();
        assert_eq!(Moments::of_polygon(&reversed), m);
    }

    #[test]
    fn identical_outlines_have_zero_distance() {
        let body = vec![
            Point::new(0, 10),
            Point::new(30, 2),
            Point::new(90, 8),
            Point::new(120, 12),
            Point::new(88, 18),
            Point::new(28, 20),
        ];
        assert_eq!(shape_distance(&body, &body), 0.0);
    }

    #[test]
    fn distance_ignores_translation_and_uniform_scale() {
        let a = rectangle(0, 0, 40, 10);
        let b = rectangle(100, 50, 80, 20);
        assert!(shape_distance(&a, &b) < 1e-6);
    }

    #[test]
    fn five_fold_stretch_exceeds_the_continuity_threshold() {
        let a = rectangle(0, 0, 40, 10);
        let b = rectangle(0, 0, 200, 10);
        assert!(shape_distance(&a, &b) > 0.1);
    }

    #[test]
    fn degenerate_outlines() {
        assert_eq!(shape_distance(&[], &[]), 0.0);
        assert_eq!(shape_distance(&rectangle(0, 0, 40, 10), &[]), f64::MAX);
    }
}
