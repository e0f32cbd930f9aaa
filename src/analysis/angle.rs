// THEORY:
// Body angles are measured on three landmarks A, B, C. The 2D cross product of
// `B - A` and `C - A` gives the signed distance from C to the line through A and B
// (the "amplitude"); dividing it by `|C - B|` gives the sine of the angle at B.
//
//     sin(alpha) = cross(B - A, C - A) / (|C - A| * |B - A|)
//     amplitude  = |C - A| * sin(alpha)
//     angle      = asin(amplitude / |C - B|)      (degrees)
//
// Coincident landmarks make both quotients meaningless. They yield NaN for both
// values instead of a division by zero.

use crate::core_modules::geometry::PointF;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleMeasure {
    pub degrees: f64,
    /// Signed distance (px) from C to the line through A and B.
    pub amplitude: f64,
}

impl AngleMeasure {
    pub const UNDEFINED: AngleMeasure = AngleMeasure {
        degrees: f64::NAN,
        amplitude: f64::NAN,
    };

    pub fn is_defined(&self) -> bool {
        self.degrees.is_finite() && self.amplitude.is_finite()
    }
}

/// Angle at `b` of the landmark triple, with its signed amplitude.
pub fn angle(a: PointF, b: PointF, c: PointF) -> AngleMeasure {
    let (abx, aby) = (b.x - a.x, b.y - a.y);
    let (acx, acy) = (c.x - a.x, c.y - a.y);
    let ab = abx.hypot(aby);
    let ac = acx.hypot(acy);
    let bc = c.distance(&b);
    if ab * ac == 0.0 || bc == 0.0 {
        return AngleMeasure::UNDEFINED;
    }

    let sin_alpha = (abx * acy - aby * acx) / (ac * ab);
    let amplitude = ac * sin_alpha;
    let degrees = (amplitude / bc).clamp(-1.0, 1.0).asin().to_degrees();
    AngleMeasure { degrees, amplitude }
}
