// THEORY:
// The `geometry` module holds the "dumb" data containers shared by every stage:
// integer pixel points, axis-aligned rectangles and the two point-set shapes the
// engine passes around (the fish `Contour` and its `Skeleton`).
//
// Key architectural principles:
// 1.  **Image coordinates**: x grows to the right, y grows downwards. Only the
//     landmark stage flips y into a Cartesian frame.
// 2.  **Half-open rectangles**: a `Rect` covers `x..x + width` and `y..y + height`,
//     so unions and crops compose without off-by-one corrections.
// 3.  **No policy**: these types measure themselves (area, arc length, bounding box)
//     but never decide whether a shape is acceptable.

/// A 2D integer point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<imageproc::point::Point<i32>> for Point {
    fn from(p: imageproc::point::Point<i32>) -> Self {
        Point::new(p.x, p.y)
    }
}

/// A point with real coordinates, used once pixel points have been averaged.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointF {
    pub x: f64,
    pub y: f64,
}

impl PointF {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &PointF) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// An axis-aligned rectangle, half-open on its right and bottom edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, (right - x) as u32, (bottom - y) as u32)
    }

    /// Grows the rectangle by `border` on every side, then clips it to `bounds`.
    pub fn padded_within(&self, border: u32, bounds: &Rect) -> Rect {
        let b = border as i32;
        let x = (self.x - b).max(bounds.x);
        let y = (self.y - b).max(bounds.y);
        let right = (self.right() + b).min(bounds.right());
        let bottom = (self.bottom() + b).min(bounds.bottom());
        Rect::new(x, y, (right - x).max(0) as u32, (bottom - y).max(0) as u32)
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Rectangle of the pixels spanned by `points` (inclusive extremes).
    pub fn enclosing(points: &[Point]) -> Option<Rect> {
        let bbox = BoundingBox::of(points)?;
        Some(Rect::new(
            bbox.min_x,
            bbox.min_y,
            (bbox.max_x - bbox.min_x + 1) as u32,
            (bbox.max_y - bbox.min_y + 1) as u32,
        ))
    }
}

/// Inclusive pixel extremes of a point set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl BoundingBox {
    pub fn of(points: &[Point]) -> Option<BoundingBox> {
        let first = points.first()?;
        let init = BoundingBox {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        Some(points.iter().fold(init, |b, p| BoundingBox {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        }))
    }

    /// Open-interval test: points on the box edges are outside.
    pub fn strictly_contains(&self, p: &Point) -> bool {
        p.x > self.min_x && p.x < self.max_x && p.y > self.min_y && p.y < self.max_y
    }
}

/// Closed polygon approximating the fish outline in one frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Contour {
    pub points: Vec<Point>,
}

impl Contour {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Unsigned polygon area (shoelace formula).
    pub fn area(&self) -> f64 {
        polygon_area(&self.points)
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::of(&self.points)
    }
}

/// The thinned, one-pixel-wide body curve of one frame, in traversal order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Skeleton {
    pub points: Vec<Point>,
}

impl Skeleton {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

pub fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    (twice as f64).abs() / 2.0
}

/// Length of the polyline through `points`; `closed` adds the last-to-first segment.
pub fn arc_length(points: &[Point], closed: bool) -> f64 {
    let open: f64 = points.windows(2).map(|w| w[0].distance(&w[1])).sum();
    match (closed, points.first(), points.last()) {
        (true, Some(first), Some(last)) if points.len() > 1 => open + last.distance(first),
        _ => open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: i32, y: i32, side: i32) -> Vec<Point> {
        vec![
            Point::new(x, y),
            Point::new(x + side, y),
            Point::new(x + side, y + side),
            Point::new(x, y + side),
        ]
    }

    #[test]
    fn polygon_area_is_orientation_free() {
        let mut pts = square(0, 0, 10);
        assert_eq!(polygon_area(&pts), 100.0);
        pts.reverse();
        assert_eq!(polygon_area(&pts), 100.0);
        assert_eq!(polygon_area(&pts[..2]), 0.0);
    }

    #[test]
    fn arc_length_open_and_closed() {
        let pts = square(0, 0, 3);
        assert_eq!(arc_length(&pts, false), 9.0);
        assert_eq!(arc_length(&pts, true), 12.0);
        assert_eq!(arc_length(&pts[..1], true), 0.0);
    }

    #[test]
    fn union_and_padding() {
        let a = Rect::new(10, 10, 20, 20);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.union(&b), Rect::new(5, 5, 25, 25));

        let bounds = Rect::new(0, 0, 40, 40);
        assert_eq!(a.padded_within(5, &bounds), Rect::new(5, 5, 30, 30));
        assert_eq!(a.padded_within(15, &bounds), Rect::new(0, 0, 40, 40));
    }

    #[test]
    fn strict_containment_excludes_edges() {
        let bbox = BoundingBox::of(&square(0, 0, 10)).expect("non-empty");
        assert!(bbox.strictly_contains(&Point::new(5, 5)));
        assert!(!bbox.strictly_contains(&Point::new(0, 5)));
        assert!(!bbox.strictly_contains(&Point::new(5, 10)));
        assert!(BoundingBox::of(&[]).is_none());
    }

    #[test]
    fn enclosing_rect_is_inclusive() {
        let r = Rect::enclosing(&[Point::new(2, 3), Point::new(4, 7)]).expect("points");
        assert_eq!(r, Rect::new(2, 3, 3, 5));
    }
}
