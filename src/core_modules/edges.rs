// Edge and contour helpers shared by box discovery and silhouette extraction.

use crate::core_modules::geometry::{Point, Rect};
use image::GrayImage;
use imageproc::contours::{BorderType, find_contours};
use imageproc::edges::canny;

/// Gradient magnitudes of a binary step are large, so a floor of 1.0 keeps the
/// "every non-flat pixel" behaviour of zero thresholds without marking flat areas.
const MIN_CANNY_THRESHOLD: f32 = 1.0;

/// Median intensity of a grayscale image.
pub fn median_intensity(gray: &GrayImage) -> u8 {
    let mut histogram = [0usize; 256];
    for p in gray.pixels() {
        histogram[p.0[0] as usize] += 1;
    }
    let half = (gray.width() as usize * gray.height() as usize).div_ceil(2);
    let mut seen = 0usize;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen >= half && seen > 0 {
            return value as u8;
        }
    }
    0
}

/// Canny with thresholds at `median * (1 -/+ sigma)`.
pub fn auto_canny(gray: &GrayImage, sigma: f32) -> GrayImage {
    let median = median_intensity(gray) as f32;
    let low = ((1.0 - sigma) * median).clamp(0.0, 255.0).max(MIN_CANNY_THRESHOLD);
    let high = ((1.0 + sigma) * median).clamp(0.0, 255.0).max(low);
    canny(gray, low, high)
}

/// Outermost borders of the foreground components, in traversal order.
pub fn external_contours(binary: &GrayImage) -> Vec<Vec<Point>> {
    find_contours::<i32>(binary)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| c.points.into_iter().map(Point::from).collect())
        .collect()
}

/// Union of the bounding rectangles of all contours.
pub fn merged_bounding_rect(contours: &[Vec<Point>]) -> Option<Rect> {
    contours
        .iter()
        .filter_map(|c| Rect::enclosing(c))
        .reduce(|acc, r| acc.union(&r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect as DrawRect;

    #[test]
    fn median_of_mostly_dark_image() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([0]));
        draw_filled_rect_mut(&mut img, DrawRect::at(0, 0).of_size(10, 3), Luma([200]));
        assert_eq!(median_intensity(&img), 0);
        draw_filled_rect_mut(&mut img, DrawRect::at(0, 0).of_size(10, 6), Luma([200]));
        assert_eq!(median_intensity(&img), 200);
    }

    #[test]
    fn two_blobs_give_two_external_contours() {
        let mut img = GrayImage::new(60, 30);
        draw_filled_rect_mut(&mut img, DrawRect::at(5, 5).of_size(10, 10), Luma([255]));
        draw_filled_rect_mut(&mut img, DrawRect::at(30, 8).of_size(20, 12), Luma([255]));
        let edges = auto_canny(&img, 0.33);
        let contours = external_contours(&edges);
        assert!(contours.len() >= 2, "{} contours", contours.len());

        let merged = merged_bounding_rect(&contours).expect("contours");
        assert!(merged.x <= 5 && merged.y <= 5);
        assert!(merged.right() >= 50 && merged.bottom() >= 20);
    }

    #[test]
    fn hole_borders_are_not_external() {
        let mut img = GrayImage::new(30, 30);
        draw_filled_rect_mut(&mut img, DrawRect::at(5, 5).of_size(20, 20), Luma([255]));
        draw_filled_rect_mut(&mut img, DrawRect::at(10, 10).of_size(10, 10), Luma([0]));
        assert_eq!(external_contours(&img).len(), 1);
        assert!(merged_bounding_rect(&[]).is_none());
    }
}
