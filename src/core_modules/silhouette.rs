// THEORY:
// The silhouette stage turns one segmented (binary) frame into the two shapes the
// validator and the landmark stage work on: the fish outline and its skeleton.
//
// Key architectural principles:
// 1.  **Stateless**: both functions are pure. Identical pixels give identical shapes.
// 2.  **Last qualifying outline wins**: among the external outlines whose area lies in
//     the fish band, the one met *last* in traversal order is kept. When none
//     qualifies the first outline is returned anyway and the validator is trusted to
//     reject the frame.
// 3.  **Longest open curve**: the skeleton is the external border of the thinned
//     image with the greatest open arc length (first one wins a tie).

use crate::core_modules::edges::{auto_canny, external_contours};
use crate::core_modules::geometry::{Contour, Point, Skeleton, arc_length, polygon_area};
use crate::core_modules::thinning::zhang_suen;
use image::GrayImage;

/// Outline of the fish in a binary frame.
pub fn fish_contour(binary: &GrayImage, area_min: f64, area_max: f64, canny_sigma: f32) -> Contour {
    let edges = auto_canny(binary, canny_sigma);
    let candidates = external_contours(&edges);
    select_fish_contour(candidates, area_min, area_max)
}

/// Keeps the last candidate whose area lies in `[area_min, area_max]`, else the first.
pub fn select_fish_contour(candidates: Vec<Vec<Point>>, area_min: f64, area_max: f64) -> Contour {
    let chosen = candidates
        .iter()
        .enumerate()
        .fold(None, |chosen, (index, points)| {
            let area = polygon_area(points);
            if area >= area_min && area <= area_max {
                Some(index)
            } else {
                chosen
            }
        })
        .unwrap_or(0);
    candidates
        .into_iter()
        .nth(chosen)
        .map(Contour::new)
        .unwrap_or_default()
}

/// One-pixel-wide body curve of the fish in a binary frame.
pub fn fish_skeleton(binary: &GrayImage) -> Skeleton {
    let thin = zhang_suen(binary);
    let mut best: Option<(f64, Vec<Point>)> = None;
    for points in external_contours(&thin) {
        let length = arc_length(&points, false);
        match &best {
            Some((best_length, _)) if length <= *best_length => {}
            _ => best = Some((length, points)),
        }
    }
    best.map(|(_, points)| Skeleton::new(points)).unwrap_or_default()
}
