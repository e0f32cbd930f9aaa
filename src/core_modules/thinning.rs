// THEORY:
// Zhang-Suen thinning peels a binary blob layer by layer until only a curve one pixel
// wide is left. Each iteration runs two sub-passes that delete boundary pixels from
// opposite sides, so the curve stays centred in the blob and keeps its connectivity.
//
// Neighbour labelling around a pixel P1:
//
//     P9 P2 P3
//     P8 P1 P4
//     P7 P6 P5
//
// A foreground pixel is removed in a sub-pass when
//   * it has between 2 and 6 foreground neighbours (B),
//   * exactly one 0 -> 1 transition occurs walking P2..P9..P2 (A),
//   * sub-pass 1: P2*P4*P6 == 0 and P4*P6*P8 == 0,
//   * sub-pass 2: P2*P4*P8 == 0 and P2*P6*P8 == 0.
// Pixels outside the image count as background.

use image::{GrayImage, Luma};

pub fn zhang_suen(binary: &GrayImage) -> GrayImage {
    let (width, height) = binary.dimensions();
    let (w, h) = (width as usize, height as usize);
    let mut grid: Vec<u8> = binary.pixels().map(|p| u8::from(p.0[0] > 0)).collect();
    let mut to_clear: Vec<usize> = Vec::new();

    loop {
        let mut changed = false;
        for sub_pass in 0..2 {
            to_clear.clear();
            for y in 0..h {
                for x in 0..w {
                    if grid[y * w + x] == 1 && should_remove(&grid, w, h, x, y, sub_pass) {
                        to_clear.push(y * w + x);
                    }
                }
            }
            changed |= !to_clear.is_empty();
            for &idx in &to_clear {
                grid[idx] = 0;
            }
        }
        if !changed {
            break;
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        Luma([grid[y as usize * w + x as usize] * 255])
    })
}

fn should_remove(grid: &[u8], w: usize, h: usize, x: usize, y: usize, sub_pass: usize) -> bool {
    let at = |dx: i64, dy: i64| -> u8 {
        let nx = x as i64 + dx;
        let ny = y as i64 + dy;
        if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
            0
        } else {
            grid[ny as usize * w + nx as usize]
        }
    };
    // P2, P3, P4, P5, P6, P7, P8, P9
    let n = [
        at(0, -1),
        at(1, -1),
        at(1, 0),
        at(1, 1),
        at(0, 1),
        at(-1, 1),
        at(-1, 0),
        at(-1, -1),
    ];

    let b: u8 = n.iter().sum();
    if !(2..=6).contains(&b) {
        return false;
    }
    let a = (0..8).filter(|&i| n[i] == 0 && n[(i + 1) % 8] == 1).count();
    if a != 1 {
        return false;
    }

    let (p2, p4, p6, p8) = (n[0], n[2], n[4], n[6]);
    if sub_pass == 0 {
        p2 * p4 * p6 == 0 && p4 * p6 * p8 == 0
    } else {
        p2 * p4 * p8 == 0 && p2 * p6 * p8 == 0
    }
}
