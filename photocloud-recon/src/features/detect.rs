//! Corner detectors

use super::{BORDER_MARGIN, Keypoint};
use image::GrayImage;

/// Bresenham circle of radius 3, clockwise from the top.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Minimum contiguous arc length for the segment test.
const FAST_ARC: u32 = 9;
const FAST_THRESHOLD: i16 = 20;

const HARRIS_K: f32 = 0.04;
const HARRIS_RADIUS: i32 = 2;
/// Responses below this fraction of the strongest one are ignored.
const HARRIS_RELATIVE_THRESHOLD: f32 = 0.01;

/// FAST-9 corners, strongest first, after 3x3 non-maximum suppression.
pub fn detect_fast(gray: &GrayImage, max_keypoints: usize) -> Vec<Keypoint> {
    let (width, height) = gray.dimensions();
    let mut scores = vec![0.0f32; (width * height) as usize];

    for y in BORDER_MARGIN..height.saturating_sub(BORDER_MARGIN) {
        for x in BORDER_MARGIN..width.saturating_sub(BORDER_MARGIN) {
            scores[(y * width + x) as usize] = fast_score(gray, x as i32, y as i32);
        }
    }

    select(&scores, width, height, max_keypoints)
}

/// Segment test score: summed excess contrast of the circle pixels when a
/// contiguous arc is uniformly brighter or darker than the center, else 0.
fn fast_score(gray: &GrayImage, x: i32, y: i32) -> f32 {
    let center = i16::from(gray.get_pixel(x as u32, y as u32)[0]);
    let mut brighter = 0u32;
    let mut darker = 0u32;
    let mut bright_sum = 0i32;
    let mut dark_sum = 0i32;

    for (i, (dx, dy)) in CIRCLE.iter().enumerate() {
        let v = i16::from(gray.get_pixel((x + dx) as u32, (y + dy) as u32)[0]);
        let diff = v - center;
        if diff > FAST_THRESHOLD {
            brighter |= 1 << i;
            bright_sum += i32::from(diff - FAST_THRESHOLD);
        } else if diff < -FAST_THRESHOLD {
            darker |= 1 << i;
            dark_sum += i32::from(-diff - FAST_THRESHOLD);
        }
    }

    if has_arc(brighter) {
        bright_sum as f32
    } else if has_arc(darker) {
        dark_sum as f32
    } else {
        0.0
    }
}

/// Whether the 16-bit circular mask contains `FAST_ARC` consecutive set bits.
fn has_arc(mask: u32) -> bool {
    if mask.count_ones() < FAST_ARC {
        return false;
    }
    let doubled = mask | (mask << 16);
    let mut run = 0;
    for i in 0..32 {
        if doubled & (1 << i) != 0 {
            run += 1;
            if run >= FAST_ARC {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Harris corners, strongest first, after 3x3 non-maximum suppression.
pub fn detect_harris(gray: &GrayImage, max_keypoints: usize) -> Vec<Keypoint> {
    let (width, height) = gray.dimensions();
    let (w, h) = (width as i32, height as i32);
    let at = |x: i32, y: i32| f32::from(gray.get_pixel(x as u32, y as u32)[0]);

    let mut gx = vec![0.0f32; (width * height) as usize];
    let mut gy = vec![0.0f32; (width * height) as usize];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = (y * w + x) as usize;
            gx[i] = 0.5 * (at(x + 1, y) - at(x - 1, y));
            gy[i] = 0.5 * (at(x, y + 1) - at(x, y - 1));
        }
    }

    let mut responses = vec![0.0f32; (width * height) as usize];
    let margin = BORDER_MARGIN as i32;
    for y in margin..h - margin {
        for x in margin..w - margin {
            let (mut sxx, mut syy, mut sxy) = (0.0f32, 0.0f32, 0.0f32);
            for by in -HARRIS_RADIUS..=HARRIS_RADIUS {
                for bx in -HARRIS_RADIUS..=HARRIS_RADIUS {
                    let i = ((y + by) * w + (x + bx)) as usize;
                    sxx += gx[i] * gx[i];
                    syy += gy[i] * gy[i];
                    sxy += gx[i] * gy[i];
                }
            }
            let trace = sxx + syy;
            responses[(y * w + x) as usize] = sxx * syy - sxy * sxy - HARRIS_K * trace * trace;
        }
    }

    let strongest = responses.iter().copied().fold(0.0f32, f32::max);
    let floor = strongest * HARRIS_RELATIVE_THRESHOLD;
    responses.iter_mut().filter(|r| **r <= floor).for_each(|r| *r = 0.0);

    select(&responses, width, height, max_keypoints)
}

/// Non-maximum suppression over a score grid followed by top-N selection.
///
/// Ties between neighbours keep the first pixel in raster order, so the
/// result is deterministic.
fn select(scores: &[f32], width: u32, height: u32, max_keypoints: usize) -> Vec<Keypoint> {
    let (w, h) = (width as i32, height as i32);
    let mut keypoints = Vec::new();

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = (y * w + x) as usize;
            let s = scores[i];
            if s <= 0.0 {
                continue;
            }
            let is_max = (-1..=1).all(|dy| {
                (-1..=1).all(|dx| {
                    let n = ((y + dy) * w + (x + dx)) as usize;
                    let earlier = dy < 0 || (dy == 0 && dx < 0);
                    n == i || if earlier { s > scores[n] } else { s >= scores[n] }
                })
            });
            if is_max {
                keypoints.push(Keypoint::new(x as f32, y as f32, s));
            }
        }
    }

    keypoints.sort_by(|a, b| b.score.total_cmp(&a.score));
    keypoints.truncate(max_keypoints);
    keypoints
}
