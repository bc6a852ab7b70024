// src/signal/color.rs
//
// Raw signal-color classification from a cropped signal region.
//
// HSV-space analysis focused on the brightest pixels (the lit bulb),
// with a circularity filter over connected blobs to reject elongated
// glare and housing reflections. This classifier sits at the state
// machine's input boundary and can be swapped for an external model
// without touching the smoothing logic.

use crate::signal::state_machine::SignalState;
use crate::types::Frame;

/// Input boundary of the signal state machine: anything that can turn a
/// signal crop into a raw color observation.
pub trait ColorClassifier {
    fn classify(&self, crop: &Frame) -> SignalState;
}

/// Crops dimmer than this at their brightest point are unusable.
const MIN_PEAK_VALUE: f32 = 70.0;
/// Pixels at or above this fraction of the peak brightness vote.
const BRIGHT_FRACTION: f32 = 0.6;
/// Minimum saturation (0-100) for a pixel to carry color information.
const MIN_SATURATION: f32 = 16.0;
const MIN_BLOB_AREA: usize = 3;
/// 4*pi*A/P^2 — reflections and glare streaks score far below this.
const MIN_CIRCULARITY: f32 = 0.35;
/// Density fallback only applies to crops plausibly sized like a signal.
const SMALL_CROP_MAX: usize = 100;
const MIN_COLOR_AREA: usize = 5;
const FALLBACK_MIN_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct HsvColorClassifier;

impl ColorClassifier for HsvColorClassifier {
    fn classify(&self, crop: &Frame) -> SignalState {
        if crop.width == 0 || crop.height == 0 {
            return SignalState::Unknown;
        }

        let n = crop.width * crop.height;
        let mut hsv = Vec::with_capacity(n);
        let mut max_v = 0.0f32;
        for pixel in crop.data.chunks_exact(3) {
            let (h, s, v) = rgb_to_hsv(pixel[0] as f32, pixel[1] as f32, pixel[2] as f32);
            max_v = max_v.max(v);
            hsv.push((h, s, v));
        }

        if max_v < MIN_PEAK_VALUE {
            return SignalState::Unknown;
        }
        let bright_threshold = max_v * BRIGHT_FRACTION;

        let colors = [SignalState::Red, SignalState::Yellow, SignalState::Green];
        let mut circular_area = [0usize; 3];
        let mut raw_count = [0usize; 3];

        for (ci, &color) in colors.iter().enumerate() {
            let mask: Vec<bool> = hsv
                .iter()
                .map(|&(h, s, v)| v >= bright_threshold && s >= MIN_SATURATION && hue_matches(color, h))
                .collect();
            raw_count[ci] = mask.iter().filter(|&&m| m).count();
            circular_area[ci] = circular_blob_area(&mask, crop.width, crop.height);
        }

        let total: usize = circular_area.iter().sum();
        if total == 0 {
            // No circular blob survived. For crops sized like an actual
            // signal head, fall back to raw color density.
            if crop.width < SMALL_CROP_MAX && crop.height < SMALL_CROP_MAX {
                if let Some((color, count)) = argmax(&colors, &raw_count) {
                    if count > FALLBACK_MIN_COUNT {
                        return color;
                    }
                }
            }
            return SignalState::Unknown;
        }

        match argmax(&colors, &circular_area) {
            Some((color, area)) if area > MIN_COLOR_AREA => color,
            _ => SignalState::Unknown,
        }
    }
}

fn argmax(colors: &[SignalState; 3], counts: &[usize; 3]) -> Option<(SignalState, usize)> {
    let mut best: Option<(SignalState, usize)> = None;
    for (&color, &count) in colors.iter().zip(counts.iter()) {
        if count > 0 && best.map_or(true, |(_, b)| count > b) {
            best = Some((color, count));
        }
    }
    best
}

fn hue_matches(color: SignalState, h: f32) -> bool {
    match color {
        SignalState::Red => h <= 20.0 || h >= 330.0,
        SignalState::Yellow => (24.0..=76.0).contains(&h),
        SignalState::Green => (78.0..=200.0).contains(&h),
        SignalState::Unknown => false,
    }
}

/// Total area of connected mask components that look circular.
///
/// Perimeter is counted as unit edges between a component pixel and a
/// non-component pixel (or the crop border), which penalizes thin streaks
/// much harder than a boundary-pixel count would.
fn circular_blob_area(mask: &[bool], width: usize, height: usize) -> usize {
    let mut visited = vec![false; mask.len()];
    let mut total = 0usize;
    let mut stack = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        let mut component = Vec::new();
        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            component.push(idx);
            let (x, y) = (idx % width, idx / width);
            let mut push = |nx: usize, ny: usize| {
                let ni = ny * width + nx;
                if mask[ni] && !visited[ni] {
                    visited[ni] = true;
                    stack.push(ni);
                }
            };
            if x > 0 {
                push(x - 1, y);
            }
            if x + 1 < width {
                push(x + 1, y);
            }
            if y > 0 {
                push(x, y - 1);
            }
            if y + 1 < height {
                push(x, y + 1);
            }
        }

        let area = component.len();
        if area < MIN_BLOB_AREA {
            continue;
        }

        let mut perimeter = 0usize;
        for &idx in &component {
            let (x, y) = (idx % width, idx / width);
            if x == 0 || !mask[idx - 1] {
                perimeter += 1;
            }
            if x + 1 >= width || !mask[idx + 1] {
                perimeter += 1;
            }
            if y == 0 || !mask[idx - width] {
                perimeter += 1;
            }
            if y + 1 >= height || !mask[idx + width] {
                perimeter += 1;
            }
        }

        let circularity =
            (4.0 * std::f32::consts::PI * area as f32) / (perimeter * perimeter) as f32;
        if circularity > MIN_CIRCULARITY {
            total += area;
        }
    }
    total
}

/// RGB -> HSV with H in [0, 360), S in [0, 100], V in [0, 255].
#[inline]
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let r_n = r / 255.0;
    let g_n = g / 255.0;
    let b_n = b / 255.0;

    let max = r_n.max(g_n).max(b_n);
    let min = r_n.min(g_n).min(b_n);
    let delta = max - min;

    let h = if delta < 1e-6 {
        0.0
    } else if (max - r_n).abs() < 1e-6 {
        60.0 * (((g_n - b_n) / delta) % 6.0)
    } else if (max - g_n).abs() < 1e-6 {
        60.0 * (((b_n - r_n) / delta) + 2.0)
    } else {
        60.0 * (((r_n - g_n) / delta) + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    let s = if max < 1e-6 {
        0.0
    } else {
        (delta / max) * 100.0
    };

    (h, s, max * 255.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw_disk(frame: &mut Frame, cx: i32, cy: i32, radius: i32, rgb: (u8, u8, u8)) {
        for y in 0..frame.height as i32 {
            for x in 0..frame.width as i32 {
                if (x - cx).pow(2) + (y - cy).pow(2) <= radius * radius {
                    frame.set_rgb(x as usize, y as usize, rgb.0, rgb.1, rgb.2);
                }
            }
        }
    }

    #[test]
    fn test_dark_crop_is_unknown() {
        let crop = Frame::black(40, 40, 0.0);
        assert_eq!(HsvColorClassifier.classify(&crop), SignalState::Unknown);
    }

    #[test]
    fn test_empty_crop_is_unknown() {
        let crop = Frame::new(Vec::new(), 0, 0, 0.0);
        assert_eq!(HsvColorClassifier.classify(&crop), SignalState::Unknown);
    }

    #[test]
    fn test_red_disk_classified_red() {
        let mut crop = Frame::black(40, 40, 0.0);
        draw_disk(&mut crop, 20, 20, 6, (230, 30, 30));
        assert_eq!(HsvColorClassifier.classify(&crop), SignalState::Red);
    }

    #[test]
    fn test_green_disk_classified_green() {
        let mut crop = Frame::black(40, 40, 0.0);
        draw_disk(&mut crop, 20, 20, 6, (30, 220, 30));
        assert_eq!(HsvColorClassifier.classify(&crop), SignalState::Green);
    }

    #[test]
    fn test_yellow_disk_classified_yellow() {
        let mut crop = Frame::black(40, 40, 0.0);
        draw_disk(&mut crop, 20, 20, 6, (230, 230, 30));
        assert_eq!(HsvColorClassifier.classify(&crop), SignalState::Yellow);
    }

    #[test]
    fn test_elongated_glare_rejected_in_large_crop() {
        // A thin bright red streak in a crop too large for the density
        // fallback: circularity kills it.
        let mut crop = Frame::black(120, 40, 0.0);
        for x in 40..70 {
            crop.set_rgb(x, 20, 230, 30, 30);
        }
        assert_eq!(HsvColorClassifier.classify(&crop), SignalState::Unknown);
    }

    #[test]
    fn test_small_crop_density_fallback() {
        // Scattered non-circular red fragments in a signal-sized crop
        let mut crop = Frame::black(30, 30, 0.0);
        for &(x, y) in &[(5, 5), (6, 5), (15, 10), (16, 10), (22, 20), (23, 20)] {
            crop.set_rgb(x, y, 230, 30, 30);
        }
        assert_eq!(HsvColorClassifier.classify(&crop), SignalState::Red);
    }

    #[test]
    fn test_brightest_color_wins() {
        // Dim green blob and a bright red blob: bright mask keeps red only
        let mut crop = Frame::black(60, 30, 0.0);
        draw_disk(&mut crop, 15, 15, 5, (60, 120, 60));
        draw_disk(&mut crop, 45, 15, 5, (240, 25, 25));
        assert_eq!(HsvColorClassifier.classify(&crop), SignalState::Red);
    }
}
