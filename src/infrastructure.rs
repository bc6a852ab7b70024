// src/infrastructure.rs
//
// Stop-line and crosswalk extraction from road markings.
//
// The frame is filtered down to bright, low-saturation (paint-like)
// pixels inside a vertical region of interest, detected objects are
// masked out so occlusion edges cannot masquerade as markings, and the
// result is warped into the top-down canvas where stop lines and
// crosswalk stripes are near-horizontal by construction. A probabilistic
// Hough pass over the warped mask yields line segments; the longest
// become stop-line candidates and vertical clusters of parallel stripes
// become the crosswalk.

use crate::geometry::PerspectiveManager;
use crate::signal::color::rgb_to_hsv;
use crate::types::{DetectedObject, Frame, GrayFrame, InfrastructureConfig, Polygon};
use tracing::debug;

/// Half-thickness of the quadrilateral drawn around a stop-line segment
/// after mapping back to image space.
const STOP_LINE_HALF_THICKNESS: f32 = 4.0;

/// Half-thickness of the synthesized virtual stop line.
const VIRTUAL_LINE_HALF_THICKNESS: f32 = 8.0;

const MIN_CROSSWALK_STRIPES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Segment {
    pub fn length(&self) -> f32 {
        let (dx, dy) = (self.x2 - self.x1, self.y2 - self.y1);
        (dx * dx + dy * dy).sqrt()
    }

    /// Absolute angle from the horizontal axis in degrees, [0, 180).
    pub fn angle_deg(&self) -> f32 {
        (self.y2 - self.y1).atan2(self.x2 - self.x1).to_degrees().abs()
    }

    fn mid_y(&self) -> f32 {
        (self.y1 + self.y2) / 2.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedInfrastructure {
    pub stop_lines: Vec<Polygon>,
    pub crosswalks: Vec<Polygon>,
}

pub struct InfrastructureExtractor {
    config: InfrastructureConfig,
}

impl InfrastructureExtractor {
    pub fn new(config: InfrastructureConfig) -> Self {
        Self { config }
    }

    /// Extract stop-line and crosswalk polygons in image coordinates.
    ///
    /// `road_mask` is the optional external segmentation mask (same
    /// resolution as the frame, nonzero = road/marking); when absent the
    /// color heuristic stands alone. `exclusion_boxes` are detected
    /// objects whose pixels must not vote.
    ///
    /// Finding nothing is a normal outcome, not an error.
    pub fn extract(
        &self,
        frame: &Frame,
        road_mask: Option<&GrayFrame>,
        exclusion_boxes: &[[f32; 4]],
        pm: &PerspectiveManager,
    ) -> ExtractedInfrastructure {
        let mask = self.marking_mask(frame, road_mask, exclusion_boxes);
        let bev_mask = pm.warp_to_top_down(&mask);
        self.extract_from_top_down(&bev_mask, pm)
    }

    /// Bright, low-saturation pixels inside the vertical ROI, minus
    /// excluded objects, optionally intersected with the external mask.
    fn marking_mask(
        &self,
        frame: &Frame,
        road_mask: Option<&GrayFrame>,
        exclusion_boxes: &[[f32; 4]],
    ) -> GrayFrame {
        let (w, h) = (frame.width, frame.height);
        let mut mask = GrayFrame::zeros(w, h);

        let roi_top = (h as f32 * self.config.roi_top_ratio) as usize;
        let roi_bottom = ((h as f32 * self.config.roi_bottom_ratio) as usize).min(h);

        for y in roi_top..roi_bottom {
            for x in 0..w {
                if let Some(rm) = road_mask {
                    if rm.width == w && rm.height == h && rm.get(x, y) == 0 {
                        continue;
                    }
                }
                let (r, g, b) = frame.rgb(x, y);
                let (_, s, v) = rgb_to_hsv(r as f32, g as f32, b as f32);
                if v >= self.config.min_value && s <= self.config.max_saturation {
                    mask.set(x, y, 255);
                }
            }
        }

        for bbox in exclusion_boxes {
            let x1 = (bbox[0].max(0.0) as usize).min(w);
            let y1 = (bbox[1].max(0.0) as usize).min(h);
            let x2 = (bbox[2].max(0.0) as usize).min(w);
            let y2 = (bbox[3].max(0.0) as usize).min(h);
            for y in y1..y2 {
                for x in x1..x2 {
                    mask.set(x, y, 0);
                }
            }
        }
        mask
    }

    /// Second half of the pipeline, split out so it can run on an
    /// already-warped mask.
    fn extract_from_top_down(
        &self,
        bev_mask: &GrayFrame,
        pm: &PerspectiveManager,
    ) -> ExtractedInfrastructure {
        let segments = hough_line_segments(
            bev_mask,
            self.config.hough_threshold,
            self.config.min_line_length,
            self.config.max_line_gap,
        );

        // Across-the-road markings are horizontal in top-down space
        let max_angle = self.config.max_angle_deg;
        let candidates: Vec<Segment> = segments
            .into_iter()
            .filter(|s| {
                let a = s.angle_deg();
                a < max_angle || a > 180.0 - max_angle
            })
            .collect();

        if candidates.is_empty() {
            return ExtractedInfrastructure::default();
        }
        debug!("{} near-horizontal marking segments", candidates.len());

        let (stop_segments, crosswalk_bounds) =
            classify_candidates(candidates, self.config.cluster_tolerance_px);

        let mut result = ExtractedInfrastructure::default();
        for seg in stop_segments {
            let p1 = pm.map_from_top_down(seg.x1 as f64, seg.y1 as f64);
            let p2 = pm.map_from_top_down(seg.x2 as f64, seg.y2 as f64);
            if let (Some(p1), Some(p2)) = (p1, p2) {
                result.stop_lines.push(thin_quad(
                    (p1.0 as f32, p1.1 as f32),
                    (p2.0 as f32, p2.1 as f32),
                    STOP_LINE_HALF_THICKNESS,
                ));
            }
        }

        if let Some([min_x, min_y, max_x, max_y]) = crosswalk_bounds {
            let corners = [
                (min_x, min_y),
                (max_x, min_y),
                (max_x, max_y),
                (min_x, max_y),
            ];
            let mapped: Vec<_> = corners
                .iter()
                .filter_map(|&(x, y)| pm.map_from_top_down(x as f64, y as f64))
                .map(|(x, y)| [x as f32, y as f32])
                .collect();
            if mapped.len() == 4 {
                result.crosswalks.push(Polygon {
                    points: [mapped[0], mapped[1], mapped[2], mapped[3]],
                });
            }
        }
        result
    }
}

/// Top-2 longest segments become stop-line candidates; groups of at least
/// three segments at nearly the same vertical position become crosswalk
/// candidates, the largest group winning. Returns the stop segments and
/// the crosswalk bounding box `[min_x, min_y, max_x, max_y]`, all in
/// top-down coordinates.
fn classify_candidates(
    mut candidates: Vec<Segment>,
    cluster_tolerance: f32,
) -> (Vec<Segment>, Option<[f32; 4]>) {
    candidates.sort_by(|a, b| {
        b.length()
            .partial_cmp(&a.length())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let stop_segments: Vec<Segment> = candidates.iter().take(2).copied().collect();

    let mut by_y = candidates.clone();
    by_y.sort_by(|a, b| {
        a.mid_y()
            .partial_cmp(&b.mid_y())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut best_group: Vec<Segment> = Vec::new();
    let mut group: Vec<Segment> = Vec::new();
    for seg in by_y {
        match group.last() {
            Some(last) if (seg.mid_y() - last.mid_y()).abs() <= cluster_tolerance => {
                group.push(seg);
            }
            _ => {
                if group.len() > best_group.len() {
                    best_group = std::mem::take(&mut group);
                } else {
                    group.clear();
                }
                group.push(seg);
            }
        }
    }
    if group.len() > best_group.len() {
        best_group = group;
    }

    let crosswalk = if best_group.len() >= MIN_CROSSWALK_STRIPES {
        let xs = best_group.iter().flat_map(|s| [s.x1, s.x2]);
        let ys = best_group.iter().flat_map(|s| [s.y1, s.y2]);
        let (min_x, max_x) = min_max(xs);
        let (min_y, max_y) = min_max(ys);
        Some([min_x, min_y, max_x, max_y])
    } else {
        None
    };

    (stop_segments, crosswalk)
}

fn min_max(values: impl Iterator<Item = f32>) -> (f32, f32) {
    values.fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

fn thin_quad(p1: (f32, f32), p2: (f32, f32), half: f32) -> Polygon {
    Polygon {
        points: [
            [p1.0, p1.1 - half],
            [p2.0, p2.1 - half],
            [p2.0, p2.1 + half],
            [p1.0, p1.1 + half],
        ],
    }
}

/// Degraded-accuracy fallback when no physical stop line is visible but
/// signals are: a full-width horizontal band at the mean vertical
/// position of the signal bounding-box bottoms. Deliberately coarse —
/// enough to reason about "past the signal" when paint is worn away.
pub fn virtual_stop_line(signals: &[&DetectedObject], frame_width: usize) -> Option<Polygon> {
    if signals.is_empty() {
        return None;
    }
    let avg_y = signals.iter().map(|s| s.bbox[3]).sum::<f32>() / signals.len() as f32;
    let w = frame_width as f32;
    Some(thin_quad((0.0, avg_y), (w, avg_y), VIRTUAL_LINE_HALF_THICKNESS))
}

/// Deterministic probabilistic-Hough segment extraction.
///
/// Every nonzero pixel votes over the full angular range; accumulator
/// peaks above `threshold` are walked along their line, chaining nonzero
/// runs that tolerate gaps up to `max_gap` and keeping runs at least
/// `min_length` long. Consumed pixels are cleared so overlapping peaks do
/// not re-emit the same physical stripe.
pub fn hough_line_segments(
    mask: &GrayFrame,
    threshold: u32,
    min_length: f32,
    max_gap: f32,
) -> Vec<Segment> {
    let (w, h) = (mask.width, mask.height);
    let points: Vec<(usize, usize)> = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .filter(|&(x, y)| mask.get(x, y) > 0)
        .collect();
    if points.is_empty() {
        return Vec::new();
    }

    let diag = ((w * w + h * h) as f64).sqrt();
    let n_rho = 2 * diag.ceil() as usize + 1;
    let n_theta = 180usize;

    let tables: Vec<(f64, f64)> = (0..n_theta)
        .map(|t| {
            let rad = (t as f64).to_radians();
            (rad.cos(), rad.sin())
        })
        .collect();

    let mut acc = vec![0u32; n_theta * n_rho];
    for &(x, y) in &points {
        for (t, &(cos_t, sin_t)) in tables.iter().enumerate() {
            let rho = x as f64 * cos_t + y as f64 * sin_t;
            let idx = (rho + diag).round() as usize;
            if idx < n_rho {
                acc[t * n_rho + idx] += 1;
            }
        }
    }

    let mut peaks: Vec<(u32, usize, usize)> = Vec::new();
    for t in 0..n_theta {
        for r in 0..n_rho {
            let votes = acc[t * n_rho + r];
            if votes >= threshold {
                peaks.push((votes, t, r));
            }
        }
    }
    // Strongest lines claim their pixels first
    peaks.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut work = mask.data.clone();
    let mut segments = Vec::new();

    for (_, t, r) in peaks {
        let (cos_t, sin_t) = tables[t];
        let rho = r as f64 - diag;
        walk_line(
            &mut work,
            w,
            h,
            rho,
            cos_t,
            sin_t,
            diag,
            min_length,
            max_gap,
            &mut segments,
        );
    }
    segments
}

#[allow(clippy::too_many_arguments)]
fn walk_line(
    work: &mut [u8],
    w: usize,
    h: usize,
    rho: f64,
    cos_t: f64,
    sin_t: f64,
    diag: f64,
    min_length: f32,
    max_gap: f32,
    segments: &mut Vec<Segment>,
) {
    // Line: x cos + y sin = rho, walked along direction (-sin, cos)
    let (px, py) = (rho * cos_t, rho * sin_t);
    let (dx, dy) = (-sin_t, cos_t);
    // Rounded normal for tolerance one pixel to either side
    let (nx, ny) = (cos_t.round() as i64, sin_t.round() as i64);

    let mut run_start: Option<(f32, f32)> = None;
    let mut run_end = (0.0f32, 0.0f32);
    let mut gap = 0.0f32;

    let mut close_run = |start: &mut Option<(f32, f32)>, end: (f32, f32), out: &mut Vec<Segment>| {
        if let Some(s) = start.take() {
            let seg = Segment {
                x1: s.0,
                y1: s.1,
                x2: end.0,
                y2: end.1,
            };
            if seg.length() >= min_length {
                out.push(seg);
            }
        }
    };

    let steps = (2.0 * diag).ceil() as i64;
    for step in -steps..=steps {
        let t = step as f64;
        let x = (px + t * dx).round() as i64;
        let y = (py + t * dy).round() as i64;

        let mut hit = false;
        for (cx, cy) in [(x, y), (x + nx, y + ny), (x - nx, y - ny)] {
            if cx >= 0 && cy >= 0 && (cx as usize) < w && (cy as usize) < h {
                let idx = cy as usize * w + cx as usize;
                if work[idx] > 0 {
                    if !hit {
                        hit = true;
                        if run_start.is_none() {
                            run_start = Some((cx as f32, cy as f32));
                        }
                        run_end = (cx as f32, cy as f32);
                        gap = 0.0;
                    }
                    work[idx] = 0;
                }
            }
        }

        if !hit && run_start.is_some() {
            gap += 1.0;
            if gap > max_gap {
                close_run(&mut run_start, run_end, segments);
                gap = 0.0;
            }
        }
    }
    close_run(&mut run_start, run_end, segments);
}
