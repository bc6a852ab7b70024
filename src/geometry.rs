// src/geometry.rs
//
// Perspective manager: calibrated homography between the camera image
// plane and a fixed-size top-down (bird's-eye) canvas. All ground-plane
// reasoning downstream (line angles, stop-line orientation, speed scale)
// happens in the top-down space, so it is invariant to camera tilt within
// the calibrated region. Valid under a planar-road, fixed-camera
// assumption only.

use crate::types::{Frame, GeometryConfig, GrayFrame};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use thiserror::Error;
use tracing::{debug, warn};

/// Side length of the square top-down canvas, decoupled from the source
/// frame resolution.
pub const TOP_DOWN_SIZE: usize = 800;

const MIN_QUAD_AREA: f64 = 100.0;
const EPS: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("calibration quadrilateral is degenerate or self-intersecting")]
    DegenerateCalibration,
    #[error("homography system is singular")]
    SingularHomography,
}

pub struct PerspectiveManager {
    frame_width: usize,
    frame_height: usize,
    /// Calibration trapezoid in normalized [0,1] frame coordinates
    src_pts: [[f64; 2]; 4],
    /// Image plane -> top-down
    matrix: Matrix3<f64>,
    /// Top-down -> image plane
    inv_matrix: Matrix3<f64>,
}

impl PerspectiveManager {
    pub fn new(config: &GeometryConfig) -> Result<Self, GeometryError> {
        let (matrix, inv_matrix) = build_matrices(
            &config.calibration,
            config.frame_width,
            config.frame_height,
        )?;
        Ok(Self {
            frame_width: config.frame_width,
            frame_height: config.frame_height,
            src_pts: config.calibration,
            matrix,
            inv_matrix,
        })
    }

    /// Operator-triggered recalibration with a new normalized trapezoid,
    /// ordered top-left, top-right, bottom-right, bottom-left.
    ///
    /// A degenerate or self-intersecting quadrilateral is rejected and the
    /// previous transforms stay in effect.
    pub fn set_calibration(&mut self, points: [[f64; 2]; 4]) -> Result<(), GeometryError> {
        match build_matrices(&points, self.frame_width, self.frame_height) {
            Ok((matrix, inv_matrix)) => {
                self.src_pts = points;
                self.matrix = matrix;
                self.inv_matrix = inv_matrix;
                debug!("Perspective calibration updated: {:?}", points);
                Ok(())
            }
            Err(e) => {
                warn!("Calibration rejected ({}), keeping previous transforms", e);
                Err(e)
            }
        }
    }

    pub fn calibration(&self) -> [[f64; 2]; 4] {
        self.src_pts
    }

    /// Map an image-plane point into top-down coordinates.
    pub fn map_to_top_down(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        apply(&self.matrix, x, y)
    }

    /// Map a top-down point back into the image plane.
    pub fn map_from_top_down(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        apply(&self.inv_matrix, x, y)
    }

    /// Warp a full RGB frame into the top-down canvas. Rendering-side
    /// convenience; the reasoning path only warps masks.
    pub fn warp_frame_to_top_down(&self, frame: &Frame) -> Frame {
        let mut out = Frame::black(TOP_DOWN_SIZE, TOP_DOWN_SIZE, frame.timestamp);
        for dy in 0..TOP_DOWN_SIZE {
            for dx in 0..TOP_DOWN_SIZE {
                if let Some((sx, sy)) = apply(&self.inv_matrix, dx as f64, dy as f64) {
                    let sx = sx.round();
                    let sy = sy.round();
                    if sx >= 0.0
                        && sy >= 0.0
                        && (sx as usize) < frame.width
                        && (sy as usize) < frame.height
                    {
                        let (r, g, b) = frame.rgb(sx as usize, sy as usize);
                        out.set_rgb(dx, dy, r, g, b);
                    }
                }
            }
        }
        out
    }

    /// Warp a mask into the top-down canvas (nearest-neighbor, inverse
    /// mapped so every destination pixel is defined).
    pub fn warp_to_top_down(&self, mask: &GrayFrame) -> GrayFrame {
        let mut out = GrayFrame::zeros(TOP_DOWN_SIZE, TOP_DOWN_SIZE);
        for dy in 0..TOP_DOWN_SIZE {
            for dx in 0..TOP_DOWN_SIZE {
                if let Some((sx, sy)) = apply(&self.inv_matrix, dx as f64, dy as f64) {
                    let sx = sx.round();
                    let sy = sy.round();
                    if sx >= 0.0
                        && sy >= 0.0
                        && (sx as usize) < mask.width
                        && (sy as usize) < mask.height
                    {
                        out.set(dx, dy, mask.get(sx as usize, sy as usize));
                    }
                }
            }
        }
        out
    }
}

fn apply(m: &Matrix3<f64>, x: f64, y: f64) -> Option<(f64, f64)> {
    let v = m * Vector3::new(x, y, 1.0);
    let w = v[2];
    if !w.is_finite() || w.abs() <= EPS || !v[0].is_finite() || !v[1].is_finite() {
        return None;
    }
    Some((v[0] / w, v[1] / w))
}

fn build_matrices(
    normalized: &[[f64; 2]; 4],
    frame_w: usize,
    frame_h: usize,
) -> Result<(Matrix3<f64>, Matrix3<f64>), GeometryError> {
    let src: Vec<[f64; 2]> = normalized
        .iter()
        .map(|p| [p[0] * frame_w as f64, p[1] * frame_h as f64])
        .collect();
    let src: [[f64; 2]; 4] = [src[0], src[1], src[2], src[3]];

    validate_quad(&src)?;

    let s = TOP_DOWN_SIZE as f64;
    let dst = [[0.0, 0.0], [s, 0.0], [s, s], [0.0, s]];

    let matrix = solve_homography(&src, &dst)?;
    let inv_matrix = matrix
        .try_inverse()
        .ok_or(GeometryError::SingularHomography)?;
    Ok((matrix, inv_matrix))
}

/// Direct linear solve of the 8-dof projective transform mapping four
/// source points onto four destination points.
fn solve_homography(
    src: &[[f64; 2]; 4],
    dst: &[[f64; 2]; 4],
) -> Result<Matrix3<f64>, GeometryError> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let [x, y] = src[i];
        let [u, v] = dst[i];
        let r = i * 2;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -u * x;
        a[(r, 7)] = -u * y;
        b[r] = u;

        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -v * x;
        a[(r + 1, 7)] = -v * y;
        b[r + 1] = v;
    }

    let h = a.lu().solve(&b).ok_or(GeometryError::SingularHomography)?;
    Ok(Matrix3::new(
        h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0,
    ))
}

/// The calibration quadrilateral must be simple (opposite edges do not
/// cross) and have non-trivial area.
fn validate_quad(pts: &[[f64; 2]; 4]) -> Result<(), GeometryError> {
    let area = shoelace_area(pts);
    if area.abs() < MIN_QUAD_AREA {
        return Err(GeometryError::DegenerateCalibration);
    }
    // Edges: 0-1, 1-2, 2-3, 3-0. Only non-adjacent pairs can cross.
    if segments_intersect(pts[0], pts[1], pts[2], pts[3])
        || segments_intersect(pts[1], pts[2], pts[3], pts[0])
    {
        return Err(GeometryError::DegenerateCalibration);
    }
    Ok(())
}

fn shoelace_area(pts: &[[f64; 2]; 4]) -> f64 {
    let mut sum = 0.0;
    for i in 0..4 {
        let [x1, y1] = pts[i];
        let [x2, y2] = pts[(i + 1) % 4];
        sum += x1 * y2 - x2 * y1;
    }
    sum / 2.0
}

fn orientation(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn segments_intersect(a: [f64; 2], b: [f64; 2], c: [f64; 2], d: [f64; 2]) -> bool {
    let o1 = orientation(a, b, c);
    let o2 = orientation(a, b, d);
    let o3 = orientation(c, d, a);
    let o4 = orientation(c, d, b);
    (o1 * o2 < 0.0) && (o3 * o4 < 0.0)
}
