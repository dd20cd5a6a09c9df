//! Depth raster back-projection
//!
//! Pinhole model with the principal point at the frame center:
//!
//! ```text
//! X =  (u - cx) * Z / fx
//! Y = -(v - cy) * Z / fy   (flipped so +Y is up)
//! Z = depth in meters
//! ```

use rand::Rng;
use serde::Serialize;

use crate::capture::{PixelFormat, RasterFrame};
use crate::error::ProjectError;

const MILLIMETERS_PER_METER: f32 = 1000.0;

/// Pinhole camera intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    /// Square pixels, principal point at the center of a `width x height` frame.
    pub fn centered(width: u32, height: u32, focal_length: f32) -> Self {
        Self {
            fx: focal_length,
            fy: focal_length,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionParams {
    /// Sample every `step`-th pixel in both directions
    pub step: u32,
    /// Samples at or below this depth (meters) are treated as no return
    pub min_depth: f32,
    /// Depth (meters) at the top of the color ramp
    pub max_depth: f32,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            step: 4,
            min_depth: 0.1,
            max_depth: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub color: [u8; 4],
}

/// Back-project a depth frame into colored points.
///
/// Only samples strictly deeper than `min_depth` are returned. The output
/// order is unspecified.
pub fn project(
    depth: &RasterFrame,
    intrinsics: &Intrinsics,
    params: &ProjectionParams,
) -> Result<Vec<Point3D>, ProjectError> {
    if depth.format() != PixelFormat::Depth16 {
        return Err(ProjectError::NotDepth(depth.format()));
    }
    if params.step == 0 {
        return Err(ProjectError::InvalidParameter("step must be at least 1"));
    }
    if params.max_depth.is_nan() || params.max_depth <= 0.0 {
        return Err(ProjectError::InvalidParameter("max_depth must be positive"));
    }
    if intrinsics.fx == 0.0 || intrinsics.fy == 0.0 {
        return Err(ProjectError::InvalidParameter("focal length must be non-zero"));
    }

    let step = params.step as usize;
    let columns = (depth.width() as usize).div_ceil(step);
    let rows = (depth.height() as usize).div_ceil(step);
    let mut points = Vec::with_capacity(columns * rows);

    for v in (0..depth.height()).step_by(step) {
        for u in (0..depth.width()).step_by(step) {
            let Some(millimeters) = depth.depth_at(u, v) else {
                continue;
            };
            let z = millimeters as f32 / MILLIMETERS_PER_METER;
            // Zero depth is never a return, whatever min_depth says
            if millimeters == 0 || z <= params.min_depth {
                continue;
            }
            points.push(Point3D {
                x: (u as f32 - intrinsics.cx) * z / intrinsics.fx,
                y: -(v as f32 - intrinsics.cy) * z / intrinsics.fy,
                z,
                color: jet(z / params.max_depth),
            });
        }
    }
    Ok(points)
}

// Control points of the classic "jet" ramp, per channel: (position, intensity)
const JET_RED: [(f32, f32); 5] = [(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)];
const JET_GREEN: [(f32, f32); 6] = [
    (0.0, 0.0),
    (0.125, 0.0),
    (0.375, 1.0),
    (0.64, 1.0),
    (0.91, 0.0),
    (1.0, 0.0),
];
const JET_BLUE: [(f32, f32); 5] = [(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)];

/// Map `t` in `0..=1` (clamped) through the jet ramp: dark blue, cyan,
/// yellow, dark red.
pub fn jet(t: f32) -> [u8; 4] {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let channel = |stops: &[(f32, f32)]| -> u8 {
        let value = stops
            .windows(2)
            .find(|pair| t <= pair[1].0)
            .map(|pair| {
                let ((t0, v0), (t1, v1)) = (pair[0], pair[1]);
                v0 + (v1 - v0) * (t - t0) / (t1 - t0)
            })
            .unwrap_or(stops[stops.len() - 1].1);
        (value * 255.0).round() as u8
    };
    [channel(&JET_RED), channel(&JET_GREEN), channel(&JET_BLUE), 255]
}

/// Random subset of at most `cap` points, for renderers that cannot keep up
/// with a full cloud.
pub fn sample_points<R: Rng + ?Sized>(points: &[Point3D], cap: usize, rng: &mut R) -> Vec<Point3D> {
    if points.len() <= cap {
        return points.to_vec();
    }
    rand::seq::index::sample(rng, points.len(), cap)
        .into_iter()
        .map(|i| points[i])
        .collect()
}
