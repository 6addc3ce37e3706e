// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wang's Formula (as described in Pyramid Algorithms by Ron Goldman, 2003,
//! Chapter 5, Section 5.6.3 on Bezier Approximation) is a fast method for
//! computing a lower bound on the number of recursive subdivisions required
//! to approximate a Bezier curve within a certain tolerance. For a curve of
//! degree `n` with control points `p[0]..p[n]` and tolerance `tol`:
//!
//! ```ignore
//!     m = max([length(p[k+2] - 2 * p[k+1] + p[k]) for (0 <= k <= n-2)])
//!     segments >= sqrt((n * (n - 1) * m) / (8 * tol))
//! ```
//!
//! The tessellator consumes these bounds as *parametric* segment counts. For
//! strokes it additionally needs *polar* segment counts, bounding how far the
//! curve's tangent may rotate within one segment so the stroke's offset
//! curves stay within tolerance.

use peniko::kurbo::{CubicBez, Vec2};

use crate::math::Transform;

/// One parametric segment per `1 / PARAMETRIC_PRECISION` pixels of error.
pub const PARAMETRIC_PRECISION: f32 = 4.0;

// The curve degree term sqrt(n * (n - 1) / 8) specialized for cubics:
//
//    sqrt(3 * (3 - 1) / 8)
//
const SQRT_OF_DEGREE_TERM_CUBIC: f64 = 0.86602540378;

/// Lower bound on the number of parametric segments needed to approximate
/// `cubic` within `1 / precision` pixels after `transform`.
pub fn cubic(cubic: &CubicBez, precision: f32, transform: &Transform) -> f32 {
    let v1 = -2.0 * p1_vec(cubic.p1) + p1_vec(cubic.p0) + p1_vec(cubic.p2);
    let v2 = -2.0 * p1_vec(cubic.p2) + p1_vec(cubic.p1) + p1_vec(cubic.p3);
    // The transform distributes over the second-difference vectors.
    let v1 = transform.apply_vec(v1);
    let v2 = transform.apply_vec(v2);
    let m = v1.length().max(v2.length());
    (SQRT_OF_DEGREE_TERM_CUBIC * m.sqrt() * precision.sqrt() as f64) as f32
}

#[inline]
fn p1_vec(p: peniko::kurbo::Point) -> Vec2 {
    p.to_vec2()
}

/// The widest tangent rotation a single polar segment may cover for a stroke
/// of radius `stroke_radius` (pixels) to stay within `tolerance` pixels of
/// the true offset curve.
pub fn max_polar_angle(stroke_radius: f32, tolerance: f32) -> f32 {
    const MIN_THETA: f32 = 1e-3;
    let r = stroke_radius.max(tolerance);
    (2.0 * (1.0 - tolerance / r).clamp(-1.0, 1.0).acos()).max(MIN_THETA)
}

/// Number of polar segments needed to cover `rotation` radians of tangent
/// rotation at the given stroke radius.
pub fn polar_segments(rotation: f32, stroke_radius: f32, tolerance: f32) -> u32 {
    if rotation <= 0.0 {
        return 0;
    }
    (rotation / max_polar_angle(stroke_radius, tolerance)).ceil() as u32
}

/// Unsigned angle between two tangent vectors, in `[0, pi]`.
pub fn tangent_rotation(a: Vec2, b: Vec2) -> f32 {
    let dot = a.dot(b);
    let len = (a.length_squared() * b.length_squared()).sqrt();
    if len == 0.0 {
        return 0.0;
    }
    ((dot / len).clamp(-1.0, 1.0)).acos() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use peniko::kurbo::Point;

    fn unit_semicircle_ish() -> CubicBez {
        // Cubic approximation of a half circle of radius 100.
        CubicBez::new(
            Point::new(0.0, 0.0),
            Point::new(0.0, 133.0),
            Point::new(200.0, 133.0),
            Point::new(200.0, 0.0),
        )
    }

    #[test]
    fn line_needs_no_subdivision() {
        let flat = CubicBez::new(
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(20.0, 0.0),
            Point::new(30.0, 0.0),
        );
        let n = cubic(&flat, PARAMETRIC_PRECISION, &Transform::IDENTITY);
        assert!(n <= 1.0);
    }

    #[test]
    fn segment_count_scales_with_transform() {
        let c = unit_semicircle_ish();
        let base = cubic(&c, PARAMETRIC_PRECISION, &Transform::IDENTITY);
        let scaled = cubic(
            &c,
            PARAMETRIC_PRECISION,
            &Transform {
                matrix: [4.0, 0.0, 0.0, 4.0],
                translation: [0.0; 2],
            },
        );
        // Wang's bound grows with sqrt of the scale.
        assert!((scaled / base - 2.0).abs() < 0.05);
    }

    #[test]
    fn polar_segments_cover_full_rotation() {
        let n = polar_segments(std::f32::consts::PI, 8.0, 0.25);
        // A 180 degree turn at radius 8 needs several segments.
        assert!(n >= 6, "{n}");
        // And each covers no more than the max angle.
        let theta = max_polar_angle(8.0, 0.25);
        assert!(theta * n as f32 >= std::f32::consts::PI);
    }

    #[test]
    fn zero_rotation_needs_no_polar_segments() {
        assert_eq!(polar_segments(0.0, 8.0, 0.25), 0);
    }

    #[test]
    fn tangent_rotation_is_unsigned() {
        let r1 = tangent_rotation(Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0));
        let r2 = tangent_rotation(Vec2::new(0.0, 1.0), Vec2::new(1.0, 0.0));
        assert!((r1 - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert_eq!(r1, r2);
    }
}
