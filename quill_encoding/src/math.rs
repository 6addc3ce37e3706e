// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::ops::Mul;

use bytemuck::{Pod, Zeroable};
use peniko::kurbo;

/// Affine transformation matrix.
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Transform {
    /// 2x2 matrix.
    pub matrix: [f32; 4],
    /// Translation.
    pub translation: [f32; 2],
}

impl Transform {
    /// Identity transform.
    pub const IDENTITY: Self = Self {
        matrix: [1.0, 0.0, 0.0, 1.0],
        translation: [0.0; 2],
    };

    /// Creates a transform from a kurbo affine matrix.
    pub fn from_kurbo(transform: &kurbo::Affine) -> Self {
        let c = transform.as_coeffs().map(|x| x as f32);
        Self {
            matrix: [c[0], c[1], c[2], c[3]],
            translation: [c[4], c[5]],
        }
    }

    /// Converts the transform to a kurbo affine matrix.
    pub fn to_kurbo(&self) -> kurbo::Affine {
        kurbo::Affine::new(
            [
                self.matrix[0],
                self.matrix[1],
                self.matrix[2],
                self.matrix[3],
                self.translation[0],
                self.translation[1],
            ]
            .map(|x| x as f64),
        )
    }

    /// Applies the full transform to a point.
    pub fn apply(&self, p: kurbo::Point) -> kurbo::Point {
        let (x, y) = (p.x as f32, p.y as f32);
        kurbo::Point::new(
            (self.matrix[0] * x + self.matrix[2] * y + self.translation[0]) as f64,
            (self.matrix[1] * x + self.matrix[3] * y + self.translation[1]) as f64,
        )
    }

    /// Applies only the 2x2 part, for vectors.
    pub fn apply_vec(&self, v: kurbo::Vec2) -> kurbo::Vec2 {
        let (x, y) = (v.x as f32, v.y as f32);
        kurbo::Vec2::new(
            (self.matrix[0] * x + self.matrix[2] * y) as f64,
            (self.matrix[1] * x + self.matrix[3] * y) as f64,
        )
    }

    /// Returns the inverse transform, or `None` if the matrix is singular.
    pub fn invert(&self) -> Option<Self> {
        let [a, b, c, d] = self.matrix;
        let det = a * d - b * c;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        let matrix = [d * inv_det, -b * inv_det, -c * inv_det, a * inv_det];
        let [tx, ty] = self.translation;
        Some(Self {
            matrix,
            translation: [
                -(matrix[0] * tx + matrix[2] * ty),
                -(matrix[1] * tx + matrix[3] * ty),
            ],
        })
    }

    /// An upper bound on the scale factor this transform applies to any
    /// unit vector.
    pub fn max_scale(&self) -> f32 {
        let m = self.matrix;
        let v1x = m[0] + m[3];
        let v2x = m[0] - m[3];
        let v1y = m[1] - m[2];
        let v2y = m[1] + m[2];
        ((v1x * v1x + v1y * v1y).sqrt() + (v2x * v2x + v2y * v2y).sqrt()) * 0.5
    }
}

impl Mul for Transform {
    type Output = Self;

    #[inline]
    fn mul(self, other: Self) -> Self {
        Self {
            matrix: [
                self.matrix[0] * other.matrix[0] + self.matrix[2] * other.matrix[1],
                self.matrix[1] * other.matrix[0] + self.matrix[3] * other.matrix[1],
                self.matrix[0] * other.matrix[2] + self.matrix[2] * other.matrix[3],
                self.matrix[1] * other.matrix[2] + self.matrix[3] * other.matrix[3],
            ],
            translation: [
                self.matrix[0] * other.translation[0]
                    + self.matrix[2] * other.translation[1]
                    + self.translation[0],
                self.matrix[1] * other.translation[0]
                    + self.matrix[3] * other.translation[1]
                    + self.translation[1],
            ],
        }
    }
}

/// Integer bounding box in pixel space.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct IntBounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl IntBounds {
    /// A bounding box reasonably larger than any screen, but not so big
    /// that it runs the risk of overflowing.
    pub const FULLSCREEN: Self = Self {
        left: 0,
        top: 0,
        right: 1 << 24,
        bottom: 1 << 24,
    };

    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// The smallest integer bounds containing `rect`.
    pub fn round_out(rect: kurbo::Rect) -> Self {
        Self {
            left: rect.x0.floor() as i32,
            top: rect.y0.floor() as i32,
            right: rect.x1.ceil() as i32,
            bottom: rect.y1.ceil() as i32,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        }
    }
}

/// Screen-space area of `bounds` after mapping its four corners through
/// `transform`. This is the exact area of the resulting parallelogram, not
/// the area of its axis-aligned bounds, so rotation doesn't inflate it.
pub fn transformed_area(bounds: kurbo::Rect, transform: &Transform) -> f32 {
    let pts = [
        kurbo::Point::new(bounds.x0, bounds.y0),
        kurbo::Point::new(bounds.x1, bounds.y0),
        kurbo::Point::new(bounds.x1, bounds.y1),
        kurbo::Point::new(bounds.x0, bounds.y1),
    ]
    .map(|p| transform.apply(p));
    let v = [pts[1] - pts[0], pts[2] - pts[0], pts[3] - pts[0]];
    ((v[0].cross(v[1]).abs() + v[1].cross(v[2]).abs()) * 0.5) as f32
}

/// Matrix that maps from pixel space to "normalized clip rect space",
/// where the clip rect is the normalized rectangle [-1, -1, +1, +1].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClipRectInverseMatrix {
    inverse: Transform,
}

impl ClipRectInverseMatrix {
    /// Clips away everything.
    pub fn empty() -> Self {
        Self {
            inverse: Transform {
                matrix: [0.0; 4],
                translation: [f32::MAX; 2],
            },
        }
    }

    /// Clips away nothing.
    pub fn wide_open() -> Self {
        Self {
            inverse: Transform {
                matrix: [0.0; 4],
                translation: [0.0; 2],
            },
        }
    }

    pub fn new(clip_matrix: &Transform, clip_rect: kurbo::Rect) -> Self {
        let m = *clip_matrix
            * Transform {
                matrix: [
                    (clip_rect.width() * 0.5) as f32,
                    0.0,
                    0.0,
                    (clip_rect.height() * 0.5) as f32,
                ],
                translation: [clip_rect.center().x as f32, clip_rect.center().y as f32],
            };
        match m.invert() {
            Some(inverse) if clip_rect.width() > 0.0 && clip_rect.height() > 0.0 => {
                Self { inverse }
            }
            // A zero-size rect or non-invertible matrix clips away everything.
            _ => Self::empty(),
        }
    }

    pub fn inverse(&self) -> &Transform {
        &self.inverse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peniko::kurbo::{Affine, Point, Rect};

    #[test]
    fn transform_roundtrip() {
        let affine = Affine::new([2.0, 0.5, -0.25, 3.0, 10.0, -7.0]);
        let t = Transform::from_kurbo(&affine);
        let back = t.to_kurbo().as_coeffs();
        for (a, b) in affine.as_coeffs().iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn invert_composes_to_identity() {
        let t = Transform::from_kurbo(&Affine::new([1.5, 0.25, -0.5, 2.0, 3.0, 4.0]));
        let inv = t.invert().unwrap();
        let id = t * inv;
        assert!((id.matrix[0] - 1.0).abs() < 1e-5);
        assert!(id.matrix[1].abs() < 1e-5);
        assert!(id.matrix[2].abs() < 1e-5);
        assert!((id.matrix[3] - 1.0).abs() < 1e-5);
        assert!(id.translation[0].abs() < 1e-4);
        assert!(id.translation[1].abs() < 1e-4);
    }

    #[test]
    fn singular_matrix_does_not_invert() {
        let t = Transform {
            matrix: [1.0, 2.0, 2.0, 4.0],
            translation: [0.0; 2],
        };
        assert!(t.invert().is_none());
    }

    #[test]
    fn area_is_rotation_invariant() {
        let rect = Rect::new(0.0, 0.0, 100.0, 50.0);
        let upright = transformed_area(rect, &Transform::IDENTITY);
        let rotated = transformed_area(
            rect,
            &Transform::from_kurbo(&Affine::rotate(std::f64::consts::FRAC_PI_4)),
        );
        assert!((upright - 5000.0).abs() < 1e-3);
        assert!((rotated - 5000.0).abs() < 0.5);
    }

    #[test]
    fn degenerate_clip_rect_is_empty() {
        let m = ClipRectInverseMatrix::new(&Transform::IDENTITY, Rect::new(0.0, 0.0, 0.0, 10.0));
        assert_eq!(m, ClipRectInverseMatrix::empty());
    }

    #[test]
    fn clip_rect_maps_center_to_origin() {
        let rect = Rect::new(10.0, 20.0, 30.0, 60.0);
        let m = ClipRectInverseMatrix::new(&Transform::IDENTITY, rect);
        let center = m.inverse().apply(Point::new(20.0, 40.0));
        assert!(center.x.abs() < 1e-5 && center.y.abs() < 1e-5);
        let corner = m.inverse().apply(Point::new(30.0, 60.0));
        assert!((corner.x - 1.0).abs() < 1e-5 && (corner.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn bounds_intersect_and_union() {
        let a = IntBounds::new(0, 0, 10, 10);
        let b = IntBounds::new(5, 5, 15, 15);
        let c = IntBounds::new(20, 20, 30, 30);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert_eq!(a.union(&c), IntBounds::new(0, 0, 30, 30));
        assert_eq!(a.intersect(&b), IntBounds::new(5, 5, 10, 10));
    }
}
