// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The interior triangulation path plan.
//!
//! Large fills cover their interior with non-overlapping triangles from an
//! inner fan triangulator; only the outer curves need tessellated patches,
//! each ending in a single-segment bowtie join. The path is processed
//! twice: once to count and triangulate, and once to submit the outer
//! cubics. Since this plan is only chosen for large paths, and the interior
//! gets triangulated anyway, the duplicate walk costs little next to the
//! GPU time the path spends anyway.

use peniko::kurbo::{flatten, CubicBez, ParamCurve, PathEl, Point, QuadBez};

use crate::draw::{DrawCommon, PathDrawData, ResourceCounters};
use crate::frame::FrameStaging;
use crate::gpu::{
    TessVertexSpan, MAX_CURVE_SUBDIVISIONS, OUTER_CURVE_PATCH_SEGMENT_SPAN,
    PATCH_SEGMENT_COUNT_EXCLUDING_JOIN, TESS_TEXTURE_WIDTH,
};
use crate::math::Transform;
use crate::midpoint_fan::rows_touched;
use crate::wang::{self, PARAMETRIC_PRECISION};

/// Flattening tolerance for the interior polygon.
const FLATTEN_TOLERANCE: f64 = 0.25;

/// Outer cubic runs for a path are aligned so that they start on both a
/// texture row boundary and an outer-curve-patch boundary.
pub(crate) const OUTER_CUBIC_ALIGNMENT: u32 =
    OUTER_CURVE_PATCH_SEGMENT_SPAN * TESS_TEXTURE_WIDTH;

/// Split axis hint for the triangulator, derived from the path's bounding
/// box aspect ratio.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriangulatorAxis {
    Horizontal,
    Vertical,
    DontCare,
}

/// Number of outer curve patches one cubic subdivides into.
pub fn find_subdivision_count(cubic: &CubicBez, matrix: &Transform) -> u32 {
    let n = (wang::cubic(cubic, PARAMETRIC_PRECISION, matrix)
        / PATCH_SEGMENT_COUNT_EXCLUDING_JOIN as f32)
        .ceil() as u32;
    n.clamp(1, MAX_CURVE_SUBDIVISIONS)
}

/// Fans each flattened contour into triangles from a hinted origin vertex.
/// The real triangulator is a pluggable collaborator; this one is the
/// simplest structure that satisfies the interface: winding from
/// overlapping fan triangles cancels in the coverage buffer.
pub struct InnerFanTriangulator {
    polygons: Vec<Vec<Point>>,
    axis: TriangulatorAxis,
}

impl InnerFanTriangulator {
    pub fn new(path: &peniko::kurbo::BezPath, axis: TriangulatorAxis) -> Self {
        let mut polygons: Vec<Vec<Point>> = Vec::new();
        let mut current: Vec<Point> = Vec::new();
        flatten(path.elements().iter().copied(), FLATTEN_TOLERANCE, |el| {
            match el {
                PathEl::MoveTo(p) => {
                    if current.len() >= 3 {
                        polygons.push(std::mem::take(&mut current));
                    } else {
                        current.clear();
                    }
                    current.push(p);
                }
                PathEl::LineTo(p) => current.push(p),
                PathEl::ClosePath => {
                    if current.len() >= 3 {
                        polygons.push(std::mem::take(&mut current));
                    } else {
                        current.clear();
                    }
                }
                _ => unreachable!("flatten emits only moves, lines and closes"),
            }
        });
        if current.len() >= 3 {
            polygons.push(current);
        }
        Self { polygons, axis }
    }

    /// Index of the fan origin for one polygon, honoring the axis hint.
    fn fan_origin(&self, polygon: &[Point]) -> usize {
        match self.axis {
            TriangulatorAxis::Horizontal => polygon
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.x.total_cmp(&b.1.x))
                .map(|(i, _)| i)
                .unwrap_or(0),
            TriangulatorAxis::Vertical => polygon
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.y.total_cmp(&b.1.y))
                .map(|(i, _)| i)
                .unwrap_or(0),
            TriangulatorAxis::DontCare => 0,
        }
    }

    /// Upper bound (and for this triangulator, the exact count) of triangle
    /// vertices produced.
    pub fn max_vertex_count(&self) -> usize {
        self.polygons
            .iter()
            .map(|p| p.len().saturating_sub(2) * 3)
            .sum()
    }

    /// Emits the fan triangles for every polygon. Returns vertices written.
    pub fn write_triangles(&self, path_id: u32, frame: &mut FrameStaging) -> usize {
        let mut written = 0;
        for polygon in &self.polygons {
            let n = polygon.len();
            let origin = self.fan_origin(polygon);
            for i in 1..n - 1 {
                let a = polygon[origin];
                let b = polygon[(origin + i) % n];
                let c = polygon[(origin + i + 1) % n];
                frame.push_triangle(a, b, c, 1, path_id);
                written += 3;
            }
        }
        written
    }
}

enum PathOp {
    CountDataAndTriangulate,
    SubmitOuterCubics,
}

/// Draws a path by triangulating the interior into non-overlapping
/// triangles and tessellating the outer curves.
pub struct InteriorTriangulationPath {
    pub(crate) data: PathDrawData,
    triangulator: InnerFanTriangulator,
    /// Per-cubic subdivision counts from the counting pass, replayed at
    /// submit time.
    subdivisions: Vec<u32>,
    patch_count: u32,
    padding_vertex_count: u32,
    #[cfg(debug_assertions)]
    pending_patch_count: u32,
}

impl InteriorTriangulationPath {
    pub fn new(
        data: PathDrawData,
        matrix: &Transform,
        axis: TriangulatorAxis,
    ) -> (Self, ResourceCounters) {
        let triangulator = InnerFanTriangulator::new(&data.path, axis);
        let mut plan = Self {
            data,
            triangulator,
            subdivisions: Vec::new(),
            patch_count: 0,
            padding_vertex_count: 0,
            #[cfg(debug_assertions)]
            pending_patch_count: 0,
        };
        let mut counts = ResourceCounters {
            path_count: 1,
            contour_count: 1,
            max_triangle_vertex_count: plan.triangulator.max_vertex_count(),
            ..Default::default()
        };
        plan.process_path(PathOp::CountDataAndTriangulate, matrix, &mut counts, None);
        (plan, counts)
    }

    /// Both passes walk the path's curves identically; `op` selects whether
    /// we count or submit.
    fn process_path(
        &mut self,
        op: PathOp,
        matrix: &Transform,
        counts: &mut ResourceCounters,
        frame_and_ids: Option<(&mut FrameStaging, u32, u32)>,
    ) {
        match op {
            PathOp::CountDataAndTriangulate => {
                let mut cursor = 0u32;
                let mut last = Point::ZERO;
                for el in self.data.path.elements() {
                    let cubic = match *el {
                        PathEl::MoveTo(p) => {
                            last = p;
                            continue;
                        }
                        PathEl::LineTo(p) => {
                            last = p;
                            continue;
                        }
                        PathEl::ClosePath => continue,
                        PathEl::QuadTo(p1, p2) => {
                            let c = QuadBez::new(last, p1, p2).raise();
                            last = p2;
                            c
                        }
                        PathEl::CurveTo(p1, p2, p3) => {
                            let c = CubicBez::new(last, p1, p2, p3);
                            last = p3;
                            c
                        }
                    };
                    let subdivisions = find_subdivision_count(&cubic, matrix);
                    self.subdivisions.push(subdivisions);
                    self.patch_count += subdivisions;
                    for _ in 0..subdivisions {
                        counts.tessellated_segment_count +=
                            rows_touched(cursor, OUTER_CURVE_PATCH_SEGMENT_SPAN);
                        cursor += OUTER_CURVE_PATCH_SEGMENT_SPAN;
                    }
                }
                self.padding_vertex_count =
                    (OUTER_CUBIC_ALIGNMENT - cursor % OUTER_CUBIC_ALIGNMENT) % OUTER_CUBIC_ALIGNMENT;
                if self.padding_vertex_count > 0 {
                    counts.tessellated_segment_count +=
                        rows_touched(cursor, self.padding_vertex_count);
                }
                counts.outer_cubic_tess_vertex_count =
                    (cursor + self.padding_vertex_count) as usize;
            }
            PathOp::SubmitOuterCubics => {
                let (frame, path_id, contour_id) =
                    frame_and_ids.expect("submit pass needs a frame");
                let mut curve_idx = 0;
                let mut last = Point::ZERO;
                for el in self.data.path.elements() {
                    let cubic = match *el {
                        PathEl::MoveTo(p) | PathEl::LineTo(p) => {
                            last = p;
                            continue;
                        }
                        PathEl::ClosePath => continue,
                        PathEl::QuadTo(p1, p2) => {
                            let c = QuadBez::new(last, p1, p2).raise();
                            last = p2;
                            c
                        }
                        PathEl::CurveTo(p1, p2, p3) => {
                            let c = CubicBez::new(last, p1, p2, p3);
                            last = p3;
                            c
                        }
                    };
                    let subdivisions = self.subdivisions[curve_idx];
                    curve_idx += 1;
                    for i in 0..subdivisions {
                        let piece = cubic.subsegment(
                            i as f64 / subdivisions as f64..(i + 1) as f64 / subdivisions as f64,
                        );
                        // Every outer curve patch ends in a one-segment
                        // bowtie join.
                        let packed = TessVertexSpan::pack_segment_counts(
                            PATCH_SEGMENT_COUNT_EXCLUDING_JOIN,
                            1,
                            1,
                        );
                        frame.push_outer_cubic_section(
                            &piece,
                            piece.p3 - piece.p2,
                            OUTER_CURVE_PATCH_SEGMENT_SPAN,
                            packed,
                            contour_id,
                            path_id,
                        );
                        #[cfg(debug_assertions)]
                        {
                            self.pending_patch_count -= 1;
                        }
                    }
                }
                frame.push_outer_cubic_padding(self.padding_vertex_count);
            }
        }
    }

    pub fn push_to_context(&mut self, common: &DrawCommon, frame: &mut FrameStaging) {
        #[cfg(debug_assertions)]
        {
            self.pending_patch_count = self.patch_count;
        }
        let path_id = frame.push_path(common, &self.data);
        let midpoint = [
            (common.bounds.left + common.bounds.right) as f32 * 0.5,
            (common.bounds.top + common.bounds.bottom) as f32 * 0.5,
        ];
        let contour_id = frame.push_outer_contour(midpoint, path_id);

        let triangle_base = frame.triangle_vertex_cursor();
        let written = self.triangulator.write_triangles(path_id, frame);
        debug_assert!(written <= self.triangulator.max_vertex_count());
        frame.push_interior_triangulation_batch(
            common,
            self.data.fill_rule,
            triangle_base as u32,
            written as u32,
        );

        let patch_base = frame.outer_curve_patch_cursor();
        let matrix = common.matrix;
        let mut scratch_counts = ResourceCounters::default();
        self.process_path(
            PathOp::SubmitOuterCubics,
            &matrix,
            &mut scratch_counts,
            Some((frame, path_id, contour_id)),
        );
        #[cfg(debug_assertions)]
        debug_assert_eq!(self.pending_patch_count, 0, "submit pass lost patches");

        // The row padding writes degenerate spans, so the instance range
        // stays contiguous; those patches rasterize nothing.
        let patch_count = frame.outer_curve_patch_cursor() - patch_base;
        debug_assert_eq!(
            patch_count,
            self.patch_count + self.padding_vertex_count / OUTER_CURVE_PATCH_SEGMENT_SPAN
        );
        frame.push_outer_curve_batch(common, self.data.fill_rule, patch_base, patch_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peniko::kurbo::{BezPath, Cap, Join, Shape};
    use std::sync::Arc;

    fn star_path(radius: f64) -> BezPath {
        let mut path = BezPath::new();
        for i in 0..10 {
            let r = if i % 2 == 0 { radius } else { radius * 0.5 };
            let theta = i as f64 * std::f64::consts::PI / 5.0;
            let p = (radius + r * theta.cos(), radius + r * theta.sin());
            if i == 0 {
                path.move_to(p);
            } else {
                path.line_to(p);
            }
        }
        path.close_path();
        path
    }

    fn circle_path(radius: f64) -> BezPath {
        peniko::kurbo::Circle::new((radius, radius), radius).to_path(0.1)
    }

    fn fill_data(path: BezPath) -> PathDrawData {
        PathDrawData {
            path: Arc::new(path),
            fill_rule: peniko::Fill::NonZero,
            stroke_radius: 0.0,
            join: Join::Miter,
            cap: Cap::Butt,
            miter_limit: 4.0,
        }
    }

    #[test]
    fn star_counts_triangles_and_no_outer_cubics() {
        let (plan, counts) = InteriorTriangulationPath::new(
            fill_data(star_path(600.0)),
            &Transform::IDENTITY,
            TriangulatorAxis::DontCare,
        );
        // A 10-vertex polygon fans into 8 triangles.
        assert_eq!(counts.max_triangle_vertex_count, 24);
        assert_eq!(counts.outer_cubic_tess_vertex_count, 0);
        assert_eq!(plan.patch_count, 0);
        assert_eq!(counts.path_count, 1);
        assert_eq!(counts.contour_count, 1);
    }

    #[test]
    fn circle_subdivides_outer_cubics() {
        let (plan, counts) = InteriorTriangulationPath::new(
            fill_data(circle_path(500.0)),
            &Transform::IDENTITY,
            TriangulatorAxis::DontCare,
        );
        assert!(plan.patch_count > 0);
        assert_eq!(
            counts.outer_cubic_tess_vertex_count as u32 % OUTER_CUBIC_ALIGNMENT,
            0
        );
        assert!(counts.max_triangle_vertex_count > 0);
        // One span per patch, plus the padding run.
        assert!(
            counts.tessellated_segment_count
                >= plan.patch_count as usize + rows_touched(0, plan.padding_vertex_count) - 1
        );
    }

    #[test]
    fn subdivision_count_is_clamped() {
        // A degenerate flat curve needs one patch.
        let flat = CubicBez::new(
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(3.0, 0.0),
        );
        assert_eq!(find_subdivision_count(&flat, &Transform::IDENTITY), 1);

        // An astronomically large curve hits the cap.
        let huge = CubicBez::new(
            Point::new(0.0, 0.0),
            Point::new(1.0e9, 0.0),
            Point::new(1.0e9, 1.0e9),
            Point::new(0.0, 1.0e9),
        );
        assert_eq!(
            find_subdivision_count(&huge, &Transform::IDENTITY),
            MAX_CURVE_SUBDIVISIONS
        );
    }

    #[test]
    fn axis_hint_moves_the_fan_origin() {
        let triangulator = InnerFanTriangulator::new(&star_path(100.0), TriangulatorAxis::DontCare);
        let horizontal = InnerFanTriangulator::new(&star_path(100.0), TriangulatorAxis::Horizontal);
        let polygon = &triangulator.polygons[0];
        assert_eq!(triangulator.fan_origin(polygon), 0);
        let h_origin = horizontal.fan_origin(polygon);
        assert!(polygon
            .iter()
            .all(|p| polygon[h_origin].x <= p.x));
    }
}
