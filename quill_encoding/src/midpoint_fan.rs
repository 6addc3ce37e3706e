// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The midpoint fan path plan.
//!
//! A path is walked once at construction time to chop its curves, estimate
//! segment counts and total up the GPU resources it will consume, and a
//! second time at push time to write tessellation spans and path/contour
//! records into the staging buffers. The two walks must agree exactly;
//! debug counters verify they do.
//!
//! Each contour's tessellation vertices are padded out to a tessellation
//! texture row boundary, which keeps patch instances from straddling
//! contours and makes span-instance counts independent of where in the
//! texture the contour finally lands.

use peniko::kurbo::{
    CubicBez, ParamCurve, ParamCurveDeriv, PathEl, Point, QuadBez, Vec2,
};

use crate::draw::{DrawCommon, PathDrawData, ResourceCounters};
use crate::frame::FrameStaging;
use crate::gpu::{contour_flags, MAX_PARAMETRIC_SEGMENTS, TESS_TEXTURE_WIDTH};
use crate::math::Transform;
use crate::wang::{self, PARAMETRIC_PRECISION};

/// Tessellation tolerance in pixels.
const TOLERANCE: f32 = 1.0 / PARAMETRIC_PRECISION;

/// One renderable section of a contour: a cubic (possibly a degenerate
/// line-as-cubic) plus the join that follows it.
#[derive(Clone, Debug)]
pub(crate) struct CurveSection {
    pub cubic: CubicBez,
    pub parametric_segments: u32,
    pub polar_segments: u32,
    pub join_segments: u32,
    pub join_tangent: Vec2,
    pub flags: u32,
}

impl CurveSection {
    /// Tessellation vertices this section occupies in the texture.
    pub fn vertex_count(&self, stroked: bool) -> u32 {
        if stroked {
            self.parametric_segments + self.polar_segments - 1 + self.join_segments
        } else {
            self.parametric_segments
        }
    }
}

/// Per-contour bookkeeping produced by the counting walk.
#[derive(Clone, Debug)]
pub struct ContourInfo {
    /// Path element index one past the end of this contour.
    pub end_element_idx: usize,
    pub first_section: usize,
    pub end_section: usize,
    pub midpoint: [f32; 2],
    pub closed: bool,
    pub stroke_join_count: usize,
    pub stroke_cap_segment_count: u32,
    /// Vertices appended after the contour so the next one starts on a
    /// tessellation texture row boundary.
    pub padding_vertex_count: u32,
    pub(crate) tess_vertex_count: u32,
}

/// Draws a path by fanning tessellation patches around the midpoint of
/// each contour.
pub struct MidpointFanPath {
    pub(crate) data: PathDrawData,
    contours: Vec<ContourInfo>,
    sections: Vec<CurveSection>,
    #[cfg(debug_assertions)]
    pending_section_count: usize,
}

impl MidpointFanPath {
    pub fn new(data: PathDrawData, matrix: &Transform) -> (Self, ResourceCounters) {
        let stroked = data.is_stroked();
        let scaled_stroke_radius = if stroked {
            (data.stroke_radius * matrix.max_scale()).max(TOLERANCE)
        } else {
            0.0
        };
        let cap_segment_count = if stroked {
            stroke_cap_segment_count(data.cap, scaled_stroke_radius)
        } else {
            0
        };

        let mut contours = Vec::new();
        let mut sections = Vec::new();
        let mut counts = ResourceCounters {
            path_count: 1,
            ..Default::default()
        };

        for raw in split_contours(&data.path) {
            let first_section = sections.len();
            collect_sections(&raw, matrix, stroked, scaled_stroke_radius, &mut sections);
            if sections.len() == first_section {
                continue;
            }
            let closed = raw.closed;
            let mut stroke_join_count = 0;
            if stroked {
                assign_joins(
                    &mut sections[first_section..],
                    closed,
                    data.join,
                    scaled_stroke_radius,
                );
                stroke_join_count = if closed {
                    sections.len() - first_section
                } else {
                    sections.len() - first_section - 1
                };
                if !closed {
                    add_emulated_caps(
                        &mut sections,
                        first_section,
                        cap_segment_count,
                    );
                    stroke_join_count += 2;
                }
            }

            let end_section = sections.len();
            let midpoint = contour_midpoint(&sections[first_section..end_section]);
            let tess_vertex_count: u32 = sections[first_section..end_section]
                .iter()
                .map(|s| s.vertex_count(stroked))
                .sum();
            let padding_vertex_count =
                (TESS_TEXTURE_WIDTH - tess_vertex_count % TESS_TEXTURE_WIDTH) % TESS_TEXTURE_WIDTH;

            // The contour starts row aligned, so span splitting is a pure
            // function of the vertex counts; simulate it for the exact
            // span-instance total.
            let mut cursor = 0u32;
            for section in &sections[first_section..end_section] {
                let n = section.vertex_count(stroked);
                counts.tessellated_segment_count += rows_touched(cursor, n);
                cursor += n;
            }
            if padding_vertex_count > 0 {
                counts.tessellated_segment_count += 1;
            }

            counts.midpoint_fan_tess_vertex_count +=
                (tess_vertex_count + padding_vertex_count) as usize;
            counts.contour_count += 1;

            contours.push(ContourInfo {
                end_element_idx: raw.end_element_idx,
                first_section,
                end_section,
                midpoint,
                closed,
                stroke_join_count,
                stroke_cap_segment_count: cap_segment_count,
                padding_vertex_count,
                tess_vertex_count,
            });
        }

        (
            Self {
                data,
                contours,
                sections,
                #[cfg(debug_assertions)]
                pending_section_count: 0,
            },
            counts,
        )
    }

    pub fn contours(&self) -> &[ContourInfo] {
        &self.contours
    }

    /// The second walk: write path, contour and tessellation span records.
    pub fn push_to_context(&mut self, common: &DrawCommon, frame: &mut FrameStaging) {
        let stroked = self.data.is_stroked();
        #[cfg(debug_assertions)]
        {
            self.pending_section_count = self.sections.len();
        }

        let path_id = frame.push_path(common, &self.data);
        let patch_base = frame.midpoint_fan_patch_cursor();

        for contour in &self.contours {
            let contour_id = frame.push_contour(contour.midpoint, path_id);
            for section in &self.sections[contour.first_section..contour.end_section] {
                let counts = crate::gpu::TessVertexSpan::pack_segment_counts(
                    section.parametric_segments,
                    section.polar_segments,
                    section.join_segments,
                );
                frame.push_tess_section(
                    &section.cubic,
                    section.join_tangent,
                    section.vertex_count(stroked),
                    counts,
                    contour_id | section.flags,
                    path_id,
                );
                #[cfg(debug_assertions)]
                {
                    self.pending_section_count -= 1;
                }
            }
            frame.push_tess_padding(contour.padding_vertex_count);
        }

        #[cfg(debug_assertions)]
        debug_assert_eq!(
            self.pending_section_count, 0,
            "counting and push walks disagree"
        );

        let patch_count = frame.midpoint_fan_patch_cursor() - patch_base;
        frame.push_midpoint_fan_batch(common, self.data.fill_rule, patch_base, patch_count);
    }
}

/// Number of tessellation texture rows a run of `n` texels starting at
/// (row-relative) `cursor` touches; each touched row is one span instance.
pub(crate) fn rows_touched(cursor: u32, n: u32) -> usize {
    if n == 0 {
        return 0;
    }
    ((cursor + n - 1) / TESS_TEXTURE_WIDTH - cursor / TESS_TEXTURE_WIDTH + 1) as usize
}

/// Segments in the tessellation of a stroke cap. Round caps rotate a full
/// 180 degrees; butt and square caps are two straight edges.
pub(crate) fn stroke_cap_segment_count(cap: peniko::kurbo::Cap, scaled_radius: f32) -> u32 {
    match cap {
        peniko::kurbo::Cap::Round => {
            wang::polar_segments(std::f32::consts::PI, scaled_radius, TOLERANCE).max(2)
        }
        peniko::kurbo::Cap::Butt | peniko::kurbo::Cap::Square => 2,
    }
}

struct RawContour {
    elements: Vec<PathEl>,
    end_element_idx: usize,
    closed: bool,
}

fn split_contours(path: &peniko::kurbo::BezPath) -> Vec<RawContour> {
    let mut contours: Vec<RawContour> = Vec::new();
    let mut current: Vec<PathEl> = Vec::new();
    for (idx, el) in path.elements().iter().enumerate() {
        match el {
            PathEl::MoveTo(_) => {
                if current.len() > 1 {
                    contours.push(RawContour {
                        elements: std::mem::take(&mut current),
                        end_element_idx: idx,
                        closed: false,
                    });
                } else {
                    current.clear();
                }
                current.push(*el);
            }
            PathEl::ClosePath => {
                if current.len() > 1 {
                    current.push(*el);
                    contours.push(RawContour {
                        elements: std::mem::take(&mut current),
                        end_element_idx: idx + 1,
                        closed: true,
                    });
                } else {
                    current.clear();
                }
            }
            _ => {
                if !current.is_empty() {
                    current.push(*el);
                }
            }
        }
    }
    if current.len() > 1 {
        let end = path.elements().len();
        contours.push(RawContour {
            elements: current,
            end_element_idx: end,
            closed: false,
        });
    }
    contours
}

fn line_as_cubic(p0: Point, p1: Point) -> CubicBez {
    CubicBez::new(p0, p0.lerp(p1, 1.0 / 3.0), p0.lerp(p1, 2.0 / 3.0), p1)
}

fn cubic_tangents(cubic: &CubicBez) -> (Vec2, Vec2) {
    let d = cubic.deriv();
    let chord = cubic.p3 - cubic.p0;
    let start = d.eval(0.0).to_vec2();
    let end = d.eval(1.0).to_vec2();
    let start = if start.length_squared() > 0.0 { start } else { chord };
    let end = if end.length_squared() > 0.0 { end } else { chord };
    (start, end)
}

/// Converts a contour's verbs into curve sections: lines become degenerate
/// cubics and each real cubic is chopped so every piece stays within the
/// parametric segment budget and, for strokes, rotates at most 90 degrees.
fn collect_sections(
    raw: &RawContour,
    matrix: &Transform,
    stroked: bool,
    scaled_radius: f32,
    out: &mut Vec<CurveSection>,
) {
    let mut start = Point::ZERO;
    let mut last = Point::ZERO;
    let mut first = true;
    for el in &raw.elements {
        match *el {
            PathEl::MoveTo(p) => {
                start = p;
                last = p;
                first = false;
            }
            PathEl::LineTo(p) => {
                if !first && p != last {
                    push_line(out, last, p, stroked);
                }
                last = p;
            }
            PathEl::QuadTo(p1, p2) => {
                let cubic = QuadBez::new(last, p1, p2).raise();
                push_cubic(out, cubic, matrix, stroked, scaled_radius);
                last = p2;
            }
            PathEl::CurveTo(p1, p2, p3) => {
                push_cubic(out, CubicBez::new(last, p1, p2, p3), matrix, stroked, scaled_radius);
                last = p3;
            }
            PathEl::ClosePath => {
                if last != start {
                    push_line(out, last, start, stroked);
                }
                last = start;
            }
        }
    }
    // Fills close implicitly; open strokes get caps instead.
    if !raw.closed && !stroked && last != start {
        push_line(out, last, start, stroked);
    }
}

fn push_line(out: &mut Vec<CurveSection>, p0: Point, p1: Point, _stroked: bool) {
    out.push(CurveSection {
        cubic: line_as_cubic(p0, p1),
        parametric_segments: 1,
        polar_segments: 1,
        join_segments: 0,
        join_tangent: p1 - p0,
        flags: 0,
    });
}

fn push_cubic(
    out: &mut Vec<CurveSection>,
    cubic: CubicBez,
    matrix: &Transform,
    stroked: bool,
    scaled_radius: f32,
) {
    let wang_estimate = wang::cubic(&cubic, PARAMETRIC_PRECISION, matrix).ceil().max(1.0);
    let mut pieces = (wang_estimate / MAX_PARAMETRIC_SEGMENTS as f32).ceil() as usize;
    if stroked {
        let (t0, t1) = cubic_tangents(&cubic);
        let rotation = wang::tangent_rotation(t0, t1);
        pieces = pieces.max((rotation / std::f32::consts::FRAC_PI_2).ceil() as usize);
    }
    let pieces = pieces.clamp(1, u8::MAX as usize);
    for i in 0..pieces {
        let piece = cubic.subsegment(i as f64 / pieces as f64..(i + 1) as f64 / pieces as f64);
        let parametric = (wang::cubic(&piece, PARAMETRIC_PRECISION, matrix).ceil() as u32)
            .clamp(1, MAX_PARAMETRIC_SEGMENTS);
        let polar = if stroked {
            let (t0, t1) = cubic_tangents(&piece);
            wang::polar_segments(wang::tangent_rotation(t0, t1), scaled_radius, TOLERANCE).max(1)
        } else {
            1
        };
        let (_, end_tangent) = cubic_tangents(&piece);
        out.push(CurveSection {
            cubic: piece,
            parametric_segments: parametric,
            polar_segments: polar,
            join_segments: 0,
            join_tangent: end_tangent,
            flags: 0,
        });
    }
}

/// Classifies the join after each section and charges its tessellation
/// segments to that section. Round joins get polar segments for the
/// rotation between the adjoining tangents; miter and bevel joins take one.
fn assign_joins(
    sections: &mut [CurveSection],
    closed: bool,
    join: peniko::kurbo::Join,
    scaled_radius: f32,
) {
    let len = sections.len();
    if len == 0 {
        return;
    }
    for i in 0..len {
        let is_last = i == len - 1;
        if is_last && !closed {
            break;
        }
        let next = if is_last { 0 } else { i + 1 };
        let out_tangent = {
            let (t0, _) = cubic_tangents(&sections[next].cubic);
            t0
        };
        let (_, in_tangent) = cubic_tangents(&sections[i].cubic);
        let (segments, flags) = match join {
            peniko::kurbo::Join::Round => {
                let rotation = wang::tangent_rotation(in_tangent, out_tangent);
                (
                    wang::polar_segments(rotation, scaled_radius, TOLERANCE).max(1),
                    contour_flags::ROUND_JOIN,
                )
            }
            peniko::kurbo::Join::Miter | peniko::kurbo::Join::Bevel => (1, 0),
        };
        sections[i].join_segments = segments;
        sections[i].join_tangent = out_tangent;
        sections[i].flags |= flags;
    }
}

/// Emulates a stroke cap as a 180 degree join: a reversed copy of the
/// adjoining cubic with zero real tessellation segments leads into a join
/// section shaped like the desired cap. The flags control which side of
/// the join renders.
fn add_emulated_caps(sections: &mut Vec<CurveSection>, first_section: usize, cap_segments: u32) {
    let first = sections[first_section].cubic;
    let last = sections.last().expect("contour has sections").cubic;

    let start_cap = CurveSection {
        cubic: CubicBez::new(first.p3, first.p2, first.p1, first.p0),
        parametric_segments: 1,
        polar_segments: 1,
        join_segments: cap_segments,
        join_tangent: first.p1 - first.p0,
        flags: contour_flags::EMULATED_CAP_LEADING,
    };
    let end_cap = CurveSection {
        cubic: CubicBez::new(last.p3, last.p2, last.p1, last.p0),
        parametric_segments: 1,
        polar_segments: 1,
        join_segments: cap_segments,
        join_tangent: last.p2 - last.p3,
        flags: contour_flags::EMULATED_CAP_TRAILING,
    };
    sections.insert(first_section, start_cap);
    sections.push(end_cap);
}

fn contour_midpoint(sections: &[CurveSection]) -> [f32; 2] {
    let mut sum = Vec2::ZERO;
    for section in sections {
        sum += section.cubic.p0.to_vec2();
        sum += section.cubic.p3.to_vec2();
    }
    let n = (sections.len() * 2) as f64;
    [(sum.x / n) as f32, (sum.y / n) as f32]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::PathDrawData;
    use peniko::kurbo::{BezPath, Cap, Join, Rect, Shape, Stroke};
    use std::sync::Arc;

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

    fn stroke_data(path: BezPath, stroke: &Stroke) -> PathDrawData {
        PathDrawData {
            path: Arc::new(path),
            fill_rule: peniko::Fill::NonZero,
            stroke_radius: (stroke.width * 0.5) as f32,
            join: stroke.join,
            cap: stroke.start_cap,
            miter_limit: stroke.miter_limit as f32,
        }
    }

    #[test]
    fn rectangle_fill_counts_four_line_segments() {
        let path = Rect::new(0.0, 0.0, 100.0, 50.0).to_path(0.1);
        let (plan, counts) = MidpointFanPath::new(fill_data(path), &Transform::IDENTITY);
        assert_eq!(counts.path_count, 1);
        assert_eq!(counts.contour_count, 1);
        let contour = &plan.contours()[0];
        assert!(contour.closed);
        // Four lines, one vertex each, padded to a full row.
        assert_eq!(contour.tess_vertex_count, 4);
        assert_eq!(contour.padding_vertex_count, TESS_TEXTURE_WIDTH - 4);
        assert_eq!(
            counts.midpoint_fan_tess_vertex_count,
            TESS_TEXTURE_WIDTH as usize
        );
        // Four line spans plus the padding span.
        assert_eq!(counts.tessellated_segment_count, 5);
    }

    #[test]
    fn open_fill_contour_closes_implicitly() {
        let mut path = BezPath::new();
        path.move_to((0.0, 0.0));
        path.line_to((10.0, 0.0));
        path.line_to((10.0, 10.0));
        let (plan, counts) = MidpointFanPath::new(fill_data(path), &Transform::IDENTITY);
        assert_eq!(counts.contour_count, 1);
        // Two explicit lines plus the implicit close.
        assert_eq!(plan.contours()[0].tess_vertex_count, 3);
        assert!(!plan.contours()[0].closed);
    }

    #[test]
    fn open_stroke_gets_two_emulated_caps() {
        let mut path = BezPath::new();
        path.move_to((0.0, 0.0));
        path.line_to((50.0, 0.0));
        path.line_to((50.0, 50.0));
        path.line_to((0.0, 50.0));
        let stroke = Stroke::new(8.0).with_caps(Cap::Round).with_join(Join::Round);
        let (plan, _) = MidpointFanPath::new(stroke_data(path, &stroke), &Transform::IDENTITY);
        let contour = &plan.contours()[0];
        // Two interior joins plus the two emulated caps.
        assert_eq!(contour.stroke_join_count, 4);
        assert!(contour.stroke_cap_segment_count >= 2);
        // First and last sections are the emulated caps.
        let sections = &plan.sections[contour.first_section..contour.end_section];
        assert_eq!(sections.len(), 5);
        assert_ne!(sections[0].flags & contour_flags::EMULATED_CAP_LEADING, 0);
        assert_ne!(
            sections.last().unwrap().flags & contour_flags::EMULATED_CAP_TRAILING,
            0
        );
        // Caps lead in with zero real segments: one parametric, one polar.
        assert_eq!(sections[0].parametric_segments, 1);
        assert_eq!(sections[0].polar_segments, 1);
        assert_eq!(sections[0].join_segments, contour.stroke_cap_segment_count);
    }

    #[test]
    fn closed_stroke_has_no_caps() {
        let path = Rect::new(0.0, 0.0, 50.0, 50.0).to_path(0.1);
        let stroke = Stroke::new(4.0).with_join(Join::Bevel);
        let (plan, _) = MidpointFanPath::new(stroke_data(path, &stroke), &Transform::IDENTITY);
        let contour = &plan.contours()[0];
        assert_eq!(contour.stroke_join_count, 4);
        let sections = &plan.sections[contour.first_section..contour.end_section];
        assert!(sections
            .iter()
            .all(|s| s.flags & (contour_flags::EMULATED_CAP_LEADING | contour_flags::EMULATED_CAP_TRAILING) == 0));
        // Every bevel join takes exactly one segment.
        assert!(sections.iter().all(|s| s.join_segments == 1));
    }

    #[test]
    fn round_joins_scale_with_stroke_radius(){
        let mut path = BezPath::new();
        path.move_to((0.0, 0.0));
        path.line_to((100.0, 0.0));
        path.line_to((100.0, 100.0));
        let thin = MidpointFanPath::new(
            stroke_data(path.clone(), &Stroke::new(2.0).with_join(Join::Round)),
            &Transform::IDENTITY,
        )
        .0;
        let thick = MidpointFanPath::new(
            stroke_data(path, &Stroke::new(64.0).with_join(Join::Round)),
            &Transform::IDENTITY,
        )
        .0;
        let joins = |plan: &MidpointFanPath| {
            plan.sections[1].join_segments // the interior 90 degree join
        };
        assert!(joins(&thick) > joins(&thin));
    }

    #[test]
    fn curves_chop_within_parametric_budget() {
        let mut path = BezPath::new();
        path.move_to((0.0, 0.0));
        path.curve_to((1.0e7, 0.0), (1.0e7, 1.0e7), (0.0, 1.0e7));
        let (plan, _) = MidpointFanPath::new(fill_data(path), &Transform::IDENTITY);
        assert!(plan.sections.len() > 1);
        assert!(plan
            .sections
            .iter()
            .all(|s| s.parametric_segments <= MAX_PARAMETRIC_SEGMENTS));
    }

    #[test]
    fn rows_touched_counts_boundary_crossings() {
        assert_eq!(rows_touched(0, 1), 1);
        assert_eq!(rows_touched(0, TESS_TEXTURE_WIDTH), 1);
        assert_eq!(rows_touched(0, TESS_TEXTURE_WIDTH + 1), 2);
        assert_eq!(rows_touched(TESS_TEXTURE_WIDTH - 1, 2), 2);
        assert_eq!(rows_touched(5, 0), 0);
    }

    #[test]
    fn zero_length_contours_are_skipped() {
        let mut path = BezPath::new();
        path.move_to((5.0, 5.0));
        path.move_to((10.0, 10.0));
        path.line_to((20.0, 10.0));
        path.line_to((20.0, 20.0));
        let (plan, counts) = MidpointFanPath::new(fill_data(path), &Transform::IDENTITY);
        assert_eq!(counts.contour_count, 1);
        assert_eq!(plan.contours().len(), 1);
    }
}
