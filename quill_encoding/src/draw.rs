// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! High level abstraction of a single object to be drawn (path, imageRect,
//! or imageMesh). Draws get built up for an entire frame in order to count
//! GPU resource allocation sizes, then sorted, batched, and pushed.

use std::any::Any;
use std::ops::{Add, AddAssign, Sub};
use std::sync::Arc;

use peniko::color::{AlphaColor, Srgb};
use peniko::kurbo::{BezPath, Cap, Join, Stroke};
use peniko::{Fill, Mix};

use crate::frame::FrameStaging;
use crate::gpu::{
    INTERIOR_TRIANGULATION_AREA_THRESHOLD, INTERIOR_TRIANGULATION_CONTOUR_THRESHOLD,
};
use crate::gradient::{Gradient, GradientCache, GradientKind};
use crate::interior::{InteriorTriangulationPath, TriangulatorAxis};
use crate::math::{transformed_area, ClipRectInverseMatrix, IntBounds, Transform};
use crate::midpoint_fan::MidpointFanPath;
use crate::paint::{pack_color, ColorRampLocation, PaintType, SimplePaintValue};

/// Backend texture referenced by image draws. The encoding crate only needs
/// identity and ref counting; the render backend downcasts to its own type.
pub trait ImageTexture: Send + Sync + 'static {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn as_any(&self) -> &dyn Any;
}

/// Backend vertex or index buffer created by the client, referenced by
/// image mesh draws.
pub trait MeshBuffer: Send + Sync + 'static {
    fn len_in_bytes(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
}

/// Running counts of objects that need to be allocated in the render
/// context's various GPU buffers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceCounters {
    pub midpoint_fan_tess_vertex_count: usize,
    pub outer_cubic_tess_vertex_count: usize,
    pub path_count: usize,
    pub contour_count: usize,
    /// Lines, curves, standalone joins, emulated caps, etc.
    pub tessellated_segment_count: usize,
    pub max_triangle_vertex_count: usize,
    /// imageRect or imageMesh.
    pub image_draw_count: usize,
    pub complex_gradient_span_count: usize,
}

impl ResourceCounters {
    pub const LANES: usize = 8;

    pub fn to_array(self) -> [usize; Self::LANES] {
        [
            self.midpoint_fan_tess_vertex_count,
            self.outer_cubic_tess_vertex_count,
            self.path_count,
            self.contour_count,
            self.tessellated_segment_count,
            self.max_triangle_vertex_count,
            self.image_draw_count,
            self.complex_gradient_span_count,
        ]
    }

    pub fn from_array(v: [usize; Self::LANES]) -> Self {
        Self {
            midpoint_fan_tess_vertex_count: v[0],
            outer_cubic_tess_vertex_count: v[1],
            path_count: v[2],
            contour_count: v[3],
            tessellated_segment_count: v[4],
            max_triangle_vertex_count: v[5],
            image_draw_count: v[6],
            complex_gradient_span_count: v[7],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|&v| v == 0)
    }
}

impl Add for ResourceCounters {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        let mut out = self.to_array();
        for (o, r) in out.iter_mut().zip(rhs.to_array()) {
            *o += r;
        }
        Self::from_array(out)
    }
}

impl AddAssign for ResourceCounters {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for ResourceCounters {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        let mut out = self.to_array();
        for (o, r) in out.iter_mut().zip(rhs.to_array()) {
            *o -= r;
        }
        Self::from_array(out)
    }
}

/// What a path gets painted with.
#[derive(Clone)]
pub enum PaintSource {
    Solid(AlphaColor<Srgb>),
    Gradient(Arc<Gradient>),
    /// Replace the clip buffer value inside the path's coverage.
    ClipUpdate { outer_clip_id: u32 },
}

/// Full paint state for a path draw.
#[derive(Clone)]
pub struct Paint {
    pub source: PaintSource,
    pub fill_rule: Fill,
    /// `None` for fills.
    pub stroke: Option<Stroke>,
    pub blend_mode: Mix,
}

impl Paint {
    pub fn fill(color: AlphaColor<Srgb>) -> Self {
        Self {
            source: PaintSource::Solid(color),
            fill_rule: Fill::NonZero,
            stroke: None,
            blend_mode: Mix::Normal,
        }
    }

    pub fn stroke(color: AlphaColor<Srgb>, stroke: Stroke) -> Self {
        Self {
            source: PaintSource::Solid(color),
            fill_rule: Fill::NonZero,
            stroke: Some(stroke),
            blend_mode: Mix::Normal,
        }
    }

    pub fn is_stroked(&self) -> bool {
        self.stroke.is_some()
    }
}

/// Fields shared by every draw variant.
pub struct DrawCommon {
    pub bounds: IntBounds,
    pub matrix: Transform,
    pub blend_mode: Mix,
    pub image_texture: Option<Arc<dyn ImageTexture>>,
    pub clip_id: u32,
    pub clip_rect_inverse_matrix: Option<ClipRectInverseMatrix>,
    pub gradient: Option<Arc<Gradient>>,
    pub simple_paint_value: SimplePaintValue,
    pub paint_type: PaintType,
    pub(crate) counts: ResourceCounters,
}

/// Data shared by both path plan variants.
pub struct PathDrawData {
    pub path: Arc<BezPath>,
    pub fill_rule: Fill,
    /// 0 if the path is filled.
    pub stroke_radius: f32,
    pub join: Join,
    pub cap: Cap,
    pub miter_limit: f32,
}

impl PathDrawData {
    pub fn is_stroked(&self) -> bool {
        self.stroke_radius > 0.0
    }
}

pub enum DrawKind {
    MidpointFanPath(MidpointFanPath),
    InteriorTriangulationPath(InteriorTriangulationPath),
    ImageRect(ImageRectDraw),
    ImageMesh(ImageMeshDraw),
}

pub struct ImageRectDraw {
    pub opacity: f32,
}

pub struct ImageMeshDraw {
    pub vertex_buffer: Option<Arc<dyn MeshBuffer>>,
    pub uv_buffer: Option<Arc<dyn MeshBuffer>>,
    pub index_buffer: Option<Arc<dyn MeshBuffer>>,
    pub index_count: u32,
    pub opacity: f32,
}

/// One drawable object. Draws are accumulated for a whole frame in a
/// [`DrawList`], counted, then pushed to the render context in order.
pub struct Draw {
    pub(crate) common: DrawCommon,
    pub(crate) kind: DrawKind,
}

impl Draw {
    /// Creates either a midpoint fan path draw or an interior triangulation
    /// draw if the path is large enough.
    pub fn new_path(
        path: Arc<BezPath>,
        matrix: Transform,
        paint: &Paint,
        clip_id: u32,
        clip_rect_inverse_matrix: Option<ClipRectInverseMatrix>,
    ) -> Self {
        let local_bounds = peniko::kurbo::Shape::bounding_box(path.as_ref());
        let (gradient, paint_type, simple_paint_value) = classify_paint(paint);

        let stroke_radius = paint
            .stroke
            .as_ref()
            .map(|s| (s.width * 0.5) as f32)
            .unwrap_or(0.0);
        let stroke_outset = if let Some(stroke) = &paint.stroke {
            let join_factor = match stroke.join {
                Join::Miter => stroke.miter_limit.max(1.0),
                _ => 1.0,
            };
            let cap_factor = match stroke.start_cap {
                Cap::Square => std::f64::consts::SQRT_2,
                _ => 1.0,
            };
            stroke.width * 0.5 * join_factor.max(cap_factor)
        } else {
            0.0
        };
        let screen_bounds = {
            let inflated = local_bounds.inflate(stroke_outset, stroke_outset);
            let corners = [
                (inflated.x0, inflated.y0),
                (inflated.x1, inflated.y0),
                (inflated.x1, inflated.y1),
                (inflated.x0, inflated.y1),
            ]
            .map(|(x, y)| matrix.apply(peniko::kurbo::Point::new(x, y)));
            let xs = corners.map(|p| p.x);
            let ys = corners.map(|p| p.y);
            peniko::kurbo::Rect::new(
                xs.iter().copied().fold(f64::INFINITY, f64::min),
                ys.iter().copied().fold(f64::INFINITY, f64::min),
                xs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                ys.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            )
        };
        let bounds = IntBounds::round_out(screen_bounds).intersect(&IntBounds::FULLSCREEN);

        let data = PathDrawData {
            path,
            fill_rule: paint.fill_rule,
            stroke_radius,
            join: paint
                .stroke
                .as_ref()
                .map(|s| s.join)
                .unwrap_or(Join::Miter),
            cap: paint
                .stroke
                .as_ref()
                .map(|s| s.start_cap)
                .unwrap_or(Cap::Butt),
            miter_limit: paint
                .stroke
                .as_ref()
                .map(|s| s.miter_limit as f32)
                .unwrap_or(4.0),
        };

        let mut common = DrawCommon {
            bounds,
            matrix,
            blend_mode: paint.blend_mode,
            image_texture: None,
            clip_id,
            clip_rect_inverse_matrix,
            gradient,
            simple_paint_value,
            paint_type,
            counts: ResourceCounters::default(),
        };

        let kind = if use_interior_triangulation(&data, &matrix, local_bounds) {
            let axis = if local_bounds.width() > local_bounds.height() * 2.0 {
                TriangulatorAxis::Horizontal
            } else if local_bounds.height() > local_bounds.width() * 2.0 {
                TriangulatorAxis::Vertical
            } else {
                TriangulatorAxis::DontCare
            };
            let (plan, counts) = InteriorTriangulationPath::new(data, &matrix, axis);
            common.counts = counts;
            DrawKind::InteriorTriangulationPath(plan)
        } else {
            let (plan, counts) = MidpointFanPath::new(data, &matrix);
            common.counts = counts;
            DrawKind::MidpointFanPath(plan)
        };

        Self { common, kind }
    }

    pub fn new_image_rect(
        bounds: IntBounds,
        matrix: Transform,
        blend_mode: Mix,
        image_texture: Arc<dyn ImageTexture>,
        opacity: f32,
    ) -> Self {
        Self {
            common: DrawCommon {
                bounds,
                matrix,
                blend_mode,
                image_texture: Some(image_texture),
                clip_id: 0,
                clip_rect_inverse_matrix: None,
                gradient: None,
                simple_paint_value: SimplePaintValue::ImageOpacity(opacity),
                paint_type: PaintType::Image,
                counts: ResourceCounters {
                    image_draw_count: 1,
                    ..Default::default()
                },
            },
            kind: DrawKind::ImageRect(ImageRectDraw { opacity }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_image_mesh(
        bounds: IntBounds,
        matrix: Transform,
        blend_mode: Mix,
        image_texture: Arc<dyn ImageTexture>,
        vertex_buffer: Arc<dyn MeshBuffer>,
        uv_buffer: Arc<dyn MeshBuffer>,
        index_buffer: Arc<dyn MeshBuffer>,
        index_count: u32,
        opacity: f32,
    ) -> Self {
        Self {
            common: DrawCommon {
                bounds,
                matrix,
                blend_mode,
                image_texture: Some(image_texture),
                clip_id: 0,
                clip_rect_inverse_matrix: None,
                gradient: None,
                simple_paint_value: SimplePaintValue::ImageOpacity(opacity),
                paint_type: PaintType::Image,
                counts: ResourceCounters {
                    image_draw_count: 1,
                    ..Default::default()
                },
            },
            kind: DrawKind::ImageMesh(ImageMeshDraw {
                vertex_buffer: Some(vertex_buffer),
                uv_buffer: Some(uv_buffer),
                index_buffer: Some(index_buffer),
                index_count,
                opacity,
            }),
        }
    }

    pub fn bounds(&self) -> &IntBounds {
        &self.common.bounds
    }

    pub fn set_clip_id(&mut self, clip_id: u32) {
        self.common.clip_id = clip_id;
    }

    pub fn set_clip_rect(&mut self, m: ClipRectInverseMatrix) {
        self.common.clip_rect_inverse_matrix = Some(m);
    }

    pub fn has_clip_rect(&self) -> bool {
        self.common.clip_rect_inverse_matrix.is_some()
    }

    /// Used to allocate GPU resources for a collection of draws.
    pub fn resource_counts(&self) -> &ResourceCounters {
        &self.common.counts
    }

    pub fn kind(&self) -> &DrawKind {
        &self.kind
    }

    /// Adds the gradient (if any) for this draw to the gradient texture.
    /// Returns `false` if this draw needed a gradient but there wasn't room
    /// for it, at which point the gradient texture will need to be
    /// re-rendered mid flight.
    pub fn allocate_gradient_if_needed(
        &mut self,
        cache: &mut GradientCache,
        counters: &mut ResourceCounters,
    ) -> bool {
        let Some(gradient) = &self.common.gradient else {
            return true;
        };
        match cache.allocate(gradient) {
            Some((location, new_span_count)) => {
                self.common.simple_paint_value = SimplePaintValue::ColorRamp(location);
                self.common.counts.complex_gradient_span_count += new_span_count;
                counters.complex_gradient_span_count += new_span_count;
                true
            }
            None => false,
        }
    }

    /// Pushes the data for this draw to the frame. Called once the GPU
    /// buffers have been counted and allocated, and the draws sorted. The
    /// bytes written here equal the reservation in `resource_counts()`.
    pub fn push_to_context(&mut self, frame: &mut FrameStaging) {
        frame.begin_draw(&self.common);
        match &mut self.kind {
            DrawKind::MidpointFanPath(plan) => plan.push_to_context(&self.common, frame),
            DrawKind::InteriorTriangulationPath(plan) => {
                plan.push_to_context(&self.common, frame);
            }
            DrawKind::ImageRect(draw) => {
                frame.push_image_rect(&self.common, draw.opacity);
            }
            DrawKind::ImageMesh(draw) => {
                frame.push_image_mesh(
                    &self.common,
                    draw.vertex_buffer.clone().expect("refs already released"),
                    draw.uv_buffer.clone().expect("refs already released"),
                    draw.index_buffer.clone().expect("refs already released"),
                    draw.index_count,
                    draw.opacity,
                );
            }
        }
        frame.end_draw(&self.common);
    }

    /// Draws are bulk-cleared from the [`DrawList`], which calls this on
    /// every record first so shared references drop at a deterministic
    /// point.
    pub fn release_refs(&mut self) {
        self.common.image_texture = None;
        self.common.gradient = None;
        if let DrawKind::ImageMesh(mesh) = &mut self.kind {
            mesh.vertex_buffer = None;
            mesh.uv_buffer = None;
            mesh.index_buffer = None;
        }
    }
}

fn classify_paint(paint: &Paint) -> (Option<Arc<Gradient>>, PaintType, SimplePaintValue) {
    match &paint.source {
        PaintSource::Solid(color) => (
            None,
            PaintType::SolidColor,
            SimplePaintValue::Color(pack_color(*color)),
        ),
        PaintSource::Gradient(gradient) => {
            let paint_type = match gradient.kind() {
                GradientKind::Linear => PaintType::LinearGradient,
                GradientKind::Radial => PaintType::RadialGradient,
            };
            // The real ramp location is assigned by
            // `allocate_gradient_if_needed`.
            (
                Some(gradient.clone()),
                paint_type,
                SimplePaintValue::ColorRamp(ColorRampLocation { row: 0, col: 0 }),
            )
        }
        PaintSource::ClipUpdate { outer_clip_id } => (
            None,
            PaintType::ClipUpdate,
            SimplePaintValue::ClipUpdate {
                outer_clip_id: *outer_clip_id,
            },
        ),
    }
}

fn use_interior_triangulation(
    data: &PathDrawData,
    matrix: &Transform,
    local_bounds: peniko::kurbo::Rect,
) -> bool {
    if data.is_stroked() {
        return false;
    }
    let contour_count = data
        .path
        .elements()
        .iter()
        .filter(|el| matches!(el, peniko::kurbo::PathEl::MoveTo(_)))
        .count();
    contour_count >= INTERIOR_TRIANGULATION_CONTOUR_THRESHOLD
        || transformed_area(local_bounds, matrix) > INTERIOR_TRIANGULATION_AREA_THRESHOLD
}

/// Frame-scoped arena of draws. There is no per-record destructor; instead
/// the list walks every record invoking [`Draw::release_refs`] before the
/// storage is reset, so held references drop exactly once even when a
/// frame is abandoned.
#[derive(Default)]
pub struct DrawList {
    draws: Vec<Draw>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, draw: Draw) {
        self.draws.push(draw);
    }

    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Draw> {
        self.draws.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Draw> {
        self.draws.iter_mut()
    }

    /// Releases every draw's references and resets the arena, retaining its
    /// storage for the next frame.
    pub fn reset(&mut self) {
        for draw in &mut self.draws {
            draw.release_refs();
        }
        self.draws.clear();
    }
}

impl Drop for DrawList {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peniko::color::palette;
    use peniko::kurbo::Rect;
    use peniko::kurbo::Shape;

    fn rect_path(size: f64) -> Arc<BezPath> {
        Arc::new(Rect::new(0.0, 0.0, size, size).to_path(0.1))
    }

    #[test]
    fn counters_add_sub_roundtrip() {
        let a = ResourceCounters {
            path_count: 3,
            contour_count: 7,
            tessellated_segment_count: 100,
            ..Default::default()
        };
        let b = ResourceCounters {
            path_count: 1,
            contour_count: 2,
            tessellated_segment_count: 30,
            midpoint_fan_tess_vertex_count: 64,
            ..Default::default()
        };
        let sum = a + b;
        assert_eq!(sum.path_count, 4);
        assert_eq!(sum - b, a);
        assert_eq!(ResourceCounters::from_array(sum.to_array()), sum);
    }

    #[test]
    fn small_path_uses_midpoint_fan() {
        let draw = Draw::new_path(
            rect_path(16.0),
            Transform::IDENTITY,
            &Paint::fill(palette::css::RED),
            0,
            None,
        );
        assert!(matches!(draw.kind(), DrawKind::MidpointFanPath(_)));
    }

    #[test]
    fn large_path_uses_interior_triangulation() {
        let draw = Draw::new_path(
            rect_path(1024.0),
            Transform::IDENTITY,
            &Paint::fill(palette::css::RED),
            0,
            None,
        );
        assert!(matches!(draw.kind(), DrawKind::InteriorTriangulationPath(_)));
        assert!(draw.resource_counts().max_triangle_vertex_count > 0);
    }

    #[test]
    fn scale_flips_the_classification() {
        // The same path crosses the area threshold once the transform
        // scales it up; classification is a pure function of
        // (transform, path, paint).
        let small = Draw::new_path(
            rect_path(64.0),
            Transform::IDENTITY,
            &Paint::fill(palette::css::RED),
            0,
            None,
        );
        let scaled = Draw::new_path(
            rect_path(64.0),
            Transform {
                matrix: [16.0, 0.0, 0.0, 16.0],
                translation: [0.0; 2],
            },
            &Paint::fill(palette::css::RED),
            0,
            None,
        );
        assert!(matches!(small.kind(), DrawKind::MidpointFanPath(_)));
        assert!(matches!(
            scaled.kind(),
            DrawKind::InteriorTriangulationPath(_)
        ));
    }

    #[test]
    fn strokes_never_use_interior_triangulation() {
        let draw = Draw::new_path(
            rect_path(2048.0),
            Transform::IDENTITY,
            &Paint::stroke(palette::css::RED, Stroke::new(4.0)),
            0,
            None,
        );
        assert!(matches!(draw.kind(), DrawKind::MidpointFanPath(_)));
    }

    #[test]
    fn gradient_allocation_updates_counters() {
        let gradient = Arc::new(Gradient::linear(
            [0.0, 0.0],
            [10.0, 0.0],
            &[
                ColorStopPair::at(0.0),
                ColorStopPair::at(0.5),
                ColorStopPair::at(1.0),
            ]
            .map(|s| s.0),
        ));
        let mut draw = Draw::new_path(
            rect_path(16.0),
            Transform::IDENTITY,
            &Paint {
                source: PaintSource::Gradient(gradient.clone()),
                fill_rule: Fill::NonZero,
                stroke: None,
                blend_mode: Mix::Normal,
            },
            0,
            None,
        );
        let mut cache = GradientCache::new();
        let mut totals = ResourceCounters::default();
        assert!(draw.allocate_gradient_if_needed(&mut cache, &mut totals));
        assert_eq!(
            totals.complex_gradient_span_count,
            gradient.complex_span_count()
        );
        assert_eq!(
            draw.resource_counts().complex_gradient_span_count,
            gradient.complex_span_count()
        );
        assert!(matches!(
            draw.common.simple_paint_value,
            SimplePaintValue::ColorRamp(l) if l.is_complex()
        ));
    }

    #[test]
    fn release_refs_drops_shared_references() {
        let gradient = Arc::new(Gradient::linear(
            [0.0, 0.0],
            [10.0, 0.0],
            &[ColorStopPair::at(0.0).0, ColorStopPair::at(1.0).0],
        ));
        let mut list = DrawList::new();
        list.push(Draw::new_path(
            rect_path(16.0),
            Transform::IDENTITY,
            &Paint {
                source: PaintSource::Gradient(gradient.clone()),
                fill_rule: Fill::NonZero,
                stroke: None,
                blend_mode: Mix::Normal,
            },
            0,
            None,
        ));
        assert_eq!(Arc::strong_count(&gradient), 2);
        list.reset();
        assert_eq!(Arc::strong_count(&gradient), 1);
        assert!(list.is_empty());
    }

    /// Helper producing distinct-but-deterministic stops.
    struct ColorStopPair(peniko::ColorStop);

    impl ColorStopPair {
        fn at(offset: f32) -> Self {
            Self(peniko::ColorStop::from((offset, palette::css::REBECCA_PURPLE)))
        }
    }
}
