// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-flush staging buffers and draw batching.
//!
//! After a frame's draws have been counted, [`FrameStaging::begin_flush`]
//! lays out the tessellation texture, then every draw writes its records
//! here in sorted order. The typed vectors become the mapped ring buffer
//! contents; the accumulated [`DrawBatch`] list is what the flush engine
//! walks. Every count-then-push pair keeps a parallel pending count in
//! debug builds that must land exactly on the reservation.

use std::sync::Arc;

use peniko::kurbo::{CubicBez, Point, Vec2};

use crate::draw::{DrawCommon, ImageTexture, MeshBuffer, PathDrawData, ResourceCounters};
use crate::gpu::{
    ContourRecord, DrawType, GradientSpan, PaintAuxRecord, PaintRecord,
    PathRecord, ShaderFeatures, TessVertexSpan, TriangleVertex, TwoTexelRamp, contour_flags,
    IMAGE_DRAW_UNIFORMS_STRIDE, IMAGE_RECT_INDICES, MIDPOINT_FAN_PATCH_SEGMENT_SPAN,
    OUTER_CURVE_PATCH_SEGMENT_SPAN, TESS_TEXTURE_WIDTH,
};
use crate::gradient::GradTextureLayout;
use crate::interior::OUTER_CUBIC_ALIGNMENT;
use crate::math::IntBounds;
use crate::paint::{blend_mode_features, pack_image_draw_uniforms, pack_paint_aux_record,
    pack_paint_record, SimplePaintValue};

/// One run of consecutive draws the main PLS pass can issue with a single
/// draw call.
pub struct DrawBatch {
    pub draw_type: DrawType,
    pub base_element: u32,
    pub element_count: u32,
    pub shader_features: ShaderFeatures,
    pub image_texture: Option<Arc<dyn ImageTexture>>,
    /// Dynamic offset into the image draw uniform buffer.
    pub image_draw_data_offset: u32,
    pub vertex_buffer: Option<Arc<dyn MeshBuffer>>,
    pub uv_buffer: Option<Arc<dyn MeshBuffer>>,
    pub index_buffer: Option<Arc<dyn MeshBuffer>>,
    /// Under atomics interlock, a barrier must be recorded after this batch
    /// before the next one draws.
    pub needs_barrier: bool,
    bounds: IntBounds,
}

#[cfg(debug_assertions)]
#[derive(Default)]
struct DrawBaseline {
    paths: usize,
    contours: usize,
    tess_spans: usize,
    triangles: usize,
    image_uniform_bytes: usize,
    mf_cursor: u32,
    oc_cursor: u32,
}

/// Staging area for one flush.
#[derive(Default)]
pub struct FrameStaging {
    pub paths: Vec<PathRecord>,
    pub paints: Vec<PaintRecord>,
    pub paint_aux: Vec<PaintAuxRecord>,
    pub contours: Vec<ContourRecord>,
    pub tess_spans: Vec<TessVertexSpan>,
    pub triangles: Vec<TriangleVertex>,
    pub grad_spans: Vec<GradientSpan>,
    pub simple_ramps: Vec<TwoTexelRamp>,
    /// Packed at [`IMAGE_DRAW_UNIFORMS_STRIDE`] so any entry can be a
    /// dynamic offset target.
    pub image_draw_uniforms: Vec<u8>,

    batches: Vec<DrawBatch>,
    grad_layout: GradTextureLayout,
    combined_shader_features: ShaderFeatures,

    /// Midpoint fan vertices fill the tessellation texture from the top;
    /// outer cubic vertices follow in their own aligned region.
    mf_cursor: u32,
    oc_base: u32,
    oc_cursor: u32,

    expected: ResourceCounters,
    #[cfg(debug_assertions)]
    baseline: Option<DrawBaseline>,
}

impl FrameStaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lays out the tessellation texture for a flush whose draws total
    /// `expected`, and records the gradient layout paints will pack
    /// against.
    pub fn begin_flush(&mut self, expected: ResourceCounters, grad_layout: GradTextureLayout) {
        self.expected = expected;
        self.grad_layout = grad_layout;
        self.mf_cursor = 0;
        let mf_total = expected.midpoint_fan_tess_vertex_count as u32;
        debug_assert_eq!(mf_total % TESS_TEXTURE_WIDTH, 0);
        self.oc_base = mf_total.next_multiple_of(OUTER_CUBIC_ALIGNMENT);
        self.oc_cursor = self.oc_base;
    }

    pub fn grad_layout(&self) -> GradTextureLayout {
        self.grad_layout
    }

    pub fn batches(&self) -> &[DrawBatch] {
        &self.batches
    }

    pub fn combined_shader_features(&self) -> ShaderFeatures {
        self.combined_shader_features
    }

    /// Rows of the tessellation texture this flush writes.
    pub fn tess_data_height(&self) -> u32 {
        let used = if self.oc_cursor > self.oc_base {
            self.oc_cursor
        } else {
            self.mf_cursor
        };
        used.div_ceil(TESS_TEXTURE_WIDTH)
    }

    pub fn tess_span_count(&self) -> u32 {
        self.tess_spans.len() as u32
    }

    // ------------------------------------------------------------------
    // Record writers, called by draws during their push walk.

    pub fn push_path(&mut self, common: &DrawCommon, data: &PathDrawData) -> u32 {
        self.paths
            .push(PathRecord::new(&common.matrix, data.stroke_radius));
        self.paints.push(pack_paint_record(
            data.fill_rule,
            common.paint_type,
            common.simple_paint_value,
            self.grad_layout,
            common.clip_id,
            common.clip_rect_inverse_matrix.is_some(),
            common.blend_mode,
        ));
        self.paint_aux.push(pack_paint_aux_record(
            &common.matrix,
            common.paint_type,
            common.simple_paint_value,
            common.gradient.as_deref(),
            common.clip_rect_inverse_matrix.as_ref(),
        ));
        self.paths.len() as u32
    }

    pub fn push_contour(&mut self, midpoint: [f32; 2], path_id: u32) -> u32 {
        self.push_contour_record(midpoint, path_id, self.mf_cursor)
    }

    pub fn push_outer_contour(&mut self, midpoint: [f32; 2], path_id: u32) -> u32 {
        self.push_contour_record(midpoint, path_id, self.oc_cursor)
    }

    fn push_contour_record(&mut self, midpoint: [f32; 2], path_id: u32, vertex_index0: u32) -> u32 {
        self.contours.push(ContourRecord {
            midpoint,
            path_id,
            vertex_index0,
        });
        let id = self.contours.len() as u32;
        debug_assert!(id <= contour_flags::ID_MASK, "contour id overflow");
        id
    }

    /// Writes the span instances for one curve section of a midpoint fan
    /// contour, splitting at texture row boundaries.
    pub fn push_tess_section(
        &mut self,
        cubic: &CubicBez,
        join_tangent: Vec2,
        vertex_count: u32,
        packed_counts: u32,
        contour_id_with_flags: u32,
        path_id: u32,
    ) {
        let mut cursor = self.mf_cursor;
        Self::write_spans(
            &mut self.tess_spans,
            &mut cursor,
            cubic,
            join_tangent,
            vertex_count,
            packed_counts,
            contour_id_with_flags,
            path_id,
        );
        self.mf_cursor = cursor;
    }

    /// Midpoint fan variant: pads the current contour out to the next
    /// texture row with one degenerate span.
    pub fn push_tess_padding(&mut self, vertex_count: u32) {
        debug_assert!(vertex_count < TESS_TEXTURE_WIDTH);
        let mut cursor = self.mf_cursor;
        Self::write_padding_spans(&mut self.tess_spans, &mut cursor, vertex_count);
        self.mf_cursor = cursor;
    }

    /// Writes the span for one outer curve patch of an interior
    /// triangulation.
    pub fn push_outer_cubic_section(
        &mut self,
        cubic: &CubicBez,
        join_tangent: Vec2,
        vertex_count: u32,
        packed_counts: u32,
        contour_id_with_flags: u32,
        path_id: u32,
    ) {
        debug_assert_eq!(vertex_count, OUTER_CURVE_PATCH_SEGMENT_SPAN);
        let mut cursor = self.oc_cursor;
        Self::write_spans(
            &mut self.tess_spans,
            &mut cursor,
            cubic,
            join_tangent,
            vertex_count,
            packed_counts,
            contour_id_with_flags,
            path_id,
        );
        self.oc_cursor = cursor;
    }

    pub fn push_outer_cubic_padding(&mut self, vertex_count: u32) {
        let mut cursor = self.oc_cursor;
        Self::write_padding_spans(&mut self.tess_spans, &mut cursor, vertex_count);
        self.oc_cursor = cursor;
    }

    #[allow(clippy::too_many_arguments)]
    fn write_spans(
        spans: &mut Vec<TessVertexSpan>,
        cursor: &mut u32,
        cubic: &CubicBez,
        join_tangent: Vec2,
        vertex_count: u32,
        packed_counts: u32,
        contour_id_with_flags: u32,
        path_id: u32,
    ) {
        let pts = [
            cubic.p0.x as f32,
            cubic.p0.y as f32,
            cubic.p1.x as f32,
            cubic.p1.y as f32,
            cubic.p2.x as f32,
            cubic.p2.y as f32,
            cubic.p3.x as f32,
            cubic.p3.y as f32,
        ];
        let mut remaining = vertex_count;
        while remaining > 0 {
            let row = *cursor / TESS_TEXTURE_WIDTH;
            let x0 = *cursor % TESS_TEXTURE_WIDTH;
            let take = remaining.min(TESS_TEXTURE_WIDTH - x0);
            spans.push(TessVertexSpan {
                pts,
                join_tangent: [join_tangent.x as f32, join_tangent.y as f32],
                y: row as f32,
                reflection_y: -1.0,
                x0x1: TessVertexSpan::pack_x0x1(x0 as i32, (x0 + take) as i32),
                segment_counts: packed_counts,
                contour_id_with_flags,
                path_id,
            });
            *cursor += take;
            remaining -= take;
        }
    }

    fn write_padding_spans(spans: &mut Vec<TessVertexSpan>, cursor: &mut u32, vertex_count: u32) {
        if vertex_count == 0 {
            return;
        }
        // Padding texels still get well-defined span data; the degenerate
        // cubic makes the covered patches zero-area.
        Self::write_spans(
            spans,
            cursor,
            &CubicBez::new(Point::ZERO, Point::ZERO, Point::ZERO, Point::ZERO),
            Vec2::ZERO,
            vertex_count,
            TessVertexSpan::pack_segment_counts(1, 1, 0),
            0,
            0,
        );
    }

    pub fn push_triangle(&mut self, a: Point, b: Point, c: Point, weight: i16, path_id: u32) {
        for p in [a, b, c] {
            self.triangles.push(TriangleVertex::new(
                [p.x as f32, p.y as f32],
                weight,
                path_id,
            ));
        }
    }

    pub fn triangle_vertex_cursor(&self) -> usize {
        self.triangles.len()
    }

    /// Next midpoint fan patch instance.
    pub fn midpoint_fan_patch_cursor(&self) -> u32 {
        debug_assert_eq!(self.mf_cursor % MIDPOINT_FAN_PATCH_SEGMENT_SPAN, 0);
        self.mf_cursor / MIDPOINT_FAN_PATCH_SEGMENT_SPAN
    }

    /// Next outer curve patch instance, relative to the outer cubic region.
    pub fn outer_curve_patch_cursor(&self) -> u32 {
        let offset = self.oc_cursor - self.oc_base;
        debug_assert_eq!(offset % OUTER_CURVE_PATCH_SEGMENT_SPAN, 0);
        offset / OUTER_CURVE_PATCH_SEGMENT_SPAN
    }

    // ------------------------------------------------------------------
    // Batch building.

    pub fn push_midpoint_fan_batch(
        &mut self,
        common: &DrawCommon,
        fill_rule: peniko::Fill,
        base: u32,
        count: u32,
    ) {
        let features = path_draw_features(common, fill_rule);
        self.push_batch(
            DrawType::MidpointFanPatches,
            base,
            count,
            features,
            None,
            0,
            None,
            common.bounds,
        );
    }

    pub fn push_outer_curve_batch(
        &mut self,
        common: &DrawCommon,
        fill_rule: peniko::Fill,
        base: u32,
        count: u32,
    ) {
        let features = path_draw_features(common, fill_rule);
        self.push_batch(
            DrawType::OuterCurvePatches,
            base,
            count,
            features,
            None,
            0,
            None,
            common.bounds,
        );
    }

    pub fn push_interior_triangulation_batch(
        &mut self,
        common: &DrawCommon,
        fill_rule: peniko::Fill,
        base_vertex: u32,
        vertex_count: u32,
    ) {
        let features = path_draw_features(common, fill_rule);
        self.push_batch(
            DrawType::InteriorTriangulation,
            base_vertex,
            vertex_count,
            features,
            None,
            0,
            None,
            common.bounds,
        );
    }

    pub fn push_image_rect(&mut self, common: &DrawCommon, opacity: f32) {
        let offset = self.push_image_draw_uniforms(common, opacity);
        let features = image_draw_features(common);
        self.push_batch(
            DrawType::ImageRect,
            0,
            IMAGE_RECT_INDICES.len() as u32,
            features,
            common.image_texture.clone(),
            offset,
            None,
            common.bounds,
        );
    }

    pub fn push_image_mesh(
        &mut self,
        common: &DrawCommon,
        vertex_buffer: Arc<dyn MeshBuffer>,
        uv_buffer: Arc<dyn MeshBuffer>,
        index_buffer: Arc<dyn MeshBuffer>,
        index_count: u32,
        opacity: f32,
    ) {
        let offset = self.push_image_draw_uniforms(common, opacity);
        let features = image_draw_features(common);
        self.push_batch(
            DrawType::ImageMesh,
            0,
            index_count,
            features,
            common.image_texture.clone(),
            offset,
            Some((vertex_buffer, uv_buffer, index_buffer)),
            common.bounds,
        );
    }

    fn push_image_draw_uniforms(&mut self, common: &DrawCommon, opacity: f32) -> u32 {
        let offset = self.image_draw_uniforms.len();
        debug_assert_eq!(offset % IMAGE_DRAW_UNIFORMS_STRIDE, 0);
        let uniforms = pack_image_draw_uniforms(
            &common.matrix,
            opacity,
            common.clip_rect_inverse_matrix.as_ref(),
            common.clip_id,
            common.blend_mode,
        );
        self.image_draw_uniforms
            .extend_from_slice(bytemuck::bytes_of(&uniforms));
        self.image_draw_uniforms
            .resize(offset + IMAGE_DRAW_UNIFORMS_STRIDE, 0);
        offset as u32
    }

    #[allow(clippy::too_many_arguments)]
    fn push_batch(
        &mut self,
        draw_type: DrawType,
        base_element: u32,
        element_count: u32,
        shader_features: ShaderFeatures,
        image_texture: Option<Arc<dyn ImageTexture>>,
        image_draw_data_offset: u32,
        mesh_buffers: Option<(Arc<dyn MeshBuffer>, Arc<dyn MeshBuffer>, Arc<dyn MeshBuffer>)>,
        bounds: IntBounds,
    ) {
        self.combined_shader_features |= shader_features;
        if element_count == 0 && mesh_buffers.is_none() {
            return;
        }

        if let Some(last) = self.batches.last_mut() {
            let same_image = match (&last.image_texture, &image_texture) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            };
            let mergeable = last.draw_type == draw_type
                && same_image
                && mesh_buffers.is_none()
                && last.vertex_buffer.is_none()
                && !draw_type.is_image_draw()
                && last.base_element + last.element_count == base_element;
            if mergeable {
                last.element_count += element_count;
                last.shader_features |= shader_features;
                last.bounds = last.bounds.union(&bounds);
                return;
            }
            // A new batch whose pixels overlap the previous batch needs
            // ordering under atomics interlock.
            if last.bounds.intersects(&bounds) {
                last.needs_barrier = true;
            }
        }

        let (vertex_buffer, uv_buffer, index_buffer) = match mesh_buffers {
            Some((v, uv, i)) => (Some(v), Some(uv), Some(i)),
            None => (None, None, None),
        };
        self.batches.push(DrawBatch {
            draw_type,
            base_element,
            element_count,
            shader_features,
            image_texture,
            image_draw_data_offset,
            vertex_buffer,
            uv_buffer,
            index_buffer,
            needs_barrier: false,
            bounds,
        });
    }

    // ------------------------------------------------------------------
    // Count/push parity checks.

    /// Marks the start of one draw's push walk.
    pub fn begin_draw(&mut self, _common: &DrawCommon) {
        #[cfg(debug_assertions)]
        {
            self.baseline = Some(DrawBaseline {
                paths: self.paths.len(),
                contours: self.contours.len(),
                tess_spans: self.tess_spans.len(),
                triangles: self.triangles.len(),
                image_uniform_bytes: self.image_draw_uniforms.len(),
                mf_cursor: self.mf_cursor,
                oc_cursor: self.oc_cursor,
            });
        }
    }

    /// Asserts the draw wrote exactly what it reserved.
    pub fn end_draw(&mut self, common: &DrawCommon) {
        #[cfg(debug_assertions)]
        {
            let counts = common.counts;
            let baseline = self.baseline.take().expect("end_draw without begin_draw");
            debug_assert_eq!(self.paths.len() - baseline.paths, counts.path_count);
            debug_assert_eq!(self.contours.len() - baseline.contours, counts.contour_count);
            debug_assert_eq!(
                self.tess_spans.len() - baseline.tess_spans,
                counts.tessellated_segment_count
            );
            debug_assert_eq!(
                (self.mf_cursor - baseline.mf_cursor) as usize,
                counts.midpoint_fan_tess_vertex_count
            );
            debug_assert_eq!(
                (self.oc_cursor - baseline.oc_cursor) as usize,
                counts.outer_cubic_tess_vertex_count
            );
            debug_assert!(
                self.triangles.len() - baseline.triangles <= counts.max_triangle_vertex_count
            );
            debug_assert_eq!(
                (self.image_draw_uniforms.len() - baseline.image_uniform_bytes)
                    / IMAGE_DRAW_UNIFORMS_STRIDE,
                counts.image_draw_count
            );
        }
        #[cfg(not(debug_assertions))]
        {
            let _ = common;
        }
    }

    /// Verifies the flush totals and seals the staging area.
    pub fn finish(&mut self) {
        debug_assert_eq!(
            self.mf_cursor as usize,
            self.expected.midpoint_fan_tess_vertex_count
        );
        debug_assert_eq!(
            (self.oc_cursor - self.oc_base) as usize,
            self.expected.outer_cubic_tess_vertex_count
        );
        debug_assert_eq!(self.paths.len(), self.expected.path_count);
        debug_assert_eq!(self.contours.len(), self.expected.contour_count);
        debug_assert_eq!(
            self.tess_spans.len(),
            self.expected.tessellated_segment_count
        );
    }

    /// Clears everything for the next flush, keeping allocations.
    pub fn reset(&mut self) {
        self.paths.clear();
        self.paints.clear();
        self.paint_aux.clear();
        self.contours.clear();
        self.tess_spans.clear();
        self.triangles.clear();
        self.grad_spans.clear();
        self.simple_ramps.clear();
        self.image_draw_uniforms.clear();
        self.batches.clear();
        self.combined_shader_features = ShaderFeatures::NONE;
        self.mf_cursor = 0;
        self.oc_base = 0;
        self.oc_cursor = 0;
        self.expected = ResourceCounters::default();
    }
}

fn path_draw_features(common: &DrawCommon, fill_rule: peniko::Fill) -> ShaderFeatures {
    let mut features = blend_mode_features(common.blend_mode);
    if fill_rule == peniko::Fill::EvenOdd {
        features |= ShaderFeatures::ENABLE_EVEN_ODD;
    }
    if common.clip_id != 0 {
        features |= ShaderFeatures::ENABLE_CLIPPING;
    }
    if let SimplePaintValue::ClipUpdate { outer_clip_id } = common.simple_paint_value {
        features |= ShaderFeatures::ENABLE_CLIPPING;
        if outer_clip_id != 0 {
            features |= ShaderFeatures::ENABLE_NESTED_CLIPPING;
        }
    }
    if common.clip_rect_inverse_matrix.is_some() {
        features |= ShaderFeatures::ENABLE_CLIP_RECT;
    }
    features
}

fn image_draw_features(common: &DrawCommon) -> ShaderFeatures {
    let mut features = blend_mode_features(common.blend_mode);
    if common.clip_id != 0 {
        features |= ShaderFeatures::ENABLE_CLIPPING;
    }
    if common.clip_rect_inverse_matrix.is_some() {
        features |= ShaderFeatures::ENABLE_CLIP_RECT;
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::{Draw, DrawList, Paint};
    use crate::gradient::GradientCache;
    use crate::math::Transform;
    use peniko::color::palette;
    use peniko::kurbo::{Rect, Shape};

    fn push_frame(draws: &mut DrawList) -> FrameStaging {
        let mut totals = ResourceCounters::default();
        let mut cache = GradientCache::new();
        for draw in draws.iter_mut() {
            assert!(draw.allocate_gradient_if_needed(&mut cache, &mut totals));
        }
        for draw in draws.iter() {
            totals += *draw.resource_counts();
        }
        let mut frame = FrameStaging::new();
        frame.begin_flush(totals, cache.layout());
        for draw in draws.iter_mut() {
            draw.push_to_context(&mut frame);
        }
        frame.finish();
        frame
    }

    fn rect_draw(x: f64) -> Draw {
        Draw::new_path(
            Arc::new(Rect::new(x, 0.0, x + 32.0, 32.0).to_path(0.1)),
            Transform::IDENTITY,
            &Paint::fill(palette::css::REBECCA_PURPLE),
            0,
            None,
        )
    }

    #[test]
    fn push_matches_reservation_for_simple_fills() {
        let mut draws = DrawList::new();
        draws.push(rect_draw(0.0));
        draws.push(rect_draw(100.0));
        let frame = push_frame(&mut draws);
        assert_eq!(frame.paths.len(), 2);
        assert_eq!(frame.contours.len(), 2);
        // 4 line spans + 1 padding span per rect.
        assert_eq!(frame.tess_spans.len(), 10);
        assert_eq!(frame.tess_data_height(), 2);
    }

    #[test]
    fn consecutive_fan_draws_merge_into_one_batch() {
        let mut draws = DrawList::new();
        draws.push(rect_draw(0.0));
        draws.push(rect_draw(100.0));
        let frame = push_frame(&mut draws);
        let batches = frame.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].draw_type, DrawType::MidpointFanPatches);
        assert_eq!(batches[0].base_element, 0);
        // Each rect occupies one full padded row of 2048/8 patches.
        assert_eq!(
            batches[0].element_count,
            2 * TESS_TEXTURE_WIDTH / MIDPOINT_FAN_PATCH_SEGMENT_SPAN
        );
        assert!(!batches[0].needs_barrier);
    }

    #[test]
    fn overlapping_batches_are_marked_for_barriers() {
        let mut draws = DrawList::new();
        // A big interior-triangulated square under a small fan rect at the
        // same pixels forces two batches with overlapping bounds.
        draws.push(Draw::new_path(
            Arc::new(Rect::new(0.0, 0.0, 1024.0, 1024.0).to_path(0.1)),
            Transform::IDENTITY,
            &Paint::fill(palette::css::REBECCA_PURPLE),
            0,
            None,
        ));
        draws.push(rect_draw(8.0));
        let frame = push_frame(&mut draws);
        let batches = frame.batches();
        assert!(batches.len() >= 2);
        let last = batches.len() - 1;
        assert_eq!(batches[last].draw_type, DrawType::MidpointFanPatches);
        // Everything before the fan batch that overlaps it is marked.
        assert!(batches[..last].iter().any(|b| b.needs_barrier));
    }

    #[test]
    fn image_uniforms_are_stride_aligned() {
        struct FakeTexture;
        impl ImageTexture for FakeTexture {
            fn width(&self) -> u32 {
                1
            }
            fn height(&self) -> u32 {
                1
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }
        let texture: Arc<dyn ImageTexture> = Arc::new(FakeTexture);
        let mut draws = DrawList::new();
        draws.push(Draw::new_image_rect(
            IntBounds::new(0, 0, 10, 10),
            Transform::IDENTITY,
            peniko::Mix::Normal,
            texture.clone(),
            1.0,
        ));
        draws.push(Draw::new_image_rect(
            IntBounds::new(100, 100, 110, 110),
            Transform::IDENTITY,
            peniko::Mix::Normal,
            texture,
            0.5,
        ));
        let frame = push_frame(&mut draws);
        assert_eq!(frame.batches().len(), 2);
        assert_eq!(frame.batches()[0].image_draw_data_offset, 0);
        assert_eq!(
            frame.batches()[1].image_draw_data_offset,
            IMAGE_DRAW_UNIFORMS_STRIDE as u32
        );
        assert_eq!(
            frame.image_draw_uniforms.len(),
            2 * IMAGE_DRAW_UNIFORMS_STRIDE
        );
    }

    #[test]
    fn even_odd_paths_request_the_feature() {
        let mut draws = DrawList::new();
        let mut paint = Paint::fill(palette::css::REBECCA_PURPLE);
        paint.fill_rule = peniko::Fill::EvenOdd;
        draws.push(Draw::new_path(
            Arc::new(Rect::new(0.0, 0.0, 32.0, 32.0).to_path(0.1)),
            Transform::IDENTITY,
            &paint,
            0,
            None,
        ));
        let frame = push_frame(&mut draws);
        assert!(frame
            .combined_shader_features()
            .contains(ShaderFeatures::ENABLE_EVEN_ODD));
        let mut clipped = DrawList::new();
        clipped.push(Draw::new_path(
            Arc::new(Rect::new(0.0, 0.0, 32.0, 32.0).to_path(0.1)),
            Transform::IDENTITY,
            &Paint::fill(palette::css::REBECCA_PURPLE),
            3,
            None,
        ));
        let frame = push_frame(&mut clipped);
        assert!(frame
            .combined_shader_features()
            .contains(ShaderFeatures::ENABLE_CLIPPING));
    }
}
