// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! GPU-visible data layouts and the bit-exact constants shared with the
//! shaders. Everything in this module is plain-old-data; buffers are filled
//! by casting slices of these records.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert;

use crate::math::Transform;

/// Width of the gradient ramp texture, in texels.
pub const GRAD_TEXTURE_WIDTH: u32 = 512;

/// Width of the tessellation vertex texture, in texels.
pub const TESS_TEXTURE_WIDTH: u32 = 2048;
pub const TESS_TEXTURE_WIDTH_LOG2: u32 = 11;
const_assert!(1 << TESS_TEXTURE_WIDTH_LOG2 == TESS_TEXTURE_WIDTH);

/// Number of tessellation segments spanned by one midpoint fan patch.
pub const MIDPOINT_FAN_PATCH_SEGMENT_SPAN: u32 = 8;

/// Number of tessellation segments spanned by one outer curve patch. The
/// final segment is a bowtie join.
pub const OUTER_CURVE_PATCH_SEGMENT_SPAN: u32 = 17;

/// Segments of an outer curve patch that carry curve geometry (everything
/// but the bowtie join).
pub const PATCH_SEGMENT_COUNT_EXCLUDING_JOIN: u32 = OUTER_CURVE_PATCH_SEGMENT_SPAN - 1;

/// Most parametric segments Wang's formula may request for a single curve.
pub const MAX_PARAMETRIC_SEGMENTS: u32 = 1 << 10;

/// Most polar segments a stroked curve or round join may request.
pub const MAX_POLAR_SEGMENTS: u32 = 1 << 10;

/// Most outer curve patches one curve can be subdivided into.
pub const MAX_CURVE_SUBDIVISIONS: u32 = (MAX_PARAMETRIC_SEGMENTS
    + PATCH_SEGMENT_COUNT_EXCLUDING_JOIN
    - 1)
    / PATCH_SEGMENT_COUNT_EXCLUDING_JOIN;
const_assert!(MAX_CURVE_SUBDIVISIONS * PATCH_SEGMENT_COUNT_EXCLUDING_JOIN >= MAX_PARAMETRIC_SEGMENTS);

/// Number of in-flight frames the buffer rings cycle through.
pub const BUFFER_RING_SIZE: usize = 3;

/// Index pattern for one tessellation span instance (two triangles).
pub const TESS_SPAN_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Paths with a transformed bounding area above this many square pixels are
/// drawn with interior triangulation instead of midpoint fans.
pub const INTERIOR_TRIANGULATION_AREA_THRESHOLD: f32 = 512.0 * 512.0;

/// Paths with at least this many contours also switch to interior
/// triangulation regardless of area.
pub const INTERIOR_TRIANGULATION_CONTOUR_THRESHOLD: usize = 16;

/// Kinds of draw the main PLS pass can issue. Each kind has its own vertex
/// layout and shader pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DrawType {
    MidpointFanPatches,
    OuterCurvePatches,
    InteriorTriangulation,
    ImageRect,
    ImageMesh,
    AtomicResolve,
}

impl DrawType {
    pub fn is_image_draw(self) -> bool {
        matches!(self, Self::ImageRect | Self::ImageMesh)
    }

    /// Stable small integer for composite cache keys.
    pub fn index(self) -> u32 {
        match self {
            Self::MidpointFanPatches => 0,
            Self::OuterCurvePatches => 1,
            Self::InteriorTriangulation => 2,
            Self::ImageRect => 3,
            Self::ImageMesh => 4,
            Self::AtomicResolve => 5,
        }
    }

    pub const COUNT: u32 = 6;
}

/// Optional shader behaviors, enabled per draw batch (rasterOrdering) or
/// combined over the whole flush (atomics).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderFeatures(pub u32);

impl ShaderFeatures {
    pub const NONE: Self = Self(0);
    pub const ENABLE_CLIPPING: Self = Self(1 << 0);
    pub const ENABLE_CLIP_RECT: Self = Self(1 << 1);
    pub const ENABLE_ADVANCED_BLEND: Self = Self(1 << 2);
    pub const ENABLE_EVEN_ODD: Self = Self(1 << 3);
    pub const ENABLE_NESTED_CLIPPING: Self = Self(1 << 4);
    pub const ENABLE_HSL_BLEND_MODES: Self = Self(1 << 5);

    pub const ALL: Self = Self((1 << Self::BIT_COUNT) - 1);
    pub const BIT_COUNT: u32 = 6;

    #[must_use]
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The preprocessor define name for each single feature bit, in bit
    /// order.
    pub fn define_names(self) -> impl Iterator<Item = &'static str> {
        const NAMES: [&str; ShaderFeatures::BIT_COUNT as usize] = [
            "ENABLE_CLIPPING",
            "ENABLE_CLIP_RECT",
            "ENABLE_ADVANCED_BLEND",
            "ENABLE_EVEN_ODD",
            "ENABLE_NESTED_CLIPPING",
            "ENABLE_HSL_BLEND_MODES",
        ];
        NAMES
            .into_iter()
            .enumerate()
            .filter(move |(i, _)| self.0 & (1 << i) != 0)
            .map(|(_, name)| name)
    }
}

impl std::ops::BitOr for ShaderFeatures {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ShaderFeatures {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Per-path record in the path storage buffer.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct PathRecord {
    pub matrix: [f32; 6],
    /// 0 if the path is filled.
    pub stroke_radius: f32,
    pub _pad: u32,
}

impl PathRecord {
    pub fn new(matrix: &Transform, stroke_radius: f32) -> Self {
        let mut m = [0.0; 6];
        m[..4].copy_from_slice(&matrix.matrix);
        m[4..].copy_from_slice(&matrix.translation);
        Self {
            matrix: m,
            stroke_radius,
            _pad: 0,
        }
    }
}

/// Per-path paint record. `params` packs the paint type in the low bits,
/// the blend mode at bit 4 and the clip id at bit 16; `value` is the
/// paint-type-specific payload (color, gradient row y, or image opacity).
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct PaintRecord {
    pub params: u32,
    pub value: u32,
}

/// Per-path auxiliary paint data: the paint matrix, the gradient texture
/// horizontal span, and the clip rect inverse matrix with its coverage
/// feathering terms.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct PaintAuxRecord {
    pub matrix: [f32; 6],
    pub grad_texture_horizontal_span: [f32; 2],
    pub clip_rect_inverse_matrix: [f32; 6],
    pub inverse_fwidth: [f32; 2],
}

/// Per-contour record in the contour storage buffer.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct ContourRecord {
    pub midpoint: [f32; 2],
    pub path_id: u32,
    /// First tessellation vertex of the contour, after row padding.
    pub vertex_index0: u32,
}

/// Contour id + flags word carried by tessellation spans.
pub mod contour_flags {
    /// This span writes the mirrored copy of the contour's vertices.
    pub const MIRRORED_CONTOUR: u32 = 1 << 31;
    /// With an emulated stroke cap, render only the outgoing side of the
    /// join.
    pub const EMULATED_CAP_LEADING: u32 = 1 << 30;
    /// With an emulated stroke cap, render only the incoming side.
    pub const EMULATED_CAP_TRAILING: u32 = 1 << 29;
    /// The join following this curve is a round join.
    pub const ROUND_JOIN: u32 = 1 << 28;

    pub const ID_MASK: u32 = 0xffff;
    pub const FLAGS_MASK: u32 = !ID_MASK;
}

/// One instanced quad of the tessellation pass. Three 4-float attributes
/// plus one 4-uint attribute:
///
/// - `pts`: the cubic's control point quadruple;
/// - `join_tangent` / `y` / `reflection_y`: the tangent of the following
///   join section and the destination texture row(s);
/// - `x0x1`, `segment_counts`, `contour_id_with_flags`, `path_id`: span
///   columns, packed parametric/polar/join segment counts, and indices.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct TessVertexSpan {
    pub pts: [f32; 8],
    pub join_tangent: [f32; 2],
    pub y: f32,
    /// Row of the mirrored copy, negative when the span has none.
    pub reflection_y: f32,
    /// Start/end column, packed as two signed 16-bit values. The start may
    /// go negative when a span wraps the left texture edge.
    pub x0x1: u32,
    pub segment_counts: u32,
    pub contour_id_with_flags: u32,
    pub path_id: u32,
}

impl TessVertexSpan {
    pub fn pack_x0x1(x0: i32, x1: i32) -> u32 {
        debug_assert!((-32768..32768).contains(&x0));
        debug_assert!((-32768..32768).contains(&x1));
        ((x0 as u32) & 0xffff) | ((x1 as u32) << 16)
    }

    /// Packs (parametric - 1) in bits 0..10, (polar - 1) in bits 10..20 and
    /// the join segment count in bits 20..30.
    pub fn pack_segment_counts(parametric: u32, polar: u32, join: u32) -> u32 {
        debug_assert!((1..=MAX_PARAMETRIC_SEGMENTS).contains(&parametric));
        debug_assert!((1..=MAX_POLAR_SEGMENTS).contains(&polar));
        debug_assert!(join < 1 << 10);
        (parametric - 1) | ((polar - 1) << 10) | (join << 20)
    }
}

const_assert!(std::mem::size_of::<TessVertexSpan>() == 64);

/// Vertex of an interior triangulation. The fan weight and path id share
/// the third float: `(weight << 16) | path_id`, stored as a float.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct TriangleVertex {
    pub point: [f32; 2],
    pub weight_and_path_id: f32,
}

impl TriangleVertex {
    pub fn new(point: [f32; 2], weight: i16, path_id: u32) -> Self {
        debug_assert!(path_id <= 0xffff);
        Self {
            point,
            weight_and_path_id: (((weight as i32) << 16) | path_id as i32) as f32,
        }
    }
}

/// One interpolation span of a complex gradient, drawn as an instanced
/// strip into its row of the gradient texture.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct GradientSpan {
    /// Left/right texel, each in 16-bit fixed point over the texture width.
    pub horizontal_span: u32,
    pub y: u32,
    pub color0: u32,
    pub color1: u32,
}

impl GradientSpan {
    pub fn new(left: f32, right: f32, y: u32, color0: u32, color1: u32) -> Self {
        let fixed = |x: f32| ((x.clamp(0.0, 1.0) * 65535.0) as u32).min(65535);
        Self {
            horizontal_span: fixed(left) | (fixed(right) << 16),
            y,
            color0,
            color1,
        }
    }
}

/// A two-texel simple gradient ramp, copied into the bottom rows of the
/// gradient texture from the upload buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct TwoTexelRamp {
    pub color0: [u8; 4],
    pub color1: [u8; 4],
}

/// Uniforms bound once per flush.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct FlushUniforms {
    /// `2 / x` for (complex gradient rows height, tess data height, render
    /// target width, render target height), with sign flips applied for
    /// offscreen/onscreen y conventions.
    pub inverse_viewports: [f32; 4],
    pub render_target_width: u32,
    pub render_target_height: u32,
    pub coverage_clear_value: u32,
    pub grad_texture_inverse_height: f32,
    pub path_id_granularity: u32,
    pub _pad: [u32; 3],
}

impl FlushUniforms {
    pub fn inverse_viewports(
        complex_gradients_height: u32,
        tess_data_height: u32,
        render_target_width: u32,
        render_target_height: u32,
        invert_offscreen_y: bool,
    ) -> [f32; 4] {
        let mut numerators = [2.0f32; 4];
        if invert_offscreen_y {
            numerators[0] = -numerators[0];
            numerators[1] = -numerators[1];
        }
        [
            numerators[0] / complex_gradients_height.max(1) as f32,
            numerators[1] / tess_data_height.max(1) as f32,
            numerators[2] / render_target_width.max(1) as f32,
            numerators[3] / render_target_height.max(1) as f32,
        ]
    }
}

/// Per-image-draw uniforms, bound with a dynamic offset. Instances are
/// written at [`IMAGE_DRAW_UNIFORMS_STRIDE`] so any one of them can be the
/// dynamic-offset target.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct ImageDrawUniforms {
    pub matrix: [f32; 6],
    pub opacity: f32,
    pub _pad: u32,
    pub clip_rect_inverse_matrix: [f32; 6],
    pub clip_id: u32,
    pub blend_mode: u32,
}

/// Dynamic uniform offsets must satisfy the device's alignment; 256 is the
/// universal lower bound.
pub const IMAGE_DRAW_UNIFORMS_STRIDE: usize = 256;
const_assert!(std::mem::size_of::<ImageDrawUniforms>() <= IMAGE_DRAW_UNIFORMS_STRIDE);

// ---------------------------------------------------------------------------
// Patch geometry.
//
// Midpoint fan and outer curve patches share one vertex buffer and one index
// buffer; `patch_base_index` selects the slice to draw.

/// Vertex of a tessellation patch. The fourth component of `local` packs
/// `(patch_segment_span << 2) | vertex_type`.
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct PatchVertex {
    pub local: [f32; 4],
    pub mirror: [f32; 4],
}

impl PatchVertex {
    fn set(&mut self, local_vertex_id: f32, outset: f32, fill_coverage: f32, params: f32) {
        self.local = [local_vertex_id, outset, fill_coverage, params];
        // Unless overridden, the mirror is the same as the local position.
        self.mirror = [local_vertex_id, outset, fill_coverage, params];
    }

    fn set_mirrored_position(&mut self, local_vertex_id: f32, outset: f32, fill_coverage: f32) {
        self.mirror = [local_vertex_id, outset, fill_coverage, self.local[3]];
    }
}

const STROKE_VERTEX: u32 = 0;
const FAN_VERTEX: u32 = 1;
const FAN_MIDPOINT_VERTEX: u32 = 2;

fn pack_params(patch_segment_span: u32, vertex_type: u32) -> f32 {
    ((patch_segment_span << 2) | vertex_type) as f32
}

pub const MIDPOINT_FAN_PATCH_VERTEX_COUNT: u32 =
    MIDPOINT_FAN_PATCH_SEGMENT_SPAN * 4 + (MIDPOINT_FAN_PATCH_SEGMENT_SPAN + 1) + 1;
pub const MIDPOINT_FAN_PATCH_INDEX_COUNT: u32 = MIDPOINT_FAN_PATCH_SEGMENT_SPAN * 6
    + (MIDPOINT_FAN_PATCH_SEGMENT_SPAN - 1) * 3
    + 3;
pub const MIDPOINT_FAN_PATCH_BASE_INDEX: u32 = 0;

pub const OUTER_CURVE_PATCH_VERTEX_COUNT: u32 = OUTER_CURVE_PATCH_SEGMENT_SPAN * 8
    + (OUTER_CURVE_PATCH_SEGMENT_SPAN - 1)
    + 1;
pub const OUTER_CURVE_PATCH_INDEX_COUNT: u32 = OUTER_CURVE_PATCH_SEGMENT_SPAN * 12
    + (OUTER_CURVE_PATCH_SEGMENT_SPAN - 2) * 3;
pub const OUTER_CURVE_PATCH_BASE_INDEX: u32 = MIDPOINT_FAN_PATCH_INDEX_COUNT;

pub const PATCH_VERTEX_BUFFER_COUNT: u32 =
    MIDPOINT_FAN_PATCH_VERTEX_COUNT + OUTER_CURVE_PATCH_VERTEX_COUNT;
pub const PATCH_INDEX_BUFFER_COUNT: u32 =
    MIDPOINT_FAN_PATCH_INDEX_COUNT + OUTER_CURVE_PATCH_INDEX_COUNT;

// The fan span of each patch type must be a power of two for the middle-out
// index topology below.
const_assert!(MIDPOINT_FAN_PATCH_SEGMENT_SPAN.is_power_of_two());
const_assert!((OUTER_CURVE_PATCH_SEGMENT_SPAN - 1).is_power_of_two());

/// Number of indices drawn for a patch of the given draw type.
pub fn patch_index_count(draw_type: DrawType) -> u32 {
    match draw_type {
        DrawType::MidpointFanPatches => MIDPOINT_FAN_PATCH_INDEX_COUNT,
        DrawType::OuterCurvePatches => OUTER_CURVE_PATCH_INDEX_COUNT,
        _ => panic!("not a patch draw type: {draw_type:?}"),
    }
}

/// First index of the patch slice for the given draw type.
pub fn patch_base_index(draw_type: DrawType) -> u32 {
    match draw_type {
        DrawType::MidpointFanPatches => MIDPOINT_FAN_PATCH_BASE_INDEX,
        DrawType::OuterCurvePatches => OUTER_CURVE_PATCH_BASE_INDEX,
        _ => panic!("not a patch draw type: {draw_type:?}"),
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum PatchType {
    MidpointFan,
    OuterCurves,
}

fn generate_patch_type(
    patch_type: PatchType,
    vertices: &mut [PatchVertex],
    indices: &mut Vec<u16>,
    base_vertex: u16,
) {
    let patch_segment_span = match patch_type {
        PatchType::MidpointFan => MIDPOINT_FAN_PATCH_SEGMENT_SPAN,
        PatchType::OuterCurves => OUTER_CURVE_PATCH_SEGMENT_SPAN,
    } as usize;

    // AA border vertices. "Inner tessellation curves" have one more segment
    // without a fan triangle whose purpose is to be a bowtie join.
    let mut vertex_count = 0;
    for i in 0..patch_segment_span {
        let params = pack_params(patch_segment_span as u32, STROKE_VERTEX);
        let l = i as f32;
        let r = l + 1.0;
        if patch_type == PatchType::OuterCurves {
            vertices[vertex_count].set(l, 0.0, 0.5, params);
            vertices[vertex_count + 1].set(l, 1.0, 0.0, params);
            vertices[vertex_count + 2].set(r, 0.0, 0.5, params);
            vertices[vertex_count + 3].set(r, 1.0, 0.0, params);

            // Alternate positions when mirrored so the border has the same
            // diagonals whether mirrored or not.
            vertices[vertex_count].set_mirrored_position(r, 0.0, 0.5);
            vertices[vertex_count + 1].set_mirrored_position(l, 0.0, 0.5);
            vertices[vertex_count + 2].set_mirrored_position(r, 1.0, 0.0);
            vertices[vertex_count + 3].set_mirrored_position(l, 1.0, 0.0);
        } else {
            vertices[vertex_count].set(l, -1.0, 1.0, params);
            vertices[vertex_count + 1].set(l, 1.0, 0.0, params);
            vertices[vertex_count + 2].set(r, -1.0, 1.0, params);
            vertices[vertex_count + 3].set(r, 1.0, 0.0, params);

            vertices[vertex_count].set_mirrored_position(r - 1.0, -1.0, 1.0);
            vertices[vertex_count + 1].set_mirrored_position(l - 1.0, -1.0, 1.0);
            vertices[vertex_count + 2].set_mirrored_position(r - 1.0, 1.0, 0.0);
            vertices[vertex_count + 3].set_mirrored_position(l - 1.0, 1.0, 0.0);
        }
        vertex_count += 4;
    }

    // Bottom (negative coverage) side of the AA border.
    if patch_type == PatchType::OuterCurves {
        let params = pack_params(patch_segment_span as u32, STROKE_VERTEX);
        for i in 0..patch_segment_span {
            let l = i as f32;
            let r = l + 1.0;

            vertices[vertex_count].set(l, -0.0, 0.5, params);
            vertices[vertex_count + 1].set(r, -0.0, 0.5, params);
            vertices[vertex_count + 2].set(l, -1.0, 0.0, params);
            vertices[vertex_count + 3].set(r, -1.0, 0.0, params);

            vertices[vertex_count].set_mirrored_position(r, -0.0, 0.5);
            vertices[vertex_count + 1].set_mirrored_position(r, -1.0, 0.0);
            vertices[vertex_count + 2].set_mirrored_position(l, -0.0, 0.5);
            vertices[vertex_count + 3].set_mirrored_position(l, -1.0, 0.0);

            vertex_count += 4;
        }
    }

    // Triangle fan vertices. These only touch the first `fan_segment_span`
    // segments on inner tessellation curves.
    let fan_vertices_idx = vertex_count;
    let fan_segment_span = match patch_type {
        PatchType::MidpointFan => patch_segment_span,
        PatchType::OuterCurves => patch_segment_span - 1,
    };
    debug_assert!(fan_segment_span.is_power_of_two());
    for i in 0..=fan_segment_span {
        let params = pack_params(patch_segment_span as u32, FAN_VERTEX);
        if patch_type == PatchType::OuterCurves {
            vertices[vertex_count].set(i as f32, 0.0, 1.0, params);
        } else {
            vertices[vertex_count].set(i as f32, -1.0, 1.0, params);
            vertices[vertex_count].set_mirrored_position(i as f32 - 1.0, -1.0, 1.0);
        }
        vertex_count += 1;
    }

    // The midpoint vertex is only included on midpoint fan patches.
    let midpoint_idx = vertex_count;
    if patch_type == PatchType::MidpointFan {
        vertices[vertex_count].set(
            0.0,
            0.0,
            1.0,
            pack_params(patch_segment_span as u32, FAN_MIDPOINT_VERTEX),
        );
        vertex_count += 1;
    }
    debug_assert_eq!(
        vertex_count,
        match patch_type {
            PatchType::MidpointFan => MIDPOINT_FAN_PATCH_VERTEX_COUNT,
            PatchType::OuterCurves => OUTER_CURVE_PATCH_VERTEX_COUNT,
        } as usize
    );

    // AA border indices.
    const BORDER_PATTERN_VERTEX_COUNT: usize = 4;
    const BORDER_PATTERN: [u16; 6] = [0, 1, 2, 2, 1, 3];
    const NEGATIVE_BORDER_PATTERN: [u16; 6] = [0, 2, 1, 1, 2, 3];

    let index_count0 = indices.len();
    let mut border_edge_vertices_idx = 0u16;
    for _ in 0..patch_segment_span {
        for i in BORDER_PATTERN {
            indices.push(base_vertex + border_edge_vertices_idx + i);
        }
        border_edge_vertices_idx += BORDER_PATTERN_VERTEX_COUNT as u16;
    }

    // Bottom (negative coverage) side of the AA border.
    if patch_type == PatchType::OuterCurves {
        for _ in 0..patch_segment_span {
            for i in NEGATIVE_BORDER_PATTERN {
                indices.push(base_vertex + border_edge_vertices_idx + i);
            }
            border_edge_vertices_idx += BORDER_PATTERN_VERTEX_COUNT as u16;
        }
    }

    debug_assert_eq!(border_edge_vertices_idx as usize, fan_vertices_idx);

    // Triangle fan indices, in a middle-out topology. The final bowtie join
    // segment of an outer curve patch is not part of the fan.
    let fan_vertices_idx = fan_vertices_idx as u16;
    let mut step = 1;
    while step < fan_segment_span {
        let mut i = 0;
        while i < fan_segment_span {
            indices.push(fan_vertices_idx + i as u16 + base_vertex);
            indices.push(fan_vertices_idx + (i + step) as u16 + base_vertex);
            indices.push(fan_vertices_idx + (i + step * 2) as u16 + base_vertex);
            i += step * 2;
        }
        step <<= 1;
    }
    if patch_type == PatchType::MidpointFan {
        // Triangle to the contour midpoint.
        indices.push(fan_vertices_idx + base_vertex);
        indices.push(fan_vertices_idx + fan_segment_span as u16 + base_vertex);
        indices.push(midpoint_idx as u16 + base_vertex);
    }
    debug_assert_eq!(
        indices.len() - index_count0,
        match patch_type {
            PatchType::MidpointFan => MIDPOINT_FAN_PATCH_INDEX_COUNT,
            PatchType::OuterCurves => OUTER_CURVE_PATCH_INDEX_COUNT,
        } as usize
    );
}

/// Generates the shared patch vertex and index buffers.
pub fn generate_patch_buffer_data() -> (Vec<PatchVertex>, Vec<u16>) {
    let mut vertices = vec![PatchVertex::default(); PATCH_VERTEX_BUFFER_COUNT as usize];
    let mut indices = Vec::with_capacity(PATCH_INDEX_BUFFER_COUNT as usize);
    generate_patch_type(PatchType::MidpointFan, &mut vertices, &mut indices, 0);
    generate_patch_type(
        PatchType::OuterCurves,
        &mut vertices[MIDPOINT_FAN_PATCH_VERTEX_COUNT as usize..],
        &mut indices,
        MIDPOINT_FAN_PATCH_VERTEX_COUNT as u16,
    );
    debug_assert_eq!(indices.len(), PATCH_INDEX_BUFFER_COUNT as usize);
    (vertices, indices)
}

/// Unit rect geometry for image rect draws in atomics mode: the corner
/// positions plus signed AA offset directions.
pub const IMAGE_RECT_VERTICES: [[f32; 4]; 8] = [
    [0.0, 0.0, -1.0, -1.0],
    [1.0, 0.0, 1.0, -1.0],
    [1.0, 1.0, 1.0, 1.0],
    [0.0, 1.0, -1.0, 1.0],
    [0.0, 0.0, 1.0, 1.0],
    [1.0, 0.0, -1.0, 1.0],
    [1.0, 1.0, -1.0, -1.0],
    [0.0, 1.0, 1.0, -1.0],
];

pub const IMAGE_RECT_INDICES: [u16; 18] = [
    0, 1, 2, 2, 3, 0, // interior
    0, 4, 5, 5, 1, 0, // top AA skirt
    2, 6, 7, 7, 3, 2, // bottom AA skirt
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_counts_are_consistent() {
        // 8 border quads, 9 fan vertices, 1 midpoint.
        assert_eq!(MIDPOINT_FAN_PATCH_VERTEX_COUNT, 42);
        assert_eq!(MIDPOINT_FAN_PATCH_INDEX_COUNT, 72);
        // 17 + 17 border quads, 17 fan vertices, no midpoint.
        assert_eq!(OUTER_CURVE_PATCH_VERTEX_COUNT, 153);
        assert_eq!(OUTER_CURVE_PATCH_INDEX_COUNT, 249);
        assert_eq!(PATCH_VERTEX_BUFFER_COUNT, 195);
        assert_eq!(PATCH_INDEX_BUFFER_COUNT, 321);
    }

    #[test]
    fn generated_patches_fill_the_buffers() {
        let (vertices, indices) = generate_patch_buffer_data();
        assert_eq!(vertices.len(), PATCH_VERTEX_BUFFER_COUNT as usize);
        assert_eq!(indices.len(), PATCH_INDEX_BUFFER_COUNT as usize);
        // Every index addresses a vertex inside the shared buffer, and the
        // outer curve slice never reaches back into the midpoint fan slice.
        for &i in &indices[..MIDPOINT_FAN_PATCH_INDEX_COUNT as usize] {
            assert!((i as u32) < MIDPOINT_FAN_PATCH_VERTEX_COUNT);
        }
        for &i in &indices[MIDPOINT_FAN_PATCH_INDEX_COUNT as usize..] {
            assert!((i as u32) >= MIDPOINT_FAN_PATCH_VERTEX_COUNT);
            assert!((i as u32) < PATCH_VERTEX_BUFFER_COUNT);
        }
    }

    #[test]
    fn subdivision_budget_covers_max_parametric_segments() {
        assert!(MAX_CURVE_SUBDIVISIONS * PATCH_SEGMENT_COUNT_EXCLUDING_JOIN >= MAX_PARAMETRIC_SEGMENTS);
        assert_eq!(MAX_CURVE_SUBDIVISIONS, 64);
    }

    #[test]
    fn tess_span_packing_roundtrips() {
        let x = TessVertexSpan::pack_x0x1(-5, 2000);
        assert_eq!((x & 0xffff) as i16, -5);
        assert_eq!((x >> 16) as i16, 2000);

        let counts = TessVertexSpan::pack_segment_counts(1024, 1, 3);
        assert_eq!((counts & 0x3ff) + 1, 1024);
        assert_eq!(((counts >> 10) & 0x3ff) + 1, 1);
        assert_eq!(counts >> 20, 3);
    }

    #[test]
    fn gradient_span_fixed_point_saturates() {
        let span = GradientSpan::new(-0.5, 2.0, 7, 0xff0000ff, 0xffffffff);
        assert_eq!(span.horizontal_span & 0xffff, 0);
        assert_eq!(span.horizontal_span >> 16, 65535);
        assert_eq!(span.y, 7);
    }
}
