// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shader selection and cache keying.
//!
//! Shader module pairs are keyed on (draw type, interlock mode, shader
//! features); pipelines additionally fold in pipeline options and the
//! render pass variant, composed into one integer so the caches need no
//! structured keys.

use quill_encoding::{DrawType, ShaderFeatures};

use crate::ColorLoadAction;

/// The discipline that orders per-pixel PLS access.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InterlockMode {
    /// Raster-order attachment access: color, coverage, clip and scratch
    /// are in-place read-modify-write, ordered by the hardware.
    RasterOrdering,
    /// Coverage lives in a storage image mutated by atomics; color is
    /// resolved at the end of the pass.
    Atomics,
    /// Reserved; currently a no-op.
    DepthStencil,
}

impl InterlockMode {
    pub fn index(self) -> u32 {
        match self {
            Self::RasterOrdering => 0,
            Self::Atomics => 1,
            Self::DepthStencil => 2,
        }
    }
}

/// Pixel format of the render target.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Rgba8,
    Bgra8,
}

/// Render passes are keyed on (target format, color load op): six
/// variants.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RenderPassVariant(u32);

impl RenderPassVariant {
    pub const COUNT: u32 = 6;

    pub fn new(format: TargetFormat, load_action: ColorLoadAction) -> Self {
        let load_idx = load_action as u32;
        debug_assert!(load_idx < 3);
        let format_bit = match format {
            TargetFormat::Rgba8 => 0,
            TargetFormat::Bgra8 => 1,
        };
        let idx = (load_idx << 1) | format_bit;
        debug_assert!(idx < Self::COUNT);
        Self(idx)
    }

    pub fn index(self) -> u32 {
        self.0
    }

    pub fn format(self) -> TargetFormat {
        if self.0 & 1 == 0 {
            TargetFormat::Rgba8
        } else {
            TargetFormat::Bgra8
        }
    }

    pub fn load_action(self) -> ColorLoadAction {
        match self.0 >> 1 {
            0 => ColorLoadAction::PreserveRenderTarget,
            1 => ColorLoadAction::Clear,
            _ => ColorLoadAction::DontCare,
        }
    }
}

/// Pipeline options that don't affect the shader.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DrawPipelineOptions(pub u32);

impl DrawPipelineOptions {
    pub const NONE: Self = Self(0);
    pub const WIREFRAME: Self = Self(1 << 0);
    pub const BIT_COUNT: u32 = 1;

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Flags for shader behaviors that aren't feature permutations.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderMiscFlags(pub u32);

impl ShaderMiscFlags {
    pub const NONE: Self = Self(0);
    /// The atomic resolve also transfers into the destination target.
    pub const COALESCED_RESOLVE_AND_TRANSFER: Self = Self(1 << 0);
    pub const BIT_COUNT: u32 = 1;
}

/// Key for a vertex/fragment shader module pair.
pub fn shader_unique_key(
    draw_type: DrawType,
    features: ShaderFeatures,
    interlock_mode: InterlockMode,
    misc_flags: ShaderMiscFlags,
) -> u32 {
    let mut key = draw_type.index();
    key = (key << ShaderFeatures::BIT_COUNT) | features.0;
    key = (key << 2) | interlock_mode.index();
    (key << ShaderMiscFlags::BIT_COUNT) | misc_flags.0
}

/// Composite pipeline cache key:
/// `((shader_key << option_bits) | options) * variant_count + variant`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey(pub u64);

pub fn pipeline_key(
    shader_key: u32,
    options: DrawPipelineOptions,
    variant: RenderPassVariant,
) -> PipelineKey {
    let key = ((shader_key as u64) << DrawPipelineOptions::BIT_COUNT) | options.0 as u64;
    PipelineKey(key * RenderPassVariant::COUNT as u64 + variant.index() as u64)
}

// ---------------------------------------------------------------------------
// WGSL sources and preprocessing.

pub const COLOR_RAMP_WGSL: &str = include_str!("../shader/color_ramp.wgsl");
pub const TESSELLATE_WGSL: &str = include_str!("../shader/tessellate.wgsl");
pub const DRAW_PATH_WGSL: &str = include_str!("../shader/draw_path.wgsl");
pub const DRAW_INTERIOR_TRIANGLES_WGSL: &str =
    include_str!("../shader/draw_interior_triangles.wgsl");
pub const DRAW_IMAGE_RECT_WGSL: &str = include_str!("../shader/draw_image_rect.wgsl");
pub const DRAW_IMAGE_MESH_WGSL: &str = include_str!("../shader/draw_image_mesh.wgsl");
pub const ATOMIC_RESOLVE_WGSL: &str = include_str!("../shader/atomic_resolve.wgsl");
pub const BLIT_MIP_WGSL: &str = include_str!("../shader/blit_mip.wgsl");

/// The raw WGSL for a draw type. Image rects are only reachable under
/// atomics interlock.
pub fn draw_shader_source(draw_type: DrawType) -> &'static str {
    match draw_type {
        DrawType::MidpointFanPatches | DrawType::OuterCurvePatches => DRAW_PATH_WGSL,
        DrawType::InteriorTriangulation => DRAW_INTERIOR_TRIANGLES_WGSL,
        DrawType::ImageRect => DRAW_IMAGE_RECT_WGSL,
        DrawType::ImageMesh => DRAW_IMAGE_MESH_WGSL,
        DrawType::AtomicResolve => ATOMIC_RESOLVE_WGSL,
    }
}

/// The preprocessor defines for one shader permutation.
pub fn shader_defines(
    features: ShaderFeatures,
    interlock_mode: InterlockMode,
) -> Vec<&'static str> {
    let mut defines: Vec<&'static str> = features.define_names().collect();
    match interlock_mode {
        InterlockMode::RasterOrdering => defines.push("USING_RASTER_ORDER_PLS"),
        InterlockMode::Atomics => defines.push("USING_ATOMIC_COVERAGE"),
        InterlockMode::DepthStencil => {}
    }
    defines
}

/// Minimal `#ifdef`-style preprocessor for the embedded WGSL. Supports
/// `#ifdef NAME`, `#ifndef NAME`, `#else` and `#endif`, nested.
pub fn preprocess(source: &str, defines: &[&str]) -> String {
    let mut output = String::with_capacity(source.len());
    // Each frame is (parent_active, this_branch_taken).
    let mut stack: Vec<(bool, bool)> = Vec::new();
    let mut active = true;
    for line in source.lines() {
        let trimmed = line.trim_start();
        if let Some(name) = trimmed.strip_prefix("#ifdef ") {
            let taken = active && defines.contains(&name.trim());
            stack.push((active, taken));
            active = taken;
        } else if let Some(name) = trimmed.strip_prefix("#ifndef ") {
            let taken = active && !defines.contains(&name.trim());
            stack.push((active, taken));
            active = taken;
        } else if trimmed.starts_with("#else") {
            let (parent, taken) = *stack.last().expect("#else without #ifdef");
            active = parent && !taken;
        } else if trimmed.starts_with("#endif") {
            let (parent, _) = stack.pop().expect("#endif without #ifdef");
            active = parent;
        } else if active {
            output.push_str(line);
            output.push('\n');
        }
    }
    debug_assert!(stack.is_empty(), "unbalanced #ifdef");
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn pipeline_keys_are_unique_across_the_space() {
        let mut seen = HashSet::new();
        for draw_type in [
            DrawType::MidpointFanPatches,
            DrawType::OuterCurvePatches,
            DrawType::InteriorTriangulation,
            DrawType::ImageRect,
            DrawType::ImageMesh,
            DrawType::AtomicResolve,
        ] {
            for features in 0..=ShaderFeatures::ALL.0 {
                for interlock in [InterlockMode::RasterOrdering, InterlockMode::Atomics] {
                    for options in [DrawPipelineOptions::NONE, DrawPipelineOptions::WIREFRAME] {
                        for load in [
                            ColorLoadAction::PreserveRenderTarget,
                            ColorLoadAction::Clear,
                            ColorLoadAction::DontCare,
                        ] {
                            for format in [TargetFormat::Rgba8, TargetFormat::Bgra8] {
                                let shader_key = shader_unique_key(
                                    draw_type,
                                    ShaderFeatures(features),
                                    interlock,
                                    ShaderMiscFlags::NONE,
                                );
                                let key = pipeline_key(
                                    shader_key,
                                    options,
                                    RenderPassVariant::new(format, load),
                                );
                                assert!(seen.insert(key), "duplicate key {key:?}");
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn render_pass_variant_roundtrips() {
        for load in [
            ColorLoadAction::PreserveRenderTarget,
            ColorLoadAction::Clear,
            ColorLoadAction::DontCare,
        ] {
            for format in [TargetFormat::Rgba8, TargetFormat::Bgra8] {
                let variant = RenderPassVariant::new(format, load);
                assert_eq!(variant.format(), format);
                assert_eq!(variant.load_action(), load);
            }
        }
    }

    #[test]
    fn preprocess_selects_branches() {
        let source = "\
a
#ifdef FOO
foo
#else
not-foo
#ifdef BAR
nested
#endif
#endif
z
";
        let with_foo = preprocess(source, &["FOO"]);
        assert!(with_foo.contains("foo"));
        assert!(!with_foo.contains("not-foo"));
        assert!(!with_foo.contains("nested"));

        let with_bar = preprocess(source, &["BAR"]);
        assert!(with_bar.contains("not-foo"));
        assert!(with_bar.contains("nested"));
        assert!(with_bar.contains('a'));
        assert!(with_bar.contains('z'));
    }

    #[test]
    fn defines_track_interlock_mode() {
        let defines = shader_defines(
            ShaderFeatures::ENABLE_CLIPPING | ShaderFeatures::ENABLE_ADVANCED_BLEND,
            InterlockMode::Atomics,
        );
        assert!(defines.contains(&"ENABLE_CLIPPING"));
        assert!(defines.contains(&"ENABLE_ADVANCED_BLEND"));
        assert!(defines.contains(&"USING_ATOMIC_COVERAGE"));
        assert!(!defines.contains(&"USING_RASTER_ORDER_PLS"));
    }
}
