// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The interlock-mode facade.
//!
//! Two disciplines order per-pixel access to the PLS planes: raster-order
//! attachment access, where the hardware guarantees primitive order, and
//! atomics, where coverage lives in a storage image and ordering points
//! are explicit barriers followed by a resolve. Each is an implementation
//! of [`PlsImpl`] behind the same hook points; the flush engine never
//! branches on the mode directly.

use crate::recording::{Command, DrawStep, MainPass, Recording};
use crate::shaders::{
    pipeline_key, shader_unique_key, DrawPipelineOptions, RenderPassVariant, ShaderMiscFlags,
};
use crate::{ColorLoadAction, FlushDescriptor};
use quill_encoding::DrawType;

pub trait PlsImpl {
    /// Whether this implementation relies on hardware raster ordering.
    fn supports_raster_ordering(&self) -> bool;

    /// Records whatever setup the PLS planes need before the main render
    /// pass begins.
    fn activate_pixel_local_storage(&self, desc: &FlushDescriptor, recording: &mut Recording);

    /// Records teardown after the draw list, inside the main pass.
    fn deactivate_pixel_local_storage(&self, desc: &FlushDescriptor, pass: &mut MainPass);

    /// Records an ordering point between two draws that read each other's
    /// output.
    fn on_barrier(&self, steps: &mut Vec<DrawStep>);

    /// Extra shader flags for the resolve pipeline.
    fn atomic_resolve_misc_flags(&self, desc: &FlushDescriptor) -> ShaderMiscFlags;

    /// Records the resolve at the end of the draw list.
    fn setup_atomic_resolve(&self, desc: &FlushDescriptor, pass: &mut MainPass);

    /// Defines this implementation adds to every draw shader.
    fn push_shader_defines(&self, defines: &mut Vec<&'static str>);
}

pub fn pls_impl_for(mode: crate::InterlockMode) -> &'static dyn PlsImpl {
    match mode {
        crate::InterlockMode::RasterOrdering => &RASTER_ORDERING_IMPL,
        // DepthStencil flushes return before consulting the facade.
        crate::InterlockMode::Atomics | crate::InterlockMode::DepthStencil => &ATOMICS_IMPL,
    }
}

struct PlsImplRasterOrdering;
static RASTER_ORDERING_IMPL: PlsImplRasterOrdering = PlsImplRasterOrdering;

impl PlsImpl for PlsImplRasterOrdering {
    fn supports_raster_ordering(&self) -> bool {
        true
    }

    fn activate_pixel_local_storage(&self, _desc: &FlushDescriptor, _recording: &mut Recording) {
        // Plane allocation is handled by the render-target sync; ordering
        // is implicit in the raster-order subpass flag.
    }

    fn deactivate_pixel_local_storage(&self, _desc: &FlushDescriptor, _pass: &mut MainPass) {}

    fn on_barrier(&self, _steps: &mut Vec<DrawStep>) {
        // Primitive order already serializes per-pixel access.
    }

    fn atomic_resolve_misc_flags(&self, _desc: &FlushDescriptor) -> ShaderMiscFlags {
        ShaderMiscFlags::NONE
    }

    fn setup_atomic_resolve(&self, _desc: &FlushDescriptor, _pass: &mut MainPass) {}

    fn push_shader_defines(&self, defines: &mut Vec<&'static str>) {
        defines.push("USING_RASTER_ORDER_PLS");
    }
}

struct PlsImplAtomics;
static ATOMICS_IMPL: PlsImplAtomics = PlsImplAtomics;

impl PlsImpl for PlsImplAtomics {
    fn supports_raster_ordering(&self) -> bool {
        false
    }

    fn activate_pixel_local_storage(&self, desc: &FlushDescriptor, recording: &mut Recording) {
        // The coverage image is not an attachment; clear it outside the
        // render pass.
        recording.push(Command::ClearAtomicCoverage {
            value: desc.coverage_clear_value,
        });
    }

    fn deactivate_pixel_local_storage(&self, _desc: &FlushDescriptor, _pass: &mut MainPass) {}

    fn on_barrier(&self, steps: &mut Vec<DrawStep>) {
        steps.push(DrawStep::Barrier);
    }

    fn atomic_resolve_misc_flags(&self, _desc: &FlushDescriptor) -> ShaderMiscFlags {
        ShaderMiscFlags::NONE
    }

    fn setup_atomic_resolve(&self, desc: &FlushDescriptor, pass: &mut MainPass) {
        let shader_key = shader_unique_key(
            DrawType::AtomicResolve,
            desc.combined_shader_features,
            crate::InterlockMode::Atomics,
            self.atomic_resolve_misc_flags(desc),
        );
        let variant = RenderPassVariant::new(desc.target_format, desc.color_load_action);
        pass.steps.push(DrawStep::BindPipeline {
            key: pipeline_key(shader_key, DrawPipelineOptions::NONE, variant),
            draw_type: DrawType::AtomicResolve,
            features: desc.combined_shader_features,
        });
        pass.steps.push(DrawStep::DrawResolve);
    }

    fn push_shader_defines(&self, defines: &mut Vec<&'static str>) {
        defines.push("USING_ATOMIC_COVERAGE");
    }
}

/// Whether the attachment clear must be followed by an explicit barrier
/// before the first draw samples it. The hardware-blend relaxation the
/// original hints at stays disabled; the barrier is unconditional under
/// `Clear`.
pub fn needs_post_clear_barrier(desc: &FlushDescriptor) -> bool {
    desc.interlock_mode == crate::InterlockMode::Atomics
        && desc.color_load_action == ColorLoadAction::Clear
}
