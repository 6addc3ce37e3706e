// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Quill is a GPU vector graphics engine built on pixel local storage:
//! per-pixel, on-tile state shared by every draw that touches the pixel
//! within one render pass. Path fills, strokes, clips and images composite
//! in a single pass over the render target.
//!
//! A frame runs in three stages: the client enqueues draws (counting and
//! tessellation planning happen immediately, in `quill_encoding`); the
//! accumulated draw list is pushed into ring-buffered staging memory; and
//! `flush` executes the gradient, tessellation and main PLS passes against
//! the wgpu device.
//!
//! ```ignore
//! let mut context = quill::RenderContext::new(device, queue);
//! context.begin_frame(quill::FrameDescriptor {
//!     render_target: target.clone(),
//!     interlock_mode: quill::InterlockMode::RasterOrdering,
//!     load_action: quill::ColorLoadAction::Clear,
//!     clear_color: [0.0; 4],
//!     ..Default::default()
//! });
//! context.enqueue_draw(quill::Draw::new_path(path, transform, &paint, 0, None));
//! let fence = context.flush();
//! fence.wait();
//! ```

#![warn(clippy::print_stdout, clippy::print_stderr)]

mod image;
mod pls;
mod recording;
mod render;
mod ring;
mod shaders;
pub mod util;
mod wgpu_engine;

use std::sync::Arc;

use thiserror::Error;

/// Styling and composition primitives.
pub use peniko;
/// 2D geometry, with a focus on curves.
pub use peniko::kurbo;

pub use quill_encoding as encoding;
pub use quill_encoding::{
    Draw, DrawList, Gradient, GradientCache, IntBounds, Paint, PaintSource, ResourceCounters,
    Transform,
};

pub use image::{decode_image_texture, ImageTextureWgpu};
pub use pls::PlsImpl;
pub use recording::{Command, DrawStep, MainPass, Recording};
pub use render::record_flush;
pub use ring::{CompletionFence, RenderBuffer, RenderBufferFlags, RenderBufferMap,
    RenderBufferType};
pub use shaders::{InterlockMode, RenderPassVariant, TargetFormat};
pub use wgpu_engine::{RenderTarget, WgpuEngine};

use quill_encoding::gpu::FlushUniforms;
use quill_encoding::FrameStaging;

/// Errors that can occur in quill.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// There is no available device with the features quill requires.
    #[error("couldn't find a suitable GPU device")]
    NoCompatibleDevice,
    /// Failed to create the wgpu device.
    #[error("couldn't create wgpu device")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    /// The render target texture's format can't back a PLS color plane.
    #[error("unsupported render target format {0:?}")]
    UnsupportedTargetFormat(wgpu::TextureFormat),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

/// What to do with the target's existing contents at the start of the main
/// pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ColorLoadAction {
    PreserveRenderTarget = 0,
    Clear = 1,
    DontCare = 2,
}

/// Per-frame parameters, fixed at `begin_frame`.
#[derive(Clone)]
pub struct FrameDescriptor {
    pub render_target: Arc<RenderTarget>,
    pub interlock_mode: InterlockMode,
    pub load_action: ColorLoadAction,
    pub clear_color: [f64; 4],
    pub coverage_clear_value: u32,
    pub wireframe: bool,
}

/// Everything one flush of the render loop needs, handed from the draw
/// accumulator to the flush engine and the backend.
pub struct FlushDescriptor {
    pub render_target_width: u32,
    pub render_target_height: u32,
    pub target_format: TargetFormat,
    pub interlock_mode: InterlockMode,
    pub color_load_action: ColorLoadAction,
    pub clear_color: [f64; 4],
    pub coverage_clear_value: u32,
    pub render_target_update_bounds: IntBounds,

    pub first_path: u32,
    pub first_contour: u32,
    pub first_paint: u32,
    pub first_paint_aux: u32,
    pub first_tess_vertex_span: u32,
    pub tess_vertex_span_count: u32,
    pub tess_data_height: u32,
    pub first_complex_grad_span: u32,
    pub complex_grad_span_count: u32,
    pub complex_grad_rows_top: u32,
    pub complex_grad_rows_height: u32,
    pub simple_grad_data_offset_in_bytes: u64,
    pub simple_grad_texels_width: u32,
    pub simple_grad_texels_height: u32,
    pub flush_uniform_data_offset_in_bytes: u64,

    pub combined_shader_features: quill_encoding::ShaderFeatures,
    pub wireframe: bool,
    pub is_final_flush_of_frame: bool,
    pub frame_completion_fence: Option<Arc<CompletionFence>>,
}

/// The engine frontend: accumulates a frame's draw list, reduces it to GPU
/// resources, and runs the flush state machine.
pub struct RenderContext {
    engine: WgpuEngine,
    draws: DrawList,
    staging: FrameStaging,
    gradients: GradientCache,
    totals: ResourceCounters,
    frame: Option<FrameDescriptor>,
    pending_fence: Option<Arc<CompletionFence>>,
}

impl RenderContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            engine: WgpuEngine::new(device, queue),
            draws: DrawList::new(),
            staging: FrameStaging::new(),
            gradients: GradientCache::new(),
            totals: ResourceCounters::default(),
            frame: None,
            pending_fence: None,
        }
    }

    pub fn engine(&self) -> &WgpuEngine {
        &self.engine
    }

    /// Creates a mappable index or vertex buffer whose `map()` advances a
    /// per-buffer ring.
    pub fn make_render_buffer(
        &self,
        buffer_type: RenderBufferType,
        flags: RenderBufferFlags,
        size_in_bytes: usize,
    ) -> Arc<RenderBuffer> {
        Arc::new(RenderBuffer::new(
            self.engine.device().clone(),
            self.engine.queue().clone(),
            buffer_type,
            flags,
            size_in_bytes,
        ))
    }

    /// Decodes encoded image bytes into a shareable texture, or `None` on
    /// decode failure.
    pub fn decode_image_texture(&self, encoded_bytes: &[u8]) -> Option<Arc<ImageTextureWgpu>> {
        image::decode_image_texture(self.engine.device(), encoded_bytes)
    }

    /// Starts a frame: advances the buffer ring (waiting on the incoming
    /// slot's completion fence if it hasn't signaled) and records the
    /// frame parameters.
    pub fn begin_frame(&mut self, descriptor: FrameDescriptor) {
        assert!(self.frame.is_none(), "already inside a frame");
        self.engine.prepare_to_map_buffers();
        self.frame = Some(descriptor);
    }

    /// Appends a draw to the current frame's list. If the draw's gradient
    /// doesn't fit in the gradient texture, everything queued so far is
    /// flushed first and the allocation retried against the reset texture.
    pub fn enqueue_draw(&mut self, mut draw: Draw) {
        assert!(self.frame.is_some(), "begin_frame first");
        let mut scratch = ResourceCounters::default();
        if !draw.allocate_gradient_if_needed(&mut self.gradients, &mut scratch) {
            self.flush_internal(false);
            if !draw.allocate_gradient_if_needed(&mut self.gradients, &mut scratch) {
                // A single gradient bigger than the whole texture; nothing
                // a retry can fix.
                log::warn!("dropping draw with an oversized gradient");
                draw.release_refs();
                return;
            }
        }
        self.totals += *draw.resource_counts();
        self.draws.push(draw);
    }

    /// Runs the final flush of the frame. The returned fence signals when
    /// the frame's GPU work completes.
    pub fn flush(&mut self) -> Arc<CompletionFence> {
        assert!(self.frame.is_some(), "begin_frame first");
        let fence = Arc::new(CompletionFence::new(self.engine.device().clone()));
        self.pending_fence = Some(fence.clone());
        self.flush_internal(true);
        self.frame = None;
        fence
    }

    fn flush_internal(&mut self, is_final: bool) {
        let frame = self.frame.as_ref().expect("no active frame").clone();
        let target = frame.render_target.clone();

        self.staging
            .begin_flush(self.totals, self.gradients.layout());
        self.staging.simple_ramps = self.gradients.simple_ramps().to_vec();
        self.gradients.write_grad_spans(&mut self.staging.grad_spans);
        for draw in self.draws.iter_mut() {
            draw.push_to_context(&mut self.staging);
        }
        self.staging.finish();

        let (simple_w, simple_h) = self.gradients.simple_grad_texels_extent();
        let desc = FlushDescriptor {
            render_target_width: target.width(),
            render_target_height: target.height(),
            target_format: target.format(),
            interlock_mode: frame.interlock_mode,
            color_load_action: frame.load_action,
            clear_color: frame.clear_color,
            coverage_clear_value: frame.coverage_clear_value,
            render_target_update_bounds: IntBounds::new(
                0,
                0,
                target.width() as i32,
                target.height() as i32,
            ),
            first_path: 0,
            first_contour: 0,
            first_paint: 0,
            first_paint_aux: 0,
            first_tess_vertex_span: 0,
            tess_vertex_span_count: self.staging.tess_span_count(),
            tess_data_height: self.staging.tess_data_height().max(1),
            first_complex_grad_span: 0,
            complex_grad_span_count: self.staging.grad_spans.len() as u32,
            complex_grad_rows_top: self.gradients.simple_ramp_rows(),
            complex_grad_rows_height: self.gradients.complex_rows_height(),
            simple_grad_data_offset_in_bytes: 0,
            simple_grad_texels_width: simple_w,
            simple_grad_texels_height: simple_h,
            flush_uniform_data_offset_in_bytes: 0,
            combined_shader_features: self.staging.combined_shader_features(),
            wireframe: frame.wireframe,
            is_final_flush_of_frame: is_final,
            frame_completion_fence: if is_final { self.pending_fence.take() } else { None },
        };

        let uniforms = FlushUniforms {
            inverse_viewports: FlushUniforms::inverse_viewports(
                desc.complex_grad_rows_height.max(1),
                desc.tess_data_height,
                desc.render_target_width,
                desc.render_target_height,
                false,
            ),
            render_target_width: desc.render_target_width,
            render_target_height: desc.render_target_height,
            coverage_clear_value: desc.coverage_clear_value,
            grad_texture_inverse_height: self.gradients.layout().inverse_height,
            path_id_granularity: 1,
            _pad: [0; 3],
        };
        self.engine
            .upload_flush_uniforms(desc.flush_uniform_data_offset_in_bytes, &uniforms);
        self.engine.upload_staging(&self.staging);

        let recording = record_flush(&desc, self.staging.batches());
        self.engine.execute(&recording, &desc, &target, None);

        // Arena reset releases every draw's shared references exactly
        // once, then the staging and gradient rows start over for the next
        // (partial) flush.
        self.draws.reset();
        self.staging.reset();
        self.gradients.reset();
        self.totals = ResourceCounters::default();
        if let Some(frame) = &mut self.frame {
            // Later flushes of the same frame compose over what this one
            // rendered.
            frame.load_action = ColorLoadAction::PreserveRenderTarget;
        }
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        self.engine.wait_for_idle();
    }
}
