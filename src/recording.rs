// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A flush is first recorded as an ordered list of [`Command`]s, then
//! lowered onto wgpu by the engine. Keeping the recording explicit makes
//! the flush state machine a pure function of its inputs: barrier
//! placement, pass ordering and bind decisions can all be asserted without
//! a GPU device.

use std::sync::Arc;

use quill_encoding::{DrawType, ImageTexture, MeshBuffer, ShaderFeatures};

use crate::shaders::{InterlockMode, PipelineKey, RenderPassVariant};
use crate::ColorLoadAction;

/// List of [`Command`]s for the engine to execute in order.
#[derive(Default)]
pub struct Recording {
    pub commands: Vec<Command>,
}

impl Recording {
    /// Appends a [`Command`] to the back of the [`Recording`].
    pub fn push(&mut self, cmd: Command) {
        self.commands.push(cmd);
    }

    /// The main PLS pass of this recording, if one was recorded.
    pub fn main_pass(&self) -> Option<&MainPass> {
        self.commands.iter().find_map(|cmd| match cmd {
            Command::MainPass(pass) => Some(pass),
            _ => None,
        })
    }
}

/// Single command inside a [`Recording`].
pub enum Command {
    /// Runs a pending image texture upload: staging copy, mip chain
    /// generation, and the final transition to shader reads.
    SyncImageTexture(Arc<dyn ImageTexture>),
    /// Clears the atomic coverage plane outside the main render pass.
    ClearAtomicCoverage { value: u32 },
    /// Renders the complex gradient spans into their rows of the gradient
    /// texture.
    GradientPass {
        rows_top: u32,
        rows_height: u32,
        first_span: u32,
        span_count: u32,
    },
    /// Copies the packed simple two-texel ramps into the bottom gradient
    /// texture rows.
    CopySimpleRamps {
        buffer_offset_in_bytes: u64,
        width: u32,
        height: u32,
    },
    /// Renders the tessellation spans into the tessellation texture.
    TessellationPass {
        data_height: u32,
        first_span: u32,
        span_count: u32,
    },
    /// Ensures the render target's auxiliary planes exist for the current
    /// interlock mode and size.
    SyncRenderTarget { interlock_mode: InterlockMode },
    /// The main PLS draw pass.
    MainPass(MainPass),
}

/// The main draw pass over the render target's PLS planes.
pub struct MainPass {
    pub variant: RenderPassVariant,
    pub interlock_mode: InterlockMode,
    pub load_action: ColorLoadAction,
    pub clear_color: [f64; 4],
    /// Render area, in pixels.
    pub extent: [u32; 2],
    pub steps: Vec<DrawStep>,
}

/// One step inside the main pass.
pub enum DrawStep {
    /// Looks up (or builds) the pipeline for this composite key and binds
    /// it.
    BindPipeline {
        key: PipelineKey,
        draw_type: DrawType,
        features: ShaderFeatures,
    },
    /// Binds an image texture's per-frame bind group with this batch's
    /// dynamic image-draw uniform offset.
    BindImageTexture {
        image: Arc<dyn ImageTexture>,
        dynamic_offset: u32,
    },
    /// Color-attachment-write to input-attachment-read ordering point.
    /// Only recorded under atomics interlock.
    Barrier,
    /// Indexed-instanced draw of midpoint fan or outer curve patches from
    /// the shared patch buffers.
    DrawPatches {
        draw_type: DrawType,
        base_element: u32,
        element_count: u32,
    },
    /// Non-indexed draw of interior triangulation vertices.
    DrawTriangles { base_vertex: u32, vertex_count: u32 },
    /// Indexed draw of the image rect geometry.
    DrawImageRect,
    /// Indexed draw of a client mesh: vertex and uv buffers at slots 0 and
    /// 1, front ring slots of each.
    DrawImageMesh {
        vertex_buffer: Arc<dyn MeshBuffer>,
        uv_buffer: Arc<dyn MeshBuffer>,
        index_buffer: Arc<dyn MeshBuffer>,
        element_count: u32,
    },
    /// The atomic resolve: a 4-vertex strip converting atomic coverage
    /// into final color.
    DrawResolve,
}

impl DrawStep {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            Self::DrawPatches { .. }
                | Self::DrawTriangles { .. }
                | Self::DrawImageRect
                | Self::DrawImageMesh { .. }
                | Self::DrawResolve
        )
    }
}
