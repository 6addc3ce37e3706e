// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Draw-list reduction and path tessellation planning for quill.
//!
//! This crate is the CPU half of the renderer: it turns a client's
//! high-level draw list into resource counts, staging buffer contents and
//! draw batches, with no GPU dependency. The `quill` crate executes the
//! result.

#![warn(unused_crate_dependencies)]
#![warn(clippy::print_stdout, clippy::print_stderr)]

mod draw;
mod frame;
pub mod gpu;
mod gradient;
mod interior;
pub mod math;
mod midpoint_fan;
mod paint;
pub mod wang;

pub use draw::{
    Draw, DrawCommon, DrawKind, DrawList, ImageMeshDraw, ImageRectDraw, ImageTexture, MeshBuffer,
    Paint, PaintSource, PathDrawData, ResourceCounters,
};
pub use frame::{DrawBatch, FrameStaging};
pub use gpu::{DrawType, ShaderFeatures};
pub use gradient::{GradTextureLayout, Gradient, GradientCache, GradientKind,
    MAX_GRAD_TEXTURE_HEIGHT};
pub use interior::{InnerFanTriangulator, InteriorTriangulationPath, TriangulatorAxis};
pub use math::{ClipRectInverseMatrix, IntBounds, Transform};
pub use midpoint_fan::{ContourInfo, MidpointFanPath};
pub use paint::{ColorRampLocation, PaintType, SimplePaintValue};

/// Styling and composition primitives.
pub use peniko;
/// 2D geometry, with a focus on curves.
pub use peniko::kurbo;
