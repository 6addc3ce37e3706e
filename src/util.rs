// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Simple helpers for wgpu setup.

use crate::Error;

/// Features worth requesting when the adapter has them. `CLEAR_TEXTURE`
/// gives the atomic coverage plane a fast clear (the engine falls back to
/// a queue fill without it); wireframe pipelines need
/// `POLYGON_MODE_LINE`. Both are detected at engine creation.
pub fn required_features() -> wgpu::Features {
    wgpu::Features::CLEAR_TEXTURE
}

/// Requests an adapter and device suitable for the engine.
pub async fn create_device(
    instance: &wgpu::Instance,
    compatible_surface: Option<&wgpu::Surface<'_>>,
) -> crate::Result<(wgpu::Device, wgpu::Queue)> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface,
        })
        .await
        .ok_or(Error::NoCompatibleDevice)?;
    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("quill device"),
                required_features: required_features() & adapter.features()
                    | (wgpu::Features::POLYGON_MODE_LINE & adapter.features()),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        )
        .await?;
    Ok((device, queue))
}
