// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ref-counted image textures.
//!
//! A decoded image owns its staging pixels until the first flush that
//! references it, which uploads mip level 0, builds the mip chain with
//! half-size blits and leaves the texture in shader-read state. The
//! per-frame bind group lives here too, so a texture referenced by many
//! draws in one frame binds through a single allocation.

use std::any::Any;
use std::sync::{Arc, Mutex};

use quill_encoding::ImageTexture;

pub(crate) struct FrameBindGroup {
    pub frame_idx: u64,
    pub bind_group: wgpu::BindGroup,
}

/// wgpu-backed image texture.
pub struct ImageTextureWgpu {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    mip_level_count: u32,
    /// RGBA8 staging pixels, consumed by the first upload.
    pending_upload: Mutex<Option<Vec<u8>>>,
    /// Bind group for the current frame; rebuilt whenever the frame index
    /// moves on.
    pub(crate) frame_bind_group: Mutex<Option<FrameBindGroup>>,
}

impl ImageTextureWgpu {
    pub(crate) fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        mip_level_count: u32,
        pixels: Vec<u8>,
    ) -> Self {
        debug_assert_eq!(pixels.len(), (width * height * 4) as usize);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("quill image"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
            mip_level_count,
            pending_upload: Mutex::new(Some(pixels)),
            frame_bind_group: Mutex::new(None),
        }
    }

    pub(crate) fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    pub fn has_pending_upload(&self) -> bool {
        self.pending_upload.lock().unwrap().is_some()
    }

    /// Takes the staging pixels, releasing them after the first upload.
    pub(crate) fn take_pending_upload(&self) -> Option<Vec<u8>> {
        self.pending_upload.lock().unwrap().take()
    }

    pub(crate) fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// A view of a single mip level, for the mip chain blits.
    pub(crate) fn mip_view(&self, level: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("quill image mip"),
            base_mip_level: level,
            mip_level_count: Some(1),
            ..Default::default()
        })
    }
}

impl ImageTexture for ImageTextureWgpu {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Decodes an encoded image into an [`ImageTextureWgpu`], or `None` when
/// the bytes don't decode; clients substitute a placeholder.
pub fn decode_image_texture(
    device: &wgpu::Device,
    encoded_bytes: &[u8],
) -> Option<Arc<ImageTextureWgpu>> {
    let decoded = match image::load_from_memory(encoded_bytes) {
        Ok(decoded) => decoded,
        Err(err) => {
            log::warn!("image decode failed: {err}");
            return None;
        }
    };
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    let mip_level_count = 32 - (width | height).leading_zeros();
    Some(Arc::new(ImageTextureWgpu::new(
        device,
        width,
        height,
        mip_level_count,
        rgba.into_raw(),
    )))
}

/// Downcasts an image texture reference back to the wgpu implementation.
pub(crate) fn as_wgpu_image(image: &Arc<dyn ImageTexture>) -> &ImageTextureWgpu {
    image
        .as_any()
        .downcast_ref::<ImageTextureWgpu>()
        .expect("image texture from another backend")
}
