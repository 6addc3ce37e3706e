// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Executes flush recordings on wgpu.
//!
//! The engine owns everything with GPU lifetime: the buffer rings, the
//! patch and index geometry, the gradient and tessellation textures, the
//! pipeline and shader caches, and the bind group pools. A [`Recording`]
//! produced by the flush engine is lowered command by command; the only
//! semantic translation is [`DrawStep::Barrier`], which wgpu cannot
//! express inside a render pass and therefore becomes a pass split with a
//! preserving load.

use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use quill_encoding::gpu::{
    self, GradientSpan, PatchVertex, TessVertexSpan, TriangleVertex, BUFFER_RING_SIZE,
    GRAD_TEXTURE_WIDTH, IMAGE_DRAW_UNIFORMS_STRIDE, IMAGE_RECT_INDICES, IMAGE_RECT_VERTICES,
    TESS_SPAN_INDICES, TESS_TEXTURE_WIDTH,
};
use quill_encoding::{DrawType, FrameStaging, ShaderFeatures};

use crate::image::{as_wgpu_image, FrameBindGroup, ImageTextureWgpu};
use crate::recording::{Command, DrawStep, MainPass, Recording};
use crate::ring::{as_render_buffer, BufferRing, ResourcePurgatory};
use crate::shaders::{
    self, shader_unique_key, InterlockMode, PipelineKey, ShaderMiscFlags, TargetFormat,
};
use crate::{ColorLoadAction, FlushDescriptor};

mod bind_group_pool_limits {
    pub const MAX_IMAGE_TEXTURE_UPDATES: u32 = 256;
    pub const MAX_POOLS_IN_POOL: usize = 64;
}

/// Frame-scoped container of bind groups. Returned to a bounded free list
/// at the end of the flush and not reused until the frame completion
/// fence for its frame has signaled.
#[derive(Default)]
pub(crate) struct BindGroupPool {
    bind_groups: Vec<wgpu::BindGroup>,
    image_texture_updates: u32,
}

impl BindGroupPool {
    fn reset(&mut self) {
        self.bind_groups.clear();
        self.image_texture_updates = 0;
    }

    fn adopt(&mut self, bind_group: wgpu::BindGroup) -> wgpu::BindGroup {
        self.bind_groups.push(bind_group.clone());
        bind_group
    }
}

struct RetiredPool {
    expiration_frame_idx: u64,
    pool: BindGroupPool,
}

/// The auxiliary PLS planes belonging to one render target.
#[derive(Default)]
struct TargetPlanes {
    coverage: Option<wgpu::TextureView>,
    clip: Option<wgpu::TextureView>,
    scratch_color: Option<wgpu::TextureView>,
    atomic_coverage: Option<(wgpu::Texture, wgpu::TextureView)>,
}

/// A drawable destination plus its lazily created auxiliary planes.
pub struct RenderTarget {
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: TargetFormat,
    planes: Mutex<TargetPlanes>,
}

impl RenderTarget {
    pub fn new(view: wgpu::TextureView, width: u32, height: u32, format: TargetFormat) -> Self {
        Self {
            view,
            width,
            height,
            format,
            planes: Mutex::new(TargetPlanes::default()),
        }
    }

    pub fn from_texture(texture: &wgpu::Texture) -> Self {
        let format = match texture.format() {
            wgpu::TextureFormat::Bgra8Unorm => TargetFormat::Bgra8,
            _ => TargetFormat::Rgba8,
        };
        Self::new(
            texture.create_view(&wgpu::TextureViewDescriptor::default()),
            texture.width(),
            texture.height(),
            format,
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> TargetFormat {
        self.format
    }

    fn make_plane(
        &self,
        device: &wgpu::Device,
        label: &'static str,
        format: wgpu::TextureFormat,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    /// Ensures the planes this interlock mode draws through exist.
    fn synchronize(&self, device: &wgpu::Device, interlock_mode: InterlockMode) {
        let mut planes = self.planes.lock().unwrap();
        if interlock_mode == InterlockMode::RasterOrdering && planes.coverage.is_none() {
            planes.coverage = Some(
                self.make_plane(device, "quill coverage", wgpu::TextureFormat::R32Uint)
                    .1,
            );
        }
        if planes.clip.is_none() {
            planes.clip = Some(
                self.make_plane(device, "quill clip", wgpu::TextureFormat::R32Uint)
                    .1,
            );
        }
        if interlock_mode == InterlockMode::RasterOrdering && planes.scratch_color.is_none() {
            planes.scratch_color = Some(
                self.make_plane(device, "quill scratch color", wgpu::TextureFormat::R32Uint)
                    .1,
            );
        }
        if interlock_mode == InterlockMode::Atomics && planes.atomic_coverage.is_none() {
            planes.atomic_coverage = Some(self.make_plane(
                device,
                "quill atomic coverage",
                wgpu::TextureFormat::R32Uint,
            ));
        }
    }
}

struct FixedPipeline {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

struct Rings {
    flush_uniform: BufferRing,
    image_draw_uniform: BufferRing,
    path: BufferRing,
    paint: BufferRing,
    paint_aux: BufferRing,
    contour: BufferRing,
    simple_ramps: BufferRing,
    grad_span: BufferRing,
    tess_span: BufferRing,
    triangle: BufferRing,
}

pub struct WgpuEngine {
    device: wgpu::Device,
    queue: wgpu::Queue,

    rings: Rings,
    purgatory: ResourcePurgatory,
    current_frame_idx: u64,
    buffer_ring_idx: usize,
    frame_fences: [Option<wgpu::SubmissionIndex>; BUFFER_RING_SIZE],

    // Engine-lifetime geometry.
    patch_vertex_buffer: wgpu::Buffer,
    patch_index_buffer: wgpu::Buffer,
    tess_span_index_buffer: wgpu::Buffer,
    image_rect_vertex_buffer: wgpu::Buffer,
    image_rect_index_buffer: wgpu::Buffer,

    // Engine-lifetime bindings.
    per_flush_layout: wgpu::BindGroupLayout,
    per_draw_layout: wgpu::BindGroupLayout,
    sampler_layout: wgpu::BindGroupLayout,
    pls_layout: wgpu::BindGroupLayout,
    draw_pipeline_layout: wgpu::PipelineLayout,
    linear_sampler: wgpu::Sampler,
    mipmap_sampler: wgpu::Sampler,
    sampler_bind_group: wgpu::BindGroup,
    null_image: Arc<ImageTextureWgpu>,

    color_ramp: FixedPipeline,
    tessellate: FixedPipeline,
    mip_blit: FixedPipeline,

    // Flush-lifetime attachments, grown on demand.
    gradient_texture: Option<(wgpu::Texture, wgpu::TextureView, u32)>,
    tess_texture: Option<(wgpu::Texture, wgpu::TextureView, u32)>,

    // Caches.
    shader_modules: HashMap<u32, wgpu::ShaderModule>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    pool_free_list: VecDeque<RetiredPool>,

    supports_wireframe: bool,
    supports_clear_texture: bool,
}

impl WgpuEngine {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let supports_wireframe = device
            .features()
            .contains(wgpu::Features::POLYGON_MODE_LINE);
        let supports_clear_texture = device.features().contains(wgpu::Features::CLEAR_TEXTURE);

        let (patch_vertices, patch_indices) = gpu::generate_patch_buffer_data();
        let patch_vertex_buffer = create_init_buffer(
            &device,
            "quill patch vertices",
            bytemuck::cast_slice::<PatchVertex, u8>(&patch_vertices),
            wgpu::BufferUsages::VERTEX,
        );
        let patch_index_buffer = create_init_buffer(
            &device,
            "quill patch indices",
            bytemuck::cast_slice::<u16, u8>(&patch_indices),
            wgpu::BufferUsages::INDEX,
        );
        let tess_span_index_buffer = create_init_buffer(
            &device,
            "quill tess span indices",
            bytemuck::cast_slice::<u16, u8>(&TESS_SPAN_INDICES),
            wgpu::BufferUsages::INDEX,
        );
        let image_rect_vertex_buffer = create_init_buffer(
            &device,
            "quill image rect vertices",
            bytemuck::cast_slice::<[f32; 4], u8>(&IMAGE_RECT_VERTICES),
            wgpu::BufferUsages::VERTEX,
        );
        let image_rect_index_buffer = create_init_buffer(
            &device,
            "quill image rect indices",
            bytemuck::cast_slice::<u16, u8>(&IMAGE_RECT_INDICES),
            wgpu::BufferUsages::INDEX,
        );

        let per_flush_layout = create_per_flush_layout(&device);
        let per_draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("quill per draw"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let sampler_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("quill samplers"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pls_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("quill pls planes"),
            entries: &[1, 2, 3].map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::ReadWrite,
                    format: wgpu::TextureFormat::R32Uint,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            }),
        });
        let draw_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("quill draw"),
            bind_group_layouts: &[
                &per_flush_layout,
                &per_draw_layout,
                &sampler_layout,
                &pls_layout,
            ],
            push_constant_ranges: &[],
        });

        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("quill linear"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });
        let mipmap_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("quill mipmap"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });
        let sampler_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("quill samplers"),
            layout: &sampler_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Sampler(&linear_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&mipmap_sampler),
                },
            ],
        });

        let null_image = Arc::new(ImageTextureWgpu::new(&device, 1, 1, 1, vec![0, 0, 0, 255]));

        let color_ramp = create_color_ramp_pipeline(&device);
        let tessellate = create_tessellate_pipeline(&device);
        let mip_blit = create_mip_blit_pipeline(&device);

        let storage = wgpu::BufferUsages::STORAGE;
        let rings = Rings {
            flush_uniform: BufferRing::new("quill flush uniforms", wgpu::BufferUsages::UNIFORM),
            image_draw_uniform: BufferRing::new(
                "quill image draw uniforms",
                wgpu::BufferUsages::UNIFORM,
            ),
            path: BufferRing::new("quill paths", storage),
            paint: BufferRing::new("quill paints", storage),
            paint_aux: BufferRing::new("quill paint aux", storage),
            contour: BufferRing::new("quill contours", storage),
            simple_ramps: BufferRing::new("quill simple ramps", wgpu::BufferUsages::COPY_SRC),
            grad_span: BufferRing::new("quill grad spans", wgpu::BufferUsages::VERTEX),
            tess_span: BufferRing::new("quill tess spans", wgpu::BufferUsages::VERTEX),
            triangle: BufferRing::new("quill triangles", wgpu::BufferUsages::VERTEX),
        };

        Self {
            device,
            queue,
            rings,
            purgatory: ResourcePurgatory::default(),
            current_frame_idx: 0,
            buffer_ring_idx: 0,
            frame_fences: [const { None }; BUFFER_RING_SIZE],
            patch_vertex_buffer,
            patch_index_buffer,
            tess_span_index_buffer,
            image_rect_vertex_buffer,
            image_rect_index_buffer,
            per_flush_layout,
            per_draw_layout,
            sampler_layout,
            pls_layout,
            draw_pipeline_layout,
            linear_sampler,
            mipmap_sampler,
            sampler_bind_group,
            null_image,
            color_ramp,
            tessellate,
            mip_blit,
            gradient_texture: None,
            tess_texture: None,
            shader_modules: HashMap::new(),
            pipelines: HashMap::new(),
            pool_free_list: VecDeque::new(),
            supports_wireframe,
            supports_clear_texture,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn current_frame_idx(&self) -> u64 {
        self.current_frame_idx
    }

    pub fn null_image(&self) -> Arc<ImageTextureWgpu> {
        self.null_image.clone()
    }

    /// Advances the buffer ring to the next slot, blocking first if that
    /// slot's frame is still in flight, and retires expired resources.
    pub fn prepare_to_map_buffers(&mut self) {
        self.current_frame_idx += 1;
        self.buffer_ring_idx = (self.buffer_ring_idx + 1) % BUFFER_RING_SIZE;
        if let Some(submission) = self.frame_fences[self.buffer_ring_idx].take() {
            let _ = self
                .device
                .poll(wgpu::Maintain::WaitForSubmissionIndex(submission));
        }
        self.purgatory.drain_expired(self.current_frame_idx);
    }

    /// Waits for every in-flight frame; called at shutdown.
    pub fn wait_for_idle(&mut self) {
        for fence in &mut self.frame_fences {
            if let Some(submission) = fence.take() {
                let _ = self
                    .device
                    .poll(wgpu::Maintain::WaitForSubmissionIndex(submission));
            }
        }
    }

    /// Uploads one flush's staging data into the current ring slot.
    pub fn upload_staging(&mut self, staging: &FrameStaging) {
        let slot = self.buffer_ring_idx;
        let frame = self.current_frame_idx;
        let d = &self.device;
        let q = &self.queue;
        let p = &mut self.purgatory;
        self.rings
            .path
            .upload(d, q, slot, 0, bytemuck::cast_slice(&staging.paths), p, frame);
        self.rings
            .paint
            .upload(d, q, slot, 0, bytemuck::cast_slice(&staging.paints), p, frame);
        self.rings.paint_aux.upload(
            d,
            q,
            slot,
            0,
            bytemuck::cast_slice(&staging.paint_aux),
            p,
            frame,
        );
        self.rings.contour.upload(
            d,
            q,
            slot,
            0,
            bytemuck::cast_slice(&staging.contours),
            p,
            frame,
        );
        self.rings.tess_span.upload(
            d,
            q,
            slot,
            0,
            bytemuck::cast_slice::<TessVertexSpan, u8>(&staging.tess_spans),
            p,
            frame,
        );
        self.rings.triangle.upload(
            d,
            q,
            slot,
            0,
            bytemuck::cast_slice::<TriangleVertex, u8>(&staging.triangles),
            p,
            frame,
        );
        self.rings.grad_span.upload(
            d,
            q,
            slot,
            0,
            bytemuck::cast_slice::<GradientSpan, u8>(&staging.grad_spans),
            p,
            frame,
        );
        // The simple ramp copy reads whole texture rows; pad the upload out
        // to the row stride.
        let mut ramp_bytes: Vec<u8> = bytemuck::cast_slice(&staging.simple_ramps).to_vec();
        let row_bytes = GRAD_TEXTURE_WIDTH as usize * 4;
        ramp_bytes.resize(ramp_bytes.len().next_multiple_of(row_bytes.max(1)), 0);
        self.rings
            .simple_ramps
            .upload(d, q, slot, 0, &ramp_bytes, p, frame);
        self.rings.image_draw_uniform.upload(
            d,
            q,
            slot,
            0,
            &staging.image_draw_uniforms,
            p,
            frame,
        );
    }

    pub fn upload_flush_uniforms(&mut self, offset: u64, uniforms: &gpu::FlushUniforms) {
        let slot = self.buffer_ring_idx;
        let frame = self.current_frame_idx;
        self.rings.flush_uniform.upload(
            &self.device,
            &self.queue,
            slot,
            offset,
            bytemuck::bytes_of(uniforms),
            &mut self.purgatory,
            frame,
        );
    }

    fn resize_gradient_texture(&mut self, height: u32) {
        let height = height.max(1);
        if matches!(&self.gradient_texture, Some((_, _, h)) if *h >= height) {
            return;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("quill gradient texture"),
            size: wgpu::Extent3d {
                width: GRAD_TEXTURE_WIDTH,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.gradient_texture = Some((texture, view, height));
    }

    fn resize_tess_texture(&mut self, height: u32) {
        let height = height.max(1);
        if matches!(&self.tess_texture, Some((_, _, h)) if *h >= height) {
            return;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("quill tessellation texture"),
            size: wgpu::Extent3d {
                width: TESS_TEXTURE_WIDTH,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Uint,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.tess_texture = Some((texture, view, height));
    }

    fn make_bind_group_pool(&mut self) -> BindGroupPool {
        if let Some(front) = self.pool_free_list.front() {
            if front.expiration_frame_idx <= self.current_frame_idx {
                let mut pool = self.pool_free_list.pop_front().unwrap().pool;
                pool.reset();
                return pool;
            }
        }
        BindGroupPool::default()
    }

    fn retire_bind_group_pool(&mut self, pool: BindGroupPool) {
        if self.pool_free_list.len() < bind_group_pool_limits::MAX_POOLS_IN_POOL {
            self.pool_free_list.push_back(RetiredPool {
                expiration_frame_idx: self.current_frame_idx + BUFFER_RING_SIZE as u64,
                pool,
            });
        }
        // Overflowing pools simply drop.
    }

    fn shader_module(&mut self, key: u32, draw_type: DrawType, features: ShaderFeatures,
        interlock_mode: InterlockMode) -> &wgpu::ShaderModule {
        let device = &self.device;
        self.shader_modules.entry(key).or_insert_with(|| {
            let mut defines = shaders::shader_defines(features, interlock_mode);
            crate::pls::pls_impl_for(interlock_mode).push_shader_defines(&mut defines);
            defines.dedup();
            let source = shaders::preprocess(shaders::draw_shader_source(draw_type), &defines);
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("quill draw shader"),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
            })
        })
    }

    fn draw_pipeline(
        &mut self,
        key: PipelineKey,
        draw_type: DrawType,
        features: ShaderFeatures,
        pass: &MainPass,
        wireframe: bool,
    ) -> wgpu::RenderPipeline {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return pipeline.clone();
        }
        let shader_key = shader_unique_key(
            draw_type,
            features,
            pass.interlock_mode,
            ShaderMiscFlags::NONE,
        );
        let module = self
            .shader_module(shader_key, draw_type, features, pass.interlock_mode)
            .clone();

        const PATCH_ATTRS: [wgpu::VertexAttribute; 2] =
            wgpu::vertex_attr_array![0 => Float32x4, 1 => Float32x4];
        const TRIANGLE_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
        const IMAGE_RECT_ATTRS: [wgpu::VertexAttribute; 1] =
            wgpu::vertex_attr_array![0 => Float32x4];
        const MESH_POSITION_ATTRS: [wgpu::VertexAttribute; 1] =
            wgpu::vertex_attr_array![0 => Float32x2];
        const MESH_UV_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x2];

        let vertex_buffers: Vec<wgpu::VertexBufferLayout<'static>> = match draw_type {
            DrawType::MidpointFanPatches | DrawType::OuterCurvePatches => vec![
                wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<PatchVertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &PATCH_ATTRS,
                },
            ],
            DrawType::InteriorTriangulation => vec![wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<TriangleVertex>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &TRIANGLE_ATTRS,
            }],
            DrawType::ImageRect => vec![wgpu::VertexBufferLayout {
                array_stride: 16,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &IMAGE_RECT_ATTRS,
            }],
            DrawType::ImageMesh => vec![
                wgpu::VertexBufferLayout {
                    array_stride: 8,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &MESH_POSITION_ATTRS,
                },
                wgpu::VertexBufferLayout {
                    array_stride: 8,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &MESH_UV_ATTRS,
                },
            ],
            DrawType::AtomicResolve => Vec::new(),
        };

        let format = match pass.variant.format() {
            TargetFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            TargetFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
        };
        let topology = if draw_type == DrawType::AtomicResolve {
            wgpu::PrimitiveTopology::TriangleStrip
        } else {
            wgpu::PrimitiveTopology::TriangleList
        };
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("quill draw pipeline"),
                layout: Some(&self.draw_pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &vertex_buffers,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Cw,
                    cull_mode: if draw_type.is_image_draw() {
                        None
                    } else {
                        Some(wgpu::Face::Back)
                    },
                    polygon_mode: if wireframe && self.supports_wireframe {
                        wgpu::PolygonMode::Line
                    } else {
                        wgpu::PolygonMode::Fill
                    },
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        self.pipelines.insert(key, pipeline.clone());
        pipeline
    }

    /// Runs one image texture's pending upload: staging copy into mip 0,
    /// then the mip chain by half-size blits.
    fn sync_image_texture(&self, encoder: &mut wgpu::CommandEncoder, image: &ImageTextureWgpu) {
        let Some(pixels) = image.take_pending_upload() else {
            return;
        };
        use quill_encoding::ImageTexture as _;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: image.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(image.width() * 4),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: image.width(),
                height: image.height(),
                depth_or_array_layers: 1,
            },
        );
        for level in 1..image.mip_level_count() {
            let src = image.mip_view(level - 1);
            let dst = image.mip_view(level);
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("quill mip blit"),
                layout: &self.mip_blit.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&src),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                    },
                ],
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("quill mip blit"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &dst,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.mip_blit.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
    }

    /// Executes a flush recording and submits it. Returns the submission
    /// index, which becomes the frame fence on the final flush.
    pub fn execute(
        &mut self,
        recording: &Recording,
        desc: &FlushDescriptor,
        target: &RenderTarget,
        external_command_buffer: Option<wgpu::CommandEncoder>,
    ) {
        if desc.interlock_mode == InterlockMode::DepthStencil {
            return;
        }
        self.resize_gradient_texture(desc.complex_grad_rows_top + desc.complex_grad_rows_height);
        self.resize_tess_texture(desc.tess_data_height);

        let mut pool = self.make_bind_group_pool();
        let mut encoder = external_command_buffer.unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("quill flush"),
                })
        });

        if self.null_image.has_pending_upload() {
            let null_image = self.null_image.clone();
            self.sync_image_texture(&mut encoder, &null_image);
        }

        for command in &recording.commands {
            match command {
                Command::SyncImageTexture(image) => {
                    self.sync_image_texture(&mut encoder, as_wgpu_image(image));
                }
                Command::ClearAtomicCoverage { value } => {
                    self.clear_atomic_coverage(&mut encoder, target, *value);
                }
                Command::GradientPass {
                    rows_top,
                    rows_height,
                    first_span,
                    span_count,
                } => {
                    self.record_gradient_pass(
                        &mut encoder,
                        &mut pool,
                        desc,
                        *rows_top,
                        *rows_height,
                        *first_span,
                        *span_count,
                    );
                }
                Command::CopySimpleRamps {
                    buffer_offset_in_bytes,
                    width,
                    height,
                } => {
                    let (texture, _, _) = self.gradient_texture.as_ref().unwrap();
                    encoder.copy_buffer_to_texture(
                        wgpu::TexelCopyBufferInfo {
                            buffer: self.rings.simple_ramps.buffer_at(self.buffer_ring_idx),
                            layout: wgpu::TexelCopyBufferLayout {
                                offset: *buffer_offset_in_bytes,
                                bytes_per_row: Some(GRAD_TEXTURE_WIDTH * 4),
                                rows_per_image: None,
                            },
                        },
                        wgpu::TexelCopyTextureInfo {
                            texture,
                            mip_level: 0,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::Extent3d {
                            width: *width,
                            height: *height,
                            depth_or_array_layers: 1,
                        },
                    );
                }
                Command::TessellationPass {
                    data_height,
                    first_span,
                    span_count,
                } => {
                    self.record_tessellation_pass(
                        &mut encoder,
                        &mut pool,
                        desc,
                        *data_height,
                        *first_span,
                        *span_count,
                    );
                }
                Command::SyncRenderTarget { interlock_mode } => {
                    target.synchronize(&self.device, *interlock_mode);
                }
                Command::MainPass(pass) => {
                    self.record_main_pass(&mut encoder, &mut pool, desc, target, pass);
                }
            }
        }

        let submission = self.queue.submit(Some(encoder.finish()));
        if desc.is_final_flush_of_frame {
            self.frame_fences[self.buffer_ring_idx] = Some(submission.clone());
            if let Some(fence) = &desc.frame_completion_fence {
                fence.signal_on(submission);
            }
        }
        self.retire_bind_group_pool(pool);
    }

    fn clear_atomic_coverage(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: &RenderTarget,
        value: u32,
    ) {
        let planes = target.planes.lock().unwrap();
        let (texture, _) = planes
            .atomic_coverage
            .as_ref()
            .expect("render target sync runs before PLS activation");
        if value == 0 && self.supports_clear_texture {
            encoder.clear_texture(texture, &wgpu::ImageSubresourceRange::default());
        } else {
            // Without CLEAR_TEXTURE (or for a nonzero clear value), fill
            // the plane through the queue instead.
            let texel = value.to_le_bytes();
            let row: Vec<u8> = texel
                .iter()
                .copied()
                .cycle()
                .take(target.width as usize * 4)
                .collect();
            let data: Vec<u8> = row
                .iter()
                .copied()
                .cycle()
                .take(row.len() * target.height as usize)
                .collect();
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(target.width * 4),
                    rows_per_image: None,
                },
                wgpu::Extent3d {
                    width: target.width,
                    height: target.height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_gradient_pass(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        pool: &mut BindGroupPool,
        desc: &FlushDescriptor,
        rows_top: u32,
        rows_height: u32,
        first_span: u32,
        span_count: u32,
    ) {
        let slot = self.buffer_ring_idx;
        let bind_group = pool.adopt(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("quill color ramp"),
            layout: &self.color_ramp.bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 6,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: self.rings.flush_uniform.buffer_at(slot),
                    offset: desc.flush_uniform_data_offset_in_bytes,
                    size: wgpu::BufferSize::new(
                        std::mem::size_of::<gpu::FlushUniforms>() as u64
                    ),
                }),
            }],
        }));
        let (_, view, _) = self.gradient_texture.as_ref().unwrap();
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("quill gradient pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_viewport(
            0.0,
            rows_top as f32,
            GRAD_TEXTURE_WIDTH as f32,
            rows_height as f32,
            0.0,
            1.0,
        );
        pass.set_scissor_rect(0, rows_top, GRAD_TEXTURE_WIDTH, rows_height);
        pass.set_pipeline(&self.color_ramp.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, self.rings.grad_span.buffer_at(slot).slice(..));
        pass.draw(0..4, first_span..first_span + span_count);
    }

    #[allow(clippy::too_many_arguments)]
    fn record_tessellation_pass(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        pool: &mut BindGroupPool,
        desc: &FlushDescriptor,
        data_height: u32,
        first_span: u32,
        span_count: u32,
    ) {
        let slot = self.buffer_ring_idx;
        let bind_group = pool.adopt(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("quill tessellate"),
            layout: &self.tessellate.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffer_binding(
                        self.rings.path.buffer_at(slot),
                        desc.first_path as u64 * std::mem::size_of::<gpu::PathRecord>() as u64,
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: buffer_binding(
                        self.rings.contour.buffer_at(slot),
                        desc.first_contour as u64
                            * std::mem::size_of::<gpu::ContourRecord>() as u64,
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: self.rings.flush_uniform.buffer_at(slot),
                        offset: desc.flush_uniform_data_offset_in_bytes,
                        size: wgpu::BufferSize::new(
                            std::mem::size_of::<gpu::FlushUniforms>() as u64
                        ),
                    }),
                },
            ],
        }));
        let (_, view, _) = self.tess_texture.as_ref().unwrap();
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("quill tessellation pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_viewport(
            0.0,
            0.0,
            TESS_TEXTURE_WIDTH as f32,
            data_height as f32,
            0.0,
            1.0,
        );
        pass.set_scissor_rect(0, 0, TESS_TEXTURE_WIDTH, data_height);
        pass.set_pipeline(&self.tessellate.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, self.rings.tess_span.buffer_at(slot).slice(..));
        pass.set_index_buffer(
            self.tess_span_index_buffer.slice(..),
            wgpu::IndexFormat::Uint16,
        );
        pass.draw_indexed(
            0..TESS_SPAN_INDICES.len() as u32,
            0,
            first_span..first_span + span_count,
        );
    }

    fn per_flush_bind_group(&self, desc: &FlushDescriptor, pool: &mut BindGroupPool) -> wgpu::BindGroup {
        let slot = self.buffer_ring_idx;
        let (_, tess_view, _) = self.tess_texture.as_ref().unwrap();
        let (_, grad_view, _) = self.gradient_texture.as_ref().unwrap();
        pool.adopt(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("quill per flush"),
            layout: &self.per_flush_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(tess_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(grad_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffer_binding(
                        self.rings.path.buffer_at(slot),
                        desc.first_path as u64 * std::mem::size_of::<gpu::PathRecord>() as u64,
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: buffer_binding(
                        self.rings.paint.buffer_at(slot),
                        desc.first_paint as u64 * std::mem::size_of::<gpu::PaintRecord>() as u64,
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: buffer_binding(
                        self.rings.paint_aux.buffer_at(slot),
                        desc.first_paint_aux as u64
                            * std::mem::size_of::<gpu::PaintAuxRecord>() as u64,
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: buffer_binding(
                        self.rings.contour.buffer_at(slot),
                        desc.first_contour as u64
                            * std::mem::size_of::<gpu::ContourRecord>() as u64,
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: self.rings.flush_uniform.buffer_at(slot),
                        offset: desc.flush_uniform_data_offset_in_bytes,
                        size: wgpu::BufferSize::new(
                            std::mem::size_of::<gpu::FlushUniforms>() as u64
                        ),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: self.rings.image_draw_uniform.buffer_at(slot),
                        offset: 0,
                        size: wgpu::BufferSize::new(IMAGE_DRAW_UNIFORMS_STRIDE as u64),
                    }),
                },
            ],
        }))
    }

    fn pls_bind_group(
        &self,
        target: &RenderTarget,
        interlock_mode: InterlockMode,
        pool: &mut BindGroupPool,
    ) -> wgpu::BindGroup {
        let planes = target.planes.lock().unwrap();
        let clip = planes.clip.as_ref().expect("target planes synced");
        let coverage = match interlock_mode {
            InterlockMode::Atomics => &planes.atomic_coverage.as_ref().unwrap().1,
            _ => planes.coverage.as_ref().expect("target planes synced"),
        };
        // Atomics has no scratch plane; bind the clip view to keep the
        // layout satisfied.
        let scratch = planes.scratch_color.as_ref().unwrap_or(clip);
        pool.adopt(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("quill pls planes"),
            layout: &self.pls_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(coverage),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(clip),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(scratch),
                },
            ],
        }))
    }

    /// Bind group for an image texture, allocated at most once per frame
    /// no matter how many draws reference it.
    fn image_bind_group(&mut self, image: &ImageTextureWgpu, pool: &mut BindGroupPool) -> wgpu::BindGroup {
        let mut cached = image.frame_bind_group.lock().unwrap();
        if let Some(entry) = cached.as_ref() {
            if entry.frame_idx == self.current_frame_idx {
                return entry.bind_group.clone();
            }
        }
        if pool.image_texture_updates >= bind_group_pool_limits::MAX_IMAGE_TEXTURE_UPDATES {
            // Out of room for image updates in this pool; swap in a new
            // one.
            let full = std::mem::take(pool);
            self.retire_bind_group_pool(full);
        }
        pool.image_texture_updates += 1;
        let bind_group = pool.adopt(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("quill image texture"),
            layout: &self.per_draw_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(image.view()),
            }],
        }));
        *cached = Some(FrameBindGroup {
            frame_idx: self.current_frame_idx,
            bind_group: bind_group.clone(),
        });
        bind_group
    }

    fn record_main_pass(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        pool: &mut BindGroupPool,
        desc: &FlushDescriptor,
        target: &RenderTarget,
        pass: &MainPass,
    ) {
        let slot = self.buffer_ring_idx;
        let per_flush = self.per_flush_bind_group(desc, pool);
        let null_image = self.null_image.clone();
        let null_image_bg = self.image_bind_group(&null_image, pool);
        let pls = self.pls_bind_group(target, pass.interlock_mode, pool);

        // Resolve pipelines and image bind groups up front so the raw
        // render pass below only binds and draws.
        enum Lowered {
            SetPipeline(wgpu::RenderPipeline),
            SetImage { bind_group: wgpu::BindGroup, dynamic_offset: u32 },
            Barrier,
            DrawPatches { draw_type: DrawType, base: u32, count: u32 },
            DrawTriangles { base: u32, count: u32 },
            DrawImageRect,
            DrawImageMesh {
                vertex: wgpu::Buffer,
                uv: wgpu::Buffer,
                index: wgpu::Buffer,
                count: u32,
            },
            DrawResolve,
        }
        let mut lowered = Vec::with_capacity(pass.steps.len());
        for step in &pass.steps {
            lowered.push(match step {
                DrawStep::BindPipeline {
                    key,
                    draw_type,
                    features,
                } => Lowered::SetPipeline(self.draw_pipeline(
                    *key,
                    *draw_type,
                    *features,
                    pass,
                    desc.wireframe,
                )),
                DrawStep::BindImageTexture {
                    image,
                    dynamic_offset,
                } => Lowered::SetImage {
                    bind_group: self.image_bind_group(as_wgpu_image(image), pool),
                    dynamic_offset: *dynamic_offset,
                },
                DrawStep::Barrier => Lowered::Barrier,
                DrawStep::DrawPatches {
                    draw_type,
                    base_element,
                    element_count,
                } => Lowered::DrawPatches {
                    draw_type: *draw_type,
                    base: *base_element,
                    count: *element_count,
                },
                DrawStep::DrawTriangles {
                    base_vertex,
                    vertex_count,
                } => Lowered::DrawTriangles {
                    base: *base_vertex,
                    count: *vertex_count,
                },
                DrawStep::DrawImageRect => Lowered::DrawImageRect,
                DrawStep::DrawImageMesh {
                    vertex_buffer,
                    uv_buffer,
                    index_buffer,
                    element_count,
                } => Lowered::DrawImageMesh {
                    vertex: as_render_buffer(vertex_buffer).front_buffer(),
                    uv: as_render_buffer(uv_buffer).front_buffer(),
                    index: as_render_buffer(index_buffer).front_buffer(),
                    count: *element_count,
                },
                DrawStep::DrawResolve => Lowered::DrawResolve,
            });
        }

        let load = match pass.load_action {
            ColorLoadAction::Clear => wgpu::LoadOp::Clear(wgpu::Color {
                r: pass.clear_color[0],
                g: pass.clear_color[1],
                b: pass.clear_color[2],
                a: pass.clear_color[3],
            }),
            // wgpu has no don't-care load; preserving is the portable
            // equivalent.
            ColorLoadAction::PreserveRenderTarget | ColorLoadAction::DontCare => wgpu::LoadOp::Load,
        };

        let begin = |encoder: &mut wgpu::CommandEncoder,
                     load: wgpu::LoadOp<wgpu::Color>|
         -> wgpu::RenderPass<'static> {
            let mut rp = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("quill main pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
                .forget_lifetime();
            rp.set_viewport(
                0.0,
                0.0,
                pass.extent[0] as f32,
                pass.extent[1] as f32,
                0.0,
                1.0,
            );
            let bounds = desc
                .render_target_update_bounds
                .intersect(&quill_encoding::IntBounds::new(
                    0,
                    0,
                    pass.extent[0] as i32,
                    pass.extent[1] as i32,
                ));
            if !bounds.is_empty() {
                rp.set_scissor_rect(
                    bounds.left as u32,
                    bounds.top as u32,
                    bounds.width() as u32,
                    bounds.height() as u32,
                );
            }
            rp
        };

        let mut rp = begin(encoder, load);
        rp.set_bind_group(0, &per_flush, &[0]);
        rp.set_bind_group(1, &null_image_bg, &[]);
        rp.set_bind_group(2, &self.sampler_bind_group, &[]);
        rp.set_bind_group(3, &pls, &[]);

        let mut current_pipeline: Option<wgpu::RenderPipeline> = None;
        let mut current_image: Option<(wgpu::BindGroup, u32)> = None;
        for step in &lowered {
            match step {
                Lowered::SetPipeline(pipeline) => {
                    rp.set_pipeline(pipeline);
                    current_pipeline = Some(pipeline.clone());
                }
                Lowered::SetImage {
                    bind_group,
                    dynamic_offset,
                } => {
                    rp.set_bind_group(0, &per_flush, &[*dynamic_offset]);
                    rp.set_bind_group(1, bind_group, &[]);
                    current_image = Some((bind_group.clone(), *dynamic_offset));
                }
                Lowered::Barrier => {
                    // wgpu cannot barrier inside a render pass; store and
                    // re-begin with a preserving load, restoring state.
                    drop(rp);
                    rp = begin(encoder, wgpu::LoadOp::Load);
                    let offset = current_image.as_ref().map(|(_, o)| *o).unwrap_or(0);
                    rp.set_bind_group(0, &per_flush, &[offset]);
                    match &current_image {
                        Some((bind_group, _)) => rp.set_bind_group(1, bind_group, &[]),
                        None => rp.set_bind_group(1, &null_image_bg, &[]),
                    }
                    rp.set_bind_group(2, &self.sampler_bind_group, &[]);
                    rp.set_bind_group(3, &pls, &[]);
                    if let Some(pipeline) = &current_pipeline {
                        rp.set_pipeline(pipeline);
                    }
                }
                Lowered::DrawPatches {
                    draw_type,
                    base,
                    count,
                } => {
                    rp.set_vertex_buffer(0, self.patch_vertex_buffer.slice(..));
                    rp.set_index_buffer(
                        self.patch_index_buffer.slice(..),
                        wgpu::IndexFormat::Uint16,
                    );
                    let first_index = gpu::patch_base_index(*draw_type);
                    let index_count = gpu::patch_index_count(*draw_type);
                    rp.draw_indexed(
                        first_index..first_index + index_count,
                        0,
                        *base..*base + *count,
                    );
                }
                Lowered::DrawTriangles { base, count } => {
                    rp.set_vertex_buffer(0, self.rings.triangle.buffer_at(slot).slice(..));
                    rp.draw(*base..*base + *count, 0..1);
                }
                Lowered::DrawImageRect => {
                    rp.set_vertex_buffer(0, self.image_rect_vertex_buffer.slice(..));
                    rp.set_index_buffer(
                        self.image_rect_index_buffer.slice(..),
                        wgpu::IndexFormat::Uint16,
                    );
                    rp.draw_indexed(0..IMAGE_RECT_INDICES.len() as u32, 0, 0..1);
                }
                Lowered::DrawImageMesh {
                    vertex,
                    uv,
                    index,
                    count,
                } => {
                    rp.set_vertex_buffer(0, vertex.slice(..));
                    rp.set_vertex_buffer(1, uv.slice(..));
                    rp.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint16);
                    rp.draw_indexed(0..*count, 0, 0..1);
                }
                Lowered::DrawResolve => {
                    rp.draw(0..4, 0..1);
                }
            }
        }
        drop(rp);
    }
}

fn buffer_binding(buffer: &wgpu::Buffer, offset: u64) -> wgpu::BindingResource<'_> {
    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
        buffer,
        offset,
        size: None,
    })
}

fn create_init_buffer(
    device: &wgpu::Device,
    label: &'static str,
    contents: &[u8],
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    use wgpu::util::DeviceExt;
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents,
        usage,
    })
}

fn create_per_flush_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let storage = |binding, visibility| wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("quill per flush"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Uint,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            storage(2, wgpu::ShaderStages::VERTEX),
            storage(3, wgpu::ShaderStages::VERTEX_FRAGMENT),
            storage(4, wgpu::ShaderStages::VERTEX_FRAGMENT),
            storage(5, wgpu::ShaderStages::VERTEX),
            wgpu::BindGroupLayoutEntry {
                binding: 6,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 7,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

fn create_color_ramp_pipeline(device: &wgpu::Device) -> FixedPipeline {
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("quill color ramp"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 6,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("quill color ramp"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("quill color ramp"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shaders::COLOR_RAMP_WGSL)),
    });
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("quill color ramp"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<GradientSpan>() as u64,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &wgpu::vertex_attr_array![0 => Uint32x4],
            }],
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: wgpu::TextureFormat::Rgba8Unorm,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });
    FixedPipeline {
        pipeline,
        bind_group_layout,
    }
}

fn create_tessellate_pipeline(device: &wgpu::Device) -> FixedPipeline {
    let storage = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("quill tessellate"),
        entries: &[
            storage(2),
            storage(5),
            wgpu::BindGroupLayoutEntry {
                binding: 6,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("quill tessellate"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("quill tessellate"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shaders::TESSELLATE_WGSL)),
    });
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("quill tessellate"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<TessVertexSpan>() as u64,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &wgpu::vertex_attr_array![
                    0 => Float32x4,
                    1 => Float32x4,
                    2 => Float32x4,
                    3 => Uint32x4,
                ],
            }],
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: wgpu::TextureFormat::Rgba32Uint,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: Some(wgpu::Face::Back),
            front_face: wgpu::FrontFace::Ccw,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });
    FixedPipeline {
        pipeline,
        bind_group_layout,
    }
}

fn create_mip_blit_pipeline(device: &wgpu::Device) -> FixedPipeline {
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("quill mip blit"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("quill mip blit"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("quill mip blit"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shaders::BLIT_MIP_WGSL)),
    });
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("quill mip blit"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: wgpu::TextureFormat::Rgba8Unorm,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });
    FixedPipeline {
        pipeline,
        bind_group_layout,
    }
}
