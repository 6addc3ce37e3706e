// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-flush state machine.
//!
//! [`record_flush`] turns a [`FlushDescriptor`] plus the frame's draw
//! batches into an ordered [`Recording`]: gradient ramp pass, tessellation
//! pass, texture and render-target sync, then the main PLS draw pass with
//! its barriers and (under atomics) the resolve. The function is pure so
//! pass ordering and barrier placement are directly testable.

use std::collections::HashSet;

use quill_encoding::{DrawBatch, DrawType};

use crate::pls::{needs_post_clear_barrier, pls_impl_for};
use crate::recording::{Command, DrawStep, MainPass, Recording};
use crate::shaders::{pipeline_key, shader_unique_key, DrawPipelineOptions, RenderPassVariant,
    ShaderMiscFlags};
use crate::{FlushDescriptor, InterlockMode};

pub fn record_flush(desc: &FlushDescriptor, batches: &[DrawBatch]) -> Recording {
    let mut recording = Recording::default();
    if desc.interlock_mode == InterlockMode::DepthStencil {
        // Reserved mode; the render is silently not performed.
        return recording;
    }
    let pls = pls_impl_for(desc.interlock_mode);

    // 1. Gradient pass: complex ramps render into their row range, then
    // the packed simple ramps are copied in below them.
    if desc.complex_grad_span_count > 0 {
        recording.push(Command::GradientPass {
            rows_top: desc.complex_grad_rows_top,
            rows_height: desc.complex_grad_rows_height,
            first_span: desc.first_complex_grad_span,
            span_count: desc.complex_grad_span_count,
        });
    }
    if desc.simple_grad_texels_height > 0 {
        recording.push(Command::CopySimpleRamps {
            buffer_offset_in_bytes: desc.simple_grad_data_offset_in_bytes,
            width: desc.simple_grad_texels_width,
            height: desc.simple_grad_texels_height,
        });
    }

    // 2. Tessellation pass.
    if desc.tess_vertex_span_count > 0 {
        recording.push(Command::TessellationPass {
            data_height: desc.tess_data_height,
            first_span: desc.first_tess_vertex_span,
            span_count: desc.tess_vertex_span_count,
        });
    }

    // 3. Image texture sync: each referenced texture runs its pending
    // upload once.
    let mut synced: HashSet<*const ()> = HashSet::new();
    for batch in batches {
        if let Some(image) = &batch.image_texture {
            let ptr = std::sync::Arc::as_ptr(image) as *const ();
            if synced.insert(ptr) {
                recording.push(Command::SyncImageTexture(image.clone()));
            }
        }
    }

    // 4. Render target sync: auxiliary planes exist before the pass.
    recording.push(Command::SyncRenderTarget {
        interlock_mode: desc.interlock_mode,
    });

    // 5. Main draw pass.
    pls.activate_pixel_local_storage(desc, &mut recording);

    let variant = RenderPassVariant::new(desc.target_format, desc.color_load_action);
    let mut pass = MainPass {
        variant,
        interlock_mode: desc.interlock_mode,
        load_action: desc.color_load_action,
        clear_color: desc.clear_color,
        extent: [desc.render_target_width, desc.render_target_height],
        steps: Vec::new(),
    };

    let atomics = desc.interlock_mode == InterlockMode::Atomics;
    let mut barrier_before_next_draw = needs_post_clear_barrier(desc);

    for batch in batches {
        if batch.element_count == 0 {
            continue;
        }

        if let Some(image) = &batch.image_texture {
            pass.steps.push(DrawStep::BindImageTexture {
                image: image.clone(),
                dynamic_offset: batch.image_draw_data_offset,
            });
        }

        // Atomics resolves every pixel with one combined shader, so all
        // draws share the flush-wide feature set.
        let features = if atomics {
            desc.combined_shader_features
        } else {
            batch.shader_features
        };
        let mut options = DrawPipelineOptions::NONE;
        if desc.wireframe {
            options = DrawPipelineOptions::WIREFRAME;
        }
        let shader_key = shader_unique_key(
            batch.draw_type,
            features,
            desc.interlock_mode,
            ShaderMiscFlags::NONE,
        );
        pass.steps.push(DrawStep::BindPipeline {
            key: pipeline_key(shader_key, options, variant),
            draw_type: batch.draw_type,
            features,
        });

        if barrier_before_next_draw {
            debug_assert!(atomics);
            pls.on_barrier(&mut pass.steps);
        }

        match batch.draw_type {
            DrawType::MidpointFanPatches | DrawType::OuterCurvePatches => {
                pass.steps.push(DrawStep::DrawPatches {
                    draw_type: batch.draw_type,
                    base_element: batch.base_element,
                    element_count: batch.element_count,
                });
            }
            DrawType::InteriorTriangulation => {
                pass.steps.push(DrawStep::DrawTriangles {
                    base_vertex: batch.base_element,
                    vertex_count: batch.element_count,
                });
            }
            DrawType::ImageRect => {
                debug_assert!(atomics, "image rects only draw under atomics interlock");
                pass.steps.push(DrawStep::DrawImageRect);
            }
            DrawType::ImageMesh => {
                pass.steps.push(DrawStep::DrawImageMesh {
                    vertex_buffer: batch.vertex_buffer.clone().expect("mesh draw needs vertices"),
                    uv_buffer: batch.uv_buffer.clone().expect("mesh draw needs uvs"),
                    index_buffer: batch.index_buffer.clone().expect("mesh draw needs indices"),
                    element_count: batch.element_count,
                });
            }
            DrawType::AtomicResolve => unreachable!("resolve is appended by the facade"),
        }

        barrier_before_next_draw = atomics && batch.needs_barrier;
    }

    // 6. Resolve: convert atomic coverage into final color.
    if atomics {
        if barrier_before_next_draw {
            pls.on_barrier(&mut pass.steps);
        }
        pls.setup_atomic_resolve(desc, &mut pass);
    }
    pls.deactivate_pixel_local_storage(desc, &mut pass);

    recording.push(Command::MainPass(pass));

    // 7. The frame completion fence, when this is the final flush, is
    // attached by the engine at submission time.
    recording
}
