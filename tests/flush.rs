// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flush engine tests.
//!
//! The flush state machine is a pure function from a flush descriptor and
//! draw batches to a recording, so pass ordering, barrier placement and
//! bind decisions are all assertable without a GPU device.

use std::any::Any;
use std::sync::Arc;

use quill::encoding::kurbo::{Rect, Shape, Stroke};
use quill::encoding::peniko::color::palette;
use quill::encoding::peniko::Mix;
use quill::encoding::{
    gpu, Draw, DrawList, DrawType, FrameStaging, Gradient, GradientCache, ImageTexture,
    MeshBuffer, Paint, PaintSource, ResourceCounters,
};
use quill::{
    record_flush, ColorLoadAction, Command, DrawStep, FlushDescriptor, IntBounds, InterlockMode,
    TargetFormat, Transform,
};

struct FakeTexture;

impl ImageTexture for FakeTexture {
    fn width(&self) -> u32 {
        16
    }
    fn height(&self) -> u32 {
        16
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct FakeBuffer(usize);

impl MeshBuffer for FakeBuffer {
    fn len_in_bytes(&self) -> usize {
        self.0
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Drives the draw list through counting, gradient allocation and the push
/// walk, the way the render context does, and assembles the descriptor.
fn stage_frame(
    draws: &mut DrawList,
    interlock_mode: InterlockMode,
    load_action: ColorLoadAction,
) -> (FrameStaging, FlushDescriptor) {
    let mut gradients = GradientCache::new();
    let mut totals = ResourceCounters::default();
    for draw in draws.iter_mut() {
        let mut scratch = ResourceCounters::default();
        assert!(draw.allocate_gradient_if_needed(&mut gradients, &mut scratch));
    }
    for draw in draws.iter() {
        totals += *draw.resource_counts();
    }
    let mut staging = FrameStaging::new();
    staging.begin_flush(totals, gradients.layout());
    staging.simple_ramps = gradients.simple_ramps().to_vec();
    gradients.write_grad_spans(&mut staging.grad_spans);
    for draw in draws.iter_mut() {
        draw.push_to_context(&mut staging);
    }
    staging.finish();

    let (simple_w, simple_h) = gradients.simple_grad_texels_extent();
    let desc = FlushDescriptor {
        render_target_width: 256,
        render_target_height: 256,
        target_format: TargetFormat::Rgba8,
        interlock_mode,
        color_load_action: load_action,
        clear_color: [0.0; 4],
        coverage_clear_value: 0,
        render_target_update_bounds: IntBounds::new(0, 0, 256, 256),
        first_path: 0,
        first_contour: 0,
        first_paint: 0,
        first_paint_aux: 0,
        first_tess_vertex_span: 0,
        tess_vertex_span_count: staging.tess_span_count(),
        tess_data_height: staging.tess_data_height().max(1),
        first_complex_grad_span: 0,
        complex_grad_span_count: staging.grad_spans.len() as u32,
        complex_grad_rows_top: gradients.simple_ramp_rows(),
        complex_grad_rows_height: gradients.complex_rows_height(),
        simple_grad_data_offset_in_bytes: 0,
        simple_grad_texels_width: simple_w,
        simple_grad_texels_height: simple_h,
        flush_uniform_data_offset_in_bytes: 0,
        combined_shader_features: staging.combined_shader_features(),
        wireframe: false,
        is_final_flush_of_frame: true,
        frame_completion_fence: None,
    };
    (staging, desc)
}

fn red_rect_draw() -> Draw {
    Draw::new_path(
        Arc::new(Rect::new(10.0, 10.0, 74.0, 74.0).to_path(0.1)),
        Transform::IDENTITY,
        &Paint::fill(palette::css::RED),
        0,
        None,
    )
}

#[test]
fn solid_rect_clear_raster_ordering() {
    // S1: a single solid rectangle. No gradient work, a tessellation pass
    // with at least the four line spans, and one midpoint fan patch draw.
    let mut draws = DrawList::new();
    draws.push(red_rect_draw());
    let (staging, desc) = stage_frame(
        &mut draws,
        InterlockMode::RasterOrdering,
        ColorLoadAction::Clear,
    );
    let recording = record_flush(&desc, staging.batches());

    assert!(!recording
        .commands
        .iter()
        .any(|c| matches!(c, Command::GradientPass { .. } | Command::CopySimpleRamps { .. })));
    let tess = recording
        .commands
        .iter()
        .find_map(|c| match c {
            Command::TessellationPass { span_count, .. } => Some(*span_count),
            _ => None,
        })
        .expect("tessellation pass recorded");
    assert!(tess >= 4);

    let pass = recording.main_pass().expect("main pass recorded");
    assert_eq!(pass.load_action, ColorLoadAction::Clear);
    let draws_in_pass: Vec<_> = pass.steps.iter().filter(|s| s.is_draw()).collect();
    assert_eq!(draws_in_pass.len(), 1);
    assert!(matches!(
        draws_in_pass[0],
        DrawStep::DrawPatches {
            draw_type: DrawType::MidpointFanPatches,
            ..
        }
    ));
    // Raster ordering needs neither barriers nor a resolve.
    assert!(!pass.steps.iter().any(|s| matches!(s, DrawStep::Barrier)));
    assert!(!pass
        .steps
        .iter()
        .any(|s| matches!(s, DrawStep::DrawResolve)));
}

#[test]
fn passes_are_strictly_ordered() {
    let mut draws = DrawList::new();
    let gradient = Arc::new(Gradient::linear(
        [0.0, 0.0],
        [64.0, 0.0],
        &[
            quill::encoding::peniko::ColorStop::from((0.0, palette::css::RED)),
            quill::encoding::peniko::ColorStop::from((0.5, palette::css::LIME)),
            quill::encoding::peniko::ColorStop::from((1.0, palette::css::BLUE)),
        ],
    ));
    draws.push(Draw::new_path(
        Arc::new(Rect::new(0.0, 0.0, 64.0, 64.0).to_path(0.1)),
        Transform::IDENTITY,
        &Paint {
            source: PaintSource::Gradient(gradient),
            fill_rule: quill::encoding::peniko::Fill::NonZero,
            stroke: None,
            blend_mode: Mix::Normal,
        },
        0,
        None,
    ));
    let (staging, desc) = stage_frame(
        &mut draws,
        InterlockMode::RasterOrdering,
        ColorLoadAction::Clear,
    );
    let recording = record_flush(&desc, staging.batches());

    let position = |pred: fn(&Command) -> bool| {
        recording
            .commands
            .iter()
            .position(pred)
            .expect("command recorded")
    };
    let grad = position(|c| matches!(c, Command::GradientPass { .. }));
    let tess = position(|c| matches!(c, Command::TessellationPass { .. }));
    let sync = position(|c| matches!(c, Command::SyncRenderTarget { .. }));
    let main = position(|c| matches!(c, Command::MainPass(_)));
    assert!(grad < tess && tess < sync && sync < main);
}

#[test]
fn atomics_preserve_skips_post_clear_barrier_and_resolves() {
    // S5: atomics with advanced blend over preserved target contents.
    let mut draws = DrawList::new();
    let mut paint = Paint::fill(palette::css::RED);
    paint.blend_mode = Mix::Multiply;
    draws.push(Draw::new_path(
        Arc::new(Rect::new(10.0, 10.0, 74.0, 74.0).to_path(0.1)),
        Transform::IDENTITY,
        &paint,
        0,
        None,
    ));
    let (staging, desc) = stage_frame(
        &mut draws,
        InterlockMode::Atomics,
        ColorLoadAction::PreserveRenderTarget,
    );
    assert!(desc
        .combined_shader_features
        .contains(quill::encoding::ShaderFeatures::ENABLE_ADVANCED_BLEND));
    let recording = record_flush(&desc, staging.batches());

    // The atomic coverage image clears outside the pass.
    assert!(recording
        .commands
        .iter()
        .any(|c| matches!(c, Command::ClearAtomicCoverage { .. })));

    let pass = recording.main_pass().unwrap();
    assert_eq!(pass.load_action, ColorLoadAction::PreserveRenderTarget);
    // No barrier before the first draw when the target is preserved.
    let first_draw = pass.steps.iter().position(|s| s.is_draw()).unwrap();
    assert!(!pass.steps[..first_draw]
        .iter()
        .any(|s| matches!(s, DrawStep::Barrier)));
    // The resolve runs after the draw list.
    assert!(matches!(pass.steps.last(), Some(DrawStep::DrawResolve)));
}

#[test]
fn atomics_clear_emits_post_clear_barrier() {
    let mut draws = DrawList::new();
    let mut paint = Paint::fill(palette::css::RED);
    paint.blend_mode = Mix::Multiply;
    draws.push(Draw::new_path(
        Arc::new(Rect::new(10.0, 10.0, 74.0, 74.0).to_path(0.1)),
        Transform::IDENTITY,
        &paint,
        0,
        None,
    ));
    let (staging, desc) =
        stage_frame(&mut draws, InterlockMode::Atomics, ColorLoadAction::Clear);
    let recording = record_flush(&desc, staging.batches());
    let pass = recording.main_pass().unwrap();
    // A barrier sits between the attachment clear and the first draw.
    let first_draw = pass.steps.iter().position(|s| s.is_draw()).unwrap();
    assert!(pass.steps[..first_draw]
        .iter()
        .any(|s| matches!(s, DrawStep::Barrier)));
}

#[test]
fn post_clear_barrier_does_not_depend_on_blend_mode() {
    // The barrier under Clear is unconditional: plain src-over blending
    // gets it too, not just advanced blend.
    let mut draws = DrawList::new();
    draws.push(red_rect_draw());
    let (staging, desc) =
        stage_frame(&mut draws, InterlockMode::Atomics, ColorLoadAction::Clear);
    assert!(!desc
        .combined_shader_features
        .contains(quill::encoding::ShaderFeatures::ENABLE_ADVANCED_BLEND));
    let recording = record_flush(&desc, staging.batches());
    let pass = recording.main_pass().unwrap();
    let first_draw = pass.steps.iter().position(|s| s.is_draw()).unwrap();
    assert!(pass.steps[..first_draw]
        .iter()
        .any(|s| matches!(s, DrawStep::Barrier)));
}

#[test]
fn image_mesh_binds_buffers_and_texture_once() {
    // S6: image mesh draws bind their texture with per-batch dynamic
    // offsets, and the texture syncs once even when referenced twice.
    let texture: Arc<dyn ImageTexture> = Arc::new(FakeTexture);
    let vertex: Arc<dyn MeshBuffer> = Arc::new(FakeBuffer(6 * 8));
    let uv: Arc<dyn MeshBuffer> = Arc::new(FakeBuffer(6 * 8));
    let index: Arc<dyn MeshBuffer> = Arc::new(FakeBuffer(6 * 2));

    let mut draws = DrawList::new();
    for i in 0..2 {
        draws.push(Draw::new_image_mesh(
            IntBounds::new(i * 100, 0, i * 100 + 50, 50),
            Transform::IDENTITY,
            Mix::Normal,
            texture.clone(),
            vertex.clone(),
            uv.clone(),
            index.clone(),
            6,
            1.0,
        ));
    }
    let (staging, desc) = stage_frame(
        &mut draws,
        InterlockMode::Atomics,
        ColorLoadAction::PreserveRenderTarget,
    );
    let recording = record_flush(&desc, staging.batches());

    let syncs = recording
        .commands
        .iter()
        .filter(|c| matches!(c, Command::SyncImageTexture(_)))
        .count();
    assert_eq!(syncs, 1);

    let pass = recording.main_pass().unwrap();
    let offsets: Vec<u32> = pass
        .steps
        .iter()
        .filter_map(|s| match s {
            DrawStep::BindImageTexture { dynamic_offset, .. } => Some(*dynamic_offset),
            _ => None,
        })
        .collect();
    assert_eq!(
        offsets,
        vec![0, gpu::IMAGE_DRAW_UNIFORMS_STRIDE as u32]
    );
    let mesh_draws: Vec<u32> = pass
        .steps
        .iter()
        .filter_map(|s| match s {
            DrawStep::DrawImageMesh { element_count, .. } => Some(*element_count),
            _ => None,
        })
        .collect();
    assert_eq!(mesh_draws, vec![6, 6]);
}

#[test]
fn overlapping_atomics_batches_get_interleaved_barriers() {
    // A large triangulated fill under a small fan rect forces two batches
    // whose pixels overlap; atomics interleaves a barrier between them.
    let mut draws = DrawList::new();
    draws.push(Draw::new_path(
        Arc::new(Rect::new(0.0, 0.0, 1024.0, 1024.0).to_path(0.1)),
        Transform::IDENTITY,
        &Paint::fill(palette::css::BLUE),
        0,
        None,
    ));
    draws.push(red_rect_draw());
    let (staging, desc) = stage_frame(
        &mut draws,
        InterlockMode::Atomics,
        ColorLoadAction::PreserveRenderTarget,
    );
    let recording = record_flush(&desc, staging.batches());
    let pass = recording.main_pass().unwrap();
    let draw_positions: Vec<usize> = pass
        .steps
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_draw() && !matches!(s, DrawStep::DrawResolve))
        .map(|(i, _)| i)
        .collect();
    assert!(draw_positions.len() >= 2);
    let barrier_between = pass.steps[draw_positions[0]..*draw_positions.last().unwrap()]
        .iter()
        .any(|s| matches!(s, DrawStep::Barrier));
    assert!(barrier_between);
}

#[test]
fn stroke_joins_count_matches_interior_plus_caps() {
    // S4: a three-segment open stroke with round caps reports two
    // emulated-cap pseudo-joins on top of its interior joins.
    let mut path = quill::encoding::kurbo::BezPath::new();
    path.move_to((0.0, 0.0));
    path.line_to((40.0, 0.0));
    path.line_to((40.0, 40.0));
    path.line_to((0.0, 40.0));
    let stroke = Stroke::new(6.0)
        .with_caps(quill::encoding::kurbo::Cap::Round)
        .with_join(quill::encoding::kurbo::Join::Round);
    let draw = Draw::new_path(
        Arc::new(path),
        Transform::IDENTITY,
        &Paint::stroke(palette::css::RED, stroke),
        0,
        None,
    );
    match draw.kind() {
        quill::encoding::DrawKind::MidpointFanPath(plan) => {
            let contour = &plan.contours()[0];
            // Two interior joins plus the two caps.
            assert_eq!(contour.stroke_join_count, 2 + 2);
        }
        _ => panic!("strokes use midpoint fans"),
    }
}

#[test]
fn depth_stencil_mode_records_nothing() {
    let mut draws = DrawList::new();
    draws.push(red_rect_draw());
    let (staging, desc) = stage_frame(
        &mut draws,
        InterlockMode::DepthStencil,
        ColorLoadAction::Clear,
    );
    let recording = record_flush(&desc, staging.batches());
    assert!(recording.commands.is_empty());
}

#[test]
fn gradient_flush_fields_cover_the_span_rows() {
    let mut gradients = GradientCache::new();
    let simple = Arc::new(Gradient::linear(
        [0.0, 0.0],
        [1.0, 0.0],
        &[
            quill::encoding::peniko::ColorStop::from((0.0, palette::css::RED)),
            quill::encoding::peniko::ColorStop::from((1.0, palette::css::BLUE)),
        ],
    ));
    let complex = Arc::new(Gradient::linear(
        [0.0, 0.0],
        [1.0, 0.0],
        &[
            quill::encoding::peniko::ColorStop::from((0.0, palette::css::RED)),
            quill::encoding::peniko::ColorStop::from((0.25, palette::css::LIME)),
            quill::encoding::peniko::ColorStop::from((1.0, palette::css::BLUE)),
        ],
    ));
    gradients.allocate(&simple).unwrap();
    gradients.allocate(&complex).unwrap();
    // One simple row below, one complex row above it.
    assert_eq!(gradients.simple_ramp_rows(), 1);
    assert_eq!(gradients.complex_rows_height(), 1);
    assert_eq!(gradients.layout().complex_offset_y, 1);
    let mut spans = Vec::new();
    gradients.write_grad_spans(&mut spans);
    assert_eq!(spans.len(), complex.complex_span_count());
}
