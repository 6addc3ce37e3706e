// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Classification and GPU packing of paints.

use peniko::color::{AlphaColor, Srgb};
use peniko::{Fill, Mix};

use crate::gpu::{
    ImageDrawUniforms, PaintAuxRecord, PaintRecord, ShaderFeatures, GRAD_TEXTURE_WIDTH,
};
use crate::gradient::{Gradient, GradientKind, GradTextureLayout};
use crate::math::{ClipRectInverseMatrix, Transform};

/// GLSL-visible paint type ids.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum PaintType {
    SolidColor = 0,
    LinearGradient = 1,
    RadialGradient = 2,
    Image = 3,
    ClipUpdate = 4,
}

/// Row (and column, for simple two-texel ramps) of a gradient in the
/// gradient texture.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ColorRampLocation {
    pub row: u32,
    pub col: u32,
}

impl ColorRampLocation {
    /// Column value marking a complex ramp, which spans its entire row.
    pub const COMPLEX_COL: u32 = u32::MAX;

    pub fn complex(row: u32) -> Self {
        Self {
            row,
            col: Self::COMPLEX_COL,
        }
    }

    pub fn is_complex(&self) -> bool {
        self.col == Self::COMPLEX_COL
    }
}

/// The paint-type-specific half of a draw's paint, mirroring the payload
/// word of [`PaintRecord`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SimplePaintValue {
    /// Non-premultiplied RGBA8, red in the low byte.
    Color(u32),
    ColorRamp(ColorRampLocation),
    ImageOpacity(f32),
    ClipUpdate { outer_clip_id: u32 },
}

impl SimplePaintValue {
    pub fn paint_type(&self, gradient_kind: Option<GradientKind>) -> PaintType {
        match self {
            Self::Color(_) => PaintType::SolidColor,
            Self::ColorRamp(_) => match gradient_kind {
                Some(GradientKind::Radial) => PaintType::RadialGradient,
                _ => PaintType::LinearGradient,
            },
            Self::ImageOpacity(_) => PaintType::Image,
            Self::ClipUpdate { .. } => PaintType::ClipUpdate,
        }
    }
}

/// Premultiplied little-endian RGBA8 packing, the layout the shaders
/// sample.
pub fn pack_color(color: AlphaColor<Srgb>) -> u32 {
    color.premultiply().to_rgba8().to_u32()
}

const PAINT_FLAG_EVEN_ODD: u32 = 1 << 8;
const PAINT_FLAG_HAS_CLIP_RECT: u32 = 1 << 9;

/// Blend mode ids shared with the shaders. `SrcOver` is the only one the
/// fixed-function blender can express; everything else requires
/// `ENABLE_ADVANCED_BLEND`.
pub fn blend_mode_id(mix: Mix) -> u32 {
    match mix {
        Mix::Normal | Mix::Clip => 0,
        Mix::Screen => 1,
        Mix::Overlay => 2,
        Mix::Darken => 3,
        Mix::Lighten => 4,
        Mix::ColorDodge => 5,
        Mix::ColorBurn => 6,
        Mix::HardLight => 7,
        Mix::SoftLight => 8,
        Mix::Difference => 9,
        Mix::Exclusion => 10,
        Mix::Multiply => 11,
        Mix::Hue => 12,
        Mix::Saturation => 13,
        Mix::Color => 14,
        Mix::Luminosity => 15,
    }
}

/// The shader features a blend mode requires.
pub fn blend_mode_features(mix: Mix) -> ShaderFeatures {
    match mix {
        Mix::Normal | Mix::Clip => ShaderFeatures::NONE,
        Mix::Hue | Mix::Saturation | Mix::Color | Mix::Luminosity => {
            ShaderFeatures::ENABLE_ADVANCED_BLEND | ShaderFeatures::ENABLE_HSL_BLEND_MODES
        }
        _ => ShaderFeatures::ENABLE_ADVANCED_BLEND,
    }
}

/// Packs the per-path paint record. `params` holds the paint type in bits
/// 0..4, the blend mode at bits 4..8, fill/clip flags at bits 8..16 and the
/// clip id at bits 16..32.
#[allow(clippy::too_many_arguments)]
pub fn pack_paint_record(
    fill_rule: Fill,
    paint_type: PaintType,
    value: SimplePaintValue,
    grad_layout: GradTextureLayout,
    clip_id: u32,
    has_clip_rect: bool,
    blend_mode: Mix,
) -> PaintRecord {
    let shifted_clip_id = clip_id << 16;
    let shifted_blend_mode = blend_mode_id(blend_mode) << 4;
    let mut params = paint_type as u32;
    let packed_value = match value {
        SimplePaintValue::Color(rgba) => {
            params |= shifted_clip_id | shifted_blend_mode;
            rgba
        }
        SimplePaintValue::ColorRamp(location) => {
            let mut row = location.row;
            if location.is_complex() {
                // Complex gradient rows are offset after the simple ones.
                row += grad_layout.complex_offset_y;
            }
            params |= shifted_clip_id | shifted_blend_mode;
            ((row as f32 + 0.5) * grad_layout.inverse_height).to_bits()
        }
        SimplePaintValue::ImageOpacity(opacity) => {
            params |= shifted_clip_id | shifted_blend_mode;
            opacity.to_bits()
        }
        SimplePaintValue::ClipUpdate { outer_clip_id } => {
            params |= outer_clip_id << 16;
            // The payload is the replacement clip id for the clip buffer.
            shifted_clip_id
        }
    };
    if fill_rule == Fill::EvenOdd {
        params |= PAINT_FLAG_EVEN_ODD;
    }
    if has_clip_rect {
        params |= PAINT_FLAG_HAS_CLIP_RECT;
    }
    PaintRecord {
        params,
        value: packed_value,
    }
}

/// Packs the auxiliary paint record: paint matrix, gradient horizontal
/// span, and the clip rect inverse matrix with its feathering terms.
pub fn pack_paint_aux_record(
    view_matrix: &Transform,
    paint_type: PaintType,
    value: SimplePaintValue,
    gradient: Option<&Gradient>,
    clip_rect_inverse_matrix: Option<&ClipRectInverseMatrix>,
) -> PaintAuxRecord {
    let mut aux = PaintAuxRecord::default();

    match paint_type {
        PaintType::SolidColor | PaintType::ClipUpdate => {}
        PaintType::LinearGradient | PaintType::RadialGradient | PaintType::Image => {
            let mut paint_matrix = view_matrix.invert().unwrap_or(Transform::IDENTITY);
            if let Some(gradient) = gradient {
                let coeffs = gradient.coeffs();
                paint_matrix = match gradient.kind() {
                    GradientKind::Linear => {
                        // Row vector mapping a pixel to the gradient's
                        // interpolant t.
                        Transform {
                            matrix: [coeffs[0], 0.0, coeffs[1], 0.0],
                            translation: [coeffs[2], 0.0],
                        } * paint_matrix
                    }
                    GradientKind::Radial => {
                        let w = 1.0 / coeffs[2];
                        Transform {
                            matrix: [w, 0.0, 0.0, w],
                            translation: [-coeffs[0] * w, -coeffs[1] * w],
                        } * paint_matrix
                    }
                };
                let (left, right) = match value {
                    SimplePaintValue::ColorRamp(location) if !location.is_complex() => {
                        (location.col as f32, location.col as f32 + 2.0)
                    }
                    _ => (0.0, GRAD_TEXTURE_WIDTH as f32),
                };
                let inverse_width = 1.0 / GRAD_TEXTURE_WIDTH as f32;
                aux.grad_texture_horizontal_span =
                    [(right - left - 1.0) * inverse_width, (left + 0.5) * inverse_width];
            }
            aux.matrix[..4].copy_from_slice(&paint_matrix.matrix);
            aux.matrix[4..].copy_from_slice(&paint_matrix.translation);
        }
    }

    let clip_matrix = match clip_rect_inverse_matrix {
        Some(m) => *m.inverse(),
        None => *ClipRectInverseMatrix::wide_open().inverse(),
    };
    aux.clip_rect_inverse_matrix[..4].copy_from_slice(&clip_matrix.matrix);
    aux.clip_rect_inverse_matrix[4..].copy_from_slice(&clip_matrix.translation);
    if clip_rect_inverse_matrix.is_some() {
        let m = clip_matrix.matrix;
        aux.inverse_fwidth = [
            -1.0 / (m[0].abs() + m[2].abs()),
            -1.0 / (m[1].abs() + m[3].abs()),
        ];
    }
    aux
}

/// Uniforms for a single image rect or image mesh draw.
pub fn pack_image_draw_uniforms(
    matrix: &Transform,
    opacity: f32,
    clip_rect_inverse_matrix: Option<&ClipRectInverseMatrix>,
    clip_id: u32,
    blend_mode: Mix,
) -> ImageDrawUniforms {
    let mut uniforms = ImageDrawUniforms {
        opacity,
        clip_id,
        blend_mode: blend_mode_id(blend_mode),
        ..Default::default()
    };
    uniforms.matrix[..4].copy_from_slice(&matrix.matrix);
    uniforms.matrix[4..].copy_from_slice(&matrix.translation);
    let clip_matrix = match clip_rect_inverse_matrix {
        Some(m) => *m.inverse(),
        None => *ClipRectInverseMatrix::wide_open().inverse(),
    };
    uniforms.clip_rect_inverse_matrix[..4].copy_from_slice(&clip_matrix.matrix);
    uniforms.clip_rect_inverse_matrix[4..].copy_from_slice(&clip_matrix.translation);
    uniforms
}

#[cfg(test)]
mod tests {
    use super::*;
    use peniko::color::palette;

    fn layout() -> GradTextureLayout {
        GradTextureLayout {
            complex_offset_y: 4,
            inverse_height: 1.0 / 8.0,
        }
    }

    #[test]
    fn solid_color_params_pack_clip_and_blend() {
        let record = pack_paint_record(
            Fill::NonZero,
            PaintType::SolidColor,
            SimplePaintValue::Color(0x11223344),
            layout(),
            7,
            false,
            Mix::Multiply,
        );
        assert_eq!(record.params & 0xf, PaintType::SolidColor as u32);
        assert_eq!((record.params >> 4) & 0xf, blend_mode_id(Mix::Multiply));
        assert_eq!(record.params >> 16, 7);
        assert_eq!(record.value, 0x11223344);
    }

    #[test]
    fn even_odd_and_clip_rect_flags() {
        let record = pack_paint_record(
            Fill::EvenOdd,
            PaintType::SolidColor,
            SimplePaintValue::Color(0),
            layout(),
            0,
            true,
            Mix::Normal,
        );
        assert_ne!(record.params & PAINT_FLAG_EVEN_ODD, 0);
        assert_ne!(record.params & PAINT_FLAG_HAS_CLIP_RECT, 0);
    }

    #[test]
    fn complex_ramp_row_is_offset() {
        let record = pack_paint_record(
            Fill::NonZero,
            PaintType::LinearGradient,
            SimplePaintValue::ColorRamp(ColorRampLocation::complex(2)),
            layout(),
            0,
            false,
            Mix::Normal,
        );
        // Row 2 lands after the 4 simple rows: (6 + 0.5) / 8.
        assert_eq!(f32::from_bits(record.value), 6.5 / 8.0);
    }

    #[test]
    fn simple_ramp_spans_two_texels() {
        let gradient = Gradient::linear(
            [0.0, 0.0],
            [100.0, 0.0],
            &[
                peniko::ColorStop::from((0.0, palette::css::RED)),
                peniko::ColorStop::from((1.0, palette::css::BLUE)),
            ],
        );
        let aux = pack_paint_aux_record(
            &Transform::IDENTITY,
            PaintType::LinearGradient,
            SimplePaintValue::ColorRamp(ColorRampLocation { row: 0, col: 6 }),
            Some(&gradient),
            None,
        );
        let inverse_width = 1.0 / GRAD_TEXTURE_WIDTH as f32;
        assert_eq!(aux.grad_texture_horizontal_span[0], 1.0 * inverse_width);
        assert_eq!(aux.grad_texture_horizontal_span[1], 6.5 * inverse_width);
    }

    #[test]
    fn no_clip_rect_zeroes_feathering() {
        let aux = pack_paint_aux_record(
            &Transform::IDENTITY,
            PaintType::SolidColor,
            SimplePaintValue::Color(0),
            None,
            None,
        );
        assert_eq!(aux.inverse_fwidth, [0.0, 0.0]);
    }

    #[test]
    fn hsl_blend_needs_both_features() {
        let features = blend_mode_features(Mix::Hue);
        assert!(features.contains(ShaderFeatures::ENABLE_ADVANCED_BLEND));
        assert!(features.contains(ShaderFeatures::ENABLE_HSL_BLEND_MODES));
        assert_eq!(blend_mode_features(Mix::Normal), ShaderFeatures::NONE);
    }
}
