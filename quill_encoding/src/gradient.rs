// Copyright 2024 the Quill Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Packing of color ramps into the shared gradient texture.
//!
//! The texture has a fixed width and is rebuilt every flush. Simple
//! two-stop ramps occupy pairs of texels in the bottom rows and are copied
//! in from an upload buffer; complex ramps each own a full row, rendered by
//! the color-ramp pipeline as instanced [`GradientSpan`] quads. When a
//! flush needs more rows than the texture can hold, allocation fails and
//! the caller splits the flush.

use std::collections::HashMap;
use std::sync::Arc;

use peniko::color::Srgb;
use peniko::ColorStop;

use crate::gpu::{GradientSpan, TwoTexelRamp, GRAD_TEXTURE_WIDTH};
use crate::paint::{pack_color, ColorRampLocation};

/// Tallest gradient texture any backend is required to support.
pub const MAX_GRAD_TEXTURE_HEIGHT: u32 = 2048;

/// Simple ramps are two texels wide, so each row fits this many.
const SIMPLE_RAMPS_PER_ROW: u32 = GRAD_TEXTURE_WIDTH / 2;

/// Where the gradient rows ended up for one flush, needed when packing
/// paint records.
#[derive(Copy, Clone, Debug, Default)]
pub struct GradTextureLayout {
    /// Complex rows are stacked after the simple rows.
    pub complex_offset_y: u32,
    /// `1 / texture_height` for this flush.
    pub inverse_height: f32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GradientKind {
    Linear,
    Radial,
}

/// A color ramp plus the coefficients that map a pixel to its interpolant.
#[derive(Clone, Debug)]
pub struct Gradient {
    kind: GradientKind,
    coeffs: [f32; 3],
    stops: Vec<ColorStop>,
}

impl Gradient {
    pub fn linear(from: [f32; 2], to: [f32; 2], stops: &[ColorStop]) -> Self {
        let dx = to[0] - from[0];
        let dy = to[1] - from[1];
        let len_squared = (dx * dx + dy * dy).max(f32::EPSILON);
        let a = dx / len_squared;
        let b = dy / len_squared;
        Self {
            kind: GradientKind::Linear,
            coeffs: [a, b, -(a * from[0] + b * from[1])],
            stops: normalize_stops(stops),
        }
    }

    pub fn radial(center: [f32; 2], radius: f32, stops: &[ColorStop]) -> Self {
        Self {
            kind: GradientKind::Radial,
            coeffs: [center[0], center[1], radius.max(f32::EPSILON)],
            stops: normalize_stops(stops),
        }
    }

    pub fn kind(&self) -> GradientKind {
        self.kind
    }

    pub fn coeffs(&self) -> &[f32; 3] {
        &self.coeffs
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// A ramp is simple when two texels can represent it exactly.
    pub fn is_simple(&self) -> bool {
        self.stops.len() == 2 && self.stops[0].offset == 0.0 && self.stops[1].offset == 1.0
    }

    /// Number of instanced spans a complex ramp renders: one per stop
    /// interval, plus flat runs from each texture edge to the outermost
    /// stops.
    pub fn complex_span_count(&self) -> usize {
        debug_assert!(!self.is_simple());
        self.stops.len() + 1
    }
}

fn normalize_stops(stops: &[ColorStop]) -> Vec<ColorStop> {
    debug_assert!(!stops.is_empty());
    let mut out = stops.to_vec();
    out.sort_by(|a, b| a.offset.total_cmp(&b.offset));
    for stop in &mut out {
        stop.offset = stop.offset.clamp(0.0, 1.0);
    }
    out
}

fn stop_key(stop: &ColorStop) -> (u32, u32) {
    (
        stop.offset.to_bits(),
        pack_color(stop.color.to_alpha_color::<Srgb>()),
    )
}

/// Per-flush allocator for gradient texture rows.
#[derive(Default)]
pub struct GradientCache {
    map: HashMap<Vec<(u32, u32)>, ColorRampLocation>,
    simple_ramps: Vec<TwoTexelRamp>,
    complex: Vec<Arc<Gradient>>,
}

impl GradientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves texture space for `gradient`, or returns `None` when the
    /// texture is out of rows and the flush must be split. Identical stop
    /// lists share their reservation; the second field is the number of
    /// complex spans this call newly reserved (0 on a cache hit or for a
    /// simple ramp).
    pub fn allocate(&mut self, gradient: &Arc<Gradient>) -> Option<(ColorRampLocation, usize)> {
        let key: Vec<_> = gradient.stops().iter().map(stop_key).collect();
        if let Some(location) = self.map.get(&key) {
            return Some((*location, 0));
        }
        let mut new_span_count = 0;
        let location = if gradient.is_simple() {
            let idx = self.simple_ramps.len() as u32;
            let candidate = ColorRampLocation {
                row: idx / SIMPLE_RAMPS_PER_ROW,
                col: (idx % SIMPLE_RAMPS_PER_ROW) * 2,
            };
            if self.height_with(candidate.row + 1, self.complex.len() as u32)
                > MAX_GRAD_TEXTURE_HEIGHT
            {
                return None;
            }
            self.simple_ramps.push(TwoTexelRamp {
                color0: pack_color(gradient.stops()[0].color.to_alpha_color::<Srgb>())
                    .to_le_bytes(),
                color1: pack_color(gradient.stops()[1].color.to_alpha_color::<Srgb>())
                    .to_le_bytes(),
            });
            candidate
        } else {
            let row = self.complex.len() as u32;
            if self.height_with(self.simple_ramp_rows(), row + 1) > MAX_GRAD_TEXTURE_HEIGHT {
                return None;
            }
            self.complex.push(gradient.clone());
            new_span_count = gradient.complex_span_count();
            ColorRampLocation::complex(row)
        };
        self.map.insert(key, location);
        Some((location, new_span_count))
    }

    fn height_with(&self, simple_rows: u32, complex_rows: u32) -> u32 {
        simple_rows + complex_rows
    }

    /// Rows occupied by simple two-texel ramps.
    pub fn simple_ramp_rows(&self) -> u32 {
        (self.simple_ramps.len() as u32).div_ceil(SIMPLE_RAMPS_PER_ROW)
    }

    /// Texel extent of the packed simple ramps, for the buffer-to-texture
    /// copy.
    pub fn simple_grad_texels_extent(&self) -> (u32, u32) {
        if self.simple_ramps.is_empty() {
            return (0, 0);
        }
        let width = (self.simple_ramps.len() as u32 * 2).min(GRAD_TEXTURE_WIDTH);
        (width, self.simple_ramp_rows())
    }

    pub fn complex_rows_height(&self) -> u32 {
        self.complex.len() as u32
    }

    /// Total texture height this flush needs.
    pub fn texture_height(&self) -> u32 {
        (self.simple_ramp_rows() + self.complex_rows_height()).max(1)
    }

    pub fn layout(&self) -> GradTextureLayout {
        GradTextureLayout {
            complex_offset_y: self.simple_ramp_rows(),
            inverse_height: 1.0 / self.texture_height() as f32,
        }
    }

    pub fn simple_ramps(&self) -> &[TwoTexelRamp] {
        &self.simple_ramps
    }

    /// Appends the instanced spans that render every complex row. Span rows
    /// are relative to `complex_grad_rows_top`.
    pub fn write_grad_spans(&self, out: &mut Vec<GradientSpan>) -> usize {
        let start = out.len();
        for (row, gradient) in self.complex.iter().enumerate() {
            let stops = gradient.stops();
            let y = row as u32;
            let first = pack_color(stops[0].color.to_alpha_color::<Srgb>());
            let last = pack_color(stops[stops.len() - 1].color.to_alpha_color::<Srgb>());
            // Flat run from the left edge to the first stop.
            out.push(GradientSpan::new(0.0, stops[0].offset, y, first, first));
            for pair in stops.windows(2) {
                out.push(GradientSpan::new(
                    pair[0].offset,
                    pair[1].offset,
                    y,
                    pack_color(pair[0].color.to_alpha_color::<Srgb>()),
                    pack_color(pair[1].color.to_alpha_color::<Srgb>()),
                ));
            }
            // Flat run from the last stop to the right edge.
            out.push(GradientSpan::new(
                stops[stops.len() - 1].offset,
                1.0,
                y,
                last,
                last,
            ));
        }
        out.len() - start
    }

    /// Discards all reservations; called after a flush (including a partial
    /// flush, which is what makes the retry succeed).
    pub fn reset(&mut self) {
        self.map.clear();
        self.simple_ramps.clear();
        self.complex.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peniko::color::palette;

    fn two_stop() -> Arc<Gradient> {
        Arc::new(Gradient::linear(
            [0.0, 0.0],
            [1.0, 0.0],
            &[
                ColorStop::from((0.0, palette::css::RED)),
                ColorStop::from((1.0, palette::css::BLUE)),
            ],
        ))
    }

    fn three_stop(offset: f32) -> Arc<Gradient> {
        Arc::new(Gradient::linear(
            [0.0, 0.0],
            [1.0, 0.0],
            &[
                ColorStop::from((0.0, palette::css::RED)),
                ColorStop::from((offset, palette::css::LIME)),
                ColorStop::from((1.0, palette::css::BLUE)),
            ],
        ))
    }

    #[test]
    fn two_stop_ramp_is_simple() {
        assert!(two_stop().is_simple());
        assert!(!three_stop(0.5).is_simple());
    }

    #[test]
    fn identical_stops_share_a_reservation() {
        let mut cache = GradientCache::new();
        let (a, a_spans) = cache.allocate(&three_stop(0.5)).unwrap();
        let (b, b_spans) = cache.allocate(&three_stop(0.5)).unwrap();
        assert_eq!(a_spans, 4);
        assert_eq!(b_spans, 0);
        assert_eq!(a, b);
        assert_eq!(cache.complex_rows_height(), 1);

        let (c, _) = cache.allocate(&three_stop(0.25)).unwrap();
        assert_ne!(a, c);
        assert_eq!(cache.complex_rows_height(), 2);
    }

    #[test]
    fn simple_ramps_pack_two_texels_per_slot() {
        let mut cache = GradientCache::new();
        let (location, spans) = cache.allocate(&two_stop()).unwrap();
        assert_eq!(spans, 0);
        assert_eq!(location.row, 0);
        assert_eq!(location.col, 0);
        assert!(!location.is_complex());
        assert_eq!(cache.simple_ramp_rows(), 1);
        assert_eq!(cache.simple_grad_texels_extent(), (2, 1));
    }

    #[test]
    fn complex_rows_stack_after_simple_rows() {
        let mut cache = GradientCache::new();
        cache.allocate(&two_stop()).unwrap();
        cache.allocate(&three_stop(0.5)).unwrap();
        let layout = cache.layout();
        assert_eq!(layout.complex_offset_y, 1);
        assert_eq!(cache.texture_height(), 2);
    }

    #[test]
    fn span_count_matches_complex_span_count() {
        let mut cache = GradientCache::new();
        let gradient = three_stop(0.5);
        cache.allocate(&gradient).unwrap();
        let mut spans = Vec::new();
        let written = cache.write_grad_spans(&mut spans);
        assert_eq!(written, gradient.complex_span_count());
        // Lead-in, two stop intervals, lead-out.
        assert_eq!(spans.len(), 4);
        assert!(spans.iter().all(|s| s.y == 0));
    }

    #[test]
    fn allocation_fails_when_texture_is_full_and_reset_recovers() {
        let mut cache = GradientCache::new();
        let mut last = None;
        for i in 0..MAX_GRAD_TEXTURE_HEIGHT {
            let offset = 0.25 + (i as f32 / MAX_GRAD_TEXTURE_HEIGHT as f32) * 0.5;
            last = cache.allocate(&three_stop(offset));
            assert!(last.is_some(), "row {i} should fit");
        }
        assert_eq!(last.unwrap().0.row, MAX_GRAD_TEXTURE_HEIGHT - 1);
        // The texture is now full; the next distinct ramp must spill.
        assert!(cache.allocate(&three_stop(0.001)).is_none());
        // But a repeated ramp still shares its row.
        let offset = 0.25 + ((MAX_GRAD_TEXTURE_HEIGHT - 1) as f32
            / MAX_GRAD_TEXTURE_HEIGHT as f32)
            * 0.5;
        assert!(cache.allocate(&three_stop(offset)).is_some());
        // A partial flush resets the row cursor and the retry succeeds.
        cache.reset();
        assert_eq!(cache.allocate(&three_stop(0.001)).unwrap().0.row, 0);
    }
}
