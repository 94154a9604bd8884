// ============================================================================
// WATERCOLOR: paint that picks up the colors it is dragged through
// ============================================================================
//
// Each dab samples a power-of-two window around itself, averages the existing
// color under its footprint, and writes back a mix of that average, the
// original pixels and fresh pigment. The averages come from a mip reduction of
// a `2s × s` buffer holding the footprint mask (left) and the masked original
// (right) side by side.

use crate::canvas::TiledTexture;
use crate::geometry::{IntRect, Transform, Vec2};
use crate::gpu::composite::premultiply;
use crate::gpu::{draw_fragments, draw_texture, CompositeOp, DrawParams, Pixel, TexturePool, TRANSPARENT};

use super::dab::{DabRasterizer, StrokeContext, StrokeTarget};
use super::preset::WatercolorPreset;
use super::waypoint::Waypoint;
use super::{pressure_size, round_coverage};

/// Largest sample window edge.
const MAX_SAMPLE_SIZE: u32 = 2048;

/// Below this average footprint alpha there is nothing to pick up.
const MIN_SHAPE_ALPHA: f32 = 0.001;

/// Edge of the sampling window for a brush of `width`: the next power of two
/// at or above `width + 2`.
pub fn sample_size(width: f32) -> Option<u32> {
    let edge = width + 2.0;
    if !edge.is_finite() || edge <= 0.0 {
        return None;
    }
    let edge = edge.ceil().min(MAX_SAMPLE_SIZE as f32) as u32;
    Some(edge.next_power_of_two())
}

/// Average color under the footprint: the masked original average divided by
/// the footprint's average alpha.
pub fn mix_color(shape_average: Pixel, clip_average: Pixel) -> Pixel {
    let a = shape_average[3];
    if a < MIN_SHAPE_ALPHA {
        return TRANSPARENT;
    }
    clip_average.map(|c| c / a)
}

pub struct WatercolorRasterizer {
    preset: WatercolorPreset,
    pigment: Pixel,
    pool: TexturePool,
}

impl WatercolorRasterizer {
    /// `color` is straight alpha.
    pub fn new(preset: WatercolorPreset, color: [f32; 4]) -> Self {
        Self {
            preset,
            pigment: premultiply(color),
            pool: TexturePool::new(),
        }
    }

    pub fn pool(&self) -> &TexturePool {
        &self.pool
    }

    fn render_dab(&mut self, ctx: &StrokeContext, target: &mut StrokeTarget, w: &Waypoint) {
        let radius = pressure_size(self.preset.width, self.preset.min_width_ratio, w.pressure) * 0.5;
        if !w.pos.is_finite() || !radius.is_finite() || radius <= 0.0 {
            return;
        }
        let Some(s) = sample_size(self.preset.width) else { return };
        let half = (s / 2) as i32;
        let top_left = (w.pos.x.floor() as i32 - half, w.pos.y.floor() as i32 - half);
        let window = IntRect::new(top_left.0, top_left.1, top_left.0 + s as i32, top_left.1 + s as i32);
        let keys = TiledTexture::keys_for_rect(&window.to_rect());
        for &key in &keys {
            target.prepare_tile(key);
        }
        let origin = Vec2::new(top_left.0 as f32, top_left.1 as f32);

        let mut original = self.pool.acquire(s, s);
        target
            .scratch()
            .draw_into(&mut original, &Transform::IDENTITY, CompositeOp::Src, Vec2::ZERO - origin);

        // Footprint mask on the left, masked original on the right.
        let mut shape_clip = self.pool.acquire(2 * s, s);
        let softness = self.preset.softness;
        let center = w.pos;
        let sf = s as f32;
        draw_fragments(&mut shape_clip, IntRect::from_size(2 * s, s), CompositeOp::Src, |p| {
            let local = if p.x < sf { p } else { Vec2::new(p.x - sf, p.y) };
            let pos = local + origin;
            let coverage = round_coverage(radius, softness, pos.distance(center));
            let orig = original.pixel(local.x as i32, local.y as i32);
            if p.x < sf {
                let mut clip = 1.0;
                if ctx.preserve_opacity {
                    clip *= orig[3];
                }
                clip *= ctx.selection_alpha(pos.x.floor() as i32, pos.y.floor() as i32);
                Some([coverage * clip; 4])
            } else {
                Some(orig.map(|c| c * coverage))
            }
        });
        let averages = shape_clip.mip_level(s.trailing_zeros());
        let mix = mix_color(averages.pixel(0, 0), averages.pixel(1, 0));

        let mut out = self.pool.acquire(s, s);
        let strength = self.preset.opacity * w.pressure;
        let blending = self.preset.blending;
        let pigment = self.pigment.map(|c| c * self.preset.thickness);
        let preserve = ctx.preserve_opacity;
        draw_fragments(&mut out, IntRect::from_size(s, s), CompositeOp::Src, |p| {
            let (x, y) = (p.x as i32, p.y as i32);
            let orig = original.pixel(x, y);
            let opacity = shape_clip.pixel(x, y)[3] * strength;
            let mix_rate = opacity * blending;
            let add = pigment.map(|c| c * opacity);
            let mut px = TRANSPARENT;
            for i in 0..4 {
                let m = if preserve { mix[i] * orig[3] } else { mix[i] };
                let color = orig[i] + (m - orig[i]) * mix_rate;
                px[i] = add[i] + color * (1.0 - add[3]);
            }
            Some(px)
        });

        for key in keys {
            let tile = target.prepare_tile(key);
            let params = DrawParams {
                op: CompositeOp::Src,
                transform: Transform::translate(origin - key.origin()),
                ..Default::default()
            };
            draw_texture(tile.texture_mut(), &out, &params);
        }

        self.pool.release(original);
        self.pool.release(shape_clip);
        self.pool.release(out);
    }
}

impl DabRasterizer for WatercolorRasterizer {
    fn title(&self) -> &str {
        &self.preset.title
    }

    fn width(&self) -> f32 {
        self.preset.width
    }

    fn spacing(&self, w: &Waypoint) -> f32 {
        let size = pressure_size(self.preset.width, self.preset.min_width_ratio, w.pressure);
        (size * self.preset.spacing_ratio).max(1.0)
    }

    fn render_waypoints(
        &mut self,
        ctx: &StrokeContext,
        target: &mut StrokeTarget,
        waypoints: &[Waypoint],
        _rect: IntRect,
    ) {
        for w in waypoints {
            self.render_dab(ctx, target, w);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{Tile, TileKey};
    use crate::gpu::Texture;

    fn dab(raster: &mut WatercolorRasterizer, ctx: &StrokeContext, layer: &TiledTexture, pos: Vec2) -> TiledTexture {
        let mut scratch = TiledTexture::new();
        let mut target = StrokeTarget::new(layer, &mut scratch);
        let w = Waypoint::new(pos, 1.0);
        raster.render_waypoints(ctx, &mut target, &[w], IntRect::default());
        scratch
    }

    #[test]
    fn sample_size_is_power_of_two() {
        assert_eq!(sample_size(10.0), Some(16));
        assert_eq!(sample_size(14.0), Some(16));
        assert_eq!(sample_size(14.5), Some(32));
        assert_eq!(sample_size(f32::NAN), None);
        assert_eq!(sample_size(3.0e9), Some(MAX_SAMPLE_SIZE));
        assert_eq!(sample_size(f32::MAX), Some(MAX_SAMPLE_SIZE));
    }

    #[test]
    fn empty_footprint_mixes_to_transparent() {
        let mix = mix_color([0.0005; 4], [0.2, 0.1, 0.0, 0.3]);
        assert_eq!(mix, TRANSPARENT);
        let mix = mix_color([0.5; 4], [0.2, 0.1, 0.0, 0.25]);
        assert!((mix[3] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn preserve_opacity_on_empty_layer_stays_empty() {
        let mut raster = WatercolorRasterizer::new(WatercolorPreset::default(), [1.0, 0.0, 0.0, 1.0]);
        let ctx = StrokeContext { preserve_opacity: true, selection: None };
        let out = dab(&mut raster, &ctx, &TiledTexture::new(), Vec2::new(32.0, 32.0));

        let tile = out.get(TileKey::new(0, 0)).unwrap();
        assert!(tile.texture().pixels().iter().all(|p| p.iter().all(|c| c.is_finite())));
        assert!(tile.is_transparent());
    }

    #[test]
    fn pigment_is_deposited_on_empty_layer() {
        let mut raster = WatercolorRasterizer::new(WatercolorPreset::default(), [0.0, 0.0, 1.0, 1.0]);
        let ctx = StrokeContext { preserve_opacity: false, selection: None };
        let out = dab(&mut raster, &ctx, &TiledTexture::new(), Vec2::new(32.0, 32.0));

        let center = out.get(TileKey::new(0, 0)).unwrap().pixel(32, 32);
        assert!((center[3] - 0.5).abs() < 1e-4, "alpha {}", center[3]);
        assert!((center[2] - 0.5).abs() < 1e-4);
        assert_eq!(out.get(TileKey::new(0, 0)).unwrap().pixel(50, 32), TRANSPARENT);
        assert_eq!(raster.pool().pooled_count(), 3);
    }

    #[test]
    fn existing_color_is_picked_up() {
        let mut layer = TiledTexture::new();
        let red = [1.0, 0.0, 0.0, 1.0];
        layer.set(TileKey::new(0, 0), Tile::from_texture(Texture::filled(256, 256, red)).unwrap());
        let preset = WatercolorPreset { thickness: 0.0, blending: 1.0, ..WatercolorPreset::default() };
        let mut raster = WatercolorRasterizer::new(preset, [0.0, 0.0, 1.0, 1.0]);
        let ctx = StrokeContext { preserve_opacity: false, selection: None };
        let out = dab(&mut raster, &ctx, &layer, Vec2::new(100.0, 100.0));

        let p = out.get(TileKey::new(0, 0)).unwrap().pixel(100, 100);
        for (c, e) in p.iter().zip(red) {
            assert!((c - e).abs() < 1e-4);
        }
    }
}
