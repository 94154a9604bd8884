use std::collections::BTreeSet;

use crate::canvas::{TileKey, TiledTexture};
use crate::geometry::{IntRect, Rect, Vec2};
use crate::gpu::composite::premultiply;
use crate::gpu::{draw_fragments, CompositeOp, Pixel};

use super::dab::{DabRasterizer, StrokeContext, StrokeTarget};
use super::preset::PenPreset;
use super::waypoint::Waypoint;
use super::{pressure_size, round_coverage};

/// Upper bound on per-dab opacity so overlapping dabs never saturate in one step.
const MAX_DAB_OPACITY: f32 = 0.998;

/// One round dab of a batch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DabInstance {
    pub center: [f32; 2],
    pub radius: f32,
    pub softness: f32,
    pub alpha: f32,
}

impl DabInstance {
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.center[0], self.center[1])
    }

    /// Pixels the dab can touch.
    pub fn bounds(&self) -> IntRect {
        Rect::from_center_size(self.center(), 2.0 * self.radius + 2.0).int_bounding()
    }

    #[inline]
    pub fn coverage(&self, p: Vec2) -> f32 {
        round_coverage(self.radius, self.softness, p.distance(self.center()))
    }
}

/// Hard/soft round pen and eraser.
pub struct PenRasterizer {
    preset: PenPreset,
    color: Pixel,
}

impl PenRasterizer {
    /// `color` is straight alpha.
    pub fn new(preset: PenPreset, color: [f32; 4]) -> Self {
        let color = if preset.eraser { [0.0, 0.0, 0.0, 1.0] } else { premultiply(color) };
        Self { preset, color }
    }

    fn size(&self, w: &Waypoint) -> f32 {
        pressure_size(self.preset.width, self.preset.min_width_ratio, w.pressure)
    }

    /// Dab for `w`, or `None` when its size or spacing is unusable.
    pub fn dab(&self, w: &Waypoint) -> Option<DabInstance> {
        let size = self.size(w);
        let spacing = self.spacing(w);
        if !w.pos.is_finite() || !size.is_finite() || size <= 0.0 || !spacing.is_finite() {
            return None;
        }
        let opacity = self.preset.opacity.clamp(0.0, MAX_DAB_OPACITY);
        let alpha = 1.0 - (1.0 - opacity).powf(spacing / size);
        Some(DabInstance {
            center: [w.pos.x, w.pos.y],
            radius: size * 0.5,
            softness: self.preset.softness,
            alpha,
        })
    }

    fn op(&self, ctx: &StrokeContext) -> CompositeOp {
        if self.preset.eraser {
            CompositeOp::DstOut
        } else if ctx.preserve_opacity {
            CompositeOp::SrcAtop
        } else {
            CompositeOp::SrcOver
        }
    }
}

impl DabRasterizer for PenRasterizer {
    fn title(&self) -> &str {
        &self.preset.title
    }

    fn width(&self) -> f32 {
        self.preset.width
    }

    fn spacing(&self, w: &Waypoint) -> f32 {
        (self.size(w) * self.preset.spacing_ratio).max(1.0)
    }

    fn stabilizing_level(&self) -> u32 {
        self.preset.stabilizing_level
    }

    fn render_waypoints(
        &mut self,
        ctx: &StrokeContext,
        target: &mut StrokeTarget,
        waypoints: &[Waypoint],
        rect: IntRect,
    ) {
        let dabs: Vec<DabInstance> = waypoints.iter().filter_map(|w| self.dab(w)).collect();
        if dabs.is_empty() {
            return;
        }
        log::trace!("pen: {} dabs", dabs.len());

        // Only tiles some dab reaches, not the whole batch rect.
        let keys: BTreeSet<TileKey> = dabs
            .iter()
            .filter_map(|d| d.bounds().intersect(&rect))
            .flat_map(|r| TiledTexture::keys_for_rect(&r.to_rect()))
            .collect();

        let op = self.op(ctx);
        let color = self.color;
        for key in keys {
            let tile_rect = key.rect();
            let origin = key.origin();
            let touching: Vec<(&DabInstance, IntRect)> = dabs
                .iter()
                .filter_map(|d| d.bounds().intersect(&tile_rect).map(|area| (d, area)))
                .collect();
            let tile = target.prepare_tile(key);
            for (dab, area) in touching {
                let local = area.translate(-tile_rect.x0, -tile_rect.y0);
                draw_fragments(tile.texture_mut(), local, op, |p| {
                    let pos = p + origin;
                    let a = dab.coverage(pos)
                        * dab.alpha
                        * ctx.selection_alpha(pos.x.floor() as i32, pos.y.floor() as i32);
                    if a <= 0.0 {
                        return None;
                    }
                    Some(color.map(|c| c * a))
                });
            }
        }
    }
}
