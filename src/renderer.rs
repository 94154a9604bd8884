// ============================================================================
// RENDERER: dirty-region compositing into display tiles
// ============================================================================

use image::RgbaImage;

use crate::canvas::{TileKey, TiledTexture};
use crate::compositor::{LayerBlender, TileOverride, TileOverrideProvider};
use crate::error::Result;
use crate::geometry::{IntRect, Transform};
use crate::gpu::{composite::composite, CompositeOp, RedrawScheduler};
use crate::layer::{Layer, LayerId};
use crate::picture::{transform_texture, Picture};

/// Keeps a composited copy of the picture up to date, one coalesced dirty
/// region per frame.
pub struct Renderer {
    blender: LayerBlender,
    scheduler: RedrawScheduler,
    display: TiledTexture,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            blender: LayerBlender::new(),
            scheduler: RedrawScheduler::new(),
            display: TiledTexture::new(),
        }
    }

    pub fn scheduler(&self) -> &RedrawScheduler {
        &self.scheduler
    }

    /// Stroke renderers post their dirty rects here.
    pub fn scheduler_mut(&mut self) -> &mut RedrawScheduler {
        &mut self.scheduler
    }

    pub fn request_redraw(&mut self, rect: IntRect) {
        self.scheduler.request(rect);
    }

    pub fn display(&self) -> &TiledTexture {
        &self.display
    }

    /// Composite the pending region, clipped to the picture. Returns the
    /// region that was redrawn, or `None` when nothing was pending.
    pub fn render_frame(&mut self, picture: &Picture, overrides: &dyn TileOverrideProvider) -> Option<IntRect> {
        let rect = self.scheduler.take_frame()?;
        let rect = rect.intersect(&picture.bounds())?;
        self.render_rect(picture, rect, overrides);
        Some(rect)
    }

    /// Redraw the whole picture, dropping anything pending.
    pub fn render_all(&mut self, picture: &Picture, overrides: &dyn TileOverrideProvider) -> IntRect {
        self.scheduler.take_frame();
        let rect = picture.bounds();
        self.display.clear();
        if !rect.is_empty() {
            self.render_rect(picture, rect, overrides);
        }
        rect
    }

    fn render_rect(&mut self, picture: &Picture, rect: IntRect, overrides: &dyn TileOverrideProvider) {
        let layers = picture.root().children();
        let keys = TiledTexture::keys_for_rect(&rect.to_rect());
        for &key in &keys {
            let tile_rect = key.rect();
            let Some(area) = rect.intersect(&tile_rect) else { continue };
            let scissor = area.translate(-tile_rect.x0, -tile_rect.y0);
            self.blender.blend_tile(layers, key, Some(scissor), overrides);
            let tile = self.display.get_or_create_mut(key);
            composite(tile.texture_mut(), self.blender.blended_tile(), CompositeOp::Src, 1.0, Some(scissor));
        }
        log::trace!("rendered {:?} over {} tiles", rect, keys.len());
    }

    /// Straight 8-bit RGBA of the display in `rect`.
    pub fn readback(&self, rect: IntRect) -> RgbaImage {
        self.display.to_rgba_image(rect)
    }
}

// ============================================================================
// TRANSFORM PREVIEW: a layer shown under a live transform
// ============================================================================

/// Shows one image layer resampled under a transform without touching it.
pub struct TransformPreview {
    layer: LayerId,
    transform: Transform,
    tiles: TiledTexture,
    bounds: IntRect,
}

impl TransformPreview {
    /// `None` when `layer` is a group.
    pub fn new(layer: &Layer, transform: Transform) -> Option<Self> {
        let source = layer.texture()?;
        let tiles = transform_texture(source, &transform);
        let before = source.bounding_rect().unwrap_or_default();
        let after = tiles.bounding_rect().unwrap_or_default();
        Some(Self { layer: layer.id, transform, tiles, bounds: before.union(&after) })
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Pixels that differ from the untransformed layer.
    pub fn bounds(&self) -> Option<IntRect> {
        if self.bounds.is_empty() { None } else { Some(self.bounds) }
    }

    /// Apply the transform to the picture as one undo step.
    pub fn commit(self, picture: &mut Picture) -> Result<()> {
        picture.transform_layer(self.layer, &self.transform)
    }
}

impl TileOverrideProvider for TransformPreview {
    fn override_tile(&self, layer: &Layer, key: TileKey) -> TileOverride<'_> {
        if layer.id != self.layer {
            return TileOverride::Keep;
        }
        match self.tiles.get(key) {
            Some(tile) => TileOverride::Replace(tile),
            None => TileOverride::Hide,
        }
    }
}
