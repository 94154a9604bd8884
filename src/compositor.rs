// ============================================================================
// LAYER COMPOSITOR: recursive per-tile blending of the layer tree
// ============================================================================
//
// One `TileBlender` per tree depth.  Each holds a double-buffered tile pair
// (non-normal modes read "previous" and write "current") and a clip base
// snapshot for clipping runs.  Children are stored top-most first, so a
// depth is blended by walking its children from the last index to the first.

use rayon::prelude::*;

use crate::blend::{BlendMode, ClipStage};
use crate::canvas::{Tile, TileKey, TiledTexture, TILE_SIZE};
use crate::geometry::IntRect;
use crate::gpu::{composite, CompositeOp, Texture};
use crate::layer::{Layer, LayerContent};

/// Result of the preview-override hook for one layer and tile.
#[derive(Clone, Copy, Debug)]
pub enum TileOverride<'a> {
    /// Use the layer's own content.
    Keep,
    /// Use this tile instead of the layer's content.
    Replace(&'a Tile),
    /// Treat the layer as empty at this tile.
    Hide,
}

/// Injected strategy that can substitute a layer's tile for one blend pass.
pub trait TileOverrideProvider {
    fn override_tile(&self, layer: &Layer, key: TileKey) -> TileOverride<'_>;
}

/// Provider that never overrides anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOverride;

impl TileOverrideProvider for NoOverride {
    fn override_tile(&self, _layer: &Layer, _key: TileKey) -> TileOverride<'_> {
        TileOverride::Keep
    }
}

// ============================================================================
// TILE BLENDER: accumulator for one depth
// ============================================================================

#[derive(Debug)]
struct TileBlender {
    tiles: [Texture; 2],
    clip_base: Texture,
    clipping: bool,
    current: usize,
    scissor: Option<IntRect>,
}

impl TileBlender {
    fn new() -> Self {
        Self {
            tiles: [Texture::new(TILE_SIZE, TILE_SIZE), Texture::new(TILE_SIZE, TILE_SIZE)],
            clip_base: Texture::new(TILE_SIZE, TILE_SIZE),
            clipping: false,
            current: 0,
            scissor: None,
        }
    }

    fn current(&self) -> &Texture {
        &self.tiles[self.current]
    }

    fn current_mut(&mut self) -> &mut Texture {
        &mut self.tiles[self.current]
    }

    /// Start a new pass: clear the accumulator and leave any clipping mode.
    fn reset(&mut self, scissor: Option<IntRect>) {
        self.scissor = scissor;
        self.clipping = false;
        let scissor = self.scissor;
        self.current_mut().clear(scissor);
    }

    fn blend(&mut self, src: Option<&Texture>, layer: &Layer, next_clipping: bool) {
        let start_clipping = !layer.clipping_group && next_clipping;
        let end_clipping = layer.clipping_group && !next_clipping && self.clipping;
        let scissor = self.scissor;

        if start_clipping {
            self.clipping = true;
            let (tiles, base) = (&self.tiles, &mut self.clip_base);
            base.copy_from(&tiles[self.current], scissor);
        }

        match src {
            Some(src) if layer.blend_mode == BlendMode::Normal => {
                let op = if start_clipping {
                    CompositeOp::Src
                } else if self.clipping {
                    CompositeOp::SrcAtop
                } else {
                    CompositeOp::SrcOver
                };
                composite::composite(self.current_mut(), src, op, layer.opacity(), scissor);
            }
            Some(src) => {
                let stage = if start_clipping {
                    ClipStage::Base
                } else if self.clipping {
                    ClipStage::Clipped
                } else {
                    ClipStage::Unclipped
                };
                self.current = 1 - self.current;
                let [a, b] = &mut self.tiles;
                let (out, dst) = if self.current == 0 { (a, &*b) } else { (b, &*a) };
                blend_mode_pass(out, src, dst, layer.blend_mode, layer.opacity(), stage, scissor);
            }
            None => {
                if start_clipping {
                    self.current_mut().clear(scissor);
                }
            }
        }

        if end_clipping {
            self.clipping = false;
            let current = &mut self.tiles[self.current];
            composite::composite(current, &self.clip_base, CompositeOp::DstOver, 1.0, scissor);
        }
    }
}

/// `out = mode(src · opacity, dst)` over the scissor rect.
fn blend_mode_pass(
    out: &mut Texture,
    src: &Texture,
    dst: &Texture,
    mode: BlendMode,
    opacity: f32,
    stage: ClipStage,
    scissor: Option<IntRect>,
) {
    let Some(r) = out.clip(scissor) else { return };
    let width = out.width() as usize;
    let (src, dst) = (src.pixels(), dst.pixels());

    out.pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .skip(r.y0 as usize)
        .take(r.height() as usize)
        .for_each(|(y, row)| {
            let base = y * width;
            for x in r.x0 as usize..r.x1 as usize {
                let s = src[base + x].map(|c| c * opacity);
                row[x] = mode.blend_pixel(s, dst[base + x], stage);
            }
        });
}

// ============================================================================
// LAYER BLENDER
// ============================================================================

/// What a layer contributes to one tile.
enum Contribution<'a> {
    Nothing,
    Tile(&'a Texture),
    /// The result of the child depth's pass.
    Group,
}

#[derive(Debug)]
pub struct LayerBlender {
    blenders: Vec<TileBlender>,
}

impl Default for LayerBlender {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerBlender {
    pub fn new() -> Self {
        Self { blenders: vec![TileBlender::new()] }
    }

    /// Result of the last `blend_tile` call.
    pub fn blended_tile(&self) -> &Texture {
        self.blenders[0].current()
    }

    /// Composite `layers` (top-most first) at `key`, restricted to the
    /// tile-local `scissor`. Returns whether any layer contributed pixels;
    /// the result is read with `blended_tile`.
    pub fn blend_tile(
        &mut self,
        layers: &[Layer],
        key: TileKey,
        scissor: Option<IntRect>,
        overrides: &dyn TileOverrideProvider,
    ) -> bool {
        self.blend_layers(layers, key, scissor, 0, overrides)
    }

    /// Flatten `layers` into a standalone tiled texture over the union of
    /// every key any image layer in the subset touches.
    pub fn blend_to_tiled_texture(&mut self, layers: &[Layer], overrides: &dyn TileOverrideProvider) -> TiledTexture {
        let textures: Vec<&TiledTexture> = layers.iter().flat_map(|l| l.textures()).collect();
        let keys = TiledTexture::union_keys(&textures);
        let mut out = TiledTexture::new();
        for key in keys {
            if self.blend_tile(layers, key, None, overrides) {
                if let Some(tile) = Tile::from_texture(self.blended_tile().clone()) {
                    out.set(key, tile);
                }
            }
        }
        out.prune_empty();
        log::debug!("flattened {} layers into {} tiles", layers.len(), out.len());
        out
    }

    fn blend_layers(
        &mut self,
        layers: &[Layer],
        key: TileKey,
        scissor: Option<IntRect>,
        depth: usize,
        overrides: &dyn TileOverrideProvider,
    ) -> bool {
        while self.blenders.len() <= depth {
            self.blenders.push(TileBlender::new());
        }
        self.blenders[depth].reset(scissor);

        let mut rendered = false;
        for i in (0..layers.len()).rev() {
            let next_clipping = i > 0 && layers[i - 1].clipping_group;
            rendered |= self.blend_layer(&layers[i], next_clipping, key, scissor, depth, overrides);
        }
        rendered
    }

    fn blend_layer(
        &mut self,
        layer: &Layer,
        next_clipping: bool,
        key: TileKey,
        scissor: Option<IntRect>,
        depth: usize,
        overrides: &dyn TileOverrideProvider,
    ) -> bool {
        let contribution = if !layer.visible {
            Contribution::Nothing
        } else {
            match overrides.override_tile(layer, key) {
                TileOverride::Hide => Contribution::Nothing,
                TileOverride::Replace(tile) => Contribution::Tile(tile.texture()),
                TileOverride::Keep => match &layer.content {
                    LayerContent::Image(texture) => match texture.get(key) {
                        Some(tile) => Contribution::Tile(tile.texture()),
                        None => Contribution::Nothing,
                    },
                    LayerContent::Group(children) => {
                        if self.blend_layers(children, key, scissor, depth + 1, overrides) {
                            Contribution::Group
                        } else {
                            Contribution::Nothing
                        }
                    }
                },
            }
        };

        let (lower, upper) = self.blenders.split_at_mut(depth + 1);
        let blender = &mut lower[depth];
        match contribution {
            Contribution::Nothing => {
                blender.blend(None, layer, next_clipping);
                false
            }
            Contribution::Tile(tile) => {
                blender.blend(Some(tile), layer, next_clipping);
                true
            }
            Contribution::Group => {
                blender.blend(Some(upper[0].current()), layer, next_clipping);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Pixel, TRANSPARENT};

    fn solid_layer(name: &str, rect: IntRect, color: Pixel) -> Layer {
        let mut tex = TiledTexture::new();
        let tile = tex.get_or_create_mut(TileKey::new(0, 0));
        for y in rect.y0..rect.y1 {
            for x in rect.x0..rect.x1 {
                tile.texture_mut().set_pixel(x as u32, y as u32, color);
            }
        }
        Layer::with_texture(name, tex)
    }

    fn close(a: Pixel, b: Pixel) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    const KEY: TileKey = TileKey::new(0, 0);
    const FULL: IntRect = IntRect::from_size(TILE_SIZE, TILE_SIZE);

    #[test]
    fn single_opaque_layer_is_reproduced_exactly() {
        let layer = solid_layer("a", IntRect::new(10, 10, 50, 60), [0.2, 0.4, 0.6, 1.0]);
        let expected = layer.texture().unwrap().get(KEY).unwrap().texture().clone();
        let mut blender = LayerBlender::new();
        assert!(blender.blend_tile(std::slice::from_ref(&layer), KEY, None, &NoOverride));
        assert_eq!(blender.blended_tile(), &expected);
    }

    #[test]
    fn multiply_is_color_commutative() {
        let a = [0.9, 0.5, 0.1, 1.0];
        let b = [0.2, 0.6, 0.8, 1.0];
        let mut top_a = solid_layer("a", FULL, a);
        top_a.blend_mode = BlendMode::Multiply;
        let mut top_b = solid_layer("b", FULL, b);
        top_b.blend_mode = BlendMode::Multiply;

        let mut blender = LayerBlender::new();
        blender.blend_tile(&[top_a.clone(), solid_layer("b", FULL, b)], KEY, None, &NoOverride);
        let ab = blender.blended_tile().pixel(5, 5);
        blender.blend_tile(&[top_b, solid_layer("a", FULL, a)], KEY, None, &NoOverride);
        let ba = blender.blended_tile().pixel(5, 5);
        assert!(close(ab, ba));

        // Source-over of half-transparent layers is order-dependent.
        let ha = [0.45, 0.25, 0.05, 0.5];
        let hb = [0.1, 0.3, 0.4, 0.5];
        blender.blend_tile(&[solid_layer("a", FULL, ha), solid_layer("b", FULL, hb)], KEY, None, &NoOverride);
        let over_ab = blender.blended_tile().pixel(5, 5);
        blender.blend_tile(&[solid_layer("b", FULL, hb), solid_layer("a", FULL, ha)], KEY, None, &NoOverride);
        let over_ba = blender.blended_tile().pixel(5, 5);
        assert!(!close(over_ab, over_ba));
    }

    #[test]
    fn clipping_run_is_masked_by_its_base() {
        let background = solid_layer("bg", FULL, [0.0, 0.0, 1.0, 1.0]);
        let base = solid_layer("base", IntRect::new(0, 0, 100, 100), [0.0, 1.0, 0.0, 1.0]);
        let mut clipped = solid_layer("clipped", IntRect::new(50, 50, 150, 150), [1.0, 0.0, 0.0, 1.0]);
        clipped.clipping_group = true;

        let mut blender = LayerBlender::new();
        blender.blend_tile(&[clipped, base, background], KEY, None, &NoOverride);
        let out = blender.blended_tile();
        // Inside base coverage: clipped layer paints normally.
        assert!(close(out.pixel(75, 75), [1.0, 0.0, 0.0, 1.0]));
        // Outside base coverage: clipped layer is excluded.
        assert!(close(out.pixel(120, 120), [0.0, 0.0, 1.0, 1.0]));
        // Base only.
        assert!(close(out.pixel(25, 25), [0.0, 1.0, 0.0, 1.0]));
    }

    #[test]
    fn clipping_layer_without_base_is_ordinary() {
        let mut lone = solid_layer("lone", IntRect::new(0, 0, 10, 10), [1.0, 0.0, 0.0, 1.0]);
        lone.clipping_group = true;
        let mut blender = LayerBlender::new();
        assert!(blender.blend_tile(&[lone], KEY, None, &NoOverride));
        assert!(close(blender.blended_tile().pixel(5, 5), [1.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn hidden_base_hides_its_clipping_run() {
        let mut base = solid_layer("base", FULL, [0.0, 1.0, 0.0, 1.0]);
        base.visible = false;
        let mut clipped = solid_layer("clipped", FULL, [1.0, 0.0, 0.0, 1.0]);
        clipped.clipping_group = true;
        let mut blender = LayerBlender::new();
        blender.blend_tile(&[clipped, base], KEY, None, &NoOverride);
        assert_eq!(blender.blended_tile().pixel(5, 5), TRANSPARENT);
    }

    #[test]
    fn empty_group_yields_transparent_tile() {
        let group = Layer::new_group("g", vec![Layer::new_image("empty")]);
        let mut blender = LayerBlender::new();
        assert!(!blender.blend_tile(&[group], KEY, None, &NoOverride));
        assert!(blender.blended_tile().is_transparent());
    }

    #[test]
    fn group_opacity_applies_to_its_result() {
        let inner = solid_layer("inner", FULL, [1.0, 1.0, 1.0, 1.0]);
        let mut group = Layer::new_group("g", vec![inner]);
        group.set_opacity(0.5);
        let mut blender = LayerBlender::new();
        blender.blend_tile(&[group], KEY, None, &NoOverride);
        assert!(close(blender.blended_tile().pixel(0, 0), [0.5, 0.5, 0.5, 0.5]));
    }

    struct HideAll;
    impl TileOverrideProvider for HideAll {
        fn override_tile(&self, _layer: &Layer, _key: TileKey) -> TileOverride<'_> {
            TileOverride::Hide
        }
    }

    #[test]
    fn hide_override_removes_content() {
        let layer = solid_layer("a", FULL, [1.0; 4]);
        let mut blender = LayerBlender::new();
        assert!(!blender.blend_tile(&[layer], KEY, None, &HideAll));
        assert!(blender.blended_tile().is_transparent());
    }

    #[test]
    fn flatten_covers_union_of_keys() {
        let a = solid_layer("a", IntRect::new(0, 0, 4, 4), [1.0; 4]);
        let mut b_tex = TiledTexture::new();
        b_tex.get_or_create_mut(TileKey::new(2, 1)).texture_mut().set_pixel(0, 0, [1.0; 4]);
        let b = Layer::with_texture("b", b_tex);
        let mut blender = LayerBlender::new();
        let flat = blender.blend_to_tiled_texture(&[a, b], &NoOverride);
        assert_eq!(flat.keys(), vec![TileKey::new(0, 0), TileKey::new(2, 1)]);
    }
}
