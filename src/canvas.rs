use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::geometry::{IntRect, Rect, Transform, Vec2};
use crate::gpu::{self, CompositeOp, DrawParams, Pixel, Texture};

// ============================================================================
// TILED TEXTURE – sparse TILE_SIZE² float tiles keyed by grid coordinate
// ============================================================================

/// Edge length of every tile, shared canvas-wide.
pub const TILE_SIZE: u32 = 256;

/// Integer tile grid coordinate. Tile `(x, y)` covers pixels
/// `[x·TILE_SIZE, (x+1)·TILE_SIZE) × [y·TILE_SIZE, (y+1)·TILE_SIZE)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub x: i32,
    pub y: i32,
}

impl TileKey {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Key of the tile containing pixel `(px, py)`.
    pub fn containing(px: i32, py: i32) -> Self {
        let t = TILE_SIZE as i32;
        Self::new(px.div_euclid(t), py.div_euclid(t))
    }

    /// Top-left pixel of the tile.
    pub fn origin(&self) -> Vec2 {
        Vec2::new((self.x * TILE_SIZE as i32) as f32, (self.y * TILE_SIZE as i32) as f32)
    }

    /// Pixel rect covered by the tile.
    pub fn rect(&self) -> IntRect {
        let t = TILE_SIZE as i32;
        IntRect::new(self.x * t, self.y * t, (self.x + 1) * t, (self.y + 1) * t)
    }
}

// Row-major order: y first, then x.
impl Ord for TileKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.y, self.x).cmp(&(other.y, other.x))
    }
}

impl PartialOrd for TileKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// One TILE_SIZE² premultiplied float tile.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    texture: Texture,
}

impl Default for Tile {
    fn default() -> Self {
        Self::new()
    }
}

impl Tile {
    /// A fully transparent tile.
    pub fn new() -> Self {
        Self { texture: Texture::new(TILE_SIZE, TILE_SIZE) }
    }

    /// Wrap a texture; `None` unless it is exactly TILE_SIZE².
    pub fn from_texture(texture: Texture) -> Option<Self> {
        if texture.width() == TILE_SIZE && texture.height() == TILE_SIZE {
            Some(Self { texture })
        } else {
            None
        }
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn texture_mut(&mut self) -> &mut Texture {
        &mut self.texture
    }

    #[inline]
    pub fn pixel(&self, x: i32, y: i32) -> Pixel {
        self.texture.pixel(x, y)
    }

    pub fn is_transparent(&self) -> bool {
        self.texture.is_transparent()
    }

    pub fn memory_bytes(&self) -> usize {
        self.texture.memory_bytes()
    }
}

/// Sparse tiled texture backed by `HashMap<TileKey, Arc<Tile>>`.
///
/// Absent keys read as fully transparent. Tiles are wrapped in `Arc` for
/// copy-on-write semantics: `clone()` only bumps reference counts, and
/// `get_or_create_mut` uses `Arc::make_mut` to copy a shared tile before the
/// first write, so clones never observe each other's edits.
#[derive(Clone, Debug, Default)]
pub struct TiledTexture {
    tiles: HashMap<TileKey, Arc<Tile>>,
}

impl PartialEq for TiledTexture {
    fn eq(&self, other: &Self) -> bool {
        self.tiles.len() == other.tiles.len()
            && self.tiles.iter().all(|(k, t)| {
                other
                    .tiles
                    .get(k)
                    .is_some_and(|o| Arc::ptr_eq(t, o) || t.as_ref() == o.as_ref())
            })
    }
}

impl TiledTexture {
    // ---- construction -------------------------------------------------------

    pub fn new() -> Self {
        Self::default()
    }

    /// Import from a flat straight-alpha `RgbaImage` placed at the origin.
    /// Only non-transparent tiles are stored.  Tile conversion is
    /// parallelised with rayon.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let width = src.width();
        let height = src.height();
        let tiles_x = width.div_ceil(TILE_SIZE) as i32;
        let tiles_y = height.div_ceil(TILE_SIZE) as i32;
        let keys: Vec<TileKey> = (0..tiles_y)
            .flat_map(|y| (0..tiles_x).map(move |x| TileKey::new(x, y)))
            .collect();

        let tiles: Vec<(TileKey, Arc<Tile>)> = keys
            .into_par_iter()
            .filter_map(|key| {
                let kr = key.rect();
                let r = kr.intersect(&IntRect::from_size(width, height))?;
                let mut tile = Tile::new();
                let mut has_content = false;
                for y in r.y0..r.y1 {
                    for x in r.x0..r.x1 {
                        let p = src.get_pixel(x as u32, y as u32);
                        if p[3] == 0 {
                            continue;
                        }
                        has_content = true;
                        tile.texture
                            .set_pixel((x - kr.x0) as u32, (y - kr.y0) as u32, rgba8_to_pixel(p));
                    }
                }
                has_content.then(|| (key, Arc::new(tile)))
            })
            .collect();

        let texture = Self { tiles: tiles.into_iter().collect() };
        log::debug!(
            "imported {}x{} image into {} tiles",
            width,
            height,
            texture.len()
        );
        texture
    }

    /// Read back `rect` into a straight-alpha 8-bit image.
    pub fn to_rgba_image(&self, rect: IntRect) -> RgbaImage {
        let mut out = RgbaImage::new(rect.width(), rect.height());
        if rect.is_empty() {
            return out;
        }
        for key in self.keys_for_int_rect(rect) {
            let Some(tile) = self.get(key) else { continue };
            let Some(r) = key.rect().intersect(&rect) else { continue };
            let kr = key.rect();
            for y in r.y0..r.y1 {
                for x in r.x0..r.x1 {
                    let p = tile.pixel(x - kr.x0, y - kr.y0);
                    out.put_pixel((x - rect.x0) as u32, (y - rect.y0) as u32, pixel_to_rgba8(p));
                }
            }
        }
        out
    }

    // ---- tile access --------------------------------------------------------

    pub fn get(&self, key: TileKey) -> Option<&Tile> {
        self.tiles.get(&key).map(|t| t.as_ref())
    }

    pub fn get_shared(&self, key: TileKey) -> Option<&Arc<Tile>> {
        self.tiles.get(&key)
    }

    pub fn has(&self, key: TileKey) -> bool {
        self.tiles.contains_key(&key)
    }

    /// Writable tile at `key`, created transparent when absent and copied
    /// first when shared with another texture.
    pub fn get_or_create_mut(&mut self, key: TileKey) -> &mut Tile {
        let slot = self.tiles.entry(key).or_insert_with(|| Arc::new(Tile::new()));
        Arc::make_mut(slot)
    }

    /// Writable tile at `key` if present (copy-on-write).
    pub fn get_mut(&mut self, key: TileKey) -> Option<&mut Tile> {
        self.tiles.get_mut(&key).map(Arc::make_mut)
    }

    pub fn set(&mut self, key: TileKey, tile: Tile) {
        self.tiles.insert(key, Arc::new(tile));
    }

    pub fn set_shared(&mut self, key: TileKey, tile: Arc<Tile>) {
        self.tiles.insert(key, tile);
    }

    pub fn remove(&mut self, key: TileKey) -> Option<Arc<Tile>> {
        self.tiles.remove(&key)
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
    }

    /// All keys, sorted row-major.
    pub fn keys(&self) -> Vec<TileKey> {
        let mut keys: Vec<TileKey> = self.tiles.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TileKey, &Arc<Tile>)> {
        self.tiles.iter()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    // ---- key math -----------------------------------------------------------

    /// Every key whose tile square intersects the half-open `rect`, sorted
    /// row-major. Empty, inverted or non-finite rects yield no keys.
    pub fn keys_for_rect(rect: &Rect) -> Vec<TileKey> {
        if rect.is_empty() {
            return Vec::new();
        }
        let t = TILE_SIZE as f32;
        let x0 = (rect.min.x / t).floor() as i32;
        let y0 = (rect.min.y / t).floor() as i32;
        let x1 = (rect.max.x / t).ceil() as i32;
        let y1 = (rect.max.y / t).ceil() as i32;
        let mut keys = Vec::with_capacity(((x1 - x0) as usize) * ((y1 - y0) as usize));
        for y in y0..y1 {
            for x in x0..x1 {
                keys.push(TileKey::new(x, y));
            }
        }
        keys
    }

    pub fn keys_for_int_rect(&self, rect: IntRect) -> Vec<TileKey> {
        Self::keys_for_rect(&rect.to_rect())
    }

    /// Deduplicated, sorted union of the key sets of `textures`.
    pub fn union_keys(textures: &[&TiledTexture]) -> Vec<TileKey> {
        let set: BTreeSet<TileKey> = textures
            .iter()
            .flat_map(|t| t.tiles.keys().copied())
            .collect();
        set.into_iter().collect()
    }

    // ---- content ------------------------------------------------------------

    /// Tight pixel rect of all pixels with non-zero alpha.
    pub fn bounding_rect(&self) -> Option<IntRect> {
        let tiles: Vec<(&TileKey, &Arc<Tile>)> = self.tiles.iter().collect();
        tiles
            .par_iter()
            .filter_map(|(key, tile)| {
                let kr = key.rect();
                tile.texture.content_bounds().map(|b| b.translate(kr.x0, kr.y0))
            })
            .reduce_with(|a, b| a.union(&b))
    }

    /// Drop tiles that are fully transparent.
    pub fn prune_empty(&mut self) {
        let before = self.tiles.len();
        self.tiles.retain(|_, tile| !tile.is_transparent());
        let dropped = before - self.tiles.len();
        if dropped > 0 {
            log::trace!("pruned {} empty tiles", dropped);
        }
    }

    /// Approximate memory usage in bytes.
    /// Shared (COW) tiles are counted at pointer cost only since their
    /// pixel data is shared with undo snapshots.
    pub fn memory_bytes(&self) -> usize {
        let tile_bytes = (TILE_SIZE * TILE_SIZE) as usize * std::mem::size_of::<Pixel>();
        self.tiles
            .values()
            .map(|arc| {
                if Arc::strong_count(arc) == 1 {
                    tile_bytes
                } else {
                    std::mem::size_of::<usize>() * 2
                }
            })
            .sum()
    }

    // ---- drawing ------------------------------------------------------------

    /// Pixel at picture position `(x, y)`; absent tiles read transparent.
    pub fn pixel(&self, x: i32, y: i32) -> Pixel {
        let key = TileKey::containing(x, y);
        let kr = key.rect();
        self.get(key).map_or(gpu::TRANSPARENT, |tile| tile.pixel(x - kr.x0, y - kr.y0))
    }

    /// Bilinear sample in picture space. Taps next to a tile edge read the
    /// neighbouring tile.
    pub fn sample_bilinear(&self, p: Vec2) -> Pixel {
        gpu::bilinear(p, |x, y| self.pixel(x, y))
    }

    /// Composite every tile into `target`.
    ///
    /// A texel at picture position `p` lands at `transform(p) + offset` in
    /// target space; `offset` places the target inside picture space (e.g.
    /// `-origin` of a destination tile). Only target pixels with at least one
    /// filter tap inside a stored tile are written.
    pub fn draw_into(&self, target: &mut Texture, transform: &Transform, op: CompositeOp, offset: Vec2) {
        let placement = transform.merge(&Transform::translate(offset));
        let target_rect = target.rect();
        let Some(rect) = self
            .tiles
            .keys()
            .filter_map(|key| {
                placement
                    .transform_rect(&key.rect().to_rect())
                    .int_bounding()
                    .intersect(&target_rect)
            })
            .reduce(|a, b| a.union(&b))
        else {
            return;
        };

        // Whole-pixel shifts copy tiles one by one, exactly.
        if placement.is_integer_translation() {
            for key in self.keys() {
                let Some(tile) = self.get(key) else { continue };
                let params = DrawParams {
                    op,
                    transform: Transform::translate(key.origin()).merge(&placement),
                    ..Default::default()
                };
                gpu::draw_texture(target, tile.texture(), &params);
            }
            return;
        }

        let Some(inverse) = placement.invert() else {
            log::debug!("draw_into: singular transform, draw skipped");
            return;
        };
        gpu::draw_fragments(target, rect, op, |p| {
            let q = inverse.apply(p);
            let x0 = (q.x - 0.5).floor() as i32;
            let y0 = (q.y - 0.5).floor() as i32;
            let stored = [(x0, y0), (x0 + 1, y0), (x0, y0 + 1), (x0 + 1, y0 + 1)]
                .into_iter()
                .any(|(x, y)| self.has(TileKey::containing(x, y)));
            stored.then(|| self.sample_bilinear(q))
        });
    }
}

// ============================================================================
// PIXEL CONVERSION
// ============================================================================

/// Straight 8-bit RGBA → premultiplied float.
pub fn rgba8_to_pixel(p: &Rgba<u8>) -> Pixel {
    let a = p[3] as f32 / 255.0;
    [
        p[0] as f32 / 255.0 * a,
        p[1] as f32 / 255.0 * a,
        p[2] as f32 / 255.0 * a,
        a,
    ]
}

/// Premultiplied float → straight 8-bit RGBA (rounded, clamped).
pub fn pixel_to_rgba8(p: Pixel) -> Rgba<u8> {
    let s = gpu::composite::unpremultiply(p);
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgba([q(s[0]), q(s[1]), q(s[2]), q(s[3])])
}
