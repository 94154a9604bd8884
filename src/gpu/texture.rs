// ============================================================================
// TEXTURE: premultiplied RGBA float render target
// ============================================================================

use rayon::prelude::*;

use crate::geometry::{IntRect, Vec2};

/// One premultiplied RGBA pixel.
pub type Pixel = [f32; 4];

pub const TRANSPARENT: Pixel = [0.0; 4];

/// Bilinear filter of the four texels around `p`, fetched through `fetch`.
/// Texel centers sit at +0.5.
pub fn bilinear(p: Vec2, fetch: impl Fn(i32, i32) -> Pixel) -> Pixel {
    let fx = p.x - 0.5;
    let fy = p.y - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = fx - x0;
    let ty = fy - y0;
    let (x0, y0) = (x0 as i32, y0 as i32);

    let p00 = fetch(x0, y0);
    let p10 = fetch(x0 + 1, y0);
    let p01 = fetch(x0, y0 + 1);
    let p11 = fetch(x0 + 1, y0 + 1);

    let mut out = TRANSPARENT;
    for c in 0..4 {
        let top = p00[c] + (p10[c] - p00[c]) * tx;
        let bottom = p01[c] + (p11[c] - p01[c]) * tx;
        out[c] = top + (bottom - top) * ty;
    }
    out
}

/// Float-precision render target. Pixels are premultiplied so repeated
/// incremental blends stay linear and free of 8-bit banding.
#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<Pixel>,
}

impl Texture {
    /// Allocate a fully transparent texture.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, TRANSPARENT)
    }

    pub fn filled(width: u32, height: u32, pixel: Pixel) -> Self {
        Self {
            width,
            height,
            pixels: vec![pixel; width as usize * height as usize],
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rect(&self) -> IntRect {
        IntRect::from_size(self.width, self.height)
    }

    #[inline(always)]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Read a pixel; out-of-bounds reads are transparent.
    #[inline]
    pub fn pixel(&self, x: i32, y: i32) -> Pixel {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return TRANSPARENT;
        }
        self.pixels[self.index(x as u32, y as u32)]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: Pixel) {
        if x < self.width && y < self.height {
            let i = self.index(x, y);
            self.pixels[i] = pixel;
        }
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [Pixel] {
        &mut self.pixels
    }

    pub fn row(&self, y: u32) -> &[Pixel] {
        let start = self.index(0, y);
        &self.pixels[start..start + self.width as usize]
    }

    /// Clip a rect against the texture bounds.
    pub fn clip(&self, rect: Option<IntRect>) -> Option<IntRect> {
        match rect {
            Some(r) => r.intersect(&self.rect()),
            None if self.width > 0 && self.height > 0 => Some(self.rect()),
            None => None,
        }
    }

    /// Clear to transparent inside the scissor rect (whole texture when `None`).
    pub fn clear(&mut self, scissor: Option<IntRect>) {
        let Some(r) = self.clip(scissor) else { return };
        if r == self.rect() {
            self.pixels.fill(TRANSPARENT);
            return;
        }
        let w = self.width as usize;
        for y in r.y0..r.y1 {
            let start = y as usize * w;
            self.pixels[start + r.x0 as usize..start + r.x1 as usize].fill(TRANSPARENT);
        }
    }

    /// Copy `src` (same size) into this texture inside the scissor rect.
    pub fn copy_from(&mut self, src: &Texture, scissor: Option<IntRect>) {
        debug_assert_eq!((self.width, self.height), (src.width, src.height));
        let Some(r) = self.clip(scissor) else { return };
        if r == self.rect() {
            self.pixels.copy_from_slice(&src.pixels);
            return;
        }
        let w = self.width as usize;
        for y in r.y0..r.y1 {
            let start = y as usize * w;
            let range = start + r.x0 as usize..start + r.x1 as usize;
            self.pixels[range.clone()].copy_from_slice(&src.pixels[range]);
        }
    }

    /// True when every pixel has zero alpha.
    pub fn is_transparent(&self) -> bool {
        self.pixels.par_iter().all(|p| p[3] <= 0.0)
    }

    /// Tight bounds of pixels with non-zero alpha, in texture coordinates.
    pub fn content_bounds(&self) -> Option<IntRect> {
        let w = self.width as usize;
        let rows: Vec<Option<(usize, usize)>> = self
            .pixels
            .par_chunks(w.max(1))
            .map(|row| {
                let first = row.iter().position(|p| p[3] > 0.0)?;
                let last = row.iter().rposition(|p| p[3] > 0.0)?;
                Some((first, last))
            })
            .collect();

        let mut bounds: Option<IntRect> = None;
        for (y, span) in rows.iter().enumerate() {
            if let Some((first, last)) = span {
                let r = IntRect::new(*first as i32, y as i32, *last as i32 + 1, y as i32 + 1);
                bounds = Some(bounds.map_or(r, |b| b.union(&r)));
            }
        }
        bounds
    }

    /// Bilinear sample at a texel-space position (texel centers at +0.5),
    /// reading transparent outside the texture.
    pub fn sample_bilinear(&self, p: Vec2) -> Pixel {
        bilinear(p, |x, y| self.pixel(x, y))
    }

    #[inline]
    pub fn sample_nearest(&self, p: Vec2) -> Pixel {
        self.pixel(p.x.floor() as i32, p.y.floor() as i32)
    }

    /// Next mip level (2×2 box filter). Dimensions must be powers of two.
    pub fn downsample(&self) -> Texture {
        let w = (self.width / 2).max(1);
        let h = (self.height / 2).max(1);
        let mut out = Texture::new(w, h);
        let sx = if self.width > 1 { 2 } else { 1 };
        let sy = if self.height > 1 { 2 } else { 1 };
        let weight = 1.0 / (sx * sy) as f32;

        out.pixels
            .par_chunks_mut(w as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.iter_mut().enumerate() {
                    let mut acc = TRANSPARENT;
                    for dy in 0..sy {
                        for dx in 0..sx {
                            let s = self.pixel((x * sx + dx) as i32, (y * sy + dy) as i32);
                            for c in 0..4 {
                                acc[c] += s[c];
                            }
                        }
                    }
                    *px = acc.map(|v| v * weight);
                }
            });
        out
    }

    /// Mip level `level` of this texture (level 0 is a copy).
    pub fn mip_level(&self, level: u32) -> Texture {
        let mut tex = self.clone();
        for _ in 0..level {
            if tex.width == 1 && tex.height == 1 {
                break;
            }
            tex = tex.downsample();
        }
        tex
    }

    /// Mean of all pixels inside `rect`.
    pub fn average(&self, rect: IntRect) -> Pixel {
        let Some(r) = rect.intersect(&self.rect()) else { return TRANSPARENT };
        let mut acc = [0.0f64; 4];
        for y in r.y0..r.y1 {
            for x in r.x0..r.x1 {
                let p = self.pixel(x, y);
                for c in 0..4 {
                    acc[c] += p[c] as f64;
                }
            }
        }
        let n = (r.width() as f64) * (r.height() as f64);
        acc.map(|v| (v / n) as f32)
    }

    pub fn memory_bytes(&self) -> usize {
        self.pixels.len() * std::mem::size_of::<Pixel>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_reads_are_transparent() {
        let tex = Texture::filled(4, 4, [1.0; 4]);
        assert_eq!(tex.pixel(-1, 0), TRANSPARENT);
        assert_eq!(tex.pixel(4, 0), TRANSPARENT);
        assert_eq!(tex.pixel(3, 3), [1.0; 4]);
    }

    #[test]
    fn top_mip_level_is_area_average() {
        let mut tex = Texture::new(8, 4);
        // Left half opaque white, right half transparent.
        for y in 0..4 {
            for x in 0..4 {
                tex.set_pixel(x, y, [1.0; 4]);
            }
        }
        let top = tex.mip_level(2);
        assert_eq!((top.width(), top.height()), (2, 1));
        assert!((top.pixel(0, 0)[3] - 1.0).abs() < 1e-6);
        assert!(top.pixel(1, 0)[3].abs() < 1e-6);
        let avg = tex.average(tex.rect());
        assert!((avg[3] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn content_bounds_is_pixel_tight() {
        let mut tex = Texture::new(16, 16);
        tex.set_pixel(3, 5, [0.5, 0.0, 0.0, 0.5]);
        tex.set_pixel(9, 7, [0.5, 0.0, 0.0, 0.5]);
        assert_eq!(tex.content_bounds(), Some(IntRect::new(3, 5, 10, 8)));
        assert_eq!(Texture::new(4, 4).content_bounds(), None);
    }

    #[test]
    fn scissored_clear_leaves_outside_pixels() {
        let mut tex = Texture::filled(4, 4, [1.0; 4]);
        tex.clear(Some(IntRect::new(0, 0, 2, 4)));
        assert_eq!(tex.pixel(1, 1), TRANSPARENT);
        assert_eq!(tex.pixel(2, 1), [1.0; 4]);
    }
}
