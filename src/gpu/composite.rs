// ============================================================================
// COMPOSITE: Porter-Duff operators and textured-quad draws
// ============================================================================
//
// Every draw runs to completion before it returns, so two draws against the
// same target are ordered exactly like their submission.  Rows of one draw are
// split across rayon workers; rows never alias, so this is invisible to callers.

use rayon::prelude::*;

use super::texture::{Pixel, Texture, TRANSPARENT};
use crate::geometry::{IntRect, Transform, Vec2};

/// Fixed-function blend state for a draw, on premultiplied colors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CompositeOp {
    /// Replace the destination.
    Src,
    /// Source drawn on top of the destination.
    #[default]
    SrcOver,
    /// Source drawn on top, restricted to the destination's coverage.
    SrcAtop,
    /// Source drawn underneath the destination.
    DstOver,
    /// Destination erased by source alpha.
    DstOut,
}

impl CompositeOp {
    #[inline]
    pub fn apply(self, src: Pixel, dst: Pixel) -> Pixel {
        let sa = src[3];
        let da = dst[3];
        match self {
            CompositeOp::Src => src,
            CompositeOp::SrcOver => {
                let k = 1.0 - sa;
                [src[0] + dst[0] * k, src[1] + dst[1] * k, src[2] + dst[2] * k, sa + da * k]
            }
            CompositeOp::SrcAtop => {
                let k = 1.0 - sa;
                [
                    src[0] * da + dst[0] * k,
                    src[1] * da + dst[1] * k,
                    src[2] * da + dst[2] * k,
                    da,
                ]
            }
            CompositeOp::DstOver => {
                let k = 1.0 - da;
                [dst[0] + src[0] * k, dst[1] + src[1] * k, dst[2] + src[2] * k, da + sa * k]
            }
            CompositeOp::DstOut => {
                let k = 1.0 - sa;
                [dst[0] * k, dst[1] * k, dst[2] * k, da * k]
            }
        }
    }
}

/// Texture sampling filter for transformed draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Bilinear,
}

/// Parameters of a textured-quad draw.
#[derive(Clone, Copy, Debug)]
pub struct DrawParams {
    pub op: CompositeOp,
    /// Maps source texel space into target space.
    pub transform: Transform,
    pub scissor: Option<IntRect>,
    pub opacity: f32,
}

impl Default for DrawParams {
    fn default() -> Self {
        Self {
            op: CompositeOp::SrcOver,
            transform: Transform::IDENTITY,
            scissor: None,
            opacity: 1.0,
        }
    }
}

/// Run a per-pixel fragment function over `rect` of `target`.
///
/// `fragment` receives the pixel center in target space and returns the
/// source color, or `None` where the primitive does not cover the pixel.
pub fn draw_fragments<F>(target: &mut Texture, rect: IntRect, op: CompositeOp, fragment: F)
where
    F: Fn(Vec2) -> Option<Pixel> + Sync,
{
    let Some(r) = rect.intersect(&target.rect()) else { return };
    let width = target.width() as usize;

    target
        .pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .skip(r.y0 as usize)
        .take(r.height() as usize)
        .for_each(|(y, row)| {
            let cy = y as f32 + 0.5;
            for x in r.x0..r.x1 {
                let p = Vec2::new(x as f32 + 0.5, cy);
                if let Some(src) = fragment(p) {
                    let dst = &mut row[x as usize];
                    *dst = op.apply(src, *dst);
                }
            }
        });
}

/// Draw `source` into `target` as a transformed quad.
///
/// Only pixels whose centers map inside the source are touched, so `Src`
/// replaces the covered area and nothing else.
pub fn draw_texture(target: &mut Texture, source: &Texture, params: &DrawParams) {
    let Some(inverse) = params.transform.invert() else {
        log::debug!("draw_texture: singular transform, draw skipped");
        return;
    };
    let src_rect = source.rect().to_rect();
    let bounds = params.transform.transform_rect(&src_rect).int_bounding();
    let Some(mut rect) = bounds.intersect(&target.rect()) else { return };
    if let Some(scissor) = params.scissor {
        match rect.intersect(&scissor) {
            Some(r) => rect = r,
            None => return,
        }
    }

    let filter = if params.transform.is_integer_translation() {
        Filter::Nearest
    } else {
        Filter::Bilinear
    };
    let (sw, sh) = (source.width() as f32, source.height() as f32);
    let opacity = params.opacity;

    draw_fragments(target, rect, params.op, |p| {
        let q = inverse.apply(p);
        if q.x < 0.0 || q.y < 0.0 || q.x >= sw || q.y >= sh {
            return None;
        }
        let texel = match filter {
            Filter::Nearest => source.sample_nearest(q),
            Filter::Bilinear => source.sample_bilinear(q),
        };
        Some(if opacity == 1.0 { texel } else { texel.map(|c| c * opacity) })
    });
}

/// Composite a same-sized texture with an operator (full-tile quad).
pub fn composite(target: &mut Texture, source: &Texture, op: CompositeOp, opacity: f32, scissor: Option<IntRect>) {
    debug_assert_eq!((target.width(), target.height()), (source.width(), source.height()));
    let Some(r) = target.clip(scissor) else { return };
    let width = target.width() as usize;
    let src = source.pixels();

    target
        .pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .skip(r.y0 as usize)
        .take(r.height() as usize)
        .for_each(|(y, row)| {
            let base = y * width;
            for x in r.x0 as usize..r.x1 as usize {
                let mut s = src[base + x];
                if opacity != 1.0 {
                    s = s.map(|c| c * opacity);
                }
                row[x] = op.apply(s, row[x]);
            }
        });
}

/// Premultiply a straight-alpha color.
pub fn premultiply(c: [f32; 4]) -> Pixel {
    [c[0] * c[3], c[1] * c[3], c[2] * c[3], c[3]]
}

/// Straight-alpha color of a premultiplied pixel (black below 1e-4 alpha).
pub fn unpremultiply(p: Pixel) -> [f32; 4] {
    if p[3] < 1e-4 {
        return TRANSPARENT;
    }
    [p[0] / p[3], p[1] / p[3], p[2] / p[3], p[3]]
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Pixel = [1.0, 0.0, 0.0, 1.0];
    const HALF_BLUE: Pixel = [0.0, 0.0, 0.5, 0.5];

    #[test]
    fn src_over_matches_porter_duff() {
        let out = CompositeOp::SrcOver.apply(HALF_BLUE, RED);
        assert_eq!(out, [0.5, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn src_atop_keeps_destination_alpha() {
        let out = CompositeOp::SrcAtop.apply(RED, HALF_BLUE);
        assert_eq!(out[3], 0.5);
        assert_eq!(CompositeOp::SrcAtop.apply(RED, TRANSPARENT), TRANSPARENT);
    }

    #[test]
    fn dst_out_erases() {
        assert_eq!(CompositeOp::DstOut.apply(RED, HALF_BLUE), TRANSPARENT);
    }

    #[test]
    fn draw_texture_only_touches_covered_pixels() {
        let mut target = Texture::filled(8, 8, RED);
        let source = Texture::filled(2, 2, HALF_BLUE);
        let params = DrawParams {
            op: CompositeOp::Src,
            transform: Transform::translate(Vec2::new(3.0, 3.0)),
            ..Default::default()
        };
        draw_texture(&mut target, &source, &params);
        assert_eq!(target.pixel(3, 3), HALF_BLUE);
        assert_eq!(target.pixel(4, 4), HALF_BLUE);
        assert_eq!(target.pixel(5, 5), RED);
        assert_eq!(target.pixel(2, 3), RED);
    }

    #[test]
    fn scissor_limits_draw() {
        let mut target = Texture::new(4, 4);
        let source = Texture::filled(4, 4, RED);
        let params = DrawParams {
            scissor: Some(IntRect::new(0, 0, 1, 4)),
            ..Default::default()
        };
        draw_texture(&mut target, &source, &params);
        assert_eq!(target.pixel(0, 2), RED);
        assert_eq!(target.pixel(1, 2), TRANSPARENT);
    }
}
