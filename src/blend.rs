// ============================================================================
// BLEND MODES: separable operators on premultiplied float pixels
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::gpu::{Pixel, TRANSPARENT};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    #[default]
    Normal,
    Plus,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
}

/// Where a blend happens relative to a clipping run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipStage {
    /// Ordinary compositing.
    Unclipped,
    /// The run's base layer: keep only the source's coverage.
    Base,
    /// A layer inside the run: keep only the destination's coverage.
    Clipped,
}

impl BlendMode {
    /// Returns all blend modes in menu order
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Plus,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Difference,
            BlendMode::Exclusion,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Plus => "Plus",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
        }
    }

    /// Apply the operator to straight-alpha colors (`src` over `dst`).
    pub fn blend_rgb(&self, src: [f32; 3], dst: [f32; 3]) -> [f32; 3] {
        let mut out = [0.0; 3];
        for c in 0..3 {
            let (s, d) = (src[c], dst[c]);
            out[c] = match self {
                BlendMode::Normal => s,
                BlendMode::Plus => s + d,
                BlendMode::Multiply => s * d,
                BlendMode::Screen => 1.0 - (1.0 - s) * (1.0 - d),
                BlendMode::Overlay => overlay_channel(d, s),
                BlendMode::Darken => s.min(d),
                BlendMode::Lighten => s.max(d),
                BlendMode::ColorDodge => color_dodge_channel(d, s),
                BlendMode::ColorBurn => color_burn_channel(d, s),
                BlendMode::HardLight => overlay_channel(s, d),
                BlendMode::SoftLight => soft_light_channel(d, s),
                BlendMode::Difference => (s - d).abs(),
                BlendMode::Exclusion => s + d - 2.0 * s * d,
            };
        }
        out
    }

    /// Blend premultiplied `src` (already scaled by layer opacity) onto `dst`.
    ///
    /// The operator result `B` is recombined as
    /// `B·sa·da + src·(1−da) + dst·(1−sa)`; the base and clipped stages drop
    /// the destination-only or source-only term respectively.
    pub fn blend_pixel(&self, src: Pixel, dst: Pixel, stage: ClipStage) -> Pixel {
        let sa = src[3];
        let da = dst[3];
        let b = self.blend_rgb(straight(src), straight(dst)).map(|v| v.clamp(0.0, 1.0));
        let both = sa * da;
        let mut out = TRANSPARENT;
        match stage {
            ClipStage::Unclipped => {
                for c in 0..3 {
                    out[c] = b[c] * both + src[c] * (1.0 - da) + dst[c] * (1.0 - sa);
                }
                out[3] = both + sa * (1.0 - da) + da * (1.0 - sa);
            }
            ClipStage::Base => {
                for c in 0..3 {
                    out[c] = b[c] * both + src[c] * (1.0 - da);
                }
                out[3] = sa;
            }
            ClipStage::Clipped => {
                for c in 0..3 {
                    out[c] = b[c] * both + dst[c] * (1.0 - sa);
                }
                out[3] = da;
            }
        }
        out
    }
}

/// Straight color of a premultiplied pixel; black below 1e-4 alpha.
#[inline]
fn straight(p: Pixel) -> [f32; 3] {
    if p[3] < 1e-4 {
        [0.0; 3]
    } else {
        [p[0] / p[3], p[1] / p[3], p[2] / p[3]]
    }
}

// Blend mode helper functions
fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

fn color_burn_channel(base: f32, top: f32) -> f32 {
    if base >= 1.0 {
        1.0
    } else if top <= 0.0 {
        0.0
    } else {
        (1.0 - (1.0 - base) / top).max(0.0)
    }
}

fn color_dodge_channel(base: f32, top: f32) -> f32 {
    if base <= 0.0 {
        0.0
    } else if top >= 1.0 {
        1.0
    } else {
        (base / (1.0 - top)).min(1.0)
    }
}

/// W3C Soft Light formula.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Pixel, b: Pixel) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn multiply_is_commutative_for_opaque_pixels() {
        let a = [0.8, 0.2, 0.5, 1.0];
        let b = [0.3, 0.9, 0.5, 1.0];
        let ab = BlendMode::Multiply.blend_pixel(a, b, ClipStage::Unclipped);
        let ba = BlendMode::Multiply.blend_pixel(b, a, ClipStage::Unclipped);
        assert!(close(ab, ba));
        assert!(close(ab, [0.24, 0.18, 0.25, 1.0]));
    }

    #[test]
    fn non_normal_modes_reduce_to_source_over_on_empty_destination() {
        let src = [0.25, 0.1, 0.0, 0.5];
        for mode in BlendMode::all() {
            let out = mode.blend_pixel(src, TRANSPARENT, ClipStage::Unclipped);
            assert!(close(out, src), "{:?}", mode);
        }
    }

    #[test]
    fn clipped_stage_keeps_destination_coverage() {
        let src = [1.0, 1.0, 1.0, 1.0];
        let out = BlendMode::Screen.blend_pixel(src, TRANSPARENT, ClipStage::Clipped);
        assert_eq!(out, TRANSPARENT);
        let dst = [0.0, 0.0, 0.25, 0.5];
        let out = BlendMode::Multiply.blend_pixel(src, dst, ClipStage::Clipped);
        assert!((out[3] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn plus_is_clamped() {
        let out = BlendMode::Plus.blend_pixel([0.8, 0.8, 0.8, 1.0], [0.7, 0.0, 0.0, 1.0], ClipStage::Unclipped);
        assert!(out.iter().all(|c| *c <= 1.0));
        assert!((out[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn blend_mode_names_are_kebab_case() {
        let json = serde_json::to_string(&BlendMode::ColorDodge).unwrap();
        assert_eq!(json, "\"color-dodge\"");
    }
}
