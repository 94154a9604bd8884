// ============================================================================
// BRUSH: stroke sampling and dab rasterization
// ============================================================================

pub mod dab;
pub mod pen;
pub mod preset;
pub mod watercolor;
pub mod waypoint;

pub use dab::{DabRasterizer, DabRenderer, StrokeContext, StrokeTarget};
pub use pen::PenRasterizer;
pub use preset::{BrushPreset, PenPreset, WatercolorPreset};
pub use watercolor::WatercolorRasterizer;
pub use waypoint::{interpolate, InputSample, Interpolated, StrokeInterpolator, Waypoint, MIN_SPACING};

/// Hermite step from `edge0` to `edge1`; the edges may be given in either order.
#[inline]
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge0 == edge1 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Largest dab diameter any engine renders.
pub const MAX_BRUSH_WIDTH: f32 = 4096.0;

/// Pressure-scaled brush diameter, capped at [`MAX_BRUSH_WIDTH`].
/// Non-finite sizes pass through so callers can skip them.
#[inline]
pub(crate) fn pressure_size(width: f32, min_width_ratio: f32, pressure: f32) -> f32 {
    let size = width * (min_width_ratio + (1.0 - min_width_ratio) * pressure);
    if size.is_finite() { size.min(MAX_BRUSH_WIDTH) } else { size }
}

/// Footprint coverage of a round dab of `radius` at distance `dist` from
/// its center. The feather is at least one pixel wide.
#[inline]
pub(crate) fn round_coverage(radius: f32, softness: f32, dist: f32) -> f32 {
    smoothstep(radius, radius - (radius * softness).max(1.0), dist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothstep_descending_edges() {
        assert_eq!(smoothstep(10.0, 5.0, 4.0), 1.0);
        assert_eq!(smoothstep(10.0, 5.0, 11.0), 0.0);
        assert!((smoothstep(10.0, 5.0, 7.5) - 0.5).abs() < 1e-6);
        assert_eq!(smoothstep(1.0, 1.0, 0.5), 0.0);
    }

    #[test]
    fn coverage_feather_is_at_least_one_pixel() {
        assert!((round_coverage(0.5, 0.0, 0.0) - 0.5).abs() < 1e-6);
        assert_eq!(round_coverage(4.0, 0.0, 2.0), 1.0);
        assert!(round_coverage(4.0, 0.0, 3.5) > 0.0);
        assert_eq!(round_coverage(4.0, 0.0, 4.0), 0.0);
    }
}
