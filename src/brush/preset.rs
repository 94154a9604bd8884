use serde::{Deserialize, Serialize};

use super::dab::{DabRasterizer, DabRenderer};
use super::pen::PenRasterizer;
use super::watercolor::WatercolorRasterizer;

/// Round pen / eraser settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PenPreset {
    pub title: String,
    /// Brush diameter in picture pixels.
    pub width: f32,
    pub opacity: f32,
    /// Edge feather relative to the radius.
    pub softness: f32,
    /// Diameter at zero pressure, relative to `width`.
    pub min_width_ratio: f32,
    /// Dab distance relative to the pressure-scaled diameter.
    pub spacing_ratio: f32,
    /// Input samples averaged per stroke point; 0 follows the pointer exactly.
    pub stabilizing_level: u32,
    pub eraser: bool,
}

impl Default for PenPreset {
    fn default() -> Self {
        Self {
            title: "Pen".to_string(),
            width: 10.0,
            opacity: 1.0,
            softness: 0.5,
            min_width_ratio: 0.5,
            spacing_ratio: 0.1,
            stabilizing_level: 2,
            eraser: false,
        }
    }
}

/// Paint-mixing brush settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatercolorPreset {
    pub title: String,
    pub width: f32,
    pub opacity: f32,
    pub softness: f32,
    pub min_width_ratio: f32,
    pub spacing_ratio: f32,
    /// How strongly the stroke picks up the colors underneath.
    pub blending: f32,
    /// How much fresh pigment each dab deposits.
    pub thickness: f32,
}

impl Default for WatercolorPreset {
    fn default() -> Self {
        Self {
            title: "Watercolor".to_string(),
            width: 10.0,
            opacity: 1.0,
            softness: 0.5,
            min_width_ratio: 0.5,
            spacing_ratio: 0.1,
            blending: 0.5,
            thickness: 0.5,
        }
    }
}

/// A stored brush, tagged by the engine that renders it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "kebab-case")]
pub enum BrushPreset {
    Pen(PenPreset),
    Watercolor(WatercolorPreset),
}

impl BrushPreset {
    pub fn title(&self) -> &str {
        match self {
            BrushPreset::Pen(p) => &p.title,
            BrushPreset::Watercolor(p) => &p.title,
        }
    }

    pub fn width(&self) -> f32 {
        match self {
            BrushPreset::Pen(p) => p.width,
            BrushPreset::Watercolor(p) => p.width,
        }
    }

    pub fn with_width(mut self, width: f32) -> Self {
        match &mut self {
            BrushPreset::Pen(p) => p.width = width,
            BrushPreset::Watercolor(p) => p.width = width,
        }
        self
    }

    /// Rasterizer for this preset painting with straight-alpha `color`.
    pub fn rasterizer(&self, color: [f32; 4]) -> Box<dyn DabRasterizer> {
        match self {
            BrushPreset::Pen(p) => Box::new(PenRasterizer::new(p.clone(), color)),
            BrushPreset::Watercolor(p) => Box::new(WatercolorRasterizer::new(p.clone(), color)),
        }
    }

    pub fn renderer(&self, color: [f32; 4]) -> DabRenderer {
        DabRenderer::new(self.rasterizer(color))
    }

    /// The built-in presets.
    pub fn defaults() -> Vec<BrushPreset> {
        vec![
            BrushPreset::Pen(PenPreset::default()),
            BrushPreset::Pen(PenPreset {
                title: "Eraser".to_string(),
                width: 20.0,
                softness: 0.2,
                eraser: true,
                ..PenPreset::default()
            }),
            BrushPreset::Watercolor(WatercolorPreset::default()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_engine_tagged() {
        let json = serde_json::to_value(BrushPreset::Watercolor(WatercolorPreset::default())).unwrap();
        assert_eq!(json["engine"], "watercolor");
        assert_eq!(json["minWidthRatio"], 0.5);

        let parsed: BrushPreset = serde_json::from_str(r#"{"engine":"pen","width":4}"#).unwrap();
        match parsed {
            BrushPreset::Pen(p) => {
                assert_eq!(p.width, 4.0);
                assert_eq!(p.opacity, 1.0);
            }
            other => panic!("unexpected preset {:?}", other),
        }
    }
}
