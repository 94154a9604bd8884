use image::{GrayImage, Luma};

use crate::geometry::{IntRect, Vec2};

// ============================================================================
// SELECTION: 8-bit coverage mask in picture space
// ============================================================================

/// How a new selection shape interacts with the existing mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Clear any existing selection, then set the new shape.
    #[default]
    Replace,
    /// Union – add to the existing mask.
    Add,
    /// Difference – subtract from the existing mask.
    Subtract,
    /// Keep only pixels present in both the existing mask AND the new shape.
    Intersect,
}

impl SelectionMode {
    pub fn all() -> &'static [SelectionMode] {
        &[SelectionMode::Replace, SelectionMode::Add, SelectionMode::Subtract, SelectionMode::Intersect]
    }
}

/// Shape used to build a selection.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectionShape {
    /// Half-open pixel rect.
    Rectangle(IntRect),
    Ellipse { center: Vec2, radius: Vec2 },
}

impl SelectionShape {
    /// Returns 255 if the pixel center of (x, y) is inside the shape, 0 otherwise.
    pub fn contains(&self, x: i32, y: i32) -> u8 {
        match self {
            SelectionShape::Rectangle(r) => {
                if r.contains(x, y) { 255 } else { 0 }
            }
            SelectionShape::Ellipse { center, radius } => {
                if radius.x <= 0.0 || radius.y <= 0.0 {
                    return 0;
                }
                let dx = (x as f32 + 0.5 - center.x) / radius.x;
                let dy = (y as f32 + 0.5 - center.y) / radius.y;
                if dx * dx + dy * dy <= 1.0 { 255 } else { 0 }
            }
        }
    }

    /// Bounding box in pixel coordinates, clipped to `bounds`.
    pub fn bounds(&self, bounds: IntRect) -> Option<IntRect> {
        let r = match self {
            SelectionShape::Rectangle(r) => *r,
            SelectionShape::Ellipse { center, radius } => IntRect::new(
                (center.x - radius.x).floor() as i32,
                (center.y - radius.y).floor() as i32,
                (center.x + radius.x).ceil() as i32,
                (center.y + radius.y).ceil() as i32,
            ),
        };
        r.intersect(&bounds)
    }
}

/// Picture-sized selection. `None` mask means "everything is selected".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selection {
    width: u32,
    height: u32,
    mask: Option<GrayImage>,
}

impl Selection {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, mask: None }
    }

    /// Returns `true` when there is an active selection mask.
    pub fn has_selection(&self) -> bool {
        self.mask.is_some()
    }

    pub fn mask(&self) -> Option<&GrayImage> {
        self.mask.as_ref()
    }

    pub fn clear(&mut self) {
        self.mask = None;
    }

    /// Coverage of pixel `(x, y)` in `[0, 1]`. Without a mask everything
    /// is selected; outside the picture nothing is.
    pub fn alpha(&self, x: i32, y: i32) -> f32 {
        match &self.mask {
            None => 1.0,
            Some(mask) => {
                if x < 0 || y < 0 || x as u32 >= mask.width() || y as u32 >= mask.height() {
                    return 0.0;
                }
                mask.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0
            }
        }
    }

    /// Tight bounds of selected pixels.
    pub fn bounds(&self) -> Option<IntRect> {
        let mask = self.mask.as_ref()?;
        let mut out = IntRect::default();
        for (x, y, p) in mask.enumerate_pixels() {
            if p.0[0] > 0 {
                out = out.union(&IntRect::new(x as i32, y as i32, x as i32 + 1, y as i32 + 1));
            }
        }
        if out.is_empty() { None } else { Some(out) }
    }

    /// Apply a selection shape to the mask according to `mode`.
    pub fn apply(&mut self, shape: &SelectionShape, mode: SelectionMode) {
        let (w, h) = (self.width, self.height);
        let canvas = IntRect::from_size(w, h);
        let mask = self.mask.get_or_insert_with(|| GrayImage::new(w, h));

        if mode == SelectionMode::Replace {
            for p in mask.pixels_mut() {
                *p = Luma([0]);
            }
        }
        if mode == SelectionMode::Intersect {
            // Pixels outside the shape's bounds drop out entirely.
            let old_mask = mask.clone();
            for p in mask.pixels_mut() {
                *p = Luma([0]);
            }
            if let Some(b) = shape.bounds(canvas) {
                for y in b.y0..b.y1 {
                    for x in b.x0..b.x1 {
                        let shape_val = shape.contains(x, y);
                        let old_val = old_mask.get_pixel(x as u32, y as u32).0[0];
                        if shape_val > 0 && old_val > 0 {
                            mask.put_pixel(x as u32, y as u32, Luma([shape_val.min(old_val)]));
                        }
                    }
                }
            }
            log::debug!("selection intersect {:?}", shape);
            return;
        }

        let Some(b) = shape.bounds(canvas) else { return };
        for y in b.y0..b.y1 {
            for x in b.x0..b.x1 {
                let v = shape.contains(x, y);
                if v == 0 {
                    continue;
                }
                let (px, py) = (x as u32, y as u32);
                let old = mask.get_pixel(px, py).0[0];
                let new = match mode {
                    SelectionMode::Replace | SelectionMode::Add => old.max(v),
                    SelectionMode::Subtract => old.saturating_sub(v),
                    SelectionMode::Intersect => old,
                };
                mask.put_pixel(px, py, Luma([new]));
            }
        }
        log::debug!("selection {:?} {:?}", mode, shape);
    }

    /// Drop the mask when nothing remains selected.
    pub fn normalize(&mut self) {
        if self.mask.as_ref().is_some_and(|m| m.pixels().all(|p| p.0[0] == 0)) {
            self.mask = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_mask_selects_everything() {
        let sel = Selection::new(10, 10);
        assert_eq!(sel.alpha(3, 3), 1.0);
        assert!(!sel.has_selection());
    }

    #[test]
    fn add_subtract_intersect() {
        let mut sel = Selection::new(20, 20);
        sel.apply(&SelectionShape::Rectangle(IntRect::new(0, 0, 10, 10)), SelectionMode::Replace);
        sel.apply(&SelectionShape::Rectangle(IntRect::new(10, 0, 15, 5)), SelectionMode::Add);
        assert_eq!(sel.bounds(), Some(IntRect::new(0, 0, 15, 10)));

        sel.apply(&SelectionShape::Rectangle(IntRect::new(0, 0, 5, 10)), SelectionMode::Subtract);
        assert_eq!(sel.alpha(2, 2), 0.0);
        assert_eq!(sel.alpha(7, 2), 1.0);

        sel.apply(
            &SelectionShape::Ellipse { center: Vec2::new(8.0, 5.0), radius: Vec2::new(2.0, 2.0) },
            SelectionMode::Intersect,
        );
        assert_eq!(sel.alpha(7, 4), 1.0);
        assert_eq!(sel.alpha(12, 2), 0.0);
        assert_eq!(sel.alpha(-1, 0), 0.0);
    }

    #[test]
    fn normalize_drops_empty_mask() {
        let mut sel = Selection::new(4, 4);
        sel.apply(&SelectionShape::Rectangle(IntRect::new(0, 0, 2, 2)), SelectionMode::Replace);
        sel.apply(&SelectionShape::Rectangle(IntRect::new(0, 0, 4, 4)), SelectionMode::Subtract);
        sel.normalize();
        assert!(!sel.has_selection());
    }
}
