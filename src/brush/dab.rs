// ============================================================================
// DAB RENDERER: per-stroke scratch tiles, preview hook and commit
// ============================================================================
//
// A stroke paints into a private scratch texture. The first touch of a tile
// pulls the live layer's tile into the scratch (shared, copied on write), so
// the scratch always holds the full post-stroke content of every tile it
// knows about. The compositor sees those tiles through the override hook;
// `end` turns them into one undoable command.

use crate::canvas::{Tile, TileKey, TiledTexture};
use crate::compositor::{TileOverride, TileOverrideProvider};
use crate::error::StrokeError;
use crate::geometry::{IntRect, Rect};
use crate::gpu::RedrawScheduler;
use crate::history::ChangeLayerImageCommand;
use crate::layer::{Layer, LayerId};
use crate::picture::Picture;
use crate::selection::Selection;

use super::waypoint::Waypoint;
use super::MAX_BRUSH_WIDTH;

/// What a rasterizer may know about the layer being painted.
pub struct StrokeContext<'a> {
    pub preserve_opacity: bool,
    /// `None` when the whole picture is selected.
    pub selection: Option<&'a Selection>,
}

impl StrokeContext<'_> {
    /// Selection coverage of the pixel at `(x, y)`.
    #[inline]
    pub fn selection_alpha(&self, x: i32, y: i32) -> f32 {
        self.selection.map_or(1.0, |s| s.alpha(x, y))
    }
}

/// Writable view of the scratch tiles, backed by the live layer content.
pub struct StrokeTarget<'a> {
    layer: &'a TiledTexture,
    scratch: &'a mut TiledTexture,
}

impl<'a> StrokeTarget<'a> {
    pub fn new(layer: &'a TiledTexture, scratch: &'a mut TiledTexture) -> Self {
        Self { layer, scratch }
    }

    /// Writable scratch tile at `key`. The first call within a stroke seeds it
    /// from the live layer, or with a transparent tile.
    pub fn prepare_tile(&mut self, key: TileKey) -> &mut Tile {
        if !self.scratch.has(key) {
            match self.layer.get_shared(key) {
                Some(tile) => self.scratch.set_shared(key, tile.clone()),
                None => self.scratch.set(key, Tile::new()),
            }
        }
        self.scratch.get_or_create_mut(key)
    }

    pub fn scratch(&self) -> &TiledTexture {
        self.scratch
    }
}

/// A brush engine: turns waypoints into pixels of prepared scratch tiles.
pub trait DabRasterizer: Send {
    /// Label used for the undo entry.
    fn title(&self) -> &str;

    /// Nominal brush diameter in picture pixels.
    fn width(&self) -> f32;

    /// Distance to the next dab after `w`.
    fn spacing(&self, w: &Waypoint) -> f32;

    /// Raw samples the stroke stabilizer averages over; 0 disables it.
    fn stabilizing_level(&self) -> u32 {
        0
    }

    fn begin(&mut self, _ctx: &StrokeContext) {}

    /// Rasterize `waypoints`; `rect` covers every pixel they may touch.
    fn render_waypoints(
        &mut self,
        ctx: &StrokeContext,
        target: &mut StrokeTarget,
        waypoints: &[Waypoint],
        rect: IntRect,
    );
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StrokeState {
    Idle,
    Stroking { layer: LayerId },
}

/// Drives one brush engine through `start → next_waypoints* → end`.
pub struct DabRenderer {
    rasterizer: Box<dyn DabRasterizer>,
    state: StrokeState,
    scratch: TiledTexture,
    edited_rect: IntRect,
}

impl DabRenderer {
    pub fn new(rasterizer: Box<dyn DabRasterizer>) -> Self {
        Self {
            rasterizer,
            state: StrokeState::Idle,
            scratch: TiledTexture::new(),
            edited_rect: IntRect::default(),
        }
    }

    pub fn title(&self) -> &str {
        self.rasterizer.title()
    }

    pub fn spacing(&self, w: &Waypoint) -> f32 {
        self.rasterizer.spacing(w)
    }

    pub fn stabilizing_level(&self) -> u32 {
        self.rasterizer.stabilizing_level()
    }

    pub fn is_stroking(&self) -> bool {
        self.state != StrokeState::Idle
    }

    /// Layer the active stroke is bound to.
    pub fn layer(&self) -> Option<LayerId> {
        match self.state {
            StrokeState::Stroking { layer } => Some(layer),
            StrokeState::Idle => None,
        }
    }

    pub fn scratch(&self) -> &TiledTexture {
        &self.scratch
    }

    pub fn edited_rect(&self) -> Option<IntRect> {
        if self.edited_rect.is_empty() { None } else { Some(self.edited_rect) }
    }

    /// Integer rect covering a `width + 2` square around each dab, with the
    /// width capped like the dabs themselves.
    pub fn rect_for_waypoints(&self, waypoints: &[Waypoint]) -> Option<IntRect> {
        let width = self.rasterizer.width();
        if !width.is_finite() {
            return None;
        }
        let size = width.min(MAX_BRUSH_WIDTH) + 2.0;
        if size <= 0.0 {
            return None;
        }
        waypoints
            .iter()
            .filter(|w| w.pos.is_finite())
            .map(|w| Rect::from_center_size(w.pos, size))
            .reduce(|a, b| a.union(&b))
            .map(|r| r.int_bounding())
            .filter(|r| !r.is_empty())
    }

    pub fn start(&mut self, picture: &Picture) -> Result<(), StrokeError> {
        if self.is_stroking() {
            return Err(StrokeError::AlreadyStarted);
        }
        let layer = picture
            .current_layer()
            .filter(|l| !l.is_group())
            .ok_or(StrokeError::NoImageLayer)?;

        self.scratch.clear();
        self.edited_rect = IntRect::default();
        self.state = StrokeState::Stroking { layer: layer.id };

        let ctx = stroke_context(layer, picture.selection());
        self.rasterizer.begin(&ctx);
        log::debug!("{}: stroke started on layer {}", self.title(), layer.id);
        Ok(())
    }

    /// Rasterize a batch of dabs and schedule a redraw of what they touched.
    pub fn next_waypoints(
        &mut self,
        picture: &Picture,
        waypoints: &[Waypoint],
        scheduler: &mut RedrawScheduler,
    ) -> Result<Option<IntRect>, StrokeError> {
        let StrokeState::Stroking { layer: id } = self.state else {
            return Err(StrokeError::NotStarted);
        };
        let Some(layer) = picture.layers().get(id) else {
            log::debug!("{}: layer {} is gone, batch skipped", self.title(), id);
            return Ok(None);
        };
        let Some(texture) = layer.texture() else {
            log::debug!("{}: layer {} is not an image, batch skipped", self.title(), id);
            return Ok(None);
        };
        let Some(rect) = self.rect_for_waypoints(waypoints) else {
            return Ok(None);
        };

        let ctx = stroke_context(layer, picture.selection());
        let mut target = StrokeTarget::new(texture, &mut self.scratch);
        self.rasterizer.render_waypoints(&ctx, &mut target, waypoints, rect);

        self.edited_rect = self.edited_rect.union(&rect);
        scheduler.request(rect);
        Ok(Some(rect))
    }

    /// Commit the stroke as one undo entry. Returns the edited region, or
    /// `None` when nothing was painted.
    pub fn end(&mut self, picture: &mut Picture) -> Result<Option<IntRect>, StrokeError> {
        let StrokeState::Stroking { layer: id } = self.state else {
            return Err(StrokeError::NotStarted);
        };
        self.state = StrokeState::Idle;
        let scratch = std::mem::take(&mut self.scratch);
        let edited = std::mem::take(&mut self.edited_rect);

        if scratch.is_empty() || edited.is_empty() {
            return Ok(None);
        }
        let Some(path) = picture.layers().path_of(id) else {
            log::debug!("{}: layer {} is gone, stroke dropped", self.title(), id);
            return Ok(None);
        };
        let Some(command) = ChangeLayerImageCommand::new(picture.layers(), path, self.title(), scratch, edited) else {
            return Ok(None);
        };
        picture.execute(Box::new(command));
        log::debug!("{}: stroke committed {:?}", self.title(), edited);
        Ok(Some(edited))
    }
}

impl TileOverrideProvider for DabRenderer {
    fn override_tile(&self, layer: &Layer, key: TileKey) -> TileOverride<'_> {
        match self.state {
            StrokeState::Stroking { layer: id } if id == layer.id => match self.scratch.get(key) {
                Some(tile) => TileOverride::Replace(tile),
                None => TileOverride::Keep,
            },
            _ => TileOverride::Keep,
        }
    }
}

fn stroke_context<'a>(layer: &Layer, selection: &'a Selection) -> StrokeContext<'a> {
    StrokeContext {
        preserve_opacity: layer.preserve_opacity,
        selection: selection.has_selection().then_some(selection),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::preset::{BrushPreset, PenPreset};
    use crate::geometry::Vec2;

    fn pen() -> DabRenderer {
        BrushPreset::Pen(PenPreset::default()).renderer([1.0, 0.0, 0.0, 1.0])
    }

    #[test]
    fn stroke_state_errors() {
        let mut picture = Picture::new(64, 64);
        let mut renderer = pen();
        let mut scheduler = RedrawScheduler::new();

        let wp = [Waypoint::new(Vec2::new(10.0, 10.0), 1.0)];
        assert_eq!(renderer.next_waypoints(&picture, &wp, &mut scheduler), Err(StrokeError::NotStarted));
        assert_eq!(renderer.end(&mut picture), Err(StrokeError::NotStarted));

        renderer.start(&picture).unwrap();
        assert_eq!(renderer.start(&picture), Err(StrokeError::AlreadyStarted));
        assert_eq!(renderer.end(&mut picture), Ok(None));
        assert!(!picture.history().can_undo());
    }

    #[test]
    fn group_layer_cannot_be_painted() {
        let mut picture = Picture::new(64, 64);
        let group = picture.add_group("Group").unwrap();
        picture.set_current_layer(group);
        assert_eq!(pen().start(&picture), Err(StrokeError::NoImageLayer));
    }

    #[test]
    fn scratch_is_previewed_then_committed() {
        let mut picture = Picture::new(64, 64);
        let mut renderer = pen();
        let mut scheduler = RedrawScheduler::new();

        renderer.start(&picture).unwrap();
        let rect = renderer
            .next_waypoints(&picture, &[Waypoint::new(Vec2::new(20.0, 20.0), 1.0)], &mut scheduler)
            .unwrap()
            .unwrap();
        assert_eq!(rect, IntRect::new(14, 14, 26, 26));
        assert_eq!(scheduler.take_frame(), Some(rect));

        let layer = picture.current_layer().unwrap();
        assert!(layer.texture().unwrap().is_empty());
        match renderer.override_tile(layer, TileKey::new(0, 0)) {
            TileOverride::Replace(tile) => assert!(tile.pixel(20, 20)[3] > 0.4),
            other => panic!("expected scratch tile, got {:?}", other),
        }

        assert_eq!(renderer.end(&mut picture), Ok(Some(rect)));
        assert_eq!(picture.history().undo_description().as_deref(), Some("Pen"));
        let texture = picture.current_layer().unwrap().texture().unwrap();
        assert!(texture.get(TileKey::new(0, 0)).unwrap().pixel(20, 20)[3] > 0.4);
    }

    #[test]
    fn non_finite_waypoints_are_skipped() {
        let picture = Picture::new(64, 64);
        let mut renderer = pen();
        let mut scheduler = RedrawScheduler::new();
        renderer.start(&picture).unwrap();
        let wp = [Waypoint::new(Vec2::new(f32::NAN, 3.0), 1.0)];
        assert_eq!(renderer.next_waypoints(&picture, &wp, &mut scheduler), Ok(None));
        assert!(!scheduler.is_pending());
    }
}
