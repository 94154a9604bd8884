use image::RgbaImage;
use uuid::Uuid;

use crate::canvas::{Tile, TiledTexture};
use crate::compositor::{LayerBlender, NoOverride, TileOverrideProvider};
use crate::config::CoreConfig;
use crate::error::{LayerError, Result};
use crate::geometry::{IntRect, Transform, Vec2};
use crate::gpu::CompositeOp;
use crate::history::{
    Command, HistoryManager, LayerOpCommand, LayerOperation, SnapshotCommand, TransformLayerCommand,
};
use crate::layer::{Layer, LayerId, LayerPath, LayerProps, LayerTree};
use crate::selection::{Selection, SelectionMode, SelectionShape};

// ============================================================================
// NAVIGATION: picture ↔ view mapping
// ============================================================================

/// View placement of the picture: scaled about its origin, rotated, then
/// translated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Navigation {
    pub translation: Vec2,
    pub scale: f32,
    /// Radians, clockwise in view space.
    pub rotation: f32,
}

impl Default for Navigation {
    fn default() -> Self {
        Self { translation: Vec2::ZERO, scale: 1.0, rotation: 0.0 }
    }
}

impl Navigation {
    pub const MIN_SCALE: f32 = 0.01;
    pub const MAX_SCALE: f32 = 64.0;

    pub fn picture_to_view(&self) -> Transform {
        Transform::scale(Vec2::splat(self.scale))
            .merge(&Transform::rotate(self.rotation))
            .merge(&Transform::translate(self.translation))
    }

    pub fn view_to_picture(&self) -> Option<Transform> {
        self.picture_to_view().invert()
    }

    pub fn pan(&mut self, delta: Vec2) {
        self.translation = self.translation + delta;
    }

    /// Zoom by `factor` keeping the picture point under `pivot` (view space) fixed.
    pub fn zoom_at(&mut self, factor: f32, pivot: Vec2) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let Some(anchor) = self.view_to_picture().map(|t| t.apply(pivot)) else { return };
        self.scale = (self.scale * factor).clamp(Self::MIN_SCALE, Self::MAX_SCALE);
        let moved = self.picture_to_view().apply(anchor);
        self.translation = self.translation + (pivot - moved);
    }

    /// Rotate by `radians` around `pivot` (view space).
    pub fn rotate_at(&mut self, radians: f32, pivot: Vec2) {
        let Some(anchor) = self.view_to_picture().map(|t| t.apply(pivot)) else { return };
        self.rotation += radians;
        let moved = self.picture_to_view().apply(anchor);
        self.translation = self.translation + (pivot - moved);
    }

    /// Fit a `width × height` picture centered into a view of `view_size`.
    pub fn fit(width: u32, height: u32, view_size: Vec2) -> Self {
        if width == 0 || height == 0 {
            return Self::default();
        }
        let scale = (view_size.x / width as f32)
            .min(view_size.y / height as f32)
            .clamp(Self::MIN_SCALE, Self::MAX_SCALE);
        let translation = Vec2::new(
            (view_size.x - width as f32 * scale) * 0.5,
            (view_size.y - height as f32 * scale) * 0.5,
        );
        Self { translation, scale, rotation: 0.0 }
    }
}

// ============================================================================
// PICTURE: the document
// ============================================================================

/// Single open picture.
pub struct Picture {
    pub id: Uuid,
    width: u32,
    height: u32,
    layers: LayerTree,
    pub navigation: Navigation,
    current: Option<LayerId>,
    selection: Selection,
    history: HistoryManager,
    /// Set by every recorded edit; cleared by the caller after saving.
    pub is_dirty: bool,
}

impl Picture {
    /// Blank picture with one empty image layer.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_config(width, height, &CoreConfig::default())
    }

    pub fn with_config(width: u32, height: u32, config: &CoreConfig) -> Self {
        let root = Layer::new_group("Root", vec![Layer::new_image("Layer 1")]);
        let mut picture = Self::from_root(width, height, root);
        picture.history = config.history();
        picture
    }

    /// Picture whose single layer holds `image`.
    pub fn from_rgba_image(image: &RgbaImage) -> Self {
        let layer = Layer::with_texture("Background", TiledTexture::from_rgba_image(image));
        Self::from_root(image.width(), image.height(), Layer::new_group("Root", vec![layer]))
    }

    /// Picture around an existing layer tree. The top-most image layer becomes current.
    pub fn from_root(width: u32, height: u32, root: Layer) -> Self {
        let layers = LayerTree::new(root);
        let current = first_image(layers.root()).map(|l| l.id);
        Self {
            id: Uuid::new_v4(),
            width,
            height,
            layers,
            navigation: Navigation::default(),
            current,
            selection: Selection::new(width, height),
            history: HistoryManager::default(),
            is_dirty: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> IntRect {
        IntRect::from_size(self.width, self.height)
    }

    pub fn layers(&self) -> &LayerTree {
        &self.layers
    }

    pub fn root(&self) -> &Layer {
        self.layers.root()
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id)
    }

    pub fn layer_at(&self, path: &[usize]) -> Option<&Layer> {
        self.layers.at_path(path)
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn select(&mut self, shape: &SelectionShape, mode: SelectionMode) {
        self.selection.apply(shape, mode);
        self.selection.normalize();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    // ---- current layer ------------------------------------------------------

    pub fn current_layer_id(&self) -> Option<LayerId> {
        self.current
    }

    pub fn current_layer(&self) -> Option<&Layer> {
        self.current.and_then(|id| self.layers.get(id))
    }

    /// Returns `false` if no such layer exists.
    pub fn set_current_layer(&mut self, id: LayerId) -> bool {
        if self.layers.get(id).is_some() {
            self.current = Some(id);
            true
        } else {
            false
        }
    }

    /// Keep `current` pointing at a live layer after structural changes.
    fn revalidate_current(&mut self) {
        if self.current_layer().is_none() {
            self.current = first_image(self.layers.root()).map(|l| l.id);
        }
    }

    // ---- history ------------------------------------------------------------

    /// Apply `command` and record it.
    pub fn execute(&mut self, command: Box<dyn Command>) {
        self.history.execute(command, &mut self.layers);
        self.is_dirty = true;
    }

    /// Record a command whose effect is already applied.
    fn record(&mut self, command: Box<dyn Command>) {
        self.history.push(command);
        self.is_dirty = true;
    }

    pub fn undo(&mut self) -> Option<String> {
        let label = self.history.undo(&mut self.layers)?;
        self.revalidate_current();
        self.is_dirty = true;
        log::debug!("undo: {}", label);
        Some(label)
    }

    pub fn redo(&mut self) -> Option<String> {
        let label = self.history.redo(&mut self.layers)?;
        self.revalidate_current();
        self.is_dirty = true;
        log::debug!("redo: {}", label);
        Some(label)
    }

    // ---- layer structure ----------------------------------------------------

    /// Where a new layer goes: directly above the current layer, or on top of
    /// the root group.
    fn insertion_point(&self) -> (LayerPath, usize) {
        match self.current.and_then(|id| self.layers.path_of(id)) {
            Some(mut path) if !path.is_empty() => {
                let index = path.pop().unwrap_or(0);
                (path, index)
            }
            _ => (Vec::new(), 0),
        }
    }

    /// Insert `layer` as child `index` of the group at `parent` and make it current.
    pub fn insert_layer(&mut self, parent: &[usize], index: usize, layer: Layer) -> Result<LayerId> {
        let id = layer.id;
        self.layers.insert(parent, index, layer.clone())?;
        self.record(Box::new(LayerOpCommand::new(LayerOperation::Add {
            parent: parent.to_vec(),
            index,
            layer,
        })));
        self.current = Some(id);
        Ok(id)
    }

    pub fn add_layer(&mut self, name: impl Into<String>) -> Result<LayerId> {
        let (parent, index) = self.insertion_point();
        self.insert_layer(&parent, index, Layer::new_image(name))
    }

    pub fn add_group(&mut self, name: impl Into<String>) -> Result<LayerId> {
        let (parent, index) = self.insertion_point();
        self.insert_layer(&parent, index, Layer::new_group(name, Vec::new()))
    }

    pub fn remove_layer(&mut self, id: LayerId) -> Result<Layer> {
        let path = self.path_of(id)?;
        let layer = self.layers.remove(&path)?;
        self.record(Box::new(LayerOpCommand::new(LayerOperation::Remove {
            path,
            layer: layer.clone(),
        })));
        self.revalidate_current();
        Ok(layer)
    }

    /// Move a layer to `to`, a path valid after it has been taken out.
    pub fn move_layer(&mut self, id: LayerId, to: &[usize]) -> Result<()> {
        let from = self.path_of(id)?;
        self.layers.move_layer(&from, to)?;
        self.record(Box::new(LayerOpCommand::new(LayerOperation::Move { from, to: to.to_vec() })));
        Ok(())
    }

    pub fn set_layer_props(&mut self, id: LayerId, props: &LayerProps) -> Result<()> {
        let path = self.path_of(id)?;
        let layer = self.layers.at_path_mut(&path).ok_or_else(|| LayerError::InvalidPath(path.clone()))?;
        let old = layer.props();
        layer.set_props(props);
        let new = layer.props();
        if old != new {
            self.record(Box::new(LayerOpCommand::new(LayerOperation::SetProps { path, old, new })));
        }
        Ok(())
    }

    fn path_of(&self, id: LayerId) -> Result<LayerPath> {
        match self.layers.path_of(id) {
            Some(path) if path.is_empty() => Err(LayerError::CannotRemoveRoot.into()),
            Some(path) => Ok(path),
            None => Err(LayerError::InvalidPath(Vec::new()).into()),
        }
    }

    // ---- pixel operations ---------------------------------------------------

    /// Re-render an image layer under `transform` as one undo step.
    pub fn transform_layer(&mut self, id: LayerId, transform: &Transform) -> Result<()> {
        let path = self.path_of(id)?;
        let before = self
            .layers
            .at_path(&path)
            .and_then(Layer::texture)
            .ok_or_else(|| LayerError::NotAnImage(path.clone()))?
            .clone();
        if transform.invert().is_none() {
            log::warn!("transform_layer: singular transform ignored");
            return Ok(());
        }
        let after = transform_texture(&before, transform);
        self.execute(Box::new(TransformLayerCommand::new(path, before, after)));
        Ok(())
    }

    /// Flatten the tree into one texture, previewing through `overrides`.
    pub fn flatten_to_texture(&self, overrides: &dyn TileOverrideProvider) -> TiledTexture {
        LayerBlender::new().blend_to_tiled_texture(self.layers.root().children(), overrides)
    }

    /// Straight 8-bit RGBA of the picture area.
    pub fn flatten_to_image(&self) -> RgbaImage {
        self.flatten_to_texture(&NoOverride).to_rgba_image(self.bounds())
    }

    /// Flattened picture scaled down to fit `max_edge` on its longer side.
    pub fn thumbnail(&self, max_edge: u32) -> RgbaImage {
        let image = self.flatten_to_image();
        let longest = self.width.max(self.height);
        if max_edge == 0 || longest <= max_edge {
            return image;
        }
        let scale = max_edge as f32 / longest as f32;
        let w = ((self.width as f32 * scale).round() as u32).max(1);
        let h = ((self.height as f32 * scale).round() as u32).max(1);
        image::imageops::thumbnail(&image, w, h)
    }

    /// Merge a layer into the sibling below it. The merged layer takes the
    /// lower layer's name and position; returns its id.
    pub fn merge_down(&mut self, id: LayerId) -> Result<LayerId> {
        let path = self.path_of(id)?;
        let Some((&index, parent)) = path.split_last() else {
            return Err(LayerError::CannotRemoveRoot.into());
        };
        let below = child_path(parent, index + 1);
        let siblings = self.layers.at_path(parent).map(Layer::children).unwrap_or_default();
        if siblings.len() <= index + 1 {
            return Err(LayerError::InvalidPath(below).into());
        }
        let name = siblings[index + 1].name.clone();
        self.merge_layers(parent, index..index + 2, name)
    }

    /// Replace the children `range` of the group at `parent` with one image
    /// layer holding their composite. Recorded as one undo step.
    pub fn merge_layers(
        &mut self,
        parent: &[usize],
        range: std::ops::Range<usize>,
        name: impl Into<String>,
    ) -> Result<LayerId> {
        let group = self.layers.at_path(parent).ok_or_else(|| LayerError::InvalidPath(parent.to_vec()))?;
        if !group.is_group() {
            return Err(LayerError::NotAGroup(parent.to_vec()).into());
        }
        let children = group.children();
        if range.is_empty() || range.end > children.len() {
            return Err(LayerError::InvalidPath(child_path(parent, range.end)).into());
        }
        let merged = LayerBlender::new().blend_to_tiled_texture(&children[range.clone()], &NoOverride);
        let layer = Layer::with_texture(name, merged);
        let id = layer.id;

        let mut command = SnapshotCommand::new("Merge Layers", &self.layers);
        for _ in range.clone() {
            self.layers.remove(&child_path(parent, range.start))?;
        }
        self.layers.insert(parent, range.start, layer)?;
        command.set_after(&self.layers);
        self.record(Box::new(command));
        self.current = Some(id);
        log::info!("merged {} layers", range.len());
        Ok(id)
    }

    /// Collapse the whole tree into one image layer.
    pub fn flatten(&mut self) -> Result<LayerId> {
        let count = self.layers.root().children().len();
        if count == 0 {
            return self.add_layer("Background");
        }
        self.merge_layers(&[], 0..count, "Background")
    }
}

fn child_path(parent: &[usize], index: usize) -> LayerPath {
    let mut path = parent.to_vec();
    path.push(index);
    path
}

fn first_image(layer: &Layer) -> Option<&Layer> {
    layer.children().iter().find_map(|child| {
        if child.is_group() { first_image(child) } else { Some(child) }
    })
}

/// `source` resampled under `transform` into fresh tiles.
pub fn transform_texture(source: &TiledTexture, transform: &Transform) -> TiledTexture {
    let mut out = TiledTexture::new();
    let Some(bounds) = source.bounding_rect() else { return out };
    let target = transform.transform_rect(&bounds.to_rect());
    for key in TiledTexture::keys_for_rect(&target) {
        let mut tile = Tile::new();
        source.draw_into(tile.texture_mut(), transform, CompositeOp::SrcOver, Vec2::ZERO - key.origin());
        out.set(key, tile);
    }
    out.prune_empty();
    out
}
