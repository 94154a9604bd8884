use std::collections::VecDeque;

use crate::canvas::{TiledTexture, TILE_SIZE};
use crate::geometry::IntRect;
use crate::gpu::Pixel;
use crate::layer::{Layer, LayerPath, LayerProps, LayerTree};

// ============================================================================
// COMMAND TRAIT
// ============================================================================

/// Trait for undoable/redoable commands.
pub trait Command: Send + Sync {
    fn undo(&self, layers: &mut LayerTree);
    fn redo(&self, layers: &mut LayerTree);
    fn description(&self) -> String;
    fn memory_size(&self) -> usize;
    /// Picture region whose pixels change on undo/redo; `None` means "assume
    /// everything".
    fn affected_rect(&self) -> Option<IntRect> {
        None
    }
}

const TILE_BYTES: usize = (TILE_SIZE * TILE_SIZE) as usize * std::mem::size_of::<Pixel>();

// ============================================================================
// CHANGE LAYER IMAGE COMMAND - one brush stroke, tile-granular
// ============================================================================

/// Before/after tiles of one image layer, keyed by the tiles a stroke touched.
///
/// `after_tiles` holds every tile the stroke prepared; `before_tiles` holds
/// the layer's tiles at the same keys, with absent keys meaning "no tile".
pub struct ChangeLayerImageCommand {
    pub target: LayerPath,
    pub label: String,
    pub before_tiles: TiledTexture,
    pub after_tiles: TiledTexture,
    pub edited_rect: IntRect,
}

impl ChangeLayerImageCommand {
    /// Capture the current tiles of the layer at `target` for every key in
    /// `after_tiles`. Returns `None` if `target` is not an image layer.
    pub fn new(
        layers: &LayerTree,
        target: LayerPath,
        label: impl Into<String>,
        after_tiles: TiledTexture,
        edited_rect: IntRect,
    ) -> Option<Self> {
        let texture = layers.at_path(&target)?.texture()?;
        let mut before_tiles = TiledTexture::new();
        for key in after_tiles.keys() {
            if let Some(tile) = texture.get_shared(key) {
                before_tiles.set_shared(key, tile.clone());
            }
        }
        Some(Self {
            target,
            label: label.into(),
            before_tiles,
            after_tiles,
            edited_rect,
        })
    }

    fn texture_mut<'a>(&self, layers: &'a mut LayerTree) -> Option<&'a mut TiledTexture> {
        let texture = layers.at_path_mut(&self.target).and_then(Layer::texture_mut);
        if texture.is_none() {
            log::warn!("{}: no image layer at {:?}", self.label, self.target);
        }
        texture
    }
}

impl Command for ChangeLayerImageCommand {
    fn undo(&self, layers: &mut LayerTree) {
        let Some(texture) = self.texture_mut(layers) else { return };
        for key in self.after_tiles.keys() {
            match self.before_tiles.get_shared(key) {
                Some(tile) => texture.set_shared(key, tile.clone()),
                None => {
                    texture.remove(key);
                }
            }
        }
    }

    fn redo(&self, layers: &mut LayerTree) {
        let Some(texture) = self.texture_mut(layers) else { return };
        for (key, tile) in self.after_tiles.iter() {
            texture.set_shared(*key, tile.clone());
        }
    }

    fn description(&self) -> String {
        self.label.clone()
    }

    fn memory_size(&self) -> usize {
        (self.before_tiles.len() + self.after_tiles.len()) * TILE_BYTES
    }

    fn affected_rect(&self) -> Option<IntRect> {
        Some(self.edited_rect)
    }
}

// ============================================================================
// LAYER OPERATION COMMAND - For layer add/remove/reorder/property changes
// ============================================================================

/// Types of layer operations that can be undone/redone
#[derive(Clone)]
pub enum LayerOperation {
    /// A layer was inserted as child `index` of the group at `parent`
    Add {
        parent: LayerPath,
        index: usize,
        layer: Layer,
    },
    /// A layer was removed (stores the full layer for restore)
    Remove {
        path: LayerPath,
        layer: Layer,
    },
    /// Layer was moved; `to` is valid after the removal at `from`
    Move {
        from: LayerPath,
        to: LayerPath,
    },
    /// Name, opacity, blend mode or flags changed
    SetProps {
        path: LayerPath,
        old: LayerProps,
        new: LayerProps,
    },
}

/// Command for layer structure operations
pub struct LayerOpCommand {
    operation: LayerOperation,
}

impl LayerOpCommand {
    pub fn new(operation: LayerOperation) -> Self {
        Self { operation }
    }

    pub fn operation(&self) -> &LayerOperation {
        &self.operation
    }
}

fn child_path(parent: &[usize], index: usize) -> LayerPath {
    let mut path = parent.to_vec();
    path.push(index);
    path
}

fn split_path(path: &[usize]) -> Option<(&[usize], usize)> {
    path.split_last().map(|(i, parent)| (parent, *i))
}

impl Command for LayerOpCommand {
    fn undo(&self, layers: &mut LayerTree) {
        let result = match &self.operation {
            LayerOperation::Add { parent, index, .. } => {
                layers.remove(&child_path(parent, *index)).map(|_| ())
            }
            LayerOperation::Remove { path, layer } => match split_path(path) {
                Some((parent, index)) => layers.insert(parent, index, layer.clone()),
                None => Ok(()),
            },
            LayerOperation::Move { from, to } => layers.move_layer(to, from),
            LayerOperation::SetProps { path, old, .. } => {
                if let Some(layer) = layers.at_path_mut(path) {
                    layer.set_props(old);
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            log::warn!("undo '{}' failed: {}", self.description(), e);
        }
    }

    fn redo(&self, layers: &mut LayerTree) {
        let result = match &self.operation {
            LayerOperation::Add { parent, index, layer } => layers.insert(parent, *index, layer.clone()),
            LayerOperation::Remove { path, .. } => layers.remove(path).map(|_| ()),
            LayerOperation::Move { from, to } => layers.move_layer(from, to),
            LayerOperation::SetProps { path, new, .. } => {
                if let Some(layer) = layers.at_path_mut(path) {
                    layer.set_props(new);
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            log::warn!("redo '{}' failed: {}", self.description(), e);
        }
    }

    fn description(&self) -> String {
        match &self.operation {
            LayerOperation::Add { layer, .. } => format!("Add Layer: {}", layer.name),
            LayerOperation::Remove { layer, .. } => format!("Delete Layer: {}", layer.name),
            LayerOperation::Move { from, to } => format!("Move Layer {:?} → {:?}", from, to),
            LayerOperation::SetProps { old, new, .. } => {
                if old.name != new.name {
                    format!("Rename: {} → {}", old.name, new.name)
                } else if old.visible != new.visible {
                    if new.visible {
                        format!("Show Layer: {}", new.name)
                    } else {
                        format!("Hide Layer: {}", new.name)
                    }
                } else if old.opacity != new.opacity {
                    format!("{} Opacity: {:.0}%", new.name, new.opacity * 100.0)
                } else {
                    format!("Layer Properties: {}", new.name)
                }
            }
        }
    }

    fn memory_size(&self) -> usize {
        match &self.operation {
            LayerOperation::Add { layer, .. } | LayerOperation::Remove { layer, .. } => {
                layer.textures().iter().map(|t| t.len() * TILE_BYTES).sum::<usize>() + layer.name.len()
            }
            LayerOperation::SetProps { old, new, .. } => old.name.len() + new.name.len(),
            LayerOperation::Move { .. } => std::mem::size_of::<LayerOperation>(),
        }
    }
}

// ============================================================================
// TRANSFORM LAYER COMMAND - whole-texture swap
// ============================================================================

pub struct TransformLayerCommand {
    target: LayerPath,
    before: TiledTexture,
    after: TiledTexture,
}

impl TransformLayerCommand {
    pub fn new(target: LayerPath, before: TiledTexture, after: TiledTexture) -> Self {
        Self { target, before, after }
    }

    fn swap_in(&self, layers: &mut LayerTree, texture: &TiledTexture) {
        match layers.at_path_mut(&self.target).and_then(Layer::texture_mut) {
            Some(t) => *t = texture.clone(),
            None => log::warn!("transform: no image layer at {:?}", self.target),
        }
    }
}

impl Command for TransformLayerCommand {
    fn undo(&self, layers: &mut LayerTree) {
        self.swap_in(layers, &self.before);
    }

    fn redo(&self, layers: &mut LayerTree) {
        self.swap_in(layers, &self.after);
    }

    fn description(&self) -> String {
        "Transform Layer".to_string()
    }

    fn memory_size(&self) -> usize {
        (self.before.len() + self.after.len()) * TILE_BYTES
    }
}

// ============================================================================
// SNAPSHOT COMMAND: whole-tree undo for merges and other heavy edits
// ============================================================================

/// Stores the layer tree before and after an operation. Tile storage is
/// shared with the live tree, so a snapshot costs one `Arc` per tile.
pub struct SnapshotCommand {
    description: String,
    before: Layer,
    after: Option<Layer>,
}

impl SnapshotCommand {
    /// Call before performing the operation, then `set_after` when done.
    pub fn new(description: impl Into<String>, layers: &LayerTree) -> Self {
        Self {
            description: description.into(),
            before: layers.root().clone(),
            after: None,
        }
    }

    pub fn set_after(&mut self, layers: &LayerTree) {
        self.after = Some(layers.root().clone());
    }

    fn restore(layers: &mut LayerTree, root: &Layer) {
        *layers.root_mut() = root.clone();
        layers.reparent();
    }
}

impl Command for SnapshotCommand {
    fn undo(&self, layers: &mut LayerTree) {
        Self::restore(layers, &self.before);
    }

    fn redo(&self, layers: &mut LayerTree) {
        if let Some(after) = &self.after {
            Self::restore(layers, after);
        }
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        let tiles = |root: &Layer| root.textures().iter().map(|t| t.len()).sum::<usize>();
        (tiles(&self.before) + self.after.as_ref().map_or(0, tiles)) * TILE_BYTES
    }
}

// ============================================================================
// HISTORY MANAGER: one timeline with a cursor, bounded by count and bytes
// ============================================================================

/// Default memory budget for recorded commands.
const DEFAULT_MAX_MEMORY_BYTES: usize = 100 * 1024 * 1024;

/// A recorded command with its cost and region measured once, at record time.
struct Entry {
    command: Box<dyn Command>,
    bytes: usize,
    rect: Option<IntRect>,
}

impl Entry {
    fn new(command: Box<dyn Command>) -> Self {
        let bytes = command.memory_size();
        let rect = command.affected_rect();
        Self { command, bytes, rect }
    }
}

/// Undo/redo timeline.
///
/// Entries before `cursor` are applied and can be undone; entries from
/// `cursor` on were undone and can be redone. Recording drops the redo tail.
pub struct HistoryManager {
    entries: VecDeque<Entry>,
    cursor: usize,
    max_steps: usize,
    max_memory_bytes: Option<usize>,
    /// Sum of `Entry::bytes` over all entries.
    bytes: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_steps: usize) -> Self {
        Self::with_limits(max_steps, Some(DEFAULT_MAX_MEMORY_BYTES))
    }

    pub fn with_limits(max_steps: usize, max_memory_bytes: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: 0,
            max_steps,
            max_memory_bytes,
            bytes: 0,
        }
    }

    /// Record a command whose effect is already applied.
    pub fn push(&mut self, command: Box<dyn Command>) {
        let dropped: usize = self.entries.drain(self.cursor..).map(|e| e.bytes).sum();
        self.bytes -= dropped;

        let entry = Entry::new(command);
        self.bytes += entry.bytes;
        self.entries.push_back(entry);
        self.cursor = self.entries.len();
        self.evict();
    }

    /// Apply `command` and record it.
    pub fn execute(&mut self, command: Box<dyn Command>, layers: &mut LayerTree) {
        command.redo(layers);
        self.push(command);
    }

    pub fn undo(&mut self, layers: &mut LayerTree) -> Option<String> {
        let index = self.cursor.checked_sub(1)?;
        let command = &self.entries[index].command;
        command.undo(layers);
        self.cursor = index;
        Some(command.description())
    }

    pub fn redo(&mut self, layers: &mut LayerTree) -> Option<String> {
        let command = &self.entries.get(self.cursor)?.command;
        command.redo(layers);
        self.cursor += 1;
        Some(command.description())
    }

    fn next_undo(&self) -> Option<&Entry> {
        self.cursor.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    fn next_redo(&self) -> Option<&Entry> {
        self.entries.get(self.cursor)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.entries.len()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.next_undo().map(|e| e.command.description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.next_redo().map(|e| e.command.description())
    }

    /// Region touched by the next undo, if the command knows it.
    pub fn undo_rect(&self) -> Option<IntRect> {
        self.next_undo().and_then(|e| e.rect)
    }

    /// Region touched by the next redo, if the command knows it.
    pub fn redo_rect(&self) -> Option<IntRect> {
        self.next_redo().and_then(|e| e.rect)
    }

    /// Undoable descriptions, most recent first.
    pub fn undo_history(&self) -> Vec<String> {
        self.entries.range(..self.cursor).rev().map(|e| e.command.description()).collect()
    }

    /// Bytes held by recorded commands, as measured when they were recorded.
    pub fn memory_usage(&self) -> usize {
        self.bytes
    }

    pub fn undo_count(&self) -> usize {
        self.cursor
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
        self.bytes = 0;
    }

    /// Drop the oldest entries past the step limit, then past the memory
    /// budget. The budget never evicts the newest entry.
    fn evict(&mut self) {
        let mut evicted = 0;
        loop {
            let len = self.entries.len();
            let over_steps = len > self.max_steps;
            let over_bytes = len > 1 && self.max_memory_bytes.is_some_and(|max| self.bytes > max);
            if !over_steps && !over_bytes {
                break;
            }
            let Some(oldest) = self.entries.pop_front() else { break };
            self.bytes -= oldest.bytes;
            self.cursor = self.cursor.saturating_sub(1);
            evicted += 1;
        }
        if evicted > 0 {
            log::trace!("history: evicted {} oldest entries, {} bytes held", evicted, self.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::TileKey;

    fn tree_with_image() -> LayerTree {
        LayerTree::new(Layer::new_group("root", vec![Layer::new_image("paint")]))
    }

    #[test]
    fn image_command_restores_absent_tiles() {
        let mut layers = tree_with_image();
        let mut after = TiledTexture::new();
        after.get_or_create_mut(TileKey::new(0, 0)).texture_mut().set_pixel(1, 1, [1.0; 4]);

        let cmd = ChangeLayerImageCommand::new(&layers, vec![0], "Pen", after, IntRect::new(0, 0, 4, 4))
            .unwrap();
        let mut history = HistoryManager::default();
        history.execute(Box::new(cmd), &mut layers);
        assert!(layers.at_path(&[0]).unwrap().texture().unwrap().has(TileKey::new(0, 0)));
        assert_eq!(history.undo_rect(), Some(IntRect::new(0, 0, 4, 4)));
        assert!(history.memory_usage() > 0);

        assert_eq!(history.undo(&mut layers).as_deref(), Some("Pen"));
        assert!(layers.at_path(&[0]).unwrap().texture().unwrap().is_empty());
        assert_eq!(history.redo_description().as_deref(), Some("Pen"));
        assert_eq!(history.redo_rect(), Some(IntRect::new(0, 0, 4, 4)));
        history.redo(&mut layers);
        assert!(layers.at_path(&[0]).unwrap().texture().unwrap().has(TileKey::new(0, 0)));
    }

    #[test]
    fn snapshot_restores_whole_tree() {
        let mut layers = tree_with_image();
        let mut cmd = SnapshotCommand::new("Merge", &layers);
        layers.insert(&[], 0, Layer::new_image("extra")).unwrap();
        cmd.set_after(&layers);

        let mut history = HistoryManager::default();
        history.push(Box::new(cmd));
        history.undo(&mut layers);
        assert_eq!(layers.root().children().len(), 1);
        history.redo(&mut layers);
        assert_eq!(layers.root().children()[0].name, "extra");
        assert!(layers.parent_of(layers.root().children()[0].id).is_some());
    }

    #[test]
    fn layer_ops_round_trip() {
        let mut layers = tree_with_image();
        let mut history = HistoryManager::default();
        let added = Layer::new_image("added");
        let id = added.id;
        history.execute(
            Box::new(LayerOpCommand::new(LayerOperation::Add { parent: vec![], index: 0, layer: added })),
            &mut layers,
        );
        assert_eq!(layers.path_of(id), Some(vec![0]));

        let old = layers.at_path(&[0]).unwrap().props();
        let new = LayerProps { opacity: 0.25, ..old.clone() };
        history.execute(
            Box::new(LayerOpCommand::new(LayerOperation::SetProps { path: vec![0], old, new })),
            &mut layers,
        );
        assert_eq!(layers.at_path(&[0]).unwrap().opacity(), 0.25);

        history.undo(&mut layers);
        assert_eq!(layers.at_path(&[0]).unwrap().opacity(), 1.0);
        history.undo(&mut layers);
        assert_eq!(layers.path_of(id), None);
        assert_eq!(layers.parent_of(id), None);
    }

    #[test]
    fn push_clears_redo_and_prunes_by_count() {
        let mut layers = tree_with_image();
        let mut history = HistoryManager::new(2);
        for i in 0..3 {
            let layer = Layer::new_image(format!("l{i}"));
            history.execute(
                Box::new(LayerOpCommand::new(LayerOperation::Add { parent: vec![], index: 0, layer })),
                &mut layers,
            );
        }
        assert_eq!(history.undo_count(), 2);
        history.undo(&mut layers);
        assert!(history.can_redo());
        let layer = Layer::new_image("x");
        history.push(Box::new(LayerOpCommand::new(LayerOperation::Add { parent: vec![], index: 0, layer })));
        assert!(!history.can_redo());
        assert_eq!(history.undo_history()[0], "Add Layer: x");
    }

    #[test]
    fn memory_budget_evicts_oldest_but_keeps_newest() {
        let mut layers = tree_with_image();
        let stroke = |layers: &LayerTree, x: i32| {
            let mut after = TiledTexture::new();
            after.get_or_create_mut(TileKey::new(x, 0));
            ChangeLayerImageCommand::new(layers, vec![0], format!("Stroke {x}"), after, IntRect::new(0, 0, 1, 1))
                .unwrap()
        };
        let mut history = HistoryManager::with_limits(10, Some(TILE_BYTES * 3));
        for x in 0..4 {
            let cmd = stroke(&layers, x);
            history.execute(Box::new(cmd), &mut layers);
        }
        assert!(history.memory_usage() <= TILE_BYTES * 3);
        assert!(history.undo_count() < 4);
        assert_eq!(history.undo_description().as_deref(), Some("Stroke 3"));

        // Undone entries keep their bytes until a new record drops them.
        let held = history.memory_usage();
        history.undo(&mut layers);
        assert_eq!(history.memory_usage(), held);
        history.push(Box::new(stroke(&layers, 9)));
        assert!(!history.can_redo());
        assert!(history.memory_usage() <= TILE_BYTES * 3);

        let mut tiny = HistoryManager::with_limits(10, Some(1));
        tiny.push(Box::new(stroke(&layers, 5)));
        assert_eq!(tiny.undo_count(), 1);
        history.clear();
        assert_eq!((history.memory_usage(), history.can_undo()), (0, false));
    }
}
