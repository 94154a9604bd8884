use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blend::BlendMode;
use crate::canvas::TiledTexture;
use crate::error::LayerError;

// ============================================================================
// LAYER TREE – image/group hierarchy owning tiled textures
// ============================================================================

/// Runtime identity of a layer. Not persisted; a loaded document gets
/// fresh ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index path from the root group; `[]` is the root itself.
pub type LayerPath = Vec<usize>;

/// The editable attributes of a layer, as one value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerProps {
    pub name: String,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub visible: bool,
    pub clipping_group: bool,
    pub preserve_opacity: bool,
}

impl Default for LayerProps {
    fn default() -> Self {
        Self {
            name: String::new(),
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            visible: true,
            clipping_group: false,
            preserve_opacity: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LayerContent {
    Image(TiledTexture),
    /// Children, top-most first.
    Group(Vec<Layer>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    opacity: f32,
    pub blend_mode: BlendMode,
    pub visible: bool,
    pub clipping_group: bool,
    pub preserve_opacity: bool,
    pub content: LayerContent,
}

impl Layer {
    pub fn new(name: impl Into<String>, content: LayerContent) -> Self {
        Self {
            id: LayerId::new(),
            name: name.into(),
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            visible: true,
            clipping_group: false,
            preserve_opacity: false,
            content,
        }
    }

    pub fn new_image(name: impl Into<String>) -> Self {
        Self::new(name, LayerContent::Image(TiledTexture::new()))
    }

    pub fn with_texture(name: impl Into<String>, texture: TiledTexture) -> Self {
        Self::new(name, LayerContent::Image(texture))
    }

    pub fn new_group(name: impl Into<String>, children: Vec<Layer>) -> Self {
        Self::new(name, LayerContent::Group(children))
    }

    #[inline]
    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Set opacity, clamped to `[0, 1]` (NaN becomes 0).
    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_nan() { 0.0 } else { opacity.clamp(0.0, 1.0) };
    }

    pub fn props(&self) -> LayerProps {
        LayerProps {
            name: self.name.clone(),
            opacity: self.opacity,
            blend_mode: self.blend_mode,
            visible: self.visible,
            clipping_group: self.clipping_group,
            preserve_opacity: self.preserve_opacity,
        }
    }

    pub fn set_props(&mut self, props: &LayerProps) {
        self.name = props.name.clone();
        self.set_opacity(props.opacity);
        self.blend_mode = props.blend_mode;
        self.visible = props.visible;
        self.clipping_group = props.clipping_group;
        self.preserve_opacity = props.preserve_opacity;
    }

    pub fn is_group(&self) -> bool {
        matches!(self.content, LayerContent::Group(_))
    }

    pub fn texture(&self) -> Option<&TiledTexture> {
        match &self.content {
            LayerContent::Image(t) => Some(t),
            LayerContent::Group(_) => None,
        }
    }

    pub fn texture_mut(&mut self) -> Option<&mut TiledTexture> {
        match &mut self.content {
            LayerContent::Image(t) => Some(t),
            LayerContent::Group(_) => None,
        }
    }

    pub fn children(&self) -> &[Layer] {
        match &self.content {
            LayerContent::Group(c) => c,
            LayerContent::Image(_) => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Layer>> {
        match &mut self.content {
            LayerContent::Group(c) => Some(c),
            LayerContent::Image(_) => None,
        }
    }

    // ---- lookup -------------------------------------------------------------

    pub fn at_path(&self, path: &[usize]) -> Option<&Layer> {
        let mut layer = self;
        for &i in path {
            layer = layer.children().get(i)?;
        }
        Some(layer)
    }

    pub fn at_path_mut(&mut self, path: &[usize]) -> Option<&mut Layer> {
        let mut layer = self;
        for &i in path {
            layer = layer.children_mut()?.get_mut(i)?;
        }
        Some(layer)
    }

    pub fn path_of(&self, id: LayerId) -> Option<LayerPath> {
        if self.id == id {
            return Some(Vec::new());
        }
        for (i, child) in self.children().iter().enumerate() {
            if let Some(mut rest) = child.path_of(id) {
                rest.insert(0, i);
                return Some(rest);
            }
        }
        None
    }

    pub fn find(&self, id: LayerId) -> Option<&Layer> {
        if self.id == id {
            return Some(self);
        }
        self.children().iter().find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        if self.id == id {
            return Some(self);
        }
        match &mut self.content {
            LayerContent::Group(children) => children.iter_mut().find_map(|c| c.find_mut(id)),
            LayerContent::Image(_) => None,
        }
    }

    /// Depth-first, pre-order visit of this layer and all descendants.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Layer)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Number of layers in this subtree, including `self`.
    pub fn count(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |_| n += 1);
        n
    }

    /// Tiled textures of every image layer in this subtree.
    pub fn textures(&self) -> Vec<&TiledTexture> {
        let mut out = Vec::new();
        self.walk(&mut |l| {
            if let Some(t) = l.texture() {
                out.push(t);
            }
        });
        out
    }

    // ---- structure ----------------------------------------------------------

    /// Insert `layer` as child `index` of the group at `parent`.
    pub fn insert_at(&mut self, parent: &[usize], index: usize, layer: Layer) -> Result<(), LayerError> {
        let group = self
            .at_path_mut(parent)
            .ok_or_else(|| LayerError::InvalidPath(parent.to_vec()))?;
        let children = group
            .children_mut()
            .ok_or_else(|| LayerError::NotAGroup(parent.to_vec()))?;
        if index > children.len() {
            let mut path = parent.to_vec();
            path.push(index);
            return Err(LayerError::InvalidPath(path));
        }
        children.insert(index, layer);
        Ok(())
    }

    /// Detach and return the layer at `path`.
    pub fn remove_at(&mut self, path: &[usize]) -> Result<Layer, LayerError> {
        let Some((&index, parent)) = path.split_last() else {
            return Err(LayerError::CannotRemoveRoot);
        };
        let children = self
            .at_path_mut(parent)
            .and_then(Layer::children_mut)
            .ok_or_else(|| LayerError::InvalidPath(path.to_vec()))?;
        if index >= children.len() {
            return Err(LayerError::InvalidPath(path.to_vec()));
        }
        Ok(children.remove(index))
    }
}

// ============================================================================
// LAYER TREE – root group plus the child → parent lookup
// ============================================================================

/// Owns the root group. Parent links are not stored in the children; the
/// `parents` table is rebuilt by `reparent` after every structural change.
#[derive(Clone, Debug)]
pub struct LayerTree {
    root: Layer,
    parents: HashMap<LayerId, LayerId>,
}

impl LayerTree {
    pub fn new(root: Layer) -> Self {
        let mut tree = Self { root, parents: HashMap::new() };
        tree.reparent();
        tree
    }

    pub fn root(&self) -> &Layer {
        &self.root
    }

    /// Mutable access to layer attributes and pixels. Callers that change
    /// the tree's shape must call `reparent` afterwards.
    pub fn root_mut(&mut self) -> &mut Layer {
        &mut self.root
    }

    /// Rebuild the child → parent table.
    pub fn reparent(&mut self) {
        fn visit(layer: &Layer, parents: &mut HashMap<LayerId, LayerId>) {
            for child in layer.children() {
                parents.insert(child.id, layer.id);
                visit(child, parents);
            }
        }
        self.parents.clear();
        visit(&self.root, &mut self.parents);
    }

    pub fn parent_of(&self, id: LayerId) -> Option<LayerId> {
        self.parents.get(&id).copied()
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.root.find(id)
    }

    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.root.find_mut(id)
    }

    pub fn at_path(&self, path: &[usize]) -> Option<&Layer> {
        self.root.at_path(path)
    }

    pub fn at_path_mut(&mut self, path: &[usize]) -> Option<&mut Layer> {
        self.root.at_path_mut(path)
    }

    pub fn path_of(&self, id: LayerId) -> Option<LayerPath> {
        self.root.path_of(id)
    }

    pub fn insert(&mut self, parent: &[usize], index: usize, layer: Layer) -> Result<(), LayerError> {
        self.root.insert_at(parent, index, layer)?;
        self.reparent();
        Ok(())
    }

    pub fn remove(&mut self, path: &[usize]) -> Result<Layer, LayerError> {
        let layer = self.root.remove_at(path)?;
        self.reparent();
        Ok(layer)
    }

    /// Move the layer at `from` so it ends up at `to` (a path valid after
    /// the removal).
    pub fn move_layer(&mut self, from: &[usize], to: &[usize]) -> Result<(), LayerError> {
        let Some((&index, parent)) = to.split_last() else {
            return Err(LayerError::CannotRemoveRoot);
        };
        let layer = self.root.remove_at(from)?;
        if let Err(e) = self.root.insert_at(parent, index, layer.clone()) {
            // Put it back where it was so a failed move is a no-op.
            let (&back, back_parent) = from.split_last().ok_or(LayerError::CannotRemoveRoot)?;
            self.root.insert_at(back_parent, back, layer)?;
            return Err(e);
        }
        self.reparent();
        Ok(())
    }

    /// Total number of layers, root included.
    pub fn len(&self) -> usize {
        self.root.count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.children().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> LayerTree {
        LayerTree::new(Layer::new_group(
            "root",
            vec![
                Layer::new_image("top"),
                Layer::new_group("group", vec![Layer::new_image("inner")]),
                Layer::new_image("bottom"),
            ],
        ))
    }

    #[test]
    fn paths_and_parents_agree() {
        let tree = sample_tree();
        let inner = tree.at_path(&[1, 0]).unwrap().id;
        let group = tree.at_path(&[1]).unwrap().id;
        assert_eq!(tree.path_of(inner), Some(vec![1, 0]));
        assert_eq!(tree.parent_of(inner), Some(group));
        assert_eq!(tree.parent_of(group), Some(tree.root().id));
        assert_eq!(tree.parent_of(tree.root().id), None);
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn reparent_follows_moves() {
        let mut tree = sample_tree();
        let top = tree.at_path(&[0]).unwrap().id;
        let group = tree.at_path(&[1]).unwrap().id;
        tree.move_layer(&[0], &[0, 1]).unwrap();
        assert_eq!(tree.path_of(top), Some(vec![0, 1]));
        assert_eq!(tree.parent_of(top), Some(group));
    }

    #[test]
    fn structural_errors() {
        let mut tree = sample_tree();
        assert_eq!(tree.remove(&[]), Err(LayerError::CannotRemoveRoot));
        assert_eq!(tree.remove(&[7]), Err(LayerError::InvalidPath(vec![7])));
        assert_eq!(
            tree.insert(&[0], 0, Layer::new_image("x")),
            Err(LayerError::NotAGroup(vec![0]))
        );
        assert!(tree.move_layer(&[1], &[1, 0]).is_err());
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn opacity_is_clamped() {
        let mut layer = Layer::new_image("a");
        layer.set_opacity(1.5);
        assert_eq!(layer.opacity(), 1.0);
        layer.set_opacity(-0.1);
        assert_eq!(layer.opacity(), 0.0);
    }
}
