use std::collections::{HashMap, HashSet};

use crate::error::{Result, TileGraphError};
use crate::graph::{BillboardOrientation, LightAttribute, NodeId};

/// Mutable construction state for one tile parse.
///
/// Owned by a single [`super::TileParser`] and reset before every tile;
/// nothing in here survives into the returned fragment.
#[derive(Debug, Default)]
pub(crate) struct ParseContext {
    /// Ancestor stack: insertion targets of the enclosing subtrees,
    /// innermost last. Balanced push/pop is a structural invariant of
    /// the stream.
    parents: Vec<Option<NodeId>>,
    /// The most specific group available for insertion; the fragment
    /// root when unset.
    current_top: Option<NodeId>,
    /// Node created by the most recent structural handler, consumed by
    /// the next subtree-start marker.
    pending: Option<NodeId>,
    /// Groups flagged as potential tile boundaries. Advisory; the
    /// pruner decides which one actually wraps the tile.
    tile_markers: HashSet<NodeId>,

    under_billboard: bool,
    billboard_levels: u32,
    last_billboard: Option<BillboardOrientation>,

    under_layer: bool,
    layer_levels: u32,
    layer_container: Option<NodeId>,

    /// Light parameters accumulated per index ahead of the geometry
    /// they will be attached to.
    lights: HashMap<u32, LightAttribute>,
}

impl ParseContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insertion target for newly created nodes.
    pub fn current_top(&self, root: NodeId) -> NodeId {
        self.current_top.unwrap_or(root)
    }

    /// Record the node the last handler produced, if any.
    pub fn note_produced(&mut self, node: Option<NodeId>) {
        if node.is_some() {
            self.pending = node;
        }
    }

    /// A subtree-start marker: the pending node's children follow.
    pub fn start_children(&mut self) {
        self.parents.push(self.current_top);
        if let Some(node) = self.pending.take() {
            self.current_top = Some(node);
        }
        if self.under_billboard {
            self.billboard_levels += 1;
        }
        if self.under_layer {
            self.layer_levels += 1;
        }
    }

    /// A subtree-end marker. Pops the ancestor stack and unwinds the
    /// billboard/layer nesting discipline.
    pub fn end_children(&mut self) -> Result<Option<NodeId>> {
        let closed = self.current_top;
        let Some(prev) = self.parents.pop() else {
            return Err(TileGraphError::StructuralImbalance(
                "subtree end without matching start".into(),
            ));
        };
        self.current_top = prev;

        if self.under_billboard {
            self.billboard_levels = self.billboard_levels.saturating_sub(1);
            if self.billboard_levels == 0 {
                self.under_billboard = false;
            }
        }
        if self.under_layer {
            self.layer_levels = self.layer_levels.saturating_sub(1);
            if self.layer_levels == 0 {
                self.under_layer = false;
                self.layer_container = None;
            }
        }
        Ok(closed)
    }

    /// Verify the stream closed every subtree it opened.
    pub fn check_balanced(&self) -> Result<()> {
        if self.parents.is_empty() {
            Ok(())
        } else {
            Err(TileGraphError::StructuralImbalance(format!(
                "{} subtree(s) left open at end of stream",
                self.parents.len()
            )))
        }
    }

    pub fn mark_tile_group(&mut self, node: NodeId) {
        self.tile_markers.insert(node);
    }

    pub fn tile_markers(&self) -> &HashSet<NodeId> {
        &self.tile_markers
    }

    pub fn enter_billboard(&mut self, info: BillboardOrientation) {
        self.last_billboard = Some(info);
        self.under_billboard = true;
    }

    pub fn under_billboard(&self) -> bool {
        self.under_billboard
    }

    pub fn last_billboard(&self) -> Option<&BillboardOrientation> {
        self.last_billboard.as_ref()
    }

    pub fn enter_layer(&mut self, container: NodeId) {
        self.under_layer = true;
        self.layer_container = Some(container);
    }

    pub fn layer_container(&self) -> Option<NodeId> {
        if self.under_layer {
            self.layer_container
        } else {
            None
        }
    }

    /// The deferred light entry for `index`, created on first use.
    pub fn light_attribute(&mut self, index: u32) -> &mut LightAttribute {
        self.lights.entry(index).or_default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
