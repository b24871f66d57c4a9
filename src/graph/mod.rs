pub mod attributes;

pub use attributes::{
    BillboardKind, BillboardMode, BillboardOrientation, BoundingBox, GeometryData, LightAttribute,
    LodRange, MaterialRef,
};

/// Index of a node within a [`SceneGraph`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a node is.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Structural grouping with no behavior of its own.
    Group,
    /// Range-gated alternative between coarse and fine children.
    Lod(LodRange),
    /// Container whose children are drawable geometry, one per
    /// structural group so sibling drawables share a single parent.
    LeafContainer,
    /// Drawable vertex data.
    Geometry(GeometryData),
    /// Placeholder for an external model, resolved later by index.
    ModelRef(usize),
}

impl NodeKind {
    /// Whether nodes of this kind may parent other nodes.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            NodeKind::Group | NodeKind::Lod(_) | NodeKind::LeafContainer
        )
    }
}

/// One scene node: a kind plus links and attached state.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub material: Option<MaterialRef>,
    pub light: Option<LightAttribute>,
    pub orientation: Option<BillboardOrientation>,
}

impl Node {
    fn new(kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            kind,
            parent,
            children: Vec::new(),
            material: None,
            light: None,
            orientation: None,
        }
    }
}

/// Arena-allocated scene graph fragment rooted at a group node.
///
/// Nodes are addressed by [`NodeId`] index; detaching a subtree unlinks
/// it from its parent but leaves the arena slot in place, which is fine
/// for per-tile fragments that are dropped as a whole.
#[derive(Debug, Clone)]
pub struct SceneGraph {
    nodes: Vec<Node>,
    root: NodeId,
}

impl SceneGraph {
    /// Create a graph containing only a root group.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Group, None)],
            root: NodeId(0),
        }
    }

    /// The fragment root.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Total allocated nodes, including any detached by pruning.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Create a node of `kind` and link it under `parent`.
    pub fn add_node(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind, Some(parent)));
        self.nodes[parent.index()].children.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    /// Replace a node's child list, fixing up the parent links of the
    /// retained children.
    pub(crate) fn set_children(&mut self, id: NodeId, children: Vec<NodeId>) {
        for &child in &children {
            self.nodes[child.index()].parent = Some(id);
        }
        self.nodes[id.index()].children = children;
    }

    /// Find the single leaf container under `group`, creating it on
    /// first use. Sibling drawables all land in this one container
    /// instead of each bringing its own.
    pub fn leaf_container_for(&mut self, group: NodeId) -> NodeId {
        let existing = self.nodes[group.index()]
            .children
            .iter()
            .copied()
            .find(|c| matches!(self.nodes[c.index()].kind, NodeKind::LeafContainer));
        match existing {
            Some(id) => id,
            None => self.add_node(group, NodeKind::LeafContainer),
        }
    }

    /// Depth-first walk of the subtree rooted at `id`, `id` first.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            graph: self,
            stack: vec![id],
        }
    }

    /// Nodes reachable from the root, root included.
    pub fn reachable_count(&self) -> usize {
        self.descendants(self.root).count()
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a subtree in depth-first order.
pub struct Descendants<'a> {
    graph: &'a SceneGraph,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        let children = &self.graph.nodes[id.index()].children;
        self.stack.extend(children.iter().rev().copied());
        Some(id)
    }
}
