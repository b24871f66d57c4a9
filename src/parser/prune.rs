use std::collections::HashSet;

use tracing::debug;

use crate::graph::{NodeId, NodeKind, SceneGraph};

/// Outcome counters, mostly for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Structural nodes detached for having no remaining children.
    pub removed_empty: usize,
    /// Tile-boundary candidate LODs demoted to plain groups.
    pub demoted_lods: usize,
    /// Redundant singleton wrappers collapsed at the fragment top.
    pub collapsed_wrappers: usize,
}

/// Clean a freshly built fragment.
///
/// Runs strictly after the token walk: whether a group ends up empty,
/// and which marked group really wraps the tile, are only knowable once
/// every token has been seen.
pub(crate) fn prune_fragment(
    graph: &mut SceneGraph,
    tile_markers: &HashSet<NodeId>,
) -> PruneStats {
    let mut stats = PruneStats::default();

    let root = graph.root();
    remove_empty(graph, root, &mut stats);
    resolve_tile_boundary(graph, tile_markers, &mut stats);
    collapse_top_wrappers(graph, &mut stats);

    if stats != PruneStats::default() {
        debug!(
            removed = stats.removed_empty,
            demoted = stats.demoted_lods,
            collapsed = stats.collapsed_wrappers,
            "Pruned fragment"
        );
    }
    stats
}

/// Bottom-up removal of structural nodes with no remaining children.
/// Returns whether `id` survives; the root always does.
fn remove_empty(graph: &mut SceneGraph, id: NodeId, stats: &mut PruneStats) -> bool {
    let children: Vec<NodeId> = graph.children(id).to_vec();
    let retained: Vec<NodeId> = children
        .into_iter()
        .filter(|&child| remove_empty(graph, child, stats))
        .collect();
    graph.set_children(id, retained);

    if !graph.node(id).kind.is_container() {
        return true;
    }
    if id == graph.root() {
        return true;
    }
    let keep = !graph.children(id).is_empty();
    if !keep {
        stats.removed_empty += 1;
    }
    keep
}

/// Pick the true tile-bounding group among the marked candidates: the
/// innermost marked node on the single-child structural spine from the
/// root, i.e. the one that exactly wraps all of the tile's top-level
/// content. That one keeps its LOD gating (its range already matches
/// the paging distances); marked LOD wrappers above it are redundant
/// with the paging layer and are demoted to plain groups.
fn resolve_tile_boundary(
    graph: &mut SceneGraph,
    tile_markers: &HashSet<NodeId>,
    stats: &mut PruneStats,
) {
    if tile_markers.is_empty() {
        return;
    }

    let mut spine_marked = Vec::new();
    let mut cursor = graph.root();
    loop {
        if tile_markers.contains(&cursor) {
            spine_marked.push(cursor);
        }
        let children = graph.children(cursor);
        if children.len() != 1 {
            break;
        }
        let only = children[0];
        if !graph.node(only).kind.is_container() {
            break;
        }
        cursor = only;
    }

    // Everything above the innermost spine candidate loses its gating.
    let Some((_boundary, outer)) = spine_marked.split_last() else {
        return;
    };
    for &node in outer {
        if matches!(graph.node(node).kind, NodeKind::Lod(_)) {
            graph.node_mut(node).kind = NodeKind::Group;
            stats.demoted_lods += 1;
        }
    }
}

/// Drop bare singleton group wrappers at the top of the fragment so
/// the root parents the tile content directly.
fn collapse_top_wrappers(graph: &mut SceneGraph, stats: &mut PruneStats) {
    let root = graph.root();
    loop {
        let children = graph.children(root);
        if children.len() != 1 {
            return;
        }
        let only = children[0];
        let node = graph.node(only);
        let bare_group = matches!(node.kind, NodeKind::Group)
            && node.material.is_none()
            && node.light.is_none()
            && node.orientation.is_none();
        if !bare_group {
            return;
        }
        let grandchildren = node.children.clone();
        graph.set_children(root, grandchildren);
        stats.collapsed_wrappers += 1;
    }
}
