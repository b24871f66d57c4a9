mod context;
mod prune;
pub mod range;

pub use prune::PruneStats;
pub use range::{remap_max_range, remap_min_range, RangeRemap, RANGE_EPSILON};

use tracing::{debug, info};

use crate::archive::tokens::{
    Token, GEOM_HAS_LIGHT, GEOM_HAS_NORMALS, GEOM_HAS_UVS, GEOM_LOCAL_MATERIAL, LIGHT_HAS_COLOR,
    LIGHT_HAS_DIRECTION, LIGHT_HAS_POSITION, MAT_HAS_ANISOTROPY, MAT_HAS_TEXTURE,
};
use crate::archive::ReadBuffer;
use crate::config::ParserOptions;
use crate::error::Result;
use crate::graph::{
    BillboardKind, BillboardMode, BillboardOrientation, BoundingBox, GeometryData, LightAttribute,
    LodRange, MaterialRef, NodeId, NodeKind, SceneGraph,
};
use crate::resolve::{LocalMaterialTable, MaterialDescriptor};

use context::ParseContext;

/// Per-tile metadata, read once per tile and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TileHeader {
    pub bounds: BoundingBox,
    /// Authored visibility band of the whole tile.
    pub min_range: f64,
    pub max_range: f64,
}

/// The decoded output of one tile: a rooted graph fragment plus the
/// tile header, ownership handed to the caller.
#[derive(Debug)]
pub struct TileFragment {
    pub graph: SceneGraph,
    pub header: Option<TileHeader>,
}

/// Token-driven tile decoder.
///
/// One instance decodes one tile at a time, start to finish, on the
/// caller's thread; hosts decoding tiles concurrently give every tile
/// its own instance. The instance stays reusable after a failed tile.
pub struct TileParser {
    options: ParserOptions,
    ctx: ParseContext,
}

impl TileParser {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            options,
            ctx: ParseContext::new(),
        }
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Decode one tile's token stream into a graph fragment.
    ///
    /// `local_materials` is the caller's table for this tile; material
    /// records in the stream append to it and geometry references it by
    /// index. `ranges` normalizes authored LOD distances against the
    /// distances the paging layer enforces.
    ///
    /// Unrecognized tokens are skipped. A truncated record or an
    /// unbalanced subtree structure aborts the parse with an error and
    /// no fragment.
    pub fn parse_tile(
        &mut self,
        buf: &mut ReadBuffer<'_>,
        local_materials: &mut LocalMaterialTable,
        ranges: RangeRemap,
    ) -> Result<TileFragment> {
        self.ctx.reset();
        let mut graph = SceneGraph::new();
        let mut header: Option<TileHeader> = None;

        while let Some((raw, mut payload)) = buf.next_record()? {
            let Some(token) = Token::from_raw(raw) else {
                debug!(token = raw, "Skipping unrecognized token");
                continue;
            };

            match token {
                Token::Push => self.ctx.start_children(),
                Token::Pop => {
                    self.ctx.end_children()?;
                }
                Token::TileHeader => {
                    header = Some(decode_tile_header(&mut payload)?);
                    self.ctx.note_produced(None);
                }
                Token::Group => {
                    let node = self.handle_group(&mut graph);
                    self.ctx.note_produced(Some(node));
                }
                Token::Lod => {
                    let node = self.handle_lod(&mut payload, &mut graph, &ranges)?;
                    self.ctx.note_produced(Some(node));
                }
                Token::Geometry => {
                    self.handle_geometry(&mut payload, &mut graph)?;
                    self.ctx.note_produced(None);
                }
                Token::ModelRef => {
                    self.handle_model_ref(&mut payload, &mut graph)?;
                    self.ctx.note_produced(None);
                }
                Token::Billboard => {
                    let node = self.handle_billboard(&mut payload, &mut graph)?;
                    self.ctx.note_produced(Some(node));
                }
                Token::LightAttr => {
                    self.handle_light(&mut payload)?;
                    self.ctx.note_produced(None);
                }
                Token::Layer => {
                    let node = self.handle_layer(&mut payload, &mut graph)?;
                    self.ctx.note_produced(Some(node));
                }
                Token::LocalMaterial => {
                    local_materials.push(decode_local_material(&mut payload)?);
                    self.ctx.note_produced(None);
                }
            }
        }

        self.ctx.check_balanced()?;

        let stats = prune::prune_fragment(&mut graph, self.ctx.tile_markers());
        info!(
            nodes = graph.reachable_count(),
            removed = stats.removed_empty,
            "Parsed tile fragment"
        );

        Ok(TileFragment { graph, header })
    }

    /// Resolve a tile's collected local materials, applying this
    /// parser's default anisotropy where the archive left it out.
    /// Best-effort; returns the number of entries resolved.
    pub fn load_local_materials<S: crate::resolve::TextureSource>(
        &self,
        table: &mut LocalMaterialTable,
        source: &mut S,
    ) -> usize {
        table.load_all(source, self.options.default_max_anisotropy)
    }

    fn handle_group(&mut self, graph: &mut SceneGraph) -> NodeId {
        let top = self.ctx.current_top(graph.root());
        graph.add_node(top, NodeKind::Group)
    }

    fn handle_lod(
        &mut self,
        payload: &mut ReadBuffer<'_>,
        graph: &mut SceneGraph,
        ranges: &RangeRemap,
    ) -> Result<NodeId> {
        let near = payload.read_f64("lod near range")?;
        let far = payload.read_f64("lod far range")?;

        let remapped = LodRange {
            near: ranges.min_range(near),
            far: ranges.max_range(far),
        };
        let top = self.ctx.current_top(graph.root());
        let node = graph.add_node(top, NodeKind::Lod(remapped));

        // An LOD spanning the tile's whole authored band is a candidate
        // for being the tile boundary itself.
        if near - ranges.real_min < RANGE_EPSILON && ranges.real_max - far < RANGE_EPSILON {
            self.ctx.mark_tile_group(node);
        }
        Ok(node)
    }

    fn handle_geometry(&mut self, payload: &mut ReadBuffer<'_>, graph: &mut SceneGraph) -> Result<()> {
        let (data, material, light_index) = decode_geometry(payload)?;

        // Layer geometry goes to the layer's own container; everything
        // else shares the single container of the enclosing group.
        let parent = match self.ctx.layer_container() {
            Some(container) => container,
            None => {
                let top = self.ctx.current_top(graph.root());
                graph.leaf_container_for(top)
            }
        };

        let leaf = graph.add_node(parent, NodeKind::Geometry(data));
        if let Some(ix) = light_index {
            let light = self.ctx.light_attribute(ix).clone();
            graph.node_mut(leaf).light = Some(light);
        }
        graph.node_mut(leaf).material = material;
        if self.ctx.under_billboard() {
            graph.node_mut(leaf).orientation = self.ctx.last_billboard().copied();
        }
        Ok(())
    }

    fn handle_model_ref(
        &mut self,
        payload: &mut ReadBuffer<'_>,
        graph: &mut SceneGraph,
    ) -> Result<()> {
        let index = payload.read_u32("model reference index")? as usize;
        let top = self.ctx.current_top(graph.root());
        // Placeholder only; the model itself is loaded on demand later.
        graph.add_node(top, NodeKind::ModelRef(index));
        Ok(())
    }

    fn handle_billboard(
        &mut self,
        payload: &mut ReadBuffer<'_>,
        graph: &mut SceneGraph,
    ) -> Result<NodeId> {
        let info = decode_billboard(payload)?;
        self.ctx.enter_billboard(info);
        let top = self.ctx.current_top(graph.root());
        Ok(graph.add_node(top, NodeKind::Group))
    }

    fn handle_light(&mut self, payload: &mut ReadBuffer<'_>) -> Result<()> {
        let (index, partial) = decode_light(payload)?;
        self.ctx.light_attribute(index).merge(&partial);
        Ok(())
    }

    fn handle_layer(
        &mut self,
        payload: &mut ReadBuffer<'_>,
        graph: &mut SceneGraph,
    ) -> Result<NodeId> {
        let id = payload.read_u32("layer id")?;
        let top = self.ctx.current_top(graph.root());
        let group = graph.add_node(top, NodeKind::Group);
        let container = graph.add_node(group, NodeKind::LeafContainer);
        self.ctx.enter_layer(container);
        debug!(layer = id, "Entered layer subgraph");
        Ok(group)
    }
}

impl Default for TileParser {
    fn default() -> Self {
        Self::new(ParserOptions::default())
    }
}

fn decode_tile_header(buf: &mut ReadBuffer<'_>) -> Result<TileHeader> {
    let min = buf.read_dvec3("tile bounds min")?;
    let max = buf.read_dvec3("tile bounds max")?;
    let min_range = buf.read_f64("tile min range")?;
    let max_range = buf.read_f64("tile max range")?;
    Ok(TileHeader {
        bounds: BoundingBox { min, max },
        min_range,
        max_range,
    })
}

fn decode_geometry(
    buf: &mut ReadBuffer<'_>,
) -> Result<(GeometryData, Option<MaterialRef>, Option<u32>)> {
    let verts = buf.read_u32("geometry vertex count")? as usize;
    let flags = buf.read_u8("geometry flags")?;
    let material_index = buf.read_i32("geometry material index")?;
    let light_index = if flags & GEOM_HAS_LIGHT != 0 {
        Some(buf.read_u32("geometry light index")?)
    } else {
        None
    };

    let positions = buf.read_f32_buffer(verts * 3, "geometry positions")?;
    let normals = if flags & GEOM_HAS_NORMALS != 0 {
        buf.read_f32_buffer(verts * 3, "geometry normals")?
    } else {
        Vec::new()
    };
    let uvs = if flags & GEOM_HAS_UVS != 0 {
        buf.read_f32_buffer(verts * 2, "geometry uvs")?
    } else {
        Vec::new()
    };

    let material = if material_index < 0 {
        None
    } else if flags & GEOM_LOCAL_MATERIAL != 0 {
        Some(MaterialRef::Local(material_index as usize))
    } else {
        Some(MaterialRef::Archive(material_index as usize))
    };

    Ok((
        GeometryData {
            positions,
            normals,
            uvs,
        },
        material,
        light_index,
    ))
}

fn decode_billboard(buf: &mut ReadBuffer<'_>) -> Result<BillboardOrientation> {
    let raw_kind = buf.read_u8("billboard kind")?;
    let raw_mode = buf.read_u8("billboard mode")?;
    let center = buf.read_dvec3("billboard center")?;
    let axis = buf.read_dvec3("billboard axis")?;

    let kind = BillboardKind::from_raw(raw_kind).unwrap_or_else(|| {
        debug!(raw = raw_kind, "Unknown billboard kind, treating as axial");
        BillboardKind::Axial
    });
    let mode = BillboardMode::from_raw(raw_mode).unwrap_or_else(|| {
        debug!(raw = raw_mode, "Unknown billboard mode, treating as group");
        BillboardMode::Group
    });

    Ok(BillboardOrientation {
        kind,
        mode,
        center,
        axis,
    })
}

fn decode_light(buf: &mut ReadBuffer<'_>) -> Result<(u32, LightAttribute)> {
    let index = buf.read_u32("light index")?;
    let mask = buf.read_u8("light field mask")?;

    let mut light = LightAttribute::default();
    if mask & LIGHT_HAS_COLOR != 0 {
        let r = buf.read_f32("light color")?;
        let g = buf.read_f32("light color")?;
        let b = buf.read_f32("light color")?;
        light.color = Some([r, g, b]);
        light.intensity = Some(buf.read_f32("light intensity")?);
    }
    if mask & LIGHT_HAS_POSITION != 0 {
        light.position = Some(buf.read_dvec3("light position")?);
    }
    if mask & LIGHT_HAS_DIRECTION != 0 {
        light.direction = Some(buf.read_dvec3("light direction")?);
    }
    Ok((index, light))
}

fn decode_local_material(buf: &mut ReadBuffer<'_>) -> Result<MaterialDescriptor> {
    let flags = buf.read_u8("material flags")?;
    let mut base_color = [0.0f32; 4];
    for c in &mut base_color {
        *c = buf.read_f32("material base color")?;
    }
    let anisotropy = if flags & MAT_HAS_ANISOTROPY != 0 {
        Some(buf.read_f32("material anisotropy")?)
    } else {
        None
    };
    let name = buf.read_string("material name")?;
    let texture = if flags & MAT_HAS_TEXTURE != 0 {
        Some(buf.read_string("material texture")?)
    } else {
        None
    };

    Ok(MaterialDescriptor {
        name,
        base_color,
        texture,
        anisotropy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::TokenStreamWriter;
    use crate::error::TileGraphError;
    use glam::DVec3;

    fn triangle() -> GeometryData {
        GeometryData {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            ..Default::default()
        }
    }

    fn unit_bounds() -> BoundingBox {
        BoundingBox {
            min: DVec3::ZERO,
            max: DVec3::ONE,
        }
    }

    fn parse(stream: Vec<u8>, ranges: RangeRemap) -> Result<(TileFragment, LocalMaterialTable)> {
        let mut parser = TileParser::default();
        let mut locals = LocalMaterialTable::new();
        let mut buf = ReadBuffer::new(&stream);
        let fragment = parser.parse_tile(&mut buf, &mut locals, ranges)?;
        Ok((fragment, locals))
    }

    fn default_ranges() -> RangeRemap {
        RangeRemap::new(0.0, 1000.0, 500.0)
    }

    #[test]
    fn tile_lod_scenario_remaps_and_hoists() {
        let mut w = TokenStreamWriter::new();
        w.tile_header(&unit_bounds(), 0.0, 1000.0);
        w.group();
        w.push();
        w.lod(0.00005, 1000.0);
        w.push();
        w.geometry(&triangle(), Some(MaterialRef::Archive(0)), None);
        w.pop();
        w.pop();

        let (fragment, _) = parse(w.finish(), default_ranges()).unwrap();
        let graph = &fragment.graph;
        let root = graph.root();

        // The singleton wrapper collapses: one LOD child under the root.
        assert_eq!(graph.children(root).len(), 1);
        let lod = graph.children(root)[0];
        match &graph.node(lod).kind {
            NodeKind::Lod(range) => {
                assert_eq!(range.near, 0.0);
                assert_eq!(range.far, 500.0);
            }
            other => panic!("expected LOD child, got {other:?}"),
        }

        // One geometry leaf inside the LOD's container.
        let container = graph.children(lod)[0];
        assert!(matches!(graph.node(container).kind, NodeKind::LeafContainer));
        let leaves = graph.children(container);
        assert_eq!(leaves.len(), 1);
        assert!(matches!(graph.node(leaves[0]).kind, NodeKind::Geometry(_)));
        assert_eq!(
            graph.node(leaves[0]).material,
            Some(MaterialRef::Archive(0))
        );

        let header = fragment.header.unwrap();
        assert_eq!(header.min_range, 0.0);
        assert_eq!(header.max_range, 1000.0);
        assert_eq!(header.bounds, unit_bounds());
    }

    #[test]
    fn empty_group_prunes_to_bare_root() {
        let mut w = TokenStreamWriter::new();
        w.group();
        w.push();
        w.pop();

        let (fragment, _) = parse(w.finish(), default_ranges()).unwrap();
        assert!(fragment.graph.children(fragment.graph.root()).is_empty());
    }

    #[test]
    fn unmatched_pop_is_structural_imbalance() {
        let mut w = TokenStreamWriter::new();
        w.group();
        w.push();
        w.pop();
        w.pop();

        let err = parse(w.finish(), default_ranges()).unwrap_err();
        assert!(matches!(err, TileGraphError::StructuralImbalance(_)));
    }

    #[test]
    fn unclosed_subtree_is_structural_imbalance() {
        let mut w = TokenStreamWriter::new();
        w.group();
        w.push();
        w.geometry(&triangle(), None, None);

        let err = parse(w.finish(), default_ranges()).unwrap_err();
        assert!(matches!(err, TileGraphError::StructuralImbalance(_)));
    }

    #[test]
    fn unknown_tokens_are_skipped() {
        let mut w = TokenStreamWriter::new();
        w.group();
        w.push();
        w.raw_record(0xBEEF, &[1, 2, 3, 4]);
        w.geometry(&triangle(), None, None);
        w.pop();

        let (fragment, _) = parse(w.finish(), default_ranges()).unwrap();
        let graph = &fragment.graph;
        let container = graph.children(graph.root())[0];
        assert_eq!(graph.children(container).len(), 1);
    }

    #[test]
    fn truncated_payload_is_fatal() {
        let mut w = TokenStreamWriter::new();
        w.group();
        w.push();
        // Claims 3 vertices but carries no buffers.
        let mut payload = Vec::new();
        payload.extend_from_slice(&3u32.to_le_bytes());
        payload.push(0); // flags
        payload.extend_from_slice(&(-1i32).to_le_bytes());
        w.raw_record(Token::Geometry.raw(), &payload);
        w.pop();

        let err = parse(w.finish(), default_ranges()).unwrap_err();
        assert!(matches!(err, TileGraphError::StreamTruncated(_)));
    }

    #[test]
    fn sibling_geometry_shares_one_container() {
        let mut w = TokenStreamWriter::new();
        w.group();
        w.push();
        w.geometry(&triangle(), None, None);
        w.geometry(&triangle(), None, None);
        w.geometry(&triangle(), None, None);
        w.pop();

        let (fragment, _) = parse(w.finish(), default_ranges()).unwrap();
        let graph = &fragment.graph;
        let root = fragment.graph.root();

        // Wrapper collapsed: exactly one container, three drawables.
        assert_eq!(graph.children(root).len(), 1);
        let container = graph.children(root)[0];
        assert!(matches!(graph.node(container).kind, NodeKind::LeafContainer));
        assert_eq!(graph.children(container).len(), 3);
    }

    #[test]
    fn billboard_orients_only_its_subtree() {
        let info = BillboardOrientation {
            kind: BillboardKind::Axial,
            mode: BillboardMode::Group,
            center: DVec3::new(1.0, 2.0, 3.0),
            axis: DVec3::Z,
        };

        let mut w = TokenStreamWriter::new();
        w.group();
        w.push();
        w.billboard(&info);
        w.push();
        w.geometry(&triangle(), None, None);
        w.pop();
        w.geometry(&triangle(), None, None); // after the billboard closed
        w.pop();

        let (fragment, _) = parse(w.finish(), default_ranges()).unwrap();
        let graph = &fragment.graph;

        let mut oriented = 0;
        let mut plain = 0;
        for id in graph.descendants(graph.root()) {
            if matches!(graph.node(id).kind, NodeKind::Geometry(_)) {
                match graph.node(id).orientation {
                    Some(o) => {
                        assert_eq!(o.center, info.center);
                        oriented += 1;
                    }
                    None => plain += 1,
                }
            }
        }
        assert_eq!(oriented, 1);
        assert_eq!(plain, 1);
    }

    #[test]
    fn layer_geometry_routes_to_layer_container() {
        let mut w = TokenStreamWriter::new();
        w.group();
        w.push();
        w.geometry(&triangle(), None, None); // base geometry
        w.layer(1);
        w.push();
        w.geometry(&triangle(), None, None); // overlay geometry
        w.pop();
        w.pop();

        let (fragment, _) = parse(w.finish(), default_ranges()).unwrap();
        let graph = &fragment.graph;
        let root = graph.root();

        // Base container and the layer group, each with one drawable.
        let children = graph.children(root);
        assert_eq!(children.len(), 2);
        let base = children
            .iter()
            .find(|&&c| matches!(graph.node(c).kind, NodeKind::LeafContainer))
            .copied()
            .unwrap();
        let layer_group = children
            .iter()
            .find(|&&c| matches!(graph.node(c).kind, NodeKind::Group))
            .copied()
            .unwrap();

        assert_eq!(graph.children(base).len(), 1);
        let layer_container = graph.children(layer_group)[0];
        assert!(matches!(
            graph.node(layer_container).kind,
            NodeKind::LeafContainer
        ));
        assert_eq!(graph.children(layer_container).len(), 1);
    }

    #[test]
    fn model_reference_stays_a_placeholder() {
        let mut w = TokenStreamWriter::new();
        w.group();
        w.push();
        w.model_ref(4);
        w.pop();

        let (fragment, _) = parse(w.finish(), default_ranges()).unwrap();
        let graph = &fragment.graph;
        let placeholder = graph
            .descendants(graph.root())
            .find(|&id| matches!(graph.node(id).kind, NodeKind::ModelRef(_)))
            .unwrap();
        assert!(matches!(graph.node(placeholder).kind, NodeKind::ModelRef(4)));
    }

    #[test]
    fn deferred_light_attaches_merged_attribute() {
        let mut w = TokenStreamWriter::new();
        w.group();
        w.push();
        // Light 2 described across two tokens before its geometry.
        w.light_attr(
            2,
            &LightAttribute {
                color: Some([1.0, 0.8, 0.6]),
                intensity: Some(2.0),
                ..Default::default()
            },
        );
        w.light_attr(
            2,
            &LightAttribute {
                position: Some(DVec3::new(4.0, 5.0, 6.0)),
                ..Default::default()
            },
        );
        w.geometry(&triangle(), None, Some(2));
        w.pop();

        let (fragment, _) = parse(w.finish(), default_ranges()).unwrap();
        let graph = &fragment.graph;
        let leaf = graph
            .descendants(graph.root())
            .find(|&id| matches!(graph.node(id).kind, NodeKind::Geometry(_)))
            .unwrap();

        let light = graph.node(leaf).light.as_ref().unwrap();
        assert_eq!(light.color, Some([1.0, 0.8, 0.6]));
        assert_eq!(light.intensity, Some(2.0));
        assert_eq!(light.position, Some(DVec3::new(4.0, 5.0, 6.0)));
    }

    #[test]
    fn local_materials_collect_and_resolve_references() {
        let mut w = TokenStreamWriter::new();
        w.local_material("grass", [0.2, 0.6, 0.2, 1.0], Some("grass.png"), Some(8.0));
        w.group();
        w.push();
        w.geometry(&triangle(), Some(MaterialRef::Local(0)), None);
        w.pop();

        let (fragment, locals) = parse(w.finish(), default_ranges()).unwrap();
        assert_eq!(locals.len(), 1);
        let desc = locals.descriptor(0).unwrap();
        assert_eq!(desc.name, "grass");
        assert_eq!(desc.texture.as_deref(), Some("grass.png"));
        assert_eq!(desc.anisotropy, Some(8.0));

        let graph = &fragment.graph;
        let leaf = graph
            .descendants(graph.root())
            .find(|&id| matches!(graph.node(id).kind, NodeKind::Geometry(_)))
            .unwrap();
        assert_eq!(graph.node(leaf).material, Some(MaterialRef::Local(0)));
    }

    #[test]
    fn parser_reusable_after_failed_tile() {
        let mut parser = TileParser::default();
        let ranges = default_ranges();

        let mut bad = TokenStreamWriter::new();
        bad.group();
        bad.push(); // never closed
        let bad = bad.finish();
        let mut locals = LocalMaterialTable::new();
        assert!(parser
            .parse_tile(&mut ReadBuffer::new(&bad), &mut locals, ranges)
            .is_err());

        let mut good = TokenStreamWriter::new();
        good.group();
        good.push();
        good.geometry(&triangle(), None, None);
        good.pop();
        let good = good.finish();
        let mut locals = LocalMaterialTable::new();
        let fragment = parser
            .parse_tile(&mut ReadBuffer::new(&good), &mut locals, ranges)
            .unwrap();
        assert_eq!(fragment.graph.reachable_count(), 3);
    }

    #[test]
    fn geometry_normals_and_uvs_decode() {
        let data = GeometryData {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            uvs: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
        };
        let mut w = TokenStreamWriter::new();
        w.group();
        w.push();
        w.geometry(&data, None, None);
        w.pop();

        let (fragment, _) = parse(w.finish(), default_ranges()).unwrap();
        let graph = &fragment.graph;
        let leaf = graph
            .descendants(graph.root())
            .find(|&id| matches!(graph.node(id).kind, NodeKind::Geometry(_)))
            .unwrap();
        let NodeKind::Geometry(decoded) = &graph.node(leaf).kind else {
            unreachable!()
        };
        assert_eq!(decoded, &data);
    }
}
