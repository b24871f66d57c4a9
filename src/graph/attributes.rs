use glam::DVec3;

/// Axis-aligned bounding extents of one tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: DVec3,
    pub max: DVec3,
}

impl BoundingBox {
    /// Centre point of the box.
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Length of the space diagonal.
    pub fn diagonal(&self) -> f64 {
        (self.max - self.min).length()
    }
}

/// Visibility range pair gating an LOD node, in paging-system distances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodRange {
    pub near: f64,
    pub far: f64,
}

/// Reference to a material by index, either into the archive-wide table
/// or into the tile's own local material table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialRef {
    Archive(usize),
    Local(usize),
}

/// How billboard geometry re-orients toward the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillboardKind {
    /// Rotate about a fixed axis.
    Axial,
    /// Face the eye point.
    PointEye,
    /// Face the eye point, constrained to stay world-upright.
    PointWorld,
}

impl BillboardKind {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(BillboardKind::Axial),
            1 => Some(BillboardKind::PointEye),
            2 => Some(BillboardKind::PointWorld),
            _ => None,
        }
    }
}

/// Whether a billboard subtree rotates as one block or per primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillboardMode {
    Group,
    Individual,
}

impl BillboardMode {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(BillboardMode::Group),
            1 => Some(BillboardMode::Individual),
            _ => None,
        }
    }
}

/// Orientation metadata attached to geometry parsed under a billboard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillboardOrientation {
    pub kind: BillboardKind,
    pub mode: BillboardMode,
    pub center: DVec3,
    pub axis: DVec3,
}

/// Light parameters accumulated across one or more tokens.
///
/// Fields stay `None` until some token supplies them; later tokens for
/// the same index refine whatever they carry via [`LightAttribute::merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightAttribute {
    pub color: Option<[f32; 3]>,
    pub intensity: Option<f32>,
    pub position: Option<DVec3>,
    pub direction: Option<DVec3>,
}

impl LightAttribute {
    /// Fold another partial description into this one. Present fields
    /// of `other` win; absent fields leave the existing value alone.
    pub fn merge(&mut self, other: &LightAttribute) {
        if other.color.is_some() {
            self.color = other.color;
        }
        if other.intensity.is_some() {
            self.intensity = other.intensity;
        }
        if other.position.is_some() {
            self.position = other.position;
        }
        if other.direction.is_some() {
            self.direction = other.direction;
        }
    }
}

/// Drawable vertex data decoded from one geometry record.
///
/// All buffers are contiguous `Vec<f32>` so hosts can upload them
/// without re-interleaving.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryData {
    /// Interleaved positions: [x, y, z, x, y, z, ...]
    pub positions: Vec<f32>,
    /// Interleaved normals: [nx, ny, nz, ...] or empty
    pub normals: Vec<f32>,
    /// Interleaved UVs: [u, v, u, v, ...] or empty
    pub uvs: Vec<f32>,
}

impl GeometryData {
    /// Number of vertices (positions / 3).
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Whether normals are present.
    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    /// Whether UV coordinates are present.
    pub fn has_uvs(&self) -> bool {
        !self.uvs.is_empty()
    }
}
