use byteorder::{ByteOrder, LittleEndian};

use crate::graph::{BillboardOrientation, BoundingBox, GeometryData, LightAttribute, MaterialRef};

use super::tokens::{
    Token, GEOM_HAS_LIGHT, GEOM_HAS_NORMALS, GEOM_HAS_UVS, GEOM_LOCAL_MATERIAL, LIGHT_HAS_COLOR,
    LIGHT_HAS_DIRECTION, LIGHT_HAS_POSITION, MAT_HAS_ANISOTROPY, MAT_HAS_TEXTURE,
};

/// Encoder for tile token streams.
///
/// Produces the exact framing [`super::ReadBuffer`] consumes. Hosts use
/// it to author fixtures; the crate's tests and benches build synthetic
/// tiles with it.
#[derive(Debug, Default)]
pub struct TokenStreamWriter {
    buf: Vec<u8>,
}

impl TokenStreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, token: Token, payload: &[u8]) {
        self.raw_record(token.raw(), payload);
    }

    /// Emit a record with an arbitrary wire id. Ids outside the known
    /// vocabulary are how forward-compatibility is exercised.
    pub fn raw_record(&mut self, raw: u32, payload: &[u8]) {
        self.buf.extend_from_slice(&raw.to_le_bytes());
        self.buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(payload);
    }

    pub fn tile_header(&mut self, bounds: &BoundingBox, min_range: f64, max_range: f64) {
        let mut p = Payload::new();
        p.dvec3(bounds.min.into());
        p.dvec3(bounds.max.into());
        p.f64(min_range);
        p.f64(max_range);
        self.record(Token::TileHeader, &p.0);
    }

    pub fn group(&mut self) {
        self.record(Token::Group, &[]);
    }

    /// Authored visibility range pair, pre-remap.
    pub fn lod(&mut self, near: f64, far: f64) {
        let mut p = Payload::new();
        p.f64(near);
        p.f64(far);
        self.record(Token::Lod, &p.0);
    }

    pub fn geometry(
        &mut self,
        data: &GeometryData,
        material: Option<MaterialRef>,
        light: Option<u32>,
    ) {
        let mut flags = 0u8;
        if data.has_normals() {
            flags |= GEOM_HAS_NORMALS;
        }
        if data.has_uvs() {
            flags |= GEOM_HAS_UVS;
        }
        let material_index = match material {
            Some(MaterialRef::Archive(ix)) => ix as i32,
            Some(MaterialRef::Local(ix)) => {
                flags |= GEOM_LOCAL_MATERIAL;
                ix as i32
            }
            None => -1,
        };
        if light.is_some() {
            flags |= GEOM_HAS_LIGHT;
        }

        let mut p = Payload::new();
        p.u32(data.vertex_count() as u32);
        p.u8(flags);
        p.i32(material_index);
        if let Some(ix) = light {
            p.u32(ix);
        }
        p.f32_buffer(&data.positions);
        if data.has_normals() {
            p.f32_buffer(&data.normals);
        }
        if data.has_uvs() {
            p.f32_buffer(&data.uvs);
        }
        self.record(Token::Geometry, &p.0);
    }

    pub fn model_ref(&mut self, index: u32) {
        let mut p = Payload::new();
        p.u32(index);
        self.record(Token::ModelRef, &p.0);
    }

    pub fn billboard(&mut self, info: &BillboardOrientation) {
        let kind = match info.kind {
            crate::graph::BillboardKind::Axial => 0u8,
            crate::graph::BillboardKind::PointEye => 1,
            crate::graph::BillboardKind::PointWorld => 2,
        };
        let mode = match info.mode {
            crate::graph::BillboardMode::Group => 0u8,
            crate::graph::BillboardMode::Individual => 1,
        };
        let mut p = Payload::new();
        p.u8(kind);
        p.u8(mode);
        p.dvec3(info.center.into());
        p.dvec3(info.axis.into());
        self.record(Token::Billboard, &p.0);
    }

    pub fn light_attr(&mut self, index: u32, light: &LightAttribute) {
        let mut mask = 0u8;
        if light.color.is_some() {
            mask |= LIGHT_HAS_COLOR;
        }
        if light.position.is_some() {
            mask |= LIGHT_HAS_POSITION;
        }
        if light.direction.is_some() {
            mask |= LIGHT_HAS_DIRECTION;
        }

        let mut p = Payload::new();
        p.u32(index);
        p.u8(mask);
        if let Some(color) = light.color {
            for c in color {
                p.f32(c);
            }
            p.f32(light.intensity.unwrap_or(1.0));
        }
        if let Some(pos) = light.position {
            p.dvec3(pos.into());
        }
        if let Some(dir) = light.direction {
            p.dvec3(dir.into());
        }
        self.record(Token::LightAttr, &p.0);
    }

    pub fn layer(&mut self, id: u32) {
        let mut p = Payload::new();
        p.u32(id);
        self.record(Token::Layer, &p.0);
    }

    pub fn local_material(
        &mut self,
        name: &str,
        base_color: [f32; 4],
        texture: Option<&str>,
        anisotropy: Option<f32>,
    ) {
        let mut flags = 0u8;
        if texture.is_some() {
            flags |= MAT_HAS_TEXTURE;
        }
        if anisotropy.is_some() {
            flags |= MAT_HAS_ANISOTROPY;
        }

        let mut p = Payload::new();
        p.u8(flags);
        for c in base_color {
            p.f32(c);
        }
        if let Some(a) = anisotropy {
            p.f32(a);
        }
        p.string(name);
        if let Some(tex) = texture {
            p.string(tex);
        }
        self.record(Token::LocalMaterial, &p.0);
    }

    /// The previous structural record's children follow.
    pub fn push(&mut self) {
        self.record(Token::Push, &[]);
    }

    /// Close the innermost open subtree.
    pub fn pop(&mut self) {
        self.record(Token::Pop, &[]);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Little-endian payload accumulator.
struct Payload(Vec<u8>);

impl Payload {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn dvec3(&mut self, v: [f64; 3]) {
        for c in v {
            self.f64(c);
        }
    }

    fn f32_buffer(&mut self, values: &[f32]) {
        let start = self.0.len();
        self.0.resize(start + values.len() * 4, 0);
        LittleEndian::write_f32_into(values, &mut self.0[start..]);
    }

    fn string(&mut self, s: &str) {
        self.0.extend_from_slice(&(s.len() as u16).to_le_bytes());
        self.0.extend_from_slice(s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ReadBuffer;
    use glam::DVec3;

    #[test]
    fn framing_round_trip() {
        let mut writer = TokenStreamWriter::new();
        writer.group();
        writer.push();
        writer.lod(10.0, 500.0);
        writer.pop();

        let bytes = writer.finish();
        let mut buf = ReadBuffer::new(&bytes);

        let (tok, _) = buf.next_record().unwrap().unwrap();
        assert_eq!(Token::from_raw(tok), Some(Token::Group));
        let (tok, _) = buf.next_record().unwrap().unwrap();
        assert_eq!(Token::from_raw(tok), Some(Token::Push));
        let (tok, mut payload) = buf.next_record().unwrap().unwrap();
        assert_eq!(Token::from_raw(tok), Some(Token::Lod));
        assert_eq!(payload.read_f64("near").unwrap(), 10.0);
        assert_eq!(payload.read_f64("far").unwrap(), 500.0);
        let (tok, _) = buf.next_record().unwrap().unwrap();
        assert_eq!(Token::from_raw(tok), Some(Token::Pop));
        assert!(buf.next_record().unwrap().is_none());
    }

    #[test]
    fn geometry_payload_layout() {
        let data = GeometryData {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            uvs: vec![],
        };
        let mut writer = TokenStreamWriter::new();
        writer.geometry(&data, Some(MaterialRef::Local(2)), Some(7));

        let bytes = writer.finish();
        let mut buf = ReadBuffer::new(&bytes);
        let (_, mut payload) = buf.next_record().unwrap().unwrap();

        assert_eq!(payload.read_u32("verts").unwrap(), 3);
        let flags = payload.read_u8("flags").unwrap();
        assert_ne!(flags & GEOM_HAS_NORMALS, 0);
        assert_eq!(flags & GEOM_HAS_UVS, 0);
        assert_ne!(flags & GEOM_LOCAL_MATERIAL, 0);
        assert_ne!(flags & GEOM_HAS_LIGHT, 0);
        assert_eq!(payload.read_i32("material").unwrap(), 2);
        assert_eq!(payload.read_u32("light").unwrap(), 7);
        let positions = payload.read_f32_buffer(9, "positions").unwrap();
        assert_eq!(positions, data.positions);
    }

    #[test]
    fn billboard_payload_layout() {
        let info = BillboardOrientation {
            kind: crate::graph::BillboardKind::Axial,
            mode: crate::graph::BillboardMode::Group,
            center: DVec3::new(1.0, 2.0, 3.0),
            axis: DVec3::Z,
        };
        let mut writer = TokenStreamWriter::new();
        writer.billboard(&info);

        let bytes = writer.finish();
        let mut buf = ReadBuffer::new(&bytes);
        let (_, mut payload) = buf.next_record().unwrap().unwrap();
        assert_eq!(payload.read_u8("kind").unwrap(), 0);
        assert_eq!(payload.read_u8("mode").unwrap(), 0);
        assert_eq!(payload.read_dvec3("center").unwrap(), info.center);
        assert_eq!(payload.read_dvec3("axis").unwrap(), DVec3::Z);
    }
}
