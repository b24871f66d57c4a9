/// Token vocabulary of the tile stream.
///
/// Every record on the wire is `[u32 token][u32 payload_len][payload]`,
/// little-endian. Ids outside this set are legal in newer archives and
/// are skipped by the parser, so decoding goes through [`Token::from_raw`]
/// rather than failing on unknown values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    TileHeader,
    Group,
    Lod,
    Geometry,
    ModelRef,
    Billboard,
    LightAttr,
    Layer,
    LocalMaterial,
    /// The previous structural node's children follow.
    Push,
    /// Closes the innermost open subtree.
    Pop,
}

impl Token {
    /// Decode a wire id; `None` means "unrecognized, skip the payload".
    pub fn from_raw(raw: u32) -> Option<Token> {
        match raw {
            1 => Some(Token::TileHeader),
            2 => Some(Token::Group),
            3 => Some(Token::Lod),
            4 => Some(Token::Geometry),
            5 => Some(Token::ModelRef),
            6 => Some(Token::Billboard),
            7 => Some(Token::LightAttr),
            8 => Some(Token::Layer),
            9 => Some(Token::LocalMaterial),
            10 => Some(Token::Push),
            11 => Some(Token::Pop),
            _ => None,
        }
    }

    /// The wire id of this token.
    pub fn raw(self) -> u32 {
        match self {
            Token::TileHeader => 1,
            Token::Group => 2,
            Token::Lod => 3,
            Token::Geometry => 4,
            Token::ModelRef => 5,
            Token::Billboard => 6,
            Token::LightAttr => 7,
            Token::Layer => 8,
            Token::LocalMaterial => 9,
            Token::Push => 10,
            Token::Pop => 11,
        }
    }
}

/// Geometry record flags.
pub const GEOM_HAS_NORMALS: u8 = 1 << 0;
pub const GEOM_HAS_UVS: u8 = 1 << 1;
/// Material index refers to the tile-local table rather than the archive table.
pub const GEOM_LOCAL_MATERIAL: u8 = 1 << 2;
pub const GEOM_HAS_LIGHT: u8 = 1 << 3;

/// Light record field mask.
pub const LIGHT_HAS_COLOR: u8 = 1 << 0;
pub const LIGHT_HAS_POSITION: u8 = 1 << 1;
pub const LIGHT_HAS_DIRECTION: u8 = 1 << 2;

/// Local material record flags.
pub const MAT_HAS_TEXTURE: u8 = 1 << 0;
pub const MAT_HAS_ANISOTROPY: u8 = 1 << 1;
