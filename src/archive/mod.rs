pub mod buffer;
pub mod tokens;
pub mod writer;

use std::fs::File;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::ParserOptions;
use crate::error::{Result, TileGraphError};
use crate::parser::{RangeRemap, TileFragment, TileParser};
use crate::resolve::LocalMaterialTable;

pub use buffer::ReadBuffer;
pub use tokens::Token;
pub use writer::TokenStreamWriter;

/// File identification.
pub const ARCHIVE_MAGIC: [u8; 4] = *b"TGRF";
pub const ARCHIVE_VERSION: u32 = 1;

const HEADER_LEN: usize = 16;

/// Packed on-disk directory record. Little-endian fields.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct RawTileEntry {
    x: i32,
    y: i32,
    lod: u32,
    _pad: u32,
    offset: u64,
    len: u64,
}

const ENTRY_LEN: usize = std::mem::size_of::<RawTileEntry>();

/// One tile's position in the paging grid and its byte span in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileEntry {
    pub x: i32,
    pub y: i32,
    pub lod: u32,
    pub offset: u64,
    pub len: u64,
}

/// Memory-mapped tile archive.
///
/// The map stays open for the archive's lifetime; tile buffers borrow
/// directly from it, so no tile payload is ever copied before decode.
#[derive(Debug)]
pub struct Archive {
    map: Mmap,
    entries: Vec<TileEntry>,
    model_names: Vec<String>,
}

impl Archive {
    /// Open and index an archive file.
    pub fn open(path: &Path) -> Result<Archive> {
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };

        let (entries, model_names) = parse_directory(&map)?;
        info!(
            path = %path.display(),
            tiles = entries.len(),
            models = model_names.len(),
            "Opened tile archive"
        );

        Ok(Archive {
            map,
            entries,
            model_names,
        })
    }

    pub fn tile_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[TileEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&TileEntry> {
        self.entries.get(index)
    }

    /// Names of the external models this archive references; the model
    /// reference table is sized to this list.
    pub fn model_names(&self) -> &[String] {
        &self.model_names
    }

    /// A cursor over one tile's token stream, borrowed from the map.
    pub fn tile_buffer(&self, index: usize) -> Result<ReadBuffer<'_>> {
        let entry = self.entries.get(index).ok_or_else(|| {
            TileGraphError::Archive(format!(
                "tile index {index} out of range ({} tiles)",
                self.entries.len()
            ))
        })?;
        let start = entry.offset as usize;
        let end = start + entry.len as usize;
        if end > self.map.len() {
            return Err(TileGraphError::Archive(format!(
                "tile {index} spans {start}..{end} beyond file of {} bytes",
                self.map.len()
            )));
        }
        Ok(ReadBuffer::new(&self.map[start..end]))
    }

    /// Decode every tile, one parser/context instance per tile, fanned
    /// out over the rayon pool. Any tile's fatal decode error fails the
    /// whole call.
    pub fn decode_all(&self, options: &ParserOptions, ranges: RangeRemap) -> Result<Vec<DecodedTile>> {
        (0..self.entries.len())
            .into_par_iter()
            .map(|i| {
                let mut parser = TileParser::new(options.clone());
                let mut locals = LocalMaterialTable::new();
                let mut buf = self.tile_buffer(i)?;
                let fragment = parser.parse_tile(&mut buf, &mut locals, ranges)?;
                Ok(DecodedTile {
                    entry: self.entries[i],
                    fragment,
                    local_materials: locals,
                })
            })
            .collect()
    }
}

/// One decoded tile: its directory entry, the graph fragment, and the
/// local materials collected during the parse.
pub struct DecodedTile {
    pub entry: TileEntry,
    pub fragment: TileFragment,
    pub local_materials: LocalMaterialTable,
}

fn parse_directory(data: &[u8]) -> Result<(Vec<TileEntry>, Vec<String>)> {
    let mut buf = ReadBuffer::new(data);

    let mut magic = [0u8; 4];
    for b in &mut magic {
        *b = buf
            .read_u8("archive magic")
            .map_err(|_| TileGraphError::Archive("file too short for header".into()))?;
    }
    if magic != ARCHIVE_MAGIC {
        return Err(TileGraphError::Archive(format!(
            "bad magic {magic:?}, expected {ARCHIVE_MAGIC:?}"
        )));
    }

    let version = buf.read_u32("archive version")?;
    if version != ARCHIVE_VERSION {
        return Err(TileGraphError::Archive(format!(
            "unsupported version {version}, expected {ARCHIVE_VERSION}"
        )));
    }

    let tile_count = buf.read_u32("tile count")? as usize;
    let model_count = buf.read_u32("model count")? as usize;

    let mut entries = Vec::with_capacity(tile_count);
    for i in 0..tile_count {
        let start = HEADER_LEN + i * ENTRY_LEN;
        let end = start + ENTRY_LEN;
        if end > data.len() {
            return Err(TileGraphError::Archive(format!(
                "directory truncated at entry {i}"
            )));
        }
        let raw: RawTileEntry = bytemuck::pod_read_unaligned(&data[start..end]);
        entries.push(TileEntry {
            x: raw.x,
            y: raw.y,
            lod: raw.lod,
            offset: raw.offset,
            len: raw.len,
        });
    }

    let mut names = ReadBuffer::new(&data[(HEADER_LEN + tile_count * ENTRY_LEN).min(data.len())..]);
    let mut model_names = Vec::with_capacity(model_count);
    for _ in 0..model_count {
        model_names.push(names.read_string("model name")?);
    }

    debug!(tiles = tile_count, models = model_count, "Parsed archive directory");
    Ok((entries, model_names))
}

/// Assembles an archive file from encoded tile streams.
#[derive(Debug, Default)]
pub struct ArchiveWriter {
    tiles: Vec<(i32, i32, u32, Vec<u8>)>,
    model_names: Vec<String>,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model_name(&mut self, name: impl Into<String>) {
        self.model_names.push(name.into());
    }

    /// Register a tile at grid position (x, y) and LOD level `lod` with
    /// an already-encoded token stream.
    pub fn add_tile(&mut self, x: i32, y: i32, lod: u32, stream: Vec<u8>) {
        self.tiles.push((x, y, lod, stream));
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut names_section = Vec::new();
        for name in &self.model_names {
            names_section.extend_from_slice(&(name.len() as u16).to_le_bytes());
            names_section.extend_from_slice(name.as_bytes());
        }

        let blobs_base = (HEADER_LEN + self.tiles.len() * ENTRY_LEN + names_section.len()) as u64;

        let mut out = Vec::new();
        out.extend_from_slice(&ARCHIVE_MAGIC);
        out.extend_from_slice(&ARCHIVE_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.tiles.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.model_names.len() as u32).to_le_bytes());

        let mut offset = blobs_base;
        for (x, y, lod, stream) in &self.tiles {
            let raw = RawTileEntry {
                x: *x,
                y: *y,
                lod: *lod,
                _pad: 0,
                offset,
                len: stream.len() as u64,
            };
            out.extend_from_slice(bytemuck::bytes_of(&raw));
            offset += stream.len() as u64;
        }

        out.extend_from_slice(&names_section);
        for (_, _, _, stream) in &self.tiles {
            out.extend_from_slice(stream);
        }

        std::fs::write(path, &out)?;
        Ok(())
    }
}
