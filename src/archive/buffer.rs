use byteorder::{ByteOrder, LittleEndian};
use glam::DVec3;

use crate::error::{Result, TileGraphError};

/// Positioned cursor over one tile's token stream.
///
/// All multi-byte fields are little-endian. Every accessor that runs
/// past the available data fails with
/// [`TileGraphError::StreamTruncated`], which is fatal for the tile
/// being decoded.
#[derive(Debug)]
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ReadBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let available = self.remaining();
        if n > available {
            return Err(TileGraphError::StreamTruncated(format!(
                "{what}: needed {n} bytes, {available} available"
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    pub fn read_u16(&mut self, what: &str) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2, what)?))
    }

    pub fn read_u32(&mut self, what: &str) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4, what)?))
    }

    pub fn read_i32(&mut self, what: &str) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4, what)?))
    }

    pub fn read_u64(&mut self, what: &str) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8, what)?))
    }

    pub fn read_f32(&mut self, what: &str) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4, what)?))
    }

    pub fn read_f64(&mut self, what: &str) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.take(8, what)?))
    }

    /// Three consecutive f64 fields as a point or axis.
    pub fn read_dvec3(&mut self, what: &str) -> Result<DVec3> {
        let x = self.read_f64(what)?;
        let y = self.read_f64(what)?;
        let z = self.read_f64(what)?;
        Ok(DVec3::new(x, y, z))
    }

    /// A run of `count` f32 fields.
    pub fn read_f32_buffer(&mut self, count: usize, what: &str) -> Result<Vec<f32>> {
        let bytes = self.take(count * 4, what)?;
        let mut out = vec![0.0; count];
        LittleEndian::read_f32_into(bytes, &mut out);
        Ok(out)
    }

    /// Length-prefixed UTF-8: u16 byte count, then the bytes.
    pub fn read_string(&mut self, what: &str) -> Result<String> {
        let len = self.read_u16(what)? as usize;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| TileGraphError::Archive(format!("{what}: invalid UTF-8")))
    }

    /// Frame the next record: `[u32 token][u32 len][payload]`.
    ///
    /// Returns the raw token id and a sub-buffer over exactly the
    /// payload bytes, or `None` at a clean end of stream.
    pub fn next_record(&mut self) -> Result<Option<(u32, ReadBuffer<'a>)>> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let token = self.read_u32("record token")?;
        let len = self.read_u32("record length")? as usize;
        let payload = self.take(len, "record payload")?;
        Ok(Some((token, ReadBuffer::new(payload))))
    }
}
