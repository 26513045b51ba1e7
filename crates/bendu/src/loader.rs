//! Parses one on-disk bytecode image (spec.md §4.5 "Package loading", §6
//! "Bytecode file format").
//!
//! No direct teacher analogue exists — the teacher ships Python source and
//! has no binary image format of its own — so this is grounded on spec.md's
//! byte-exact description directly: a 4-byte magic, an import table (count
//! + length-prefixed source-ids), then the raw instruction stream. The
//! read/write pair mirrors the general "fixed header, then a length-prefixed
//! table, then a payload" shape the teacher's own `CodeBuilder` uses for
//! strings (`emit_string`) and arrays (`emit_u32a`).

use crate::{bytecode::builder::Code, error::LoadError};

/// `'H', 'W', major, minor` (spec.md §4.5: "verify the 4-byte magic
/// (`'H','W',0,1`)").
pub const MAGIC: [u8; 2] = *b"HW";
pub const CURRENT_MAJOR: u8 = 0;
pub const CURRENT_MINOR: u8 = 1;

/// One parsed-but-not-yet-executed package image: its import table (the
/// source-ids its `CALL_PACKAGE`/`LOAD_PACKAGE`/`STORE_PACKAGE` opcodes
/// refer to by 1-based position) and its raw instruction stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub imports: Vec<String>,
    pub code: Code,
}

/// Serializes a [`RawImage`] to the on-disk format (the write side of
/// [`parse`]; used by `cache.rs` when persisting a freshly compiled
/// package).
pub fn write(image: &RawImage) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.push(CURRENT_MAJOR);
    out.push(CURRENT_MINOR);
    out.extend_from_slice(&(image.imports.len() as u32).to_be_bytes());
    for source_id in &image.imports {
        let bytes = source_id.as_bytes();
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(bytes);
    }
    out.extend_from_slice(&image.code.bytecode);
    out
}

/// Parses the header and import table, then takes the remainder of the
/// byte stream verbatim as the instruction stream (spec.md §4.5).
pub fn parse(bytes: &[u8]) -> Result<RawImage, LoadError> {
    let mut cursor = Cursor::new(bytes);
    let magic: [u8; 2] = cursor.take_array()?;
    if magic != MAGIC {
        return Err(LoadError::InvalidMagic);
    }
    let major = cursor.take_u8()?;
    let minor = cursor.take_u8()?;
    if major != CURRENT_MAJOR || minor > CURRENT_MINOR {
        return Err(LoadError::UnsupportedVersion { major, minor });
    }
    let import_count = cursor.take_u32()?;
    let mut imports = Vec::with_capacity(import_count as usize);
    for _ in 0..import_count {
        imports.push(cursor.take_string()?);
    }
    let bytecode = cursor.take_rest();
    Ok(RawImage { imports, code: Code { bytecode } })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], LoadError> {
        let slice = self.bytes.get(self.pos..self.pos + N).ok_or(LoadError::Truncated)?;
        self.pos += N;
        Ok(slice.try_into().expect("slice of exactly N bytes"))
    }

    fn take_u8(&mut self) -> Result<u8, LoadError> {
        Ok(self.take_array::<1>()?[0])
    }

    fn take_u32(&mut self) -> Result<u32, LoadError> {
        Ok(u32::from_be_bytes(self.take_array::<4>()?))
    }

    fn take_string(&mut self) -> Result<String, LoadError> {
        let len = self.take_u32()? as usize;
        let slice = self.bytes.get(self.pos..self.pos + len).ok_or(LoadError::Truncated)?;
        self.pos += len;
        Ok(String::from_utf8_lossy(slice).into_owned())
    }

    fn take_rest(&mut self) -> Vec<u8> {
        let rest = self.bytes[self.pos..].to_vec();
        self.pos = self.bytes.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn an_image_round_trips_through_write_and_parse() {
        let image = RawImage { imports: vec!["a.bendu".to_owned(), "b.bendu".to_owned()], code: Code { bytecode: vec![1, 2, 3] } };
        let bytes = write(&image);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, image);
    }

    #[test]
    fn a_bad_magic_is_rejected() {
        let bytes = [b'X', b'X', 0, 1, 0, 0, 0, 0];
        assert_eq!(parse(&bytes), Err(LoadError::InvalidMagic));
    }

    #[test]
    fn a_future_minor_version_is_rejected() {
        let bytes = [b'H', b'W', 0, 200, 0, 0, 0, 0];
        assert_eq!(parse(&bytes), Err(LoadError::UnsupportedVersion { major: 0, minor: 200 }));
    }

    #[test]
    fn a_truncated_header_is_rejected() {
        let bytes = [b'H', b'W', 0];
        assert_eq!(parse(&bytes), Err(LoadError::Truncated));
    }
}
