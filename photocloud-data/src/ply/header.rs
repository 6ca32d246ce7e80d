//! PLY header parsing

use crate::ply::{PlyEncoding, PlyError};
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, ElementDef, Encoding, Header};
use std::io::Cursor;

/// Parsed PLY header.
///
/// Element declarations keep their file order, which is also the order of
/// the data block.
#[derive(Debug, Clone)]
pub struct PlyHeader {
    pub encoding: PlyEncoding,
    pub comments: Vec<String>,
    pub(crate) raw: Header,
}

impl PlyHeader {
    /// Parse the header at the start of `bytes`.
    ///
    /// Returns the header and the byte offset where the data block begins.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), PlyError> {
        let mut cursor = Cursor::new(bytes);
        let raw = Parser::<DefaultElement>::new()
            .read_header(&mut cursor)
            .map_err(|e| PlyError::Malformed(format!("invalid header: {e}")))?;

        let encoding = match raw.encoding {
            Encoding::Ascii => PlyEncoding::Ascii,
            Encoding::BinaryLittleEndian => PlyEncoding::BinaryLittleEndian,
            Encoding::BinaryBigEndian => {
                return Err(PlyError::UnsupportedFormat("binary_big_endian".to_string()));
            }
        };
        let offset = usize::try_from(cursor.position())
            .map_err(|_| PlyError::Malformed("header is too large".to_string()))?;

        let comments = raw.comments.iter().chain(&raw.obj_infos).cloned().collect();
        Ok((
            Self {
                encoding,
                comments,
                raw,
            },
            offset,
        ))
    }

    /// Element declarations in file order.
    pub fn elements(&self) -> impl Iterator<Item = &ElementDef> {
        self.raw.elements.values()
    }

    pub fn element(&self, name: &str) -> Option<&ElementDef> {
        self.raw.elements.get(name)
    }

    pub fn vertex_count(&self) -> usize {
        self.element("vertex").map_or(0, |e| e.count)
    }

    pub fn face_count(&self) -> usize {
        self.element("face").map_or(0, |e| e.count)
    }
}
