//! PLY encoding and decoding
//!
//! Artifacts are plain PLY files readable by third-party tools. Parsing is
//! done by `ply-rs`; the data block is first checked against the declared
//! element counts so truncated, padded, or oversized files are rejected
//! before any record is decoded.

mod decode;
mod encode;
mod header;
mod layout;

pub use decode::{decode_ply, read_ply_file};
pub use encode::{encode_ply, write_ply};
pub use header::PlyHeader;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Data block encoding declared on the `format` header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlyEncoding {
    Ascii,
    #[default]
    BinaryLittleEndian,
}

impl PlyEncoding {
    /// Keyword used on the `format` line.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::BinaryLittleEndian => "binary_little_endian",
        }
    }
}

/// Errors raised while reading or writing PLY data.
#[derive(Debug, Error)]
pub enum PlyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed PLY: {0}")]
    Malformed(String),

    #[error("Unsupported PLY format: {0}")]
    UnsupportedFormat(String),
}
