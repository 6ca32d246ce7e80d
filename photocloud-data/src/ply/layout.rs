//! Data block layout checks
//!
//! Walks the data block against the header before any record is decoded:
//! every declared record and list entry must be present, nothing may follow
//! the last element, and no count is trusted before the bytes backing it
//! have been seen.

use crate::ply::header::PlyHeader;
use crate::ply::{PlyEncoding, PlyError};
use ply_rs::ply::{ElementDef, PropertyType, ScalarType};

/// Size of a scalar in the binary encodings.
pub(crate) fn scalar_size(ty: &ScalarType) -> usize {
    match ty {
        ScalarType::Char | ScalarType::UChar => 1,
        ScalarType::Short | ScalarType::UShort => 2,
        ScalarType::Int | ScalarType::UInt | ScalarType::Float => 4,
        ScalarType::Double => 8,
    }
}

/// Verify that `data` holds exactly the records `header` declares.
pub(crate) fn check_data(header: &PlyHeader, data: &[u8]) -> Result<(), PlyError> {
    for def in header.elements() {
        if def.count > 0 && def.properties.is_empty() {
            return Err(PlyError::Malformed(format!(
                "element '{}' declares {} records but no properties",
                def.name, def.count
            )));
        }
    }
    match header.encoding {
        PlyEncoding::Ascii => check_ascii(header, data),
        PlyEncoding::BinaryLittleEndian => check_binary_le(header, data),
    }
}

fn check_ascii(header: &PlyHeader, data: &[u8]) -> Result<(), PlyError> {
    let text = std::str::from_utf8(data)
        .map_err(|_| PlyError::Malformed("ASCII data block is not valid text".to_string()))?;
    let lines: Vec<&str> = text.lines().collect();
    let mut next = 0usize;

    for def in header.elements() {
        let remaining = lines.len() - next;
        if def.count > remaining {
            return Err(PlyError::Malformed(format!(
                "header declares {} '{}' records but only {} lines remain",
                def.count, def.name, remaining
            )));
        }
        for index in 0..def.count {
            check_ascii_record(def, index, lines[next])?;
            next += 1;
        }
    }

    if lines[next..].iter().any(|line| !line.trim().is_empty()) {
        return Err(PlyError::Malformed(
            "data block holds more records than the header declares".to_string(),
        ));
    }
    Ok(())
}

fn check_ascii_record(def: &ElementDef, index: usize, line: &str) -> Result<(), PlyError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let short = || {
        PlyError::Malformed(format!(
            "'{}' record {} has fewer values than declared",
            def.name, index
        ))
    };
    let mut pos = 0usize;

    for property in def.properties.values() {
        match &property.data_type {
            PropertyType::Scalar(_) => {
                tokens.get(pos).ok_or_else(short)?;
                pos += 1;
            }
            PropertyType::List(_, _) => {
                let raw = tokens.get(pos).ok_or_else(short)?;
                let len = raw.parse::<usize>().map_err(|_| {
                    PlyError::Malformed(format!(
                        "'{}' record {} has invalid list length '{}'",
                        def.name, index, raw
                    ))
                })?;
                pos += 1;
                if len > tokens.len() - pos {
                    return Err(PlyError::Malformed(format!(
                        "'{}' record {} declares {} list entries but holds {}",
                        def.name,
                        index,
                        len,
                        tokens.len() - pos
                    )));
                }
                pos += len;
            }
        }
    }

    if pos != tokens.len() {
        return Err(PlyError::Malformed(format!(
            "'{}' record {} has more values than declared properties",
            def.name, index
        )));
    }
    Ok(())
}

struct BinaryWalk<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryWalk<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize, def: &ElementDef, index: usize) -> Result<&'a [u8], PlyError> {
        if len > self.remaining() {
            return Err(PlyError::Malformed(format!(
                "binary data ends inside '{}' record {} of {}",
                def.name, index, def.count
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn list_len(&mut self, ty: &ScalarType, def: &ElementDef, index: usize) -> Result<usize, PlyError> {
        let bytes = self.take(scalar_size(ty), def, index)?;
        let len = match ty {
            ScalarType::UChar => i64::from(bytes[0]),
            ScalarType::Char => i64::from(bytes[0] as i8),
            ScalarType::UShort => i64::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            ScalarType::Short => i64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
            ScalarType::UInt => i64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            ScalarType::Int => i64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            ScalarType::Float | ScalarType::Double => -1,
        };
        usize::try_from(len).map_err(|_| {
            PlyError::Malformed(format!(
                "'{}' record {} has an invalid list length",
                def.name, index
            ))
        })
    }
}

/// Smallest possible record of `def`: every list empty.
fn min_record_size(def: &ElementDef) -> usize {
    def.properties
        .values()
        .map(|p| match &p.data_type {
            PropertyType::Scalar(ty) => scalar_size(ty),
            PropertyType::List(count_ty, _) => scalar_size(count_ty),
        })
        .sum()
}

fn check_binary_le(header: &PlyHeader, data: &[u8]) -> Result<(), PlyError> {
    let mut walk = BinaryWalk { data, pos: 0 };

    for def in header.elements() {
        let fits = def
            .count
            .checked_mul(min_record_size(def))
            .is_some_and(|need| need <= walk.remaining());
        if !fits {
            return Err(PlyError::Malformed(format!(
                "header declares {} '{}' records but only {} bytes remain",
                def.count,
                def.name,
                walk.remaining()
            )));
        }

        for index in 0..def.count {
            for property in def.properties.values() {
                match &property.data_type {
                    PropertyType::Scalar(ty) => {
                        walk.take(scalar_size(ty), def, index)?;
                    }
                    PropertyType::List(count_ty, item_ty) => {
                        let len = walk.list_len(count_ty, def, index)?;
                        let bytes = len.checked_mul(scalar_size(item_ty)).ok_or_else(|| {
                            PlyError::Malformed(format!(
                                "'{}' record {} has an invalid list length",
                                def.name, index
                            ))
                        })?;
                        walk.take(bytes, def, index)?;
                    }
                }
            }
        }
    }

    if walk.remaining() > 0 {
        return Err(PlyError::Malformed(format!(
            "{} bytes of data beyond the declared elements",
            walk.remaining()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(bytes: &[u8]) -> Result<(), PlyError> {
        let (header, offset) = PlyHeader::parse(bytes)?;
        check_data(&header, &bytes[offset..])
    }

    #[test]
    fn test_ascii_exact_fit() {
        let text = b"ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nelement face 1\nproperty list uchar int vertex_indices\nend_header\n1\n2\n3 0 1 1\n\n";
        assert!(check(text).is_ok());
    }

    #[test]
    fn test_ascii_list_length_mismatch() {
        let short = b"ply\nformat ascii 1.0\nelement face 1\nproperty list uchar int vertex_indices\nend_header\n3 0 1\n";
        assert!(matches!(check(short), Err(PlyError::Malformed(_))));
        let long = b"ply\nformat ascii 1.0\nelement face 1\nproperty list uchar int vertex_indices\nend_header\n3 0 1 2 3\n";
        assert!(matches!(check(long), Err(PlyError::Malformed(_))));
    }

    #[test]
    fn test_element_without_properties() {
        let text = b"ply\nformat binary_little_endian 1.0\nelement marker 1000000000000\nend_header\n";
        assert!(matches!(check(text), Err(PlyError::Malformed(_))));
    }

    #[test]
    fn test_binary_list_walk() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\nelement face 2\nproperty list ushort uint vertex_indices\nend_header\n".to_vec();
        bytes.extend_from_slice(&3u16.to_le_bytes());
        for i in [0u32, 1, 2] {
            bytes.extend_from_slice(&i.to_le_bytes());
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());
        assert!(check(&bytes).is_ok());

        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(check(&bytes), Err(PlyError::Malformed(_))));
    }

    #[test]
    fn test_binary_negative_list_length() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\nelement face 1\nproperty list char int vertex_indices\nend_header\n".to_vec();
        bytes.push(0xFF);
        assert!(matches!(check(&bytes), Err(PlyError::Malformed(_))));
    }
}
