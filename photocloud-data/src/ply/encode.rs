//! PLY encoding

use crate::ply::{PlyEncoding, PlyError};
use crate::types::{DEFAULT_POINT_COLOR, PointCloud};
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
    ScalarType,
};
use ply_rs::writer::Writer;
use std::io::{BufWriter, Write};
use tracing::debug;

const COMMENT: &str = "generated by photocloud";

/// Write `cloud` as PLY in the requested encoding.
///
/// The header always declares the encoding, the vertex count, `float` x/y/z,
/// `uchar` red/green/blue when any point is colored, and a face element when
/// the cloud carries faces.
///
/// PLY declares color per element, not per vertex, so a cloud mixing colored
/// and uncolored points cannot be stored as is: its uncolored points are
/// written with [`DEFAULT_POINT_COLOR`] and decode as colored.
pub fn write_ply<W: Write>(
    writer: W,
    cloud: &PointCloud,
    encoding: PlyEncoding,
) -> Result<(), PlyError> {
    if let Some(face) = cloud.first_invalid_face() {
        return Err(PlyError::Malformed(format!(
            "face {} references a vertex beyond the {} points in the cloud",
            face,
            cloud.len()
        )));
    }

    let mut writer = BufWriter::new(writer);
    let colored = cloud.has_colors();
    match encoding {
        PlyEncoding::Ascii => write_ascii(&mut writer, cloud, colored)?,
        PlyEncoding::BinaryLittleEndian => write_binary_le(&mut writer, cloud, colored)?,
    }
    writer.flush()?;

    debug!(
        "Wrote PLY: {} vertices, {} faces, colored={}, {:?}",
        cloud.len(),
        cloud.faces.len(),
        colored,
        encoding
    );
    Ok(())
}

fn scalar_property(name: &str, ty: ScalarType) -> PropertyDef {
    PropertyDef::new(name.to_string(), PropertyType::Scalar(ty))
}

fn write_ascii<W: Write>(writer: &mut W, cloud: &PointCloud, colored: bool) -> Result<(), PlyError> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;
    ply.header.comments.push(COMMENT.to_string());

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for axis in ["x", "y", "z"] {
        vertex_def.properties.add(scalar_property(axis, ScalarType::Float));
    }
    if colored {
        for channel in ["red", "green", "blue"] {
            vertex_def.properties.add(scalar_property(channel, ScalarType::UChar));
        }
    }
    vertex_def.count = cloud.len();
    ply.header.elements.add(vertex_def);

    let vertices = cloud
        .points
        .iter()
        .map(|point| {
            let mut element = DefaultElement::new();
            let p = point.position;
            element.insert("x".to_string(), Property::Float(p.x));
            element.insert("y".to_string(), Property::Float(p.y));
            element.insert("z".to_string(), Property::Float(p.z));
            if colored {
                let [r, g, b] = point.color.unwrap_or(DEFAULT_POINT_COLOR);
                element.insert("red".to_string(), Property::UChar(r));
                element.insert("green".to_string(), Property::UChar(g));
                element.insert("blue".to_string(), Property::UChar(b));
            }
            element
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);

    if !cloud.faces.is_empty() {
        let mut face_def = ElementDef::new("face".to_string());
        face_def.properties.add(PropertyDef::new(
            "vertex_indices".to_string(),
            PropertyType::List(ScalarType::UChar, ScalarType::Int),
        ));
        face_def.count = cloud.faces.len();
        ply.header.elements.add(face_def);

        let faces = cloud
            .faces
            .iter()
            .map(|face| {
                let mut element = DefaultElement::new();
                let indices = face.iter().map(|&i| i as i32).collect();
                element.insert("vertex_indices".to_string(), Property::ListInt(indices));
                element
            })
            .collect();
        ply.payload.insert("face".to_string(), faces);
    }

    Writer::<DefaultElement>::new().write_ply(writer, &mut ply)?;
    Ok(())
}

/// Binary records are written directly: `ply-rs` writes the element count
/// in place of the list length for binary list properties.
fn write_binary_le<W: Write>(writer: &mut W, cloud: &PointCloud, colored: bool) -> Result<(), PlyError> {
    writeln!(writer, "ply")?;
    writeln!(writer, "format {} 1.0", PlyEncoding::BinaryLittleEndian.keyword())?;
    writeln!(writer, "comment {COMMENT}")?;
    writeln!(writer, "element vertex {}", cloud.len())?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    if colored {
        writeln!(writer, "property uchar red")?;
        writeln!(writer, "property uchar green")?;
        writeln!(writer, "property uchar blue")?;
    }
    if !cloud.faces.is_empty() {
        writeln!(writer, "element face {}", cloud.faces.len())?;
        writeln!(writer, "property list uchar int vertex_indices")?;
    }
    writeln!(writer, "end_header")?;

    for point in &cloud.points {
        let p = point.position;
        writer.write_all(&p.x.to_le_bytes())?;
        writer.write_all(&p.y.to_le_bytes())?;
        writer.write_all(&p.z.to_le_bytes())?;
        if colored {
            writer.write_all(&point.color.unwrap_or(DEFAULT_POINT_COLOR))?;
        }
    }
    for face in &cloud.faces {
        writer.write_all(&[3u8])?;
        for &index in face {
            writer.write_all(&(index as i32).to_le_bytes())?;
        }
    }
    Ok(())
}

/// Encode `cloud` into an in-memory PLY buffer.
pub fn encode_ply(cloud: &PointCloud, encoding: PlyEncoding) -> Result<Vec<u8>, PlyError> {
    let mut buf = Vec::new();
    write_ply(&mut buf, cloud, encoding)?;
    Ok(buf)
}
