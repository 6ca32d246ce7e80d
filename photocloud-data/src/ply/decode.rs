//! PLY decoding (ASCII and binary little-endian)

use crate::ply::PlyError;
use crate::ply::header::PlyHeader;
use crate::ply::layout;
use crate::types::{Point3D, PointCloud};
use glam::Vec3;
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, ElementDef, Property, PropertyType};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

fn scalar(property: Option<&Property>) -> Option<f64> {
    Some(match property? {
        Property::Char(v) => f64::from(*v),
        Property::UChar(v) => f64::from(*v),
        Property::Short(v) => f64::from(*v),
        Property::UShort(v) => f64::from(*v),
        Property::Int(v) => f64::from(*v),
        Property::UInt(v) => f64::from(*v),
        Property::Float(v) => f64::from(*v),
        Property::Double(v) => *v,
        _ => return None,
    })
}

fn index_list(property: Option<&Property>) -> Option<Vec<i64>> {
    Some(match property? {
        Property::ListChar(v) => v.iter().map(|&i| i64::from(i)).collect(),
        Property::ListUChar(v) => v.iter().map(|&i| i64::from(i)).collect(),
        Property::ListShort(v) => v.iter().map(|&i| i64::from(i)).collect(),
        Property::ListUShort(v) => v.iter().map(|&i| i64::from(i)).collect(),
        Property::ListInt(v) => v.iter().map(|&i| i64::from(i)).collect(),
        Property::ListUInt(v) => v.iter().map(|&i| i64::from(i)).collect(),
        _ => return None,
    })
}

fn is_scalar(def: &ElementDef, name: &str) -> bool {
    def.properties
        .get(name)
        .is_some_and(|p| matches!(p.data_type, PropertyType::Scalar(_)))
}

/// Property names of the vertex element.
struct VertexLayout {
    color: Option<[&'static str; 3]>,
}

impl VertexLayout {
    fn from_element(def: &ElementDef) -> Result<Self, PlyError> {
        for axis in ["x", "y", "z"] {
            if !is_scalar(def, axis) {
                return Err(PlyError::Malformed(format!(
                    "vertex element has no scalar '{axis}' property"
                )));
            }
        }
        let color = [["red", "green", "blue"], ["r", "g", "b"]]
            .into_iter()
            .find(|names| names.iter().all(|n| is_scalar(def, n)));
        Ok(Self { color })
    }

    fn point(&self, element: &DefaultElement, index: usize) -> Result<Point3D, PlyError> {
        let get = |name: &str| {
            scalar(element.get(name)).ok_or_else(|| {
                PlyError::Malformed(format!("vertex {index} has no value for '{name}'"))
            })
        };
        let position = Vec3::new(get("x")? as f32, get("y")? as f32, get("z")? as f32);
        let color = match self.color {
            Some(names) => {
                let mut rgb = [0u8; 3];
                for (channel, name) in rgb.iter_mut().zip(names) {
                    *channel = get(name)?.round().clamp(0.0, 255.0) as u8;
                }
                Some(rgb)
            }
            None => None,
        };
        Ok(Point3D { position, color })
    }
}

/// Name of the face index list property, accepting both common spellings.
fn face_list_name(def: &ElementDef) -> Result<&'static str, PlyError> {
    ["vertex_indices", "vertex_index"]
        .into_iter()
        .find(|name| {
            def.properties
                .get(*name)
                .is_some_and(|p| matches!(p.data_type, PropertyType::List(_, _)))
        })
        .ok_or_else(|| PlyError::Malformed("face element has no vertex index list".to_string()))
}

/// Decode a PLY byte stream (ASCII or binary little-endian) into a point cloud.
///
/// Declared element counts must match the data exactly; any shortfall or
/// surplus is reported as [`PlyError::Malformed`]. Polygon faces are fan
/// triangulated. Elements other than `vertex` and `face` are read and skipped.
#[tracing::instrument(skip_all, fields(bytes = bytes.len()))]
pub fn decode_ply(bytes: &[u8]) -> Result<PointCloud, PlyError> {
    let (header, offset) = PlyHeader::parse(bytes)?;
    let data = &bytes[offset..];
    layout::check_data(&header, data)?;

    let vertex_layout = header
        .element("vertex")
        .map(VertexLayout::from_element)
        .transpose()?;
    let face_list = header.element("face").map(face_list_name).transpose()?;

    let payload = Parser::<DefaultElement>::new()
        .read_payload(&mut Cursor::new(data), &header.raw)
        .map_err(|e| PlyError::Malformed(format!("invalid data block: {e}")))?;
    let records = |name: &str| payload.get(name).map_or(&[][..], Vec::as_slice);

    for def in header.elements() {
        if def.name != "vertex" && def.name != "face" {
            debug!("Skipping {} '{}' records", def.count, def.name);
        }
    }

    let mut cloud = PointCloud::default();
    if let Some(layout) = &vertex_layout {
        cloud.points = records("vertex")
            .iter()
            .enumerate()
            .map(|(i, element)| layout.point(element, i))
            .collect::<Result<_, _>>()?;
    }

    if let Some(name) = face_list {
        let raw_faces = records("face")
            .iter()
            .enumerate()
            .map(|(i, element)| {
                index_list(element.get(name)).ok_or_else(|| {
                    PlyError::Malformed(format!("face {i} has no integer index list"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        cloud.faces = triangulate_faces(&raw_faces, cloud.points.len())?;
    }

    info!(
        "PLY decoded: {} vertices, {} faces ({:?})",
        cloud.points.len(),
        cloud.faces.len(),
        header.encoding
    );
    Ok(cloud)
}

fn triangulate_faces(raw_faces: &[Vec<i64>], vertex_count: usize) -> Result<Vec<[u32; 3]>, PlyError> {
    let mut faces = Vec::with_capacity(raw_faces.len());
    for (face_index, indices) in raw_faces.iter().enumerate() {
        if indices.len() < 3 {
            return Err(PlyError::Malformed(format!(
                "face {} has {} vertices, need at least 3",
                face_index,
                indices.len()
            )));
        }
        let mut resolved = Vec::with_capacity(indices.len());
        for &raw in indices {
            let index = u32::try_from(raw)
                .ok()
                .filter(|&i| (i as usize) < vertex_count)
                .ok_or_else(|| {
                    PlyError::Malformed(format!(
                        "face {face_index} references vertex {raw} but only {vertex_count} exist"
                    ))
                })?;
            resolved.push(index);
        }
        for i in 1..resolved.len() - 1 {
            faces.push([resolved[0], resolved[i], resolved[i + 1]]);
        }
    }
    Ok(faces)
}

/// Read and decode a PLY file from disk.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_ply_file<P: AsRef<Path>>(path: P) -> Result<PointCloud, PlyError> {
    let bytes = std::fs::read(path.as_ref())?;
    decode_ply(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASCII_TRIANGLE: &str = "ply
format ascii 1.0
element vertex 3
property float x
property float y
property float z
property uchar red
property uchar green
property uchar blue
element face 1
property list uchar int vertex_indices
end_header
0 0 0 255 0 0
1 0 0 0 255 0
0 1 0 0 0 255
3 0 1 2
";

    #[test]
    fn test_decode_ascii_triangle() {
        let cloud = decode_ply(ASCII_TRIANGLE.as_bytes()).unwrap();
        assert_eq!(cloud.len(), 3);
        assert_eq!(cloud.faces, vec![[0, 1, 2]]);
        assert_eq!(cloud.points[1].position, Vec3::X);
        assert_eq!(cloud.points[2].color, Some([0, 0, 255]));
    }

    #[test]
    fn test_decode_property_order_and_extras() {
        let text = "ply
format ascii 1.0
element vertex 2
property float nx
property float z
property float y
property float x
property float alpha
end_header
0.5 3 2 1 0.9
0.5 6 5 4 0.9
";
        let cloud = decode_ply(text.as_bytes()).unwrap();
        assert_eq!(cloud.points[0].position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(cloud.points[1].position, Vec3::new(4.0, 5.0, 6.0));
        assert!(!cloud.has_colors());
    }

    #[test]
    fn test_decode_short_r_g_b_names() {
        let text = "ply
format ascii 1.0
element vertex 1
property double x
property double y
property double z
property uchar r
property uchar g
property uchar b
end_header
1 2 3 7 8 9
";
        let cloud = decode_ply(text.as_bytes()).unwrap();
        assert_eq!(cloud.points[0].color, Some([7, 8, 9]));
    }

    #[test]
    fn test_decode_quad_is_fan_triangulated() {
        let text = "ply
format ascii 1.0
element vertex 4
property float x
property float y
property float z
element face 1
property list uchar uint vertex_index
end_header
0 0 0
1 0 0
1 1 0
0 1 0
4 0 1 2 3
";
        let cloud = decode_ply(text.as_bytes()).unwrap();
        assert_eq!(cloud.faces, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_decode_too_few_vertices_is_malformed() {
        let text = ASCII_TRIANGLE.replace("element vertex 3", "element vertex 4");
        assert!(matches!(decode_ply(text.as_bytes()), Err(PlyError::Malformed(_))));
    }

    #[test]
    fn test_decode_too_many_vertices_is_malformed() {
        let text = ASCII_TRIANGLE
            .replace("element vertex 3", "element vertex 2")
            .replace("element face 1\nproperty list uchar int vertex_indices\n", "")
            .replace("3 0 1 2\n", "");
        assert!(matches!(decode_ply(text.as_bytes()), Err(PlyError::Malformed(_))));
    }

    #[test]
    fn test_decode_face_out_of_range_is_malformed() {
        let text = ASCII_TRIANGLE.replace("3 0 1 2", "3 0 1 7");
        assert!(matches!(decode_ply(text.as_bytes()), Err(PlyError::Malformed(_))));
    }

    #[test]
    fn test_decode_short_binary_block_is_malformed() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nend_header\n".to_vec();
        for v in [1.0f32, 2.0, 3.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        // Second vertex is missing entirely.
        assert!(matches!(decode_ply(&bytes), Err(PlyError::Malformed(_))));

        for v in [4.0f32, 5.0, 6.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let cloud = decode_ply(&bytes).unwrap();
        assert_eq!(cloud.points[1].position, Vec3::new(4.0, 5.0, 6.0));

        bytes.push(0);
        assert!(matches!(decode_ply(&bytes), Err(PlyError::Malformed(_))));
    }

    #[test]
    fn test_decode_skips_unknown_elements() {
        let text = "ply
format ascii 1.0
element vertex 1
property float x
property float y
property float z
element edge 1
property int vertex1
property int vertex2
end_header
1 1 1
0 0
";
        let cloud = decode_ply(text.as_bytes()).unwrap();
        assert_eq!(cloud.len(), 1);
    }

    #[test]
    fn test_decode_missing_coordinate_is_malformed() {
        let text = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nend_header\n1 2\n";
        assert!(matches!(decode_ply(text.as_bytes()), Err(PlyError::Malformed(_))));
    }

    #[test]
    fn test_decode_huge_vertex_count_is_malformed() {
        for count in ["1000000000000000000", "100000000000000", "18446744073709551615"] {
            let text = ASCII_TRIANGLE
                .replace("element vertex 3", &format!("element vertex {count}"))
                .replace("element face 1\nproperty list uchar int vertex_indices\n", "")
                .replace("3 0 1 2\n", "");
            assert!(
                matches!(decode_ply(text.as_bytes()), Err(PlyError::Malformed(_))),
                "count {count} should be rejected"
            );
        }

        let mut bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 100000000000000\nproperty float x\nproperty float y\nproperty float z\nend_header\n".to_vec();
        bytes.extend_from_slice(&[0u8; 12]);
        assert!(matches!(decode_ply(&bytes), Err(PlyError::Malformed(_))));
    }

    #[test]
    fn test_decode_huge_list_length_is_malformed() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list uint int vertex_indices\nend_header\n".to_vec();
        bytes.extend_from_slice(&[0u8; 36]);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        for i in [0i32, 1, 2] {
            bytes.extend_from_slice(&i.to_le_bytes());
        }
        assert!(matches!(decode_ply(&bytes), Err(PlyError::Malformed(_))));

        let text = ASCII_TRIANGLE.replace("3 0 1 2", "4294967295 0 1 2");
        assert!(matches!(decode_ply(text.as_bytes()), Err(PlyError::Malformed(_))));
    }

    #[test]
    fn test_decode_binary_faces() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list uint int vertex_indices\nend_header\n".to_vec();
        for v in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.extend_from_slice(&3u32.to_le_bytes());
        for i in [2i32, 1, 0] {
            bytes.extend_from_slice(&i.to_le_bytes());
        }
        let cloud = decode_ply(&bytes).unwrap();
        assert_eq!(cloud.faces, vec![[2, 1, 0]]);
        assert_eq!(cloud.points[1].position, Vec3::X);
    }

    #[test]
    fn test_read_missing_file() {
        let result = read_ply_file("nonexistent_file_12345.ply");
        assert!(matches!(result, Err(PlyError::Io(_))));
    }
}
