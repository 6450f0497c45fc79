use std::io::Write as _;

use cloudkit_geometry::{Cell, GeometryBuffer, Point};
use glam::Vec3;

use crate::CodecError;

fn decode_err(line_no: usize, msg: impl std::fmt::Display) -> CodecError {
    CodecError::Decode(format!("OBJ line {line_no}: {msg}"))
}

fn parse_floats<'a>(
    line_no: usize,
    parts: impl Iterator<Item = &'a str>,
) -> Result<Vec<f32>, CodecError> {
    parts
        .map(|s| {
            s.parse::<f32>()
                .map_err(|_e| decode_err(line_no, format!("invalid number '{s}'")))
        })
        .collect()
}

/// Resolve a 1-based or negative (relative to the end) OBJ index.
fn index_fix(idx: i64, len: usize) -> Option<usize> {
    match idx {
        0 => None,
        i if i > 0 => Some(i as usize - 1),
        i => len.checked_sub(i.unsigned_abs() as usize),
    }
}

/// `v`, `v/t`, `v//n` or `v/t/n`. Returns the vertex and optional normal index.
fn parse_face_vertex(line_no: usize, token: &str) -> Result<(i64, Option<i64>), CodecError> {
    let mut parts = token.split('/');
    let invalid = || decode_err(line_no, format!("invalid face vertex '{token}'"));
    let vertex = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(invalid)?;
    let _texture = parts.next();
    let normal = match parts.next() {
        None | Some("") => None,
        Some(s) => Some(s.parse().map_err(|_e| invalid())?),
    };
    Ok((vertex, normal))
}

pub(crate) fn decode(bytes: &[u8]) -> Result<GeometryBuffer, CodecError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_e| CodecError::Decode("OBJ: file is not valid UTF-8".to_owned()))?;

    let mut points: Vec<Point> = Vec::new();
    let mut normals: Vec<Vec3> = Vec::new();
    // Faces are resolved once all vertices are known, negative indices are
    // relative to the vertices seen so far.
    let mut faces: Vec<Vec<(usize, Option<usize>)>> = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let s = line.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let mut it = s.split_ascii_whitespace();
        let tag = it.next().unwrap_or("");
        match tag {
            "v" => {
                let values = parse_floats(line_no, it)?;
                let point = match values.as_slice() {
                    [x, y, z] | [x, y, z, _] => Point::from_xyz(*x, *y, *z),
                    [x, y, z, r, g, b] => Point::from_xyz(*x, *y, *z).with_color([
                        unit_to_u8(*r),
                        unit_to_u8(*g),
                        unit_to_u8(*b),
                    ]),
                    _ => return Err(decode_err(line_no, "vertex needs 3, 4 or 6 values")),
                };
                points.push(point);
            }
            "vn" => {
                let values = parse_floats(line_no, it)?;
                let [x, y, z] = values.as_slice() else {
                    return Err(decode_err(line_no, "normal needs 3 values"));
                };
                normals.push(glam::vec3(*x, *y, *z));
            }
            "f" => {
                let mut face = Vec::new();
                for token in it {
                    let (v, n) = parse_face_vertex(line_no, token)?;
                    let v = index_fix(v, points.len()).ok_or_else(|| {
                        CodecError::CorruptFile(format!(
                            "OBJ line {line_no}: vertex index {v} is out of range"
                        ))
                    })?;
                    let n = match n {
                        Some(n) => Some(index_fix(n, normals.len()).ok_or_else(|| {
                            CodecError::CorruptFile(format!(
                                "OBJ line {line_no}: normal index {n} is out of range"
                            ))
                        })?),
                        None => None,
                    };
                    face.push((v, n));
                }
                if face.is_empty() {
                    return Err(decode_err(line_no, "face without vertices"));
                }
                faces.push(face);
            }
            // Texture coordinates, groups, materials and smoothing carry
            // nothing a geometry buffer stores.
            _ => {}
        }
    }

    let mut cells: Vec<Cell> = Vec::with_capacity(faces.len());
    let mut face_normals = false;
    for face in faces {
        let mut cell = Vec::with_capacity(face.len());
        for (v, n) in face {
            if v >= points.len() {
                return Err(CodecError::CorruptFile(format!(
                    "OBJ: face references vertex {} of {}",
                    v + 1,
                    points.len()
                )));
            }
            if let Some(n) = n {
                let normal = *normals.get(n).ok_or_else(|| {
                    CodecError::CorruptFile(format!(
                        "OBJ: face references normal {} of {}",
                        n + 1,
                        normals.len()
                    ))
                })?;
                face_normals = true;
                points[v].normal.get_or_insert(normal);
            }
            cell.push(v as u32);
        }
        cells.push(cell);
    }

    if !face_normals && !normals.is_empty() && normals.len() == points.len() {
        for (point, normal) in points.iter_mut().zip(normals) {
            point.normal = Some(normal);
        }
    }

    Ok(GeometryBuffer::new(points, cells)?)
}

fn unit_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub(crate) fn encode(buffer: &GeometryBuffer) -> Result<Vec<u8>, CodecError> {
    let normals = buffer.has_normals();
    let colors = buffer.has_colors();

    let mut out = b"# Exported from cloudkit\n".to_vec();
    for p in buffer.points() {
        let Vec3 { x, y, z } = p.position;
        write!(out, "v {x} {y} {z}")?;
        if let (true, Some(c)) = (colors, p.color) {
            let [r, g, b] = c.map(|c| f32::from(c) / 255.0);
            write!(out, " {r} {g} {b}")?;
        }
        out.push(b'\n');
    }
    if normals {
        for n in buffer.points().iter().filter_map(|p| p.normal) {
            writeln!(out, "vn {} {} {}", n.x, n.y, n.z)?;
        }
    }
    for cell in buffer.cells() {
        out.push(b'f');
        for &i in cell {
            // OBJ indices are one based.
            let i = u64::from(i) + 1;
            if normals {
                write!(out, " {i}//{i}")?;
            } else {
                write!(out, " {i}")?;
            }
        }
        out.push(b'\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_forms_and_negative_indices() {
        let text = "# quad\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvt 0 0\nvn 0 0 1\n\
g plane\nf 1/1/1 2/1/1 3/1/1\nf -4 -2 -1\nf 1/1 3/1 4/1\n";
        let buffer = decode(text.as_bytes()).unwrap();
        assert_eq!(buffer.point_count(), 4);
        assert_eq!(buffer.cells(), &[vec![0, 1, 2], vec![0, 2, 3], vec![0, 2, 3]]);
        assert_eq!(buffer.point(0).unwrap().normal, Some(Vec3::Z));
        assert_eq!(buffer.point(3).unwrap().normal, None);
    }

    #[test]
    fn vertex_colors_and_point_normals() {
        let points = vec![
            Point::from_xyz(0.5, 1.0, -2.0)
                .with_color([255, 128, 0])
                .with_normal(Vec3::X),
            Point::from_xyz(3.0, 2.0, 1.0)
                .with_color([1, 2, 3])
                .with_normal(Vec3::NEG_Y),
        ];
        let buffer = GeometryBuffer::from_points(points);
        assert_eq!(decode(&encode(&buffer).unwrap()).unwrap(), buffer);
    }

    #[test]
    fn mesh_with_normals_round_trips() {
        let points = vec![
            Point::from_xyz(0.0, 0.0, 0.0).with_normal(Vec3::Z),
            Point::from_xyz(1.0, 0.0, 0.0).with_normal(Vec3::Z),
            Point::from_xyz(0.0, 1.0, 0.0).with_normal(Vec3::Z),
        ];
        let buffer = GeometryBuffer::new(points, vec![vec![0, 1, 2]]).unwrap();
        let bytes = encode(&buffer).unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("f 1//1 2//2 3//3"));
        assert_eq!(decode(&bytes).unwrap(), buffer);
    }

    #[test]
    fn missing_vertex_is_corrupt() {
        let text = "v 0 0 0\nv 1 0 0\nf 1 2 3\n";
        assert!(matches!(
            decode(text.as_bytes()),
            Err(CodecError::CorruptFile(_))
        ));
        assert!(matches!(
            decode(b"v 0 0 0\nf -2\n"),
            Err(CodecError::CorruptFile(_))
        ));
    }

    #[test]
    fn malformed_lines() {
        assert!(matches!(decode(b"v 0 zero 0\n"), Err(CodecError::Decode(_))));
        assert!(matches!(decode(b"v 0 0\n"), Err(CodecError::Decode(_))));
        assert!(matches!(decode(b"v 0 0 0\nf a/b\n"), Err(CodecError::Decode(_))));
    }
}
