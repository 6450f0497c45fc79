use std::collections::HashMap;
use std::io::Write as _;

use cloudkit_geometry::{GeometryBuffer, Point};
use glam::Vec3;

use crate::CodecError;
use crate::cursor::{ByteCursor, Endian, put_f32};

const HEADER_LEN: usize = 80;
const TRIANGLE_LEN: usize = 50;

fn face_normal(a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    (b - a).cross(c - a).normalize_or_zero()
}

/// Merges bit-identical vertices, keeping first appearance order.
#[derive(Default)]
struct Welder {
    points: Vec<Point>,
    lookup: HashMap<[u32; 3], u32>,
    cells: Vec<Vec<u32>>,
}

impl Welder {
    fn vertex(&mut self, position: Vec3) -> u32 {
        let key = position.to_array().map(f32::to_bits);
        *self.lookup.entry(key).or_insert_with(|| {
            self.points.push(Point::new(position));
            (self.points.len() - 1) as u32
        })
    }

    fn triangle(&mut self, corners: [Vec3; 3]) {
        let cell = corners.map(|c| self.vertex(c)).to_vec();
        self.cells.push(cell);
    }

    fn finish(self) -> Result<GeometryBuffer, CodecError> {
        Ok(GeometryBuffer::new(self.points, self.cells)?)
    }
}

fn looks_ascii(bytes: &[u8]) -> bool {
    if !bytes.starts_with(b"solid") {
        return false;
    }
    // Some binary exporters also start their header with "solid". A size that
    // matches the declared triangle count wins.
    if bytes.len() >= HEADER_LEN + 4 {
        let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
        if HEADER_LEN + 4 + count * TRIANGLE_LEN == bytes.len() {
            return false;
        }
    }
    true
}

pub(crate) fn decode(bytes: &[u8]) -> Result<GeometryBuffer, CodecError> {
    if looks_ascii(bytes) {
        decode_ascii(bytes)
    } else {
        decode_binary(bytes)
    }
}

fn decode_binary(bytes: &[u8]) -> Result<GeometryBuffer, CodecError> {
    if bytes.len() < HEADER_LEN + 4 {
        return Err(CodecError::Decode(format!(
            "STL: {} bytes is too short for a binary header",
            bytes.len()
        )));
    }
    let mut cursor = ByteCursor::new(&bytes[HEADER_LEN..]);
    let count = cursor
        .read_u32(Endian::Little)
        .ok_or_else(|| CodecError::Decode("STL: missing triangle count".to_owned()))?
        as usize;
    let body = cursor.remaining().len();
    if body != count * TRIANGLE_LEN {
        return Err(CodecError::CorruptFile(format!(
            "STL: header declares {count} triangles but {body} bytes of triangle data follow"
        )));
    }

    let mut welder = Welder::default();
    for _ in 0..count {
        let mut floats = [0.0f32; 12];
        for f in &mut floats {
            *f = cursor
                .read_f32(Endian::Little)
                .ok_or_else(|| CodecError::CorruptFile("STL: truncated triangle".to_owned()))?;
        }
        let _attributes = cursor.read_u16(Endian::Little);
        let corner = |i: usize| Vec3::from_slice(&floats[3 + i * 3..6 + i * 3]);
        welder.triangle([corner(0), corner(1), corner(2)]);
    }
    welder.finish()
}

fn decode_ascii(bytes: &[u8]) -> Result<GeometryBuffer, CodecError> {
    let mut cursor = ByteCursor::new(bytes);
    let err = |msg: &str| CodecError::Decode(format!("STL: {msg}"));

    // `solid [name]`
    cursor.read_line();

    let mut welder = Welder::default();
    let mut corners = Vec::with_capacity(3);
    loop {
        let Some(token) = cursor.next_token() else {
            return Err(err("missing 'endsolid'"));
        };
        match token {
            "facet" | "outer" => cursor.skip_line(),
            "vertex" => {
                let mut read = || {
                    cursor
                        .parse_token::<f32>()
                        .ok_or_else(|| err("invalid vertex coordinate"))
                };
                corners.push(glam::vec3(read()?, read()?, read()?));
            }
            "endloop" => {}
            "endfacet" => {
                let [a, b, c] = corners[..] else {
                    return Err(CodecError::CorruptFile(format!(
                        "STL: facet has {} vertices, expected 3",
                        corners.len()
                    )));
                };
                welder.triangle([a, b, c]);
                corners.clear();
            }
            "endsolid" => break,
            other => return Err(err(&format!("unexpected token '{other}'"))),
        }
    }
    welder.finish()
}

/// Polygons are fan triangulated. Vertex and line cells have no STL form.
fn triangles(buffer: &GeometryBuffer) -> Vec<[Vec3; 3]> {
    let points = buffer.points();
    buffer
        .cells()
        .iter()
        .filter(|cell| cell.len() >= 3)
        .flat_map(|cell| {
            let first = points[cell[0] as usize].position;
            cell.windows(2).skip(1).map(move |w| {
                [
                    first,
                    points[w[0] as usize].position,
                    points[w[1] as usize].position,
                ]
            })
        })
        .collect()
}

pub(crate) fn encode(buffer: &GeometryBuffer, binary: bool) -> Result<Vec<u8>, CodecError> {
    let triangles = triangles(buffer);
    if triangles.is_empty() {
        return Err(CodecError::Encode(
            "STL stores triangles only, the buffer has no polygon cells".to_owned(),
        ));
    }
    let dropped = buffer.cells().iter().filter(|c| c.len() < 3).count();
    if dropped > 0 {
        log::debug!("Dropping {dropped} vertex/line cells from STL output");
    }

    if binary {
        let mut out = vec![0u8; HEADER_LEN];
        let tag = b"cloudkit stl export";
        out[..tag.len()].copy_from_slice(tag);
        let count = u32::try_from(triangles.len()).map_err(|_e| {
            CodecError::Encode(format!(
                "binary STL counts triangles in 32 bits, got {}",
                triangles.len()
            ))
        })?;
        out.extend_from_slice(&count.to_le_bytes());
        for [a, b, c] in &triangles {
            for v in [face_normal(*a, *b, *c), *a, *b, *c] {
                for comp in v.to_array() {
                    put_f32(&mut out, comp, Endian::Little);
                }
            }
            out.extend_from_slice(&0u16.to_le_bytes());
        }
        Ok(out)
    } else {
        let mut out = b"solid cloudkit\n".to_vec();
        for [a, b, c] in &triangles {
            let n = face_normal(*a, *b, *c);
            writeln!(out, "  facet normal {} {} {}", n.x, n.y, n.z)?;
            writeln!(out, "    outer loop")?;
            for v in [a, b, c] {
                writeln!(out, "      vertex {} {} {}", v.x, v.y, v.z)?;
            }
            writeln!(out, "    endloop")?;
            writeln!(out, "  endfacet")?;
        }
        out.extend_from_slice(b"endsolid cloudkit\n");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> GeometryBuffer {
        let points = vec![
            Point::from_xyz(0.0, 0.0, 0.0),
            Point::from_xyz(1.0, 0.0, 0.0),
            Point::from_xyz(1.0, 1.0, 0.0),
            Point::from_xyz(0.0, 1.0, 0.0),
        ];
        GeometryBuffer::new(points, vec![vec![0, 1, 2, 3]]).unwrap()
    }

    #[test]
    fn quad_is_fan_triangulated_and_welded() {
        for binary in [false, true] {
            let decoded = decode(&encode(&quad(), binary).unwrap()).unwrap();
            assert_eq!(decoded.points(), quad().points());
            assert_eq!(decoded.cells(), &[vec![0, 1, 2], vec![0, 2, 3]]);
        }
    }

    #[test]
    fn ascii_facet_normal_is_unit() {
        let text = String::from_utf8(encode(&quad(), false).unwrap()).unwrap();
        assert!(text.starts_with("solid cloudkit\n"));
        assert!(text.contains("facet normal 0 0 1"));
    }

    #[test]
    fn point_cloud_cannot_be_encoded() {
        let cloud = quad().without_cells();
        assert!(matches!(encode(&cloud, true), Err(CodecError::Encode(_))));

        let lines = GeometryBuffer::new(quad().points().to_vec(), vec![vec![0, 1]]).unwrap();
        assert!(matches!(encode(&lines, false), Err(CodecError::Encode(_))));
    }

    #[test]
    fn triangle_count_mismatch_is_corrupt() {
        let mut bytes = encode(&quad(), true).unwrap();
        bytes.truncate(bytes.len() - 10);
        assert!(matches!(decode(&bytes), Err(CodecError::CorruptFile(_))));
    }

    #[test]
    fn binary_header_starting_with_solid() {
        let mut bytes = encode(&quad(), true).unwrap();
        bytes[..5].copy_from_slice(b"solid");
        assert_eq!(decode(&bytes).unwrap().cell_count(), 2);
    }
}
