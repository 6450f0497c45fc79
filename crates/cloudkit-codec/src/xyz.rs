use std::io::Write as _;

use cloudkit_geometry::{GeometryBuffer, Point};

use crate::CodecError;

fn parse(line_no: usize, s: &str) -> Result<f32, CodecError> {
    s.parse()
        .map_err(|_e| CodecError::Decode(format!("XYZ line {line_no}: invalid number '{s}'")))
}

pub(crate) fn decode(bytes: &[u8]) -> Result<GeometryBuffer, CodecError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_e| CodecError::Decode("XYZ: file is not valid UTF-8".to_owned()))?;

    let mut points = Vec::new();
    let mut columns = None;
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let s = line.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let values = s
            .split(|c: char| c.is_ascii_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .map(|t| parse(line_no, t))
            .collect::<Result<Vec<_>, _>>()?;

        if *columns.get_or_insert(values.len()) != values.len() {
            return Err(CodecError::Decode(format!(
                "XYZ line {line_no}: {} columns, previous lines have {}",
                values.len(),
                columns.unwrap_or_default()
            )));
        }
        let point = match values.as_slice() {
            [x, y, z] => Point::from_xyz(*x, *y, *z),
            [x, y, z, nx, ny, nz] => Point::from_xyz(*x, *y, *z).with_normal(glam::vec3(*nx, *ny, *nz)),
            _ => {
                return Err(CodecError::Decode(format!(
                    "XYZ line {line_no}: expected 3 or 6 columns, found {}",
                    values.len()
                )));
            }
        };
        points.push(point);
    }
    Ok(GeometryBuffer::from_points(points))
}

pub(crate) fn encode(buffer: &GeometryBuffer) -> Result<Vec<u8>, CodecError> {
    let normals = buffer.has_normals();
    let mut out = Vec::new();
    for p in buffer.points() {
        write!(out, "{} {} {}", p.position.x, p.position.y, p.position.z)?;
        if let (true, Some(n)) = (normals, p.normal) {
            write!(out, " {} {} {}", n.x, n.y, n.z)?;
        }
        out.push(b'\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_normal_columns() {
        let buffer = decode(b"# scan\n0 0 0\n1.5,2,3\n\n").unwrap();
        assert_eq!(buffer.point_count(), 2);
        assert_eq!(buffer.point(1).unwrap().position, glam::vec3(1.5, 2.0, 3.0));

        let with_normals = GeometryBuffer::from_points(vec![
            Point::from_xyz(0.25, -1.0, 8.0).with_normal(glam::Vec3::X),
        ]);
        let bytes = encode(&with_normals).unwrap();
        assert_eq!(bytes, b"0.25 -1 8 1 0 0\n");
        assert_eq!(decode(&bytes).unwrap(), with_normals);
    }

    #[test]
    fn grid_origin_is_written_as_integers() {
        let buffer = GeometryBuffer::from_points(vec![Point::from_xyz(0.0, 0.0, 0.0)]);
        assert_eq!(encode(&buffer).unwrap(), b"0 0 0\n");
    }

    #[test]
    fn mixed_columns_are_rejected() {
        assert!(matches!(
            decode(b"0 0 0\n1 1 1 0 0 1\n"),
            Err(CodecError::Decode(_))
        ));
        assert!(matches!(decode(b"0 0\n"), Err(CodecError::Decode(_))));
    }
}
