//! PLY through serde-ply. Rows land in small serde structs, unknown
//! properties and elements are skipped by serde.
//!
//! Before handing the bytes to serde-ply the header is scanned once, so that
//! declared element counts can be checked against the size of the body.

use cloudkit_geometry::{Cell, GeometryBuffer, Point};
use glam::Vec3;
use serde::de::{Deserializer, Visitor};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_ply::SerializeOptions;

use crate::CodecError;
use crate::cursor::ByteCursor;

const SCALAR_TYPES: [&str; 16] = [
    "char", "int8", "uchar", "uint8", "short", "int16", "ushort", "uint16", "int", "int32",
    "uint", "uint32", "float", "float32", "double", "float64",
];

fn decode_err(msg: impl Into<String>) -> CodecError {
    CodecError::Decode(format!("PLY: {}", msg.into()))
}

fn corrupt(msg: impl Into<String>) -> CodecError {
    CodecError::CorruptFile(format!("PLY: {}", msg.into()))
}

fn de_color_channel<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Channel;
    impl Visitor<'_> for Channel {
        type Value = Option<u8>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("an integer channel or a float in 0..1")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Option<u8>, E> {
            Ok(Some(value.min(255) as u8))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Option<u8>, E> {
            Ok(Some(value.clamp(0, 255) as u8))
        }

        fn visit_f64<E>(self, value: f64) -> Result<Option<u8>, E> {
            Ok(Some((value.clamp(0.0, 1.0) * 255.0).round() as u8))
        }
    }
    deserializer.deserialize_any(Channel)
}

#[derive(Deserialize)]
struct VertexRow {
    x: f32,
    y: f32,
    z: f32,
    nx: Option<f32>,
    ny: Option<f32>,
    nz: Option<f32>,
    #[serde(default, alias = "r", deserialize_with = "de_color_channel")]
    red: Option<u8>,
    #[serde(default, alias = "g", deserialize_with = "de_color_channel")]
    green: Option<u8>,
    #[serde(default, alias = "b", deserialize_with = "de_color_channel")]
    blue: Option<u8>,
    #[serde(alias = "intensity")]
    scalar: Option<f32>,
}

impl VertexRow {
    fn into_point(self) -> Point {
        let mut point = Point::from_xyz(self.x, self.y, self.z);
        if let (Some(x), Some(y), Some(z)) = (self.nx, self.ny, self.nz) {
            point = point.with_normal(Vec3::new(x, y, z));
        }
        if let (Some(r), Some(g), Some(b)) = (self.red, self.green, self.blue) {
            point = point.with_color([r, g, b]);
        }
        if let Some(scalar) = self.scalar {
            point = point.with_scalar(scalar);
        }
        point
    }
}

#[derive(Deserialize)]
struct FaceRow {
    #[serde(alias = "vertex_index")]
    vertex_indices: Cell,
}

#[derive(Deserialize)]
struct PlyFile {
    #[serde(default)]
    vertex: Vec<VertexRow>,
    #[serde(default)]
    face: Vec<FaceRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    Binary,
}

struct ElementDecl {
    name: String,
    count: usize,
    properties: Vec<String>,
}

struct HeaderScan<'a> {
    encoding: Encoding,
    elements: Vec<ElementDecl>,
    body: &'a [u8],
}

fn check_type(ty: &str) -> Result<(), CodecError> {
    if SCALAR_TYPES.contains(&ty) {
        Ok(())
    } else {
        Err(decode_err(format!("unknown type '{ty}'")))
    }
}

fn add_property(elements: &mut [ElementDecl], name: &str) -> Result<(), CodecError> {
    elements
        .last_mut()
        .ok_or_else(|| decode_err("property before any element"))?
        .properties
        .push(name.to_owned());
    Ok(())
}

fn scan_header(bytes: &[u8]) -> Result<HeaderScan<'_>, CodecError> {
    let mut cursor = ByteCursor::new(bytes);
    if cursor.read_line().map(str::trim) != Some("ply") {
        return Err(decode_err("missing 'ply' magic"));
    }

    let mut encoding = None;
    let mut elements: Vec<ElementDecl> = Vec::new();
    loop {
        let line = cursor
            .read_line()
            .ok_or_else(|| decode_err("header is missing 'end_header'"))?;
        let parts: Vec<&str> = line.split_ascii_whitespace().collect();
        match parts.as_slice() {
            [] | ["comment" | "obj_info", ..] => {}
            ["end_header"] => break,
            ["format", kind, _version] => {
                encoding = Some(match *kind {
                    "ascii" => Encoding::Ascii,
                    "binary_little_endian" | "binary_big_endian" => Encoding::Binary,
                    other => return Err(decode_err(format!("unknown format '{other}'"))),
                });
            }
            ["element", name, count] => {
                let count = count
                    .parse()
                    .map_err(|_e| decode_err(format!("invalid element count '{count}'")))?;
                elements.push(ElementDecl {
                    name: (*name).to_owned(),
                    count,
                    properties: Vec::new(),
                });
            }
            ["property", "list", count, item, name] => {
                check_type(count)?;
                check_type(item)?;
                add_property(&mut elements, name)?;
            }
            ["property", ty, name] => {
                check_type(ty)?;
                add_property(&mut elements, name)?;
            }
            _ => return Err(decode_err(format!("unexpected header line '{line}'"))),
        }
    }

    let encoding = encoding.ok_or_else(|| decode_err("header has no format line"))?;
    Ok(HeaderScan {
        encoding,
        elements,
        body: cursor.remaining(),
    })
}

impl HeaderScan<'_> {
    /// Every property of every row takes at least one byte, so a count the
    /// body can't hold is rejected before serde-ply sizes anything by it.
    fn check_counts(&self) -> Result<(), CodecError> {
        let mut min_bytes = 0usize;
        for element in &self.elements {
            if element.count > 0 && element.properties.is_empty() {
                return Err(corrupt(format!(
                    "element '{}' has rows but no properties",
                    element.name
                )));
            }
            min_bytes = element
                .count
                .checked_mul(element.properties.len())
                .and_then(|n| n.checked_add(min_bytes))
                .filter(|&n| n <= self.body.len())
                .ok_or_else(|| {
                    corrupt(format!(
                        "element '{}' declares {} rows, the body only holds {} bytes",
                        element.name,
                        element.count,
                        self.body.len()
                    ))
                })?;
        }

        if let Some(vertex) = self.elements.iter().find(|e| e.name == "vertex") {
            let has = |axis: &str| vertex.properties.iter().any(|p| p == axis);
            if !(has("x") && has("y") && has("z")) {
                return Err(decode_err("vertex element needs x, y and z properties"));
            }
        }

        // Ascii bodies hold one row per line.
        if self.encoding == Encoding::Ascii {
            let declared: usize = self.elements.iter().map(|e| e.count).sum();
            let rows = self
                .body
                .split(|&b| b == b'\n')
                .filter(|line| !line.trim_ascii().is_empty())
                .count();
            if rows != declared {
                return Err(corrupt(format!(
                    "header declares {declared} rows, the body has {rows}"
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn decode(bytes: &[u8]) -> Result<GeometryBuffer, CodecError> {
    let header = scan_header(bytes)?;
    header.check_counts()?;
    for element in &header.elements {
        if element.name != "vertex" && element.name != "face" {
            log::debug!("Skipping PLY element '{}' ({} rows)", element.name, element.count);
        }
    }

    let file: PlyFile = serde_ply::from_bytes(bytes).map_err(|e| corrupt(e.to_string()))?;
    let points = file.vertex.into_iter().map(VertexRow::into_point).collect();
    let cells = file.face.into_iter().map(|f| f.vertex_indices).collect();
    Ok(GeometryBuffer::new(points, cells)?)
}

/// Which optional vertex properties are written. Only attributes every point
/// carries are written, so all rows share one layout.
#[derive(Clone, Copy)]
struct Attributes {
    normals: bool,
    colors: bool,
    scalars: bool,
}

struct VertexOut<'a> {
    point: &'a Point,
    attributes: Attributes,
}

impl Serialize for VertexOut<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let Attributes {
            normals,
            colors,
            scalars,
        } = self.attributes;
        let len = 3 + 3 * usize::from(normals) + 3 * usize::from(colors) + usize::from(scalars);
        let p = self.point;

        let mut row = serializer.serialize_struct("vertex", len)?;
        row.serialize_field("x", &p.position.x)?;
        row.serialize_field("y", &p.position.y)?;
        row.serialize_field("z", &p.position.z)?;
        if let (true, Some(n)) = (normals, p.normal) {
            row.serialize_field("nx", &n.x)?;
            row.serialize_field("ny", &n.y)?;
            row.serialize_field("nz", &n.z)?;
        }
        if let (true, Some([r, g, b])) = (colors, p.color) {
            row.serialize_field("red", &r)?;
            row.serialize_field("green", &g)?;
            row.serialize_field("blue", &b)?;
        }
        if let (true, Some(s)) = (scalars, p.scalar) {
            row.serialize_field("scalar", &s)?;
        }
        row.end()
    }
}

#[derive(Serialize)]
struct FaceOut<'a> {
    vertex_indices: &'a [u32],
}

#[derive(Serialize)]
struct PlyOut<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    vertex: Vec<VertexOut<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    face: Vec<FaceOut<'a>>,
}

pub(crate) fn encode(buffer: &GeometryBuffer, binary: bool) -> Result<Vec<u8>, CodecError> {
    // Face lists carry a uchar count.
    if let Some(i) = buffer.cells().iter().position(|c| c.len() > usize::from(u8::MAX)) {
        return Err(CodecError::Encode(format!(
            "PLY: cell {i} has {} corners, at most 255 fit a face list",
            buffer.cell(i).map_or(0, <[u32]>::len)
        )));
    }

    let attributes = Attributes {
        normals: buffer.has_normals(),
        colors: buffer.has_colors(),
        scalars: buffer.has_scalars(),
    };
    let ply = PlyOut {
        vertex: buffer
            .points()
            .iter()
            .map(|point| VertexOut { point, attributes })
            .collect(),
        face: buffer
            .cells()
            .iter()
            .map(|c| FaceOut { vertex_indices: c })
            .collect(),
    };

    let options = if binary {
        SerializeOptions::binary_le()
    } else {
        SerializeOptions::ascii()
    };
    let options = options.with_comments(vec!["Exported from cloudkit".to_owned()]);
    serde_ply::to_bytes(&ply, options).map_err(|e| CodecError::Encode(format!("PLY: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colored_triangle() -> GeometryBuffer {
        let points = vec![
            Point::from_xyz(0.1, 0.2, 0.3)
                .with_normal(Vec3::Z)
                .with_color([255, 0, 10])
                .with_scalar(0.5),
            Point::from_xyz(1.0, -2.5, 3.0)
                .with_normal(Vec3::Y)
                .with_color([1, 2, 3])
                .with_scalar(1.5),
            Point::from_xyz(1e-3, 4.0, 7.25)
                .with_normal(Vec3::X)
                .with_color([9, 9, 9])
                .with_scalar(-2.0),
        ];
        GeometryBuffer::new(points, vec![vec![0, 1, 2]]).unwrap()
    }

    #[test]
    fn ascii_round_trip_keeps_attributes() {
        let buffer = colored_triangle();
        let bytes = encode(&buffer, false).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("ply\n"));
        assert!(text.contains("format ascii 1.0"));
        assert!(text.contains("comment Exported from cloudkit"));
        assert!(text.contains("property uchar red"));
        assert_eq!(decode(&bytes).unwrap(), buffer);
    }

    #[test]
    fn binary_round_trip_keeps_attributes() {
        let buffer = colored_triangle();
        let bytes = encode(&buffer, true).unwrap();
        assert!(
            bytes
                .windows(b"binary_little_endian".len())
                .any(|w| w == b"binary_little_endian")
        );
        assert_eq!(decode(&bytes).unwrap(), buffer);
    }

    #[test]
    fn point_cloud_has_no_face_element() {
        let cloud = colored_triangle().without_cells();
        let text = String::from_utf8(encode(&cloud, false).unwrap()).unwrap();
        assert!(!text.contains("element face"));
        assert_eq!(decode(text.as_bytes()).unwrap(), cloud);
    }

    #[test]
    fn reads_big_endian_and_other_types() {
        let mut data = b"ply\nformat binary_big_endian 1.0\nelement vertex 2\n\
property double x\nproperty double y\nproperty double z\nproperty short flags\n\
element face 1\nproperty list uchar uint vertex_index\nend_header\n"
            .to_vec();
        for v in [1.0f64, 2.0, 3.0] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        data.extend_from_slice(&7i16.to_be_bytes());
        for v in [4.0f64, 5.0, 6.0] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        data.extend_from_slice(&8i16.to_be_bytes());
        data.push(2);
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());

        let buffer = decode(&data).unwrap();
        assert_eq!(buffer.point_count(), 2);
        assert_eq!(buffer.point(1).unwrap().position, glam::vec3(4.0, 5.0, 6.0));
        assert_eq!(buffer.cell(0).unwrap(), &[1, 0]);
        assert!(!buffer.has_normals());
    }

    #[test]
    fn ascii_point_cloud_with_comments() {
        let text = "ply\nformat ascii 1.0\ncomment scanned\nelement vertex 2\n\
property float x\nproperty float y\nproperty float z\n\
property uchar red\nproperty uchar green\nproperty uchar blue\n\
property float intensity\nend_header\n\
0 0 0 255 255 255 0.5\n1 1 1 0 0 0 2\n";
        let buffer = decode(text.as_bytes()).unwrap();
        assert_eq!(buffer.point_count(), 2);
        assert!(!buffer.has_cells());
        assert_eq!(buffer.point(0).unwrap().color, Some([255, 255, 255]));
        assert_eq!(buffer.point(1).unwrap().scalar, Some(2.0));
    }

    #[test]
    fn float_colors_are_scaled() {
        let text = "ply\nformat ascii 1.0\nelement vertex 1\n\
property float x\nproperty float y\nproperty float z\n\
property float r\nproperty float g\nproperty float b\nend_header\n\
0 0 0 1.0 0.0 0.5\n";
        let buffer = decode(text.as_bytes()).unwrap();
        assert_eq!(buffer.point(0).unwrap().color, Some([255, 0, 128]));
    }

    #[test]
    fn unknown_elements_are_skipped() {
        let text = "ply\nformat ascii 1.0\nelement vertex 2\n\
property float x\nproperty float y\nproperty float z\n\
element edge 1\nproperty int vertex1\nproperty int vertex2\nend_header\n\
0 0 0\n1 0 0\n0 1\n";
        let buffer = decode(text.as_bytes()).unwrap();
        assert_eq!(buffer.point_count(), 2);
        assert!(!buffer.has_cells());
    }

    #[test]
    fn declared_count_mismatch_is_corrupt() {
        let text = "ply\nformat ascii 1.0\nelement vertex 3\n\
property float x\nproperty float y\nproperty float z\nend_header\n0 0 0\n1 1 1\n";
        assert!(matches!(
            decode(text.as_bytes()),
            Err(CodecError::CorruptFile(_))
        ));

        let extra = "ply\nformat ascii 1.0\nelement vertex 1\n\
property float x\nproperty float y\nproperty float z\nend_header\n0 0 0\n1 1 1\n";
        assert!(matches!(
            decode(extra.as_bytes()),
            Err(CodecError::CorruptFile(_))
        ));
    }

    #[test]
    fn huge_declared_counts_are_corrupt() {
        let ascii = "ply\nformat ascii 1.0\nelement vertex 18446744073709551615\n\
property float x\nproperty float y\nproperty float z\nend_header\n0 0 0\n";
        assert!(matches!(
            decode(ascii.as_bytes()),
            Err(CodecError::CorruptFile(_))
        ));

        let mut binary = b"ply\nformat binary_little_endian 1.0\nelement vertex 6148914691236517206\n\
property float x\nproperty float y\nproperty float z\nend_header\n"
            .to_vec();
        binary.extend_from_slice(&[0; 12]);
        assert!(matches!(decode(&binary), Err(CodecError::CorruptFile(_))));

        let faces = "ply\nformat ascii 1.0\nelement vertex 1\n\
property float x\nproperty float y\nproperty float z\n\
element face 4611686018427387904\nproperty list uchar int vertex_indices\nend_header\n\
0 0 0\n1 0\n";
        assert!(matches!(
            decode(faces.as_bytes()),
            Err(CodecError::CorruptFile(_))
        ));
    }

    #[test]
    fn face_out_of_range_is_corrupt() {
        let text = "ply\nformat ascii 1.0\nelement vertex 3\n\
property float x\nproperty float y\nproperty float z\n\
element face 1\nproperty list uchar int vertex_indices\nend_header\n\
0 0 0\n1 0 0\n0 1 0\n3 0 1 7\n";
        assert!(matches!(
            decode(text.as_bytes()),
            Err(CodecError::CorruptFile(_))
        ));
    }

    #[test]
    fn bad_header_is_decode_error() {
        assert!(matches!(decode(b"solid x\n"), Err(CodecError::Decode(_))));
        assert!(matches!(
            decode(b"ply\nformat ascii 1.0\nelement vertex 1\n"),
            Err(CodecError::Decode(_))
        ));
        assert!(matches!(
            decode(b"ply\nformat ascii 1.0\nelement vertex 1\nproperty quad x\nend_header\n1\n"),
            Err(CodecError::Decode(_))
        ));
        assert!(matches!(
            decode(b"ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nend_header\n1\n"),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn oversized_polygon_is_refused() {
        let points = (0..300).map(|i| Point::from_xyz(i as f32, 0.0, 0.0)).collect();
        let fan = GeometryBuffer::new(points, vec![(0..300).collect()]).unwrap();
        assert!(matches!(encode(&fan, false), Err(CodecError::Encode(_))));
    }
}
