//! Legacy VTK `POLYDATA` files, as written by `vtkPolyDataWriter`.
//!
//! Binary legacy files are big endian. Only the classic cell layout
//! (`POLYGONS n size` followed by `count i0 i1 ...` records) is understood.

use std::io::{self, Write as _};

use cloudkit_geometry::{Cell, GeometryBuffer, Point};
use glam::Vec3;

use crate::CodecError;
use crate::cursor::{ByteCursor, Endian, put_f32, put_i32};

const BE: Endian = Endian::Big;

fn decode_err(msg: impl Into<String>) -> CodecError {
    CodecError::Decode(format!("VTK: {}", msg.into()))
}

fn corrupt(msg: impl Into<String>) -> CodecError {
    CodecError::CorruptFile(format!("VTK: {}", msg.into()))
}

/// `count * per_item` values for a section, failing on overflow.
fn values_for(count: usize, per_item: usize, section: &str) -> Result<usize, CodecError> {
    count
        .checked_mul(per_item)
        .ok_or_else(|| corrupt(format!("{section} count {count} is too large")))
}

struct Reader<'a> {
    cursor: ByteCursor<'a>,
    binary: bool,
}

impl Reader<'_> {
    fn keyword(&mut self) -> Option<String> {
        self.cursor.next_token().map(str::to_ascii_uppercase)
    }

    fn count(&mut self, what: &str) -> Result<usize, CodecError> {
        self.cursor
            .parse_token()
            .ok_or_else(|| decode_err(format!("invalid {what} count")))
    }

    fn word(&mut self, what: &str) -> Result<String, CodecError> {
        self.cursor
            .next_token()
            .map(str::to_owned)
            .ok_or_else(|| decode_err(format!("missing {what}")))
    }

    /// Data follows on the next line in binary files.
    fn begin_data(&mut self) {
        if self.binary {
            self.cursor.skip_line();
        }
    }

    /// Every value takes at least one byte, ascii or binary.
    fn check_room(&self, n: usize, section: &str) -> Result<(), CodecError> {
        if n > self.cursor.remaining().len() {
            return Err(corrupt(format!(
                "{section} declares {n} values, the file holds {} more bytes",
                self.cursor.remaining().len()
            )));
        }
        Ok(())
    }

    fn floats(&mut self, ty: &str, n: usize, section: &str) -> Result<Vec<f32>, CodecError> {
        self.begin_data();
        self.check_room(n, section)?;
        let short = || corrupt(format!("{section} declares more values than the file holds"));
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            let value = if self.binary {
                match ty {
                    "float" => self.cursor.read_f32(BE),
                    "double" => self.cursor.read_f64(BE).map(|v| v as f32),
                    _ => return Err(decode_err(format!("unsupported binary type '{ty}'"))),
                }
            } else {
                self.cursor.parse_token::<f32>()
            };
            values.push(value.ok_or_else(short)?);
        }
        Ok(values)
    }

    fn ints(&mut self, n: usize, section: &str) -> Result<Vec<i64>, CodecError> {
        self.begin_data();
        self.check_room(n, section)?;
        let short = || corrupt(format!("{section} declares more values than the file holds"));
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            let value = if self.binary {
                self.cursor.read_i32(BE).map(i64::from)
            } else {
                self.cursor.parse_token::<i64>()
            };
            values.push(value.ok_or_else(short)?);
        }
        Ok(values)
    }

    fn bytes(&mut self, n: usize, section: &str) -> Result<Vec<u8>, CodecError> {
        self.begin_data();
        self.cursor
            .take(n)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| corrupt(format!("{section} declares more values than the file holds")))
    }

    /// `n size` followed by `size` ints of `count i0 i1 ...` records.
    fn cells(&mut self, section: &str, point_count: usize) -> Result<Vec<Cell>, CodecError> {
        let n = self.count(section)?;
        let size = self.count(section)?;
        let data = self.ints(size, section)?;
        if n > data.len() {
            return Err(corrupt(format!("{section} declares {n} cells in {size} values")));
        }

        let mut cells = Vec::with_capacity(n);
        let mut rest = data.as_slice();
        for i in 0..n {
            let (&len, tail) = rest
                .split_first()
                .ok_or_else(|| corrupt(format!("{section} declares {n} cells, found {i}")))?;
            let len = usize::try_from(len)
                .map_err(|_e| corrupt(format!("{section} cell {i} has a negative length")))?;
            if tail.len() < len {
                return Err(corrupt(format!("{section} size {size} is too small")));
            }
            let (indices, tail) = tail.split_at(len);
            let cell = indices
                .iter()
                .map(|&idx| {
                    u32::try_from(idx)
                        .ok()
                        .filter(|&idx| (idx as usize) < point_count)
                        .ok_or_else(|| {
                            corrupt(format!(
                                "{section} cell {i} references point {idx} of {point_count}"
                            ))
                        })
                })
                .collect::<Result<Cell, _>>()?;
            cells.push(cell);
            rest = tail;
        }
        if !rest.is_empty() {
            return Err(corrupt(format!(
                "{section} size {size} disagrees with its {n} cells"
            )));
        }
        Ok(cells)
    }
}

pub(crate) fn decode(bytes: &[u8]) -> Result<GeometryBuffer, CodecError> {
    let mut cursor = ByteCursor::new(bytes);
    let version = cursor.read_line().unwrap_or_default();
    if !version.starts_with("# vtk DataFile") {
        return Err(decode_err("missing '# vtk DataFile' header"));
    }
    let _title = cursor.read_line();
    let binary = match cursor.read_line().map(|l| l.trim().to_ascii_uppercase()) {
        Some(l) if l == "ASCII" => false,
        Some(l) if l == "BINARY" => true,
        _ => return Err(decode_err("expected ASCII or BINARY")),
    };

    let mut reader = Reader { cursor, binary };
    if reader.keyword().as_deref() != Some("DATASET") {
        return Err(decode_err("missing DATASET"));
    }
    let dataset = reader.word("dataset type")?;
    if !dataset.eq_ignore_ascii_case("POLYDATA") {
        return Err(decode_err(format!("unsupported dataset '{dataset}'")));
    }

    let mut positions: Vec<Vec3> = Vec::new();
    let mut normals: Option<Vec<Vec3>> = None;
    let mut colors: Option<Vec<[u8; 3]>> = None;
    let mut scalars: Option<Vec<f32>> = None;
    let mut cells: Vec<Cell> = Vec::new();

    while let Some(keyword) = reader.keyword() {
        match keyword.as_str() {
            "POINTS" => {
                let n = reader.count("POINTS")?;
                let ty = reader.word("POINTS type")?;
                let values = reader.floats(&ty, values_for(n, 3, "POINTS")?, "POINTS")?;
                positions = values.chunks_exact(3).map(Vec3::from_slice).collect();
            }
            // Vertex cells only make points renderable in VTK, the buffer
            // already is a point cloud without them.
            "VERTICES" => {
                reader.cells("VERTICES", positions.len())?;
            }
            "LINES" | "POLYGONS" => {
                cells.extend(reader.cells(&keyword, positions.len())?);
            }
            "POINT_DATA" => {
                let n = reader.count("POINT_DATA")?;
                if n != positions.len() {
                    return Err(corrupt(format!(
                        "POINT_DATA {n} disagrees with POINTS {}",
                        positions.len()
                    )));
                }
            }
            "NORMALS" => {
                let _name = reader.word("NORMALS name")?;
                let ty = reader.word("NORMALS type")?;
                let n = values_for(positions.len(), 3, "NORMALS")?;
                let values = reader.floats(&ty, n, "NORMALS")?;
                normals = Some(values.chunks_exact(3).map(Vec3::from_slice).collect());
            }
            "SCALARS" => {
                let _name = reader.word("SCALARS name")?;
                let ty = reader.word("SCALARS type")?;
                // Optional component count, then the lookup table.
                let mut next = reader.keyword();
                if let Some(components) = next.as_deref().and_then(|t| t.parse::<usize>().ok()) {
                    if components != 1 {
                        return Err(decode_err("only single component SCALARS are supported"));
                    }
                    next = reader.keyword();
                }
                if next.as_deref() != Some("LOOKUP_TABLE") {
                    return Err(decode_err("SCALARS without LOOKUP_TABLE"));
                }
                let _table = reader.word("lookup table name")?;
                scalars = Some(reader.floats(&ty, positions.len(), "SCALARS")?);
            }
            "COLOR_SCALARS" => {
                let _name = reader.word("COLOR_SCALARS name")?;
                let components = reader.count("COLOR_SCALARS components")?;
                if components < 3 {
                    return Err(decode_err("COLOR_SCALARS needs at least 3 components"));
                }
                let n = values_for(positions.len(), components, "COLOR_SCALARS")?;
                let channels: Vec<u8> = if binary {
                    reader.bytes(n, "COLOR_SCALARS")?
                } else {
                    reader
                        .floats("float", n, "COLOR_SCALARS")?
                        .into_iter()
                        .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
                        .collect()
                };
                colors = Some(
                    channels
                        .chunks_exact(components)
                        .map(|c| [c[0], c[1], c[2]])
                        .collect(),
                );
            }
            other => return Err(decode_err(format!("unsupported section '{other}'"))),
        }
    }

    let points = positions
        .into_iter()
        .enumerate()
        .map(|(i, position)| {
            let mut point = Point::new(position);
            point.normal = normals.as_ref().map(|n| n[i]);
            point.color = colors.as_ref().map(|c| c[i]);
            point.scalar = scalars.as_ref().map(|s| s[i]);
            point
        })
        .collect();
    Ok(GeometryBuffer::new(points, cells)?)
}

fn write_floats(
    out: &mut Vec<u8>,
    values: impl Iterator<Item = f32>,
    binary: bool,
    per_line: usize,
) -> io::Result<()> {
    if binary {
        for v in values {
            put_f32(out, v, BE);
        }
    } else {
        for (i, v) in values.enumerate() {
            if i > 0 {
                out.push(if i % per_line == 0 { b'\n' } else { b' ' });
            }
            write!(out, "{v}")?;
        }
    }
    out.push(b'\n');
    Ok(())
}

fn write_cells<'a>(
    out: &mut Vec<u8>,
    section: &str,
    cells: impl Iterator<Item = &'a [u32]> + Clone,
    binary: bool,
) -> io::Result<()> {
    let n = cells.clone().count();
    let size: usize = cells.clone().map(|c| c.len() + 1).sum();
    writeln!(out, "{section} {n} {size}")?;
    if binary {
        for cell in cells {
            put_i32(out, cell.len() as i32, BE);
            for &i in cell {
                put_i32(out, i as i32, BE);
            }
        }
        out.push(b'\n');
    } else {
        for cell in cells {
            write!(out, "{}", cell.len())?;
            for i in cell {
                write!(out, " {i}")?;
            }
            out.push(b'\n');
        }
    }
    Ok(())
}

pub(crate) fn encode(buffer: &GeometryBuffer, binary: bool) -> Result<Vec<u8>, CodecError> {
    let n = buffer.point_count();
    // Legacy files store ids and cell sizes as 32 bit ints.
    let ids = i32::try_from(n)
        .map_err(|_e| CodecError::Encode(format!("VTK: {n} points don't fit 32 bit ids")))?;
    let mut out = Vec::new();
    out.extend_from_slice(b"# vtk DataFile Version 3.0\nExported from cloudkit\n");
    out.extend_from_slice(if binary { b"BINARY\n" } else { b"ASCII\n" });
    out.extend_from_slice(b"DATASET POLYDATA\n");

    writeln!(out, "POINTS {n} float")?;
    write_floats(
        &mut out,
        buffer.positions().flat_map(|p| p.to_array()),
        binary,
        3,
    )?;

    if buffer.has_cells() {
        write_cells(&mut out, "POLYGONS", buffer.cells().iter().map(Vec::as_slice), binary)?;
    } else if n > 0 {
        let ids: Vec<[u32; 1]> = (0..ids.unsigned_abs()).map(|i| [i]).collect();
        write_cells(&mut out, "VERTICES", ids.iter().map(|c| c.as_slice()), binary)?;
    }

    let (normals, colors, scalars) =
        (buffer.has_normals(), buffer.has_colors(), buffer.has_scalars());
    if normals || colors || scalars {
        writeln!(out, "POINT_DATA {n}")?;
    }
    if scalars {
        out.extend_from_slice(b"SCALARS scalar float 1\nLOOKUP_TABLE default\n");
        write_floats(
            &mut out,
            buffer.points().iter().filter_map(|p| p.scalar),
            binary,
            1,
        )?;
    }
    if normals {
        out.extend_from_slice(b"NORMALS normals float\n");
        write_floats(
            &mut out,
            buffer.points().iter().filter_map(|p| p.normal).flat_map(|n| n.to_array()),
            binary,
            3,
        )?;
    }
    if colors {
        out.extend_from_slice(b"COLOR_SCALARS rgb 3\n");
        let channels = buffer.points().iter().filter_map(|p| p.color).flatten();
        if binary {
            out.extend(channels);
            out.push(b'\n');
        } else {
            write_floats(&mut out, channels.map(|c| f32::from(c) / 255.0), false, 3)?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attributed_cloud() -> GeometryBuffer {
        let points = (0..4)
            .map(|i| {
                let f = i as f32;
                Point::from_xyz(f, f * 0.5, -f)
                    .with_normal(Vec3::Y)
                    .with_color([i as u8 * 60, 255, 7])
                    .with_scalar(f * 1.25)
            })
            .collect();
        GeometryBuffer::from_points(points)
    }

    #[test]
    fn point_cloud_with_data_round_trips() {
        for binary in [false, true] {
            let buffer = attributed_cloud();
            let bytes = encode(&buffer, binary).unwrap();
            assert_eq!(decode(&bytes).unwrap(), buffer, "binary: {binary}");
        }
    }

    #[test]
    fn vertices_are_not_cells() {
        let text = String::from_utf8(encode(&attributed_cloud(), false).unwrap()).unwrap();
        assert!(text.contains("VERTICES 4 8\n1 0\n"));
        assert!(!decode(text.as_bytes()).unwrap().has_cells());
    }

    #[test]
    fn reads_hand_written_polydata() {
        let text = "# vtk DataFile Version 2.0\ncube face\nASCII\n\nDATASET POLYDATA\n\
POINTS 4 double\n0 0 0 1 0 0\n1 1 0 0 1 0\nPOLYGONS 1 5\n4 0 1 2 3\n\
POINT_DATA 4\nSCALARS height float\nLOOKUP_TABLE default\n0 0 1 1\n";
        let buffer = decode(text.as_bytes()).unwrap();
        assert_eq!(buffer.point_count(), 4);
        assert_eq!(buffer.cell(0).unwrap(), &[0, 1, 2, 3]);
        assert_eq!(buffer.point(2).unwrap().scalar, Some(1.0));
    }

    #[test]
    fn count_mismatches_are_corrupt() {
        let short_points = "# vtk DataFile Version 3.0\nx\nASCII\nDATASET POLYDATA\n\
POINTS 3 float\n0 0 0 1 1 1\n";
        assert!(matches!(
            decode(short_points.as_bytes()),
            Err(CodecError::CorruptFile(_))
        ));

        let bad_size = "# vtk DataFile Version 3.0\nx\nASCII\nDATASET POLYDATA\n\
POINTS 3 float\n0 0 0 1 1 1 2 2 2\nPOLYGONS 1 5\n3 0 1 2\n";
        assert!(matches!(
            decode(bad_size.as_bytes()),
            Err(CodecError::CorruptFile(_))
        ));

        let bad_index = "# vtk DataFile Version 3.0\nx\nASCII\nDATASET POLYDATA\n\
POINTS 3 float\n0 0 0 1 1 1 2 2 2\nPOLYGONS 1 4\n3 0 1 5\n";
        assert!(matches!(
            decode(bad_index.as_bytes()),
            Err(CodecError::CorruptFile(_))
        ));
    }

    #[test]
    fn huge_declared_counts_are_corrupt() {
        let points = "# vtk DataFile Version 3.0\nx\nASCII\nDATASET POLYDATA\n\
POINTS 6148914691236517206 float\n0 0 0\n";
        assert!(matches!(
            decode(points.as_bytes()),
            Err(CodecError::CorruptFile(_))
        ));

        let mut binary = b"# vtk DataFile Version 3.0\nx\nBINARY\nDATASET POLYDATA\n\
POINTS 1000000000 float\n"
            .to_vec();
        binary.extend_from_slice(&[0; 12]);
        assert!(matches!(decode(&binary), Err(CodecError::CorruptFile(_))));

        let polygons = "# vtk DataFile Version 3.0\nx\nASCII\nDATASET POLYDATA\n\
POINTS 1 float\n0 0 0\nPOLYGONS 18446744073709551615 2\n1 0\n";
        assert!(matches!(
            decode(polygons.as_bytes()),
            Err(CodecError::CorruptFile(_))
        ));

        let colors = "# vtk DataFile Version 3.0\nx\nASCII\nDATASET POLYDATA\n\
POINTS 1 float\n0 0 0\nPOINT_DATA 1\nCOLOR_SCALARS rgb 18446744073709551615\n1 1 1\n";
        assert!(matches!(
            decode(colors.as_bytes()),
            Err(CodecError::CorruptFile(_))
        ));
    }

    #[test]
    fn unstructured_grid_is_rejected() {
        let text = "# vtk DataFile Version 3.0\nx\nASCII\nDATASET UNSTRUCTURED_GRID\n";
        assert!(matches!(decode(text.as_bytes()), Err(CodecError::Decode(_))));
    }
}
