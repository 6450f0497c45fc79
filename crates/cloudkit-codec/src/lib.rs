mod cursor;
mod obj;
mod ply;
mod stl;
mod vtk;
mod xyz;

use std::fmt;
use std::path::Path;

use clap::ValueEnum;
use cloudkit_geometry::{GeometryBuffer, GeometryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to decode: {0}")]
    Decode(String),

    #[error("Corrupt file: {0}")]
    CorruptFile(String),

    #[error("Failed to encode: {0}")]
    Encode(String),

    #[error("IO error while reading or writing geometry.")]
    Io(#[from] std::io::Error),
}

impl From<GeometryError> for CodecError {
    fn from(err: GeometryError) -> Self {
        Self::CorruptFile(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatKind {
    Ply,
    Vtk,
    Xyz,
    Obj,
    Stl,
}

impl FormatKind {
    /// Match a file extension, case insensitive, with or without a leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "ply" => Some(Self::Ply),
            "vtk" => Some(Self::Vtk),
            "xyz" => Some(Self::Xyz),
            "obj" => Some(Self::Obj),
            "stl" => Some(Self::Stl),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Ply => "ply",
            Self::Vtk => "vtk",
            Self::Xyz => "xyz",
            Self::Obj => "obj",
            Self::Stl => "stl",
        }
    }

    /// Whether the format can store cells. XYZ is the only pure point format.
    pub fn supports_cells(self) -> bool {
        !matches!(self, Self::Xyz)
    }

    pub fn supports_binary(self) -> bool {
        matches!(self, Self::Ply | Self::Vtk | Self::Stl)
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ply => "PLY",
            Self::Vtk => "VTK",
            Self::Xyz => "XYZ",
            Self::Obj => "OBJ",
            Self::Stl => "STL",
        };
        f.write_str(name)
    }
}

/// A format plus its encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub kind: FormatKind,
    pub binary: bool,
}

impl FormatDescriptor {
    pub fn new(kind: FormatKind, binary: bool) -> Self {
        Self { kind, binary }
    }

    pub fn text(kind: FormatKind) -> Self {
        Self::new(kind, false)
    }

    pub fn binary(kind: FormatKind) -> Self {
        Self::new(kind, true)
    }

    /// Text descriptor guessed from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        FormatKind::from_path(path).map(Self::text)
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.binary && self.kind.supports_binary() {
            write!(f, "{} (binary)", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

/// Decode a complete file. PLY, VTK and STL detect their own encoding, so
/// the binary flag of `format` only matters for encoding.
pub fn decode(bytes: &[u8], format: FormatDescriptor) -> Result<GeometryBuffer, CodecError> {
    let _span = tracing::trace_span!("decode", format = %format.kind).entered();

    let buffer = match format.kind {
        FormatKind::Ply => ply::decode(bytes)?,
        FormatKind::Vtk => vtk::decode(bytes)?,
        FormatKind::Xyz => xyz::decode(bytes)?,
        FormatKind::Obj => obj::decode(bytes)?,
        FormatKind::Stl => stl::decode(bytes)?,
    };
    log::debug!(
        "Decoded {} points and {} cells from {}",
        buffer.point_count(),
        buffer.cell_count(),
        format.kind
    );
    Ok(buffer)
}

pub fn encode(buffer: &GeometryBuffer, format: FormatDescriptor) -> Result<Vec<u8>, CodecError> {
    let _span = tracing::trace_span!("encode", format = %format).entered();

    if format.binary && !format.kind.supports_binary() {
        log::warn!("{} has no binary encoding, writing text instead", format.kind);
    }
    if buffer.has_cells() && !format.kind.supports_cells() {
        log::debug!(
            "Dropping {} cells, {} only stores points",
            buffer.cell_count(),
            format.kind
        );
    }

    match format.kind {
        FormatKind::Ply => ply::encode(buffer, format.binary),
        FormatKind::Vtk => vtk::encode(buffer, format.binary),
        FormatKind::Xyz => xyz::encode(buffer),
        FormatKind::Obj => obj::encode(buffer),
        FormatKind::Stl => stl::encode(buffer, format.binary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudkit_geometry::Point;

    #[test]
    fn extensions() {
        assert_eq!(FormatKind::from_extension("PLY"), Some(FormatKind::Ply));
        assert_eq!(FormatKind::from_extension(".stl"), Some(FormatKind::Stl));
        assert_eq!(FormatKind::from_extension("las"), None);
        assert_eq!(
            FormatKind::from_path(Path::new("scan/room.obj")),
            Some(FormatKind::Obj)
        );
    }

    #[test]
    fn capabilities() {
        assert!(!FormatKind::Xyz.supports_cells());
        assert!(FormatKind::Stl.supports_cells());
        assert!(FormatKind::Vtk.supports_binary());
        assert!(!FormatKind::Obj.supports_binary());
    }

    #[test]
    fn round_trip_all_formats() {
        let points = vec![
            Point::from_xyz(0.0, 0.0, 0.0),
            Point::from_xyz(1.0, 0.0, 0.0),
            Point::from_xyz(0.0, 1.0, 0.25),
        ];
        let mesh = GeometryBuffer::new(points.clone(), vec![vec![0, 1, 2]]).unwrap();

        for kind in [FormatKind::Ply, FormatKind::Vtk, FormatKind::Obj, FormatKind::Stl] {
            for binary in [false, true] {
                let format = FormatDescriptor::new(kind, binary);
                let bytes = encode(&mesh, format).unwrap();
                let decoded = decode(&bytes, format).unwrap();
                assert_eq!(decoded, mesh, "{format}");
            }
        }

        let bytes = encode(&mesh, FormatDescriptor::binary(FormatKind::Xyz)).unwrap();
        let decoded = decode(&bytes, FormatDescriptor::text(FormatKind::Xyz)).unwrap();
        assert_eq!(decoded, GeometryBuffer::from_points(points));
    }
}
