use std::path::PathBuf;
use std::sync::Arc;

use cloudkit_codec::{FormatDescriptor, FormatKind};
use cloudkit_geometry::{GeometryBuffer, PackedLayout};

use super::{expect_bool, expect_format, expect_str, unknown_key};
use crate::PipelineError;
use crate::params::ParamValue;

pub(crate) const NAME: &str = "Reader";

/// Where a Reader gets its data.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Path(PathBuf),
    /// An externally supplied float buffer holding `count` elements.
    Packed {
        data: Arc<[f32]>,
        count: usize,
        layout: PackedLayout,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReaderParams {
    pub source: Source,
    /// Ignored for packed sources.
    pub format: FormatDescriptor,
}

impl ReaderParams {
    pub fn new(source: Source, format: FormatDescriptor) -> Self {
        Self { source, format }
    }

    /// Read a file, guessing its format from the extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let path = path.into();
        let format = FormatDescriptor::from_path(&path).ok_or_else(|| {
            PipelineError::invalid(NAME, format!("can't tell the format of {}", path.display()))
        })?;
        Ok(Self::new(Source::Path(path), format))
    }

    pub fn packed(data: impl Into<Arc<[f32]>>, count: usize, layout: PackedLayout) -> Self {
        Self::new(
            Source::Packed {
                data: data.into(),
                count,
                layout,
            },
            FormatDescriptor::text(FormatKind::Xyz),
        )
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        match &self.source {
            Source::Path(path) if path.as_os_str().is_empty() => {
                Err(PipelineError::invalid(NAME, "path is empty"))
            }
            Source::Packed {
                data,
                count,
                layout,
            } if count.saturating_mul(layout.stride()) > data.len() => Err(PipelineError::invalid(
                NAME,
                format!(
                    "packed buffer holds {} floats, {count} elements need {}",
                    data.len(),
                    count.saturating_mul(layout.stride())
                ),
            )),
            _ => Ok(()),
        }
    }

    pub(crate) fn set(&mut self, key: &str, value: &ParamValue) -> Result<(), PipelineError> {
        match key {
            "path" => self.source = Source::Path(PathBuf::from(expect_str(NAME, key, value)?)),
            "format" => self.format.kind = expect_format(NAME, key, value)?,
            "binary" => self.format.binary = expect_bool(NAME, key, value)?,
            _ => return Err(unknown_key(NAME, key)),
        }
        Ok(())
    }

    pub(crate) fn run(&self) -> Result<GeometryBuffer, PipelineError> {
        match &self.source {
            Source::Path(path) => {
                let bytes = std::fs::read(path).map_err(|source| PipelineError::NotFound {
                    path: path.clone(),
                    source,
                })?;
                let buffer = cloudkit_codec::decode(&bytes, self.format)?;
                log::info!(
                    "Read {} points, {} cells from {}",
                    buffer.point_count(),
                    buffer.cell_count(),
                    path.display()
                );
                Ok(buffer)
            }
            Source::Packed {
                data,
                count,
                layout,
            } => Ok(GeometryBuffer::from_packed(data, *count, *layout)?),
        }
    }
}
