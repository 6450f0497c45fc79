use std::path::PathBuf;

use cloudkit_codec::FormatDescriptor;
use cloudkit_geometry::GeometryBuffer;

use super::{expect_bool, expect_format, expect_str, unknown_key};
use crate::PipelineError;
use crate::params::ParamValue;

pub(crate) const NAME: &str = "Writer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    File(PathBuf),
    /// Keep the encoded bytes on the stage, see `Pipeline::encoded_output`.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterParams {
    pub destination: Destination,
    pub format: FormatDescriptor,
}

impl WriterParams {
    pub fn new(destination: Destination, format: FormatDescriptor) -> Self {
        Self {
            destination,
            format,
        }
    }

    pub fn to_file(path: impl Into<PathBuf>, format: FormatDescriptor) -> Self {
        Self::new(Destination::File(path.into()), format)
    }

    pub fn to_memory(format: FormatDescriptor) -> Self {
        Self::new(Destination::Memory, format)
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        match &self.destination {
            Destination::File(path) if path.as_os_str().is_empty() => {
                Err(PipelineError::invalid(NAME, "path is empty"))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn set(&mut self, key: &str, value: &ParamValue) -> Result<(), PipelineError> {
        match key {
            "path" => {
                self.destination = Destination::File(PathBuf::from(expect_str(NAME, key, value)?));
            }
            "memory" => {
                if expect_bool(NAME, key, value)? {
                    self.destination = Destination::Memory;
                } else if self.destination == Destination::Memory {
                    return Err(PipelineError::invalid(
                        NAME,
                        "set a path to write to a file instead",
                    ));
                }
            }
            "format" => self.format.kind = expect_format(NAME, key, value)?,
            "binary" => self.format.binary = expect_bool(NAME, key, value)?,
            _ => return Err(unknown_key(NAME, key)),
        }
        Ok(())
    }

    /// Encode and deliver `input`. Returns the bytes when they stay in memory.
    pub(crate) fn run(&self, input: &GeometryBuffer) -> Result<Option<Vec<u8>>, PipelineError> {
        let bytes =
            cloudkit_codec::encode(input, self.format).map_err(PipelineError::from_encode)?;
        match &self.destination {
            Destination::File(path) => {
                std::fs::write(path, &bytes).map_err(|source| PipelineError::Write {
                    path: path.clone(),
                    source,
                })?;
                log::info!(
                    "Wrote {} points as {} to {}",
                    input.point_count(),
                    self.format,
                    path.display()
                );
                Ok(None)
            }
            Destination::Memory => Ok(Some(bytes)),
        }
    }
}
