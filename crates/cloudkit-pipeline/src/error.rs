use std::path::PathBuf;

use cloudkit_codec::CodecError;
use cloudkit_geometry::GeometryError;
use thiserror::Error;

use crate::graph::StageId;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid parameter for {stage}: {reason}")]
    InvalidParameter { stage: String, reason: String },

    #[error("{stage} can't run on its input: {reason}")]
    InsufficientData { stage: String, reason: String },

    #[error("Failed to decode input: {0}")]
    Decode(String),

    #[error("Input is corrupt: {0}")]
    CorruptFile(String),

    #[error("Failed to open {path:?}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode output: {0}")]
    Encode(String),

    #[error("Failed to write {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("No stage kind named '{0}' is registered")]
    UnknownStage(String),

    #[error("{0} is not part of this pipeline")]
    NoSuchStage(StageId),

    #[error("Invalid wiring: {0}")]
    InvalidWiring(String),
}

impl PipelineError {
    pub(crate) fn invalid(stage: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            stage: stage.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn insufficient(stage: &str, reason: impl Into<String>) -> Self {
        Self::InsufficientData {
            stage: stage.to_owned(),
            reason: reason.into(),
        }
    }

    /// Codec errors raised while writing. I/O failures there are encode
    /// failures, not decode failures.
    pub(crate) fn from_encode(err: CodecError) -> Self {
        match err {
            CodecError::Io(err) => Self::Encode(err.to_string()),
            other => other.into(),
        }
    }
}

impl From<CodecError> for PipelineError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Decode(msg) => Self::Decode(msg),
            CodecError::CorruptFile(msg) => Self::CorruptFile(msg),
            CodecError::Encode(msg) => Self::Encode(msg),
            CodecError::Io(err) => Self::Decode(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_follow_the_direction() {
        let io = || CodecError::Io(std::io::Error::other("stream closed"));
        assert!(matches!(PipelineError::from(io()), PipelineError::Decode(_)));
        assert!(matches!(
            PipelineError::from_encode(io()),
            PipelineError::Encode(_)
        ));
        assert!(matches!(
            PipelineError::from_encode(CodecError::CorruptFile("x".to_owned())),
            PipelineError::CorruptFile(_)
        ));
    }
}
