//! The built-in stage kinds. Each one is a parameter struct that knows how to
//! validate itself, accept a keyed parameter update, and run.

pub(crate) mod cleaner;
pub(crate) mod glyph;
pub(crate) mod mask;
mod neighbors;
pub(crate) mod normals;
pub(crate) mod outlier;
pub(crate) mod quantizer;
pub(crate) mod reader;
pub(crate) mod reconstruct;
pub(crate) mod writer;

pub use cleaner::CleanerParams;
pub use glyph::GlyphParams;
pub use mask::MaskParams;
pub use normals::NormalParams;
pub use outlier::OutlierParams;
pub use quantizer::QuantizerParams;
pub use reader::{ReaderParams, Source};
pub use reconstruct::{MIN_RECONSTRUCTION_POINTS, ReconstructParams};
pub use writer::{Destination, WriterParams};

use cloudkit_codec::FormatKind;

use crate::PipelineError;
use crate::params::ParamValue;

pub(crate) fn unknown_key(stage: &str, key: &str) -> PipelineError {
    PipelineError::invalid(stage, format!("unknown parameter '{key}'"))
}

pub(crate) fn expect_f32(stage: &str, key: &str, value: &ParamValue) -> Result<f32, PipelineError> {
    value
        .as_f32()
        .ok_or_else(|| PipelineError::invalid(stage, format!("{key} must be a number, got {value}")))
}

pub(crate) fn expect_usize(
    stage: &str,
    key: &str,
    value: &ParamValue,
) -> Result<usize, PipelineError> {
    value.as_usize().ok_or_else(|| {
        PipelineError::invalid(stage, format!("{key} must be a non-negative integer, got {value}"))
    })
}

pub(crate) fn expect_bool(stage: &str, key: &str, value: &ParamValue) -> Result<bool, PipelineError> {
    value
        .as_bool()
        .ok_or_else(|| PipelineError::invalid(stage, format!("{key} must be true or false, got {value}")))
}

pub(crate) fn expect_str<'a>(
    stage: &str,
    key: &str,
    value: &'a ParamValue,
) -> Result<&'a str, PipelineError> {
    value
        .as_str()
        .ok_or_else(|| PipelineError::invalid(stage, format!("{key} must be text, got {value}")))
}

pub(crate) fn expect_format(
    stage: &str,
    key: &str,
    value: &ParamValue,
) -> Result<FormatKind, PipelineError> {
    let name = expect_str(stage, key, value)?;
    FormatKind::from_extension(name)
        .ok_or_else(|| PipelineError::invalid(stage, format!("unknown format '{name}'")))
}
