use std::fmt;
use std::sync::Arc;

use cloudkit_geometry::GeometryBuffer;

use crate::PipelineError;
use crate::params::{ParamValue, normalize_key};
use crate::stages::{
    CleanerParams, GlyphParams, MaskParams, NormalParams, OutlierParams, QuantizerParams,
    ReaderParams, ReconstructParams, WriterParams,
};

/// A stage kind that isn't built in, added through the `StageRegistry`.
///
/// Implementations must be deterministic: the same upstream buffer must give
/// the same output.
pub trait CustomStage: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Sources produce data without an upstream.
    fn is_source(&self) -> bool {
        false
    }

    fn execute(&self, upstream: Option<&GeometryBuffer>) -> Result<GeometryBuffer, PipelineError>;

    /// Return a copy with one parameter changed.
    fn with_parameter(
        &self,
        key: &str,
        _value: &ParamValue,
    ) -> Result<Arc<dyn CustomStage>, PipelineError> {
        Err(PipelineError::invalid(
            self.name(),
            format!("unknown parameter '{key}'"),
        ))
    }
}

/// One unit of work in a pipeline, with its parameters.
#[derive(Debug, Clone)]
pub enum Stage {
    Reader(ReaderParams),
    Quantizer(QuantizerParams),
    Mask(MaskParams),
    OutlierFilter(OutlierParams),
    NormalEstimator(NormalParams),
    Cleaner(CleanerParams),
    SurfaceReconstructor(ReconstructParams),
    GlyphExpander(GlyphParams),
    Writer(WriterParams),
    Custom(Arc<dyn CustomStage>),
}

/// What a stage run leaves in the cache.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub buffer: Arc<GeometryBuffer>,
    /// Encoded bytes of a Writer targeting memory.
    pub encoded: Option<Arc<[u8]>>,
}

impl StageOutput {
    fn buffer(buffer: GeometryBuffer) -> Self {
        Self {
            buffer: Arc::new(buffer),
            encoded: None,
        }
    }
}

impl Stage {
    pub fn name(&self) -> &str {
        match self {
            Self::Reader(_) => crate::stages::reader::NAME,
            Self::Quantizer(_) => crate::stages::quantizer::NAME,
            Self::Mask(_) => crate::stages::mask::NAME,
            Self::OutlierFilter(_) => crate::stages::outlier::NAME,
            Self::NormalEstimator(_) => crate::stages::normals::NAME,
            Self::Cleaner(_) => crate::stages::cleaner::NAME,
            Self::SurfaceReconstructor(_) => crate::stages::reconstruct::NAME,
            Self::GlyphExpander(_) => crate::stages::glyph::NAME,
            Self::Writer(_) => crate::stages::writer::NAME,
            Self::Custom(custom) => custom.name(),
        }
    }

    pub fn is_source(&self) -> bool {
        match self {
            Self::Reader(_) => true,
            Self::Custom(custom) => custom.is_source(),
            _ => false,
        }
    }

    /// Check the parameters on their own, without any input.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match self {
            Self::Reader(p) => p.validate(),
            Self::Quantizer(p) => p.validate(),
            Self::Mask(p) => p.validate(),
            Self::OutlierFilter(p) => p.validate(),
            Self::NormalEstimator(p) => p.validate(),
            Self::Cleaner(p) => p.validate(),
            Self::SurfaceReconstructor(p) => p.validate(),
            Self::GlyphExpander(p) => p.validate(),
            Self::Writer(p) => p.validate(),
            Self::Custom(_) => Ok(()),
        }
    }

    /// A copy of this stage with `key` set to `value`. Fails with
    /// `InvalidParameter` for unknown keys, values of the wrong type, or
    /// values outside the parameter's domain.
    pub fn with_parameter(&self, key: &str, value: &ParamValue) -> Result<Self, PipelineError> {
        let key = normalize_key(key);
        let mut stage = self.clone();
        match &mut stage {
            Self::Reader(p) => p.set(&key, value)?,
            Self::Quantizer(p) => p.set(&key, value)?,
            Self::Mask(p) => p.set(&key, value)?,
            Self::OutlierFilter(p) => p.set(&key, value)?,
            Self::NormalEstimator(p) => p.set(&key, value)?,
            Self::Cleaner(p) => p.set(&key, value)?,
            Self::SurfaceReconstructor(p) => p.set(&key, value)?,
            Self::GlyphExpander(p) => p.set(&key, value)?,
            Self::Writer(p) => p.set(&key, value)?,
            Self::Custom(custom) => *custom = custom.with_parameter(&key, value)?,
        }
        stage.validate()?;
        Ok(stage)
    }

    /// Run the stage. Sources ignore `upstream`, every other stage needs it.
    pub fn execute(
        &self,
        upstream: Option<&Arc<GeometryBuffer>>,
    ) -> Result<StageOutput, PipelineError> {
        let _span = tracing::trace_span!("Stage execute", stage = self.name()).entered();

        let input = || {
            upstream.map(Arc::as_ref).ok_or_else(|| {
                PipelineError::InvalidWiring(format!("{} has no upstream", self.name()))
            })
        };

        let buffer = match self {
            Self::Reader(p) => p.run()?,
            Self::Quantizer(p) => p.run(input()?)?,
            Self::Mask(p) => p.run(input()?)?,
            Self::OutlierFilter(p) => p.run(input()?)?,
            Self::NormalEstimator(p) => p.run(input()?)?,
            Self::Cleaner(p) => p.run(input()?)?,
            Self::SurfaceReconstructor(p) => p.run(input()?)?,
            Self::GlyphExpander(p) => p.run(input()?)?,
            Self::Custom(custom) if custom.is_source() => custom.execute(None)?,
            Self::Custom(custom) => custom.execute(Some(input()?))?,
            Self::Writer(p) => {
                let upstream = upstream.ok_or_else(|| {
                    PipelineError::InvalidWiring(format!("{} has no upstream", self.name()))
                })?;
                let encoded = p.run(upstream)?;
                // The sink hands its input through unchanged.
                return Ok(StageOutput {
                    buffer: Arc::clone(upstream),
                    encoded: encoded.map(Arc::from),
                });
            }
        };
        Ok(StageOutput::buffer(buffer))
    }
}

impl From<ReaderParams> for Stage {
    fn from(p: ReaderParams) -> Self {
        Self::Reader(p)
    }
}

impl From<QuantizerParams> for Stage {
    fn from(p: QuantizerParams) -> Self {
        Self::Quantizer(p)
    }
}

impl From<MaskParams> for Stage {
    fn from(p: MaskParams) -> Self {
        Self::Mask(p)
    }
}

impl From<OutlierParams> for Stage {
    fn from(p: OutlierParams) -> Self {
        Self::OutlierFilter(p)
    }
}

impl From<NormalParams> for Stage {
    fn from(p: NormalParams) -> Self {
        Self::NormalEstimator(p)
    }
}

impl From<CleanerParams> for Stage {
    fn from(p: CleanerParams) -> Self {
        Self::Cleaner(p)
    }
}

impl From<ReconstructParams> for Stage {
    fn from(p: ReconstructParams) -> Self {
        Self::SurfaceReconstructor(p)
    }
}

impl From<GlyphParams> for Stage {
    fn from(p: GlyphParams) -> Self {
        Self::GlyphExpander(p)
    }
}

impl From<WriterParams> for Stage {
    fn from(p: WriterParams) -> Self {
        Self::Writer(p)
    }
}
