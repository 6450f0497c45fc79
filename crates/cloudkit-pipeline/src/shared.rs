use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cloudkit_geometry::GeometryBuffer;

use crate::PipelineError;
use crate::graph::{Pipeline, StageId};
use crate::params::ParamValue;

/// A pipeline that can be handed to other threads, eg. a UI thread editing
/// parameters while a worker pulls results. Every call takes the one lock.
#[derive(Clone, Debug, Default)]
pub struct SharedPipeline(Arc<Mutex<Pipeline>>);

impl SharedPipeline {
    pub fn new(pipeline: Pipeline) -> Self {
        Self(Arc::new(Mutex::new(pipeline)))
    }

    /// Lock for a sequence of edits that should be seen together.
    pub fn lock(&self) -> MutexGuard<'_, Pipeline> {
        // A panic mid-edit leaves at worst some stages stale, which is safe.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pull(&self, id: StageId) -> Result<Arc<GeometryBuffer>, PipelineError> {
        self.lock().pull(id)
    }

    pub fn set_parameter(
        &self,
        id: StageId,
        key: &str,
        value: impl Into<ParamValue>,
    ) -> Result<(), PipelineError> {
        self.lock().set_parameter(id, key, value)
    }
}

impl From<Pipeline> for SharedPipeline {
    fn from(pipeline: Pipeline) -> Self {
        Self::new(pipeline)
    }
}
