//! Demand driven processing of point clouds and meshes.
//!
//! A [`Pipeline`] is a graph of [`Stage`]s fed by a source. Pulling a stage
//! runs whatever is stale above it and caches the result, so changing one
//! parameter only re-runs the stages below it.

pub mod args_file;
mod config;
mod error;
mod graph;
mod params;
mod registry;
mod shared;
mod stage;
pub mod stages;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use graph::{Freshness, Pipeline, StageId};
pub use params::{ParamMap, ParamValue};
pub use registry::{StageConstructor, StageRegistry};
pub use shared::SharedPipeline;
pub use stage::{CustomStage, Stage, StageOutput};

pub use cloudkit_codec::{FormatDescriptor, FormatKind};
pub use cloudkit_geometry::{GeometryBuffer, PackedLayout, Point};
