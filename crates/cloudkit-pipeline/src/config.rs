use clap::Args;
use serde::{Deserialize, Serialize};

use crate::PipelineError;
use crate::graph::{Pipeline, StageId};
use crate::params::{ParamMap, ParamValue};
use crate::registry::StageRegistry;
use crate::stages::ReaderParams;

/// Which processing stages to run after reading, and how. A stage is only
/// added when one of its options is given.
#[derive(Clone, Debug, Default, PartialEq, Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Keep every n-th point.
    #[arg(long, help_heading = "Pipeline options")]
    pub mask_ratio: Option<usize>,
    /// Snap points to a grid with this spacing, keeping one point per node.
    #[arg(long, help_heading = "Pipeline options")]
    pub quantize_step: Option<f32>,
    /// Merge points closer than this. 0 merges exact duplicates only.
    #[arg(long, help_heading = "Pipeline options")]
    pub clean_tolerance: Option<f32>,
    /// Neighbours used to find outliers.
    #[arg(long, help_heading = "Pipeline options")]
    pub outlier_sample_size: Option<usize>,
    /// Remove points whose mean neighbour distance is more than this many
    /// standard deviations above the average.
    #[arg(long, help_heading = "Pipeline options")]
    pub outlier_threshold: Option<f32>,
    /// Neighbours used to estimate normals.
    #[arg(long, help_heading = "Pipeline options")]
    pub normal_sample_size: Option<usize>,
    /// Mesh the cloud with voxels of this size. Needs normals, either in the
    /// input or from --normal-sample-size.
    #[arg(long, help_heading = "Pipeline options")]
    pub reconstruct_resolution: Option<f32>,
    /// Empty voxels around the cloud when meshing.
    #[arg(long, help_heading = "Pipeline options")]
    pub reconstruct_padding: Option<usize>,
    /// Replace every point with a sphere of this radius.
    #[arg(long, help_heading = "Pipeline options")]
    pub glyph_radius: Option<f32>,
    /// Sphere subdivisions around the axis.
    #[arg(long, help_heading = "Pipeline options")]
    pub glyph_theta_resolution: Option<usize>,
    /// Sphere subdivisions from pole to pole.
    #[arg(long, help_heading = "Pipeline options")]
    pub glyph_phi_resolution: Option<usize>,
    /// Scale each sphere by its point's scalar.
    #[arg(long, help_heading = "Pipeline options", default_value = "false")]
    pub glyph_scale_by_attribute: bool,
}

fn insert(map: &mut ParamMap, key: &str, value: Option<impl Into<ParamValue>>) {
    if let Some(value) = value {
        map.insert(key.to_owned(), value.into());
    }
}

impl PipelineConfig {
    /// The stages this config asks for, in the order they run, as registry
    /// names and parameters.
    pub fn stages(&self) -> Vec<(&'static str, ParamMap)> {
        let mut stages = Vec::new();

        if let Some(ratio) = self.mask_ratio {
            stages.push(("mask", ParamMap::from([("ratio".to_owned(), ratio.into())])));
        }
        if let Some(step) = self.quantize_step {
            stages.push(("quantize", ParamMap::from([("step".to_owned(), step.into())])));
        }
        if let Some(tolerance) = self.clean_tolerance {
            stages.push((
                "clean",
                ParamMap::from([("tolerance".to_owned(), tolerance.into())]),
            ));
        }
        if self.outlier_sample_size.is_some() || self.outlier_threshold.is_some() {
            let mut params = ParamMap::new();
            insert(&mut params, "sample_size", self.outlier_sample_size);
            insert(&mut params, "threshold", self.outlier_threshold);
            stages.push(("outlier", params));
        }
        if let Some(sample_size) = self.normal_sample_size {
            stages.push((
                "normals",
                ParamMap::from([("sample_size".to_owned(), sample_size.into())]),
            ));
        }
        if let Some(resolution) = self.reconstruct_resolution {
            let mut params = ParamMap::from([("resolution".to_owned(), resolution.into())]);
            insert(&mut params, "padding", self.reconstruct_padding);
            stages.push(("reconstruct", params));
        }
        if let Some(radius) = self.glyph_radius {
            let mut params = ParamMap::from([
                ("radius".to_owned(), radius.into()),
                (
                    "scale_by_attribute".to_owned(),
                    self.glyph_scale_by_attribute.into(),
                ),
            ]);
            insert(&mut params, "theta_resolution", self.glyph_theta_resolution);
            insert(&mut params, "phi_resolution", self.glyph_phi_resolution);
            stages.push(("glyph", params));
        }
        stages
    }

    /// Add a reader for `source` followed by the configured stages. Returns
    /// the last stage.
    pub fn build(
        &self,
        pipeline: &mut Pipeline,
        source: ReaderParams,
    ) -> Result<StageId, PipelineError> {
        let registry = StageRegistry::with_builtins();
        let mut last = pipeline.add_source(source)?;
        for (name, params) in self.stages() {
            last = pipeline.add_stage(last, registry.create(name, &params)?)?;
        }
        Ok(last)
    }
}
