use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use cloudkit_codec::FormatDescriptor;

use crate::PipelineError;
use crate::params::{ParamMap, ParamValue, normalize_key};
use crate::stage::Stage;
use crate::stages::{
    CleanerParams, GlyphParams, MaskParams, NormalParams, OutlierParams, QuantizerParams,
    ReaderParams, ReconstructParams, WriterParams, expect_bool, expect_str,
};

pub type StageConstructor = Arc<dyn Fn(&ParamMap) -> Result<Stage, PipelineError> + Send + Sync>;

/// Builds stages by name from loose key/value parameters, for front ends that
/// describe a pipeline as text.
#[derive(Clone, Default)]
pub struct StageRegistry {
    constructors: BTreeMap<String, StageConstructor>,
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}

/// Apply every parameter in `params` except `skip` to `stage`.
fn configured(mut stage: Stage, params: &ParamMap, skip: &[&str]) -> Result<Stage, PipelineError> {
    for (key, value) in params {
        if !skip.contains(&normalize_key(key).as_str()) {
            stage = stage.with_parameter(key, value)?;
        }
    }
    Ok(stage)
}

fn lookup<'a>(params: &'a ParamMap, key: &str) -> Option<&'a ParamValue> {
    params
        .iter()
        .find_map(|(k, v)| (normalize_key(k) == key).then_some(v))
}

fn read(params: &ParamMap) -> Result<Stage, PipelineError> {
    let name = crate::stages::reader::NAME;
    let path = lookup(params, "path")
        .ok_or_else(|| PipelineError::invalid(name, "a path is required"))?;
    let reader = ReaderParams::from_path(expect_str(name, "path", path)?)?;
    configured(reader.into(), params, &["path"])
}

fn write(params: &ParamMap) -> Result<Stage, PipelineError> {
    let name = crate::stages::writer::NAME;
    let memory = match lookup(params, "memory") {
        Some(value) => expect_bool(name, "memory", value)?,
        None => false,
    };

    let writer = if memory {
        let format = lookup(params, "format")
            .ok_or_else(|| PipelineError::invalid(name, "a format is required in memory"))?;
        let kind = crate::stages::expect_format(name, "format", format)?;
        WriterParams::to_memory(FormatDescriptor::text(kind))
    } else {
        let path = lookup(params, "path")
            .ok_or_else(|| PipelineError::invalid(name, "a path or memory = true is required"))?;
        let path = expect_str(name, "path", path)?;
        let format = FormatDescriptor::from_path(Path::new(path)).ok_or_else(|| {
            PipelineError::invalid(name, format!("can't tell the format of {path}"))
        })?;
        WriterParams::to_file(path, format)
    };
    configured(writer.into(), params, &["path", "memory"])
}

impl StageRegistry {
    /// A registry without any stage kinds.
    pub fn empty() -> Self {
        Self::default()
    }

    /// All built-in stages:
    /// `read`, `mask`, `quantize`, `clean`, `outlier`, `normals`,
    /// `reconstruct`, `glyph` and `write`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("read", read);
        registry.register("write", write);
        registry.register("mask", |p| configured(MaskParams::default().into(), p, &[]));
        registry.register("quantize", |p| {
            configured(QuantizerParams::default().into(), p, &[])
        });
        registry.register("clean", |p| configured(CleanerParams::default().into(), p, &[]));
        registry.register("outlier", |p| {
            configured(OutlierParams::default().into(), p, &[])
        });
        registry.register("normals", |p| {
            configured(NormalParams::default().into(), p, &[])
        });
        registry.register("reconstruct", |p| {
            configured(ReconstructParams::default().into(), p, &[])
        });
        registry.register("glyph", |p| configured(GlyphParams::default().into(), p, &[]));
        registry
    }

    /// Add a stage kind, replacing any kind with the same name.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&ParamMap) -> Result<Stage, PipelineError> + Send + Sync + 'static,
    {
        let name = normalize_key(name);
        if self
            .constructors
            .insert(name.clone(), Arc::new(constructor))
            .is_some()
        {
            log::debug!("Replaced stage kind '{name}'");
        }
    }

    pub fn create(&self, name: &str, params: &ParamMap) -> Result<Stage, PipelineError> {
        let constructor = self
            .constructors
            .get(&normalize_key(name))
            .ok_or_else(|| PipelineError::UnknownStage(name.to_owned()))?;
        constructor(params)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&normalize_key(name))
    }
}
