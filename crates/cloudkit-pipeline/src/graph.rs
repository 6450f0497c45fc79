use std::fmt;
use std::sync::Arc;

use cloudkit_geometry::GeometryBuffer;

use crate::PipelineError;
use crate::params::ParamValue;
use crate::stage::{Stage, StageOutput};

/// Handle to a stage in a `Pipeline`. Ids are never reused, so an id of a
/// removed stage keeps failing with `NoSuchStage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(usize);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage #{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The cached output matches the current parameters and upstream.
    Fresh,
    Stale,
}

#[derive(Debug)]
struct Node {
    stage: Stage,
    upstream: Option<StageId>,
    dependents: Vec<StageId>,
    output: Option<StageOutput>,
    freshness: Freshness,
    executions: u64,
}

impl Node {
    fn new(stage: Stage, upstream: Option<StageId>) -> Self {
        Self {
            stage,
            upstream,
            dependents: Vec::new(),
            output: None,
            freshness: Freshness::Stale,
            executions: 0,
        }
    }
}

/// A demand driven graph of stages.
///
/// Nothing runs until a stage is pulled. Pulling runs only the stale stages
/// between the requested one and its nearest fresh ancestor, and caches every
/// result. Changing a stage marks it and everything downstream stale, without
/// re-running anything.
#[derive(Debug, Default)]
pub struct Pipeline {
    nodes: Vec<Option<Node>>,
    tail: Option<StageId>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, id: StageId) -> Result<&Node, PipelineError> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(PipelineError::NoSuchStage(id))
    }

    fn node_mut(&mut self, id: StageId) -> Result<&mut Node, PipelineError> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(PipelineError::NoSuchStage(id))
    }

    fn insert(&mut self, node: Node) -> StageId {
        let id = StageId(self.nodes.len());
        self.nodes.push(Some(node));
        self.tail = Some(id);
        id
    }

    /// Add a stage that produces data on its own, such as a Reader.
    pub fn add_source(&mut self, stage: impl Into<Stage>) -> Result<StageId, PipelineError> {
        let stage = stage.into();
        if !stage.is_source() {
            return Err(PipelineError::InvalidWiring(format!(
                "{} needs an upstream stage",
                stage.name()
            )));
        }
        stage.validate()?;
        Ok(self.insert(Node::new(stage, None)))
    }

    /// Add a stage consuming the output of `upstream`. Several stages may
    /// share one upstream.
    pub fn add_stage(
        &mut self,
        upstream: StageId,
        stage: impl Into<Stage>,
    ) -> Result<StageId, PipelineError> {
        let stage = stage.into();
        self.node(upstream)?;
        if stage.is_source() {
            return Err(PipelineError::InvalidWiring(format!(
                "{} is a source and takes no upstream",
                stage.name()
            )));
        }
        stage.validate()?;
        let id = self.insert(Node::new(stage, Some(upstream)));
        self.node_mut(upstream)?.dependents.push(id);
        Ok(id)
    }

    /// Add a stage after the most recently added one.
    pub fn append(&mut self, stage: impl Into<Stage>) -> Result<StageId, PipelineError> {
        let tail = self.tail.ok_or_else(|| {
            PipelineError::InvalidWiring("the pipeline has no stage to append to".to_owned())
        })?;
        self.add_stage(tail, stage)
    }

    /// Output of `id`, running whatever is stale on the way there.
    ///
    /// On failure the stages that already ran stay fresh. The failing stage
    /// and everything below it stay stale, and the failing stage keeps its
    /// previous output.
    pub fn pull(&mut self, id: StageId) -> Result<Arc<GeometryBuffer>, PipelineError> {
        let _span = tracing::trace_span!("Pipeline pull").entered();

        let mut pending = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.node(current)?;
            if node.freshness == Freshness::Fresh {
                break;
            }
            pending.push(current);
            cursor = node.upstream;
        }

        if pending.is_empty() {
            log::debug!("{id} is fresh, using the cached output");
        }

        for current in pending.into_iter().rev() {
            let upstream = match self.node(current)?.upstream {
                Some(up) => Some(self.cached(up)?),
                None => None,
            };
            let node = self.node_mut(current)?;
            log::info!("Running {} ({current})", node.stage.name());
            let output = node.stage.execute(upstream.as_ref())?;
            node.output = Some(output);
            node.freshness = Freshness::Fresh;
            node.executions += 1;
        }

        self.cached(id)
    }

    fn cached(&self, id: StageId) -> Result<Arc<GeometryBuffer>, PipelineError> {
        self.node(id)?
            .output
            .as_ref()
            .map(|out| Arc::clone(&out.buffer))
            .ok_or_else(|| PipelineError::InvalidWiring(format!("{id} has not run yet")))
    }

    /// Change one parameter of a stage. An invalid value leaves the stage
    /// untouched and nothing is invalidated.
    pub fn set_parameter(
        &mut self,
        id: StageId,
        key: &str,
        value: impl Into<ParamValue>,
    ) -> Result<(), PipelineError> {
        let node = self.node_mut(id)?;
        node.stage = node.stage.with_parameter(key, &value.into())?;
        self.invalidate(id)
    }

    /// Swap the stage at `id` for another one, keeping its place in the graph.
    /// Returns the old stage.
    pub fn replace_stage(
        &mut self,
        id: StageId,
        stage: impl Into<Stage>,
    ) -> Result<Stage, PipelineError> {
        let stage = stage.into();
        let node = self.node_mut(id)?;
        if stage.is_source() != node.stage.is_source() {
            return Err(PipelineError::InvalidWiring(format!(
                "can't replace {} with {}, only one of them is a source",
                node.stage.name(),
                stage.name()
            )));
        }
        stage.validate()?;
        let old = std::mem::replace(&mut node.stage, stage);
        self.invalidate(id)?;
        Ok(old)
    }

    /// Feed `id` from `upstream` instead of its current upstream.
    pub fn rewire(&mut self, id: StageId, upstream: StageId) -> Result<(), PipelineError> {
        let node = self.node(id)?;
        self.node(upstream)?;
        if node.stage.is_source() {
            return Err(PipelineError::InvalidWiring(format!(
                "{id} is a source and takes no upstream"
            )));
        }
        if self.downstream(id)?.contains(&upstream) {
            return Err(PipelineError::InvalidWiring(format!(
                "feeding {id} from {upstream} would make a cycle"
            )));
        }

        if let Some(old) = node.upstream {
            self.node_mut(old)?.dependents.retain(|&d| d != id);
        }
        self.node_mut(upstream)?.dependents.push(id);
        self.node_mut(id)?.upstream = Some(upstream);
        self.invalidate(id)
    }

    /// Take a stage out of the graph. Its dependents are fed from its
    /// upstream instead. A source can only be removed once nothing depends
    /// on it.
    pub fn remove(&mut self, id: StageId) -> Result<Stage, PipelineError> {
        let node = self.node(id)?;
        if node.upstream.is_none() && !node.dependents.is_empty() {
            return Err(PipelineError::InvalidWiring(format!(
                "{id} still feeds {} stage(s)",
                node.dependents.len()
            )));
        }

        // Mark everything below stale while the links still exist.
        self.invalidate(id)?;
        let Some(node) = self.nodes[id.0].take() else {
            return Err(PipelineError::NoSuchStage(id));
        };

        if let Some(up) = node.upstream {
            let siblings = &mut self.node_mut(up)?.dependents;
            match siblings.iter().position(|&d| d == id) {
                Some(at) => {
                    siblings.splice(at..=at, node.dependents.iter().copied());
                }
                None => siblings.extend_from_slice(&node.dependents),
            }
        }
        for &dependent in &node.dependents {
            self.node_mut(dependent)?.upstream = node.upstream;
        }
        if self.tail == Some(id) {
            self.tail = node.upstream;
        }
        Ok(node.stage)
    }

    /// Mark `id` and everything downstream of it stale.
    pub fn invalidate(&mut self, id: StageId) -> Result<(), PipelineError> {
        for current in self.downstream(id)? {
            self.node_mut(current)?.freshness = Freshness::Stale;
        }
        Ok(())
    }

    /// `id` and all of its transitive dependents.
    fn downstream(&self, id: StageId) -> Result<Vec<StageId>, PipelineError> {
        let mut found = vec![id];
        let mut next = 0;
        while next < found.len() {
            found.extend_from_slice(&self.node(found[next])?.dependents);
            next += 1;
        }
        Ok(found)
    }

    pub fn freshness(&self, id: StageId) -> Result<Freshness, PipelineError> {
        Ok(self.node(id)?.freshness)
    }

    /// How many times the stage has run successfully.
    pub fn execution_count(&self, id: StageId) -> Result<u64, PipelineError> {
        Ok(self.node(id)?.executions)
    }

    pub fn upstream(&self, id: StageId) -> Result<Option<StageId>, PipelineError> {
        Ok(self.node(id)?.upstream)
    }

    pub fn dependents(&self, id: StageId) -> Result<&[StageId], PipelineError> {
        Ok(&self.node(id)?.dependents)
    }

    pub fn stage(&self, id: StageId) -> Result<&Stage, PipelineError> {
        Ok(&self.node(id)?.stage)
    }

    /// The last output of a stage without running anything. It may be stale.
    pub fn output(&self, id: StageId) -> Result<Option<Arc<GeometryBuffer>>, PipelineError> {
        Ok(self.node(id)?.output.as_ref().map(|out| Arc::clone(&out.buffer)))
    }

    /// Bytes a Writer with a memory destination produced on its last run.
    pub fn encoded_output(&self, id: StageId) -> Result<Option<Arc<[u8]>>, PipelineError> {
        Ok(self
            .node(id)?
            .output
            .as_ref()
            .and_then(|out| out.encoded.clone()))
    }

    /// The stages from the source down to `id`.
    pub fn chain(&self, id: StageId) -> Result<Vec<StageId>, PipelineError> {
        let mut chain = vec![id];
        let mut cursor = self.node(id)?.upstream;
        while let Some(current) = cursor {
            chain.push(current);
            cursor = self.node(current)?.upstream;
        }
        chain.reverse();
        Ok(chain)
    }

    /// The stage `append` attaches to.
    pub fn tail(&self) -> Option<StageId> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{CleanerParams, MaskParams, QuantizerParams, ReaderParams};
    use cloudkit_geometry::PackedLayout;

    fn source() -> ReaderParams {
        let data: Vec<f32> = (0..8).flat_map(|i| [i as f32, 0.0, 0.0]).collect();
        ReaderParams::packed(data, 8, PackedLayout::Position)
    }

    #[test]
    fn wiring_rules() {
        let mut pipeline = Pipeline::new();
        assert!(matches!(
            pipeline.append(MaskParams::new(2)),
            Err(PipelineError::InvalidWiring(_))
        ));
        assert!(matches!(
            pipeline.add_source(MaskParams::new(2)),
            Err(PipelineError::InvalidWiring(_))
        ));

        let reader = pipeline.add_source(source()).unwrap();
        assert!(matches!(
            pipeline.add_stage(reader, source()),
            Err(PipelineError::InvalidWiring(_))
        ));
        assert!(matches!(
            pipeline.add_stage(reader, MaskParams::new(0)),
            Err(PipelineError::InvalidParameter { .. })
        ));
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn rewire_rejects_cycles() {
        let mut pipeline = Pipeline::new();
        let reader = pipeline.add_source(source()).unwrap();
        let a = pipeline.append(MaskParams::new(2)).unwrap();
        let b = pipeline.append(QuantizerParams::new(1.0)).unwrap();

        assert!(matches!(
            pipeline.rewire(a, b),
            Err(PipelineError::InvalidWiring(_))
        ));
        assert!(matches!(
            pipeline.rewire(a, a),
            Err(PipelineError::InvalidWiring(_))
        ));
        assert!(matches!(
            pipeline.rewire(reader, b),
            Err(PipelineError::InvalidWiring(_))
        ));

        pipeline.rewire(b, reader).unwrap();
        assert_eq!(pipeline.upstream(b).unwrap(), Some(reader));
        assert_eq!(pipeline.dependents(reader).unwrap(), &[a, b]);
        assert!(pipeline.dependents(a).unwrap().is_empty());
    }

    #[test]
    fn remove_splices_dependents() {
        let mut pipeline = Pipeline::new();
        let reader = pipeline.add_source(source()).unwrap();
        let mask = pipeline.append(MaskParams::new(2)).unwrap();
        let quantize = pipeline.append(QuantizerParams::new(1.0)).unwrap();

        assert!(matches!(
            pipeline.remove(reader),
            Err(PipelineError::InvalidWiring(_))
        ));

        let removed = pipeline.remove(mask).unwrap();
        assert_eq!(removed.name(), "Mask");
        assert_eq!(pipeline.upstream(quantize).unwrap(), Some(reader));
        assert_eq!(pipeline.dependents(reader).unwrap(), &[quantize]);
        assert_eq!(pipeline.chain(quantize).unwrap(), vec![reader, quantize]);
        assert!(matches!(
            pipeline.stage(mask),
            Err(PipelineError::NoSuchStage(id)) if id == mask
        ));
        assert_eq!(pipeline.pull(quantize).unwrap().point_count(), 8);

        // Removing the tail moves appends back up the chain.
        pipeline.remove(quantize).unwrap();
        assert_eq!(pipeline.tail(), Some(reader));
        pipeline.remove(reader).unwrap();
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.tail(), None);
    }

    #[test]
    fn replace_keeps_source_kind() {
        let mut pipeline = Pipeline::new();
        pipeline.add_source(source()).unwrap();
        let mask = pipeline.append(MaskParams::new(2)).unwrap();
        assert_eq!(pipeline.pull(mask).unwrap().point_count(), 4);

        assert!(matches!(
            pipeline.replace_stage(mask, source()),
            Err(PipelineError::InvalidWiring(_))
        ));
        let old = pipeline.replace_stage(mask, QuantizerParams::new(4.0)).unwrap();
        assert!(matches!(old, Stage::Mask(_)));
        assert_eq!(pipeline.freshness(mask).unwrap(), Freshness::Stale);
        // 0..8 snapped to a grid of 4 lands on 0, 4 and 8.
        assert_eq!(pipeline.pull(mask).unwrap().point_count(), 3);
    }

    /// Reader, mask, quantizer and cleaner in a row, pulled once.
    fn pulled_chain() -> (Pipeline, [StageId; 4]) {
        let mut pipeline = Pipeline::new();
        let reader = pipeline.add_source(source()).unwrap();
        let mask = pipeline.append(MaskParams::new(2)).unwrap();
        let quantize = pipeline.append(QuantizerParams::new(1.0)).unwrap();
        let clean = pipeline.append(CleanerParams::new(0.0)).unwrap();
        assert_eq!(pipeline.pull(clean).unwrap().point_count(), 4);
        (pipeline, [reader, mask, quantize, clean])
    }

    fn counts(pipeline: &Pipeline, ids: &[StageId]) -> Vec<u64> {
        ids.iter()
            .map(|&id| pipeline.execution_count(id).unwrap())
            .collect()
    }

    #[test]
    fn rewire_reruns_only_the_moved_branch() {
        let (mut pipeline, [reader, mask, quantize, clean]) = pulled_chain();

        pipeline.rewire(quantize, reader).unwrap();
        assert_eq!(pipeline.freshness(reader).unwrap(), Freshness::Fresh);
        assert_eq!(pipeline.freshness(mask).unwrap(), Freshness::Fresh);
        assert_eq!(pipeline.freshness(quantize).unwrap(), Freshness::Stale);
        assert_eq!(pipeline.freshness(clean).unwrap(), Freshness::Stale);

        // Quantizer now sees all eight points.
        assert_eq!(pipeline.pull(clean).unwrap().point_count(), 8);
        assert_eq!(
            counts(&pipeline, &[reader, mask, quantize, clean]),
            vec![1, 1, 2, 2]
        );
        assert_eq!(pipeline.freshness(clean).unwrap(), Freshness::Fresh);
    }

    #[test]
    fn replace_reruns_the_stage_and_below() {
        let (mut pipeline, [reader, mask, quantize, clean]) = pulled_chain();

        pipeline.replace_stage(mask, MaskParams::new(4)).unwrap();
        assert_eq!(pipeline.freshness(reader).unwrap(), Freshness::Fresh);
        for id in [mask, quantize, clean] {
            assert_eq!(pipeline.freshness(id).unwrap(), Freshness::Stale, "{id}");
        }

        assert_eq!(pipeline.pull(clean).unwrap().point_count(), 2);
        assert_eq!(
            counts(&pipeline, &[reader, mask, quantize, clean]),
            vec![1, 2, 2, 2]
        );

        // Pulling again is served from the cache.
        pipeline.pull(clean).unwrap();
        assert_eq!(
            counts(&pipeline, &[reader, mask, quantize, clean]),
            vec![1, 2, 2, 2]
        );
    }

    #[test]
    fn stage_id_display() {
        assert_eq!(StageId(3).to_string(), "stage #3");
    }
}
