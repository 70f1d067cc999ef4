// crates/ticket-flow-core/src/runtime/builder.rs
// ============================================================================
// Module: Pipeline Builder
// Description: Builder and SubBuilder assembling pipeline descriptions.
// Purpose: Compose sequential, parallel and nested steps into one DAG.
// Dependencies: crate::core, crate::interfaces, thiserror
// ============================================================================

//! ## Overview
//! [`PipelineBuilder`] assembles the top-level pipeline of a flow and
//! [`SubBuilder`] assembles sub-pipelines that are nested as single nodes.
//! Both are write-once: `build` and `run` consume the builder, so nothing can
//! be appended after a handle exists.
//!
//! Each builder carries a [`BuildContext`]. A sub-builder's context is merged
//! into its parent when nested; a key defined on both sides is an error.
//! Node identifiers must be unique across the whole tree.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use thiserror::Error;

use crate::core::ActSpec;
use crate::core::BuildContext;
use crate::core::ContextError;
use crate::core::NodeId;
use crate::core::PipelineNode;
use crate::core::PipelineSpec;
use crate::core::RootHandle;
use crate::interfaces::DagEngine;
use crate::interfaces::EngineError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Pipeline construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// A pipeline was finalized without any node.
    #[error("pipeline {0} has no nodes")]
    Empty(NodeId),
    /// A node identifier was used twice in one tree.
    #[error("duplicate pipeline node id: {0}")]
    DuplicateNode(NodeId),
    /// A parallel group had no members.
    #[error("parallel group {0} has no members")]
    EmptyParallelGroup(NodeId),
    /// Context values could not be merged or stored.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// The engine did not accept the pipeline.
    #[error("pipeline submission failed: {0}")]
    Submit(#[from] EngineError),
}

// ============================================================================
// SECTION: Sequence
// ============================================================================

/// Node sequence shared by both builders.
#[derive(Debug)]
struct Sequence {
    /// Pipeline identifier.
    id: NodeId,
    /// Display name.
    name: String,
    /// Ordered nodes.
    nodes: Vec<PipelineNode>,
    /// Context threaded through the steps.
    context: BuildContext,
    /// Every identifier used in this tree, including the pipeline itself.
    seen: BTreeSet<NodeId>,
}

impl Sequence {
    /// Creates an empty sequence.
    fn new(id: NodeId, name: String) -> Self {
        let mut seen = BTreeSet::new();
        seen.insert(id.clone());
        Self {
            id,
            name,
            nodes: Vec::new(),
            context: BuildContext::new(),
            seen,
        }
    }

    /// Reserves identifiers, failing on the first duplicate without reserving any.
    fn reserve<'a>(&mut self, ids: impl IntoIterator<Item = &'a NodeId>) -> Result<(), BuildError> {
        let mut fresh = BTreeSet::new();
        for id in ids {
            if self.seen.contains(id) || !fresh.insert(id.clone()) {
                return Err(BuildError::DuplicateNode(id.clone()));
            }
        }
        self.seen.extend(fresh);
        Ok(())
    }

    /// Appends a leaf action.
    fn add_act(&mut self, act: ActSpec) -> Result<(), BuildError> {
        self.reserve([&act.id])?;
        self.nodes.push(PipelineNode::Act(act));
        Ok(())
    }

    /// Appends a parallel barrier of leaf actions.
    fn add_parallel_acts(&mut self, id: NodeId, acts: Vec<ActSpec>) -> Result<(), BuildError> {
        if acts.is_empty() {
            return Err(BuildError::EmptyParallelGroup(id));
        }
        self.reserve(std::iter::once(&id).chain(acts.iter().map(|act| &act.id)))?;
        self.nodes.push(PipelineNode::ParallelActs {
            id,
            acts,
        });
        Ok(())
    }

    /// Appends a nested sub-pipeline.
    fn add_sub_pipeline(&mut self, sub: SubPipeline) -> Result<(), BuildError> {
        let mut spec = sub.spec;
        let ids = spec.node_ids();
        let mut merged = self.context.clone();
        merged.merge(std::mem::take(&mut spec.context))?;
        self.reserve(ids.iter())?;
        self.context = merged;
        self.nodes.push(PipelineNode::SubPipeline(spec));
        Ok(())
    }

    /// Appends a parallel group of sub-pipelines.
    fn add_parallel_sub_pipelines(
        &mut self,
        id: NodeId,
        subs: Vec<SubPipeline>,
    ) -> Result<(), BuildError> {
        if subs.is_empty() {
            return Err(BuildError::EmptyParallelGroup(id));
        }
        let mut ids = vec![id.clone()];
        for sub in &subs {
            ids.extend(sub.spec.node_ids());
        }
        let mut merged = self.context.clone();
        let mut pipelines = Vec::with_capacity(subs.len());
        for sub in subs {
            let mut spec = sub.spec;
            merged.merge(std::mem::take(&mut spec.context))?;
            pipelines.push(spec);
        }
        self.reserve(ids.iter())?;
        self.context = merged;
        self.nodes.push(PipelineNode::ParallelSubPipelines {
            id,
            pipelines,
        });
        Ok(())
    }

    /// Finalizes the sequence.
    fn finish(self) -> Result<PipelineSpec, BuildError> {
        if self.nodes.is_empty() {
            return Err(BuildError::Empty(self.id));
        }
        Ok(PipelineSpec {
            id: self.id,
            name: self.name,
            nodes: self.nodes,
            context: self.context,
        })
    }
}

// ============================================================================
// SECTION: Sub Builder
// ============================================================================

/// Finished sub-pipeline, only usable as a nested node.
#[derive(Debug, Clone, PartialEq)]
pub struct SubPipeline {
    /// Finished description.
    spec: PipelineSpec,
}

impl SubPipeline {
    /// Returns the sub-pipeline identifier.
    #[must_use]
    pub const fn id(&self) -> &NodeId {
        &self.spec.id
    }
}

/// Builder for sub-pipelines nested into a parent pipeline.
#[derive(Debug)]
pub struct SubBuilder {
    /// Node sequence.
    sequence: Sequence,
}

impl SubBuilder {
    /// Creates an empty sub-builder.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        Self {
            sequence: Sequence::new(id.into(), name.into()),
        }
    }

    /// Returns the context.
    #[must_use]
    pub const fn context(&self) -> &BuildContext {
        &self.sequence.context
    }

    /// Returns the mutable context.
    pub const fn context_mut(&mut self) -> &mut BuildContext {
        &mut self.sequence.context
    }

    /// Appends a leaf action.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::DuplicateNode`] when the identifier is taken.
    pub fn add_act(&mut self, act: ActSpec) -> Result<&mut Self, BuildError> {
        self.sequence.add_act(act)?;
        Ok(self)
    }

    /// Appends a parallel barrier of leaf actions.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] when the group is empty or an identifier is taken.
    pub fn add_parallel_acts(
        &mut self,
        id: impl Into<NodeId>,
        acts: Vec<ActSpec>,
    ) -> Result<&mut Self, BuildError> {
        self.sequence.add_parallel_acts(id.into(), acts)?;
        Ok(self)
    }

    /// Nests a finished sub-pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] on identifier or context conflicts.
    pub fn add_sub_pipeline(&mut self, sub: SubPipeline) -> Result<&mut Self, BuildError> {
        self.sequence.add_sub_pipeline(sub)?;
        Ok(self)
    }

    /// Nests finished sub-pipelines as one parallel group.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] when the group is empty or on identifier or context conflicts.
    pub fn add_parallel_sub_pipeline(
        &mut self,
        id: impl Into<NodeId>,
        subs: Vec<SubPipeline>,
    ) -> Result<&mut Self, BuildError> {
        self.sequence.add_parallel_sub_pipelines(id.into(), subs)?;
        Ok(self)
    }

    /// Finalizes the sub-pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Empty`] when no node was added.
    pub fn build(self) -> Result<SubPipeline, BuildError> {
        Ok(SubPipeline {
            spec: self.sequence.finish()?,
        })
    }
}

// ============================================================================
// SECTION: Pipeline Builder
// ============================================================================

/// Submitted pipeline and the handle the engine returned for it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedPipeline {
    /// Root handle.
    pub handle: RootHandle,
    /// Submitted description.
    pub spec: PipelineSpec,
}

/// Builder for the top-level pipeline of a flow.
#[derive(Debug)]
pub struct PipelineBuilder {
    /// Node sequence.
    sequence: Sequence,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        Self {
            sequence: Sequence::new(id.into(), name.into()),
        }
    }

    /// Returns the context.
    #[must_use]
    pub const fn context(&self) -> &BuildContext {
        &self.sequence.context
    }

    /// Returns the mutable context.
    pub const fn context_mut(&mut self) -> &mut BuildContext {
        &mut self.sequence.context
    }

    /// Returns the number of top-level nodes appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sequence.nodes.len()
    }

    /// Returns true when nothing was appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequence.nodes.is_empty()
    }

    /// Appends a leaf action.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::DuplicateNode`] when the identifier is taken.
    pub fn add_act(&mut self, act: ActSpec) -> Result<&mut Self, BuildError> {
        self.sequence.add_act(act)?;
        Ok(self)
    }

    /// Appends a parallel barrier of leaf actions.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] when the group is empty or an identifier is taken.
    pub fn add_parallel_acts(
        &mut self,
        id: impl Into<NodeId>,
        acts: Vec<ActSpec>,
    ) -> Result<&mut Self, BuildError> {
        self.sequence.add_parallel_acts(id.into(), acts)?;
        Ok(self)
    }

    /// Nests a finished sub-pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] on identifier or context conflicts.
    pub fn add_sub_pipeline(&mut self, sub: SubPipeline) -> Result<&mut Self, BuildError> {
        self.sequence.add_sub_pipeline(sub)?;
        Ok(self)
    }

    /// Nests finished sub-pipelines as one parallel group.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] when the group is empty or on identifier or context conflicts.
    pub fn add_parallel_sub_pipeline(
        &mut self,
        id: impl Into<NodeId>,
        subs: Vec<SubPipeline>,
    ) -> Result<&mut Self, BuildError> {
        self.sequence.add_parallel_sub_pipelines(id.into(), subs)?;
        Ok(self)
    }

    /// Finalizes the pipeline without submitting it.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Empty`] when no node was added.
    pub fn build(self) -> Result<PipelineSpec, BuildError> {
        self.sequence.finish()
    }

    /// Finalizes the pipeline and submits it.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] when the pipeline is empty or the engine rejects it.
    pub fn run(self, engine: &dyn DagEngine) -> Result<SubmittedPipeline, BuildError> {
        let spec = self.build()?;
        let handle = engine.submit(&spec)?;
        Ok(SubmittedPipeline {
            handle,
            spec,
        })
    }
}
