// crates/ticket-flow-core/src/core/pipeline.rs
// ============================================================================
// Module: Pipeline Description
// Description: DAG description handed to the engine and the tree state it reports.
// Purpose: Provide the wire model shared by the builder, engines and operators.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A [`PipelineSpec`] is an ordered sequence of nodes. Each node is a leaf
//! action, a parallel barrier of leaf actions, a nested sub-pipeline, or a
//! parallel group of sub-pipelines. Sequence order is the dependency order:
//! a node starts only after its preceding sibling succeeded. Sub-pipelines
//! are opaque to their parent, which only sees them succeed or fail as a unit.
//!
//! The [`BuildContext`] travels with the pipeline. Steps write values into it and
//! later steps read them; the engine keeps one live copy per submitted root.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::ComponentId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RootHandle;
use crate::core::status::EngineState;

// ============================================================================
// SECTION: Build Context
// ============================================================================

/// Errors raised by typed context access.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    /// Value could not be converted to or from JSON.
    #[error("context key '{key}' has an incompatible value: {message}")]
    Incompatible {
        /// Context key.
        key: String,
        /// Conversion failure.
        message: String,
    },
    /// Two contexts define the same key.
    #[error("context key '{0}' is defined twice")]
    Conflict(String),
}

/// Mutable key/value context threaded through one pipeline.
///
/// # Invariants
/// - Scoped to one builder invocation and the root it submits.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildContext {
    /// Context values by key.
    values: BTreeMap<String, Value>,
}

impl BuildContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a typed value under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Incompatible`] when the value cannot be serialized.
    pub fn insert<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), ContextError> {
        let value = serde_json::to_value(value).map_err(|err| ContextError::Incompatible {
            key: key.to_string(),
            message: err.to_string(),
        })?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    /// Reads a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Incompatible`] when the stored value has another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ContextError> {
        self.values
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|err| ContextError::Incompatible {
                    key: key.to_string(),
                    message: err.to_string(),
                })
            })
            .transpose()
    }

    /// Returns the raw JSON value for `key`.
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns true when no values are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Moves every value of `other` into `self`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Conflict`] on the first key defined in both.
    pub fn merge(&mut self, other: Self) -> Result<(), ContextError> {
        if let Some(key) = other.values.keys().find(|key| self.values.contains_key(*key)) {
            return Err(ContextError::Conflict(key.clone()));
        }
        self.values.extend(other.values);
        Ok(())
    }
}

// ============================================================================
// SECTION: Pipeline Nodes
// ============================================================================

/// Leaf action executed by an engine component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActSpec {
    /// Node identifier.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Component the engine runs for this action.
    pub component: ComponentId,
    /// Component inputs.
    pub inputs: Value,
}

impl ActSpec {
    /// Creates a leaf action.
    #[must_use]
    pub fn new(
        id: impl Into<NodeId>,
        name: impl Into<String>,
        component: impl Into<ComponentId>,
        inputs: Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            component: component.into(),
            inputs,
        }
    }
}

/// One node in a pipeline sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineNode {
    /// Single leaf action.
    Act(ActSpec),
    /// Leaf actions that all run before the sequence continues.
    ParallelActs {
        /// Barrier node identifier.
        id: NodeId,
        /// Member actions.
        acts: Vec<ActSpec>,
    },
    /// Nested pipeline observed as one unit.
    SubPipeline(PipelineSpec),
    /// Nested pipelines that all run before the sequence continues.
    ParallelSubPipelines {
        /// Barrier node identifier.
        id: NodeId,
        /// Member pipelines.
        pipelines: Vec<PipelineSpec>,
    },
}

impl PipelineNode {
    /// Returns the node identifier visible to the parent sequence.
    #[must_use]
    pub const fn id(&self) -> &NodeId {
        match self {
            Self::Act(act) => &act.id,
            Self::ParallelActs {
                id, ..
            }
            | Self::ParallelSubPipelines {
                id, ..
            } => id,
            Self::SubPipeline(pipeline) => &pipeline.id,
        }
    }
}

/// Pipeline description consumed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline node identifier.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Ordered nodes.
    pub nodes: Vec<PipelineNode>,
    /// Initial context values.
    #[serde(default)]
    pub context: BuildContext,
}

impl PipelineSpec {
    /// Returns every node identifier in the tree, depth first, including this pipeline.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        collect_node_ids(self, &mut ids);
        ids
    }

    /// Returns sibling edges `(predecessor, successor)` for every sequence in the tree.
    #[must_use]
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges = Vec::new();
        collect_edges(self, &mut edges);
        edges
    }
}

/// Appends the identifiers of `pipeline` and its descendants.
fn collect_node_ids(pipeline: &PipelineSpec, ids: &mut Vec<NodeId>) {
    ids.push(pipeline.id.clone());
    for node in &pipeline.nodes {
        match node {
            PipelineNode::Act(act) => ids.push(act.id.clone()),
            PipelineNode::ParallelActs {
                id,
                acts,
            } => {
                ids.push(id.clone());
                ids.extend(acts.iter().map(|act| act.id.clone()));
            }
            PipelineNode::SubPipeline(sub) => collect_node_ids(sub, ids),
            PipelineNode::ParallelSubPipelines {
                id,
                pipelines,
            } => {
                ids.push(id.clone());
                for sub in pipelines {
                    collect_node_ids(sub, ids);
                }
            }
        }
    }
}

/// Appends the sibling edges of `pipeline` and its descendants.
fn collect_edges(pipeline: &PipelineSpec, edges: &mut Vec<(NodeId, NodeId)>) {
    for pair in pipeline.nodes.windows(2) {
        edges.push((pair[0].id().clone(), pair[1].id().clone()));
    }
    for node in &pipeline.nodes {
        match node {
            PipelineNode::SubPipeline(sub) => collect_edges(sub, edges),
            PipelineNode::ParallelSubPipelines {
                pipelines, ..
            } => {
                for sub in pipelines {
                    collect_edges(sub, edges);
                }
            }
            PipelineNode::Act(_) | PipelineNode::ParallelActs {
                ..
            } => {}
        }
    }
}

// ============================================================================
// SECTION: Tree State
// ============================================================================

/// Engine-reported state of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// Raw engine state.
    pub state: EngineState,
    /// Error reported by the component, if any.
    #[serde(default)]
    pub error: Option<String>,
    /// Execution attempts.
    #[serde(default)]
    pub attempts: u32,
}

/// Engine-reported state of a submitted root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeState {
    /// Root handle.
    pub root: RootHandle,
    /// Root state.
    pub state: EngineState,
    /// Per-node states keyed by node identifier.
    pub nodes: BTreeMap<NodeId, NodeState>,
}

impl TreeState {
    /// Returns true when no node has started executing.
    #[must_use]
    pub fn is_untouched(&self) -> bool {
        self.nodes.values().all(|node| node.state.is_not_started())
    }

    /// Returns the first failed node and its error, in identifier order.
    ///
    /// Leaf failures carrying an error win over failed composite nodes.
    #[must_use]
    pub fn first_failure(&self) -> Option<(&NodeId, Option<&str>)> {
        let mut failed = self.nodes.iter().filter(|(_, node)| node.state == EngineState::Failed);
        failed
            .clone()
            .find(|(_, node)| node.error.is_some())
            .or_else(|| failed.next())
            .map(|(id, node)| (id, node.error.as_deref()))
    }
}
