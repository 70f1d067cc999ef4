// crates/ticket-flow-core/src/runtime/engine.rs
// ============================================================================
// Module: In-Memory DAG Engine
// Description: Reference DAG engine executing pipelines in-process on demand.
// Purpose: Give tests and embedded hosts an engine with the external contract.
// Dependencies: crate::core, crate::interfaces, serde_json
// ============================================================================

//! ## Overview
//! [`InMemoryDagEngine`] accepts pipelines, keeps their node states, and only
//! executes when a host calls [`InMemoryDagEngine::drive`]. Submission never
//! runs anything. Leaf actions are executed by registered [`Component`]s,
//! which may succeed, fail, or suspend until `callback_node` resumes them.
//!
//! Ordering follows the pipeline description: a node starts only after its
//! preceding sibling finished, parallel members all finish before the
//! barrier does, and a sub-pipeline is finished when its last node is.
//!
//! Every contract call is counted, and the engine can be switched to report
//! itself unreachable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde_json::Value;

use crate::core::ActSpec;
use crate::core::BuildContext;
use crate::core::ComponentId;
use crate::core::EngineState;
use crate::core::NodeId;
use crate::core::NodeState;
use crate::core::PipelineNode;
use crate::core::PipelineSpec;
use crate::core::RootHandle;
use crate::core::TreeState;
use crate::interfaces::DagEngine;
use crate::interfaces::EngineError;

// ============================================================================
// SECTION: Components
// ============================================================================

/// Result of executing a leaf action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentOutcome {
    /// The action finished.
    Succeeded,
    /// The action failed with a message.
    Failed(String),
    /// The action waits for `callback_node`.
    Suspend,
}

/// Leaf action implementation.
pub trait Component: Send + Sync {
    /// Executes the action. `log` collects node log lines.
    fn execute(&self, inputs: &Value, context: &mut BuildContext, log: &mut Vec<String>) -> ComponentOutcome;

    /// Resumes a suspended action with operator-supplied data.
    ///
    /// The default stores the payload in the context under the node id.
    fn resume(
        &self,
        node: &NodeId,
        _inputs: &Value,
        payload: &Value,
        context: &mut BuildContext,
        log: &mut Vec<String>,
    ) -> ComponentOutcome {
        match context.insert(node.as_str(), payload) {
            Ok(()) => {
                log.push("resumed by callback".to_string());
                ComponentOutcome::Succeeded
            }
            Err(err) => ComponentOutcome::Failed(err.to_string()),
        }
    }
}

/// Succeeds; copies the `set` object of its inputs into the context.
#[derive(Debug, Clone, Copy, Default)]
pub struct SucceedComponent;

impl Component for SucceedComponent {
    fn execute(&self, inputs: &Value, context: &mut BuildContext, log: &mut Vec<String>) -> ComponentOutcome {
        if let Some(Value::Object(values)) = inputs.get("set") {
            for (key, value) in values {
                if let Err(err) = context.insert(key, value) {
                    return ComponentOutcome::Failed(err.to_string());
                }
                log.push(format!("set {key}"));
            }
        }
        ComponentOutcome::Succeeded
    }
}

/// Fails with the `message` input, or a fixed message.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailComponent;

impl Component for FailComponent {
    fn execute(&self, inputs: &Value, _context: &mut BuildContext, _log: &mut Vec<String>) -> ComponentOutcome {
        let message = inputs.get("message").and_then(Value::as_str).unwrap_or("component failed");
        ComponentOutcome::Failed(message.to_string())
    }
}

/// Suspends until a callback arrives.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuspendComponent;

impl Component for SuspendComponent {
    fn execute(&self, _inputs: &Value, _context: &mut BuildContext, log: &mut Vec<String>) -> ComponentOutcome {
        log.push("waiting for callback".to_string());
        ComponentOutcome::Suspend
    }
}

// ============================================================================
// SECTION: Engine State
// ============================================================================

/// One submitted root.
#[derive(Debug)]
struct RootRun {
    /// Submitted description.
    spec: PipelineSpec,
    /// Live context.
    context: BuildContext,
    /// Root state.
    state: EngineState,
    /// Node states, including composite nodes.
    nodes: BTreeMap<NodeId, NodeState>,
    /// Node logs.
    logs: BTreeMap<NodeId, Vec<String>>,
}

/// Aggregate progress of a node or sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    /// Nothing started.
    Pending,
    /// Started, not settled.
    Waiting,
    /// Finished.
    Finished,
    /// Failed.
    Failed,
    /// Revoked.
    Revoked,
}

impl Progress {
    /// Combines the progress of parallel members.
    fn combine(members: &[Self]) -> Self {
        if members.contains(&Self::Revoked) {
            Self::Revoked
        } else if members.iter().all(|member| *member == Self::Pending) {
            Self::Pending
        } else if members.iter().any(|member| matches!(member, Self::Waiting | Self::Pending)) {
            Self::Waiting
        } else if members.contains(&Self::Failed) {
            Self::Failed
        } else {
            Self::Finished
        }
    }

    /// Returns the engine state reported for a composite node or root.
    const fn engine_state(self) -> EngineState {
        match self {
            Self::Pending => EngineState::Ready,
            Self::Waiting => EngineState::Running,
            Self::Finished => EngineState::Finished,
            Self::Failed => EngineState::Failed,
            Self::Revoked => EngineState::Revoked,
        }
    }
}

/// Walks a pipeline tree, optionally executing ready leaf actions.
struct Executor<'a> {
    /// Registered components.
    components: &'a BTreeMap<ComponentId, Arc<dyn Component>>,
    /// Live context.
    context: &'a mut BuildContext,
    /// Node states.
    nodes: &'a mut BTreeMap<NodeId, NodeState>,
    /// Node logs.
    logs: &'a mut BTreeMap<NodeId, Vec<String>>,
    /// Whether ready leaf actions run.
    execute: bool,
}

impl Executor<'_> {
    /// Evaluates a sequence and records its composite state.
    fn sequence(&mut self, pipeline: &PipelineSpec) -> Progress {
        let mut progress = Progress::Finished;
        for (index, node) in pipeline.nodes.iter().enumerate() {
            let step = self.node(node);
            if step != Progress::Finished {
                progress = if step == Progress::Pending && index > 0 { Progress::Waiting } else { step };
                break;
            }
        }
        self.set_composite(&pipeline.id, progress);
        progress
    }

    /// Evaluates one node of a sequence.
    fn node(&mut self, node: &PipelineNode) -> Progress {
        match node {
            PipelineNode::Act(act) => self.act(act),
            PipelineNode::ParallelActs {
                id,
                acts,
            } => {
                let members: Vec<Progress> = acts.iter().map(|act| self.act(act)).collect();
                let progress = Progress::combine(&members);
                self.set_composite(id, progress);
                progress
            }
            PipelineNode::SubPipeline(sub) => self.sequence(sub),
            PipelineNode::ParallelSubPipelines {
                id,
                pipelines,
            } => {
                let members: Vec<Progress> = pipelines.iter().map(|sub| self.sequence(sub)).collect();
                let progress = Progress::combine(&members);
                self.set_composite(id, progress);
                progress
            }
        }
    }

    /// Evaluates a leaf action, executing it when ready.
    fn act(&mut self, act: &ActSpec) -> Progress {
        let state = self.nodes.get(&act.id).map_or(EngineState::Created, |node| node.state);
        match state {
            EngineState::Finished => Progress::Finished,
            EngineState::Failed | EngineState::Blocked => Progress::Failed,
            EngineState::Revoked => Progress::Revoked,
            EngineState::Running | EngineState::Suspended => Progress::Waiting,
            EngineState::Created | EngineState::Ready if !self.execute => Progress::Pending,
            EngineState::Created | EngineState::Ready => self.run_act(act),
        }
    }

    /// Executes a ready leaf action.
    fn run_act(&mut self, act: &ActSpec) -> Progress {
        let mut lines = vec![format!("started {}", act.name)];
        let outcome = match self.components.get(&act.component) {
            Some(component) => component.execute(&act.inputs, self.context, &mut lines),
            None => ComponentOutcome::Failed(format!("unknown component {}", act.component)),
        };
        let node = self.nodes.entry(act.id.clone()).or_insert_with(|| NodeState {
            state: EngineState::Created,
            error: None,
            attempts: 0,
        });
        node.attempts += 1;
        let progress = apply_outcome(node, outcome, &mut lines);
        self.logs.entry(act.id.clone()).or_default().extend(lines);
        progress
    }

    /// Records a composite node state.
    fn set_composite(&mut self, id: &NodeId, progress: Progress) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.state = progress.engine_state();
        }
    }
}

/// Applies a component outcome to a node.
fn apply_outcome(node: &mut NodeState, outcome: ComponentOutcome, lines: &mut Vec<String>) -> Progress {
    match outcome {
        ComponentOutcome::Succeeded => {
            node.state = EngineState::Finished;
            node.error = None;
            lines.push("finished".to_string());
            Progress::Finished
        }
        ComponentOutcome::Failed(message) => {
            lines.push(format!("failed: {message}"));
            node.state = EngineState::Failed;
            node.error = Some(message);
            Progress::Failed
        }
        ComponentOutcome::Suspend => {
            node.state = EngineState::Suspended;
            Progress::Waiting
        }
    }
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// In-process DAG engine.
pub struct InMemoryDagEngine {
    /// Registered components.
    components: BTreeMap<ComponentId, Arc<dyn Component>>,
    /// Submitted roots.
    roots: Mutex<BTreeMap<RootHandle, RootRun>>,
    /// Last assigned root number.
    last_root: AtomicU64,
    /// Contract calls made.
    calls: AtomicU64,
    /// Whether calls fail as unreachable.
    unreachable: AtomicBool,
}

impl Default for InMemoryDagEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDagEngine {
    /// Creates an engine with the `succeed`, `fail` and `suspend` components.
    #[must_use]
    pub fn new() -> Self {
        Self {
            components: BTreeMap::new(),
            roots: Mutex::new(BTreeMap::new()),
            last_root: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            unreachable: AtomicBool::new(false),
        }
        .with_component("succeed", SucceedComponent)
        .with_component("fail", FailComponent)
        .with_component("suspend", SuspendComponent)
    }

    /// Registers a component, replacing any previous one with the same tag.
    #[must_use]
    pub fn with_component(mut self, id: impl Into<ComponentId>, component: impl Component + 'static) -> Self {
        self.components.insert(id.into(), Arc::new(component));
        self
    }

    /// Returns the number of contract calls made so far.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Makes every contract call fail as unreachable while `true`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Executes every ready node of a root. Returns the resulting root state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for unknown roots.
    pub fn drive(&self, root: &RootHandle) -> Result<EngineState, EngineError> {
        let mut roots = self.lock()?;
        let run = roots.get_mut(root).ok_or_else(|| EngineError::NotFound(root.to_string()))?;
        Ok(self.evaluate(run, true))
    }

    /// Executes every ready node of every root.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the engine state is unavailable.
    pub fn drive_all(&self) -> Result<(), EngineError> {
        let mut roots = self.lock()?;
        for run in roots.values_mut() {
            self.evaluate(run, true);
        }
        drop(roots);
        Ok(())
    }

    /// Returns the live context of a root.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for unknown roots.
    pub fn context(&self, root: &RootHandle) -> Result<BuildContext, EngineError> {
        let roots = self.lock()?;
        roots.get(root).map(|run| run.context.clone()).ok_or_else(|| EngineError::NotFound(root.to_string()))
    }

    /// Locks the root table.
    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<RootHandle, RootRun>>, EngineError> {
        self.roots.lock().map_err(|_| EngineError::Protocol("engine mutex poisoned".to_string()))
    }

    /// Counts a contract call and fails when simulating an outage.
    fn enter(&self) -> Result<(), EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(EngineError::Unreachable("in-memory engine offline".to_string()));
        }
        Ok(())
    }

    /// Re-evaluates a root and stores its state. Revoked roots stay revoked.
    fn evaluate(&self, run: &mut RootRun, execute: bool) -> EngineState {
        if run.state == EngineState::Revoked {
            return run.state;
        }
        let mut executor = Executor {
            components: &self.components,
            context: &mut run.context,
            nodes: &mut run.nodes,
            logs: &mut run.logs,
            execute,
        };
        let progress = executor.sequence(&run.spec);
        run.state = progress.engine_state();
        run.state
    }

    /// Applies an operator change to one leaf action and re-evaluates its root.
    fn update_leaf(
        &self,
        root: &RootHandle,
        node: &NodeId,
        change: impl FnOnce(&ActSpec, &mut NodeState, &mut BuildContext, &mut Vec<String>) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        self.enter()?;
        let mut roots = self.lock()?;
        let run = roots.get_mut(root).ok_or_else(|| EngineError::NotFound(root.to_string()))?;
        if run.state == EngineState::Revoked {
            return Err(EngineError::Rejected(format!("root {root} is revoked")));
        }
        let act = find_act(&run.spec, node).cloned().ok_or_else(|| EngineError::NotFound(node.to_string()))?;
        let state = run.nodes.get_mut(node).ok_or_else(|| EngineError::NotFound(node.to_string()))?;
        let mut lines = Vec::new();
        change(&act, state, &mut run.context, &mut lines)?;
        run.logs.entry(node.clone()).or_default().extend(lines);
        self.evaluate(run, false);
        drop(roots);
        Ok(())
    }
}

impl DagEngine for InMemoryDagEngine {
    fn submit(&self, pipeline: &PipelineSpec) -> Result<RootHandle, EngineError> {
        self.enter()?;
        let mut nodes = BTreeMap::new();
        for id in pipeline.node_ids() {
            let fresh = NodeState {
                state: EngineState::Created,
                error: None,
                attempts: 0,
            };
            if nodes.insert(id.clone(), fresh).is_some() {
                return Err(EngineError::Rejected(format!("duplicate node id {id}")));
            }
        }
        if let Some(unknown) = unknown_component(pipeline, &self.components) {
            return Err(EngineError::Rejected(format!("unknown component {unknown}")));
        }
        let number = self.last_root.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = RootHandle::new(format!("root-{number}"));
        let run = RootRun {
            spec: pipeline.clone(),
            context: pipeline.context.clone(),
            state: EngineState::Ready,
            nodes,
            logs: BTreeMap::new(),
        };
        self.lock()?.insert(handle.clone(), run);
        Ok(handle)
    }

    fn tree_state(&self, root: &RootHandle) -> Result<TreeState, EngineError> {
        self.enter()?;
        let roots = self.lock()?;
        let run = roots.get(root).ok_or_else(|| EngineError::NotFound(root.to_string()))?;
        Ok(TreeState {
            root: root.clone(),
            state: run.state,
            nodes: run.nodes.clone(),
        })
    }

    fn revoke(&self, root: &RootHandle) -> Result<bool, EngineError> {
        self.enter()?;
        let mut roots = self.lock()?;
        let run = roots.get_mut(root).ok_or_else(|| EngineError::NotFound(root.to_string()))?;
        if run.state == EngineState::Finished {
            return Ok(false);
        }
        run.state = EngineState::Revoked;
        for node in run.nodes.values_mut() {
            if !node.state.is_settled() {
                node.state = EngineState::Revoked;
            }
        }
        drop(roots);
        Ok(true)
    }

    fn retry_node(&self, root: &RootHandle, node: &NodeId) -> Result<(), EngineError> {
        self.update_leaf(root, node, |_, state, _, lines| {
            if state.state != EngineState::Failed {
                return Err(EngineError::Rejected(format!("node {node} is not failed")));
            }
            state.state = EngineState::Ready;
            state.error = None;
            lines.push("retry requested".to_string());
            Ok(())
        })
    }

    fn skip_node(&self, root: &RootHandle, node: &NodeId) -> Result<(), EngineError> {
        self.update_leaf(root, node, |_, state, _, lines| {
            if state.state != EngineState::Failed {
                return Err(EngineError::Rejected(format!("node {node} is not failed")));
            }
            state.state = EngineState::Finished;
            state.error = None;
            lines.push("skipped by operator".to_string());
            Ok(())
        })
    }

    fn force_fail_node(&self, root: &RootHandle, node: &NodeId) -> Result<(), EngineError> {
        self.update_leaf(root, node, |_, state, _, lines| {
            if state.state.is_settled() {
                return Err(EngineError::Rejected(format!("node {node} already settled")));
            }
            state.state = EngineState::Failed;
            state.error = Some("force failed by operator".to_string());
            lines.push("force failed by operator".to_string());
            Ok(())
        })
    }

    fn callback_node(&self, root: &RootHandle, node: &NodeId, payload: &Value) -> Result<(), EngineError> {
        let components = &self.components;
        self.update_leaf(root, node, |act, state, context, lines| {
            if state.state != EngineState::Suspended {
                return Err(EngineError::Rejected(format!("node {node} is not waiting for a callback")));
            }
            let component = components
                .get(&act.component)
                .ok_or_else(|| EngineError::Rejected(format!("unknown component {}", act.component)))?;
            let outcome = component.resume(node, &act.inputs, payload, context, lines);
            apply_outcome(state, outcome, lines);
            Ok(())
        })
    }

    fn node_logs(&self, root: &RootHandle, node: &NodeId) -> Result<Vec<String>, EngineError> {
        self.enter()?;
        let roots = self.lock()?;
        let run = roots.get(root).ok_or_else(|| EngineError::NotFound(root.to_string()))?;
        if !run.nodes.contains_key(node) {
            return Err(EngineError::NotFound(node.to_string()));
        }
        Ok(run.logs.get(node).cloned().unwrap_or_default())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Finds a leaf action anywhere in a pipeline tree.
fn find_act<'a>(pipeline: &'a PipelineSpec, id: &NodeId) -> Option<&'a ActSpec> {
    pipeline.nodes.iter().find_map(|node| match node {
        PipelineNode::Act(act) => (&act.id == id).then_some(act),
        PipelineNode::ParallelActs {
            acts, ..
        } => acts.iter().find(|act| &act.id == id),
        PipelineNode::SubPipeline(sub) => find_act(sub, id),
        PipelineNode::ParallelSubPipelines {
            pipelines, ..
        } => pipelines.iter().find_map(|sub| find_act(sub, id)),
    })
}

/// Returns the first component tag without a registered implementation.
fn unknown_component(
    pipeline: &PipelineSpec,
    components: &BTreeMap<ComponentId, Arc<dyn Component>>,
) -> Option<ComponentId> {
    pipeline.nodes.iter().find_map(|node| match node {
        PipelineNode::Act(act) => (!components.contains_key(&act.component)).then(|| act.component.clone()),
        PipelineNode::ParallelActs {
            acts, ..
        } => acts
            .iter()
            .find(|act| !components.contains_key(&act.component))
            .map(|act| act.component.clone()),
        PipelineNode::SubPipeline(sub) => unknown_component(sub, components),
        PipelineNode::ParallelSubPipelines {
            pipelines, ..
        } => pipelines.iter().find_map(|sub| unknown_component(sub, components)),
    })
}
