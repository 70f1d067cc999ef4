// crates/ticket-flow-core/src/runtime/registry.rs
// ============================================================================
// Module: Orchestration Registry
// Description: Process-wide tag registry for procedures, param builders, hooks and ticket types.
// Purpose: Resolve every tag at process start and reject unknown tags before dispatch.
// Dependencies: crate::core, crate::runtime::{builder, params}, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Flows reference business procedures, param builders and hooks by tag.
//! The [`Registry`] maps each tag to an implementation. It is assembled once
//! through [`RegistryBuilder`], which checks that every ticket-type template
//! only references registered tags. After that, the only lookup that can
//! fail on user input is the ticket type itself, at ticket creation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::core::CallbackId;
use crate::core::CallbackRefs;
use crate::core::FlowKind;
use crate::core::ParamBuilderId;
use crate::core::ProcedureId;
use crate::core::ResourceId;
use crate::core::RetryPolicy;
use crate::core::TicketType;
use crate::runtime::builder::BuildError;
use crate::runtime::builder::PipelineBuilder;
use crate::runtime::params::FlowParamBuilder;
use crate::runtime::params::PostCallback;
use crate::runtime::params::PreCallback;

// ============================================================================
// SECTION: Procedures
// ============================================================================

/// Business procedure failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcedureError {
    /// Payload is missing or malformed.
    #[error("invalid payload: {0}")]
    Validation(String),
    /// The pipeline could not be assembled.
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Business procedure invoked by engine-backed and reservation flows.
pub trait Procedure: Send + Sync {
    /// Validates the payload and returns the resources the flow will act on.
    ///
    /// # Errors
    ///
    /// Returns [`ProcedureError::Validation`] when the payload is unusable.
    fn resources(&self, payload: &Value) -> Result<Vec<ResourceId>, ProcedureError>;

    /// Appends the pipeline steps for `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcedureError`] when the steps cannot be assembled.
    fn plan(&self, payload: &Value, builder: &mut PipelineBuilder) -> Result<(), ProcedureError>;
}

// ============================================================================
// SECTION: Templates
// ============================================================================

/// One flow entry of a ticket type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowTemplate {
    /// Display name.
    pub name: String,
    /// Flow variant.
    pub kind: FlowKind,
    /// Business procedure tag.
    pub procedure: Option<ProcedureId>,
    /// Param builder tag.
    pub params: ParamBuilderId,
    /// Retry policy for execution failures.
    pub retry_policy: RetryPolicy,
    /// Hook tags.
    pub callbacks: CallbackRefs,
}

impl FlowTemplate {
    /// Creates a template without procedure or hooks.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FlowKind, params: impl Into<ParamBuilderId>) -> Self {
        Self {
            name: name.into(),
            kind,
            procedure: None,
            params: params.into(),
            retry_policy: RetryPolicy::Manual,
            callbacks: CallbackRefs::default(),
        }
    }

    /// Sets the business procedure.
    #[must_use]
    pub fn procedure(mut self, procedure: impl Into<ProcedureId>) -> Self {
        self.procedure = Some(procedure.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the pre-submission hook.
    #[must_use]
    pub fn pre_callback(mut self, callback: impl Into<CallbackId>) -> Self {
        self.callbacks.pre = Some(callback.into());
        self
    }

    /// Sets the success hook.
    #[must_use]
    pub fn post_callback(mut self, callback: impl Into<CallbackId>) -> Self {
        self.callbacks.post = Some(callback.into());
        self
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registry assembly and lookup errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Ticket type not registered.
    #[error("unknown ticket type: {0}")]
    UnknownTicketType(TicketType),
    /// Procedure tag not registered.
    #[error("unknown procedure: {0}")]
    UnknownProcedure(ProcedureId),
    /// Param builder tag not registered.
    #[error("unknown param builder: {0}")]
    UnknownParamBuilder(ParamBuilderId),
    /// Hook tag not registered.
    #[error("unknown callback: {0}")]
    UnknownCallback(CallbackId),
    /// Tag registered twice.
    #[error("duplicate registration: {0}")]
    Duplicate(String),
    /// Ticket type registered without flows.
    #[error("ticket type {0} has no flows")]
    EmptyTemplate(TicketType),
    /// Flow kind needs a procedure but none was set, or has one it cannot use.
    #[error("ticket type {ticket_type} flow '{flow}': {message}")]
    InvalidTemplate {
        /// Ticket type.
        ticket_type: TicketType,
        /// Flow name.
        flow: String,
        /// Problem description.
        message: String,
    },
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Resolved tag registry.
#[derive(Clone, Default)]
pub struct Registry {
    /// Procedures by tag.
    procedures: BTreeMap<ProcedureId, Arc<dyn Procedure>>,
    /// Param builders by tag.
    param_builders: BTreeMap<ParamBuilderId, Arc<dyn FlowParamBuilder>>,
    /// Pre hooks by tag.
    pre_callbacks: BTreeMap<CallbackId, Arc<dyn PreCallback>>,
    /// Post hooks by tag.
    post_callbacks: BTreeMap<CallbackId, Arc<dyn PostCallback>>,
    /// Ordered flow templates by ticket type.
    ticket_types: BTreeMap<TicketType, Vec<FlowTemplate>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("procedures", &self.procedures.keys().collect::<Vec<_>>())
            .field("param_builders", &self.param_builders.keys().collect::<Vec<_>>())
            .field("pre_callbacks", &self.pre_callbacks.keys().collect::<Vec<_>>())
            .field("post_callbacks", &self.post_callbacks.keys().collect::<Vec<_>>())
            .field("ticket_types", &self.ticket_types.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Starts a registry builder.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Returns the flow templates for a ticket type.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownTicketType`] when the type is not registered.
    pub fn templates(&self, ticket_type: &TicketType) -> Result<&[FlowTemplate], RegistryError> {
        self.ticket_types
            .get(ticket_type)
            .map(Vec::as_slice)
            .ok_or_else(|| RegistryError::UnknownTicketType(ticket_type.clone()))
    }

    /// Returns a procedure.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownProcedure`] when the tag is not registered.
    pub fn procedure(&self, id: &ProcedureId) -> Result<Arc<dyn Procedure>, RegistryError> {
        self.procedures
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownProcedure(id.clone()))
    }

    /// Returns a param builder.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownParamBuilder`] when the tag is not registered.
    pub fn param_builder(&self, id: &ParamBuilderId) -> Result<Arc<dyn FlowParamBuilder>, RegistryError> {
        self.param_builders
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownParamBuilder(id.clone()))
    }

    /// Returns a pre hook.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownCallback`] when the tag is not registered.
    pub fn pre_callback(&self, id: &CallbackId) -> Result<Arc<dyn PreCallback>, RegistryError> {
        self.pre_callbacks
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCallback(id.clone()))
    }

    /// Returns a post hook.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownCallback`] when the tag is not registered.
    pub fn post_callback(&self, id: &CallbackId) -> Result<Arc<dyn PostCallback>, RegistryError> {
        self.post_callbacks
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCallback(id.clone()))
    }

    /// Returns the registered ticket types.
    pub fn ticket_types(&self) -> impl Iterator<Item = &TicketType> {
        self.ticket_types.keys()
    }
}

// ============================================================================
// SECTION: Registry Builder
// ============================================================================

/// Collects registrations and validates them into a [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    /// Registry under construction.
    registry: Registry,
    /// First duplicate registration seen.
    duplicate: Option<String>,
}

impl RegistryBuilder {
    /// Registers a business procedure.
    #[must_use]
    pub fn procedure(mut self, id: impl Into<ProcedureId>, procedure: impl Procedure + 'static) -> Self {
        let id = id.into();
        let label = format!("procedure {id}");
        insert_unique(&mut self.registry.procedures, id, Arc::new(procedure), &mut self.duplicate, label);
        self
    }

    /// Registers a param builder.
    #[must_use]
    pub fn param_builder(
        mut self,
        id: impl Into<ParamBuilderId>,
        builder: impl FlowParamBuilder + 'static,
    ) -> Self {
        let id = id.into();
        let label = format!("param builder {id}");
        insert_unique(&mut self.registry.param_builders, id, Arc::new(builder), &mut self.duplicate, label);
        self
    }

    /// Registers a pre hook.
    #[must_use]
    pub fn pre_callback(mut self, id: impl Into<CallbackId>, callback: impl PreCallback + 'static) -> Self {
        let id = id.into();
        let label = format!("pre callback {id}");
        insert_unique(&mut self.registry.pre_callbacks, id, Arc::new(callback), &mut self.duplicate, label);
        self
    }

    /// Registers a post hook.
    #[must_use]
    pub fn post_callback(
        mut self,
        id: impl Into<CallbackId>,
        callback: impl PostCallback + 'static,
    ) -> Self {
        let id = id.into();
        let label = format!("post callback {id}");
        insert_unique(&mut self.registry.post_callbacks, id, Arc::new(callback), &mut self.duplicate, label);
        self
    }

    /// Registers a ticket type with its ordered flow templates.
    #[must_use]
    pub fn ticket_type(mut self, ticket_type: impl Into<TicketType>, flows: Vec<FlowTemplate>) -> Self {
        let ticket_type = ticket_type.into();
        let label = format!("ticket type {ticket_type}");
        insert_unique(&mut self.registry.ticket_types, ticket_type, flows, &mut self.duplicate, label);
        self
    }

    /// Validates every template against the registered tags.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] for duplicates, empty templates, unknown tags
    /// or kinds missing a procedure.
    pub fn build(self) -> Result<Registry, RegistryError> {
        if let Some(label) = self.duplicate {
            return Err(RegistryError::Duplicate(label));
        }
        let registry = self.registry;
        for (ticket_type, flows) in &registry.ticket_types {
            if flows.is_empty() {
                return Err(RegistryError::EmptyTemplate(ticket_type.clone()));
            }
            for flow in flows {
                validate_template(&registry, ticket_type, flow)?;
            }
        }
        Ok(registry)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Inserts a value, remembering the first duplicate key.
fn insert_unique<K: Ord, V>(
    map: &mut BTreeMap<K, V>,
    key: K,
    value: V,
    duplicate: &mut Option<String>,
    label: String,
) {
    match map.entry(key) {
        Entry::Vacant(entry) => {
            entry.insert(value);
        }
        Entry::Occupied(_) => {
            duplicate.get_or_insert(label);
        }
    }
}

/// Checks one template against the registry.
fn validate_template(
    registry: &Registry,
    ticket_type: &TicketType,
    flow: &FlowTemplate,
) -> Result<(), RegistryError> {
    let invalid = |message: &str| RegistryError::InvalidTemplate {
        ticket_type: ticket_type.clone(),
        flow: flow.name.clone(),
        message: message.to_string(),
    };
    match (flow.kind, &flow.procedure) {
        (FlowKind::Pause, Some(_)) => return Err(invalid("pause flows take no procedure")),
        (FlowKind::Pause, None) => {}
        (_, None) => return Err(invalid("flow kind requires a procedure")),
        (_, Some(procedure)) => {
            registry.procedure(procedure)?;
        }
    }
    registry.param_builder(&flow.params)?;
    if let Some(pre) = &flow.callbacks.pre {
        registry.pre_callback(pre)?;
    }
    if let Some(post) = &flow.callbacks.post {
        registry.post_callback(post)?;
    }
    Ok(())
}
