//! Handler registry and the per-workflow collaborator bundle handlers
//! are built against. Concrete handlers for each of the four workflow
//! definitions live in `provision`, `deprovision`, `activate`, `suspend`.

pub mod activate;
pub mod deprovision;
pub mod provision;
pub mod suspend;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::collaborators::{
    AccessNodeManager, BillingService, CoaClient, CpeManager, IpamClient, RadiusAccountManager,
};
use crate::error::{CoreError, Result};
use crate::lifecycle::AddressLifecycle;
use crate::repository::{ProfileRepository, ServiceRepository};

/// Per-invocation state passed to a handler: the workflow/step
/// identity, and the shared mutable context map (spec §4.F
/// "Context semantics" — the only state carried between handlers).
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub workflow_id: uuid::Uuid,
    pub tenant_id: String,
    pub subscriber_id: String,
    pub context: HashMap<String, Value>,
    /// The step's persisted idempotency key, if a prior attempt already
    /// surfaced one. Present here means the handler is being re-invoked
    /// after a process restart interrupted an in-flight call (spec §4.G).
    pub idempotency_key: Option<String>,
}

impl StepContext {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)
            .ok_or_else(|| CoreError::BusinessRule(format!("missing required context key '{key}'")))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.context.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }
}

/// What a forward handler hands back to the orchestrator (spec §4.E
/// step 4): data to persist on the step, data its compensator needs,
/// and updates to merge into the shared context.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub output_data: HashMap<String, Value>,
    pub compensation_data: HashMap<String, Value>,
    pub context_updates: HashMap<String, Value>,
    /// A key the handler surfaces to let a future invocation of this same
    /// step recognize a repeat execution after a restart, instead of
    /// blindly repeating an external side effect.
    pub idempotency_key: Option<String>,
}

#[async_trait]
pub trait ForwardHandler: Send + Sync {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome>;
}

#[async_trait]
pub trait CompensationHandler: Send + Sync {
    async fn compensate(
        &self,
        ctx: &StepContext,
        output_data: &HashMap<String, Value>,
        compensation_data: &HashMap<String, Value>,
    ) -> Result<()>;
}

/// The collaborators every concrete step handler is built against.
/// Bundled once at bootstrap time and shared (via `Arc`) across every
/// handler instance, mirroring the teacher crate's pattern of wiring
/// shared collaborators once and cloning cheap handles into each
/// registered unit.
pub struct Collaborators {
    pub ipv4: Arc<dyn AddressLifecycle>,
    pub ipv6: Arc<dyn AddressLifecycle>,
    pub radius: Arc<dyn RadiusAccountManager>,
    pub coa: Arc<dyn CoaClient>,
    pub access_node: Arc<dyn AccessNodeManager>,
    pub cpe: Arc<dyn CpeManager>,
    pub billing: Arc<dyn BillingService>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub services: Arc<dyn ServiceRepository>,
}

/// Process-scoped mapping from handler name to implementation. A
/// missing handler at lookup time is a fatal step failure, never a
/// panic (spec §4.G).
#[derive(Default)]
pub struct HandlerRegistry {
    forward: HashMap<String, Arc<dyn ForwardHandler>>,
    compensation: HashMap<String, Arc<dyn CompensationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_step(&mut self, name: impl Into<String>, handler: Arc<dyn ForwardHandler>) {
        self.forward.insert(name.into(), handler);
    }

    pub fn register_compensation(&mut self, name: impl Into<String>, handler: Arc<dyn CompensationHandler>) {
        self.compensation.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ForwardHandler>> {
        self.forward.get(name).cloned()
    }

    pub fn get_compensation(&self, name: &str) -> Option<Arc<dyn CompensationHandler>> {
        self.compensation.get(name).cloned()
    }

    /// All registered forward handlers, keyed by name.
    pub fn handlers(&self) -> &HashMap<String, Arc<dyn ForwardHandler>> {
        &self.forward
    }

    /// All registered compensation handlers, keyed by name.
    pub fn compensation_handlers(&self) -> &HashMap<String, Arc<dyn CompensationHandler>> {
        &self.compensation
    }

    /// Builds the registry with every handler for the four built-in
    /// workflow definitions wired against `collaborators`.
    pub fn with_builtin_handlers(collaborators: Arc<Collaborators>) -> Self {
        let mut registry = Self::new();
        provision::register(&mut registry, collaborators.clone());
        deprovision::register(&mut registry, collaborators.clone());
        activate::register(&mut registry, collaborators.clone());
        suspend::register(&mut registry, collaborators);
        registry
    }
}
