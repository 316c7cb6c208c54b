//! Saga Orchestration Core
//!
//! A saga-pattern orchestration engine for ISP subscriber provisioning
//! and service lifecycle management. Built around three pieces:
//!
//! - A [`saga`] orchestrator that runs named, ordered step sequences
//!   with per-step retry and reverse-order compensation on failure.
//! - Shared IPv4/IPv6 address [`lifecycle`] state machines, each
//!   driving IPAM allocation and RADIUS CoA pushes through the
//!   [`collaborators`] traits.
//! - A [`service`] lifecycle orchestrator composing the IPv6 machine's
//!   `revoke` into service termination, plus activation, suspension,
//!   and bulk operations.
//!
//! [`facade`] is the thin entry point most callers should use: it
//! creates workflow records, drives the saga, and maps results onto
//! stable response types.
//!
//! # Example
//!
//! ```rust,no_run
//! use saga_core::config::OrchestratorConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = OrchestratorConfig::default();
//!     config.validate()?;
//!     Ok(())
//! }
//! ```

pub mod collaborators;
pub mod config;
pub mod definitions;
pub mod error;
pub mod facade;
pub mod handlers;
pub mod lifecycle;
pub mod model;
pub mod repository;
pub mod repository_sqlite;
pub mod saga;
pub mod service;

pub use collaborators::{
    AccessNodeManager, BillingService, CoaClient, CoaOutcome, CpeManager, IpamAllocation,
    IpamClient, RadiusAccountManager,
};
pub use config::OrchestratorConfig;
pub use error::{CoreError, Result};
pub use facade::{OrchestrationFacade, StepSummary, WorkflowResponse, WorkflowStatsResponse};
pub use handlers::{Collaborators, HandlerRegistry, StepContext, StepOutcome};
pub use lifecycle::{AddressLifecycle, LifecycleError, LifecycleState};
pub use model::{
    Ipv6AssignmentMode, LifecycleEvent, Option82Policy, ServiceInstance, ServiceState,
    SubscriberNetworkProfile, SuspensionType, Workflow, WorkflowStatus, WorkflowStepRecord,
    WorkflowStepStatus, WorkflowType,
};
pub use repository::{
    LifecycleEventRepository, ProfileRepository, ServiceRepository, WorkflowRepository,
};
pub use saga::{SagaOrchestrator, SagaOutcome};
pub use service::{BulkOperation, ServiceLifecycleOrchestrator, ServiceOperationResult};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
