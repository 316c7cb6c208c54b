//! Durable entities: workflows, steps, subscriber network profiles and
//! service instances. These are the rows the repositories in
//! `repository`/`repository_sqlite` persist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::lifecycle::LifecycleState;

/// Lifecycle of a saga workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
    RollingBack,
    RolledBack,
    RollbackFailed,
    Timeout,
    Compensated,
}

/// Lifecycle of a single step within a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Compensating,
    Compensated,
    CompensationFailed,
}

/// Which saga definition a workflow run is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    ProvisionSubscriber,
    DeprovisionSubscriber,
    ActivateService,
    SuspendService,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::ProvisionSubscriber => "provision_subscriber",
            WorkflowType::DeprovisionSubscriber => "deprovision_subscriber",
            WorkflowType::ActivateService => "activate_service",
            WorkflowType::SuspendService => "suspend_service",
        }
    }
}

/// A single run of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub workflow_type: WorkflowType,
    pub tenant_id: String,
    pub subscriber_id: String,
    pub status: WorkflowStatus,
    pub idempotency_key: Option<String>,
    pub context: HashMap<String, Value>,
    pub error: Option<String>,
    /// Number of times `retry_workflow` has been invoked on this run.
    pub retry_count: i32,
    /// Ceiling for `retry_count`; exhausting it moves the workflow to `timeout`.
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn new(
        workflow_type: WorkflowType,
        tenant_id: impl Into<String>,
        subscriber_id: impl Into<String>,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_type,
            tenant_id: tenant_id.into(),
            subscriber_id: subscriber_id.into(),
            status: WorkflowStatus::Pending,
            idempotency_key,
            context: HashMap::new(),
            error: None,
            retry_count: 0,
            max_retries: 3,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

/// One step record within a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub step_name: String,
    pub step_order: i32,
    pub status: WorkflowStepStatus,
    pub retryable: bool,
    pub max_retries: i32,
    pub retry_count: i32,
    /// Unique per (workflow_id, step_name); lets a retried workflow run
    /// detect and skip a step whose forward action already committed.
    pub idempotency_key: Option<String>,
    pub input_data: HashMap<String, Value>,
    pub output_data: Option<HashMap<String, Value>>,
    pub compensation_data: Option<HashMap<String, Value>>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub compensated_at: Option<DateTime<Utc>>,
}

impl WorkflowStepRecord {
    pub fn new(workflow_id: Uuid, step_name: impl Into<String>, step_order: i32, max_retries: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            step_name: step_name.into(),
            step_order,
            status: WorkflowStepStatus::Pending,
            retryable: max_retries > 0,
            max_retries,
            retry_count: 0,
            idempotency_key: None,
            input_data: HashMap::new(),
            output_data: None,
            compensation_data: None,
            error: None,
            started_at: None,
            completed_at: None,
            compensated_at: None,
        }
    }
}

/// Governs whether `Ipv6LifecycleMachine::allocate` is permitted to run.
/// Only `prefix_delegation` and `dual_stack` request a delegated prefix;
/// the others describe addressing handled entirely by the CPE/access
/// network and out of this crate's allocation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ipv6AssignmentMode {
    None,
    StatelessAutoconfig,
    StatefulDhcpv6,
    PrefixDelegation,
    DualStack,
}

impl Ipv6AssignmentMode {
    pub fn allows_allocation(&self) -> bool {
        matches!(self, Ipv6AssignmentMode::PrefixDelegation | Ipv6AssignmentMode::DualStack)
    }
}

/// How strictly Option 82 (DHCP Relay Agent Information) is enforced
/// against the expected circuit-id/remote-id for a subscriber's port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Option82Policy {
    Enforce,
    Log,
    Ignore,
}

/// A subscriber's dual-stack network assignment, tracked independently
/// per address family since IPv4 and IPv6 can be allocated, suspended
/// or revoked on different schedules (e.g. IPv6-only subscribers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberNetworkProfile {
    pub subscriber_id: String,
    pub tenant_id: String,

    pub vlan_id: Option<i32>,
    pub inner_vlan_id: Option<i32>,
    pub qinq_enabled: bool,

    pub option82_circuit_id: Option<String>,
    pub option82_remote_id: Option<String>,
    pub option82_policy: Option82Policy,

    pub ipv4_state: LifecycleState,
    pub ipv4_address: Option<String>,
    pub ipv4_pool_id: Option<String>,
    pub ipv4_record_id: Option<String>,
    pub static_ipv4_address: Option<String>,

    pub ipv6_assignment_mode: Ipv6AssignmentMode,
    pub ipv6_state: LifecycleState,
    pub ipv6_prefix: Option<String>,
    pub ipv6_prefix_length: Option<u8>,
    pub ipv6_record_id: Option<String>,
    pub static_ipv6_address: Option<String>,

    pub vendor_metadata: HashMap<String, Value>,

    pub allocated_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriberNetworkProfile {
    pub fn new(subscriber_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            subscriber_id: subscriber_id.into(),
            tenant_id: tenant_id.into(),
            vlan_id: None,
            inner_vlan_id: None,
            qinq_enabled: false,
            option82_circuit_id: None,
            option82_remote_id: None,
            option82_policy: Option82Policy::Log,
            ipv4_state: LifecycleState::Pending,
            ipv4_address: None,
            ipv4_pool_id: None,
            ipv4_record_id: None,
            static_ipv4_address: None,
            ipv6_assignment_mode: Ipv6AssignmentMode::None,
            ipv6_state: LifecycleState::Pending,
            ipv6_prefix: None,
            ipv6_prefix_length: None,
            ipv6_record_id: None,
            static_ipv6_address: None,
            vendor_metadata: HashMap::new(),
            allocated_at: None,
            activated_at: None,
            suspended_at: None,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Service lifecycle state driven by `service::ServiceLifecycleOrchestrator`.
/// Three of the `suspended*` variants share the same machine edges and
/// are distinguished only by the `suspension_type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Pending,
    Provisioning,
    Active,
    Suspended,
    SuspendedFraud,
    SuspendedNonPayment,
    Terminating,
    Terminated,
    Failed,
}

impl ServiceState {
    pub fn is_suspended(&self) -> bool {
        matches!(self, ServiceState::Suspended | ServiceState::SuspendedFraud | ServiceState::SuspendedNonPayment)
    }
}

/// Reason discriminator for a `suspend_service` call; maps onto the
/// three `suspended*` `ServiceState` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionType {
    Fraud,
    NonPayment,
    Other,
}

impl SuspensionType {
    pub fn to_state(self) -> ServiceState {
        match self {
            SuspensionType::Fraud => ServiceState::SuspendedFraud,
            SuspensionType::NonPayment => ServiceState::SuspendedNonPayment,
            SuspensionType::Other => ServiceState::Suspended,
        }
    }
}

/// A subscriber's billed service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: Uuid,
    pub subscriber_id: String,
    pub tenant_id: String,
    pub plan_id: String,
    pub state: ServiceState,

    /// Reason recorded by the most recent suspend/terminate call.
    pub reason: Option<String>,
    /// When set, `resume_service` is expected to run automatically
    /// (driven by the caller's scheduler, not by this crate).
    pub auto_resume_at: Option<DateTime<Utc>>,
    /// Last health-check result, if `perform_health_check` has run.
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_health_check_result: Option<String>,

    pub metadata: HashMap<String, Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
}

impl ServiceInstance {
    pub fn new(subscriber_id: impl Into<String>, tenant_id: impl Into<String>, plan_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subscriber_id: subscriber_id.into(),
            tenant_id: tenant_id.into(),
            plan_id: plan_id.into(),
            state: ServiceState::Pending,
            reason: None,
            auto_resume_at: None,
            last_health_check: None,
            last_health_check_result: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            activated_at: None,
            suspended_at: None,
            terminated_at: None,
        }
    }
}

/// An append-only audit record of a lifecycle transition, independent
/// of workflow/step history, kept for operational troubleshooting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub subscriber_id: String,
    pub tenant_id: String,
    pub event_type: String,
    pub from_state: Option<String>,
    pub to_state: String,
    pub detail: HashMap<String, Value>,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        subscriber_id: impl Into<String>,
        tenant_id: impl Into<String>,
        event_type: impl Into<String>,
        from_state: Option<String>,
        to_state: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscriber_id: subscriber_id.into(),
            tenant_id: tenant_id.into(),
            event_type: event_type.into(),
            from_state,
            to_state: to_state.into(),
            detail: HashMap::new(),
            occurred_at: Utc::now(),
        }
    }
}
