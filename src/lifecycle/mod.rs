//! Shared lifecycle state protocol for address lifecycle machines.
//!
//! Both the IPv4 and IPv6 machines (`ipv4`, `ipv6`) implement the
//! [`AddressLifecycle`] trait over this shared state set and error
//! taxonomy, so a caller driving either one sees the same shape of
//! result and the same transition rules.

pub mod ipv4;
pub mod ipv6;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::error::Result;

/// The shared state set every address lifecycle machine moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Allocated,
    Active,
    Suspended,
    Revoking,
    Revoked,
    Failed,
}

/// Table lookup for the legal-transition graph. The graph is cyclic
/// (`failed -> allocated` is a recovery edge) so this is a flat table,
/// not a tree walk.
pub fn validate_transition(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::*;
    matches!(
        (from, to),
        (Pending, Allocated)
            | (Pending, Failed)
            | (Allocated, Active)
            | (Allocated, Revoking)
            | (Allocated, Failed)
            | (Active, Suspended)
            | (Active, Revoking)
            | (Active, Failed)
            | (Suspended, Active)
            | (Suspended, Revoking)
            | (Suspended, Failed)
            | (Revoking, Revoked)
            | (Revoking, Failed)
            | (Failed, Allocated)
            | (Failed, Revoking)
    )
}

/// Error taxonomy shared by both address lifecycle machines.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("allocation error: {0}")]
    Allocation(String),

    #[error("activation error: {0}")]
    Activation(String),

    #[error("reactivation error: {0}")]
    Reactivation(String),

    #[error("revocation error: {0}")]
    Revocation(String),

    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}

/// Result shape common to every mutating operation on both machines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleResult {
    pub success: bool,
    pub state: LifecycleState,
    pub address: Option<String>,
    pub subscriber_id: String,
    pub tenant_id: String,
    pub allocated_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl LifecycleResult {
    fn new(subscriber_id: &str, tenant_id: &str, state: LifecycleState) -> Self {
        Self {
            success: true,
            state,
            address: None,
            subscriber_id: subscriber_id.to_string(),
            tenant_id: tenant_id.to_string(),
            allocated_at: None,
            activated_at: None,
            suspended_at: None,
            revoked_at: None,
            metadata: HashMap::new(),
        }
    }
}

/// Request to allocate an address/prefix.
#[derive(Debug, Clone, Default)]
pub struct AllocateRequest {
    pub subscriber_id: String,
    pub tenant_id: String,
    pub pool_id: Option<String>,
    pub requested_address: Option<String>,
    /// IPv6 only: desired prefix length (48-64, default 56). Ignored by IPv4.
    pub prefix_length: Option<u8>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Request to mark an address/prefix active.
#[derive(Debug, Clone, Default)]
pub struct ActivateRequest {
    pub subscriber_id: String,
    pub tenant_id: String,
    pub username: Option<String>,
    pub nas_ip: Option<String>,
    pub send_coa: bool,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Request to suspend an active address/prefix.
#[derive(Debug, Clone, Default)]
pub struct SuspendRequest {
    pub subscriber_id: String,
    pub tenant_id: String,
    pub username: Option<String>,
    pub nas_ip: Option<String>,
    pub send_coa: bool,
    pub reason: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Request to reactivate a suspended address/prefix.
#[derive(Debug, Clone, Default)]
pub struct ReactivateRequest {
    pub subscriber_id: String,
    pub tenant_id: String,
    pub username: Option<String>,
    pub nas_ip: Option<String>,
    pub send_coa: bool,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Request to revoke an address/prefix permanently.
#[derive(Debug, Clone, Default)]
pub struct RevokeRequest {
    pub subscriber_id: String,
    pub tenant_id: String,
    pub username: Option<String>,
    pub nas_ip: Option<String>,
    pub send_disconnect: bool,
    pub release_to_pool: bool,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// The six operations every address lifecycle machine exposes, plus the
/// `commit` flag threaded through every mutating call so the service
/// orchestrator can batch a machine's changes with its own (see
/// `service::ServiceLifecycleOrchestrator::terminate_service`).
#[async_trait]
pub trait AddressLifecycle: Send + Sync {
    async fn allocate(&self, req: AllocateRequest, commit: bool) -> Result<LifecycleResult>;
    async fn activate(&self, req: ActivateRequest, commit: bool) -> Result<LifecycleResult>;
    async fn suspend(&self, req: SuspendRequest, commit: bool) -> Result<LifecycleResult>;
    async fn reactivate(&self, req: ReactivateRequest, commit: bool) -> Result<LifecycleResult>;
    async fn revoke(&self, req: RevokeRequest, commit: bool) -> Result<LifecycleResult>;
    async fn get_state(&self, subscriber_id: &str) -> Result<Option<LifecycleResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_are_accepted() {
        assert!(validate_transition(LifecycleState::Pending, LifecycleState::Allocated));
        assert!(validate_transition(LifecycleState::Allocated, LifecycleState::Active));
        assert!(validate_transition(LifecycleState::Active, LifecycleState::Suspended));
        assert!(validate_transition(LifecycleState::Suspended, LifecycleState::Active));
        assert!(validate_transition(LifecycleState::Failed, LifecycleState::Allocated));
        assert!(validate_transition(LifecycleState::Failed, LifecycleState::Revoking));
        assert!(validate_transition(LifecycleState::Revoking, LifecycleState::Revoked));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert!(!validate_transition(LifecycleState::Revoked, LifecycleState::Active));
        assert!(!validate_transition(LifecycleState::Pending, LifecycleState::Active));
        assert!(!validate_transition(LifecycleState::Suspended, LifecycleState::Pending));
    }
}
