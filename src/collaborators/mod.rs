//! External system collaborators: IPAM, RADIUS CoA/Disconnect, access
//! node (OLT/ONU) management, CPE provisioning, and billing.
//!
//! Every trait carries an `is_configured()` capability check with a
//! default `true` implementation, so a machine branches on capability
//! rather than on `Option<Arc<dyn Trait>>` — the null-object
//! implementations in `fakes` override it to `false`.

pub mod fakes;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;

/// An address or prefix record allocated by IPAM.
#[derive(Debug, Clone)]
pub struct IpamAllocation {
    pub address: String,
    pub record_id: String,
}

#[async_trait]
pub trait IpamClient: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }

    async fn allocate_ipv4(
        &self,
        tenant_id: &str,
        pool_id: Option<&str>,
        requested_address: Option<&str>,
    ) -> Result<IpamAllocation>;

    async fn release_ipv4(&self, record_id: &str) -> Result<()>;

    async fn allocate_ipv6_prefix(
        &self,
        tenant_id: &str,
        prefix_length: u8,
        description: &str,
    ) -> Result<IpamAllocation>;

    async fn release_ipv6_prefix(&self, record_id: &str) -> Result<()>;
}

/// Outcome of a RADIUS Change-of-Authorization or Disconnect-Message.
#[derive(Debug, Clone)]
pub struct CoaOutcome {
    pub success: bool,
    pub message: String,
}

#[async_trait]
pub trait CoaClient: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }

    async fn update_ipv4_address(
        &self,
        username: &str,
        address: &str,
        nas_ip: Option<&str>,
    ) -> Result<CoaOutcome>;

    async fn update_ipv6_prefix(
        &self,
        username: &str,
        delegated_prefix: &str,
        nas_ip: Option<&str>,
    ) -> Result<CoaOutcome>;

    async fn disconnect_session(&self, username: &str, nas_ip: Option<&str>) -> Result<CoaOutcome>;
}

/// ONU/OLT access node management (VOLTHA-shaped in the original system).
#[async_trait]
pub trait AccessNodeManager: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }

    async fn activate_onu(&self, subscriber_id: &str, vlan_id: Option<i32>) -> Result<String>;
    async fn deactivate_onu(&self, device_id: &str) -> Result<()>;
}

/// CPE (customer premises equipment) WAN configuration (GenieACS-shaped).
#[async_trait]
pub trait CpeManager: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }

    async fn configure_wan(
        &self,
        subscriber_id: &str,
        ipv4_address: Option<&str>,
        ipv6_prefix: Option<&str>,
    ) -> Result<()>;

    async fn deconfigure_wan(&self, subscriber_id: &str) -> Result<()>;
}

/// RADIUS subscriber account provisioning (distinct from the CoA/DM
/// signalling in `CoaClient`, which targets an already-provisioned
/// session).
#[async_trait]
pub trait RadiusAccountManager: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }

    async fn create_account(&self, subscriber_id: &str, username: &str) -> Result<String>;
    async fn delete_account(&self, record_id: &str) -> Result<()>;
    async fn enable_account(&self, record_id: &str) -> Result<()>;
    async fn disable_account(&self, record_id: &str) -> Result<()>;
}

/// Billing system service-record management.
#[async_trait]
pub trait BillingService: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }

    async fn create_service_record(
        &self,
        subscriber_id: &str,
        plan_id: &str,
        metadata: HashMap<String, Value>,
    ) -> Result<String>;

    async fn cancel_service_record(&self, record_id: &str) -> Result<()>;
    async fn suspend_service_record(&self, record_id: &str) -> Result<()>;
    async fn resume_service_record(&self, record_id: &str) -> Result<()>;
}
