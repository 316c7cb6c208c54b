//! Null-object and in-memory ledger-backed collaborator implementations.
//!
//! The null objects let a deployment run without a given downstream
//! system configured (e.g. no CoA server in a lab environment) without
//! every call site branching on `Option`. The ledger-backed fakes back
//! the integration tests under `tests/` with observable state.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{CoreError, Result};

use super::{
    AccessNodeManager, BillingService, CoaClient, CoaOutcome, CpeManager, IpamAllocation, IpamClient,
    RadiusAccountManager,
};

/// Always reports unconfigured; every call is a permanent error so a
/// caller that forgets the `is_configured()` guard fails loudly.
pub struct NullIpamClient;

#[async_trait]
impl IpamClient for NullIpamClient {
    fn is_configured(&self) -> bool {
        false
    }

    async fn allocate_ipv4(&self, _: &str, _: Option<&str>, _: Option<&str>) -> Result<IpamAllocation> {
        Err(CoreError::Permanent("no IPAM collaborator configured".into()))
    }

    async fn release_ipv4(&self, _: &str) -> Result<()> {
        Err(CoreError::Permanent("no IPAM collaborator configured".into()))
    }

    async fn allocate_ipv6_prefix(&self, _: &str, _: u8, _: &str) -> Result<IpamAllocation> {
        Err(CoreError::Permanent("no IPAM collaborator configured".into()))
    }

    async fn release_ipv6_prefix(&self, _: &str) -> Result<()> {
        Err(CoreError::Permanent("no IPAM collaborator configured".into()))
    }
}

pub struct NullCoaClient;

#[async_trait]
impl CoaClient for NullCoaClient {
    fn is_configured(&self) -> bool {
        false
    }

    async fn update_ipv4_address(&self, _: &str, _: &str, _: Option<&str>) -> Result<CoaOutcome> {
        Ok(CoaOutcome { success: false, message: "no CoA collaborator configured".into() })
    }

    async fn update_ipv6_prefix(&self, _: &str, _: &str, _: Option<&str>) -> Result<CoaOutcome> {
        Ok(CoaOutcome { success: false, message: "no CoA collaborator configured".into() })
    }

    async fn disconnect_session(&self, _: &str, _: Option<&str>) -> Result<CoaOutcome> {
        Ok(CoaOutcome { success: false, message: "no CoA collaborator configured".into() })
    }
}

pub struct NullAccessNodeManager;

#[async_trait]
impl AccessNodeManager for NullAccessNodeManager {
    fn is_configured(&self) -> bool {
        false
    }

    async fn activate_onu(&self, _: &str, _: Option<i32>) -> Result<String> {
        Err(CoreError::Permanent("no access node collaborator configured".into()))
    }

    async fn deactivate_onu(&self, _: &str) -> Result<()> {
        Err(CoreError::Permanent("no access node collaborator configured".into()))
    }
}

pub struct NullCpeManager;

#[async_trait]
impl CpeManager for NullCpeManager {
    fn is_configured(&self) -> bool {
        false
    }

    async fn configure_wan(&self, _: &str, _: Option<&str>, _: Option<&str>) -> Result<()> {
        Err(CoreError::Permanent("no CPE collaborator configured".into()))
    }

    async fn deconfigure_wan(&self, _: &str) -> Result<()> {
        Err(CoreError::Permanent("no CPE collaborator configured".into()))
    }
}

pub struct NullRadiusAccountManager;

#[async_trait]
impl RadiusAccountManager for NullRadiusAccountManager {
    fn is_configured(&self) -> bool {
        false
    }

    async fn create_account(&self, _: &str, _: &str) -> Result<String> {
        Err(CoreError::Permanent("no RADIUS collaborator configured".into()))
    }

    async fn delete_account(&self, _: &str) -> Result<()> {
        Err(CoreError::Permanent("no RADIUS collaborator configured".into()))
    }

    async fn enable_account(&self, _: &str) -> Result<()> {
        Err(CoreError::Permanent("no RADIUS collaborator configured".into()))
    }

    async fn disable_account(&self, _: &str) -> Result<()> {
        Err(CoreError::Permanent("no RADIUS collaborator configured".into()))
    }
}

pub struct NullBillingService;

#[async_trait]
impl BillingService for NullBillingService {
    fn is_configured(&self) -> bool {
        false
    }

    async fn create_service_record(&self, _: &str, _: &str, _: HashMap<String, Value>) -> Result<String> {
        Err(CoreError::Permanent("no billing collaborator configured".into()))
    }

    async fn cancel_service_record(&self, _: &str) -> Result<()> {
        Err(CoreError::Permanent("no billing collaborator configured".into()))
    }

    async fn suspend_service_record(&self, _: &str) -> Result<()> {
        Err(CoreError::Permanent("no billing collaborator configured".into()))
    }

    async fn resume_service_record(&self, _: &str) -> Result<()> {
        Err(CoreError::Permanent("no billing collaborator configured".into()))
    }
}

/// In-memory IPAM fake that hands out sequential addresses and records
/// every allocation/release so tests can assert on the ledger.
pub struct FakeIpamClient {
    next_ipv4: AtomicU64,
    next_ipv6: AtomicU64,
    pub ledger: Mutex<Vec<String>>,
}

impl FakeIpamClient {
    pub fn new() -> Self {
        Self {
            next_ipv4: AtomicU64::new(10),
            next_ipv6: AtomicU64::new(1),
            ledger: Mutex::new(Vec::new()),
        }
    }
}

impl Default for FakeIpamClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IpamClient for FakeIpamClient {
    async fn allocate_ipv4(
        &self,
        tenant_id: &str,
        _pool_id: Option<&str>,
        requested_address: Option<&str>,
    ) -> Result<IpamAllocation> {
        let address = match requested_address {
            Some(addr) => addr.to_string(),
            None => {
                let n = self.next_ipv4.fetch_add(1, Ordering::SeqCst);
                format!("198.51.100.{}", n)
            }
        };
        let record_id = format!("ipam-v4-{}", uuid::Uuid::new_v4());
        self.ledger.lock().unwrap().push(format!("allocate_ipv4 {tenant_id} {address}"));
        Ok(IpamAllocation { address, record_id })
    }

    async fn release_ipv4(&self, record_id: &str) -> Result<()> {
        self.ledger.lock().unwrap().push(format!("release_ipv4 {record_id}"));
        Ok(())
    }

    async fn allocate_ipv6_prefix(&self, tenant_id: &str, prefix_length: u8, description: &str) -> Result<IpamAllocation> {
        let n = self.next_ipv6.fetch_add(1, Ordering::SeqCst);
        let address = format!("2001:db8:{:x}::/{}", n, prefix_length);
        let record_id = format!("ipam-v6-{}", uuid::Uuid::new_v4());
        self.ledger
            .lock()
            .unwrap()
            .push(format!("allocate_ipv6_prefix {tenant_id} {address} {description}"));
        Ok(IpamAllocation { address, record_id })
    }

    async fn release_ipv6_prefix(&self, record_id: &str) -> Result<()> {
        self.ledger.lock().unwrap().push(format!("release_ipv6_prefix {record_id}"));
        Ok(())
    }
}

/// In-memory CoA fake: always succeeds, records every call.
pub struct FakeCoaClient {
    pub ledger: Mutex<Vec<String>>,
}

impl FakeCoaClient {
    pub fn new() -> Self {
        Self { ledger: Mutex::new(Vec::new()) }
    }
}

impl Default for FakeCoaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoaClient for FakeCoaClient {
    async fn update_ipv4_address(&self, username: &str, address: &str, _nas_ip: Option<&str>) -> Result<CoaOutcome> {
        self.ledger.lock().unwrap().push(format!("coa_ipv4 {username} {address}"));
        Ok(CoaOutcome { success: true, message: "ok".into() })
    }

    async fn update_ipv6_prefix(&self, username: &str, delegated_prefix: &str, _nas_ip: Option<&str>) -> Result<CoaOutcome> {
        self.ledger.lock().unwrap().push(format!("coa_ipv6 {username} {delegated_prefix}"));
        Ok(CoaOutcome { success: true, message: "ok".into() })
    }

    async fn disconnect_session(&self, username: &str, _nas_ip: Option<&str>) -> Result<CoaOutcome> {
        self.ledger.lock().unwrap().push(format!("disconnect {username}"));
        Ok(CoaOutcome { success: true, message: "ok".into() })
    }
}

/// In-memory RADIUS account fake.
pub struct FakeRadiusAccountManager {
    pub ledger: Mutex<Vec<String>>,
}

impl FakeRadiusAccountManager {
    pub fn new() -> Self {
        Self { ledger: Mutex::new(Vec::new()) }
    }
}

impl Default for FakeRadiusAccountManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadiusAccountManager for FakeRadiusAccountManager {
    async fn create_account(&self, subscriber_id: &str, username: &str) -> Result<String> {
        let record_id = format!("radius-{}", uuid::Uuid::new_v4());
        self.ledger.lock().unwrap().push(format!("create_account {subscriber_id} {username}"));
        Ok(record_id)
    }

    async fn delete_account(&self, record_id: &str) -> Result<()> {
        self.ledger.lock().unwrap().push(format!("delete_account {record_id}"));
        Ok(())
    }

    async fn enable_account(&self, record_id: &str) -> Result<()> {
        self.ledger.lock().unwrap().push(format!("enable_account {record_id}"));
        Ok(())
    }

    async fn disable_account(&self, record_id: &str) -> Result<()> {
        self.ledger.lock().unwrap().push(format!("disable_account {record_id}"));
        Ok(())
    }
}

/// In-memory access-node (ONU/OLT) fake.
pub struct FakeAccessNodeManager {
    pub ledger: Mutex<Vec<String>>,
    pub fail_activate: bool,
}

impl FakeAccessNodeManager {
    pub fn new() -> Self {
        Self { ledger: Mutex::new(Vec::new()), fail_activate: false }
    }

    pub fn failing() -> Self {
        Self { ledger: Mutex::new(Vec::new()), fail_activate: true }
    }
}

impl Default for FakeAccessNodeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccessNodeManager for FakeAccessNodeManager {
    async fn activate_onu(&self, subscriber_id: &str, vlan_id: Option<i32>) -> Result<String> {
        if self.fail_activate {
            return Err(CoreError::Permanent("ONU activation rejected by access node".into()));
        }
        let device_id = format!("onu-{}", uuid::Uuid::new_v4());
        self.ledger
            .lock()
            .unwrap()
            .push(format!("activate_onu {subscriber_id} vlan={vlan_id:?}"));
        Ok(device_id)
    }

    async fn deactivate_onu(&self, device_id: &str) -> Result<()> {
        self.ledger.lock().unwrap().push(format!("deactivate_onu {device_id}"));
        Ok(())
    }
}

/// In-memory CPE (GenieACS-shaped) fake. `fail_configure` lets tests
/// drive the "compensating provisioning" scenario where CPE
/// configuration fails with a permanent error.
pub struct FakeCpeManager {
    pub ledger: Mutex<Vec<String>>,
    pub fail_configure: bool,
}

impl FakeCpeManager {
    pub fn new() -> Self {
        Self { ledger: Mutex::new(Vec::new()), fail_configure: false }
    }

    pub fn failing() -> Self {
        Self { ledger: Mutex::new(Vec::new()), fail_configure: true }
    }
}

impl Default for FakeCpeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CpeManager for FakeCpeManager {
    async fn configure_wan(&self, subscriber_id: &str, ipv4: Option<&str>, ipv6: Option<&str>) -> Result<()> {
        if self.fail_configure {
            return Err(CoreError::Permanent("CPE rejected WAN configuration".into()));
        }
        self.ledger
            .lock()
            .unwrap()
            .push(format!("configure_wan {subscriber_id} ipv4={ipv4:?} ipv6={ipv6:?}"));
        Ok(())
    }

    async fn deconfigure_wan(&self, subscriber_id: &str) -> Result<()> {
        self.ledger.lock().unwrap().push(format!("deconfigure_wan {subscriber_id}"));
        Ok(())
    }
}

/// In-memory billing fake.
pub struct FakeBillingService {
    pub ledger: Mutex<Vec<String>>,
}

impl FakeBillingService {
    pub fn new() -> Self {
        Self { ledger: Mutex::new(Vec::new()) }
    }
}

impl Default for FakeBillingService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BillingService for FakeBillingService {
    async fn create_service_record(&self, subscriber_id: &str, plan_id: &str, _metadata: HashMap<String, Value>) -> Result<String> {
        let record_id = format!("billing-{}", uuid::Uuid::new_v4());
        self.ledger
            .lock()
            .unwrap()
            .push(format!("create_service_record {subscriber_id} {plan_id}"));
        Ok(record_id)
    }

    async fn cancel_service_record(&self, record_id: &str) -> Result<()> {
        self.ledger.lock().unwrap().push(format!("cancel_service_record {record_id}"));
        Ok(())
    }

    async fn suspend_service_record(&self, record_id: &str) -> Result<()> {
        self.ledger.lock().unwrap().push(format!("suspend_service_record {record_id}"));
        Ok(())
    }

    async fn resume_service_record(&self, record_id: &str) -> Result<()> {
        self.ledger.lock().unwrap().push(format!("resume_service_record {record_id}"));
        Ok(())
    }
}
