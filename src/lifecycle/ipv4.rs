//! IPv4 address lifecycle machine: allocation from an IPAM pool (or a
//! pre-configured static address when no IPAM collaborator is
//! attached), RADIUS CoA on activate/suspend/reactivate, and release
//! back to the pool on revoke.

use async_trait::async_trait;
use std::sync::Arc;

use crate::collaborators::{CoaClient, IpamClient};
use crate::error::{CoreError, Result};
use crate::lifecycle::{
    validate_transition, ActivateRequest, AddressLifecycle, AllocateRequest, LifecycleError,
    LifecycleResult, LifecycleState, ReactivateRequest, RevokeRequest, SuspendRequest,
};
use crate::model::SubscriberNetworkProfile;
use crate::repository::ProfileRepository;

pub struct Ipv4LifecycleMachine {
    profiles: Arc<dyn ProfileRepository>,
    ipam: Arc<dyn IpamClient>,
    coa: Arc<dyn CoaClient>,
}

impl Ipv4LifecycleMachine {
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        ipam: Arc<dyn IpamClient>,
        coa: Arc<dyn CoaClient>,
    ) -> Self {
        Self { profiles, ipam, coa }
    }

    async fn load_or_create(&self, subscriber_id: &str, tenant_id: &str) -> Result<SubscriberNetworkProfile> {
        match self.profiles.get_profile(subscriber_id).await? {
            Some(profile) => Ok(profile),
            None => Ok(SubscriberNetworkProfile::new(subscriber_id, tenant_id)),
        }
    }

    fn require_transition(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        if !validate_transition(from, to) {
            return Err(LifecycleError::InvalidTransition { from, to }.into());
        }
        Ok(())
    }

    fn result_from(profile: &SubscriberNetworkProfile) -> LifecycleResult {
        LifecycleResult {
            success: true,
            state: profile.ipv4_state,
            address: profile.ipv4_address.clone(),
            subscriber_id: profile.subscriber_id.clone(),
            tenant_id: profile.tenant_id.clone(),
            allocated_at: None,
            activated_at: None,
            suspended_at: None,
            revoked_at: None,
            metadata: Default::default(),
        }
    }
}

#[async_trait]
impl AddressLifecycle for Ipv4LifecycleMachine {
    async fn allocate(&self, req: AllocateRequest, commit: bool) -> Result<LifecycleResult> {
        let mut profile = self.load_or_create(&req.subscriber_id, &req.tenant_id).await?;
        self.require_transition(profile.ipv4_state, LifecycleState::Allocated)?;

        let (address, record_id) = if self.ipam.is_configured() {
            let allocation = self
                .ipam
                .allocate_ipv4(&req.tenant_id, req.pool_id.as_deref(), req.requested_address.as_deref())
                .await
                .map_err(|e| LifecycleError::Allocation(e.to_string()))?;
            (allocation.address, Some(allocation.record_id))
        } else {
            match req.requested_address {
                Some(addr) => (addr, None),
                None => {
                    return Err(LifecycleError::Allocation(
                        "no IPAM collaborator configured and no static address supplied".into(),
                    )
                    .into())
                }
            }
        };

        profile.ipv4_state = LifecycleState::Allocated;
        profile.ipv4_address = Some(address);
        profile.ipv4_pool_id = req.pool_id;
        profile.ipv4_record_id = record_id;
        profile.updated_at = chrono::Utc::now();
        profile.allocated_at = Some(profile.updated_at);

        let mut result = Self::result_from(&profile);
        result.allocated_at = Some(profile.updated_at);

        if commit {
            self.profiles.save_profile(&profile).await?;
        }
        Ok(result)
    }

    async fn activate(&self, req: ActivateRequest, commit: bool) -> Result<LifecycleResult> {
        let mut profile = self
            .profiles
            .get_profile(&req.subscriber_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("network profile {}", req.subscriber_id)))?;
        self.require_transition(profile.ipv4_state, LifecycleState::Active)?;

        if req.send_coa && self.coa.is_configured() {
            if let (Some(username), Some(address)) = (req.username.as_deref(), profile.ipv4_address.as_deref()) {
                if let Err(e) = self.coa.update_ipv4_address(username, address, req.nas_ip.as_deref()).await {
                    tracing::warn!(subscriber_id = %req.subscriber_id, error = %e, "ipv4 CoA update on activate failed, continuing");
                }
            }
        }

        profile.ipv4_state = LifecycleState::Active;
        profile.updated_at = chrono::Utc::now();
        profile.activated_at = Some(profile.updated_at);
        let mut result = Self::result_from(&profile);
        result.activated_at = Some(profile.updated_at);

        if commit {
            self.profiles.save_profile(&profile).await?;
        }
        Ok(result)
    }

    async fn suspend(&self, req: SuspendRequest, commit: bool) -> Result<LifecycleResult> {
        let mut profile = self
            .profiles
            .get_profile(&req.subscriber_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("network profile {}", req.subscriber_id)))?;
        self.require_transition(profile.ipv4_state, LifecycleState::Suspended)?;

        if req.send_coa && self.coa.is_configured() {
            if let Some(username) = req.username.as_deref() {
                if let Err(e) = self.coa.disconnect_session(username, req.nas_ip.as_deref()).await {
                    tracing::warn!(subscriber_id = %req.subscriber_id, error = %e, "ipv4 CoA disconnect on suspend failed, continuing");
                }
            }
        }

        profile.ipv4_state = LifecycleState::Suspended;
        profile.updated_at = chrono::Utc::now();
        profile.suspended_at = Some(profile.updated_at);
        let mut result = Self::result_from(&profile);
        result.suspended_at = Some(profile.updated_at);

        if commit {
            self.profiles.save_profile(&profile).await?;
        }
        Ok(result)
    }

    async fn reactivate(&self, req: ReactivateRequest, commit: bool) -> Result<LifecycleResult> {
        let mut profile = self
            .profiles
            .get_profile(&req.subscriber_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("network profile {}", req.subscriber_id)))?;
        self.require_transition(profile.ipv4_state, LifecycleState::Active)?;

        if req.send_coa && self.coa.is_configured() {
            if let (Some(username), Some(address)) = (req.username.as_deref(), profile.ipv4_address.as_deref()) {
                if let Err(e) = self.coa.update_ipv4_address(username, address, req.nas_ip.as_deref()).await {
                    tracing::warn!(subscriber_id = %req.subscriber_id, error = %e, "ipv4 CoA update on reactivate failed, continuing");
                }
            }
        }

        profile.ipv4_state = LifecycleState::Active;
        profile.updated_at = chrono::Utc::now();
        profile.activated_at = Some(profile.updated_at);
        let mut result = Self::result_from(&profile);
        result.activated_at = Some(profile.updated_at);

        if commit {
            self.profiles.save_profile(&profile).await?;
        }
        Ok(result)
    }

    async fn revoke(&self, req: RevokeRequest, commit: bool) -> Result<LifecycleResult> {
        let mut profile = self
            .profiles
            .get_profile(&req.subscriber_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("network profile {}", req.subscriber_id)))?;
        if profile.ipv4_state == LifecycleState::Revoked {
            return Ok(Self::result_from(&profile));
        }
        self.require_transition(profile.ipv4_state, LifecycleState::Revoking)?;
        profile.ipv4_state = LifecycleState::Revoking;

        if req.send_disconnect && self.coa.is_configured() {
            if let Some(username) = req.username.as_deref() {
                if let Err(e) = self.coa.disconnect_session(username, req.nas_ip.as_deref()).await {
                    tracing::warn!(subscriber_id = %req.subscriber_id, error = %e, "ipv4 CoA disconnect on revoke failed, continuing");
                }
            }
        }

        if req.release_to_pool && self.ipam.is_configured() {
            if let Some(record_id) = profile.ipv4_record_id.take() {
                if let Err(e) = self.ipam.release_ipv4(&record_id).await {
                    tracing::warn!(subscriber_id = %req.subscriber_id, error = %e, "ipv4 IPAM release on revoke failed, continuing");
                }
            }
        }

        self.require_transition(LifecycleState::Revoking, LifecycleState::Revoked)?;
        profile.ipv4_state = LifecycleState::Revoked;
        profile.ipv4_address = None;
        profile.updated_at = chrono::Utc::now();
        profile.revoked_at = Some(profile.updated_at);
        let mut result = Self::result_from(&profile);
        result.revoked_at = Some(profile.updated_at);

        if commit {
            self.profiles.save_profile(&profile).await?;
        }
        Ok(result)
    }

    async fn get_state(&self, subscriber_id: &str) -> Result<Option<LifecycleResult>> {
        Ok(self.profiles.get_profile(subscriber_id).await?.map(|p| Self::result_from(&p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::{FakeCoaClient, FakeIpamClient};
    use crate::repository::InMemoryProfileRepository;

    fn machine() -> Ipv4LifecycleMachine {
        Ipv4LifecycleMachine::new(
            Arc::new(InMemoryProfileRepository::new()),
            Arc::new(FakeIpamClient::new()),
            Arc::new(FakeCoaClient::new()),
        )
    }

    #[tokio::test]
    async fn allocate_then_activate_then_suspend_then_revoke() {
        let m = machine();
        let req = AllocateRequest {
            subscriber_id: "sub-1".into(),
            tenant_id: "tenant-1".into(),
            ..Default::default()
        };
        let allocated = m.allocate(req, true).await.unwrap();
        assert_eq!(allocated.state, LifecycleState::Allocated);
        assert!(allocated.address.is_some());

        let activated = m
            .activate(
                ActivateRequest {
                    subscriber_id: "sub-1".into(),
                    tenant_id: "tenant-1".into(),
                    username: Some("sub-1@isp".into()),
                    send_coa: true,
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(activated.state, LifecycleState::Active);

        let suspended = m
            .suspend(
                SuspendRequest {
                    subscriber_id: "sub-1".into(),
                    tenant_id: "tenant-1".into(),
                    username: Some("sub-1@isp".into()),
                    send_coa: true,
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(suspended.state, LifecycleState::Suspended);

        let revoked = m
            .revoke(
                RevokeRequest {
                    subscriber_id: "sub-1".into(),
                    tenant_id: "tenant-1".into(),
                    release_to_pool: true,
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(revoked.state, LifecycleState::Revoked);
        assert!(revoked.address.is_none());
    }

    #[tokio::test]
    async fn activate_without_allocation_is_rejected() {
        let m = machine();
        let err = m
            .activate(
                ActivateRequest {
                    subscriber_id: "sub-missing".into(),
                    tenant_id: "tenant-1".into(),
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn dry_run_does_not_persist() {
        let m = machine();
        let req = AllocateRequest {
            subscriber_id: "sub-2".into(),
            tenant_id: "tenant-1".into(),
            ..Default::default()
        };
        m.allocate(req, false).await.unwrap();
        assert!(m.get_state("sub-2").await.unwrap().is_none());
    }
}
