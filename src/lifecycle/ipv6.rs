//! IPv6 prefix lifecycle machine. Mirrors `ipv4`'s state machine over
//! a delegated prefix instead of a single address, and (per the
//! original `IPv6LifecycleService.revoke`) treats the RADIUS
//! disconnect and the IPAM prefix release on revoke as independently
//! toggleable, since a service termination may want to disconnect the
//! session without releasing the prefix back to the pool yet.

use async_trait::async_trait;
use std::sync::Arc;

const DEFAULT_PREFIX_LENGTH: u8 = 56;
const MIN_PREFIX_LENGTH: u8 = 48;
const MAX_PREFIX_LENGTH: u8 = 64;

use crate::collaborators::{CoaClient, IpamClient};
use crate::error::{CoreError, Result};
use crate::lifecycle::{
    validate_transition, ActivateRequest, AddressLifecycle, AllocateRequest, LifecycleError,
    LifecycleResult, LifecycleState, ReactivateRequest, RevokeRequest, SuspendRequest,
};
use crate::model::SubscriberNetworkProfile;
use crate::repository::ProfileRepository;

pub struct Ipv6LifecycleMachine {
    profiles: Arc<dyn ProfileRepository>,
    ipam: Arc<dyn IpamClient>,
    coa: Arc<dyn CoaClient>,
}

impl Ipv6LifecycleMachine {
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
            state: profile.ipv6_state,
            address: profile.ipv6_prefix.clone(),
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
impl AddressLifecycle for Ipv6LifecycleMachine {
    async fn allocate(&self, req: AllocateRequest, commit: bool) -> Result<LifecycleResult> {
        let mut profile = self.load_or_create(&req.subscriber_id, &req.tenant_id).await?;
        self.require_transition(profile.ipv6_state, LifecycleState::Allocated)?;
        if !profile.ipv6_assignment_mode.allows_allocation() {
            return Err(LifecycleError::Allocation(format!(
                "ipv6_assignment_mode {:?} does not permit prefix allocation",
                profile.ipv6_assignment_mode
            ))
            .into());
        }

        let prefix_length = req
            .prefix_length
            .unwrap_or(DEFAULT_PREFIX_LENGTH)
            .clamp(MIN_PREFIX_LENGTH, MAX_PREFIX_LENGTH);

        let (prefix, record_id) = if self.ipam.is_configured() {
            let allocation = self
                .ipam
                .allocate_ipv6_prefix(&req.tenant_id, prefix_length, &format!("subscriber {}", req.subscriber_id))
                .await
                .map_err(|e| LifecycleError::Allocation(e.to_string()))?;
            (allocation.address, Some(allocation.record_id))
        } else {
            match req.requested_address {
                Some(prefix) => (prefix, None),
                None => {
                    return Err(LifecycleError::Allocation(
                        "no IPAM collaborator configured and no static prefix supplied".into(),
                    )
                    .into())
                }
            }
        };

        profile.ipv6_state = LifecycleState::Allocated;
        profile.ipv6_prefix = Some(prefix);
        profile.ipv6_prefix_length = Some(prefix_length);
        profile.ipv6_record_id = record_id;
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
        self.require_transition(profile.ipv6_state, LifecycleState::Active)?;

        if req.send_coa && self.coa.is_configured() {
            if let (Some(username), Some(prefix)) = (req.username.as_deref(), profile.ipv6_prefix.as_deref()) {
                if let Err(e) = self.coa.update_ipv6_prefix(username, prefix, req.nas_ip.as_deref()).await {
                    tracing::warn!(subscriber_id = %req.subscriber_id, error = %e, "ipv6 CoA update on activate failed, continuing");
                }
            }
        }

        profile.ipv6_state = LifecycleState::Active;
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
        self.require_transition(profile.ipv6_state, LifecycleState::Suspended)?;

        if req.send_coa && self.coa.is_configured() {
            if let Some(username) = req.username.as_deref() {
                if let Err(e) = self.coa.disconnect_session(username, req.nas_ip.as_deref()).await {
                    tracing::warn!(subscriber_id = %req.subscriber_id, error = %e, "ipv6 CoA disconnect on suspend failed, continuing");
                }
            }
        }

        profile.ipv6_state = LifecycleState::Suspended;
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
        self.require_transition(profile.ipv6_state, LifecycleState::Active)?;

        if req.send_coa && self.coa.is_configured() {
            if let (Some(username), Some(prefix)) = (req.username.as_deref(), profile.ipv6_prefix.as_deref()) {
                if let Err(e) = self.coa.update_ipv6_prefix(username, prefix, req.nas_ip.as_deref()).await {
                    tracing::warn!(subscriber_id = %req.subscriber_id, error = %e, "ipv6 CoA update on reactivate failed, continuing");
                }
            }
        }

        profile.ipv6_state = LifecycleState::Active;
        profile.updated_at = chrono::Utc::now();
        profile.activated_at = Some(profile.updated_at);
        let mut result = Self::result_from(&profile);
        result.activated_at = Some(profile.updated_at);

        if commit {
            self.profiles.save_profile(&profile).await?;
        }
        Ok(result)
    }

    /// Revoke treats disconnect and pool release as independent flags:
    /// a service termination can disconnect the RADIUS session
    /// immediately while deferring the prefix release to a later
    /// cleanup pass (e.g. to honor a grace period before reuse).
    async fn revoke(&self, req: RevokeRequest, commit: bool) -> Result<LifecycleResult> {
        let mut profile = self
            .profiles
            .get_profile(&req.subscriber_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("network profile {}", req.subscriber_id)))?;
        if profile.ipv6_state == LifecycleState::Revoked {
            return Ok(Self::result_from(&profile));
        }
        self.require_transition(profile.ipv6_state, LifecycleState::Revoking)?;
        profile.ipv6_state = LifecycleState::Revoking;

        if req.send_disconnect && self.coa.is_configured() {
            if let Some(username) = req.username.as_deref() {
                if let Err(e) = self.coa.disconnect_session(username, req.nas_ip.as_deref()).await {
                    tracing::warn!(subscriber_id = %req.subscriber_id, error = %e, "ipv6 CoA disconnect on revoke failed, continuing");
                }
            }
        }

        if req.release_to_pool && self.ipam.is_configured() {
            if let Some(record_id) = profile.ipv6_record_id.take() {
                if let Err(e) = self.ipam.release_ipv6_prefix(&record_id).await {
                    tracing::warn!(subscriber_id = %req.subscriber_id, error = %e, "ipv6 IPAM release on revoke failed, continuing");
                }
            }
        }

        self.require_transition(LifecycleState::Revoking, LifecycleState::Revoked)?;
        profile.ipv6_state = LifecycleState::Revoked;
        if req.release_to_pool {
            profile.ipv6_prefix = None;
        }
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

    fn machine() -> Ipv6LifecycleMachine {
        Ipv6LifecycleMachine::new(
            Arc::new(InMemoryProfileRepository::new()),
            Arc::new(FakeIpamClient::new()),
            Arc::new(FakeCoaClient::new()),
        )
    }

    #[tokio::test]
    async fn allocate_uses_default_prefix_length() {
        let m = machine();
        let result = m
            .allocate(
                AllocateRequest {
                    subscriber_id: "sub-1".into(),
                    tenant_id: "tenant-1".into(),
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(result.state, LifecycleState::Allocated);
        assert!(result.address.unwrap().ends_with("/56"));
    }

    #[tokio::test]
    async fn revoke_can_disconnect_without_releasing_prefix() {
        let m = machine();
        m.allocate(
            AllocateRequest {
                subscriber_id: "sub-1".into(),
                tenant_id: "tenant-1".into(),
                ..Default::default()
            },
            true,
        )
        .await
        .unwrap();

        let revoked = m
            .revoke(
                RevokeRequest {
                    subscriber_id: "sub-1".into(),
                    tenant_id: "tenant-1".into(),
                    username: Some("sub-1@isp".into()),
                    send_disconnect: true,
                    release_to_pool: false,
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(revoked.state, LifecycleState::Revoked);
        assert!(revoked.address.is_some(), "prefix retained when release_to_pool is false");
    }
}
