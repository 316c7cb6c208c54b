//! Forward handlers for the `deprovision_subscriber` workflow. This
//! runs the provisioning sequence in reverse as ordinary forward
//! steps (spec §4.F): a failed deprovision step is retried, not
//! rolled back, so none of these register a compensator.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::error::Result;
use crate::lifecycle::RevokeRequest;

use super::{Collaborators, ForwardHandler, HandlerRegistry, StepContext, StepOutcome};

pub fn register(registry: &mut HandlerRegistry, c: Arc<Collaborators>) {
    registry.register_step("suspend_billing", Arc::new(SuspendBilling { c: c.clone() }));
    registry.register_step("deactivate_onu", Arc::new(DeactivateOnu { c: c.clone() }));
    registry.register_step("unconfigure_cpe", Arc::new(UnconfigureCpe { c: c.clone() }));
    registry.register_step("release_ip", Arc::new(ReleaseIp { c: c.clone() }));
    registry.register_step("delete_radius", Arc::new(DeleteRadius { c: c.clone() }));
    registry.register_step("delete_network_profile", Arc::new(DeleteNetworkProfile { c: c.clone() }));
    registry.register_step("archive_subscriber", Arc::new(ArchiveSubscriber));
}

struct SuspendBilling {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for SuspendBilling {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let record_id = ctx.require_str("billing_record_id")?;
        self.c.billing.suspend_service_record(record_id).await?;
        Ok(StepOutcome::default())
    }
}

struct DeactivateOnu {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for DeactivateOnu {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let device_id = ctx.require_str("onu_id")?;
        self.c.access_node.deactivate_onu(device_id).await?;
        Ok(StepOutcome::default())
    }
}

struct UnconfigureCpe {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for UnconfigureCpe {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        self.c.cpe.deconfigure_wan(&ctx.subscriber_id).await?;
        Ok(StepOutcome::default())
    }
}

struct ReleaseIp {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for ReleaseIp {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let base = RevokeRequest {
            subscriber_id: ctx.subscriber_id.clone(),
            tenant_id: ctx.tenant_id.clone(),
            send_disconnect: true,
            release_to_pool: true,
            username: ctx.get_str("username").map(|s| s.to_string()),
            ..Default::default()
        };
        if let Some(state) = self.c.ipv4.get_state(&ctx.subscriber_id).await? {
            if state.address.is_some() {
                self.c.ipv4.revoke(base.clone(), true).await?;
            }
        }
        if let Some(state) = self.c.ipv6.get_state(&ctx.subscriber_id).await? {
            if state.address.is_some() {
                self.c.ipv6.revoke(base, true).await?;
            }
        }
        Ok(StepOutcome::default())
    }
}

struct DeleteRadius {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for DeleteRadius {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let record_id = ctx.require_str("radius_record_id")?;
        self.c.radius.delete_account(record_id).await?;
        Ok(StepOutcome::default())
    }
}

struct DeleteNetworkProfile {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for DeleteNetworkProfile {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        self.c.profiles.delete_profile(&ctx.subscriber_id).await?;
        Ok(StepOutcome::default())
    }
}

struct ArchiveSubscriber;

#[async_trait]
impl ForwardHandler for ArchiveSubscriber {
    async fn execute(&self, _ctx: &StepContext) -> Result<StepOutcome> {
        let mut outcome = StepOutcome::default();
        outcome.output_data.insert("archived".into(), json!(true));
        Ok(outcome)
    }
}

