//! Forward handlers for the `suspend_service` workflow: the mirror
//! image of `activate` across billing, RADIUS, both address families,
//! the access node and CPE.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::lifecycle::{LifecycleState, SuspendRequest};
use crate::model::SuspensionType;

use super::{Collaborators, ForwardHandler, HandlerRegistry, StepContext, StepOutcome};

pub fn register(registry: &mut HandlerRegistry, c: Arc<Collaborators>) {
    registry.register_step("verify", Arc::new(Verify { c: c.clone() }));
    registry.register_step("suspend_billing", Arc::new(SuspendBilling { c: c.clone() }));
    registry.register_step("disable_radius", Arc::new(DisableRadius { c: c.clone() }));
    registry.register_step("disable_onu", Arc::new(DisableOnu { c: c.clone() }));
    registry.register_step("disable_cpe", Arc::new(DisableCpe { c: c.clone() }));
    registry.register_step("set_status_suspended", Arc::new(SetStatusSuspended { c }));
}

struct Verify {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for Verify {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let profile = self
            .c
            .profiles
            .get_profile(&ctx.subscriber_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("network profile {}", ctx.subscriber_id)))?;
        if profile.ipv4_state != LifecycleState::Active && profile.ipv6_state != LifecycleState::Active {
            return Err(CoreError::BusinessRule("service has no active address to suspend".into()));
        }
        Ok(StepOutcome::default())
    }
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

struct DisableRadius {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for DisableRadius {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let record_id = ctx.require_str("radius_record_id")?;
        self.c.radius.disable_account(record_id).await?;
        Ok(StepOutcome::default())
    }
}

struct DisableOnu {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for DisableOnu {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let username = ctx.get_str("username").map(|s| s.to_string());
        let req = SuspendRequest {
            subscriber_id: ctx.subscriber_id.clone(),
            tenant_id: ctx.tenant_id.clone(),
            username,
            send_coa: true,
            ..Default::default()
        };
        if let Some(state) = self.c.ipv4.get_state(&ctx.subscriber_id).await? {
            if state.state == LifecycleState::Active {
                self.c.ipv4.suspend(req.clone(), true).await?;
            }
        }
        if let Some(state) = self.c.ipv6.get_state(&ctx.subscriber_id).await? {
            if state.state == LifecycleState::Active {
                self.c.ipv6.suspend(req, true).await?;
            }
        }
        Ok(StepOutcome::default())
    }
}

struct DisableCpe {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for DisableCpe {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        self.c.cpe.deconfigure_wan(&ctx.subscriber_id).await?;
        Ok(StepOutcome::default())
    }
}

struct SetStatusSuspended {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for SetStatusSuspended {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let mut service = self
            .c
            .services
            .get_service_by_subscriber(&ctx.subscriber_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("service instance for subscriber {}", ctx.subscriber_id)))?;
        let suspension_type = match ctx.get_str("suspension_type") {
            Some("fraud") => SuspensionType::Fraud,
            Some("non_payment") => SuspensionType::NonPayment,
            _ => SuspensionType::Other,
        };
        service.state = suspension_type.to_state();
        service.reason = Some(ctx.get_str("suspension_reason").unwrap_or("suspended via saga").to_string());
        service.suspended_at = Some(chrono::Utc::now());
        service.updated_at = chrono::Utc::now();
        self.c.services.save_service(&service).await?;

        let mut outcome = StepOutcome::default();
        outcome.output_data.insert("status".into(), json!("suspended"));
        Ok(outcome)
    }
}
