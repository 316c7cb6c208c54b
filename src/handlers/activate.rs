//! Forward handlers for the `activate_service` workflow: reverses a
//! prior suspension across billing, RADIUS, both address families,
//! the access node and CPE, then flips the service status.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::lifecycle::{ReactivateRequest, LifecycleState};
use crate::model::ServiceState;

use super::{Collaborators, ForwardHandler, HandlerRegistry, StepContext, StepOutcome};

pub fn register(registry: &mut HandlerRegistry, c: Arc<Collaborators>) {
    registry.register_step("verify", Arc::new(Verify { c: c.clone() }));
    registry.register_step("activate_billing", Arc::new(ActivateBilling { c: c.clone() }));
    registry.register_step("enable_radius", Arc::new(EnableRadius { c: c.clone() }));
    registry.register_step("activate_onu", Arc::new(ActivateOnu { c: c.clone() }));
    registry.register_step("enable_cpe", Arc::new(EnableCpe { c: c.clone() }));
    registry.register_step("set_status_active", Arc::new(SetStatusActive { c }));
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
        if profile.ipv4_state != LifecycleState::Suspended && profile.ipv6_state != LifecycleState::Suspended {
            return Err(CoreError::BusinessRule(
                "service has no suspended address to reactivate".into(),
            ));
        }
        Ok(StepOutcome::default())
    }
}

struct ActivateBilling {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for ActivateBilling {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let record_id = ctx.require_str("billing_record_id")?;
        self.c.billing.resume_service_record(record_id).await?;
        Ok(StepOutcome::default())
    }
}

struct EnableRadius {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for EnableRadius {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let record_id = ctx.require_str("radius_record_id")?;
        self.c.radius.enable_account(record_id).await?;
        Ok(StepOutcome::default())
    }
}

struct ActivateOnu {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for ActivateOnu {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let username = ctx.get_str("username").map(|s| s.to_string());
        let req = ReactivateRequest {
            subscriber_id: ctx.subscriber_id.clone(),
            tenant_id: ctx.tenant_id.clone(),
            username,
            send_coa: true,
            ..Default::default()
        };
        if let Some(state) = self.c.ipv4.get_state(&ctx.subscriber_id).await? {
            if state.state == LifecycleState::Suspended {
                self.c.ipv4.reactivate(req.clone(), true).await?;
            }
        }
        if let Some(state) = self.c.ipv6.get_state(&ctx.subscriber_id).await? {
            if state.state == LifecycleState::Suspended {
                self.c.ipv6.reactivate(req, true).await?;
            }
        }
        Ok(StepOutcome::default())
    }
}

struct EnableCpe {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for EnableCpe {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let ipv4 = self.c.ipv4.get_state(&ctx.subscriber_id).await?.and_then(|s| s.address);
        let ipv6 = self.c.ipv6.get_state(&ctx.subscriber_id).await?.and_then(|s| s.address);
        self.c
            .cpe
            .configure_wan(&ctx.subscriber_id, ipv4.as_deref(), ipv6.as_deref())
            .await?;
        Ok(StepOutcome::default())
    }
}

struct SetStatusActive {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for SetStatusActive {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let mut service = self
            .c
            .services
            .get_service_by_subscriber(&ctx.subscriber_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("service instance for subscriber {}", ctx.subscriber_id)))?;
        service.state = ServiceState::Active;
        service.reason = None;
        service.suspended_at = None;
        service.activated_at = Some(chrono::Utc::now());
        service.updated_at = chrono::Utc::now();
        self.c.services.save_service(&service).await?;

        let mut outcome = StepOutcome::default();
        outcome.output_data.insert("status".into(), json!("active"));
        Ok(outcome)
    }
}
