//! Forward/compensation handlers for the `provision_subscriber` workflow.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::lifecycle::{AllocateRequest, RevokeRequest};
use crate::model::{Ipv6AssignmentMode, SubscriberNetworkProfile};

use super::{Collaborators, CompensationHandler, ForwardHandler, HandlerRegistry, StepContext, StepOutcome};

/// Maps the saga's `ipv4_only`/`ipv6_only`/`dual_stack`/`none` convenience
/// vocabulary, as well as spec.md's `ipv6_assignment_mode` enum spellings,
/// onto the profile's persisted assignment mode.
fn parse_ipv6_assignment_mode(mode: &str) -> Ipv6AssignmentMode {
    match mode {
        "none" | "ipv4_only" => Ipv6AssignmentMode::None,
        "stateless_autoconfig" | "stateless-autoconfig" => Ipv6AssignmentMode::StatelessAutoconfig,
        "stateful_dhcpv6" | "stateful-dhcpv6" => Ipv6AssignmentMode::StatefulDhcpv6,
        "ipv6_only" | "prefix_delegation" | "prefix-delegation" => Ipv6AssignmentMode::PrefixDelegation,
        _ => Ipv6AssignmentMode::DualStack,
    }
}

pub fn register(registry: &mut HandlerRegistry, c: Arc<Collaborators>) {
    registry.register_step("create_customer", Arc::new(CreateCustomer));
    registry.register_compensation("delete_customer", Arc::new(DeleteCustomer));

    registry.register_step("create_subscriber", Arc::new(CreateSubscriber));
    registry.register_compensation("delete_subscriber", Arc::new(DeleteSubscriber));

    registry.register_step("create_network_profile", Arc::new(CreateNetworkProfile { c: c.clone() }));
    registry.register_compensation("delete_network_profile", Arc::new(DeleteNetworkProfile { c: c.clone() }));

    registry.register_step("create_radius_account", Arc::new(CreateRadiusAccount { c: c.clone() }));
    registry.register_compensation("delete_radius_account", Arc::new(DeleteRadiusAccount { c: c.clone() }));

    registry.register_step("allocate_dualstack_ip", Arc::new(AllocateDualstackIp { c: c.clone() }));
    registry.register_compensation("release_dualstack_ip", Arc::new(ReleaseDualstackIp { c: c.clone() }));

    registry.register_step("activate_onu", Arc::new(ActivateOnu { c: c.clone() }));
    registry.register_compensation("deactivate_onu", Arc::new(DeactivateOnu { c: c.clone() }));

    registry.register_step("configure_cpe", Arc::new(ConfigureCpe { c: c.clone() }));
    registry.register_compensation("unconfigure_cpe", Arc::new(UnconfigureCpe { c: c.clone() }));

    registry.register_step("create_billing_service", Arc::new(CreateBillingService { c }));
}

struct CreateCustomer;

#[async_trait]
impl ForwardHandler for CreateCustomer {
    async fn execute(&self, _ctx: &StepContext) -> Result<StepOutcome> {
        let customer_id = format!("cust-{}", uuid::Uuid::new_v4());
        let mut outcome = StepOutcome::default();
        outcome.output_data.insert("customer_id".into(), json!(customer_id.clone()));
        outcome.context_updates.insert("customer_id".into(), json!(customer_id));
        Ok(outcome)
    }
}

struct DeleteCustomer;

#[async_trait]
impl CompensationHandler for DeleteCustomer {
    async fn compensate(&self, _ctx: &StepContext, _output: &HashMap<String, Value>, _comp: &HashMap<String, Value>) -> Result<()> {
        Ok(())
    }
}

struct CreateSubscriber;

#[async_trait]
impl ForwardHandler for CreateSubscriber {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let mut outcome = StepOutcome::default();
        outcome.output_data.insert("subscriber_id".into(), json!(ctx.subscriber_id.clone()));
        outcome.context_updates.insert("subscriber_id".into(), json!(ctx.subscriber_id.clone()));
        Ok(outcome)
    }
}

struct DeleteSubscriber;

#[async_trait]
impl CompensationHandler for DeleteSubscriber {
    async fn compensate(&self, _ctx: &StepContext, _output: &HashMap<String, Value>, _comp: &HashMap<String, Value>) -> Result<()> {
        Ok(())
    }
}

struct CreateNetworkProfile {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for CreateNetworkProfile {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let mut profile = SubscriberNetworkProfile::new(ctx.subscriber_id.clone(), ctx.tenant_id.clone());
        profile.vlan_id = ctx.context.get("vlan_id").and_then(|v| v.as_i64()).map(|v| v as i32);
        profile.option82_circuit_id = ctx.get_str("option82_circuit_id").map(|s| s.to_string());
        profile.ipv6_assignment_mode = parse_ipv6_assignment_mode(ctx.get_str("ipv6_assignment_mode").unwrap_or("dual_stack"));
        self.c.profiles.save_profile(&profile).await?;

        let mut outcome = StepOutcome::default();
        outcome.output_data.insert("network_profile_created".into(), json!(true));
        Ok(outcome)
    }
}

struct DeleteNetworkProfile {
    c: Arc<Collaborators>,
}

#[async_trait]
impl CompensationHandler for DeleteNetworkProfile {
    async fn compensate(&self, ctx: &StepContext, _output: &HashMap<String, Value>, _comp: &HashMap<String, Value>) -> Result<()> {
        self.c.profiles.delete_profile(&ctx.subscriber_id).await
    }
}

struct CreateRadiusAccount {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for CreateRadiusAccount {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let username = format!("{}@isp", ctx.subscriber_id);
        let mut outcome = StepOutcome::default();

        // A key was already surfaced by a prior attempt at this step, so
        // this call is a restart recovering mid-flight work rather than a
        // first execution. Avoid creating a second RADIUS account for the
        // same subscriber and reuse the key as the recovered record id.
        if let Some(key) = &ctx.idempotency_key {
            tracing::warn!(subscriber_id = %ctx.subscriber_id, idempotency_key = %key, "radius account step resumed after restart, skipping duplicate create_account");
            outcome.idempotency_key = Some(key.clone());
            outcome.output_data.insert("radius_record_id".into(), json!(key.clone()));
            outcome.compensation_data.insert("radius_record_id".into(), json!(key.clone()));
            outcome.context_updates.insert("radius_record_id".into(), json!(key.clone()));
            outcome.context_updates.insert("username".into(), json!(username));
            return Ok(outcome);
        }

        let record_id = self.c.radius.create_account(&ctx.subscriber_id, &username).await?;
        outcome.idempotency_key = Some(format!("radius-{}-{}", ctx.workflow_id, ctx.subscriber_id));
        outcome.output_data.insert("radius_record_id".into(), json!(record_id.clone()));
        outcome.compensation_data.insert("radius_record_id".into(), json!(record_id.clone()));
        outcome.context_updates.insert("radius_record_id".into(), json!(record_id));
        outcome.context_updates.insert("username".into(), json!(username));
        Ok(outcome)
    }
}

struct DeleteRadiusAccount {
    c: Arc<Collaborators>,
}

#[async_trait]
impl CompensationHandler for DeleteRadiusAccount {
    async fn compensate(&self, _ctx: &StepContext, _output: &HashMap<String, Value>, comp: &HashMap<String, Value>) -> Result<()> {
        if let Some(record_id) = comp.get("radius_record_id").and_then(|v| v.as_str()) {
            self.c.radius.delete_account(record_id).await?;
        }
        Ok(())
    }
}

struct AllocateDualstackIp {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for AllocateDualstackIp {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let mode = ctx.get_str("ipv6_assignment_mode").unwrap_or("dual_stack");
        if mode == "none" {
            return Err(crate::lifecycle::LifecycleError::Allocation(
                "ipv6_assignment_mode 'none' requests no addressing at all".into(),
            )
            .into());
        }
        let mut outcome = StepOutcome::default();

        if mode != "ipv6_only" {
            let result = self
                .c
                .ipv4
                .allocate(
                    AllocateRequest {
                        subscriber_id: ctx.subscriber_id.clone(),
                        tenant_id: ctx.tenant_id.clone(),
                        ..Default::default()
                    },
                    true,
                )
                .await?;
            if let Some(address) = result.address {
                outcome.output_data.insert("ipv4_address".into(), json!(address.clone()));
                outcome.context_updates.insert("ipv4_address".into(), json!(address));
            }
        }

        if mode != "ipv4_only" {
            let prefix_length = ctx.context.get("ipv6_prefix_size").and_then(|v| v.as_u64()).map(|v| v as u8);
            let result = self
                .c
                .ipv6
                .allocate(
                    AllocateRequest {
                        subscriber_id: ctx.subscriber_id.clone(),
                        tenant_id: ctx.tenant_id.clone(),
                        prefix_length,
                        ..Default::default()
                    },
                    true,
                )
                .await?;
            if let Some(prefix) = result.address {
                outcome.output_data.insert("ipv6_prefix".into(), json!(prefix.clone()));
                outcome.context_updates.insert("ipv6_prefix".into(), json!(prefix));
            }
        }

        Ok(outcome)
    }
}

struct ReleaseDualstackIp {
    c: Arc<Collaborators>,
}

#[async_trait]
impl CompensationHandler for ReleaseDualstackIp {
    async fn compensate(&self, ctx: &StepContext, output: &HashMap<String, Value>, _comp: &HashMap<String, Value>) -> Result<()> {
        if output.contains_key("ipv4_address") {
            self.c
                .ipv4
                .revoke(
                    RevokeRequest {
                        subscriber_id: ctx.subscriber_id.clone(),
                        tenant_id: ctx.tenant_id.clone(),
                        release_to_pool: true,
                        ..Default::default()
                    },
                    true,
                )
                .await?;
        }
        if output.contains_key("ipv6_prefix") {
            self.c
                .ipv6
                .revoke(
                    RevokeRequest {
                        subscriber_id: ctx.subscriber_id.clone(),
                        tenant_id: ctx.tenant_id.clone(),
                        release_to_pool: true,
                        ..Default::default()
                    },
                    true,
                )
                .await?;
        }
        Ok(())
    }
}

struct ActivateOnu {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for ActivateOnu {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let vlan_id = ctx.context.get("vlan_id").and_then(|v| v.as_i64()).map(|v| v as i32);
        let device_id = self.c.access_node.activate_onu(&ctx.subscriber_id, vlan_id).await?;

        let mut outcome = StepOutcome::default();
        outcome.output_data.insert("onu_id".into(), json!(device_id.clone()));
        outcome.compensation_data.insert("onu_id".into(), json!(device_id.clone()));
        outcome.context_updates.insert("onu_id".into(), json!(device_id));
        Ok(outcome)
    }
}

struct DeactivateOnu {
    c: Arc<Collaborators>,
}

#[async_trait]
impl CompensationHandler for DeactivateOnu {
    async fn compensate(&self, _ctx: &StepContext, _output: &HashMap<String, Value>, comp: &HashMap<String, Value>) -> Result<()> {
        if let Some(device_id) = comp.get("onu_id").and_then(|v| v.as_str()) {
            self.c.access_node.deactivate_onu(device_id).await?;
        }
        Ok(())
    }
}

struct ConfigureCpe {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for ConfigureCpe {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let ipv4 = ctx.get_str("ipv4_address");
        let ipv6 = ctx.get_str("ipv6_prefix");
        self.c.cpe.configure_wan(&ctx.subscriber_id, ipv4, ipv6).await?;

        let mut outcome = StepOutcome::default();
        outcome.output_data.insert("cpe_id".into(), json!(ctx.subscriber_id.clone()));
        outcome.context_updates.insert("cpe_id".into(), json!(ctx.subscriber_id.clone()));
        Ok(outcome)
    }
}

struct UnconfigureCpe {
    c: Arc<Collaborators>,
}

#[async_trait]
impl CompensationHandler for UnconfigureCpe {
    async fn compensate(&self, ctx: &StepContext, _output: &HashMap<String, Value>, _comp: &HashMap<String, Value>) -> Result<()> {
        self.c.cpe.deconfigure_wan(&ctx.subscriber_id).await
    }
}

struct CreateBillingService {
    c: Arc<Collaborators>,
}

#[async_trait]
impl ForwardHandler for CreateBillingService {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutcome> {
        let plan_id = ctx.get_str("plan").unwrap_or("default").to_string();
        let record_id = self
            .c
            .billing
            .create_service_record(&ctx.subscriber_id, &plan_id, HashMap::new())
            .await?;

        let mut outcome = StepOutcome::default();
        outcome.output_data.insert("service_id".into(), json!(record_id.clone()));
        outcome.context_updates.insert("service_id".into(), json!(record_id));
        Ok(outcome)
    }
}
