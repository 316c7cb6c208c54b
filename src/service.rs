//! Service lifecycle orchestration: a per-`ServiceInstance` state
//! machine, distinct from the saga orchestrator in that each operation
//! here is a short transactional mutation of a single aggregate plus a
//! [`LifecycleEvent`], not a multi-step compensating workflow (spec
//! §4.H). `provision_service` is the one operation that *drives* a
//! saga, via the shared [`SagaOrchestrator`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::lifecycle::{AddressLifecycle, RevokeRequest};
use crate::model::{LifecycleEvent, ServiceInstance, ServiceState, SuspensionType, WorkflowStatus, WorkflowType};
use crate::repository::{LifecycleEventRepository, ProfileRepository, ServiceRepository};
use crate::saga::{SagaOrchestrator, SagaOutcome};

/// Outcome envelope for a single service operation, per spec §6
/// `ServiceOperationResult`.
#[derive(Debug, Clone)]
pub struct ServiceOperationResult {
    pub success: bool,
    pub service_instance_id: Uuid,
    pub operation: String,
    pub message: String,
    pub error: Option<String>,
}

impl ServiceOperationResult {
    fn ok(service_instance_id: Uuid, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self { success: true, service_instance_id, operation: operation.into(), message: message.into(), error: None }
    }

    fn failed(service_instance_id: Uuid, operation: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            service_instance_id,
            operation: operation.into(),
            message: "operation failed".to_string(),
            error: Some(error),
        }
    }
}

/// One of the four operations `bulk_service_operation` applies across a
/// batch of service ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOperation {
    Suspend,
    Resume,
    Terminate,
    HealthCheck,
}

pub struct ServiceLifecycleOrchestrator {
    services: Arc<dyn ServiceRepository>,
    profiles: Arc<dyn ProfileRepository>,
    ipv6: Arc<dyn AddressLifecycle>,
    events: Arc<dyn LifecycleEventRepository>,
    saga: Arc<SagaOrchestrator>,
}

impl ServiceLifecycleOrchestrator {
    pub fn new(
        services: Arc<dyn ServiceRepository>,
        profiles: Arc<dyn ProfileRepository>,
        ipv6: Arc<dyn AddressLifecycle>,
        events: Arc<dyn LifecycleEventRepository>,
        saga: Arc<SagaOrchestrator>,
    ) -> Self {
        Self { services, profiles, ipv6, events, saga }
    }

    async fn emit(&self, service: &ServiceInstance, event_type: &str, from_state: Option<ServiceState>, detail: HashMap<String, Value>) -> Result<()> {
        let mut event = LifecycleEvent::new(
            service.subscriber_id.clone(),
            service.tenant_id.clone(),
            event_type,
            from_state.map(|s| format!("{s:?}")),
            format!("{:?}", service.state),
        );
        event.detail = detail;
        self.events.save_event(&event).await
    }

    fn require_service(&self, service: Option<ServiceInstance>, id: Uuid) -> Result<ServiceInstance> {
        service.ok_or_else(|| CoreError::NotFound(format!("service instance {id}")))
    }

    /// Creates a `ServiceInstance` in `pending`, then (if `auto_activate`)
    /// drives the `provision_subscriber` saga to completion and activates
    /// the service on success.
    pub async fn provision_service(
        &self,
        tenant_id: &str,
        subscriber_id: &str,
        plan_id: &str,
        auto_activate: bool,
        context: HashMap<String, Value>,
    ) -> Result<ServiceInstance> {
        let mut service = ServiceInstance::new(subscriber_id, tenant_id, plan_id);
        self.services.save_service(&service).await?;
        self.emit(&service, "provision_requested", None, HashMap::new()).await?;

        if !auto_activate {
            return Ok(service);
        }

        let from = service.state;
        service.state = ServiceState::Provisioning;
        service.updated_at = Utc::now();
        self.services.save_service(&service).await?;
        self.emit(&service, "provisioning_started", Some(from), HashMap::new()).await?;

        let workflow = self
            .saga
            .create_workflow(WorkflowType::ProvisionSubscriber, tenant_id, subscriber_id, context, None)
            .await?;

        match self.saga.execute_workflow(workflow.id).await? {
            SagaOutcome::Completed(_) => {
                self.activate_service(service.id).await
            }
            SagaOutcome::RolledBack { error } | SagaOutcome::RollbackFailed { error, .. } => {
                let from = service.state;
                service.state = ServiceState::Failed;
                service.reason = Some(error);
                service.updated_at = Utc::now();
                self.services.save_service(&service).await?;
                self.emit(&service, "provisioning_failed", Some(from), HashMap::new()).await?;
                Ok(service)
            }
        }
    }

    /// Allowed from `provisioning` or any `suspended*` state.
    pub async fn activate_service(&self, id: Uuid) -> Result<ServiceInstance> {
        let mut service = self.require_service(self.services.get_service(id).await?, id)?;
        if service.state != ServiceState::Provisioning && !service.state.is_suspended() {
            return Err(CoreError::BusinessRule(format!(
                "service {id} cannot be activated from state {:?}",
                service.state
            )));
        }
        let from = service.state;
        service.state = ServiceState::Active;
        service.activated_at = Some(Utc::now());
        service.reason = None;
        service.auto_resume_at = None;
        service.updated_at = Utc::now();
        self.services.save_service(&service).await?;
        self.emit(&service, "activation_completed", Some(from), HashMap::new()).await?;
        Ok(service)
    }

    /// Allowed from `active`. `suspension_type` selects which of the
    /// three `suspended*` states the service lands in.
    pub async fn suspend_service(
        &self,
        id: Uuid,
        suspension_type: SuspensionType,
        reason: impl Into<String>,
        auto_resume_at: Option<DateTime<Utc>>,
    ) -> Result<ServiceInstance> {
        let mut service = self.require_service(self.services.get_service(id).await?, id)?;
        if service.state != ServiceState::Active {
            return Err(CoreError::BusinessRule(format!("service {id} cannot be suspended from state {:?}", service.state)));
        }
        let from = service.state;
        service.state = suspension_type.to_state();
        service.reason = Some(reason.into());
        service.auto_resume_at = auto_resume_at;
        service.suspended_at = Some(Utc::now());
        service.updated_at = Utc::now();
        self.services.save_service(&service).await?;
        self.emit(&service, "suspension_completed", Some(from), HashMap::new()).await?;
        Ok(service)
    }

    /// Allowed from any `suspended*` state; clears suspension fields.
    pub async fn resume_service(&self, id: Uuid) -> Result<ServiceInstance> {
        let mut service = self.require_service(self.services.get_service(id).await?, id)?;
        if !service.state.is_suspended() {
            return Err(CoreError::BusinessRule(format!("service {id} cannot be resumed from state {:?}", service.state)));
        }
        let from = service.state;
        service.state = ServiceState::Active;
        service.reason = None;
        service.auto_resume_at = None;
        service.suspended_at = None;
        service.updated_at = Utc::now();
        self.services.save_service(&service).await?;
        self.emit(&service, "resume_completed", Some(from), HashMap::new()).await?;
        Ok(service)
    }

    /// Allowed from any non-`terminated` state. A future `termination_date`
    /// parks the instance in `terminating` with the date recorded in
    /// metadata; otherwise the instance terminates immediately and, if it
    /// has a subscriber, the IPv6 prefix is revoked and the resulting
    /// profile persisted (`commit: true`) before the service itself is saved.
    pub async fn terminate_service(&self, id: Uuid, termination_date: Option<DateTime<Utc>>) -> Result<ServiceInstance> {
        let mut service = self.require_service(self.services.get_service(id).await?, id)?;
        if service.state == ServiceState::Terminated {
            return Err(CoreError::BusinessRule(format!("service {id} is already terminated")));
        }

        let from = service.state;

        if let Some(date) = termination_date {
            if date > Utc::now() {
                service.state = ServiceState::Terminating;
                service
                    .metadata
                    .insert("scheduled_termination_date".into(), Value::String(date.to_rfc3339()));
                service.updated_at = Utc::now();
                self.services.save_service(&service).await?;
                self.emit(&service, "termination_scheduled", Some(from), HashMap::new()).await?;
                return Ok(service);
            }
        }

        service.state = ServiceState::Terminated;
        service.terminated_at = Some(Utc::now());
        service.updated_at = Utc::now();

        let mut detail = HashMap::new();
        if let Some(profile) = self.profiles.get_profile(&service.subscriber_id).await? {
            if profile.ipv6_state == crate::lifecycle::LifecycleState::Active
                || profile.ipv6_state == crate::lifecycle::LifecycleState::Suspended
                || profile.ipv6_state == crate::lifecycle::LifecycleState::Allocated
            {
                let prefix_before = profile.ipv6_prefix.clone();
                let revoke = self
                    .ipv6
                    .revoke(
                        RevokeRequest {
                            subscriber_id: service.subscriber_id.clone(),
                            tenant_id: service.tenant_id.clone(),
                            send_disconnect: true,
                            release_to_pool: true,
                            ..Default::default()
                        },
                        true,
                    )
                    .await;
                match revoke {
                    Ok(_) => {
                        detail.insert("ipv6_revoked".to_string(), Value::Bool(true));
                        if let Some(prefix) = prefix_before {
                            detail.insert("ipv6_prefix_revoked".to_string(), Value::String(prefix));
                        }
                    }
                    Err(e) => {
                        warn!(service_id = %id, error = %e, "ipv6 revoke on termination failed, continuing");
                    }
                }
            }
        }

        self.services.save_service(&service).await?;
        self.emit(&service, "termination_completed", Some(from), detail).await?;
        Ok(service)
    }

    /// Merges `updates` into the instance's metadata and records the
    /// diff on the emitted event.
    pub async fn modify_service(&self, id: Uuid, updates: HashMap<String, Value>) -> Result<ServiceInstance> {
        let mut service = self.require_service(self.services.get_service(id).await?, id)?;
        let from = service.state;
        let diff: HashMap<String, Value> = updates
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        service.metadata.extend(updates);
        service.updated_at = Utc::now();
        self.services.save_service(&service).await?;
        self.emit(&service, "service_modified", Some(from), diff).await?;
        Ok(service)
    }

    /// Records the result of an external health probe on the instance.
    pub async fn perform_health_check(&self, id: Uuid, healthy: bool, detail: impl Into<String>) -> Result<ServiceInstance> {
        let mut service = self.require_service(self.services.get_service(id).await?, id)?;
        let from = service.state;
        service.last_health_check = Some(Utc::now());
        service.last_health_check_result = Some(detail.into());
        service.updated_at = Utc::now();
        self.services.save_service(&service).await?;
        let mut event_detail = HashMap::new();
        event_detail.insert("healthy".to_string(), Value::Bool(healthy));
        self.emit(&service, "health_check_recorded", Some(from), event_detail).await?;
        Ok(service)
    }

    /// Applies `op` to every id in `ids`; a failure on one id never
    /// aborts the remaining items.
    pub async fn bulk_service_operation(&self, ids: &[Uuid], op: BulkOperation) -> Vec<ServiceOperationResult> {
        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            let outcome = match op {
                BulkOperation::Suspend => {
                    self.suspend_service(id, SuspensionType::Other, "bulk suspend", None).await.map(|_| ())
                }
                BulkOperation::Resume => self.resume_service(id).await.map(|_| ()),
                BulkOperation::Terminate => self.terminate_service(id, None).await.map(|_| ()),
                BulkOperation::HealthCheck => self.perform_health_check(id, true, "bulk health check").await.map(|_| ()),
            };
            let label = match op {
                BulkOperation::Suspend => "suspend",
                BulkOperation::Resume => "resume",
                BulkOperation::Terminate => "terminate",
                BulkOperation::HealthCheck => "health_check",
            };
            results.push(match outcome {
                Ok(()) => ServiceOperationResult::ok(id, label, format!("{label} applied")),
                Err(e) => ServiceOperationResult::failed(id, label, e.to_string()),
            });
        }
        results
    }

    /// Records a future activation time in metadata; the caller's
    /// scheduler polls `get_services_due_for_activation` and invokes
    /// `activate_service` when due.
    pub async fn schedule_service_activation(&self, id: Uuid, at: DateTime<Utc>) -> Result<ServiceInstance> {
        let mut service = self.require_service(self.services.get_service(id).await?, id)?;
        service.metadata.insert("scheduled_activation_date".into(), Value::String(at.to_rfc3339()));
        service.updated_at = Utc::now();
        self.services.save_service(&service).await?;
        Ok(service)
    }

    pub async fn get_services_due_for_activation(&self, now: DateTime<Utc>) -> Result<Vec<ServiceInstance>> {
        let all = self.services.list_services().await?;
        Ok(all
            .into_iter()
            .filter(|s| {
                s.metadata
                    .get("scheduled_activation_date")
                    .and_then(|v| v.as_str())
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|at| at.with_timezone(&Utc) <= now)
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Special-case compensation for a provisioning saga that ended in
    /// `failed` without ever running compensation: releases IP/VLAN,
    /// clears equipment, sets the instance `failed` and the workflow
    /// `rolled_back`.
    pub async fn rollback_provisioning_workflow(&self, service_id: Uuid, workflow_id: Uuid) -> Result<()> {
        let mut service = self.require_service(self.services.get_service(service_id).await?, service_id)?;

        if let Some(profile) = self.profiles.get_profile(&service.subscriber_id).await? {
            if profile.ipv6_record_id.is_some() {
                if let Err(e) = self
                    .ipv6
                    .revoke(
                        RevokeRequest {
                            subscriber_id: service.subscriber_id.clone(),
                            tenant_id: service.tenant_id.clone(),
                            release_to_pool: true,
                            ..Default::default()
                        },
                        true,
                    )
                    .await
                {
                    error!(service_id = %service_id, error = %e, "manual rollback: ipv6 release failed");
                }
            }
        }

        let from = service.state;
        service.state = ServiceState::Failed;
        service.metadata.clear();
        service.updated_at = Utc::now();
        self.services.save_service(&service).await?;
        self.emit(&service, "manual_rollback_completed", Some(from), HashMap::new()).await?;

        if let Some(mut workflow) = self.saga_workflow(workflow_id).await? {
            workflow.status = WorkflowStatus::RolledBack;
            workflow.updated_at = Utc::now();
            self.saga.workflows_repo().save_workflow(&workflow).await?;
        }
        Ok(())
    }

    async fn saga_workflow(&self, workflow_id: Uuid) -> Result<Option<crate::model::Workflow>> {
        self.saga.workflows_repo().get_workflow(workflow_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::{
        FakeAccessNodeManager, FakeBillingService, FakeCoaClient, FakeCpeManager, FakeIpamClient,
        FakeRadiusAccountManager,
    };
    use crate::handlers::{Collaborators, HandlerRegistry};
    use crate::lifecycle::ipv4::Ipv4LifecycleMachine;
    use crate::lifecycle::ipv6::Ipv6LifecycleMachine;
    use crate::repository::{
        InMemoryLifecycleEventRepository, InMemoryProfileRepository, InMemoryServiceRepository,
        InMemoryWorkflowRepository,
    };

    fn orchestrator() -> ServiceLifecycleOrchestrator {
        let profiles: Arc<dyn ProfileRepository> = Arc::new(InMemoryProfileRepository::new());
        let ipam = Arc::new(FakeIpamClient::new());
        let coa = Arc::new(FakeCoaClient::new());
        let ipv4 = Arc::new(Ipv4LifecycleMachine::new(profiles.clone(), ipam.clone(), coa.clone()));
        let ipv6: Arc<dyn AddressLifecycle> = Arc::new(Ipv6LifecycleMachine::new(profiles.clone(), ipam, coa.clone()));
        let services = Arc::new(InMemoryServiceRepository::new());

        let collaborators = Arc::new(Collaborators {
            ipv4,
            ipv6: ipv6.clone(),
            radius: Arc::new(FakeRadiusAccountManager::new()),
            coa,
            access_node: Arc::new(FakeAccessNodeManager::new()),
            cpe: Arc::new(FakeCpeManager::new()),
            billing: Arc::new(FakeBillingService::new()),
            profiles: profiles.clone(),
            services: services.clone(),
        });
        let registry = HandlerRegistry::with_builtin_handlers(collaborators);
        let saga = Arc::new(SagaOrchestrator::new(Arc::new(InMemoryWorkflowRepository::new()), registry));

        ServiceLifecycleOrchestrator::new(
            services,
            profiles,
            ipv6,
            Arc::new(InMemoryLifecycleEventRepository::new()),
            saga,
        )
    }

    #[tokio::test]
    async fn provision_without_auto_activate_leaves_instance_pending() {
        let orch = orchestrator();
        let service = orch
            .provision_service("tenant-1", "sub-1", "fiber_1g", false, HashMap::new())
            .await
            .unwrap();
        assert_eq!(service.state, ServiceState::Pending);
        // pending is not a legal source state for activate_service
        assert!(orch.activate_service(service.id).await.is_err());
    }

    #[tokio::test]
    async fn suspend_then_resume_round_trips_state() {
        let orch = orchestrator();
        let mut service = ServiceInstance::new("sub-5", "tenant-1", "fiber_1g");
        service.state = ServiceState::Active;
        orch.services.save_service(&service).await.unwrap();

        let suspended = orch
            .suspend_service(service.id, SuspensionType::NonPayment, "card declined", None)
            .await
            .unwrap();
        assert_eq!(suspended.state, ServiceState::SuspendedNonPayment);

        let resumed = orch.resume_service(service.id).await.unwrap();
        assert_eq!(resumed.state, ServiceState::Active);
        assert!(resumed.reason.is_none());
    }

    #[tokio::test]
    async fn terminate_without_subscriber_profile_still_terminates() {
        let orch = orchestrator();
        let mut service = ServiceInstance::new("sub-2", "tenant-1", "fiber_1g");
        service.state = ServiceState::Active;
        orch.services.save_service(&service).await.unwrap();

        let terminated = orch.terminate_service(service.id, None).await.unwrap();
        assert_eq!(terminated.state, ServiceState::Terminated);
        assert!(terminated.terminated_at.is_some());
    }

    #[tokio::test]
    async fn scheduled_termination_parks_in_terminating() {
        let orch = orchestrator();
        let mut service = ServiceInstance::new("sub-3", "tenant-1", "fiber_1g");
        service.state = ServiceState::Active;
        orch.services.save_service(&service).await.unwrap();

        let future = Utc::now() + chrono::Duration::days(7);
        let result = orch.terminate_service(service.id, Some(future)).await.unwrap();
        assert_eq!(result.state, ServiceState::Terminating);
        assert!(result.metadata.contains_key("scheduled_termination_date"));
    }

    #[tokio::test]
    async fn bulk_operation_reports_per_item_failure() {
        let orch = orchestrator();
        let mut service = ServiceInstance::new("sub-4", "tenant-1", "fiber_1g");
        service.state = ServiceState::Active;
        orch.services.save_service(&service).await.unwrap();

        let missing = Uuid::new_v4();
        let results = orch.bulk_service_operation(&[service.id, missing], BulkOperation::Suspend).await;
        assert!(results[0].success);
        assert!(!results[1].success);
    }
}
