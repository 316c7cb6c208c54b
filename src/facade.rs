//! Thin orchestration facade (spec §4.I): creates workflow records,
//! drives the saga, and maps results into stable, serializable response
//! values. Also exposes the read-side: get/list/retry/cancel and the
//! `get_workflow_statistics` aggregation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::SagaConfig;
use crate::error::{CoreError, Result};
use crate::model::{Workflow, WorkflowStatus, WorkflowStepRecord, WorkflowType};
use crate::repository::WorkflowRepository;
use crate::saga::{SagaOrchestrator, SagaOutcome};

/// A single step's projection onto the facade's response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    pub step_name: String,
    pub step_order: i32,
    pub status: String,
    pub retry_count: i32,
    pub error: Option<String>,
}

impl From<&WorkflowStepRecord> for StepSummary {
    fn from(step: &WorkflowStepRecord) -> Self {
        Self {
            step_name: step.step_name.clone(),
            step_order: step.step_order,
            status: format!("{:?}", step.status).to_lowercase(),
            retry_count: step.retry_count,
            error: step.error.clone(),
        }
    }
}

/// Stable, JSON-serializable view of a workflow run (spec §6 `WorkflowResponse`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResponse {
    pub id: Uuid,
    pub workflow_type: String,
    pub status: String,
    pub tenant_id: String,
    pub subscriber_id: String,
    pub error: Option<String>,
    pub context: HashMap<String, Value>,
    pub steps: Vec<StepSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowResponse {
    fn build(workflow: Workflow, mut steps: Vec<WorkflowStepRecord>) -> Self {
        steps.sort_by_key(|s| s.step_order);
        Self {
            id: workflow.id,
            workflow_type: workflow.workflow_type.as_str().to_string(),
            status: format!("{:?}", workflow.status).to_lowercase(),
            tenant_id: workflow.tenant_id,
            subscriber_id: workflow.subscriber_id,
            error: workflow.error,
            context: workflow.context,
            steps: steps.iter().map(StepSummary::from).collect(),
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
            started_at: workflow.started_at,
            completed_at: workflow.completed_at,
        }
    }
}

/// Aggregated workflow counts and health metrics (spec §6 `WorkflowStatsResponse`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowStatsResponse {
    pub by_status: HashMap<String, i64>,
    pub by_type: HashMap<String, i64>,
    pub success_rate: f64,
    pub average_duration_seconds: f64,
    pub active_workflows: i64,
    pub pending_workflows: i64,
    pub running_workflows: i64,
    pub recent_failures_24h: i64,
    pub total_compensations: i64,
    pub rolled_back_workflows: i64,
}

pub struct OrchestrationFacade {
    saga: Arc<SagaOrchestrator>,
    workflows: Arc<dyn WorkflowRepository>,
    config: SagaConfig,
}

impl OrchestrationFacade {
    pub fn new(saga: Arc<SagaOrchestrator>, workflows: Arc<dyn WorkflowRepository>, config: SagaConfig) -> Self {
        Self { saga, workflows, config }
    }

    async fn run(&self, workflow_type: WorkflowType, tenant_id: &str, subscriber_id: &str, context: HashMap<String, Value>, idempotency_key: Option<String>) -> Result<WorkflowResponse> {
        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.workflows.find_by_idempotency_key(key).await? {
                let steps = self.workflows.get_steps(existing.id).await?;
                return Ok(WorkflowResponse::build(existing, steps));
            }
        }

        let workflow = self.saga.create_workflow(workflow_type, tenant_id, subscriber_id, context, idempotency_key).await?;
        let _ = self.saga.execute_workflow(workflow.id).await?;
        self.get_workflow(workflow.id).await
    }

    pub async fn provision_subscriber(
        &self,
        tenant_id: &str,
        subscriber_id: &str,
        context: HashMap<String, Value>,
        idempotency_key: Option<String>,
    ) -> Result<WorkflowResponse> {
        self.run(WorkflowType::ProvisionSubscriber, tenant_id, subscriber_id, context, idempotency_key).await
    }

    pub async fn deprovision_subscriber(
        &self,
        tenant_id: &str,
        subscriber_id: &str,
        context: HashMap<String, Value>,
        idempotency_key: Option<String>,
    ) -> Result<WorkflowResponse> {
        self.run(WorkflowType::DeprovisionSubscriber, tenant_id, subscriber_id, context, idempotency_key).await
    }

    pub async fn activate_service(
        &self,
        tenant_id: &str,
        subscriber_id: &str,
        context: HashMap<String, Value>,
        idempotency_key: Option<String>,
    ) -> Result<WorkflowResponse> {
        self.run(WorkflowType::ActivateService, tenant_id, subscriber_id, context, idempotency_key).await
    }

    pub async fn suspend_service(
        &self,
        tenant_id: &str,
        subscriber_id: &str,
        context: HashMap<String, Value>,
        idempotency_key: Option<String>,
    ) -> Result<WorkflowResponse> {
        self.run(WorkflowType::SuspendService, tenant_id, subscriber_id, context, idempotency_key).await
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<WorkflowResponse> {
        let workflow = self.workflows.get_workflow(id).await?.ok_or_else(|| CoreError::NotFound(format!("workflow {id}")))?;
        let steps = self.workflows.get_steps(id).await?;
        Ok(WorkflowResponse::build(workflow, steps))
    }

    pub async fn list_workflows(
        &self,
        tenant_id: Option<&str>,
        status: Option<WorkflowStatus>,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<WorkflowResponse>, i64)> {
        let page_size = page_size.clamp(1, self.config.max_page_size);
        let offset = page.max(0) * page_size;
        let (workflows, total) = self.workflows.list_workflows(tenant_id, status, page_size, offset).await?;

        let mut responses = Vec::with_capacity(workflows.len());
        for workflow in workflows {
            let steps = self.workflows.get_steps(workflow.id).await?;
            responses.push(WorkflowResponse::build(workflow, steps));
        }
        Ok((responses, total))
    }

    pub async fn retry_workflow(&self, id: Uuid) -> Result<WorkflowResponse> {
        self.saga.retry_workflow(id).await?;
        let _ = self.saga.execute_workflow(id).await?;
        self.get_workflow(id).await
    }

    pub async fn cancel_workflow(&self, id: Uuid) -> Result<WorkflowResponse> {
        let outcome = self.saga.cancel_workflow(id).await?;
        match outcome {
            SagaOutcome::Completed(_) => unreachable!("cancel never completes a workflow"),
            SagaOutcome::RolledBack { .. } | SagaOutcome::RollbackFailed { .. } => self.get_workflow(id).await,
        }
    }

    pub async fn get_workflow_statistics(&self, tenant_id: Option<&str>) -> Result<WorkflowStatsResponse> {
        let (workflows, total) = self.workflows.list_workflows(tenant_id, None, i64::MAX, 0).await?;
        let mut stats = WorkflowStatsResponse::default();
        if total == 0 {
            return Ok(stats);
        }

        let mut completed = 0i64;
        let mut duration_total_seconds = 0f64;
        let mut duration_samples = 0i64;
        let cutoff = Utc::now() - Duration::hours(self.config.recent_failure_window_hours);

        for workflow in &workflows {
            let status_key = format!("{:?}", workflow.status).to_lowercase();
            *stats.by_status.entry(status_key).or_insert(0) += 1;
            *stats.by_type.entry(workflow.workflow_type.as_str().to_string()).or_insert(0) += 1;

            match workflow.status {
                WorkflowStatus::Completed => {
                    completed += 1;
                    if let (Some(started), Some(finished)) = (workflow.started_at, workflow.completed_at) {
                        duration_total_seconds += (finished - started).num_milliseconds() as f64 / 1000.0;
                        duration_samples += 1;
                    }
                }
                WorkflowStatus::Running => {
                    stats.active_workflows += 1;
                    stats.running_workflows += 1;
                }
                WorkflowStatus::Pending => stats.pending_workflows += 1,
                WorkflowStatus::RolledBack | WorkflowStatus::RollbackFailed => {
                    stats.total_compensations += 1;
                }
                _ => {}
            }

            if matches!(workflow.status, WorkflowStatus::RolledBack | WorkflowStatus::Compensated) {
                stats.rolled_back_workflows += 1;
            }

            if matches!(workflow.status, WorkflowStatus::Failed | WorkflowStatus::RollbackFailed) && workflow.updated_at >= cutoff {
                stats.recent_failures_24h += 1;
            }
        }

        stats.success_rate = (completed as f64 / total as f64) * 100.0;
        stats.average_duration_seconds = if duration_samples > 0 { duration_total_seconds / duration_samples as f64 } else { 0.0 };
        Ok(stats)
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
    use crate::repository::{InMemoryProfileRepository, InMemoryServiceRepository, InMemoryWorkflowRepository};
    use serde_json::json;

    fn facade() -> OrchestrationFacade {
        let profiles: Arc<dyn crate::repository::ProfileRepository> = Arc::new(InMemoryProfileRepository::new());
        let ipam = Arc::new(FakeIpamClient::new());
        let coa = Arc::new(FakeCoaClient::new());
        let ipv4 = Arc::new(Ipv4LifecycleMachine::new(profiles.clone(), ipam.clone(), coa.clone()));
        let ipv6 = Arc::new(Ipv6LifecycleMachine::new(profiles.clone(), ipam, coa.clone()));

        let collaborators = Arc::new(Collaborators {
            ipv4,
            ipv6,
            radius: Arc::new(FakeRadiusAccountManager::new()),
            coa,
            access_node: Arc::new(FakeAccessNodeManager::new()),
            cpe: Arc::new(FakeCpeManager::new()),
            billing: Arc::new(FakeBillingService::new()),
            profiles,
            services: Arc::new(InMemoryServiceRepository::new()),
        });
        let registry = HandlerRegistry::with_builtin_handlers(collaborators);
        let workflows = Arc::new(InMemoryWorkflowRepository::new());
        let saga = Arc::new(SagaOrchestrator::new(workflows.clone(), registry));
        OrchestrationFacade::new(saga, workflows, SagaConfig::default())
    }

    #[tokio::test]
    async fn provision_subscriber_returns_completed_response() {
        let facade = facade();
        let mut context = HashMap::new();
        context.insert("ipv6_assignment_mode".into(), json!("dual_stack"));

        let response = facade.provision_subscriber("tenant-1", "sub-1", context, None).await.unwrap();
        assert_eq!(response.status, "completed");
        assert_eq!(response.steps.len(), 8);
    }

    #[tokio::test]
    async fn idempotency_key_short_circuits_a_second_call() {
        let facade = facade();
        let key = Some("idem-key-1".to_string());
        let first = facade.provision_subscriber("tenant-1", "sub-2", HashMap::new(), key.clone()).await.unwrap();
        let second = facade.provision_subscriber("tenant-1", "sub-2", HashMap::new(), key).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn statistics_reflect_completed_workflow() {
        let facade = facade();
        facade.provision_subscriber("tenant-1", "sub-3", HashMap::new(), None).await.unwrap();
        let stats = facade.get_workflow_statistics(Some("tenant-1")).await.unwrap();
        assert_eq!(stats.success_rate, 100.0);
        assert_eq!(stats.by_status.get("completed"), Some(&1));
    }
}
