//! Saga pattern orchestration: sequenced step execution against a
//! named [`WorkflowDefinition`], per-step retry with exponential
//! backoff, and reverse-order compensation on failure (spec §4.E).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::definitions::definition_for;
use crate::error::{CoreError, Result};
use crate::handlers::{HandlerRegistry, StepContext};
use crate::model::{Workflow, WorkflowStatus, WorkflowStepRecord, WorkflowStepStatus, WorkflowType};
use crate::repository::WorkflowRepository;

/// What the forward or compensation pass produced, surfaced to the
/// caller of [`SagaOrchestrator::execute_workflow`].
#[derive(Debug, Clone)]
pub enum SagaOutcome {
    Completed(HashMap<String, Value>),
    RolledBack { error: String },
    RollbackFailed { error: String, compensation_error: String },
}

pub struct SagaOrchestrator {
    workflows: Arc<dyn WorkflowRepository>,
    registry: HandlerRegistry,
    base_retry_delay: Duration,
}

impl SagaOrchestrator {
    pub fn new(workflows: Arc<dyn WorkflowRepository>, registry: HandlerRegistry) -> Self {
        Self { workflows, registry, base_retry_delay: Duration::from_millis(100) }
    }

    /// Exposes the underlying workflow repository for callers that need
    /// direct access outside the saga's own forward/compensation passes
    /// (e.g. `ServiceLifecycleOrchestrator::rollback_provisioning_workflow`).
    pub fn workflows_repo(&self) -> &Arc<dyn WorkflowRepository> {
        &self.workflows
    }

    /// Creates and atomically persists a new workflow plus its full
    /// (pending) step set for `workflow_type`, seeded with `context`.
    pub async fn create_workflow(
        &self,
        workflow_type: WorkflowType,
        tenant_id: &str,
        subscriber_id: &str,
        context: HashMap<String, Value>,
        idempotency_key: Option<String>,
    ) -> Result<Workflow> {
        let mut workflow = Workflow::new(workflow_type, tenant_id, subscriber_id, idempotency_key);
        workflow.context = context;
        self.workflows.save_workflow(&workflow).await?;

        let definition = definition_for(workflow_type);
        for (order, step) in definition.steps.iter().enumerate() {
            let record = WorkflowStepRecord::new(workflow.id, step.name, order as i32, step.max_retries);
            self.workflows.save_step(&record).await?;
        }
        Ok(workflow)
    }

    /// Runs the forward pass from the first non-`completed` step,
    /// compensating on failure. Legal from `pending` or `failed`.
    pub async fn execute_workflow(&self, workflow_id: Uuid) -> Result<SagaOutcome> {
        let mut workflow = self
            .workflows
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("workflow {workflow_id}")))?;

        if !matches!(workflow.status, WorkflowStatus::Pending | WorkflowStatus::Failed) {
            return Err(CoreError::BusinessRule(format!(
                "workflow {workflow_id} is not in a runnable state ({:?})",
                workflow.status
            )));
        }

        workflow.status = WorkflowStatus::Running;
        workflow.started_at = workflow.started_at.or(Some(Utc::now()));
        workflow.updated_at = Utc::now();
        self.workflows.save_workflow(&workflow).await?;
        info!(workflow_id = %workflow_id, workflow_type = workflow.workflow_type.as_str(), "workflow started");

        let definition = definition_for(workflow.workflow_type);
        let steps = self.workflows.get_steps(workflow_id).await?;

        for (descriptor, mut step) in definition.steps.iter().zip(steps.into_iter()) {
            if step.status == WorkflowStepStatus::Completed {
                continue;
            }

            step.status = WorkflowStepStatus::Running;
            step.started_at = Some(Utc::now());
            self.workflows.save_step(&step).await?;

            let handler = match self.registry.get(descriptor.name) {
                Some(h) => h,
                None => {
                    step.status = WorkflowStepStatus::Failed;
                    step.error = Some(format!("no forward handler registered for '{}'", descriptor.name));
                    step.completed_at = Some(Utc::now());
                    self.workflows.save_step(&step).await?;
                    return self.compensate(&mut workflow, &definition, workflow_id).await;
                }
            };

            let step_ctx = StepContext {
                workflow_id,
                tenant_id: workflow.tenant_id.clone(),
                subscriber_id: workflow.subscriber_id.clone(),
                context: workflow.context.clone(),
                idempotency_key: step.idempotency_key.clone(),
            };

            match self.execute_step_with_retry(&handler, &step_ctx, &mut step, descriptor.max_retries).await {
                Ok(outcome) => {
                    step.output_data = Some(outcome.output_data);
                    step.compensation_data = Some(outcome.compensation_data);
                    if outcome.idempotency_key.is_some() {
                        step.idempotency_key = outcome.idempotency_key;
                    }
                    step.status = WorkflowStepStatus::Completed;
                    step.completed_at = Some(Utc::now());
                    self.workflows.save_step(&step).await?;
                    workflow.context.extend(outcome.context_updates);
                    debug!(workflow_id = %workflow_id, step = descriptor.name, "step completed");
                }
                Err(e) => {
                    step.status = WorkflowStepStatus::Failed;
                    step.error = Some(e.to_string());
                    step.completed_at = Some(Utc::now());
                    self.workflows.save_step(&step).await?;
                    warn!(workflow_id = %workflow_id, step = descriptor.name, error = %e, "step failed, compensating");
                    workflow.error = Some(e.to_string());
                    return self.compensate(&mut workflow, &definition, workflow_id).await;
                }
            }
        }

        workflow.status = WorkflowStatus::Completed;
        workflow.completed_at = Some(Utc::now());
        workflow.updated_at = Utc::now();
        self.workflows.save_workflow(&workflow).await?;
        info!(workflow_id = %workflow_id, "workflow completed");
        Ok(SagaOutcome::Completed(workflow.context))
    }

    async fn execute_step_with_retry(
        &self,
        handler: &Arc<dyn crate::handlers::ForwardHandler>,
        ctx: &StepContext,
        step: &mut WorkflowStepRecord,
        max_retries: i32,
    ) -> Result<crate::handlers::StepOutcome> {
        let mut attempt = 0;
        loop {
            match handler.execute(ctx).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < max_retries => {
                    attempt += 1;
                    step.retry_count = attempt;
                    let delay = self.base_retry_delay * 2u32.pow((attempt - 1) as u32);
                    warn!(step = %step.step_name, attempt, error = %e, "step attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reverses every `completed` step in descending sequence order,
    /// invoking its compensator if it declared one (spec §4.E).
    async fn compensate(
        &self,
        workflow: &mut Workflow,
        definition: &crate::definitions::WorkflowDefinition,
        workflow_id: Uuid,
    ) -> Result<SagaOutcome> {
        workflow.status = WorkflowStatus::RollingBack;
        workflow.updated_at = Utc::now();
        self.workflows.save_workflow(workflow).await?;

        let mut steps = self.workflows.get_steps(workflow_id).await?;
        steps.sort_by(|a, b| b.step_order.cmp(&a.step_order));

        let mut compensation_errors = Vec::new();
        let mut completed_steps = 0u32;
        let mut real_compensations_attempted = 0u32;

        for mut step in steps {
            if step.status != WorkflowStepStatus::Completed {
                continue;
            }
            completed_steps += 1;
            let descriptor = &definition.steps[step.step_order as usize];

            let Some(compensation_name) = descriptor.compensation_name else {
                step.status = WorkflowStepStatus::Compensated;
                step.compensated_at = Some(Utc::now());
                self.workflows.save_step(&step).await?;
                continue;
            };

            let Some(compensator) = self.registry.get_compensation(compensation_name) else {
                step.status = WorkflowStepStatus::CompensationFailed;
                step.compensated_at = Some(Utc::now());
                self.workflows.save_step(&step).await?;
                compensation_errors.push(format!(
                    "step '{}': no compensation handler registered for '{compensation_name}'",
                    step.step_name
                ));
                continue;
            };
            real_compensations_attempted += 1;

            let step_ctx = StepContext {
                workflow_id,
                tenant_id: workflow.tenant_id.clone(),
                subscriber_id: workflow.subscriber_id.clone(),
                context: workflow.context.clone(),
                idempotency_key: step.idempotency_key.clone(),
            };
            let output = step.output_data.clone().unwrap_or_default();
            let compensation_data = step.compensation_data.clone().unwrap_or_default();

            step.status = WorkflowStepStatus::Compensating;
            self.workflows.save_step(&step).await?;

            let mut attempt = 0;
            let result = loop {
                match compensator.compensate(&step_ctx, &output, &compensation_data).await {
                    Ok(()) => break Ok(()),
                    Err(e) if attempt < step.max_retries => {
                        attempt += 1;
                        step.retry_count = attempt;
                        let delay = self.base_retry_delay * 2u32.pow((attempt - 1) as u32);
                        warn!(step = %step.step_name, attempt, error = %e, "compensator attempt failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => break Err(e),
                }
            };

            match result {
                Ok(()) => {
                    step.status = WorkflowStepStatus::Compensated;
                    step.compensated_at = Some(Utc::now());
                    self.workflows.save_step(&step).await?;
                }
                Err(e) => {
                    step.status = WorkflowStepStatus::CompensationFailed;
                    step.compensated_at = Some(Utc::now());
                    self.workflows.save_step(&step).await?;
                    error!(workflow_id = %workflow_id, step = %step.step_name, error = %e, "compensation failed");
                    compensation_errors.push(format!("step '{}': {e}", step.step_name));
                }
            }
        }

        workflow.updated_at = Utc::now();
        if compensation_errors.is_empty() {
            // If every completed step had no real compensator to run (the
            // whole definition declares none, e.g. deprovision_subscriber),
            // nothing was actually undone — distinguish that from a run
            // where real compensating actions executed.
            workflow.status = if completed_steps > 0 && real_compensations_attempted == 0 {
                WorkflowStatus::Compensated
            } else {
                WorkflowStatus::RolledBack
            };
            self.workflows.save_workflow(workflow).await?;
            let error = workflow.error.clone().unwrap_or_default();
            Ok(SagaOutcome::RolledBack { error })
        } else {
            workflow.status = WorkflowStatus::RollbackFailed;
            let compensation_error = compensation_errors.join("; ");
            workflow.error = Some(format!(
                "{} | compensation errors: {compensation_error}",
                workflow.error.clone().unwrap_or_default()
            ));
            self.workflows.save_workflow(workflow).await?;
            let error = workflow.error.clone().unwrap_or_default();
            Ok(SagaOutcome::RollbackFailed { error, compensation_error })
        }
    }

    /// Legal only from `failed` (steps already `completed` are reused)
    /// or `rolled_back` (all steps are pending, so this restarts from
    /// the beginning since every compensator already ran).
    pub async fn retry_workflow(&self, workflow_id: Uuid) -> Result<Workflow> {
        let mut workflow = self
            .workflows
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("workflow {workflow_id}")))?;

        if !matches!(workflow.status, WorkflowStatus::Failed | WorkflowStatus::RolledBack) {
            return Err(CoreError::BusinessRule(format!(
                "workflow {workflow_id} cannot be retried from status {:?}",
                workflow.status
            )));
        }

        if workflow.retry_count >= workflow.max_retries {
            workflow.status = WorkflowStatus::Timeout;
            workflow.error = Some(format!(
                "workflow {workflow_id} exhausted its {} allowed retries",
                workflow.max_retries
            ));
            workflow.updated_at = Utc::now();
            self.workflows.save_workflow(&workflow).await?;
            return Err(CoreError::BusinessRule(format!(
                "workflow {workflow_id} has exhausted its {} allowed retries",
                workflow.max_retries
            )));
        }
        workflow.retry_count += 1;

        if workflow.status == WorkflowStatus::RolledBack {
            let mut steps = self.workflows.get_steps(workflow_id).await?;
            for step in steps.iter_mut() {
                step.status = WorkflowStepStatus::Pending;
                step.output_data = None;
                step.compensation_data = None;
                step.error = None;
                step.started_at = None;
                step.completed_at = None;
                step.compensated_at = None;
                step.retry_count = 0;
                self.workflows.save_step(step).await?;
            }
        }

        workflow.status = WorkflowStatus::Pending;
        workflow.error = None;
        workflow.updated_at = Utc::now();
        self.workflows.save_workflow(&workflow).await?;
        Ok(workflow)
    }

    /// Legal from `pending` or `running`; triggers compensation
    /// immediately against whichever steps have completed so far.
    pub async fn cancel_workflow(&self, workflow_id: Uuid) -> Result<SagaOutcome> {
        let mut workflow = self
            .workflows
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("workflow {workflow_id}")))?;

        if !matches!(workflow.status, WorkflowStatus::Pending | WorkflowStatus::Running) {
            return Err(CoreError::BusinessRule(format!(
                "workflow {workflow_id} cannot be cancelled from status {:?}",
                workflow.status
            )));
        }

        let definition = definition_for(workflow.workflow_type);
        workflow.error = Some("cancelled by caller".to_string());
        self.compensate(&mut workflow, &definition, workflow_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::{
        FakeAccessNodeManager, FakeBillingService, FakeCoaClient, FakeCpeManager, FakeIpamClient,
        FakeRadiusAccountManager,
    };
    use crate::handlers::Collaborators;
    use crate::lifecycle::ipv4::Ipv4LifecycleMachine;
    use crate::lifecycle::ipv6::Ipv6LifecycleMachine;
    use crate::repository::{InMemoryProfileRepository, InMemoryServiceRepository, InMemoryWorkflowRepository};
    use serde_json::json;

    fn orchestrator(fail_cpe: bool) -> SagaOrchestrator {
        let profiles: Arc<dyn crate::repository::ProfileRepository> = Arc::new(InMemoryProfileRepository::new());
        let ipam = Arc::new(FakeIpamClient::new());
        let coa = Arc::new(FakeCoaClient::new());
        let ipv4 = Arc::new(Ipv4LifecycleMachine::new(profiles.clone(), ipam.clone(), coa.clone()));
        let ipv6 = Arc::new(Ipv6LifecycleMachine::new(profiles.clone(), ipam, coa.clone()));
        let cpe: Arc<dyn crate::collaborators::CpeManager> = if fail_cpe {
            Arc::new(FakeCpeManager::failing())
        } else {
            Arc::new(FakeCpeManager::new())
        };

        let collaborators = Arc::new(Collaborators {
            ipv4,
            ipv6,
            radius: Arc::new(FakeRadiusAccountManager::new()),
            coa,
            access_node: Arc::new(FakeAccessNodeManager::new()),
            cpe,
            billing: Arc::new(FakeBillingService::new()),
            profiles,
            services: Arc::new(InMemoryServiceRepository::new()),
        });

        let registry = HandlerRegistry::with_builtin_handlers(collaborators);
        SagaOrchestrator::new(Arc::new(InMemoryWorkflowRepository::new()), registry)
    }

    #[tokio::test]
    async fn happy_path_provisioning_completes_all_steps() {
        let orchestrator = orchestrator(false);
        let mut context = HashMap::new();
        context.insert("plan".into(), json!("fiber_1g"));
        context.insert("vlan_id".into(), json!(100));
        context.insert("ipv6_assignment_mode".into(), json!("dual_stack"));
        context.insert("ipv6_prefix_size".into(), json!(56));

        let workflow = orchestrator
            .create_workflow(WorkflowType::ProvisionSubscriber, "tenant-1", "sub-1", context, None)
            .await
            .unwrap();

        let outcome = orchestrator.execute_workflow(workflow.id).await.unwrap();
        match outcome {
            SagaOutcome::Completed(ctx) => {
                assert!(ctx.contains_key("ipv4_address"));
                assert!(ctx.contains_key("ipv6_prefix"));
                assert!(ctx.contains_key("service_id"));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cpe_failure_rolls_back_prior_steps() {
        let orchestrator = orchestrator(true);
        let mut context = HashMap::new();
        context.insert("ipv6_assignment_mode".into(), json!("dual_stack"));

        let workflow = orchestrator
            .create_workflow(WorkflowType::ProvisionSubscriber, "tenant-1", "sub-2", context, None)
            .await
            .unwrap();

        let outcome = orchestrator.execute_workflow(workflow.id).await.unwrap();
        assert!(matches!(outcome, SagaOutcome::RolledBack { .. }));

        let steps = orchestrator.workflows.get_steps(workflow.id).await.unwrap();
        let billing_step = steps.iter().find(|s| s.step_name == "create_billing_service").unwrap();
        assert_eq!(billing_step.status, WorkflowStepStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_before_any_step_starts_leaves_no_side_effect() {
        let orchestrator = orchestrator(false);
        let workflow = orchestrator
            .create_workflow(WorkflowType::ProvisionSubscriber, "tenant-1", "sub-3", HashMap::new(), None)
            .await
            .unwrap();

        let outcome = orchestrator.cancel_workflow(workflow.id).await.unwrap();
        assert!(matches!(outcome, SagaOutcome::RolledBack { .. }));
    }
}
