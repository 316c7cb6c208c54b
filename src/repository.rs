//! Persistence traits for workflows, steps, subscriber network profiles
//! and service instances, plus in-memory implementations used by tests
//! and by deployments that don't need durability across restarts.
//! `repository_sqlite` provides the durable counterpart.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{LifecycleEvent, ServiceInstance, SubscriberNetworkProfile, Workflow, WorkflowStepRecord};

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()>;
    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>>;
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Workflow>>;
    async fn list_workflows(
        &self,
        tenant_id: Option<&str>,
        status: Option<crate::model::WorkflowStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Workflow>, i64)>;

    async fn save_step(&self, step: &WorkflowStepRecord) -> Result<()>;
    async fn get_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStepRecord>>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn save_profile(&self, profile: &SubscriberNetworkProfile) -> Result<()>;
    async fn get_profile(&self, subscriber_id: &str) -> Result<Option<SubscriberNetworkProfile>>;
    async fn delete_profile(&self, subscriber_id: &str) -> Result<()>;
}

#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn save_service(&self, service: &ServiceInstance) -> Result<()>;
    async fn get_service(&self, id: Uuid) -> Result<Option<ServiceInstance>>;
    async fn get_service_by_subscriber(&self, subscriber_id: &str) -> Result<Option<ServiceInstance>>;
    /// All service instances; backs `get_services_due_for_activation` and bulk operations.
    async fn list_services(&self) -> Result<Vec<ServiceInstance>>;
}

/// In-memory `WorkflowRepository`, guarded by a single mutex in the
/// style of the teacher's in-memory storage backends: simple and
/// correct, not tuned for contention.
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: Mutex<HashMap<Uuid, Workflow>>,
    steps: Mutex<HashMap<Uuid, Vec<WorkflowStepRecord>>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.workflows.lock().unwrap().insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>> {
        Ok(self.workflows.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Workflow>> {
        Ok(self
            .workflows
            .lock()
            .unwrap()
            .values()
            .find(|w| w.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn list_workflows(
        &self,
        tenant_id: Option<&str>,
        status: Option<crate::model::WorkflowStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Workflow>, i64)> {
        let workflows = self.workflows.lock().unwrap();
        let mut matching: Vec<Workflow> = workflows
            .values()
            .filter(|w| tenant_id.map(|t| t == w.tenant_id).unwrap_or(true))
            .filter(|w| status.map(|s| s == w.status).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by_key(|w| w.created_at);
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn save_step(&self, step: &WorkflowStepRecord) -> Result<()> {
        let mut steps = self.steps.lock().unwrap();
        let entry = steps.entry(step.workflow_id).or_default();
        if let Some(existing) = entry.iter_mut().find(|s| s.id == step.id) {
            *existing = step.clone();
        } else {
            entry.push(step.clone());
        }
        Ok(())
    }

    async fn get_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStepRecord>> {
        let mut steps = self.steps.lock().unwrap().get(&workflow_id).cloned().unwrap_or_default();
        steps.sort_by_key(|s| s.step_order);
        Ok(steps)
    }
}

/// In-memory `ProfileRepository`.
#[derive(Default)]
pub struct InMemoryProfileRepository {
    profiles: Mutex<HashMap<String, SubscriberNetworkProfile>>,
}

impl InMemoryProfileRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn save_profile(&self, profile: &SubscriberNetworkProfile) -> Result<()> {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.subscriber_id.clone(), profile.clone());
        Ok(())
    }

    async fn get_profile(&self, subscriber_id: &str) -> Result<Option<SubscriberNetworkProfile>> {
        Ok(self.profiles.lock().unwrap().get(subscriber_id).cloned())
    }

    async fn delete_profile(&self, subscriber_id: &str) -> Result<()> {
        self.profiles.lock().unwrap().remove(subscriber_id);
        Ok(())
    }
}

/// In-memory `ServiceRepository`.
#[derive(Default)]
pub struct InMemoryServiceRepository {
    services: Mutex<HashMap<Uuid, ServiceInstance>>,
}

impl InMemoryServiceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceRepository for InMemoryServiceRepository {
    async fn save_service(&self, service: &ServiceInstance) -> Result<()> {
        self.services.lock().unwrap().insert(service.id, service.clone());
        Ok(())
    }

    async fn get_service(&self, id: Uuid) -> Result<Option<ServiceInstance>> {
        Ok(self.services.lock().unwrap().get(&id).cloned())
    }

    async fn get_service_by_subscriber(&self, subscriber_id: &str) -> Result<Option<ServiceInstance>> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .values()
            .find(|s| s.subscriber_id == subscriber_id)
            .cloned())
    }

    async fn list_services(&self) -> Result<Vec<ServiceInstance>> {
        Ok(self.services.lock().unwrap().values().cloned().collect())
    }
}

/// Append-only sink for `LifecycleEvent`s, kept separate from workflow/step
/// history for operational troubleshooting (spec's "Internal state surface").
#[async_trait]
pub trait LifecycleEventRepository: Send + Sync {
    async fn save_event(&self, event: &LifecycleEvent) -> Result<()>;
    async fn list_events(&self, subscriber_id: &str) -> Result<Vec<LifecycleEvent>>;
}

/// In-memory `LifecycleEventRepository`.
#[derive(Default)]
pub struct InMemoryLifecycleEventRepository {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl InMemoryLifecycleEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LifecycleEventRepository for InMemoryLifecycleEventRepository {
    async fn save_event(&self, event: &LifecycleEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn list_events(&self, subscriber_id: &str) -> Result<Vec<LifecycleEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.subscriber_id == subscriber_id)
            .cloned()
            .collect())
    }
}

pub fn not_found(entity: &str, key: impl std::fmt::Display) -> CoreError {
    CoreError::NotFound(format!("{entity} {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkflowType;

    #[tokio::test]
    async fn roundtrips_a_workflow() {
        let repo = InMemoryWorkflowRepository::new();
        let wf = Workflow::new(WorkflowType::ProvisionSubscriber, "tenant-1", "sub-1", None);
        repo.save_workflow(&wf).await.unwrap();
        let fetched = repo.get_workflow(wf.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, wf.id);
    }

    #[tokio::test]
    async fn finds_workflow_by_idempotency_key() {
        let repo = InMemoryWorkflowRepository::new();
        let wf = Workflow::new(
            WorkflowType::ProvisionSubscriber,
            "tenant-1",
            "sub-1",
            Some("idem-1".to_string()),
        );
        repo.save_workflow(&wf).await.unwrap();
        let found = repo.find_by_idempotency_key("idem-1").await.unwrap();
        assert!(found.is_some());
        assert!(repo.find_by_idempotency_key("idem-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lists_workflows_with_pagination() {
        let repo = InMemoryWorkflowRepository::new();
        for i in 0..5 {
            let wf = Workflow::new(WorkflowType::ProvisionSubscriber, "tenant-1", format!("sub-{i}"), None);
            repo.save_workflow(&wf).await.unwrap();
        }
        let (page, total) = repo.list_workflows(Some("tenant-1"), None, 2, 0).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
    }
}
