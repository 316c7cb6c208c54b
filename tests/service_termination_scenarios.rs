//! Service lifecycle orchestrator scenarios: IPv6 revoke composed into
//! termination, scheduled termination, and bulk operations that keep
//! processing past a single failing item.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use saga_core::collaborators::fakes::{
    FakeAccessNodeManager, FakeBillingService, FakeCoaClient, FakeCpeManager, FakeIpamClient,
    FakeRadiusAccountManager,
};
use saga_core::handlers::{Collaborators, HandlerRegistry};
use saga_core::lifecycle::ipv4::Ipv4LifecycleMachine;
use saga_core::lifecycle::ipv6::Ipv6LifecycleMachine;
use saga_core::lifecycle::AllocateRequest;
use saga_core::repository::{
    InMemoryLifecycleEventRepository, InMemoryProfileRepository, InMemoryServiceRepository,
    InMemoryWorkflowRepository, ProfileRepository, ServiceRepository,
};
use saga_core::{
    AddressLifecycle, BulkOperation, LifecycleState, SagaOrchestrator, ServiceInstance,
    ServiceLifecycleOrchestrator, ServiceState, SuspensionType,
};
use uuid::Uuid;

struct Harness {
    orch: ServiceLifecycleOrchestrator,
    services: Arc<InMemoryServiceRepository>,
    profiles: Arc<dyn ProfileRepository>,
    ipv6: Arc<Ipv6LifecycleMachine>,
}

fn harness() -> Harness {
    let profiles: Arc<dyn ProfileRepository> = Arc::new(InMemoryProfileRepository::new());
    let ipam = Arc::new(FakeIpamClient::new());
    let coa = Arc::new(FakeCoaClient::new());
    let ipv4 = Arc::new(Ipv4LifecycleMachine::new(profiles.clone(), ipam.clone(), coa.clone()));
    let ipv6 = Arc::new(Ipv6LifecycleMachine::new(profiles.clone(), ipam, coa.clone()));
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

    let orch = ServiceLifecycleOrchestrator::new(
        services.clone(),
        profiles.clone(),
        ipv6.clone() as Arc<dyn AddressLifecycle>,
        Arc::new(InMemoryLifecycleEventRepository::new()),
        saga,
    );
    Harness { orch, services, profiles, ipv6 }
}

#[tokio::test]
async fn terminate_service_revokes_an_active_ipv6_prefix() {
    let h = harness();
    let mut service = ServiceInstance::new("sub-1", "tenant-1", "fiber_1g");
    service.state = ServiceState::Active;
    h.services.save_service(&service).await.unwrap();

    h.ipv6
        .allocate(AllocateRequest { subscriber_id: "sub-1".into(), tenant_id: "tenant-1".into(), ..Default::default() }, true)
        .await
        .unwrap();
    h.ipv6
        .activate(
            saga_core::lifecycle::ActivateRequest { subscriber_id: "sub-1".into(), tenant_id: "tenant-1".into(), ..Default::default() },
            true,
        )
        .await
        .unwrap();

    let terminated = h.orch.terminate_service(service.id, None).await.unwrap();
    assert_eq!(terminated.state, ServiceState::Terminated);
    assert!(terminated.terminated_at.is_some());

    let profile = h.profiles.get_profile("sub-1").await.unwrap().unwrap();
    assert_eq!(profile.ipv6_state, LifecycleState::Revoked);
    assert!(profile.ipv6_prefix.is_none());
    assert!(profile.ipv6_record_id.is_none());
}

#[tokio::test]
async fn scheduled_termination_then_sweep_revokes_once_due() {
    let h = harness();
    let mut service = ServiceInstance::new("sub-2", "tenant-1", "fiber_1g");
    service.state = ServiceState::Active;
    h.services.save_service(&service).await.unwrap();

    h.ipv6
        .allocate(AllocateRequest { subscriber_id: "sub-2".into(), tenant_id: "tenant-1".into(), ..Default::default() }, true)
        .await
        .unwrap();

    let past_due = Utc::now() - Duration::seconds(1);
    let parked = h.orch.terminate_service(service.id, Some(past_due)).await.unwrap();
    // termination_date already in the past counts as immediate.
    assert_eq!(parked.state, ServiceState::Terminated);

    let future = Utc::now() + Duration::days(30);
    let mut service2 = ServiceInstance::new("sub-3", "tenant-1", "fiber_1g");
    service2.state = ServiceState::Active;
    h.services.save_service(&service2).await.unwrap();
    let scheduled = h.orch.terminate_service(service2.id, Some(future)).await.unwrap();
    assert_eq!(scheduled.state, ServiceState::Terminating);
    assert!(h.orch.get_services_due_for_activation(Utc::now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn bulk_suspend_continues_past_a_missing_service() {
    let h = harness();
    let mut service = ServiceInstance::new("sub-4", "tenant-1", "fiber_1g");
    service.state = ServiceState::Active;
    h.services.save_service(&service).await.unwrap();

    let missing = Uuid::new_v4();
    let results = h.orch.bulk_service_operation(&[service.id, missing], BulkOperation::Suspend).await;

    assert!(results[0].success);
    assert!(!results[1].success);
    assert_eq!(results.len(), 2);

    let refreshed = h.services.get_service(service.id).await.unwrap().unwrap();
    assert_eq!(refreshed.state.is_suspended(), true);
}

#[tokio::test]
async fn suspend_then_resume_clears_suspension_fields() {
    let h = harness();
    let mut service = ServiceInstance::new("sub-5", "tenant-1", "fiber_1g");
    service.state = ServiceState::Active;
    h.services.save_service(&service).await.unwrap();

    let suspended = h
        .orch
        .suspend_service(service.id, SuspensionType::Fraud, "suspicious usage", None)
        .await
        .unwrap();
    assert_eq!(suspended.state, ServiceState::SuspendedFraud);
    assert!(suspended.reason.is_some());

    let resumed = h.orch.resume_service(service.id).await.unwrap();
    assert_eq!(resumed.state, ServiceState::Active);
    assert!(resumed.reason.is_none());
    assert!(resumed.suspended_at.is_none());
}
