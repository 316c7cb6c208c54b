//! Address lifecycle machine invariants: transition-table legality,
//! idempotent revoke, and the `ipv6_assignment_mode = "none"` boundary.

use std::collections::HashMap;
use std::sync::Arc;

use saga_core::collaborators::fakes::{FakeAccessNodeManager, FakeBillingService, FakeCoaClient, FakeCpeManager, FakeIpamClient, FakeRadiusAccountManager};
use saga_core::lifecycle::ipv4::Ipv4LifecycleMachine;
use saga_core::lifecycle::ipv6::Ipv6LifecycleMachine;
use saga_core::repository::{
    InMemoryProfileRepository, InMemoryServiceRepository, InMemoryWorkflowRepository, ProfileRepository,
};
use saga_core::{
    AddressLifecycle, Collaborators, HandlerRegistry, LifecycleState, SagaOrchestrator, SagaOutcome,
    WorkflowType,
};
use saga_core::lifecycle::{AllocateRequest, RevokeRequest};
use saga_core::Ipv6AssignmentMode;

fn ipv6_machine() -> (Ipv6LifecycleMachine, Arc<dyn ProfileRepository>, Arc<FakeIpamClient>) {
    let profiles: Arc<dyn ProfileRepository> = Arc::new(InMemoryProfileRepository::new());
    let ipam = Arc::new(FakeIpamClient::new());
    let coa = Arc::new(FakeCoaClient::new());
    let machine = Ipv6LifecycleMachine::new(profiles.clone(), ipam.clone(), coa);
    (machine, profiles, ipam)
}

#[tokio::test]
async fn revoke_clears_prefix_and_ipam_id_when_releasing() {
    let (machine, profiles, _ipam) = ipv6_machine();
    machine
        .allocate(AllocateRequest { subscriber_id: "sub-1".into(), tenant_id: "tenant-1".into(), ..Default::default() }, true)
        .await
        .unwrap();

    machine
        .revoke(
            RevokeRequest { subscriber_id: "sub-1".into(), tenant_id: "tenant-1".into(), release_to_pool: true, ..Default::default() },
            true,
        )
        .await
        .unwrap();

    let profile = profiles.get_profile("sub-1").await.unwrap().unwrap();
    assert_eq!(profile.ipv6_state, LifecycleState::Revoked);
    assert!(profile.ipv6_prefix.is_none());
    assert!(profile.ipv6_record_id.is_none());
}

#[tokio::test]
async fn revoke_is_idempotent_once_already_revoked() {
    let (machine, _profiles, ipam) = ipv6_machine();
    machine
        .allocate(AllocateRequest { subscriber_id: "sub-1".into(), tenant_id: "tenant-1".into(), ..Default::default() }, true)
        .await
        .unwrap();
    machine
        .revoke(
            RevokeRequest { subscriber_id: "sub-1".into(), tenant_id: "tenant-1".into(), release_to_pool: true, ..Default::default() },
            true,
        )
        .await
        .unwrap();
    let releases_after_first = ipam.ledger.lock().unwrap().iter().filter(|l| l.starts_with("release_ipv6")).count();

    let second = machine
        .revoke(
            RevokeRequest { subscriber_id: "sub-1".into(), tenant_id: "tenant-1".into(), release_to_pool: true, ..Default::default() },
            true,
        )
        .await
        .unwrap();

    assert_eq!(second.state, LifecycleState::Revoked);
    let releases_after_second = ipam.ledger.lock().unwrap().iter().filter(|l| l.starts_with("release_ipv6")).count();
    assert_eq!(releases_after_first, releases_after_second, "idempotent revoke must not mutate or re-release");
}

#[tokio::test]
async fn ipv4_and_ipv6_share_the_same_transition_legality() {
    use saga_core::lifecycle::validate_transition;
    use LifecycleState::*;
    assert!(validate_transition(Pending, Allocated));
    assert!(validate_transition(Failed, Allocated));
    assert!(validate_transition(Failed, Revoking));
    assert!(!validate_transition(Revoked, Active));
    assert!(!validate_transition(Pending, Revoking));
}

#[tokio::test]
async fn allocate_rejects_a_profile_whose_assignment_mode_forbids_it() {
    let (machine, profiles, _ipam) = ipv6_machine();
    let mut profile = saga_core::SubscriberNetworkProfile::new("sub-2", "tenant-1");
    profile.ipv6_assignment_mode = Ipv6AssignmentMode::StatelessAutoconfig;
    profiles.save_profile(&profile).await.unwrap();

    let err = machine
        .allocate(AllocateRequest { subscriber_id: "sub-2".into(), tenant_id: "tenant-1".into(), ..Default::default() }, true)
        .await
        .unwrap_err();
    assert!(matches!(err, saga_core::CoreError::Lifecycle(_)));

    profile.ipv6_assignment_mode = Ipv6AssignmentMode::PrefixDelegation;
    profiles.save_profile(&profile).await.unwrap();
    let ok = machine
        .allocate(AllocateRequest { subscriber_id: "sub-2".into(), tenant_id: "tenant-1".into(), ..Default::default() }, true)
        .await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn ipv6_assignment_mode_none_raises_an_allocation_error() {
    let profiles: Arc<dyn ProfileRepository> = Arc::new(InMemoryProfileRepository::new());
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
    let saga = SagaOrchestrator::new(workflows, registry);

    let mut context = HashMap::new();
    context.insert("ipv6_assignment_mode".into(), serde_json::json!("none"));
    let workflow = saga
        .create_workflow(WorkflowType::ProvisionSubscriber, "tenant-1", "sub-none", context, None)
        .await
        .unwrap();

    let outcome = saga.execute_workflow(workflow.id).await.unwrap();
    assert!(matches!(outcome, SagaOutcome::RolledBack { .. }));
}
