//! Static step sequences for the four saga workflows (spec §4.F).
//! Each descriptor names a forward handler and, where the step is
//! reversible, a symmetric compensator; both are resolved by name from
//! the `handlers::HandlerRegistry` at execution time.

use crate::model::WorkflowType;

/// One step in a `WorkflowDefinition`.
#[derive(Debug, Clone)]
pub struct StepDescriptor {
    pub name: &'static str,
    pub compensation_name: Option<&'static str>,
    pub max_retries: i32,
}

impl StepDescriptor {
    const fn new(name: &'static str, compensation_name: Option<&'static str>, max_retries: i32) -> Self {
        Self { name, compensation_name, max_retries }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub workflow_type: WorkflowType,
    pub steps: Vec<StepDescriptor>,
}

/// create_customer -> create_subscriber -> create_network_profile ->
/// create_radius_account -> allocate_dualstack_ip -> activate_onu ->
/// configure_cpe -> create_billing_service. Each step has a symmetric
/// compensator (delete/release/unconfigure).
pub fn provision_subscriber() -> WorkflowDefinition {
    WorkflowDefinition {
        workflow_type: WorkflowType::ProvisionSubscriber,
        steps: vec![
            StepDescriptor::new("create_customer", Some("delete_customer"), 3),
            StepDescriptor::new("create_subscriber", Some("delete_subscriber"), 3),
            StepDescriptor::new("create_network_profile", Some("delete_network_profile"), 3),
            StepDescriptor::new("create_radius_account", Some("delete_radius_account"), 3),
            StepDescriptor::new("allocate_dualstack_ip", Some("release_dualstack_ip"), 3),
            StepDescriptor::new("activate_onu", Some("deactivate_onu"), 3),
            StepDescriptor::new("configure_cpe", Some("unconfigure_cpe"), 3),
            StepDescriptor::new("create_billing_service", None, 3),
        ],
    }
}

/// The compensation sequence of provisioning, run as forward steps in
/// deletion order. No compensators of its own: a failed deprovision is
/// retried forward, not rolled back.
pub fn deprovision_subscriber() -> WorkflowDefinition {
    WorkflowDefinition {
        workflow_type: WorkflowType::DeprovisionSubscriber,
        steps: vec![
            StepDescriptor::new("suspend_billing", None, 3),
            StepDescriptor::new("deactivate_onu", None, 3),
            StepDescriptor::new("unconfigure_cpe", None, 3),
            StepDescriptor::new("release_ip", None, 3),
            StepDescriptor::new("delete_radius", None, 3),
            StepDescriptor::new("delete_network_profile", None, 3),
            StepDescriptor::new("archive_subscriber", None, 3),
        ],
    }
}

/// verify -> activate_billing -> enable_radius -> activate_onu ->
/// enable_cpe -> set_status_active.
pub fn activate_service() -> WorkflowDefinition {
    WorkflowDefinition {
        workflow_type: WorkflowType::ActivateService,
        steps: vec![
            StepDescriptor::new("verify", None, 3),
            StepDescriptor::new("activate_billing", None, 3),
            StepDescriptor::new("enable_radius", None, 3),
            StepDescriptor::new("activate_onu", None, 3),
            StepDescriptor::new("enable_cpe", None, 3),
            StepDescriptor::new("set_status_active", None, 3),
        ],
    }
}

/// verify -> suspend_billing -> disable_radius -> disable_onu ->
/// disable_cpe -> set_status_suspended.
pub fn suspend_service() -> WorkflowDefinition {
    WorkflowDefinition {
        workflow_type: WorkflowType::SuspendService,
        steps: vec![
            StepDescriptor::new("verify", None, 3),
            StepDescriptor::new("suspend_billing", None, 3),
            StepDescriptor::new("disable_radius", None, 3),
            StepDescriptor::new("disable_onu", None, 3),
            StepDescriptor::new("disable_cpe", None, 3),
            StepDescriptor::new("set_status_suspended", None, 3),
        ],
    }
}

pub fn definition_for(workflow_type: WorkflowType) -> WorkflowDefinition {
    match workflow_type {
        WorkflowType::ProvisionSubscriber => provision_subscriber(),
        WorkflowType::DeprovisionSubscriber => deprovision_subscriber(),
        WorkflowType::ActivateService => activate_service(),
        WorkflowType::SuspendService => suspend_service(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_subscriber_has_eight_steps_with_symmetric_compensators() {
        let def = provision_subscriber();
        assert_eq!(def.steps.len(), 8);
        assert_eq!(def.steps[0].compensation_name, Some("delete_customer"));
        assert!(def.steps.last().unwrap().compensation_name.is_none());
    }

    #[test]
    fn definition_for_matches_workflow_type() {
        assert_eq!(definition_for(WorkflowType::SuspendService).steps.len(), 6);
        assert_eq!(definition_for(WorkflowType::DeprovisionSubscriber).steps.len(), 7);
        assert_eq!(definition_for(WorkflowType::ActivateService).steps.len(), 6);
    }
}
