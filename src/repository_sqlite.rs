//! Durable SQLite-backed implementations of the repository traits in
//! `repository`, in the teacher crate's `SqliteSnapshotStorage` style:
//! `CREATE TABLE IF NOT EXISTS` on construction, parameterized queries,
//! opaque payloads stored as serialized JSON text columns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    Ipv6AssignmentMode, LifecycleEvent, Option82Policy, ServiceInstance, ServiceState, SubscriberNetworkProfile,
    Workflow, WorkflowStatus, WorkflowStepRecord, WorkflowStepStatus, WorkflowType,
};
use crate::repository::{LifecycleEventRepository, ProfileRepository, ServiceRepository, WorkflowRepository};

pub struct SqliteWorkflowRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowRepository {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                workflow_type TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                subscriber_id TEXT NOT NULL,
                status TEXT NOT NULL,
                idempotency_key TEXT,
                context TEXT NOT NULL,
                error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_workflows_idempotency ON workflows(idempotency_key) WHERE idempotency_key IS NOT NULL")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_tenant ON workflows(tenant_id)")
            .execute(&pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_steps (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                step_name TEXT NOT NULL,
                step_order INTEGER NOT NULL,
                status TEXT NOT NULL,
                retryable INTEGER NOT NULL,
                max_retries INTEGER NOT NULL,
                retry_count INTEGER NOT NULL,
                idempotency_key TEXT,
                input_data TEXT NOT NULL,
                output_data TEXT,
                compensation_data TEXT,
                error TEXT,
                started_at TEXT,
                completed_at TEXT,
                compensated_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflow_steps_workflow ON workflow_steps(workflow_id)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    fn row_to_workflow(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Workflow> {
        Ok(Workflow {
            id: row.try_get::<String, _>("id")?.parse().map_err(sqlx_parse_err)?,
            workflow_type: parse_workflow_type(&row.try_get::<String, _>("workflow_type")?),
            tenant_id: row.try_get("tenant_id")?,
            subscriber_id: row.try_get("subscriber_id")?,
            status: parse_workflow_status(&row.try_get::<String, _>("status")?),
            idempotency_key: row.try_get("idempotency_key")?,
            context: serde_json::from_str(&row.try_get::<String, _>("context")?).unwrap_or_default(),
            error: row.try_get("error")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            created_at: parse_ts(row, "created_at")?,
            updated_at: parse_ts(row, "updated_at")?,
            started_at: parse_ts_opt(row, "started_at")?,
            completed_at: parse_ts_opt(row, "completed_at")?,
        })
    }

    fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<WorkflowStepRecord> {
        Ok(WorkflowStepRecord {
            id: row.try_get::<String, _>("id")?.parse().map_err(sqlx_parse_err)?,
            workflow_id: row.try_get::<String, _>("workflow_id")?.parse().map_err(sqlx_parse_err)?,
            step_name: row.try_get("step_name")?,
            step_order: row.try_get("step_order")?,
            status: parse_step_status(&row.try_get::<String, _>("status")?),
            retryable: row.try_get::<i64, _>("retryable")? != 0,
            max_retries: row.try_get("max_retries")?,
            retry_count: row.try_get("retry_count")?,
            idempotency_key: row.try_get("idempotency_key")?,
            input_data: serde_json::from_str(&row.try_get::<String, _>("input_data")?).unwrap_or_default(),
            output_data: row
                .try_get::<Option<String>, _>("output_data")?
                .map(|s| serde_json::from_str(&s).unwrap_or_default()),
            compensation_data: row
                .try_get::<Option<String>, _>("compensation_data")?
                .map(|s| serde_json::from_str(&s).unwrap_or_default()),
            error: row.try_get("error")?,
            started_at: parse_ts_opt(row, "started_at")?,
            completed_at: parse_ts_opt(row, "completed_at")?,
            compensated_at: parse_ts_opt(row, "compensated_at")?,
        })
    }
}

#[async_trait]
impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let context = serde_json::to_string(&workflow.context)?;
        sqlx::query(
            r#"
            INSERT INTO workflows (id, workflow_type, tenant_id, subscriber_id, status, idempotency_key, context, error, retry_count, max_retries, created_at, updated_at, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                context = excluded.context,
                error = excluded.error,
                retry_count = excluded.retry_count,
                max_retries = excluded.max_retries,
                updated_at = excluded.updated_at,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.workflow_type.as_str())
        .bind(&workflow.tenant_id)
        .bind(&workflow.subscriber_id)
        .bind(workflow_status_str(workflow.status))
        .bind(&workflow.idempotency_key)
        .bind(context)
        .bind(&workflow.error)
        .bind(workflow.retry_count)
        .bind(workflow.max_retries)
        .bind(workflow.created_at.to_rfc3339())
        .bind(workflow.updated_at.to_rfc3339())
        .bind(workflow.started_at.map(|t| t.to_rfc3339()))
        .bind(workflow.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Self::row_to_workflow(&r)).transpose()?)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Self::row_to_workflow(&r)).transpose()?)
    }

    async fn list_workflows(
        &self,
        tenant_id: Option<&str>,
        status: Option<WorkflowStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Workflow>, i64)> {
        let tenant_filter = tenant_id.unwrap_or("%");
        let status_filter = status.map(workflow_status_str);

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM workflows WHERE (?1 = '%' OR tenant_id = ?1) AND (?2 IS NULL OR status = ?2)",
        )
        .bind(tenant_filter)
        .bind(&status_filter)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            "SELECT * FROM workflows WHERE (?1 = '%' OR tenant_id = ?1) AND (?2 IS NULL OR status = ?2) ORDER BY created_at LIMIT ?3 OFFSET ?4",
        )
        .bind(tenant_filter)
        .bind(&status_filter)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let workflows = rows.iter().map(Self::row_to_workflow).collect::<sqlx::Result<Vec<_>>>()?;
        Ok((workflows, total))
    }

    async fn save_step(&self, step: &WorkflowStepRecord) -> Result<()> {
        let input_data = serde_json::to_string(&step.input_data)?;
        let output_data = step.output_data.as_ref().map(serde_json::to_string).transpose()?;
        let compensation_data = step.compensation_data.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO workflow_steps (id, workflow_id, step_name, step_order, status, retryable, max_retries, retry_count, idempotency_key, input_data, output_data, compensation_data, error, started_at, completed_at, compensated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                retry_count = excluded.retry_count,
                output_data = excluded.output_data,
                compensation_data = excluded.compensation_data,
                error = excluded.error,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                compensated_at = excluded.compensated_at
            "#,
        )
        .bind(step.id.to_string())
        .bind(step.workflow_id.to_string())
        .bind(&step.step_name)
        .bind(step.step_order)
        .bind(step_status_str(step.status))
        .bind(step.retryable as i64)
        .bind(step.max_retries)
        .bind(step.retry_count)
        .bind(&step.idempotency_key)
        .bind(input_data)
        .bind(output_data)
        .bind(compensation_data)
        .bind(&step.error)
        .bind(step.started_at.map(|t| t.to_rfc3339()))
        .bind(step.completed_at.map(|t| t.to_rfc3339()))
        .bind(step.compensated_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStepRecord>> {
        let rows = sqlx::query("SELECT * FROM workflow_steps WHERE workflow_id = ? ORDER BY step_order")
            .bind(workflow_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::row_to_step).collect::<sqlx::Result<Vec<_>>>()?)
    }
}

pub struct SqliteProfileRepository {
    pool: SqlitePool,
}

impl SqliteProfileRepository {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriber_network_profiles (
                subscriber_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                vlan_id INTEGER,
                inner_vlan_id INTEGER,
                qinq_enabled INTEGER NOT NULL DEFAULT 0,
                option82_circuit_id TEXT,
                option82_remote_id TEXT,
                option82_policy TEXT NOT NULL DEFAULT 'log',
                ipv4_state TEXT NOT NULL,
                ipv4_address TEXT,
                ipv4_pool_id TEXT,
                ipv4_record_id TEXT,
                static_ipv4_address TEXT,
                ipv6_assignment_mode TEXT NOT NULL DEFAULT 'none',
                ipv6_state TEXT NOT NULL,
                ipv6_prefix TEXT,
                ipv6_prefix_length INTEGER,
                ipv6_record_id TEXT,
                static_ipv6_address TEXT,
                vendor_metadata TEXT NOT NULL DEFAULT '{}',
                allocated_at TEXT,
                activated_at TEXT,
                suspended_at TEXT,
                revoked_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<SubscriberNetworkProfile> {
        Ok(SubscriberNetworkProfile {
            subscriber_id: row.try_get("subscriber_id")?,
            tenant_id: row.try_get("tenant_id")?,
            vlan_id: row.try_get("vlan_id")?,
            inner_vlan_id: row.try_get("inner_vlan_id")?,
            qinq_enabled: row.try_get::<i64, _>("qinq_enabled")? != 0,
            option82_circuit_id: row.try_get("option82_circuit_id")?,
            option82_remote_id: row.try_get("option82_remote_id")?,
            option82_policy: parse_option82_policy(&row.try_get::<String, _>("option82_policy")?),
            ipv4_state: parse_lifecycle_state(&row.try_get::<String, _>("ipv4_state")?),
            ipv4_address: row.try_get("ipv4_address")?,
            ipv4_pool_id: row.try_get("ipv4_pool_id")?,
            ipv4_record_id: row.try_get("ipv4_record_id")?,
            static_ipv4_address: row.try_get("static_ipv4_address")?,
            ipv6_assignment_mode: parse_ipv6_assignment_mode(&row.try_get::<String, _>("ipv6_assignment_mode")?),
            ipv6_state: parse_lifecycle_state(&row.try_get::<String, _>("ipv6_state")?),
            ipv6_prefix: row.try_get("ipv6_prefix")?,
            ipv6_prefix_length: row.try_get::<Option<i64>, _>("ipv6_prefix_length")?.map(|v| v as u8),
            ipv6_record_id: row.try_get("ipv6_record_id")?,
            static_ipv6_address: row.try_get("static_ipv6_address")?,
            vendor_metadata: serde_json::from_str(&row.try_get::<String, _>("vendor_metadata")?).unwrap_or_default(),
            allocated_at: parse_ts_opt(row, "allocated_at")?,
            activated_at: parse_ts_opt(row, "activated_at")?,
            suspended_at: parse_ts_opt(row, "suspended_at")?,
            revoked_at: parse_ts_opt(row, "revoked_at")?,
            created_at: parse_ts(row, "created_at")?,
            updated_at: parse_ts(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl ProfileRepository for SqliteProfileRepository {
    async fn save_profile(&self, profile: &SubscriberNetworkProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriber_network_profiles
                (subscriber_id, tenant_id, vlan_id, inner_vlan_id, qinq_enabled, option82_circuit_id, option82_remote_id, option82_policy,
                 ipv4_state, ipv4_address, ipv4_pool_id, ipv4_record_id, static_ipv4_address,
                 ipv6_assignment_mode, ipv6_state, ipv6_prefix, ipv6_prefix_length, ipv6_record_id, static_ipv6_address,
                 vendor_metadata, allocated_at, activated_at, suspended_at, revoked_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(subscriber_id) DO UPDATE SET
                vlan_id = excluded.vlan_id,
                inner_vlan_id = excluded.inner_vlan_id,
                qinq_enabled = excluded.qinq_enabled,
                option82_circuit_id = excluded.option82_circuit_id,
                option82_remote_id = excluded.option82_remote_id,
                option82_policy = excluded.option82_policy,
                ipv4_state = excluded.ipv4_state,
                ipv4_address = excluded.ipv4_address,
                ipv4_pool_id = excluded.ipv4_pool_id,
                ipv4_record_id = excluded.ipv4_record_id,
                static_ipv4_address = excluded.static_ipv4_address,
                ipv6_assignment_mode = excluded.ipv6_assignment_mode,
                ipv6_state = excluded.ipv6_state,
                ipv6_prefix = excluded.ipv6_prefix,
                ipv6_prefix_length = excluded.ipv6_prefix_length,
                ipv6_record_id = excluded.ipv6_record_id,
                static_ipv6_address = excluded.static_ipv6_address,
                vendor_metadata = excluded.vendor_metadata,
                allocated_at = excluded.allocated_at,
                activated_at = excluded.activated_at,
                suspended_at = excluded.suspended_at,
                revoked_at = excluded.revoked_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&profile.subscriber_id)
        .bind(&profile.tenant_id)
        .bind(profile.vlan_id)
        .bind(profile.inner_vlan_id)
        .bind(profile.qinq_enabled as i64)
        .bind(&profile.option82_circuit_id)
        .bind(&profile.option82_remote_id)
        .bind(option82_policy_str(profile.option82_policy))
        .bind(lifecycle_state_str(profile.ipv4_state))
        .bind(&profile.ipv4_address)
        .bind(&profile.ipv4_pool_id)
        .bind(&profile.ipv4_record_id)
        .bind(&profile.static_ipv4_address)
        .bind(ipv6_assignment_mode_str(profile.ipv6_assignment_mode))
        .bind(lifecycle_state_str(profile.ipv6_state))
        .bind(&profile.ipv6_prefix)
        .bind(profile.ipv6_prefix_length.map(|v| v as i64))
        .bind(&profile.ipv6_record_id)
        .bind(&profile.static_ipv6_address)
        .bind(serde_json::to_string(&profile.vendor_metadata)?)
        .bind(profile.allocated_at.map(|t| t.to_rfc3339()))
        .bind(profile.activated_at.map(|t| t.to_rfc3339()))
        .bind(profile.suspended_at.map(|t| t.to_rfc3339()))
        .bind(profile.revoked_at.map(|t| t.to_rfc3339()))
        .bind(profile.created_at.to_rfc3339())
        .bind(profile.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_profile(&self, subscriber_id: &str) -> Result<Option<SubscriberNetworkProfile>> {
        let row = sqlx::query("SELECT * FROM subscriber_network_profiles WHERE subscriber_id = ?")
            .bind(subscriber_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Self::row_to_profile(&r)).transpose()?)
    }

    async fn delete_profile(&self, subscriber_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM subscriber_network_profiles WHERE subscriber_id = ?")
            .bind(subscriber_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct SqliteServiceRepository {
    pool: SqlitePool,
}

impl SqliteServiceRepository {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS service_instances (
                id TEXT PRIMARY KEY,
                subscriber_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                plan_id TEXT NOT NULL,
                state TEXT NOT NULL,
                reason TEXT,
                auto_resume_at TEXT,
                last_health_check TEXT,
                last_health_check_result TEXT,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                activated_at TEXT,
                suspended_at TEXT,
                terminated_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_service_instances_subscriber ON service_instances(subscriber_id)")
            .execute(&pool)
            .await?;
        Ok(Self { pool })
    }

    fn row_to_service(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<ServiceInstance> {
        Ok(ServiceInstance {
            id: row.try_get::<String, _>("id")?.parse().map_err(sqlx_parse_err)?,
            subscriber_id: row.try_get("subscriber_id")?,
            tenant_id: row.try_get("tenant_id")?,
            plan_id: row.try_get("plan_id")?,
            state: parse_service_state(&row.try_get::<String, _>("state")?),
            reason: row.try_get("reason")?,
            auto_resume_at: parse_ts_opt(row, "auto_resume_at")?,
            last_health_check: parse_ts_opt(row, "last_health_check")?,
            last_health_check_result: row.try_get("last_health_check_result")?,
            metadata: serde_json::from_str(&row.try_get::<String, _>("metadata")?).unwrap_or_default(),
            created_at: parse_ts(row, "created_at")?,
            updated_at: parse_ts(row, "updated_at")?,
            activated_at: parse_ts_opt(row, "activated_at")?,
            suspended_at: parse_ts_opt(row, "suspended_at")?,
            terminated_at: parse_ts_opt(row, "terminated_at")?,
        })
    }
}

#[async_trait]
impl ServiceRepository for SqliteServiceRepository {
    async fn save_service(&self, service: &ServiceInstance) -> Result<()> {
        let metadata = serde_json::to_string(&service.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO service_instances (id, subscriber_id, tenant_id, plan_id, state, reason, auto_resume_at, last_health_check, last_health_check_result, metadata, created_at, updated_at, activated_at, suspended_at, terminated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                reason = excluded.reason,
                auto_resume_at = excluded.auto_resume_at,
                last_health_check = excluded.last_health_check,
                last_health_check_result = excluded.last_health_check_result,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at,
                activated_at = excluded.activated_at,
                suspended_at = excluded.suspended_at,
                terminated_at = excluded.terminated_at
            "#,
        )
        .bind(service.id.to_string())
        .bind(&service.subscriber_id)
        .bind(&service.tenant_id)
        .bind(&service.plan_id)
        .bind(service_state_str(service.state))
        .bind(&service.reason)
        .bind(service.auto_resume_at.map(|t| t.to_rfc3339()))
        .bind(service.last_health_check.map(|t| t.to_rfc3339()))
        .bind(&service.last_health_check_result)
        .bind(metadata)
        .bind(service.created_at.to_rfc3339())
        .bind(service.updated_at.to_rfc3339())
        .bind(service.activated_at.map(|t| t.to_rfc3339()))
        .bind(service.suspended_at.map(|t| t.to_rfc3339()))
        .bind(service.terminated_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_service(&self, id: Uuid) -> Result<Option<ServiceInstance>> {
        let row = sqlx::query("SELECT * FROM service_instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Self::row_to_service(&r)).transpose()?)
    }

    async fn get_service_by_subscriber(&self, subscriber_id: &str) -> Result<Option<ServiceInstance>> {
        let row = sqlx::query("SELECT * FROM service_instances WHERE subscriber_id = ? ORDER BY created_at DESC LIMIT 1")
            .bind(subscriber_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Self::row_to_service(&r)).transpose()?)
    }

    async fn list_services(&self) -> Result<Vec<ServiceInstance>> {
        let rows = sqlx::query("SELECT * FROM service_instances ORDER BY created_at").fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::row_to_service).collect::<sqlx::Result<Vec<_>>>()?)
    }
}

pub struct SqliteLifecycleEventRepository {
    pool: SqlitePool,
}

impl SqliteLifecycleEventRepository {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lifecycle_events (
                id TEXT PRIMARY KEY,
                subscriber_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                from_state TEXT,
                to_state TEXT NOT NULL,
                detail TEXT NOT NULL,
                occurred_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_lifecycle_events_subscriber ON lifecycle_events(subscriber_id)")
            .execute(&pool)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl LifecycleEventRepository for SqliteLifecycleEventRepository {
    async fn save_event(&self, event: &LifecycleEvent) -> Result<()> {
        let detail = serde_json::to_string(&event.detail)?;
        sqlx::query(
            "INSERT INTO lifecycle_events (id, subscriber_id, tenant_id, event_type, from_state, to_state, detail, occurred_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(&event.subscriber_id)
        .bind(&event.tenant_id)
        .bind(&event.event_type)
        .bind(&event.from_state)
        .bind(&event.to_state)
        .bind(detail)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_events(&self, subscriber_id: &str) -> Result<Vec<LifecycleEvent>> {
        let rows = sqlx::query("SELECT * FROM lifecycle_events WHERE subscriber_id = ? ORDER BY occurred_at")
            .bind(subscriber_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(LifecycleEvent {
                    id: row.try_get::<String, _>("id")?.parse().map_err(sqlx_parse_err)?,
                    subscriber_id: row.try_get("subscriber_id")?,
                    tenant_id: row.try_get("tenant_id")?,
                    event_type: row.try_get("event_type")?,
                    from_state: row.try_get("from_state")?,
                    to_state: row.try_get("to_state")?,
                    detail: serde_json::from_str(&row.try_get::<String, _>("detail")?).unwrap_or_default(),
                    occurred_at: parse_ts(row, "occurred_at")?,
                })
            })
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(Into::into)
    }
}

fn parse_ts(row: &sqlx::sqlite::SqliteRow, column: &str) -> sqlx::Result<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(sqlx_parse_err)
}

fn parse_ts_opt(row: &sqlx::sqlite::SqliteRow, column: &str) -> sqlx::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| DateTime::parse_from_rfc3339(&s).map(|t| t.with_timezone(&Utc)).map_err(sqlx_parse_err))
        .transpose()
}

fn sqlx_parse_err<E: std::fmt::Display>(e: E) -> sqlx::Error {
    sqlx::Error::Decode(e.to_string().into())
}

fn workflow_status_str(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Pending => "pending",
        WorkflowStatus::Running => "running",
        WorkflowStatus::Completed => "completed",
        WorkflowStatus::PartiallyCompleted => "partially_completed",
        WorkflowStatus::Failed => "failed",
        WorkflowStatus::RollingBack => "rolling_back",
        WorkflowStatus::RolledBack => "rolled_back",
        WorkflowStatus::RollbackFailed => "rollback_failed",
        WorkflowStatus::Timeout => "timeout",
        WorkflowStatus::Compensated => "compensated",
    }
}

fn parse_workflow_status(s: &str) -> WorkflowStatus {
    match s {
        "running" => WorkflowStatus::Running,
        "completed" => WorkflowStatus::Completed,
        "partially_completed" => WorkflowStatus::PartiallyCompleted,
        "failed" => WorkflowStatus::Failed,
        "rolling_back" => WorkflowStatus::RollingBack,
        "rolled_back" => WorkflowStatus::RolledBack,
        "rollback_failed" => WorkflowStatus::RollbackFailed,
        "timeout" => WorkflowStatus::Timeout,
        "compensated" => WorkflowStatus::Compensated,
        _ => WorkflowStatus::Pending,
    }
}

fn parse_workflow_type(s: &str) -> WorkflowType {
    match s {
        "deprovision_subscriber" => WorkflowType::DeprovisionSubscriber,
        "activate_service" => WorkflowType::ActivateService,
        "suspend_service" => WorkflowType::SuspendService,
        _ => WorkflowType::ProvisionSubscriber,
    }
}

fn step_status_str(status: WorkflowStepStatus) -> &'static str {
    match status {
        WorkflowStepStatus::Pending => "pending",
        WorkflowStepStatus::Running => "running",
        WorkflowStepStatus::Completed => "completed",
        WorkflowStepStatus::Failed => "failed",
        WorkflowStepStatus::Compensating => "compensating",
        WorkflowStepStatus::Compensated => "compensated",
        WorkflowStepStatus::CompensationFailed => "compensation_failed",
    }
}

fn parse_step_status(s: &str) -> WorkflowStepStatus {
    match s {
        "running" => WorkflowStepStatus::Running,
        "completed" => WorkflowStepStatus::Completed,
        "failed" => WorkflowStepStatus::Failed,
        "compensating" => WorkflowStepStatus::Compensating,
        "compensated" => WorkflowStepStatus::Compensated,
        "compensation_failed" => WorkflowStepStatus::CompensationFailed,
        _ => WorkflowStepStatus::Pending,
    }
}

fn lifecycle_state_str(state: crate::lifecycle::LifecycleState) -> &'static str {
    use crate::lifecycle::LifecycleState::*;
    match state {
        Pending => "pending",
        Allocated => "allocated",
        Active => "active",
        Suspended => "suspended",
        Revoking => "revoking",
        Revoked => "revoked",
        Failed => "failed",
    }
}

fn parse_lifecycle_state(s: &str) -> crate::lifecycle::LifecycleState {
    use crate::lifecycle::LifecycleState::*;
    match s {
        "allocated" => Allocated,
        "active" => Active,
        "suspended" => Suspended,
        "revoking" => Revoking,
        "revoked" => Revoked,
        "failed" => Failed,
        _ => Pending,
    }
}

fn ipv6_assignment_mode_str(mode: Ipv6AssignmentMode) -> &'static str {
    match mode {
        Ipv6AssignmentMode::None => "none",
        Ipv6AssignmentMode::StatelessAutoconfig => "stateless_autoconfig",
        Ipv6AssignmentMode::StatefulDhcpv6 => "stateful_dhcpv6",
        Ipv6AssignmentMode::PrefixDelegation => "prefix_delegation",
        Ipv6AssignmentMode::DualStack => "dual_stack",
    }
}

fn parse_ipv6_assignment_mode(s: &str) -> Ipv6AssignmentMode {
    match s {
        "stateless_autoconfig" => Ipv6AssignmentMode::StatelessAutoconfig,
        "stateful_dhcpv6" => Ipv6AssignmentMode::StatefulDhcpv6,
        "prefix_delegation" => Ipv6AssignmentMode::PrefixDelegation,
        "dual_stack" => Ipv6AssignmentMode::DualStack,
        _ => Ipv6AssignmentMode::None,
    }
}

fn option82_policy_str(policy: Option82Policy) -> &'static str {
    match policy {
        Option82Policy::Enforce => "enforce",
        Option82Policy::Log => "log",
        Option82Policy::Ignore => "ignore",
    }
}

fn parse_option82_policy(s: &str) -> Option82Policy {
    match s {
        "enforce" => Option82Policy::Enforce,
        "ignore" => Option82Policy::Ignore,
        _ => Option82Policy::Log,
    }
}

fn service_state_str(state: ServiceState) -> &'static str {
    match state {
        ServiceState::Pending => "pending",
        ServiceState::Provisioning => "provisioning",
        ServiceState::Active => "active",
        ServiceState::Suspended => "suspended",
        ServiceState::SuspendedFraud => "suspended_fraud",
        ServiceState::SuspendedNonPayment => "suspended_non_payment",
        ServiceState::Terminating => "terminating",
        ServiceState::Terminated => "terminated",
        ServiceState::Failed => "failed",
    }
}

fn parse_service_state(s: &str) -> ServiceState {
    match s {
        "provisioning" => ServiceState::Provisioning,
        "active" => ServiceState::Active,
        "suspended" => ServiceState::Suspended,
        "suspended_fraud" => ServiceState::SuspendedFraud,
        "suspended_non_payment" => ServiceState::SuspendedNonPayment,
        "terminating" => ServiceState::Terminating,
        "terminated" => ServiceState::Terminated,
        "failed" => ServiceState::Failed,
        _ => ServiceState::Pending,
    }
}
