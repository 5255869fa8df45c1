//! Workflow definition repository: definitions plus their node and edge rows.

use crate::error::AppError;
use crate::models::workflow::{WorkflowDefinition, WorkflowEdge, WorkflowNode};
use crate::types::{OrganizationId, WorkflowDefinitionId, WorkflowNodeId};
use sqlx::PgExecutor;

const TABLE_NAME: &str = "workflow_definitions";
const SELECT_COLUMNS: &str = "id, organization_id, code, version, name, workflow_type, \
is_active, allow_parallel_approvals, require_all_approvals, auto_escalation, \
escalation_after_hours, graph, is_deleted, deleted_at, created_at, updated_at";

const NODE_TABLE: &str = "workflow_nodes";
const NODE_COLUMNS: &str = "id, workflow_id, node_key, node_order, kind, name, \
approver_selector, sla_hours, escalation_target, action, condition_expression, created_at";

const EDGE_TABLE: &str = "workflow_edges";
const EDGE_COLUMNS: &str = "id, workflow_id, from_node_id, to_node_id, guard_expression, \
priority, kind, created_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct WorkflowDefinitionRepository;

impl WorkflowDefinitionRepository {
    pub fn new() -> Self {
        Self
    }

    /// The highest active version for `code`, used at instantiation.
    pub async fn find_active_by_code(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        code: &str,
    ) -> Result<Option<WorkflowDefinition>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE organization_id = $1 AND code = $2 AND is_active = TRUE \
             AND is_deleted = FALSE ORDER BY version DESC LIMIT 1",
            SELECT_COLUMNS, TABLE_NAME
        );
        let row = sqlx::query_as::<_, WorkflowDefinition>(&query)
            .bind(org)
            .bind(code)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    pub async fn find_by_id(
        &self,
        db: impl PgExecutor<'_>,
        id: WorkflowDefinitionId,
    ) -> Result<WorkflowDefinition, AppError> {
        let query = format!("SELECT {} FROM {} WHERE id = $1", SELECT_COLUMNS, TABLE_NAME);
        sqlx::query_as::<_, WorkflowDefinition>(&query)
            .bind(id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Workflow definition not found".into()))
    }

    pub async fn create(
        &self,
        db: impl PgExecutor<'_>,
        item: &WorkflowDefinition,
    ) -> Result<WorkflowDefinition, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, code, version, name, workflow_type, is_active, \
             allow_parallel_approvals, require_all_approvals, auto_escalation, \
             escalation_after_hours, graph, is_deleted, deleted_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, WorkflowDefinition>(&query)
            .bind(item.id)
            .bind(item.organization_id)
            .bind(&item.code)
            .bind(item.version)
            .bind(&item.name)
            .bind(&item.workflow_type)
            .bind(item.is_active)
            .bind(item.allow_parallel_approvals)
            .bind(item.require_all_approvals)
            .bind(item.auto_escalation)
            .bind(item.escalation_after_hours)
            .bind(&item.graph)
            .bind(item.is_deleted)
            .bind(item.deleted_at)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    pub async fn insert_node(
        &self,
        db: impl PgExecutor<'_>,
        node: &WorkflowNode,
    ) -> Result<WorkflowNode, AppError> {
        let query = format!(
            "INSERT INTO {} (id, workflow_id, node_key, node_order, kind, name, \
             approver_selector, sla_hours, escalation_target, action, condition_expression, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING {}",
            NODE_TABLE, NODE_COLUMNS
        );
        let row = sqlx::query_as::<_, WorkflowNode>(&query)
            .bind(node.id)
            .bind(node.workflow_id)
            .bind(&node.node_key)
            .bind(node.node_order)
            .bind(node.kind.db_value())
            .bind(&node.name)
            .bind(&node.approver_selector)
            .bind(node.sla_hours)
            .bind(&node.escalation_target)
            .bind(&node.action)
            .bind(&node.condition_expression)
            .bind(node.created_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    pub async fn insert_edge(
        &self,
        db: impl PgExecutor<'_>,
        edge: &WorkflowEdge,
    ) -> Result<WorkflowEdge, AppError> {
        let query = format!(
            "INSERT INTO {} (id, workflow_id, from_node_id, to_node_id, guard_expression, \
             priority, kind, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            EDGE_TABLE, EDGE_COLUMNS
        );
        let row = sqlx::query_as::<_, WorkflowEdge>(&query)
            .bind(edge.id)
            .bind(edge.workflow_id)
            .bind(edge.from_node_id)
            .bind(edge.to_node_id)
            .bind(&edge.guard_expression)
            .bind(edge.priority)
            .bind(edge.kind.db_value())
            .bind(edge.created_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    pub async fn find_nodes(
        &self,
        db: impl PgExecutor<'_>,
        workflow_id: WorkflowDefinitionId,
    ) -> Result<Vec<WorkflowNode>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE workflow_id = $1 ORDER BY node_order",
            NODE_COLUMNS, NODE_TABLE
        );
        let rows = sqlx::query_as::<_, WorkflowNode>(&query)
            .bind(workflow_id)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    pub async fn find_node(
        &self,
        db: impl PgExecutor<'_>,
        id: WorkflowNodeId,
    ) -> Result<WorkflowNode, AppError> {
        let query = format!("SELECT {} FROM {} WHERE id = $1", NODE_COLUMNS, NODE_TABLE);
        sqlx::query_as::<_, WorkflowNode>(&query)
            .bind(id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Workflow node not found".into()))
    }

    /// Outgoing edges of a node, highest priority first.
    pub async fn find_edges_from(
        &self,
        db: impl PgExecutor<'_>,
        workflow_id: WorkflowDefinitionId,
        from_node_id: WorkflowNodeId,
    ) -> Result<Vec<WorkflowEdge>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE workflow_id = $1 AND from_node_id = $2 \
             ORDER BY priority DESC, created_at",
            EDGE_COLUMNS, EDGE_TABLE
        );
        let rows = sqlx::query_as::<_, WorkflowEdge>(&query)
            .bind(workflow_id)
            .bind(from_node_id)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }
}
