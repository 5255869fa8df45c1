//! Workflow definition authoring.
//!
//! Definitions arrive as an embedded graph document; it is validated and
//! normalized into node and edge rows in one transaction. The rows are the
//! authoritative representation at execution time, the document is kept on
//! the definition for round-tripping back to authoring tools.

use crate::config::Config;
use crate::error::AppError;
use crate::models::workflow::{GraphDoc, WorkflowDefinition, WorkflowEdge, WorkflowNode};
use crate::repositories::{transaction, WorkflowDefinitionRepository};
use crate::types::{OrganizationId, WorkflowDefinitionId, WorkflowEdgeId, WorkflowNodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
/// Payload for creating a workflow definition from a graph document.
pub struct CreateWorkflowDefinition {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    pub workflow_type: String,
    #[serde(default)]
    pub allow_parallel_approvals: bool,
    #[serde(default)]
    pub require_all_approvals: bool,
    #[serde(default = "default_true")]
    pub auto_escalation: bool,
    pub escalation_after_hours: Option<i64>,
    pub graph: GraphDoc,
}

fn default_true() -> bool {
    true
}

#[derive(Clone)]
pub struct WorkflowDefinitionService {
    pool: PgPool,
    definitions: WorkflowDefinitionRepository,
}

impl WorkflowDefinitionService {
    pub fn new(pool: PgPool, _config: Config) -> Self {
        Self {
            pool,
            definitions: WorkflowDefinitionRepository::new(),
        }
    }

    /// Creates the next version of `code` from a graph document.
    /// Older versions stay untouched; in-flight instances keep referencing
    /// them.
    pub async fn create_from_graph(
        &self,
        org: OrganizationId,
        payload: CreateWorkflowDefinition,
        now: DateTime<Utc>,
    ) -> Result<WorkflowDefinition, AppError> {
        payload
            .graph
            .validate()
            .map_err(AppError::validation)?;

        let mut tx = transaction::begin_transaction(&self.pool).await?;

        let version = match self
            .definitions
            .find_active_by_code(&mut *tx, org, &payload.code)
            .await?
        {
            Some(prev) => prev.version + 1,
            None => 1,
        };

        let graph_doc = serde_json::to_value(&payload.graph)
            .map_err(|e| AppError::InternalServerError(e.into()))?;
        let def = WorkflowDefinition {
            id: WorkflowDefinitionId::new(),
            organization_id: org,
            code: payload.code,
            version,
            name: payload.name,
            workflow_type: payload.workflow_type,
            is_active: true,
            allow_parallel_approvals: payload.allow_parallel_approvals,
            require_all_approvals: payload.require_all_approvals,
            auto_escalation: payload.auto_escalation,
            escalation_after_hours: payload.escalation_after_hours,
            graph: Some(Json(graph_doc)),
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        let def = self.definitions.create(&mut *tx, &def).await?;

        let mut ids_by_key: HashMap<String, WorkflowNodeId> = HashMap::new();
        for (order, doc) in payload.graph.nodes.iter().enumerate() {
            let node = WorkflowNode {
                id: WorkflowNodeId::new(),
                workflow_id: def.id,
                node_key: doc.key.clone(),
                node_order: order as i32,
                kind: doc.kind,
                name: doc.name.clone(),
                approver_selector: doc.approver.clone(),
                sla_hours: doc.sla_hours,
                escalation_target: doc.escalation_target.clone(),
                action: doc.action.clone().map(Json),
                condition_expression: doc.condition.clone(),
                created_at: now,
            };
            let node = self.definitions.insert_node(&mut *tx, &node).await?;
            ids_by_key.insert(node.node_key.clone(), node.id);
        }

        for doc in &payload.graph.edges {
            // validate() guarantees both endpoints exist.
            let (Some(&from), Some(&to)) = (ids_by_key.get(&doc.from), ids_by_key.get(&doc.to))
            else {
                return Err(AppError::validation(format!(
                    "edge references unknown node '{}' or '{}'",
                    doc.from, doc.to
                )));
            };
            let edge = WorkflowEdge {
                id: WorkflowEdgeId::new(),
                workflow_id: def.id,
                from_node_id: from,
                to_node_id: to,
                guard_expression: doc.guard.clone(),
                priority: doc.priority,
                kind: doc.kind,
                created_at: now,
            };
            self.definitions.insert_edge(&mut *tx, &edge).await?;
        }

        transaction::commit_transaction(tx).await?;
        Ok(def)
    }
}
