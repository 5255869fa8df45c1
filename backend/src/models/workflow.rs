//! Workflow definitions: the versioned graph of nodes and edges an
//! approval runs through.
//!
//! Definitions may be authored as an embedded graph document; it is
//! normalized into node and edge rows at create time, and the rows are the
//! authoritative representation during execution.

use crate::types::{OrganizationId, WorkflowDefinitionId, WorkflowEdgeId, WorkflowNodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Approval,
    Condition,
    Action,
    Notification,
    End,
}

impl NodeKind {
    pub fn db_value(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Approval => "approval",
            NodeKind::Condition => "condition",
            NodeKind::Action => "action",
            NodeKind::Notification => "notification",
            NodeKind::End => "end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Default,
    Conditional,
    Success,
    Failure,
}

impl EdgeKind {
    pub fn db_value(&self) -> &'static str {
        match self {
            EdgeKind::Default => "default",
            EdgeKind::Conditional => "conditional",
            EdgeKind::Success => "success",
            EdgeKind::Failure => "failure",
        }
    }
}

/// How approvers for an approval node are chosen.
///
/// Wire format:
/// - `user:<uuid>` — a fixed user.
/// - `role:<code>` or `role:<code>@<scope>` — all members of a role, scoped
///   to the organization (and optionally a department scope).
/// - any other string — a dotted path resolved against the subject, e.g.
///   `reporting_manager` or `reporting_manager.reporting_manager`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApproverSelector {
    User(Uuid),
    Role { code: String, scope: Option<String> },
    Expression(String),
}

impl FromStr for ApproverSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty approver selector".to_string());
        }
        if let Some(rest) = s.strip_prefix("user:") {
            let uuid = Uuid::parse_str(rest.trim())
                .map_err(|e| format!("invalid user selector '{}': {}", s, e))?;
            return Ok(ApproverSelector::User(uuid));
        }
        if let Some(rest) = s.strip_prefix("role:") {
            let rest = rest.trim();
            if rest.is_empty() {
                return Err(format!("invalid role selector '{}'", s));
            }
            return Ok(match rest.split_once('@') {
                Some((code, scope)) => ApproverSelector::Role {
                    code: code.to_string(),
                    scope: Some(scope.to_string()),
                },
                None => ApproverSelector::Role {
                    code: rest.to_string(),
                    scope: None,
                },
            });
        }
        Ok(ApproverSelector::Expression(s.to_string()))
    }
}

impl fmt::Display for ApproverSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApproverSelector::User(id) => write!(f, "user:{}", id),
            ApproverSelector::Role { code, scope: None } => write!(f, "role:{}", code),
            ApproverSelector::Role {
                code,
                scope: Some(scope),
            } => write!(f, "role:{}@{}", code, scope),
            ApproverSelector::Expression(path) => write!(f, "{}", path),
        }
    }
}

/// Declarative node action. Actions must be idempotent per
/// `(instance_id, node_id)`; the engine enforces this by logging executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Append a custom event to the outbox.
    EmitEvent {
        event_name: String,
        #[serde(default)]
        #[schema(value_type = Object)]
        payload: Value,
    },
    /// Set a running variable on the instance.
    SetVariable {
        name: String,
        #[schema(value_type = Object)]
        value: Value,
    },
    /// Enqueue a notification for the subject's employee.
    Notify {
        template: String,
        #[serde(default)]
        recipients: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
/// Versioned workflow definition; `(organization_id, code, version)` unique.
/// Old versions stay referenced by in-flight instances.
pub struct WorkflowDefinition {
    pub id: WorkflowDefinitionId,
    pub organization_id: OrganizationId,
    pub code: String,
    pub version: i32,
    pub name: String,
    /// Subject category, e.g. `leave_request` or `regularization`.
    pub workflow_type: String,
    pub is_active: bool,
    pub allow_parallel_approvals: bool,
    pub require_all_approvals: bool,
    pub auto_escalation: bool,
    /// Hours past SLA before an escalation task is created.
    pub escalation_after_hours: Option<i64>,
    /// The graph document this definition was imported from, if any.
    #[schema(value_type = Object)]
    pub graph: Option<Json<Value>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct WorkflowNode {
    pub id: WorkflowNodeId,
    pub workflow_id: WorkflowDefinitionId,
    /// Stable key within the definition, unique per workflow.
    pub node_key: String,
    pub node_order: i32,
    pub kind: NodeKind,
    pub name: String,
    /// Serialized [`ApproverSelector`], approval nodes only.
    pub approver_selector: Option<String>,
    pub sla_hours: Option<i64>,
    /// Serialized [`ApproverSelector`] for the escalation target.
    pub escalation_target: Option<String>,
    #[schema(value_type = Object)]
    pub action: Option<Json<ActionSpec>>,
    pub condition_expression: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowNode {
    pub fn selector(&self) -> Option<Result<ApproverSelector, String>> {
        self.approver_selector.as_deref().map(str::parse)
    }

    pub fn escalation_selector(&self) -> Option<Result<ApproverSelector, String>> {
        self.escalation_target.as_deref().map(str::parse)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct WorkflowEdge {
    pub id: WorkflowEdgeId,
    pub workflow_id: WorkflowDefinitionId,
    pub from_node_id: WorkflowNodeId,
    pub to_node_id: WorkflowNodeId,
    /// Guard evaluated against the instance context; `None` marks an
    /// unconditional edge.
    pub guard_expression: Option<String>,
    /// Higher priority edges are evaluated first.
    pub priority: i32,
    pub kind: EdgeKind,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Graph import document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
/// Embedded graph document accepted on definition create.
pub struct GraphDoc {
    pub nodes: Vec<GraphNodeDoc>,
    pub edges: Vec<GraphEdgeDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GraphNodeDoc {
    /// Key referenced by edges, unique within the document.
    pub key: String,
    pub kind: NodeKind,
    pub name: String,
    #[serde(default)]
    pub approver: Option<String>,
    #[serde(default)]
    pub sla_hours: Option<i64>,
    #[serde(default)]
    pub escalation_target: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub action: Option<ActionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GraphEdgeDoc {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub guard: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_edge_kind")]
    pub kind: EdgeKind,
}

fn default_edge_kind() -> EdgeKind {
    EdgeKind::Default
}

impl GraphDoc {
    /// Structural validation: exactly one start, at least one end, edges
    /// reference known keys, approval nodes carry a selector.
    pub fn validate(&self) -> Result<(), String> {
        let starts = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Start)
            .count();
        if starts != 1 {
            return Err(format!("graph must have exactly one start node, found {}", starts));
        }
        if !self.nodes.iter().any(|n| n.kind == NodeKind::End) {
            return Err("graph must have at least one end node".to_string());
        }
        let mut keys = std::collections::HashSet::new();
        for node in &self.nodes {
            if !keys.insert(node.key.as_str()) {
                return Err(format!("duplicate node key '{}'", node.key));
            }
            if node.kind == NodeKind::Approval {
                match &node.approver {
                    Some(sel) => {
                        sel.parse::<ApproverSelector>()?;
                    }
                    None => {
                        return Err(format!("approval node '{}' has no approver", node.key));
                    }
                }
            }
            if node.kind == NodeKind::Condition && node.condition.is_none() {
                return Err(format!("condition node '{}' has no expression", node.key));
            }
        }
        for edge in &self.edges {
            if !keys.contains(edge.from.as_str()) {
                return Err(format!("edge references unknown node '{}'", edge.from));
            }
            if !keys.contains(edge.to.as_str()) {
                return Err(format!("edge references unknown node '{}'", edge.to));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approver_selector_round_trips() {
        let uuid = Uuid::new_v4();
        let cases = vec![
            (
                format!("user:{}", uuid),
                ApproverSelector::User(uuid),
            ),
            (
                "role:hr_manager".to_string(),
                ApproverSelector::Role {
                    code: "hr_manager".into(),
                    scope: None,
                },
            ),
            (
                "role:lead@ENG".to_string(),
                ApproverSelector::Role {
                    code: "lead".into(),
                    scope: Some("ENG".into()),
                },
            ),
            (
                "reporting_manager.reporting_manager".to_string(),
                ApproverSelector::Expression("reporting_manager.reporting_manager".into()),
            ),
        ];
        for (raw, expected) in cases {
            let parsed: ApproverSelector = raw.parse().unwrap();
            assert_eq!(parsed, expected);
            assert_eq!(parsed.to_string(), raw);
        }
    }

    #[test]
    fn bad_selectors_are_rejected() {
        assert!("".parse::<ApproverSelector>().is_err());
        assert!("user:not-a-uuid".parse::<ApproverSelector>().is_err());
        assert!("role:".parse::<ApproverSelector>().is_err());
    }

    #[test]
    fn action_spec_serde_is_kind_tagged() {
        let action: ActionSpec = serde_json::from_value(serde_json::json!({
            "kind": "emit_event",
            "event_name": "leave.reminder",
        }))
        .unwrap();
        assert_eq!(
            action,
            ActionSpec::EmitEvent {
                event_name: "leave.reminder".into(),
                payload: Value::Null,
            }
        );
    }

    fn minimal_graph() -> GraphDoc {
        GraphDoc {
            nodes: vec![
                GraphNodeDoc {
                    key: "start".into(),
                    kind: NodeKind::Start,
                    name: "Start".into(),
                    approver: None,
                    sla_hours: None,
                    escalation_target: None,
                    condition: None,
                    action: None,
                },
                GraphNodeDoc {
                    key: "manager".into(),
                    kind: NodeKind::Approval,
                    name: "Manager approval".into(),
                    approver: Some("reporting_manager".into()),
                    sla_hours: Some(24),
                    escalation_target: Some("reporting_manager.reporting_manager".into()),
                    condition: None,
                    action: None,
                },
                GraphNodeDoc {
                    key: "end".into(),
                    kind: NodeKind::End,
                    name: "End".into(),
                    approver: None,
                    sla_hours: None,
                    escalation_target: None,
                    condition: None,
                    action: None,
                },
            ],
            edges: vec![
                GraphEdgeDoc {
                    from: "start".into(),
                    to: "manager".into(),
                    guard: None,
                    priority: 0,
                    kind: EdgeKind::Default,
                },
                GraphEdgeDoc {
                    from: "manager".into(),
                    to: "end".into(),
                    guard: None,
                    priority: 0,
                    kind: EdgeKind::Success,
                },
            ],
        }
    }

    #[test]
    fn graph_validation_accepts_minimal_flow() {
        assert!(minimal_graph().validate().is_ok());
    }

    #[test]
    fn graph_validation_rejects_structural_defects() {
        let mut g = minimal_graph();
        g.nodes[1].approver = None;
        assert!(g.validate().is_err());

        let mut g = minimal_graph();
        g.edges[0].to = "nope".into();
        assert!(g.validate().is_err());

        let mut g = minimal_graph();
        g.nodes.retain(|n| n.kind != NodeKind::Start);
        assert!(g.validate().is_err());
    }
}
