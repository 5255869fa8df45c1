//! The workflow engine and its scheduled maintenance.

pub mod definitions;
pub mod engine;
pub mod scheduler;
pub mod selector;

pub use definitions::{CreateWorkflowDefinition, WorkflowDefinitionService};
pub use engine::{ActOutcome, ApprovalOutcome, WorkflowEngine};
pub use scheduler::{SlaAction, TickStats, WorkflowScheduler};
pub use selector::{ApproverResolver, ResolvedApprover};
