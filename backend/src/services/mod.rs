//! Domain services.

pub mod accrual;
pub mod attendance;
pub mod calendar;
pub mod events;
pub mod expression;
pub mod leave;
pub mod notification;
pub mod outbox;
pub mod payroll;
pub mod workflow;

pub use accrual::AccrualEngine;
pub use attendance::{AttendanceService, RegularizationSubscriber};
pub use calendar::CalendarService;
pub use leave::{LeaveService, LeaveWorkflowSubscriber};
pub use notification::NotificationService;
pub use outbox::OutboxDispatcher;
pub use payroll::PayrollService;
pub use workflow::{WorkflowDefinitionService, WorkflowEngine, WorkflowScheduler};
