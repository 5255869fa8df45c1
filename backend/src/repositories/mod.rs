#![allow(unused_imports)]

pub mod accrual_policy;
pub mod accrual_transaction;
pub mod attendance;
pub mod delegation;
pub mod employee;
pub mod holiday;
pub mod leave_balance;
pub mod leave_request;
pub mod leave_type;
pub mod locks;
pub mod organization;
pub mod outbox;
pub mod payroll;
pub mod regularization;
pub mod repository;
pub mod workflow_definition;
pub mod workflow_instance;
pub mod workflow_task;

pub use accrual_policy::AccrualPolicyRepository;
pub use accrual_transaction::AccrualTransactionRepository;
pub use attendance::{AttendanceRepository, AttendanceSummary};
pub use delegation::DelegationRepository;
pub use employee::EmployeeRepository;
pub use holiday::HolidayRepository;
pub use leave_balance::LeaveBalanceRepository;
pub use leave_request::LeaveRequestRepository;
pub use leave_type::LeaveTypeRepository;
pub use organization::OrganizationRepository;
pub use outbox::OutboxRepository;
pub use payroll::PayrollRepository;
pub use regularization::RegularizationRepository;
pub use repository::{page_bounds, transaction, Repository};
pub use workflow_definition::WorkflowDefinitionRepository;
pub use workflow_instance::WorkflowInstanceRepository;
pub use workflow_task::WorkflowTaskRepository;
