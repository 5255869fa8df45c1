//! Typed ID wrappers for compile-time type safety.
//!
//! These types wrap UUIDs to prevent accidental mixing of different entity IDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Macro to generate typed ID wrappers with common trait implementations.
macro_rules! typed_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
            sqlx::Type,
            ToSchema,
        )]
        #[sqlx(transparent)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

// Define all typed IDs
typed_id!(OrganizationId, "Unique identifier for an organization.");
typed_id!(EmployeeId, "Unique identifier for an employee.");
typed_id!(LeaveTypeId, "Unique identifier for a leave type.");
typed_id!(AccrualPolicyId, "Unique identifier for an accrual policy.");
typed_id!(LeaveBalanceId, "Unique identifier for a leave balance row.");
typed_id!(
    AccrualTransactionId,
    "Unique identifier for an accrual ledger entry."
);
typed_id!(LeaveRequestId, "Unique identifier for a leave request.");
typed_id!(AttendanceId, "Unique identifier for an attendance record.");
typed_id!(
    RegularizationId,
    "Unique identifier for an attendance regularization request."
);
typed_id!(PayrollRunId, "Unique identifier for a payroll run.");
typed_id!(PayrollRunItemId, "Unique identifier for a payroll run item.");
typed_id!(
    WorkflowDefinitionId,
    "Unique identifier for a workflow definition."
);
typed_id!(WorkflowNodeId, "Unique identifier for a workflow node.");
typed_id!(WorkflowEdgeId, "Unique identifier for a workflow edge.");
typed_id!(
    WorkflowInstanceId,
    "Unique identifier for a workflow instance."
);
typed_id!(WorkflowTaskId, "Unique identifier for a workflow task.");
typed_id!(EventId, "Unique identifier for an outbox event.");
typed_id!(HolidayId, "Unique identifier for a holiday.");
typed_id!(DelegationId, "Unique identifier for an approval delegation.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_ids_round_trip_through_strings() {
        let id = EmployeeId::new();
        let s = id.to_string();
        let parsed: EmployeeId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn typed_ids_serialize_as_plain_uuid() {
        let uuid = Uuid::new_v4();
        let id = WorkflowInstanceId::from_uuid(uuid);
        let v = serde_json::to_value(id).unwrap();
        assert_eq!(v, serde_json::json!(uuid.to_string()));
    }

    #[test]
    fn distinct_wrappers_share_uuid_representation() {
        let uuid = Uuid::new_v4();
        let a = LeaveRequestId::from_uuid(uuid);
        let b = WorkflowTaskId::from_uuid(uuid);
        assert_eq!(a.as_uuid(), b.as_uuid());
    }
}
