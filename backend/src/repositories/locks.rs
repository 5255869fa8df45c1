//! Advisory lock helpers.
//!
//! Serializes work per aggregate without long-lived row locks: accrual runs
//! per (employee, leave type) and instance advancement per workflow
//! instance. Keys are derived from (kind, uuid) with a stable hash so the
//! same aggregate always maps to the same lock key.

use crate::error::AppError;
use sqlx::PgExecutor;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Derive a stable i64 lock key from an aggregate kind and its UUID.
pub fn lock_key(kind: &str, id: &Uuid) -> i64 {
    let mut hasher = DefaultHasher::new();
    kind.hash(&mut hasher);
    id.hash(&mut hasher);
    hasher.finish() as i64
}

/// Acquire a transaction-scoped advisory lock; blocks until granted.
/// Released automatically at commit or rollback.
pub async fn acquire_xact_lock(
    db: impl PgExecutor<'_>,
    kind: &str,
    id: &Uuid,
) -> Result<(), AppError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(lock_key(kind, id))
        .execute(db)
        .await?;
    Ok(())
}

/// Try to acquire a transaction-scoped advisory lock without blocking.
/// Returns `false` when the lock is contended; callers skip and retry on
/// the next tick.
pub async fn try_xact_lock(
    db: impl PgExecutor<'_>,
    kind: &str,
    id: &Uuid,
) -> Result<bool, AppError> {
    let granted: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
        .bind(lock_key(kind, id))
        .fetch_one(db)
        .await?;
    Ok(granted)
}

/// Lock key for accrual runs, serialized per (employee, leave type).
pub fn accrual_lock_key(employee: &Uuid, leave_type: &Uuid) -> i64 {
    let mut hasher = DefaultHasher::new();
    "accrual".hash(&mut hasher);
    employee.hash(&mut hasher);
    leave_type.hash(&mut hasher);
    hasher.finish() as i64
}

/// Acquire the accrual advisory lock for an (employee, leave type) pair.
pub async fn acquire_accrual_lock(
    db: impl PgExecutor<'_>,
    employee: &Uuid,
    leave_type: &Uuid,
) -> Result<(), AppError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(accrual_lock_key(employee, leave_type))
        .execute(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_are_stable_and_distinct() {
        let id = Uuid::new_v4();
        assert_eq!(lock_key("instance", &id), lock_key("instance", &id));
        assert_ne!(lock_key("instance", &id), lock_key("balance", &id));

        let other = Uuid::new_v4();
        assert_ne!(lock_key("instance", &id), lock_key("instance", &other));
    }

    #[test]
    fn accrual_key_depends_on_both_ids() {
        let e = Uuid::new_v4();
        let l1 = Uuid::new_v4();
        let l2 = Uuid::new_v4();
        assert_eq!(accrual_lock_key(&e, &l1), accrual_lock_key(&e, &l1));
        assert_ne!(accrual_lock_key(&e, &l1), accrual_lock_key(&e, &l2));
    }
}
