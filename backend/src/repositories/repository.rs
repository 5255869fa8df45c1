//! Repository trait and common functionality
//!
//! This module defines the standard repository trait that all repository modules
//! should implement, along with transaction management utilities.

use crate::error::AppError;
use crate::types::OrganizationId;
use sqlx::{PgExecutor, PgPool};

/// Standard repository trait for database operations
///
/// Repository modules implement this trait where plain tenant-scoped CRUD
/// access makes sense; aggregate-specific operations live on the concrete
/// types.
#[allow(async_fn_in_trait, dead_code)]
pub trait Repository<T> {
    /// Target table name.
    const TABLE: &'static str;
    /// Primary key type for the record.
    type Id;

    /// Find a single record by ID within the tenant.
    async fn find_by_id(
        &self,
        db: impl PgExecutor<'_>,
        org: OrganizationId,
        id: Self::Id,
    ) -> Result<T, AppError>;

    /// Create a new record
    async fn create(&self, db: impl PgExecutor<'_>, item: &T) -> Result<T, AppError>;
}

/// Transaction management for database operations
///
/// Provides begin, commit, and rollback utilities for managing database
/// transactions across repository operations.
pub mod transaction {
    use crate::error::AppError;
    use sqlx::postgres::PgTransaction;
    use sqlx::PgPool;

    /// Begin a new database transaction
    ///
    /// Returns a transaction handle that can be used for multiple database operations.
    /// On success, the transaction can be committed via [`commit_transaction`].
    /// On failure, the transaction can be rolled back via [`rollback_transaction`].
    pub async fn begin_transaction(db: &PgPool) -> Result<PgTransaction<'_>, AppError> {
        db.begin()
            .await
            .map_err(|e| AppError::InternalServerError(e.into()))
    }

    /// Commit a transaction
    ///
    /// Commits all changes made within the transaction to the database.
    /// Returns error if commit fails.
    pub async fn commit_transaction(tx: PgTransaction<'_>) -> Result<(), AppError> {
        tx.commit()
            .await
            .map_err(|e| AppError::InternalServerError(e.into()))
    }

    /// Rollback a transaction
    ///
    /// Undoes all changes made within the transaction since it began.
    /// Returns error if rollback fails.
    pub async fn rollback_transaction(tx: PgTransaction<'_>) -> Result<(), AppError> {
        tx.rollback()
            .await
            .map_err(|e| AppError::InternalServerError(e.into()))
    }
}

/// Helper for paginated queries: clamps page inputs to sane bounds.
pub fn page_bounds(page: u32, page_size: u32) -> (i64, i64) {
    let page = page.max(1);
    let page_size = page_size.clamp(1, 200);
    let offset = (page as i64 - 1) * page_size as i64;
    (page_size as i64, offset)
}

#[allow(dead_code)]
pub async fn ping(db: &PgPool) -> Result<(), AppError> {
    sqlx::query("SELECT 1").execute(db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_clamp_inputs() {
        assert_eq!(page_bounds(0, 0), (1, 0));
        assert_eq!(page_bounds(1, 20), (20, 0));
        assert_eq!(page_bounds(3, 20), (20, 40));
        assert_eq!(page_bounds(1, 10_000), (200, 0));
    }
}
