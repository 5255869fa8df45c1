//! Shared handler helpers.

use crate::error::AppError;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Runs `validator` checks and flattens failures into the error envelope.
pub fn validate_payload<T: Validate>(payload: &T) -> Result<(), AppError> {
    payload.validate().map_err(|errors| {
        let messages = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter()
                    .map(move |e| format!("{}: {}", field, e.code))
            })
            .collect::<Vec<_>>();
        if messages.is_empty() {
            AppError::validation("validation failed")
        } else {
            AppError::Validation(messages)
        }
    })
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema, IntoParams)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageQuery {
    pub fn resolve(&self) -> (u32, u32) {
        (
            self.page.unwrap_or(1).max(1),
            self.page_size.unwrap_or(20).clamp(1, 200),
        )
    }
}

/// In-memory page slice plus meta for result sets that are small per
/// tenant principal.
pub fn paginate<T>(items: Vec<T>, page: u32, page_size: u32) -> (Vec<T>, crate::models::response::PageMeta) {
    let total = items.len() as u64;
    let meta = crate::models::response::PageMeta::new(page, page_size, total);
    let start = ((page - 1) as usize).saturating_mul(page_size as usize);
    let slice = items
        .into_iter()
        .skip(start)
        .take(page_size as usize)
        .collect();
    (slice, meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginate_slices_and_reports_totals() {
        let items: Vec<i32> = (1..=45).collect();
        let (slice, meta) = paginate(items, 2, 20);
        assert_eq!(slice.first(), Some(&21));
        assert_eq!(slice.len(), 20);
        assert_eq!(meta.total, 45);
        assert_eq!(meta.total_pages, 3);

        let (slice, meta) = paginate(Vec::<i32>::new(), 1, 20);
        assert!(slice.is_empty());
        assert_eq!(meta.total, 0);
    }
}
