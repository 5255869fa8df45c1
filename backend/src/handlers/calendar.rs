//! Holiday calendar administration.

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::error::AppError;
use crate::handlers::common::validate_payload;
use crate::models::holiday::Holiday;
use crate::models::principal::Principal;
use crate::models::response::ApiResponse;
use crate::repositories::HolidayRepository;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateHoliday {
    pub holiday_date: NaiveDate,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
}

pub async fn create_holiday(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreateHoliday>,
) -> Result<Json<ApiResponse<Holiday>>, AppError> {
    if !principal.has_role("hr_manager") {
        return Err(AppError::Forbidden("requires the hr_manager role".into()));
    }
    validate_payload(&payload)?;
    // The per-year cache entry ages out on its TTL; newly added holidays
    // apply immediately for uncached years.
    let holiday = Holiday::new(
        principal.organization_id,
        payload.holiday_date,
        payload.name,
        Utc::now(),
    );
    let holiday = HolidayRepository::new()
        .create(&state.write_pool, &holiday)
        .await?;
    Ok(Json(ApiResponse::ok(holiday)))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct HolidayRangeQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

pub async fn list_holidays(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(range): Query<HolidayRangeQuery>,
) -> Result<Json<ApiResponse<Vec<NaiveDate>>>, AppError> {
    let dates = HolidayRepository::new()
        .find_dates_in_range(
            state.read_pool(),
            principal.organization_id,
            range.from,
            range.to,
        )
        .await?;
    Ok(Json(ApiResponse::ok(dates)))
}
