use crate::dtos::{
    LicenseStatusParams, LicenseStatusResponse, ValidateRequest, ValidationResponse,
};
use crate::services::Decision;
use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use validator::Validate;

/// Blocked credentials are a normal 200 answer; unknown keys are 401 and a
/// failed lookup is 503. All carry the same body shape.
pub async fn validate_license(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let decision = state.validator.validate(request.api_key.trim()).await;
    let status = match &decision {
        Decision::Allowed { .. } | Decision::Blocked { .. } => StatusCode::OK,
        Decision::Invalid => StatusCode::UNAUTHORIZED,
        Decision::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    };
    let retry_after =
        matches!(decision, Decision::Unavailable).then_some([(header::RETRY_AFTER, "5")]);

    Ok((status, retry_after, Json(ValidationResponse::from(decision))))
}

pub async fn license_status(
    State(state): State<AppState>,
    Query(params): Query<LicenseStatusParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;

    let account = state.registry.find_by_license_key(params.key.trim()).await?;
    Ok(Json(LicenseStatusResponse::from_account(account, Utc::now())))
}
