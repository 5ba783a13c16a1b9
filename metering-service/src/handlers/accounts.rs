use crate::dtos::{
    AccountResponse, CreateAccountRequest, CreateSubAccountRequest, EffectiveQuotaParams,
    SetQuotaRequest, SubAccountResponse, UpdateStatusRequest,
};
use crate::models::QuotaOwner;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let account = state.registry.create_account(request.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(AccountResponse::new(account, true, Utc::now())),
    ))
}

pub async fn list_accounts(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let accounts: Vec<AccountResponse> = state
        .registry
        .list_accounts()
        .await?
        .into_iter()
        .map(|a| AccountResponse::new(a, false, now))
        .collect();
    Ok(Json(accounts))
}

pub async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let account = state.registry.get_account(account_id).await?;
    Ok(Json(AccountResponse::new(account, false, Utc::now())))
}

pub async fn update_account_status(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .registry
        .update_status(account_id, request.status)
        .await?;
    Ok(Json(AccountResponse::new(account, false, Utc::now())))
}

pub async fn create_sub_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<CreateSubAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let sub_account = state
        .registry
        .create_sub_account(account_id, request.name)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SubAccountResponse::new(sub_account, true)),
    ))
}

pub async fn list_sub_accounts(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let subs: Vec<SubAccountResponse> = state
        .registry
        .list_sub_accounts(account_id)
        .await?
        .into_iter()
        .map(|s| SubAccountResponse::new(s, false))
        .collect();
    Ok(Json(subs))
}

pub async fn get_effective_quota(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(params): Query<EffectiveQuotaParams>,
) -> Result<impl IntoResponse, AppError> {
    state.registry.get_account(account_id).await?;
    let quota = state
        .resolver
        .resolve_or_fallback(account_id, params.sub_account_id)
        .await;
    Ok(Json(quota))
}

pub async fn set_account_quota(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<SetQuotaRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let quota = state
        .registry
        .set_quota(QuotaOwner::Account(account_id), request.into())
        .await?;
    Ok(Json(quota))
}

pub async fn set_sub_account_quota(
    State(state): State<AppState>,
    Path(sub_account_id): Path<Uuid>,
    Json(request): Json<SetQuotaRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let quota = state
        .registry
        .set_quota(QuotaOwner::SubAccount(sub_account_id), request.into())
        .await?;
    Ok(Json(quota))
}
