use crate::dtos::{
    AggregateRequest, CurrentUsageParams, CurrentUsageResponse, HistoryParams, HistoryResponse,
    IngestRequest, IngestResponse,
};
use crate::models::current_month;
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

const DEFAULT_HISTORY_DAYS: i64 = 30;

pub async fn ingest_usage(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let event = state.ingestor.ingest(request.into()).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            event_id: event.event_id,
            recorded_at: event.recorded_at,
        }),
    ))
}

pub async fn current_usage(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(params): Query<CurrentUsageParams>,
) -> Result<impl IntoResponse, AppError> {
    state.registry.get_account(account_id).await?;
    if let Some(sub_account_id) = params.sub_account_id {
        let sub = state.registry.get_sub_account(sub_account_id).await?;
        if sub.account_id != account_id {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Sub-account {} not found",
                sub_account_id
            )));
        }
    }

    let now = Utc::now();
    let quota = state
        .resolver
        .resolve_or_fallback(account_id, params.sub_account_id)
        .await;
    let usage = state
        .usage
        .current_month(account_id, params.sub_account_id, now)
        .await?;

    Ok(Json(CurrentUsageResponse::new(
        account_id,
        params.sub_account_id,
        current_month(now),
        &quota,
        &usage,
    )))
}

pub async fn usage_history(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;
    state.registry.get_account(account_id).await?;

    let days = params.days.unwrap_or(DEFAULT_HISTORY_DAYS);
    let history = state
        .usage
        .daily_history(account_id, days, Utc::now())
        .await?;

    Ok(Json(HistoryResponse {
        account_id,
        days: history,
    }))
}

pub async fn aggregate_usage(
    State(state): State<AppState>,
    Json(request): Json<AggregateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let report = state
        .aggregator
        .aggregate_range(request.start, request.end)
        .await?;
    Ok(Json(report))
}
