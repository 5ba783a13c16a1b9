use crate::dtos::{AlertListParams, GenerateInvoiceRequest, InvoiceTransitionRequest};
use crate::services::GenerateInvoice;
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

pub async fn generate_invoice(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<GenerateInvoiceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = state
        .billing
        .generate_invoice(GenerateInvoice {
            account_id,
            period_start: request.period_start,
            period_end: request.period_end,
            discount_amount: request.discount_amount,
            draft: request.draft,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.registry.get_account(account_id).await?;
    Ok(Json(state.billing.list_invoices(account_id).await?))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.billing.get_invoice(invoice_id).await?))
}

pub async fn transition_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<InvoiceTransitionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = state.billing.transition(invoice_id, request.event).await?;
    Ok(Json(invoice))
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(params): Query<AlertListParams>,
) -> Result<impl IntoResponse, AppError> {
    state.registry.get_account(account_id).await?;
    Ok(Json(
        state.alerts.list(account_id, params.unacknowledged).await?,
    ))
}

pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.alerts.acknowledge(alert_id).await?))
}

pub async fn evaluate_alerts(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.alerts.evaluate_all(Utc::now()).await?))
}
