use crate::models::InvoiceEvent;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct GenerateInvoiceRequest {
    pub period_start: NaiveDate,
    /// Inclusive.
    pub period_end: NaiveDate,
    #[serde(default)]
    pub discount_amount: Decimal,
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceTransitionRequest {
    pub event: InvoiceEvent,
}

#[derive(Debug, Deserialize)]
pub struct AlertListParams {
    #[serde(default)]
    pub unacknowledged: bool,
}
