//! Invoice model and status machine.

use crate::models::PlanType;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Sent,
    Paid,
    Overdue,
    Cancelled,
    Refunded,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InvoiceStatus::Draft),
            "pending" => Some(InvoiceStatus::Pending),
            "sent" => Some(InvoiceStatus::Sent),
            "paid" => Some(InvoiceStatus::Paid),
            "overdue" => Some(InvoiceStatus::Overdue),
            "cancelled" => Some(InvoiceStatus::Cancelled),
            "refunded" => Some(InvoiceStatus::Refunded),
            _ => None,
        }
    }

    /// Status reached by applying `event`, or `None` if the event is not legal here.
    pub fn apply(&self, event: InvoiceEvent) -> Option<InvoiceStatus> {
        use InvoiceStatus::*;
        match (self, event) {
            (Draft, InvoiceEvent::Issue) => Some(Pending),
            (Pending, InvoiceEvent::Send) => Some(Sent),
            (Pending | Sent | Overdue, InvoiceEvent::Pay) => Some(Paid),
            (Sent, InvoiceEvent::MarkOverdue) => Some(Overdue),
            (Draft | Pending | Sent | Overdue, InvoiceEvent::Cancel) => Some(Cancelled),
            (Paid, InvoiceEvent::Refund) => Some(Refunded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Cancelled | InvoiceStatus::Refunded)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event that drives an invoice status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceEvent {
    Issue,
    Send,
    Pay,
    MarkOverdue,
    Cancel,
    Refund,
}

impl InvoiceEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceEvent::Issue => "issue",
            InvoiceEvent::Send => "send",
            InvoiceEvent::Pay => "pay",
            InvoiceEvent::MarkOverdue => "mark_overdue",
            InvoiceEvent::Cancel => "cancel",
            InvoiceEvent::Refund => "refund",
        }
    }
}

/// What an invoice line bills for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Metrics,
    Logs,
    Traces,
    Storage,
}

/// One usage line: used vs included, and the overage charged.
///
/// Count lines are in raw units and priced per million; the storage line is
/// in GB and priced per GB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub kind: LineKind,
    pub used: Decimal,
    pub included: Decimal,
    pub overage_units: Decimal,
    pub unit_price: Decimal,
    pub overage_cost: Decimal,
}

/// Billing document for one account and one period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub account_id: Uuid,
    pub invoice_number: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub plan_type: PlanType,
    pub currency: String,
    pub base_cost: Decimal,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_cost: Decimal,
    pub status: InvoiceStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn overage_cost(&self) -> Decimal {
        self.lines.iter().map(|l| l.overage_cost).sum()
    }
}

/// A computed invoice waiting for its number and id from the datastore.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub account_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub plan_type: PlanType,
    pub currency: String,
    pub base_cost: Decimal,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_cost: Decimal,
    pub status: InvoiceStatus,
}

/// `INV-YYYYMM-NNNNNN` from the billing month and a datastore sequence value.
pub fn format_invoice_number(period_start: NaiveDate, sequence: i64) -> String {
    format!(
        "INV-{:04}{:02}-{:06}",
        period_start.year(),
        period_start.month(),
        sequence
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_number_format() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(format_invoice_number(start, 42), "INV-202603-000042");
        assert_eq!(format_invoice_number(start, 1_234_567), "INV-202603-1234567");
    }

    #[test]
    fn happy_path_transitions() {
        let pending = InvoiceStatus::Draft.apply(InvoiceEvent::Issue).unwrap();
        let sent = pending.apply(InvoiceEvent::Send).unwrap();
        let paid = sent.apply(InvoiceEvent::Pay).unwrap();
        assert_eq!(paid, InvoiceStatus::Paid);
        assert_eq!(paid.apply(InvoiceEvent::Refund), Some(InvoiceStatus::Refunded));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert_eq!(InvoiceStatus::Draft.apply(InvoiceEvent::Pay), None);
        assert_eq!(InvoiceStatus::Paid.apply(InvoiceEvent::Cancel), None);
        assert_eq!(InvoiceStatus::Pending.apply(InvoiceEvent::MarkOverdue), None);
        assert_eq!(InvoiceStatus::Cancelled.apply(InvoiceEvent::Issue), None);
        assert_eq!(InvoiceStatus::Refunded.apply(InvoiceEvent::Refund), None);
    }

    #[test]
    fn only_cancelled_and_refunded_are_terminal() {
        assert!(InvoiceStatus::Cancelled.is_terminal());
        assert!(InvoiceStatus::Refunded.is_terminal());
        assert!(!InvoiceStatus::Paid.is_terminal());
        assert!(!InvoiceStatus::Overdue.is_terminal());
    }

    #[test]
    fn overdue_invoices_can_still_be_paid() {
        let overdue = InvoiceStatus::Sent.apply(InvoiceEvent::MarkOverdue).unwrap();
        assert_eq!(overdue.apply(InvoiceEvent::Pay), Some(InvoiceStatus::Paid));
    }
}
