//! Invoice computation and the invoice status machine.

use crate::config::BillingConfig;
use crate::models::{
    start_of_day, Invoice, InvoiceEvent, InvoiceLine, InvoiceStatus, LineKind,
    NewInvoice, PlanType, PricingPlan, ProductType,
};
use crate::services::audit::record_audit;
use crate::services::metrics::{record_error, record_invoice};
use crate::services::store::MeteringStore;
use crate::services::usage::{PeriodUsage, UsageReader};
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const MONEY_DP: u32 = 2;

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Request to bill one account for one period. `period_end` is inclusive.
#[derive(Debug, Clone)]
pub struct GenerateInvoice {
    pub account_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub discount_amount: Decimal,
    pub draft: bool,
}

/// Usage line for a count product, priced per million units over the allowance.
pub fn count_line(kind: LineKind, used: i64, included: i64, price_per_million: Decimal) -> InvoiceLine {
    let overage_units = (used - included).max(0);
    let overage_cost =
        round_money(Decimal::from(overage_units) / Decimal::from(1_000_000) * price_per_million);
    InvoiceLine {
        kind,
        used: Decimal::from(used),
        included: Decimal::from(included),
        overage_units: Decimal::from(overage_units),
        unit_price: price_per_million,
        overage_cost,
    }
}

/// Combined storage line, priced per GB over the allowance.
pub fn storage_line(used_gb: Decimal, included_gb: Decimal, price_per_gb: Decimal) -> InvoiceLine {
    let overage_units = (used_gb - included_gb).max(Decimal::ZERO);
    InvoiceLine {
        kind: LineKind::Storage,
        used: used_gb.round_dp(4),
        included: included_gb,
        overage_units: overage_units.round_dp(4),
        unit_price: price_per_gb,
        overage_cost: round_money(overage_units * price_per_gb),
    }
}

/// Totals computed from a pricing plan and period usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceAmounts {
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_cost: Decimal,
}

/// `subtotal = base + overage`, `total = subtotal + tax - discount`.
pub fn compute_amounts(
    plan: &PricingPlan,
    usage: &PeriodUsage,
    tax_rate: Decimal,
    discount_amount: Decimal,
) -> Result<InvoiceAmounts, AppError> {
    let mut lines: Vec<InvoiceLine> = [
        (LineKind::Metrics, ProductType::Metrics),
        (LineKind::Logs, ProductType::Logs),
        (LineKind::Traces, ProductType::Traces),
    ]
    .into_iter()
    .map(|(kind, product)| {
        count_line(
            kind,
            usage.product(product).metric_count,
            plan.included_count(product),
            plan.price_per_million(product),
        )
    })
    .collect();
    lines.push(storage_line(
        usage.total.storage_gb(),
        plan.included_storage_gb,
        plan.price_per_gb,
    ));

    let overage: Decimal = lines.iter().map(|l| l.overage_cost).sum();
    let subtotal = round_money(plan.base_cost + overage);
    let tax_amount = round_money(subtotal * tax_rate);
    let discount_amount = round_money(discount_amount);

    if discount_amount < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "discount_amount must not be negative"
        )));
    }
    if discount_amount > subtotal + tax_amount {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "discount_amount exceeds invoice amount"
        )));
    }

    Ok(InvoiceAmounts {
        lines,
        subtotal,
        tax_amount,
        total_cost: subtotal + tax_amount - discount_amount,
    })
}

#[derive(Clone)]
pub struct BillingEngine {
    store: Arc<dyn MeteringStore>,
    usage: UsageReader,
    config: BillingConfig,
}

impl BillingEngine {
    pub fn new(store: Arc<dyn MeteringStore>, config: BillingConfig) -> Self {
        Self {
            usage: UsageReader::new(store.clone()),
            store,
            config,
        }
    }

    async fn pricing_plan(&self, plan_type: PlanType) -> Result<PricingPlan, AppError> {
        match self.store.get_pricing_plan(plan_type).await? {
            Some(plan) => Ok(plan),
            None => {
                warn!(plan_type = %plan_type, "No pricing plan row, using built-in pricing");
                Ok(PricingPlan {
                    currency: self.config.currency.clone(),
                    ..PricingPlan::builtin(plan_type)
                })
            }
        }
    }

    /// Bill an account for a period. Whole months come from monthly rollups,
    /// partial months from daily rollups.
    #[instrument(skip(self, request), fields(account_id = %request.account_id))]
    pub async fn generate_invoice(&self, request: GenerateInvoice) -> Result<Invoice, AppError> {
        if request.period_end < request.period_start {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "period_end must not be before period_start"
            )));
        }

        let account = self
            .store
            .get_account(request.account_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Account {} not found", request.account_id))
            })?;
        let plan = self.pricing_plan(account.plan_type).await?;

        let usage = self
            .usage
            .usage_for_period(
                account.account_id,
                None,
                start_of_day(request.period_start),
                start_of_day(request.period_end) + Duration::days(1),
            )
            .await?;

        let amounts = compute_amounts(
            &plan,
            &usage,
            self.config.tax_rate,
            request.discount_amount,
        )?;

        let new_invoice = NewInvoice {
            account_id: account.account_id,
            period_start: request.period_start,
            period_end: request.period_end,
            plan_type: account.plan_type,
            currency: plan.currency.clone(),
            base_cost: plan.base_cost,
            lines: amounts.lines,
            subtotal: amounts.subtotal,
            tax_amount: amounts.tax_amount,
            discount_amount: round_money(request.discount_amount),
            total_cost: amounts.total_cost,
            status: if request.draft {
                InvoiceStatus::Draft
            } else {
                InvoiceStatus::Pending
            },
        };

        let invoice = match self.store.insert_invoice(new_invoice).await {
            Ok(invoice) => invoice,
            Err(e) => {
                record_error("store", "insert_invoice");
                return Err(e);
            }
        };

        record_invoice(
            invoice.plan_type.as_str(),
            &invoice.currency,
            invoice.total_cost.to_f64().unwrap_or_default(),
        );
        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            overage_cost = %invoice.overage_cost(),
            total_cost = %invoice.total_cost,
            "Invoice generated"
        );
        record_audit(
            self.store.as_ref(),
            "invoice.generated",
            "invoice",
            invoice.invoice_id,
            json!({
                "account_id": invoice.account_id,
                "invoice_number": invoice.invoice_number,
                "total_cost": invoice.total_cost,
                "status": invoice.status,
            }),
        )
        .await;

        Ok(invoice)
    }

    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))
    }

    pub async fn list_invoices(&self, account_id: Uuid) -> Result<Vec<Invoice>, AppError> {
        self.store.list_invoices(account_id).await
    }

    /// Apply a status event. Illegal events are rejected; a concurrent change
    /// between read and write is a conflict.
    #[instrument(skip(self), fields(event = event.as_str()))]
    pub async fn transition(
        &self,
        invoice_id: Uuid,
        event: InvoiceEvent,
    ) -> Result<Invoice, AppError> {
        let current = self.get_invoice(invoice_id).await?;
        if current.status.is_terminal() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoice {} is {} and can no longer change",
                current.invoice_number,
                current.status
            )));
        }
        let next = current.status.apply(event).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "Cannot {} an invoice that is {}",
                event.as_str(),
                current.status
            ))
        })?;
        let paid_at = (next == InvoiceStatus::Paid).then(Utc::now);

        let updated = self
            .store
            .update_invoice_status(invoice_id, current.status, next, paid_at)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice {} status changed concurrently",
                    invoice_id
                ))
            })?;

        info!(
            invoice_id = %invoice_id,
            from = %current.status,
            to = %next,
            "Invoice status changed"
        );
        record_audit(
            self.store.as_ref(),
            "invoice.status_changed",
            "invoice",
            invoice_id,
            json!({ "event": event, "from": current.status, "to": next }),
        )
        .await;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{UsageTotals, BYTES_PER_GB};

    fn usage(metrics: i64, storage_bytes: i64) -> PeriodUsage {
        let mut usage = PeriodUsage::default();
        usage.total = UsageTotals {
            metric_count: metrics,
            storage_bytes,
        };
        usage.by_product.insert(
            ProductType::Metrics,
            UsageTotals {
                metric_count: metrics,
                storage_bytes,
            },
        );
        usage
    }

    #[test]
    fn pro_overage_of_twenty_million_costs_sixty() {
        let line = count_line(
            LineKind::Metrics,
            120_000_000,
            100_000_000,
            Decimal::new(300, 2),
        );
        assert_eq!(line.overage_units, Decimal::from(20_000_000));
        assert_eq!(line.overage_cost, Decimal::new(6000, 2));
    }

    #[test]
    fn usage_under_allowance_has_no_overage() {
        let line = count_line(LineKind::Logs, 5, 100, Decimal::new(300, 2));
        assert_eq!(line.overage_units, Decimal::ZERO);
        assert_eq!(line.overage_cost, Decimal::ZERO);
    }

    #[test]
    fn totals_add_base_overage_and_tax_minus_discount() {
        let plan = PricingPlan::builtin(PlanType::Pro);
        let amounts = compute_amounts(
            &plan,
            &usage(120_000_000, 110 * BYTES_PER_GB),
            Decimal::new(10, 2),
            Decimal::new(1000, 2),
        )
        .unwrap();

        // 299.00 base + 60.00 metrics + 10 GB * 0.25
        assert_eq!(amounts.subtotal, Decimal::new(36150, 2));
        assert_eq!(amounts.tax_amount, Decimal::new(3615, 2));
        assert_eq!(amounts.total_cost, Decimal::new(38765, 2));
        assert_eq!(amounts.lines.len(), 4);
    }

    #[test]
    fn money_rounds_half_away_from_zero() {
        assert_eq!(round_money(Decimal::new(12345, 3)), Decimal::new(1235, 2));
        assert_eq!(round_money(Decimal::new(-12345, 3)), Decimal::new(-1235, 2));
    }

    #[test]
    fn oversized_discount_is_rejected() {
        let plan = PricingPlan::builtin(PlanType::Starter);
        let err = compute_amounts(&plan, &usage(0, 0), Decimal::ZERO, Decimal::from(50)).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
