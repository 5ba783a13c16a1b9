//! Datastore seam between the metering engine and its persistence backend.

use crate::models::{
    Account, AccountStatus, Alert, AuditEntry, Granularity, Invoice, InvoiceStatus, NewInvoice,
    PlanType, PricingPlan, Quota, QuotaOwner, SubAccount, UsageEvent, UsageRollup,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

/// Everything the engine reads and writes.
///
/// Ranges are half-open `[start, end)`. Implementations map backend failures
/// to `AppError::DatabaseError` so callers can tell transient failures apart.
#[async_trait]
pub trait MeteringStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // Accounts

    /// Insert an account together with its initial quota row, atomically.
    async fn insert_account(&self, account: &Account, quota: &Quota) -> Result<(), AppError>;

    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, AppError>;

    async fn find_account_by_license_key(
        &self,
        license_key: &str,
    ) -> Result<Option<Account>, AppError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, AppError>;

    /// Compare-and-set the status. Returns the updated account, or `None`
    /// when the stored status is no longer `expected`.
    async fn update_account_status(
        &self,
        account_id: Uuid,
        expected: AccountStatus,
        next: AccountStatus,
    ) -> Result<Option<Account>, AppError>;

    /// Fails with `Conflict` when the name is taken within the account.
    async fn insert_sub_account(&self, sub_account: &SubAccount) -> Result<(), AppError>;

    async fn get_sub_account(&self, sub_account_id: Uuid) -> Result<Option<SubAccount>, AppError>;

    /// Sub-account with its parent account.
    async fn find_sub_account_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<(SubAccount, Account)>, AppError>;

    async fn list_sub_accounts(&self, account_id: Uuid) -> Result<Vec<SubAccount>, AppError>;

    // Quotas

    async fn get_quota(&self, owner: QuotaOwner) -> Result<Option<Quota>, AppError>;

    /// Replace the quota row of `quota.owner`. Returns the stored row.
    async fn put_quota(&self, quota: &Quota) -> Result<Quota, AppError>;

    // Usage

    async fn append_event(&self, event: &UsageEvent) -> Result<(), AppError>;

    async fn events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>, AppError>;

    /// Rollups of every tenant whose bucket starts in the range.
    async fn rollups_in_range(
        &self,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRollup>, AppError>;

    /// Rollups of one scope. `sub_account_id == None` reads the account-wide rows.
    async fn scope_rollups(
        &self,
        granularity: Granularity,
        account_id: Uuid,
        sub_account_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRollup>, AppError>;

    /// Upsert by key, replacing stored values.
    async fn replace_rollups(
        &self,
        granularity: Granularity,
        rollups: &[UsageRollup],
    ) -> Result<(), AppError>;

    // Billing

    async fn get_pricing_plan(&self, plan_type: PlanType)
        -> Result<Option<PricingPlan>, AppError>;

    /// Assign an id and invoice number and insert. `Conflict` when the
    /// account already has an invoice for the period.
    async fn insert_invoice(&self, invoice: NewInvoice) -> Result<Invoice, AppError>;

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    async fn list_invoices(&self, account_id: Uuid) -> Result<Vec<Invoice>, AppError>;

    /// Compare-and-set the status. `None` when the stored status is no longer `expected`.
    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        expected: InvoiceStatus,
        next: InvoiceStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Invoice>, AppError>;

    // Alerts

    /// Record that a rule fired for a period. Returns false if it already had.
    async fn claim_alert_rule(
        &self,
        account_id: Uuid,
        rule_key: &str,
        period_key: &str,
        triggered_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn insert_alert(&self, alert: &Alert) -> Result<(), AppError>;

    async fn list_alerts(
        &self,
        account_id: Uuid,
        unacknowledged_only: bool,
    ) -> Result<Vec<Alert>, AppError>;

    async fn acknowledge_alert(
        &self,
        alert_id: Uuid,
        acknowledged_at: DateTime<Utc>,
    ) -> Result<Option<Alert>, AppError>;

    // Audit

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), AppError>;
}
