//! In-process store backed by sharded concurrent maps.
//!
//! Used for local runs (`STORE_BACKEND=memory`) and the HTTP test suite.
//! Usage events are sharded per account so concurrent ingestion from
//! different tenants never contends on the same lock.

use crate::models::{
    format_invoice_number, Account, AccountStatus, Alert, AuditEntry, Granularity, Invoice,
    InvoiceStatus, NewInvoice, PlanType, PricingPlan, Quota, QuotaOwner, RollupKey, SubAccount,
    SubAccountStatus, UsageEvent, UsageRollup,
};
use crate::services::store::MeteringStore;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use service_core::error::AppError;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

type AlertClaimKey = (Uuid, String, String);
type InvoicePeriodKey = (Uuid, NaiveDate, NaiveDate);

#[derive(Default)]
pub struct MemoryStore {
    accounts: DashMap<Uuid, Account>,
    accounts_by_license: DashMap<String, Uuid>,
    sub_accounts: DashMap<Uuid, SubAccount>,
    sub_accounts_by_api_key: DashMap<String, Uuid>,
    sub_account_names: DashMap<(Uuid, String), Uuid>,
    quotas: DashMap<QuotaOwner, Quota>,
    events: DashMap<Uuid, Vec<UsageEvent>>,
    hourly: DashMap<RollupKey, UsageRollup>,
    daily: DashMap<RollupKey, UsageRollup>,
    monthly: DashMap<RollupKey, UsageRollup>,
    pricing: DashMap<PlanType, PricingPlan>,
    invoices: DashMap<Uuid, Invoice>,
    invoice_periods: DashMap<InvoicePeriodKey, Uuid>,
    invoice_seq: AtomicI64,
    alerts: DashMap<Uuid, Alert>,
    alert_claims: DashMap<AlertClaimKey, DateTime<Utc>>,
    audit: Mutex<Vec<AuditEntry>>,
    read_outage: AtomicBool,
}

impl MemoryStore {
    /// Empty store with the default quota and pricing plans seeded.
    pub fn new() -> Self {
        let store = Self::default();
        store.quotas.insert(
            QuotaOwner::Default,
            Quota::new(QuotaOwner::Default, crate::models::QuotaLimits::fallback()),
        );
        for plan in PlanType::ALL {
            store.pricing.insert(plan, PricingPlan::builtin(plan));
        }
        store
    }

    /// Simulate the quota and rollup tables being unreachable.
    pub fn set_read_outage(&self, unavailable: bool) {
        self.read_outage.store(unavailable, Ordering::SeqCst);
    }

    /// Remove a quota row, including the default one.
    pub fn delete_quota(&self, owner: QuotaOwner) {
        self.quotas.remove(&owner);
    }

    /// Overwrite an account row directly, bypassing status rules.
    pub fn put_account(&self, account: Account) {
        self.accounts_by_license
            .insert(account.license_key.clone(), account.account_id);
        self.accounts.insert(account.account_id, account);
    }

    /// Overwrite a sub-account row directly, bypassing status rules.
    pub fn put_sub_account(&self, sub_account: SubAccount) {
        self.sub_accounts_by_api_key
            .insert(sub_account.api_key.clone(), sub_account.sub_account_id);
        self.sub_accounts
            .insert(sub_account.sub_account_id, sub_account);
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn check_reads(&self, operation: &str) -> Result<(), AppError> {
        if self.read_outage.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to {}: store unavailable",
                operation
            )));
        }
        Ok(())
    }

    fn table(&self, granularity: Granularity) -> &DashMap<RollupKey, UsageRollup> {
        match granularity {
            Granularity::Hourly => &self.hourly,
            Granularity::Daily => &self.daily,
            Granularity::Monthly => &self.monthly,
        }
    }
}

fn in_range(ts: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    ts >= start && ts < end
}

#[async_trait]
impl MeteringStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn insert_account(&self, account: &Account, quota: &Quota) -> Result<(), AppError> {
        match self.accounts_by_license.entry(account.license_key.clone()) {
            Entry::Occupied(_) => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "License key already issued"
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(account.account_id);
            }
        }
        self.accounts.insert(account.account_id, account.clone());
        self.quotas.insert(quota.owner, quota.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, AppError> {
        Ok(self.accounts.get(&account_id).map(|a| a.value().clone()))
    }

    async fn find_account_by_license_key(
        &self,
        license_key: &str,
    ) -> Result<Option<Account>, AppError> {
        let account_id = match self.accounts_by_license.get(license_key) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.accounts.get(&account_id).map(|a| a.value().clone()))
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        let mut accounts: Vec<Account> = self.accounts.iter().map(|a| a.value().clone()).collect();
        accounts.sort_by_key(|a| a.created_utc);
        Ok(accounts)
    }

    async fn update_account_status(
        &self,
        account_id: Uuid,
        expected: AccountStatus,
        next: AccountStatus,
    ) -> Result<Option<Account>, AppError> {
        let Some(mut account) = self.accounts.get_mut(&account_id) else {
            return Ok(None);
        };
        if account.status != expected {
            return Ok(None);
        }
        account.status = next;
        account.updated_utc = Utc::now();
        Ok(Some(account.value().clone()))
    }

    async fn insert_sub_account(&self, sub_account: &SubAccount) -> Result<(), AppError> {
        match self
            .sub_account_names
            .entry((sub_account.account_id, sub_account.name.clone()))
        {
            Entry::Occupied(_) => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Sub-account '{}' already exists",
                    sub_account.name
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(sub_account.sub_account_id);
            }
        }
        self.sub_accounts_by_api_key
            .insert(sub_account.api_key.clone(), sub_account.sub_account_id);
        self.sub_accounts
            .insert(sub_account.sub_account_id, sub_account.clone());
        Ok(())
    }

    async fn get_sub_account(&self, sub_account_id: Uuid) -> Result<Option<SubAccount>, AppError> {
        Ok(self.sub_accounts.get(&sub_account_id).map(|s| s.value().clone()))
    }

    async fn find_sub_account_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<(SubAccount, Account)>, AppError> {
        let sub_account_id = match self.sub_accounts_by_api_key.get(api_key) {
            Some(id) => *id,
            None => return Ok(None),
        };
        let Some(sub_account) = self.sub_accounts.get(&sub_account_id).map(|s| s.value().clone()) else {
            return Ok(None);
        };
        let account = self
            .accounts
            .get(&sub_account.account_id)
            .map(|a| a.value().clone());
        Ok(account.map(|account| (sub_account, account)))
    }

    async fn list_sub_accounts(&self, account_id: Uuid) -> Result<Vec<SubAccount>, AppError> {
        let mut subs: Vec<SubAccount> = self
            .sub_accounts
            .iter()
            .filter(|s| s.account_id == account_id && s.status != SubAccountStatus::Deleted)
            .map(|s| s.value().clone())
            .collect();
        subs.sort_by_key(|s| s.created_utc);
        Ok(subs)
    }

    async fn get_quota(&self, owner: QuotaOwner) -> Result<Option<Quota>, AppError> {
        self.check_reads("get quota")?;
        Ok(self.quotas.get(&owner).map(|q| q.value().clone()))
    }

    async fn put_quota(&self, quota: &Quota) -> Result<Quota, AppError> {
        let stored = match self.quotas.entry(quota.owner) {
            Entry::Occupied(mut existing) => {
                let row = existing.get_mut();
                row.limits = quota.limits.clone();
                row.updated_utc = quota.updated_utc;
                row.clone()
            }
            Entry::Vacant(slot) => slot.insert(quota.clone()).value().clone(),
        };
        Ok(stored)
    }

    async fn append_event(&self, event: &UsageEvent) -> Result<(), AppError> {
        self.events
            .entry(event.account_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>, AppError> {
        let mut events = Vec::new();
        for shard in self.events.iter() {
            events.extend(
                shard
                    .iter()
                    .filter(|e| in_range(e.recorded_at, start, end))
                    .cloned(),
            );
        }
        Ok(events)
    }

    async fn rollups_in_range(
        &self,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRollup>, AppError> {
        Ok(self
            .table(granularity)
            .iter()
            .filter(|r| in_range(r.key.bucket_start, start, end))
            .map(|r| r.value().clone())
            .collect())
    }

    async fn scope_rollups(
        &self,
        granularity: Granularity,
        account_id: Uuid,
        sub_account_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRollup>, AppError> {
        self.check_reads("read usage rollups")?;
        let mut rollups: Vec<UsageRollup> = self
            .table(granularity)
            .iter()
            .filter(|r| {
                r.key.account_id == account_id
                    && r.key.sub_account_id == sub_account_id
                    && in_range(r.key.bucket_start, start, end)
            })
            .map(|r| r.value().clone())
            .collect();
        rollups.sort_by_key(|r| r.key);
        Ok(rollups)
    }

    async fn replace_rollups(
        &self,
        granularity: Granularity,
        rollups: &[UsageRollup],
    ) -> Result<(), AppError> {
        let table = self.table(granularity);
        for rollup in rollups {
            table.insert(rollup.key, rollup.clone());
        }
        Ok(())
    }

    async fn get_pricing_plan(
        &self,
        plan_type: PlanType,
    ) -> Result<Option<PricingPlan>, AppError> {
        Ok(self.pricing.get(&plan_type).map(|p| p.value().clone()))
    }

    async fn insert_invoice(&self, invoice: NewInvoice) -> Result<Invoice, AppError> {
        let invoice_id = Uuid::new_v4();
        match self.invoice_periods.entry((
            invoice.account_id,
            invoice.period_start,
            invoice.period_end,
        )) {
            Entry::Occupied(_) => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Invoice already exists for period {} to {}",
                    invoice.period_start,
                    invoice.period_end
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(invoice_id);
            }
        }

        let sequence = self.invoice_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let stored = Invoice {
            invoice_id,
            account_id: invoice.account_id,
            invoice_number: format_invoice_number(invoice.period_start, sequence),
            period_start: invoice.period_start,
            period_end: invoice.period_end,
            plan_type: invoice.plan_type,
            currency: invoice.currency,
            base_cost: invoice.base_cost,
            lines: invoice.lines,
            subtotal: invoice.subtotal,
            tax_amount: invoice.tax_amount,
            discount_amount: invoice.discount_amount,
            total_cost: invoice.total_cost,
            status: invoice.status,
            paid_at: None,
            created_utc: now,
            updated_utc: now,
        };
        self.invoices.insert(invoice_id, stored.clone());
        Ok(stored)
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.invoices.get(&invoice_id).map(|i| i.value().clone()))
    }

    async fn list_invoices(&self, account_id: Uuid) -> Result<Vec<Invoice>, AppError> {
        let mut invoices: Vec<Invoice> = self
            .invoices
            .iter()
            .filter(|i| i.account_id == account_id)
            .map(|i| i.value().clone())
            .collect();
        invoices.sort_by(|a, b| b.period_start.cmp(&a.period_start));
        Ok(invoices)
    }

    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        expected: InvoiceStatus,
        next: InvoiceStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Invoice>, AppError> {
        let Some(mut invoice) = self.invoices.get_mut(&invoice_id) else {
            return Ok(None);
        };
        if invoice.status != expected {
            return Ok(None);
        }
        invoice.status = next;
        if paid_at.is_some() {
            invoice.paid_at = paid_at;
        }
        invoice.updated_utc = Utc::now();
        Ok(Some(invoice.value().clone()))
    }

    async fn claim_alert_rule(
        &self,
        account_id: Uuid,
        rule_key: &str,
        period_key: &str,
        triggered_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        match self.alert_claims.entry((
            account_id,
            rule_key.to_string(),
            period_key.to_string(),
        )) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(triggered_at);
                Ok(true)
            }
        }
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), AppError> {
        self.alerts.insert(alert.alert_id, alert.clone());
        Ok(())
    }

    async fn list_alerts(
        &self,
        account_id: Uuid,
        unacknowledged_only: bool,
    ) -> Result<Vec<Alert>, AppError> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| a.account_id == account_id && !(unacknowledged_only && a.acknowledged))
            .map(|a| a.value().clone())
            .collect();
        alerts.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(alerts)
    }

    async fn acknowledge_alert(
        &self,
        alert_id: Uuid,
        acknowledged_at: DateTime<Utc>,
    ) -> Result<Option<Alert>, AppError> {
        let Some(mut alert) = self.alerts.get_mut(&alert_id) else {
            return Ok(None);
        };
        if !alert.acknowledged {
            alert.acknowledged = true;
            alert.acknowledged_at = Some(acknowledged_at);
        }
        Ok(Some(alert.value().clone()))
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), AppError> {
        self.audit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProductScope, QuotaLimits, TrialInfo};

    fn account(license_key: &str) -> Account {
        let now = Utc::now();
        Account {
            account_id: Uuid::new_v4(),
            name: "acme".to_string(),
            email: "ops@acme.test".to_string(),
            company: None,
            license_key: license_key.to_string(),
            status: AccountStatus::Active,
            plan_type: PlanType::Pro,
            trial: TrialInfo {
                is_trial: false,
                started_at: None,
            },
            expires_at: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    #[tokio::test]
    async fn duplicate_license_key_is_conflict() {
        let store = MemoryStore::new();
        let first = account("lk_same");
        let quota = Quota::new(
            QuotaOwner::Account(first.account_id),
            QuotaLimits::for_plan(PlanType::Pro),
        );
        store.insert_account(&first, &quota).await.unwrap();

        let second = account("lk_same");
        let err = store.insert_account(&second, &quota).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn status_update_is_compare_and_set() {
        let store = MemoryStore::new();
        let acct = account("lk_cas");
        let quota = Quota::new(
            QuotaOwner::Account(acct.account_id),
            QuotaLimits::for_plan(PlanType::Pro),
        );
        store.insert_account(&acct, &quota).await.unwrap();

        let stale = store
            .update_account_status(acct.account_id, AccountStatus::Trial, AccountStatus::Expired)
            .await
            .unwrap();
        assert!(stale.is_none());

        let updated = store
            .update_account_status(
                acct.account_id,
                AccountStatus::Active,
                AccountStatus::Suspended,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, AccountStatus::Suspended);
    }

    #[tokio::test]
    async fn replace_rollups_overwrites_by_key() {
        let store = MemoryStore::new();
        let key = RollupKey {
            account_id: Uuid::new_v4(),
            sub_account_id: None,
            product: ProductScope::All,
            bucket_start: Granularity::Hourly.bucket_start(Utc::now()),
        };
        for count in [10, 60] {
            store
                .replace_rollups(
                    Granularity::Hourly,
                    &[UsageRollup {
                        key,
                        metric_count: count,
                        storage_bytes: 0,
                    }],
                )
                .await
                .unwrap();
        }

        let rows = store
            .scope_rollups(
                Granularity::Hourly,
                key.account_id,
                None,
                key.bucket_start,
                Granularity::Hourly.next_bucket(key.bucket_start),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].metric_count, 60);
    }

    #[tokio::test]
    async fn alert_rule_is_claimed_once_per_period() {
        let store = MemoryStore::new();
        let account_id = Uuid::new_v4();
        let now = Utc::now();
        assert!(store
            .claim_alert_rule(account_id, "usage:metrics:80", "2026-03", now)
            .await
            .unwrap());
        assert!(!store
            .claim_alert_rule(account_id, "usage:metrics:80", "2026-03", now)
            .await
            .unwrap());
        assert!(store
            .claim_alert_rule(account_id, "usage:metrics:80", "2026-04", now)
            .await
            .unwrap());
    }
}
