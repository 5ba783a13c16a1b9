//! Accounts, sub-accounts and their credentials.

use crate::config::AccountConfig;
use crate::models::{
    Account, AccountStatus, CreateAccount, Quota, QuotaLimits, QuotaOwner, SubAccount,
    SubAccountStatus, TrialInfo,
};
use crate::services::audit::record_audit;
use crate::services::store::MeteringStore;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use service_core::error::AppError;
use service_core::utils::secrets::generate_secret;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub const LICENSE_KEY_PREFIX: &str = "lk";
pub const API_KEY_PREFIX: &str = "sk";

#[derive(Clone)]
pub struct AccountRegistry {
    store: Arc<dyn MeteringStore>,
    config: AccountConfig,
}

impl AccountRegistry {
    pub fn new(store: Arc<dyn MeteringStore>, config: AccountConfig) -> Self {
        Self { store, config }
    }

    /// Create an account with a fresh license key and a quota row from its plan.
    #[instrument(skip(self, input), fields(plan_type = %input.plan_type))]
    pub async fn create_account(&self, input: CreateAccount) -> Result<Account, AppError> {
        let now = Utc::now();
        let account = self.new_account(input, now)?;
        let quota = Quota::new(
            QuotaOwner::Account(account.account_id),
            QuotaLimits::for_plan(account.plan_type),
        );

        self.store.insert_account(&account, &quota).await?;

        info!(
            account_id = %account.account_id,
            plan_type = %account.plan_type,
            is_trial = account.trial.is_trial,
            "Account created"
        );
        record_audit(
            self.store.as_ref(),
            "account.created",
            "account",
            account.account_id,
            json!({
                "plan_type": account.plan_type,
                "is_trial": account.trial.is_trial,
                "expires_at": account.expires_at,
            }),
        )
        .await;

        Ok(account)
    }

    fn new_account(&self, input: CreateAccount, now: DateTime<Utc>) -> Result<Account, AppError> {
        let (trial, expires_at) = match input.trial_days {
            Some(days) if days <= 0 => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "trial_days must be positive"
                )))
            }
            Some(days) => (
                TrialInfo {
                    is_trial: true,
                    started_at: Some(now),
                },
                now + Duration::days(days),
            ),
            None => (
                TrialInfo {
                    is_trial: false,
                    started_at: None,
                },
                now + Duration::days(self.config.default_expiry_days),
            ),
        };

        Ok(Account {
            account_id: Uuid::new_v4(),
            name: input.name,
            email: input.email,
            company: input.company,
            license_key: generate_secret(LICENSE_KEY_PREFIX),
            status: AccountStatus::Active,
            plan_type: input.plan_type,
            trial,
            expires_at: Some(expires_at),
            created_utc: now,
            updated_utc: now,
        })
    }

    pub async fn get_account(&self, account_id: Uuid) -> Result<Account, AppError> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account {} not found", account_id)))
    }

    pub async fn find_by_license_key(&self, license_key: &str) -> Result<Account, AppError> {
        self.store
            .find_account_by_license_key(license_key)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("License key not found")))
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        self.store.list_accounts().await
    }

    /// Move an account along an allowed status transition.
    #[instrument(skip(self), fields(account_id = %account_id, next = %next))]
    pub async fn update_status(
        &self,
        account_id: Uuid,
        next: AccountStatus,
    ) -> Result<Account, AppError> {
        let current = self.get_account(account_id).await?;
        if current.status == next {
            return Ok(current);
        }
        if !current.status.can_transition_to(next) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Cannot move account from {} to {}",
                current.status,
                next
            )));
        }

        let updated = self
            .store
            .update_account_status(account_id, current.status, next)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "Account {} status changed concurrently",
                    account_id
                ))
            })?;

        info!(
            account_id = %account_id,
            from = %current.status,
            to = %next,
            "Account status changed"
        );
        record_audit(
            self.store.as_ref(),
            "account.status_changed",
            "account",
            account_id,
            json!({ "from": current.status, "to": next }),
        )
        .await;

        Ok(updated)
    }

    /// Create a sub-account with its own API key. The account quota is
    /// inherited until a sub-account quota is set.
    #[instrument(skip(self, name), fields(account_id = %account_id))]
    pub async fn create_sub_account(
        &self,
        account_id: Uuid,
        name: String,
    ) -> Result<SubAccount, AppError> {
        self.get_account(account_id).await?;

        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Sub-account name must not be empty"
            )));
        }

        let sub_account = SubAccount {
            sub_account_id: Uuid::new_v4(),
            account_id,
            name,
            api_key: generate_secret(API_KEY_PREFIX),
            status: SubAccountStatus::Active,
            created_utc: Utc::now(),
        };
        self.store.insert_sub_account(&sub_account).await?;

        info!(
            account_id = %account_id,
            sub_account_id = %sub_account.sub_account_id,
            "Sub-account created"
        );
        record_audit(
            self.store.as_ref(),
            "sub_account.created",
            "sub_account",
            sub_account.sub_account_id,
            json!({ "account_id": account_id, "name": sub_account.name }),
        )
        .await;

        Ok(sub_account)
    }

    pub async fn get_sub_account(&self, sub_account_id: Uuid) -> Result<SubAccount, AppError> {
        self.store
            .get_sub_account(sub_account_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Sub-account {} not found", sub_account_id))
            })
    }

    pub async fn list_sub_accounts(&self, account_id: Uuid) -> Result<Vec<SubAccount>, AppError> {
        self.get_account(account_id).await?;
        self.store.list_sub_accounts(account_id).await
    }

    /// Replace the quota row of one owner.
    #[instrument(skip(self, limits))]
    pub async fn set_quota(&self, owner: QuotaOwner, limits: QuotaLimits) -> Result<Quota, AppError> {
        match owner {
            QuotaOwner::Account(account_id) => {
                self.get_account(account_id).await?;
            }
            QuotaOwner::SubAccount(sub_account_id) => {
                self.get_sub_account(sub_account_id).await?;
            }
            QuotaOwner::Default => {}
        }
        check_limits(&limits)?;

        let stored = self.store.put_quota(&Quota::new(owner, limits)).await?;

        let entity_id = match owner {
            QuotaOwner::Account(id) | QuotaOwner::SubAccount(id) => id,
            QuotaOwner::Default => Uuid::nil(),
        };
        record_audit(
            self.store.as_ref(),
            "quota.replaced",
            "quota",
            entity_id,
            json!({ "owner": owner, "quota_id": stored.quota_id }),
        )
        .await;

        Ok(stored)
    }
}

fn check_limits(limits: &QuotaLimits) -> Result<(), AppError> {
    let negative_count = [
        limits.metric_count_limit,
        limits.log_count_limit,
        limits.trace_count_limit,
    ]
    .iter()
    .any(|v| *v < 0);
    let negative_storage = std::iter::once(Some(limits.storage_gb_limit))
        .chain([
            limits.metrics_storage_gb_limit,
            limits.logs_storage_gb_limit,
            limits.traces_storage_gb_limit,
        ])
        .flatten()
        .any(|v| v < Decimal::ZERO);

    if negative_count || negative_storage || limits.requests_per_minute < 0 {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Quota limits must not be negative"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanType;
    use crate::services::memory::MemoryStore;

    fn registry() -> (Arc<MemoryStore>, AccountRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = AccountRegistry::new(store.clone(), AccountConfig::default());
        (store, registry)
    }

    fn input(trial_days: Option<i64>) -> CreateAccount {
        CreateAccount {
            name: "Acme".to_string(),
            email: "ops@acme.test".to_string(),
            company: Some("Acme Corp".to_string()),
            plan_type: PlanType::Pro,
            trial_days,
        }
    }

    #[tokio::test]
    async fn create_account_issues_key_and_plan_quota() {
        let (store, registry) = registry();
        let account = registry.create_account(input(None)).await.unwrap();

        assert!(account.license_key.starts_with("lk_"));
        assert_eq!(account.status, AccountStatus::Active);
        assert!(!account.trial.is_trial);
        let days = account.days_remaining(Utc::now()).unwrap();
        assert!((364..=365).contains(&days));

        let quota = store
            .get_quota(QuotaOwner::Account(account.account_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(quota.limits, QuotaLimits::for_plan(PlanType::Pro));
        assert_eq!(store.audit_entries().len(), 1);
    }

    #[tokio::test]
    async fn trial_account_expires_after_trial_days() {
        let (_, registry) = registry();
        let account = registry.create_account(input(Some(14))).await.unwrap();

        assert!(account.trial.is_trial);
        assert!(account.trial.started_at.is_some());
        assert_eq!(account.days_remaining(Utc::now()), Some(14));

        let err = registry.create_account(input(Some(0))).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn sub_account_names_are_unique_per_account() {
        let (_, registry) = registry();
        let account = registry.create_account(input(None)).await.unwrap();

        let sub = registry
            .create_sub_account(account.account_id, "backend".to_string())
            .await
            .unwrap();
        assert!(sub.api_key.starts_with("sk_"));

        let err = registry
            .create_sub_account(account.account_id, "backend".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let other = registry.create_account(input(None)).await.unwrap();
        registry
            .create_sub_account(other.account_id, "backend".to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sub_account_needs_existing_account() {
        let (_, registry) = registry();
        let err = registry
            .create_sub_account(Uuid::new_v4(), "web".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn illegal_status_transition_is_rejected() {
        let (_, registry) = registry();
        let account = registry.create_account(input(None)).await.unwrap();

        let cancelled = registry
            .update_status(account.account_id, AccountStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, AccountStatus::Cancelled);

        let err = registry
            .update_status(account.account_id, AccountStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn negative_quota_limits_are_rejected() {
        let (_, registry) = registry();
        let account = registry.create_account(input(None)).await.unwrap();
        let limits = QuotaLimits {
            storage_gb_limit: Decimal::new(-1, 0),
            ..QuotaLimits::for_plan(PlanType::Free)
        };
        let err = registry
            .set_quota(QuotaOwner::Account(account.account_id), limits)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
