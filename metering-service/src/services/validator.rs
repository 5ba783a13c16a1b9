//! License and API key validation.
//!
//! A validation never fails for "not entitled": blocked credentials produce a
//! structured [`Decision`]. Only a failed credential lookup yields
//! [`Decision::Unavailable`].

use crate::config::{QuotaFailureMode, ValidationConfig};
use crate::models::{
    Account, AccountStatus, EffectiveQuota, ProductType, QuotaLimits, SubAccountStatus,
};
use crate::services::metrics::record_validation;
use crate::services::quota::QuotaResolver;
use crate::services::usage::{PeriodUsage, UsageReader};
use crate::services::store::MeteringStore;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::utils::secrets::{fingerprint, secrets_match};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Who a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Scope {
    pub account_id: Uuid,
    pub sub_account_id: Option<Uuid>,
}

/// Quota dimension that can block a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Metrics,
    Logs,
    Traces,
    Storage,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Metrics => "metrics",
            Dimension::Logs => "logs",
            Dimension::Traces => "traces",
            Dimension::Storage => "storage",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockReason {
    /// Account status is not active.
    Status(AccountStatus),
    SubAccountStatus(SubAccountStatus),
    Expired,
    QuotaExceeded(Dimension),
    /// Quota or usage could not be read and the service runs fail-closed.
    QuotaUnavailable,
}

impl BlockReason {
    pub fn code(&self) -> &'static str {
        match self {
            BlockReason::Status(_) => "status",
            BlockReason::SubAccountStatus(_) => "sub-account-status",
            BlockReason::Expired => "expired",
            BlockReason::QuotaExceeded(_) => "quota-exceeded",
            BlockReason::QuotaUnavailable => "quota-unavailable",
        }
    }

    pub fn message(&self) -> String {
        match self {
            BlockReason::Status(status) => format!("Account is {}", status),
            BlockReason::SubAccountStatus(status) => {
                format!("Sub-account is {}", status.as_str())
            }
            BlockReason::Expired => "License has expired".to_string(),
            BlockReason::QuotaExceeded(dimension) => {
                format!("Quota exceeded for {}", dimension.as_str())
            }
            BlockReason::QuotaUnavailable => "Quota could not be verified".to_string(),
        }
    }
}

/// Remaining allowance in the current calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub metric_count_remaining: i64,
    pub log_count_remaining: i64,
    pub trace_count_remaining: i64,
    pub storage_gb_remaining: Decimal,
    pub is_blocked: bool,
    pub block_reason: Option<Dimension>,
    pub quota_source: String,
}

/// Outcome of one validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        scope: Scope,
        status: AccountStatus,
        quota: QuotaStatus,
    },
    Blocked {
        scope: Scope,
        status: AccountStatus,
        reason: BlockReason,
        quota: Option<QuotaStatus>,
    },
    /// No account or sub-account holds this key.
    Invalid,
    /// The credential could not be looked up.
    Unavailable,
}

impl Decision {
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::Allowed { .. } => "allowed",
            Decision::Blocked { .. } => "blocked",
            Decision::Invalid => "invalid",
            Decision::Unavailable => "unavailable",
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Decision::Allowed { .. } => "none",
            Decision::Blocked { reason, .. } => reason.code(),
            Decision::Invalid => "no-matching-key",
            Decision::Unavailable => "service-unavailable",
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Compare usage against limits. Used at or above a limit blocks.
///
/// Metrics is checked first, then storage (combined and per product), then
/// the other count products.
pub fn evaluate_quota(quota: &EffectiveQuota, usage: &PeriodUsage) -> QuotaStatus {
    let limits: &QuotaLimits = &quota.limits;
    let metrics = usage.product(ProductType::Metrics).metric_count;
    let logs = usage.product(ProductType::Logs).metric_count;
    let traces = usage.product(ProductType::Traces).metric_count;
    let storage_gb = usage.total.storage_gb();

    let product_storage_exceeded = [
        (ProductType::Metrics, limits.metrics_storage_gb_limit),
        (ProductType::Logs, limits.logs_storage_gb_limit),
        (ProductType::Traces, limits.traces_storage_gb_limit),
    ]
    .into_iter()
    .any(|(product, limit)| limit.is_some_and(|limit| usage.product(product).storage_gb() >= limit));

    let exceeded = if metrics >= limits.metric_count_limit {
        Some(Dimension::Metrics)
    } else if storage_gb >= limits.storage_gb_limit || product_storage_exceeded {
        Some(Dimension::Storage)
    } else if logs >= limits.log_count_limit {
        Some(Dimension::Logs)
    } else if traces >= limits.trace_count_limit {
        Some(Dimension::Traces)
    } else {
        None
    };

    QuotaStatus {
        metric_count_remaining: (limits.metric_count_limit - metrics).max(0),
        log_count_remaining: (limits.log_count_limit - logs).max(0),
        trace_count_remaining: (limits.trace_count_limit - traces).max(0),
        storage_gb_remaining: (limits.storage_gb_limit - storage_gb)
            .max(Decimal::ZERO)
            .round_dp(4),
        is_blocked: exceeded.is_some(),
        block_reason: exceeded,
        quota_source: quota.source.as_str().to_string(),
    }
}

#[derive(Clone)]
pub struct LicenseValidator {
    store: Arc<dyn MeteringStore>,
    resolver: QuotaResolver,
    usage: UsageReader,
    config: ValidationConfig,
}

impl LicenseValidator {
    pub fn new(store: Arc<dyn MeteringStore>, config: ValidationConfig) -> Self {
        Self {
            resolver: QuotaResolver::new(store.clone()),
            usage: UsageReader::new(store.clone()),
            store,
            config,
        }
    }

    #[instrument(skip(self, credential), fields(key = %fingerprint(credential)))]
    pub async fn validate(&self, credential: &str) -> Decision {
        let started = Instant::now();
        let decision = self.decide(credential, Utc::now()).await;
        record_validation(
            decision.outcome(),
            decision.reason_code(),
            started.elapsed().as_secs_f64(),
        );
        debug!(
            outcome = decision.outcome(),
            reason = decision.reason_code(),
            "License validated"
        );
        decision
    }

    async fn decide(&self, credential: &str, now: DateTime<Utc>) -> Decision {
        let (scope, account, sub_status) = match self.lookup(credential).await {
            Ok(Some(found)) => found,
            Ok(None) => return Decision::Invalid,
            Err(e) => {
                warn!(error = %e, "Credential lookup failed");
                return Decision::Unavailable;
            }
        };

        let blocked = |reason| Decision::Blocked {
            scope,
            status: account.status,
            reason,
            quota: None,
        };

        if account.status != AccountStatus::Active {
            return blocked(BlockReason::Status(account.status));
        }
        if account.is_expired(now) {
            return blocked(BlockReason::Expired);
        }
        if let Some(status) = sub_status {
            if status != SubAccountStatus::Active {
                return blocked(BlockReason::SubAccountStatus(status));
            }
        }

        let quota = match tokio::time::timeout(self.config.timeout, self.quota_status(scope, now))
            .await
        {
            Ok(Ok(quota)) => quota,
            Ok(Err(e)) => return self.degraded(scope, account.status, &e.to_string()),
            Err(_) => return self.degraded(scope, account.status, "timed out"),
        };

        if let Some(dimension) = quota.block_reason {
            return Decision::Blocked {
                scope,
                status: account.status,
                reason: BlockReason::QuotaExceeded(dimension),
                quota: Some(quota),
            };
        }

        Decision::Allowed {
            scope,
            status: account.status,
            quota,
        }
    }

    /// Sub-account API keys first, then account license keys. The exact-match
    /// lookup is rechecked in constant time.
    async fn lookup(
        &self,
        credential: &str,
    ) -> Result<Option<(Scope, Account, Option<SubAccountStatus>)>, AppError> {
        if let Some((sub, account)) = self.store.find_sub_account_by_api_key(credential).await? {
            if secrets_match(credential, &sub.api_key) {
                let scope = Scope {
                    account_id: account.account_id,
                    sub_account_id: Some(sub.sub_account_id),
                };
                return Ok(Some((scope, account, Some(sub.status))));
            }
        }

        if let Some(account) = self.store.find_account_by_license_key(credential).await? {
            if secrets_match(credential, &account.license_key) {
                let scope = Scope {
                    account_id: account.account_id,
                    sub_account_id: None,
                };
                return Ok(Some((scope, account, None)));
            }
        }

        Ok(None)
    }

    async fn quota_status(&self, scope: Scope, now: DateTime<Utc>) -> Result<QuotaStatus, AppError> {
        let quota = match self.resolver.resolve(scope.account_id, scope.sub_account_id).await {
            Ok(quota) => quota,
            Err(warning) if warning.is_transient() => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(warning.to_string())))
            }
            Err(warning) => warning.fallback,
        };
        let usage = self
            .usage
            .current_month(scope.account_id, scope.sub_account_id, now)
            .await?;
        Ok(evaluate_quota(&quota, &usage))
    }

    /// Quota or usage could not be read in time.
    fn degraded(&self, scope: Scope, status: AccountStatus, cause: &str) -> Decision {
        match self.config.failure_mode {
            QuotaFailureMode::FailOpen => {
                warn!(
                    account_id = %scope.account_id,
                    cause = cause,
                    "Quota check unavailable, allowing with fallback quota"
                );
                Decision::Allowed {
                    scope,
                    status,
                    quota: evaluate_quota(&EffectiveQuota::fallback(), &PeriodUsage::default()),
                }
            }
            QuotaFailureMode::FailClosed => {
                warn!(
                    account_id = %scope.account_id,
                    cause = cause,
                    "Quota check unavailable, blocking"
                );
                Decision::Blocked {
                    scope,
                    status,
                    reason: BlockReason::QuotaUnavailable,
                    quota: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        PlanType, ProductScope, QuotaSource, RollupKey, UsageRollup, UsageTotals, BYTES_PER_GB,
    };

    fn quota(metric_count_limit: i64, storage_gb: i64) -> EffectiveQuota {
        EffectiveQuota {
            source: QuotaSource::Account,
            quota_id: None,
            limits: QuotaLimits {
                metric_count_limit,
                storage_gb_limit: Decimal::from(storage_gb),
                ..QuotaLimits::for_plan(PlanType::Starter)
            },
        }
    }

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
    fn over_limit_blocks_metrics_with_zero_remaining() {
        let status = evaluate_quota(&quota(1_000_000, 10), &usage(1_200_000, 0));
        assert!(status.is_blocked);
        assert_eq!(status.block_reason, Some(Dimension::Metrics));
        assert_eq!(status.metric_count_remaining, 0);
    }

    #[test]
    fn reaching_the_limit_exactly_blocks() {
        let status = evaluate_quota(&quota(100, 10), &usage(100, 0));
        assert_eq!(status.block_reason, Some(Dimension::Metrics));
    }

    #[test]
    fn storage_blocks_when_metrics_are_fine() {
        let status = evaluate_quota(&quota(100, 1), &usage(10, 2 * BYTES_PER_GB));
        assert_eq!(status.block_reason, Some(Dimension::Storage));
        assert_eq!(status.storage_gb_remaining, Decimal::ZERO);
        assert_eq!(status.metric_count_remaining, 90);
    }

    #[test]
    fn under_limits_is_allowed() {
        let status = evaluate_quota(&quota(100, 1), &usage(40, BYTES_PER_GB / 2));
        assert!(!status.is_blocked);
        assert_eq!(status.metric_count_remaining, 60);
        assert_eq!(status.storage_gb_remaining, Decimal::new(5, 1));
        assert_eq!(status.quota_source, "account");
    }

    #[test]
    fn per_product_storage_limit_blocks() {
        let mut q = quota(100, 10);
        q.limits.metrics_storage_gb_limit = Some(Decimal::ONE);
        let status = evaluate_quota(&q, &usage(10, BYTES_PER_GB));
        assert_eq!(status.block_reason, Some(Dimension::Storage));
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(BlockReason::Expired.code(), "expired");
        assert_eq!(
            BlockReason::QuotaExceeded(Dimension::Metrics).code(),
            "quota-exceeded"
        );
        assert_eq!(Decision::Invalid.reason_code(), "no-matching-key");
    }

    #[test]
    fn period_usage_product_lookup_matches_rollup_fold() {
        let rollup = UsageRollup {
            key: RollupKey {
                account_id: Uuid::nil(),
                sub_account_id: None,
                product: ProductScope::Product(ProductType::Logs),
                bucket_start: Utc::now(),
            },
            metric_count: 7,
            storage_bytes: 0,
        };
        let usage = PeriodUsage::from_rollups(&[rollup]);
        let status = evaluate_quota(&quota(100, 1), &usage);
        let limit = QuotaLimits::for_plan(PlanType::Starter).log_count_limit;
        assert_eq!(status.log_count_remaining, limit - 7);
    }
}
