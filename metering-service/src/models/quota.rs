//! Quota model and plan limit table.

use crate::models::PlanType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The single owner of a quota row. Exactly one variant applies, so the
/// account / sub-account / default exclusivity holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum QuotaOwner {
    Account(Uuid),
    SubAccount(Uuid),
    Default,
}

/// Configured limits. Counts are per calendar month; storage is in GB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub metric_count_limit: i64,
    pub log_count_limit: i64,
    pub trace_count_limit: i64,
    /// Legacy combined storage ceiling across all products.
    pub storage_gb_limit: Decimal,
    pub metrics_storage_gb_limit: Option<Decimal>,
    pub logs_storage_gb_limit: Option<Decimal>,
    pub traces_storage_gb_limit: Option<Decimal>,
    pub requests_per_minute: i32,
    #[serde(default)]
    pub features: Vec<String>,
}

impl QuotaLimits {
    /// Included limits for a plan; the fixed table new accounts start from.
    pub fn for_plan(plan: PlanType) -> Self {
        let (count, storage_gb, rpm, features): (i64, i64, i32, &[&str]) = match plan {
            PlanType::Free => (1_000_000, 1, 60, &["dashboards"]),
            PlanType::Starter => (10_000_000, 10, 600, &["dashboards", "alerts"]),
            PlanType::Pro => (
                100_000_000,
                100,
                6_000,
                &["dashboards", "alerts", "sub_accounts"],
            ),
            PlanType::Enterprise => (
                1_000_000_000,
                1_000,
                60_000,
                &["dashboards", "alerts", "sub_accounts", "sso"],
            ),
        };

        Self {
            metric_count_limit: count,
            log_count_limit: count,
            trace_count_limit: count,
            storage_gb_limit: Decimal::from(storage_gb),
            metrics_storage_gb_limit: None,
            logs_storage_gb_limit: None,
            traces_storage_gb_limit: None,
            requests_per_minute: rpm,
            features: features.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Floor applied when no quota row can be read at any level.
    pub fn fallback() -> Self {
        Self::for_plan(FALLBACK_PLAN)
    }
}

/// Plan whose limits serve as the hardcoded fallback quota.
pub const FALLBACK_PLAN: PlanType = PlanType::Free;

/// A persisted quota row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    pub quota_id: Uuid,
    pub owner: QuotaOwner,
    pub limits: QuotaLimits,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Quota {
    pub fn new(owner: QuotaOwner, limits: QuotaLimits) -> Self {
        let now = Utc::now();
        Self {
            quota_id: Uuid::new_v4(),
            owner,
            limits,
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// Level a quota was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaSource {
    SubAccount,
    Account,
    Default,
    Fallback,
}

impl QuotaSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaSource::SubAccount => "sub_account",
            QuotaSource::Account => "account",
            QuotaSource::Default => "default",
            QuotaSource::Fallback => "fallback",
        }
    }
}

/// The one quota that applies to a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveQuota {
    pub source: QuotaSource,
    pub quota_id: Option<Uuid>,
    #[serde(flatten)]
    pub limits: QuotaLimits,
}

impl EffectiveQuota {
    pub fn from_row(source: QuotaSource, quota: Quota) -> Self {
        Self {
            source,
            quota_id: Some(quota.quota_id),
            limits: quota.limits,
        }
    }

    pub fn fallback() -> Self {
        Self {
            source: QuotaSource::Fallback,
            quota_id: None,
            limits: QuotaLimits::fallback(),
        }
    }
}
