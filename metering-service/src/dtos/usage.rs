use crate::models::{DailyUsage, EffectiveQuota, ProductType, QuotaSource, RecordUsage};
use crate::services::PeriodUsage;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct IngestRequest {
    pub account_id: Uuid,
    pub sub_account_id: Option<Uuid>,
    #[serde(default = "default_product")]
    pub product_type: ProductType,
    #[validate(range(min = 0, message = "metric_count must not be negative"))]
    pub metric_count: i64,
    #[serde(default)]
    #[validate(range(min = 0, message = "storage_bytes must not be negative"))]
    pub storage_bytes: i64,
    pub recorded_at: Option<DateTime<Utc>>,
}

fn default_product() -> ProductType {
    ProductType::Metrics
}

impl From<IngestRequest> for RecordUsage {
    fn from(request: IngestRequest) -> Self {
        Self {
            account_id: request.account_id,
            sub_account_id: request.sub_account_id,
            product_type: request.product_type,
            metric_count: request.metric_count,
            storage_bytes: request.storage_bytes,
            recorded_at: request.recorded_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub event_id: Uuid,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CurrentUsageParams {
    pub sub_account_id: Option<Uuid>,
}

/// Used, limit and percent of limit for one dimension.
#[derive(Debug, Serialize, Deserialize)]
pub struct UsageAgainstLimit {
    pub used: Decimal,
    pub limit: Decimal,
    pub percent: Decimal,
}

impl UsageAgainstLimit {
    fn new(used: Decimal, limit: Decimal) -> Self {
        let percent = if limit > Decimal::ZERO {
            (used * Decimal::ONE_HUNDRED / limit).round_dp(2)
        } else {
            Decimal::ZERO
        };
        Self {
            used: used.round_dp(4),
            limit,
            percent,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentUsageResponse {
    pub account_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_account_id: Option<Uuid>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub quota_source: QuotaSource,
    pub metrics: UsageAgainstLimit,
    pub logs: UsageAgainstLimit,
    pub traces: UsageAgainstLimit,
    pub storage_gb: UsageAgainstLimit,
}

impl CurrentUsageResponse {
    pub fn new(
        account_id: Uuid,
        sub_account_id: Option<Uuid>,
        (period_start, period_end): (DateTime<Utc>, DateTime<Utc>),
        quota: &EffectiveQuota,
        usage: &PeriodUsage,
    ) -> Self {
        let count = |product: ProductType, limit: i64| {
            UsageAgainstLimit::new(
                Decimal::from(usage.product(product).metric_count),
                Decimal::from(limit),
            )
        };
        Self {
            account_id,
            sub_account_id,
            period_start,
            period_end,
            quota_source: quota.source,
            metrics: count(ProductType::Metrics, quota.limits.metric_count_limit),
            logs: count(ProductType::Logs, quota.limits.log_count_limit),
            traces: count(ProductType::Traces, quota.limits.trace_count_limit),
            storage_gb: UsageAgainstLimit::new(
                usage.total.storage_gb(),
                quota.limits.storage_gb_limit,
            ),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct HistoryParams {
    #[validate(range(min = 1, max = 365, message = "days must be between 1 and 365"))]
    pub days: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub account_id: Uuid,
    pub days: Vec<DailyUsage>,
}

#[derive(Debug, Deserialize)]
pub struct AggregateRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
