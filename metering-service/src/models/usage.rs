//! Usage event and rollup models.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bytes per GB used for storage accounting (binary gigabyte).
pub const BYTES_PER_GB: i64 = 1024 * 1024 * 1024;

/// Telemetry product an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Metrics,
    Logs,
    Traces,
}

impl ProductType {
    pub const ALL: [ProductType; 3] = [ProductType::Metrics, ProductType::Logs, ProductType::Traces];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Metrics => "metrics",
            ProductType::Logs => "logs",
            ProductType::Traces => "traces",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "metrics" => Some(ProductType::Metrics),
            "logs" => Some(ProductType::Logs),
            "traces" => Some(ProductType::Traces),
            _ => None,
        }
    }
}

/// Product dimension of a rollup key; `All` sums every product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductScope {
    All,
    Product(ProductType),
}

impl ProductScope {
    pub const ALL_TEXT: &'static str = "all";

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductScope::All => Self::ALL_TEXT,
            ProductScope::Product(p) => p.as_str(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s == Self::ALL_TEXT {
            return Some(ProductScope::All);
        }
        ProductType::parse(s).map(ProductScope::Product)
    }
}

/// Immutable append-only usage fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub event_id: Uuid,
    pub account_id: Uuid,
    pub sub_account_id: Option<Uuid>,
    pub product_type: ProductType,
    pub metric_count: i64,
    pub storage_bytes: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Input for recording usage.
#[derive(Debug, Clone)]
pub struct RecordUsage {
    pub account_id: Uuid,
    pub sub_account_id: Option<Uuid>,
    pub product_type: ProductType,
    pub metric_count: i64,
    pub storage_bytes: i64,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Rollup time granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hourly,
    Daily,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Monthly => "monthly",
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Hourly => ts
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(ts),
            Granularity::Daily => start_of_day(ts.date_naive()),
            Granularity::Monthly => start_of_month(ts.date_naive()),
        }
    }

    /// Start of the bucket after the one starting at `bucket_start`.
    pub fn next_bucket(&self, bucket_start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Hourly => bucket_start + Duration::hours(1),
            Granularity::Daily => bucket_start + Duration::days(1),
            Granularity::Monthly => next_month_start(bucket_start.date_naive()),
        }
    }

    /// The granularity whose buckets fold into this one.
    pub fn finer(&self) -> Option<Granularity> {
        match self {
            Granularity::Hourly => None,
            Granularity::Daily => Some(Granularity::Hourly),
            Granularity::Monthly => Some(Granularity::Daily),
        }
    }
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

pub fn start_of_month(date: NaiveDate) -> DateTime<Utc> {
    let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date);
    start_of_day(first)
}

pub fn next_month_start(date: NaiveDate) -> DateTime<Utc> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date);
    start_of_day(first)
}

/// Calendar month (UTC) containing `now`, as a half-open range.
pub fn current_month(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = start_of_month(now.date_naive());
    (start, next_month_start(start.date_naive()))
}

/// Identity of a rollup bucket. `sub_account_id == None` is the account-wide row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RollupKey {
    pub account_id: Uuid,
    pub sub_account_id: Option<Uuid>,
    pub product: ProductScope,
    pub bucket_start: DateTime<Utc>,
}

impl RollupKey {
    /// Every key an event contributes to at the given granularity.
    pub fn for_event(event: &UsageEvent, granularity: Granularity) -> Vec<RollupKey> {
        let bucket_start = granularity.bucket_start(event.recorded_at);
        let mut subs = vec![None];
        if event.sub_account_id.is_some() {
            subs.push(event.sub_account_id);
        }

        let mut keys = Vec::with_capacity(subs.len() * 2);
        for sub_account_id in subs {
            for product in [ProductScope::All, ProductScope::Product(event.product_type)] {
                keys.push(RollupKey {
                    account_id: event.account_id,
                    sub_account_id,
                    product,
                    bucket_start,
                });
            }
        }
        keys
    }

    /// Same key moved to the enclosing bucket of a coarser granularity.
    pub fn rebucket(&self, granularity: Granularity) -> RollupKey {
        RollupKey {
            bucket_start: granularity.bucket_start(self.bucket_start),
            ..*self
        }
    }
}

/// Aggregated usage for one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRollup {
    pub key: RollupKey,
    pub metric_count: i64,
    pub storage_bytes: i64,
}

impl UsageRollup {
    pub fn storage_gb(&self) -> Decimal {
        bytes_to_gb(self.storage_bytes)
    }
}

/// Sums for one scope over some period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub metric_count: i64,
    pub storage_bytes: i64,
}

impl UsageTotals {
    pub fn add(&mut self, metric_count: i64, storage_bytes: i64) {
        self.metric_count = self.metric_count.saturating_add(metric_count);
        self.storage_bytes = self.storage_bytes.saturating_add(storage_bytes);
    }

    pub fn storage_gb(&self) -> Decimal {
        bytes_to_gb(self.storage_bytes)
    }
}

pub fn bytes_to_gb(bytes: i64) -> Decimal {
    Decimal::from(bytes) / Decimal::from(BYTES_PER_GB)
}

/// One row of the daily usage history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUsage {
    pub day: NaiveDate,
    pub metric_count: i64,
    pub storage_gb: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn bucket_start_truncates_per_granularity() {
        let t = ts("2026-03-14T15:09:26.535Z");
        assert_eq!(Granularity::Hourly.bucket_start(t), ts("2026-03-14T15:00:00Z"));
        assert_eq!(Granularity::Daily.bucket_start(t), ts("2026-03-14T00:00:00Z"));
        assert_eq!(Granularity::Monthly.bucket_start(t), ts("2026-03-01T00:00:00Z"));
    }

    #[test]
    fn next_month_wraps_year() {
        let dec = ts("2026-12-01T00:00:00Z");
        assert_eq!(Granularity::Monthly.next_bucket(dec), ts("2027-01-01T00:00:00Z"));
    }

    #[test]
    fn sub_account_event_feeds_four_keys() {
        let event = UsageEvent {
            event_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            sub_account_id: Some(Uuid::new_v4()),
            product_type: ProductType::Logs,
            metric_count: 1,
            storage_bytes: 1,
            recorded_at: ts("2026-03-14T15:09:26Z"),
        };
        let keys = RollupKey::for_event(&event, Granularity::Hourly);
        assert_eq!(keys.len(), 4);
        assert!(keys
            .iter()
            .any(|k| k.sub_account_id.is_none() && k.product == ProductScope::All));

        let account_only = UsageEvent {
            sub_account_id: None,
            ..event
        };
        assert_eq!(RollupKey::for_event(&account_only, Granularity::Hourly).len(), 2);
    }

    #[test]
    fn one_gb_of_bytes_is_one_gb() {
        assert_eq!(bytes_to_gb(BYTES_PER_GB), Decimal::ONE);
        assert_eq!(bytes_to_gb(BYTES_PER_GB / 2), Decimal::new(5, 1));
    }

    #[test]
    fn product_scope_parses_all() {
        assert_eq!(ProductScope::parse("all"), Some(ProductScope::All));
        assert_eq!(
            ProductScope::parse("traces"),
            Some(ProductScope::Product(ProductType::Traces))
        );
        assert_eq!(ProductScope::parse("spans"), None);
    }
}
