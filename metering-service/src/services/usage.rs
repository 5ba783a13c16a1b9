//! Read side of usage: period totals and daily history from rollups.

use crate::models::{
    current_month, next_month_start, start_of_day, start_of_month, DailyUsage, Granularity, ProductScope, ProductType, UsageRollup,
    UsageTotals,
};
use crate::services::store::MeteringStore;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use service_core::error::AppError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Usage of one scope over a period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeriodUsage {
    pub total: UsageTotals,
    pub by_product: BTreeMap<ProductType, UsageTotals>,
}

impl PeriodUsage {
    /// Sum rollups of a single scope. `All` rows feed the total.
    pub fn from_rollups(rollups: &[UsageRollup]) -> Self {
        let mut usage = PeriodUsage::default();
        for rollup in rollups {
            match rollup.key.product {
                ProductScope::All => usage.total.add(rollup.metric_count, rollup.storage_bytes),
                ProductScope::Product(product) => usage
                    .by_product
                    .entry(product)
                    .or_default()
                    .add(rollup.metric_count, rollup.storage_bytes),
            }
        }
        usage
    }

    pub fn product(&self, product: ProductType) -> UsageTotals {
        self.by_product.get(&product).copied().unwrap_or_default()
    }

    pub fn merge(&mut self, other: &PeriodUsage) {
        self.total
            .add(other.total.metric_count, other.total.storage_bytes);
        for (product, totals) in &other.by_product {
            self.by_product
                .entry(*product)
                .or_default()
                .add(totals.metric_count, totals.storage_bytes);
        }
    }
}

/// Split `[start, end)` (day-aligned) into reads: whole calendar months from
/// monthly rollups and the partial months at either edge from daily rollups.
pub fn billing_segments(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<(Granularity, DateTime<Utc>, DateTime<Utc>)> {
    let mut segments = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let month_start = start_of_month(cursor.date_naive());
        let month_end = next_month_start(cursor.date_naive());
        if cursor == month_start && month_end <= end {
            segments.push((Granularity::Monthly, cursor, month_end));
            cursor = month_end;
        } else {
            let segment_end = month_end.min(end);
            segments.push((Granularity::Daily, cursor, segment_end));
            cursor = segment_end;
        }
    }
    segments
}

#[derive(Clone)]
pub struct UsageReader {
    store: Arc<dyn MeteringStore>,
}

impl UsageReader {
    pub fn new(store: Arc<dyn MeteringStore>) -> Self {
        Self { store }
    }

    pub async fn usage_between(
        &self,
        granularity: Granularity,
        account_id: Uuid,
        sub_account_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PeriodUsage, AppError> {
        let rollups = self
            .store
            .scope_rollups(granularity, account_id, sub_account_id, start, end)
            .await?;
        Ok(PeriodUsage::from_rollups(&rollups))
    }

    /// Usage over an arbitrary day-aligned period, reading monthly rollups for
    /// whole months and daily rollups for the rest.
    pub async fn usage_for_period(
        &self,
        account_id: Uuid,
        sub_account_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PeriodUsage, AppError> {
        let mut usage = PeriodUsage::default();
        for (granularity, from, to) in billing_segments(start, end) {
            let part = self
                .usage_between(granularity, account_id, sub_account_id, from, to)
                .await?;
            usage.merge(&part);
        }
        Ok(usage)
    }

    /// Current calendar month (UTC), summed from daily rollups.
    pub async fn current_month(
        &self,
        account_id: Uuid,
        sub_account_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<PeriodUsage, AppError> {
        let (start, end) = current_month(now);
        self.usage_between(Granularity::Daily, account_id, sub_account_id, start, end)
            .await
    }

    /// Account-wide daily totals for the last `days` days including today,
    /// ascending. Days without usage are reported as zero.
    pub async fn daily_history(
        &self,
        account_id: Uuid,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DailyUsage>, AppError> {
        let today = start_of_day(now.date_naive());
        let start = today - Duration::days(days - 1);
        let end = today + Duration::days(1);

        let rollups = self
            .store
            .scope_rollups(Granularity::Daily, account_id, None, start, end)
            .await?;
        let by_day: HashMap<DateTime<Utc>, &UsageRollup> = rollups
            .iter()
            .filter(|r| r.key.product == ProductScope::All)
            .map(|r| (r.key.bucket_start, r))
            .collect();

        let mut history = Vec::with_capacity(days as usize);
        let mut day = start;
        while day < end {
            let (metric_count, storage_bytes) = by_day
                .get(&day)
                .map(|r| (r.metric_count, r.storage_bytes))
                .unwrap_or((0, 0));
            let totals = UsageTotals {
                metric_count,
                storage_bytes,
            };
            history.push(DailyUsage {
                day: day.date_naive(),
                metric_count,
                storage_gb: totals.storage_gb(),
            });
            day += Duration::days(1);
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RollupKey, BYTES_PER_GB};
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        start_of_day(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn rollup(product: ProductScope, metric_count: i64, storage_bytes: i64) -> UsageRollup {
        UsageRollup {
            key: RollupKey {
                account_id: Uuid::nil(),
                sub_account_id: None,
                product,
                bucket_start: Utc::now(),
            },
            metric_count,
            storage_bytes,
        }
    }

    #[test]
    fn all_rows_feed_total_and_product_rows_feed_breakdown() {
        let rows = vec![
            rollup(ProductScope::All, 30, BYTES_PER_GB),
            rollup(ProductScope::Product(ProductType::Metrics), 20, 0),
            rollup(ProductScope::Product(ProductType::Logs), 10, BYTES_PER_GB),
            rollup(ProductScope::All, 5, 0),
        ];
        let usage = PeriodUsage::from_rollups(&rows);

        assert_eq!(usage.total.metric_count, 35);
        assert_eq!(usage.total.storage_bytes, BYTES_PER_GB);
        assert_eq!(usage.product(ProductType::Metrics).metric_count, 20);
        assert_eq!(usage.product(ProductType::Traces), UsageTotals::default());
    }

    #[test]
    fn mid_month_period_reads_daily_edges_and_monthly_middle() {
        let segments = billing_segments(day(2026, 3, 15), day(2026, 5, 15));
        assert_eq!(
            segments,
            vec![
                (Granularity::Daily, day(2026, 3, 15), day(2026, 4, 1)),
                (Granularity::Monthly, day(2026, 4, 1), day(2026, 5, 1)),
                (Granularity::Daily, day(2026, 5, 1), day(2026, 5, 15)),
            ]
        );
    }

    #[test]
    fn calendar_month_period_is_one_monthly_read() {
        let segments = billing_segments(day(2026, 12, 1), day(2027, 1, 1));
        assert_eq!(
            segments,
            vec![(Granularity::Monthly, day(2026, 12, 1), day(2027, 1, 1))]
        );
    }

    #[test]
    fn merge_adds_totals_and_products() {
        let mut a = PeriodUsage::from_rollups(&[
            rollup(ProductScope::All, 10, 0),
            rollup(ProductScope::Product(ProductType::Metrics), 10, 0),
        ]);
        let b = PeriodUsage::from_rollups(&[
            rollup(ProductScope::All, 5, BYTES_PER_GB),
            rollup(ProductScope::Product(ProductType::Logs), 5, BYTES_PER_GB),
        ]);
        a.merge(&b);

        assert_eq!(a.total.metric_count, 15);
        assert_eq!(a.product(ProductType::Metrics).metric_count, 10);
        assert_eq!(a.product(ProductType::Logs).storage_bytes, BYTES_PER_GB);
    }
}
