//! Folds raw usage events into hourly, daily and monthly rollups.
//!
//! Every run recomputes whole buckets from their source rows and replaces the
//! stored values by key, so re-running over the same window never double counts.

use crate::models::{Granularity, RollupKey, UsageEvent, UsageRollup};
use crate::services::metrics::{record_aggregation_run, record_error, record_rollups_written};
use crate::services::store::MeteringStore;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use service_core::error::AppError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Concurrent per-account rollup writes.
const WRITE_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct AggregationReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub events: usize,
    pub hourly_rows: usize,
    pub daily_rows: usize,
    pub monthly_rows: usize,
}

/// Smallest run of whole buckets covering `[start, end)`.
pub fn covering(
    granularity: Granularity,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let first = granularity.bucket_start(start);
    let mut last = granularity.bucket_start(end);
    if last < end {
        last = granularity.next_bucket(last);
    }
    (first, last)
}

/// Sum events into hourly rollups keyed by every scope they feed.
pub fn fold_events(events: &[UsageEvent]) -> Vec<UsageRollup> {
    let mut sums: BTreeMap<RollupKey, (i64, i64)> = BTreeMap::new();
    for event in events {
        for key in RollupKey::for_event(event, Granularity::Hourly) {
            let entry = sums.entry(key).or_default();
            entry.0 = entry.0.saturating_add(event.metric_count);
            entry.1 = entry.1.saturating_add(event.storage_bytes);
        }
    }
    into_rollups(sums)
}

/// Re-sum finer rollups into the buckets of `granularity`.
pub fn fold_rollups(rollups: &[UsageRollup], granularity: Granularity) -> Vec<UsageRollup> {
    let mut sums: BTreeMap<RollupKey, (i64, i64)> = BTreeMap::new();
    for rollup in rollups {
        let entry = sums.entry(rollup.key.rebucket(granularity)).or_default();
        entry.0 = entry.0.saturating_add(rollup.metric_count);
        entry.1 = entry.1.saturating_add(rollup.storage_bytes);
    }
    into_rollups(sums)
}

fn into_rollups(sums: BTreeMap<RollupKey, (i64, i64)>) -> Vec<UsageRollup> {
    sums.into_iter()
        .map(|(key, (metric_count, storage_bytes))| UsageRollup {
            key,
            metric_count,
            storage_bytes,
        })
        .collect()
}

#[derive(Clone)]
pub struct UsageAggregator {
    store: Arc<dyn MeteringStore>,
}

impl UsageAggregator {
    pub fn new(store: Arc<dyn MeteringStore>) -> Self {
        Self { store }
    }

    /// Aggregate the trailing `lookback_hours` up to `now`.
    pub async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        lookback_hours: i64,
    ) -> Result<AggregationReport, AppError> {
        let result = self
            .aggregate_range(now - Duration::hours(lookback_hours.max(1)), now)
            .await;
        match &result {
            Ok(_) => record_aggregation_run("success"),
            Err(_) => {
                record_aggregation_run("failure");
                record_error("aggregation", "run_cycle");
            }
        }
        result
    }

    /// Recompute every hour touched by `[start, end)` from events, then the
    /// touched days from hourly rows, then the touched months from daily rows.
    #[instrument(skip(self))]
    pub async fn aggregate_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AggregationReport, AppError> {
        if end <= start {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Aggregation window end must be after start"
            )));
        }

        let (hour_start, hour_end) = covering(Granularity::Hourly, start, end);
        let events = self.store.events_in_range(hour_start, hour_end).await?;
        let hourly = fold_events(&events);
        let hourly_rows = hourly.len();
        self.write(Granularity::Hourly, hourly).await?;

        let (day_start, day_end) = covering(Granularity::Daily, hour_start, hour_end);
        let daily = self
            .refold(Granularity::Daily, day_start, day_end)
            .await?;

        let (month_start, month_end) = covering(Granularity::Monthly, day_start, day_end);
        let monthly = self
            .refold(Granularity::Monthly, month_start, month_end)
            .await?;

        let report = AggregationReport {
            window_start: hour_start,
            window_end: hour_end,
            events: events.len(),
            hourly_rows,
            daily_rows: daily,
            monthly_rows: monthly,
        };
        info!(
            window_start = %report.window_start,
            window_end = %report.window_end,
            events = report.events,
            hourly_rows = report.hourly_rows,
            daily_rows = report.daily_rows,
            monthly_rows = report.monthly_rows,
            "Usage aggregation completed"
        );
        Ok(report)
    }

    async fn refold(
        &self,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let Some(finer) = granularity.finer() else {
            return Ok(0);
        };
        let source = self.store.rollups_in_range(finer, start, end).await?;
        let folded = fold_rollups(&source, granularity);
        let rows = folded.len();
        self.write(granularity, folded).await?;
        Ok(rows)
    }

    /// Replace rollups one account batch at a time. Accounts never share keys
    /// so their batches run concurrently.
    async fn write(&self, granularity: Granularity, rollups: Vec<UsageRollup>) -> Result<(), AppError> {
        let mut by_account: HashMap<Uuid, Vec<UsageRollup>> = HashMap::new();
        for rollup in rollups {
            by_account.entry(rollup.key.account_id).or_default().push(rollup);
        }

        let store = self.store.clone();
        let written: Vec<usize> = stream::iter(by_account.into_values())
            .map(|batch| {
                let store = store.clone();
                async move {
                    store.replace_rollups(granularity, &batch).await?;
                    Ok::<_, AppError>(batch.len())
                }
            })
            .buffer_unordered(WRITE_CONCURRENCY)
            .try_collect()
            .await?;

        record_rollups_written(granularity.as_str(), written.iter().sum());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProductScope, ProductType};
    use crate::services::memory::MemoryStore;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn event(
        account_id: Uuid,
        sub_account_id: Option<Uuid>,
        product_type: ProductType,
        metric_count: i64,
        at: &str,
    ) -> UsageEvent {
        UsageEvent {
            event_id: Uuid::new_v4(),
            account_id,
            sub_account_id,
            product_type,
            metric_count,
            storage_bytes: metric_count * 100,
            recorded_at: ts(at),
        }
    }

    fn find(rollups: &[UsageRollup], sub: Option<Uuid>, product: ProductScope) -> &UsageRollup {
        rollups
            .iter()
            .find(|r| r.key.sub_account_id == sub && r.key.product == product)
            .unwrap()
    }

    #[test]
    fn covering_rounds_outward_to_whole_buckets() {
        let (start, end) = covering(
            Granularity::Hourly,
            ts("2026-03-14T10:15:00Z"),
            ts("2026-03-14T12:00:00Z"),
        );
        assert_eq!(start, ts("2026-03-14T10:00:00Z"));
        assert_eq!(end, ts("2026-03-14T12:00:00Z"));

        let (start, end) = covering(
            Granularity::Monthly,
            ts("2026-12-31T00:00:00Z"),
            ts("2026-12-31T01:00:00Z"),
        );
        assert_eq!(start, ts("2026-12-01T00:00:00Z"));
        assert_eq!(end, ts("2027-01-01T00:00:00Z"));
    }

    #[test]
    fn fold_is_independent_of_event_order() {
        let account = Uuid::new_v4();
        let sub = Uuid::new_v4();
        let mut events = vec![
            event(account, Some(sub), ProductType::Metrics, 10, "2026-03-14T10:01:00Z"),
            event(account, None, ProductType::Logs, 20, "2026-03-14T10:30:00Z"),
            event(account, Some(sub), ProductType::Metrics, 30, "2026-03-14T10:59:59Z"),
        ];
        let forward = fold_events(&events);
        events.reverse();
        assert_eq!(forward, fold_events(&events));

        assert_eq!(find(&forward, None, ProductScope::All).metric_count, 60);
        assert_eq!(
            find(&forward, None, ProductScope::Product(ProductType::Metrics)).metric_count,
            40
        );
        assert_eq!(find(&forward, Some(sub), ProductScope::All).metric_count, 40);
        assert_eq!(find(&forward, Some(sub), ProductScope::All).storage_bytes, 4_000);
    }

    #[tokio::test]
    async fn rerunning_aggregation_does_not_double_count() {
        let store = Arc::new(MemoryStore::new());
        let account = Uuid::new_v4();
        for (count, at) in [
            (10, "2026-03-14T10:05:00Z"),
            (20, "2026-03-14T10:25:00Z"),
            (30, "2026-03-14T10:45:00Z"),
        ] {
            store
                .append_event(&event(account, None, ProductType::Metrics, count, at))
                .await
                .unwrap();
        }
        let aggregator = UsageAggregator::new(store.clone());
        let start = ts("2026-03-14T10:00:00Z");
        let end = ts("2026-03-14T11:00:00Z");

        for _ in 0..2 {
            aggregator.aggregate_range(start, end).await.unwrap();
            let hourly = store
                .scope_rollups(Granularity::Hourly, account, None, start, end)
                .await
                .unwrap();
            assert_eq!(find(&hourly, None, ProductScope::All).metric_count, 60);
        }
    }

    #[tokio::test]
    async fn daily_and_monthly_equal_sum_of_finer_buckets() {
        let store = Arc::new(MemoryStore::new());
        let account = Uuid::new_v4();
        for (count, at) in [
            (5, "2026-03-14T01:00:00Z"),
            (7, "2026-03-14T23:59:00Z"),
            (11, "2026-03-15T12:00:00Z"),
            (13, "2026-04-01T00:00:00Z"),
        ] {
            store
                .append_event(&event(account, None, ProductType::Traces, count, at))
                .await
                .unwrap();
        }
        let aggregator = UsageAggregator::new(store.clone());
        let report = aggregator
            .aggregate_range(ts("2026-03-14T00:00:00Z"), ts("2026-04-02T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(report.events, 4);

        let daily = store
            .scope_rollups(
                Granularity::Daily,
                account,
                None,
                ts("2026-03-14T00:00:00Z"),
                ts("2026-03-15T00:00:00Z"),
            )
            .await
            .unwrap();
        assert_eq!(find(&daily, None, ProductScope::All).metric_count, 12);

        let march = store
            .scope_rollups(
                Granularity::Monthly,
                account,
                None,
                ts("2026-03-01T00:00:00Z"),
                ts("2026-04-01T00:00:00Z"),
            )
            .await
            .unwrap();
        assert_eq!(find(&march, None, ProductScope::All).metric_count, 23);

        let april = store
            .scope_rollups(
                Granularity::Monthly,
                account,
                None,
                ts("2026-04-01T00:00:00Z"),
                ts("2026-05-01T00:00:00Z"),
            )
            .await
            .unwrap();
        assert_eq!(find(&april, None, ProductScope::All).metric_count, 13);
    }

    #[tokio::test]
    async fn empty_window_is_rejected() {
        let aggregator = UsageAggregator::new(Arc::new(MemoryStore::new()));
        let now = Utc::now();
        assert!(matches!(
            aggregator.aggregate_range(now, now).await.unwrap_err(),
            AppError::BadRequest(_)
        ));
    }
}
