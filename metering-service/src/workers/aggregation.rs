//! Periodic rollup and alert evaluation.

use crate::config::AggregationConfig;
use crate::services::{AlertEvaluator, UsageAggregator};
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct AggregationWorker {
    config: AggregationConfig,
    aggregator: UsageAggregator,
    alerts: AlertEvaluator,
    shutdown_token: CancellationToken,
}

impl AggregationWorker {
    pub fn new(
        config: AggregationConfig,
        aggregator: UsageAggregator,
        alerts: AlertEvaluator,
    ) -> Self {
        Self {
            config,
            aggregator,
            alerts,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops the loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn start(self) {
        if !self.config.enabled {
            tracing::info!("Aggregation worker disabled by configuration");
            return;
        }
        if self.config.interval.is_zero() {
            tracing::error!("Aggregation interval must be non-zero; worker not started");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            lookback_hours = self.config.lookback_hours,
            "Starting aggregation worker"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Aggregation worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        let now = Utc::now();

        match self
            .aggregator
            .run_cycle(now, self.config.lookback_hours)
            .await
        {
            Ok(report) => tracing::debug!(
                events = report.events,
                hourly_rows = report.hourly_rows,
                "Aggregation cycle complete"
            ),
            Err(e) => tracing::error!(error = %e, "Aggregation cycle failed"),
        }

        match self.alerts.evaluate_all(now).await {
            Ok(report) if report.alerts_raised > 0 || report.failures > 0 => tracing::info!(
                accounts = report.accounts,
                alerts_raised = report.alerts_raised,
                failures = report.failures,
                "Alert evaluation complete"
            ),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Alert evaluation failed"),
        }
    }
}
