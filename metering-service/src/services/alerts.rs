//! Quota usage and license expiry alerts.

use crate::config::AlertConfig;
use crate::models::{
    current_month, Account, AccountStatus, Alert, AlertSeverity, AlertType, NewAlert, ProductType,
};
use crate::services::metrics::{record_alert, record_error};
use crate::services::quota::QuotaResolver;
use crate::services::store::MeteringStore;
use crate::services::usage::UsageReader;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A threshold crossed by the current value of one rule family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crossing {
    /// Most significant threshold crossed; the one that raises an alert.
    pub threshold: i64,
    /// Less significant thresholds, claimed silently.
    pub superseded: Vec<i64>,
}

/// Usage thresholds (ascending percentages) at or below `percent`.
pub fn usage_crossing(thresholds: &[i64], percent: Decimal) -> Option<Crossing> {
    let mut crossed: Vec<i64> = thresholds
        .iter()
        .copied()
        .filter(|t| Decimal::from(*t) <= percent)
        .collect();
    crossed.sort_unstable();
    let threshold = crossed.pop()?;
    Some(Crossing {
        threshold,
        superseded: crossed,
    })
}

/// Expiry thresholds (days out) already reached with `days_remaining` left.
pub fn expiry_crossing(thresholds: &[i64], days_remaining: i64) -> Option<Crossing> {
    let mut crossed: Vec<i64> = thresholds
        .iter()
        .copied()
        .filter(|d| days_remaining <= *d)
        .collect();
    crossed.sort_unstable_by(|a, b| b.cmp(a));
    let threshold = crossed.pop()?;
    Some(Crossing {
        threshold,
        superseded: crossed,
    })
}

pub fn usage_severity(threshold: i64) -> AlertSeverity {
    if threshold >= 100 {
        AlertSeverity::Critical
    } else {
        AlertSeverity::Warning
    }
}

pub fn expiry_severity(days: i64) -> AlertSeverity {
    if days <= 1 {
        AlertSeverity::Critical
    } else {
        AlertSeverity::Warning
    }
}

fn percent_of(used: Decimal, limit: Decimal) -> Option<Decimal> {
    if limit <= Decimal::ZERO {
        return None;
    }
    Some((used * Decimal::ONE_HUNDRED / limit).round_dp(2))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationReport {
    pub accounts: usize,
    pub alerts_raised: usize,
    pub failures: usize,
}

/// One candidate alert before its rule is claimed.
struct Candidate {
    alert_type: AlertType,
    rule_prefix: String,
    period_key: String,
    crossing: Crossing,
    current_value: Decimal,
    severity: AlertSeverity,
    message: String,
}

#[derive(Clone)]
pub struct AlertEvaluator {
    store: Arc<dyn MeteringStore>,
    resolver: QuotaResolver,
    usage: UsageReader,
    config: AlertConfig,
}

impl AlertEvaluator {
    pub fn new(store: Arc<dyn MeteringStore>, config: AlertConfig) -> Self {
        Self {
            resolver: QuotaResolver::new(store.clone()),
            usage: UsageReader::new(store.clone()),
            store,
            config,
        }
    }

    /// Evaluate every account that can still use the platform.
    #[instrument(skip(self))]
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> Result<EvaluationReport, AppError> {
        let accounts = self.store.list_accounts().await?;
        let mut report = EvaluationReport::default();

        for account in accounts
            .iter()
            .filter(|a| a.status != AccountStatus::Cancelled)
        {
            report.accounts += 1;
            match self.evaluate_account(account, now).await {
                Ok(raised) => report.alerts_raised += raised.len(),
                Err(e) => {
                    report.failures += 1;
                    record_error("alerts", "evaluate_account");
                    warn!(account_id = %account.account_id, error = %e, "Alert evaluation failed");
                }
            }
        }

        if report.alerts_raised > 0 {
            info!(
                accounts = report.accounts,
                alerts_raised = report.alerts_raised,
                "Alert evaluation completed"
            );
        }
        Ok(report)
    }

    /// Raise alerts for thresholds first crossed in the current period.
    pub async fn evaluate_account(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, AppError> {
        let mut candidates = self.usage_candidates(account, now).await?;
        candidates.extend(self.expiry_candidate(account, now));

        let mut raised = Vec::new();
        for candidate in candidates {
            if let Some(alert) = self.raise(account.account_id, candidate, now).await? {
                raised.push(alert);
            }
        }
        Ok(raised)
    }

    async fn usage_candidates(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, AppError> {
        let quota = self
            .resolver
            .resolve_or_fallback(account.account_id, None)
            .await;
        let usage = self.usage.current_month(account.account_id, None, now).await?;
        let period_key = current_month(now).0.format("%Y-%m").to_string();

        let dimensions = [
            (
                "metrics",
                percent_of(
                    Decimal::from(usage.product(ProductType::Metrics).metric_count),
                    Decimal::from(quota.limits.metric_count_limit),
                ),
            ),
            (
                "storage",
                percent_of(usage.total.storage_gb(), quota.limits.storage_gb_limit),
            ),
        ];

        let mut candidates = Vec::new();
        for (dimension, percent) in dimensions {
            let Some(percent) = percent else { continue };
            let Some(crossing) = usage_crossing(&self.config.usage_thresholds, percent) else {
                continue;
            };
            candidates.push(Candidate {
                alert_type: AlertType::QuotaUsage,
                rule_prefix: format!("usage:{}", dimension),
                period_key: period_key.clone(),
                severity: usage_severity(crossing.threshold),
                message: format!(
                    "{} usage at {}% of quota ({}% threshold)",
                    dimension, percent, crossing.threshold
                ),
                current_value: percent,
                crossing,
            });
        }
        Ok(candidates)
    }

    fn expiry_candidate(&self, account: &Account, now: DateTime<Utc>) -> Option<Candidate> {
        let expires_at = account.expires_at?;
        let days = account.days_remaining(now)?;
        let crossing = expiry_crossing(&self.config.expiry_days, days)?;
        let what = if account.trial.is_trial {
            "Trial"
        } else {
            "License"
        };
        Some(Candidate {
            alert_type: AlertType::LicenseExpiry,
            rule_prefix: "expiry".to_string(),
            period_key: expires_at.date_naive().to_string(),
            severity: expiry_severity(crossing.threshold),
            message: if days == 0 {
                format!("{} expired on {}", what, expires_at.date_naive())
            } else {
                format!("{} expires in {} day(s) on {}", what, days, expires_at.date_naive())
            },
            current_value: Decimal::from(days),
            crossing,
        })
    }

    /// Claim the rule for the period; only the first claimer inserts the alert.
    async fn raise(
        &self,
        account_id: Uuid,
        candidate: Candidate,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>, AppError> {
        let rule_key = format!("{}:{}", candidate.rule_prefix, candidate.crossing.threshold);
        let claimed = self
            .store
            .claim_alert_rule(account_id, &rule_key, &candidate.period_key, now)
            .await?;

        let alert = if claimed {
            let alert = NewAlert {
                account_id,
                alert_type: candidate.alert_type,
                severity: candidate.severity,
                rule_key,
                period_key: candidate.period_key.clone(),
                message: candidate.message,
                threshold: candidate.crossing.threshold,
                current_value: candidate.current_value,
            }
            .into_alert(now);
            self.store.insert_alert(&alert).await?;
            record_alert(alert.alert_type.as_str(), alert.severity.as_str());
            info!(
                account_id = %account_id,
                rule_key = %alert.rule_key,
                severity = alert.severity.as_str(),
                "Alert raised"
            );
            Some(alert)
        } else {
            None
        };

        for threshold in &candidate.crossing.superseded {
            let rule_key = format!("{}:{}", candidate.rule_prefix, threshold);
            self.store
                .claim_alert_rule(account_id, &rule_key, &candidate.period_key, now)
                .await?;
        }

        Ok(alert)
    }

    pub async fn list(
        &self,
        account_id: Uuid,
        unacknowledged_only: bool,
    ) -> Result<Vec<Alert>, AppError> {
        self.store.list_alerts(account_id, unacknowledged_only).await
    }

    pub async fn acknowledge(&self, alert_id: Uuid) -> Result<Alert, AppError> {
        self.store
            .acknowledge_alert(alert_id, Utc::now())
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Alert {} not found", alert_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;
    use crate::models::{CreateAccount, PlanType, UsageEvent};
    use crate::services::aggregator::UsageAggregator;
    use crate::services::memory::MemoryStore;
    use crate::services::registry::AccountRegistry;
    use chrono::Duration;

    #[test]
    fn highest_usage_threshold_wins() {
        let crossing = usage_crossing(&[80, 90, 100], Decimal::from(95)).unwrap();
        assert_eq!(crossing.threshold, 90);
        assert_eq!(crossing.superseded, vec![80]);
        assert!(usage_crossing(&[80, 90, 100], Decimal::from(79)).is_none());
    }

    #[test]
    fn nearest_expiry_threshold_wins() {
        let crossing = expiry_crossing(&[30, 7, 1], 5).unwrap();
        assert_eq!(crossing.threshold, 7);
        assert_eq!(crossing.superseded, vec![30]);
        assert!(expiry_crossing(&[30, 7, 1], 31).is_none());
    }

    #[test]
    fn severity_scales_with_threshold() {
        assert_eq!(usage_severity(90), AlertSeverity::Warning);
        assert_eq!(usage_severity(100), AlertSeverity::Critical);
        assert_eq!(expiry_severity(7), AlertSeverity::Warning);
        assert_eq!(expiry_severity(1), AlertSeverity::Critical);
    }

    async fn account_with_usage(
        store: &Arc<MemoryStore>,
        trial_days: Option<i64>,
        metric_count: i64,
    ) -> Account {
        let registry = AccountRegistry::new(store.clone(), AccountConfig::default());
        let account = registry
            .create_account(CreateAccount {
                name: "Acme".to_string(),
                email: "ops@acme.test".to_string(),
                company: None,
                plan_type: PlanType::Free,
                trial_days,
            })
            .await
            .unwrap();

        let now = Utc::now();
        store
            .append_event(&UsageEvent {
                event_id: Uuid::new_v4(),
                account_id: account.account_id,
                sub_account_id: None,
                product_type: ProductType::Metrics,
                metric_count,
                storage_bytes: 0,
                recorded_at: now,
            })
            .await
            .unwrap();
        UsageAggregator::new(store.clone())
            .aggregate_range(now - Duration::minutes(1), now + Duration::minutes(1))
            .await
            .unwrap();
        account
    }

    #[tokio::test]
    async fn crossing_raises_once_per_period() {
        let store = Arc::new(MemoryStore::new());
        // free plan: 1M metrics
        let account = account_with_usage(&store, None, 950_000).await;
        let evaluator = AlertEvaluator::new(store.clone(), AlertConfig::default());

        let now = Utc::now();
        let raised = evaluator.evaluate_account(&account, now).await.unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].rule_key, "usage:metrics:90");
        assert_eq!(raised[0].severity, AlertSeverity::Warning);

        let again = evaluator.evaluate_account(&account, now).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn trial_nearing_expiry_raises_critical_alert() {
        let store = Arc::new(MemoryStore::new());
        let account = account_with_usage(&store, Some(1), 0).await;
        let evaluator = AlertEvaluator::new(store.clone(), AlertConfig::default());

        let raised = evaluator.evaluate_account(&account, Utc::now()).await.unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].alert_type, AlertType::LicenseExpiry);
        assert_eq!(raised[0].severity, AlertSeverity::Critical);

        let acked = evaluator.acknowledge(raised[0].alert_id).await.unwrap();
        assert!(acked.acknowledged);
        let open = evaluator.list(account.account_id, true).await.unwrap();
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn already_expired_trial_says_expired() {
        let store = Arc::new(MemoryStore::new());
        let account = account_with_usage(&store, Some(1), 0).await;
        let evaluator = AlertEvaluator::new(store.clone(), AlertConfig::default());

        let later = Utc::now() + Duration::days(2);
        let raised = evaluator.evaluate_account(&account, later).await.unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].rule_key, "expiry:1");
        assert_eq!(raised[0].severity, AlertSeverity::Critical);
        assert!(raised[0].message.starts_with("Trial expired on "));
    }

    #[tokio::test]
    async fn acknowledging_unknown_alert_is_not_found() {
        let evaluator = AlertEvaluator::new(Arc::new(MemoryStore::new()), AlertConfig::default());
        assert!(matches!(
            evaluator.acknowledge(Uuid::new_v4()).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }
}
