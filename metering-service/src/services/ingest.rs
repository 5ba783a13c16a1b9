use crate::models::{RecordUsage, UsageEvent};
use crate::services::metrics::{record_error, record_usage_event};
use crate::services::store::MeteringStore;
use chrono::Utc;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Appends raw usage events. No quota check happens here: usage is recorded
/// even for blocked accounts so billing stays accurate.
#[derive(Clone)]
pub struct UsageIngestor {
    store: Arc<dyn MeteringStore>,
}

impl UsageIngestor {
    pub fn new(store: Arc<dyn MeteringStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, input), fields(account_id = %input.account_id, product_type = input.product_type.as_str()))]
    pub async fn ingest(&self, input: RecordUsage) -> Result<UsageEvent, AppError> {
        if input.metric_count < 0 || input.storage_bytes < 0 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "metric_count and storage_bytes must not be negative"
            )));
        }

        self.store
            .get_account(input.account_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Account {} not found", input.account_id))
            })?;

        if let Some(sub_account_id) = input.sub_account_id {
            let belongs = self
                .store
                .get_sub_account(sub_account_id)
                .await?
                .is_some_and(|s| s.account_id == input.account_id);
            if !belongs {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Sub-account {} does not belong to account {}",
                    sub_account_id,
                    input.account_id
                )));
            }
        }

        let event = UsageEvent {
            event_id: Uuid::new_v4(),
            account_id: input.account_id,
            sub_account_id: input.sub_account_id,
            product_type: input.product_type,
            metric_count: input.metric_count,
            storage_bytes: input.storage_bytes,
            recorded_at: input.recorded_at.unwrap_or_else(Utc::now),
        };

        if let Err(e) = self.store.append_event(&event).await {
            record_error("store", "append_event");
            return Err(e);
        }

        record_usage_event(event.product_type.as_str());
        debug!(event_id = %event.event_id, metric_count = event.metric_count, "Usage event recorded");
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;
    use crate::models::{CreateAccount, PlanType, ProductType};
    use crate::services::memory::MemoryStore;
    use crate::services::registry::AccountRegistry;

    async fn setup() -> (Arc<MemoryStore>, UsageIngestor, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let registry = AccountRegistry::new(store.clone(), AccountConfig::default());
        let account = registry
            .create_account(CreateAccount {
                name: "Acme".to_string(),
                email: "ops@acme.test".to_string(),
                company: None,
                plan_type: PlanType::Starter,
                trial_days: None,
            })
            .await
            .unwrap();
        (store.clone(), UsageIngestor::new(store), account.account_id)
    }

    fn usage(account_id: Uuid, metric_count: i64) -> RecordUsage {
        RecordUsage {
            account_id,
            sub_account_id: None,
            product_type: ProductType::Metrics,
            metric_count,
            storage_bytes: 0,
            recorded_at: None,
        }
    }

    #[tokio::test]
    async fn appends_event_for_known_account() {
        let (store, ingestor, account_id) = setup().await;
        let event = ingestor.ingest(usage(account_id, 10)).await.unwrap();

        let start = event.recorded_at - chrono::Duration::seconds(1);
        let end = event.recorded_at + chrono::Duration::seconds(1);
        let events = store.events_in_range(start, end).await.unwrap();
        assert_eq!(events, vec![event]);
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let (_, ingestor, _) = setup().await;
        let err = ingestor.ingest(usage(Uuid::new_v4(), 1)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn foreign_sub_account_and_negative_counts_are_rejected() {
        let (_, ingestor, account_id) = setup().await;

        let mut foreign = usage(account_id, 1);
        foreign.sub_account_id = Some(Uuid::new_v4());
        assert!(matches!(
            ingestor.ingest(foreign).await.unwrap_err(),
            AppError::BadRequest(_)
        ));

        assert!(matches!(
            ingestor.ingest(usage(account_id, -5)).await.unwrap_err(),
            AppError::BadRequest(_)
        ));
    }
}
