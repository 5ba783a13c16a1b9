//! Effective quota resolution.

use crate::models::{EffectiveQuota, QuotaOwner, QuotaSource};
use crate::services::metrics::record_quota_fallback;
use crate::services::store::MeteringStore;
use std::sync::Arc;
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Why resolution fell back to the floor quota.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WarningReason {
    /// No row at any level, including the default. A misconfiguration.
    #[error("no quota row at any level")]
    NoQuotaRow,
    /// The quota table could not be read.
    #[error("quota store unavailable: {0}")]
    StoreUnavailable(String),
}

impl WarningReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningReason::NoQuotaRow => "no_quota_row",
            WarningReason::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

/// Resolution did not find a configured quota. `fallback` is still usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ResolutionWarning {
    pub reason: WarningReason,
    pub fallback: EffectiveQuota,
}

impl ResolutionWarning {
    fn new(reason: WarningReason) -> Self {
        Self {
            reason,
            fallback: EffectiveQuota::fallback(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.reason, WarningReason::StoreUnavailable(_))
    }
}

/// Levels consulted for a scope, most specific first.
pub fn resolution_order(
    account_id: Uuid,
    sub_account_id: Option<Uuid>,
) -> Vec<(QuotaSource, QuotaOwner)> {
    let mut order = Vec::with_capacity(3);
    if let Some(sub_account_id) = sub_account_id {
        order.push((QuotaSource::SubAccount, QuotaOwner::SubAccount(sub_account_id)));
    }
    order.push((QuotaSource::Account, QuotaOwner::Account(account_id)));
    order.push((QuotaSource::Default, QuotaOwner::Default));
    order
}

#[derive(Clone)]
pub struct QuotaResolver {
    store: Arc<dyn MeteringStore>,
}

impl QuotaResolver {
    pub fn new(store: Arc<dyn MeteringStore>) -> Self {
        Self { store }
    }

    /// Resolve the one quota that applies to `(account_id, sub_account_id)`.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn resolve(
        &self,
        account_id: Uuid,
        sub_account_id: Option<Uuid>,
    ) -> Result<EffectiveQuota, ResolutionWarning> {
        for (source, owner) in resolution_order(account_id, sub_account_id) {
            match self.store.get_quota(owner).await {
                Ok(Some(quota)) => return Ok(EffectiveQuota::from_row(source, quota)),
                Ok(None) => continue,
                Err(e) => {
                    let warning =
                        ResolutionWarning::new(WarningReason::StoreUnavailable(e.to_string()));
                    warn!(
                        account_id = %account_id,
                        level = source.as_str(),
                        error = %e,
                        "Quota lookup failed, using fallback quota"
                    );
                    record_quota_fallback(warning.reason.as_str());
                    return Err(warning);
                }
            }
        }

        warn!(account_id = %account_id, "No quota row found at any level, using fallback quota");
        record_quota_fallback(WarningReason::NoQuotaRow.as_str());
        Err(ResolutionWarning::new(WarningReason::NoQuotaRow))
    }

    /// Resolve, degrading to the fallback quota on any warning.
    pub async fn resolve_or_fallback(
        &self,
        account_id: Uuid,
        sub_account_id: Option<Uuid>,
    ) -> EffectiveQuota {
        self.resolve(account_id, sub_account_id)
            .await
            .unwrap_or_else(|warning| warning.fallback)
    }
}
