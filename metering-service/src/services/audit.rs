use crate::models::AuditEntry;
use crate::services::store::MeteringStore;
use uuid::Uuid;

/// Actor recorded for changes made through the HTTP API.
pub const API_ACTOR: &str = "api";

/// Append an audit entry. Failures are logged and never fail the caller.
pub async fn record_audit(
    store: &dyn MeteringStore,
    action: &str,
    entity_type: &str,
    entity_id: Uuid,
    details: serde_json::Value,
) {
    let entry = AuditEntry::new(API_ACTOR, action, entity_type, entity_id, details);
    if let Err(e) = store.append_audit(&entry).await {
        tracing::warn!(
            error = %e,
            action = action,
            entity_id = %entity_id,
            "Failed to write audit entry"
        );
    }
}
