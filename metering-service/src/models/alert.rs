//! Alert and audit models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    QuotaUsage,
    LicenseExpiry,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::QuotaUsage => "quota_usage",
            AlertType::LicenseExpiry => "license_expiry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quota_usage" => Some(AlertType::QuotaUsage),
            "license_expiry" => Some(AlertType::LicenseExpiry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "warning" => Some(AlertSeverity::Warning),
            "critical" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

/// Point-in-time notification. Only the acknowledgment fields ever change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub account_id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub rule_key: String,
    pub period_key: String,
    pub message: String,
    pub threshold: i64,
    pub current_value: Decimal,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub account_id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub rule_key: String,
    pub period_key: String,
    pub message: String,
    pub threshold: i64,
    pub current_value: Decimal,
}

impl NewAlert {
    pub fn into_alert(self, created_utc: DateTime<Utc>) -> Alert {
        Alert {
            alert_id: Uuid::new_v4(),
            account_id: self.account_id,
            alert_type: self.alert_type,
            severity: self.severity,
            rule_key: self.rule_key,
            period_key: self.period_key,
            message: self.message,
            threshold: self.threshold,
            current_value: self.current_value,
            acknowledged: false,
            acknowledged_at: None,
            created_utc,
        }
    }
}

/// Append-only record of a state-changing action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: Uuid,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub details: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: &str,
        action: &str,
        entity_type: &str,
        entity_id: Uuid,
        details: serde_json::Value,
    ) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            actor: actor.to_string(),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            details,
            created_utc: Utc::now(),
        }
    }
}
