use crate::models::{Account, AccountStatus, PlanType};
use crate::services::{Decision, Dimension, QuotaStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateRequest {
    #[validate(length(min = 1, max = 256, message = "api_key cannot be empty"))]
    pub api_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuotaStatusResponse {
    pub metric_count_remaining: i64,
    pub storage_gb_remaining: Decimal,
    pub log_count_remaining: i64,
    pub trace_count_remaining: i64,
    pub is_blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<Dimension>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_source: Option<String>,
}

impl From<QuotaStatus> for QuotaStatusResponse {
    fn from(quota: QuotaStatus) -> Self {
        Self {
            metric_count_remaining: quota.metric_count_remaining,
            storage_gb_remaining: quota.storage_gb_remaining,
            log_count_remaining: quota.log_count_remaining,
            trace_count_remaining: quota.trace_count_remaining,
            is_blocked: quota.is_blocked,
            block_reason: quota.block_reason.map(|_| "quota-exceeded".to_string()),
            dimension: quota.block_reason,
            quota_source: Some(quota.quota_source),
        }
    }
}

impl QuotaStatusResponse {
    /// Blocked before quota was evaluated: nothing remains.
    fn exhausted(reason: &str) -> Self {
        Self {
            metric_count_remaining: 0,
            storage_gb_remaining: Decimal::ZERO,
            log_count_remaining: 0,
            trace_count_remaining: 0,
            is_blocked: true,
            block_reason: Some(reason.to_string()),
            dimension: None,
            quota_source: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub valid: bool,
    pub account_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_account_id: Option<Uuid>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_status: Option<QuotaStatusResponse>,
}

impl From<Decision> for ValidationResponse {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Allowed {
                scope,
                status,
                quota,
            } => Self {
                valid: true,
                account_id: Some(scope.account_id),
                sub_account_id: scope.sub_account_id,
                status: status.as_str().to_string(),
                message: None,
                quota_status: Some(quota.into()),
            },
            Decision::Blocked {
                scope,
                status,
                reason,
                quota,
            } => {
                let quota_status = match quota {
                    Some(quota) => quota.into(),
                    None => QuotaStatusResponse::exhausted(reason.code()),
                };
                Self {
                    valid: false,
                    account_id: Some(scope.account_id),
                    sub_account_id: scope.sub_account_id,
                    status: status.as_str().to_string(),
                    message: Some(reason.message()),
                    quota_status: Some(quota_status),
                }
            }
            Decision::Invalid => Self {
                valid: false,
                account_id: None,
                sub_account_id: None,
                status: "invalid".to_string(),
                message: Some("No matching key".to_string()),
                quota_status: None,
            },
            Decision::Unavailable => Self {
                valid: false,
                account_id: None,
                sub_account_id: None,
                status: "unavailable".to_string(),
                message: Some("Validation temporarily unavailable, retry".to_string()),
                quota_status: None,
            },
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LicenseStatusParams {
    #[validate(length(min = 1, message = "key cannot be empty"))]
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LicenseStatusResponse {
    pub account_id: Uuid,
    pub name: String,
    pub status: AccountStatus,
    pub plan_type: PlanType,
    pub is_trial: bool,
    pub trial_started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub is_expired: bool,
}

impl LicenseStatusResponse {
    pub fn from_account(account: Account, now: DateTime<Utc>) -> Self {
        Self {
            days_remaining: account.days_remaining(now),
            is_expired: account.is_expired(now),
            account_id: account.account_id,
            name: account.name,
            status: account.status,
            plan_type: account.plan_type,
            is_trial: account.trial.is_trial,
            trial_started_at: account.trial.started_at,
            expires_at: account.expires_at,
        }
    }
}
