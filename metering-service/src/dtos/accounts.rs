use crate::models::{
    Account, AccountStatus, CreateAccount, PlanType, QuotaLimits, SubAccount, SubAccountStatus,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(length(min = 1, max = 200, message = "Name cannot be empty"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub company: Option<String>,
    pub plan_type: PlanType,
    #[validate(range(min = 1, max = 365, message = "trial_days must be between 1 and 365"))]
    pub trial_days: Option<i64>,
}

impl From<CreateAccountRequest> for CreateAccount {
    fn from(request: CreateAccountRequest) -> Self {
        Self {
            name: request.name,
            email: request.email,
            company: request.company,
            plan_type: request.plan_type,
            trial_days: request.trial_days,
        }
    }
}

/// Account as returned by the API. The license key is only shown on creation.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub account_id: Uuid,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
    pub status: AccountStatus,
    pub plan_type: PlanType,
    pub is_trial: bool,
    pub trial_started_at: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountResponse {
    pub fn new(account: Account, reveal_key: bool, now: DateTime<Utc>) -> Self {
        Self {
            days_remaining: account.days_remaining(now),
            account_id: account.account_id,
            name: account.name,
            email: account.email,
            company: account.company,
            license_key: reveal_key.then_some(account.license_key),
            status: account.status,
            plan_type: account.plan_type,
            is_trial: account.trial.is_trial,
            trial_started_at: account.trial.started_at,
            expires_at: account.expires_at,
            created_at: account.created_utc,
            updated_at: account.updated_utc,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AccountStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubAccountRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubAccountResponse {
    pub sub_account_id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub status: SubAccountStatus,
    pub created_at: DateTime<Utc>,
}

impl SubAccountResponse {
    pub fn new(sub_account: SubAccount, reveal_key: bool) -> Self {
        Self {
            sub_account_id: sub_account.sub_account_id,
            account_id: sub_account.account_id,
            name: sub_account.name,
            api_key: reveal_key.then_some(sub_account.api_key),
            status: sub_account.status,
            created_at: sub_account.created_utc,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetQuotaRequest {
    #[validate(range(min = 0))]
    pub metric_count_limit: i64,
    #[validate(range(min = 0))]
    pub log_count_limit: i64,
    #[validate(range(min = 0))]
    pub trace_count_limit: i64,
    pub storage_gb_limit: Decimal,
    pub metrics_storage_gb_limit: Option<Decimal>,
    pub logs_storage_gb_limit: Option<Decimal>,
    pub traces_storage_gb_limit: Option<Decimal>,
    #[validate(range(min = 0))]
    pub requests_per_minute: i32,
    #[serde(default)]
    pub features: Vec<String>,
}

impl From<SetQuotaRequest> for QuotaLimits {
    fn from(request: SetQuotaRequest) -> Self {
        Self {
            metric_count_limit: request.metric_count_limit,
            log_count_limit: request.log_count_limit,
            trace_count_limit: request.trace_count_limit,
            storage_gb_limit: request.storage_gb_limit,
            metrics_storage_gb_limit: request.metrics_storage_gb_limit,
            logs_storage_gb_limit: request.logs_storage_gb_limit,
            traces_storage_gb_limit: request.traces_storage_gb_limit,
            requests_per_minute: request.requests_per_minute,
            features: request.features,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EffectiveQuotaParams {
    pub sub_account_id: Option<Uuid>,
}
