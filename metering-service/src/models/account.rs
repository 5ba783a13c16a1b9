//! Account and sub-account models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Trial,
    Suspended,
    Expired,
    Cancelled,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Trial => "trial",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Expired => "expired",
            AccountStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AccountStatus::Active),
            "trial" => Some(AccountStatus::Trial),
            "suspended" => Some(AccountStatus::Suspended),
            "expired" => Some(AccountStatus::Expired),
            "cancelled" => Some(AccountStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether an admin may move an account from `self` to `next`.
    pub fn can_transition_to(&self, next: AccountStatus) -> bool {
        use AccountStatus::*;
        match (self, next) {
            (Active, Suspended) | (Suspended, Active) => true,
            (Active, Expired) | (Trial, Expired) => true,
            (Trial, Active) | (Expired, Active) => true,
            (Cancelled, _) => false,
            (_, Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commercial plan of an account. Drives the initial quota and the pricing plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl PlanType {
    pub const ALL: [PlanType; 4] = [
        PlanType::Free,
        PlanType::Starter,
        PlanType::Pro,
        PlanType::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Free => "free",
            PlanType::Starter => "starter",
            PlanType::Pro => "pro",
            PlanType::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(PlanType::Free),
            "starter" => Some(PlanType::Starter),
            "pro" => Some(PlanType::Pro),
            "enterprise" => Some(PlanType::Enterprise),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trial metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialInfo {
    pub is_trial: bool,
    pub started_at: Option<DateTime<Utc>>,
}

/// Tenant organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub license_key: String,
    pub status: AccountStatus,
    pub plan_type: PlanType,
    pub trial: TrialInfo,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Account {
    /// Whole days until expiry, rounded up and floored at zero.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|expires| days_until(expires, now))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

/// Days between `now` and `target`, rounded up, never negative.
pub fn days_until(target: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let remaining = target - now;
    if remaining <= Duration::zero() {
        return 0;
    }
    let whole = remaining.num_days();
    if remaining > Duration::days(whole) {
        whole + 1
    } else {
        whole
    }
}

/// Sub-account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAccountStatus {
    Active,
    Suspended,
    Deleted,
}

impl SubAccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubAccountStatus::Active => "active",
            SubAccountStatus::Suspended => "suspended",
            SubAccountStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubAccountStatus::Active),
            "suspended" => Some(SubAccountStatus::Suspended),
            "deleted" => Some(SubAccountStatus::Deleted),
            _ => None,
        }
    }
}

/// Team or project under an account, with its own API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAccount {
    pub sub_account_id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub api_key: String,
    pub status: SubAccountStatus,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating an account.
#[derive(Debug, Clone)]
pub struct CreateAccount {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub plan_type: PlanType,
    pub trial_days: Option<i64>,
}
