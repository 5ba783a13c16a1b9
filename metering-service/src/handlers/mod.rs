pub mod accounts;
pub mod billing;
pub mod health;
pub mod licenses;
pub mod usage;

pub use accounts::{
    create_account, create_sub_account, get_account, get_effective_quota, list_accounts,
    list_sub_accounts, set_account_quota, set_sub_account_quota, update_account_status,
};
pub use billing::{
    acknowledge_alert, evaluate_alerts, generate_invoice, get_invoice, list_alerts,
    list_invoices, transition_invoice,
};
pub use health::{health_check, metrics_endpoint, readiness_check};
pub use licenses::{license_status, validate_license};
pub use usage::{aggregate_usage, current_usage, ingest_usage, usage_history};
