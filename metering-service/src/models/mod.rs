//! Domain models for metering-service.

mod account;
mod alert;
mod invoice;
mod pricing;
mod quota;
mod usage;

pub use account::{
    days_until, Account, AccountStatus, CreateAccount, PlanType, SubAccount, SubAccountStatus,
    TrialInfo,
};
pub use alert::{Alert, AlertSeverity, AlertType, AuditEntry, NewAlert};
pub use invoice::{
    format_invoice_number, Invoice, InvoiceEvent, InvoiceLine, InvoiceStatus, LineKind, NewInvoice,
};
pub use pricing::PricingPlan;
pub use quota::{EffectiveQuota, Quota, QuotaLimits, QuotaOwner, QuotaSource, FALLBACK_PLAN};
pub use usage::{
    bytes_to_gb, current_month, next_month_start, start_of_day, start_of_month, DailyUsage,
    Granularity, ProductScope, ProductType, RecordUsage, RollupKey, UsageEvent, UsageRollup,
    UsageTotals, BYTES_PER_GB,
};
