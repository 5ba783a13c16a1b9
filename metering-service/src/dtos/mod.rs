pub mod accounts;
pub mod billing;
pub mod licenses;
pub mod usage;

pub use accounts::{
    AccountResponse, CreateAccountRequest, CreateSubAccountRequest, EffectiveQuotaParams,
    SetQuotaRequest, SubAccountResponse, UpdateStatusRequest,
};
pub use billing::{AlertListParams, GenerateInvoiceRequest, InvoiceTransitionRequest};
pub use licenses::{
    LicenseStatusParams, LicenseStatusResponse, QuotaStatusResponse, ValidateRequest,
    ValidationResponse,
};
pub use usage::{
    AggregateRequest, CurrentUsageParams, CurrentUsageResponse, HistoryParams, HistoryResponse,
    IngestRequest, IngestResponse, UsageAgainstLimit,
};
