//! Services module for metering-service.

pub mod aggregator;
pub mod alerts;
pub mod audit;
pub mod billing;
pub mod database;
pub mod ingest;
pub mod memory;
pub mod metrics;
pub mod quota;
pub mod registry;
pub mod store;
pub mod usage;
pub mod validator;

pub use aggregator::{AggregationReport, UsageAggregator};
pub use alerts::{AlertEvaluator, EvaluationReport};
pub use billing::{BillingEngine, GenerateInvoice};
pub use database::Database;
pub use ingest::UsageIngestor;
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use quota::{QuotaResolver, ResolutionWarning};
pub use registry::AccountRegistry;
pub use store::MeteringStore;
pub use usage::{PeriodUsage, UsageReader};
pub use validator::{BlockReason, Decision, Dimension, LicenseValidator, QuotaStatus, Scope};
