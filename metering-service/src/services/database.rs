//! PostgreSQL store for metering-service.

use crate::models::{
    format_invoice_number, Account, AccountStatus, Alert, AlertSeverity, AlertType, AuditEntry,
    Granularity, Invoice, InvoiceLine, InvoiceStatus, NewInvoice, PlanType, PricingPlan,
    ProductScope, ProductType, Quota, QuotaLimits, QuotaOwner, RollupKey, SubAccount,
    SubAccountStatus, TrialInfo, UsageEvent, UsageRollup,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::MeteringStore;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str = "account_id, name, email, company, license_key, status, plan_type, is_trial, trial_started_at, expires_at, created_utc, updated_utc";

const QUOTA_COLUMNS: &str = "quota_id, account_id, sub_account_id, is_default, metric_count_limit, log_count_limit, trace_count_limit, storage_gb_limit, metrics_storage_gb_limit, logs_storage_gb_limit, traces_storage_gb_limit, requests_per_minute, features, created_utc, updated_utc";

const INVOICE_COLUMNS: &str = "invoice_id, account_id, invoice_number, period_start, period_end, plan_type, currency, base_cost, lines, subtotal, tax_amount, discount_amount, total_cost, status, paid_at, created_utc, updated_utc";

const ALERT_COLUMNS: &str = "alert_id, account_id, alert_type, severity, rule_key, period_key, message, threshold, current_value, acknowledged, acknowledged_at, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "metering-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

fn unknown(field: &str, value: &str) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Unknown {} '{}' in stored row", field, value))
}

fn rollup_table(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Hourly => "usage_hourly",
        Granularity::Daily => "usage_daily",
        Granularity::Monthly => "usage_monthly",
    }
}

// =========================================================================
// Row types
// =========================================================================

#[derive(FromRow)]
struct AccountRow {
    account_id: Uuid,
    name: String,
    email: String,
    company: Option<String>,
    license_key: String,
    status: String,
    plan_type: String,
    is_trial: bool,
    trial_started_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = AppError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            account_id: row.account_id,
            name: row.name,
            email: row.email,
            company: row.company,
            license_key: row.license_key,
            status: AccountStatus::parse(&row.status)
                .ok_or_else(|| unknown("account status", &row.status))?,
            plan_type: PlanType::parse(&row.plan_type)
                .ok_or_else(|| unknown("plan type", &row.plan_type))?,
            trial: TrialInfo {
                is_trial: row.is_trial,
                started_at: row.trial_started_at,
            },
            expires_at: row.expires_at,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct SubAccountRow {
    sub_account_id: Uuid,
    account_id: Uuid,
    name: String,
    api_key: String,
    status: String,
    created_utc: DateTime<Utc>,
}

impl TryFrom<SubAccountRow> for SubAccount {
    type Error = AppError;

    fn try_from(row: SubAccountRow) -> Result<Self, Self::Error> {
        Ok(SubAccount {
            sub_account_id: row.sub_account_id,
            account_id: row.account_id,
            name: row.name,
            api_key: row.api_key,
            status: SubAccountStatus::parse(&row.status)
                .ok_or_else(|| unknown("sub-account status", &row.status))?,
            created_utc: row.created_utc,
        })
    }
}

/// Sub-account joined to its parent account.
#[derive(FromRow)]
struct SubAccountJoinRow {
    sub_account_id: Uuid,
    sub_name: String,
    api_key: String,
    sub_status: String,
    sub_created_utc: DateTime<Utc>,
    #[sqlx(flatten)]
    account: AccountRow,
}

#[derive(FromRow)]
struct QuotaRow {
    quota_id: Uuid,
    account_id: Option<Uuid>,
    sub_account_id: Option<Uuid>,
    is_default: bool,
    metric_count_limit: i64,
    log_count_limit: i64,
    trace_count_limit: i64,
    storage_gb_limit: Decimal,
    metrics_storage_gb_limit: Option<Decimal>,
    logs_storage_gb_limit: Option<Decimal>,
    traces_storage_gb_limit: Option<Decimal>,
    requests_per_minute: i32,
    features: Vec<String>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<QuotaRow> for Quota {
    type Error = AppError;

    fn try_from(row: QuotaRow) -> Result<Self, Self::Error> {
        let owner = match (row.sub_account_id, row.account_id, row.is_default) {
            (Some(id), None, false) => QuotaOwner::SubAccount(id),
            (None, Some(id), false) => QuotaOwner::Account(id),
            (None, None, true) => QuotaOwner::Default,
            _ => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Quota {} has no single owner",
                    row.quota_id
                )))
            }
        };

        Ok(Quota {
            quota_id: row.quota_id,
            owner,
            limits: QuotaLimits {
                metric_count_limit: row.metric_count_limit,
                log_count_limit: row.log_count_limit,
                trace_count_limit: row.trace_count_limit,
                storage_gb_limit: row.storage_gb_limit,
                metrics_storage_gb_limit: row.metrics_storage_gb_limit,
                logs_storage_gb_limit: row.logs_storage_gb_limit,
                traces_storage_gb_limit: row.traces_storage_gb_limit,
                requests_per_minute: row.requests_per_minute,
                features: row.features,
            },
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct UsageEventRow {
    event_id: Uuid,
    account_id: Uuid,
    sub_account_id: Option<Uuid>,
    product_type: String,
    metric_count: i64,
    storage_bytes: i64,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<UsageEventRow> for UsageEvent {
    type Error = AppError;

    fn try_from(row: UsageEventRow) -> Result<Self, Self::Error> {
        Ok(UsageEvent {
            event_id: row.event_id,
            account_id: row.account_id,
            sub_account_id: row.sub_account_id,
            product_type: ProductType::parse(&row.product_type)
                .ok_or_else(|| unknown("product type", &row.product_type))?,
            metric_count: row.metric_count,
            storage_bytes: row.storage_bytes,
            recorded_at: row.recorded_at,
        })
    }
}

#[derive(FromRow)]
struct RollupRow {
    account_id: Uuid,
    sub_account_id: Uuid,
    product_type: String,
    bucket_start: DateTime<Utc>,
    metric_count: i64,
    storage_bytes: i64,
}

impl TryFrom<RollupRow> for UsageRollup {
    type Error = AppError;

    fn try_from(row: RollupRow) -> Result<Self, Self::Error> {
        Ok(UsageRollup {
            key: RollupKey {
                account_id: row.account_id,
                sub_account_id: (!row.sub_account_id.is_nil()).then_some(row.sub_account_id),
                product: ProductScope::parse(&row.product_type)
                    .ok_or_else(|| unknown("rollup product", &row.product_type))?,
                bucket_start: row.bucket_start,
            },
            metric_count: row.metric_count,
            storage_bytes: row.storage_bytes,
        })
    }
}

#[derive(FromRow)]
struct PricingPlanRow {
    plan_type: String,
    base_cost: Decimal,
    currency: String,
    included_metrics: i64,
    included_logs: i64,
    included_traces: i64,
    included_storage_gb: Decimal,
    price_per_million_metrics: Decimal,
    price_per_million_logs: Decimal,
    price_per_million_traces: Decimal,
    price_per_gb: Decimal,
}

impl TryFrom<PricingPlanRow> for PricingPlan {
    type Error = AppError;

    fn try_from(row: PricingPlanRow) -> Result<Self, Self::Error> {
        Ok(PricingPlan {
            plan_type: PlanType::parse(&row.plan_type)
                .ok_or_else(|| unknown("plan type", &row.plan_type))?,
            base_cost: row.base_cost,
            currency: row.currency,
            included_metrics: row.included_metrics,
            included_logs: row.included_logs,
            included_traces: row.included_traces,
            included_storage_gb: row.included_storage_gb,
            price_per_million_metrics: row.price_per_million_metrics,
            price_per_million_logs: row.price_per_million_logs,
            price_per_million_traces: row.price_per_million_traces,
            price_per_gb: row.price_per_gb,
        })
    }
}

#[derive(FromRow)]
struct InvoiceRow {
    invoice_id: Uuid,
    account_id: Uuid,
    invoice_number: String,
    period_start: NaiveDate,
    period_end: NaiveDate,
    plan_type: String,
    currency: String,
    base_cost: Decimal,
    lines: Json<Vec<InvoiceLine>>,
    subtotal: Decimal,
    tax_amount: Decimal,
    discount_amount: Decimal,
    total_cost: Decimal,
    status: String,
    paid_at: Option<DateTime<Utc>>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = AppError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            invoice_id: row.invoice_id,
            account_id: row.account_id,
            invoice_number: row.invoice_number,
            period_start: row.period_start,
            period_end: row.period_end,
            plan_type: PlanType::parse(&row.plan_type)
                .ok_or_else(|| unknown("plan type", &row.plan_type))?,
            currency: row.currency,
            base_cost: row.base_cost,
            lines: row.lines.0,
            subtotal: row.subtotal,
            tax_amount: row.tax_amount,
            discount_amount: row.discount_amount,
            total_cost: row.total_cost,
            status: InvoiceStatus::parse(&row.status)
                .ok_or_else(|| unknown("invoice status", &row.status))?,
            paid_at: row.paid_at,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct AlertRow {
    alert_id: Uuid,
    account_id: Uuid,
    alert_type: String,
    severity: String,
    rule_key: String,
    period_key: String,
    message: String,
    threshold: i64,
    current_value: Decimal,
    acknowledged: bool,
    acknowledged_at: Option<DateTime<Utc>>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = AppError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(Alert {
            alert_id: row.alert_id,
            account_id: row.account_id,
            alert_type: AlertType::parse(&row.alert_type)
                .ok_or_else(|| unknown("alert type", &row.alert_type))?,
            severity: AlertSeverity::parse(&row.severity)
                .ok_or_else(|| unknown("alert severity", &row.severity))?,
            rule_key: row.rule_key,
            period_key: row.period_key,
            message: row.message,
            threshold: row.threshold,
            current_value: row.current_value,
            acknowledged: row.acknowledged,
            acknowledged_at: row.acknowledged_at,
            created_utc: row.created_utc,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, AppError>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl MeteringStore for Database {
    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    #[instrument(skip(self, account, quota), fields(account_id = %account.account_id))]
    async fn insert_account(&self, account: &Account, quota: &Quota) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_account"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO accounts (account_id, name, email, company, license_key, status, plan_type, is_trial, trial_started_at, expires_at, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(account.account_id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.company)
        .bind(&account.license_key)
        .bind(account.status.as_str())
        .bind(account.plan_type.as_str())
        .bind(account.trial.is_trial)
        .bind(account.trial.started_at)
        .bind(account.expires_at)
        .bind(account.created_utc)
        .bind(account.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(anyhow::anyhow!("License key already issued"))
            } else {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create account: {}", e))
            }
        })?;

        let (owner_account, owner_sub, is_default) = owner_columns(quota.owner);
        sqlx::query(
            r#"
            INSERT INTO quotas (quota_id, account_id, sub_account_id, is_default, metric_count_limit, log_count_limit, trace_count_limit, storage_gb_limit, metrics_storage_gb_limit, logs_storage_gb_limit, traces_storage_gb_limit, requests_per_minute, features, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(quota.quota_id)
        .bind(owner_account)
        .bind(owner_sub)
        .bind(is_default)
        .bind(quota.limits.metric_count_limit)
        .bind(quota.limits.log_count_limit)
        .bind(quota.limits.trace_count_limit)
        .bind(quota.limits.storage_gb_limit)
        .bind(quota.limits.metrics_storage_gb_limit)
        .bind(quota.limits.logs_storage_gb_limit)
        .bind(quota.limits.traces_storage_gb_limit)
        .bind(quota.limits.requests_per_minute)
        .bind(&quota.limits.features)
        .bind(quota.created_utc)
        .bind(quota.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create quota: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(account_id = %account.account_id, plan = %account.plan_type, "Account created");

        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE account_id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get account: {}", e)))?;

        timer.observe_duration();

        row.map(Account::try_from).transpose()
    }

    #[instrument(skip(self, license_key))]
    async fn find_account_by_license_key(
        &self,
        license_key: &str,
    ) -> Result<Option<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_account_by_license_key"])
            .start_timer();

        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE license_key = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(license_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to look up license key: {}", e))
        })?;

        timer.observe_duration();

        row.map(Account::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_accounts"])
            .start_timer();

        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts ORDER BY created_utc",
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list accounts: {}", e)))?;

        timer.observe_duration();

        convert_all(rows)
    }

    #[instrument(skip(self), fields(account_id = %account_id, from = %expected, to = %next))]
    async fn update_account_status(
        &self,
        account_id: Uuid,
        expected: AccountStatus,
        next: AccountStatus,
    ) -> Result<Option<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_account_status"])
            .start_timer();

        let row = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            UPDATE accounts SET status = $3, updated_utc = NOW()
            WHERE account_id = $1 AND status = $2
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update account status: {}", e))
        })?;

        timer.observe_duration();

        row.map(Account::try_from).transpose()
    }

    #[instrument(skip(self, sub_account), fields(account_id = %sub_account.account_id, sub_account_id = %sub_account.sub_account_id))]
    async fn insert_sub_account(&self, sub_account: &SubAccount) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_sub_account"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO sub_accounts (sub_account_id, account_id, name, api_key, status, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(sub_account.sub_account_id)
        .bind(sub_account.account_id)
        .bind(&sub_account.name)
        .bind(&sub_account.api_key)
        .bind(sub_account.status.as_str())
        .bind(sub_account.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(anyhow::anyhow!(
                    "Sub-account '{}' already exists",
                    sub_account.name
                ))
            } else {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create sub-account: {}", e))
            }
        })?;

        timer.observe_duration();
        info!(sub_account_id = %sub_account.sub_account_id, "Sub-account created");

        Ok(())
    }

    #[instrument(skip(self), fields(sub_account_id = %sub_account_id))]
    async fn get_sub_account(&self, sub_account_id: Uuid) -> Result<Option<SubAccount>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_sub_account"])
            .start_timer();

        let row = sqlx::query_as::<_, SubAccountRow>(
            r#"
            SELECT sub_account_id, account_id, name, api_key, status, created_utc
            FROM sub_accounts
            WHERE sub_account_id = $1
            "#,
        )
        .bind(sub_account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get sub-account: {}", e))
        })?;

        timer.observe_duration();

        row.map(SubAccount::try_from).transpose()
    }

    #[instrument(skip(self, api_key))]
    async fn find_sub_account_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<(SubAccount, Account)>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_sub_account_by_api_key"])
            .start_timer();

        let row = sqlx::query_as::<_, SubAccountJoinRow>(
            r#"
            SELECT s.sub_account_id, s.name AS sub_name, s.api_key, s.status AS sub_status,
                   s.created_utc AS sub_created_utc,
                   a.account_id, a.name, a.email, a.company, a.license_key, a.status, a.plan_type,
                   a.is_trial, a.trial_started_at, a.expires_at, a.created_utc, a.updated_utc
            FROM sub_accounts s
            JOIN accounts a ON a.account_id = s.account_id
            WHERE s.api_key = $1
            "#,
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to look up API key: {}", e))
        })?;

        timer.observe_duration();

        let Some(row) = row else {
            return Ok(None);
        };
        let sub_account = SubAccount::try_from(SubAccountRow {
            sub_account_id: row.sub_account_id,
            account_id: row.account.account_id,
            name: row.sub_name,
            api_key: row.api_key,
            status: row.sub_status,
            created_utc: row.sub_created_utc,
        })?;
        let account = Account::try_from(row.account)?;

        Ok(Some((sub_account, account)))
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn list_sub_accounts(&self, account_id: Uuid) -> Result<Vec<SubAccount>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_sub_accounts"])
            .start_timer();

        let rows = sqlx::query_as::<_, SubAccountRow>(
            r#"
            SELECT sub_account_id, account_id, name, api_key, status, created_utc
            FROM sub_accounts
            WHERE account_id = $1 AND status <> 'deleted'
            ORDER BY created_utc
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list sub-accounts: {}", e))
        })?;

        timer.observe_duration();

        convert_all(rows)
    }

    // =========================================================================
    // Quota Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn get_quota(&self, owner: QuotaOwner) -> Result<Option<Quota>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_quota"])
            .start_timer();

        let (filter, owner_id) = match owner {
            QuotaOwner::SubAccount(id) => ("sub_account_id = $1", Some(id)),
            QuotaOwner::Account(id) => ("account_id = $1", Some(id)),
            QuotaOwner::Default => ("is_default", None),
        };
        let sql = format!("SELECT {} FROM quotas WHERE {}", QUOTA_COLUMNS, filter);

        let mut query = sqlx::query_as::<_, QuotaRow>(&sql);
        if let Some(id) = owner_id {
            query = query.bind(id);
        }

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get quota: {}", e)))?;

        timer.observe_duration();

        row.map(Quota::try_from).transpose()
    }

    #[instrument(skip(self, quota), fields(quota_id = %quota.quota_id))]
    async fn put_quota(&self, quota: &Quota) -> Result<Quota, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["put_quota"])
            .start_timer();

        let conflict_target = match quota.owner {
            QuotaOwner::SubAccount(_) => "(sub_account_id) WHERE sub_account_id IS NOT NULL",
            QuotaOwner::Account(_) => "(account_id) WHERE account_id IS NOT NULL",
            QuotaOwner::Default => "(is_default) WHERE is_default",
        };
        let (owner_account, owner_sub, is_default) = owner_columns(quota.owner);

        let row = sqlx::query_as::<_, QuotaRow>(&format!(
            r#"
            INSERT INTO quotas (quota_id, account_id, sub_account_id, is_default, metric_count_limit, log_count_limit, trace_count_limit, storage_gb_limit, metrics_storage_gb_limit, logs_storage_gb_limit, traces_storage_gb_limit, requests_per_minute, features, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT {} DO UPDATE SET
                metric_count_limit = EXCLUDED.metric_count_limit,
                log_count_limit = EXCLUDED.log_count_limit,
                trace_count_limit = EXCLUDED.trace_count_limit,
                storage_gb_limit = EXCLUDED.storage_gb_limit,
                metrics_storage_gb_limit = EXCLUDED.metrics_storage_gb_limit,
                logs_storage_gb_limit = EXCLUDED.logs_storage_gb_limit,
                traces_storage_gb_limit = EXCLUDED.traces_storage_gb_limit,
                requests_per_minute = EXCLUDED.requests_per_minute,
                features = EXCLUDED.features,
                updated_utc = EXCLUDED.updated_utc
            RETURNING {}
            "#,
            conflict_target, QUOTA_COLUMNS
        ))
        .bind(quota.quota_id)
        .bind(owner_account)
        .bind(owner_sub)
        .bind(is_default)
        .bind(quota.limits.metric_count_limit)
        .bind(quota.limits.log_count_limit)
        .bind(quota.limits.trace_count_limit)
        .bind(quota.limits.storage_gb_limit)
        .bind(quota.limits.metrics_storage_gb_limit)
        .bind(quota.limits.logs_storage_gb_limit)
        .bind(quota.limits.traces_storage_gb_limit)
        .bind(quota.limits.requests_per_minute)
        .bind(&quota.limits.features)
        .bind(quota.created_utc)
        .bind(quota.updated_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to set quota: {}", e)))?;

        timer.observe_duration();

        Quota::try_from(row)
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    #[instrument(skip(self, event), fields(account_id = %event.account_id))]
    async fn append_event(&self, event: &UsageEvent) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["append_event"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO usage_events (event_id, account_id, sub_account_id, product_type, metric_count, storage_bytes, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.event_id)
        .bind(event.account_id)
        .bind(event.sub_account_id)
        .bind(event.product_type.as_str())
        .bind(event.metric_count)
        .bind(event.storage_bytes)
        .bind(event.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record usage event: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self))]
    async fn events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["events_in_range"])
            .start_timer();

        let rows = sqlx::query_as::<_, UsageEventRow>(
            r#"
            SELECT event_id, account_id, sub_account_id, product_type, metric_count, storage_bytes, recorded_at
            FROM usage_events
            WHERE recorded_at >= $1 AND recorded_at < $2
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to read usage events: {}", e))
        })?;

        timer.observe_duration();

        convert_all(rows)
    }

    #[instrument(skip(self), fields(granularity = granularity.as_str()))]
    async fn rollups_in_range(
        &self,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRollup>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["rollups_in_range"])
            .start_timer();

        let rows = sqlx::query_as::<_, RollupRow>(&format!(
            r#"
            SELECT account_id, sub_account_id, product_type, bucket_start, metric_count, storage_bytes
            FROM {}
            WHERE bucket_start >= $1 AND bucket_start < $2
            "#,
            rollup_table(granularity)
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to read rollups: {}", e)))?;

        timer.observe_duration();

        convert_all(rows)
    }

    #[instrument(skip(self), fields(granularity = granularity.as_str(), account_id = %account_id))]
    async fn scope_rollups(
        &self,
        granularity: Granularity,
        account_id: Uuid,
        sub_account_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRollup>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["scope_rollups"])
            .start_timer();

        let rows = sqlx::query_as::<_, RollupRow>(&format!(
            r#"
            SELECT account_id, sub_account_id, product_type, bucket_start, metric_count, storage_bytes
            FROM {}
            WHERE account_id = $1 AND sub_account_id = $2
              AND bucket_start >= $3 AND bucket_start < $4
            ORDER BY bucket_start, product_type
            "#,
            rollup_table(granularity)
        ))
        .bind(account_id)
        .bind(sub_account_id.unwrap_or(Uuid::nil()))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to read rollups: {}", e)))?;

        timer.observe_duration();

        convert_all(rows)
    }

    #[instrument(skip(self, rollups), fields(granularity = granularity.as_str(), rows = rollups.len()))]
    async fn replace_rollups(
        &self,
        granularity: Granularity,
        rollups: &[UsageRollup],
    ) -> Result<(), AppError> {
        if rollups.is_empty() {
            return Ok(());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_rollups"])
            .start_timer();

        let mut account_ids = Vec::with_capacity(rollups.len());
        let mut sub_account_ids = Vec::with_capacity(rollups.len());
        let mut products = Vec::with_capacity(rollups.len());
        let mut buckets = Vec::with_capacity(rollups.len());
        let mut counts = Vec::with_capacity(rollups.len());
        let mut bytes = Vec::with_capacity(rollups.len());
        for rollup in rollups {
            account_ids.push(rollup.key.account_id);
            sub_account_ids.push(rollup.key.sub_account_id.unwrap_or(Uuid::nil()));
            products.push(rollup.key.product.as_str().to_string());
            buckets.push(rollup.key.bucket_start);
            counts.push(rollup.metric_count);
            bytes.push(rollup.storage_bytes);
        }

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (account_id, sub_account_id, product_type, bucket_start, metric_count, storage_bytes)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::text[], $4::timestamptz[], $5::bigint[], $6::bigint[])
            ON CONFLICT (account_id, sub_account_id, product_type, bucket_start) DO UPDATE SET
                metric_count = EXCLUDED.metric_count,
                storage_bytes = EXCLUDED.storage_bytes,
                updated_utc = NOW()
            "#,
            rollup_table(granularity)
        ))
        .bind(&account_ids)
        .bind(&sub_account_ids)
        .bind(&products)
        .bind(&buckets)
        .bind(&counts)
        .bind(&bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to write rollups: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    // =========================================================================
    // Billing Operations
    // =========================================================================

    #[instrument(skip(self), fields(plan_type = plan_type.as_str()))]
    async fn get_pricing_plan(
        &self,
        plan_type: PlanType,
    ) -> Result<Option<PricingPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_pricing_plan"])
            .start_timer();

        let row = sqlx::query_as::<_, PricingPlanRow>(
            r#"
            SELECT plan_type, base_cost, currency, included_metrics, included_logs, included_traces, included_storage_gb,
                   price_per_million_metrics, price_per_million_logs, price_per_million_traces, price_per_gb
            FROM pricing_plans
            WHERE plan_type = $1
            "#,
        )
        .bind(plan_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get pricing plan: {}", e))
        })?;

        timer.observe_duration();

        row.map(PricingPlan::try_from).transpose()
    }

    #[instrument(skip(self, invoice), fields(account_id = %invoice.account_id))]
    async fn insert_invoice(&self, invoice: NewInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let sequence: i64 = sqlx::query_scalar("SELECT nextval('invoice_number_seq')")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to allocate invoice number: {}", e))
            })?;

        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            INSERT INTO invoices (invoice_id, account_id, invoice_number, period_start, period_end, plan_type, currency, base_cost, lines, subtotal, tax_amount, discount_amount, total_cost, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(invoice.account_id)
        .bind(format_invoice_number(invoice.period_start, sequence))
        .bind(invoice.period_start)
        .bind(invoice.period_end)
        .bind(invoice.plan_type.as_str())
        .bind(&invoice.currency)
        .bind(invoice.base_cost)
        .bind(Json(&invoice.lines))
        .bind(invoice.subtotal)
        .bind(invoice.tax_amount)
        .bind(invoice.discount_amount)
        .bind(invoice.total_cost)
        .bind(invoice.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice already exists for period {} to {}",
                    invoice.period_start,
                    invoice.period_end
                ))
            } else {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e))
            }
        })?;

        timer.observe_duration();
        info!(invoice_number = %row.invoice_number, total = %row.total_cost, "Invoice created");

        Invoice::try_from(row)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {} FROM invoices WHERE invoice_id = $1",
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        row.map(Invoice::try_from).transpose()
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn list_invoices(&self, account_id: Uuid) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {} FROM invoices WHERE account_id = $1 ORDER BY period_start DESC",
            INVOICE_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        convert_all(rows)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id, from = %expected, to = %next))]
    async fn update_invoice_status(
        &self,
        invoice_id: Uuid,
        expected: InvoiceStatus,
        next: InvoiceStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice_status"])
            .start_timer();

        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            UPDATE invoices
            SET status = $3, paid_at = COALESCE($4, paid_at), updated_utc = NOW()
            WHERE invoice_id = $1 AND status = $2
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(paid_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice status: {}", e))
        })?;

        timer.observe_duration();

        row.map(Invoice::try_from).transpose()
    }

    // =========================================================================
    // Alert Operations
    // =========================================================================

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn claim_alert_rule(
        &self,
        account_id: Uuid,
        rule_key: &str,
        period_key: &str,
        triggered_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claim_alert_rule"])
            .start_timer();

        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO alert_rule_state (account_id, rule_key, period_key, last_triggered_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (account_id, rule_key, period_key) DO NOTHING
            RETURNING account_id
            "#,
        )
        .bind(account_id)
        .bind(rule_key)
        .bind(period_key)
        .bind(triggered_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to claim alert rule: {}", e))
        })?;

        timer.observe_duration();

        Ok(claimed.is_some())
    }

    #[instrument(skip(self, alert), fields(account_id = %alert.account_id, rule_key = %alert.rule_key))]
    async fn insert_alert(&self, alert: &Alert) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_alert"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO alerts (alert_id, account_id, alert_type, severity, rule_key, period_key, message, threshold, current_value, acknowledged, acknowledged_at, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(alert.alert_id)
        .bind(alert.account_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.rule_key)
        .bind(&alert.period_key)
        .bind(&alert.message)
        .bind(alert.threshold)
        .bind(alert.current_value)
        .bind(alert.acknowledged)
        .bind(alert.acknowledged_at)
        .bind(alert.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create alert: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn list_alerts(
        &self,
        account_id: Uuid,
        unacknowledged_only: bool,
    ) -> Result<Vec<Alert>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_alerts"])
            .start_timer();

        let rows = sqlx::query_as::<_, AlertRow>(&format!(
            r#"
            SELECT {} FROM alerts
            WHERE account_id = $1 AND (NOT $2 OR NOT acknowledged)
            ORDER BY created_utc DESC
            "#,
            ALERT_COLUMNS
        ))
        .bind(account_id)
        .bind(unacknowledged_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list alerts: {}", e)))?;

        timer.observe_duration();

        convert_all(rows)
    }

    #[instrument(skip(self), fields(alert_id = %alert_id))]
    async fn acknowledge_alert(
        &self,
        alert_id: Uuid,
        acknowledged_at: DateTime<Utc>,
    ) -> Result<Option<Alert>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["acknowledge_alert"])
            .start_timer();

        let row = sqlx::query_as::<_, AlertRow>(&format!(
            r#"
            UPDATE alerts
            SET acknowledged = TRUE, acknowledged_at = COALESCE(acknowledged_at, $2)
            WHERE alert_id = $1
            RETURNING {}
            "#,
            ALERT_COLUMNS
        ))
        .bind(alert_id)
        .bind(acknowledged_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acknowledge alert: {}", e))
        })?;

        timer.observe_duration();

        row.map(Alert::try_from).transpose()
    }

    // =========================================================================
    // Audit
    // =========================================================================

    #[instrument(skip(self, entry), fields(action = %entry.action, entity_id = %entry.entity_id))]
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["append_audit"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO audit_log (audit_id, actor, action, entity_type, entity_id, details, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.audit_id)
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.details)
        .bind(entry.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to write audit entry: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }
}

/// `(account_id, sub_account_id, is_default)` column values for an owner.
fn owner_columns(owner: QuotaOwner) -> (Option<Uuid>, Option<Uuid>, bool) {
    match owner {
        QuotaOwner::Account(id) => (Some(id), None, false),
        QuotaOwner::SubAccount(id) => (None, Some(id), false),
        QuotaOwner::Default => (None, None, true),
    }
}
