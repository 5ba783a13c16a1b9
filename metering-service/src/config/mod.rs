//! Configuration module for metering-service.

use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MeteringConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    pub validation: ValidationConfig,
    pub aggregation: AggregationConfig,
    pub alerts: AlertConfig,
    pub billing: BillingConfig,
    pub accounts: AccountConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// What validation does when quota or usage cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuotaFailureMode {
    /// Serve the fallback quota and log a warning.
    #[default]
    FailOpen,
    /// Block the request.
    FailClosed,
}

impl FromStr for QuotaFailureMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail_open" | "open" => Ok(QuotaFailureMode::FailOpen),
            "fail_closed" | "closed" => Ok(QuotaFailureMode::FailClosed),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "QUOTA_FAILURE_MODE must be fail_open or fail_closed, got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub failure_mode: QuotaFailureMode,
    pub timeout: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            failure_mode: QuotaFailureMode::FailOpen,
            timeout: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregationConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub lookback_hours: i64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            lookback_hours: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Usage percentages, ascending.
    pub usage_thresholds: Vec<i64>,
    /// Days before expiry, descending.
    pub expiry_days: Vec<i64>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            usage_thresholds: vec![80, 90, 100],
            expiry_days: vec![30, 7, 1],
        }
    }
}

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub tax_rate: Decimal,
    pub currency: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::ZERO,
            currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub default_expiry_days: i64,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            default_expiry_days: 365,
        }
    }
}

impl MeteringConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let common = core_config::Config::load()?;

        let store = match env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            Ok("postgres") | Err(_) => StoreBackend::Postgres,
            Ok(other) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "STORE_BACKEND must be postgres or memory, got '{}'",
                    other
                )))
            }
        };

        let database_url = match (store, env::var("DATABASE_URL")) {
            (_, Ok(url)) => url,
            (StoreBackend::Memory, Err(_)) => String::new(),
            (StoreBackend::Postgres, Err(_)) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required"
                )))
            }
        };

        let failure_mode = match env::var("QUOTA_FAILURE_MODE") {
            Ok(value) => value.parse()?,
            Err(_) => QuotaFailureMode::default(),
        };

        let tax_rate = match env::var("BILLING_TAX_RATE") {
            Ok(value) => Decimal::from_str(&value).map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid BILLING_TAX_RATE: {}", e))
            })?,
            Err(_) => Decimal::ZERO,
        };
        if tax_rate.is_sign_negative() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "BILLING_TAX_RATE must not be negative"
            )));
        }

        let mut usage_thresholds = parse_list("ALERT_USAGE_THRESHOLDS", &[80, 90, 100])?;
        usage_thresholds.sort_unstable();
        let mut expiry_days = parse_list("ALERT_EXPIRY_DAYS", &[30, 7, 1])?;
        expiry_days.sort_unstable_by(|a, b| b.cmp(a));

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "metering-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            store,
            database: DatabaseConfig {
                url: Secret::new(database_url),
                max_connections: parse_env_in("DATABASE_MAX_CONNECTIONS", 10, 1..=1000)?,
                min_connections: parse_env_in("DATABASE_MIN_CONNECTIONS", 2, 0..=1000)?,
            },
            validation: ValidationConfig {
                failure_mode,
                timeout: Duration::from_millis(parse_env_in(
                    "VALIDATION_TIMEOUT_MS",
                    250,
                    1..=60_000,
                )?),
            },
            aggregation: AggregationConfig {
                enabled: parse_env("AGGREGATION_ENABLED", true)?,
                interval: Duration::from_secs(parse_env_in(
                    "AGGREGATION_INTERVAL_SECS",
                    300,
                    1..=86_400,
                )?),
                lookback_hours: parse_env_in("AGGREGATION_LOOKBACK_HOURS", 2, 1..=24 * 31)?,
            },
            alerts: AlertConfig {
                usage_thresholds,
                expiry_days,
            },
            billing: BillingConfig {
                tax_rate,
                currency: env::var("BILLING_CURRENCY").unwrap_or_else(|_| "USD".to_string()),
            },
            accounts: AccountConfig {
                default_expiry_days: parse_env_in("DEFAULT_EXPIRY_DAYS", 365, 1..=36_500)?,
            },
        })
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    parse_value(key, env::var(key).ok().as_deref(), default)
}

fn parse_env_in<T>(key: &str, default: T, range: RangeInclusive<T>) -> Result<T, AppError>
where
    T: FromStr + PartialOrd + Display,
    T::Err: Display,
{
    let value = parse_env(key, default)?;
    check_range(key, value, range)
}

/// Parse an optional raw value; unset means `default`, unparsable is an error.
pub fn parse_value<T>(key: &str, raw: Option<&str>, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    match raw.map(str::trim) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("Invalid {} '{}': {}", key, raw, e))
        }),
    }
}

pub fn check_range<T>(key: &str, value: T, range: RangeInclusive<T>) -> Result<T, AppError>
where
    T: PartialOrd + Display,
{
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(AppError::ConfigError(anyhow::anyhow!(
            "{} must be between {} and {}, got {}",
            key,
            range.start(),
            range.end(),
            value
        )))
    }
}

fn parse_list(key: &str, default: &[i64]) -> Result<Vec<i64>, AppError> {
    match env::var(key) {
        Ok(raw) => parse_thresholds(&raw).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e))
        }),
        Err(_) => Ok(default.to_vec()),
    }
}

/// Parse a comma separated list of positive integers.
pub fn parse_thresholds(raw: &str) -> Result<Vec<i64>, String> {
    let values = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<i64>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(format!("'{}' is not a positive integer", s)),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if values.is_empty() {
        return Err("list is empty".to_string());
    }
    Ok(values)
}
