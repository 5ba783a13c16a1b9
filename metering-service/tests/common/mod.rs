//! Shared harness for metering-service integration tests.
//!
//! The router runs on an in-memory store and is driven with `oneshot`.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use metering_service::config::{
    AccountConfig, AggregationConfig, AlertConfig, BillingConfig, DatabaseConfig, MeteringConfig,
    QuotaFailureMode, StoreBackend, ValidationConfig,
};
use metering_service::services::{init_metrics, MemoryStore, MeteringStore};
use metering_service::{build_router, AppState};
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::config::Config as CommonConfig;
use std::sync::{Arc, Once};
use std::time::Duration;
use tower::util::ServiceExt;

static INIT: Once = Once::new();

/// Initialize tracing and metrics for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,metering_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
        init_metrics();
    });
}

pub fn test_config(failure_mode: QuotaFailureMode) -> MeteringConfig {
    MeteringConfig {
        common: CommonConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        service_name: "metering-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        store: StoreBackend::Memory,
        database: DatabaseConfig {
            url: Secret::new(String::new()),
            max_connections: 2,
            min_connections: 1,
        },
        validation: ValidationConfig {
            failure_mode,
            timeout: Duration::from_secs(2),
        },
        aggregation: AggregationConfig {
            enabled: false,
            ..AggregationConfig::default()
        },
        alerts: AlertConfig::default(),
        billing: BillingConfig::default(),
        accounts: AccountConfig::default(),
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    memory: Option<Arc<MemoryStore>>,
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(test_config(QuotaFailureMode::FailOpen))
}

pub fn spawn_app_with(config: MeteringConfig) -> TestApp {
    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn MeteringStore> = memory.clone();
    let mut app = spawn_app_on(config, store);
    app.memory = Some(memory);
    app
}

/// Build the router on an arbitrary store.
pub fn spawn_app_on(config: MeteringConfig, store: Arc<dyn MeteringStore>) -> TestApp {
    init_tracing();

    let state = AppState::new(config, store);
    let router = build_router(state.clone());

    TestApp {
        router,
        state,
        memory: None,
    }
}

impl TestApp {
    /// The in-memory store behind the app, for fault injection and inspection.
    pub fn memory(&self) -> &MemoryStore {
        self.memory
            .as_deref()
            .expect("app was not built on a MemoryStore")
    }

    /// Send a request and decode the JSON body (`Null` when empty).
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, uri, Some(body)).await
    }

    /// Create an account and return the creation body (license key included).
    pub async fn create_account(&self, plan_type: &str) -> Value {
        let (status, body) = self
            .post(
                "/accounts",
                json!({
                    "name": "Acme Observability",
                    "email": "ops@acme.test",
                    "company": "Acme",
                    "plan_type": plan_type,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create account failed: {}", body);
        body
    }

    pub async fn create_sub_account(&self, account_id: &str, name: &str) -> (StatusCode, Value) {
        self.post(
            &format!("/accounts/{}/sub-accounts", account_id),
            json!({ "name": name }),
        )
        .await
    }

    pub async fn validate(&self, api_key: &str) -> (StatusCode, Value) {
        self.post("/licenses/validate", json!({ "api_key": api_key }))
            .await
    }

    pub async fn ingest(&self, body: Value) -> (StatusCode, Value) {
        self.post("/usage/ingest", body).await
    }

    pub async fn aggregate(&self, start: &str, end: &str) -> (StatusCode, Value) {
        self.post("/usage/aggregate", json!({ "start": start, "end": end }))
            .await
    }

    /// Aggregate a window around the current time.
    pub async fn aggregate_now(&self) {
        let now = chrono::Utc::now();
        let start = (now - chrono::Duration::hours(1)).to_rfc3339();
        let end = (now + chrono::Duration::hours(1)).to_rfc3339();
        let (status, body) = self.aggregate(&start, &end).await;
        assert_eq!(status, StatusCode::OK, "aggregate failed: {}", body);
    }

    /// Quota body with every limit generous except the metric count.
    pub fn quota_body(metric_count_limit: i64) -> Value {
        json!({
            "metric_count_limit": metric_count_limit,
            "log_count_limit": 1_000_000,
            "trace_count_limit": 1_000_000,
            "storage_gb_limit": "10",
            "requests_per_minute": 600,
        })
    }
}

/// Field of a JSON object as a string, panicking with context otherwise.
pub fn str_field<'a>(value: &'a Value, field: &str) -> &'a str {
    value[field]
        .as_str()
        .unwrap_or_else(|| panic!("missing string field '{}' in {}", field, value))
}
