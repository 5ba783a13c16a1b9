use crate::config::{MeteringConfig, StoreBackend};
use crate::handlers;
use crate::services::{
    AccountRegistry, AlertEvaluator, BillingEngine, Database, LicenseValidator, MemoryStore,
    MeteringStore, QuotaResolver, UsageAggregator, UsageIngestor, UsageReader,
};
use axum::{
    middleware::from_fn,
    routing::{get, patch, post, put},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: MeteringConfig,
    pub store: Arc<dyn MeteringStore>,
    pub registry: AccountRegistry,
    pub resolver: QuotaResolver,
    pub usage: UsageReader,
    pub ingestor: UsageIngestor,
    pub aggregator: UsageAggregator,
    pub validator: LicenseValidator,
    pub billing: BillingEngine,
    pub alerts: AlertEvaluator,
}

impl AppState {
    pub fn new(config: MeteringConfig, store: Arc<dyn MeteringStore>) -> Self {
        Self {
            registry: AccountRegistry::new(store.clone(), config.accounts.clone()),
            resolver: QuotaResolver::new(store.clone()),
            usage: UsageReader::new(store.clone()),
            ingestor: UsageIngestor::new(store.clone()),
            aggregator: UsageAggregator::new(store.clone()),
            validator: LicenseValidator::new(store.clone(), config.validation.clone()),
            billing: BillingEngine::new(store.clone(), config.billing.clone()),
            alerts: AlertEvaluator::new(store.clone(), config.alerts.clone()),
            store,
            config,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        // Licenses
        .route("/licenses/validate", post(handlers::validate_license))
        .route("/licenses/status", get(handlers::license_status))
        // Usage
        .route("/usage/ingest", post(handlers::ingest_usage))
        .route("/usage/aggregate", post(handlers::aggregate_usage))
        .route("/usage/:account_id/current", get(handlers::current_usage))
        .route("/usage/:account_id/history", get(handlers::usage_history))
        // Accounts and quotas
        .route(
            "/accounts",
            post(handlers::create_account).get(handlers::list_accounts),
        )
        .route("/accounts/:account_id", get(handlers::get_account))
        .route(
            "/accounts/:account_id/status",
            patch(handlers::update_account_status),
        )
        .route(
            "/accounts/:account_id/sub-accounts",
            post(handlers::create_sub_account).get(handlers::list_sub_accounts),
        )
        .route(
            "/accounts/:account_id/quota",
            get(handlers::get_effective_quota).put(handlers::set_account_quota),
        )
        .route(
            "/sub-accounts/:sub_account_id/quota",
            put(handlers::set_sub_account_quota),
        )
        // Billing
        .route(
            "/accounts/:account_id/invoices",
            post(handlers::generate_invoice).get(handlers::list_invoices),
        )
        .route("/invoices/:invoice_id", get(handlers::get_invoice))
        .route(
            "/invoices/:invoice_id/transitions",
            post(handlers::transition_invoice),
        )
        // Alerts
        .route("/accounts/:account_id/alerts", get(handlers::list_alerts))
        .route(
            "/alerts/:alert_id/acknowledge",
            post(handlers::acknowledge_alert),
        )
        .route("/alerts/evaluate", post(handlers::evaluate_alerts))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

pub struct Application {
    port: u16,
    server: Box<dyn Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    pub async fn build(config: MeteringConfig) -> Result<Self, AppError> {
        let store: Arc<dyn MeteringStore> = match config.store {
            StoreBackend::Postgres => {
                let db = Database::new(
                    config.database.url.expose_secret(),
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to PostgreSQL: {}", e);
                    e
                })?;
                db.run_migrations().await.map_err(|e| {
                    tracing::error!("Failed to run database migrations: {}", e);
                    e
                })?;
                Arc::new(db)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store; data will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        Self::build_with_store(config, store).await
    }

    pub async fn build_with_store(
        config: MeteringConfig,
        store: Arc<dyn MeteringStore>,
    ) -> Result<Self, AppError> {
        let state = AppState::new(config.clone(), store);
        let app = build_router(state.clone());

        let addr = config.common.listen_addr();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
