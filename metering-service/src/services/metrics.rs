//! Metrics module for metering-service.
//! Prometheus collectors for the metering engine, plus the `metrics` facade
//! recorder fed by the shared HTTP middleware.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_counter_vec, register_histogram_vec, register_int_counter_vec,
    CounterVec, Encoder, HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Datastore query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "metering_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Validation decisions by outcome and reason
pub static VALIDATION_DECISIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Validation latency
pub static VALIDATION_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Ingested usage events by product
pub static USAGE_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Aggregation runs by status
pub static AGGREGATION_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Rollup rows written by granularity
pub static ROLLUPS_WRITTEN_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Invoices generated by plan
pub static INVOICES_GENERATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Invoiced amount by currency
pub static INVOICE_AMOUNT_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Alerts raised by type and severity
pub static ALERTS_RAISED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Quota resolutions that fell back to the floor
pub static QUOTA_FALLBACKS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Recorder behind the `metrics` facade used by the HTTP middleware.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize all metrics. Safe to call more than once.
pub fn init_metrics() {
    VALIDATION_DECISIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_validation_decisions_total",
                "License validation decisions by outcome and reason"
            ),
            &["outcome", "reason"]
        )
        .expect("Failed to register VALIDATION_DECISIONS_TOTAL")
    });

    VALIDATION_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "metering_validation_duration_seconds",
                "License validation latency",
                vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]
            ),
            &["outcome"]
        )
        .expect("Failed to register VALIDATION_DURATION")
    });

    USAGE_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("metering_usage_events_total", "Usage events ingested by product"),
            &["product_type"]
        )
        .expect("Failed to register USAGE_EVENTS_TOTAL")
    });

    AGGREGATION_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("metering_aggregation_runs_total", "Aggregation runs by status"),
            &["status"]
        )
        .expect("Failed to register AGGREGATION_RUNS_TOTAL")
    });

    ROLLUPS_WRITTEN_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_rollups_written_total",
                "Rollup rows written by granularity"
            ),
            &["granularity"]
        )
        .expect("Failed to register ROLLUPS_WRITTEN_TOTAL")
    });

    INVOICES_GENERATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("metering_invoices_generated_total", "Invoices generated by plan"),
            &["plan_type"]
        )
        .expect("Failed to register INVOICES_GENERATED_TOTAL")
    });

    INVOICE_AMOUNT_TOTAL.get_or_init(|| {
        register_counter_vec!(
            opts!("metering_invoice_amount_total", "Total invoiced amount by currency"),
            &["currency"]
        )
        .expect("Failed to register INVOICE_AMOUNT_TOTAL")
    });

    ALERTS_RAISED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("metering_alerts_raised_total", "Alerts raised by type and severity"),
            &["alert_type", "severity"]
        )
        .expect("Failed to register ALERTS_RAISED_TOTAL")
    });

    QUOTA_FALLBACKS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_quota_fallbacks_total",
                "Quota resolutions served from the fallback floor"
            ),
            &["reason"]
        )
        .expect("Failed to register QUOTA_FALLBACKS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("metering_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    METRICS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Metrics recorder already installed, using detached handle");
                PrometheusBuilder::new().build_recorder().handle()
            })
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    let mut output = String::from_utf8_lossy(&buffer).into_owned();

    if let Some(handle) = METRICS_HANDLE.get() {
        output.push_str(&handle.render());
    }
    output
}

pub fn record_validation(outcome: &str, reason: &str, duration_secs: f64) {
    if let Some(counter) = VALIDATION_DECISIONS_TOTAL.get() {
        counter.with_label_values(&[outcome, reason]).inc();
    }
    if let Some(histogram) = VALIDATION_DURATION.get() {
        histogram.with_label_values(&[outcome]).observe(duration_secs);
    }
}

pub fn record_usage_event(product_type: &str) {
    if let Some(counter) = USAGE_EVENTS_TOTAL.get() {
        counter.with_label_values(&[product_type]).inc();
    }
}

pub fn record_aggregation_run(status: &str) {
    if let Some(counter) = AGGREGATION_RUNS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

pub fn record_rollups_written(granularity: &str, rows: usize) {
    if let Some(counter) = ROLLUPS_WRITTEN_TOTAL.get() {
        counter
            .with_label_values(&[granularity])
            .inc_by(rows as u64);
    }
}

/// Record a generated invoice and its total.
pub fn record_invoice(plan_type: &str, currency: &str, amount: f64) {
    if let Some(counter) = INVOICES_GENERATED_TOTAL.get() {
        counter.with_label_values(&[plan_type]).inc();
    }
    if let Some(counter) = INVOICE_AMOUNT_TOTAL.get() {
        counter.with_label_values(&[currency]).inc_by(amount.abs());
    }
}

pub fn record_alert(alert_type: &str, severity: &str) {
    if let Some(counter) = ALERTS_RAISED_TOTAL.get() {
        counter.with_label_values(&[alert_type, severity]).inc();
    }
}

pub fn record_quota_fallback(reason: &str) {
    if let Some(counter) = QUOTA_FALLBACKS_TOTAL.get() {
        counter.with_label_values(&[reason]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
