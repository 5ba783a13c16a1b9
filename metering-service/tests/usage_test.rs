//! Usage ingestion, aggregation and read endpoints.

mod common;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{spawn_app, str_field};
use metering_service::models::Granularity;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use uuid::Uuid;

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn decimal(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn ingest_is_accepted() {
    let app = spawn_app();
    let account = app.create_account("free").await;

    let (status, body) = app
        .ingest(json!({
            "account_id": account["account_id"],
            "metric_count": 10,
            "storage_bytes": 2048,
        }))
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(Uuid::parse_str(str_field(&body, "event_id")).is_ok());
}

#[tokio::test]
async fn ingest_rejects_negative_counts() {
    let app = spawn_app();
    let account = app.create_account("free").await;

    let (status, _) = app
        .ingest(json!({ "account_id": account["account_id"], "metric_count": -5 }))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn ingest_for_unknown_account_is_not_found() {
    let app = spawn_app();

    let (status, _) = app
        .ingest(json!({ "account_id": Uuid::new_v4(), "metric_count": 1 }))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ingest_with_foreign_sub_account_is_rejected() {
    let app = spawn_app();
    let first = app.create_account("free").await;
    let second = app.create_account("free").await;
    let (_, sub) = app
        .create_sub_account(str_field(&second, "account_id"), "other")
        .await;

    let (status, _) = app
        .ingest(json!({
            "account_id": first["account_id"],
            "sub_account_id": sub["sub_account_id"],
            "metric_count": 1,
        }))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn aggregation_is_idempotent_across_granularities() {
    let app = spawn_app();
    let account = app.create_account("starter").await;
    let account_id = Uuid::parse_str(str_field(&account, "account_id")).unwrap();

    for minute in ["05", "20", "45"] {
        let (status, _) = app
            .ingest(json!({
                "account_id": account_id,
                "metric_count": 20,
                "recorded_at": format!("2026-03-10T10:{}:00Z", minute),
            }))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    for _ in 0..2 {
        let (status, report) = app
            .aggregate("2026-03-10T10:00:00Z", "2026-03-10T11:00:00Z")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["events"], 3);
    }

    let reader = &app.state.usage;
    let hourly = reader
        .usage_between(
            Granularity::Hourly,
            account_id,
            None,
            ts("2026-03-10T10:00:00Z"),
            ts("2026-03-10T11:00:00Z"),
        )
        .await
        .unwrap();
    let daily = reader
        .usage_between(
            Granularity::Daily,
            account_id,
            None,
            ts("2026-03-10T00:00:00Z"),
            ts("2026-03-11T00:00:00Z"),
        )
        .await
        .unwrap();
    let monthly = reader
        .usage_between(
            Granularity::Monthly,
            account_id,
            None,
            ts("2026-03-01T00:00:00Z"),
            ts("2026-04-01T00:00:00Z"),
        )
        .await
        .unwrap();

    assert_eq!(hourly.total.metric_count, 60);
    assert_eq!(daily.total.metric_count, 60);
    assert_eq!(monthly.total.metric_count, 60);
}

#[tokio::test]
async fn aggregate_rejects_empty_window() {
    let app = spawn_app();

    let (status, _) = app
        .aggregate("2026-03-10T11:00:00Z", "2026-03-10T10:00:00Z")
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn current_usage_reports_used_against_limit() {
    let app = spawn_app();
    let account = app.create_account("free").await;
    let account_id = str_field(&account, "account_id");

    app.ingest(json!({ "account_id": account_id, "metric_count": 40 }))
        .await;
    app.ingest(json!({
        "account_id": account_id,
        "product_type": "logs",
        "metric_count": 7,
    }))
    .await;
    app.aggregate_now().await;

    let (status, body) = app.get(&format!("/usage/{}/current", account_id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["quota_source"], "account");
    assert_eq!(decimal(&body["metrics"]["used"]), Decimal::from(40));
    assert_eq!(decimal(&body["metrics"]["limit"]), Decimal::from(1_000_000));
    assert_eq!(decimal(&body["logs"]["used"]), Decimal::from(7));
    assert_eq!(decimal(&body["traces"]["used"]), Decimal::ZERO);
}

#[tokio::test]
async fn current_usage_for_sub_account_is_scoped() {
    let app = spawn_app();
    let account = app.create_account("free").await;
    let account_id = str_field(&account, "account_id");
    let (_, sub) = app.create_sub_account(account_id, "prod").await;

    app.ingest(json!({
        "account_id": account_id,
        "sub_account_id": sub["sub_account_id"],
        "metric_count": 30,
    }))
    .await;
    app.ingest(json!({ "account_id": account_id, "metric_count": 12 }))
        .await;
    app.aggregate_now().await;

    let (_, scoped) = app
        .get(&format!(
            "/usage/{}/current?sub_account_id={}",
            account_id,
            str_field(&sub, "sub_account_id")
        ))
        .await;
    let (_, account_wide) = app.get(&format!("/usage/{}/current", account_id)).await;

    assert_eq!(decimal(&scoped["metrics"]["used"]), Decimal::from(30));
    assert_eq!(decimal(&account_wide["metrics"]["used"]), Decimal::from(42));
}

#[tokio::test]
async fn history_is_ascending_and_zero_filled() {
    let app = spawn_app();
    let account = app.create_account("free").await;
    let account_id = str_field(&account, "account_id");

    app.ingest(json!({ "account_id": account_id, "metric_count": 15 }))
        .await;
    app.aggregate_now().await;

    let (status, body) = app
        .get(&format!("/usage/{}/history?days=3", account_id))
        .await;

    assert_eq!(status, StatusCode::OK);
    let days = body["days"].as_array().unwrap();
    assert_eq!(days.len(), 3);
    assert_eq!(days[0]["metric_count"], 0);
    assert_eq!(days[1]["metric_count"], 0);
    assert_eq!(days[2]["metric_count"], 15);
    assert!(days[0]["day"].as_str().unwrap() < days[2]["day"].as_str().unwrap());
}

#[tokio::test]
async fn history_rejects_out_of_range_days() {
    let app = spawn_app();
    let account = app.create_account("free").await;

    let (status, _) = app
        .get(&format!(
            "/usage/{}/history?days=0",
            str_field(&account, "account_id")
        ))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
