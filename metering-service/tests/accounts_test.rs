//! Account registry and quota endpoints.

mod common;

use axum::http::StatusCode;
use common::{spawn_app, str_field, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn create_account_reveals_license_key_once() {
    let app = spawn_app();
    let account = app.create_account("pro").await;

    assert_eq!(account["status"], "active");
    assert_eq!(account["plan_type"], "pro");
    assert_eq!(account["is_trial"], false);
    assert!(str_field(&account, "license_key").starts_with("lk_"));
    assert_eq!(account["days_remaining"], 365);

    let (status, fetched) = app
        .get(&format!("/accounts/{}", str_field(&account, "account_id")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(fetched.get("license_key").is_none());
    assert_eq!(fetched["email"], "ops@acme.test");
}

#[tokio::test]
async fn create_account_rejects_bad_email() {
    let app = spawn_app();

    let (status, _) = app
        .post(
            "/accounts",
            json!({ "name": "Broken", "email": "not-an-email", "plan_type": "free" }),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_account_is_not_found() {
    let app = spawn_app();

    let (status, _) = app.get(&format!("/accounts/{}", Uuid::new_v4())).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_accounts_hides_keys() {
    let app = spawn_app();
    app.create_account("free").await;
    app.create_account("starter").await;

    let (status, body) = app.get("/accounts").await;

    assert_eq!(status, StatusCode::OK);
    let accounts = body.as_array().unwrap();
    assert_eq!(accounts.len(), 2);
    assert!(accounts.iter().all(|a| a.get("license_key").is_none()));
}

#[tokio::test]
async fn status_transitions_follow_the_lifecycle() {
    let app = spawn_app();
    let account = app.create_account("free").await;
    let uri = format!("/accounts/{}/status", str_field(&account, "account_id"));

    let (status, body) = app.patch(&uri, json!({ "status": "suspended" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "suspended");

    // suspended -> expired is not allowed
    let (status, _) = app.patch(&uri, json!({ "status": "expired" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.patch(&uri, json!({ "status": "cancelled" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, _) = app.patch(&uri, json!({ "status": "active" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_sub_account_name_conflicts() {
    let app = spawn_app();
    let account = app.create_account("starter").await;
    let account_id = str_field(&account, "account_id");

    let (status, sub) = app.create_sub_account(account_id, "prod").await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(str_field(&sub, "api_key").starts_with("sk_"));

    let (status, _) = app.create_sub_account(account_id, "prod").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.create_sub_account(account_id, "staging").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, subs) = app
        .get(&format!("/accounts/{}/sub-accounts", account_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    let mut names: Vec<&str> = subs
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    names.sort_unstable();
    assert_eq!(names, vec!["prod", "staging"]);
    assert!(subs.as_array().unwrap().iter().all(|s| s.get("api_key").is_none()));
}

#[tokio::test]
async fn sub_account_for_unknown_account_is_not_found() {
    let app = spawn_app();

    let (status, _) = app
        .create_sub_account(&Uuid::new_v4().to_string(), "orphan")
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn most_specific_quota_wins() {
    let app = spawn_app();
    let account = app.create_account("free").await;
    let account_id = str_field(&account, "account_id");
    let (_, sub) = app.create_sub_account(account_id, "prod").await;
    let sub_id = str_field(&sub, "sub_account_id");

    let (status, _) = app
        .put(
            &format!("/accounts/{}/quota", account_id),
            TestApp::quota_body(1_000),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .put(
            &format!("/sub-accounts/{}/quota", sub_id),
            TestApp::quota_body(500),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, quota) = app
        .get(&format!(
            "/accounts/{}/quota?sub_account_id={}",
            account_id, sub_id
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quota["source"], "sub_account");
    assert_eq!(quota["metric_count_limit"], 500);

    let (_, quota) = app.get(&format!("/accounts/{}/quota", account_id)).await;
    assert_eq!(quota["source"], "account");
    assert_eq!(quota["metric_count_limit"], 1_000);
}

#[tokio::test]
async fn sub_account_without_quota_inherits_account_quota() {
    let app = spawn_app();
    let account = app.create_account("pro").await;
    let account_id = str_field(&account, "account_id");
    let (_, sub) = app.create_sub_account(account_id, "prod").await;

    let (_, quota) = app
        .get(&format!(
            "/accounts/{}/quota?sub_account_id={}",
            account_id,
            str_field(&sub, "sub_account_id")
        ))
        .await;

    assert_eq!(quota["source"], "account");
    assert_eq!(quota["metric_count_limit"], 100_000_000);
}

#[tokio::test]
async fn negative_quota_is_rejected() {
    let app = spawn_app();
    let account = app.create_account("free").await;

    let (status, _) = app
        .put(
            &format!("/accounts/{}/quota", str_field(&account, "account_id")),
            TestApp::quota_body(-1),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn state_changes_are_audited() {
    let app = spawn_app();
    let account = app.create_account("free").await;
    app.create_sub_account(str_field(&account, "account_id"), "prod")
        .await;

    let actions: Vec<String> = app
        .memory()
        .audit_entries()
        .into_iter()
        .map(|e| e.action)
        .collect();

    assert!(actions.contains(&"account.created".to_string()));
    assert!(actions.contains(&"sub_account.created".to_string()));
}
