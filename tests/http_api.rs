//! Drives the axum router directly with `tower::ServiceExt::oneshot`,
//! exercising the full HTTP surface end to end without a bound TCP socket.

use std::sync::Arc;

use acb_ledger_backend::api;
use acb_ledger_backend::coordinator::MutationCoordinator;
use acb_ledger_backend::fx::{FixedTableFxProvider, FxProvider};
use acb_ledger_backend::store::{MemoryAccountCatalog, MemoryEventStore, MemorySecurityCatalog};
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn build_app() -> axum::Router {
    let events = Arc::new(MemoryEventStore::new());
    let securities = Arc::new(MemorySecurityCatalog::new());
    let accounts = Arc::new(MemoryAccountCatalog::new());
    let fx: Arc<dyn FxProvider> = Arc::new(FixedTableFxProvider::default());
    let coordinator = Arc::new(MutationCoordinator::new(events, securities, accounts, fx));
    api::router(coordinator)
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn health_check_returns_200() {
    let app = build_app();
    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn full_buy_sell_round_trip_via_http() {
    let app = build_app();

    let (status, security) = send(
        &app,
        "POST",
        "/api/securities",
        Some(json!({"symbol": "XIC", "name": "iShares Core TSX", "currency": "CAD", "type": "etf"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let security_id = security["id"].as_str().unwrap().to_string();

    let (status, account) = send(
        &app,
        "POST",
        "/api/accounts",
        Some(json!({"name": "Non-Registered", "type": "non_registered"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let account_id = account["id"].as_str().unwrap().to_string();

    let (status, buy_view) = send(
        &app,
        "POST",
        "/api/transactions",
        Some(json!({
            "date": "2024-01-01",
            "type": "buy",
            "accountId": account_id,
            "securityId": security_id,
            "quantity": "100",
            "price": "50",
            "fees": "10"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(buy_view["acbAfter"], "5010");

    let (status, sell_view) = send(
        &app,
        "POST",
        "/api/transactions",
        Some(json!({
            "date": "2024-01-10",
            "type": "sell",
            "accountId": account_id,
            "securityId": security_id,
            "quantity": "100",
            "price": "60",
            "fees": "10"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sell_view["capitalGain"], "980");
    assert_eq!(sell_view["acbAfter"], "0");

    let (status, transactions) = send(
        &app,
        "GET",
        &format!("/api/transactions?accountId={account_id}&securityId={security_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(transactions.as_array().unwrap().len(), 2);

    let (status, positions) = send(&app, "GET", "/api/positions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(positions.as_array().unwrap().is_empty(), "position fully sold off");
}

#[tokio::test]
async fn selling_without_prior_holdings_returns_400() {
    let app = build_app();

    let (_, security) = send(
        &app,
        "POST",
        "/api/securities",
        Some(json!({"symbol": "VFV", "name": "Vanguard S&P 500", "currency": "CAD", "type": "etf"})),
    )
    .await;
    let security_id = security["id"].as_str().unwrap().to_string();
    let (_, account) = send(&app, "POST", "/api/accounts", Some(json!({"name": "TFSA", "type": "tfsa"}))).await;
    let account_id = account["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        "/api/transactions",
        Some(json!({
            "date": "2024-01-01",
            "type": "sell",
            "accountId": account_id,
            "securityId": security_id,
            "quantity": "10",
            "price": "50",
            "fees": "0"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn duplicate_external_id_returns_409() {
    let app = build_app();

    let (_, security) = send(
        &app,
        "POST",
        "/api/securities",
        Some(json!({"symbol": "ZSP", "name": "BMO S&P 500", "currency": "CAD", "type": "etf"})),
    )
    .await;
    let security_id = security["id"].as_str().unwrap().to_string();
    let (_, account) = send(&app, "POST", "/api/accounts", Some(json!({"name": "RRSP", "type": "rrsp"}))).await;
    let account_id = account["id"].as_str().unwrap().to_string();

    let body = json!({
        "date": "2024-01-01",
        "type": "buy",
        "accountId": account_id,
        "securityId": security_id,
        "quantity": "10",
        "price": "50",
        "fees": "0",
        "externalId": "import-42"
    });

    let (status, _) = send(&app, "POST", "/api/transactions", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(&app, "POST", "/api/transactions", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn deleting_a_transaction_triggers_slice_recompute() {
    let app = build_app();

    let (_, security) = send(
        &app,
        "POST",
        "/api/securities",
        Some(json!({"symbol": "XEQT", "name": "iShares All Equity", "currency": "CAD", "type": "etf"})),
    )
    .await;
    let security_id = security["id"].as_str().unwrap().to_string();
    let (_, account) = send(&app, "POST", "/api/accounts", Some(json!({"name": "Margin", "type": "non_registered"}))).await;
    let account_id = account["id"].as_str().unwrap().to_string();

    let (_, buy1) = send(
        &app,
        "POST",
        "/api/transactions",
        Some(json!({
            "date": "2024-01-01", "type": "buy", "accountId": account_id, "securityId": security_id,
            "quantity": "100", "price": "50", "fees": "0"
        })),
    )
    .await;
    let buy1_id = buy1["eventId"].as_str().unwrap().to_string();

    send(
        &app,
        "POST",
        "/api/transactions",
        Some(json!({
            "date": "2024-01-05", "type": "buy", "accountId": account_id, "securityId": security_id,
            "quantity": "100", "price": "60", "fees": "0"
        })),
    )
    .await;

    send(
        &app,
        "POST",
        "/api/transactions",
        Some(json!({
            "date": "2024-02-01", "type": "sell", "accountId": account_id, "securityId": security_id,
            "quantity": "50", "price": "70", "fees": "0"
        })),
    )
    .await;

    let (status, _) = send(&app, "DELETE", &format!("/api/transactions/{buy1_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, transactions) = send(
        &app,
        "GET",
        &format!("/api/transactions?accountId={account_id}&securityId={security_id}"),
        None,
    )
    .await;
    let sell = transactions
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["type"] == "sell")
        .unwrap();
    assert_eq!(sell["acbUsed"], "3000");
}
