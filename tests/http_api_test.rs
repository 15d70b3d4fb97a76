mod common;

use billing_core::handlers::transactions::TENANT_HEADER;
use billing_core::middleware::REQUEST_ID_HEADER;
use billing_core::{create_app, AppState};
use common::{click_callback, harness};
use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

async fn setup_test_app() -> String {
    let h = harness();
    let app = create_app(AppState::new(h.service));

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 0));
    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let actual_addr = server.local_addr();

    tokio::spawn(async move {
        server.await.unwrap();
    });

    format!("http://{}", actual_addr)
}

async fn create_cash(client: &reqwest::Client, base_url: &str, tenant: Uuid, amount: i64) -> Value {
    let res = client
        .post(format!("{}/transactions", base_url))
        .header(TENANT_HEADER, tenant.to_string())
        .json(&json!({"amount": amount, "currency": "USD", "gateway": "cash"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

#[tokio::test]
async fn test_health_reports_gateways() {
    let base_url = setup_test_app().await;

    let res = reqwest::get(format!("{}/health", base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key(REQUEST_ID_HEADER));

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["db"], "connected");
    assert_eq!(body["gateways"], json!(["cash", "click"]));
}

#[tokio::test]
async fn test_cash_lifecycle_over_http() {
    let base_url = setup_test_app().await;
    let client = reqwest::Client::new();
    let tenant = Uuid::new_v4();

    let created = create_cash(&client, &base_url, tenant, 1_000).await;
    assert_eq!(created["status"], "pending");
    assert_eq!(created["version"], 1);
    let id = created["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!("{}/transactions/{}/confirm", base_url, id))
        .header(TENANT_HEADER, tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["refundable"], 1_000);

    let res = client
        .post(format!("{}/transactions/{}/refund", base_url, id))
        .header(TENANT_HEADER, tenant.to_string())
        .json(&json!({"amount": 300}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "partially_refunded");
    assert_eq!(body["refunded"], 300);

    let res = client
        .post(format!("{}/transactions/{}/refund", base_url, id))
        .header(TENANT_HEADER, tenant.to_string())
        .json(&json!({"amount": 5_000}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], 422);

    let res = client
        .post(format!("{}/transactions/{}/cancel", base_url, id))
        .header(TENANT_HEADER, tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_tenant_header_is_required_and_scopes_reads() {
    let base_url = setup_test_app().await;
    let client = reqwest::Client::new();
    let tenant = Uuid::new_v4();
    let created = create_cash(&client, &base_url, tenant, 700).await;
    let id = created["id"].as_str().unwrap();

    let res = client
        .get(format!("{}/transactions/{}", base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(format!("{}/transactions/{}", base_url, id))
        .header(TENANT_HEADER, Uuid::new_v4().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(format!("{}/transactions/{}", base_url, id))
        .header(TENANT_HEADER, tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_validation_errors() {
    let base_url = setup_test_app().await;
    let client = reqwest::Client::new();
    let tenant = Uuid::new_v4();

    for body in [
        json!({"amount": 0, "currency": "USD", "gateway": "cash"}),
        json!({"amount": 100, "currency": "XXX", "gateway": "cash"}),
        json!({"amount": 100, "currency": "USD", "gateway": "paypal"}),
    ] {
        let res = client
            .post(format!("{}/transactions", base_url))
            .header(TENANT_HEADER, tenant.to_string())
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "body {}", body);
    }

    let res = client
        .post(format!("{}/transactions", base_url))
        .header(TENANT_HEADER, tenant.to_string())
        .json(&json!({"amount": 100, "currency": "USD", "gateway": "stripe"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_transactions_paginates() {
    let base_url = setup_test_app().await;
    let client = reqwest::Client::new();
    let tenant = Uuid::new_v4();
    for amount in [100, 200, 300] {
        create_cash(&client, &base_url, tenant, amount).await;
    }

    let res = client
        .get(format!("{}/transactions?limit=2&sort=asc", base_url))
        .header(TENANT_HEADER, tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let page: Value = res.json().await.unwrap();
    assert_eq!(page["total"], 3);
    assert_eq!(page["limit"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);

    let res = client
        .get(format!("{}/transactions?sort=sideways", base_url))
        .header(TENANT_HEADER, tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_click_webhook_over_http() {
    let base_url = setup_test_app().await;
    let client = reqwest::Client::new();
    let tenant = Uuid::new_v4();

    let res = client
        .post(format!("{}/transactions", base_url))
        .header(TENANT_HEADER, tenant.to_string())
        .json(&json!({"amount": 5_000, "currency": "UZS", "gateway": "click", "merchant_ref": "web-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();

    let payload = click_callback("9001", "web-1", "50.00", 1);
    let send = || {
        client
            .post(format!("{}/webhooks/click", base_url))
            .header("content-type", "application/x-www-form-urlencoded")
            .body(payload.clone())
            .send()
    };

    let res = send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let reply: Value = res.json().await.unwrap();
    assert_eq!(reply["click_trans_id"], 9001);
    assert_eq!(reply["merchant_trans_id"], "web-1");
    assert_eq!(reply["error"], 0);
    assert!(reply["merchant_confirm_id"].as_i64().unwrap() > 0);

    let res = client
        .get(format!("{}/transactions/{}", base_url, created["id"].as_str().unwrap()))
        .header(TENANT_HEADER, tenant.to_string())
        .send()
        .await
        .unwrap();
    let stored: Value = res.json().await.unwrap();
    assert_eq!(stored["status"], "completed");

    // A redelivery gets the same answer.
    let res = send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let again: Value = res.json().await.unwrap();
    assert_eq!(again, reply);

    // Click reads failures from the body, not the status code.
    let res = client
        .post(format!("{}/webhooks/click", base_url))
        .body(payload.replace("amount=50.00", "amount=1.00"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let refused: Value = res.json().await.unwrap();
    assert_eq!(refused["error"], -1);

    let res = client
        .post(format!("{}/webhooks", base_url))
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let detected: Value = res.json().await.unwrap();
    assert_eq!(detected["error"], 0);
}
