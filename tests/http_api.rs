mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use fedquery_lib::server::create_router;
use fedquery_lib::AppState;

use common::bank_fixture;

fn app() -> Router {
    create_router(AppState::new(bank_fixture().federator))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn query_request(sql: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/query")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "query": sql }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn query_returns_records_in_select_order() {
    let (status, body) = send(
        app(),
        query_request(
            "SELECT accounts.name, transactions.amount FROM accounts JOIN transactions \
             ON accounts.id = transactions.account_id WHERE transactions.amount > 350",
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["columns"], json!(["name", "amount"]));
    assert_eq!(body["source_tables"], json!(["accounts", "transactions"]));
    assert!(body["execution_time_ms"].as_f64().unwrap() >= 0.0);
    assert!(body["timestamp"].as_str().is_some());

    let results = body["results"].as_array().unwrap();
    assert!(!results.is_empty());
    for record in results {
        let keys: Vec<&String> = record.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["name", "amount"]);
        assert!(record["amount"].as_i64().unwrap() > 350);
    }
}

#[tokio::test]
async fn unknown_table_is_a_400_with_detail() {
    let (status, body) = send(app(), query_request("SELECT * FROM ghosts")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("Tables not found in configuration: ghosts"));
}

#[tokio::test]
async fn unparseable_sql_is_a_400() {
    let (status, body) = send(app(), query_request("SELEC nothing")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn request_without_query_field_is_a_400_with_detail() {
    let request = Request::builder()
        .method("POST")
        .uri("/query")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = send(app(), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("query"));
}

#[tokio::test]
async fn request_without_json_content_type_is_a_400_with_detail() {
    let request = Request::builder()
        .method("POST")
        .uri("/query")
        .body(Body::from(r#"{"query": "SELECT * FROM accounts"}"#))
        .unwrap();
    let (status, body) = send(app(), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn root_lists_available_tables() {
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(app(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Distributed Query Service");
    assert_eq!(body["available_tables"], json!(["accounts", "transactions"]));
}

#[tokio::test]
async fn metrics_endpoint_reports_counters() {
    let app = app();
    let (status, _) = send(app.clone(), query_request("SELECT * FROM accounts")).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["total"].as_u64().unwrap() >= 1);
}
