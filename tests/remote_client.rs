use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fedquery_core::{ColumnMeta, FederationError, TableRegistration};
use fedquery_lib::remote::{HttpRemoteClient, RemoteSource};

fn registration_for(server: &MockServer) -> TableRegistration {
    TableRegistration::new("accounts", server.uri(), server.address().port(), "accounts_v2")
}

fn client() -> HttpRemoteClient {
    HttpRemoteClient::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn fetches_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "row_count": 1200,
            "columns": [
                {"name": "id", "type": "INTEGER"},
                {"name": "region", "type": "VARCHAR"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let metadata = client().get_metadata(&registration_for(&server)).await.unwrap();

    assert_eq!(metadata.row_count, 1200);
    assert_eq!(
        metadata.columns,
        vec![ColumnMeta::new("id", "INTEGER"), ColumnMeta::new("region", "VARCHAR")]
    );
}

#[tokio::test]
async fn posts_query_and_reads_object_rows() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(body_json(json!({"query": "SELECT * FROM accounts_v2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": 1, "region": "US"},
                {"id": 2, "region": null}
            ],
            "columns": ["id", "region"],
            "execution_time_ms": 1.5
        })))
        .expect(1)
        .mount(&server)
        .await;

    let rows = client()
        .execute(&registration_for(&server), "SELECT * FROM accounts_v2")
        .await
        .unwrap();

    assert_eq!(rows.columns, vec!["id", "region"]);
    assert_eq!(rows.rows, vec![vec![json!(1), json!("US")], vec![json!(2), json!(null)]]);
}

#[tokio::test]
async fn reads_positional_rows() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [[1, "US"], [3, "US"]],
            "columns": ["id", "region"]
        })))
        .mount(&server)
        .await;

    let rows = client()
        .execute(&registration_for(&server), "SELECT id, region FROM accounts_v2")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.rows[1], vec![json!(3), json!("US")]);
}

#[tokio::test]
async fn http_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(500).set_body_string("table is locked"))
        .mount(&server)
        .await;

    let err = client()
        .execute(&registration_for(&server), "SELECT 1")
        .await
        .unwrap_err();

    match err {
        FederationError::RemoteExecution { table, message } => {
            assert_eq!(table, "accounts");
            assert!(message.contains("500"), "{message}");
            assert!(message.contains("table is locked"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn metadata_http_error_is_a_metadata_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metadata"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client()
        .get_metadata(&registration_for(&server))
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::RemoteMetadata { .. }));
}

#[tokio::test]
async fn malformed_body_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [[1, 2, 3]],
            "columns": ["id"]
        })))
        .mount(&server)
        .await;

    let err = client()
        .execute(&registration_for(&server), "SELECT 1")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Malformed response"));
}

#[tokio::test]
async fn slow_container_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"results": [], "columns": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = HttpRemoteClient::new(Duration::from_millis(200)).unwrap();
    let err = client
        .execute(&registration_for(&server), "SELECT 1")
        .await
        .unwrap_err();

    assert!(matches!(err, FederationError::RemoteExecution { .. }));
    assert!(err.to_string().contains("timed out"), "{err}");
}

#[tokio::test]
async fn unreachable_container_is_a_remote_failure() {
    let registration = TableRegistration::new("accounts", "127.0.0.1", 1, "accounts");
    let err = client()
        .execute(&registration, "SELECT 1")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 500);
}
