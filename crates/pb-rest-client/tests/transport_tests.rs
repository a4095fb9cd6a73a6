//! Transport behavior against a mock backend

use futures::StreamExt;
use pb_rest_client::{
    ApiRequest, AuthStore, Client, ClientConfig, ClientError, FileAttachment, QueryParams,
};
use reqwest::header::{HeaderValue, ACCEPT_LANGUAGE, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{
    body_json, body_string_contains, header, header_exists, method, path, query_param,
};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Todo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    title: String,
    done: bool,
}

impl pb_api_contract::RecordBody for Todo {}

fn client_for(server: &MockServer) -> Client {
    Client::new(ClientConfig::new(server.uri())).expect("client")
}

#[tokio::test]
async fn test_missing_record_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/collections/todos/records/doesnotexist"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": 404,
            "message": "The requested resource wasn't found.",
            "data": {}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .collection("todos")
        .get_one::<Todo>("doesnotexist")
        .await
        .unwrap_err();

    assert!(err.is_protocol());
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(err.method(), Some(&reqwest::Method::GET));
    let url = format!("{}/api/collections/todos/records/doesnotexist", server.uri());
    assert_eq!(err.url(), Some(url.as_str()));
    assert_eq!(
        err.to_string(),
        format!("GET request to {url} resulted in 404 Not Found")
    );
    assert_eq!(err.details().map(|d| d.code), Some(404));
}

#[tokio::test]
async fn test_protocol_error_without_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .collection("todos")
        .delete("r1")
        .await
        .unwrap_err();
    assert!(err.is_protocol());
    assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert!(err.details().is_none());
}

#[tokio::test]
async fn test_query_parameters_reach_server_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/collections/todos/records"))
        .and(query_param("filter", "done = true && title ~ 'a b'"))
        .and(query_param("page", "2"))
        .and(query_param("perPage", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "page": 2,
            "perPage": 5,
            "totalItems": 6,
            "totalPages": 2,
            "items": [{"id": "r6", "title": "a b", "done": true}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let page = client
        .collection("todos")
        .list::<Todo>(2, 5, Some("done = true && title ~ 'a b'"), None)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.total_items, 6);

    let url = client
        .build_url(
            "/api/collections/todos/records",
            Some(
                &QueryParams::new()
                    .with("filter", "a b")
                    .with("page", 2)
                    .with("perPage", 5),
            ),
        )
        .unwrap();
    assert_eq!(
        url.as_str(),
        format!(
            "{}/api/collections/todos/records?filter=a+b&page=2&perPage=5",
            server.uri()
        )
    );
}

#[tokio::test]
async fn test_full_list_follows_pages() {
    let server = MockServer::start().await;
    for page in 1..=2 {
        Mock::given(method("GET"))
            .and(path("/api/collections/todos/records"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": page,
                "perPage": 1,
                "totalItems": 2,
                "totalPages": 2,
                "items": [{"id": format!("r{page}"), "title": "t", "done": false}]
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let items = client_for(&server)
        .collection("todos")
        .get_full_list::<Todo>(1, None, None)
        .await
        .unwrap();
    let ids: Vec<_> = items.into_iter().filter_map(|todo| todo.id).collect();
    assert_eq!(ids, vec!["r1", "r2"]);
}

#[tokio::test]
async fn test_auth_and_language_headers_injected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .and(header("authorization", "secret-token"))
        .and(header("accept-language", "de-DE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 200})))
        .expect(1)
        .mount(&server)
        .await;

    let auth = Arc::new(AuthStore::with_token("secret-token"));
    let client = Client::builder(ClientConfig::new(server.uri()).with_language("de-DE"))
        .auth(auth)
        .build()
        .unwrap();

    let body: Value = client.send_json(ApiRequest::get("/api/health")).await.unwrap();
    assert_eq!(body["code"], 200);
}

#[tokio::test]
async fn test_caller_headers_win() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "caller"))
        .and(header("accept-language", "fr"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::builder(ClientConfig::new(server.uri()))
        .auth(Arc::new(AuthStore::with_token("stored")))
        .build()
        .unwrap();

    let request = ApiRequest::get("/api/health")
        .header(AUTHORIZATION, HeaderValue::from_static("caller"))
        .header(ACCEPT_LANGUAGE, HeaderValue::from_static("fr"));
    client.send(request).await.unwrap();
}

#[tokio::test]
async fn test_json_body_skips_identity_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/collections/todos/records"))
        .and(body_json(json!({"title": "milk", "done": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "new1",
            "title": "milk",
            "done": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let todo = Todo {
        id: Some("client-side".into()),
        title: "milk".into(),
        done: false,
    };
    let created: Todo = client_for(&server)
        .collection("todos")
        .create(&todo)
        .await
        .unwrap();
    assert_eq!(created.id.as_deref(), Some("new1"));
}

#[tokio::test]
async fn test_files_switch_to_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/collections/docs/records"))
        .and(header_exists("content-type"))
        .and(body_string_contains("name=\"tags0\""))
        .and(body_string_contains("name=\"tags1\""))
        .and(body_string_contains("filename=\"report.pdf\""))
        .and(body_string_contains("application/pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "d1"})))
        .expect(1)
        .mount(&server)
        .await;

    let request = ApiRequest::post("/api/collections/docs/records")
        .body_field("title", "Q3")
        .body_field("tags", json!(["finance", "internal"]))
        .file(FileAttachment::new("attachment", "report.pdf", &b"%PDF-1.7"[..]));
    let created: Value = client_for(&server).send_json(request).await.unwrap();
    assert_eq!(created["id"], "d1");

    let received = server.received_requests().await.unwrap();
    let content_type = received[0]
        .headers
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("multipart/form-data"));
}

#[tokio::test]
async fn test_decode_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .send_json::<Value>(ApiRequest::get("/api/health"))
        .await
        .unwrap_err();
    assert!(err.is_decode());
    assert_eq!(err.status(), Some(StatusCode::OK));
}

#[tokio::test]
async fn test_empty_body_decodes_as_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let value: Option<Value> = client_for(&server)
        .send_json(ApiRequest::get("/api/health"))
        .await
        .unwrap();
    assert!(value.is_none());
}

#[test]
fn test_connection_refused_is_transport_error() {
    let client = Client::from_url("http://127.0.0.1:1").unwrap();
    let err = tokio_test::assert_err!(tokio_test::block_on(
        client.send(ApiRequest::get("/api/health"))
    ));

    assert!(matches!(err, ClientError::Transport { .. }));
    assert_eq!(err.status(), None);
    assert_eq!(err.url(), Some("http://127.0.0.1:1/api/health"));
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = client
        .send(ApiRequest::get("/api/slow").cancel_on(cancel))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_hooks_rewrite_and_observe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("x-trace", "t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let observed = Arc::new(AtomicUsize::new(0));
    let counter = observed.clone();
    let client = Client::builder(ClientConfig::new(server.uri()))
        .before_send(|mut request: reqwest::Request| {
            request
                .headers_mut()
                .insert("x-trace", HeaderValue::from_static("t-1"));
            request
        })
        .after_send(move |response: &reqwest::Response| {
            assert_eq!(response.status(), StatusCode::OK);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    client.send(ApiRequest::get("/api/health")).await.unwrap();
    assert_eq!(observed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stream_download() {
    let server = MockServer::start().await;
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/api/files/docs/d1/big.bin"))
        .and(query_param("thumb", "100x100"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut stream = client
        .collection("docs")
        .download_file("d1", "big.bin", Some("100x100"), None)
        .await
        .unwrap();

    let mut received = Vec::new();
    while let Some(chunk) = stream.next().await {
        received.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(received, payload);
}

#[tokio::test]
async fn test_stream_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get_stream("/api/files/docs/d1/secret.bin", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
}

#[tokio::test]
async fn test_request_hook_sees_resolved_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/redirected"))
        .respond_with(ResponseTemplate::new(418))
        .mount(&server)
        .await;

    let client = Client::builder(ClientConfig::new(server.uri()))
        .before_send(|mut request: reqwest::Request| {
            request.url_mut().set_path("/api/redirected");
            request
        })
        .build()
        .unwrap();

    let err = client.send(ApiRequest::get("/api/original")).await.unwrap_err();
    assert_eq!(err.url(), Some(format!("{}/api/redirected", server.uri()).as_str()));

    // Requests seen by the server went to the rewritten path
    let received: Vec<Request> = server.received_requests().await.unwrap();
    assert_eq!(received[0].url.path(), "/api/redirected");
}

#[tokio::test]
async fn test_path_segments_are_percent_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/collections/todos/records/a%20b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "x", "done": false})))
        .expect(1)
        .mount(&server)
        .await;

    let todo: Todo = client_for(&server)
        .collection("todos")
        .get_one("a b")
        .await
        .unwrap();
    assert_eq!(todo.title, "x");
}

#[tokio::test]
async fn test_record_handle_cancellation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let cancel = CancellationToken::new();
    let todos = client.collection("todos").cancel_on(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = todos.get_one::<Todo>("r1").await.unwrap_err();
    assert!(err.is_cancelled());

    // An already-fired token stops list calls as well
    let err = todos.list::<Todo>(1, 10, None, None).await.unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "message": "API is healthy.",
            "data": {}
        })))
        .mount(&server)
        .await;

    let health = client_for(&server).health().await.unwrap();
    assert_eq!(health.code, 200);
    assert_eq!(health.message, "API is healthy.");
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    email: String,
}

#[tokio::test]
async fn test_auth_with_password_saves_token_and_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/collections/users/auth-with-password"))
        .and(body_json(json!({"identity": "ada@example.com", "password": "secret123"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "fresh-token",
            "record": {"id": "u1", "email": "ada@example.com"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/collections/todos/records/r1"))
        .and(header("authorization", "fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "t", "done": true})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(AuthStore::new());
    let client = Client::builder(ClientConfig::new(server.uri()))
        .auth(store.clone())
        .build()
        .unwrap();

    let auth = client
        .collection("users")
        .auth_with_password::<User>("ada@example.com", "secret123")
        .await
        .unwrap();
    assert_eq!(auth.token, "fresh-token");
    assert_eq!(auth.record.id, "u1");
    assert_eq!(auth.record.email, "ada@example.com");
    assert_eq!(store.raw_token().as_deref(), Some("fresh-token"));
    assert_eq!(store.model().unwrap()["id"], "u1");

    let todo: Todo = client.collection("todos").get_one("r1").await.unwrap();
    assert!(todo.done);
}

#[tokio::test]
async fn test_failed_password_auth_keeps_previous_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/collections/users/auth-with-password"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": 400,
            "message": "Failed to authenticate.",
            "data": {}
        })))
        .mount(&server)
        .await;

    let store = Arc::new(AuthStore::with_token("previous"));
    let client = Client::builder(ClientConfig::new(server.uri()))
        .auth(store.clone())
        .build()
        .unwrap();

    let err = client
        .collection("users")
        .auth_with_password::<Value>("ada@example.com", "wrong")
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    assert_eq!(store.raw_token().as_deref(), Some("previous"));
}

#[tokio::test]
async fn test_auth_refresh_replaces_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/collections/users/auth-refresh"))
        .and(header("authorization", "old-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "new-token",
            "record": {"id": "u1", "email": "ada@example.com"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(AuthStore::with_token("old-token"));
    let client = Client::builder(ClientConfig::new(server.uri()))
        .auth(store.clone())
        .build()
        .unwrap();

    let auth = client.collection("users").auth_refresh::<User>().await.unwrap();
    assert_eq!(auth.token, "new-token");
    assert_eq!(store.raw_token().as_deref(), Some("new-token"));
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_and_request_replayed_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/collections/todos/records/r1"))
        .and(header("authorization", "stale-token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": 401,
            "message": "The request requires valid record authorization token.",
            "data": {}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/collections/users/auth-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "renewed-token",
            "record": {"id": "u1"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/collections/todos/records/r1"))
        .and(header("authorization", "renewed-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "t", "done": false})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(AuthStore::with_token("stale-token"));
    let client = Client::builder(ClientConfig::new(server.uri()))
        .auth(store.clone())
        .refresh_auth_on_401("users")
        .build()
        .unwrap();

    let todo: Todo = client.collection("todos").get_one("r1").await.unwrap();
    assert_eq!(todo.title, "t");
    assert_eq!(store.raw_token().as_deref(), Some("renewed-token"));
}

#[tokio::test]
async fn test_refresh_replay_is_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/collections/users/auth-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "renewed-token",
            "record": {"id": "u1"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::builder(ClientConfig::new(server.uri()))
        .auth(Arc::new(AuthStore::with_token("stale-token")))
        .refresh_auth_on_401("users")
        .build()
        .unwrap();

    let err = client.collection("todos").get_one::<Todo>("r1").await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));

    // Original attempt, one refresh, one replay
    let received: Vec<Request> = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);
}

#[tokio::test]
async fn test_failed_refresh_reports_original_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/collections/users/auth-refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(AuthStore::with_token("stale-token"));
    let client = Client::builder(ClientConfig::new(server.uri()))
        .auth(store.clone())
        .refresh_auth_on_401("users")
        .build()
        .unwrap();

    let err = client.collection("todos").get_one::<Todo>("r1").await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    assert!(err.url().unwrap().ends_with("/api/collections/todos/records/r1"));
    assert_eq!(store.raw_token().as_deref(), Some("stale-token"));
}

#[tokio::test]
async fn test_no_refresh_without_stored_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = Client::builder(ClientConfig::new(server.uri()))
        .refresh_auth_on_401("users")
        .build()
        .unwrap();

    let err = client.collection("todos").get_one::<Todo>("r1").await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
}
