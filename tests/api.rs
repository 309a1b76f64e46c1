//! End-to-end tests driving the router against a throwaway SQLite database.

use std::collections::HashSet;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use pastel::commands::serve::{router, TEST_NOW_HEADER};
use pastel::config::{self, Config};
use pastel::App;

/// 2023-11-14T22:13:20Z
const T0: i64 = 1_700_000_000_000;

async fn build_app(test_mode: bool, configure: impl FnOnce(&mut Config)) -> (App, TempDir) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("pastes.db").display()
    );
    let mut config = Config {
        base_url: "http://paste.test".to_owned(),
        test_mode,
        database: config::Database {
            url,
            max_connections: 8,
        },
        ..Config::default()
    };
    configure(&mut config);
    let app = App::new(config).await.expect("failed to build app");
    (app, dir)
}

async fn setup_with(test_mode: bool) -> (Router, TempDir) {
    let (app, dir) = build_app(test_mode, |_| {}).await;
    (router(app), dir)
}

async fn setup() -> (Router, TempDir) {
    setup_with(true).await
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn send_html(app: Router, request: Request<Body>) -> (StatusCode, String, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
}

fn post_paste(body: Value, now: Option<i64>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/pastes")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(now) = now {
        builder = builder.header(TEST_NOW_HEADER, now.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, now: Option<i64>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(now) = now {
        builder = builder.header(TEST_NOW_HEADER, now.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

async fn create(app: &Router, body: Value, now: Option<i64>) -> String {
    let (status, body) = send(app.clone(), post_paste(body, now)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn healthz() {
    let (app, _dir) = setup().await;
    let (status, body) = send(app.clone(), get("/api/healthz", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
}

#[tokio::test]
async fn create_returns_id_url_and_location() {
    let (app, _dir) = setup().await;
    let response = app
        .clone()
        .oneshot(post_paste(json!({ "content": "hello" }), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let location = response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_owned();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    let id = body["id"].as_str().unwrap();
    assert!(id.len() >= 10);
    assert_eq!(body["url"], format!("http://paste.test/p/{id}"));
    assert_eq!(location, format!("/p/{id}"));
}

#[tokio::test]
async fn round_trip_without_constraints() {
    let (app, _dir) = setup().await;
    let id = create(&app, json!({ "content": "fn main() {}\n" }), None).await;

    for _ in 0..3 {
        let (status, body) = send(app.clone(), get(&format!("/api/pastes/{id}"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "content": "fn main() {}\n",
                "remaining_views": null,
                "expires_at": null,
            })
        );
    }
}

#[tokio::test]
async fn paste_expires_after_ttl() {
    let (app, _dir) = setup().await;
    let id = create(&app, json!({ "content": "brief", "ttl_seconds": 5 }), Some(T0)).await;
    let uri = format!("/api/pastes/{id}");

    let (status, body) = send(app.clone(), get(&uri, Some(T0 + 4_000))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "brief");
    let expires_at: DateTime<Utc> = body["expires_at"].as_str().unwrap().parse().unwrap();
    assert_eq!(expires_at.timestamp_millis(), T0 + 5_000);

    let (status, _) = send(app.clone(), get(&uri, Some(T0 + 5_000))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(app.clone(), get(&uri, Some(T0 + 60_000))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // the html route applies the same expiry
    let (status, _, _) = send_html(app.clone(), get(&format!("/p/{id}"), Some(T0 + 5_000))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn view_limit_is_enforced() {
    let (app, _dir) = setup().await;
    let id = create(&app, json!({ "content": "twice", "max_views": 2 }), None).await;
    let uri = format!("/api/pastes/{id}");

    let (status, body) = send(app.clone(), get(&uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["remaining_views"], 1);

    let (status, body) = send(app.clone(), get(&uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["remaining_views"], 0);

    for _ in 0..3 {
        let (status, _) = send(app.clone(), get(&uri, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fetches_consume_distinct_views() {
    const N: i64 = 8;

    let (app, _dir) = setup().await;
    let id = create(&app, json!({ "content": "race", "max_views": N }), None).await;
    let uri = format!("/api/pastes/{id}");

    let handles: Vec<_> = (0..=N)
        .map(|_| {
            let app = app.clone();
            let uri = uri.clone();
            tokio::spawn(async move { send(app, get(&uri, None)).await })
        })
        .collect();

    let mut remaining = HashSet::new();
    let mut failures = 0;
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        match status {
            StatusCode::OK => {
                assert!(remaining.insert(body["remaining_views"].as_i64().unwrap()));
            }
            StatusCode::NOT_FOUND => failures += 1,
            other => panic!("unexpected status {other}: {body}"),
        }
    }

    assert_eq!(remaining, (0..N).collect::<HashSet<_>>());
    assert_eq!(failures, 1);
}

#[tokio::test]
async fn invalid_input_is_rejected() {
    let (app, _dir) = setup().await;

    let bodies = [
        json!({}),
        json!({ "content": "" }),
        json!({ "content": "   \n\t" }),
        json!({ "content": 42 }),
        json!({ "content": "x", "ttl_seconds": 0 }),
        json!({ "content": "x", "ttl_seconds": -3 }),
        json!({ "content": "x", "ttl_seconds": 2.5 }),
        json!({ "content": "x", "ttl_seconds": "10" }),
        json!({ "content": "x", "max_views": -1 }),
        json!({ "content": "x", "max_views": 0 }),
    ];
    for body in bodies {
        let (status, response) = send(app.clone(), post_paste(body.clone(), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert!(response["error"].is_string(), "{response}");
    }
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let (app, _dir) = setup().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/pastes")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"content\": "))
        .unwrap();
    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn html_view_escapes_content() {
    let (app, _dir) = setup().await;
    let id = create(&app, json!({ "content": "<script>alert(1)</script>" }), None).await;

    let (status, content_type, page) = send_html(app.clone(), get(&format!("/p/{id}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("text/html"));
    assert!(page.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
    assert!(!page.contains("<script>"));
}

#[tokio::test]
async fn html_view_counts_as_a_view() {
    let (app, _dir) = setup().await;
    let id = create(&app, json!({ "content": "once", "max_views": 1 }), None).await;

    let (status, _, _) = send_html(app.clone(), get(&format!("/p/{id}"), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(app.clone(), get(&format!("/api/pastes/{id}"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, page) = send_html(app.clone(), get(&format!("/p/{id}"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(page.contains("Create New Paste"));
}

#[tokio::test]
async fn gone_pastes_are_indistinguishable() {
    let (app, _dir) = setup().await;

    let expired = create(&app, json!({ "content": "a", "ttl_seconds": 1 }), Some(T0)).await;
    let exhausted = create(&app, json!({ "content": "b", "max_views": 1 }), Some(T0)).await;
    let (status, _) = send(app.clone(), get(&format!("/api/pastes/{exhausted}"), Some(T0))).await;
    assert_eq!(status, StatusCode::OK);

    let later = Some(T0 + 10_000);
    let mut json_responses = Vec::new();
    let mut html_responses = Vec::new();
    for id in ["neverexist", expired.as_str(), exhausted.as_str()] {
        json_responses.push(send(app.clone(), get(&format!("/api/pastes/{id}"), later)).await);
        html_responses.push(send_html(app.clone(), get(&format!("/p/{id}"), later)).await);
    }

    for response in &json_responses {
        assert_eq!(response.0, StatusCode::NOT_FOUND);
        assert_eq!(response, &json_responses[0]);
    }
    for response in &html_responses {
        assert_eq!(response.0, StatusCode::NOT_FOUND);
        assert_eq!(response, &html_responses[0]);
    }
}

#[tokio::test]
async fn clock_header_is_ignored_outside_test_mode() {
    let (app, _dir) = setup_with(false).await;
    let id = create(&app, json!({ "content": "live", "ttl_seconds": 3600 }), Some(T0)).await;

    // were the header honoured, the paste would have expired in 2023
    let (status, body) = send(app.clone(), get(&format!("/api/pastes/{id}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "live");

    let far_future = Some(T0 * 10);
    let (status, _) = send(app.clone(), get(&format!("/api/pastes/{id}"), far_future)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn index_serves_usage() {
    let (app, _dir) = setup().await;
    let (status, _, body) = send_html(app.clone(), get("/", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("/api/pastes"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn created_pastes_are_immediately_readable() {
    let (app, _dir) = setup().await;

    // grow the pool so consecutive requests land on different connections
    let warm: Vec<_> = (0..8)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move { send(app, get("/api/healthz", None)).await })
        })
        .collect();
    for handle in warm {
        assert_eq!(handle.await.unwrap().0, StatusCode::OK);
    }

    for i in 0..100 {
        let content = format!("paste number {i}");
        let id = create(&app, json!({ "content": content }), None).await;
        let (status, body) = send(app.clone(), get(&format!("/api/pastes/{id}"), None)).await;
        assert_eq!(status, StatusCode::OK, "{id}: {body}");
        assert_eq!(body["content"], content);
    }
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let (app, _dir) = build_app(true, |config| config.limits.max_content_size = 64).await;
    let app = router(app);
    let body = json!({ "content": "x".repeat(256) }).to_string();

    // declared length: refused before the body is read
    let request = Request::builder()
        .method("POST")
        .uri("/api/pastes")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, _) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    // no declared length: the limit trips while buffering
    let request = Request::builder()
        .method("POST")
        .uri("/api/pastes")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    let (status, response) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(response["error"].is_string(), "{response}");

    let (status, _) = send(app.clone(), post_paste(json!({ "content": "small" }), None)).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn storage_failures_are_internal_errors() {
    let (app, _dir) = build_app(true, |_| {}).await;
    let id = {
        let routes = router(app.clone());
        create(&routes, json!({ "content": "doomed" }), None).await
    };

    let pool = sqlx::AnyPool::connect(&app.config.database.url).await.unwrap();
    sqlx::query("DROP TABLE pastes").execute(&pool).await.unwrap();
    pool.close().await;

    let routes = router(app);
    let (status, body) = send(routes.clone(), get(&format!("/api/pastes/{id}"), None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "internal server error" }));

    let (status, body) = send(routes.clone(), post_paste(json!({ "content": "x" }), None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "internal server error" }));

    let (status, content_type, page) =
        send_html(routes.clone(), get(&format!("/p/{id}"), None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(content_type.starts_with("text/html"));
    assert!(page.contains("Internal Server Error"));
    assert!(!page.contains("doomed"));
}

#[tokio::test]
async fn healthz_reports_an_unreachable_database() {
    let (app, _dir) = build_app(true, |_| {}).await;
    app.database.close().await;

    let (status, body) = send(router(app), get("/api/healthz", None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({ "ok": false, "error": "database connection failed" })
    );
}
