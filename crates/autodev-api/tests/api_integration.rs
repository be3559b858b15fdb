//! API integration tests.
//!
//! Tests the complete request flow: HTTP → locks → engine → cluster/KV,
//! against in-memory backends.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use tower::ServiceExt;

use autodev_api::{Config, Server};
use autodev_core::lock::paths::lock_key;
use autodev_core::{KvStore, MemoryKv};
use autodev_engine::cluster::ContainerStateKind;
use autodev_engine::MemoryCluster;

const INGRESS: &str = "minimal-ingress";

struct TestApp {
    kv: Arc<MemoryKv>,
    cluster: Arc<MemoryCluster>,
    router: axum::Router,
}

fn test_app() -> TestApp {
    let kv = Arc::new(MemoryKv::new());
    let cluster = Arc::new(MemoryCluster::new());
    cluster.seed_ingress(INGRESS);

    let config = Config {
        base_domain: "test.dev".to_string(),
        ..Config::default()
    };
    let router = Server::new(config, kv.clone(), cluster.clone()).router();
    TestApp {
        kv,
        cluster,
        router,
    }
}

fn editor_body() -> serde_json::Value {
    serde_json::json!({
        "components": [{
            "componentType": "code",
            "exposeComponent": true,
            "componentID": "ide",
            "componentMetadata": {"password": "p"}
        }]
    })
}

async fn request(
    router: axum::Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let (status, bytes) = request_raw(router, method, uri, body).await;
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

async fn request_raw(
    router: axum::Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, bytes::Bytes) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&value).expect("serialize body"))
        }
        None => Body::empty(),
    };
    let response = router
        .oneshot(builder.body(body).expect("build request"))
        .await
        .expect("infallible");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    (status, bytes)
}

#[tokio::test]
async fn test_healthcheck() {
    let app = test_app();
    let (status, body) = request(app.router, Method::GET, "/healthcheck", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "server is running");
}

#[tokio::test]
async fn test_init_creates_record_and_claim() {
    let app = test_app();
    let (status, body) = request(app.router.clone(), Method::POST, "/init/abc", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "session abc created successfully");

    let record = app.kv.get("session-abc").await.expect("record");
    assert_eq!(record.as_ref(), "{}".as_bytes());
    assert_eq!(app.cluster.claim_names(), vec!["session-abc".to_string()]);

    // the session lock was released
    assert!(app
        .kv
        .get(&lock_key("session-abc"))
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_create_publishes_hostname_and_persists_record() {
    let app = test_app();
    request(app.router.clone(), Method::POST, "/init/abc", None).await;

    let (status, _) = request(
        app.router.clone(),
        Method::POST,
        "/create/abc",
        Some(editor_body()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let ingress = app.cluster.ingress(INGRESS).expect("ingress");
    assert_eq!(ingress.rules.len(), 1);
    assert_eq!(ingress.rules[0].host, "session-abc.ide.test.dev");

    let record = app.kv.get("session-abc").await.expect("record");
    let stored: serde_json::Value = serde_json::from_slice(&record).expect("parse");
    assert_eq!(stored["sessionState"], "initialized");
    assert_eq!(
        stored["components"][0]["componentMetadata"]["url"],
        "session-abc.ide.test.dev"
    );

    // both locks were released
    assert!(app.kv.get(&lock_key("session-abc")).await.unwrap_err().is_not_found());
    assert!(app.kv.get(&lock_key("ingress")).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_create_with_malformed_body_is_bad_request() {
    let app = test_app();
    request(app.router.clone(), Method::POST, "/init/abc", None).await;

    let (status, body) = request(
        app.router,
        Method::POST,
        "/create/abc",
        Some(serde_json::json!({"components": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_create_twice_is_a_conflict() {
    let app = test_app();
    request(app.router.clone(), Method::POST, "/init/abc", None).await;
    request(
        app.router.clone(),
        Method::POST,
        "/create/abc",
        Some(editor_body()),
    )
    .await;

    let (status, body) = request(
        app.router,
        Method::POST,
        "/create/abc",
        Some(editor_body()),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("already populated"));
}

#[tokio::test]
async fn test_create_without_init_is_not_found() {
    let app = test_app();
    let (status, _) = request(
        app.router,
        Method::POST,
        "/create/ghost",
        Some(editor_body()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_refresh_reports_running_once_replicas_are_ready() {
    let app = test_app();
    request(app.router.clone(), Method::POST, "/init/abc", None).await;
    request(
        app.router.clone(),
        Method::POST,
        "/create/abc",
        Some(editor_body()),
    )
    .await;

    let (status, body) = request(app.router.clone(), Method::POST, "/refresh/abc", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["sessionState"], "initialized");

    app.cluster.set_ready_replicas("session-abc", 1);
    let (status, body) = request(app.router.clone(), Method::POST, "/refresh/abc", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["sessionState"], "running");

    // idempotent given a stable cluster
    let (_, again) = request(app.router, Method::POST, "/refresh/abc", None).await;
    assert_eq!(again["result"], body["result"]);
}

#[tokio::test]
async fn test_toggle_round_trip() {
    let app = test_app();
    request(app.router.clone(), Method::POST, "/init/abc", None).await;
    request(
        app.router.clone(),
        Method::POST,
        "/create/abc",
        Some(editor_body()),
    )
    .await;
    app.cluster.set_ready_replicas("session-abc", 1);
    request(app.router.clone(), Method::POST, "/refresh/abc", None).await;

    let (status, _) = request(app.router.clone(), Method::PATCH, "/toggle/abc", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!app.cluster.has_deployment("session-abc"));

    let (status, _) = request(app.router.clone(), Method::PATCH, "/toggle/abc", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.cluster.has_deployment("session-abc"));

    let record = app.kv.get("session-abc").await.expect("record");
    let stored: serde_json::Value = serde_json::from_slice(&record).expect("parse");
    assert_eq!(stored["sessionState"], "running");
}

#[tokio::test]
async fn test_toggle_while_initializing_is_a_conflict() {
    let app = test_app();
    request(app.router.clone(), Method::POST, "/init/abc", None).await;
    request(
        app.router.clone(),
        Method::POST,
        "/create/abc",
        Some(editor_body()),
    )
    .await;

    let (status, body) = request(app.router, Method::PATCH, "/toggle/abc", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("still initializing"));
}

#[tokio::test]
async fn test_statuses_projects_container_states() {
    let app = test_app();
    request(app.router.clone(), Method::POST, "/init/abc", None).await;
    request(
        app.router.clone(),
        Method::POST,
        "/create/abc",
        Some(editor_body()),
    )
    .await;
    app.cluster
        .set_container_state("session-abc", "ide", ContainerStateKind::Running);

    let (status, body) = request(app.router, Method::GET, "/statuses/abc", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["ide"], "ready");
}

#[tokio::test]
async fn test_logs_stream_emits_sse_events() {
    let app = test_app();
    request(app.router.clone(), Method::POST, "/init/abc", None).await;
    request(
        app.router.clone(),
        Method::POST,
        "/create/abc",
        Some(editor_body()),
    )
    .await;
    app.cluster.push_log("session-abc-0", "ide", "hello from the editor");

    let (status, bytes) = request_raw(app.router, Method::GET, "/logs/abc/ide", None).await;
    assert_eq!(status, StatusCode::OK);
    let body = String::from_utf8_lossy(&bytes);
    assert!(body.contains("event: logs"));
    assert!(body.contains("hello from the editor"));
}

#[tokio::test]
async fn test_logs_for_unknown_component_is_not_found() {
    let app = test_app();
    request(app.router.clone(), Method::POST, "/init/abc", None).await;
    request(
        app.router.clone(),
        Method::POST,
        "/create/abc",
        Some(editor_body()),
    )
    .await;

    let (status, _) = request(app.router, Method::GET, "/logs/abc/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_destroys_all_derived_objects() {
    let app = test_app();
    request(app.router.clone(), Method::POST, "/init/abc", None).await;
    request(
        app.router.clone(),
        Method::POST,
        "/create/abc",
        Some(editor_body()),
    )
    .await;

    let (status, _) = request(app.router.clone(), Method::DELETE, "/abc", None).await;
    assert_eq!(status, StatusCode::OK);

    assert!(app.kv.get("session-abc").await.unwrap_err().is_not_found());
    assert!(app.cluster.claim_names().is_empty());
    assert!(!app.cluster.has_deployment("session-abc"));
    assert!(!app.cluster.has_service("session-abc"));
    assert!(app.cluster.ingress(INGRESS).expect("ingress").rules.is_empty());

    // second delete: the session is gone
    let (status, _) = request(app.router, Method::DELETE, "/abc", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_after_partial_create_cleans_up() {
    let app = test_app();
    request(app.router.clone(), Method::POST, "/init/abc", None).await;

    app.cluster.inject_service_failure(true);
    let (status, _) = request(
        app.router.clone(),
        Method::POST,
        "/create/abc",
        Some(editor_body()),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    app.cluster.inject_service_failure(false);

    let (status, _) = request(app.router, Method::DELETE, "/abc", None).await;
    assert_eq!(status, StatusCode::OK);

    assert!(app.cluster.claim_names().is_empty());
    assert!(!app.cluster.has_service("session-abc"));
    assert!(app.cluster.ingress(INGRESS).expect("ingress").rules.is_empty());
    assert!(app.kv.get("session-abc").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_concurrent_creates_of_different_sessions_both_succeed() {
    let app = test_app();
    request(app.router.clone(), Method::POST, "/init/a", None).await;
    request(app.router.clone(), Method::POST, "/init/b", None).await;

    let (first, second) = tokio::join!(
        request(
            app.router.clone(),
            Method::POST,
            "/create/a",
            Some(editor_body()),
        ),
        request(
            app.router.clone(),
            Method::POST,
            "/create/b",
            Some(editor_body()),
        ),
    );
    assert_eq!(first.0, StatusCode::CREATED);
    assert_eq!(second.0, StatusCode::CREATED);

    // both sessions ended up in the shared ingress, in lock-arrival order
    let mut hosts: Vec<String> = app
        .cluster
        .ingress(INGRESS)
        .expect("ingress")
        .rules
        .into_iter()
        .map(|rule| rule.host)
        .collect();
    hosts.sort();
    assert_eq!(
        hosts,
        vec![
            "session-a.ide.test.dev".to_string(),
            "session-b.ide.test.dev".to_string()
        ]
    );
}

#[tokio::test]
async fn test_metrics_endpoint_renders() {
    let app = test_app();
    let (status, _) = request_raw(app.router, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_openapi_document_serves() {
    let app = test_app();
    let (status, body) = request(app.router, Method::GET, "/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["info"]["title"], "autodev");
}
