//! Gateway HTTP pipeline tests
//!
//! Drive the full ingestion pipeline (method, path, auth, decode, publish)
//! through the router with an in-memory publisher standing in for the
//! broker session.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use logriver::config::HttpConfig;
use logriver::gateway::GatewayServer;
use logriver::metrics::RelayMetrics;
use logriver::types::{LogRecord, Publisher, DEFAULT_TYPE};
use tokio::sync::Mutex;
use tower::ServiceExt;

const LINE_A: &str = r#"{"@timestamp":"2020-01-01T00:00:00Z","msg":"a"}"#;
const LINE_B: &str = r#"{"@timestamp":"2020-01-01T00:00:01Z","msg":"b"}"#;
const LINE_C: &str = r#"{"@timestamp":"2020-01-01T00:00:02Z","msg":"c"}"#;

/// Publisher stub that records every bulk it is handed
#[derive(Default)]
struct CapturePublisher {
    bulks: Mutex<Vec<Vec<LogRecord>>>,
}

#[async_trait]
impl Publisher for CapturePublisher {
    async fn start(&self) -> Result<()> {
        Ok(())
    }
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
    async fn publish(&self, bulk: Vec<LogRecord>) -> Result<()> {
        self.bulks.lock().await.push(bulk);
        Ok(())
    }
}

/// Publisher stub with no connected channel
struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    async fn start(&self) -> Result<()> {
        Ok(())
    }
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
    async fn publish(&self, _bulk: Vec<LogRecord>) -> Result<()> {
        anyhow::bail!("broker channel unavailable")
    }
}

fn server(publisher: Arc<dyn Publisher>, metrics: Arc<RelayMetrics>) -> GatewayServer {
    let mut api_keys = HashMap::new();
    api_keys.insert("devops-secret".to_string(), vec!["app-*".to_string()]);
    let config = HttpConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        api_keys,
        timeout_secs: 5,
    };
    GatewayServer::new(config, publisher, metrics)
}

fn post(uri: &str, auth: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(auth) = auth {
        builder = builder.header("Authorization", auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_valid_submission_is_accepted_and_published() {
    let publisher = Arc::new(CapturePublisher::default());
    let metrics = RelayMetrics::shared();
    let router = server(publisher.clone(), Arc::clone(&metrics)).router();

    let body = format!("{}\n{}\n{}\n", LINE_A, LINE_B, LINE_C);
    let response = router
        .oneshot(post("/logs/App-1/mytype", Some("ELK devops-secret"), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bulks = publisher.bulks.lock().await;
    assert_eq!(bulks.len(), 1);
    assert_eq!(bulks[0].len(), 3);
    for record in &bulks[0] {
        assert_eq!(record.index, "app-1");
        assert_eq!(record.doc_type, "mytype");
    }
    assert_eq!(bulks[0][0].body.as_ref(), LINE_A.as_bytes());
    assert_eq!(bulks[0][1].body.as_ref(), LINE_B.as_bytes());
    assert_eq!(bulks[0][2].body.as_ref(), LINE_C.as_bytes());
    drop(bulks);

    assert_eq!(metrics.http_200.get(), 1);
}

#[tokio::test]
async fn test_type_defaults_when_omitted() {
    let publisher = Arc::new(CapturePublisher::default());
    let router = server(publisher.clone(), RelayMetrics::shared()).router();

    let response = router
        .oneshot(post("/logs/app-1", Some("ELK devops-secret"), LINE_A))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bulks = publisher.bulks.lock().await;
    assert_eq!(bulks[0][0].doc_type, DEFAULT_TYPE);
}

#[tokio::test]
async fn test_extraneous_slashes_are_tolerated() {
    let publisher = Arc::new(CapturePublisher::default());
    let router = server(publisher.clone(), RelayMetrics::shared()).router();

    let response = router
        .oneshot(post("/logs//app-1///mytype//", Some("ELK devops-secret"), LINE_A))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_non_post_is_405() {
    let router = server(Arc::new(CapturePublisher::default()), RelayMetrics::shared()).router();
    let request = Request::builder()
        .method("GET")
        .uri("/logs/app-1")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_bad_paths_are_400() {
    let metrics = RelayMetrics::shared();
    let publisher: Arc<dyn Publisher> = Arc::new(CapturePublisher::default());
    for uri in ["/metrics/app-1", "/logs/app-1/t/extra", "/"] {
        let router = server(publisher.clone(), Arc::clone(&metrics)).router();
        let response = router
            .oneshot(post(uri, Some("ELK devops-secret"), LINE_A))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri {}", uri);
    }
}

#[tokio::test]
async fn test_authorization_ladder() {
    let publisher: Arc<dyn Publisher> = Arc::new(CapturePublisher::default());
    let cases = [
        (None, StatusCode::UNAUTHORIZED),
        (Some("devops-secret"), StatusCode::UNAUTHORIZED),
        (Some("Bearer devops-secret"), StatusCode::UNAUTHORIZED),
        (Some("ELK unknown"), StatusCode::UNAUTHORIZED),
    ];
    for (auth, expected) in cases {
        let router = server(publisher.clone(), RelayMetrics::shared()).router();
        let response = router.oneshot(post("/logs/app-1", auth, LINE_A)).await.unwrap();
        assert_eq!(response.status(), expected, "auth {:?}", auth);
    }

    // Known key, index outside its patterns
    let router = server(publisher.clone(), RelayMetrics::shared()).router();
    let response = router
        .oneshot(post("/logs/web-1", Some("ELK devops-secret"), LINE_A))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_all_bad_lines_is_400() {
    let router = server(Arc::new(CapturePublisher::default()), RelayMetrics::shared()).router();
    let response = router
        .oneshot(post(
            "/logs/app-1",
            Some("ELK devops-secret"),
            "garbage\n{\"no_timestamp\":true}\n",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_partially_bad_body_is_accepted() {
    let publisher = Arc::new(CapturePublisher::default());
    let router = server(publisher.clone(), RelayMetrics::shared()).router();

    let body = format!("garbage\n{}\n", LINE_A);
    let response = router
        .oneshot(post("/logs/app-1", Some("ELK devops-secret"), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bulks = publisher.bulks.lock().await;
    assert_eq!(bulks[0].len(), 1);
}

#[tokio::test]
async fn test_publish_failure_is_500() {
    let metrics = RelayMetrics::shared();
    let router = server(Arc::new(FailingPublisher), Arc::clone(&metrics)).router();
    let response = router
        .oneshot(post("/logs/app-1", Some("ELK devops-secret"), LINE_A))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(metrics.http_500.get(), 1);
}
