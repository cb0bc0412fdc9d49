//! Control surface driven through the router without a socket.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use rstest::rstest;
use tower::ServiceExt;

use audit_nozzle::config::AuditConfig;
use audit_nozzle::resolver::NoopResolver;
use audit_nozzle::server::router;
use audit_nozzle::source::MemorySource;
use audit_nozzle::{AuditEngine, CollectorKind, Envelope};

fn engine(source: MemorySource) -> Arc<AuditEngine> {
    Arc::new(AuditEngine::new(AuditConfig::default(), Arc::new(source), Arc::new(NoopResolver)).unwrap())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn help_page() {
    let app = router(engine(MemorySource::default()));
    let (status, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("/reportmetricintervals?consolidated=true"));
}

#[rstest]
#[case("/reportlogs", "No log data collected")]
#[case("/reporttags?showjobs=true", "No tag data collected")]
#[case("/reportmetricintervals", "No metric data collected")]
#[case("/reportmetricdocs", "No metric data collected")]
#[case("/reportlatency", "No histogram data recorded")]
#[case("/reportloghist", "No histogram data recorded")]
#[tokio::test]
async fn empty_reports(#[case] uri: &str, #[case] expected: &str) {
    let app = router(engine(MemorySource::default()));
    let (status, body) = get(&app, uri).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.ends_with(&format!("{expected}\n")), "{body}");
}

#[tokio::test]
async fn measure_then_report_tags() {
    let engine = engine(MemorySource::new(vec![
        Envelope::log("g", "APP", "m").with_origin("rep").with_tag("deployment", "cf"),
        Envelope::log("g", "APP", "m").with_origin("rep").with_tag("deployment", "cf"),
        Envelope::log("g", "APP", "m").with_origin("rep"),
    ]));
    let app = router(engine.clone());

    let (status, body) = get(&app, "/measuretags?runtime=45s").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Count Tags: runtime 45s\n");

    engine.wait_scan(CollectorKind::Tags).await.unwrap();

    let (_, body) = get(&app, "/reporttags").await;
    assert!(body.contains("Tags map   1, tagged messages        2 out of        3 messages"), "{body}");
}

#[tokio::test]
async fn invalid_runtime_uses_default() {
    let app = router(engine(MemorySource::new(vec![]).keep_open()));
    let (_, body) = get(&app, "/measurelatency?runtime=soon").await;
    assert_eq!(body, "Envelope Latency: runtime 10m\n");

    let (status, body) = get(&app, "/measurelatency").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.starts_with("Envelope Latency scanner already running"), "{body}");

    let (status, body) = get(&app, "/stop?collector=latency").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("Envelope Latency: stopped after"), "{body}");

    let (_, body) = get(&app, "/stop?collector=latency").await;
    assert_eq!(body, "Envelope Latency: not running\n");
}

#[tokio::test]
async fn stop_rejects_unknown_collector() {
    let app = router(engine(MemorySource::default()));
    let (status, _) = get(&app, "/stop?collector=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(&app, "/stop").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_reset_and_metrics() {
    let engine = engine(MemorySource::new(vec![Envelope::log("g", "APP", "hello")]).keep_open());
    let app = router(engine.clone());

    get(&app, "/measureloghist?runtime=1h").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (_, status) = get(&app, "/status").await;
    assert_eq!(status.lines().count(), 5);
    assert!(status.lines().any(|l| l.starts_with("Log Length Histogram") && l.contains("|01:00:00")));

    let (_, metrics) = get(&app, "/metrics").await;
    assert!(metrics.contains("auditnozzle_scans_started_total{collector=\"loghist\"} 1"));

    let (status, body) = get(&app, "/reset").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "All collectors reset\n");
    assert!(engine.status().iter().all(|s| !s.running));
    assert_eq!(engine.aggregators().log_length.snapshot().count, 0);
}
