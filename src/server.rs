// ============================================================================
// HTTP CONTROL SURFACE
// ============================================================================
// Plain-text endpoints for starting, stopping and reporting on collectors.
// Every handler is a thin shim over `AuditEngine`.
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::dispatch::CollectorKind;
use crate::engine::{AuditEngine, ReportOptions};
use crate::error::{AuditError, AuditResult};
use crate::helpers::{flag_or, parse_runtime};
use crate::ENGINE_FULL_NAME;

type Params = Query<HashMap<String, String>>;

const HELP: &str = "\
Audit Nozzle control surface

  /measurelogs?runtime=10m          count log messages per application
  /reportlogs?showguid=false        log report, optionally with application ids
  /measuretags?runtime=10m          count envelope tags
  /reporttags?showjobs=false        tag report, optionally split by job
  /measuremetrics?runtime=10m       measure metric emission intervals
  /reportmetricintervals?consolidated=true
  /reportmetricdocs                 observed metrics against the manifest
  /measurelatency?runtime=10m       envelope latency histogram
  /reportlatency
  /measureloghist?runtime=10m       log message length histogram
  /reportloghist
  /stop?collector=logs              logs, tags, metrics, latency or loghist
  /status                           one status line per collector
  /reset                            stop and clear every collector
  /metrics                          engine self-telemetry (Prometheus)

runtime accepts durations such as 90s, 10m or 1h30m. A missing, zero or
invalid value uses the configured default.
";

// ----------------------------------------------------------------------------
// Error Responses
// ----------------------------------------------------------------------------

struct ApiError(AuditError);

impl From<AuditError> for ApiError {
    fn from(e: AuditError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AuditError::AlreadyRunning { .. } => StatusCode::CONFLICT,
            AuditError::UnknownCollector(_) => StatusCode::BAD_REQUEST,
            AuditError::SourceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if self.0.is_recoverable() {
            warn!(target: "auditnozzle::server", category = self.0.category(), error = %self.0, "Request failed");
        } else {
            error!(target: "auditnozzle::server", category = self.0.category(), error = %self.0, "Request failed");
        }
        (status, format!("{}\n", self.0)).into_response()
    }
}

type ApiResult = Result<String, ApiError>;

// ----------------------------------------------------------------------------
// Router
// ----------------------------------------------------------------------------

pub fn router(engine: Arc<AuditEngine>) -> Router {
    Router::new()
        .route("/", get(help))
        .route("/measurelogs", get(measure_logs))
        .route("/reportlogs", get(report_logs))
        .route("/measuretags", get(measure_tags))
        .route("/reporttags", get(report_tags))
        .route("/measuremetrics", get(measure_metrics))
        .route("/reportmetricintervals", get(report_metric_intervals))
        .route("/reportmetricdocs", get(report_metric_docs))
        .route("/measurelatency", get(measure_latency))
        .route("/reportlatency", get(report_latency))
        .route("/measureloghist", get(measure_loghist))
        .route("/reportloghist", get(report_loghist))
        .route("/stop", get(stop))
        .route("/status", get(status))
        .route("/reset", get(reset))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Bind the configured address and serve until `shutdown` fires.
pub async fn serve(engine: Arc<AuditEngine>, shutdown: CancellationToken) -> AuditResult<()> {
    let addr = format!("{}:{}", engine.config().server.host, engine.config().server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(target: "auditnozzle::server", address = %addr, "{} listening", ENGINE_FULL_NAME);

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!(target: "auditnozzle::server", "Control surface stopped");
    Ok(())
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

async fn help() -> &'static str {
    HELP
}

async fn measure(engine: &AuditEngine, kind: CollectorKind, params: &HashMap<String, String>) -> ApiResult {
    let runtime = parse_runtime(params.get("runtime").map(String::as_str), engine.default_runtime());
    let ack = engine.start_scan(kind, runtime).await?;
    Ok(format!("{ack}\n"))
}

async fn measure_logs(State(engine): State<Arc<AuditEngine>>, Query(p): Params) -> ApiResult {
    measure(&engine, CollectorKind::Logs, &p).await
}

async fn report_logs(State(engine): State<Arc<AuditEngine>>, Query(p): Params) -> String {
    let options = ReportOptions {
        show_ids: flag_or(p.get("showguid").map(String::as_str), false),
        ..ReportOptions::default()
    };
    engine.report(CollectorKind::Logs, options)
}

async fn measure_tags(State(engine): State<Arc<AuditEngine>>, Query(p): Params) -> ApiResult {
    measure(&engine, CollectorKind::Tags, &p).await
}

async fn report_tags(State(engine): State<Arc<AuditEngine>>, Query(p): Params) -> String {
    let options = ReportOptions {
        show_jobs: flag_or(p.get("showjobs").map(String::as_str), false),
        ..ReportOptions::default()
    };
    engine.report(CollectorKind::Tags, options)
}

async fn measure_metrics(State(engine): State<Arc<AuditEngine>>, Query(p): Params) -> ApiResult {
    measure(&engine, CollectorKind::Metrics, &p).await
}

async fn report_metric_intervals(State(engine): State<Arc<AuditEngine>>, Query(p): Params) -> String {
    let options = ReportOptions {
        consolidated: flag_or(p.get("consolidated").map(String::as_str), true),
        ..ReportOptions::default()
    };
    engine.report(CollectorKind::Metrics, options)
}

async fn report_metric_docs(State(engine): State<Arc<AuditEngine>>) -> ApiResult {
    Ok(engine.report_manifest().await?)
}

async fn measure_latency(State(engine): State<Arc<AuditEngine>>, Query(p): Params) -> ApiResult {
    measure(&engine, CollectorKind::Latency, &p).await
}

async fn report_latency(State(engine): State<Arc<AuditEngine>>) -> String {
    engine.report(CollectorKind::Latency, ReportOptions::default())
}

async fn measure_loghist(State(engine): State<Arc<AuditEngine>>, Query(p): Params) -> ApiResult {
    measure(&engine, CollectorKind::LogLength, &p).await
}

async fn report_loghist(State(engine): State<Arc<AuditEngine>>) -> String {
    engine.report(CollectorKind::LogLength, ReportOptions::default())
}

async fn stop(State(engine): State<Arc<AuditEngine>>, Query(p): Params) -> ApiResult {
    let raw = p.get("collector").map(String::as_str).unwrap_or_default();
    let kind: CollectorKind = raw.parse()?;
    let text = match engine.stop_scan(kind).await? {
        Some(outcome) => format!("{kind}: stopped after {}\n", humantime::format_duration(outcome.runtime)),
        None => format!("{kind}: not running\n"),
    };
    Ok(text)
}

async fn status(State(engine): State<Arc<AuditEngine>>) -> String {
    engine.status_text()
}

async fn reset(State(engine): State<Arc<AuditEngine>>) -> ApiResult {
    engine.reset_all().await?;
    Ok("All collectors reset\n".to_string())
}

async fn metrics(State(engine): State<Arc<AuditEngine>>) -> Result<Response, ApiError> {
    let body = engine.telemetry().encode()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}
