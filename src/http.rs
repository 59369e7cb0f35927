use crate::collectors::Collector;
use crate::metrics::Metrics;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub collector: Collector,
}

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotParams {
    #[serde(default)]
    pub refresh: bool,
}

pub fn build_router(metrics: Arc<Metrics>, collector: Collector) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .with_state(HttpAppState { metrics, collector })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn snapshot_handler(
    State(state): State<HttpAppState>,
    Query(params): Query<SnapshotParams>,
) -> impl IntoResponse {
    if params.refresh {
        state.collector.collect_dynamic().await;
    }
    Json(state.collector.snapshot().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{CollectorSettings, HostContext, Module};
    use crate::snapshot::Snapshot;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_collector(metrics: &Arc<Metrics>) -> Collector {
        let settings = CollectorSettings {
            active_modules: [Module::Kernel, Module::Datetime].into_iter().collect(),
            ..CollectorSettings::default()
        };
        Collector::with_host(settings, HostContext::for_tests(), Some(metrics.clone()))
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let metrics = Metrics::new().expect("инициализация метрик");
        let app = build_router(metrics.clone(), test_collector(&metrics));

        let (status, body) = get_body(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn metrics_counts_scrapes() {
        let metrics = Metrics::new().expect("инициализация метрик");
        let app = build_router(metrics.clone(), test_collector(&metrics));

        let (status, body) = get_body(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("netfetch_scrape_count_total 1"));
        assert!(text.contains("netfetch_uptime_seconds"));
    }

    #[tokio::test]
    async fn snapshot_refresh_runs_dynamic_pass() {
        let metrics = Metrics::new().expect("инициализация метрик");
        let collector = test_collector(&metrics);
        collector.collect_static().await;
        let app = build_router(metrics.clone(), collector);

        let (status, body) = get_body(app.clone(), "/api/snapshot").await;
        assert_eq!(status, StatusCode::OK);
        let snapshot: Snapshot = serde_json::from_slice(&body).unwrap();
        assert!(!snapshot.kernel.is_empty());
        assert!(snapshot.datetime.is_empty());
        assert!(snapshot.cpu.is_none());

        let (status, body) = get_body(app, "/api/snapshot?refresh=true").await;
        assert_eq!(status, StatusCode::OK);
        let snapshot: Snapshot = serde_json::from_slice(&body).unwrap();
        assert!(!snapshot.datetime.is_empty());
    }
}
