//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::scrape::{ScrapeError, ScrapeRequest, Scraper};

/// OpenMetrics text, as produced by `prometheus-client`.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Header Prometheus sets to the scrape timeout of the job.
pub const TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";

/// Query parameter selecting collectors; may be repeated.
const COLLECT_PARAM: &str = "collect[]";

#[derive(Clone)]
struct AppState {
    scraper: Arc<Scraper>,
}

/// Create the HTTP router.
pub fn create_router(scraper: Arc<Scraper>, metrics_path: &str) -> Router {
    let state = AppState { scraper };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Build a scrape request from the query string and headers.
///
/// `collect[]` values may also be comma separated. An unparsable timeout
/// header is ignored.
fn scrape_request(params: &[(String, String)], headers: &HeaderMap) -> ScrapeRequest {
    let collectors: Vec<String> = params
        .iter()
        .filter(|(key, _)| key == COLLECT_PARAM)
        .flat_map(|(_, value)| value.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    let timeout_hint = headers
        .get(TIMEOUT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| match value.trim().parse::<f64>() {
            Ok(secs) => Some(secs),
            Err(_) => {
                debug!(value, "Ignoring unparsable scrape timeout header");
                None
            }
        });

    ScrapeRequest {
        collectors: (!collectors.is_empty()).then_some(collectors),
        timeout_hint,
    }
}

async fn metrics_handler(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    let request = scrape_request(&params, &headers);

    match state.scraper.scrape(request).await {
        Ok(outcome) => (
            StatusCode::OK,
            [("content-type", CONTENT_TYPE)],
            outcome.body,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for ScrapeError {
    fn into_response(self) -> Response {
        let status = match &self {
            ScrapeError::TooManyRequests { .. } | ScrapeError::NoCollectors => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ScrapeError::UnknownCollector(_) => StatusCode::BAD_REQUEST,
            ScrapeError::Render(_) | ScrapeError::Join(_) => {
                error!(error = %self, "Scrape failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, format!("{}\n", self)).into_response()
    }
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let collectors: Vec<&str> = state.scraper.registry().names().collect();
    let limiter = state.scraper.limiter();

    Json(json!({
        "status": "ok",
        "collectors": collectors,
        "scrapes_in_flight": limiter.limit() - limiter.available(),
    }))
    .into_response()
}

/// HTTP server configuration.
pub struct HttpServer {
    scraper: Arc<Scraper>,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    pub fn new(scraper: Arc<Scraper>, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            scraper,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listen address and serve until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = create_router(self.scraper, &self.metrics_path);
        let addr = listener.local_addr()?;

        info!(
            addr = %addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        warn!("Shutdown channel closed");
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorRegistry;
    use crate::config::ScrapeConfig;
    use crate::demo::DemoReader;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use perfsight_perflib::Perflib;
    use tower::ServiceExt;

    fn make_scraper() -> Arc<Scraper> {
        let perflib = Perflib::from_reader(Arc::new(DemoReader::new(2))).unwrap();
        let registry = CollectorRegistry::build(
            &["memory".to_string(), "system".to_string()],
            crate::collectors::create,
        )
        .unwrap();
        Arc::new(Scraper::new(
            Arc::new(registry),
            perflib,
            &ScrapeConfig::default(),
            "windows",
        ))
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_scrape_request_parsing() {
        let params = vec![
            ("collect[]".to_string(), "cpu".to_string()),
            ("collect[]".to_string(), "memory, system".to_string()),
            ("other".to_string(), "x".to_string()),
        ];
        let mut headers = HeaderMap::new();
        headers.insert(TIMEOUT_HEADER, "15".parse().unwrap());

        let request = scrape_request(&params, &headers);

        assert_eq!(
            request.collectors,
            Some(vec!["cpu".into(), "memory".into(), "system".into()])
        );
        assert_eq!(request.timeout_hint, Some(15.0));
    }

    #[test]
    fn test_scrape_request_defaults() {
        let mut headers = HeaderMap::new();
        headers.insert(TIMEOUT_HEADER, "soon".parse().unwrap());

        let request = scrape_request(&[], &headers);

        assert!(request.collectors.is_none());
        assert!(request.timeout_hint.is_none());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let router = create_router(make_scraper(), "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("openmetrics-text"));

        let body = body_string(response).await;
        assert!(body.contains("windows_system_threads 2400.0"));
        assert!(body.contains("windows_exporter_collector_success{collector=\"memory\"} 1.0"));
        assert!(body.ends_with("# EOF\n"));
    }

    #[tokio::test]
    async fn test_huge_timeout_header_is_served() {
        let router = create_router(make_scraper(), "/metrics");

        let response = router
            .oneshot(
                Request::get("/metrics")
                    .header(TIMEOUT_HEADER, "1e300")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("windows_exporter_collector_timeout{collector=\"system\"} 0.0"));
    }

    #[tokio::test]
    async fn test_collect_param_limits_output() {
        let router = create_router(make_scraper(), "/metrics");

        let response = router
            .oneshot(
                Request::get("/metrics?collect[]=system")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("windows_system_processes"));
        assert!(!body.contains("windows_memory_"));
    }

    #[tokio::test]
    async fn test_unknown_collector_is_bad_request() {
        let router = create_router(make_scraper(), "/metrics");

        let response = router
            .oneshot(
                Request::get("/metrics?collect[]=gpu")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("gpu"));
    }

    #[tokio::test]
    async fn test_rejected_scrape_is_unavailable() {
        let scraper = make_scraper();
        let _held: Vec<_> = (0..scraper.limiter().limit())
            .map(|_| scraper.limiter().try_admit().unwrap())
            .collect();
        let router = create_router(scraper, "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(make_scraper(), "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let health: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["collectors"], json!(["memory", "system"]));
        assert_eq!(health["scrapes_in_flight"], 0);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = create_router(make_scraper(), "/prometheus/metrics");

        let response = router
            .clone()
            .oneshot(
                Request::get("/prometheus/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
