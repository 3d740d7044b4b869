//! Integration tests for the exporter.
//!
//! These run full scrapes against the demo performance data source, through
//! the scraper directly and over HTTP.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use perfsight_exporter::config::ScrapeConfig;
use perfsight_exporter::sink::MetricSink;
use perfsight_exporter::{
    Collector, CollectorError, CollectorRegistry, DemoReader, HttpServer, ScrapeContext,
    ScrapeError, ScrapeRequest, Scraper, collectors, create_router,
};
use perfsight_perflib::Perflib;
use tokio::sync::watch;
use tower::ServiceExt;

/// Always fails after writing a sample, which must not reach the output.
struct Broken;

impl Collector for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn perf_counters(&self) -> &'static [&'static str] {
        &["Memory"]
    }

    fn collect(&self, _ctx: &ScrapeContext, sink: &mut MetricSink) -> Result<(), CollectorError> {
        sink.gauge("broken_partial", "Partial output", &[], 1.0);
        Err(CollectorError::Failed {
            collector: "broken",
            reason: "simulated failure".to_string(),
        })
    }
}

/// Panics in the middle of collection.
struct Panicking;

impl Collector for Panicking {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn perf_counters(&self) -> &'static [&'static str] {
        &["Memory"]
    }

    fn collect(&self, _ctx: &ScrapeContext, sink: &mut MetricSink) -> Result<(), CollectorError> {
        sink.gauge("panicking_partial", "Partial output", &[], 1.0);
        panic!("collector bug");
    }
}

/// Sleeps during collection so scrapes stay in flight.
struct Slow(Duration);

impl Collector for Slow {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn perf_counters(&self) -> &'static [&'static str] {
        &["System"]
    }

    fn collect(&self, _ctx: &ScrapeContext, sink: &mut MetricSink) -> Result<(), CollectorError> {
        std::thread::sleep(self.0);
        sink.gauge("slow_done", "Finished", &[], 1.0);
        Ok(())
    }
}

fn demo_perflib() -> Perflib {
    Perflib::from_reader(Arc::new(DemoReader::new(2))).unwrap()
}

fn all_collectors() -> CollectorRegistry {
    let enabled: Vec<String> = collectors::AVAILABLE.iter().map(|s| s.to_string()).collect();
    CollectorRegistry::build(&enabled, collectors::create).unwrap()
}

fn scraper_with(registry: CollectorRegistry, config: &ScrapeConfig) -> Arc<Scraper> {
    Arc::new(Scraper::new(
        Arc::new(registry),
        demo_perflib(),
        config,
        "windows",
    ))
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_full_scrape_of_demo_source() {
    let scraper = scraper_with(all_collectors(), &ScrapeConfig::default());

    let outcome = scraper.scrape(ScrapeRequest::default()).await.unwrap();

    assert_eq!(
        outcome.succeeded,
        vec!["cpu", "logical_disk", "memory", "system"]
    );
    assert!(outcome.failed.is_empty());
    assert!(outcome.timed_out.is_empty());

    let body = &outcome.body;
    assert!(body.contains("# TYPE windows_cpu_time counter"));
    assert!(body.contains("windows_cpu_time_total{core=\"0,1\",mode=\"idle\"}"));
    assert!(body.contains("windows_logical_disk_free_bytes{volume=\"D:\"}"));
    assert!(body.contains("windows_memory_commit_limit 25769803776.0"));
    assert!(body.contains("windows_system_processes 180.0"));
    assert!(body.contains("windows_exporter_collector_success{collector=\"logical_disk\"} 1.0"));
    assert!(body.ends_with("# EOF\n"));
}

#[tokio::test]
async fn test_failed_collector_output_is_discarded() {
    let mut registry = all_collectors();
    registry.register(Box::new(Broken));
    let scraper = scraper_with(registry, &ScrapeConfig::default());

    let outcome = scraper
        .scrape(ScrapeRequest {
            collectors: Some(vec!["broken".to_string(), "memory".to_string()]),
            timeout_hint: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, vec!["memory"]);
    assert_eq!(outcome.failed, vec!["broken"]);
    assert!(!outcome.body.contains("broken_partial"));
    assert!(outcome.body.contains("windows_memory_available_bytes"));
    assert!(outcome.body.contains("windows_exporter_collector_success{collector=\"broken\"} 0.0"));
    assert!(!outcome.body.contains("windows_cpu_"));
}

#[tokio::test]
async fn test_panicking_collector_fails_alone() {
    let mut registry = all_collectors();
    registry.register(Box::new(Panicking));
    let scraper = scraper_with(registry, &ScrapeConfig::default());

    let outcome = scraper
        .scrape(ScrapeRequest {
            collectors: Some(vec!["panicking".to_string(), "system".to_string()]),
            timeout_hint: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, vec!["system"]);
    assert_eq!(outcome.failed, vec!["panicking"]);
    assert!(!outcome.body.contains("panicking_partial"));
    assert!(outcome.body.contains("windows_system_threads 2400.0"));
    assert!(outcome.body.contains("windows_exporter_collector_success{collector=\"panicking\"} 0.0"));
    assert_eq!(scraper.limiter().available(), scraper.limiter().limit());
}

#[tokio::test]
async fn test_excess_scrapes_rejected_not_queued() {
    let mut registry = CollectorRegistry::new();
    registry.register(Box::new(Slow(Duration::from_millis(200))));
    let config = ScrapeConfig {
        max_requests: 2,
        ..ScrapeConfig::default()
    };
    let scraper = scraper_with(registry, &config);

    let (a, b, c) = tokio::join!(
        scraper.scrape(ScrapeRequest::default()),
        scraper.scrape(ScrapeRequest::default()),
        scraper.scrape(ScrapeRequest::default()),
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert!(matches!(c, Err(ScrapeError::TooManyRequests { limit: 2 })));
    assert_eq!(scraper.limiter().available(), 2);

    // Slots are released once the scrapes finish.
    assert!(scraper.scrape(ScrapeRequest::default()).await.is_ok());
}

#[tokio::test]
async fn test_deadline_skips_remaining_collectors() {
    let mut registry = CollectorRegistry::new();
    registry.register(Box::new(Slow(Duration::from_millis(300))));
    registry.register(Box::new(Broken));
    let config = ScrapeConfig {
        timeout_margin_secs: 0.0,
        ..ScrapeConfig::default()
    };
    let scraper = scraper_with(registry, &config);

    let outcome = scraper
        .scrape(ScrapeRequest {
            collectors: Some(vec!["slow".to_string(), "broken".to_string()]),
            timeout_hint: Some(0.1),
        })
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, vec!["slow"]);
    assert_eq!(outcome.timed_out, vec!["broken"]);
    assert!(outcome.body.contains("windows_slow_done 1.0"));
}

#[tokio::test]
async fn test_http_status_mapping() {
    let scraper = scraper_with(all_collectors(), &ScrapeConfig::default());
    let router = create_router(scraper.clone(), "/metrics");

    let response = router
        .clone()
        .oneshot(
            Request::get("/metrics?collect[]=cpu&collect[]=nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router
        .clone()
        .oneshot(
            Request::get("/metrics?collect[]=cpu")
                .header("X-Prometheus-Scrape-Timeout-Seconds", "10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("windows_cpu_logical_processor 2.0"));
    assert!(!body.contains("windows_memory_"));

    let empty = Arc::new(Scraper::new(
        Arc::new(CollectorRegistry::new()),
        demo_perflib(),
        &ScrapeConfig::default(),
        "windows",
    ));
    let response = create_router(empty, "/metrics")
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_http_server_end_to_end() {
    let scraper = scraper_with(all_collectors(), &ScrapeConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = HttpServer::new(scraper, addr, "/metrics".to_string());
    let server_handle = tokio::spawn(async move { server.serve(listener, shutdown_rx).await });

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("application/openmetrics-text")
    );
    let body = response.text().await.unwrap();
    assert!(body.contains("windows_system_threads 2400.0"));

    let health = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), server_handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
