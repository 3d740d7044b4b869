//! Prometheus exporter for Windows performance counters.
//!
//! Every scrape takes one performance data snapshot covering the selected
//! collectors, lets each collector turn its objects into metrics, and encodes
//! the result in the OpenMetrics text format.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   HTTP Server   │────>│     Scraper     │────>│    Perflib      │
//! │   (/metrics)    │     │ (limit, deadline│     │   (snapshot)    │
//! └─────────────────┘     │  dispatch)      │     └─────────────────┘
//!                         └────────┬────────┘
//!                                  │
//!                         ┌────────v────────┐
//!                         │   Collectors    │
//!                         │ (cpu, memory..) │
//!                         └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! perfsight-exporter --config config.json5
//! perfsight-exporter --demo --listen 127.0.0.1:9182
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod collector;
pub mod collectors;
pub mod config;
pub mod demo;
pub mod http;
pub mod scrape;
pub mod sink;

pub use collector::{Collector, CollectorError, CollectorRegistry, ScrapeContext};
pub use config::ExporterConfig;
pub use demo::DemoReader;
pub use http::{HttpServer, create_router};
pub use scrape::{ConcurrencyLimiter, ScrapeError, ScrapeOutcome, ScrapeRequest, Scraper};
pub use sink::MetricSink;
