//! Prometheus metrics exporter for Axis network cameras.
//!
//! On each scrape the exporter queries one camera's VAPIX API for its model
//! number and its temperature sensor and heater status, and answers with the
//! resulting gauges in the Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Axis camera   │<────│  Scrape handler │<────│   Prometheus    │
//! │   (axis-cgi)    │────>│ parse + mapping │────>│   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! AXIS_USERNAME=root AXIS_PASSWORD=pass axis-exporter-prometheus
//! curl 'http://localhost:9312/metrics?camera_host=10.0.0.5&camera_port=80&camera_proto=http'
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod collector;
pub mod config;
pub mod device;
pub mod http;
pub mod mapping;
pub mod scrape;

pub use collector::{MetricCollector, SharedCollector};
pub use config::{Credentials, ExporterConfig};
pub use device::AxisClient;
pub use http::{AppState, HttpServer};
pub use scrape::{ScrapeError, ScrapeRequest};
