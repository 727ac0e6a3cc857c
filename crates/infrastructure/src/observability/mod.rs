//! Observability module
//!
//! Metrics collection and Prometheus export. Logging setup lives in `taskfarm_core::logging`.

pub mod metrics_collector;

pub use metrics_collector::{install_prometheus_recorder, MetricsCollector};
