//! Prometheus metrics backend for the BEEN orchestrator.
//!
//! [`PrometheusMetrics`] implements [`been_core::MetricsBackend`] on top of its
//! own [`Registry`].
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use been_core::MetricsBackend;
//! use been_prometheus::{Encoder, PrometheusMetrics, TextEncoder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::new()?;
//! let backend: Arc<dyn MetricsBackend> = Arc::new(metrics.clone());
//! backend.record_task_submitted();
//!
//! let mut buf = Vec::new();
//! TextEncoder::new().encode(&metrics.gather(), &mut buf)?;
//! assert!(String::from_utf8(buf)?.contains("been_tasks_submitted_total 1"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics
//! - `been_tasks_submitted_total` - Counter
//! - `been_schedule_total{outcome}` - Counter
//! - `been_task_transitions_total{state}` - Counter
//! - `been_illegal_transitions_total{from, to}` - Counter
//! - `been_backlog_size` - Gauge
//!
//! No HTTP endpoint is provided; serve [`PrometheusMetrics::gather`] from
//! whatever server the application already runs.

mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
