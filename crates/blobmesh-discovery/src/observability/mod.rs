//! Observability Module
//!
//! - `events`: structured discovery events with consistent fields
//! - `metrics`: Prometheus metrics for cycles, peers and storage calls
//! - `tracing`: subscriber setup for the host binary

pub mod events;
pub mod metrics;
pub mod tracing;

pub use self::metrics::init_metrics;
pub use self::tracing::{init_tracing, TracingConfig};
