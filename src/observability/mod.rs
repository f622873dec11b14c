//! # Observability
//!
//! Metrics, probe endpoints and logging setup for the controller itself.

pub mod logging;
pub mod metrics;
pub mod server;

pub use server::{start_health_server, start_metrics_server, ServerState};
