//! OpenTelemetry Collector Extension Controller
//!
//! This library provides the core functionality for the otelcol extension
//! controller: decoding the `CollectorConfig` carried by `Extension`
//! resources, deriving the desired object graph for the Collector and the
//! Target Allocator, and applying it through a managed resource.
//!
//! ## Quick Start
//!
//! ```rust
//! use otelcol_extension_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific
//! imports, use the individual modules.

pub mod cli;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod version;
