//! # Prelude
//!
//! Re-exports commonly used types for convenience.
//!
//! ```rust
//! use otelcol_extension_controller::prelude::*;
//! ```

// Gardener-facing CR types
pub use crate::crd::*;

// Collector configuration types
pub use crate::config::{
    CollectorConfig, CollectorConfigSpec, Compression, DebugExporterVerbosity, LogEncoding,
    LogLevel, MessageEncoding, MetricsLevel, OtlpGrpcExporterConfig, OtlpHttpExporterConfig,
    TlsConfig,
};

// Controller building blocks
pub use crate::controller::{
    Actuator, ActuatorError, ExtensionController, Heartbeat, LifecycleActuator, ObjectGraph,
    ObjectRegistry, SecretsManager,
};

// Runtime entry points
pub use crate::runtime::{run_watch_loop, LeaderElection};

// Well-known names and ports
pub use crate::constants;
