//! # CollectorConfig provider configuration
//!
//! Schema for the configuration embedded in the `providerConfig` field of
//! `Extension` resources of type `otelcol`, versioned as
//! `otelcol.extensions.gardener.cloud/v1alpha1`.

mod v1alpha1;
pub mod validation;

pub use v1alpha1::{
    CollectorConfig, CollectorConfigSpec, CollectorExportersConfig, CollectorLogsConfig,
    CollectorMetricsConfig, Compression, ConfigDecodeError, DebugExporterConfig,
    DebugExporterVerbosity, Duration, LogEncoding, LogLevel, MessageEncoding, MetricsLevel,
    OtlpGrpcExporterConfig, OtlpHttpExporterConfig, ResourceReference, ResourceReferenceDetails,
    RetryOnFailureConfig, TlsConfig, API_VERSION, DEFAULT_EXPORTER_CLIENT_READ_BUFFER_SIZE,
    DEFAULT_EXPORTER_CLIENT_TIMEOUT, DEFAULT_EXPORTER_CLIENT_WRITE_BUFFER_SIZE,
    DEFAULT_RETRY_INITIAL_INTERVAL, DEFAULT_RETRY_MAX_ELAPSED_TIME, DEFAULT_RETRY_MAX_INTERVAL,
    DEFAULT_RETRY_MULTIPLIER, KIND,
};
