//! v1alpha1 version of the collector configuration types.
//!
//! Defaults are applied during deserialization, so a decoded config is
//! always fully populated. Unknown fields are rejected, matching the strict
//! decoding of the platform codecs.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// API version under which the configuration is accepted.
pub const API_VERSION: &str = "otelcol.extensions.gardener.cloud/v1alpha1";

/// Kind under which the configuration is accepted.
pub const KIND: &str = "CollectorConfig";

/// Errors raised while decoding a provider configuration payload.
#[derive(Debug, Error)]
pub enum ConfigDecodeError {
    #[error("invalid provider spec configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported provider config {api_version}/{kind}, expected {expected_api_version}/{expected_kind}")]
    UnsupportedType {
        api_version: String,
        kind: String,
        expected_api_version: &'static str,
        expected_kind: &'static str,
    },
}

/// Duration carried as a humantime string (`30s`, `5m`), the format the
/// collector configuration itself uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(pub std::time::Duration);

impl Duration {
    pub const fn from_secs(secs: u64) -> Self {
        Self(std::time::Duration::from_secs(secs))
    }

    pub fn as_std(&self) -> std::time::Duration {
        self.0
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw)
            .map(Duration)
            .map_err(serde::de::Error::custom)
    }
}

/// Minimum enabled logging level of the collector's internal logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Debug => "DEBUG",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

/// Encoding of the collector's internal logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogEncoding {
    Console,
    Json,
}

impl LogEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Json => "json",
        }
    }
}

impl Default for LogEncoding {
    fn default() -> Self {
        Self::Console
    }
}

/// Level of detail of the collector's internal telemetry metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsLevel {
    None,
    Basic,
    Normal,
    Detailed,
}

impl MetricsLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic => "basic",
            Self::Normal => "normal",
            Self::Detailed => "detailed",
        }
    }
}

impl Default for MetricsLevel {
    fn default() -> Self {
        Self::Basic
    }
}

/// Encoding used by exporters for outgoing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageEncoding {
    Proto,
    Json,
}

impl MessageEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proto => "proto",
            Self::Json => "json",
        }
    }
}

impl Default for MessageEncoding {
    fn default() -> Self {
        Self::Proto
    }
}

/// Compression applied by exporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Zstd,
    Snappy,
    None,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Snappy => "snappy",
            Self::None => "none",
        }
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self::Gzip
    }
}

/// Verbosity of the debug exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugExporterVerbosity {
    Basic,
    Normal,
    Detailed,
}

impl DebugExporterVerbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Normal => "normal",
            Self::Detailed => "detailed",
        }
    }
}

impl Default for DebugExporterVerbosity {
    fn default() -> Self {
        Self::Basic
    }
}

/// Default initial interval to wait after the first failure before retrying.
pub const DEFAULT_RETRY_INITIAL_INTERVAL: Duration = Duration::from_secs(5);
/// Default upper bound on backoff.
pub const DEFAULT_RETRY_MAX_INTERVAL: Duration = Duration::from_secs(30);
/// Default maximum amount of time spent trying to send a batch.
pub const DEFAULT_RETRY_MAX_ELAPSED_TIME: Duration = Duration::from_secs(300);
/// Default factor by which the retry interval is multiplied on each attempt.
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 1.5;
/// Default client timeout for requests made by exporters.
pub const DEFAULT_EXPORTER_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default read buffer size for the client used by exporters.
pub const DEFAULT_EXPORTER_CLIENT_READ_BUFFER_SIZE: i64 = 0;
/// Default write buffer size for the client used by exporters.
pub const DEFAULT_EXPORTER_CLIENT_WRITE_BUFFER_SIZE: i64 = 512 * 1024;

fn default_retry_enabled() -> Option<bool> {
    Some(true)
}

fn default_retry_initial_interval() -> Duration {
    DEFAULT_RETRY_INITIAL_INTERVAL
}

fn default_retry_max_interval() -> Duration {
    DEFAULT_RETRY_MAX_INTERVAL
}

fn default_retry_max_elapsed_time() -> Duration {
    DEFAULT_RETRY_MAX_ELAPSED_TIME
}

fn default_retry_multiplier() -> f64 {
    DEFAULT_RETRY_MULTIPLIER
}

fn default_exporter_timeout() -> Duration {
    DEFAULT_EXPORTER_CLIENT_TIMEOUT
}

fn default_read_buffer_size() -> i64 {
    DEFAULT_EXPORTER_CLIENT_READ_BUFFER_SIZE
}

fn default_write_buffer_size() -> i64 {
    DEFAULT_EXPORTER_CLIENT_WRITE_BUFFER_SIZE
}

/// Retry policy of an exporter.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOnFailureConfig {
    /// Whether retry on failure is enabled. Default is true.
    #[serde(default = "default_retry_enabled")]
    pub enabled: Option<bool>,
    /// Time to wait after the first failure before retrying.
    #[serde(default = "default_retry_initial_interval")]
    pub initial_interval: Duration,
    /// Upper bound on backoff.
    #[serde(default = "default_retry_max_interval")]
    pub max_interval: Duration,
    /// Maximum amount of time spent trying to send a batch. Zero disables
    /// the limit.
    #[serde(default = "default_retry_max_elapsed_time")]
    pub max_elapsed_time: Duration,
    /// Factor by which the retry interval is multiplied on each attempt.
    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryOnFailureConfig {
    fn default() -> Self {
        Self {
            enabled: default_retry_enabled(),
            initial_interval: default_retry_initial_interval(),
            max_interval: default_retry_max_interval(),
            max_elapsed_time: default_retry_max_elapsed_time(),
            multiplier: default_retry_multiplier(),
        }
    }
}

/// TLS settings used by exporters.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// Whether to skip verifying the server certificate.
    #[serde(rename = "insecureSkipVerify", default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_verify: Option<bool>,
    /// CA certificate used to verify the peer. Uses the system roots when
    /// empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ResourceReference>,
    /// Client certificate for connections requiring TLS client auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<ResourceReference>,
    /// Client key for connections requiring TLS client auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ResourceReference>,
}

/// Reference to data in a secret declared in the shoot spec.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceReference {
    #[serde(rename = "resourceRef")]
    pub resource_ref: ResourceReferenceDetails,
}

/// Name of a resource reference in `.spec.resources` of the shoot, plus the
/// key into its data map.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceReferenceDetails {
    pub name: String,
    #[serde(rename = "dataKey")]
    pub data_key: String,
}

/// OTLP HTTP exporter settings.
///
/// See the [OTLP HTTP exporter] for the semantics of each field.
///
/// [OTLP HTTP exporter]: https://github.com/open-telemetry/opentelemetry-collector/tree/main/exporter/otlphttpexporter
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OtlpHttpExporterConfig {
    /// Whether the OTLP HTTP exporter is enabled. Default is false.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Target base URL to send data to, e.g. `https://example.com:4318`.
    /// Signal-specific paths are appended to it.
    #[serde(default)]
    pub endpoint: String,
    /// Target URL for trace data; overrides the base endpoint for traces.
    #[serde(default)]
    pub traces_endpoint: String,
    /// Target URL for metric data; overrides the base endpoint for metrics.
    #[serde(default)]
    pub metrics_endpoint: String,
    /// Target URL for log data; overrides the base endpoint for logs.
    #[serde(default)]
    pub logs_endpoint: String,
    /// Target URL for profile data; overrides the base endpoint for
    /// profiles.
    #[serde(default)]
    pub profiles_endpoint: String,
    /// TLS settings of the exporter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// Bearer token used for authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ResourceReference>,
    /// Request time limit.
    #[serde(default = "default_exporter_timeout")]
    pub timeout: Duration,
    /// Read buffer size of the HTTP client.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: i64,
    /// Write buffer size of the HTTP client.
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: i64,
    /// Message encoding, `proto` or `json`.
    #[serde(default)]
    pub encoding: MessageEncoding,
    /// Retry policy of the exporter.
    #[serde(default)]
    pub retry_on_failure: RetryOnFailureConfig,
    /// Compression to use: gzip, zstd, snappy or none.
    #[serde(default)]
    pub compression: Compression,
}

impl Default for OtlpHttpExporterConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            endpoint: String::new(),
            traces_endpoint: String::new(),
            metrics_endpoint: String::new(),
            logs_endpoint: String::new(),
            profiles_endpoint: String::new(),
            tls: None,
            token: None,
            timeout: default_exporter_timeout(),
            read_buffer_size: default_read_buffer_size(),
            write_buffer_size: default_write_buffer_size(),
            encoding: MessageEncoding::default(),
            retry_on_failure: RetryOnFailureConfig::default(),
            compression: Compression::default(),
        }
    }
}

impl OtlpHttpExporterConfig {
    /// Whether the exporter is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

/// OTLP gRPC exporter settings.
///
/// See the [OTLP gRPC exporter] for the semantics of each field.
///
/// [OTLP gRPC exporter]: https://github.com/open-telemetry/opentelemetry-collector/tree/main/exporter/otlpexporter
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OtlpGrpcExporterConfig {
    /// Whether the OTLP gRPC exporter is enabled. Default is false.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Target host and port, e.g. `https://example.com:4317`. Required when
    /// the exporter is enabled.
    #[serde(default)]
    pub endpoint: String,
    /// TLS settings of the exporter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// Bearer token used for authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ResourceReference>,
    /// Request time limit.
    #[serde(default = "default_exporter_timeout")]
    pub timeout: Duration,
    /// Read buffer size of the gRPC client.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: i64,
    /// Write buffer size of the gRPC client.
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: i64,
    /// Retry policy of the exporter.
    #[serde(default)]
    pub retry_on_failure: RetryOnFailureConfig,
    /// Compression to use: gzip, zstd, snappy or none.
    #[serde(default)]
    pub compression: Compression,
}

impl Default for OtlpGrpcExporterConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            endpoint: String::new(),
            tls: None,
            token: None,
            timeout: default_exporter_timeout(),
            read_buffer_size: default_read_buffer_size(),
            write_buffer_size: default_write_buffer_size(),
            retry_on_failure: RetryOnFailureConfig::default(),
            compression: Compression::default(),
        }
    }
}

impl OtlpGrpcExporterConfig {
    /// Whether the exporter is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

/// Debug exporter settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DebugExporterConfig {
    /// Whether the debug exporter is enabled. Default is false.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Verbosity level of the debug exporter.
    #[serde(default)]
    pub verbosity: DebugExporterVerbosity,
}

impl DebugExporterConfig {
    /// Whether the exporter is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

/// Exporter settings of the collector.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorExportersConfig {
    /// OTLP HTTP exporter settings.
    #[serde(rename = "otlphttp", default)]
    pub otlp_http: OtlpHttpExporterConfig,
    /// OTLP gRPC exporter settings.
    #[serde(rename = "otlpgrpc", default)]
    pub otlp_grpc: OtlpGrpcExporterConfig,
    /// Debug exporter settings.
    #[serde(default)]
    pub debug: DebugExporterConfig,
}

/// Settings for the collector's internal logs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorLogsConfig {
    /// Log level of the collector.
    #[serde(default)]
    pub level: LogLevel,
    /// Encoding of the collector logs.
    #[serde(default)]
    pub encoding: LogEncoding,
}

/// Settings for the collector's internal telemetry metrics.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorMetricsConfig {
    /// Level of detail of the collector telemetry metrics.
    #[serde(default)]
    pub level: MetricsLevel,
}

/// Desired state carried by a [`CollectorConfig`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorConfigSpec {
    /// Exporter configuration of the collector.
    #[serde(default)]
    pub exporters: CollectorExportersConfig,
    /// Settings for the collector logs.
    #[serde(default)]
    pub logs: CollectorLogsConfig,
    /// Settings for the collector telemetry metrics.
    #[serde(default)]
    pub metrics: CollectorMetricsConfig,
}

/// OpenTelemetry Collector configuration carried by an `Extension`
/// resource.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CollectorConfig {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub spec: CollectorConfigSpec,
}

impl CollectorConfig {
    /// Strictly decodes a provider config payload, rejecting unknown fields
    /// and unsupported apiVersion/kind combinations.
    pub fn decode(raw: &serde_json::Value) -> Result<Self, ConfigDecodeError> {
        let cfg: Self = serde_json::from_value(raw.clone())?;
        if cfg.api_version != API_VERSION || cfg.kind != KIND {
            return Err(ConfigDecodeError::UnsupportedType {
                api_version: cfg.api_version,
                kind: cfg.kind,
                expected_api_version: API_VERSION,
                expected_kind: KIND,
            });
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "otelcol.extensions.gardener.cloud/v1alpha1",
            "kind": "CollectorConfig",
            "spec": {
                "exporters": {
                    "otlphttp": {
                        "enabled": true,
                        "endpoint": "https://otlp.example.com:4318"
                    }
                }
            }
        })
    }

    #[test]
    fn decode_applies_defaults() {
        let cfg = CollectorConfig::decode(&minimal_config()).unwrap();
        let http = &cfg.spec.exporters.otlp_http;

        assert!(http.is_enabled());
        assert_eq!(http.endpoint, "https://otlp.example.com:4318");
        assert_eq!(http.timeout, DEFAULT_EXPORTER_CLIENT_TIMEOUT);
        assert_eq!(http.read_buffer_size, 0);
        assert_eq!(http.write_buffer_size, 512 * 1024);
        assert_eq!(http.encoding, MessageEncoding::Proto);
        assert_eq!(http.compression, Compression::Gzip);
        assert_eq!(http.retry_on_failure.enabled, Some(true));
        assert_eq!(
            http.retry_on_failure.initial_interval,
            DEFAULT_RETRY_INITIAL_INTERVAL
        );
        assert!(!cfg.spec.exporters.debug.is_enabled());
        assert!(!cfg.spec.exporters.otlp_grpc.is_enabled());
        assert_eq!(cfg.spec.logs.level, LogLevel::Info);
        assert_eq!(cfg.spec.logs.encoding, LogEncoding::Console);
        assert_eq!(cfg.spec.metrics.level, MetricsLevel::Basic);
    }

    #[test]
    fn decode_rejects_unknown_fields() {
        let mut raw = minimal_config();
        raw["spec"]["exporters"]["otlphttp"]["bogus"] = serde_json::json!(42);

        assert!(matches!(
            CollectorConfig::decode(&raw),
            Err(ConfigDecodeError::Json(_))
        ));
    }

    #[test]
    fn decode_rejects_unsupported_type() {
        let mut raw = minimal_config();
        raw["kind"] = serde_json::json!("SomethingElse");

        assert!(matches!(
            CollectorConfig::decode(&raw),
            Err(ConfigDecodeError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn durations_round_trip_as_strings() {
        let raw = serde_json::json!({"timeout": "45s", "enabled": true});
        let http: OtlpHttpExporterConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(http.timeout, Duration::from_secs(45));
        assert_eq!(http.timeout.to_string(), "45s");

        let back = serde_json::to_value(&http).unwrap();
        assert_eq!(back["timeout"], "45s");
    }

    #[test]
    fn enum_wire_values_match_collector_vocabulary() {
        let cfg: CollectorLogsConfig =
            serde_json::from_value(serde_json::json!({"level": "DEBUG", "encoding": "json"}))
                .unwrap();
        assert_eq!(cfg.level, LogLevel::Debug);
        assert_eq!(cfg.encoding, LogEncoding::Json);

        let exporters: CollectorExportersConfig = serde_json::from_value(serde_json::json!({
            "debug": {"enabled": true, "verbosity": "detailed"},
            "otlphttp": {"compression": "zstd", "encoding": "json"}
        }))
        .unwrap();
        assert_eq!(
            exporters.debug.verbosity,
            DebugExporterVerbosity::Detailed
        );
        assert_eq!(exporters.otlp_http.compression, Compression::Zstd);
        assert_eq!(exporters.otlp_http.encoding, MessageEncoding::Json);
    }

    #[test]
    fn retry_defaults_survive_partial_input() {
        let retry: RetryOnFailureConfig =
            serde_json::from_value(serde_json::json!({"initial_interval": "10s"})).unwrap();
        assert_eq!(retry.enabled, Some(true));
        assert_eq!(retry.initial_interval, Duration::from_secs(10));
        assert_eq!(retry.max_interval, DEFAULT_RETRY_MAX_INTERVAL);
        assert_eq!(retry.max_elapsed_time, DEFAULT_RETRY_MAX_ELAPSED_TIME);
        assert!((retry.multiplier - DEFAULT_RETRY_MULTIPLIER).abs() < f64::EPSILON);
    }
}
