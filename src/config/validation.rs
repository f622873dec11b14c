//! Validation of decoded [`CollectorConfig`] values.
//!
//! Validation collects every offending field path before failing, so a
//! single round trip surfaces all configuration problems at once.

use std::fmt;

use url::Url;

use super::{CollectorConfig, ResourceReference};

/// A single invalid field, addressed by its path in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Aggregate of all validation failures for a configuration.
#[derive(Debug)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl std::error::Error for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "invalid collector config: {joined}")
    }
}

impl ValidationError {
    /// Whether the aggregate contains an error for the given field path.
    pub fn contains_path(&self, path: &str) -> bool {
        self.errors.iter().any(|e| e.path == path)
    }
}

/// Validates the given collector configuration.
pub fn validate(cfg: &CollectorConfig) -> Result<(), ValidationError> {
    let mut errors = Vec::new();
    let exporters = &cfg.spec.exporters;

    // At least one exporter must be enabled.
    let any_enabled = exporters.debug.is_enabled()
        || exporters.otlp_http.is_enabled()
        || exporters.otlp_grpc.is_enabled();
    if !any_enabled {
        errors.push(FieldError {
            path: "spec.exporters".into(),
            message: "no exporter enabled".into(),
        });
    }

    let url_fields = [
        ("spec.exporters.otlp_http.endpoint", &exporters.otlp_http.endpoint),
        (
            "spec.exporters.otlp_http.traces_endpoint",
            &exporters.otlp_http.traces_endpoint,
        ),
        (
            "spec.exporters.otlp_http.metrics_endpoint",
            &exporters.otlp_http.metrics_endpoint,
        ),
        (
            "spec.exporters.otlp_http.logs_endpoint",
            &exporters.otlp_http.logs_endpoint,
        ),
        (
            "spec.exporters.otlp_http.profiles_endpoint",
            &exporters.otlp_http.profiles_endpoint,
        ),
        ("spec.exporters.otlp_grpc.endpoint", &exporters.otlp_grpc.endpoint),
    ];
    for (path, value) in url_fields {
        if !value.is_empty() && Url::parse(value).is_err() {
            errors.push(FieldError {
                path: path.into(),
                message: "invalid URL specified".into(),
            });
        }
    }

    let non_negative_fields = [
        (
            "spec.exporters.otlp_http.read_buffer_size",
            exporters.otlp_http.read_buffer_size,
        ),
        (
            "spec.exporters.otlp_http.write_buffer_size",
            exporters.otlp_http.write_buffer_size,
        ),
        (
            "spec.exporters.otlp_grpc.read_buffer_size",
            exporters.otlp_grpc.read_buffer_size,
        ),
        (
            "spec.exporters.otlp_grpc.write_buffer_size",
            exporters.otlp_grpc.write_buffer_size,
        ),
    ];
    for (path, value) in non_negative_fields {
        if value < 0 {
            errors.push(FieldError {
                path: path.into(),
                message: "value cannot be negative".into(),
            });
        }
    }

    let mut resource_refs: Vec<(&str, Option<&ResourceReference>)> = vec![
        ("spec.exporters.otlp_http.token", exporters.otlp_http.token.as_ref()),
        ("spec.exporters.otlp_grpc.token", exporters.otlp_grpc.token.as_ref()),
    ];
    if let Some(tls) = &exporters.otlp_http.tls {
        resource_refs.extend([
            ("spec.exporters.otlp_http.tls.ca", tls.ca.as_ref()),
            ("spec.exporters.otlp_http.tls.cert", tls.cert.as_ref()),
            ("spec.exporters.otlp_http.tls.key", tls.key.as_ref()),
        ]);
    }
    if let Some(tls) = &exporters.otlp_grpc.tls {
        resource_refs.extend([
            ("spec.exporters.otlp_grpc.tls.ca", tls.ca.as_ref()),
            ("spec.exporters.otlp_grpc.tls.cert", tls.cert.as_ref()),
            ("spec.exporters.otlp_grpc.tls.key", tls.key.as_ref()),
        ]);
    }
    for (path, reference) in resource_refs {
        if let Some(reference) = reference {
            if reference.resource_ref.name.is_empty() || reference.resource_ref.data_key.is_empty() {
                errors.push(FieldError {
                    path: path.into(),
                    message: "name or dataKey is empty".into(),
                });
            }
        }
    }

    // The gRPC exporter has no per-signal endpoints; its single endpoint is
    // mandatory once the exporter is on.
    if exporters.otlp_grpc.is_enabled() && exporters.otlp_grpc.endpoint.is_empty() {
        errors.push(FieldError {
            path: "spec.exporters.otlp_grpc.endpoint".into(),
            message: "empty value specified".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { errors })
    }
}
