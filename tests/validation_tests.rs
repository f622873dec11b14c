//! # Validation Unit Tests
//!
//! Tests for decoding and validating the collector provider configuration.

use otelcol_extension_controller::config::validation::validate;
use otelcol_extension_controller::config::{
    CollectorConfig, Compression, ConfigDecodeError, LogEncoding, LogLevel, MessageEncoding,
};

fn decode(raw: serde_json::Value) -> CollectorConfig {
    CollectorConfig::decode(&raw).expect("config should decode")
}

fn base_config(spec: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "otelcol.extensions.gardener.cloud/v1alpha1",
        "kind": "CollectorConfig",
        "spec": spec,
    })
}

#[test]
fn test_decode_minimal_config() {
    let cfg = decode(base_config(serde_json::json!({
        "exporters": {
            "otlphttp": {"enabled": true, "endpoint": "https://otlp.example.com:4318"}
        }
    })));

    assert!(cfg.spec.exporters.otlp_http.is_enabled());
    assert!(!cfg.spec.exporters.debug.is_enabled());
    assert!(!cfg.spec.exporters.otlp_grpc.is_enabled());
    assert_eq!(cfg.spec.logs.level, LogLevel::Info);
    assert_eq!(cfg.spec.logs.encoding, LogEncoding::Console);
    assert_eq!(cfg.spec.exporters.otlp_http.compression, Compression::Gzip);
    assert_eq!(cfg.spec.exporters.otlp_http.encoding, MessageEncoding::Proto);
}

#[test]
fn test_decode_rejects_wrong_api_version() {
    let raw = serde_json::json!({
        "apiVersion": "otelcol.extensions.gardener.cloud/v1beta1",
        "kind": "CollectorConfig",
        "spec": {}
    });

    let err = CollectorConfig::decode(&raw).unwrap_err();
    assert!(matches!(err, ConfigDecodeError::UnsupportedType { .. }));
    assert!(err.to_string().contains("v1alpha1"));
}

#[test]
fn test_decode_rejects_unknown_spec_fields() {
    let raw = base_config(serde_json::json!({
        "exporters": {"debug": {"enabled": true}},
        "unexpected": {"field": true}
    }));

    assert!(CollectorConfig::decode(&raw).is_err());
}

#[test]
fn test_validate_requires_an_enabled_exporter() {
    let cfg = decode(base_config(serde_json::json!({
        "exporters": {
            "otlphttp": {"endpoint": "https://otlp.example.com:4318"},
            "debug": {"verbosity": "normal"}
        }
    })));

    let err = validate(&cfg).unwrap_err();
    assert!(err.to_string().contains("no exporter enabled"));
}

#[test]
fn test_validate_accepts_debug_only_config() {
    let cfg = decode(base_config(serde_json::json!({
        "exporters": {"debug": {"enabled": true, "verbosity": "detailed"}}
    })));

    assert!(validate(&cfg).is_ok());
}

#[test]
fn test_validate_collects_multiple_errors() {
    let cfg = decode(base_config(serde_json::json!({
        "exporters": {
            "otlphttp": {
                "enabled": true,
                "endpoint": "https://otlp.example.com:4318",
                "read_buffer_size": -5,
                "token": {"resourceRef": {"name": "", "dataKey": "token"}}
            },
            "otlpgrpc": {"enabled": true}
        }
    })));

    let err = validate(&cfg).unwrap_err();
    assert!(err.contains_path("spec.exporters.otlp_http.read_buffer_size"));
    assert!(err.contains_path("spec.exporters.otlp_http.token"));
    assert!(err.contains_path("spec.exporters.otlp_grpc.endpoint"));
    assert!(err.errors.len() >= 3);
}

#[test]
fn test_validate_checks_tls_resource_references() {
    let cfg = decode(base_config(serde_json::json!({
        "exporters": {
            "otlpgrpc": {
                "enabled": true,
                "endpoint": "https://otlp.example.com:4317",
                "tls": {
                    "insecureSkipVerify": false,
                    "cert": {"resourceRef": {"name": "exporter-tls", "dataKey": ""}}
                }
            }
        }
    })));

    let err = validate(&cfg).unwrap_err();
    assert!(err.contains_path("spec.exporters.otlp_grpc.tls.cert"));
}

#[test]
fn test_validate_passes_full_config() {
    let cfg = decode(base_config(serde_json::json!({
        "exporters": {
            "otlphttp": {
                "enabled": true,
                "endpoint": "https://otlp.example.com:4318",
                "traces_endpoint": "https://otlp.example.com:4318/v1/traces",
                "timeout": "45s",
                "compression": "zstd",
                "encoding": "json",
                "retry_on_failure": {"enabled": true, "initial_interval": "10s"},
                "tls": {
                    "ca": {"resourceRef": {"name": "exporter-tls", "dataKey": "ca.crt"}}
                },
                "token": {"resourceRef": {"name": "otlp-auth", "dataKey": "token"}}
            },
            "otlpgrpc": {
                "enabled": true,
                "endpoint": "https://otlp.example.com:4317"
            },
            "debug": {"enabled": true}
        },
        "logs": {"level": "WARN", "encoding": "json"},
        "metrics": {"level": "normal"}
    })));

    assert!(validate(&cfg).is_ok());
}
