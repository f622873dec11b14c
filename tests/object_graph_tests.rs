//! # Object Graph Tests
//!
//! End-to-end assembly of the desired object graph from a decoded
//! configuration, as bundled into the managed resource payload.

use otelcol_extension_controller::config::CollectorConfig;
use otelcol_extension_controller::constants::*;
use otelcol_extension_controller::controller::ObjectGraph;
use otelcol_extension_controller::crd::Shoot;

const NAMESPACE: &str = "shoot--local--local";

fn config(spec: serde_json::Value) -> CollectorConfig {
    CollectorConfig::decode(&serde_json::json!({
        "apiVersion": "otelcol.extensions.gardener.cloud/v1alpha1",
        "kind": "CollectorConfig",
        "spec": spec,
    }))
    .unwrap()
}

fn graph<'a>(cfg: &'a CollectorConfig, shoot: &'a Shoot) -> ObjectGraph<'a> {
    ObjectGraph {
        namespace: NAMESPACE,
        config: cfg,
        shoot,
        ca_secret: SECRET_NAME_CA,
        server_cert_secret: SECRET_NAME_SERVER_CERT,
        client_cert_secret: SECRET_NAME_CLIENT_CERT,
        collector_image: DEFAULT_COLLECTOR_IMAGE,
        target_allocator_image: DEFAULT_TARGET_ALLOCATOR_IMAGE,
    }
}

#[test]
fn test_payload_contains_all_objects() {
    let cfg = config(serde_json::json!({
        "exporters": {
            "otlphttp": {"enabled": true, "endpoint": "https://otlp.example.com:4318"}
        }
    }));
    let shoot = Shoot::default();

    let registry = graph(&cfg, &shoot).build().unwrap();
    assert_eq!(registry.len(), 10);

    let payload = registry.serialize();
    for name in [
        TARGET_ALLOCATOR_CONFIG_MAP_NAME,
        TARGET_ALLOCATOR_SERVICE_ACCOUNT_NAME,
        TARGET_ALLOCATOR_ROLE_NAME,
        TARGET_ALLOCATOR_HTTPS_SERVICE_NAME,
        TARGET_ALLOCATOR_DEPLOYMENT_NAME,
        COLLECTOR_SERVICE_ACCOUNT_NAME,
        COLLECTOR_CONFIG_MAP_NAME,
        COLLECTOR_NAME,
    ] {
        assert!(payload.contains(name), "payload is missing {name}");
    }
}

#[test]
fn test_payload_is_deterministic() {
    let cfg = config(serde_json::json!({
        "exporters": {
            "debug": {"enabled": true},
            "otlphttp": {"enabled": true, "endpoint": "https://otlp.example.com:4318"}
        }
    }));
    let shoot = Shoot::default();

    let first = graph(&cfg, &shoot).build().unwrap().serialize();
    let second = graph(&cfg, &shoot).build().unwrap().serialize();
    assert_eq!(first, second);
}

#[test]
fn test_collector_pipeline_references_every_enabled_exporter() {
    let cfg = config(serde_json::json!({
        "exporters": {
            "debug": {"enabled": true},
            "otlphttp": {"enabled": true, "endpoint": "https://otlp.example.com:4318"},
            "otlpgrpc": {"enabled": true, "endpoint": "https://otlp.example.com:4317"}
        }
    }));
    let shoot = Shoot::default();

    let config_map = graph(&cfg, &shoot).collector_config_map().unwrap();
    let rendered = config_map.data.unwrap().remove("collector.yaml").unwrap();

    assert!(rendered.contains("debug"));
    assert!(rendered.contains("otlphttp"));
    assert!(rendered.contains("prometheus"));
    assert!(rendered.contains("batch"));
    // Pipeline exporters are listed in sorted component order.
    let debug_pos = rendered.find("- debug").unwrap();
    let otlp_pos = rendered.find("- otlp").unwrap();
    assert!(debug_pos < otlp_pos);
}

#[test]
fn test_hibernated_shoot_resources_still_resolve_references() {
    let cfg = config(serde_json::json!({
        "exporters": {
            "otlphttp": {
                "enabled": true,
                "endpoint": "https://otlp.example.com:4318",
                "token": {"resourceRef": {"name": "otlp-auth", "dataKey": "token"}}
            }
        }
    }));
    let shoot: Shoot = serde_json::from_value(serde_json::json!({
        "spec": {
            "hibernation": {"enabled": false},
            "resources": [{
                "name": "otlp-auth",
                "resourceRef": {"apiVersion": "v1", "kind": "Secret", "name": "otlp-token"}
            }]
        }
    }))
    .unwrap();

    let payload = graph(&cfg, &shoot).build().unwrap().serialize();
    assert!(payload.contains("ref-otlp-token"));
}

#[test]
fn test_mtls_material_flows_into_both_workloads() {
    let cfg = config(serde_json::json!({
        "exporters": {"debug": {"enabled": true}}
    }));
    let shoot = Shoot::default();
    let payload = graph(&cfg, &shoot).build().unwrap().serialize();

    // The Target Allocator serves with the server certificate, the
    // Collector dials with the client certificate, both trust the CA.
    assert!(payload.contains(SECRET_NAME_CA));
    assert!(payload.contains(SECRET_NAME_SERVER_CERT));
    assert!(payload.contains(SECRET_NAME_CLIENT_CERT));
    assert!(payload.contains("bundle.crt"));
}
