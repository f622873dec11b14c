//! # Desired object graph
//!
//! Derives the downstream Kubernetes objects for the Collector and the
//! Target Allocator from a validated [`CollectorConfig`]. The graph is
//! deterministic for a given namespace and configuration: fixed names from
//! [`crate::constants`], labels and annotations derived from them, volumes
//! and certificate references derived from the configuration.
//!
//! The Target Allocator expects collectors with stable identities for its
//! consistent-hashing allocation, hence the Collector runs as a StatefulSet
//! backed by a headless service.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, KeyToPath,
    ObjectFieldSelector, PodSecurityContext, PodSpec, PodTemplateSpec, ProjectedVolumeSource,
    ResourceRequirements, SecretProjection, SecretVolumeSource, SecurityContext, Service,
    ServiceAccount, ServicePort, ServiceSpec, Volume, VolumeMount, VolumeProjection,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use serde_json::{json, Value};

use super::managed_resources::{ManagedResourceError, ObjectRegistry};
use super::secrets::{DATA_KEY_CERTIFICATE, DATA_KEY_CERTIFICATE_BUNDLE, DATA_KEY_PRIVATE_KEY};
use crate::config::{
    CollectorConfig, OtlpGrpcExporterConfig, OtlpHttpExporterConfig, TlsConfig,
};
use crate::constants::*;
use crate::crd::Shoot;

const VOLUME_NAME_CA_CERT: &str = "ca-cert";
const MOUNT_PATH_CA_CERT: &str = "/etc/ssl/certs/ca";

const VOLUME_NAME_SERVER_CERT: &str = "server-cert";
const MOUNT_PATH_SERVER_CERT: &str = "/etc/ssl/certs/server";

const VOLUME_NAME_CLIENT_CERT: &str = "client-cert";
const MOUNT_PATH_CLIENT_CERT: &str = "/etc/ssl/certs/client";

const VOLUME_NAME_TA_CONFIG: &str = "targetallocator-config";
const MOUNT_PATH_TA_CONFIG: &str = "/app/targetallocator";

const VOLUME_NAME_COLLECTOR_CONFIG: &str = "collector-config";
const MOUNT_PATH_COLLECTOR_CONFIG: &str = "/conf";

const VOLUME_NAME_TLS_HTTP: &str = "tls";
const MOUNT_PATH_TLS_HTTP: &str = "/etc/ssl/tls";

const VOLUME_NAME_TLS_GRPC: &str = "tls-grpc";
const MOUNT_PATH_TLS_GRPC: &str = "/etc/ssl/tls-grpc";

const VOLUME_NAME_BEARER_HTTP: &str = "bearer-token-auth";
const MOUNT_PATH_BEARER_HTTP: &str = "/etc/auth/bearer";

const VOLUME_NAME_BEARER_GRPC: &str = "bearer-token-auth-grpc";
const MOUNT_PATH_BEARER_GRPC: &str = "/etc/auth/bearer-grpc";

/// Collector component id of the bearer token auth extension for the OTLP
/// HTTP exporter.
const BEARER_AUTH_HTTP: &str = "bearertokenauth";
/// Collector component id of the bearer token auth extension for the OTLP
/// gRPC exporter.
const BEARER_AUTH_GRPC: &str = "bearertokenauth/grpc";

const PRIORITY_CLASS_CONTROL_PLANE: &str = "gardener-system-100";

/// Inputs from which the desired object graph is derived.
#[derive(Debug, Clone, Copy)]
pub struct ObjectGraph<'a> {
    pub namespace: &'a str,
    pub config: &'a CollectorConfig,
    pub shoot: &'a Shoot,
    pub ca_secret: &'a str,
    pub server_cert_secret: &'a str,
    pub client_cert_secret: &'a str,
    pub collector_image: &'a str,
    pub target_allocator_image: &'a str,
}

impl ObjectGraph<'_> {
    /// Builds the full object graph and serializes it into a registry ready
    /// to be bundled as a managed resource.
    pub fn build(&self) -> Result<ObjectRegistry, ManagedResourceError> {
        let mut registry = ObjectRegistry::new();

        registry.add(&self.target_allocator_config_map()?)?;
        registry.add(&self.target_allocator_service_account())?;
        registry.add(&self.target_allocator_role())?;
        registry.add(&self.target_allocator_role_binding())?;
        registry.add(&self.target_allocator_https_service())?;
        registry.add(&self.target_allocator_deployment())?;
        registry.add(&self.collector_service_account())?;
        registry.add(&self.collector_config_map()?)?;
        registry.add(&self.collector_service())?;
        registry.add(&self.collector_stateful_set())?;

        Ok(registry)
    }

    /// Common set of labels for the Collector and Target Allocator
    /// resources.
    pub fn common_labels() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("role".to_string(), "observability".to_string()),
            ("gardener.cloud/role".to_string(), "observability".to_string()),
            (
                "observability.gardener.cloud/app".to_string(),
                COLLECTOR_NAME.to_string(),
            ),
        ])
    }

    /// Labels granting the workloads access through the platform network
    /// policies.
    pub fn network_labels() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("networking.gardener.cloud/to-dns".to_string(), "allowed".to_string()),
            (
                "networking.gardener.cloud/to-runtime-apiserver".to_string(),
                "allowed".to_string(),
            ),
            (
                "networking.gardener.cloud/to-private-networks".to_string(),
                "allowed".to_string(),
            ),
            (
                "networking.gardener.cloud/to-public-networks".to_string(),
                "allowed".to_string(),
            ),
            (
                format!(
                    "networking.resources.gardener.cloud/to-{TARGET_ALLOCATOR_HTTPS_SERVICE_NAME}-tcp-{TARGET_ALLOCATOR_HTTPS_PORT}"
                ),
                "allowed".to_string(),
            ),
            (
                "networking.resources.gardener.cloud/to-all-scrape-targets".to_string(),
                "allowed".to_string(),
            ),
        ])
    }

    /// Annotations advertising the collector metrics port to scrapers.
    pub fn annotations() -> BTreeMap<String, String> {
        BTreeMap::from([(
            "networking.resources.gardener.cloud/from-all-scrape-targets-allowed-ports".to_string(),
            format!(r#"[{{"protocol":"TCP","port":{COLLECTOR_METRICS_PORT}}}]"#),
        )])
    }

    /// Workload identity labels of the Collector pods. The Target Allocator
    /// selects collectors through exactly these labels.
    pub fn collector_workload_labels(namespace: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "app.kubernetes.io/component".to_string(),
                "opentelemetry-collector".to_string(),
            ),
            (
                "app.kubernetes.io/instance".to_string(),
                format!("{namespace}.{BASE_RESOURCE_NAME}"),
            ),
            (
                "app.kubernetes.io/managed-by".to_string(),
                "gardener-extension-otelcol".to_string(),
            ),
            (
                "app.kubernetes.io/name".to_string(),
                format!("{BASE_RESOURCE_NAME}-collector"),
            ),
            ("app.kubernetes.io/part-of".to_string(), "opentelemetry".to_string()),
        ])
    }

    fn metadata(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.to_string()),
            labels: Some(Self::common_labels()),
            ..ObjectMeta::default()
        }
    }

    /// ServiceAccount for the Target Allocator.
    pub fn target_allocator_service_account(&self) -> ServiceAccount {
        ServiceAccount {
            metadata: self.metadata(TARGET_ALLOCATOR_SERVICE_ACCOUNT_NAME),
            automount_service_account_token: Some(false),
            ..ServiceAccount::default()
        }
    }

    /// Role granting the Target Allocator read access to scrape target
    /// discovery sources.
    pub fn target_allocator_role(&self) -> Role {
        let read_verbs = vec!["get".to_string(), "list".to_string(), "watch".to_string()];

        Role {
            metadata: self.metadata(TARGET_ALLOCATOR_ROLE_NAME),
            rules: Some(vec![
                PolicyRule {
                    api_groups: Some(vec![String::new()]),
                    resources: Some(
                        ["pods", "services", "endpoints", "secrets", "namespaces"]
                            .map(String::from)
                            .to_vec(),
                    ),
                    verbs: read_verbs.clone(),
                    ..PolicyRule::default()
                },
                PolicyRule {
                    api_groups: Some(vec!["discovery.k8s.io".to_string()]),
                    resources: Some(vec!["endpointslices".to_string()]),
                    verbs: read_verbs.clone(),
                    ..PolicyRule::default()
                },
                PolicyRule {
                    api_groups: Some(vec!["monitoring.coreos.com".to_string()]),
                    resources: Some(
                        ["servicemonitors", "podmonitors", "scrapeconfigs", "probes"]
                            .map(String::from)
                            .to_vec(),
                    ),
                    verbs: read_verbs,
                    ..PolicyRule::default()
                },
            ]),
        }
    }

    /// RoleBinding for the Target Allocator role.
    pub fn target_allocator_role_binding(&self) -> RoleBinding {
        RoleBinding {
            metadata: self.metadata(TARGET_ALLOCATOR_ROLE_NAME),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: TARGET_ALLOCATOR_ROLE_NAME.to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: TARGET_ALLOCATOR_SERVICE_ACCOUNT_NAME.to_string(),
                namespace: Some(self.namespace.to_string()),
                ..Subject::default()
            }]),
        }
    }

    /// ClusterIP service fronting the Target Allocator HTTPS server.
    pub fn target_allocator_https_service(&self) -> Service {
        Service {
            metadata: self.metadata(TARGET_ALLOCATOR_HTTPS_SERVICE_NAME),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                ports: Some(vec![ServicePort {
                    port: 443,
                    protocol: Some("TCP".to_string()),
                    target_port: Some(IntOrString::Int(TARGET_ALLOCATOR_HTTPS_PORT)),
                    ..ServicePort::default()
                }]),
                selector: Some(BTreeMap::from([(
                    "app.kubernetes.io/component".to_string(),
                    "opentelemetry-targetallocator".to_string(),
                )])),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }

    /// ConfigMap carrying the Target Allocator configuration.
    pub fn target_allocator_config_map(&self) -> Result<ConfigMap, ManagedResourceError> {
        let ta_config = json!({
            "allocation_strategy": "consistent-hashing",
            "collector_not_ready_grace_period": "30s",
            "collector_namespace": self.namespace,
            "collector_selector": {
                "matchLabels": Self::collector_workload_labels(self.namespace),
            },
            "filter_strategy": "relabel-config",
            "prometheus_cr": {
                "enabled": true,
                "allow_namespaces": [self.namespace],
                "scrape_interval": "30s",
                "scrape_config_selector": null,
                "probe_selector": null,
                "pod_monitor_selector": null,
                "deny_namespaces": null,
                "service_monitor_selector": {
                    "matchLabels": {"prometheus": "shoot"},
                },
            },
        });
        let data = serde_yaml::to_string(&ta_config)?;

        Ok(ConfigMap {
            metadata: self.metadata(TARGET_ALLOCATOR_CONFIG_MAP_NAME),
            data: Some(BTreeMap::from([("targetallocator.yaml".to_string(), data)])),
            ..ConfigMap::default()
        })
    }

    /// Deployment running the Target Allocator.
    pub fn target_allocator_deployment(&self) -> Deployment {
        let mut all_labels = Self::common_labels();
        all_labels.extend(Self::network_labels());
        all_labels.insert(
            "app.kubernetes.io/component".to_string(),
            "opentelemetry-targetallocator".to_string(),
        );

        Deployment {
            metadata: self.metadata(TARGET_ALLOCATOR_DEPLOYMENT_NAME),
            spec: Some(DeploymentSpec {
                replicas: Some(TARGET_ALLOCATOR_REPLICAS),
                revision_history_limit: Some(2),
                selector: LabelSelector {
                    match_labels: Some(all_labels.clone()),
                    ..LabelSelector::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(all_labels),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        priority_class_name: Some(PRIORITY_CLASS_CONTROL_PLANE.to_string()),
                        service_account_name: Some(
                            TARGET_ALLOCATOR_SERVICE_ACCOUNT_NAME.to_string(),
                        ),
                        security_context: Some(PodSecurityContext {
                            run_as_non_root: Some(true),
                            run_as_user: Some(65532),
                            run_as_group: Some(65532),
                            fs_group: Some(65532),
                            ..PodSecurityContext::default()
                        }),
                        containers: vec![Container {
                            name: "ta-container".to_string(),
                            image: Some(self.target_allocator_image.to_string()),
                            args: Some(vec![
                                "--enable-https-server=true".to_string(),
                                format!("--config-file={MOUNT_PATH_TA_CONFIG}/targetallocator.yaml"),
                                format!(
                                    "--https-ca-file={MOUNT_PATH_CA_CERT}/{DATA_KEY_CERTIFICATE_BUNDLE}"
                                ),
                                format!(
                                    "--https-tls-cert-file={MOUNT_PATH_SERVER_CERT}/{DATA_KEY_CERTIFICATE}"
                                ),
                                format!(
                                    "--https-tls-key-file={MOUNT_PATH_SERVER_CERT}/{DATA_KEY_PRIVATE_KEY}"
                                ),
                            ]),
                            resources: Some(default_resource_requests()),
                            volume_mounts: Some(vec![
                                read_only_mount(VOLUME_NAME_CA_CERT, MOUNT_PATH_CA_CERT),
                                read_only_mount(VOLUME_NAME_SERVER_CERT, MOUNT_PATH_SERVER_CERT),
                                read_only_mount(VOLUME_NAME_TA_CONFIG, MOUNT_PATH_TA_CONFIG),
                            ]),
                            security_context: Some(SecurityContext {
                                allow_privilege_escalation: Some(false),
                                ..SecurityContext::default()
                            }),
                            ..Container::default()
                        }],
                        volumes: Some(vec![
                            secret_volume(VOLUME_NAME_CA_CERT, self.ca_secret),
                            secret_volume(VOLUME_NAME_SERVER_CERT, self.server_cert_secret),
                            config_map_volume(VOLUME_NAME_TA_CONFIG, TARGET_ALLOCATOR_CONFIG_MAP_NAME),
                        ]),
                        ..PodSpec::default()
                    }),
                },
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        }
    }

    /// ServiceAccount for the Collector.
    pub fn collector_service_account(&self) -> ServiceAccount {
        ServiceAccount {
            metadata: self.metadata(COLLECTOR_SERVICE_ACCOUNT_NAME),
            automount_service_account_token: Some(false),
            ..ServiceAccount::default()
        }
    }

    /// Headless service backing the Collector StatefulSet.
    pub fn collector_service(&self) -> Service {
        Service {
            metadata: self.metadata(COLLECTOR_NAME),
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".to_string()),
                ports: Some(vec![ServicePort {
                    name: Some("metrics".to_string()),
                    port: COLLECTOR_METRICS_PORT,
                    protocol: Some("TCP".to_string()),
                    ..ServicePort::default()
                }]),
                selector: Some(Self::collector_workload_labels(self.namespace)),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }

    /// ConfigMap carrying the rendered Collector pipeline configuration.
    pub fn collector_config_map(&self) -> Result<ConfigMap, ManagedResourceError> {
        let data = render_collector_config(self.config)?;

        Ok(ConfigMap {
            metadata: self.metadata(COLLECTOR_CONFIG_MAP_NAME),
            data: Some(BTreeMap::from([("collector.yaml".to_string(), data)])),
            ..ConfigMap::default()
        })
    }

    /// StatefulSet running the Collector.
    pub fn collector_stateful_set(&self) -> StatefulSet {
        let mut labels = Self::common_labels();
        labels.extend(Self::network_labels());

        let mut pod_labels = labels.clone();
        pod_labels.extend(Self::collector_workload_labels(self.namespace));

        let mut volume_mounts = vec![
            read_only_mount(VOLUME_NAME_COLLECTOR_CONFIG, MOUNT_PATH_COLLECTOR_CONFIG),
            read_only_mount(VOLUME_NAME_CA_CERT, MOUNT_PATH_CA_CERT),
            read_only_mount(VOLUME_NAME_CLIENT_CERT, MOUNT_PATH_CLIENT_CERT),
        ];
        let mut volumes = vec![
            config_map_volume(VOLUME_NAME_COLLECTOR_CONFIG, COLLECTOR_CONFIG_MAP_NAME),
            secret_volume(VOLUME_NAME_CA_CERT, self.ca_secret),
            secret_volume(VOLUME_NAME_CLIENT_CERT, self.client_cert_secret),
        ];
        self.append_exporter_volumes(&mut volumes, &mut volume_mounts);

        StatefulSet {
            metadata: ObjectMeta {
                annotations: Some(Self::annotations()),
                labels: Some(labels),
                name: Some(COLLECTOR_NAME.to_string()),
                namespace: Some(self.namespace.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(StatefulSetSpec {
                service_name: Some(COLLECTOR_NAME.to_string()),
                replicas: Some(COLLECTOR_REPLICAS),
                selector: LabelSelector {
                    match_labels: Some(Self::collector_workload_labels(self.namespace)),
                    ..LabelSelector::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(pod_labels),
                        annotations: Some(Self::annotations()),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        priority_class_name: Some(PRIORITY_CLASS_CONTROL_PLANE.to_string()),
                        service_account_name: Some(COLLECTOR_SERVICE_ACCOUNT_NAME.to_string()),
                        containers: vec![Container {
                            name: "otelcol".to_string(),
                            image: Some(self.collector_image.to_string()),
                            args: Some(vec![format!(
                                "--config={MOUNT_PATH_COLLECTOR_CONFIG}/collector.yaml"
                            )]),
                            env: Some(vec![EnvVar {
                                name: "POD_NAME".to_string(),
                                value_from: Some(EnvVarSource {
                                    field_ref: Some(ObjectFieldSelector {
                                        field_path: "metadata.name".to_string(),
                                        ..ObjectFieldSelector::default()
                                    }),
                                    ..EnvVarSource::default()
                                }),
                                ..EnvVar::default()
                            }]),
                            ports: Some(vec![ContainerPort {
                                name: Some("metrics".to_string()),
                                container_port: COLLECTOR_METRICS_PORT,
                                protocol: Some("TCP".to_string()),
                                ..ContainerPort::default()
                            }]),
                            resources: Some(default_resource_requests()),
                            volume_mounts: Some(volume_mounts),
                            security_context: Some(SecurityContext {
                                allow_privilege_escalation: Some(false),
                                ..SecurityContext::default()
                            }),
                            ..Container::default()
                        }],
                        volumes: Some(volumes),
                        ..PodSpec::default()
                    }),
                },
                ..StatefulSetSpec::default()
            }),
            ..StatefulSet::default()
        }
    }

    /// Adds the TLS and bearer token volumes required by the configured
    /// exporters.
    fn append_exporter_volumes(&self, volumes: &mut Vec<Volume>, mounts: &mut Vec<VolumeMount>) {
        let http = &self.config.spec.exporters.otlp_http;
        if let Some(tls) = &http.tls {
            if let Some(volume) = self.projected_tls_volume(VOLUME_NAME_TLS_HTTP, tls) {
                volumes.push(volume);
                mounts.push(read_only_mount(VOLUME_NAME_TLS_HTTP, MOUNT_PATH_TLS_HTTP));
            }
        }
        if let Some(token) = &http.token {
            volumes.push(secret_volume(
                VOLUME_NAME_BEARER_HTTP,
                &self.referenced_secret_name(&token.resource_ref.name),
            ));
            mounts.push(read_only_mount(VOLUME_NAME_BEARER_HTTP, MOUNT_PATH_BEARER_HTTP));
        }

        let grpc = &self.config.spec.exporters.otlp_grpc;
        if grpc.is_enabled() {
            if let Some(tls) = &grpc.tls {
                if let Some(volume) = self.projected_tls_volume(VOLUME_NAME_TLS_GRPC, tls) {
                    volumes.push(volume);
                    mounts.push(read_only_mount(VOLUME_NAME_TLS_GRPC, MOUNT_PATH_TLS_GRPC));
                }
            }
            if let Some(token) = &grpc.token {
                volumes.push(secret_volume(
                    VOLUME_NAME_BEARER_GRPC,
                    &self.referenced_secret_name(&token.resource_ref.name),
                ));
                mounts.push(read_only_mount(VOLUME_NAME_BEARER_GRPC, MOUNT_PATH_BEARER_GRPC));
            }
        }
    }

    /// Projected volume with the CA/cert/key entries of a TLS config.
    fn projected_tls_volume(&self, volume_name: &str, tls: &TlsConfig) -> Option<Volume> {
        let mut sources = Vec::new();
        for reference in [&tls.ca, &tls.cert, &tls.key].into_iter().flatten() {
            sources.push(VolumeProjection {
                secret: Some(SecretProjection {
                    name: self.referenced_secret_name(&reference.resource_ref.name),
                    items: Some(vec![KeyToPath {
                        key: reference.resource_ref.data_key.clone(),
                        path: reference.resource_ref.data_key.clone(),
                        ..KeyToPath::default()
                    }]),
                    ..SecretProjection::default()
                }),
                ..VolumeProjection::default()
            });
        }

        if sources.is_empty() {
            return None;
        }

        Some(Volume {
            name: volume_name.to_string(),
            projected: Some(ProjectedVolumeSource {
                sources: Some(sources),
                ..ProjectedVolumeSource::default()
            }),
            ..Volume::default()
        })
    }

    /// Resolves a named resource reference to the secret name copied into
    /// the control-plane namespace.
    fn referenced_secret_name(&self, resource_name: &str) -> String {
        self.shoot
            .secret_name_for_resource(resource_name)
            .unwrap_or_default()
    }
}

/// Cluster-internal DNS names of a service.
pub fn dns_names_for_service(name: &str, namespace: &str) -> Vec<String> {
    vec![
        name.to_string(),
        format!("{name}.{namespace}"),
        format!("{name}.{namespace}.svc"),
        format!("{name}.{namespace}.svc.cluster.local"),
    ]
}

/// Renders the Collector pipeline configuration as YAML.
pub fn render_collector_config(cfg: &CollectorConfig) -> Result<String, ManagedResourceError> {
    let exporters = otel_exporters(cfg);
    let exporter_names: Vec<&String> = exporters.keys().collect();

    let mut extensions = serde_json::Map::new();
    let mut service_extensions = Vec::new();
    if let Some(token) = &cfg.spec.exporters.otlp_http.token {
        extensions.insert(
            BEARER_AUTH_HTTP.to_string(),
            json!({"filename": format!("{MOUNT_PATH_BEARER_HTTP}/{}", token.resource_ref.data_key)}),
        );
        service_extensions.push(BEARER_AUTH_HTTP);
    }
    if cfg.spec.exporters.otlp_grpc.is_enabled() {
        if let Some(token) = &cfg.spec.exporters.otlp_grpc.token {
            extensions.insert(
                BEARER_AUTH_GRPC.to_string(),
                json!({"filename": format!("{MOUNT_PATH_BEARER_GRPC}/{}", token.resource_ref.data_key)}),
            );
            service_extensions.push(BEARER_AUTH_GRPC);
        }
    }

    let mut root = json!({
        "receivers": {
            "prometheus": {
                "target_allocator": {
                    "collector_id": "${POD_NAME}",
                    "endpoint": format!("https://{TARGET_ALLOCATOR_HTTPS_SERVICE_NAME}"),
                    "interval": "30s",
                    "tls": {
                        "ca_file": format!("{MOUNT_PATH_CA_CERT}/{DATA_KEY_CERTIFICATE_BUNDLE}"),
                        "cert_file": format!("{MOUNT_PATH_CLIENT_CERT}/{DATA_KEY_CERTIFICATE}"),
                        "key_file": format!("{MOUNT_PATH_CLIENT_CERT}/{DATA_KEY_PRIVATE_KEY}"),
                    },
                },
                "config": {
                    "scrape_configs": [
                        {"job_name": COLLECTOR_NAME, "scrape_interval": "15s"},
                    ],
                },
            },
        },
        "processors": {
            "batch": {"timeout": "15s"},
        },
        "exporters": exporters,
        "service": {
            "telemetry": {
                "metrics": {
                    "level": cfg.spec.metrics.level.as_str(),
                    "readers": [
                        {
                            "pull": {
                                "exporter": {
                                    "prometheus": {
                                        "host": "0.0.0.0",
                                        "port": COLLECTOR_METRICS_PORT,
                                    },
                                },
                            },
                        },
                    ],
                },
                "logs": {
                    "level": cfg.spec.logs.level.as_str(),
                    "encoding": cfg.spec.logs.encoding.as_str(),
                },
            },
            "pipelines": {
                "metrics": {
                    "receivers": ["prometheus"],
                    "processors": ["batch"],
                    "exporters": exporter_names,
                },
            },
        },
    });

    if !extensions.is_empty() {
        root["extensions"] = Value::Object(extensions);
        root["service"]["extensions"] = json!(service_extensions);
    }

    serde_yaml::to_string(&root).map_err(ManagedResourceError::Render)
}

/// Exporter sections of the collector config, keyed by component id. The
/// map is ordered, so the rendered pipeline references exporters in a
/// deterministic order.
pub fn otel_exporters(cfg: &CollectorConfig) -> BTreeMap<String, Value> {
    let mut exporters = BTreeMap::new();

    if cfg.spec.exporters.debug.is_enabled() {
        exporters.insert(
            "debug".to_string(),
            json!({"verbosity": cfg.spec.exporters.debug.verbosity.as_str()}),
        );
    }
    if cfg.spec.exporters.otlp_http.is_enabled() {
        exporters.insert(
            "otlphttp".to_string(),
            otlp_http_exporter(&cfg.spec.exporters.otlp_http),
        );
    }
    if cfg.spec.exporters.otlp_grpc.is_enabled() {
        exporters.insert(
            "otlp".to_string(),
            otlp_grpc_exporter(&cfg.spec.exporters.otlp_grpc),
        );
    }

    exporters
}

/// Settings of the OTLP HTTP exporter.
fn otlp_http_exporter(cfg: &OtlpHttpExporterConfig) -> Value {
    let mut exporter = serde_json::Map::new();

    for (key, value) in [
        ("endpoint", &cfg.endpoint),
        ("traces_endpoint", &cfg.traces_endpoint),
        ("metrics_endpoint", &cfg.metrics_endpoint),
        ("logs_endpoint", &cfg.logs_endpoint),
        ("profiles_endpoint", &cfg.profiles_endpoint),
    ] {
        if !value.is_empty() {
            exporter.insert(key.to_string(), json!(value));
        }
    }

    exporter.insert("read_buffer_size".to_string(), json!(cfg.read_buffer_size));
    exporter.insert("write_buffer_size".to_string(), json!(cfg.write_buffer_size));
    exporter.insert("timeout".to_string(), json!(cfg.timeout.to_string()));
    exporter.insert("compression".to_string(), json!(cfg.compression.as_str()));
    exporter.insert("encoding".to_string(), json!(cfg.encoding.as_str()));

    if let Some(enabled) = cfg.retry_on_failure.enabled {
        exporter.insert(
            "retry_on_failure".to_string(),
            retry_on_failure(&cfg.retry_on_failure, enabled),
        );
    }
    if let Some(tls) = &cfg.tls {
        exporter.insert("tls".to_string(), tls_settings(tls, MOUNT_PATH_TLS_HTTP));
    }
    if cfg.token.is_some() {
        exporter.insert("auth".to_string(), json!({"authenticator": BEARER_AUTH_HTTP}));
    }

    Value::Object(exporter)
}

/// Settings of the OTLP gRPC exporter.
fn otlp_grpc_exporter(cfg: &OtlpGrpcExporterConfig) -> Value {
    let mut exporter = serde_json::Map::new();

    exporter.insert("endpoint".to_string(), json!(cfg.endpoint));
    exporter.insert("read_buffer_size".to_string(), json!(cfg.read_buffer_size));
    exporter.insert("write_buffer_size".to_string(), json!(cfg.write_buffer_size));
    exporter.insert("timeout".to_string(), json!(cfg.timeout.to_string()));
    exporter.insert("compression".to_string(), json!(cfg.compression.as_str()));

    if let Some(enabled) = cfg.retry_on_failure.enabled {
        exporter.insert(
            "retry_on_failure".to_string(),
            retry_on_failure(&cfg.retry_on_failure, enabled),
        );
    }
    if let Some(tls) = &cfg.tls {
        exporter.insert("tls".to_string(), tls_settings(tls, MOUNT_PATH_TLS_GRPC));
    }
    if cfg.token.is_some() {
        exporter.insert("auth".to_string(), json!({"authenticator": BEARER_AUTH_GRPC}));
    }

    Value::Object(exporter)
}

fn retry_on_failure(cfg: &crate::config::RetryOnFailureConfig, enabled: bool) -> Value {
    json!({
        "enabled": enabled,
        "initial_interval": cfg.initial_interval.to_string(),
        "max_interval": cfg.max_interval.to_string(),
        "max_elapsed_time": cfg.max_elapsed_time.to_string(),
        "multiplier": cfg.multiplier,
    })
}

fn tls_settings(tls: &TlsConfig, mount_path: &str) -> Value {
    let mut settings = serde_json::Map::new();

    if let Some(skip) = tls.insecure_skip_verify {
        settings.insert("insecure_skip_verify".to_string(), json!(skip));
    }
    if let Some(ca) = &tls.ca {
        settings.insert(
            "ca_file".to_string(),
            json!(format!("{mount_path}/{}", ca.resource_ref.data_key)),
        );
    }
    if let Some(cert) = &tls.cert {
        settings.insert(
            "cert_file".to_string(),
            json!(format!("{mount_path}/{}", cert.resource_ref.data_key)),
        );
    }
    if let Some(key) = &tls.key {
        settings.insert(
            "key_file".to_string(),
            json!(format!("{mount_path}/{}", key.resource_ref.data_key)),
        );
    }

    Value::Object(settings)
}

fn default_resource_requests() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("10m".to_string())),
            ("memory".to_string(), Quantity("50Mi".to_string())),
        ])),
        ..ResourceRequirements::default()
    }
}

fn read_only_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..VolumeMount::default()
    }
}

fn secret_volume(name: &str, secret_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn config_map_volume(name: &str, config_map_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map_name.to_string(),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMESPACE: &str = "shoot--local--local";

    fn decode_config(spec: serde_json::Value) -> CollectorConfig {
        CollectorConfig::decode(&serde_json::json!({
            "apiVersion": "otelcol.extensions.gardener.cloud/v1alpha1",
            "kind": "CollectorConfig",
            "spec": spec,
        }))
        .unwrap()
    }

    fn http_only_config() -> CollectorConfig {
        decode_config(serde_json::json!({
            "exporters": {
                "otlphttp": {"enabled": true, "endpoint": "https://otlp.example.com:4318"}
            }
        }))
    }

    fn shoot_with_secret_refs() -> Shoot {
        serde_json::from_value(serde_json::json!({
            "spec": {
                "resources": [
                    {
                        "name": "otlp-auth",
                        "resourceRef": {"apiVersion": "v1", "kind": "Secret", "name": "otlp-token"}
                    },
                    {
                        "name": "exporter-tls",
                        "resourceRef": {"apiVersion": "v1", "kind": "Secret", "name": "exporter-certs"}
                    }
                ]
            }
        }))
        .unwrap()
    }

    fn graph<'a>(config: &'a CollectorConfig, shoot: &'a Shoot) -> ObjectGraph<'a> {
        ObjectGraph {
            namespace: NAMESPACE,
            config,
            shoot,
            ca_secret: SECRET_NAME_CA,
            server_cert_secret: SECRET_NAME_SERVER_CERT,
            client_cert_secret: SECRET_NAME_CLIENT_CERT,
            collector_image: DEFAULT_COLLECTOR_IMAGE,
            target_allocator_image: DEFAULT_TARGET_ALLOCATOR_IMAGE,
        }
    }

    #[test]
    fn graph_contains_the_full_bundle() {
        let config = http_only_config();
        let shoot = Shoot::default();
        let registry = graph(&config, &shoot).build().unwrap();

        assert_eq!(registry.len(), 10);
        let payload = registry.serialize();
        for kind in [
            "kind: ServiceAccount",
            "kind: Role",
            "kind: RoleBinding",
            "kind: Service",
            "kind: ConfigMap",
            "kind: Deployment",
            "kind: StatefulSet",
        ] {
            assert!(payload.contains(kind), "missing {kind} in payload");
        }
    }

    #[test]
    fn target_allocator_deployment_wires_certificates() {
        let config = http_only_config();
        let shoot = Shoot::default();
        let deployment = graph(&config, &shoot).target_allocator_deployment();

        let pod = deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some(TARGET_ALLOCATOR_SERVICE_ACCOUNT_NAME));
        assert_eq!(pod.priority_class_name.as_deref(), Some("gardener-system-100"));

        let volumes = pod.volumes.unwrap();
        let secret_names: Vec<_> = volumes
            .iter()
            .filter_map(|v| v.secret.as_ref().and_then(|s| s.secret_name.clone()))
            .collect();
        assert!(secret_names.contains(&SECRET_NAME_CA.to_string()));
        assert!(secret_names.contains(&SECRET_NAME_SERVER_CERT.to_string()));

        let args = pod.containers[0].args.clone().unwrap();
        assert!(args.contains(&"--enable-https-server=true".to_string()));
        assert!(args
            .iter()
            .any(|a| a.contains("bundle.crt") && a.contains("--https-ca-file")));
    }

    #[test]
    fn target_allocator_service_targets_https_port() {
        let config = http_only_config();
        let shoot = Shoot::default();
        let service = graph(&config, &shoot).target_allocator_https_service();

        let spec = service.spec.unwrap();
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 443);
        assert_eq!(port.target_port, Some(IntOrString::Int(8443)));
        assert_eq!(
            spec.selector.unwrap().get("app.kubernetes.io/component").map(String::as_str),
            Some("opentelemetry-targetallocator")
        );
    }

    #[test]
    fn collector_stateful_set_matches_target_allocator_selector() {
        let config = http_only_config();
        let shoot = Shoot::default();
        let g = graph(&config, &shoot);

        let sts = g.collector_stateful_set();
        let pod_labels = sts
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .labels
            .clone()
            .unwrap();

        // The Target Allocator selects collectors via exactly these labels.
        for (key, value) in ObjectGraph::collector_workload_labels(NAMESPACE) {
            assert_eq!(pod_labels.get(&key), Some(&value));
        }

        let ta_config = g.target_allocator_config_map().unwrap();
        let data = ta_config.data.unwrap();
        let rendered = data.get("targetallocator.yaml").unwrap();
        assert!(rendered.contains("opentelemetry-collector"));
        assert!(rendered.contains(&format!("{NAMESPACE}.{BASE_RESOURCE_NAME}")));
    }

    #[test]
    fn collector_config_renders_enabled_exporters_sorted() {
        let config = decode_config(serde_json::json!({
            "exporters": {
                "debug": {"enabled": true, "verbosity": "detailed"},
                "otlphttp": {"enabled": true, "endpoint": "https://otlp.example.com:4318"},
                "otlpgrpc": {"enabled": true, "endpoint": "https://otlp.example.com:4317"}
            }
        }));

        let exporters = otel_exporters(&config);
        let names: Vec<_> = exporters.keys().cloned().collect();
        assert_eq!(names, ["debug", "otlp", "otlphttp"]);

        let rendered = render_collector_config(&config).unwrap();
        assert!(rendered.contains("verbosity: detailed"));
        assert!(rendered.contains("https://otlp.example.com:4318"));
        assert!(rendered.contains("https://otlp.example.com:4317"));
    }

    #[test]
    fn otlp_http_exporter_skips_empty_endpoints() {
        let config = http_only_config();
        let exporter = otlp_http_exporter(&config.spec.exporters.otlp_http);

        assert_eq!(exporter["endpoint"], "https://otlp.example.com:4318");
        assert!(exporter.get("traces_endpoint").is_none());
        assert_eq!(exporter["timeout"], "30s");
        assert_eq!(exporter["compression"], "gzip");
        assert_eq!(exporter["encoding"], "proto");
        assert_eq!(exporter["retry_on_failure"]["enabled"], true);
        assert_eq!(exporter["retry_on_failure"]["initial_interval"], "5s");
    }

    #[test]
    fn exporter_tls_and_token_are_wired_through_volumes() {
        let config = decode_config(serde_json::json!({
            "exporters": {
                "otlphttp": {
                    "enabled": true,
                    "endpoint": "https://otlp.example.com:4318",
                    "tls": {
                        "ca": {"resourceRef": {"name": "exporter-tls", "dataKey": "ca.crt"}}
                    },
                    "token": {"resourceRef": {"name": "otlp-auth", "dataKey": "token"}}
                }
            }
        }));
        let shoot = shoot_with_secret_refs();
        let sts = graph(&config, &shoot).collector_stateful_set();

        let pod = sts.spec.unwrap().template.spec.unwrap();
        let volumes = pod.volumes.unwrap();

        let tls_volume = volumes.iter().find(|v| v.name == "tls").unwrap();
        let projection = &tls_volume.projected.as_ref().unwrap().sources.as_ref().unwrap()[0];
        assert_eq!(
            Some(projection.secret.as_ref().unwrap().name.as_str()),
            Some("ref-exporter-certs")
        );

        let bearer_volume = volumes.iter().find(|v| v.name == "bearer-token-auth").unwrap();
        assert_eq!(
            bearer_volume.secret.as_ref().unwrap().secret_name.as_deref(),
            Some("ref-otlp-token")
        );

        let rendered = render_collector_config(&config).unwrap();
        assert!(rendered.contains("bearertokenauth"));
        assert!(rendered.contains("/etc/auth/bearer/token"));
        assert!(rendered.contains("ca_file: /etc/ssl/tls/ca.crt"));
        assert!(rendered.contains("authenticator: bearertokenauth"));
    }

    #[test]
    fn collector_telemetry_reflects_config_levels() {
        let config = decode_config(serde_json::json!({
            "exporters": {"debug": {"enabled": true}},
            "logs": {"level": "DEBUG", "encoding": "json"},
            "metrics": {"level": "detailed"}
        }));

        let rendered = render_collector_config(&config).unwrap();
        assert!(rendered.contains("level: DEBUG"));
        assert!(rendered.contains("encoding: json"));
        assert!(rendered.contains("level: detailed"));
        assert!(rendered.contains("port: 8888"));
    }

    #[test]
    fn dns_names_cover_cluster_internal_forms() {
        let names = dns_names_for_service("external-otelcol-targetallocator-https", NAMESPACE);
        assert_eq!(
            names,
            vec![
                "external-otelcol-targetallocator-https".to_string(),
                format!("external-otelcol-targetallocator-https.{NAMESPACE}"),
                format!("external-otelcol-targetallocator-https.{NAMESPACE}.svc"),
                format!("external-otelcol-targetallocator-https.{NAMESPACE}.svc.cluster.local"),
            ]
        );
    }
}
