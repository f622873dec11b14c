//! Well-known names, ports and labels used by the extension.
//!
//! All downstream objects are derived from these constants, so the desired
//! object graph is deterministic for a given namespace and configuration.

/// Name of the actuator and of the extension type it reconciles.
pub const EXTENSION_TYPE: &str = "otelcol";

/// Suffix of the finalizer placed on `Extension` resources handled by this
/// controller.
pub const FINALIZER_SUFFIX: &str = "gardener-extension-otelcol";

/// Annotation through which the platform requests a specific operation.
pub const OPERATION_ANNOTATION: &str = "gardener.cloud/operation";

/// Base name for all resources managed by the extension.
pub const BASE_RESOURCE_NAME: &str = "external-otelcol";

/// Name of the managed resource bundling the downstream objects.
pub const MANAGED_RESOURCE_NAME: &str = BASE_RESOURCE_NAME;

/// Name of the Collector workload.
pub const COLLECTOR_NAME: &str = BASE_RESOURCE_NAME;

/// Port on which the Collector exposes its internal metrics.
pub const COLLECTOR_METRICS_PORT: i32 = 8888;

/// Number of Collector replicas.
pub const COLLECTOR_REPLICAS: i32 = 1;

/// Name of the service account for the Collector.
pub const COLLECTOR_SERVICE_ACCOUNT_NAME: &str = "external-otelcol-collector";

/// Name of the ConfigMap carrying the rendered Collector configuration.
pub const COLLECTOR_CONFIG_MAP_NAME: &str = "external-otelcol-config";

/// Identity under which the secrets manager owns its secrets.
pub const SECRETS_MANAGER_IDENTITY: &str = "gardener-extension-otelcol";

/// Name of the CA certificate secret.
pub const SECRET_NAME_CA: &str = "ca-otelcol";

/// Name of the Target Allocator server certificate secret.
pub const SECRET_NAME_SERVER_CERT: &str = "otelcol-targetallocator-server";

/// Name of the Collector client certificate secret.
pub const SECRET_NAME_CLIENT_CERT: &str = "otelcol-collector-client";

/// Name of the Target Allocator deployment.
pub const TARGET_ALLOCATOR_DEPLOYMENT_NAME: &str = "external-otelcol-targetallocator";

/// Name of the Kubernetes service for HTTPS communication of the Target
/// Allocator.
pub const TARGET_ALLOCATOR_HTTPS_SERVICE_NAME: &str = "external-otelcol-targetallocator-https";

/// Port on which the Target Allocator's HTTPS server listens.
pub const TARGET_ALLOCATOR_HTTPS_PORT: i32 = 8443;

/// Number of Target Allocator replicas.
pub const TARGET_ALLOCATOR_REPLICAS: i32 = 1;

/// Name of the service account for the Target Allocator.
pub const TARGET_ALLOCATOR_SERVICE_ACCOUNT_NAME: &str = "external-otelcol-targetallocator";

/// Name of the Role and RoleBinding for the Target Allocator.
pub const TARGET_ALLOCATOR_ROLE_NAME: &str = "external-otelcol-targetallocator";

/// Name of the ConfigMap for the Target Allocator.
pub const TARGET_ALLOCATOR_CONFIG_MAP_NAME: &str = "external-otelcol-targetallocator-config";

/// Prefix under which referenced shoot resources are copied into the
/// control-plane namespace.
pub const REFERENCED_RESOURCES_PREFIX: &str = "ref-";

/// Default image for the Collector workload.
pub const DEFAULT_COLLECTOR_IMAGE: &str =
    "ghcr.io/open-telemetry/opentelemetry-collector-releases/opentelemetry-collector-contrib:0.112.0";

/// Default image for the Target Allocator workload.
pub const DEFAULT_TARGET_ALLOCATOR_IMAGE: &str =
    "ghcr.io/open-telemetry/opentelemetry-operator/target-allocator:0.112.0";
