//! # Actuator
//!
//! Lifecycle operations for `Extension` resources of type `otelcol`:
//! reconcile decodes and validates the embedded collector configuration,
//! ensures the managed certificates and applies the derived object graph as
//! a managed resource; delete tears everything down again.

use std::collections::HashMap;

use async_trait::async_trait;
use kube::{Api, Client, ResourceExt};
use thiserror::Error;
use tracing::info;

use super::managed_resources::{self, ManagedResourceError};
use super::resources::{dns_names_for_service, ObjectGraph};
use super::secrets::{SecretsError, SecretsManager};
use crate::config::validation::{self, ValidationError};
use crate::config::{CollectorConfig, ConfigDecodeError};
use crate::constants::*;
use crate::crd::{Cluster, Extension, ExtensionClass};

/// Gardenlet feature gate controlling whether the collector bundle is
/// deployed.
pub const FEATURE_GATE_OPENTELEMETRY_COLLECTOR: &str = "OpenTelemetryCollector";

/// Errors raised by the actuator lifecycle operations.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("extension resource has no namespace")]
    MissingNamespace,
    #[error("failed to get cluster: {0}")]
    GetCluster(#[source] kube::Error),
    #[error("invalid shoot payload: {0}")]
    ShootDecode(#[from] serde_json::Error),
    #[error("no provider config specified")]
    MissingProviderConfig,
    #[error(transparent)]
    Decode(#[from] ConfigDecodeError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Secrets(#[from] SecretsError),
    #[error(transparent)]
    ManagedResource(#[from] ManagedResourceError),
}

/// Error raised when building an actuator from incomplete options.
#[derive(Debug, Error)]
pub enum ActuatorBuilderError {
    #[error("invalid actuator config: missing client")]
    MissingClient,
}

/// Lifecycle operations the extension controller dispatches to.
#[async_trait]
pub trait LifecycleActuator: Send + Sync + 'static {
    async fn reconcile(&self, extension: &Extension) -> Result<(), ActuatorError>;
    async fn delete(&self, extension: &Extension) -> Result<(), ActuatorError>;
    async fn force_delete(&self, extension: &Extension) -> Result<(), ActuatorError>;
    async fn restore(&self, extension: &Extension) -> Result<(), ActuatorError>;
    async fn migrate(&self, extension: &Extension) -> Result<(), ActuatorError>;
}

/// Builder for [`Actuator`].
#[derive(Default)]
pub struct ActuatorBuilder {
    client: Option<Client>,
    gardener_version: Option<String>,
    gardenlet_feature_gates: HashMap<String, bool>,
    collector_image: Option<String>,
    target_allocator_image: Option<String>,
}

impl ActuatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kubernetes client used to read clusters and write managed resources.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Version of the platform, as provided during deployment.
    pub fn with_gardener_version(mut self, version: impl Into<String>) -> Self {
        self.gardener_version = Some(version.into());
        self
    }

    /// Gardenlet feature gates, as provided during deployment.
    pub fn with_gardenlet_feature_gates(mut self, gates: HashMap<String, bool>) -> Self {
        self.gardenlet_feature_gates = gates;
        self
    }

    /// Image of the Collector workload.
    pub fn with_collector_image(mut self, image: impl Into<String>) -> Self {
        self.collector_image = Some(image.into());
        self
    }

    /// Image of the Target Allocator workload.
    pub fn with_target_allocator_image(mut self, image: impl Into<String>) -> Self {
        self.target_allocator_image = Some(image.into());
        self
    }

    pub fn build(self) -> Result<Actuator, ActuatorBuilderError> {
        let client = self.client.ok_or(ActuatorBuilderError::MissingClient)?;

        Ok(Actuator {
            client,
            gardener_version: self.gardener_version,
            gardenlet_feature_gates: self.gardenlet_feature_gates,
            collector_image: self
                .collector_image
                .unwrap_or_else(|| DEFAULT_COLLECTOR_IMAGE.to_string()),
            target_allocator_image: self
                .target_allocator_image
                .unwrap_or_else(|| DEFAULT_TARGET_ALLOCATOR_IMAGE.to_string()),
        })
    }
}

/// Actuator reconciling `otelcol` extension resources.
#[derive(Clone)]
pub struct Actuator {
    client: Client,
    gardener_version: Option<String>,
    gardenlet_feature_gates: HashMap<String, bool>,
    collector_image: String,
    target_allocator_image: String,
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator")
            .field("gardener_version", &self.gardener_version)
            .field("gardenlet_feature_gates", &self.gardenlet_feature_gates)
            .field("collector_image", &self.collector_image)
            .field("target_allocator_image", &self.target_allocator_image)
            .finish_non_exhaustive()
    }
}

impl Actuator {
    pub fn builder() -> ActuatorBuilder {
        ActuatorBuilder::new()
    }

    /// Name of the actuator, used when registering a controller for it.
    pub fn name(&self) -> &'static str {
        EXTENSION_TYPE
    }

    /// Type of the extension resources the actuator reconciles.
    pub fn extension_type(&self) -> &'static str {
        EXTENSION_TYPE
    }

    /// Suffix of the finalizer placed on reconciled extension resources.
    pub fn finalizer_suffix(&self) -> &'static str {
        FINALIZER_SUFFIX
    }

    /// Extension class the actuator is responsible for.
    pub fn extension_class(&self) -> ExtensionClass {
        ExtensionClass::Shoot
    }

    /// Version of the platform the actuator was deployed by, if known.
    pub fn gardener_version(&self) -> Option<&str> {
        self.gardener_version.as_deref()
    }

    fn secrets_manager(&self, namespace: &str) -> SecretsManager {
        SecretsManager::new(self.client.clone(), namespace, SECRETS_MANAGER_IDENTITY)
    }

    fn feature_gate_enabled(&self, name: &str) -> bool {
        self.gardenlet_feature_gates.get(name).copied().unwrap_or(false)
    }

    fn namespace_of(extension: &Extension) -> Result<String, ActuatorError> {
        extension.namespace().ok_or(ActuatorError::MissingNamespace)
    }
}

#[async_trait]
impl LifecycleActuator for Actuator {
    async fn reconcile(&self, extension: &Extension) -> Result<(), ActuatorError> {
        if !self.feature_gate_enabled(FEATURE_GATE_OPENTELEMETRY_COLLECTOR) {
            info!(
                feature = FEATURE_GATE_OPENTELEMETRY_COLLECTOR,
                "gardenlet feature gate is either missing or disabled"
            );

            return self.delete(extension).await;
        }

        // The cluster resource carries the same name as the control-plane
        // namespace of the extension.
        let namespace = Self::namespace_of(extension)?;

        info!(
            name = %extension.name_any(),
            cluster = %namespace,
            "reconciling extension"
        );

        let clusters: Api<Cluster> = Api::all(self.client.clone());
        let cluster = clusters
            .get(&namespace)
            .await
            .map_err(ActuatorError::GetCluster)?;
        let shoot = cluster.shoot()?;

        // Nothing to do while the shoot cluster is hibernated.
        if shoot.is_hibernated() {
            return Ok(());
        }

        let raw = extension
            .spec
            .provider_config
            .as_ref()
            .ok_or(ActuatorError::MissingProviderConfig)?;
        let config = CollectorConfig::decode(raw)?;
        validation::validate(&config)?;

        // CA and the mTLS pair between Target Allocator and Collector.
        let secrets_manager = self.secrets_manager(&namespace);
        let ca = secrets_manager.ensure_ca(SECRET_NAME_CA, EXTENSION_TYPE).await?;
        let server_cert = secrets_manager
            .ensure_server_certificate(
                SECRET_NAME_SERVER_CERT,
                TARGET_ALLOCATOR_HTTPS_SERVICE_NAME,
                &dns_names_for_service(TARGET_ALLOCATOR_HTTPS_SERVICE_NAME, &namespace),
                &ca,
            )
            .await?;
        let client_cert = secrets_manager
            .ensure_client_certificate(SECRET_NAME_CLIENT_CERT, SECRET_NAME_CLIENT_CERT, &ca)
            .await?;

        let registry = ObjectGraph {
            namespace: &namespace,
            config: &config,
            shoot: &shoot,
            ca_secret: &ca.secret_name,
            server_cert_secret: &server_cert.secret_name,
            client_cert_secret: &client_cert.secret_name,
            collector_image: &self.collector_image,
            target_allocator_image: &self.target_allocator_image,
        }
        .build()?;

        managed_resources::create_for_seed(
            self.client.clone(),
            &namespace,
            MANAGED_RESOURCE_NAME,
            &registry,
        )
        .await?;

        Ok(())
    }

    async fn delete(&self, extension: &Extension) -> Result<(), ActuatorError> {
        let namespace = Self::namespace_of(extension)?;

        info!(cluster = %namespace, "deleting resources managed by extension");

        self.secrets_manager(&namespace).cleanup().await?;
        managed_resources::delete_for_seed(self.client.clone(), &namespace, MANAGED_RESOURCE_NAME)
            .await?;

        Ok(())
    }

    async fn force_delete(&self, extension: &Extension) -> Result<(), ActuatorError> {
        info!("shoot has been force-deleted, deleting resources managed by extension");

        self.delete(extension).await
    }

    async fn restore(&self, extension: &Extension) -> Result<(), ActuatorError> {
        self.reconcile(extension).await
    }

    async fn migrate(&self, extension: &Extension) -> Result<(), ActuatorError> {
        self.reconcile(extension).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_a_client() {
        let err = ActuatorBuilder::new().build().unwrap_err();
        assert!(err.to_string().contains("missing client"));
    }
}
