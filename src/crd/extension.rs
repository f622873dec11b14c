//! # Extension resource
//!
//! Typed view of the `extensions.gardener.cloud/v1alpha1` `Extension`
//! resource. The platform creates one per enabled extension inside each
//! shoot control-plane namespace; this controller reconciles the ones whose
//! `spec.type` is `otelcol`.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Extension custom resource specification.
///
/// The provider configuration is an opaque JSON payload from the platform's
/// point of view; this controller decodes it into a
/// [`crate::config::CollectorConfig`].
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Extension",
    group = "extensions.gardener.cloud",
    version = "v1alpha1",
    namespaced,
    status = "ExtensionStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSpec {
    /// Type of the extension resource. This controller only acts on
    /// resources of type `otelcol`.
    #[serde(rename = "type")]
    pub type_: String,
    /// Extension class the resource belongs to. Defaults to `shoot` when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ExtensionClass>,
    /// Provider-specific configuration, carried verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
}

/// Class of cluster an extension resource targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionClass {
    /// Extensions running for garden runtime clusters.
    Garden,
    /// Extensions running for seed clusters.
    Seed,
    /// Extensions running for shoot control planes.
    Shoot,
}

impl Default for ExtensionClass {
    fn default() -> Self {
        Self::Shoot
    }
}

/// Status reported back on the `Extension` resource.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    /// Generation last handled by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Outcome of the most recent lifecycle operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
}

/// Record of the last lifecycle operation performed on the resource.
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    /// Kind of operation that ran.
    #[serde(rename = "type")]
    pub type_: LastOperationType,
    /// Terminal state of the operation.
    pub state: LastOperationState,
    /// Human readable description of the outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Completion percentage of the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,
    /// Timestamp of the last status transition, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
}

/// Lifecycle operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum LastOperationType {
    Create,
    Reconcile,
    Delete,
    Migrate,
    Restore,
}

/// Terminal states of a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum LastOperationState {
    Processing,
    Succeeded,
    Error,
}

impl Extension {
    /// Returns the extension class, defaulting to `shoot` when unset.
    pub fn class(&self) -> ExtensionClass {
        self.spec.class.unwrap_or_default()
    }

    /// Returns the operation requested through the operation annotation, if
    /// any.
    pub fn requested_operation(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|ann| ann.get(crate::constants::OPERATION_ANNOTATION))
            .map(String::as_str)
    }
}
