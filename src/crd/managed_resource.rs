//! # ManagedResource
//!
//! Typed view of the `resources.gardener.cloud/v1alpha1` `ManagedResource`
//! resource. The platform's resource-manager watches these and applies the
//! manifests referenced through `spec.secretRefs` with drift correction;
//! this controller only creates, updates and deletes them.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// ManagedResource custom resource specification.
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "ManagedResource",
    group = "resources.gardener.cloud",
    version = "v1alpha1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceSpec {
    /// Resource class the responsible resource-manager selects on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Secrets carrying the serialized manifests.
    pub secret_refs: Vec<SecretRef>,
    /// Whether the applied objects survive deletion of the managed
    /// resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_objects: Option<bool>,
}

/// Reference to a secret in the same namespace.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SecretRef {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_resource_serializes_camel_case() {
        let spec = ManagedResourceSpec {
            class: Some("seed".into()),
            secret_refs: vec![SecretRef {
                name: "managedresource-external-otelcol".into(),
            }],
            keep_objects: Some(false),
        };

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["class"], "seed");
        assert_eq!(value["keepObjects"], false);
        assert_eq!(
            value["secretRefs"][0]["name"],
            "managedresource-external-otelcol"
        );
    }
}
