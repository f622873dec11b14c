//! # Cluster resource
//!
//! Typed view of the cluster-scoped `extensions.gardener.cloud/v1alpha1`
//! `Cluster` resource. The platform stores the raw shoot, seed and cloud
//! profile manifests in it; this controller only decodes the small shoot
//! projection it needs.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::constants::REFERENCED_RESOURCES_PREFIX;

/// Cluster custom resource specification.
///
/// The payloads are kept raw. Decoding the full shoot API would couple this
/// controller to the platform API version; instead [`Cluster::shoot`]
/// extracts a tolerant projection.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(kind = "Cluster", group = "extensions.gardener.cloud", version = "v1alpha1")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Raw cloud profile manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_profile: Option<serde_json::Value>,
    /// Raw seed manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<serde_json::Value>,
    /// Raw shoot manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot: Option<serde_json::Value>,
}

impl Cluster {
    /// Decodes the shoot projection out of the raw shoot payload.
    pub fn shoot(&self) -> Result<Shoot, serde_json::Error> {
        match &self.spec.shoot {
            Some(raw) => serde_json::from_value(raw.clone()),
            None => Ok(Shoot::default()),
        }
    }
}

/// Projection of the shoot manifest: only the fields this controller reads.
/// Unknown fields are ignored on decode.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Shoot {
    #[serde(default)]
    pub spec: ShootSpec,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ShootSpec {
    #[serde(default)]
    pub hibernation: Option<Hibernation>,
    #[serde(default)]
    pub resources: Vec<NamedResourceReference>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Hibernation {
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Named reference to a resource declared in the shoot spec. The platform
/// copies the referenced object into the control-plane namespace under the
/// `ref-` prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedResourceReference {
    pub name: String,
    pub resource_ref: CrossVersionObjectReference,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossVersionObjectReference {
    #[serde(default)]
    pub api_version: Option<String>,
    pub kind: String,
    pub name: String,
}

impl Shoot {
    /// Whether the shoot is currently hibernated.
    pub fn is_hibernated(&self) -> bool {
        self.spec
            .hibernation
            .as_ref()
            .and_then(|h| h.enabled)
            .unwrap_or(false)
    }

    /// Resolves the name of the secret copied into the control-plane
    /// namespace for the given named resource reference. Returns `None`
    /// when the reference is missing or does not point at a `v1` Secret.
    pub fn secret_name_for_resource(&self, name: &str) -> Option<String> {
        self.spec.resources.iter().find_map(|res| {
            let is_secret = res.resource_ref.kind == "Secret"
                && res
                    .resource_ref
                    .api_version
                    .as_deref()
                    .map(|v| v == "v1")
                    .unwrap_or(true);
            if res.name == name && is_secret {
                Some(format!("{REFERENCED_RESOURCES_PREFIX}{}", res.resource_ref.name))
            } else {
                None
            }
        })
    }
}
