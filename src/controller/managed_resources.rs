//! # Managed resources
//!
//! Bundles the desired object graph into a Gardener managed resource: a
//! data secret carrying the serialized manifests plus a `ManagedResource`
//! pointing at it. The platform's resource-manager applies the manifests
//! asynchronously with drift correction.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, ObjectMeta, Patch, PatchParams};
use kube::{Api, Client};
use thiserror::Error;
use tracing::debug;

use crate::crd::{ManagedResource, ManagedResourceSpec, SecretRef};

/// Field manager used for server-side apply of managed resources.
const FIELD_MANAGER: &str = "gardener-extension-otelcol";

/// Resource class selecting the seed resource-manager.
const CLASS_SEED: &str = "seed";

/// Errors raised while assembling or applying a managed resource.
#[derive(Debug, Error)]
pub enum ManagedResourceError {
    #[error("failed to serialize object for managed resource: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to render object as YAML: {0}")]
    Render(#[from] serde_yaml::Error),
    #[error("object is not a JSON object")]
    NotAnObject,
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// Collects typed objects and serializes them into a single multi-document
/// YAML payload.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    docs: Vec<String>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a typed object to the registry. The apiVersion and kind implied
    /// by the Rust type are injected, since the generated API types do not
    /// carry them.
    pub fn add<K>(&mut self, obj: &K) -> Result<(), ManagedResourceError>
    where
        K: k8s_openapi::Resource + serde::Serialize,
    {
        self.docs.push(to_typed_manifest(obj).and_then(|value| {
            serde_yaml::to_string(&value).map_err(ManagedResourceError::Render)
        })?);

        Ok(())
    }

    /// Serializes all collected objects into one multi-document YAML
    /// payload.
    pub fn serialize(&self) -> String {
        self.docs.join("---\n")
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Returns the given object as a JSON value with apiVersion and kind set.
pub(crate) fn to_typed_manifest<K>(obj: &K) -> Result<serde_json::Value, ManagedResourceError>
where
    K: k8s_openapi::Resource + serde::Serialize,
{
    let mut value = serde_json::to_value(obj)?;
    let map = value.as_object_mut().ok_or(ManagedResourceError::NotAnObject)?;
    map.insert("apiVersion".into(), serde_json::Value::String(K::API_VERSION.into()));
    map.insert("kind".into(), serde_json::Value::String(K::KIND.into()));

    Ok(value)
}

/// Name of the data secret backing the managed resource of the given name.
pub fn data_secret_name(name: &str) -> String {
    format!("managedresource-{name}")
}

/// Creates or updates the managed resource for the seed cluster, bundling
/// the registry payload. Idempotent via server-side apply.
pub async fn create_for_seed(
    client: Client,
    namespace: &str,
    name: &str,
    registry: &ObjectRegistry,
) -> Result<(), ManagedResourceError> {
    let secret_name = data_secret_name(name);
    let payload = registry.serialize();

    debug!(
        namespace = namespace,
        name = name,
        objects = registry.len(),
        "applying managed resource"
    );

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.clone()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        type_: Some("Opaque".into()),
        data: Some(BTreeMap::from([(
            format!("{name}.yaml"),
            ByteString(payload.into_bytes()),
        )])),
        ..Secret::default()
    };

    let params = PatchParams::apply(FIELD_MANAGER).force();
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    secrets
        .patch(&secret_name, &params, &Patch::Apply(&to_typed_manifest(&secret)?))
        .await?;

    let mut mr = ManagedResource::new(
        name,
        ManagedResourceSpec {
            class: Some(CLASS_SEED.into()),
            secret_refs: vec![SecretRef { name: secret_name }],
            keep_objects: Some(false),
        },
    );
    mr.metadata.namespace = Some(namespace.to_string());

    let resources: Api<ManagedResource> = Api::namespaced(client, namespace);
    resources.patch(name, &params, &Patch::Apply(&mr)).await?;

    Ok(())
}

/// Deletes the managed resource and its data secret. Missing objects are
/// not an error.
pub async fn delete_for_seed(
    client: Client,
    namespace: &str,
    name: &str,
) -> Result<(), ManagedResourceError> {
    debug!(namespace = namespace, name = name, "deleting managed resource");

    let resources: Api<ManagedResource> = Api::namespaced(client.clone(), namespace);
    ignore_not_found(resources.delete(name, &DeleteParams::default()).await)?;

    let secrets: Api<Secret> = Api::namespaced(client, namespace);
    ignore_not_found(
        secrets
            .delete(&data_secret_name(name), &DeleteParams::default())
            .await,
    )?;

    Ok(())
}

fn ignore_not_found<T>(result: Result<T, kube::Error>) -> Result<(), ManagedResourceError> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(err) => Err(ManagedResourceError::Kube(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceAccount;

    #[test]
    fn registry_injects_type_meta() {
        let mut registry = ObjectRegistry::new();
        registry
            .add(&ServiceAccount {
                metadata: ObjectMeta {
                    name: Some("external-otelcol-collector".into()),
                    namespace: Some("shoot--local--local".into()),
                    ..ObjectMeta::default()
                },
                automount_service_account_token: Some(false),
                ..ServiceAccount::default()
            })
            .unwrap();

        let payload = registry.serialize();
        assert!(payload.contains("apiVersion: v1"));
        assert!(payload.contains("kind: ServiceAccount"));
        assert!(payload.contains("name: external-otelcol-collector"));
    }

    #[test]
    fn registry_joins_documents() {
        let mut registry = ObjectRegistry::new();
        for name in ["a", "b"] {
            registry
                .add(&ServiceAccount {
                    metadata: ObjectMeta {
                        name: Some(name.into()),
                        ..ObjectMeta::default()
                    },
                    ..ServiceAccount::default()
                })
                .unwrap();
        }

        assert_eq!(registry.len(), 2);
        let docs: Vec<_> = registry.serialize().split("---\n").map(str::to_string).collect();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].contains("name: a"));
        assert!(docs[1].contains("name: b"));
    }

    #[test]
    fn data_secret_name_is_prefixed() {
        assert_eq!(
            data_secret_name("external-otelcol"),
            "managedresource-external-otelcol"
        );
    }
}
