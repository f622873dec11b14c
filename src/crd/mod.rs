//! Gardener-facing custom resource types consumed by the controller.
//!
//! The CRDs themselves are installed by the platform; this module only
//! defines the typed views the controller needs in order to watch and
//! reconcile them.

mod cluster;
mod extension;
mod managed_resource;

pub use cluster::{
    Cluster, ClusterSpec, CrossVersionObjectReference, Hibernation, NamedResourceReference, Shoot,
    ShootSpec,
};
pub use extension::{
    Extension, ExtensionClass, ExtensionSpec, ExtensionStatus, LastOperation, LastOperationState,
    LastOperationType,
};
pub use managed_resource::{ManagedResource, ManagedResourceSpec, SecretRef};
