//! # Heartbeat
//!
//! Periodically renews a `coordination.k8s.io/v1` Lease named after the
//! extension, signalling to the platform that the extension controller is
//! alive.

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{ObjectMeta, Patch, PatchParams};
use kube::{Api, Client};
use thiserror::Error;
use tracing::{debug, warn};

use super::managed_resources::{to_typed_manifest, ManagedResourceError};

const FIELD_MANAGER: &str = "gardener-extension-otelcol-heartbeat";

/// Default interval on which the heartbeat lease is renewed.
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(30);

/// Error raised while renewing the heartbeat lease.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Manifest(#[from] ManagedResourceError),
}

/// Error raised when building a heartbeat from incomplete options.
#[derive(Debug, Error)]
pub enum HeartbeatBuilderError {
    #[error("invalid heartbeat config: missing extension name")]
    MissingExtensionName,
    #[error("invalid heartbeat config: missing lease namespace")]
    MissingLeaseNamespace,
}

/// Builder for [`Heartbeat`].
#[derive(Debug, Default)]
pub struct HeartbeatBuilder {
    extension_name: Option<String>,
    namespace: Option<String>,
    renew_interval: Option<Duration>,
}

impl HeartbeatBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the extension; also the name and holder identity of the
    /// lease.
    pub fn with_extension_name(mut self, name: impl Into<String>) -> Self {
        self.extension_name = Some(name.into());
        self
    }

    /// Namespace the lease is created in.
    pub fn with_lease_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Interval on which the lease is renewed.
    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<Heartbeat, HeartbeatBuilderError> {
        let extension_name = self
            .extension_name
            .filter(|name| !name.is_empty())
            .ok_or(HeartbeatBuilderError::MissingExtensionName)?;
        let namespace = self
            .namespace
            .filter(|ns| !ns.is_empty())
            .ok_or(HeartbeatBuilderError::MissingLeaseNamespace)?;

        Ok(Heartbeat {
            extension_name,
            namespace,
            renew_interval: self.renew_interval.unwrap_or(DEFAULT_RENEW_INTERVAL),
        })
    }
}

/// Renews the extension heartbeat lease on a fixed interval.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    extension_name: String,
    namespace: String,
    renew_interval: Duration,
}

impl Heartbeat {
    pub fn builder() -> HeartbeatBuilder {
        HeartbeatBuilder::new()
    }

    pub fn renew_interval(&self) -> Duration {
        self.renew_interval
    }

    /// Runs the renewal loop forever. Renewal failures are retried on the
    /// next tick.
    pub async fn run(self, client: Client) {
        let mut ticker = tokio::time::interval(self.renew_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(error) = self.renew(&client).await {
                warn!(error = %error, lease = %self.extension_name, "failed to renew heartbeat lease");
            } else {
                debug!(lease = %self.extension_name, "renewed heartbeat lease");
            }
        }
    }

    async fn renew(&self, client: &Client) -> Result<(), HeartbeatError> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.extension_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.extension_name.clone()),
                renew_time: Some(MicroTime(Utc::now())),
                ..LeaseSpec::default()
            }),
        };
        let manifest = to_typed_manifest(&lease)?;

        let leases: Api<Lease> = Api::namespaced(client.clone(), &self.namespace);
        leases
            .patch(
                &self.extension_name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&manifest),
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_extension_name() {
        let err = Heartbeat::builder().build().unwrap_err();
        assert!(err.to_string().contains("missing extension name"));
    }

    #[test]
    fn builder_requires_lease_namespace() {
        let err = Heartbeat::builder()
            .with_extension_name("gardener-extension-otelcol")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("missing lease namespace"));
    }

    #[test]
    fn builder_defaults_renew_interval() {
        let heartbeat = Heartbeat::builder()
            .with_extension_name("gardener-extension-otelcol")
            .with_lease_namespace("garden")
            .build()
            .unwrap();
        assert_eq!(heartbeat.renew_interval(), DEFAULT_RENEW_INTERVAL);

        let heartbeat = Heartbeat::builder()
            .with_extension_name("gardener-extension-otelcol")
            .with_lease_namespace("garden")
            .with_renew_interval(Duration::from_secs(60))
            .build()
            .unwrap();
        assert_eq!(heartbeat.renew_interval(), Duration::from_secs(60));
    }
}
