//! # Leader election
//!
//! Lease-based leader election: the controller blocks until it holds the
//! configured lease and keeps renewing it for as long as it runs. Writes go
//! through replace with the resource version from the preceding read, so
//! two candidates cannot both acquire an expired lease.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client};
use tracing::{debug, error, info, warn};

/// Default duration after which a lease not renewed by its holder is up for
/// grabs.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);
/// Default wait between acquisition attempts.
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(2);

/// Lease-based leader election for a single lease.
#[derive(Debug, Clone)]
pub struct LeaderElection {
    lease_name: String,
    namespace: String,
    identity: String,
    lease_duration: Duration,
    retry_period: Duration,
}

impl LeaderElection {
    pub fn new(lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            lease_duration: DEFAULT_LEASE_DURATION,
            retry_period: DEFAULT_RETRY_PERIOD,
        }
    }

    /// Blocks until this candidate holds the lease.
    pub async fn acquire(&self, client: &Client) {
        info!(
            lease = %self.lease_name,
            namespace = %self.namespace,
            identity = %self.identity,
            "waiting to acquire leadership"
        );

        loop {
            match self.try_acquire(client).await {
                Ok(true) => {
                    info!(identity = %self.identity, "leadership acquired");
                    return;
                }
                Ok(false) => {}
                Err(error) => {
                    warn!(error = %error, "leader election attempt failed");
                }
            }

            tokio::time::sleep(self.retry_period).await;
        }
    }

    /// Keeps renewing the held lease. Exits the process when the lease is
    /// lost, so a stale leader cannot keep reconciling.
    pub async fn keep_renewing(self, client: Client) {
        let renew_period = self.lease_duration / 3;
        let mut ticker = tokio::time::interval(renew_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.try_acquire(&client).await {
                Ok(true) => debug!(lease = %self.lease_name, "renewed leadership lease"),
                Ok(false) => {
                    error!(lease = %self.lease_name, "lost leadership, exiting");
                    std::process::exit(1);
                }
                Err(error) => {
                    warn!(error = %error, "failed to renew leadership lease");
                }
            }
        }
    }

    /// Attempts to acquire or renew the lease. Returns whether this
    /// candidate holds it afterwards.
    async fn try_acquire(&self, client: &Client) -> Result<bool, kube::Error> {
        let leases: Api<Lease> = Api::namespaced(client.clone(), &self.namespace);
        let now = Utc::now();

        match leases.get(&self.lease_name).await {
            Ok(mut lease) => {
                let spec = lease.spec.clone().unwrap_or_default();
                let holder = spec.holder_identity.clone().unwrap_or_default();
                let held_by_us = holder == self.identity;
                let expired = lease_expired(&spec, now, self.lease_duration);

                if !held_by_us && !holder.is_empty() && !expired {
                    return Ok(false);
                }

                let transitions = spec.lease_transitions.unwrap_or(0);
                lease.spec = Some(LeaseSpec {
                    holder_identity: Some(self.identity.clone()),
                    acquire_time: if held_by_us {
                        spec.acquire_time
                    } else {
                        Some(MicroTime(now))
                    },
                    renew_time: Some(MicroTime(now)),
                    lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
                    lease_transitions: Some(if held_by_us { transitions } else { transitions + 1 }),
                    ..LeaseSpec::default()
                });

                // Replace carries the resource version from the read above;
                // a concurrent writer wins and we retry.
                match leases
                    .replace(&self.lease_name, &PostParams::default(), &lease)
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
                    Err(err) => Err(err),
                }
            }
            Err(kube::Error::Api(err)) if err.code == 404 => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(self.lease_name.clone()),
                        namespace: Some(self.namespace.clone()),
                        ..ObjectMeta::default()
                    },
                    spec: Some(LeaseSpec {
                        holder_identity: Some(self.identity.clone()),
                        acquire_time: Some(MicroTime(now)),
                        renew_time: Some(MicroTime(now)),
                        lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
                        lease_transitions: Some(1),
                        ..LeaseSpec::default()
                    }),
                };

                match leases.create(&PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }
}

/// Whether a lease has not been renewed within its duration.
fn lease_expired(spec: &LeaseSpec, now: DateTime<Utc>, fallback_duration: Duration) -> bool {
    let renew_time = match &spec.renew_time {
        Some(MicroTime(time)) => *time,
        None => return true,
    };
    let duration = spec
        .lease_duration_seconds
        .map(|secs| Duration::from_secs(secs.max(0) as u64))
        .unwrap_or(fallback_duration);

    now > renew_time + chrono::Duration::from_std(duration).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(renewed_secs_ago: i64, duration_secs: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some("other".into()),
            renew_time: Some(MicroTime(Utc::now() - chrono::Duration::seconds(renewed_secs_ago))),
            lease_duration_seconds: Some(duration_secs),
            ..LeaseSpec::default()
        }
    }

    #[test]
    fn fresh_lease_is_not_expired() {
        assert!(!lease_expired(&spec(5, 15), Utc::now(), DEFAULT_LEASE_DURATION));
    }

    #[test]
    fn stale_lease_is_expired() {
        assert!(lease_expired(&spec(30, 15), Utc::now(), DEFAULT_LEASE_DURATION));
    }

    #[test]
    fn lease_without_renew_time_is_expired() {
        assert!(lease_expired(
            &LeaseSpec::default(),
            Utc::now(),
            DEFAULT_LEASE_DURATION
        ));
    }
}
