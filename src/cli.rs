//! # Command line interface
//!
//! Flags of the controller manager and the startup wiring: logging, client,
//! observability servers, leader election, heartbeat and the watch loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::builder::PossibleValuesParser;
use clap::Parser;
use kube::Client;
use tracing::{error, info};

use crate::constants::{DEFAULT_COLLECTOR_IMAGE, DEFAULT_TARGET_ALLOCATOR_IMAGE};
use crate::controller::{Actuator, ExtensionController, Heartbeat};
use crate::observability::{self, ServerState};
use crate::runtime::{run_watch_loop, LeaderElection};
use crate::version;

/// Command-line flags of the controller manager. Every flag can also be set
/// through its environment variable.
#[derive(Parser, Debug)]
#[command(
    name = "otelcol-extension-controller",
    version = version::VERSION,
    about = "Kubernetes extension controller for the OpenTelemetry Collector"
)]
pub struct Flags {
    /// Name of the extension.
    #[arg(long, env = "EXTENSION_NAME", default_value = "gardener-extension-otelcol")]
    pub extension_name: String,

    /// The address the metrics endpoint binds to.
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub metrics_bind_address: String,

    /// The address the probe endpoint binds to.
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    pub health_probe_bind_address: String,

    /// Renew the heartbeat lease on this interval.
    #[arg(
        long,
        env = "HEARTBEAT_RENEW_INTERVAL",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub heartbeat_renew_interval: Duration,

    /// Namespace to use for the heartbeat lease.
    #[arg(long, env = "HEARTBEAT_NAMESPACE", default_value = "gardener-extension-otelcol")]
    pub heartbeat_namespace: String,

    /// Enable leader election for the controller manager.
    #[arg(long, env = "LEADER_ELECTION")]
    pub leader_election: bool,

    /// The leader election id to use, if leader election is enabled.
    #[arg(
        long,
        env = "LEADER_ELECTION_ID",
        default_value = "gardener-extension-otelcol-leader-election"
    )]
    pub leader_election_id: String,

    /// Namespace to use for the leader election lease.
    #[arg(
        long,
        env = "LEADER_ELECTION_NAMESPACE",
        default_value = "gardener-extension-otelcol"
    )]
    pub leader_election_namespace: String,

    /// Reconcile without waiting for the operation annotation.
    #[arg(long, env = "IGNORE_OPERATION_ANNOTATION")]
    pub ignore_operation_annotation: bool,

    /// Max number of concurrent reconciliations.
    #[arg(long, env = "MAX_CONCURRENT_RECONCILES", default_value_t = 5)]
    pub max_concurrent_reconciles: usize,

    /// Path to a kubeconfig when running out-of-cluster.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Verbosity of the controller logs.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log encoding format, json or text.
    #[arg(
        long,
        env = "LOG_FORMAT",
        default_value = "text",
        value_parser = PossibleValuesParser::new(["text", "json"])
    )]
    pub log_format: String,

    /// Requeue interval of the controller.
    #[arg(
        long,
        env = "RESYNC_INTERVAL",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub resync_interval: Duration,

    /// Version of the platform, provided by the gardenlet during
    /// deployment.
    #[arg(long, env = "GARDENER_VERSION")]
    pub gardener_version: Option<String>,

    /// Gardenlet feature gate as `name=bool`, provided by the gardenlet
    /// during deployment. May be given multiple times.
    #[arg(long = "gardenlet-feature-gate", value_parser = parse_feature_gate)]
    pub gardenlet_feature_gates: Vec<(String, bool)>,

    /// Image of the Collector workload.
    #[arg(long, env = "COLLECTOR_IMAGE", default_value = DEFAULT_COLLECTOR_IMAGE)]
    pub collector_image: String,

    /// Image of the Target Allocator workload.
    #[arg(long, env = "TARGET_ALLOCATOR_IMAGE", default_value = DEFAULT_TARGET_ALLOCATOR_IMAGE)]
    pub target_allocator_image: String,
}

/// Parses a `name=bool` feature gate flag value.
fn parse_feature_gate(raw: &str) -> Result<(String, bool), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected `name=bool`, got `{raw}`"))?;
    if name.is_empty() {
        return Err("feature gate name must not be empty".to_string());
    }
    let enabled: bool = value
        .parse()
        .map_err(|_| format!("invalid value for gardenlet feature gate: `{value}`"))?;

    Ok((name.to_string(), enabled))
}

/// Starts the controller manager with the given flags and runs until a
/// shutdown signal arrives.
pub async fn run(flags: Flags) -> Result<(), anyhow::Error> {
    observability::logging::init_tracing(&flags.log_level, &flags.log_format)?;

    info!(version = version::VERSION, "starting extension controller");

    if let Some(path) = &flags.kubeconfig {
        std::env::set_var("KUBECONFIG", path);
    }
    let client = Client::try_default()
        .await
        .context("failed to get rest config")?;

    let server_state = ServerState::new();
    let metrics_addr = flags.metrics_bind_address.clone();
    tokio::spawn(async move {
        if let Err(e) = observability::start_metrics_server(&metrics_addr).await {
            error!(error = %e, "metrics server failed");
        }
    });
    let health_addr = flags.health_probe_bind_address.clone();
    let health_state = server_state.clone();
    tokio::spawn(async move {
        if let Err(e) = observability::start_health_server(&health_addr, health_state).await {
            error!(error = %e, "health probe server failed");
        }
    });

    if flags.leader_election {
        let identity = std::env::var("HOSTNAME")
            .unwrap_or_else(|_| format!("{}-{}", flags.extension_name, std::process::id()));
        let election = LeaderElection::new(
            &flags.leader_election_id,
            &flags.leader_election_namespace,
            &identity,
        );
        election.acquire(&client).await;
        tokio::spawn(election.keep_renewing(client.clone()));
    }

    info!("creating heartbeat controller");
    let heartbeat = Heartbeat::builder()
        .with_extension_name(&flags.extension_name)
        .with_lease_namespace(&flags.heartbeat_namespace)
        .with_renew_interval(flags.heartbeat_renew_interval)
        .build()
        .context("failed to create heartbeat controller")?;
    tokio::spawn(heartbeat.run(client.clone()));

    info!("creating actuator");
    let feature_gates: HashMap<String, bool> =
        flags.gardenlet_feature_gates.iter().cloned().collect();
    if let Some(v) = &flags.gardener_version {
        info!(version = %v, "configured gardener version");
    }
    for (feature, enabled) in &feature_gates {
        info!(feature = %feature, enabled = enabled, "configured gardenlet feature gate");
    }

    let mut builder = Actuator::builder()
        .with_client(client.clone())
        .with_gardenlet_feature_gates(feature_gates)
        .with_collector_image(&flags.collector_image)
        .with_target_allocator_image(&flags.target_allocator_image);
    if let Some(version) = &flags.gardener_version {
        builder = builder.with_gardener_version(version);
    }
    let actuator = builder.build().context("failed to create actuator")?;

    info!("creating controller");
    let controller = ExtensionController::builder()
        .with_name(actuator.name())
        .with_extension_type(actuator.extension_type())
        .with_finalizer_suffix(actuator.finalizer_suffix())
        .with_extension_class(actuator.extension_class())
        .with_ignore_operation_annotation(flags.ignore_operation_annotation)
        .with_resync_interval(flags.resync_interval)
        .with_max_concurrent_reconciles(flags.max_concurrent_reconciles)
        .with_actuator(actuator)
        .build()
        .context("failed to create controller")?;

    run_watch_loop(client, controller, server_state).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_gates_parse_name_and_value() {
        assert_eq!(
            parse_feature_gate("OpenTelemetryCollector=true").unwrap(),
            ("OpenTelemetryCollector".to_string(), true)
        );
        assert_eq!(
            parse_feature_gate("OpenTelemetryCollector=false").unwrap(),
            ("OpenTelemetryCollector".to_string(), false)
        );

        assert!(parse_feature_gate("OpenTelemetryCollector").is_err());
        assert!(parse_feature_gate("=true").is_err());
        assert!(parse_feature_gate("Gate=yes").is_err());
    }

    #[test]
    fn flags_have_working_defaults() {
        let flags = Flags::parse_from(["otelcol-extension-controller"]);

        assert_eq!(flags.extension_name, "gardener-extension-otelcol");
        assert_eq!(flags.metrics_bind_address, "0.0.0.0:8080");
        assert_eq!(flags.health_probe_bind_address, "0.0.0.0:8081");
        assert_eq!(flags.heartbeat_renew_interval, Duration::from_secs(30));
        assert_eq!(flags.resync_interval, Duration::from_secs(30));
        assert_eq!(flags.max_concurrent_reconciles, 5);
        assert!(!flags.leader_election);
        assert!(!flags.ignore_operation_annotation);
        assert_eq!(flags.log_level, "info");
        assert_eq!(flags.log_format, "text");
    }

    #[test]
    fn duration_flags_accept_humantime_values() {
        let flags = Flags::parse_from([
            "otelcol-extension-controller",
            "--resync-interval",
            "2m",
            "--heartbeat-renew-interval",
            "45s",
            "--gardenlet-feature-gate",
            "OpenTelemetryCollector=true",
        ]);

        assert_eq!(flags.resync_interval, Duration::from_secs(120));
        assert_eq!(flags.heartbeat_renew_interval, Duration::from_secs(45));
        assert_eq!(
            flags.gardenlet_feature_gates,
            vec![("OpenTelemetryCollector".to_string(), true)]
        );
    }
}
