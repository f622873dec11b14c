//! # Watch loop
//!
//! Watches `Extension` resources across all namespaces and drives the
//! actuator through the lifecycle mapping:
//!
//! - deletion timestamp set: delete, then release the finalizer
//! - operation annotation `migrate` / `restore` / `force-delete`: the
//!   corresponding lifecycle operation
//! - otherwise: reconcile
//!
//! On success the operation annotation is removed and the status is updated
//! with the outcome; the resource is requeued on the resync interval.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config, Controller};
use kube_runtime::watcher;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::OPERATION_ANNOTATION;
use crate::controller::{ActuatorError, ExtensionController, LifecycleActuator};
use crate::crd::Extension;
use crate::observability::{metrics, ServerState};

use super::error_policy::error_policy;

/// Errors surfaced by the reconcile loop.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error("extension resource has no namespace")]
    MissingNamespace,
}

/// Lifecycle operation resolved for a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Reconcile,
    Delete,
    ForceDelete,
    Migrate,
    Restore,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Reconcile => "reconcile",
            Operation::Delete => "delete",
            Operation::ForceDelete => "force-delete",
            Operation::Migrate => "migrate",
            Operation::Restore => "restore",
        }
    }

    fn last_operation_type(&self) -> &'static str {
        match self {
            Operation::Reconcile => "Reconcile",
            Operation::Delete => "Delete",
            Operation::ForceDelete => "Delete",
            Operation::Migrate => "Migrate",
            Operation::Restore => "Restore",
        }
    }
}

/// Shared state of the watch loop.
pub struct Context<A> {
    pub controller: ExtensionController<A>,
    pub client: Client,
    error_counts: Mutex<HashMap<String, u32>>,
}

impl<A> Context<A> {
    /// Records a consecutive error for the resource and returns the count.
    pub fn record_error(&self, key: &str) -> u32 {
        let mut counts = self.error_counts.lock().unwrap_or_else(|e| e.into_inner());
        let entry = counts.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Clears the consecutive error count of the resource.
    pub fn clear_errors(&self, key: &str) {
        let mut counts = self.error_counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.remove(key);
    }
}

/// Runs the controller watch loop until a shutdown signal arrives.
pub async fn run_watch_loop<A: LifecycleActuator>(
    client: Client,
    controller: ExtensionController<A>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    info!(
        controller = controller.name(),
        extension_type = controller.extension_type(),
        "starting controller watch loop"
    );

    let extensions: Api<Extension> = Api::all(client.clone());
    let concurrency = controller.max_concurrent_reconciles() as u16;
    let ctx = Arc::new(Context {
        controller,
        client,
        error_counts: Mutex::new(HashMap::new()),
    });

    Controller::new(extensions, watcher::Config::default())
        .with_config(Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!(name = %obj.name, "reconciled extension"),
                Err(error) => warn!(error = %error, "watch stream error"),
            }
        })
        .await;

    server_state.mark_not_ready();
    info!("controller stopped gracefully");

    Ok(())
}

/// Reconciles a single watch event.
pub async fn reconcile<A: LifecycleActuator>(
    extension: Arc<Extension>,
    ctx: Arc<Context<A>>,
) -> Result<Action, ReconcileError> {
    let controller = &ctx.controller;

    // The watch covers all extension resources; only the configured type
    // and classes are ours.
    if extension.spec.type_ != controller.extension_type()
        || !controller.handles_class(extension.class())
    {
        return Ok(Action::await_change());
    }

    let name = extension.name_any();
    let namespace = extension.namespace().ok_or(ReconcileError::MissingNamespace)?;
    let api: Api<Extension> = Api::namespaced(ctx.client.clone(), &namespace);
    let finalizer = controller.finalizer();
    let resource_key = format!("{namespace}/{name}");

    if extension.metadata.deletion_timestamp.is_some() {
        if !has_finalizer(&extension, &finalizer) {
            return Ok(Action::await_change());
        }

        run_operation(ctx.as_ref(), &extension, &api, &name, &namespace, Operation::Delete).await?;
        remove_finalizer(&api, &extension, &finalizer).await?;
        ctx.clear_errors(&resource_key);

        return Ok(Action::await_change());
    }

    let operation = match extension.requested_operation() {
        Some("migrate") => Operation::Migrate,
        Some("restore") => Operation::Restore,
        Some("force-delete") => Operation::ForceDelete,
        Some(_) => Operation::Reconcile,
        None if controller.ignore_operation_annotation => Operation::Reconcile,
        None => {
            // Wait for the platform to request an operation, but keep
            // checking on the resync interval.
            debug!(name = %name, "no operation requested, skipping");
            return Ok(Action::requeue(controller.resync_interval()));
        }
    };

    ensure_finalizer(&api, &extension, &finalizer).await?;
    run_operation(ctx.as_ref(), &extension, &api, &name, &namespace, operation).await?;
    ctx.clear_errors(&resource_key);

    if operation == Operation::ForceDelete {
        remove_finalizer(&api, &extension, &finalizer).await?;
        return Ok(Action::await_change());
    }

    remove_operation_annotation(&api, &extension, &name).await?;

    Ok(Action::requeue(controller.resync_interval()))
}

/// Dispatches the lifecycle operation to the actuator, records metrics and
/// reflects the outcome in the resource status.
async fn run_operation<A: LifecycleActuator>(
    ctx: &Context<A>,
    extension: &Extension,
    api: &Api<Extension>,
    name: &str,
    namespace: &str,
    operation: Operation,
) -> Result<(), ReconcileError> {
    info!(name = %name, namespace = %namespace, operation = operation.as_str(), "running operation");

    let started = Instant::now();
    let result = match operation {
        Operation::Reconcile => ctx.controller.actuator.reconcile(extension).await,
        Operation::Delete => ctx.controller.actuator.delete(extension).await,
        Operation::ForceDelete => ctx.controller.actuator.force_delete(extension).await,
        Operation::Migrate => ctx.controller.actuator.migrate(extension).await,
        Operation::Restore => ctx.controller.actuator.restore(extension).await,
    };
    metrics::observe_operation(namespace, operation.as_str(), started.elapsed());

    match result {
        Ok(()) => {
            update_status(api, extension, name, operation, None).await;
            Ok(())
        }
        Err(error) => {
            update_status(api, extension, name, operation, Some(&error)).await;
            Err(error.into())
        }
    }
}

/// Updates the extension status with the outcome of an operation. Status
/// updates are best effort; a failure here must not fail the operation.
async fn update_status(
    api: &Api<Extension>,
    extension: &Extension,
    name: &str,
    operation: Operation,
    error: Option<&ActuatorError>,
) {
    let last_operation = match error {
        None => json!({
            "type": operation.last_operation_type(),
            "state": "Succeeded",
            "progress": 100,
            "description": format!("{} succeeded", operation.as_str()),
            "lastUpdateTime": Utc::now().to_rfc3339(),
        }),
        Some(error) => json!({
            "type": operation.last_operation_type(),
            "state": "Error",
            "progress": 50,
            "description": error.to_string(),
            "lastUpdateTime": Utc::now().to_rfc3339(),
        }),
    };
    let status = json!({
        "status": {
            "observedGeneration": extension.metadata.generation,
            "lastOperation": last_operation,
        }
    });

    if let Err(patch_error) = api
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&status))
        .await
    {
        warn!(name = %name, error = %patch_error, "failed to update extension status");
    }
}

fn has_finalizer(extension: &Extension, finalizer: &str) -> bool {
    extension
        .metadata
        .finalizers
        .as_ref()
        .map(|f| f.iter().any(|item| item == finalizer))
        .unwrap_or(false)
}

async fn ensure_finalizer(
    api: &Api<Extension>,
    extension: &Extension,
    finalizer: &str,
) -> Result<(), ReconcileError> {
    if has_finalizer(extension, finalizer) {
        return Ok(());
    }

    let mut finalizers = extension.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(finalizer.to_string());
    let patch = json!({"metadata": {"finalizers": finalizers}});
    api.patch(
        &extension.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;

    Ok(())
}

async fn remove_finalizer(
    api: &Api<Extension>,
    extension: &Extension,
    finalizer: &str,
) -> Result<(), ReconcileError> {
    if !has_finalizer(extension, finalizer) {
        return Ok(());
    }

    let finalizers: Vec<String> = extension
        .metadata
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|item| item != finalizer)
        .collect();
    let patch = json!({"metadata": {"finalizers": finalizers}});
    api.patch(
        &extension.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;

    Ok(())
}

async fn remove_operation_annotation(
    api: &Api<Extension>,
    extension: &Extension,
    name: &str,
) -> Result<(), ReconcileError> {
    if extension.requested_operation().is_none() {
        return Ok(());
    }

    let patch = json!({"metadata": {"annotations": {OPERATION_ANNOTATION: null}}});
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;

    Ok(())
}
