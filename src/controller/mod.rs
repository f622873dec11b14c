//! # Extension controller
//!
//! The actuator implements the lifecycle operations, the
//! [`ExtensionController`] carries the registration settings under which the
//! runtime drives it: which extension type and classes to act on, how to
//! name the finalizer, how often to resync and how many reconciles may run
//! concurrently.

pub mod actuator;
pub mod heartbeat;
pub mod managed_resources;
pub mod resources;
pub mod secrets;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use actuator::{Actuator, ActuatorBuilder, ActuatorError, LifecycleActuator};
pub use heartbeat::{Heartbeat, HeartbeatBuilder, HeartbeatBuilderError, HeartbeatError};
pub use managed_resources::{ManagedResourceError, ObjectRegistry};
pub use resources::ObjectGraph;
pub use secrets::{CaCertificate, ManagedCertificate, SecretsError, SecretsManager};

use crate::crd::ExtensionClass;

/// Default requeue interval of the controller.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of concurrently running reconciles.
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 5;

/// Error raised when building a controller from incomplete options.
#[derive(Debug, Error)]
pub enum ControllerBuilderError {
    #[error("invalid controller config: missing actuator implementation")]
    MissingActuator,
    #[error("invalid controller config: missing controller name")]
    MissingName,
    #[error("invalid controller config: missing extension type")]
    MissingExtensionType,
    #[error("invalid controller config: missing extension class")]
    MissingExtensionClass,
}

/// Registration settings wrapping a [`LifecycleActuator`].
#[derive(Debug)]
pub struct ExtensionController<A> {
    pub(crate) actuator: Arc<A>,
    pub(crate) name: String,
    pub(crate) extension_type: String,
    pub(crate) finalizer_suffix: String,
    pub(crate) extension_classes: Vec<ExtensionClass>,
    pub(crate) resync: Duration,
    pub(crate) ignore_operation_annotation: bool,
    pub(crate) max_concurrent_reconciles: usize,
}

impl<A> ExtensionController<A> {
    pub fn builder() -> ExtensionControllerBuilder<A> {
        ExtensionControllerBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extension_type(&self) -> &str {
        &self.extension_type
    }

    /// Full finalizer placed on handled extension resources.
    pub fn finalizer(&self) -> String {
        format!("extensions.gardener.cloud/{}", self.finalizer_suffix)
    }

    /// Whether the controller is responsible for the given extension class.
    pub fn handles_class(&self, class: ExtensionClass) -> bool {
        self.extension_classes.contains(&class)
    }

    pub fn resync_interval(&self) -> Duration {
        self.resync
    }

    pub fn max_concurrent_reconciles(&self) -> usize {
        self.max_concurrent_reconciles
    }
}

/// Builder for [`ExtensionController`].
pub struct ExtensionControllerBuilder<A> {
    actuator: Option<A>,
    name: Option<String>,
    extension_type: Option<String>,
    finalizer_suffix: Option<String>,
    extension_classes: Vec<ExtensionClass>,
    resync: Duration,
    ignore_operation_annotation: bool,
    max_concurrent_reconciles: usize,
}

impl<A> Default for ExtensionControllerBuilder<A> {
    fn default() -> Self {
        Self {
            actuator: None,
            name: None,
            extension_type: None,
            finalizer_suffix: None,
            extension_classes: Vec::new(),
            resync: DEFAULT_RESYNC_INTERVAL,
            ignore_operation_annotation: false,
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
        }
    }
}

impl<A> ExtensionControllerBuilder<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actuator driven by the controller.
    pub fn with_actuator(mut self, actuator: A) -> Self {
        self.actuator = Some(actuator);
        self
    }

    /// Name of the controller.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Type of the extension resources considered for reconciliation.
    pub fn with_extension_type(mut self, extension_type: impl Into<String>) -> Self {
        self.extension_type = Some(extension_type.into());
        self
    }

    /// Suffix of the finalizer. Defaults to the controller name.
    pub fn with_finalizer_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.finalizer_suffix = Some(suffix.into());
        self
    }

    /// Extension class the controller is responsible for. May be given more
    /// than once.
    pub fn with_extension_class(mut self, class: ExtensionClass) -> Self {
        self.extension_classes.push(class);
        self
    }

    /// Requeue interval of the controller.
    pub fn with_resync_interval(mut self, resync: Duration) -> Self {
        self.resync = resync;
        self
    }

    /// Whether to reconcile without waiting for the operation annotation.
    pub fn with_ignore_operation_annotation(mut self, ignore: bool) -> Self {
        self.ignore_operation_annotation = ignore;
        self
    }

    /// Upper bound on concurrently running reconciles.
    pub fn with_max_concurrent_reconciles(mut self, max: usize) -> Self {
        self.max_concurrent_reconciles = max;
        self
    }

    pub fn build(self) -> Result<ExtensionController<A>, ControllerBuilderError> {
        let actuator = self.actuator.ok_or(ControllerBuilderError::MissingActuator)?;
        let name = self
            .name
            .filter(|name| !name.is_empty())
            .ok_or(ControllerBuilderError::MissingName)?;
        let extension_type = self
            .extension_type
            .filter(|t| !t.is_empty())
            .ok_or(ControllerBuilderError::MissingExtensionType)?;
        if self.extension_classes.is_empty() {
            return Err(ControllerBuilderError::MissingExtensionClass);
        }
        let finalizer_suffix = self.finalizer_suffix.unwrap_or_else(|| name.clone());

        Ok(ExtensionController {
            actuator: Arc::new(actuator),
            name,
            extension_type,
            finalizer_suffix,
            extension_classes: self.extension_classes,
            resync: self.resync,
            ignore_operation_annotation: self.ignore_operation_annotation,
            max_concurrent_reconciles: self.max_concurrent_reconciles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NoopActuator;

    fn builder() -> ExtensionControllerBuilder<NoopActuator> {
        ExtensionControllerBuilder::new()
    }

    #[test]
    fn builder_requires_actuator() {
        let err = builder().build().unwrap_err();
        assert!(err.to_string().contains("missing actuator implementation"));
    }

    #[test]
    fn builder_requires_name() {
        let err = builder().with_actuator(NoopActuator).build().unwrap_err();
        assert!(err.to_string().contains("missing controller name"));
    }

    #[test]
    fn builder_requires_extension_type() {
        let err = builder()
            .with_actuator(NoopActuator)
            .with_name("otelcol")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("missing extension type"));
    }

    #[test]
    fn builder_requires_extension_class() {
        let err = builder()
            .with_actuator(NoopActuator)
            .with_name("otelcol")
            .with_extension_type("otelcol")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("missing extension class"));
    }

    #[test]
    fn finalizer_suffix_defaults_to_name() {
        let controller = builder()
            .with_actuator(NoopActuator)
            .with_name("otelcol")
            .with_extension_type("otelcol")
            .with_extension_class(ExtensionClass::Shoot)
            .build()
            .unwrap();

        assert_eq!(controller.finalizer(), "extensions.gardener.cloud/otelcol");
        assert!(controller.handles_class(ExtensionClass::Shoot));
        assert!(!controller.handles_class(ExtensionClass::Seed));
        assert_eq!(controller.resync_interval(), DEFAULT_RESYNC_INTERVAL);
        assert_eq!(
            controller.max_concurrent_reconciles(),
            DEFAULT_MAX_CONCURRENT_RECONCILES
        );
    }

    #[test]
    fn builder_honors_custom_settings() {
        let controller = builder()
            .with_actuator(NoopActuator)
            .with_name("otelcol")
            .with_extension_type("otelcol")
            .with_extension_class(ExtensionClass::Shoot)
            .with_finalizer_suffix("gardener-extension-otelcol")
            .with_resync_interval(Duration::from_secs(120))
            .with_ignore_operation_annotation(true)
            .with_max_concurrent_reconciles(8)
            .build()
            .unwrap();

        assert_eq!(
            controller.finalizer(),
            "extensions.gardener.cloud/gardener-extension-otelcol"
        );
        assert_eq!(controller.resync_interval(), Duration::from_secs(120));
        assert_eq!(controller.max_concurrent_reconciles(), 8);
    }
}
