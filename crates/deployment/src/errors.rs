//! Error types for a deployment run.
//!
//! [`DeploymentError`] covers conditions that fail the run as a whole.
//! [`ConfigError`] and [`MonitorError`] are the component-level errors of the
//! configuration layer and the resource monitor port respectively.

use std::time::Duration;

use deferred::DeferredError;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors raised while loading run settings or reading configuration.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// A required environment setting was not provided.
    #[error("Missing required setting {variable}")]
    MissingSetting {
        /// The environment variable that was expected.
        variable: String,
    },

    /// An environment setting was present but could not be parsed.
    #[error("Invalid setting {variable}: {reason}")]
    InvalidSetting {
        /// The environment variable that failed to parse.
        variable: String,
        /// Parser message.
        reason: String,
    },

    /// A required configuration key has no value.
    #[error("Missing required configuration value '{key}'")]
    MissingValue {
        /// The fully qualified `namespace:key`.
        key: String,
    },

    /// A configuration value could not be decoded into the requested type.
    #[error("Configuration value '{key}' is invalid: {reason}")]
    InvalidValue {
        /// The fully qualified `namespace:key`.
        key: String,
        /// Decoder message.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Resource monitor errors
// ---------------------------------------------------------------------------

/// Errors returned by a [`crate::ResourceMonitor`] implementation.
///
/// All variants, timeouts included, reach awaiting user code as ordinary
/// computation failures of the affected outputs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MonitorError {
    /// The orchestration engine could not be reached.
    #[error("Resource monitor unavailable: {message}")]
    Unavailable {
        /// Transport-level description.
        message: String,
    },

    /// The orchestration engine refused the registration.
    #[error("Registration of '{resource}' rejected: {reason}")]
    Rejected {
        /// The `type::name` key of the resource.
        resource: String,
        /// Reason returned by the engine.
        reason: String,
    },

    /// The remote call did not complete in time.
    #[error("Resource monitor call timed out after {after:?}")]
    Timeout {
        /// How long the caller waited.
        after: Duration,
    },
}

// ---------------------------------------------------------------------------
// Run-level errors
// ---------------------------------------------------------------------------

/// Errors that fail a deployment run.
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// Settings or configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A resource registration round trip failed.
    ///
    /// The same failure is delivered to every output of the resource.
    #[error("Registration of '{resource}' failed")]
    Registration {
        /// The `type::name` key of the resource.
        resource: String,
        /// Underlying failure.
        #[source]
        source: DeferredError,
    },

    /// An exported value failed to settle.
    #[error("Export '{name}' failed")]
    Export {
        /// Export name.
        name: String,
        /// Underlying failure.
        #[source]
        source: DeferredError,
    },

    /// An output was requested that the resource never declared.
    #[error("Output '{output}' is not declared by resource '{resource}'")]
    UndeclaredOutput {
        /// The `type::name` key of the resource.
        resource: String,
        /// The requested output name.
        output: String,
    },

    /// A resource, type or output name was empty.
    #[error("Invalid name: {message}")]
    InvalidName {
        /// What was invalid.
        message: String,
    },

    /// A deferred computation in the user program failed.
    #[error(transparent)]
    Deferred(#[from] DeferredError),

    /// A background registration task panicked or was cancelled.
    #[error("Background task failed: {message}")]
    Task {
        /// Join error description.
        message: String,
    },

    /// The tracing subscriber could not be installed.
    #[error("Failed to initialise tracing: {message}")]
    Telemetry {
        /// Installer message.
        message: String,
    },
}
