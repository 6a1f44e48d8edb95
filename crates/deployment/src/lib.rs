//! Deployment runs for Strata.
//!
//! This crate wraps the [`deferred`] engine in everything one execution of a
//! user's infrastructure program needs: run settings and configuration, the
//! resource registration round trip, the export surface, and the tracing
//! subscriber installed by the host process.
//!
//! ## Architectural Layer
//!
//! **Orchestration.** The external orchestration engine is reached only
//! through the [`ResourceMonitor`] port; transport adapters implement it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`settings`] | `RunSettings`, loaded from the environment |
//! | [`config`] | Namespaced `Config` lookups, secret-aware |
//! | [`monitor`] | `ResourceMonitor` port and wire request/response types |
//! | [`registration`] | `Registrar` round trip, `RegisteredResource` |
//! | [`exports`] | `Exports` and settled `ExportedValue`s |
//! | [`run`] | `DeploymentRun` driver and `RunScope` |
//! | [`telemetry`] | `init_tracing` |
//! | [`errors`] | `DeploymentError`, `ConfigError`, `MonitorError` |

pub mod config;
pub mod errors;
pub mod exports;
pub mod monitor;
pub mod registration;
pub mod run;
pub mod settings;
pub mod telemetry;

pub use config::Config;
pub use errors::{ConfigError, DeploymentError, MonitorError};
pub use exports::{ExportedValue, Exports};
pub use monitor::{RegisterResourceRequest, RegisterResourceResponse, ResourceMonitor};
pub use registration::{RegisteredResource, Registrar, ResourceInputs};
pub use run::{DeploymentRun, RunScope, RunSummary};
pub use settings::RunSettings;
pub use telemetry::{init_tracing, LogFormat};
