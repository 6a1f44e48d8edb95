//! The deployment run driver.
//!
//! A [`DeploymentRun`] owns the session for one execution of user
//! infrastructure logic. It hands the program a [`RunScope`], waits for the
//! program's exports and every registration round trip to settle, and then
//! invalidates the session so that nothing scheduled during the run can
//! execute against it afterwards.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use deferred::{ResourceRef, RunId, SessionOwner, ValueFactory};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::{
    Config, DeploymentError, ExportedValue, Exports, RegisteredResource, Registrar, ResourceInputs,
    ResourceMonitor, RunSettings,
};

/// What a program sees of the run it executes in.
#[derive(Debug, Clone)]
pub struct RunScope {
    settings: Arc<RunSettings>,
    factory: ValueFactory,
    config: Config,
    registrar: Registrar,
}

impl RunScope {
    /// Constructor for values bound to this run.
    pub fn values(&self) -> &ValueFactory {
        &self.factory
    }

    /// Configuration in the project namespace.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Configuration in another namespace.
    pub fn config_for(&self, namespace: &str) -> Config {
        self.config.namespace(namespace)
    }

    /// Whether this run is a preview.
    pub fn is_dry_run(&self) -> bool {
        self.settings.dry_run
    }

    /// Project name.
    pub fn project(&self) -> &str {
        &self.settings.project
    }

    /// Stack name.
    pub fn stack(&self) -> &str {
        &self.settings.stack
    }

    /// Registers a resource. See [`Registrar::register`].
    pub fn register(
        &self,
        type_token: &str,
        name: &str,
        inputs: ResourceInputs,
        outputs: &[&str],
    ) -> Result<RegisteredResource, DeploymentError> {
        self.registrar.register(type_token, name, inputs, outputs)
    }
}

/// Outcome of a completed run.
///
/// Serialises without plaintext secrets: secret exports are written as
/// [`crate::exports::SECRET_MARKER`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identity.
    pub run: RunId,
    /// Project name.
    pub project: String,
    /// Stack name.
    pub stack: String,
    /// Whether the run was a preview.
    pub dry_run: bool,
    /// When the program started.
    pub started_at: DateTime<Utc>,
    /// When the run finished settling.
    pub finished_at: DateTime<Utc>,
    /// Registered resources, in registration order.
    pub resources: Vec<ResourceRef>,
    /// Settled exports.
    pub outputs: BTreeMap<String, ExportedValue>,
}

/// One deployment run.
pub struct DeploymentRun {
    run: RunId,
    owner: SessionOwner,
    scope: RunScope,
}

impl DeploymentRun {
    /// Opens a run for `settings`, registering resources through `monitor`.
    pub fn new(settings: RunSettings, monitor: Arc<dyn ResourceMonitor>) -> Self {
        let run = RunId::new_random();
        let owner = SessionOwner::open(run);
        let factory = ValueFactory::new(owner.session());
        let config = Config::new(&settings, settings.project.clone(), factory.clone());
        let registrar = Registrar::new(monitor, factory.clone(), settings.dry_run);
        Self {
            run,
            owner,
            scope: RunScope {
                settings: Arc::new(settings),
                factory,
                config,
                registrar,
            },
        }
    }

    /// The run identity.
    pub fn run_id(&self) -> RunId {
        self.run
    }

    /// The scope handed to the program.
    pub fn scope(&self) -> RunScope {
        self.scope.clone()
    }

    /// Runs `program`, waits for its exports and all registrations, then
    /// ends the run.
    ///
    /// Registration round trips are always drained, even when the program
    /// or an export fails. The first failure is returned.
    pub async fn execute<F, Fut>(self, program: F) -> Result<RunSummary, DeploymentError>
    where
        F: FnOnce(RunScope) -> Fut,
        Fut: Future<Output = Result<Exports, DeploymentError>>,
    {
        let settings = Arc::clone(&self.scope.settings);
        let span = tracing::info_span!(
            "deployment_run",
            run = %self.run,
            project = %settings.project,
            stack = %settings.stack,
            dry_run = settings.dry_run,
        );

        async move {
            let started_at = Utc::now();
            tracing::info!("Deployment run started");

            let outputs = match program(self.scope()).await {
                Ok(exports) => exports.settle().await,
                Err(err) => Err(err),
            };
            let registrations = self.scope.registrar.wait_idle().await;
            self.owner.invalidate();

            let outputs = outputs?;
            registrations?;

            let summary = RunSummary {
                run: self.run,
                project: settings.project.clone(),
                stack: settings.stack.clone(),
                dry_run: settings.dry_run,
                started_at,
                finished_at: Utc::now(),
                resources: self.scope.registrar.registered(),
                outputs,
            };
            tracing::info!(
                resources = summary.resources.len(),
                outputs = summary.outputs.len(),
                "Deployment run finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }
}
