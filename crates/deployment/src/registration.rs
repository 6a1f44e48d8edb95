//! The resource registration round trip.
//!
//! [`Registrar::register`] returns immediately: outputs are created eagerly as
//! deferred values paired with completion sources, so user code can compose
//! over them before the engine has answered. The round trip itself runs as a
//! background task that
//!
//! 1. settles every input and collects its value, flags and dependency set,
//! 2. sends the request through the [`ResourceMonitor`],
//! 3. resolves each declared output exactly once from the response.
//!
//! If any step fails, every pending output fails. A failed input is reported
//! as a computation failure of the registration with the input error as its
//! cause.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use deferred::{
    CompletionSource, DeferredError, DeferredValue, OutputName, Payload, ResourceRef, TypeToken,
    ValueFactory,
};
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::{DeploymentError, RegisterResourceRequest, RegisterResourceResponse, ResourceMonitor};

/// Name of the output carrying the provider-assigned ID.
pub const ID_OUTPUT: &str = "id";

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Named input values for a resource, erased to JSON.
#[derive(Debug, Clone, Default)]
pub struct ResourceInputs {
    values: BTreeMap<String, DeferredValue<Value>>,
}

impl ResourceInputs {
    /// No inputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a deferred input.
    #[must_use]
    pub fn with<T>(mut self, name: impl Into<String>, value: &DeferredValue<T>) -> Self
    where
        T: Payload + Serialize,
    {
        self.values.insert(name.into(), value.into_json());
        self
    }

    /// Adds a plain, known input.
    #[must_use]
    pub fn with_plain(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), DeferredValue::of(value));
        self
    }

    /// Number of inputs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no inputs.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Registered resources
// ---------------------------------------------------------------------------

/// Handle to a resource whose registration may still be in flight.
#[derive(Debug, Clone)]
pub struct RegisteredResource {
    resource: ResourceRef,
    id: DeferredValue<String>,
    outputs: BTreeMap<OutputName, DeferredValue<Value>>,
}

impl RegisteredResource {
    /// The resource's identity.
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    /// The provider-assigned ID. Unknown during a preview when the engine
    /// has not assigned one.
    pub fn id(&self) -> &DeferredValue<String> {
        &self.id
    }

    /// The raw JSON value of a declared output.
    pub fn output_json(&self, name: &str) -> Result<DeferredValue<Value>, DeploymentError> {
        OutputName::new(name)
            .and_then(|key| self.outputs.get(&key).cloned())
            .ok_or_else(|| DeploymentError::UndeclaredOutput {
                resource: self.resource.to_string(),
                output: name.to_string(),
            })
    }

    /// A typed view of a declared output.
    ///
    /// If the engine returns a value that does not decode into `T`, awaiting
    /// the view fails with a shape mismatch.
    pub fn output<T>(&self, name: &str) -> Result<DeferredValue<T>, DeploymentError>
    where
        T: Payload + DeserializeOwned,
    {
        Ok(self.output_json(name)?.decode_named(name))
    }

    /// Declared output names.
    pub fn output_names(&self) -> impl Iterator<Item = &OutputName> {
        self.outputs.keys()
    }
}

// ---------------------------------------------------------------------------
// Registrar
// ---------------------------------------------------------------------------

type RoundTrip = JoinHandle<Result<(), DeploymentError>>;

/// Drives registration round trips for one run.
#[derive(Clone)]
pub struct Registrar {
    monitor: Arc<dyn ResourceMonitor>,
    factory: ValueFactory,
    dry_run: bool,
    pending: Arc<Mutex<Vec<RoundTrip>>>,
    registered: Arc<Mutex<Vec<ResourceRef>>>,
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("dry_run", &self.dry_run)
            .field("registered", &lock(&self.registered).len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Registrar {
    /// A registrar sending requests to `monitor` and creating outputs
    /// through `factory`.
    pub fn new(monitor: Arc<dyn ResourceMonitor>, factory: ValueFactory, dry_run: bool) -> Self {
        Self {
            monitor,
            factory,
            dry_run,
            pending: Arc::default(),
            registered: Arc::default(),
        }
    }

    /// Registers a resource and returns its handle without waiting for the
    /// engine.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(
        &self,
        type_token: &str,
        name: &str,
        inputs: ResourceInputs,
        outputs: &[&str],
    ) -> Result<RegisteredResource, DeploymentError> {
        let type_token = TypeToken::new(type_token).ok_or_else(|| DeploymentError::InvalidName {
            message: "resource type token is empty".to_string(),
        })?;
        if name.is_empty() {
            return Err(DeploymentError::InvalidName {
                message: format!("resource of type '{type_token}' has an empty name"),
            });
        }

        let resource = ResourceRef::new(&type_token, name);
        let factory = self.factory.for_resource(resource.clone());

        let mut values = BTreeMap::new();
        let mut sources = Vec::with_capacity(outputs.len());
        for output in outputs {
            let key = OutputName::new(*output).ok_or_else(|| DeploymentError::InvalidName {
                message: format!("resource '{resource}' declares an empty output name"),
            })?;
            let (value, source) = factory.completion::<Value>(key.clone());
            values.insert(key, value);
            sources.push(source);
        }
        let id_name = OutputName::new(ID_OUTPUT).ok_or_else(|| DeploymentError::InvalidName {
            message: "id output name is empty".to_string(),
        })?;
        let (id, id_source) = factory.completion::<String>(id_name);

        let request = PendingRequest {
            resource: resource.clone(),
            type_token,
            name: name.to_string(),
            inputs,
            declared_outputs: outputs.iter().map(|o| o.to_string()).collect(),
            dry_run: self.dry_run,
        };
        let span = tracing::info_span!(
            "register_resource",
            resource = %resource,
            dry_run = self.dry_run
        );
        let handle = tokio::spawn(
            round_trip(Arc::clone(&self.monitor), request, sources, id_source).instrument(span),
        );

        lock(&self.pending).push(handle);
        lock(&self.registered).push(resource.clone());
        tracing::debug!(
            resource = %resource,
            outputs = outputs.len(),
            "Resource registration started"
        );

        Ok(RegisteredResource {
            resource,
            id,
            outputs: values,
        })
    }

    /// Resources registered so far, in registration order.
    pub fn registered(&self) -> Vec<ResourceRef> {
        lock(&self.registered).clone()
    }

    /// Waits for every round trip started so far, including any started
    /// while waiting. Returns the first failure after all have finished.
    pub async fn wait_idle(&self) -> Result<(), DeploymentError> {
        let mut first_failure = None;
        loop {
            let batch = std::mem::take(&mut *lock(&self.pending));
            if batch.is_empty() {
                break;
            }
            for outcome in join_all(batch).await {
                let outcome = outcome.map_err(|e| DeploymentError::Task {
                    message: e.to_string(),
                });
                if let Err(err) = outcome.and_then(|r| r) {
                    first_failure.get_or_insert(err);
                }
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}

/// Everything a round trip needs besides the completion sources.
struct PendingRequest {
    resource: ResourceRef,
    type_token: TypeToken,
    name: String,
    inputs: ResourceInputs,
    declared_outputs: Vec<String>,
    dry_run: bool,
}

async fn round_trip(
    monitor: Arc<dyn ResourceMonitor>,
    request: PendingRequest,
    sources: Vec<CompletionSource<Value>>,
    id_source: CompletionSource<String>,
) -> Result<(), DeploymentError> {
    let resource = request.resource.clone();
    let dry_run = request.dry_run;

    let outcome = match settle_inputs(request).await {
        Ok(request) => monitor
            .register_resource(request)
            .await
            .map_err(DeferredError::computation),
        Err(err) => Err(err),
    };

    match outcome {
        Ok(response) => {
            tracing::info!(resource = %resource, "Resource registered");
            resolve_outputs(response, sources, id_source, dry_run);
            Ok(())
        }
        Err(err) => {
            tracing::warn!(resource = %resource, error = %err, "Resource registration failed");
            for source in sources {
                source.reject(err.clone());
            }
            id_source.reject(err.clone());
            Err(DeploymentError::Registration {
                resource: resource.to_string(),
                source: err,
            })
        }
    }
}

/// Awaits every input concurrently and builds the wire request.
async fn settle_inputs(request: PendingRequest) -> Result<RegisterResourceRequest, DeferredError> {
    let PendingRequest {
        resource,
        type_token,
        name,
        inputs,
        declared_outputs,
        dry_run,
    } = request;

    let (names, values): (Vec<String>, Vec<DeferredValue<Value>>) =
        inputs.values.into_iter().unzip();
    let states = join_all(values.iter().map(DeferredValue::state)).await;

    let mut wire_inputs = serde_json::Map::new();
    let mut unknown_inputs = BTreeSet::new();
    let mut secret_inputs = BTreeSet::new();
    let mut dependencies = BTreeSet::new();
    let mut property_dependencies = BTreeMap::new();
    for (input, state) in names.into_iter().zip(states) {
        let state = state.map_err(|cause| input_failed(&resource, &input, cause))?;
        let (value, known, secret, deps) = state.into_parts();
        if !known {
            unknown_inputs.insert(input.clone());
        }
        if secret {
            secret_inputs.insert(input.clone());
        }
        dependencies.extend(deps.iter().cloned());
        property_dependencies.insert(input.clone(), deps.into_iter().collect());
        wire_inputs.insert(input, value.unwrap_or(Value::Null));
    }

    tracing::debug!(
        resource = %resource,
        inputs = wire_inputs.len(),
        dependencies = dependencies.len(),
        "Inputs settled"
    );

    Ok(RegisterResourceRequest {
        resource,
        type_token,
        name,
        inputs: wire_inputs,
        unknown_inputs,
        secret_inputs,
        dependencies: dependencies.into_iter().collect(),
        property_dependencies,
        declared_outputs,
        dry_run,
    })
}

/// Reports a failed input as a computation failure of the registration,
/// keeping the input's own error as the cause.
fn input_failed(resource: &ResourceRef, input: &str, cause: DeferredError) -> DeferredError {
    DeferredError::ComputationFailure {
        message: format!("input '{input}' of '{resource}' failed: {cause}"),
        cause: Arc::new(cause),
    }
}

/// Resolves every declared output from the engine's response.
///
/// Outputs the engine did not return become unknown in a preview and known
/// but empty otherwise.
fn resolve_outputs(
    mut response: RegisterResourceResponse,
    sources: Vec<CompletionSource<Value>>,
    id_source: CompletionSource<String>,
    dry_run: bool,
) {
    for source in sources {
        match response.outputs.remove(source.output().as_str()) {
            Some(payload) => source.resolve(payload),
            None => source.resolve_default(!dry_run),
        }
    }
    match response.id.filter(|id| !id.is_empty()) {
        Some(id) => id_source.resolve_value(Some(id), true, false),
        None => id_source.resolve_default(!dry_run),
    }
    for extra in response.outputs.keys() {
        tracing::debug!(output = %extra, "Ignoring undeclared output returned by the engine");
    }
}
