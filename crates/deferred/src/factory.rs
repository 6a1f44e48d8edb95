//! Per-run construction of deferred values.
//!
//! A [`ValueFactory`] binds every value it creates to the active run's
//! session and, when it was derived for a resource, to that resource as a
//! default dependency. The run driver creates one factory per deployment run
//! and discards it at run end.

use std::future::Future;

use crate::state::Dependencies;
use crate::{
    CompletionSource, DeferredError, DeferredState, DeferredValue, OutputName, Payload,
    ResourceRef, Session, TaskGuard,
};

/// Constructor for session-bound deferred values and completion sources.
#[derive(Debug, Clone)]
pub struct ValueFactory {
    guard: TaskGuard,
    default_dependency: Option<ResourceRef>,
}

impl ValueFactory {
    /// A factory for the run owning `session`.
    pub fn new(session: Session) -> Self {
        Self {
            guard: TaskGuard::new(session),
            default_dependency: None,
        }
    }

    /// A factory whose values also depend on `resource`.
    #[must_use]
    pub fn for_resource(&self, resource: ResourceRef) -> Self {
        Self {
            guard: self.guard.clone(),
            default_dependency: Some(resource),
        }
    }

    /// The guard every value from this factory carries.
    pub fn guard(&self) -> &TaskGuard {
        &self.guard
    }

    /// The resource every value from this factory depends on, if any.
    pub fn default_dependency(&self) -> Option<&ResourceRef> {
        self.default_dependency.as_ref()
    }

    fn dependencies(&self) -> Dependencies {
        self.default_dependency.iter().cloned().collect()
    }

    /// Binds a settled state to this run.
    pub fn from_state<T: Payload>(&self, state: DeferredState<T>) -> DeferredValue<T> {
        let state = state.with_dependencies(self.dependencies());
        DeferredValue::from_computation(std::future::ready(Ok(state)), self.guard.clone())
    }

    /// A known, non-secret value.
    pub fn of<T: Payload>(&self, value: T) -> DeferredValue<T> {
        self.from_state(DeferredState::known(value))
    }

    /// A known value that may be empty.
    pub fn of_option<T: Payload>(&self, value: Option<T>) -> DeferredValue<T> {
        self.from_state(DeferredState::known_option(value))
    }

    /// A known, empty value.
    pub fn empty<T: Payload>(&self) -> DeferredValue<T> {
        self.from_state(DeferredState::empty())
    }

    /// A known value tainted as secret.
    pub fn secret<T: Payload>(&self, value: T) -> DeferredValue<T> {
        self.from_state(DeferredState::known(value).with_secret(true))
    }

    /// The unknown placeholder.
    pub fn unknown<T: Payload>(&self) -> DeferredValue<T> {
        self.from_state(DeferredState::unknown())
    }

    /// Wraps an async computation producing a plain value, bound to this run.
    pub fn from_future<T, E, F>(&self, computation: F) -> DeferredValue<T>
    where
        T: Payload,
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let dependencies = self.dependencies();
        DeferredValue::from_computation(
            async move {
                computation
                    .await
                    .map(|value| DeferredState::known(value).with_dependencies(dependencies))
                    .map_err(DeferredError::computation)
            },
            self.guard.clone(),
        )
    }

    /// Adopts a value created elsewhere into this run, so continuations built
    /// from it are guarded by this run's session.
    pub fn adopt<T: Payload>(&self, value: &DeferredValue<T>) -> DeferredValue<T> {
        value.with_guard(self.guard.clone())
    }

    /// Creates a deferred value for `output` together with the completion
    /// source that will resolve it.
    pub fn completion<T: Payload>(
        &self,
        output: OutputName,
    ) -> (DeferredValue<T>, CompletionSource<T>) {
        CompletionSource::new(output, self.guard.clone(), self.dependencies())
    }
}
