//! The deferred value handle.
//!
//! A [`DeferredValue`] is an immutable handle over one shared asynchronous
//! computation yielding a [`DeferredState`]. Cloning the handle shares the
//! computation; combinators subscribe to it and never mutate it, so the
//! computation is append-only once constructed.
//!
//! Each handle also carries the [`TaskGuard`] of the session it was created
//! in. Continuations built from the handle check that guard before running.

use std::fmt;
use std::future::Future;

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::state::Dependencies;
use crate::{DeferredError, DeferredState, ResourceRef, TaskGuard};

/// Outcome of a deferred computation.
pub type Outcome<T> = Result<DeferredState<T>, DeferredError>;

/// Bounds every payload carried by a [`DeferredValue`] must satisfy.
///
/// A settled state is handed to every subscriber, so payloads are cloned, and
/// computations run on a shared multi-threaded pool.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + Send + Sync + 'static {}

/// Handle to a value that may not be known yet, may be secret, and records
/// the resources it was computed from.
pub struct DeferredValue<T> {
    computation: Shared<BoxFuture<'static, Outcome<T>>>,
    guard: TaskGuard,
}

impl<T> Clone for DeferredValue<T> {
    fn clone(&self) -> Self {
        Self {
            computation: self.computation.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T> fmt::Debug for DeferredValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredValue")
            .field("settled", &self.computation.peek().is_some())
            .field("guard", &self.guard)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl<T: Payload> DeferredValue<T> {
    /// Wraps a computation yielding a full state, guarded by `guard`.
    pub fn from_computation<F>(computation: F, guard: TaskGuard) -> Self
    where
        F: Future<Output = Outcome<T>> + Send + 'static,
    {
        Self {
            computation: computation.boxed().shared(),
            guard,
        }
    }

    /// A value that is already settled to `state`.
    pub fn from_state(state: DeferredState<T>) -> Self {
        Self::from_computation(std::future::ready(Ok(state)), TaskGuard::unbound())
    }

    /// A known, non-secret value with no dependencies.
    pub fn of(value: T) -> Self {
        Self::from_state(DeferredState::known(value))
    }

    /// A known value that may be empty.
    pub fn of_option(value: Option<T>) -> Self {
        Self::from_state(DeferredState::known_option(value))
    }

    /// A known, empty value. Distinct from [`DeferredValue::unknown`].
    pub fn empty() -> Self {
        Self::from_state(DeferredState::empty())
    }

    /// A known value tainted as secret.
    pub fn secret(value: T) -> Self {
        Self::from_state(DeferredState::known(value).with_secret(true))
    }

    /// The placeholder used during planning passes: unknown and empty.
    pub fn unknown() -> Self {
        Self::from_state(DeferredState::unknown())
    }

    /// An unknown placeholder that is also secret.
    pub fn unknown_secret() -> Self {
        Self::from_state(DeferredState::unknown().with_secret(true))
    }

    /// A value that has already failed with `error`.
    pub fn failed(error: DeferredError) -> Self {
        Self::from_computation(std::future::ready(Err(error)), TaskGuard::unbound())
    }

    /// Wraps an async computation producing a plain value.
    ///
    /// The result is known and non-secret; an `Err` becomes a
    /// [`DeferredError::ComputationFailure`] carrying the error as its cause.
    pub fn from_future<F, E>(computation: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::from_computation(
            async move {
                computation
                    .await
                    .map(DeferredState::known)
                    .map_err(DeferredError::computation)
            },
            TaskGuard::unbound(),
        )
    }

    /// Rebinds the handle to `guard` without touching the computation.
    #[must_use]
    pub fn with_guard(&self, guard: TaskGuard) -> Self {
        Self {
            computation: self.computation.clone(),
            guard,
        }
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

impl<T: Payload> DeferredValue<T> {
    /// Awaits the full state.
    pub async fn state(&self) -> Outcome<T> {
        self.computation.clone().await
    }

    /// Awaits the value. `None` when unknown or empty.
    pub async fn value(&self) -> Result<Option<T>, DeferredError> {
        Ok(self.state().await?.into_value())
    }

    /// Awaits whether the value is known.
    pub async fn is_known(&self) -> Result<bool, DeferredError> {
        Ok(self.state().await?.is_known())
    }

    /// Awaits whether the value is secret.
    pub async fn is_secret(&self) -> Result<bool, DeferredError> {
        Ok(self.state().await?.is_secret())
    }

    /// Awaits the set of resources the value was computed from.
    pub async fn dependencies(&self) -> Result<Dependencies, DeferredError> {
        let (_, _, _, dependencies) = self.state().await?.into_parts();
        Ok(dependencies)
    }

    /// The settled outcome, if the computation has already finished.
    pub fn peek(&self) -> Option<Outcome<T>> {
        self.computation.peek().cloned()
    }

    /// The guard continuations built from this handle are checked against.
    pub fn guard(&self) -> &TaskGuard {
        &self.guard
    }

    /// A clone of the underlying shared computation, without any guard.
    pub(crate) fn computation(&self) -> Shared<BoxFuture<'static, Outcome<T>>> {
        self.computation.clone()
    }
}

// ---------------------------------------------------------------------------
// State-preserving derivations
// ---------------------------------------------------------------------------

impl<T: Payload> DeferredValue<T> {
    /// Derives a new handle by transforming the settled state.
    ///
    /// The transform runs as a guarded continuation of this handle.
    pub(crate) fn derive<U, F>(&self, f: F) -> DeferredValue<U>
    where
        U: Payload,
        F: FnOnce(DeferredState<T>) -> Outcome<U> + Send + 'static,
    {
        let guard = self.guard.clone();
        DeferredValue::from_computation(guard.clone().then(self.computation(), f), guard)
    }

    /// A new handle marked secret. The receiver is left untouched.
    #[must_use]
    pub fn as_secret(&self) -> Self {
        self.derive(|state| Ok(state.with_secret(true)))
    }

    /// A new handle with the secret flag cleared. The receiver, and every
    /// other value derived from it, keep their own secrecy.
    #[must_use]
    pub fn as_plaintext(&self) -> Self {
        self.derive(|state| Ok(state.with_secret(false)))
    }

    /// A new handle whose dependency set also includes `resources`.
    #[must_use]
    pub fn with_dependencies(&self, resources: impl IntoIterator<Item = ResourceRef>) -> Self {
        let resources = resources.into_iter().collect::<Vec<_>>();
        self.derive(move |state| Ok(state.with_dependencies(resources)))
    }
}

impl<T: Payload> From<T> for DeferredValue<T> {
    fn from(value: T) -> Self {
        Self::of(value)
    }
}
