//! The settled payload of a deferred value.
//!
//! A [`DeferredState`] is what a deferred computation resolves to when it does
//! not fail: the value (if any) tagged with whether it is known, whether it is
//! secret, and which resources contributed to computing it.

use std::collections::BTreeSet;

use crate::ResourceRef;

/// Set of resources a value was computed from.
pub type Dependencies = BTreeSet<ResourceRef>;

/// Tagged result of a deferred computation.
///
/// ## Invariants
///
/// - `known == false` implies `value` is `None`. There is no constructor that
///   can pair an unknown state with a value, so a fabricated placeholder is
///   never observable.
/// - `dependencies` is a set of non-owning references used only for graph
///   bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredState<T> {
    value: Option<T>,
    known: bool,
    secret: bool,
    dependencies: Dependencies,
}

impl<T> DeferredState<T> {
    /// A known state holding `value`.
    pub fn known(value: T) -> Self {
        Self::known_option(Some(value))
    }

    /// A known state that may be empty.
    pub fn known_option(value: Option<T>) -> Self {
        Self {
            value,
            known: true,
            secret: false,
            dependencies: Dependencies::new(),
        }
    }

    /// A known, empty state. Distinct from [`DeferredState::unknown`].
    pub fn empty() -> Self {
        Self::known_option(None)
    }

    /// The placeholder state used during planning passes.
    pub fn unknown() -> Self {
        Self {
            value: None,
            known: false,
            secret: false,
            dependencies: Dependencies::new(),
        }
    }

    /// Builds a state from its parts, dropping `value` when `known` is false.
    pub fn from_parts(
        value: Option<T>,
        known: bool,
        secret: bool,
        dependencies: Dependencies,
    ) -> Self {
        Self {
            value: if known { value } else { None },
            known,
            secret,
            dependencies,
        }
    }

    /// Returns the state with the secret flag set to `secret`.
    #[must_use]
    pub fn with_secret(mut self, secret: bool) -> Self {
        self.secret = secret;
        self
    }

    /// Returns the state with `resources` added to its dependency set.
    #[must_use]
    pub fn with_dependencies(mut self, resources: impl IntoIterator<Item = ResourceRef>) -> Self {
        self.dependencies.extend(resources);
        self
    }

    /// The value, if known and present.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Consumes the state and returns the value, if known and present.
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Whether the value is actually determined.
    pub fn is_known(&self) -> bool {
        self.known
    }

    /// Whether the value must not be shown in cleartext.
    pub fn is_secret(&self) -> bool {
        self.secret
    }

    /// Whether the state is known but holds no value.
    pub fn is_empty(&self) -> bool {
        self.known && self.value.is_none()
    }

    /// Resources that contributed to this value.
    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    /// Splits the state into `(value, known, secret, dependencies)`.
    pub fn into_parts(self) -> (Option<T>, bool, bool, Dependencies) {
        (self.value, self.known, self.secret, self.dependencies)
    }

    /// Replaces the value while keeping the flags and dependencies.
    ///
    /// An unknown state stays unknown and `f` is never called.
    pub fn map_value<U>(self, f: impl FnOnce(Option<T>) -> Option<U>) -> DeferredState<U> {
        let value = if self.known { f(self.value) } else { None };
        DeferredState {
            value,
            known: self.known,
            secret: self.secret,
            dependencies: self.dependencies,
        }
    }

    /// Combines the flags and dependencies of `self` and `other`, producing
    /// `value`.
    ///
    /// `known` is the conjunction, `secret` the disjunction and `dependencies`
    /// the union of the two states. If the combination is unknown, `value` is
    /// discarded.
    pub fn combine<U, V>(self, other: DeferredState<U>, value: Option<V>) -> DeferredState<V> {
        let mut dependencies = self.dependencies;
        dependencies.extend(other.dependencies);
        DeferredState::from_parts(
            value,
            self.known && other.known,
            self.secret || other.secret,
            dependencies,
        )
    }
}

/// Folds the metadata of many states: the flags and dependency union that
/// `combine_many` style operators assign to their result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Accumulated {
    pub(crate) known: bool,
    pub(crate) secret: bool,
    pub(crate) dependencies: Dependencies,
}

impl Default for Accumulated {
    fn default() -> Self {
        Self {
            known: true,
            secret: false,
            dependencies: Dependencies::new(),
        }
    }
}

impl Accumulated {
    /// Absorbs one state's flags and dependencies, handing back its value.
    pub(crate) fn absorb<T>(&mut self, state: DeferredState<T>) -> Option<T> {
        let (value, known, secret, dependencies) = state.into_parts();
        self.known &= known;
        self.secret |= secret;
        self.dependencies.extend(dependencies);
        value
    }

    /// Produces the combined state for `value`.
    pub(crate) fn finish<V>(self, value: Option<V>) -> DeferredState<V> {
        DeferredState::from_parts(value, self.known, self.secret, self.dependencies)
    }
}
