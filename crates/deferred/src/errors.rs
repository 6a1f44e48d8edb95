//! Error taxonomy for deferred computations.
//!
//! [`DeferredError`] is what an awaiting caller observes when a deferred value
//! *failed*. Unknown-ness is never an error: an unknown value is valid data
//! that silently short-circuits transforms, so "unknown" and "failed" are
//! distinct observable states.
//!
//! The error is `Clone` because one underlying computation is shared by every
//! combinator subscribed to it and each subscriber receives the same failure.
//! Causes are held behind an [`Arc`] for the same reason.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::RunId;

/// Shared, type-erased cause of a [`DeferredError::ComputationFailure`].
pub type SharedCause = Arc<dyn StdError + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// Error kinds
// ---------------------------------------------------------------------------

/// Fieldless discriminant of a [`DeferredError`].
///
/// Lets callers distinguish "ran too late" from "computation failed" without
/// matching on payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`DeferredError::ValueAbsent`].
    ValueAbsent,
    /// See [`DeferredError::StaleContext`].
    StaleContext,
    /// See [`DeferredError::ShapeMismatch`].
    ShapeMismatch,
    /// See [`DeferredError::ComputationFailure`].
    ComputationFailure,
    /// See [`DeferredError::Abandoned`].
    Abandoned,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a deferred computation.
#[derive(Debug, Clone, Error)]
pub enum DeferredError {
    /// A transform or chain callback observed, or produced, an empty value
    /// where presence was assumed.
    ///
    /// Produced by: `map`/`bind` over a known-but-empty value, and `bind`
    /// callbacks that return no inner deferred value.
    #[error("Value absent: {context}")]
    ValueAbsent {
        /// Which operation expected a value.
        context: String,
    },

    /// A continuation was about to run after its owning session had been
    /// invalidated.
    ///
    /// The continuation's user code was **not** executed.
    #[error("Stale context: continuation ran after deployment run {run} ended")]
    StaleContext {
        /// The run whose session had already been invalidated.
        run: RunId,
    },

    /// A completion source was resolved with a payload inconsistent with the
    /// statically expected shape.
    ///
    /// Surfaced to awaiters of the deferred value, never at resolution time.
    #[error("Shape mismatch for output '{output}': expected {expected}: {detail}")]
    ShapeMismatch {
        /// Name of the output being resolved.
        output: String,
        /// Name of the expected Rust type.
        expected: String,
        /// Decoder message describing the mismatch.
        detail: String,
    },

    /// A user transform (or the remote call feeding a value) failed.
    ///
    /// The original error is preserved as the [`std::error::Error::source`]
    /// of this error so causal chains survive propagation.
    #[error("Computation failed: {message}")]
    ComputationFailure {
        /// Short description of what failed.
        message: String,
        /// The original error.
        #[source]
        cause: SharedCause,
    },

    /// The completion source for a value was dropped without being resolved.
    #[error("Output '{output}' was abandoned before it was resolved")]
    Abandoned {
        /// Name of the output whose resolution slot was dropped.
        output: String,
    },
}

impl DeferredError {
    /// Builds a [`DeferredError::ValueAbsent`].
    pub fn value_absent(context: impl Into<String>) -> Self {
        Self::ValueAbsent {
            context: context.into(),
        }
    }

    /// Wraps a user error as a [`DeferredError::ComputationFailure`].
    pub fn computation<E>(cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::ComputationFailure {
            message: cause.to_string(),
            cause: Arc::new(cause),
        }
    }

    /// Builds a [`DeferredError::ComputationFailure`] from a message alone.
    pub fn computation_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::ComputationFailure {
            cause: Arc::new(FailureMessage(message.clone())),
            message,
        }
    }

    /// Returns the fieldless kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValueAbsent { .. } => ErrorKind::ValueAbsent,
            Self::StaleContext { .. } => ErrorKind::StaleContext,
            Self::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            Self::ComputationFailure { .. } => ErrorKind::ComputationFailure,
            Self::Abandoned { .. } => ErrorKind::Abandoned,
        }
    }

    /// Returns `true` if a continuation failed because its run had ended.
    pub fn is_stale(&self) -> bool {
        self.kind() == ErrorKind::StaleContext
    }
}

/// Cause used when a failure is described only by a message.
#[derive(Debug, Error)]
#[error("{0}")]
struct FailureMessage(String);

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn computation_failure_preserves_its_cause() {
        let err = DeferredError::computation(DiskError);

        assert_eq!(err.kind(), ErrorKind::ComputationFailure);
        assert_eq!(err.to_string(), "Computation failed: disk on fire");
        let source = err.source().expect("cause is exposed as the source");
        assert_eq!(source.to_string(), "disk on fire");
    }

    #[test]
    fn cloned_errors_share_the_same_cause() {
        let err = DeferredError::computation(DiskError);
        let copy = err.clone();

        match (err, copy) {
            (
                DeferredError::ComputationFailure { cause: a, .. },
                DeferredError::ComputationFailure { cause: b, .. },
            ) => assert!(Arc::ptr_eq(&a, &b)),
            other => panic!("unexpected variants: {other:?}"),
        }
    }

    #[test]
    fn stale_context_is_its_own_kind() {
        let err = DeferredError::StaleContext {
            run: RunId::new_random(),
        };
        assert!(err.is_stale());
        assert!(!DeferredError::value_absent("map").is_stale());
    }
}
