//! Deferred-value engine for Strata.
//!
//! Application code describes infrastructure in terms of values that may not
//! exist yet. A [`DeferredValue`] represents such a value: it may be unknown
//! until a later planning or apply stage, it may be tainted as secret, and it
//! records every resource that contributed to computing it, so the deployment
//! dependency graph can be derived purely from data flow.
//!
//! ## Architectural Layer
//!
//! **Core domain.** This crate has no I/O. The resource-registration round
//! trip, configuration and exports live in the `deployment` crate and reach
//! this crate only through [`ValueFactory`] and [`CompletionSource`].
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ResourceRef`, `RunId`, `OutputName`) |
//! | [`errors`] | `DeferredError` taxonomy |
//! | [`state`] | `DeferredState`, the settled tagged result |
//! | [`value`] | `DeferredValue` handle, constructors, secrecy toggles |
//! | [`combinators`] | `map`, `bind`, `combine_many`, merges, `format` |
//! | [`guard`] | Sessions and context-guarded continuations |
//! | [`completion`] | `CompletionSource` single-assignment slots |
//! | [`factory`] | `ValueFactory`, per-run constructor |

pub mod combinators;
pub mod completion;
pub mod errors;
pub mod factory;
pub mod guard;
pub mod identifiers;
pub mod state;
pub mod value;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use combinators::FormatArg;
pub use completion::{CompletionSource, OutputPayload};
pub use errors::{DeferredError, ErrorKind, SharedCause};
pub use factory::ValueFactory;
pub use guard::{Session, SessionOwner, TaskGuard};
pub use identifiers::{OutputName, ResourceRef, RunId, TypeToken};
pub use state::{DeferredState, Dependencies};
pub use value::{DeferredValue, Outcome, Payload};
