//! Newtype identifiers for the deferred-value engine.
//!
//! Resource identities, run identities and output names are all represented as
//! distinct newtypes so that, for example, an output name can never be passed
//! where a resource reference is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: string-backed
// ---------------------------------------------------------------------------

string_id! {
    /// The name of a declared resource output (e.g. `"arn"`, `"endpoint"`).
    ///
    /// Completion sources are keyed by output name when the registration
    /// response is matched up with the outputs the resource declared.
    OutputName
}

string_id! {
    /// A resource type token such as `"aws:s3/bucket:Bucket"`.
    TypeToken
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single deployment run (one execution of user infrastructure logic).
///
/// Every session carries one; stale-context failures report it so the run a
/// late continuation belonged to can be correlated in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a new random run identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a [`RunId`] from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Resource references
// ---------------------------------------------------------------------------

/// Opaque identity of a registered resource.
///
/// Created when a resource is registered and referenced by every deferred value
/// whose computation touched that resource. The reference is a plain identity:
/// holding one never keeps the resource (or anything else) alive.
///
/// Ordering is by the `type::name` key first so dependency sets serialise in a
/// stable, readable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    key: String,
    id: Uuid,
}

impl ResourceRef {
    /// Creates a reference for a freshly registered resource.
    pub fn new(type_token: &TypeToken, name: &str) -> Self {
        Self {
            key: format!("{type_token}::{name}"),
            id: Uuid::new_v4(),
        }
    }

    /// Returns the `type::name` key this resource was registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the unique identity assigned at registration.
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}
