//! The export surface of a deployment run.
//!
//! A program ends by handing back a set of named deferred values. The run is
//! not complete until every one of them has settled.

use std::collections::BTreeMap;

use deferred::{DeferredValue, Payload};
use futures_util::future::join_all;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::DeploymentError;

/// Marker shown in place of a secret value.
pub const SECRET_MARKER: &str = "[secret]";
/// Marker shown in place of an unknown value.
pub const UNKNOWN_MARKER: &str = "[unknown]";

/// Named values exported by a program, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Exports {
    entries: Vec<(String, DeferredValue<Value>)>,
}

impl Exports {
    /// No exports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an export and returns the set.
    #[must_use]
    pub fn export<T>(mut self, name: impl Into<String>, value: &DeferredValue<T>) -> Self
    where
        T: Payload + Serialize,
    {
        self.insert(name, value);
        self
    }

    /// Adds (or replaces) an export.
    pub fn insert<T>(&mut self, name: impl Into<String>, value: &DeferredValue<T>)
    where
        T: Payload + Serialize,
    {
        let name = name.into();
        let value = value.into_json();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Number of exports.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no exports.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Waits for every export to settle.
    ///
    /// All exports are awaited concurrently; none is abandoned when another
    /// fails. The first failure in insertion order is reported.
    pub async fn settle(self) -> Result<BTreeMap<String, ExportedValue>, DeploymentError> {
        let (names, values): (Vec<String>, Vec<DeferredValue<Value>>) =
            self.entries.into_iter().unzip();
        let states = join_all(values.iter().map(DeferredValue::state)).await;

        let mut settled = BTreeMap::new();
        for (name, state) in names.into_iter().zip(states) {
            let state = state.map_err(|source| DeploymentError::Export {
                name: name.clone(),
                source,
            })?;
            let (value, known, secret, dependencies) = state.into_parts();
            settled.insert(
                name,
                ExportedValue {
                    value,
                    known,
                    secret,
                    dependencies: dependencies.iter().map(ToString::to_string).collect(),
                },
            );
        }
        Ok(settled)
    }
}

/// A settled export.
///
/// Serialising a secret export writes [`SECRET_MARKER`] in place of its value;
/// the plaintext is only reachable through [`ExportedValue::value`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExportedValue {
    /// The value, when known and present.
    pub value: Option<Value>,
    /// Whether the value is determined.
    pub known: bool,
    /// Whether the value is secret.
    pub secret: bool,
    /// `type::name` keys of the resources the value depends on.
    pub dependencies: Vec<String>,
}

impl Serialize for ExportedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let redacted = Value::String(SECRET_MARKER.to_string());
        let value = match &self.value {
            Some(_) if self.secret => Some(&redacted),
            other => other.as_ref(),
        };
        let mut state = serializer.serialize_struct("ExportedValue", 4)?;
        state.serialize_field("value", &value)?;
        state.serialize_field("known", &self.known)?;
        state.serialize_field("secret", &self.secret)?;
        state.serialize_field("dependencies", &self.dependencies)?;
        state.end()
    }
}

impl ExportedValue {
    /// Text safe to show a user: secrets and unknowns are replaced by
    /// markers.
    pub fn display_value(&self) -> String {
        if !self.known {
            UNKNOWN_MARKER.to_string()
        } else if self.secret {
            SECRET_MARKER.to_string()
        } else {
            match &self.value {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "null".to_string(),
            }
        }
    }
}
