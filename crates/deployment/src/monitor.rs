//! Port to the external orchestration engine.
//!
//! The engine (graph diffing, persistent state) is reached over remote calls.
//! This crate defines *what* it needs from the engine; transport adapters
//! implement [`ResourceMonitor`] to supply it.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use deferred::{OutputPayload, ResourceRef, TypeToken};
use serde::{Deserialize, Serialize};

use crate::MonitorError;

/// One resource registration, as sent to the orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResourceRequest {
    /// Identity assigned to the resource for this run.
    pub resource: ResourceRef,
    /// Resource type token.
    pub type_token: TypeToken,
    /// Logical resource name.
    pub name: String,
    /// Settled input values. Unknown inputs are sent as `null`.
    pub inputs: serde_json::Map<String, serde_json::Value>,
    /// Inputs whose values were unknown.
    pub unknown_inputs: BTreeSet<String>,
    /// Inputs whose values are secret.
    pub secret_inputs: BTreeSet<String>,
    /// Every resource any input was computed from.
    pub dependencies: Vec<ResourceRef>,
    /// Per-input dependency sets.
    pub property_dependencies: BTreeMap<String, Vec<ResourceRef>>,
    /// Output names the resource declared.
    pub declared_outputs: Vec<String>,
    /// Whether this is a preview.
    pub dry_run: bool,
}

/// The engine's reply to a [`RegisterResourceRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterResourceResponse {
    /// Provider-assigned ID. Usually absent during a preview.
    #[serde(default)]
    pub id: Option<String>,
    /// `(value, known, secret)` triples keyed by output name.
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputPayload>,
}

/// Resource registration against the orchestration engine.
#[async_trait]
pub trait ResourceMonitor: Send + Sync {
    /// Registers one resource and returns its outputs.
    async fn register_resource(
        &self,
        request: RegisterResourceRequest,
    ) -> Result<RegisterResourceResponse, MonitorError>;
}
