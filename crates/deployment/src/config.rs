//! Namespaced configuration lookups.
//!
//! Keys are stored as `namespace:key`. A [`Config`] is a view over one
//! namespace (by default the project name). Lookups that return deferred
//! values wrap the raw string with `secret()` when the key is listed as
//! secret and with `of()` otherwise, so secrecy flows from configuration into
//! every value computed from it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use deferred::{DeferredValue, Payload, ValueFactory};
use serde::de::DeserializeOwned;

use crate::{ConfigError, RunSettings};

/// Configuration view for one namespace.
#[derive(Debug, Clone)]
pub struct Config {
    namespace: String,
    values: Arc<BTreeMap<String, String>>,
    secret_keys: Arc<BTreeSet<String>>,
    factory: ValueFactory,
}

impl Config {
    /// A view over `namespace` in `settings`, creating values through
    /// `factory`.
    pub fn new(
        settings: &RunSettings,
        namespace: impl Into<String>,
        factory: ValueFactory,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            values: Arc::new(settings.config.clone()),
            secret_keys: Arc::new(settings.secret_keys.clone()),
            factory,
        }
    }

    /// A view over another namespace sharing the same values.
    #[must_use]
    pub fn namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            values: Arc::clone(&self.values),
            secret_keys: Arc::clone(&self.secret_keys),
            factory: self.factory.clone(),
        }
    }

    /// The namespace this view reads from.
    pub fn name(&self) -> &str {
        &self.namespace
    }

    /// `key` qualified with this namespace, unless already qualified.
    pub fn full_key(&self, key: &str) -> String {
        if key.contains(':') {
            key.to_string()
        } else {
            format!("{}:{}", self.namespace, key)
        }
    }

    /// Whether `key` holds a secret value.
    pub fn is_secret(&self, key: &str) -> bool {
        self.secret_keys.contains(&self.full_key(key))
    }

    /// Plain lookup.
    pub fn get(&self, key: &str) -> Option<String> {
        let full = self.full_key(key);
        let value = self.values.get(&full).cloned();
        if value.is_some() && self.secret_keys.contains(&full) {
            tracing::warn!(
                key = %full,
                "Secret configuration value read as plaintext; use get_secret"
            );
        }
        value
    }

    /// Plain lookup that fails when the key has no value.
    pub fn require(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingValue {
            key: self.full_key(key),
        })
    }

    /// Deferred lookup, secret if the key is listed as secret.
    pub fn get_deferred(&self, key: &str) -> Option<DeferredValue<String>> {
        let full = self.full_key(key);
        let raw = self.values.get(&full)?.clone();
        Some(if self.secret_keys.contains(&full) {
            self.factory.secret(raw)
        } else {
            self.factory.of(raw)
        })
    }

    /// Deferred lookup, always secret.
    pub fn get_secret(&self, key: &str) -> Option<DeferredValue<String>> {
        let raw = self.values.get(&self.full_key(key))?.clone();
        Some(self.factory.secret(raw))
    }

    /// Deferred lookup, always secret, that fails when the key has no value.
    pub fn require_secret(&self, key: &str) -> Result<DeferredValue<String>, ConfigError> {
        self.get_secret(key).ok_or_else(|| ConfigError::MissingValue {
            key: self.full_key(key),
        })
    }

    /// Parses the stored string as JSON into `T`.
    pub fn get_object<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        let full = self.full_key(key);
        let Some(raw) = self.values.get(&full) else {
            return Ok(None);
        };
        serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: full,
                reason: e.to_string(),
            })
    }

    /// As [`Config::get_object`], wrapped as a deferred value that follows
    /// the key's secrecy.
    pub fn get_object_deferred<T>(&self, key: &str) -> Result<Option<DeferredValue<T>>, ConfigError>
    where
        T: Payload + DeserializeOwned,
    {
        let secret = self.is_secret(key);
        Ok(self.get_object::<T>(key)?.map(|value| {
            if secret {
                self.factory.secret(value)
            } else {
                self.factory.of(value)
            }
        }))
    }
}
