//! Single-assignment resolution slots.
//!
//! A [`CompletionSource`] is created together with its [`DeferredValue`]
//! before the remote call that will produce the value. User code composes
//! over the deferred value immediately; when the registration response
//! arrives the source resolves it exactly once.
//!
//! Every resolving method takes `self` by value, so a second resolution of
//! the same slot does not compile. Dropping a source without resolving it
//! fails the paired value with [`DeferredError::Abandoned`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::combinators::decode_json;
use crate::state::Dependencies;
use crate::value::Outcome;
use crate::{DeferredError, DeferredState, DeferredValue, OutputName, Payload, TaskGuard};

/// The `(value, known, secret)` triple the orchestrator returns for one
/// output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputPayload {
    /// Raw value. Ignored when `known` is false; JSON `null` means empty.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    /// Whether the value is determined.
    pub known: bool,
    /// Whether the value is secret.
    #[serde(default)]
    pub secret: bool,
}

impl OutputPayload {
    /// A known, non-secret payload.
    pub fn known(value: serde_json::Value) -> Self {
        Self {
            value: Some(value),
            known: true,
            secret: false,
        }
    }

    /// The unknown placeholder payload.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Returns the payload marked secret.
    #[must_use]
    pub fn into_secret(mut self) -> Self {
        self.secret = true;
        self
    }
}

/// Owns the resolution slot for one deferred value.
#[derive(Debug)]
pub struct CompletionSource<T> {
    output: OutputName,
    slot: Option<oneshot::Sender<Outcome<T>>>,
    dependencies: Dependencies,
}

impl<T: Payload> CompletionSource<T> {
    /// Creates a slot and the deferred value it will resolve.
    ///
    /// Every state delivered through the slot gains `dependencies`.
    pub fn new(
        output: OutputName,
        guard: TaskGuard,
        dependencies: Dependencies,
    ) -> (DeferredValue<T>, Self) {
        let (tx, rx) = oneshot::channel::<Outcome<T>>();
        let name = output.to_string();
        let value = DeferredValue::from_computation(
            async move {
                rx.await
                    .unwrap_or_else(|_| Err(DeferredError::Abandoned { output: name }))
            },
            guard,
        );
        let source = Self {
            output,
            slot: Some(tx),
            dependencies,
        };
        (value, source)
    }

    /// The output this slot resolves.
    pub fn output(&self) -> &OutputName {
        &self.output
    }

    /// Resolves with an already-typed state.
    pub fn resolve_state(mut self, state: DeferredState<T>) {
        let state = state.with_dependencies(std::mem::take(&mut self.dependencies));
        tracing::debug!(
            output = %self.output,
            known = state.is_known(),
            secret = state.is_secret(),
            "Resolving output"
        );
        self.deliver(Ok(state));
    }

    /// Resolves with a typed value and its flags.
    pub fn resolve_value(self, value: Option<T>, known: bool, secret: bool) {
        self.resolve_state(DeferredState::from_parts(value, known, secret, Dependencies::new()));
    }

    /// Resolves to "known, empty" when `known`, otherwise to "unknown".
    ///
    /// Used when the orchestrator returned nothing for this output.
    pub fn resolve_default(self, known: bool) {
        self.resolve_value(None, known, false);
    }

    /// Fails the paired value with `error`.
    pub fn reject(mut self, error: DeferredError) {
        tracing::debug!(output = %self.output, error = %error, "Rejecting output");
        self.deliver(Err(error));
    }

    fn deliver(&mut self, outcome: Outcome<T>) {
        if let Some(tx) = self.slot.take() {
            if tx.send(outcome).is_err() {
                tracing::debug!(output = %self.output, "No subscribers left for resolved output");
            }
        }
    }
}

impl<T: Payload + DeserializeOwned> CompletionSource<T> {
    /// Resolves from the orchestrator's raw payload.
    ///
    /// A payload whose value does not decode into `T` fails the paired value
    /// with [`DeferredError::ShapeMismatch`]; the mismatch is reported to
    /// awaiters, not to the caller.
    pub fn resolve(mut self, payload: OutputPayload) {
        let OutputPayload { value, known, secret } = payload;
        let value = match value {
            Some(serde_json::Value::Null) | None => None,
            Some(raw) if known => match decode_json::<T>(self.output.as_str(), raw) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    tracing::warn!(
                        output = %self.output,
                        error = %err,
                        "Output payload has unexpected shape"
                    );
                    self.deliver(Err(err));
                    return;
                }
            },
            Some(_) => None,
        };
        self.resolve_value(value, known, secret);
    }
}

impl<T> Drop for CompletionSource<T> {
    fn drop(&mut self) {
        if self.slot.is_some() {
            tracing::warn!(
                output = %self.output,
                "Completion source dropped without being resolved"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{ErrorKind, ResourceRef, TypeToken};

    fn name(s: &str) -> OutputName {
        OutputName::new(s).unwrap()
    }

    fn pair<T: Payload>(output: &str) -> (DeferredValue<T>, CompletionSource<T>) {
        CompletionSource::new(name(output), TaskGuard::unbound(), Dependencies::new())
    }

    #[tokio::test]
    async fn composition_before_resolution_sees_the_resolved_value() {
        let (value, source) = pair::<i64>("port");
        let doubled = value.map(|p| p * 2);

        source.resolve(OutputPayload::known(json!(8080)));

        assert_eq!(doubled.value().await.unwrap(), Some(16160));
    }

    #[tokio::test]
    async fn resolve_carries_flags_and_default_dependencies() {
        let bucket = ResourceRef::new(&TypeToken::new("test:index:Bucket").unwrap(), "b");
        let (value, source) = CompletionSource::<String>::new(
            name("arn"),
            TaskGuard::unbound(),
            Dependencies::from([bucket.clone()]),
        );

        source.resolve(OutputPayload::known(json!("arn:1")).into_secret());

        let state = value.state().await.unwrap();
        assert_eq!(state.value().map(String::as_str), Some("arn:1"));
        assert!(state.is_secret());
        assert!(state.dependencies().contains(&bucket));
    }

    #[tokio::test]
    async fn unknown_payload_discards_any_value() {
        let (value, source) = pair::<String>("id");
        source.resolve(OutputPayload {
            value: Some(json!("placeholder")),
            known: false,
            secret: false,
        });

        let state = value.state().await.unwrap();
        assert!(!state.is_known());
        assert_eq!(state.value(), None);
    }

    #[tokio::test]
    async fn shape_mismatch_is_reported_to_awaiters() {
        let (value, source) = pair::<u16>("port");

        // Resolution itself never fails.
        source.resolve(OutputPayload::known(json!("not a number")));

        let err = value.state().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
        assert!(err.to_string().contains("'port'"));
    }

    #[tokio::test]
    async fn null_known_payload_is_empty() {
        let (value, source) = pair::<String>("endpoint");
        source.resolve(OutputPayload::known(serde_json::Value::Null));

        let state = value.state().await.unwrap();
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn resolve_default_distinguishes_preview_and_update() {
        let (preview, source) = pair::<String>("a");
        source.resolve_default(false);
        let (update, source) = pair::<String>("b");
        source.resolve_default(true);

        assert!(!preview.is_known().await.unwrap());
        assert!(update.state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_source_abandons_the_value() {
        let (value, source) = pair::<String>("url");
        drop(source);

        let err = value.state().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Abandoned);
    }

    #[tokio::test]
    async fn reject_fails_the_value() {
        let (value, source) = pair::<String>("url");
        source.reject(DeferredError::computation_message("registration failed"));

        let err = value.state().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ComputationFailure);
    }
}
