//! Combinators that build new deferred values from existing ones.
//!
//! Every combinator preserves the same three rules:
//!
//! - **Known gating**: user callbacks run only when every input is known.
//!   Unknown inputs short-circuit to an unknown result; callbacks are never
//!   handed placeholder data.
//! - **Secrecy is monotonic**: if any input is secret, the result is secret.
//! - **Dependencies accumulate**: the result's dependency set is the union
//!   of the inputs' sets.
//!
//! Multi-input combinators await all inputs concurrently and never cancel a
//! sibling when one fails; the first failure in input order is reported once
//! everything has settled.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::Display;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::state::Accumulated;
use crate::value::Outcome;
use crate::{DeferredError, DeferredState, DeferredValue, Payload, TaskGuard};

// ---------------------------------------------------------------------------
// Single-input transforms
// ---------------------------------------------------------------------------

impl<T: Payload> DeferredValue<T> {
    /// Applies `f` to the value once it is known.
    ///
    /// Unknown values are passed through as unknown and `f` is never invoked.
    /// A known but empty value fails with [`DeferredError::ValueAbsent`]; use
    /// [`DeferredValue::map_option`] for values that may legitimately be empty.
    pub fn map<U, F>(&self, f: F) -> DeferredValue<U>
    where
        U: Payload,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok::<_, Infallible>(f(value)))
    }

    /// As [`DeferredValue::map`], for fallible transforms.
    ///
    /// An `Err` from `f` fails the result with a
    /// [`DeferredError::ComputationFailure`] whose source is the original error.
    pub fn try_map<U, E, F>(&self, f: F) -> DeferredValue<U>
    where
        U: Payload,
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        self.derive(move |state| {
            let (value, known, secret, dependencies) = state.into_parts();
            if !known {
                return Ok(DeferredState::from_parts(None, false, secret, dependencies));
            }
            let value = value
                .ok_or_else(|| DeferredError::value_absent("map over a known but empty value"))?;
            let mapped = f(value).map_err(DeferredError::computation)?;
            Ok(DeferredState::from_parts(Some(mapped), true, secret, dependencies))
        })
    }

    /// Applies `f` to the possibly-empty value once it is known.
    pub fn map_option<U, F>(&self, f: F) -> DeferredValue<U>
    where
        U: Payload,
        F: FnOnce(Option<T>) -> Option<U> + Send + 'static,
    {
        self.derive(move |state| Ok(state.map_value(f)))
    }

    /// Chains into another deferred value produced by `f`.
    ///
    /// `f` runs only once this value is known, so the second computation is
    /// not even constructed before then. The combined state is known only if
    /// both are known, secret if either is secret, and depends on both
    /// dependency sets.
    ///
    /// `f` may return `Option<DeferredValue<U>>`; returning `None` is a
    /// programming error and fails the result with
    /// [`DeferredError::ValueAbsent`] rather than turning it unknown.
    pub fn bind<U, R, F>(&self, f: F) -> DeferredValue<U>
    where
        U: Payload,
        R: Into<Option<DeferredValue<U>>> + Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        let guard = self.guard().clone();
        let chained = guard
            .clone()
            .then_async(self.computation(), move |outer| chain_into(outer, f));
        DeferredValue::from_computation(chained, guard)
    }

    /// Erases the value to JSON.
    pub fn into_json(&self) -> DeferredValue<serde_json::Value>
    where
        T: Serialize,
    {
        self.derive(|state| {
            let (value, known, secret, dependencies) = state.into_parts();
            let value = value
                .map(|v| serde_json::to_value(v).map_err(DeferredError::computation))
                .transpose()?;
            Ok(DeferredState::from_parts(value, known, secret, dependencies))
        })
    }
}

impl DeferredValue<serde_json::Value> {
    /// Decodes a JSON value into `T`.
    ///
    /// A payload that does not match `T` fails with
    /// [`DeferredError::ShapeMismatch`].
    pub fn decode<T>(&self) -> DeferredValue<T>
    where
        T: Payload + DeserializeOwned,
    {
        self.decode_named("value")
    }

    /// As [`DeferredValue::decode`], naming `output` in mismatch errors.
    pub fn decode_named<T>(&self, output: impl Into<String>) -> DeferredValue<T>
    where
        T: Payload + DeserializeOwned,
    {
        let output = output.into();
        self.derive(move |state| {
            let (value, known, secret, dependencies) = state.into_parts();
            let value = value.map(|v| decode_json::<T>(&output, v)).transpose()?;
            Ok(DeferredState::from_parts(value, known, secret, dependencies))
        })
    }
}

/// Continuation of [`DeferredValue::bind`] once the outer value has settled.
async fn chain_into<T, U, R, F>(outer: DeferredState<T>, f: F) -> Outcome<U>
where
    U: Payload,
    R: Into<Option<DeferredValue<U>>>,
    F: FnOnce(T) -> R,
{
    let mut acc = Accumulated::default();
    let value = acc.absorb(outer);
    if !acc.known {
        return Ok(acc.finish(None));
    }
    let value =
        value.ok_or_else(|| DeferredError::value_absent("bind over a known but empty value"))?;
    let inner = f(value)
        .into()
        .ok_or_else(|| DeferredError::value_absent("bind callback returned no deferred value"))?;
    let inner = inner.state().await?;
    let value = acc.absorb(inner);
    Ok(acc.finish(value))
}

/// Decodes `value` into `T`, reporting failures as
/// [`DeferredError::ShapeMismatch`] against `output`.
pub(crate) fn decode_json<T: DeserializeOwned>(
    output: &str,
    value: serde_json::Value,
) -> Result<T, DeferredError> {
    serde_json::from_value(value).map_err(|e| DeferredError::ShapeMismatch {
        output: output.to_string(),
        expected: std::any::type_name::<T>().to_string(),
        detail: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Multi-input combinators
// ---------------------------------------------------------------------------

impl<T: Payload> DeferredValue<T> {
    /// Combines many values into one sequence, element for element.
    ///
    /// The result is known if every input is known, secret if any input is
    /// secret, and depends on the union of all inputs' dependencies. A known
    /// but empty input stays in its position as `None`; the other elements
    /// are kept.
    pub fn combine_many(
        values: impl IntoIterator<Item = DeferredValue<T>>,
    ) -> DeferredValue<Vec<Option<T>>> {
        let values = values.into_iter().collect::<Vec<_>>();
        let guard = TaskGuard::first_bound(values.iter().map(DeferredValue::guard));
        let computations = values
            .iter()
            .map(DeferredValue::computation)
            .collect::<Vec<_>>();
        DeferredValue::from_computation(
            guard.clone().after_all(computations, |states| {
                let mut acc = Accumulated::default();
                let items = states
                    .into_iter()
                    .map(|state| acc.absorb(state))
                    .collect::<Vec<_>>();
                Ok(acc.finish(Some(items)))
            }),
            guard,
        )
    }

    /// Combines two values into a pair, with the same rules as
    /// [`DeferredValue::combine_many`].
    pub fn zip<U: Payload>(
        &self,
        other: &DeferredValue<U>,
    ) -> DeferredValue<(Option<T>, Option<U>)> {
        let guard = self.guard().or(other.guard());
        DeferredValue::from_computation(
            guard
                .clone()
                .after_both(self.computation(), other.computation(), |a, b| {
                    let mut acc = Accumulated::default();
                    let a = acc.absorb(a);
                    let b = acc.absorb(b);
                    Ok(acc.finish(Some((a, b))))
                }),
            guard,
        )
    }

    /// Lifts a map of deferred values into one deferred map, with the same
    /// rules as [`DeferredValue::combine_many`]. Empty entries are left out.
    pub fn of_map<K>(entries: BTreeMap<K, DeferredValue<T>>) -> DeferredValue<BTreeMap<K, T>>
    where
        K: Payload + Ord,
    {
        let (keys, values): (Vec<K>, Vec<DeferredValue<T>>) = entries.into_iter().unzip();
        let guard = TaskGuard::first_bound(values.iter().map(DeferredValue::guard));
        let computations = values
            .iter()
            .map(DeferredValue::computation)
            .collect::<Vec<_>>();
        DeferredValue::from_computation(
            guard.clone().after_all(computations, move |states| {
                let mut acc = Accumulated::default();
                let map = keys
                    .into_iter()
                    .zip(states)
                    .filter_map(|(key, state)| acc.absorb(state).map(|v| (key, v)))
                    .collect::<BTreeMap<_, _>>();
                Ok(acc.finish(Some(map)))
            }),
            guard,
        )
    }
}

/// Combines two optional inputs with `merge`, treating an absent input or a
/// known-empty value as `Default::default()`.
fn merge_with<C, F>(
    a: Option<DeferredValue<C>>,
    b: Option<DeferredValue<C>>,
    merge: F,
) -> DeferredValue<C>
where
    C: Payload + Default,
    F: FnOnce(C, C) -> C + Send + 'static,
{
    let a = a.unwrap_or_else(|| DeferredValue::of(C::default()));
    let b = b.unwrap_or_else(|| DeferredValue::of(C::default()));
    let guard = a.guard().or(b.guard());
    DeferredValue::from_computation(
        guard.clone().after_both(a.computation(), b.computation(), |a, b| {
            let mut acc = Accumulated::default();
            let a = acc.absorb(a).unwrap_or_default();
            let b = acc.absorb(b).unwrap_or_default();
            Ok(acc.finish(Some(merge(a, b))))
        }),
        guard,
    )
}

impl<T: Payload> DeferredValue<Vec<T>> {
    /// Concatenates `a` then `b`.
    ///
    /// An absent input counts as an empty sequence; neither input is
    /// modified.
    pub fn merge_sequence(a: Option<Self>, b: Option<Self>) -> Self {
        merge_with(a, b, |mut a, b| {
            a.extend(b);
            a
        })
    }

    /// Appends `other` to this sequence. See [`DeferredValue::merge_sequence`].
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        Self::merge_sequence(Some(self.clone()), Some(other.clone()))
    }
}

impl<K, V> DeferredValue<BTreeMap<K, V>>
where
    K: Payload + Ord,
    V: Payload,
{
    /// Unions the keys of `a` and `b`, with `b`'s entries winning on conflict.
    ///
    /// An absent input counts as an empty mapping; neither input is modified.
    pub fn merge_mapping(a: Option<Self>, b: Option<Self>) -> Self {
        merge_with(a, b, |mut a, b| {
            a.extend(b);
            a
        })
    }
}

// ---------------------------------------------------------------------------
// Templating
// ---------------------------------------------------------------------------

/// One argument to [`DeferredValue::format`].
///
/// Built from any deferred [`Display`] value, from an optional one (`None`
/// renders as `null`) or from a literal string.
#[derive(Debug, Clone)]
pub struct FormatArg(DeferredValue<String>);

impl FormatArg {
    /// The `null` argument.
    pub fn null() -> Self {
        Self(DeferredValue::empty())
    }
}

impl<T: Payload + Display> From<DeferredValue<T>> for FormatArg {
    fn from(value: DeferredValue<T>) -> Self {
        Self(value.map_option(|v| v.map(|v| v.to_string())))
    }
}

impl<T: Payload + Display> From<&DeferredValue<T>> for FormatArg {
    fn from(value: &DeferredValue<T>) -> Self {
        Self::from(value.clone())
    }
}

impl<T: Payload + Display> From<Option<DeferredValue<T>>> for FormatArg {
    fn from(value: Option<DeferredValue<T>>) -> Self {
        value.map(Self::from).unwrap_or_else(Self::null)
    }
}

impl From<&str> for FormatArg {
    fn from(value: &str) -> Self {
        Self(DeferredValue::of(value.to_string()))
    }
}

impl DeferredValue<String> {
    /// Renders `template`, substituting each `%s` with the next argument.
    ///
    /// Any unknown argument makes the result unknown and any secret argument
    /// makes it secret; dependencies are unioned. An empty argument renders
    /// as `null`. `%%` renders a literal `%`. `None` is the same as no
    /// arguments; placeholders beyond the last argument are left as written.
    pub fn format(template: &str, args: Option<Vec<FormatArg>>) -> Self {
        let template = template.to_string();
        let args = args
            .unwrap_or_default()
            .into_iter()
            .map(|FormatArg(value)| value);
        DeferredValue::combine_many(args).map(move |args| render_template(&template, &args))
    }
}

fn render_template(template: &str, args: &[Option<String>]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some('s') => {
                chars.next();
                match args.next() {
                    Some(Some(arg)) => out.push_str(arg),
                    Some(None) => out.push_str("null"),
                    None => out.push_str("%s"),
                }
            }
            _ => out.push('%'),
        }
    }
    out
}

/// Formats a template against deferred arguments.
///
/// ```ignore
/// let url = format_deferred!("https://%s:%s", host, port);
/// ```
#[macro_export]
macro_rules! format_deferred {
    ($template:expr $(,)?) => {
        $crate::DeferredValue::<String>::format($template, None)
    };
    ($template:expr, $($arg:expr),+ $(,)?) => {
        $crate::DeferredValue::<String>::format(
            $template,
            Some(vec![$($crate::FormatArg::from($arg)),+]),
        )
    };
}
