//! Sessions and context-guarded continuations.
//!
//! A [`Session`] is the scope of one deployment run. It exposes a validity
//! flag with a single writer (the [`SessionOwner`] held by the run driver) and
//! any number of readers (every deferred value created during the run).
//!
//! A [`TaskGuard`] wraps continuations: at the instant a continuation is about
//! to run, after its inputs have settled and before any user code executes,
//! the guard checks that the owning session is still active. If the session
//! was invalidated the continuation fails with
//! [`DeferredError::StaleContext`] instead of running against a torn-down run.
//!
//! ```text
//! Valid ──invalidate()──▶ Invalidated        (one-way)
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::{self, Either};

use crate::{DeferredError, RunId};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Read-only handle to a deployment run's validity flag.
#[derive(Debug, Clone)]
pub struct Session {
    run: RunId,
    active: Arc<AtomicBool>,
}

impl Session {
    /// The run this session belongs to.
    pub fn run(&self) -> RunId {
        self.run
    }

    /// Whether the run is still active.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Fails with [`DeferredError::StaleContext`] once the run has ended.
    pub fn ensure_active(&self) -> Result<(), DeferredError> {
        if self.is_active() {
            Ok(())
        } else {
            tracing::warn!(run = %self.run, "Continuation rejected: deployment run has ended");
            Err(DeferredError::StaleContext { run: self.run })
        }
    }
}

/// The single writer of a session's validity flag.
///
/// Owned by the run driver. Dropping the owner invalidates the session, so a
/// run that unwinds early never leaves its continuations runnable.
#[derive(Debug)]
pub struct SessionOwner {
    session: Session,
}

impl SessionOwner {
    /// Opens an active session for `run`.
    pub fn open(run: RunId) -> Self {
        tracing::debug!(run = %run, "Session opened");
        Self {
            session: Session {
                run,
                active: Arc::new(AtomicBool::new(true)),
            },
        }
    }

    /// Returns a reader handle for the session.
    pub fn session(&self) -> Session {
        self.session.clone()
    }

    /// Invalidates the session. Idempotent.
    pub fn invalidate(&self) {
        if self.session.active.swap(false, Ordering::AcqRel) {
            tracing::debug!(run = %self.session.run, "Session invalidated");
        }
    }
}

impl Drop for SessionOwner {
    fn drop(&mut self) {
        self.invalidate();
    }
}

// ---------------------------------------------------------------------------
// Guarded continuations
// ---------------------------------------------------------------------------

/// Checks session validity before continuations run.
///
/// An unbound guard (no session) always lets continuations run; this is what
/// values built outside any run, e.g. with `DeferredValue::of`, carry.
#[derive(Debug, Clone, Default)]
pub struct TaskGuard {
    session: Option<Session>,
}

impl TaskGuard {
    /// A guard bound to `session`.
    pub fn new(session: Session) -> Self {
        Self {
            session: Some(session),
        }
    }

    /// A guard with no owning session.
    pub fn unbound() -> Self {
        Self::default()
    }

    /// The owning session, if any.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Picks the guard for an operation over two inputs: `self` if bound,
    /// otherwise `other`.
    #[must_use]
    pub fn or(&self, other: &TaskGuard) -> TaskGuard {
        if self.session.is_some() {
            self.clone()
        } else {
            other.clone()
        }
    }

    /// Picks the first bound guard out of `guards`.
    pub fn first_bound<'a>(guards: impl IntoIterator<Item = &'a TaskGuard>) -> TaskGuard {
        guards
            .into_iter()
            .find(|g| g.session.is_some())
            .cloned()
            .unwrap_or_default()
    }

    /// Fails with [`DeferredError::StaleContext`] if the owning session was
    /// invalidated.
    pub fn ensure_active(&self) -> Result<(), DeferredError> {
        match &self.session {
            Some(session) => session.ensure_active(),
            None => Ok(()),
        }
    }

    /// Runs `f` on the outcome of `input` once it settles.
    ///
    /// The session check happens first: a stale continuation reports
    /// `StaleContext` even when `input` itself failed.
    pub async fn then<A, B, F>(
        self,
        input: impl Future<Output = Result<A, DeferredError>>,
        f: F,
    ) -> Result<B, DeferredError>
    where
        F: FnOnce(A) -> Result<B, DeferredError>,
    {
        let settled = input.await;
        self.ensure_active()?;
        f(settled?)
    }

    /// As [`TaskGuard::then`], for continuations that are themselves
    /// asynchronous. The continuation's future is not even constructed until
    /// the check passes.
    pub async fn then_async<A, B, F, Fut>(
        self,
        input: impl Future<Output = Result<A, DeferredError>>,
        f: F,
    ) -> Result<B, DeferredError>
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<B, DeferredError>>,
    {
        let settled = input.await;
        self.ensure_active()?;
        f(settled?).await
    }

    /// Awaits both inputs concurrently, then runs `f` on both outcomes.
    ///
    /// Both inputs always run to completion; the first failure (in argument
    /// order) is reported.
    pub async fn after_both<A, B, C, F>(
        self,
        a: impl Future<Output = Result<A, DeferredError>>,
        b: impl Future<Output = Result<B, DeferredError>>,
        f: F,
    ) -> Result<C, DeferredError>
    where
        F: FnOnce(A, B) -> Result<C, DeferredError>,
    {
        let (a, b) = future::join(a, b).await;
        self.ensure_active()?;
        f(a?, b?)
    }

    /// Awaits every input concurrently, then runs `f` on all outcomes.
    ///
    /// No input is cancelled when a sibling fails; once all have settled the
    /// first failure in input order is reported.
    pub async fn after_all<A, C, F, Fut>(self, inputs: Vec<Fut>, f: F) -> Result<C, DeferredError>
    where
        Fut: Future<Output = Result<A, DeferredError>>,
        F: FnOnce(Vec<A>) -> Result<C, DeferredError>,
    {
        let settled = future::join_all(inputs).await;
        self.ensure_active()?;
        let values = settled.into_iter().collect::<Result<Vec<_>, _>>()?;
        f(values)
    }

    /// Runs `f` on whichever input settles first.
    ///
    /// The slower input is dropped once the race is decided.
    pub async fn after_either<A, C, F>(
        self,
        a: impl Future<Output = Result<A, DeferredError>>,
        b: impl Future<Output = Result<A, DeferredError>>,
        f: F,
    ) -> Result<C, DeferredError>
    where
        F: FnOnce(A) -> Result<C, DeferredError>,
    {
        let winner = match future::select(Box::pin(a), Box::pin(b)).await {
            Either::Left((outcome, _)) | Either::Right((outcome, _)) => outcome,
        };
        self.ensure_active()?;
        f(winner?)
    }

    /// Returns the outcome of whichever input settles first.
    pub async fn first_of<A>(
        self,
        a: impl Future<Output = Result<A, DeferredError>>,
        b: impl Future<Output = Result<A, DeferredError>>,
    ) -> Result<A, DeferredError> {
        self.after_either(a, b, Ok).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::oneshot;

    use super::*;
    use crate::ErrorKind;

    fn ready<T>(value: T) -> impl Future<Output = Result<T, DeferredError>> {
        future::ready(Ok(value))
    }

    #[test]
    fn dropping_the_owner_invalidates_the_session() {
        let owner = SessionOwner::open(RunId::new_random());
        let session = owner.session();
        assert!(session.is_active());

        drop(owner);

        assert!(!session.is_active());
        assert_eq!(
            session.ensure_active().unwrap_err().kind(),
            ErrorKind::StaleContext
        );
    }

    #[tokio::test]
    async fn then_runs_while_session_is_active() {
        let owner = SessionOwner::open(RunId::new_random());
        let guard = TaskGuard::new(owner.session());

        let out = guard.then(ready(20), |n| Ok(n + 1)).await.unwrap();

        assert_eq!(out, 21);
    }

    #[tokio::test]
    async fn continuation_is_rejected_when_input_settles_after_invalidation() {
        let owner = SessionOwner::open(RunId::new_random());
        let guard = TaskGuard::new(owner.session());
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<i32>();

        let seen = calls.clone();
        let pending = tokio::spawn(guard.then(
            async move { rx.await.map_err(|_| DeferredError::value_absent("test")) },
            move |n| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(n)
            },
        ));

        owner.invalidate();
        tx.send(7).unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_stale());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_check_wins_over_input_failure() {
        let owner = SessionOwner::open(RunId::new_random());
        let guard = TaskGuard::new(owner.session());
        owner.invalidate();

        let err = guard
            .then(
                future::ready(Err::<i32, _>(DeferredError::computation_message("boom"))),
                Ok,
            )
            .await
            .unwrap_err();

        assert!(err.is_stale());
    }

    #[tokio::test]
    async fn race_combinators_check_the_session_too() {
        let owner = SessionOwner::open(RunId::new_random());
        let guard = TaskGuard::new(owner.session());
        owner.invalidate();

        let first = guard.clone().first_of(ready(1), future::pending()).await;
        let either = guard
            .clone()
            .after_either(future::pending(), ready(2), |n: i32| Ok(n * 2))
            .await;
        let both = guard.after_both(ready(1), ready(2), |a, b| Ok(a + b)).await;

        assert!(first.unwrap_err().is_stale());
        assert!(either.unwrap_err().is_stale());
        assert!(both.unwrap_err().is_stale());
    }

    #[tokio::test]
    async fn after_all_runs_every_input_and_reports_the_first_failure() {
        let ran = Arc::new(AtomicUsize::new(0));
        let inputs = (0..4)
            .map(|i| {
                let ran = ran.clone();
                async move {
                    tokio::task::yield_now().await;
                    ran.fetch_add(1, Ordering::SeqCst);
                    match i {
                        1 => Err(DeferredError::computation_message("first")),
                        3 => Err(DeferredError::computation_message("second")),
                        n => Ok(n),
                    }
                }
            })
            .collect::<Vec<_>>();

        let err = TaskGuard::unbound()
            .after_all(inputs, |values| Ok(values.len()))
            .await
            .unwrap_err();

        assert_eq!(ran.load(Ordering::SeqCst), 4);
        assert_eq!(err.to_string(), "Computation failed: first");
    }

    #[tokio::test]
    async fn first_of_returns_the_faster_input() {
        let out = TaskGuard::unbound()
            .first_of(future::pending(), ready("fast"))
            .await
            .unwrap();
        assert_eq!(out, "fast");
    }
}
