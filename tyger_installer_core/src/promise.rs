/// The promise/dependency engine (C2).
///
/// Schedules concurrent, dependency-ordered async work and merges
/// results: each unit of work runs as a `tokio::spawn`ed task behind a
/// `futures::future::Shared` handle, so a `Promise` can be awaited by
/// many readers exactly once.
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::Future;
use tokio_util::sync::CancellationToken;

/// The error a `Promise` resolves to when it does not produce a value.
#[derive(Clone, Debug)]
pub enum PromiseError {
    /// A predecessor failed (or was itself `DependencyFailed`); this
    /// promise's body never ran. Suppressed from user-facing error
    /// output; only the error(s) at its origin get logged.
    DependencyFailed,
    /// The root context was cancelled before or during this promise's
    /// body.
    Cancelled,
    /// The promise's body ran and returned an error.
    Failed(Arc<failure::Error>),
}

impl fmt::Display for PromiseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromiseError::DependencyFailed => write!(f, "dependency-failed"),
            PromiseError::Cancelled => write!(f, "cancelled"),
            PromiseError::Failed(e) => write!(f, "{}", e),
        }
    }
}

impl PromiseError {
    pub fn is_dependency_failed(&self) -> bool {
        matches!(self, PromiseError::DependencyFailed)
    }
}

pub type PromiseOutcome<T> = Result<T, PromiseError>;

/// A single-shot, awaitable result of one provisioning step.
///
/// Immutable reference to a computation that runs at most once; stores
/// its outcome; exposes `resolve`/`resolve_err`. `Promise` is cheap to
/// clone (it shares the underlying task via a `Shared` future), so it
/// can be handed to any number of dependents.
pub struct Promise<T: Clone + Send + Sync + 'static> {
    shared: Shared<BoxFuture<'static, PromiseOutcome<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise { shared: self.shared.clone() }
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// Block until the promise resolves, returning its value or error.
    /// Safe to call from many readers; each call returns the same
    /// outcome.
    pub async fn resolve(&self) -> PromiseOutcome<T> {
        self.shared.clone().await
    }

    /// Block until the promise resolves, returning only the error (if
    /// any). Used by dependents that only need to gate on success.
    pub async fn resolve_err(&self) -> Option<PromiseError> {
        self.resolve().await.err()
    }

    /// Erase `T` so this promise can be passed as a dependency alongside
    /// promises of other result types, or registered with a
    /// `PromiseGroup`.
    pub fn erased(&self) -> Arc<dyn AnyPromise> {
        Arc::new(self.clone())
    }
}

/// Type-erased view of a `Promise<T>`, used for heterogeneous
/// dependency lists and group-wide error aggregation.
#[async_trait]
pub trait AnyPromise: Send + Sync {
    async fn outcome(&self) -> Option<PromiseError>;
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> AnyPromise for Promise<T> {
    async fn outcome(&self) -> Option<PromiseError> {
        self.resolve_err().await
    }
}

/// The collection the orchestrator uses to await everything spawned
/// during an install/uninstall run.
#[derive(Default, Clone)]
pub struct PromiseGroup {
    members: Arc<Mutex<Vec<Arc<dyn AnyPromise>>>>,
}

impl PromiseGroup {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, p: Arc<dyn AnyPromise>) {
        self.members.lock().unwrap().push(p);
    }

    /// Await every promise registered so far and return the errors of
    /// the ones that failed, in registration order. Includes
    /// `DependencyFailed` entries; callers (the orchestrators) are
    /// responsible for filtering those out before logging.
    pub async fn await_all(&self) -> Vec<PromiseError> {
        let members: Vec<_> = self.members.lock().unwrap().clone();
        let outcomes = futures::future::join_all(members.iter().map(|m| m.outcome())).await;
        outcomes.into_iter().flatten().collect()
    }

    /// Number of promises registered so far.
    pub fn len(&self) -> usize {
        self.members.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawn `body` as an independent task and register it with `group`.
///
/// `body` receives a clone of `cancel` and is expected to check it at
/// its own suspension points (SDK calls, polling loops, sleeps); this
/// function additionally races the body against cancellation so a task
/// that never checks still resolves promptly to `Cancelled`.
pub fn new_promise<T, F, Fut>(cancel: CancellationToken, group: &PromiseGroup, body: F) -> Promise<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, failure::Error>> + Send + 'static,
{
    let fut: BoxFuture<'static, PromiseOutcome<T>> = Box::pin(run_cancellable(cancel, body));
    let promise = Promise { shared: fut.shared() };
    // Drive the shared future to completion in the background so the
    // task progresses even if nobody is currently awaiting it.
    tokio::spawn(promise.shared.clone());
    group.push(promise.erased());
    promise
}

/// Like `new_promise`, but first awaits every promise in `deps`; if any
/// dependency failed (including transitively, via its own
/// `DependencyFailed`), `body` is never invoked and this promise
/// resolves to `PromiseError::DependencyFailed`.
pub fn new_promise_after<T, F, Fut>(
    cancel: CancellationToken,
    group: &PromiseGroup,
    deps: Vec<Arc<dyn AnyPromise>>,
    body: F,
) -> Promise<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, failure::Error>> + Send + 'static,
{
    let fut: BoxFuture<'static, PromiseOutcome<T>> = Box::pin(async move {
        let outcomes = futures::future::join_all(deps.iter().map(|d| d.outcome())).await;
        if outcomes.into_iter().any(|o| o.is_some()) {
            return Err(PromiseError::DependencyFailed);
        }
        run_cancellable(cancel, body).await
    });
    let promise = Promise { shared: fut.shared() };
    tokio::spawn(promise.shared.clone());
    group.push(promise.erased());
    promise
}

async fn run_cancellable<T, F, Fut>(cancel: CancellationToken, body: F) -> PromiseOutcome<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, failure::Error>>,
{
    if cancel.is_cancelled() {
        return Err(PromiseError::Cancelled);
    }
    let body_fut = body(cancel.clone());
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PromiseError::Cancelled),
        res = body_fut => res.map_err(|e| PromiseError::Failed(Arc::new(e))),
    }
}

/// Resolve a pinned, boxed dependency future without pulling in the
/// whole `AnyPromise` machinery. Occasionally convenient in step
/// bodies that hold `Promise<T>` handles directly rather than erased
/// ones.
pub fn pin_box<'a, Fut>(fut: Fut) -> Pin<Box<dyn Future<Output = Fut::Output> + Send + 'a>>
where
    Fut: Future + Send + 'a,
{
    Box::pin(fut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn resolves_once_for_many_readers() {
        let cancel = CancellationToken::new();
        let group = PromiseGroup::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c2 = counter.clone();
        let p = new_promise::<i32, _, _>(cancel, &group, move |_| async move {
            c2.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        });

        let (a, b) = tokio::join!(p.resolve(), p.resolve());
        assert_eq!(a.unwrap(), 42);
        assert_eq!(b.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dependency_failure_prevents_body_execution() {
        let cancel = CancellationToken::new();
        let group = PromiseGroup::new();

        let failing = new_promise::<i32, _, _>(cancel.clone(), &group, |_| async move {
            failure::bail!("boom")
        });

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let dependent = new_promise_after::<i32, _, _>(
            cancel,
            &group,
            vec![failing.erased()],
            move |_| async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            },
        );

        let outcome = dependent.resolve().await;
        assert!(matches!(outcome, Err(PromiseError::DependencyFailed)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn group_collects_non_dependency_errors() {
        let cancel = CancellationToken::new();
        let group = PromiseGroup::new();

        let _ok = new_promise::<i32, _, _>(cancel.clone(), &group, |_| async move { Ok(1) });
        let failing = new_promise::<i32, _, _>(cancel.clone(), &group, |_| async move {
            failure::bail!("real failure")
        });
        let _dependent = new_promise_after::<i32, _, _>(cancel, &group, vec![failing.erased()], |_| async move {
            Ok(2)
        });

        let errors = group.await_all().await;
        let real_errors: Vec<_> = errors.iter().filter(|e| !e.is_dependency_failed()).collect();
        assert_eq!(real_errors.len(), 1);
        assert_eq!(errors.len(), 2); // the dependent's DependencyFailed is also present
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let group = PromiseGroup::new();
        let p = new_promise::<i32, _, _>(cancel, &group, |_| async move { Ok(1) });
        assert!(matches!(p.resolve().await, Err(PromiseError::Cancelled)));
    }
}
