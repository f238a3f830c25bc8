//! Scoped acquisition and release of a service and its sub-resources.
//!
//! Two lifecycle interfaces exist side by side: [`Scope`] for synchronous
//! acquisition and [`AsyncScope`] for acquisition that suspends. A service
//! picks one of them. Sub-resources are entered in declaration order and
//! exited in reverse order; [`ScopeStack`] and [`AsyncScopeStack`] implement
//! that ordering and are themselves scopes, so stacks nest.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// States, exit reasons, errors
// ---------------------------------------------------------------------------

/// Lifecycle state of a scope.
///
/// `Created -> Entering -> Entered -> Running -> Exiting -> Exited`.
/// Synchronous scopes hold `Entering` and `Exiting` only for the duration of
/// the `enter_all`/`exit_all` call; asynchronous scopes stay there across
/// suspension points, and a cancelled call can leave them there. A failed
/// enter returns the scope to `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Created,
    Entering,
    Entered,
    Running,
    Exiting,
    Exited,
}

impl ScopeState {
    /// Whether resources acquired by the scope are currently held.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, ScopeState::Entered | ScopeState::Running)
    }
}

/// Why a scope is being left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The scope body finished without error.
    Completed,
    /// The scope body failed; carries the rendered error chain.
    Failed(String),
}

impl ExitReason {
    fn from_result<T>(result: &anyhow::Result<T>) -> Self {
        match result {
            Ok(_) => ExitReason::Completed,
            Err(e) => ExitReason::Failed(format!("{e:#}")),
        }
    }
}

/// What a scope asks its caller to do with an in-flight error after exiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitAction {
    /// Let the error continue to propagate.
    #[default]
    Propagate,
    /// Swallow the error. Only honoured when the body actually failed.
    Suppress,
}

/// One sub-resource that failed to release.
#[derive(Debug)]
pub struct ReleaseFailure {
    pub resource: String,
    pub error: anyhow::Error,
}

impl fmt::Display for ReleaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.resource, self.error)
    }
}

fn summarize(failures: &[ReleaseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while entering or exiting a scope.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// A sub-resource failed to enter. Sub-resources entered before it have
    /// already been exited when this is returned.
    #[error("failed to acquire {resource}: {source:#}")]
    Acquisition {
        resource: String,
        #[source]
        source: anyhow::Error,
    },
    /// One or more sub-resources failed to exit. Every release was attempted.
    #[error("{} release failure(s): {}", .failures.len(), summarize(.failures))]
    Release { failures: Vec<ReleaseFailure> },
    #[error("cannot {action} a scope in state {actual:?}")]
    InvalidState {
        action: &'static str,
        actual: ScopeState,
    },
}

/// Shared state cell with checked transitions.
#[derive(Debug)]
struct StateCell(Mutex<ScopeState>);

impl StateCell {
    fn new() -> Self {
        Self(Mutex::new(ScopeState::Created))
    }

    fn get(&self) -> ScopeState {
        *self.0.lock()
    }

    fn set(&self, state: ScopeState) {
        *self.0.lock() = state;
    }

    fn transition(
        &self,
        action: &'static str,
        allowed: &[ScopeState],
        to: ScopeState,
    ) -> Result<ScopeState, LifecycleError> {
        let mut state = self.0.lock();
        let from = *state;
        if !allowed.contains(&from) {
            return Err(LifecycleError::InvalidState {
                action,
                actual: from,
            });
        }
        *state = to;
        Ok(from)
    }
}

// ---------------------------------------------------------------------------
// Synchronous scopes
// ---------------------------------------------------------------------------

/// A resource with synchronous scoped acquisition.
pub trait Scope: Send {
    /// Human-readable name used in errors and logs.
    fn name(&self) -> &str;

    /// Acquires the resource.
    ///
    /// # Errors
    ///
    /// Fails when acquisition fails; the resource must then be left un-entered.
    fn enter(&mut self) -> anyhow::Result<()>;

    /// Releases the resource. Runs on every path out of the scope.
    ///
    /// # Errors
    ///
    /// Fails when release fails.
    fn exit(&mut self, reason: &ExitReason) -> anyhow::Result<ExitAction>;
}

/// Ordered set of synchronous sub-resources, entered forward and exited in reverse.
pub struct ScopeStack {
    name: String,
    resources: Vec<Box<dyn Scope>>,
    entered: usize,
    state: StateCell,
}

impl ScopeStack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            entered: 0,
            state: StateCell::new(),
        }
    }

    /// Adds a sub-resource. Must be called before the stack is entered.
    #[must_use]
    pub fn with(mut self, resource: impl Scope + 'static) -> Self {
        self.resources.push(Box::new(resource));
        self
    }

    #[must_use]
    pub fn state(&self) -> ScopeState {
        self.state.get()
    }

    /// Marks an entered scope as serving.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] unless the scope is `Entered`.
    pub fn mark_running(&self) -> Result<(), LifecycleError> {
        self.state
            .transition("run", &[ScopeState::Entered], ScopeState::Running)
            .map(|_| ())
    }

    /// Enters every sub-resource in order.
    ///
    /// # Errors
    ///
    /// On the first failure, exits the sub-resources entered so far in
    /// reverse order and returns [`LifecycleError::Acquisition`]. The stack
    /// is left `Created`.
    pub fn enter_all(&mut self) -> Result<(), LifecycleError> {
        self.state
            .transition("enter", &[ScopeState::Created], ScopeState::Entering)?;

        while self.entered < self.resources.len() {
            let resource = &mut self.resources[self.entered];
            if let Err(source) = resource.enter() {
                let name = resource.name().to_string();
                let reason = ExitReason::Failed(format!("{source:#}"));
                let (failures, _) = self.release_entered(&reason);
                for failure in &failures {
                    warn!(scope = %self.name, %failure, "cleanup after failed acquisition also failed");
                }
                self.state.set(ScopeState::Created);
                return Err(LifecycleError::Acquisition {
                    resource: name,
                    source,
                });
            }
            self.entered += 1;
        }

        self.state.set(ScopeState::Entered);
        info!(scope = %self.name, resources = self.entered, "scope entered");
        Ok(())
    }

    /// Exits every entered sub-resource in reverse order.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Release`] with every failure once all
    /// releases were attempted.
    pub fn exit_all(&mut self, reason: &ExitReason) -> Result<ExitAction, LifecycleError> {
        self.state.transition(
            "exit",
            &[ScopeState::Entered, ScopeState::Running],
            ScopeState::Exiting,
        )?;

        let (failures, action) = self.release_entered(reason);
        self.state.set(ScopeState::Exited);
        info!(scope = %self.name, ?reason, "scope exited");

        if failures.is_empty() {
            Ok(action)
        } else {
            Err(LifecycleError::Release { failures })
        }
    }

    fn release_entered(&mut self, reason: &ExitReason) -> (Vec<ReleaseFailure>, ExitAction) {
        let mut failures = Vec::new();
        let mut action = ExitAction::Propagate;
        while self.entered > 0 {
            self.entered -= 1;
            let resource = &mut self.resources[self.entered];
            match resource.exit(reason) {
                Ok(ExitAction::Suppress) => action = ExitAction::Suppress,
                Ok(ExitAction::Propagate) => {}
                Err(error) => failures.push(ReleaseFailure {
                    resource: resource.name().to_string(),
                    error,
                }),
            }
        }
        (failures, action)
    }
}

impl fmt::Debug for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeStack")
            .field("name", &self.name)
            .field("resources", &self.resources.len())
            .field("entered", &self.entered)
            .field("state", &self.state())
            .finish()
    }
}

impl Scope for ScopeStack {
    fn name(&self) -> &str {
        &self.name
    }

    fn enter(&mut self) -> anyhow::Result<()> {
        Ok(self.enter_all()?)
    }

    fn exit(&mut self, reason: &ExitReason) -> anyhow::Result<ExitAction> {
        Ok(self.exit_all(reason)?)
    }
}

/// Runs `body` inside `scope`: enter, body, then exit on every return path.
///
/// Returns `Ok(None)` only when the body failed and the scope asked for the
/// error to be suppressed. A body error takes precedence over an exit error;
/// the exit error is logged in that case.
///
/// # Errors
///
/// Returns the enter error, the body error, or the exit error, in that order
/// of precedence.
pub fn with_scope<S, T, F>(scope: &mut S, body: F) -> anyhow::Result<Option<T>>
where
    S: Scope + ?Sized,
    F: FnOnce(&mut S) -> anyhow::Result<T>,
{
    scope.enter()?;
    let result = body(scope);
    let exit = scope.exit(&ExitReason::from_result(&result));
    settle(scope.name(), result, exit)
}

fn settle<T>(
    scope: &str,
    result: anyhow::Result<T>,
    exit: anyhow::Result<ExitAction>,
) -> anyhow::Result<Option<T>> {
    match (result, exit) {
        (Ok(value), Ok(_)) => Ok(Some(value)),
        (Ok(_), Err(exit_err)) => Err(exit_err),
        (Err(body_err), Ok(ExitAction::Suppress)) => {
            warn!(scope, error = %format!("{body_err:#}"), "scope suppressed error");
            Ok(None)
        }
        (Err(body_err), Ok(ExitAction::Propagate)) => Err(body_err),
        (Err(body_err), Err(exit_err)) => {
            error!(scope, error = %format!("{exit_err:#}"), "scope exit failed while propagating an error");
            Err(body_err)
        }
    }
}

// ---------------------------------------------------------------------------
// Asynchronous scopes
// ---------------------------------------------------------------------------

/// A resource whose acquisition and release may suspend.
///
/// Methods take `&self` so a resource can be shared with the task that
/// drives its acquisition; implementors use interior mutability.
#[async_trait]
pub trait AsyncScope: Send + Sync {
    /// Human-readable name used in errors and logs.
    fn name(&self) -> &str;

    /// Acquires the resource.
    ///
    /// # Errors
    ///
    /// Fails when acquisition fails; the resource must then be left un-entered.
    async fn enter(&self) -> anyhow::Result<()>;

    /// Releases the resource.
    ///
    /// # Errors
    ///
    /// Fails when release fails.
    async fn exit(&self, reason: &ExitReason) -> anyhow::Result<ExitAction>;
}

/// Release outcomes recorded by exit tasks, drained by `exit_all`.
#[derive(Default)]
struct ReleaseLog {
    failures: Vec<ReleaseFailure>,
    action: ExitAction,
}

/// Asynchronous sub-resource stack on top of a synchronous base stack.
///
/// Entering runs the base enter first, then enters each asynchronous
/// sub-resource in order. Exiting runs in the opposite direction. Each
/// sub-resource operation runs on its own spawned task that holds the
/// stack's operation permit until it has updated the bookkeeping, so:
///
/// - dropping the future that drives `enter_all`/`exit_all` never interrupts
///   a sub-resource half-way;
/// - `exit_all` waits for an abandoned enter to finish before releasing, so
///   a late acquisition is still released;
/// - an `exit_all` cancelled part-way can be called again and resumes with
///   the sub-resources still held.
pub struct AsyncScopeStack {
    name: String,
    base: Mutex<ScopeStack>,
    resources: Vec<Arc<dyn AsyncScope>>,
    entered: Arc<Mutex<Vec<usize>>>,
    in_flight: Arc<tokio::sync::Mutex<()>>,
    released: Arc<Mutex<ReleaseLog>>,
    state: StateCell,
}

impl AsyncScopeStack {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            base: Mutex::new(ScopeStack::new(format!("{name}/base"))),
            name,
            resources: Vec::new(),
            entered: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(tokio::sync::Mutex::new(())),
            released: Arc::new(Mutex::new(ReleaseLog::default())),
            state: StateCell::new(),
        }
    }

    /// Replaces the synchronous base stack.
    #[must_use]
    pub fn with_base(mut self, base: ScopeStack) -> Self {
        self.base = Mutex::new(base);
        self
    }

    /// Adds an asynchronous sub-resource. Must be called before entering.
    #[must_use]
    pub fn with(mut self, resource: Arc<dyn AsyncScope>) -> Self {
        self.resources.push(resource);
        self
    }

    #[must_use]
    pub fn state(&self) -> ScopeState {
        self.state.get()
    }

    /// Names of the sub-resources currently held, in acquisition order.
    #[must_use]
    pub fn held(&self) -> Vec<String> {
        self.entered
            .lock()
            .iter()
            .map(|&idx| self.resources[idx].name().to_string())
            .collect()
    }

    /// Marks an entered scope as serving.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] unless the scope is `Entered`.
    pub fn mark_running(&self) -> Result<(), LifecycleError> {
        self.state
            .transition("run", &[ScopeState::Entered], ScopeState::Running)
            .map(|_| ())
    }

    /// Enters the base stack, then every asynchronous sub-resource in order.
    ///
    /// # Errors
    ///
    /// If sub-resource `k` fails, sub-resources `0..k` and the base are
    /// exited (best effort, failures logged) before
    /// [`LifecycleError::Acquisition`] is returned and the stack is back in
    /// `Created`.
    pub async fn enter_all(&self) -> Result<(), LifecycleError> {
        self.state
            .transition("enter", &[ScopeState::Created], ScopeState::Entering)?;

        let base_entered = self.base.lock().enter_all();
        if let Err(e) = base_entered {
            self.state.set(ScopeState::Created);
            return Err(e);
        }

        for (idx, resource) in self.resources.iter().enumerate() {
            let permit = Arc::clone(&self.in_flight).lock_owned().await;
            let actual = self.state.get();
            if actual != ScopeState::Entering {
                // An exit started while this enter was waiting for the permit.
                return Err(LifecycleError::InvalidState {
                    action: "enter",
                    actual,
                });
            }
            let task_resource = Arc::clone(resource);
            let entered = Arc::clone(&self.entered);
            let outcome = tokio::spawn(async move {
                let _permit = permit;
                task_resource.enter().await?;
                entered.lock().push(idx);
                Ok::<_, anyhow::Error>(())
            })
            .await
            .unwrap_or_else(|join_err| Err(anyhow::anyhow!("enter task failed: {join_err}")));

            if let Err(source) = outcome {
                let reason = ExitReason::Failed(format!("{source:#}"));
                let (mut failures, _) = self.release_held(&reason).await;
                let base_exited = self.base.lock().exit_all(&reason);
                if let Err(LifecycleError::Release { failures: base }) = base_exited {
                    failures.extend(base);
                }
                for failure in &failures {
                    warn!(scope = %self.name, %failure, "cleanup after failed acquisition also failed");
                }
                self.base_reset();
                self.state.set(ScopeState::Created);
                return Err(LifecycleError::Acquisition {
                    resource: resource.name().to_string(),
                    source,
                });
            }
        }

        self.state.set(ScopeState::Entered);
        info!(scope = %self.name, resources = self.resources.len(), "async scope entered");
        Ok(())
    }

    /// Exits every held sub-resource in reverse order, then the base stack.
    ///
    /// Each exit is awaited before the next one starts. A failed exit does
    /// not stop the remaining ones. A sub-resource enter still in flight is
    /// awaited first and its resource released along with the others.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Release`] carrying every failure, including
    /// those of an earlier cancelled call, once all releases were attempted.
    pub async fn exit_all(&self, reason: &ExitReason) -> Result<ExitAction, LifecycleError> {
        // `Entering` unwinds an abandoned enter; `Exiting` resumes an
        // abandoned exit.
        self.state.transition(
            "exit",
            &[
                ScopeState::Entering,
                ScopeState::Entered,
                ScopeState::Running,
                ScopeState::Exiting,
            ],
            ScopeState::Exiting,
        )?;

        let (mut failures, mut action) = self.release_held(reason).await;
        let base_exited = self.base.lock().exit_all(reason);
        match base_exited {
            Ok(ExitAction::Suppress) => action = ExitAction::Suppress,
            Ok(ExitAction::Propagate) | Err(LifecycleError::InvalidState { .. }) => {}
            Err(LifecycleError::Release { failures: base }) => failures.extend(base),
            Err(other) => failures.push(ReleaseFailure {
                resource: self.name.clone(),
                error: other.into(),
            }),
        }
        self.state.set(ScopeState::Exited);

        if failures.is_empty() {
            info!(scope = %self.name, ?reason, "async scope exited");
            Ok(action)
        } else {
            for failure in &failures {
                error!(scope = %self.name, %failure, "sub-resource release failed");
            }
            Err(LifecycleError::Release { failures })
        }
    }

    async fn release_held(&self, reason: &ExitReason) -> (Vec<ReleaseFailure>, ExitAction) {
        // Pop one at a time, under the permit, so an interrupted release
        // leaves the rest recorded and waits out any in-flight enter.
        loop {
            let permit = Arc::clone(&self.in_flight).lock_owned().await;
            let Some(idx) = self.entered.lock().pop() else {
                break;
            };
            let resource = Arc::clone(&self.resources[idx]);
            let released = Arc::clone(&self.released);
            let task_reason = reason.clone();
            let task = tokio::spawn(async move {
                let _permit = permit;
                let outcome = resource.exit(&task_reason).await;
                let mut log = released.lock();
                match outcome {
                    Ok(ExitAction::Suppress) => log.action = ExitAction::Suppress,
                    Ok(ExitAction::Propagate) => {}
                    Err(error) => log.failures.push(ReleaseFailure {
                        resource: resource.name().to_string(),
                        error,
                    }),
                }
            });

            if let Err(join_err) = task.await {
                self.released.lock().failures.push(ReleaseFailure {
                    resource: self.resources[idx].name().to_string(),
                    error: anyhow::anyhow!("exit task failed: {join_err}"),
                });
            }
        }

        let log = std::mem::take(&mut *self.released.lock());
        (log.failures, log.action)
    }

    /// Rebuilds the base stack's state after a rolled-back enter so the
    /// stack can be entered again.
    fn base_reset(&self) {
        let mut base = self.base.lock();
        let fresh = ScopeStack {
            name: base.name.clone(),
            resources: std::mem::take(&mut base.resources),
            entered: 0,
            state: StateCell::new(),
        };
        *base = fresh;
    }
}

impl fmt::Debug for AsyncScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncScopeStack")
            .field("name", &self.name)
            .field("resources", &self.resources.len())
            .field("held", &self.held())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AsyncScope for AsyncScopeStack {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enter(&self) -> anyhow::Result<()> {
        Ok(self.enter_all().await?)
    }

    async fn exit(&self, reason: &ExitReason) -> anyhow::Result<ExitAction> {
        Ok(self.exit_all(reason).await?)
    }
}

/// Runs the future `body` inside `scope`: enter, body, then exit on every
/// return path. Same precedence rules as [`with_scope`].
///
/// # Errors
///
/// Returns the enter error, the body error, or the exit error.
pub async fn with_async_scope<S, T, Fut>(scope: &S, body: Fut) -> anyhow::Result<Option<T>>
where
    S: AsyncScope + ?Sized,
    Fut: Future<Output = anyhow::Result<T>>,
{
    scope.enter().await?;
    let result = body.await;
    let exit = scope.exit(&ExitReason::from_result(&result)).await;
    settle(scope.name(), result, exit)
}

/// Runs a blocking `body` inside an asynchronous `scope`.
///
/// Enter and exit are driven to completion on `runtime`; `body` runs on the
/// calling thread and may itself block (for example in a serve loop). Must
/// not be called from within an asynchronous context.
///
/// # Errors
///
/// Returns the enter error, the body error, or the exit error.
pub fn with_async_scope_blocking<S, T, F>(
    runtime: &tokio::runtime::Handle,
    scope: &S,
    body: F,
) -> anyhow::Result<Option<T>>
where
    S: AsyncScope + ?Sized,
    F: FnOnce() -> anyhow::Result<T>,
{
    runtime.block_on(scope.enter())?;
    let result = body();
    let exit = runtime.block_on(scope.exit(&ExitReason::from_result(&result)));
    settle(scope.name(), result, exit)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
