//! Task runners: where row tasks execute.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{ComponentError, ExecutionError, TaskFailure};

use super::processor::panic_message;
use super::semaphore::Semaphore;

/// A unit of work. Returning `Err` (or panicking) records a [`TaskFailure`].
pub type TaskFn = Box<dyn FnOnce() -> Result<(), TaskFailure> + Send + 'static>;

/// Called with the time a submission waited for a free permit.
pub type ThrottleListener = Arc<dyn Fn(Duration) + Send + Sync>;

/// Lifecycle of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    /// Not run because the runner was cancelled first.
    Discarded,
}

impl TaskStatus {
    pub fn is_done(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Discarded)
    }
}

struct SlotState {
    status: TaskStatus,
    failure: Option<TaskFailure>,
}

struct TaskSlot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

/// Handle to a submitted task: its status, and once it is done, its result.
#[derive(Clone)]
pub struct TaskHandle {
    slot: Arc<TaskSlot>,
}

impl TaskHandle {
    fn new(status: TaskStatus) -> Self {
        Self {
            slot: Arc::new(TaskSlot {
                state: Mutex::new(SlotState { status, failure: None }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.slot.state.lock().unwrap_or_else(PoisonError::into_inner).status
    }

    /// Block until the task completed, failed or was discarded.
    pub fn wait(&self) -> TaskStatus {
        self.wait_done(|state| state.status)
    }

    /// Block until the task is done and return its result.
    ///
    /// A failed task returns its own [`TaskFailure`]; it is also reported by
    /// [`TaskRunner::await_all`]. A discarded task fails with [`ComponentError::Discarded`].
    pub fn join(&self) -> Result<(), TaskFailure> {
        self.wait_done(|state| match state.status {
            TaskStatus::Completed => Ok(()),
            TaskStatus::Failed => Err(state
                .failure
                .clone()
                .unwrap_or_else(|| TaskFailure::task(None, ComponentError::new("task failed")))),
            _ => Err(TaskFailure::task(None, ComponentError::Discarded)),
        })
    }

    fn wait_done<T>(&self, read: impl FnOnce(&SlotState) -> T) -> T {
        let mut state = self.slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        while !state.status.is_done() {
            state = self.slot.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        read(&*state)
    }

    fn set(&self, status: TaskStatus) {
        self.slot.state.lock().unwrap_or_else(PoisonError::into_inner).status = status;
        self.slot.changed.notify_all();
    }

    fn fail(&self, failure: TaskFailure) {
        let mut state = self.slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.status = TaskStatus::Failed;
        state.failure = Some(failure);
        drop(state);
        self.slot.changed.notify_all();
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of draining a runner with [`TaskRunner::await_all`].
#[derive(Debug, Clone, Default)]
pub struct RunnerSummary {
    pub completed: u64,
    pub discarded: u64,
    pub failures: Vec<TaskFailure>,
    pub throttle_wait: Duration,
}

impl RunnerSummary {
    pub fn is_successful(&self) -> bool {
        self.failures.is_empty() && self.discarded == 0
    }
}

/// Executes submitted tasks and reports their failures.
///
/// A failing task never affects its siblings.
pub trait TaskRunner: Send + Sync {
    fn submit(&self, task: TaskFn) -> TaskHandle;

    /// Block until every submitted task is done and return what happened since the last call.
    fn await_all(&self) -> RunnerSummary;

    /// Discard queued tasks. Running tasks are not interrupted.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

#[derive(Default)]
struct Ledger {
    pending: Mutex<usize>,
    idle: Condvar,
    failures: Mutex<Vec<TaskFailure>>,
    completed: AtomicU64,
    discarded: AtomicU64,
    throttle_wait_ns: AtomicU64,
}

impl Ledger {
    fn execute(&self, task: TaskFn, handle: &TaskHandle) {
        handle.set(TaskStatus::Running);
        let failure = match catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(())) => None,
            Ok(Err(failure)) => Some(failure),
            Err(payload) => Some(TaskFailure::task(
                None,
                ComponentError::Panicked(panic_message(&*payload)),
            )),
        };
        match failure {
            None => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                handle.set(TaskStatus::Completed);
            }
            Some(failure) => {
                self.failures
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(failure.clone());
                handle.fail(failure);
            }
        }
    }

    fn discard(&self, handle: &TaskHandle) {
        self.discarded.fetch_add(1, Ordering::SeqCst);
        handle.set(TaskStatus::Discarded);
    }

    fn task_queued(&self) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn task_done(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending -= 1;
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        while *pending > 0 {
            pending = self.idle.wait(pending).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn drain(&self) -> RunnerSummary {
        RunnerSummary {
            completed: self.completed.swap(0, Ordering::SeqCst),
            discarded: self.discarded.swap(0, Ordering::SeqCst),
            failures: std::mem::take(&mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner)),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.swap(0, Ordering::SeqCst)),
        }
    }
}

/// Runs every task inline on the submitting thread, in submission order.
#[derive(Default)]
pub struct SingleThreadedTaskRunner {
    token: CancellationToken,
    ledger: Ledger,
}

impl SingleThreadedTaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner observing an externally owned cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            ledger: Ledger::default(),
        }
    }
}

impl TaskRunner for SingleThreadedTaskRunner {
    fn submit(&self, task: TaskFn) -> TaskHandle {
        let handle = TaskHandle::new(TaskStatus::Queued);
        if self.token.is_cancelled() {
            self.ledger.discard(&handle);
        } else {
            self.ledger.execute(task, &handle);
        }
        handle
    }

    fn await_all(&self) -> RunnerSummary {
        self.ledger.drain()
    }

    fn cancel(&self) {
        self.token.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Runs tasks on a rayon pool, with at most `max_in_flight` tasks queued or running.
///
/// `submit` blocks while the limit is reached, which gives the producer backpressure. Do not
/// submit from inside a task: with every permit held by running tasks that wait on `submit`, the
/// pool can deadlock.
pub struct MultiThreadedTaskRunner {
    pool: Arc<ThreadPool>,
    permits: Arc<Semaphore>,
    token: CancellationToken,
    ledger: Arc<Ledger>,
    throttle_listener: Option<ThrottleListener>,
}

impl MultiThreadedTaskRunner {
    /// Runner with its own pool of `num_threads` workers (available parallelism when `None`).
    pub fn new(num_threads: Option<usize>, max_in_flight: usize) -> Result<Self, ExecutionError> {
        let pool = build_pool(num_threads)?;
        Self::with_pool(Arc::new(pool), max_in_flight, CancellationToken::new())
    }

    /// Runner sharing an existing pool.
    pub fn with_pool(
        pool: Arc<ThreadPool>,
        max_in_flight: usize,
        token: CancellationToken,
    ) -> Result<Self, ExecutionError> {
        if max_in_flight == 0 {
            return Err(ExecutionError::InvalidOptions(
                "max_in_flight_chunks must be > 0".to_string(),
            ));
        }
        Ok(Self {
            pool,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            token,
            ledger: Arc::new(Ledger::default()),
            throttle_listener: None,
        })
    }

    pub fn with_throttle_listener(mut self, listener: ThrottleListener) -> Self {
        self.throttle_listener = Some(listener);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}

impl TaskRunner for MultiThreadedTaskRunner {
    fn submit(&self, task: TaskFn) -> TaskHandle {
        let handle = TaskHandle::new(TaskStatus::Queued);
        if self.token.is_cancelled() {
            self.ledger.discard(&handle);
            return handle;
        }

        let waited = self.permits.acquire();
        if waited > Duration::ZERO {
            let ns = waited.as_nanos().min(u64::MAX as u128) as u64;
            self.ledger.throttle_wait_ns.fetch_add(ns, Ordering::SeqCst);
            if let Some(listener) = &self.throttle_listener {
                listener(waited);
            }
        }

        self.ledger.task_queued();
        let ledger = Arc::clone(&self.ledger);
        let permits = Arc::clone(&self.permits);
        let token = self.token.clone();
        let task_handle = handle.clone();
        self.pool.spawn(move || {
            if token.is_cancelled() {
                ledger.discard(&task_handle);
            } else {
                ledger.execute(task, &task_handle);
            }
            permits.release();
            ledger.task_done();
        });
        handle
    }

    fn await_all(&self) -> RunnerSummary {
        self.ledger.wait_idle();
        self.ledger.drain()
    }

    fn cancel(&self) {
        self.token.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub(crate) fn build_pool(num_threads: Option<usize>) -> Result<ThreadPool, ExecutionError> {
    if num_threads == Some(0) {
        return Err(ExecutionError::InvalidOptions(
            "num_threads must be > 0 when set".to_string(),
        ));
    }
    let n_threads = num_threads
        .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
        .max(1);
    Ok(ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("dq-worker-{i}"))
        .build()?)
}
