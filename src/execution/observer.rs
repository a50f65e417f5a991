use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::error::TaskFailure;
use crate::job::ComponentHandle;

/// Execution events emitted by the engine.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        components: usize,
    },
    /// A component was initialized and is about to receive rows.
    ComponentBegin {
        handle: ComponentHandle,
        name: String,
    },
    ThrottleWaited {
        duration: Duration,
    },
    ChunkStarted {
        start_row: u64,
        row_count: usize,
    },
    ChunkFinished {
        processed_rows: usize,
    },
    /// A failure was recorded. Under the default policy this happens once per component.
    ComponentFailed {
        failure: TaskFailure,
    },
    ResultCollected {
        handle: ComponentHandle,
        name: String,
    },
    Cancelled,
    RunFinished {
        elapsed: Duration,
        metrics: ExecutionMetricsSnapshot,
    },
}

/// Observer hook for execution events.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// A simple stderr logger for execution events.
#[derive(Default)]
pub struct StdErrExecutionObserver;

impl ExecutionObserver for StdErrExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        eprintln!("{event:?}");
    }
}

/// Forwards execution events to `tracing`.
///
/// Lifecycle events log at `info`, failures at `warn`, per-chunk events at `debug`/`trace`.
#[derive(Default)]
pub struct TracingExecutionObserver;

impl ExecutionObserver for TracingExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunStarted { components } => info!(components, "analysis run started"),
            ExecutionEvent::ComponentBegin { handle, name } => {
                debug!(component = %handle, name = %name, "component initialized")
            }
            ExecutionEvent::ThrottleWaited { duration } => trace!(?duration, "waited for task permit"),
            ExecutionEvent::ChunkStarted { start_row, row_count } => {
                trace!(start_row, row_count, "chunk started")
            }
            ExecutionEvent::ChunkFinished { processed_rows } => trace!(processed_rows, "chunk finished"),
            ExecutionEvent::ComponentFailed { failure } => warn!(%failure, "component failure recorded"),
            ExecutionEvent::ResultCollected { handle, name } => {
                debug!(component = %handle, name = %name, "analyzer result collected")
            }
            ExecutionEvent::Cancelled => info!("analysis run cancelled"),
            ExecutionEvent::RunFinished { elapsed, metrics } => {
                info!(?elapsed, %metrics, "analysis run finished")
            }
        }
    }
}

/// Fans events out to several observers in registration order.
#[derive(Default, Clone)]
pub struct CompositeExecutionObserver {
    observers: Vec<Arc<dyn ExecutionObserver>>,
}

impl CompositeExecutionObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn push(&mut self, observer: Arc<dyn ExecutionObserver>) {
        self.observers.push(observer);
    }
}

impl ExecutionObserver for CompositeExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

/// Real-time metrics for an execution run.
///
/// The engine updates these counters during execution; callers can snapshot them at any time.
pub struct ExecutionMetrics {
    run_id: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    elapsed_ns: AtomicU64,

    rows_processed: AtomicU64,
    chunks_started: AtomicU64,
    chunks_finished: AtomicU64,
    throttle_wait_ns: AtomicU64,

    active_chunks: AtomicUsize,
    max_active_chunks: AtomicUsize,

    component_invocations: AtomicU64,
    component_skips: AtomicU64,
    component_failures: AtomicU64,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            started_at: Mutex::new(None),
            elapsed_ns: AtomicU64::new(0),
            rows_processed: AtomicU64::new(0),
            chunks_started: AtomicU64::new(0),
            chunks_finished: AtomicU64::new(0),
            throttle_wait_ns: AtomicU64::new(0),
            active_chunks: AtomicUsize::new(0),
            max_active_chunks: AtomicUsize::new(0),
            component_invocations: AtomicU64::new(0),
            component_skips: AtomicU64::new(0),
            component_failures: AtomicU64::new(0),
        }
    }

    pub fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst) + 1;
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.rows_processed.store(0, Ordering::SeqCst);
        self.chunks_started.store(0, Ordering::SeqCst);
        self.chunks_finished.store(0, Ordering::SeqCst);
        self.throttle_wait_ns.store(0, Ordering::SeqCst);
        self.active_chunks.store(0, Ordering::SeqCst);
        self.max_active_chunks.store(0, Ordering::SeqCst);
        self.component_invocations.store(0, Ordering::SeqCst);
        self.component_skips.store(0, Ordering::SeqCst);
        self.component_failures.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub fn on_row_processed(&self) {
        let _ = self.rows_processed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_chunk_start(&self) {
        let _ = self.chunks_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_chunks.fetch_add(1, Ordering::SeqCst) + 1;
        update_max_usize(&self.max_active_chunks, now);
    }

    pub fn on_chunk_end(&self) {
        let _ = self.chunks_finished.fetch_add(1, Ordering::SeqCst);
        let _ = self.active_chunks.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn on_throttle_wait(&self, d: Duration) {
        let add = d.as_nanos().min(u64::MAX as u128) as u64;
        let _ = self.throttle_wait_ns.fetch_add(add, Ordering::SeqCst);
    }

    pub fn on_component_invoked(&self) {
        let _ = self.component_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_component_skipped(&self) {
        let _ = self.component_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_component_failure(&self) {
        let _ = self.component_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let run_id = self.run_id.load(Ordering::SeqCst);
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        let elapsed = if elapsed_ns > 0 {
            Some(Duration::from_nanos(elapsed_ns))
        } else {
            None
        };

        ExecutionMetricsSnapshot {
            run_id,
            elapsed,
            rows_processed: self.rows_processed.load(Ordering::SeqCst),
            chunks_started: self.chunks_started.load(Ordering::SeqCst),
            chunks_finished: self.chunks_finished.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
            max_active_chunks: self.max_active_chunks.load(Ordering::SeqCst),
            component_invocations: self.component_invocations.load(Ordering::Relaxed),
            component_skips: self.component_skips.load(Ordering::Relaxed),
            component_failures: self.component_failures.load(Ordering::SeqCst),
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn update_max_usize(dst: &AtomicUsize, now: usize) {
    loop {
        let cur = dst.load(Ordering::SeqCst);
        if now <= cur {
            break;
        }
        if dst.compare_exchange(cur, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            break;
        }
    }
}

/// Immutable snapshot of [`ExecutionMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub rows_processed: u64,
    pub chunks_started: u64,
    pub chunks_finished: u64,
    pub throttle_wait: Duration,
    pub max_active_chunks: usize,
    pub component_invocations: u64,
    pub component_skips: u64,
    pub component_failures: u64,
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, rows_processed={}, chunks={}/{}, max_active_chunks={}, invocations={}, skips={}, failures={}, throttle_wait={:?}, elapsed={:?}",
            self.run_id,
            self.rows_processed,
            self.chunks_finished,
            self.chunks_started,
            self.max_active_chunks,
            self.component_invocations,
            self.component_skips,
            self.component_failures,
            self.throttle_wait,
            self.elapsed
        )
    }
}
