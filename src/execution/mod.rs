//! Execution engine for running frozen jobs over row sources with configurable parallelism.
//!
//! This module sits "above" [`crate::job`] and provides:
//!
//! - Chunked row tasks submitted to a [`TaskRunner`] (inline or on a rayon pool)
//! - Resource limits / throttling (in-flight chunks)
//! - Failure containment: component errors and panics become [`TaskFailure`]s
//! - Real-time metrics + observer hooks for monitoring
//! - Cancellation and background runs

mod observer;
mod processor;
mod result;
mod row;
mod runner;
mod semaphore;
mod source;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ComponentError, ExecutionError, TaskFailure};
use crate::job::Job;

pub use observer::{
    CompositeExecutionObserver, ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver,
    StdErrExecutionObserver, TracingExecutionObserver,
};
pub use processor::{FailurePolicy, RowProcessor, RowProcessorOptions};
pub use result::{AnalysisResult, ComponentResultEntry};
pub use row::{ComponentState, ConsumedRow, Row, SkipReason};
pub use runner::{
    CancellationToken, MultiThreadedTaskRunner, RunnerSummary, SingleThreadedTaskRunner, TaskFn, TaskHandle,
    TaskRunner, TaskStatus, ThrottleListener,
};
pub use semaphore::Semaphore;
pub use source::{DataSetSource, DeduplicatedSource, IterSource, RowSource, SourceRow};

/// Which [`TaskRunner`] the engine drives row tasks with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    /// Every task runs inline on the calling thread.
    SingleThreaded,
    /// Tasks run on the engine's worker pool.
    #[default]
    MultiThreaded,
}

/// Configuration for the [`ExecutionEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    pub runner: RunnerKind,
    /// Number of worker threads used by the engine.
    ///
    /// If `None`, uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    /// Number of rows per task.
    ///
    /// Chunking bounds scheduling overhead and working-set size.
    pub chunk_size: usize,
    /// Upper bound on chunks queued or executing at once.
    ///
    /// Reading from the source pauses while the bound is reached.
    pub max_in_flight_chunks: usize,
    pub failure_policy: FailurePolicy,
    /// Leading source rows to skip.
    pub skip_rows: u64,
    /// Maximum number of rows to process after skipping.
    pub max_rows: Option<u64>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            runner: RunnerKind::MultiThreaded,
            num_threads: Some(n),
            chunk_size: 1_024,
            max_in_flight_chunks: n.max(1),
            failure_policy: FailurePolicy::DisableComponent,
            skip_rows: 0,
            max_rows: None,
        }
    }
}

impl ExecutionOptions {
    /// Options running everything on the calling thread.
    pub fn single_threaded() -> Self {
        Self {
            runner: RunnerKind::SingleThreaded,
            num_threads: Some(1),
            max_in_flight_chunks: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.chunk_size == 0 {
            return Err(ExecutionError::InvalidOptions("chunk_size must be > 0".to_string()));
        }
        if self.max_in_flight_chunks == 0 {
            return Err(ExecutionError::InvalidOptions(
                "max_in_flight_chunks must be > 0".to_string(),
            ));
        }
        if self.num_threads == Some(0) {
            return Err(ExecutionError::InvalidOptions(
                "num_threads must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runs frozen jobs over row sources.
///
/// The engine owns its worker pool; one engine can execute many runs, one after another or
/// concurrently through [`ExecutionEngine::spawn`]. Metrics are reset at the start of every run.
#[derive(Clone)]
pub struct ExecutionEngine {
    pool: Option<Arc<ThreadPool>>,
    opts: ExecutionOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl ExecutionEngine {
    /// Create a new engine with the given options.
    pub fn new(opts: ExecutionOptions) -> Result<Self, ExecutionError> {
        opts.validate()?;
        let pool = match opts.runner {
            RunnerKind::SingleThreaded => None,
            RunnerKind::MultiThreaded => Some(Arc::new(runner::build_pool(opts.num_threads)?)),
        };
        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for execution events (metrics/logging).
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.opts
    }

    /// Run `job` over every row of `source` and collect the analyzer results.
    pub fn run(&self, job: &Job, source: &mut dyn RowSource) -> AnalysisResult {
        self.run_cancellable(job, source, &CancellationToken::new())
    }

    /// Like [`ExecutionEngine::run`], stopping early once `token` is cancelled.
    ///
    /// After cancellation no new row task starts; tasks already running finish their current row.
    /// Components are still closed and results of the rows processed so far are collected.
    pub fn run_cancellable(
        &self,
        job: &Job,
        source: &mut dyn RowSource,
        token: &CancellationToken,
    ) -> AnalysisResult {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(ExecutionEvent::RunStarted {
            components: job.component_count(),
        });

        let mut failures = Vec::new();
        if source.schema() != job.schema() {
            failures.push(TaskFailure::task(
                None,
                ComponentError::new("row source schema does not match the job schema"),
            ));
            return self.finish(job, start, failures, Vec::new(), false, 0);
        }

        let processor = Arc::new(
            RowProcessor::with_options(
                job.clone(),
                RowProcessorOptions::new().with_failure_policy(self.opts.failure_policy),
            )
            .instrumented(Arc::clone(&self.metrics), self.observer.clone()),
        );
        processor.initialize();

        let runner = match self.make_runner(token) {
            Ok(runner) => runner,
            Err(e) => {
                failures.push(TaskFailure::task(None, ComponentError::new(e.to_string())));
                processor.close();
                failures.extend(processor.take_failures());
                return self.finish(job, start, failures, Vec::new(), token.is_cancelled(), 0);
            }
        };

        let rows_read = self.feed(job, source, &processor, runner.as_ref(), token, &mut failures);
        let summary = runner.await_all();
        debug!(
            completed = summary.completed,
            discarded = summary.discarded,
            "row tasks drained"
        );

        let cancelled = token.is_cancelled();
        if cancelled {
            self.emit(ExecutionEvent::Cancelled);
        }

        let results = processor.collect_results();
        processor.close();
        failures.extend(summary.failures);
        failures.extend(processor.take_failures());

        self.finish(job, start, failures, results, cancelled, rows_read)
    }

    /// Start a run on a background thread.
    pub fn spawn(&self, job: Job, mut source: Box<dyn RowSource + Send>) -> Result<JobFuture, ExecutionError> {
        let engine = self.clone();
        let token = CancellationToken::new();
        let run_token = token.clone();
        let handle = std::thread::Builder::new()
            .name("dq-job".to_string())
            .spawn(move || engine.run_cancellable(&job, source.as_mut(), &run_token))?;
        Ok(JobFuture {
            handle: Some(handle),
            token,
        })
    }

    fn make_runner(&self, token: &CancellationToken) -> Result<Box<dyn TaskRunner>, ExecutionError> {
        match &self.pool {
            None => Ok(Box::new(SingleThreadedTaskRunner::with_token(token.clone()))),
            Some(pool) => {
                let metrics = Arc::clone(&self.metrics);
                let observer = self.observer.clone();
                let listener: ThrottleListener = Arc::new(move |waited| {
                    metrics.on_throttle_wait(waited);
                    if let Some(obs) = &observer {
                        obs.on_event(&ExecutionEvent::ThrottleWaited { duration: waited });
                    }
                });
                Ok(Box::new(
                    MultiThreadedTaskRunner::with_pool(Arc::clone(pool), self.opts.max_in_flight_chunks, token.clone())?
                        .with_throttle_listener(listener),
                ))
            }
        }
    }

    /// Read rows, assign ids, apply skip/limit and submit chunk tasks. Returns rows submitted.
    fn feed(
        &self,
        job: &Job,
        source: &mut dyn RowSource,
        processor: &Arc<RowProcessor>,
        runner: &dyn TaskRunner,
        token: &CancellationToken,
        failures: &mut Vec<TaskFailure>,
    ) -> u64 {
        let width = job.schema().len();
        let virtual_slots = job.virtual_slot_count();
        let mut row_number = 0u64;
        let mut rows_read = 0u64;
        let mut chunk: Vec<(u64, SourceRow)> = Vec::with_capacity(self.opts.chunk_size);

        loop {
            if token.is_cancelled() {
                break;
            }
            if self.opts.max_rows.is_some_and(|max| rows_read >= max) {
                break;
            }
            let next = match source.next_row() {
                None => break,
                Some(next) => next,
            };
            row_number += 1;
            let source_row = match next {
                Ok(row) => row,
                Err(e) => {
                    failures.push(TaskFailure::task(
                        Some(row_number),
                        ComponentError::new(format!("source error: {e}")),
                    ));
                    break;
                }
            };
            if row_number <= self.opts.skip_rows {
                continue;
            }
            if source_row.values.len() != width {
                failures.push(TaskFailure::task(
                    Some(row_number),
                    ComponentError::new(format!(
                        "row has {} values but the schema has {width} fields",
                        source_row.values.len()
                    )),
                ));
                continue;
            }

            rows_read += 1;
            chunk.push((row_number, source_row));
            if chunk.len() == self.opts.chunk_size {
                let full = std::mem::replace(&mut chunk, Vec::with_capacity(self.opts.chunk_size));
                self.submit_chunk(runner, processor, full, virtual_slots, token);
            }
        }
        if !chunk.is_empty() && !token.is_cancelled() {
            self.submit_chunk(runner, processor, chunk, virtual_slots, token);
        }
        rows_read
    }

    fn submit_chunk(
        &self,
        runner: &dyn TaskRunner,
        processor: &Arc<RowProcessor>,
        rows: Vec<(u64, SourceRow)>,
        virtual_slots: usize,
        token: &CancellationToken,
    ) {
        let processor = Arc::clone(processor);
        let metrics = Arc::clone(&self.metrics);
        let observer = self.observer.clone();
        let token = token.clone();
        let _ = runner.submit(Box::new(move || {
            let emit = |event: ExecutionEvent| {
                if let Some(obs) = &observer {
                    obs.on_event(&event);
                }
            };
            metrics.on_chunk_start();
            emit(ExecutionEvent::ChunkStarted {
                start_row: rows.first().map(|(id, _)| *id).unwrap_or_default(),
                row_count: rows.len(),
            });

            let mut processed = 0usize;
            for (id, source_row) in rows {
                if token.is_cancelled() {
                    break;
                }
                let mut row = Row::new(id, source_row.values, virtual_slots);
                processor.process(&mut row, source_row.distinct_count);
                metrics.on_row_processed();
                processed += 1;
            }

            emit(ExecutionEvent::ChunkFinished {
                processed_rows: processed,
            });
            metrics.on_chunk_end();
            Ok(())
        }));
    }

    fn finish(
        &self,
        job: &Job,
        start: Instant,
        failures: Vec<TaskFailure>,
        results: Vec<ComponentResultEntry>,
        cancelled: bool,
        rows_read: u64,
    ) -> AnalysisResult {
        self.metrics.end_run(start.elapsed());
        let metrics = self.metrics.snapshot();
        info!(
            components = job.component_count(),
            results = results.len(),
            failures = failures.len(),
            cancelled,
            rows_read,
            "job run finished"
        );
        self.emit(ExecutionEvent::RunFinished {
            elapsed: start.elapsed(),
            metrics: metrics.clone(),
        });
        AnalysisResult {
            results,
            failures,
            cancelled,
            rows_read,
            metrics,
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

/// Handle to a run started with [`ExecutionEngine::spawn`].
pub struct JobFuture {
    handle: Option<JoinHandle<AnalysisResult>>,
    token: CancellationToken,
}

impl JobFuture {
    /// Request cancellation. The run stops submitting rows and finishes early.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Block until the run is done and return its result.
    pub fn wait(mut self) -> AnalysisResult {
        let Some(handle) = self.handle.take() else {
            return AnalysisResult::aborted(TaskFailure::task(None, ComponentError::new("run was already awaited")));
        };
        handle.join().unwrap_or_else(|payload| {
            AnalysisResult::aborted(TaskFailure::task(
                None,
                ComponentError::Panicked(processor::panic_message(&*payload)),
            ))
        })
    }

    /// Wait at most `timeout`; returns the future back if the run is still going.
    pub fn wait_timeout(self, timeout: Duration) -> Result<AnalysisResult, JobFuture> {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return Err(self);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(self.wait())
    }
}
