use std::any::Any;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ComponentError, ComponentResult, SourceError, TaskFailure};
use crate::job::{ComponentHandle, ComponentKind, Concurrency, Job, JobComponent, Outcome, Role};
use crate::types::Value;

use super::observer::{ExecutionEvent, ExecutionMetrics, ExecutionObserver};
use super::result::ComponentResultEntry;
use super::row::{ComponentState, ConsumedRow, Row, RowTrace, SkipReason};

/// What happens to a component after it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the first failure and skip the component for the rest of the run.
    #[default]
    DisableComponent,
    /// Record every failure and keep invoking the component.
    Continue,
}

/// Options for single-row consumption.
#[derive(Debug, Clone)]
pub struct RowProcessorOptions {
    /// Invoke analyzers. When off, only filters and transformers run.
    pub include_analyzers: bool,
    /// Outcomes treated as satisfied regardless of what their filter produced.
    pub always_satisfied_outcomes: Vec<Outcome>,
    pub failure_policy: FailurePolicy,
}

impl Default for RowProcessorOptions {
    fn default() -> Self {
        Self {
            include_analyzers: true,
            always_satisfied_outcomes: Vec::new(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl RowProcessorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_analyzers(mut self) -> Self {
        self.include_analyzers = false;
        self
    }

    pub fn with_always_satisfied(mut self, outcome: Outcome) -> Self {
        self.always_satisfied_outcomes.push(outcome);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

struct ComponentRuntime {
    exclusive: Option<Mutex<()>>,
    disabled: AtomicBool,
}

/// Runs rows through a frozen job.
///
/// Components are visited in topological order. A component runs for a row only if its
/// requirement holds and every producer of its inputs produced values for that row. Component
/// errors and panics are contained: they are recorded as failures and the rest of the row
/// continues.
///
/// Components declaring [`Concurrency::ExclusiveAccess`] are never invoked from two threads at
/// the same time.
pub struct RowProcessor {
    job: Job,
    runtime: Vec<ComponentRuntime>,
    include_analyzers: bool,
    always_satisfied: HashSet<(ComponentHandle, usize)>,
    failure_policy: FailurePolicy,
    failures: Mutex<Vec<TaskFailure>>,
    next_row_id: AtomicU64,
    metrics: Option<Arc<ExecutionMetrics>>,
    observer: Option<Arc<dyn ExecutionObserver>>,
}

impl RowProcessor {
    /// Processor with analyzers included and the default failure policy.
    pub fn new(job: Job) -> Self {
        Self::with_options(job, RowProcessorOptions::new())
    }

    pub fn with_options(job: Job, options: RowProcessorOptions) -> Self {
        let runtime = job
            .component_slots()
            .iter()
            .map(|slot| ComponentRuntime {
                exclusive: slot
                    .as_ref()
                    .is_some_and(|c| c.concurrency() == Concurrency::ExclusiveAccess)
                    .then(|| Mutex::new(())),
                disabled: AtomicBool::new(false),
            })
            .collect();
        let always_satisfied = options
            .always_satisfied_outcomes
            .iter()
            .filter_map(|o| {
                let index = job
                    .component(o.filter)?
                    .categories()
                    .iter()
                    .position(|c| *c == o.category)?;
                Some((o.filter, index))
            })
            .collect();

        Self {
            job,
            runtime,
            include_analyzers: options.include_analyzers,
            always_satisfied,
            failure_policy: options.failure_policy,
            failures: Mutex::new(Vec::new()),
            next_row_id: AtomicU64::new(1),
            metrics: None,
            observer: None,
        }
    }

    pub(crate) fn instrumented(
        mut self,
        metrics: Arc<ExecutionMetrics>,
        observer: Option<Arc<dyn ExecutionObserver>>,
    ) -> Self {
        self.metrics = Some(metrics);
        self.observer = observer;
        self
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Initialize every participating component. A component whose initialization fails is
    /// recorded and disabled.
    pub fn initialize(&self) {
        for component in self.job.ordered_components() {
            if !self.participates(component) {
                continue;
            }
            let handle = component.handle();
            let ctx = component.context();
            match guarded(|| component.kind.initialize(&ctx)) {
                Ok(()) => self.emit(ExecutionEvent::ComponentBegin {
                    handle,
                    name: component.name().to_string(),
                }),
                Err(cause) => {
                    self.runtime[handle.index()].disabled.store(true, Ordering::SeqCst);
                    self.push_failure(TaskFailure::in_component(handle, component.name(), None, cause));
                }
            }
        }
    }

    /// Close every participating component, including disabled ones.
    pub fn close(&self) {
        for component in self.job.ordered_components().rev() {
            if !self.participates(component) {
                continue;
            }
            let ctx = component.context();
            if let Err(cause) = guarded(|| {
                component.kind.close(&ctx);
                Ok(())
            }) {
                self.push_failure(TaskFailure::in_component(component.handle(), component.name(), None, cause));
            }
        }
    }

    /// Run one row through the job and return its values and outcomes.
    ///
    /// Row ids are assigned sequentially from 1. Failures are recorded as during a full run and
    /// can be read with [`RowProcessor::take_failures`].
    pub fn consume_row(&self, values: Vec<Value>) -> Result<ConsumedRow<'_>, SourceError> {
        let id = self.next_row_id.fetch_add(1, Ordering::Relaxed);
        let expected = self.job.schema().len();
        if values.len() != expected {
            return Err(SourceError::RowArity {
                row: id,
                expected,
                actual: values.len(),
            });
        }
        let mut row = Row::new(id, values, self.job.virtual_slot_count());
        let trace = self.process(&mut row, 1);
        Ok(ConsumedRow::new(&self.job, row, trace))
    }

    /// Failures recorded so far, draining the internal list.
    pub fn take_failures(&self) -> Vec<TaskFailure> {
        std::mem::take(&mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn process(&self, row: &mut Row, distinct_count: u64) -> RowTrace {
        let n = self.job.component_slots().len();
        let mut trace = RowTrace {
            states: vec![ComponentState::Pending; n],
            outcomes: vec![None; n],
        };

        for component in self.job.ordered_components() {
            let idx = component.handle().index();
            let state = self.visit(component, row, distinct_count, &mut trace);
            if matches!(state, ComponentState::Skipped(_)) {
                if let Some(metrics) = &self.metrics {
                    metrics.on_component_skipped();
                }
            }
            trace.states[idx] = state;
        }
        trace
    }

    fn visit(
        &self,
        component: &JobComponent,
        row: &mut Row,
        distinct_count: u64,
        trace: &mut RowTrace,
    ) -> ComponentState {
        let handle = component.handle();
        if !self.participates(component) {
            return ComponentState::Skipped(SkipReason::Excluded);
        }
        let runtime = &self.runtime[handle.index()];
        if runtime.disabled.load(Ordering::SeqCst) {
            return ComponentState::Skipped(SkipReason::Disabled);
        }
        if !component.required_outcomes.is_empty() {
            let satisfied = component.required_outcomes.iter().any(|(filter, category)| {
                trace.outcomes[filter.index()] == Some(*category)
                    || self.always_satisfied.contains(&(*filter, *category))
            });
            if !satisfied {
                return ComponentState::Skipped(SkipReason::RequirementNotMet);
            }
        }
        if component
            .input_producers
            .iter()
            .any(|p| trace.states[p.index()] != ComponentState::Produced)
        {
            return ComponentState::Skipped(SkipReason::InputUnavailable);
        }

        let values: Option<Vec<Value>> = component
            .input_slots
            .iter()
            .map(|slot| row.get(*slot).cloned())
            .collect();
        let Some(values) = values else {
            return ComponentState::Skipped(SkipReason::InputUnavailable);
        };

        if let Some(metrics) = &self.metrics {
            metrics.on_component_invoked();
        }
        let ctx = component.context();
        let _exclusive = runtime
            .exclusive
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner));

        let outcome = match &component.kind {
            ComponentKind::Filter(filter) => guarded(|| {
                let category = filter.categorize(&ctx, &values)?;
                component
                    .categories()
                    .iter()
                    .position(|c| c == category)
                    .ok_or_else(|| ComponentError::UnknownCategory(category.to_string()))
            })
            .map(|index| trace.outcomes[handle.index()] = Some(index)),
            ComponentKind::Transformer(transformer) => guarded(|| {
                let produced = transformer.transform(&ctx, &values)?;
                if produced.len() != component.output_slots.len() {
                    return Err(ComponentError::ArityMismatch {
                        expected: component.output_slots.len(),
                        actual: produced.len(),
                    });
                }
                Ok(produced)
            })
            .map(|produced| {
                for (slot, value) in component.output_slots.iter().zip(produced) {
                    row.set_virtual(*slot, value);
                }
            }),
            ComponentKind::Analyzer(analyzer) => guarded(|| analyzer.run(&ctx, &values, distinct_count)),
        };

        match outcome {
            Ok(()) => ComponentState::Produced,
            Err(cause) => {
                self.record_failure(component, Some(row.id()), cause);
                ComponentState::Failed
            }
        }
    }

    /// Collect results of every participating, non-disabled analyzer in dependency order.
    pub(crate) fn collect_results(&self) -> Vec<ComponentResultEntry> {
        let mut results = Vec::new();
        for component in self.job.analyzers() {
            let handle = component.handle();
            if !self.participates(component) || self.runtime[handle.index()].disabled.load(Ordering::SeqCst) {
                continue;
            }
            let ComponentKind::Analyzer(analyzer) = &component.kind else {
                continue;
            };
            let ctx = component.context();
            match guarded(|| analyzer.result(&ctx)) {
                Ok(result) => {
                    self.emit(ExecutionEvent::ResultCollected {
                        handle,
                        name: component.name().to_string(),
                    });
                    results.push(ComponentResultEntry {
                        handle,
                        name: component.name().to_string(),
                        result,
                    });
                }
                Err(cause) => self.record_failure(component, None, cause),
            }
        }
        results
    }

    fn participates(&self, component: &JobComponent) -> bool {
        self.include_analyzers || component.role() != Role::Analyzer
    }

    fn record_failure(&self, component: &JobComponent, row: Option<u64>, cause: ComponentError) {
        let runtime = &self.runtime[component.handle().index()];
        if self.failure_policy == FailurePolicy::DisableComponent
            && runtime.disabled.swap(true, Ordering::SeqCst)
        {
            return;
        }
        self.push_failure(TaskFailure::in_component(component.handle(), component.name(), row, cause));
    }

    fn push_failure(&self, failure: TaskFailure) {
        warn!(%failure, "component failed");
        if let Some(metrics) = &self.metrics {
            metrics.on_component_failure();
        }
        self.emit(ExecutionEvent::ComponentFailed {
            failure: failure.clone(),
        });
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

/// Run component code, turning a panic into [`ComponentError::Panicked`].
pub(crate) fn guarded<T>(f: impl FnOnce() -> ComponentResult<T>) -> ComponentResult<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(ComponentError::Panicked(panic_message(&*payload))))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
