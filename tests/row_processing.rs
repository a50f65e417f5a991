use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_data_quality::error::{ComponentError, ComponentResult, SourceError};
use rust_data_quality::execution::{
    ComponentState, DataSetSource, DeduplicatedSource, ExecutionEngine, ExecutionEvent, ExecutionObserver,
    ExecutionOptions, FailurePolicy, IterSource, RowProcessor, RowProcessorOptions, SkipReason,
};
use rust_data_quality::job::{
    Analyzer, AnalyzerResult, ColumnId, Component, ComponentContext, ComponentDescriptor, ComponentHandle,
    ComponentKind, Concurrency, DistributionEntry, Job, JobBuilder, Outcome,
};
use rust_data_quality::processing::{
    NullCheckFilter, RangeFilter, ReduceAnalyzer, ReduceOp, RowCountAnalyzer, TokenizerTransformer,
    ValueDistributionAnalyzer,
};
use rust_data_quality::types::{DataSet, DataType, Field, Schema, Value};

fn age_schema() -> Schema {
    Schema::new(vec![Field::new("age", DataType::Int64)])
}

fn ages(values: &[i64]) -> DataSet {
    DataSet::new(
        age_schema(),
        values.iter().map(|a| vec![Value::Int64(*a)]).collect(),
    )
}

fn multi_threaded(chunk_size: usize) -> ExecutionEngine {
    ExecutionEngine::new(ExecutionOptions {
        num_threads: Some(4),
        chunk_size,
        max_in_flight_chunks: 4,
        ..ExecutionOptions::default()
    })
    .unwrap()
}

/// Analyzer that fails on every row.
struct AlwaysFails;

impl Component for AlwaysFails {
    fn concurrency(&self) -> Concurrency {
        Concurrency::ConcurrencySafe
    }
}

impl Analyzer for AlwaysFails {
    fn run(&self, _ctx: &ComponentContext<'_>, _values: &[Value], _distinct_count: u64) -> ComponentResult<()> {
        Err(ComponentError::new("boom"))
    }

    fn result(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<AnalyzerResult> {
        Ok(AnalyzerResult::Count(0))
    }
}

/// Analyzer that panics on every row.
struct Panics;

impl Component for Panics {}

impl Analyzer for Panics {
    fn run(&self, _ctx: &ComponentContext<'_>, _values: &[Value], _distinct_count: u64) -> ComponentResult<()> {
        panic!("analyzer blew up");
    }

    fn result(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<AnalyzerResult> {
        Ok(AnalyzerResult::Count(0))
    }
}

/// Analyzer that cannot start.
struct BrokenSetup;

impl Component for BrokenSetup {
    fn initialize(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<()> {
        Err(ComponentError::invalid_configuration("missing dictionary"))
    }
}

impl Analyzer for BrokenSetup {
    fn run(&self, _ctx: &ComponentContext<'_>, _values: &[Value], _distinct_count: u64) -> ComponentResult<()> {
        Ok(())
    }

    fn result(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<AnalyzerResult> {
        Ok(AnalyzerResult::Count(0))
    }
}

/// Exclusive analyzer recording the highest number of concurrent `run` calls it has seen.
#[derive(Default)]
struct OverlapTracker {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Component for OverlapTracker {}

impl Analyzer for OverlapTracker {
    fn run(&self, _ctx: &ComponentContext<'_>, _values: &[Value], _distinct_count: u64) -> ComponentResult<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(1));
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn result(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<AnalyzerResult> {
        Ok(AnalyzerResult::Count(self.peak.load(Ordering::SeqCst) as u64))
    }
}

/// Analyzer keeping every age it is invoked with.
struct RecordsAges(Arc<Mutex<Vec<i64>>>);

impl Component for RecordsAges {}

impl Analyzer for RecordsAges {
    fn run(&self, _ctx: &ComponentContext<'_>, values: &[Value], _distinct_count: u64) -> ComponentResult<()> {
        if let Some(Value::Int64(age)) = values.first() {
            self.0.lock().unwrap().push(*age);
        }
        Ok(())
    }

    fn result(&self, _ctx: &ComponentContext<'_>) -> ComponentResult<AnalyzerResult> {
        Ok(AnalyzerResult::Count(self.0.lock().unwrap().len() as u64))
    }
}

fn adult_count_job() -> (Job, ComponentHandle, ComponentHandle) {
    let mut b = JobBuilder::new(age_schema());
    let age = b.source_column("age").unwrap();
    let adult = b.add_filter("adult", RangeFilter::at_least(18.0)).unwrap();
    b.set_input(adult, [age]).unwrap();
    let adults = b.add_analyzer("adults", RowCountAnalyzer::new()).unwrap();
    b.set_input(adults, [age]).unwrap();
    b.set_requirement(adults, adult, RangeFilter::VALID).unwrap();
    (b.freeze().unwrap(), adult, adults)
}

#[test]
fn filter_gates_analyzer_on_both_runners() {
    for engine in [
        ExecutionEngine::new(ExecutionOptions::single_threaded()).unwrap(),
        multi_threaded(1),
    ] {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut b = JobBuilder::new(age_schema());
        let age = b.source_column("age").unwrap();
        let adult = b.add_filter("adult", RangeFilter::at_least(18.0)).unwrap();
        b.set_input(adult, [age]).unwrap();
        let recorder = b.add_analyzer("recorder", RecordsAges(Arc::clone(&seen))).unwrap();
        b.set_input(recorder, [age]).unwrap();
        b.set_requirement(recorder, adult, RangeFilter::VALID).unwrap();
        let adults = b.add_analyzer("adults", RowCountAnalyzer::new()).unwrap();
        b.set_input(adults, [age]).unwrap();
        b.set_requirement(adults, adult, RangeFilter::VALID).unwrap();
        let job = b.freeze().unwrap();

        let result = engine.run(&job, &mut DataSetSource::new(ages(&[15, 20, 17, 30])));
        assert!(result.is_successful(), "{:?}", result.failures());

        let mut observed = seen.lock().unwrap().clone();
        observed.sort_unstable();
        assert_eq!(observed, vec![20, 30]);
        assert_eq!(result.result_by_name("recorder"), Some(&AnalyzerResult::Count(2)));
        assert_eq!(result.result(adults), Some(&AnalyzerResult::Count(2)));
        assert_eq!(result.rows_read(), 4);
    }
}

#[test]
fn every_branch_of_a_filter_runs_on_its_own_rows() {
    let mut b = JobBuilder::new(age_schema());
    let age = b.source_column("age").unwrap();
    let known = b.add_filter("known", NullCheckFilter).unwrap();
    b.set_input(known, [age]).unwrap();
    let adult = b.add_filter("adult", RangeFilter::at_least(18.0)).unwrap();
    b.set_input(adult, [age]).unwrap();
    b.set_requirement(adult, known, NullCheckFilter::NOT_NULL).unwrap();

    let mut branch = |name: &str, filter, category: &str| {
        let h = b.add_analyzer(name, RowCountAnalyzer::new()).unwrap();
        b.set_input(h, [age]).unwrap();
        b.set_requirement(h, filter, category).unwrap();
        h
    };
    let missing = branch("missing", known, NullCheckFilter::NULL);
    let adults = branch("adults", adult, RangeFilter::VALID);
    let minors = branch("minors", adult, RangeFilter::INVALID);
    let job = b.freeze().unwrap();

    let ds = DataSet::new(
        age_schema(),
        vec![
            vec![Value::Int64(40)],
            vec![Value::Null],
            vec![Value::Int64(12)],
            vec![Value::Int64(18)],
            vec![Value::Null],
        ],
    );
    let result = multi_threaded(2).run(&job, &mut DataSetSource::new(ds));
    assert!(result.is_successful());
    assert_eq!(result.result(missing), Some(&AnalyzerResult::Count(2)));
    assert_eq!(result.result(adults), Some(&AnalyzerResult::Count(2)));
    assert_eq!(result.result(minors), Some(&AnalyzerResult::Count(1)));
}

#[test]
fn failing_analyzer_is_disabled_after_one_failure() {
    let mut b = JobBuilder::new(age_schema());
    let age = b.source_column("age").unwrap();
    let broken = b.add_analyzer("broken", AlwaysFails).unwrap();
    b.set_input(broken, [age]).unwrap();
    let count = b.add_analyzer("count", RowCountAnalyzer::new()).unwrap();
    b.set_input(count, [age]).unwrap();
    let job = b.freeze().unwrap();

    let result = multi_threaded(1).run(&job, &mut DataSetSource::new(ages(&[1, 2, 3, 4, 5, 6, 7, 8])));
    assert!(!result.is_successful());
    assert_eq!(result.failures().len(), 1);
    assert!(result.failures()[0].involves(broken));
    assert_eq!(result.failures()[0].cause, ComponentError::new("boom"));
    assert_eq!(result.result(broken), None);
    assert_eq!(result.result(count), Some(&AnalyzerResult::Count(8)));
}

#[test]
fn continue_policy_records_every_failure() {
    let mut b = JobBuilder::new(age_schema());
    let age = b.source_column("age").unwrap();
    let broken = b.add_analyzer("broken", AlwaysFails).unwrap();
    b.set_input(broken, [age]).unwrap();
    let job = b.freeze().unwrap();

    let engine = ExecutionEngine::new(ExecutionOptions {
        failure_policy: FailurePolicy::Continue,
        ..ExecutionOptions::single_threaded()
    })
    .unwrap();
    let result = engine.run(&job, &mut DataSetSource::new(ages(&[1, 2, 3])));
    assert_eq!(result.failures().len(), 3);
    assert_eq!(
        result.failures().iter().map(|f| f.row).collect::<Vec<_>>(),
        vec![Some(1), Some(2), Some(3)]
    );
    assert_eq!(result.result(broken), Some(&AnalyzerResult::Count(0)));
}

#[test]
fn initialization_failure_disables_the_component() {
    let mut b = JobBuilder::new(age_schema());
    let age = b.source_column("age").unwrap();
    let broken = b.add_analyzer("broken", BrokenSetup).unwrap();
    b.set_input(broken, [age]).unwrap();
    let count = b.add_analyzer("count", RowCountAnalyzer::new()).unwrap();
    b.set_input(count, [age]).unwrap();
    let job = b.freeze().unwrap();

    let result = multi_threaded(2).run(&job, &mut DataSetSource::new(ages(&[1, 2, 3])));
    assert_eq!(result.failures().len(), 1);
    assert!(result.failures()[0].involves(broken));
    assert_eq!(result.failures()[0].row, None);
    assert_eq!(result.result(broken), None);
    assert_eq!(result.result(count), Some(&AnalyzerResult::Count(3)));
    assert_eq!(result.metrics().component_invocations, 3);
}

#[test]
fn panicking_component_becomes_a_failure() {
    let mut b = JobBuilder::new(age_schema());
    let age = b.source_column("age").unwrap();
    let panics = b.add_analyzer("panics", Panics).unwrap();
    b.set_input(panics, [age]).unwrap();
    let count = b.add_analyzer("count", RowCountAnalyzer::new()).unwrap();
    b.set_input(count, [age]).unwrap();
    let job = b.freeze().unwrap();

    let result = multi_threaded(2).run(&job, &mut DataSetSource::new(ages(&[1, 2, 3, 4])));
    assert_eq!(result.failures().len(), 1);
    assert_eq!(
        result.failures()[0].cause,
        ComponentError::Panicked("analyzer blew up".into())
    );
    assert_eq!(result.result(count), Some(&AnalyzerResult::Count(4)));
}

#[test]
fn exclusive_component_is_never_invoked_concurrently() {
    let tracker = Arc::new(OverlapTracker::default());
    let mut b = JobBuilder::new(age_schema());
    let age = b.source_column("age").unwrap();
    let h = b
        .add_component(ComponentDescriptor::new(
            "overlap",
            ComponentKind::Analyzer(tracker.clone()),
        ))
        .unwrap();
    b.set_input(h, [age]).unwrap();
    let job = b.freeze().unwrap();

    let values: Vec<i64> = (0..64).collect();
    let result = multi_threaded(1).run(&job, &mut DataSetSource::new(ages(&values)));
    assert!(result.is_successful());
    assert_eq!(tracker.calls.load(Ordering::SeqCst), 64);
    assert_eq!(result.result(h), Some(&AnalyzerResult::Count(1)));
}

#[test]
fn tokenized_columns_feed_a_distribution() {
    let schema = Schema::new(vec![Field::new("name", DataType::Utf8)]);
    let ds = DataSet::new(
        schema.clone(),
        ["Ada Lovelace", "Alan Turing", "Ada Byron", "Grace"]
            .into_iter()
            .map(|s| vec![Value::Utf8(s.into())])
            .collect(),
    );

    let mut b = JobBuilder::new(schema);
    let name = b.source_column("name").unwrap();
    let tokens = b.add_transformer("tokens", TokenizerTransformer).unwrap();
    b.set_input(tokens, [name]).unwrap();
    b.set_property(tokens, TokenizerTransformer::NUM_TOKENS, 2).unwrap();
    let first = b.add_analyzer("first names", ValueDistributionAnalyzer::new()).unwrap();
    b.set_input(first, [ColumnId::output(tokens, 0)]).unwrap();
    let last = b.add_analyzer("last names", ValueDistributionAnalyzer::new()).unwrap();
    b.set_input(last, [ColumnId::output(tokens, 1)]).unwrap();
    let job = b.freeze().unwrap();

    let result = multi_threaded(1).run(&job, &mut DataSetSource::new(ds));
    assert!(result.is_successful(), "{:?}", result.failures());
    assert_eq!(
        result.result(first),
        Some(&AnalyzerResult::Distribution(vec![
            DistributionEntry { value: Some("Ada".into()), count: 2 },
            DistributionEntry { value: Some("Alan".into()), count: 1 },
            DistributionEntry { value: Some("Grace".into()), count: 1 },
        ]))
    );
    assert_eq!(
        result.result(last),
        Some(&AnalyzerResult::Distribution(vec![
            DistributionEntry { value: Some("Byron".into()), count: 1 },
            DistributionEntry { value: Some("Lovelace".into()), count: 1 },
            DistributionEntry { value: Some("Turing".into()), count: 1 },
            DistributionEntry { value: None, count: 1 },
        ]))
    );
}

#[test]
fn deduplicated_source_weights_rows_by_multiplicity() {
    let schema = Schema::new(vec![Field::new("city", DataType::Utf8)]);
    let cities = ["Oslo", "Lima", "Oslo", "Oslo", "Lima", "Kyiv"];
    let ds = DataSet::new(
        schema.clone(),
        cities.iter().map(|c| vec![Value::Utf8((*c).into())]).collect(),
    );
    let mut dedup = DeduplicatedSource::from_source(&mut DataSetSource::new(ds)).unwrap();
    assert_eq!(dedup.spill_count(), 0);
    assert_eq!(dedup.rows_in_memory(), 3);

    let mut b = JobBuilder::new(schema);
    let city = b.source_column("city").unwrap();
    let rows = b.add_analyzer("rows", RowCountAnalyzer::new()).unwrap();
    b.set_input(rows, [city]).unwrap();
    let dist = b.add_analyzer("dist", ValueDistributionAnalyzer::new()).unwrap();
    b.set_input(dist, [city]).unwrap();
    let job = b.freeze().unwrap();

    let result = ExecutionEngine::new(ExecutionOptions::single_threaded())
        .unwrap()
        .run(&job, &mut dedup);
    assert_eq!(result.rows_read(), 3);
    assert_eq!(result.result(rows), Some(&AnalyzerResult::Count(6)));
    assert_eq!(
        result.result(dist),
        Some(&AnalyzerResult::Distribution(vec![
            DistributionEntry { value: Some("Kyiv".into()), count: 1 },
            DistributionEntry { value: Some("Lima".into()), count: 2 },
            DistributionEntry { value: Some("Oslo".into()), count: 3 },
        ]))
    );
}

#[test]
fn reduce_analyzers_over_a_run() {
    let (job, sum, max) = {
        let mut b = JobBuilder::new(age_schema());
        let age = b.source_column("age").unwrap();
        let sum = b.add_analyzer("sum", ReduceAnalyzer::new(ReduceOp::Sum)).unwrap();
        b.set_input(sum, [age]).unwrap();
        let max = b.add_analyzer("max", ReduceAnalyzer::new(ReduceOp::Max)).unwrap();
        b.set_input(max, [age]).unwrap();
        (b.freeze().unwrap(), sum, max)
    };
    let result = multi_threaded(3).run(&job, &mut DataSetSource::new(ages(&[4, 8, 15, 16, 23, 42])));
    assert_eq!(result.result(sum), Some(&AnalyzerResult::Value(Value::Int64(108))));
    assert_eq!(result.result(max), Some(&AnalyzerResult::Value(Value::Int64(42))));

    let json = result.results_json();
    assert_eq!(json["sum"]["kind"], "value");
}

#[test]
fn source_errors_stop_reading_and_are_reported() {
    let (job, _, adults) = adult_count_job();
    let rows: Vec<Result<Vec<Value>, SourceError>> = vec![
        Ok(vec![Value::Int64(30)]),
        Err(SourceError::Message("disk on fire".into())),
        Ok(vec![Value::Int64(40)]),
    ];
    let mut source = IterSource::new(age_schema(), rows.into_iter());

    let result = ExecutionEngine::new(ExecutionOptions::single_threaded())
        .unwrap()
        .run(&job, &mut source);
    assert!(!result.is_successful());
    assert_eq!(result.rows_read(), 1);
    assert_eq!(result.failures().len(), 1);
    assert_eq!(result.failures()[0].row, Some(2));
    assert!(result.failures()[0].component.is_none());
    assert_eq!(result.result(adults), Some(&AnalyzerResult::Count(1)));
}

#[test]
fn rows_with_the_wrong_width_are_skipped() {
    let (job, _, adults) = adult_count_job();
    let rows: Vec<Result<Vec<Value>, SourceError>> = vec![
        Ok(vec![Value::Int64(30)]),
        Ok(vec![Value::Int64(40), Value::Int64(1)]),
        Ok(vec![Value::Int64(50)]),
    ];
    let result = ExecutionEngine::new(ExecutionOptions::single_threaded())
        .unwrap()
        .run(&job, &mut IterSource::new(age_schema(), rows.into_iter()));
    assert_eq!(result.failures().len(), 1);
    assert_eq!(result.failures()[0].row, Some(2));
    assert_eq!(result.result(adults), Some(&AnalyzerResult::Count(2)));
}

#[test]
fn mismatched_source_schema_is_a_failure() {
    let (job, _, _) = adult_count_job();
    let other = DataSet::new(
        Schema::new(vec![Field::new("height", DataType::Float64)]),
        vec![vec![Value::Float64(1.8)]],
    );
    let result = multi_threaded(1).run(&job, &mut DataSetSource::new(other));
    assert!(!result.is_successful());
    assert!(result.results().is_empty());
    assert_eq!(result.rows_read(), 0);
}

#[test]
fn spawned_run_can_be_cancelled() {
    let (job, _, adults) = adult_count_job();
    let endless = (0i64..).map(|i| {
        std::thread::sleep(Duration::from_micros(200));
        Ok::<_, SourceError>(vec![Value::Int64(i % 50)])
    });
    let source = IterSource::new(age_schema(), endless);

    let future = multi_threaded(8).spawn(job, Box::new(source)).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(!future.is_finished());
    future.cancel();

    let result = match future.wait_timeout(Duration::from_secs(30)) {
        Ok(result) => result,
        Err(_) => panic!("cancelled run did not finish"),
    };
    assert!(result.was_cancelled());
    assert!(!result.is_successful());
    assert!(result.rows_read() > 0);
    assert!(matches!(result.result(adults), Some(AnalyzerResult::Count(_))));
}

#[test]
fn observer_sees_run_lifecycle() {
    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ExecutionObserver for Recorder {
        fn on_event(&self, event: &ExecutionEvent) {
            let label = match event {
                ExecutionEvent::RunStarted { .. } => "start",
                ExecutionEvent::ComponentFailed { .. } => "failed",
                ExecutionEvent::ResultCollected { .. } => "result",
                ExecutionEvent::RunFinished { .. } => "finish",
                _ => return,
            };
            self.0.lock().unwrap().push(label.to_string());
        }
    }

    let (job, _, _) = adult_count_job();
    let recorder = Arc::new(Recorder::default());
    let engine = ExecutionEngine::new(ExecutionOptions::single_threaded())
        .unwrap()
        .with_observer(recorder.clone());
    let result = engine.run(&job, &mut DataSetSource::new(ages(&[10, 20])));
    assert!(result.is_successful());
    assert_eq!(*recorder.0.lock().unwrap(), vec!["start", "result", "finish"]);
    assert_eq!(result.metrics().rows_processed, 2);
}

#[test]
fn row_processor_exposes_outcomes_and_states() {
    let mut b = JobBuilder::new(age_schema());
    let age = b.source_column("age").unwrap();
    let adult = b.add_filter("adult", RangeFilter::at_least(18.0)).unwrap();
    b.set_input(adult, [age]).unwrap();
    let tokens = b.add_transformer("tokens", TokenizerTransformer).unwrap();
    b.set_input(tokens, [age]).unwrap();
    b.set_property(tokens, TokenizerTransformer::NUM_TOKENS, 1).unwrap();
    b.set_requirement(tokens, adult, RangeFilter::VALID).unwrap();
    let count = b.add_analyzer("count", RowCountAnalyzer::new()).unwrap();
    b.set_input(count, [ColumnId::output(tokens, 0)]).unwrap();
    let job = b.freeze().unwrap();

    let processor = RowProcessor::with_options(job.clone(), RowProcessorOptions::new().without_analyzers());
    processor.initialize();

    let row = processor.consume_row(vec![Value::Int64(42)]).unwrap();
    assert_eq!(row.row().id(), 1);
    assert_eq!(row.outcome_of(adult), Some("VALID"));
    assert_eq!(row.outcomes(), vec![Outcome::new(adult, RangeFilter::VALID)]);
    assert_eq!(row.value(ColumnId::output(tokens, 0)), Some(&Value::Utf8("42".into())));
    assert_eq!(row.state(tokens), Some(ComponentState::Produced));
    assert_eq!(row.state(count), Some(ComponentState::Skipped(SkipReason::Excluded)));

    let row = processor.consume_row(vec![Value::Int64(3)]).unwrap();
    assert_eq!(row.row().id(), 2);
    assert_eq!(row.outcome_of(adult), Some("INVALID"));
    assert_eq!(row.value(ColumnId::output(tokens, 0)), None);
    assert_eq!(
        row.state(tokens),
        Some(ComponentState::Skipped(SkipReason::RequirementNotMet))
    );

    assert!(matches!(
        processor.consume_row(vec![]),
        Err(SourceError::RowArity { row: 3, expected: 1, actual: 0 })
    ));

    // Forcing the outcome lets the transformer run regardless of the filter.
    let forced = RowProcessor::with_options(
        job,
        RowProcessorOptions::new().with_always_satisfied(Outcome::new(adult, RangeFilter::VALID)),
    );
    forced.initialize();
    let row = forced.consume_row(vec![Value::Int64(3)]).unwrap();
    assert_eq!(row.value(ColumnId::output(tokens, 0)), Some(&Value::Utf8("3".into())));
    assert_eq!(row.state(count), Some(ComponentState::Produced));
    forced.close();
    processor.close();
    assert!(processor.take_failures().is_empty());
}
