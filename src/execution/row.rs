use crate::job::{ColumnId, ComponentHandle, Job, Outcome, ValueSlot};
use crate::types::Value;

/// Values of one row: the physical values it was read with and the virtual values produced so far.
///
/// A virtual slot stays `None` while its producer has not run (or was skipped or failed).
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    id: u64,
    physical: Vec<Value>,
    virtual_values: Vec<Option<Value>>,
}

impl Row {
    pub(crate) fn new(id: u64, physical: Vec<Value>, virtual_slots: usize) -> Self {
        Self {
            id,
            physical,
            virtual_values: vec![None; virtual_slots],
        }
    }

    /// 1-based position of the row in its source.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn physical(&self) -> &[Value] {
        &self.physical
    }

    pub(crate) fn get(&self, slot: ValueSlot) -> Option<&Value> {
        match slot {
            ValueSlot::Physical(i) => self.physical.get(i),
            ValueSlot::Virtual(i) => self.virtual_values.get(i).and_then(Option::as_ref),
        }
    }

    pub(crate) fn set_virtual(&mut self, slot: usize, value: Value) {
        if let Some(v) = self.virtual_values.get_mut(slot) {
            *v = Some(value);
        }
    }
}

/// Why a component did not run for a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// None of the required outcomes was produced.
    RequirementNotMet,
    /// A producer of one of the inputs did not produce values for this row.
    InputUnavailable,
    /// The component failed earlier and was disabled.
    Disabled,
    /// Analyzers were excluded from this processing.
    Excluded,
}

/// Per-row state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Pending,
    Produced,
    Skipped(SkipReason),
    Failed,
}

/// Per-row trace: what each component did and which outcomes the filters produced.
#[derive(Debug, Clone)]
pub(crate) struct RowTrace {
    pub(crate) states: Vec<ComponentState>,
    /// Category index per filter.
    pub(crate) outcomes: Vec<Option<usize>>,
}

/// A row after being run through a job with [`super::RowProcessor::consume_row`].
#[derive(Debug, Clone)]
pub struct ConsumedRow<'j> {
    job: &'j Job,
    row: Row,
    trace: RowTrace,
}

impl<'j> ConsumedRow<'j> {
    pub(crate) fn new(job: &'j Job, row: Row, trace: RowTrace) -> Self {
        Self { job, row, trace }
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    /// Value of a physical or virtual column. `None` if the producer did not run for this row.
    pub fn value(&self, column: ColumnId) -> Option<&Value> {
        self.row.get(self.job.slot_of(column)?)
    }

    /// Category produced by `filter`, if it ran.
    pub fn outcome_of(&self, filter: ComponentHandle) -> Option<&str> {
        let index = (*self.trace.outcomes.get(filter.index())?)?;
        self.job
            .component(filter)?
            .categories()
            .get(index)
            .map(String::as_str)
    }

    /// All outcomes produced for this row, in handle order.
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.job
            .components()
            .filter_map(|c| {
                self.outcome_of(c.handle())
                    .map(|category| Outcome::new(c.handle(), category))
            })
            .collect()
    }

    pub fn state(&self, handle: ComponentHandle) -> Option<ComponentState> {
        self.trace.states.get(handle.index()).copied()
    }
}
