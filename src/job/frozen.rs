use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::types::Schema;

use super::builder::ComponentSlot;
use super::column::{Column, ColumnId};
use super::component::{ComponentConfig, ComponentContext, ComponentHandle, ComponentKind, Concurrency, Role};
use super::finder::SourceColumnFinder;
use super::outcome::Requirement;

/// Where a column's value lives in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueSlot {
    Physical(usize),
    Virtual(usize),
}

/// One component of a frozen job, with everything resolved that row processing needs.
#[derive(Debug)]
pub struct JobComponent {
    pub(crate) handle: ComponentHandle,
    pub(crate) name: String,
    pub(crate) kind: ComponentKind,
    pub(crate) concurrency: Concurrency,
    pub(crate) config: ComponentConfig,
    pub(crate) inputs: Vec<Column>,
    pub(crate) input_slots: Vec<ValueSlot>,
    pub(crate) outputs: Vec<Column>,
    pub(crate) output_slots: Vec<usize>,
    pub(crate) categories: Vec<String>,
    pub(crate) requirement: Option<Requirement>,
    /// Any-of list of `(filter, category index)`.
    pub(crate) required_outcomes: Vec<(ComponentHandle, usize)>,
    /// Producers of the input columns; all must have produced for the component to run.
    pub(crate) input_producers: Vec<ComponentHandle>,
    pub(crate) dependencies: Vec<ComponentHandle>,
}

impl JobComponent {
    pub fn handle(&self) -> ComponentHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.kind.role()
    }

    /// Effective concurrency capability.
    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    pub fn config(&self) -> &ComponentConfig {
        &self.config
    }

    pub fn inputs(&self) -> &[Column] {
        &self.inputs
    }

    /// Output columns, from the signature cached at freeze time.
    pub fn outputs(&self) -> &[Column] {
        &self.outputs
    }

    /// Declared categories, for filters.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn requirement(&self) -> Option<&Requirement> {
        self.requirement.as_ref()
    }

    /// Direct upstream components.
    pub fn dependencies(&self) -> &[ComponentHandle] {
        &self.dependencies
    }

    pub(crate) fn context(&self) -> ComponentContext<'_> {
        ComponentContext {
            name: &self.name,
            config: &self.config,
            inputs: &self.inputs,
        }
    }
}

struct JobInner {
    schema: Schema,
    physical_columns: Vec<Column>,
    /// Indexed by handle; `None` for components removed before freezing.
    components: Vec<Option<JobComponent>>,
    order: Vec<ComponentHandle>,
    virtual_columns: Vec<Column>,
    virtual_slots: HashMap<ColumnId, usize>,
}

/// An immutable, validated job.
///
/// Cloning is cheap; clones share the same components, so a job can be handed to worker threads
/// and background runs.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    pub(crate) fn assemble(
        schema: Schema,
        slots: &[Option<ComponentSlot>],
        finder: &SourceColumnFinder,
        order: Vec<ComponentHandle>,
    ) -> Self {
        let mut virtual_columns = Vec::new();
        let mut virtual_slots = HashMap::new();
        for handle in &order {
            for column in finder.output_columns(*handle) {
                virtual_slots.insert(column.id, virtual_columns.len());
                virtual_columns.push(column.clone());
            }
        }

        let components = slots
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                let slot = slot.as_ref()?;
                let handle = ComponentHandle::from_index(index);
                let inputs: Vec<Column> = slot
                    .inputs
                    .iter()
                    .filter_map(|id| finder.column(*id).cloned())
                    .collect();
                let input_slots = slot
                    .inputs
                    .iter()
                    .filter_map(|id| match id {
                        ColumnId::Physical(i) => Some(ValueSlot::Physical(*i as usize)),
                        ColumnId::Virtual { .. } => virtual_slots.get(id).map(|s| ValueSlot::Virtual(*s)),
                    })
                    .collect();
                let outputs = finder.output_columns(handle).to_vec();
                let output_slots = outputs
                    .iter()
                    .filter_map(|c| virtual_slots.get(&c.id).copied())
                    .collect();
                let input_producers: BTreeSet<ComponentHandle> = slot
                    .inputs
                    .iter()
                    .filter_map(|id| finder.resolve_producer(*id))
                    .collect();
                let required_outcomes = slot
                    .requirement
                    .iter()
                    .flat_map(|r| r.outcomes())
                    .filter_map(|o| {
                        finder
                            .categories(o.filter)
                            .iter()
                            .position(|c| *c == o.category)
                            .map(|idx| (o.filter, idx))
                    })
                    .collect();

                Some(JobComponent {
                    handle,
                    name: slot.name.clone(),
                    kind: slot.kind.clone(),
                    concurrency: slot.concurrency,
                    config: slot.config.clone(),
                    inputs,
                    input_slots,
                    outputs,
                    output_slots,
                    categories: finder.categories(handle).to_vec(),
                    requirement: slot.requirement.clone(),
                    required_outcomes,
                    input_producers: input_producers.into_iter().collect(),
                    dependencies: finder.dependencies(handle),
                })
            })
            .collect();

        Self {
            inner: Arc::new(JobInner {
                physical_columns: finder.physical_columns().to_vec(),
                schema,
                components,
                order,
                virtual_columns,
                virtual_slots,
            }),
        }
    }

    /// Schema of the rows this job consumes.
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Components in dependency order. Ties are broken by handle.
    pub fn topological_order(&self) -> &[ComponentHandle] {
        &self.inner.order
    }

    /// Number of components, not counting removed ones.
    pub fn component_count(&self) -> usize {
        self.components().count()
    }

    pub fn component(&self, handle: ComponentHandle) -> Option<&JobComponent> {
        self.inner.components.get(handle.index()).and_then(Option::as_ref)
    }

    /// Components in handle order.
    pub fn components(&self) -> impl Iterator<Item = &JobComponent> {
        self.inner.components.iter().flatten()
    }

    /// Analyzers in dependency order.
    pub fn analyzers(&self) -> impl Iterator<Item = &JobComponent> {
        self.ordered_components().filter(|c| c.role() == Role::Analyzer)
    }

    /// Handle of a component by name. Names are not required to be unique; the first match wins.
    pub fn find_component(&self, name: &str) -> Option<ComponentHandle> {
        self.components().find(|c| c.name == name).map(|c| c.handle)
    }

    /// Metadata of a physical or virtual column of this job.
    pub fn column(&self, id: ColumnId) -> Option<&Column> {
        match self.slot_of(id)? {
            ValueSlot::Physical(i) => self.inner.physical_columns.get(i),
            ValueSlot::Virtual(slot) => self.inner.virtual_columns.get(slot),
        }
    }

    /// All virtual columns, in the order their producers run.
    pub fn virtual_columns(&self) -> &[Column] {
        &self.inner.virtual_columns
    }

    pub(crate) fn virtual_slot_count(&self) -> usize {
        self.inner.virtual_columns.len()
    }

    pub(crate) fn slot_of(&self, id: ColumnId) -> Option<ValueSlot> {
        match id {
            ColumnId::Physical(i) => ((i as usize) < self.inner.schema.len()).then_some(ValueSlot::Physical(i as usize)),
            ColumnId::Virtual { .. } => self.inner.virtual_slots.get(&id).map(|s| ValueSlot::Virtual(*s)),
        }
    }

    /// Components in dependency order.
    pub(crate) fn ordered_components(&self) -> impl DoubleEndedIterator<Item = &JobComponent> {
        self.inner.order.iter().filter_map(|h| self.component(*h))
    }

    /// Per-handle component slots, including the gaps left by removed components.
    pub(crate) fn component_slots(&self) -> &[Option<JobComponent>] {
        &self.inner.components
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("schema", &self.inner.schema)
            .field("components", &self.inner.components)
            .field("order", &self.inner.order)
            .finish()
    }
}
