//! Mutable job assembly and the validation performed when a job is frozen.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{JobBuildError, ValidationError};
use crate::types::Schema;

use super::column::{Column, ColumnId};
use super::component::{
    Analyzer, ComponentConfig, ComponentDescriptor, ComponentHandle, ComponentKind, Concurrency,
    Filter, Role, Transformer,
};
use super::finder::SourceColumnFinder;
use super::frozen::Job;
use super::outcome::{Outcome, Requirement};

#[derive(Debug, Clone)]
pub(crate) struct ComponentSlot {
    pub(crate) name: String,
    pub(crate) kind: ComponentKind,
    pub(crate) concurrency: Concurrency,
    pub(crate) config: ComponentConfig,
    pub(crate) inputs: Vec<ColumnId>,
    pub(crate) requirement: Option<Requirement>,
}

/// Assembles a job graph.
///
/// Components are stored in an arena and addressed by [`ComponentHandle`]. Columns are wired by
/// [`ColumnId`], which may refer to outputs of transformers that are not configured yet; such
/// references are only checked by [`JobBuilder::freeze`].
///
/// ```
/// use rust_data_quality::job::JobBuilder;
/// use rust_data_quality::processing::{RangeFilter, RowCountAnalyzer};
/// use rust_data_quality::types::{DataType, Field, Schema};
///
/// let schema = Schema::new(vec![Field::new("age", DataType::Int64)]);
/// let mut builder = JobBuilder::new(schema);
/// let age = builder.source_column("age").unwrap();
///
/// let adult = builder.add_filter("adult", RangeFilter::at_least(18.0)).unwrap();
/// builder.set_input(adult, [age]).unwrap();
///
/// let count = builder.add_analyzer("adults", RowCountAnalyzer::new()).unwrap();
/// builder.set_input(count, [age]).unwrap();
/// builder.set_requirement(count, adult, RangeFilter::VALID).unwrap();
///
/// let job = builder.freeze().unwrap();
/// assert_eq!(job.topological_order(), &[adult, count]);
/// ```
#[derive(Debug, Clone)]
pub struct JobBuilder {
    schema: Schema,
    /// Indexed by handle. Removed components leave `None` so other handles stay valid.
    slots: Vec<Option<ComponentSlot>>,
    default_requirement: Option<Requirement>,
    frozen: bool,
}

impl JobBuilder {
    /// Start a job reading rows of `schema`.
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            slots: Vec::new(),
            default_requirement: None,
            frozen: false,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// `true` once [`JobBuilder::freeze`] has succeeded.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Number of components, not counting removed ones.
    pub fn component_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub(crate) fn slots(&self) -> &[Option<ComponentSlot>] {
        &self.slots
    }

    /// Handle of a physical column by schema field name.
    pub fn source_column(&self, name: &str) -> Result<ColumnId, JobBuildError> {
        self.schema
            .index_of(name)
            .map(|i| ColumnId::Physical(i as u32))
            .ok_or_else(|| {
                ValidationError::UnknownSourceColumn {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// All physical columns of the bound schema.
    pub fn source_columns(&self) -> Vec<Column> {
        self.schema
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| Column::physical(i, f))
            .collect()
    }

    /// Add a component. Its inputs and requirement start empty.
    pub fn add_component(&mut self, descriptor: ComponentDescriptor) -> Result<ComponentHandle, JobBuildError> {
        self.ensure_mutable()?;
        let concurrency = descriptor.concurrency();
        let handle = ComponentHandle::from_index(self.slots.len());
        debug!(component = %handle, name = %descriptor.name, role = ?descriptor.role(), "component added");
        self.slots.push(Some(ComponentSlot {
            name: descriptor.name,
            kind: descriptor.kind,
            concurrency,
            config: descriptor.config,
            inputs: Vec::new(),
            requirement: None,
        }));
        Ok(handle)
    }

    /// Remove a component and unwire everything that referred to it.
    ///
    /// Consumers lose the inputs that came from its output columns. Components gated on its
    /// outcomes inherit the removed component's own requirement instead, and a default
    /// requirement on its outcomes is cleared. Handles are never reused.
    pub fn remove_component(&mut self, handle: ComponentHandle) -> Result<(), JobBuildError> {
        self.ensure_mutable()?;
        let removed = self
            .slots
            .get_mut(handle.index())
            .and_then(Option::take)
            .ok_or(JobBuildError::UnknownComponent(handle))?;

        if self
            .default_requirement
            .as_ref()
            .is_some_and(|r| r.filters().any(|f| f == handle))
        {
            self.default_requirement = None;
        }
        for slot in self.slots.iter_mut().flatten() {
            slot.inputs.retain(|id| id.producer() != Some(handle));
            if slot
                .requirement
                .as_ref()
                .is_some_and(|r| r.filters().any(|f| f == handle))
            {
                slot.requirement = removed.requirement.clone();
            }
        }
        debug!(component = %handle, name = %removed.name, "component removed");
        Ok(())
    }

    /// `true` if `handle` refers to a component that has not been removed.
    pub fn contains(&self, handle: ComponentHandle) -> bool {
        self.slots.get(handle.index()).is_some_and(Option::is_some)
    }

    pub fn add_filter(
        &mut self,
        name: impl Into<String>,
        filter: impl Filter + 'static,
    ) -> Result<ComponentHandle, JobBuildError> {
        self.add_component(ComponentDescriptor::filter(name, filter))
    }

    pub fn add_transformer(
        &mut self,
        name: impl Into<String>,
        transformer: impl Transformer + 'static,
    ) -> Result<ComponentHandle, JobBuildError> {
        self.add_component(ComponentDescriptor::transformer(name, transformer))
    }

    pub fn add_analyzer(
        &mut self,
        name: impl Into<String>,
        analyzer: impl Analyzer + 'static,
    ) -> Result<ComponentHandle, JobBuildError> {
        self.add_component(ComponentDescriptor::analyzer(name, analyzer))
    }

    /// Replace the input columns of a component. Values are passed to it in this order.
    pub fn set_input(
        &mut self,
        handle: ComponentHandle,
        columns: impl IntoIterator<Item = ColumnId>,
    ) -> Result<(), JobBuildError> {
        let slot = self.slot_mut(handle)?;
        slot.inputs = columns.into_iter().collect();
        Ok(())
    }

    /// Append one input column.
    pub fn add_input(&mut self, handle: ComponentHandle, column: ColumnId) -> Result<(), JobBuildError> {
        self.slot_mut(handle)?.inputs.push(column);
        Ok(())
    }

    /// Set a configuration property. Transformer signatures are recomputed from it on the next
    /// lineage query.
    pub fn set_property(
        &mut self,
        handle: ComponentHandle,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Result<(), JobBuildError> {
        self.slot_mut(handle)?.config.set(key, value);
        Ok(())
    }

    /// Gate a component on a single filter outcome.
    pub fn set_requirement(
        &mut self,
        handle: ComponentHandle,
        filter: ComponentHandle,
        category: impl Into<String>,
    ) -> Result<(), JobBuildError> {
        self.set_any_requirement(handle, [Outcome::new(filter, category)])
    }

    /// Gate a component on any of several outcomes. An empty list clears the requirement.
    pub fn set_any_requirement(
        &mut self,
        handle: ComponentHandle,
        outcomes: impl IntoIterator<Item = Outcome>,
    ) -> Result<(), JobBuildError> {
        self.ensure_mutable()?;
        let requirement = Requirement::any_of(outcomes);
        if let Some(unknown) = requirement.filters().find(|f| !self.contains(*f)) {
            return Err(JobBuildError::UnknownComponent(unknown));
        }
        let slot = self.slot_mut(handle)?;
        slot.requirement = (!requirement.is_empty()).then_some(requirement);
        Ok(())
    }

    pub fn clear_requirement(&mut self, handle: ComponentHandle) -> Result<(), JobBuildError> {
        self.slot_mut(handle)?.requirement = None;
        Ok(())
    }

    /// Gate every component without a requirement of its own on `filter` producing `category`.
    ///
    /// Applied when the job is frozen, so it also covers components added later. The filter
    /// itself and everything it depends on are left ungated.
    pub fn set_default_requirement(
        &mut self,
        filter: ComponentHandle,
        category: impl Into<String>,
    ) -> Result<(), JobBuildError> {
        self.ensure_mutable()?;
        if !self.contains(filter) {
            return Err(JobBuildError::UnknownComponent(filter));
        }
        self.default_requirement = Some(Requirement::single(Outcome::new(filter, category)));
        Ok(())
    }

    pub fn clear_default_requirement(&mut self) -> Result<(), JobBuildError> {
        self.ensure_mutable()?;
        self.default_requirement = None;
        Ok(())
    }

    pub fn default_requirement(&self) -> Option<&Requirement> {
        self.default_requirement.as_ref()
    }

    /// Columns currently declared by `handle`, derived from its present configuration.
    pub fn output_columns(&self, handle: ComponentHandle) -> Result<Vec<Column>, JobBuildError> {
        if !self.contains(handle) {
            return Err(JobBuildError::UnknownComponent(handle));
        }
        Ok(self.source_column_finder().output_columns(handle).to_vec())
    }

    /// Lineage view of the current builder state.
    pub fn source_column_finder(&self) -> SourceColumnFinder {
        SourceColumnFinder::from_builder(self)
    }

    /// Validate the graph and produce an immutable [`Job`].
    ///
    /// On failure the builder stays mutable so the problem can be fixed and `freeze` retried.
    /// After a successful freeze every mutation returns [`JobBuildError::Frozen`].
    pub fn freeze(&mut self) -> Result<Job, JobBuildError> {
        self.ensure_mutable()?;
        let resolved = self.with_default_requirement_applied();
        let finder = resolved.source_column_finder();
        resolved.validate(&finder)?;
        let order = finder.topological_order()?;
        let job = Job::assemble(resolved.schema, &resolved.slots, &finder, order);
        self.frozen = true;
        debug!(components = job.component_count(), "job frozen");
        Ok(job)
    }

    fn with_default_requirement_applied(&self) -> JobBuilder {
        let mut resolved = self.clone();
        let Some(default) = resolved.default_requirement.take() else {
            return resolved;
        };

        let finder = self.source_column_finder();
        let mut exempt: BTreeSet<ComponentHandle> = default.filters().collect();
        for filter in default.filters() {
            exempt.extend(finder.find_all_source_components(filter));
        }
        for (index, slot) in resolved.slots.iter_mut().enumerate() {
            let Some(slot) = slot else {
                continue;
            };
            if slot.requirement.is_none() && !exempt.contains(&ComponentHandle::from_index(index)) {
                slot.requirement = Some(default.clone());
            }
        }
        resolved
    }

    fn validate(&self, finder: &SourceColumnFinder) -> Result<(), ValidationError> {
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(slot) = slot else {
                continue;
            };
            if let Some(message) = finder.config_error(ComponentHandle::from_index(index)) {
                return Err(ValidationError::InvalidConfiguration {
                    component: slot.name.clone(),
                    message: message.to_string(),
                });
            }
        }

        for slot in self.slots.iter().flatten() {
            if let Some(column) = slot.inputs.iter().find(|id| !finder.is_resolvable(**id)) {
                return Err(ValidationError::UnresolvedColumn {
                    component: slot.name.clone(),
                    column: *column,
                });
            }
        }

        for slot in self.slots.iter().flatten() {
            let Some(requirement) = &slot.requirement else {
                continue;
            };
            for outcome in requirement.outcomes() {
                if finder.role(outcome.filter) != Some(Role::Filter) {
                    return Err(ValidationError::RequirementNotFilter {
                        component: slot.name.clone(),
                        referenced: finder.name(outcome.filter).to_string(),
                    });
                }
                if finder.resolve_outcome_producer(outcome).is_none() {
                    return Err(ValidationError::AmbiguousRequirement {
                        component: slot.name.clone(),
                        filter: finder.name(outcome.filter).to_string(),
                        category: outcome.category.clone(),
                        available: finder.categories(outcome.filter).to_vec(),
                    });
                }
            }
        }

        if let Some(cycle) = finder.find_cycle() {
            return Err(finder.cycle_error(cycle));
        }

        if let Some(slot) = self
            .slots
            .iter()
            .flatten()
            .find(|s| s.kind.role() == Role::Analyzer && s.inputs.is_empty())
        {
            return Err(ValidationError::MissingInput {
                component: slot.name.clone(),
            });
        }

        Ok(())
    }

    fn ensure_mutable(&self) -> Result<(), JobBuildError> {
        if self.frozen {
            Err(JobBuildError::Frozen)
        } else {
            Ok(())
        }
    }

    fn slot_mut(&mut self, handle: ComponentHandle) -> Result<&mut ComponentSlot, JobBuildError> {
        self.ensure_mutable()?;
        self.slots
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .ok_or(JobBuildError::UnknownComponent(handle))
    }
}
