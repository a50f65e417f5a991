//! Lineage queries over a (possibly unfinished) job graph.
//!
//! The finder is rebuilt from the builder's current state on demand, so it can be queried while a
//! job is still being wired: columns whose producer is not configured yet simply do not resolve.

use std::collections::{BTreeSet, HashMap};

use crate::error::ValidationError;
use crate::types::DataType;

use super::builder::{ComponentSlot, JobBuilder};
use super::column::{Column, ColumnId};
use super::component::{ComponentContext, ComponentHandle, ComponentKind, Role};
use super::outcome::{Outcome, Requirement};

#[derive(Debug, Clone)]
struct FinderNode {
    name: String,
    role: Role,
    inputs: Vec<ColumnId>,
    requirement: Option<Requirement>,
    outputs: Vec<Column>,
    categories: Vec<String>,
    config_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    InProgress,
    Done,
}

/// Producer lookups, transitive source queries and cycle detection for a job graph.
#[derive(Debug, Clone, Default)]
pub struct SourceColumnFinder {
    physical: Vec<Column>,
    /// Indexed by handle; `None` for removed components.
    nodes: Vec<Option<FinderNode>>,
    columns: HashMap<ColumnId, Column>,
    outcomes: HashMap<Outcome, ComponentHandle>,
}

impl SourceColumnFinder {
    /// Index the current state of `builder`.
    pub fn from_builder(builder: &JobBuilder) -> Self {
        let mut finder = Self::default();
        finder.rebuild(builder);
        finder
    }

    /// Drop everything indexed so far and index the current state of `builder` again.
    ///
    /// Transformer signatures are recomputed in producer-first order so that a transformer sees
    /// the declared metadata of its virtual inputs. A component whose configuration check fails
    /// declares no outputs.
    pub fn rebuild(&mut self, builder: &JobBuilder) {
        let schema = builder.schema();
        let slots = builder.slots();

        self.physical = schema
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| Column::physical(i, f))
            .collect();
        self.columns.clear();
        self.outcomes.clear();
        self.nodes = slots
            .iter()
            .map(|slot| {
                slot.as_ref().map(|slot| FinderNode {
                    name: slot.name.clone(),
                    role: slot.kind.role(),
                    inputs: slot.inputs.clone(),
                    requirement: slot.requirement.clone(),
                    outputs: Vec::new(),
                    categories: Vec::new(),
                    config_error: None,
                })
            })
            .collect();

        let mut visit = vec![Visit::Unvisited; slots.len()];
        for index in 0..slots.len() {
            self.declare(slots, index, &mut visit);
        }
    }

    fn declare(&mut self, slots: &[Option<ComponentSlot>], index: usize, visit: &mut [Visit]) {
        if visit[index] != Visit::Unvisited {
            return;
        }
        let Some(slot) = &slots[index] else {
            visit[index] = Visit::Done;
            return;
        };
        visit[index] = Visit::InProgress;

        for input in &slot.inputs {
            if let Some(producer) = input.producer() {
                if producer.index() < slots.len() {
                    self.declare(slots, producer.index(), visit);
                }
            }
        }

        let handle = ComponentHandle::from_index(index);
        let inputs: Vec<Column> = slot
            .inputs
            .iter()
            .filter_map(|id| self.column(*id).cloned())
            .collect();
        let ctx = ComponentContext {
            name: &slot.name,
            config: &slot.config,
            inputs: &inputs,
        };

        let mut outputs = Vec::new();
        let mut categories = Vec::new();
        let mut config_error = None;
        match &slot.kind {
            ComponentKind::Transformer(t) => match t.validate(&ctx) {
                Ok(signature) => {
                    outputs = signature
                        .columns()
                        .iter()
                        .enumerate()
                        .map(|(ordinal, c)| Column {
                            id: ColumnId::output(handle, ordinal),
                            name: c.name.clone(),
                            data_type: c.data_type.clone(),
                        })
                        .collect();
                }
                Err(e) => config_error = Some(e.to_string()),
            },
            ComponentKind::Filter(f) => {
                categories = f.categories();
                if let Err(e) = f.validate(&ctx) {
                    config_error = Some(e.to_string());
                }
            }
            ComponentKind::Analyzer(a) => {
                if let Err(e) = a.validate(&ctx) {
                    config_error = Some(e.to_string());
                }
            }
        }

        for column in &outputs {
            self.columns.insert(column.id, column.clone());
        }
        for category in &categories {
            self.outcomes
                .insert(Outcome::new(handle, category.clone()), handle);
        }

        if let Some(node) = self.nodes[index].as_mut() {
            node.outputs = outputs;
            node.categories = categories;
            node.config_error = config_error;
        }
        visit[index] = Visit::Done;
    }

    /// Number of indexed components, not counting removed ones.
    pub fn component_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    fn node(&self, handle: ComponentHandle) -> Option<&FinderNode> {
        self.nodes.get(handle.index()).and_then(Option::as_ref)
    }

    /// Columns of the bound schema.
    pub fn physical_columns(&self) -> &[Column] {
        &self.physical
    }

    /// Metadata of a resolvable column.
    pub fn column(&self, id: ColumnId) -> Option<&Column> {
        match id {
            ColumnId::Physical(idx) => self.physical.get(idx as usize),
            ColumnId::Virtual { .. } => self.columns.get(&id),
        }
    }

    /// `true` if the column is bound to the schema or declared by its producer.
    pub fn is_resolvable(&self, id: ColumnId) -> bool {
        self.column(id).is_some()
    }

    /// The component that produces `id`. Physical and undeclared columns have no producer.
    pub fn resolve_producer(&self, id: ColumnId) -> Option<ComponentHandle> {
        match id {
            ColumnId::Physical(_) => None,
            ColumnId::Virtual { producer, .. } => self.columns.contains_key(&id).then_some(producer),
        }
    }

    /// The filter that can produce `outcome`, if its category is declared.
    pub fn resolve_outcome_producer(&self, outcome: &Outcome) -> Option<ComponentHandle> {
        self.outcomes.get(outcome).copied()
    }

    /// Declared outputs of a component. Empty for filters, analyzers and unconfigured transformers.
    pub fn output_columns(&self, handle: ComponentHandle) -> &[Column] {
        self.node(handle)
            .map(|n| n.outputs.as_slice())
            .unwrap_or(&[])
    }

    /// Declared categories of a filter. Empty for other roles.
    pub fn categories(&self, handle: ComponentHandle) -> &[String] {
        self.node(handle)
            .map(|n| n.categories.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn config_error(&self, handle: ComponentHandle) -> Option<&str> {
        self.node(handle).and_then(|n| n.config_error.as_deref())
    }

    pub(crate) fn name(&self, handle: ComponentHandle) -> &str {
        self.node(handle)
            .map(|n| n.name.as_str())
            .unwrap_or("<unknown>")
    }

    pub(crate) fn role(&self, handle: ComponentHandle) -> Option<Role> {
        self.node(handle).map(|n| n.role)
    }

    /// Direct upstream components of `handle`: producers of its resolvable inputs and the filters
    /// its requirement refers to. Sorted and deduplicated.
    pub fn dependencies(&self, handle: ComponentHandle) -> Vec<ComponentHandle> {
        let Some(node) = self.node(handle) else {
            return Vec::new();
        };
        let mut deps: BTreeSet<ComponentHandle> = node
            .inputs
            .iter()
            .filter_map(|id| self.resolve_producer(*id))
            .collect();
        if let Some(req) = &node.requirement {
            deps.extend(req.filters().filter(|f| self.node(*f).is_some()));
        }
        deps.into_iter().collect()
    }

    /// Every component that `handle` transitively depends on, through inputs or requirements.
    pub fn find_all_source_components(&self, handle: ComponentHandle) -> BTreeSet<ComponentHandle> {
        let mut found = BTreeSet::new();
        let mut stack = self.dependencies(handle);
        while let Some(next) = stack.pop() {
            if found.insert(next) {
                stack.extend(self.dependencies(next));
            }
        }
        found
    }

    /// Physical columns that `column`'s value is ultimately computed from.
    pub fn find_originating_columns(&self, column: ColumnId) -> BTreeSet<ColumnId> {
        let mut found = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![column];
        while let Some(id) = stack.pop() {
            match id {
                ColumnId::Physical(_) => {
                    if self.is_resolvable(id) {
                        found.insert(id);
                    }
                }
                ColumnId::Virtual { .. } => {
                    if let Some(node) = self.resolve_producer(id).filter(|p| seen.insert(*p)).and_then(|p| self.node(p)) {
                        stack.extend(node.inputs.iter().copied());
                    }
                }
            }
        }
        found
    }

    /// All columns available as inputs: physical columns first, then declared virtual columns in
    /// component order. Optionally restricted to one data type.
    pub fn find_input_columns(&self, data_type: Option<&DataType>) -> Vec<Column> {
        self.physical
            .iter()
            .chain(self.nodes.iter().flatten().flat_map(|n| n.outputs.iter()))
            .filter(|c| data_type.is_none_or(|t| &c.data_type == t))
            .cloned()
            .collect()
    }

    /// A dependency cycle, if there is one.
    ///
    /// The cycle is listed in data-flow order (upstream first) with its first component repeated
    /// at the end.
    pub fn find_cycle(&self) -> Option<Vec<ComponentHandle>> {
        let deps: Vec<Vec<ComponentHandle>> = (0..self.nodes.len())
            .map(|i| self.dependencies(ComponentHandle::from_index(i)))
            .collect();
        let mut visit = vec![Visit::Unvisited; deps.len()];
        let mut path = Vec::new();
        (0..deps.len()).find_map(|start| {
            if visit[start] == Visit::Unvisited {
                walk_for_cycle(start, &deps, &mut visit, &mut path)
            } else {
                None
            }
        })
    }

    /// Dependency-respecting execution order. Ties are broken by handle so the order is stable.
    pub(crate) fn topological_order(&self) -> Result<Vec<ComponentHandle>, ValidationError> {
        let n = self.nodes.len();
        let live = self.component_count();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, degree) in in_degree.iter_mut().enumerate() {
            for dep in self.dependencies(ComponentHandle::from_index(i)) {
                *degree += 1;
                dependents[dep.index()].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..n)
            .filter(|&i| self.nodes[i].is_some() && in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(live);
        while let Some(next) = ready.pop_first() {
            order.push(ComponentHandle::from_index(next));
            for &dependent in &dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != live {
            let cycle = self.find_cycle().unwrap_or_default();
            return Err(self.cycle_error(cycle));
        }
        Ok(order)
    }

    pub(crate) fn cycle_error(&self, cycle: Vec<ComponentHandle>) -> ValidationError {
        let names = cycle.iter().map(|h| self.name(*h).to_string()).collect();
        ValidationError::CycleDetected { cycle, names }
    }
}

fn walk_for_cycle(
    node: usize,
    deps: &[Vec<ComponentHandle>],
    visit: &mut [Visit],
    path: &mut Vec<usize>,
) -> Option<Vec<ComponentHandle>> {
    visit[node] = Visit::InProgress;
    path.push(node);
    for dep in &deps[node] {
        let d = dep.index();
        match visit[d] {
            Visit::InProgress => {
                let pos = path.iter().position(|&p| p == d)?;
                let mut cycle: Vec<ComponentHandle> = path[pos..]
                    .iter()
                    .rev()
                    .map(|&i| ComponentHandle::from_index(i))
                    .collect();
                cycle.push(cycle[0]);
                return Some(cycle);
            }
            Visit::Unvisited => {
                if let Some(cycle) = walk_for_cycle(d, deps, visit, path) {
                    return Some(cycle);
                }
            }
            Visit::Done => {}
        }
    }
    path.pop();
    visit[node] = Visit::Done;
    None
}
