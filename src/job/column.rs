//! Column identity and lineage handles.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{DataType, Field};

use super::component::ComponentHandle;

/// Stable, comparable identity of a column inside a job.
///
/// Physical columns are addressed by their position in the bound [`crate::types::Schema`].
/// Virtual columns are addressed by the component that produces them and the position of the
/// column in that component's output signature, so a virtual column has exactly one producer by
/// construction. Whether the producer actually declares that output is checked when the job is
/// frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ColumnId {
    /// Column bound to a source schema position.
    Physical(u32),
    /// Column produced by a transformer.
    Virtual {
        producer: ComponentHandle,
        ordinal: u32,
    },
}

impl ColumnId {
    /// Handle for output number `ordinal` of `producer`.
    pub fn output(producer: ComponentHandle, ordinal: usize) -> Self {
        Self::Virtual {
            producer,
            ordinal: ordinal as u32,
        }
    }

    /// `true` for schema-bound columns.
    pub fn is_physical(&self) -> bool {
        matches!(self, ColumnId::Physical(_))
    }

    /// `true` for transformer-produced columns.
    pub fn is_virtual(&self) -> bool {
        matches!(self, ColumnId::Virtual { .. })
    }

    /// The component this column claims as its producer, for virtual columns.
    pub fn producer(&self) -> Option<ComponentHandle> {
        match self {
            ColumnId::Physical(_) => None,
            ColumnId::Virtual { producer, .. } => Some(*producer),
        }
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnId::Physical(idx) => write!(f, "source[{idx}]"),
            ColumnId::Virtual { producer, ordinal } => write!(f, "{producer}[{ordinal}]"),
        }
    }
}

/// A column together with its name and declared value type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    /// Physical column for schema field `index`.
    pub fn physical(index: usize, field: &Field) -> Self {
        Self {
            id: ColumnId::Physical(index as u32),
            name: field.name.clone(),
            data_type: field.data_type.clone(),
        }
    }

    /// `true` for schema-bound columns.
    pub fn is_physical(&self) -> bool {
        self.id.is_physical()
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_columns_carry_their_producer() {
        let producer = ComponentHandle::from_index(3);
        let id = ColumnId::output(producer, 1);
        assert!(id.is_virtual());
        assert_eq!(id.producer(), Some(producer));
        assert_eq!(id.to_string(), "#3[1]");
        assert_eq!(ColumnId::Physical(0).producer(), None);
    }

    #[test]
    fn physical_columns_sort_before_virtual_columns() {
        let p = ColumnId::Physical(9);
        let v = ColumnId::output(ComponentHandle::from_index(0), 0);
        assert!(p < v);
    }
}
