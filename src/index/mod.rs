//! Index and label-index collaborators plus the work shipped to them.

#![forbid(unsafe_code)]

mod activator;
mod merge;
mod work;

pub use activator::IndexActivator;
pub use merge::{BlockEntryCursor, MergingBlockEntryReader, VecBlockEntryCursor};
pub use work::{IndexUpdatesWork, IndexUpdatesSync, LabelUpdateSync, LabelUpdateWork};

use std::fmt;

use crate::record::{Labels, PropertyValue};
use crate::schema::IndexDescriptor;
use crate::types::{IndexError, LabelId, NodeId, TxId};

/// Index engine: lifecycle transitions and entry updates.
pub trait IndexUpdateListener: Send + Sync {
    /// Registers new indexes; they start populating and are not yet online.
    fn create_indexes(&self, indexes: &[IndexDescriptor]) -> Result<(), IndexError>;

    /// Brings a populated constraint-backed index online.
    fn activate_index(&self, index: &IndexDescriptor) -> Result<(), IndexError>;

    fn drop_index(&self, index: &IndexDescriptor) -> Result<(), IndexError>;

    fn apply_updates(&self, updates: &[IndexEntryUpdate]) -> Result<(), IndexError>;
}

/// Label index writer.
pub trait NodeLabelUpdateListener: Send + Sync {
    /// `updates` are sorted by node id.
    fn apply_updates(&self, updates: &[NodeLabelUpdate]) -> Result<(), IndexError>;
}

/// Label set change of one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeLabelUpdate {
    pub node: NodeId,
    pub before: Labels,
    pub after: Labels,
    pub tx: TxId,
}

impl NodeLabelUpdate {
    pub fn added(&self) -> impl Iterator<Item = &LabelId> + '_ {
        self.after.iter().filter(|l| !self.before.contains(l))
    }

    pub fn removed(&self) -> impl Iterator<Item = &LabelId> + '_ {
        self.before.iter().filter(|l| !self.after.contains(l))
    }
}

/// One change to an index entry.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexEntryUpdate {
    Added {
        index: u64,
        entity: u64,
        values: Vec<PropertyValue>,
    },
    Changed {
        index: u64,
        entity: u64,
        before: Vec<PropertyValue>,
        after: Vec<PropertyValue>,
    },
    Removed {
        index: u64,
        entity: u64,
        values: Vec<PropertyValue>,
    },
}

impl IndexEntryUpdate {
    pub fn index_id(&self) -> u64 {
        match self {
            IndexEntryUpdate::Added { index, .. }
            | IndexEntryUpdate::Changed { index, .. }
            | IndexEntryUpdate::Removed { index, .. } => *index,
        }
    }

    pub fn entity_id(&self) -> u64 {
        match self {
            IndexEntryUpdate::Added { entity, .. }
            | IndexEntryUpdate::Changed { entity, .. }
            | IndexEntryUpdate::Removed { entity, .. } => *entity,
        }
    }
}

impl fmt::Display for IndexEntryUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexEntryUpdate::Added { index, entity, .. } => {
                write!(f, "add(index={index}, entity={entity})")
            }
            IndexEntryUpdate::Changed { index, entity, .. } => {
                write!(f, "change(index={index}, entity={entity})")
            }
            IndexEntryUpdate::Removed { index, entity, .. } => {
                write!(f, "remove(index={index}, entity={entity})")
            }
        }
    }
}
