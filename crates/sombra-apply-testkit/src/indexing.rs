use std::collections::BTreeMap;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use sombra_apply::index::{
    IndexEntryUpdate, IndexUpdateListener, NodeLabelUpdate, NodeLabelUpdateListener,
};
use sombra_apply::record::{Labels, PropertyValue};
use sombra_apply::schema::IndexDescriptor;
use sombra_apply::types::{IndexError, NodeId};

use crate::{Event, Journal};

/// Lifecycle position of an index known to [`MemoryIndexingService`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexState {
    Populating,
    Online,
    Active,
    Dropped,
}

#[derive(Default)]
struct IndexingState {
    states: BTreeMap<u64, IndexState>,
    entries: BTreeMap<u64, BTreeMap<u64, Vec<PropertyValue>>>,
    activation_failures: FxHashMap<u64, String>,
}

/// Index engine keeping entries in memory.
///
/// Created indexes start out populating; constraint-backed indexes become
/// active when activated. Activating an index that was never created fails
/// with [`IndexError::NotFound`].
pub struct MemoryIndexingService {
    state: Mutex<IndexingState>,
    journal: Journal,
}

impl MemoryIndexingService {
    pub fn new(journal: &Journal) -> Self {
        Self {
            state: Mutex::new(IndexingState::default()),
            journal: journal.clone(),
        }
    }

    /// Registers an index that already exists and is online.
    pub fn register_online(&self, index: u64) {
        let mut state = self.state.lock();
        state.states.insert(index, IndexState::Online);
        state.entries.entry(index).or_default();
    }

    /// Makes activation of `index` fail with `reason`.
    pub fn fail_activation(&self, index: u64, reason: impl Into<String>) {
        self.state
            .lock()
            .activation_failures
            .insert(index, reason.into());
    }

    pub fn state(&self, index: u64) -> Option<IndexState> {
        self.state.lock().states.get(&index).copied()
    }

    /// Entries of `index` as `(entity, values)` pairs in entity order.
    pub fn entries(&self, index: u64) -> Vec<(u64, Vec<PropertyValue>)> {
        self.state
            .lock()
            .entries
            .get(&index)
            .map(|entries| entries.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default()
    }
}

impl IndexUpdateListener for MemoryIndexingService {
    fn create_indexes(&self, indexes: &[IndexDescriptor]) -> Result<(), IndexError> {
        let mut state = self.state.lock();
        for index in indexes {
            state.states.insert(index.id, IndexState::Populating);
            state.entries.entry(index.id).or_default();
        }
        self.journal
            .record(Event::IndexesCreated(indexes.iter().map(|i| i.id).collect()));
        Ok(())
    }

    fn activate_index(&self, index: &IndexDescriptor) -> Result<(), IndexError> {
        let mut state = self.state.lock();
        if let Some(reason) = state.activation_failures.get(&index.id) {
            return Err(IndexError::Failed {
                index: index.id,
                reason: reason.clone(),
            });
        }
        match state.states.get_mut(&index.id) {
            Some(current) if *current != IndexState::Dropped => *current = IndexState::Active,
            _ => return Err(IndexError::NotFound(index.id)),
        }
        self.journal.record(Event::IndexActivated(index.id));
        Ok(())
    }

    fn drop_index(&self, index: &IndexDescriptor) -> Result<(), IndexError> {
        let mut state = self.state.lock();
        state.states.insert(index.id, IndexState::Dropped);
        state.entries.remove(&index.id);
        self.journal.record(Event::IndexDropped(index.id));
        Ok(())
    }

    fn apply_updates(&self, updates: &[IndexEntryUpdate]) -> Result<(), IndexError> {
        let mut state = self.state.lock();
        for update in updates {
            let Some(entries) = state.entries.get_mut(&update.index_id()) else {
                continue;
            };
            match update {
                IndexEntryUpdate::Added { entity, values, .. } => {
                    entries.insert(*entity, values.clone());
                }
                IndexEntryUpdate::Changed { entity, after, .. } => {
                    entries.insert(*entity, after.clone());
                }
                IndexEntryUpdate::Removed { entity, .. } => {
                    entries.remove(entity);
                }
            }
        }
        self.journal.record(Event::IndexUpdates(updates.to_vec()));
        Ok(())
    }
}

/// Label index keeping the current label set per node.
pub struct RecordingLabelIndex {
    labels: Mutex<BTreeMap<NodeId, Labels>>,
    applies: Mutex<usize>,
    journal: Journal,
}

impl RecordingLabelIndex {
    pub fn new(journal: &Journal) -> Self {
        Self {
            labels: Mutex::new(BTreeMap::new()),
            applies: Mutex::new(0),
            journal: journal.clone(),
        }
    }

    pub fn labels(&self, node: NodeId) -> Labels {
        self.labels.lock().get(&node).cloned().unwrap_or_default()
    }

    /// Number of `apply_updates` calls received.
    pub fn applies(&self) -> usize {
        *self.applies.lock()
    }
}

impl NodeLabelUpdateListener for RecordingLabelIndex {
    fn apply_updates(&self, updates: &[NodeLabelUpdate]) -> Result<(), IndexError> {
        let mut labels = self.labels.lock();
        for update in updates {
            if update.after.is_empty() {
                labels.remove(&update.node);
            } else {
                labels.insert(update.node, update.after.clone());
            }
        }
        *self.applies.lock() += 1;
        self.journal.record(Event::LabelUpdates(updates.to_vec()));
        Ok(())
    }
}
