use tracing::trace;

use crate::sync::{Work, WorkSync};
use crate::types::{NodeId, Result};

use super::merge::{MergingBlockEntryReader, VecBlockEntryCursor};
use super::{
    BlockEntryCursor, IndexEntryUpdate, IndexUpdateListener, NodeLabelUpdate,
    NodeLabelUpdateListener,
};

pub type LabelUpdateSync = WorkSync<dyn NodeLabelUpdateListener, LabelUpdateWork>;
pub type IndexUpdatesSync = WorkSync<dyn IndexUpdateListener, IndexUpdatesWork>;

/// Label updates of one or more batches. Each batch contributes a run
/// sorted by node id; combined runs are merged back into node order on apply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelUpdateWork {
    runs: Vec<Vec<NodeLabelUpdate>>,
}

impl LabelUpdateWork {
    /// Sorts `updates` by node id, keeping the relative order of equal ids.
    pub fn new(mut updates: Vec<NodeLabelUpdate>) -> Self {
        updates.sort_by_key(|update| update.node);
        let runs = if updates.is_empty() {
            Vec::new()
        } else {
            vec![updates]
        };
        Self { runs }
    }

    pub fn is_empty(&self) -> bool {
        self.runs.iter().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.runs.iter().map(Vec::len).sum()
    }

    /// All updates in node order.
    pub fn into_sorted(self) -> Result<Vec<NodeLabelUpdate>> {
        if self.runs.len() <= 1 {
            return Ok(self.runs.into_iter().flatten().collect());
        }
        let mut merger: MergingBlockEntryReader<NodeId, NodeLabelUpdate> =
            MergingBlockEntryReader::new();
        for run in self.runs {
            let entries = run.into_iter().map(|update| (update.node, update)).collect();
            merger.add_source(Box::new(VecBlockEntryCursor::new(entries)));
        }
        let merged = merger.collect_all();
        merger.close()?;
        Ok(merged?.into_iter().map(|(_, update)| update).collect())
    }
}

impl Work<dyn NodeLabelUpdateListener> for LabelUpdateWork {
    fn combine(&mut self, other: Self) {
        self.runs.extend(other.runs);
    }

    fn apply(self, target: &dyn NodeLabelUpdateListener) -> Result<()> {
        let runs = self.runs.len();
        let updates = self.into_sorted()?;
        trace!(runs, updates = updates.len(), "index.label_updates.apply");
        target.apply_updates(&updates)?;
        Ok(())
    }

    fn units(&self) -> usize {
        self.len()
    }
}

/// Index entry updates of one or more batches, in submission order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexUpdatesWork {
    updates: Vec<IndexEntryUpdate>,
}

impl IndexUpdatesWork {
    pub fn new(updates: Vec<IndexEntryUpdate>) -> Self {
        Self { updates }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn updates(&self) -> &[IndexEntryUpdate] {
        &self.updates
    }
}

impl Work<dyn IndexUpdateListener> for IndexUpdatesWork {
    fn combine(&mut self, other: Self) {
        self.updates.extend(other.updates);
    }

    fn apply(self, target: &dyn IndexUpdateListener) -> Result<()> {
        trace!(updates = self.updates.len(), "index.entry_updates.apply");
        target.apply_updates(&self.updates)?;
        Ok(())
    }

    fn units(&self) -> usize {
        self.updates.len()
    }
}
