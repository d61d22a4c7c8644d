//! Id allocator bookkeeping driven by record writes.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::store::IdUpdateListener;
use crate::sync::{Work, WorkSync, WorkSyncConfig, WorkTicket};
use crate::types::{IdType, Result};

/// Allocator for one [`IdType`].
pub trait IdGenerator: Send + Sync {
    fn mark_used(&self, id: u64) -> Result<()>;
    fn mark_free(&self, id: u64) -> Result<()>;
}

/// Used and freed ids for one id type, in submission order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdGeneratorUpdatesWork {
    pub used: Vec<u64>,
    pub freed: Vec<u64>,
}

impl IdGeneratorUpdatesWork {
    pub fn is_empty(&self) -> bool {
        self.used.is_empty() && self.freed.is_empty()
    }
}

impl Work<dyn IdGenerator> for IdGeneratorUpdatesWork {
    fn combine(&mut self, other: Self) {
        self.used.extend(other.used);
        self.freed.extend(other.freed);
    }

    fn apply(self, target: &dyn IdGenerator) -> Result<()> {
        for id in self.used {
            target.mark_used(id)?;
        }
        for id in self.freed {
            target.mark_free(id)?;
        }
        Ok(())
    }

    fn units(&self) -> usize {
        self.used.len() + self.freed.len()
    }
}

/// Listener that buffers id updates per id type until the batch closes.
#[derive(Debug, Default)]
pub struct BufferedIdUpdates {
    updates: FxHashMap<IdType, IdGeneratorUpdatesWork>,
}

impl BufferedIdUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.values().all(IdGeneratorUpdatesWork::is_empty)
    }

    pub fn get(&self, id_type: IdType) -> Option<&IdGeneratorUpdatesWork> {
        self.updates.get(&id_type)
    }

    /// Drains the buffer, ordered by id type.
    pub fn take(&mut self) -> Vec<(IdType, IdGeneratorUpdatesWork)> {
        let mut out: Vec<_> = self
            .updates
            .drain()
            .filter(|(_, work)| !work.is_empty())
            .collect();
        out.sort_by_key(|(id_type, _)| *id_type);
        out
    }
}

impl IdUpdateListener for BufferedIdUpdates {
    fn mark_id_as_used(&mut self, id_type: IdType, id: u64) {
        self.updates.entry(id_type).or_default().used.push(id);
    }

    fn mark_id_as_unused(&mut self, id_type: IdType, id: u64) {
        self.updates.entry(id_type).or_default().freed.push(id);
    }
}

pub type IdGeneratorSync = WorkSync<dyn IdGenerator, IdGeneratorUpdatesWork>;

/// One synchronizer per id type with a registered generator.
#[derive(Default)]
pub struct IdGeneratorSyncs {
    syncs: FxHashMap<IdType, IdGeneratorSync>,
}

impl IdGeneratorSyncs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id_type: IdType,
        generator: Arc<dyn IdGenerator>,
        config: WorkSyncConfig,
    ) {
        self.syncs
            .insert(id_type, WorkSync::new(id_type.name(), generator, config));
    }

    pub fn get(&self, id_type: IdType) -> Option<&IdGeneratorSync> {
        self.syncs.get(&id_type)
    }

    /// Submits every buffered update and waits for all of them. Updates for
    /// id types without a generator are dropped.
    pub fn submit(&self, updates: &mut BufferedIdUpdates) -> Result<()> {
        let mut tickets: Vec<WorkTicket> = Vec::new();
        for (id_type, work) in updates.take() {
            let Some(sync) = self.syncs.get(&id_type) else {
                trace!(id_type = %id_type, "id.updates.unregistered");
                continue;
            };
            tickets.push(sync.apply_async(work));
        }
        let mut first_err = None;
        for ticket in tickets {
            if let Err(err) = ticket.wait() {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Free-list allocator tracking a high id and released ids.
#[derive(Debug, Default)]
pub struct FreeListIdGenerator {
    state: Mutex<FreeListState>,
}

#[derive(Debug, Default)]
struct FreeListState {
    next: u64,
    free: BTreeSet<u64>,
}

impl FreeListIdGenerator {
    pub fn new(next: u64) -> Self {
        Self {
            state: Mutex::new(FreeListState {
                next,
                free: BTreeSet::new(),
            }),
        }
    }

    /// Hands out the lowest free id, or a new one past the high id.
    pub fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        if let Some(id) = state.free.pop_first() {
            return id;
        }
        let id = state.next;
        state.next += 1;
        id
    }

    pub fn high_id(&self) -> u64 {
        self.state.lock().next
    }

    pub fn free_ids(&self) -> Vec<u64> {
        self.state.lock().free.iter().copied().collect()
    }
}

impl IdGenerator for FreeListIdGenerator {
    fn mark_used(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.free.remove(&id);
        if id >= state.next {
            state.next = id + 1;
        }
        Ok(())
    }

    fn mark_free(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        if id < state.next {
            state.free.insert(id);
        }
        Ok(())
    }
}
