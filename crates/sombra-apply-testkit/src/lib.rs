//! In-memory collaborators for exercising the apply engine.
//!
//! Every collaborator can share one [`Journal`], so tests can assert the
//! relative order of store writes, high-id announcements, lock handling,
//! cache notifications and index engine calls.

#![forbid(unsafe_code)]

mod indexing;
mod recorders;
mod stores;

use std::sync::{Arc, Once};

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use sombra_apply::cache::TokenKind;
use sombra_apply::index::{IndexEntryUpdate, NodeLabelUpdate};
use sombra_apply::record::NamedToken;
use sombra_apply::types::{IdType, TxId};

pub use indexing::{IndexState, MemoryIndexingService, RecordingLabelIndex};
pub use recorders::{RecordingCache, RecordingIdGenerator, RecordingLocks};
pub use stores::{
    MemoryMetaDataStore, MemoryNodeStore, MemoryPropertyStore, MemoryRecordStore,
    MemoryStores, MemoryTokenStore,
};

/// Something a collaborator observed.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    HighId { id_type: IdType, id: u64 },
    Update { id_type: IdType, id: u64, in_use: bool },
    NodeLocked(u64),
    NodeUnlocked(u64),
    RelationshipLocked(u64),
    RelationshipUnlocked(u64),
    SchemaRuleAdded(u64),
    SchemaRuleRemoved(u64),
    TokenAdded(TokenKind, NamedToken),
    TokenRemoved(TokenKind, u32),
    GraphNextProp(u64),
    ConstraintTx(TxId),
    IndexesCreated(Vec<u64>),
    IndexActivated(u64),
    IndexDropped(u64),
    IndexUpdates(Vec<IndexEntryUpdate>),
    LabelUpdates(Vec<NodeLabelUpdate>),
    IdUsed(IdType, u64),
    IdFreed(IdType, u64),
}

/// Ordered, shareable event log.
#[derive(Clone, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: Event) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Position of the first event equal to `event`.
    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }

    pub fn contains(&self, event: &Event) -> bool {
        self.position(event).is_some()
    }

    /// Events matching `filter`, in order.
    pub fn filtered(&self, filter: impl Fn(&Event) -> bool) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| filter(e))
            .cloned()
            .collect()
    }

    /// Whether `first` was observed before `second`; both must be present.
    pub fn in_order(&self, first: &Event, second: &Event) -> bool {
        match (self.position(first), self.position(second)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }
}

/// Installs a `tracing` subscriber honoring `RUST_LOG`; later calls are no-ops.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sombra_apply=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}
