use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;

use sombra_apply::record::{
    DynamicRecord, NamedToken, NodeRecord, PropertyOwner, PropertyRecord, Record,
    RelationshipGroupRecord, RelationshipRecord, SchemaRecord, TokenRecord, ValueStore,
};
use sombra_apply::store::{
    DynamicStore, IdUpdateListener, MetaDataStore, NodeStore, PropertyStore, RecordStore,
    Stores, TokenStore,
};
use sombra_apply::types::{ApplyError, IdType, Result, TxId, NO_ID};

use crate::{Event, Journal};

/// Map-backed store of one record kind.
pub struct MemoryRecordStore<R> {
    id_type: IdType,
    records: RwLock<BTreeMap<u64, R>>,
    high: AtomicU64,
    failing: Mutex<FxHashSet<u64>>,
    journal: Journal,
}

impl<R: Record> MemoryRecordStore<R> {
    pub fn new(id_type: IdType, journal: Journal) -> Self {
        Self {
            id_type,
            records: RwLock::new(BTreeMap::new()),
            high: AtomicU64::new(0),
            failing: Mutex::new(FxHashSet::default()),
            journal,
        }
    }

    /// Stores `record` without journaling or id reporting.
    pub fn seed(&self, record: R) {
        self.high.fetch_max(record.id(), Ordering::AcqRel);
        self.records.write().insert(record.id(), record);
    }

    /// Makes every later write of `id` fail with an I/O error.
    pub fn fail_writes_to(&self, id: u64) {
        self.failing.lock().insert(id);
    }

    pub fn record(&self, id: u64) -> Option<R> {
        self.records.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn in_use_records(&self) -> Vec<R> {
        self.records
            .read()
            .values()
            .filter(|r| r.in_use())
            .cloned()
            .collect()
    }
}

impl<R: Record> RecordStore<R> for MemoryRecordStore<R> {
    fn id_type(&self) -> IdType {
        self.id_type
    }

    fn update_record(&self, record: &R, ids: &mut dyn IdUpdateListener) -> Result<()> {
        if self.failing.lock().contains(&record.id()) {
            return Err(ApplyError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("write to {} {} failed", self.id_type, record.id()),
            )));
        }
        self.journal.record(Event::Update {
            id_type: self.id_type,
            id: record.id(),
            in_use: record.in_use(),
        });
        if record.in_use() {
            if record.is_created() {
                ids.mark_id_as_used(self.id_type, record.id());
            }
        } else {
            ids.mark_id_as_unused(self.id_type, record.id());
        }
        self.records.write().insert(record.id(), record.clone());
        Ok(())
    }

    fn get_record(&self, id: u64) -> Result<Option<R>> {
        Ok(self.record(id))
    }

    fn set_highest_possible_id_in_use(&self, id: u64) {
        self.journal.record(Event::HighId {
            id_type: self.id_type,
            id,
        });
        self.high.fetch_max(id, Ordering::AcqRel);
    }

    fn highest_possible_id_in_use(&self) -> u64 {
        self.high.load(Ordering::Acquire)
    }
}

fn write_dynamic(
    store: &MemoryRecordStore<DynamicRecord>,
    records: &[DynamicRecord],
    ids: &mut dyn IdUpdateListener,
) -> Result<()> {
    for record in records.iter().filter(|r| r.id != NO_ID) {
        store.update_record(record, ids)?;
    }
    Ok(())
}

/// Node store writing dynamic label records alongside node records.
pub struct MemoryNodeStore {
    pub records: MemoryRecordStore<NodeRecord>,
    pub labels: MemoryRecordStore<DynamicRecord>,
}

impl MemoryNodeStore {
    pub fn new(journal: &Journal) -> Self {
        Self {
            records: MemoryRecordStore::new(IdType::Node, journal.clone()),
            labels: MemoryRecordStore::new(IdType::NodeLabels, journal.clone()),
        }
    }
}

impl RecordStore<NodeRecord> for MemoryNodeStore {
    fn id_type(&self) -> IdType {
        IdType::Node
    }

    fn update_record(&self, record: &NodeRecord, ids: &mut dyn IdUpdateListener) -> Result<()> {
        write_dynamic(&self.labels, record.labels.dynamic_records(), ids)?;
        self.records.update_record(record, ids)
    }

    fn get_record(&self, id: u64) -> Result<Option<NodeRecord>> {
        self.records.get_record(id)
    }

    fn set_highest_possible_id_in_use(&self, id: u64) {
        self.records.set_highest_possible_id_in_use(id)
    }

    fn highest_possible_id_in_use(&self) -> u64 {
        self.records.highest_possible_id_in_use()
    }
}

impl NodeStore for MemoryNodeStore {
    fn dynamic_label_store(&self) -> &DynamicStore {
        &self.labels
    }
}

/// Property store with string and array value stores.
pub struct MemoryPropertyStore {
    pub records: MemoryRecordStore<PropertyRecord>,
    pub strings: MemoryRecordStore<DynamicRecord>,
    pub arrays: MemoryRecordStore<DynamicRecord>,
}

impl MemoryPropertyStore {
    pub fn new(journal: &Journal) -> Self {
        Self {
            records: MemoryRecordStore::new(IdType::Property, journal.clone()),
            strings: MemoryRecordStore::new(IdType::StringBlock, journal.clone()),
            arrays: MemoryRecordStore::new(IdType::ArrayBlock, journal.clone()),
        }
    }

    fn value_store(&self, store: ValueStore) -> &MemoryRecordStore<DynamicRecord> {
        match store {
            ValueStore::Strings => &self.strings,
            ValueStore::Arrays => &self.arrays,
        }
    }
}

impl RecordStore<PropertyRecord> for MemoryPropertyStore {
    fn id_type(&self) -> IdType {
        IdType::Property
    }

    fn update_record(
        &self,
        record: &PropertyRecord,
        ids: &mut dyn IdUpdateListener,
    ) -> Result<()> {
        for block in &record.blocks {
            if let Some(store) = block.value_store() {
                write_dynamic(self.value_store(store), &block.value_records, ids)?;
            }
        }
        for freed in record.deleted_records.iter().filter(|r| r.id != NO_ID) {
            ids.mark_id_as_unused(IdType::StringBlock, freed.id);
        }
        self.records.update_record(record, ids)
    }

    fn get_record(&self, id: u64) -> Result<Option<PropertyRecord>> {
        self.records.get_record(id)
    }

    fn set_highest_possible_id_in_use(&self, id: u64) {
        self.records.set_highest_possible_id_in_use(id)
    }

    fn highest_possible_id_in_use(&self) -> u64 {
        self.records.highest_possible_id_in_use()
    }
}

impl PropertyStore for MemoryPropertyStore {
    fn string_store(&self) -> &DynamicStore {
        &self.strings
    }

    fn array_store(&self) -> &DynamicStore {
        &self.arrays
    }

    /// Records are returned in id order.
    fn entity_properties(&self, owner: PropertyOwner) -> Result<Vec<PropertyRecord>> {
        Ok(self
            .records
            .in_use_records()
            .into_iter()
            .filter(|r| r.owner == owner)
            .collect())
    }
}

/// Token store resolving names from the dynamic name records.
pub struct MemoryTokenStore {
    pub records: MemoryRecordStore<TokenRecord>,
    pub names: MemoryRecordStore<DynamicRecord>,
}

impl MemoryTokenStore {
    pub fn new(id_type: IdType, name_type: IdType, journal: &Journal) -> Self {
        Self {
            records: MemoryRecordStore::new(id_type, journal.clone()),
            names: MemoryRecordStore::new(name_type, journal.clone()),
        }
    }
}

impl RecordStore<TokenRecord> for MemoryTokenStore {
    fn id_type(&self) -> IdType {
        self.records.id_type()
    }

    fn update_record(&self, record: &TokenRecord, ids: &mut dyn IdUpdateListener) -> Result<()> {
        write_dynamic(&self.names, &record.name_records, ids)?;
        self.records.update_record(record, ids)
    }

    fn get_record(&self, id: u64) -> Result<Option<TokenRecord>> {
        self.records.get_record(id)
    }

    fn set_highest_possible_id_in_use(&self, id: u64) {
        self.records.set_highest_possible_id_in_use(id)
    }

    fn highest_possible_id_in_use(&self) -> u64 {
        self.records.highest_possible_id_in_use()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get_token(&self, id: u64) -> Result<NamedToken> {
        let record = match self.records.record(id) {
            Some(record) if record.in_use => record,
            _ => return Err(ApplyError::NotFound),
        };
        let mut raw = Vec::new();
        for name in &record.name_records {
            let stored = self.names.record(name.id).unwrap_or_else(|| name.clone());
            raw.extend_from_slice(&stored.data);
        }
        let name = String::from_utf8(raw)
            .map_err(|_| ApplyError::Corruption("token name is not valid UTF-8"))?;
        let id = u32::try_from(id).map_err(|_| ApplyError::Invalid("token id out of range"))?;
        Ok(NamedToken::new(name, id))
    }

    fn name_store(&self) -> &DynamicStore {
        &self.names
    }
}

/// Graph-level fields kept in atomics.
pub struct MemoryMetaDataStore {
    next_prop: AtomicU64,
    constraint_tx: AtomicU64,
    journal: Journal,
}

impl MemoryMetaDataStore {
    pub fn new(journal: &Journal) -> Self {
        Self {
            next_prop: AtomicU64::new(NO_ID),
            constraint_tx: AtomicU64::new(0),
            journal: journal.clone(),
        }
    }
}

impl MetaDataStore for MemoryMetaDataStore {
    fn set_graph_next_prop(&self, prop: u64) -> Result<()> {
        self.journal.record(Event::GraphNextProp(prop));
        self.next_prop.store(prop, Ordering::Release);
        Ok(())
    }

    fn graph_next_prop(&self) -> u64 {
        self.next_prop.load(Ordering::Acquire)
    }

    fn set_latest_constraint_introducing_tx(&self, tx: TxId) -> Result<()> {
        self.journal.record(Event::ConstraintTx(tx));
        self.constraint_tx.store(tx.0, Ordering::Release);
        Ok(())
    }

    fn latest_constraint_introducing_tx(&self) -> TxId {
        TxId(self.constraint_tx.load(Ordering::Acquire))
    }
}

/// One in-memory store of every kind, sharing a journal.
pub struct MemoryStores {
    pub journal: Journal,
    pub nodes: Arc<MemoryNodeStore>,
    pub relationships: Arc<MemoryRecordStore<RelationshipRecord>>,
    pub relationship_groups: Arc<MemoryRecordStore<RelationshipGroupRecord>>,
    pub properties: Arc<MemoryPropertyStore>,
    pub label_tokens: Arc<MemoryTokenStore>,
    pub property_key_tokens: Arc<MemoryTokenStore>,
    pub relationship_type_tokens: Arc<MemoryTokenStore>,
    pub schema: Arc<MemoryRecordStore<SchemaRecord>>,
    pub meta_data: Arc<MemoryMetaDataStore>,
}

impl MemoryStores {
    pub fn new(journal: Journal) -> Self {
        Self {
            nodes: Arc::new(MemoryNodeStore::new(&journal)),
            relationships: Arc::new(MemoryRecordStore::new(
                IdType::Relationship,
                journal.clone(),
            )),
            relationship_groups: Arc::new(MemoryRecordStore::new(
                IdType::RelationshipGroup,
                journal.clone(),
            )),
            properties: Arc::new(MemoryPropertyStore::new(&journal)),
            label_tokens: Arc::new(MemoryTokenStore::new(
                IdType::LabelToken,
                IdType::LabelTokenName,
                &journal,
            )),
            property_key_tokens: Arc::new(MemoryTokenStore::new(
                IdType::PropertyKeyToken,
                IdType::PropertyKeyTokenName,
                &journal,
            )),
            relationship_type_tokens: Arc::new(MemoryTokenStore::new(
                IdType::RelationshipTypeToken,
                IdType::RelationshipTypeTokenName,
                &journal,
            )),
            schema: Arc::new(MemoryRecordStore::new(IdType::Schema, journal.clone())),
            meta_data: Arc::new(MemoryMetaDataStore::new(&journal)),
            journal,
        }
    }

    /// Trait-object view handed to the engine.
    pub fn stores(&self) -> Stores {
        Stores {
            nodes: self.nodes.clone(),
            relationships: self.relationships.clone(),
            relationship_groups: self.relationship_groups.clone(),
            properties: self.properties.clone(),
            label_tokens: self.label_tokens.clone(),
            property_key_tokens: self.property_key_tokens.clone(),
            relationship_type_tokens: self.relationship_type_tokens.clone(),
            schema: self.schema.clone(),
            meta_data: self.meta_data.clone(),
        }
    }
}

impl Default for MemoryStores {
    fn default() -> Self {
        Self::new(Journal::new())
    }
}
