//! Store collaborators the apply engine writes through.
//!
//! Physical layout and allocation live behind these traits; the engine only
//! persists after-images, advances allocator high-water marks and reads back
//! what it needs for derived structures.

#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::record::{
    DynamicRecord, NamedToken, NodeRecord, PropertyOwner, PropertyRecord, Record,
    RelationshipGroupRecord, RelationshipRecord, SchemaRecord, TokenRecord,
};
use crate::types::{IdType, Result, TxId};

/// Receives id usage changes produced by a record write.
pub trait IdUpdateListener {
    fn mark_id_as_used(&mut self, id_type: IdType, id: u64);
    fn mark_id_as_unused(&mut self, id_type: IdType, id: u64);
}

/// Listener that drops every update.
#[derive(Debug, Default)]
pub struct IgnoreIdUpdates;

impl IdUpdateListener for IgnoreIdUpdates {
    fn mark_id_as_used(&mut self, _id_type: IdType, _id: u64) {}
    fn mark_id_as_unused(&mut self, _id_type: IdType, _id: u64) {}
}

/// A store of fixed-size records of one kind.
pub trait RecordStore<R: Record>: Send + Sync {
    fn id_type(&self) -> IdType;

    /// Persists `record`, reporting used and freed ids (including the
    /// record's dynamic chains) to `ids`.
    fn update_record(&self, record: &R, ids: &mut dyn IdUpdateListener) -> Result<()>;

    fn get_record(&self, id: u64) -> Result<Option<R>>;

    /// Raises the allocator high-water mark so `id` is never handed out again.
    /// Lower ids than the current mark leave it unchanged.
    fn set_highest_possible_id_in_use(&self, id: u64);

    fn highest_possible_id_in_use(&self) -> u64;
}

pub type DynamicStore = dyn RecordStore<DynamicRecord>;

pub trait NodeStore: RecordStore<NodeRecord> {
    fn dynamic_label_store(&self) -> &DynamicStore;
}

pub trait PropertyStore: RecordStore<PropertyRecord> {
    fn string_store(&self) -> &DynamicStore;
    fn array_store(&self) -> &DynamicStore;

    /// Property records currently owned by `owner`, in chain order.
    fn entity_properties(&self, owner: PropertyOwner) -> Result<Vec<PropertyRecord>>;
}

pub trait TokenStore: RecordStore<TokenRecord> {
    fn get_token(&self, id: u64) -> Result<NamedToken>;
    fn name_store(&self) -> &DynamicStore;
}

pub type RelationshipStore = dyn RecordStore<RelationshipRecord>;
pub type RelationshipGroupStore = dyn RecordStore<RelationshipGroupRecord>;
pub type SchemaStore = dyn RecordStore<SchemaRecord>;

/// Singleton graph-level fields.
pub trait MetaDataStore: Send + Sync {
    fn set_graph_next_prop(&self, prop: u64) -> Result<()>;
    fn graph_next_prop(&self) -> u64;
    fn set_latest_constraint_introducing_tx(&self, tx: TxId) -> Result<()>;
    fn latest_constraint_introducing_tx(&self) -> TxId;
}

/// Every store a batch may touch.
#[derive(Clone)]
pub struct Stores {
    pub nodes: Arc<dyn NodeStore>,
    pub relationships: Arc<RelationshipStore>,
    pub relationship_groups: Arc<RelationshipGroupStore>,
    pub properties: Arc<dyn PropertyStore>,
    pub label_tokens: Arc<dyn TokenStore>,
    pub property_key_tokens: Arc<dyn TokenStore>,
    pub relationship_type_tokens: Arc<dyn TokenStore>,
    pub schema: Arc<SchemaStore>,
    pub meta_data: Arc<dyn MetaDataStore>,
}
