use rustc_hash::FxHashMap;
use tracing::trace;

use crate::command::{
    BatchHandle, NodeCommand, PropertyCommand, RelationshipCommand, RelationshipGroupCommand,
    SchemaRuleCommand, TokenCommand,
};
use crate::metrics::ApplyMetrics;
use crate::record::{DynamicRecord, Record, ValueStore};
use crate::store::{RecordStore, Stores, TokenStore};
use crate::types::{IdType, Result, NO_ID};

use super::BatchApplier;

/// Raises allocator high-water marks to cover every id a replayed command
/// touches, before the record is written.
///
/// Covers the record itself, its secondary unit and the dynamic records it
/// references. Each id type is only raised when the batch goes past what was
/// already announced.
pub struct HighIdApplier<'a> {
    stores: &'a Stores,
    metrics: &'a dyn ApplyMetrics,
    announced: FxHashMap<IdType, u64>,
}

impl<'a> HighIdApplier<'a> {
    pub fn new(stores: &'a Stores, metrics: &'a dyn ApplyMetrics) -> Self {
        Self {
            stores,
            metrics,
            announced: FxHashMap::default(),
        }
    }

    /// Highest id announced per id type in this batch.
    pub fn announced(&self, id_type: IdType) -> Option<u64> {
        self.announced.get(&id_type).copied()
    }

    fn track<R, S>(&mut self, store: &S, id: u64)
    where
        R: Record,
        S: RecordStore<R> + ?Sized,
    {
        if id == NO_ID {
            return;
        }
        let id_type = store.id_type();
        if matches!(self.announced.get(&id_type), Some(&high) if high >= id) {
            return;
        }
        store.set_highest_possible_id_in_use(id);
        self.announced.insert(id_type, id);
        self.metrics.high_id_advanced(id_type);
        trace!(id_type = %id_type, id, "apply.high_id.advance");
    }

    fn track_record<R, S>(&mut self, store: &S, record: &R)
    where
        R: Record,
        S: RecordStore<R> + ?Sized,
    {
        let high = match record.secondary_unit_id() {
            Some(secondary) if secondary != NO_ID => record.id().max(secondary),
            _ => record.id(),
        };
        self.track::<R, S>(store, high);
    }

    fn track_dynamic<S>(&mut self, store: &S, records: &[DynamicRecord])
    where
        S: RecordStore<DynamicRecord> + ?Sized,
    {
        if let Some(high) = records.iter().map(|r| r.id).filter(|id| *id != NO_ID).max() {
            self.track::<DynamicRecord, S>(store, high);
        }
    }

    fn track_token(&mut self, store: &dyn TokenStore, command: &TokenCommand) {
        self.track_record(store, &command.after);
        self.track_dynamic(store.name_store(), &command.after.name_records);
    }
}

impl BatchApplier for HighIdApplier<'_> {
    fn visit_node(&mut self, command: &NodeCommand, _batch: BatchHandle) -> Result<bool> {
        let stores = self.stores;
        let nodes = stores.nodes.as_ref();
        self.track_record(nodes, &command.after);
        self.track_dynamic(nodes.dynamic_label_store(), command.after.labels.dynamic_records());
        Ok(false)
    }

    fn visit_relationship(
        &mut self,
        command: &RelationshipCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        let stores = self.stores;
        self.track_record(stores.relationships.as_ref(), &command.after);
        Ok(false)
    }

    fn visit_property(&mut self, command: &PropertyCommand, _batch: BatchHandle) -> Result<bool> {
        let stores = self.stores;
        let properties = stores.properties.as_ref();
        self.track_record(properties, &command.after);
        for block in &command.after.blocks {
            let store = match block.value_store() {
                Some(ValueStore::Strings) => properties.string_store(),
                Some(ValueStore::Arrays) => properties.array_store(),
                None => continue,
            };
            self.track_dynamic(store, &block.value_records);
        }
        Ok(false)
    }

    fn visit_relationship_group(
        &mut self,
        command: &RelationshipGroupCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        let stores = self.stores;
        self.track_record(stores.relationship_groups.as_ref(), &command.after);
        Ok(false)
    }

    fn visit_relationship_type_token(
        &mut self,
        command: &TokenCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        let stores = self.stores;
        self.track_token(stores.relationship_type_tokens.as_ref(), command);
        Ok(false)
    }

    fn visit_label_token(&mut self, command: &TokenCommand, _batch: BatchHandle) -> Result<bool> {
        let stores = self.stores;
        self.track_token(stores.label_tokens.as_ref(), command);
        Ok(false)
    }

    fn visit_property_key_token(
        &mut self,
        command: &TokenCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        let stores = self.stores;
        self.track_token(stores.property_key_tokens.as_ref(), command);
        Ok(false)
    }

    fn visit_schema_rule(
        &mut self,
        command: &SchemaRuleCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        let stores = self.stores;
        self.track_record(stores.schema.as_ref(), &command.after);
        Ok(false)
    }
}
