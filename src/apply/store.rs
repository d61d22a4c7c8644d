use tracing::{debug, trace};

use crate::cache::CacheAccess;
use crate::command::{
    BatchHandle, CommandMode, MetaDataCommand, NodeCommand, PropertyCommand, RelationshipCommand,
    RelationshipGroupCommand, SchemaRuleCommand, TokenCommand,
};
use crate::id::{BufferedIdUpdates, IdGeneratorSyncs};
use crate::lock::{Lock, LockService, LockType};
use crate::metrics::ApplyMetrics;
use crate::record::NamedToken;
use crate::schema::SchemaRule;
use crate::store::{Stores, TokenStore};
use crate::types::Result;

use super::BatchApplier;

/// Writes after-images into the record stores.
///
/// Node records, and property records owned by a node, are written under the
/// node's write lock. Created tokens and changed schema rules are announced
/// to the cache; updated tokens are too when [`Self::refreshing_tokens`] is
/// set. Id usage reported by the stores is buffered and handed to
/// the allocator synchronizers when the batch closes.
pub struct StoreApplier<'a> {
    stores: &'a Stores,
    locks: &'a dyn LockService,
    cache: &'a dyn CacheAccess,
    metrics: &'a dyn ApplyMetrics,
    id_syncs: Option<&'a IdGeneratorSyncs>,
    refresh_tokens: bool,
    ids: BufferedIdUpdates,
}

impl<'a> StoreApplier<'a> {
    pub fn new(
        stores: &'a Stores,
        locks: &'a dyn LockService,
        cache: &'a dyn CacheAccess,
        metrics: &'a dyn ApplyMetrics,
    ) -> Self {
        Self {
            stores,
            locks,
            cache,
            metrics,
            id_syncs: None,
            refresh_tokens: false,
            ids: BufferedIdUpdates::new(),
        }
    }

    /// Routes buffered id updates to `syncs` on close.
    pub fn with_id_syncs(mut self, syncs: &'a IdGeneratorSyncs) -> Self {
        self.id_syncs = Some(syncs);
        self
    }

    /// Re-announces tokens that stay in use after an update.
    ///
    /// Needed whenever a cache invalidation applier runs ahead of this one,
    /// since it evicts every token a command touches.
    pub fn refreshing_tokens(mut self, refresh: bool) -> Self {
        self.refresh_tokens = refresh;
        self
    }

    /// Id updates buffered so far.
    pub fn id_updates(&self) -> &BufferedIdUpdates {
        &self.ids
    }

    fn apply_token(
        &mut self,
        store: &dyn TokenStore,
        command: &TokenCommand,
    ) -> Result<Option<NamedToken>> {
        store.update_record(&command.after, &mut self.ids)?;
        let created = !command.before.in_use;
        if !command.after.in_use || !(created || self.refresh_tokens) {
            return Ok(None);
        }
        let token = store.get_token(command.after.id)?;
        trace!(token = token.id, name = %token.name, created, "apply.store.token_cached");
        Ok(Some(token))
    }
}

impl BatchApplier for StoreApplier<'_> {
    fn visit_node(&mut self, command: &NodeCommand, _batch: BatchHandle) -> Result<bool> {
        let _lock = self.locks.acquire_node_lock(command.key(), LockType::Write);
        let (before, after) = (&command.before, &command.after);
        if before.in_use && after.in_use && before.dense != after.dense {
            debug!(
                node = command.key(),
                dense = command.after.dense,
                "apply.store.node.dense_transition"
            );
            self.metrics.dense_transition();
        }
        self.stores.nodes.update_record(&command.after, &mut self.ids)?;
        Ok(false)
    }

    fn visit_relationship(
        &mut self,
        command: &RelationshipCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        self.stores
            .relationships
            .update_record(&command.after, &mut self.ids)?;
        Ok(false)
    }

    fn visit_property(&mut self, command: &PropertyCommand, _batch: BatchHandle) -> Result<bool> {
        let owner = command.after.node_id().or_else(|| command.before.node_id());
        let _lock = match owner {
            Some(node) => self.locks.acquire_node_lock(node.0, LockType::Write),
            None => Lock::none(),
        };
        self.stores
            .properties
            .update_record(&command.after, &mut self.ids)?;
        Ok(false)
    }

    fn visit_relationship_group(
        &mut self,
        command: &RelationshipGroupCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        self.stores
            .relationship_groups
            .update_record(&command.after, &mut self.ids)?;
        Ok(false)
    }

    fn visit_relationship_type_token(
        &mut self,
        command: &TokenCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        let stores = self.stores;
        if let Some(token) = self.apply_token(stores.relationship_type_tokens.as_ref(), command)? {
            self.cache.add_relationship_type_token(token);
        }
        Ok(false)
    }

    fn visit_label_token(&mut self, command: &TokenCommand, _batch: BatchHandle) -> Result<bool> {
        let stores = self.stores;
        if let Some(token) = self.apply_token(stores.label_tokens.as_ref(), command)? {
            self.cache.add_label_token(token);
        }
        Ok(false)
    }

    fn visit_property_key_token(
        &mut self,
        command: &TokenCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        let stores = self.stores;
        if let Some(token) = self.apply_token(stores.property_key_tokens.as_ref(), command)? {
            self.cache.add_property_key_token(token);
        }
        Ok(false)
    }

    fn visit_schema_rule(
        &mut self,
        command: &SchemaRuleCommand,
        batch: BatchHandle,
    ) -> Result<bool> {
        self.stores.schema.update_record(&command.after, &mut self.ids)?;
        match command.mode() {
            CommandMode::Delete => {
                debug!(rule = command.key(), "apply.store.schema.removed");
                self.cache.remove_schema_rule_from_cache(command.key());
            }
            CommandMode::Create | CommandMode::Update => {
                if let SchemaRule::Constraint(constraint) = &command.rule {
                    if constraint.kind.enforces_uniqueness() {
                        self.stores
                            .meta_data
                            .set_latest_constraint_introducing_tx(batch.tx_id)?;
                        debug!(
                            rule = command.key(),
                            tx = %batch.tx_id,
                            "apply.store.schema.constraint_tx"
                        );
                    }
                }
                self.cache.add_schema_rule(&command.rule);
            }
        }
        Ok(false)
    }

    fn visit_meta_data(&mut self, command: &MetaDataCommand, _batch: BatchHandle) -> Result<bool> {
        self.stores
            .meta_data
            .set_graph_next_prop(command.after.next_prop)?;
        Ok(false)
    }

    fn close(&mut self) -> Result<()> {
        let Some(syncs) = self.id_syncs else {
            return Ok(());
        };
        if self.ids.is_empty() {
            return Ok(());
        }
        syncs.submit(&mut self.ids)
    }
}
