use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::cache::SchemaCache;
use crate::command::{BatchHandle, CommandMode, NodeCommand, PropertyCommand, SchemaRuleCommand};
use crate::index::{
    IndexActivator, IndexEntryUpdate, IndexUpdateListener, IndexUpdatesSync, IndexUpdatesWork,
    LabelUpdateSync, LabelUpdateWork, NodeLabelUpdate,
};
use crate::metrics::ApplyMetrics;
use crate::record::{Labels, PropertyOwner, PropertyRecord, PropertyValue};
use crate::schema::{EntityType, IndexDescriptor, SchemaRule};
use crate::store::Stores;
use crate::sync::WorkTicket;
use crate::types::{NodeId, PropId, Result, TxId};

use super::BatchApplier;

type PropertyMap = BTreeMap<PropId, PropertyValue>;

/// Collaborators shared by every index applier of an engine.
#[derive(Clone, Copy)]
pub struct IndexApplierContext<'a> {
    pub stores: &'a Stores,
    pub schema: &'a SchemaCache,
    pub indexing: &'a dyn IndexUpdateListener,
    pub label_sync: &'a LabelUpdateSync,
    pub index_sync: &'a IndexUpdatesSync,
    pub activator: &'a IndexActivator,
    pub metrics: &'a dyn ApplyMetrics,
    pub flush_before_schema_changes: bool,
}

/// Maintains the label index and property indexes for one batch and drives
/// index lifecycle transitions.
///
/// Label and property changes are buffered per entity and turned into work
/// units when the batch closes, or earlier when an index is about to be
/// created, activated or dropped. Both label and index entry updates are
/// computed from the current store state (after) and the first before-image
/// seen in the batch, so a command whose write failed contributes nothing.
pub struct IndexBatchApplier<'a> {
    ctx: IndexApplierContext<'a>,
    tx: Option<TxId>,
    entities: BTreeSet<PropertyOwner>,
    labels_before: FxHashMap<NodeId, Labels>,
    properties_before: FxHashMap<u64, PropertyRecord>,
}

impl<'a> IndexBatchApplier<'a> {
    pub fn new(ctx: IndexApplierContext<'a>) -> Self {
        Self {
            ctx,
            tx: None,
            entities: BTreeSet::new(),
            labels_before: FxHashMap::default(),
            properties_before: FxHashMap::default(),
        }
    }

    /// Submits buffered label and index work and waits for both.
    pub fn flush(&mut self) -> Result<()> {
        let label_updates = self.label_updates()?;
        let label_ticket: Option<WorkTicket> = if label_updates.is_empty() {
            None
        } else {
            self.ctx.metrics.label_updates_submitted(label_updates.len());
            Some(
                self.ctx
                    .label_sync
                    .apply_async(LabelUpdateWork::new(label_updates)),
            )
        };
        let indexed = self.flush_index_updates();
        let labelled = label_ticket.map_or(Ok(()), WorkTicket::wait);
        indexed?;
        labelled
    }

    /// Label changes of every visited node whose stored labels now differ
    /// from the ones it had when first seen.
    fn label_updates(&self) -> Result<Vec<NodeLabelUpdate>> {
        let Some(tx) = self.tx else {
            return Ok(Vec::new());
        };
        let mut updates = Vec::new();
        for (node, before) in &self.labels_before {
            let after = self.stored_labels(*node)?;
            if *before != after {
                updates.push(NodeLabelUpdate {
                    node: *node,
                    before: before.clone(),
                    after,
                    tx,
                });
            }
        }
        Ok(updates)
    }

    fn stored_labels(&self, node: NodeId) -> Result<Labels> {
        match self.ctx.stores.nodes.get_record(node.0)? {
            Some(record) if record.in_use => record.labels.labels(),
            _ => Ok(Labels::new()),
        }
    }

    fn flush_index_updates(&mut self) -> Result<()> {
        let entities = mem::take(&mut self.entities);
        let labels_before = mem::take(&mut self.labels_before);
        let properties_before = mem::take(&mut self.properties_before);
        if entities.is_empty() || self.ctx.schema.indexes().is_empty() {
            return Ok(());
        }
        let mut updates = Vec::new();
        for owner in entities {
            match owner {
                PropertyOwner::Node(node) => {
                    self.node_updates(node, &labels_before, &properties_before, &mut updates)?
                }
                PropertyOwner::Relationship(_) => {
                    self.relationship_updates(owner, &properties_before, &mut updates)?
                }
                PropertyOwner::Unset => {}
            }
        }
        if updates.is_empty() {
            return Ok(());
        }
        debug!(updates = updates.len(), "apply.index.entry_updates");
        self.ctx.metrics.index_updates_submitted(updates.len());
        self.ctx.index_sync.apply(IndexUpdatesWork::new(updates))
    }

    fn node_updates(
        &self,
        node: NodeId,
        labels_before: &FxHashMap<NodeId, Labels>,
        properties_before: &FxHashMap<u64, PropertyRecord>,
        out: &mut Vec<IndexEntryUpdate>,
    ) -> Result<()> {
        let after_labels = self.stored_labels(node)?;
        let before_labels = labels_before
            .get(&node)
            .cloned()
            .unwrap_or_else(|| after_labels.clone());
        let owner = PropertyOwner::Node(node);
        let (before, after) = self.property_maps(owner, properties_before)?;
        let tokens: BTreeSet<u32> = before_labels
            .iter()
            .chain(after_labels.iter())
            .map(|label| label.0)
            .collect();
        for token in tokens {
            let had = before_labels.iter().any(|l| l.0 == token);
            let has = after_labels.iter().any(|l| l.0 == token);
            for index in self.ctx.schema.indexes_for(EntityType::Node, token) {
                let old = if had { index_values(&index, &before) } else { None };
                let new = if has { index_values(&index, &after) } else { None };
                push_update(&index, node.0, old, new, out);
            }
        }
        Ok(())
    }

    fn relationship_updates(
        &self,
        owner: PropertyOwner,
        properties_before: &FxHashMap<u64, PropertyRecord>,
        out: &mut Vec<IndexEntryUpdate>,
    ) -> Result<()> {
        let PropertyOwner::Relationship(rel) = owner else {
            return Ok(());
        };
        let Some(record) = self.ctx.stores.relationships.get_record(rel.0)? else {
            return Ok(());
        };
        let (before, after) = self.property_maps(owner, properties_before)?;
        for index in self
            .ctx
            .schema
            .indexes_for(EntityType::Relationship, record.rel_type.0)
        {
            let old = index_values(&index, &before);
            let new = if record.in_use {
                index_values(&index, &after)
            } else {
                None
            };
            push_update(&index, rel.0, old, new, out);
        }
        Ok(())
    }

    /// Properties of `owner` as of the start of the batch and as stored now.
    fn property_maps(
        &self,
        owner: PropertyOwner,
        properties_before: &FxHashMap<u64, PropertyRecord>,
    ) -> Result<(PropertyMap, PropertyMap)> {
        let current = self.ctx.stores.properties.entity_properties(owner)?;
        let after = collect_properties(current.iter());
        let untouched = current
            .iter()
            .filter(|record| !properties_before.contains_key(&record.id));
        let replaced = properties_before
            .values()
            .filter(|record| record.in_use && record.owner == owner);
        let before = collect_properties(untouched.chain(replaced));
        Ok((before, after))
    }
}

fn collect_properties<'r>(records: impl Iterator<Item = &'r PropertyRecord>) -> PropertyMap {
    let mut out = PropertyMap::new();
    for record in records {
        for block in &record.blocks {
            out.insert(block.key, block.value.clone());
        }
    }
    out
}

fn index_values(index: &IndexDescriptor, properties: &PropertyMap) -> Option<Vec<PropertyValue>> {
    index
        .schema
        .property_keys
        .iter()
        .map(|key| properties.get(key).cloned())
        .collect()
}

fn push_update(
    index: &IndexDescriptor,
    entity: u64,
    old: Option<Vec<PropertyValue>>,
    new: Option<Vec<PropertyValue>>,
    out: &mut Vec<IndexEntryUpdate>,
) {
    let update = match (old, new) {
        (None, Some(values)) => IndexEntryUpdate::Added {
            index: index.id,
            entity,
            values,
        },
        (Some(values), None) => IndexEntryUpdate::Removed {
            index: index.id,
            entity,
            values,
        },
        (Some(before), Some(after)) if before != after => IndexEntryUpdate::Changed {
            index: index.id,
            entity,
            before,
            after,
        },
        _ => return,
    };
    out.push(update);
}

impl BatchApplier for IndexBatchApplier<'_> {
    fn visit_node(&mut self, command: &NodeCommand, batch: BatchHandle) -> Result<bool> {
        let node = command.after.node_id();
        let before = if command.before.in_use {
            command.before.labels.labels()?
        } else {
            Labels::new()
        };
        self.tx = Some(batch.tx_id);
        self.entities.insert(PropertyOwner::Node(node));
        self.labels_before.entry(node).or_insert(before);
        Ok(false)
    }

    fn visit_property(&mut self, command: &PropertyCommand, _batch: BatchHandle) -> Result<bool> {
        for owner in [command.before.owner, command.after.owner] {
            if owner != PropertyOwner::Unset {
                self.entities.insert(owner);
            }
        }
        self.properties_before
            .entry(command.key())
            .or_insert_with(|| command.before.clone());
        Ok(false)
    }

    fn visit_schema_rule(
        &mut self,
        command: &SchemaRuleCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        let SchemaRule::Index(index) = &command.rule else {
            return Ok(false);
        };
        if self.ctx.flush_before_schema_changes {
            self.flush()?;
        }
        match command.mode() {
            CommandMode::Create => {
                debug!(index = index.id, "apply.index.create");
                self.ctx.indexing.create_indexes(std::slice::from_ref(index))?;
            }
            CommandMode::Update => {
                if index.is_constraint_backed() {
                    self.ctx.activator.activate_index(index);
                }
            }
            CommandMode::Delete => {
                debug!(index = index.id, "apply.index.drop");
                self.ctx.indexing.drop_index(index)?;
                self.ctx.activator.index_dropped(index.id);
            }
        }
        Ok(false)
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}
