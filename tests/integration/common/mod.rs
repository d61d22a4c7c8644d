#![allow(dead_code)]

use std::sync::Arc;

use sombra_apply::cache::{StorageCaches, TokenKind};
use sombra_apply::command::{Command, CommandBatch};
use sombra_apply::metrics::CounterMetrics;
use sombra_apply::record::{
    DynamicRecord, LabelField, NodeRecord, PropertyBlock, PropertyRecord, PropertyValue,
    SchemaRecord,
};
use sombra_apply::schema::{IndexDescriptor, SchemaDescriptor, SchemaRule};
use sombra_apply::types::{IdType, LabelId, PropId, TxId};
use sombra_apply::{ApplyEngine, ApplyMode, ApplyOptions, Result};
use sombra_apply_testkit::{
    init_tracing, Event, Journal, MemoryIndexingService, MemoryStores, RecordingCache,
    RecordingIdGenerator, RecordingLabelIndex, RecordingLocks,
};

pub const TX: TxId = TxId(55555);

/// Engine wired to in-memory collaborators sharing one journal.
pub struct Fixture {
    pub journal: Journal,
    pub stores: MemoryStores,
    pub indexing: Arc<MemoryIndexingService>,
    pub labels: Arc<RecordingLabelIndex>,
    pub caches: StorageCaches,
    pub locks: Arc<RecordingLocks>,
    pub metrics: Arc<CounterMetrics>,
    pub generators: Vec<(IdType, Arc<RecordingIdGenerator>)>,
    pub engine: ApplyEngine,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_options(ApplyOptions::default())
    }

    pub fn with_options(options: ApplyOptions) -> Self {
        init_tracing();
        let journal = Journal::new();
        let stores = MemoryStores::new(journal.clone());
        let indexing = Arc::new(MemoryIndexingService::new(&journal));
        let labels = Arc::new(RecordingLabelIndex::new(&journal));
        let caches = StorageCaches::new();
        let cache = Arc::new(RecordingCache::new(caches.clone(), &journal));
        let locks = Arc::new(RecordingLocks::new(&journal));
        let metrics = Arc::new(CounterMetrics::default());
        let generators: Vec<(IdType, Arc<RecordingIdGenerator>)> = [
            IdType::Node,
            IdType::NodeLabels,
            IdType::Property,
            IdType::LabelToken,
            IdType::Schema,
        ]
        .into_iter()
        .map(|id_type| (id_type, Arc::new(RecordingIdGenerator::new(id_type, &journal))))
        .collect();
        let mut builder = ApplyEngine::builder(stores.stores(), indexing.clone(), labels.clone())
            .caches(caches.clone())
            .cache_access(cache)
            .locks(locks.clone())
            .options(options.metrics(metrics.clone()));
        for (id_type, generator) in &generators {
            builder = builder.id_generator(*id_type, generator.clone());
        }
        Self {
            journal,
            stores,
            indexing,
            labels,
            caches,
            locks,
            metrics,
            generators,
            engine: builder.build(),
        }
    }

    pub fn apply(&self, commands: Vec<Command>, mode: ApplyMode) -> Result<bool> {
        self.engine.apply(&CommandBatch::new(TX, commands), mode)
    }

    pub fn events(&self) -> Vec<Event> {
        self.journal.events()
    }

    pub fn generator(&self, id_type: IdType) -> &RecordingIdGenerator {
        self.generators
            .iter()
            .find(|(t, _)| *t == id_type)
            .map(|(_, g)| g.as_ref())
            .expect("generator registered")
    }

    pub fn token(&self, kind: TokenKind, id: u32) -> Option<String> {
        self.caches.tokens.get(kind, id).map(|t| t.name)
    }
}

pub fn labels(ids: &[u32]) -> Vec<LabelId> {
    ids.iter().copied().map(LabelId).collect()
}

pub fn created_node(id: u64, label_ids: &[u32]) -> Command {
    let mut after = NodeRecord::new(id);
    after.in_use = true;
    after.created = true;
    after.labels = LabelField::inline(&labels(label_ids));
    Command::node(NodeRecord::new(id), after)
}

pub fn relabelled_node(id: u64, before_labels: &[u32], after_labels: &[u32]) -> Command {
    let mut before = NodeRecord::new(id);
    before.in_use = true;
    before.labels = LabelField::inline(&labels(before_labels));
    let mut after = before.clone();
    after.labels = LabelField::inline(&labels(after_labels));
    Command::node(before, after)
}

pub fn node_property(record: u64, node: u64, props: &[(u32, PropertyValue)]) -> PropertyRecord {
    let mut prop = PropertyRecord::new(record);
    prop.in_use = true;
    prop.set_node_id(node);
    for (key, value) in props {
        prop.set(PropertyBlock::new(PropId(*key), value.clone()));
    }
    prop
}

pub fn created_property(record: u64, node: u64, props: &[(u32, PropertyValue)]) -> Command {
    let mut after = node_property(record, node, props);
    after.created = true;
    Command::property(PropertyRecord::new(record), after)
}

pub fn label_index(id: u64, label: u32, key: u32) -> IndexDescriptor {
    IndexDescriptor::for_schema(id, SchemaDescriptor::for_label(label, &[PropId(key)]))
}

pub fn create_rule(rule: SchemaRule) -> Command {
    let id = rule.id();
    let mut after = SchemaRecord::new(id).initialize(true, 7);
    after.created = true;
    Command::schema_rule(SchemaRecord::new(id), after, rule)
}

pub fn update_rule(rule: SchemaRule) -> Command {
    let id = rule.id();
    let before = SchemaRecord::new(id).initialize(true, 7);
    let after = SchemaRecord::new(id).initialize(true, 7);
    Command::schema_rule(before, after, rule)
}

pub fn delete_rule(rule: SchemaRule) -> Command {
    let id = rule.id();
    let before = SchemaRecord::new(id).initialize(true, 7);
    Command::schema_rule(before, SchemaRecord::new(id), rule)
}

pub fn dynamic(id: u64) -> DynamicRecord {
    DynamicRecord::in_use(id)
}
