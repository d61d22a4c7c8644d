//! In-memory schema and token caches maintained by the appliers.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::record::NamedToken;
use crate::schema::{ConstraintRule, EntityType, IndexDescriptor, SchemaRule};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TokenKind {
    Label,
    PropertyKey,
    RelationshipType,
}

/// Cache signals emitted while applying commands.
pub trait CacheAccess: Send + Sync {
    fn add_schema_rule(&self, rule: &SchemaRule);
    fn remove_schema_rule_from_cache(&self, id: u64);
    fn add_label_token(&self, token: NamedToken);
    fn add_property_key_token(&self, token: NamedToken);
    fn add_relationship_type_token(&self, token: NamedToken);
    fn remove_token_from_cache(&self, kind: TokenKind, id: u32);
}

/// Monotonic counter bumped on every schema cache change.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct SchemaEpoch(pub u64);

/// Rules known to the engine, keyed by rule id.
#[derive(Default)]
pub struct SchemaCache {
    rules: RwLock<FxHashMap<u64, SchemaRule>>,
    epoch: AtomicU64,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> SchemaEpoch {
        SchemaEpoch(self.epoch.load(Ordering::SeqCst))
    }

    pub fn add(&self, rule: SchemaRule) {
        self.rules.write().insert(rule.id(), rule);
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn remove(&self, id: u64) -> Option<SchemaRule> {
        let removed = self.rules.write().remove(&id);
        if removed.is_some() {
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    pub fn get(&self, id: u64) -> Option<SchemaRule> {
        self.rules.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Index rules defined over `entity_token` of the given entity kind, by id.
    pub fn indexes_for(&self, entity: EntityType, entity_token: u32) -> Vec<IndexDescriptor> {
        let rules = self.rules.read();
        let mut out: Vec<IndexDescriptor> = rules
            .values()
            .filter_map(SchemaRule::as_index)
            .filter(|index| {
                index.schema.entity == entity && index.schema.entity_token == entity_token
            })
            .cloned()
            .collect();
        out.sort_by_key(|index| index.id);
        out
    }

    pub fn indexes(&self) -> Vec<IndexDescriptor> {
        let rules = self.rules.read();
        let mut out: Vec<IndexDescriptor> =
            rules.values().filter_map(SchemaRule::as_index).cloned().collect();
        out.sort_by_key(|index| index.id);
        out
    }

    pub fn constraints(&self) -> Vec<ConstraintRule> {
        let rules = self.rules.read();
        let mut out: Vec<ConstraintRule> = rules
            .values()
            .filter_map(SchemaRule::as_constraint)
            .cloned()
            .collect();
        out.sort_by_key(|constraint| constraint.id);
        out
    }
}

#[derive(Default)]
struct TokenHolder {
    by_id: FxHashMap<u32, NamedToken>,
    by_name: FxHashMap<String, u32>,
}

/// Resolved tokens of all three kinds.
#[derive(Default)]
pub struct TokenHolders {
    labels: RwLock<TokenHolder>,
    property_keys: RwLock<TokenHolder>,
    relationship_types: RwLock<TokenHolder>,
}

impl TokenHolders {
    pub fn new() -> Self {
        Self::default()
    }

    fn holder(&self, kind: TokenKind) -> &RwLock<TokenHolder> {
        match kind {
            TokenKind::Label => &self.labels,
            TokenKind::PropertyKey => &self.property_keys,
            TokenKind::RelationshipType => &self.relationship_types,
        }
    }

    pub fn add(&self, kind: TokenKind, token: NamedToken) {
        let mut holder = self.holder(kind).write();
        if let Some(previous) = holder.by_id.get(&token.id) {
            let stale = previous.name.clone();
            holder.by_name.remove(&stale);
        }
        holder.by_name.insert(token.name.clone(), token.id);
        holder.by_id.insert(token.id, token);
    }

    pub fn remove(&self, kind: TokenKind, id: u32) -> Option<NamedToken> {
        let mut holder = self.holder(kind).write();
        let removed = holder.by_id.remove(&id)?;
        holder.by_name.remove(&removed.name);
        Some(removed)
    }

    pub fn get(&self, kind: TokenKind, id: u32) -> Option<NamedToken> {
        self.holder(kind).read().by_id.get(&id).cloned()
    }

    pub fn id_of(&self, kind: TokenKind, name: &str) -> Option<u32> {
        self.holder(kind).read().by_name.get(name).copied()
    }

    pub fn len(&self, kind: TokenKind) -> usize {
        self.holder(kind).read().by_id.len()
    }
}

/// Schema and token caches behind one [`CacheAccess`] handle.
#[derive(Clone, Default)]
pub struct StorageCaches {
    pub schema: Arc<SchemaCache>,
    pub tokens: Arc<TokenHolders>,
}

impl StorageCaches {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheAccess for StorageCaches {
    fn add_schema_rule(&self, rule: &SchemaRule) {
        trace!(rule = rule.id(), "cache.schema.add");
        self.schema.add(rule.clone());
    }

    fn remove_schema_rule_from_cache(&self, id: u64) {
        trace!(rule = id, "cache.schema.remove");
        self.schema.remove(id);
    }

    fn add_label_token(&self, token: NamedToken) {
        self.tokens.add(TokenKind::Label, token);
    }

    fn add_property_key_token(&self, token: NamedToken) {
        self.tokens.add(TokenKind::PropertyKey, token);
    }

    fn add_relationship_type_token(&self, token: NamedToken) {
        self.tokens.add(TokenKind::RelationshipType, token);
    }

    fn remove_token_from_cache(&self, kind: TokenKind, id: u32) {
        trace!(kind = ?kind, token = id, "cache.token.remove");
        self.tokens.remove(kind, id);
    }
}
