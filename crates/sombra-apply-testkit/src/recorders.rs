use std::sync::atomic::{AtomicBool, Ordering};

use sombra_apply::cache::{CacheAccess, StorageCaches, TokenKind};
use sombra_apply::id::{FreeListIdGenerator, IdGenerator};
use sombra_apply::lock::{Lock, LockService, LockType, StripedLockService};
use sombra_apply::record::NamedToken;
use sombra_apply::schema::SchemaRule;
use sombra_apply::types::{ApplyError, IdType, Result};

use crate::{Event, Journal};

/// [`StorageCaches`] that journals every notification before applying it.
#[derive(Clone)]
pub struct RecordingCache {
    caches: StorageCaches,
    journal: Journal,
}

impl RecordingCache {
    pub fn new(caches: StorageCaches, journal: &Journal) -> Self {
        Self {
            caches,
            journal: journal.clone(),
        }
    }

    pub fn caches(&self) -> &StorageCaches {
        &self.caches
    }
}

impl CacheAccess for RecordingCache {
    fn add_schema_rule(&self, rule: &SchemaRule) {
        self.journal.record(Event::SchemaRuleAdded(rule.id()));
        self.caches.add_schema_rule(rule);
    }

    fn remove_schema_rule_from_cache(&self, id: u64) {
        self.journal.record(Event::SchemaRuleRemoved(id));
        self.caches.remove_schema_rule_from_cache(id);
    }

    fn add_label_token(&self, token: NamedToken) {
        self.journal
            .record(Event::TokenAdded(TokenKind::Label, token.clone()));
        self.caches.add_label_token(token);
    }

    fn add_property_key_token(&self, token: NamedToken) {
        self.journal
            .record(Event::TokenAdded(TokenKind::PropertyKey, token.clone()));
        self.caches.add_property_key_token(token);
    }

    fn add_relationship_type_token(&self, token: NamedToken) {
        self.journal
            .record(Event::TokenAdded(TokenKind::RelationshipType, token.clone()));
        self.caches.add_relationship_type_token(token);
    }

    fn remove_token_from_cache(&self, kind: TokenKind, id: u32) {
        self.journal.record(Event::TokenRemoved(kind, id));
        self.caches.remove_token_from_cache(kind, id);
    }
}

/// Striped lock service that journals acquisitions and releases.
#[derive(Clone, Default)]
pub struct RecordingLocks {
    locks: StripedLockService,
    journal: Journal,
}

impl RecordingLocks {
    pub fn new(journal: &Journal) -> Self {
        Self {
            locks: StripedLockService::default(),
            journal: journal.clone(),
        }
    }

    /// Number of entities currently locked.
    pub fn held(&self) -> usize {
        self.locks.held()
    }
}

impl LockService for RecordingLocks {
    fn acquire_node_lock(&self, node: u64, ty: LockType) -> Lock {
        let held = self.locks.acquire_node_lock(node, ty);
        self.journal.record(Event::NodeLocked(node));
        let journal = self.journal.clone();
        Lock::on_release(move || {
            journal.record(Event::NodeUnlocked(node));
            held.release();
        })
    }

    fn acquire_relationship_lock(&self, rel: u64, ty: LockType) -> Lock {
        let held = self.locks.acquire_relationship_lock(rel, ty);
        self.journal.record(Event::RelationshipLocked(rel));
        let journal = self.journal.clone();
        Lock::on_release(move || {
            journal.record(Event::RelationshipUnlocked(rel));
            held.release();
        })
    }
}

/// Free-list allocator that journals every mark and can be told to fail.
pub struct RecordingIdGenerator {
    id_type: IdType,
    inner: FreeListIdGenerator,
    failing: AtomicBool,
    journal: Journal,
}

impl RecordingIdGenerator {
    pub fn new(id_type: IdType, journal: &Journal) -> Self {
        Self {
            id_type,
            inner: FreeListIdGenerator::new(0),
            failing: AtomicBool::new(false),
            journal: journal.clone(),
        }
    }

    pub fn generator(&self) -> &FreeListIdGenerator {
        &self.inner
    }

    /// Makes every later mark fail.
    pub fn fail(&self) {
        self.failing.store(true, Ordering::Release);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::Acquire) {
            return Err(ApplyError::Invalid("id generator rejected update"));
        }
        Ok(())
    }
}

impl IdGenerator for RecordingIdGenerator {
    fn mark_used(&self, id: u64) -> Result<()> {
        self.check()?;
        self.journal.record(Event::IdUsed(self.id_type, id));
        self.inner.mark_used(id)
    }

    fn mark_free(&self, id: u64) -> Result<()> {
        self.check()?;
        self.journal.record(Event::IdFreed(self.id_type, id));
        self.inner.mark_free(id)
    }
}
