//! Entry point that assembles the applier chain for a batch and runs it.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::apply::{
    apply_batch, ApplierFacade, ApplyMode, CacheInvalidationApplier, HighIdApplier,
    IndexApplierContext, IndexBatchApplier, StoreApplier,
};
use crate::cache::{CacheAccess, SchemaCache, StorageCaches};
use crate::command::CommandBatch;
use crate::id::{IdGenerator, IdGeneratorSyncs};
use crate::index::{
    IndexActivator, IndexUpdateListener, IndexUpdatesSync, LabelUpdateSync,
    NodeLabelUpdateListener,
};
use crate::lock::{LockService, StripedLockService};
use crate::metrics::{default_metrics, ApplyMetrics};
use crate::options::ApplyOptions;
use crate::store::Stores;
use crate::types::{IdType, Result};

/// Outcome of replaying a sequence of batches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Batches dispatched and closed.
    pub batches: usize,
    /// Commands carried by those batches.
    pub commands: usize,
    /// Batches an applier asked to stop early.
    pub aborted: usize,
}

/// Applies command batches to the stores and derived structures.
///
/// The engine owns the long-lived collaborators: the work synchronizers for
/// the label index, the index engine and the id allocators, plus the lock
/// service and caches. Appliers are built fresh for every batch.
pub struct ApplyEngine {
    stores: Stores,
    locks: Arc<dyn LockService>,
    cache: Arc<dyn CacheAccess>,
    schema: Arc<SchemaCache>,
    indexing: Arc<dyn IndexUpdateListener>,
    label_sync: LabelUpdateSync,
    index_sync: IndexUpdatesSync,
    id_syncs: IdGeneratorSyncs,
    options: ApplyOptions,
    metrics: Arc<dyn ApplyMetrics>,
}

impl ApplyEngine {
    pub fn builder(
        stores: Stores,
        indexing: Arc<dyn IndexUpdateListener>,
        label_index: Arc<dyn NodeLabelUpdateListener>,
    ) -> ApplyEngineBuilder {
        ApplyEngineBuilder {
            stores,
            indexing,
            label_index,
            locks: None,
            caches: StorageCaches::new(),
            cache_access: None,
            options: ApplyOptions::default(),
            id_generators: Vec::new(),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn schema_cache(&self) -> &Arc<SchemaCache> {
        &self.schema
    }

    pub fn options(&self) -> &ApplyOptions {
        &self.options
    }

    pub fn metrics(&self) -> &Arc<dyn ApplyMetrics> {
        &self.metrics
    }

    pub fn label_sync(&self) -> &LabelUpdateSync {
        &self.label_sync
    }

    pub fn index_sync(&self) -> &IndexUpdatesSync {
        &self.index_sync
    }

    pub fn id_syncs(&self) -> &IdGeneratorSyncs {
        &self.id_syncs
    }

    /// Applies one batch and activates any index it brought online.
    ///
    /// Returns `true` when an applier asked to stop early.
    pub fn apply(&self, batch: &CommandBatch, mode: ApplyMode) -> Result<bool> {
        let activator = IndexActivator::new(Arc::clone(&self.indexing));
        let applied = self.apply_with(batch, mode, &activator);
        let activated = activator.close();
        match (applied, activated) {
            (Err(err), _) | (Ok(_), Err(err)) => {
                self.metrics.batch_failed(mode.name());
                error!(tx = %batch.tx_id, mode = mode.name(), error = %err, "apply.engine.failed");
                Err(err)
            }
            (Ok(aborted), Ok(())) => {
                self.metrics.batch_applied(mode.name(), batch.len());
                Ok(aborted)
            }
        }
    }

    /// Replays `batches` in recovery mode, stopping at the first failure.
    ///
    /// Index activations are deferred until every batch has been applied.
    pub fn recover<'b, I>(&self, batches: I) -> Result<RecoveryStats>
    where
        I: IntoIterator<Item = &'b CommandBatch>,
    {
        let started = Instant::now();
        let activator = IndexActivator::new(Arc::clone(&self.indexing));
        let mut stats = RecoveryStats::default();
        for batch in batches {
            match self.apply_with(batch, ApplyMode::Recovery, &activator) {
                Ok(aborted) => {
                    self.metrics
                        .batch_applied(ApplyMode::Recovery.name(), batch.len());
                    stats.batches += 1;
                    stats.commands += batch.len();
                    if aborted {
                        stats.aborted += 1;
                    }
                }
                Err(err) => {
                    self.metrics.batch_failed(ApplyMode::Recovery.name());
                    error!(tx = %batch.tx_id, error = %err, "apply.recovery.failed");
                    return Err(err);
                }
            }
        }
        activator.close()?;
        info!(
            batches = stats.batches,
            commands = stats.commands,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "apply.recovery.complete"
        );
        Ok(stats)
    }

    fn apply_with(
        &self,
        batch: &CommandBatch,
        mode: ApplyMode,
        activator: &IndexActivator,
    ) -> Result<bool> {
        let ctx = IndexApplierContext {
            stores: &self.stores,
            schema: self.schema.as_ref(),
            indexing: self.indexing.as_ref(),
            label_sync: &self.label_sync,
            index_sync: &self.index_sync,
            activator,
            metrics: self.metrics.as_ref(),
            flush_before_schema_changes: self.options.flush_before_schema_changes,
        };
        let mut chain = ApplierFacade::new();
        if mode.needs_high_id_tracking() {
            chain.push(HighIdApplier::new(&self.stores, self.metrics.as_ref()));
        }
        // The index applier flushes ahead of schema changes, so it must see
        // each rule before the invalidation applier evicts it.
        chain.push(IndexBatchApplier::new(ctx));
        if mode.needs_cache_invalidation() {
            chain.push(CacheInvalidationApplier::new(self.cache.as_ref()));
        }
        chain.push(
            StoreApplier::new(
                &self.stores,
                self.locks.as_ref(),
                self.cache.as_ref(),
                self.metrics.as_ref(),
            )
            .with_id_syncs(&self.id_syncs)
            .refreshing_tokens(mode.needs_cache_invalidation()),
        );
        debug!(
            tx = %batch.tx_id,
            mode = mode.name(),
            appliers = chain.len(),
            "apply.engine.chain"
        );
        apply_batch(&mut chain, batch)
    }
}

/// Collects the collaborators of an [`ApplyEngine`].
pub struct ApplyEngineBuilder {
    stores: Stores,
    indexing: Arc<dyn IndexUpdateListener>,
    label_index: Arc<dyn NodeLabelUpdateListener>,
    locks: Option<Arc<dyn LockService>>,
    caches: StorageCaches,
    cache_access: Option<Arc<dyn CacheAccess>>,
    options: ApplyOptions,
    id_generators: Vec<(IdType, Arc<dyn IdGenerator>)>,
}

impl ApplyEngineBuilder {
    /// Lock service used by the store applier. Defaults to a striped service
    /// sized by [`ApplyOptions::lock_stripes`].
    pub fn locks(mut self, locks: Arc<dyn LockService>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Caches backing schema lookups and token resolution.
    pub fn caches(mut self, caches: StorageCaches) -> Self {
        self.caches = caches;
        self
    }

    /// Overrides the cache interface the appliers notify. The schema cache
    /// of [`Self::caches`] is still used for index lookups.
    pub fn cache_access(mut self, cache: Arc<dyn CacheAccess>) -> Self {
        self.cache_access = Some(cache);
        self
    }

    pub fn options(mut self, options: ApplyOptions) -> Self {
        self.options = options;
        self
    }

    /// Routes id usage of `id_type` to `generator`.
    pub fn id_generator(mut self, id_type: IdType, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generators.push((id_type, generator));
        self
    }

    pub fn build(self) -> ApplyEngine {
        let options = self.options;
        let metrics = options.metrics.clone().unwrap_or_else(default_metrics);
        let locks = self
            .locks
            .unwrap_or_else(|| Arc::new(StripedLockService::new(options.lock_stripes)));
        let schema = Arc::clone(&self.caches.schema);
        let cache = self
            .cache_access
            .unwrap_or_else(|| Arc::new(self.caches.clone()));
        let mut id_syncs = IdGeneratorSyncs::new();
        for (id_type, generator) in self.id_generators {
            id_syncs.register(id_type, generator, options.id_sync);
        }
        ApplyEngine {
            stores: self.stores,
            locks,
            cache,
            schema,
            label_sync: LabelUpdateSync::new("label_updates", self.label_index, options.label_sync),
            index_sync: IndexUpdatesSync::new(
                "index_updates",
                Arc::clone(&self.indexing),
                options.index_sync,
            ),
            indexing: self.indexing,
            id_syncs,
            options,
            metrics,
        }
    }
}
