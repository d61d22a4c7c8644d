use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::IdType;

/// Trait for tracking command application in the apply engine.
///
/// Implementations collect statistics about applied batches, derived-structure
/// work and allocator bookkeeping. Hooks are called on the applying thread and
/// must be cheap.
pub trait ApplyMetrics: Send + Sync {
    /// Records a batch that was dispatched and closed successfully.
    ///
    /// # Parameters
    /// * `mode` - The apply mode name: "internal", "external" or "recovery".
    /// * `commands` - Number of commands in the batch.
    fn batch_applied(&self, mode: &'static str, commands: usize);

    /// Records a batch that failed during dispatch or close.
    fn batch_failed(&self, mode: &'static str);

    /// Records a node switching between sparse and dense representation.
    fn dense_transition(&self);

    /// Records an allocator high-water mark advance during replay.
    fn high_id_advanced(&self, id_type: IdType);

    /// Records label updates handed to the label index synchronizer.
    fn label_updates_submitted(&self, count: usize);

    /// Records index entry updates handed to the index synchronizer.
    fn index_updates_submitted(&self, count: usize);
}

/// A no-op implementation of [`ApplyMetrics`] that discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl ApplyMetrics for NoopMetrics {
    fn batch_applied(&self, _mode: &'static str, _commands: usize) {}
    fn batch_failed(&self, _mode: &'static str) {}
    fn dense_transition(&self) {}
    fn high_id_advanced(&self, _id_type: IdType) {}
    fn label_updates_submitted(&self, _count: usize) {}
    fn index_updates_submitted(&self, _count: usize) {}
}

/// A thread-safe counter-based implementation of [`ApplyMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Batches applied successfully.
    pub batches_applied: AtomicU64,

    /// Batches applied successfully in recovery mode.
    pub recovery_batches: AtomicU64,

    /// Commands carried by successful batches.
    pub commands_applied: AtomicU64,

    /// Batches that failed.
    pub batches_failed: AtomicU64,

    /// Sparse/dense node transitions.
    pub dense_transitions: AtomicU64,

    /// High-water mark advances across all id types.
    pub high_id_advances: AtomicU64,

    /// Label updates submitted.
    pub label_updates: AtomicU64,

    /// Index entry updates submitted.
    pub index_updates: AtomicU64,
}

impl ApplyMetrics for CounterMetrics {
    fn batch_applied(&self, mode: &'static str, commands: usize) {
        self.batches_applied.fetch_add(1, Ordering::Relaxed);
        if mode == "recovery" {
            self.recovery_batches.fetch_add(1, Ordering::Relaxed);
        }
        self.commands_applied
            .fetch_add(commands as u64, Ordering::Relaxed);
    }

    fn batch_failed(&self, _mode: &'static str) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn dense_transition(&self) {
        self.dense_transitions.fetch_add(1, Ordering::Relaxed);
    }

    fn high_id_advanced(&self, _id_type: IdType) {
        self.high_id_advances.fetch_add(1, Ordering::Relaxed);
    }

    fn label_updates_submitted(&self, count: usize) {
        self.label_updates
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    fn index_updates_submitted(&self, count: usize) {
        self.index_updates
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
pub fn default_metrics() -> Arc<dyn ApplyMetrics> {
    Arc::new(NoopMetrics)
}
