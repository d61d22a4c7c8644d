use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::metrics::ApplyMetrics;
use crate::sync::WorkSyncConfig;
use crate::types::{ApplyError, Result};

/// Configuration options supplied when building an [`crate::ApplyEngine`].
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplyOptions {
    /// Batching limits for the label index synchronizer
    pub label_sync: WorkSyncConfig,
    /// Batching limits for the index update synchronizer
    pub index_sync: WorkSyncConfig,
    /// Batching limits for the per-id-type allocator synchronizers
    pub id_sync: WorkSyncConfig,
    /// Whether pending index work is flushed before an index is created,
    /// activated or dropped within a batch
    pub flush_before_schema_changes: bool,
    /// Number of stripes for the default lock service
    pub lock_stripes: usize,
    /// Optional metrics collection implementation
    #[serde(skip)]
    pub metrics: Option<Arc<dyn ApplyMetrics>>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            label_sync: WorkSyncConfig::default(),
            index_sync: WorkSyncConfig::default(),
            id_sync: WorkSyncConfig::default(),
            flush_before_schema_changes: true,
            lock_stripes: 64,
            metrics: None,
        }
    }
}

impl ApplyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from TOML; missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| ApplyError::InvalidOwned(format!("apply options: {err}")))
    }

    /// Reads and parses a TOML options file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Sets the batching limits for the label index synchronizer.
    pub fn label_sync(mut self, config: WorkSyncConfig) -> Self {
        self.label_sync = config;
        self
    }

    /// Sets the batching limits for the index update synchronizer.
    pub fn index_sync(mut self, config: WorkSyncConfig) -> Self {
        self.index_sync = config;
        self
    }

    /// Sets the batching limits for the allocator synchronizers.
    pub fn id_sync(mut self, config: WorkSyncConfig) -> Self {
        self.id_sync = config;
        self
    }

    /// Enables or disables flushing pending index work ahead of schema changes.
    pub fn flush_before_schema_changes(mut self, enabled: bool) -> Self {
        self.flush_before_schema_changes = enabled;
        self
    }

    /// Sets the stripe count of the default lock service.
    pub fn lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes.max(1);
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn ApplyMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl fmt::Debug for ApplyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyOptions")
            .field("label_sync", &self.label_sync)
            .field("index_sync", &self.index_sync)
            .field("id_sync", &self.id_sync)
            .field(
                "flush_before_schema_changes",
                &self.flush_before_schema_changes,
            )
            .field("lock_stripes", &self.lock_stripes)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
