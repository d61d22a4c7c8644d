use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::schema::IndexDescriptor;
use crate::types::{ApplyError, Result};

use super::IndexUpdateListener;

#[derive(Default)]
struct ActivatorState {
    pending: Vec<IndexDescriptor>,
    closed: bool,
}

/// Defers index activation to the end of one apply invocation.
///
/// Every registered index id is activated exactly once on [`close`](Self::close).
/// Dropping an activator that was never closed activates what is pending and
/// logs any failure.
pub struct IndexActivator {
    listener: Arc<dyn IndexUpdateListener>,
    state: Mutex<ActivatorState>,
}

impl IndexActivator {
    pub fn new(listener: Arc<dyn IndexUpdateListener>) -> Self {
        Self {
            listener,
            state: Mutex::new(ActivatorState::default()),
        }
    }

    /// Queues `index` for activation; repeated registrations are ignored.
    pub fn activate_index(&self, index: &IndexDescriptor) {
        let mut state = self.state.lock();
        if state.closed || state.pending.iter().any(|p| p.id == index.id) {
            return;
        }
        debug!(index = index.id, "index.activator.register");
        state.pending.push(index.clone());
    }

    /// Cancels a pending activation for a dropped index.
    pub fn index_dropped(&self, index: u64) {
        let mut state = self.state.lock();
        state.pending.retain(|p| p.id != index);
    }

    pub fn pending(&self) -> Vec<u64> {
        self.state.lock().pending.iter().map(|p| p.id).collect()
    }

    /// Activates every pending index. An index the engine cannot activate
    /// fails the whole invocation; later pending indexes are not activated.
    pub fn close(&self) -> Result<()> {
        let pending = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            std::mem::take(&mut state.pending)
        };
        for index in &pending {
            debug!(index = index.id, "index.activator.activate");
            self.listener
                .activate_index(index)
                .map_err(|source| ApplyError::IndexActivation {
                    index: index.id,
                    source,
                })?;
        }
        Ok(())
    }
}

impl Drop for IndexActivator {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!(error = %err, "index.activator.close_on_drop_failed");
        }
    }
}
