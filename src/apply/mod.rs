//! Batch appliers and the entry points that drive them.
//!
//! A [`BatchApplier`] sees every command of one batch through one visit method
//! per command kind and is closed exactly once when the batch ends. Appliers
//! are composed with [`ApplierFacade`].

#![forbid(unsafe_code)]

mod cache_invalidation;
mod facade;
mod high_id;
mod index;
mod store;

pub use cache_invalidation::CacheInvalidationApplier;
pub use facade::ApplierFacade;
pub use high_id::HighIdApplier;
pub use index::{IndexApplierContext, IndexBatchApplier};
pub use store::StoreApplier;

use tracing::{debug, trace};

use crate::command::{
    BatchHandle, Command, CommandBatch, MetaDataCommand, NodeCommand, PropertyCommand,
    RelationshipCommand, RelationshipGroupCommand, SchemaRuleCommand, TokenCommand,
};
use crate::types::Result;

/// Where a batch comes from; decides which appliers are composed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ApplyMode {
    /// Transactions committed by this instance.
    Internal,
    /// Transactions received already committed elsewhere, e.g. replicated.
    External,
    /// Replay of logged transactions after a crash.
    Recovery,
}

impl ApplyMode {
    pub fn name(self) -> &'static str {
        match self {
            ApplyMode::Internal => "internal",
            ApplyMode::External => "external",
            ApplyMode::Recovery => "recovery",
        }
    }

    /// Allocator high-water marks may be behind the ids being applied.
    pub fn needs_high_id_tracking(self) -> bool {
        matches!(self, ApplyMode::External | ApplyMode::Recovery)
    }

    /// Schema and token caches may hold entries the batch makes stale.
    pub fn needs_cache_invalidation(self) -> bool {
        matches!(self, ApplyMode::External | ApplyMode::Recovery)
    }
}

/// Per-batch command visitor.
///
/// Every visit method returns `true` to stop the batch without failing it.
/// Real appliers return `false` and signal fatal problems through errors.
pub trait BatchApplier {
    fn visit_node(&mut self, _command: &NodeCommand, _batch: BatchHandle) -> Result<bool> {
        Ok(false)
    }

    fn visit_relationship(
        &mut self,
        _command: &RelationshipCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        Ok(false)
    }

    fn visit_property(&mut self, _command: &PropertyCommand, _batch: BatchHandle) -> Result<bool> {
        Ok(false)
    }

    fn visit_relationship_group(
        &mut self,
        _command: &RelationshipGroupCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        Ok(false)
    }

    fn visit_relationship_type_token(
        &mut self,
        _command: &TokenCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        Ok(false)
    }

    fn visit_label_token(&mut self, _command: &TokenCommand, _batch: BatchHandle) -> Result<bool> {
        Ok(false)
    }

    fn visit_property_key_token(
        &mut self,
        _command: &TokenCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        Ok(false)
    }

    fn visit_schema_rule(
        &mut self,
        _command: &SchemaRuleCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        Ok(false)
    }

    fn visit_meta_data(&mut self, _command: &MetaDataCommand, _batch: BatchHandle) -> Result<bool> {
        Ok(false)
    }

    /// Flushes buffered work and releases batch-scoped resources.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Pushes one command through `applier`, returning its abort signal.
pub fn apply_command(
    applier: &mut dyn BatchApplier,
    command: &Command,
    batch: BatchHandle,
) -> Result<bool> {
    trace!(tx = %batch.tx_id, kind = command.kind(), key = command.key(), "apply.command");
    match command {
        Command::Node(cmd) => applier.visit_node(cmd, batch),
        Command::Relationship(cmd) => applier.visit_relationship(cmd, batch),
        Command::Property(cmd) => applier.visit_property(cmd, batch),
        Command::RelationshipGroup(cmd) => applier.visit_relationship_group(cmd, batch),
        Command::RelationshipTypeToken(cmd) => applier.visit_relationship_type_token(cmd, batch),
        Command::LabelToken(cmd) => applier.visit_label_token(cmd, batch),
        Command::PropertyKeyToken(cmd) => applier.visit_property_key_token(cmd, batch),
        Command::SchemaRule(cmd) => applier.visit_schema_rule(cmd, batch),
        Command::MetaData(cmd) => applier.visit_meta_data(cmd, batch),
    }
}

/// Dispatches every command of `batch` in order, stopping at the first abort
/// or error, then closes `applier` exactly once. A dispatch error takes
/// precedence over a close error.
pub fn apply_batch(applier: &mut dyn BatchApplier, batch: &CommandBatch) -> Result<bool> {
    let handle = batch.handle();
    debug!(tx = %batch.tx_id, commands = batch.len(), "apply.batch.start");
    let mut aborted = false;
    let mut dispatched = 0usize;
    let mut outcome = Ok(());
    for command in &batch.commands {
        match apply_command(applier, command, handle) {
            Ok(false) => dispatched += 1,
            Ok(true) => {
                dispatched += 1;
                aborted = true;
                break;
            }
            Err(err) => {
                outcome = Err(err);
                break;
            }
        }
    }
    let closed = applier.close();
    debug!(
        tx = %batch.tx_id,
        dispatched,
        aborted,
        failed = outcome.is_err() || closed.is_err(),
        "apply.batch.finish"
    );
    outcome?;
    closed?;
    Ok(aborted)
}
