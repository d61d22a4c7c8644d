use tracing::trace;

use crate::cache::{CacheAccess, TokenKind};
use crate::command::{BatchHandle, SchemaRuleCommand, TokenCommand};
use crate::types::Result;

use super::BatchApplier;

/// Drops schema and token cache entries a replayed command may have made stale.
///
/// Created and updated entries are re-added by [`super::StoreApplier`], which
/// also removes deleted schema rules, so deletions are not touched here.
pub struct CacheInvalidationApplier<'a> {
    cache: &'a dyn CacheAccess,
}

impl<'a> CacheInvalidationApplier<'a> {
    pub fn new(cache: &'a dyn CacheAccess) -> Self {
        Self { cache }
    }

    fn invalidate_token(&self, kind: TokenKind, command: &TokenCommand) {
        let Ok(id) = u32::try_from(command.key()) else {
            return;
        };
        trace!(kind = ?kind, token = id, "apply.cache.invalidate_token");
        self.cache.remove_token_from_cache(kind, id);
    }
}

impl BatchApplier for CacheInvalidationApplier<'_> {
    fn visit_relationship_type_token(
        &mut self,
        command: &TokenCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        self.invalidate_token(TokenKind::RelationshipType, command);
        Ok(false)
    }

    fn visit_label_token(&mut self, command: &TokenCommand, _batch: BatchHandle) -> Result<bool> {
        self.invalidate_token(TokenKind::Label, command);
        Ok(false)
    }

    fn visit_property_key_token(
        &mut self,
        command: &TokenCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        self.invalidate_token(TokenKind::PropertyKey, command);
        Ok(false)
    }

    fn visit_schema_rule(
        &mut self,
        command: &SchemaRuleCommand,
        _batch: BatchHandle,
    ) -> Result<bool> {
        if command.after.in_use {
            trace!(rule = command.key(), "apply.cache.invalidate_schema_rule");
            self.cache.remove_schema_rule_from_cache(command.key());
        }
        Ok(false)
    }
}
