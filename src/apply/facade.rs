use crate::command::{
    BatchHandle, MetaDataCommand, NodeCommand, PropertyCommand, RelationshipCommand,
    RelationshipGroupCommand, SchemaRuleCommand, TokenCommand,
};
use crate::types::Result;

use super::BatchApplier;

/// Ordered composition of appliers behaving as one.
///
/// Each command reaches every member in registration order and the abort
/// signals are OR-ed. The first member error stops delivery of that command.
/// `close` reaches every member even when an earlier one fails; the first
/// failure is returned.
#[derive(Default)]
pub struct ApplierFacade<'a> {
    appliers: Vec<Box<dyn BatchApplier + 'a>>,
}

impl<'a> ApplierFacade<'a> {
    pub fn new() -> Self {
        Self {
            appliers: Vec::new(),
        }
    }

    pub fn with(mut self, applier: impl BatchApplier + 'a) -> Self {
        self.push(applier);
        self
    }

    pub fn push(&mut self, applier: impl BatchApplier + 'a) {
        self.appliers.push(Box::new(applier));
    }

    pub fn push_boxed(&mut self, applier: Box<dyn BatchApplier + 'a>) {
        self.appliers.push(applier);
    }

    pub fn len(&self) -> usize {
        self.appliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appliers.is_empty()
    }

    fn dispatch<F>(&mut self, mut visit: F) -> Result<bool>
    where
        F: FnMut(&mut dyn BatchApplier) -> Result<bool>,
    {
        let mut abort = false;
        for applier in &mut self.appliers {
            abort |= visit(applier.as_mut())?;
        }
        Ok(abort)
    }
}

impl BatchApplier for ApplierFacade<'_> {
    fn visit_node(&mut self, command: &NodeCommand, batch: BatchHandle) -> Result<bool> {
        self.dispatch(|a| a.visit_node(command, batch))
    }

    fn visit_relationship(
        &mut self,
        command: &RelationshipCommand,
        batch: BatchHandle,
    ) -> Result<bool> {
        self.dispatch(|a| a.visit_relationship(command, batch))
    }

    fn visit_property(&mut self, command: &PropertyCommand, batch: BatchHandle) -> Result<bool> {
        self.dispatch(|a| a.visit_property(command, batch))
    }

    fn visit_relationship_group(
        &mut self,
        command: &RelationshipGroupCommand,
        batch: BatchHandle,
    ) -> Result<bool> {
        self.dispatch(|a| a.visit_relationship_group(command, batch))
    }

    fn visit_relationship_type_token(
        &mut self,
        command: &TokenCommand,
        batch: BatchHandle,
    ) -> Result<bool> {
        self.dispatch(|a| a.visit_relationship_type_token(command, batch))
    }

    fn visit_label_token(&mut self, command: &TokenCommand, batch: BatchHandle) -> Result<bool> {
        self.dispatch(|a| a.visit_label_token(command, batch))
    }

    fn visit_property_key_token(
        &mut self,
        command: &TokenCommand,
        batch: BatchHandle,
    ) -> Result<bool> {
        self.dispatch(|a| a.visit_property_key_token(command, batch))
    }

    fn visit_schema_rule(
        &mut self,
        command: &SchemaRuleCommand,
        batch: BatchHandle,
    ) -> Result<bool> {
        self.dispatch(|a| a.visit_schema_rule(command, batch))
    }

    fn visit_meta_data(&mut self, command: &MetaDataCommand, batch: BatchHandle) -> Result<bool> {
        self.dispatch(|a| a.visit_meta_data(command, batch))
    }

    fn close(&mut self) -> Result<()> {
        let mut first_err = None;
        for applier in &mut self.appliers {
            if let Err(err) = applier.close() {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
