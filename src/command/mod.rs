//! Logical change commands and the batches that carry them.

#![forbid(unsafe_code)]

use crate::record::{
    MetaDataRecord, NodeRecord, PropertyRecord, Record, RelationshipGroupRecord,
    RelationshipRecord, SchemaRecord, TokenRecord,
};
use crate::schema::SchemaRule;
use crate::types::TxId;

/// What a command does to its record, derived from the after-state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandMode {
    Create,
    Update,
    Delete,
}

impl CommandMode {
    pub fn from_record<R: Record>(after: &R) -> Self {
        if after.is_created() {
            CommandMode::Create
        } else if !after.in_use() {
            CommandMode::Delete
        } else {
            CommandMode::Update
        }
    }
}

/// A before/after pair for one record.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordCommand<R> {
    pub before: R,
    pub after: R,
}

impl<R: Record> RecordCommand<R> {
    pub fn new(before: R, after: R) -> Self {
        Self { before, after }
    }

    /// Id of the record being written.
    pub fn key(&self) -> u64 {
        self.after.id()
    }

    pub fn mode(&self) -> CommandMode {
        CommandMode::from_record(&self.after)
    }
}

pub type NodeCommand = RecordCommand<NodeRecord>;
pub type RelationshipCommand = RecordCommand<RelationshipRecord>;
pub type PropertyCommand = RecordCommand<PropertyRecord>;
pub type RelationshipGroupCommand = RecordCommand<RelationshipGroupRecord>;
pub type TokenCommand = RecordCommand<TokenRecord>;
pub type MetaDataCommand = RecordCommand<MetaDataRecord>;

/// Schema record change plus the rule it encodes.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaRuleCommand {
    pub before: SchemaRecord,
    pub after: SchemaRecord,
    pub rule: SchemaRule,
}

impl SchemaRuleCommand {
    pub fn new(before: SchemaRecord, after: SchemaRecord, rule: SchemaRule) -> Self {
        Self {
            before,
            after,
            rule,
        }
    }

    pub fn key(&self) -> u64 {
        self.after.id
    }

    pub fn mode(&self) -> CommandMode {
        CommandMode::from_record(&self.after)
    }
}

/// Every command kind a batch may contain.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Node(NodeCommand),
    Relationship(RelationshipCommand),
    Property(PropertyCommand),
    RelationshipGroup(RelationshipGroupCommand),
    RelationshipTypeToken(TokenCommand),
    LabelToken(TokenCommand),
    PropertyKeyToken(TokenCommand),
    SchemaRule(SchemaRuleCommand),
    MetaData(MetaDataCommand),
}

impl Command {
    pub fn node(before: NodeRecord, after: NodeRecord) -> Self {
        Command::Node(RecordCommand::new(before, after))
    }

    pub fn relationship(before: RelationshipRecord, after: RelationshipRecord) -> Self {
        Command::Relationship(RecordCommand::new(before, after))
    }

    pub fn property(before: PropertyRecord, after: PropertyRecord) -> Self {
        Command::Property(RecordCommand::new(before, after))
    }

    pub fn relationship_group(
        before: RelationshipGroupRecord,
        after: RelationshipGroupRecord,
    ) -> Self {
        Command::RelationshipGroup(RecordCommand::new(before, after))
    }

    pub fn label_token(before: TokenRecord, after: TokenRecord) -> Self {
        Command::LabelToken(RecordCommand::new(before, after))
    }

    pub fn property_key_token(before: TokenRecord, after: TokenRecord) -> Self {
        Command::PropertyKeyToken(RecordCommand::new(before, after))
    }

    pub fn relationship_type_token(before: TokenRecord, after: TokenRecord) -> Self {
        Command::RelationshipTypeToken(RecordCommand::new(before, after))
    }

    pub fn schema_rule(before: SchemaRecord, after: SchemaRecord, rule: SchemaRule) -> Self {
        Command::SchemaRule(SchemaRuleCommand::new(before, after, rule))
    }

    pub fn meta_data(before: MetaDataRecord, after: MetaDataRecord) -> Self {
        Command::MetaData(RecordCommand::new(before, after))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::Node(_) => "node",
            Command::Relationship(_) => "relationship",
            Command::Property(_) => "property",
            Command::RelationshipGroup(_) => "relationship_group",
            Command::RelationshipTypeToken(_) => "relationship_type_token",
            Command::LabelToken(_) => "label_token",
            Command::PropertyKeyToken(_) => "property_key_token",
            Command::SchemaRule(_) => "schema_rule",
            Command::MetaData(_) => "meta_data",
        }
    }

    pub fn key(&self) -> u64 {
        match self {
            Command::Node(cmd) => cmd.key(),
            Command::Relationship(cmd) => cmd.key(),
            Command::Property(cmd) => cmd.key(),
            Command::RelationshipGroup(cmd) => cmd.key(),
            Command::RelationshipTypeToken(cmd)
            | Command::LabelToken(cmd)
            | Command::PropertyKeyToken(cmd) => cmd.key(),
            Command::SchemaRule(cmd) => cmd.key(),
            Command::MetaData(cmd) => cmd.key(),
        }
    }
}

/// The write-set of one transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandBatch {
    pub tx_id: TxId,
    pub commands: Vec<Command>,
}

impl CommandBatch {
    pub fn new(tx_id: TxId, commands: Vec<Command>) -> Self {
        Self { tx_id, commands }
    }

    pub fn handle(&self) -> BatchHandle {
        BatchHandle { tx_id: self.tx_id }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Per-batch context handed to every applier entry point.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchHandle {
    pub tx_id: TxId,
}

impl BatchHandle {
    pub fn new(tx_id: TxId) -> Self {
        Self { tx_id }
    }
}
