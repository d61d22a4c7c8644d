#![forbid(unsafe_code)]

use std::fmt;
use std::io;

/// Sentinel id used by placeholder records and unset pointers.
pub const NO_ID: u64 = u64::MAX;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RelId(pub u64);
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LabelId(pub u32);
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TypeId(pub u32);
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PropId(pub u32);
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TxId(pub u64);

/// Identifies the allocator (and therefore the store) an id belongs to.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum IdType {
    Node,
    NodeLabels,
    Relationship,
    RelationshipGroup,
    Property,
    StringBlock,
    ArrayBlock,
    RelationshipTypeToken,
    RelationshipTypeTokenName,
    LabelToken,
    LabelTokenName,
    PropertyKeyToken,
    PropertyKeyTokenName,
    Schema,
    MetaData,
}

impl IdType {
    pub const ALL: [IdType; 15] = [
        IdType::Node,
        IdType::NodeLabels,
        IdType::Relationship,
        IdType::RelationshipGroup,
        IdType::Property,
        IdType::StringBlock,
        IdType::ArrayBlock,
        IdType::RelationshipTypeToken,
        IdType::RelationshipTypeTokenName,
        IdType::LabelToken,
        IdType::LabelTokenName,
        IdType::PropertyKeyToken,
        IdType::PropertyKeyTokenName,
        IdType::Schema,
        IdType::MetaData,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            IdType::Node => "node",
            IdType::NodeLabels => "node_labels",
            IdType::Relationship => "relationship",
            IdType::RelationshipGroup => "relationship_group",
            IdType::Property => "property",
            IdType::StringBlock => "string_block",
            IdType::ArrayBlock => "array_block",
            IdType::RelationshipTypeToken => "relationship_type_token",
            IdType::RelationshipTypeTokenName => "relationship_type_token_name",
            IdType::LabelToken => "label_token",
            IdType::LabelTokenName => "label_token_name",
            IdType::PropertyKeyToken => "property_key_token",
            IdType::PropertyKeyTokenName => "property_key_token_name",
            IdType::Schema => "schema",
            IdType::MetaData => "meta_data",
        }
    }
}

/// Failures reported by the index engine collaborator.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("index {0} not found")]
    NotFound(u64),
    #[error("index {index} failed: {reason}")]
    Failed { index: u64, reason: String },
}

#[derive(thiserror::Error, Debug)]
pub enum ApplyError {
    #[error("IO: {0}")]
    Io(#[from] io::Error),
    #[error("corruption: {0}")]
    Corruption(&'static str),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    #[error("not found")]
    NotFound,
    #[error("unable to enable constraint, backing index {index} is not online")]
    IndexActivation {
        index: u64,
        #[source]
        source: IndexError,
    },
    #[error("index: {0}")]
    Index(#[from] IndexError),
    #[error("work synchronizer stopped")]
    SyncClosed,
}

pub type Result<T> = std::result::Result<T, ApplyError>;

/// Produces an equivalent error so one failure can be reported to many waiters.
pub fn clone_error(err: &ApplyError) -> ApplyError {
    match err {
        ApplyError::Io(io_err) => {
            let kind = io_err.kind();
            let message = io_err.to_string();
            ApplyError::Io(io::Error::new(kind, message))
        }
        ApplyError::Corruption(msg) => ApplyError::Corruption(msg),
        ApplyError::Invalid(msg) => ApplyError::Invalid(msg),
        ApplyError::InvalidOwned(msg) => ApplyError::InvalidOwned(msg.clone()),
        ApplyError::NotFound => ApplyError::NotFound,
        ApplyError::IndexActivation { index, source } => ApplyError::IndexActivation {
            index: *index,
            source: source.clone(),
        },
        ApplyError::Index(err) => ApplyError::Index(err.clone()),
        ApplyError::SyncClosed => ApplyError::SyncClosed,
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<u32> for LabelId {
    fn from(value: u32) -> Self {
        LabelId(value)
    }
}

impl From<LabelId> for u32 {
    fn from(value: LabelId) -> Self {
        value.0
    }
}

impl From<u32> for TypeId {
    fn from(value: u32) -> Self {
        TypeId(value)
    }
}

impl From<TypeId> for u32 {
    fn from(value: TypeId) -> Self {
        value.0
    }
}

impl From<u32> for PropId {
    fn from(value: u32) -> Self {
        PropId(value)
    }
}

impl From<PropId> for u32 {
    fn from(value: PropId) -> Self {
        value.0
    }
}
