//! Fixed-shape record snapshots carried by commands.
//!
//! Records are plain values: the store collaborators own their byte layout, the
//! apply engine only inspects ids, in-use flags and the payload fields needed for
//! derived structures (labels, property values, dynamic chains).

#![forbid(unsafe_code)]

use std::fmt;

use smallvec::SmallVec;

use crate::types::{ApplyError, LabelId, NodeId, PropId, RelId, Result, TypeId, NO_ID};

/// Label set small enough to stay on the stack for the common case.
pub type Labels = SmallVec<[LabelId; 4]>;

/// Common view over every record kind.
pub trait Record: Clone + fmt::Debug + Send + Sync + 'static {
    /// Record id within its owning store.
    fn id(&self) -> u64;

    /// Whether the record is live after this change.
    fn in_use(&self) -> bool;

    /// Whether this change allocated the record.
    fn is_created(&self) -> bool;

    /// Id of the secondary unit when the record spans two slots.
    fn secondary_unit_id(&self) -> Option<u64> {
        None
    }
}

macro_rules! impl_record {
    ($ty:ty) => {
        impl Record for $ty {
            fn id(&self) -> u64 {
                self.id
            }

            fn in_use(&self) -> bool {
                self.in_use
            }

            fn is_created(&self) -> bool {
                self.created
            }
        }
    };
    ($ty:ty, secondary) => {
        impl Record for $ty {
            fn id(&self) -> u64 {
                self.id
            }

            fn in_use(&self) -> bool {
                self.in_use
            }

            fn is_created(&self) -> bool {
                self.created
            }

            fn secondary_unit_id(&self) -> Option<u64> {
                self.secondary_unit
            }
        }
    };
}

/// One block of a dynamic chain (label arrays, long strings, token names).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DynamicRecord {
    pub id: u64,
    pub in_use: bool,
    pub created: bool,
    pub next_block: u64,
    pub data: Vec<u8>,
}

impl DynamicRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            next_block: NO_ID,
            data: Vec::new(),
        }
    }

    /// An in-use block with no payload.
    pub fn in_use(id: u64) -> Self {
        Self {
            in_use: true,
            ..Self::new(id)
        }
    }

    pub fn with_data(id: u64, data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::in_use(id)
        }
    }
}

impl_record!(DynamicRecord);

/// Node label encoding: either inlined in the node record or spilled into the
/// dynamic label store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelField {
    Inline(Labels),
    Dynamic(Vec<DynamicRecord>),
}

impl Default for LabelField {
    fn default() -> Self {
        LabelField::Inline(Labels::new())
    }
}

impl LabelField {
    pub fn inline(labels: &[LabelId]) -> Self {
        let mut labels: Labels = labels.iter().copied().collect();
        labels.sort_unstable();
        labels.dedup();
        LabelField::Inline(labels)
    }

    pub fn dynamic(records: Vec<DynamicRecord>) -> Self {
        LabelField::Dynamic(records)
    }

    /// Splits `labels` across a chain of dynamic records starting at `first_id`.
    pub fn spill(labels: &[LabelId], first_id: u64, per_record: usize) -> Self {
        let mut sorted: Vec<LabelId> = labels.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let per_record = per_record.max(1);
        let chunks: Vec<&[LabelId]> = sorted.chunks(per_record).collect();
        let mut records = Vec::with_capacity(chunks.len());
        for (offset, chunk) in chunks.iter().enumerate() {
            let id = first_id + offset as u64;
            let mut data = Vec::with_capacity(chunk.len() * 4);
            for label in chunk.iter() {
                data.extend_from_slice(&label.0.to_le_bytes());
            }
            let mut record = DynamicRecord::with_data(id, data);
            record.created = true;
            if offset + 1 < chunks.len() {
                record.next_block = id + 1;
            }
            records.push(record);
        }
        LabelField::Dynamic(records)
    }

    pub fn is_inlined(&self) -> bool {
        matches!(self, LabelField::Inline(_))
    }

    pub fn dynamic_records(&self) -> &[DynamicRecord] {
        match self {
            LabelField::Inline(_) => &[],
            LabelField::Dynamic(records) => records,
        }
    }

    /// Decodes the sorted label set.
    pub fn labels(&self) -> Result<Labels> {
        match self {
            LabelField::Inline(labels) => Ok(labels.clone()),
            LabelField::Dynamic(records) => {
                let mut labels = Labels::new();
                for record in records.iter().filter(|r| r.in_use) {
                    if record.data.len() % 4 != 0 {
                        return Err(ApplyError::Corruption(
                            "dynamic label block length not a multiple of 4",
                        ));
                    }
                    for chunk in record.data.chunks_exact(4) {
                        let mut raw = [0u8; 4];
                        raw.copy_from_slice(chunk);
                        labels.push(LabelId(u32::from_le_bytes(raw)));
                    }
                }
                labels.sort_unstable();
                labels.dedup();
                Ok(labels)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: u64,
    pub in_use: bool,
    pub created: bool,
    pub dense: bool,
    pub next_rel: u64,
    pub next_prop: u64,
    pub labels: LabelField,
    pub secondary_unit: Option<u64>,
}

impl NodeRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            dense: false,
            next_rel: NO_ID,
            next_prop: NO_ID,
            labels: LabelField::default(),
            secondary_unit: None,
        }
    }

    pub fn node_id(&self) -> NodeId {
        NodeId(self.id)
    }
}

impl_record!(NodeRecord, secondary);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationshipRecord {
    pub id: u64,
    pub in_use: bool,
    pub created: bool,
    pub first_node: u64,
    pub second_node: u64,
    pub rel_type: TypeId,
    pub first_prev_rel: u64,
    pub first_next_rel: u64,
    pub second_prev_rel: u64,
    pub second_next_rel: u64,
    pub first_in_first_chain: bool,
    pub first_in_second_chain: bool,
    pub next_prop: u64,
    pub secondary_unit: Option<u64>,
}

impl RelationshipRecord {
    pub fn new(id: u64) -> Self {
        Self::between(id, NO_ID, NO_ID, TypeId(u32::MAX))
    }

    pub fn between(id: u64, first_node: u64, second_node: u64, rel_type: TypeId) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            first_node,
            second_node,
            rel_type,
            first_prev_rel: NO_ID,
            first_next_rel: NO_ID,
            second_prev_rel: NO_ID,
            second_next_rel: NO_ID,
            first_in_first_chain: true,
            first_in_second_chain: true,
            next_prop: NO_ID,
            secondary_unit: None,
        }
    }

    pub fn rel_id(&self) -> RelId {
        RelId(self.id)
    }
}

impl_record!(RelationshipRecord, secondary);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationshipGroupRecord {
    pub id: u64,
    pub in_use: bool,
    pub created: bool,
    pub rel_type: TypeId,
    pub next: u64,
    pub first_out: u64,
    pub first_in: u64,
    pub first_loop: u64,
    pub owning_node: u64,
    pub secondary_unit: Option<u64>,
}

impl RelationshipGroupRecord {
    pub fn new(id: u64, rel_type: TypeId) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            rel_type,
            next: NO_ID,
            first_out: NO_ID,
            first_in: NO_ID,
            first_loop: NO_ID,
            owning_node: NO_ID,
            secondary_unit: None,
        }
    }
}

impl_record!(RelationshipGroupRecord, secondary);

/// Owned property value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    IntArray(Vec<i64>),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Str(v) => write!(f, "{v}"),
            PropertyValue::Bytes(v) => write!(f, "bytes(len={})", v.len()),
            PropertyValue::IntArray(v) => write!(f, "int[](len={})", v.len()),
        }
    }
}

/// Where a spilled property value lives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueStore {
    Strings,
    Arrays,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropertyBlock {
    pub key: PropId,
    pub value: PropertyValue,
    /// Dynamic records holding the value when it does not fit in the block.
    pub value_records: Vec<DynamicRecord>,
}

impl PropertyBlock {
    pub fn new(key: PropId, value: PropertyValue) -> Self {
        Self {
            key,
            value,
            value_records: Vec::new(),
        }
    }

    pub fn value_store(&self) -> Option<ValueStore> {
        if self.value_records.is_empty() {
            return None;
        }
        match self.value {
            PropertyValue::Str(_) => Some(ValueStore::Strings),
            PropertyValue::Bytes(_) | PropertyValue::IntArray(_) => Some(ValueStore::Arrays),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum PropertyOwner {
    #[default]
    Unset,
    Node(NodeId),
    Relationship(RelId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropertyRecord {
    pub id: u64,
    pub in_use: bool,
    pub created: bool,
    pub owner: PropertyOwner,
    pub prev_prop: u64,
    pub next_prop: u64,
    pub blocks: Vec<PropertyBlock>,
    /// Value records freed by this change; the store releases their ids.
    pub deleted_records: Vec<DynamicRecord>,
    pub secondary_unit: Option<u64>,
}

impl PropertyRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            owner: PropertyOwner::Unset,
            prev_prop: NO_ID,
            next_prop: NO_ID,
            blocks: Vec::new(),
            deleted_records: Vec::new(),
            secondary_unit: None,
        }
    }

    pub fn set_node_id(&mut self, node: u64) {
        self.owner = PropertyOwner::Node(NodeId(node));
    }

    pub fn set_rel_id(&mut self, rel: u64) {
        self.owner = PropertyOwner::Relationship(RelId(rel));
    }

    pub fn node_id(&self) -> Option<NodeId> {
        match self.owner {
            PropertyOwner::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn get(&self, key: PropId) -> Option<&PropertyValue> {
        self.blocks.iter().find(|b| b.key == key).map(|b| &b.value)
    }

    /// Inserts or replaces the block for `key`.
    pub fn set(&mut self, block: PropertyBlock) {
        match self.blocks.iter_mut().find(|b| b.key == block.key) {
            Some(existing) => *existing = block,
            None => self.blocks.push(block),
        }
    }

    pub fn remove(&mut self, key: PropId) -> Option<PropertyBlock> {
        let pos = self.blocks.iter().position(|b| b.key == key)?;
        Some(self.blocks.remove(pos))
    }
}

impl_record!(PropertyRecord, secondary);

/// Record shared by the three token kinds; the command variant names the kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRecord {
    pub id: u64,
    pub in_use: bool,
    pub created: bool,
    pub name_id: u64,
    pub name_records: Vec<DynamicRecord>,
    pub internal: bool,
}

impl TokenRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            name_id: NO_ID,
            name_records: Vec::new(),
            internal: false,
        }
    }

    /// A freshly created token whose name is stored in one dynamic block.
    pub fn named(id: u64, name_id: u64, name: &str) -> Self {
        let mut name_record = DynamicRecord::with_data(name_id, name.as_bytes().to_vec());
        name_record.created = true;
        Self {
            id,
            in_use: true,
            created: true,
            name_id,
            name_records: vec![name_record],
            internal: false,
        }
    }
}

impl_record!(TokenRecord);

pub type LabelTokenRecord = TokenRecord;
pub type PropertyKeyTokenRecord = TokenRecord;
pub type RelationshipTypeTokenRecord = TokenRecord;

/// Resolved token: its id and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NamedToken {
    pub name: String,
    pub id: u32,
}

impl NamedToken {
    pub fn new(name: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

/// Head record of a schema rule's property chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaRecord {
    pub id: u64,
    pub in_use: bool,
    pub created: bool,
    pub constraint: bool,
    pub next_prop: u64,
}

impl SchemaRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            constraint: false,
            next_prop: NO_ID,
        }
    }

    pub fn initialize(mut self, in_use: bool, next_prop: u64) -> Self {
        self.in_use = in_use;
        self.next_prop = next_prop;
        self
    }
}

impl_record!(SchemaRecord);

/// Singleton graph-level record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaDataRecord {
    pub next_prop: u64,
}

impl Record for MetaDataRecord {
    fn id(&self) -> u64 {
        0
    }

    fn in_use(&self) -> bool {
        true
    }

    fn is_created(&self) -> bool {
        false
    }
}
