//! Decoded schema rules carried alongside schema-record commands.

#![forbid(unsafe_code)]

use std::fmt;

use smallvec::SmallVec;

use crate::types::PropId;

/// Entity kind a schema rule applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum EntityType {
    Node,
    Relationship,
}

/// The (entity token, property keys) pair a rule is defined over.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SchemaDescriptor {
    pub entity: EntityType,
    /// Label id for node rules, relationship type id for relationship rules.
    pub entity_token: u32,
    pub property_keys: SmallVec<[PropId; 2]>,
}

impl SchemaDescriptor {
    pub fn for_label(label: u32, keys: &[PropId]) -> Self {
        Self {
            entity: EntityType::Node,
            entity_token: label,
            property_keys: keys.iter().copied().collect(),
        }
    }

    pub fn for_rel_type(rel_type: u32, keys: &[PropId]) -> Self {
        Self {
            entity: EntityType::Relationship,
            entity_token: rel_type,
            property_keys: keys.iter().copied().collect(),
        }
    }
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.entity {
            EntityType::Node => ":label",
            EntityType::Relationship => "-[:type",
        };
        write!(f, "{prefix}[{}](", self.entity_token)?;
        for (idx, key) in self.property_keys.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}")?;
        }
        f.write_str(")")
    }
}

/// Index rule as stored in the schema store.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct IndexDescriptor {
    pub id: u64,
    pub name: String,
    pub schema: SchemaDescriptor,
    pub provider_key: String,
    pub provider_version: String,
    pub unique: bool,
    /// Constraint rule id backing this index, if any.
    pub owning_constraint: Option<u64>,
}

impl IndexDescriptor {
    pub fn for_schema(id: u64, schema: SchemaDescriptor) -> Self {
        Self {
            id,
            name: format!("index_{id}"),
            schema,
            provider_key: "native-btree".to_owned(),
            provider_version: "1.0".to_owned(),
            unique: false,
            owning_constraint: None,
        }
    }

    pub fn unique_for_schema(id: u64, schema: SchemaDescriptor) -> Self {
        Self {
            unique: true,
            ..Self::for_schema(id, schema)
        }
    }

    pub fn with_owning_constraint(mut self, constraint: u64) -> Self {
        self.owning_constraint = Some(constraint);
        self
    }

    pub fn is_constraint_backed(&self) -> bool {
        self.unique || self.owning_constraint.is_some()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConstraintKind {
    Uniqueness,
    Existence,
    NodeKey,
}

impl ConstraintKind {
    /// Whether the constraint is enforced through an owned unique index.
    pub fn enforces_uniqueness(self) -> bool {
        matches!(self, ConstraintKind::Uniqueness | ConstraintKind::NodeKey)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConstraintRule {
    pub id: u64,
    pub name: String,
    pub kind: ConstraintKind,
    pub schema: SchemaDescriptor,
    pub owned_index: Option<u64>,
}

impl ConstraintRule {
    pub fn uniqueness(id: u64, schema: SchemaDescriptor, owned_index: u64) -> Self {
        Self {
            id,
            name: format!("constraint_{id}"),
            kind: ConstraintKind::Uniqueness,
            schema,
            owned_index: Some(owned_index),
        }
    }

    pub fn existence(id: u64, schema: SchemaDescriptor) -> Self {
        Self {
            id,
            name: format!("constraint_{id}"),
            kind: ConstraintKind::Existence,
            schema,
            owned_index: None,
        }
    }
}

/// Decoded schema rule: an index or a constraint.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum SchemaRule {
    Index(IndexDescriptor),
    Constraint(ConstraintRule),
}

impl SchemaRule {
    pub fn id(&self) -> u64 {
        match self {
            SchemaRule::Index(index) => index.id,
            SchemaRule::Constraint(constraint) => constraint.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SchemaRule::Index(index) => &index.name,
            SchemaRule::Constraint(constraint) => &constraint.name,
        }
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        match self {
            SchemaRule::Index(index) => &index.schema,
            SchemaRule::Constraint(constraint) => &constraint.schema,
        }
    }

    pub fn as_index(&self) -> Option<&IndexDescriptor> {
        match self {
            SchemaRule::Index(index) => Some(index),
            SchemaRule::Constraint(_) => None,
        }
    }

    pub fn as_constraint(&self) -> Option<&ConstraintRule> {
        match self {
            SchemaRule::Index(_) => None,
            SchemaRule::Constraint(constraint) => Some(constraint),
        }
    }
}
