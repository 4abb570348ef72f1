//! # Entity Metadata Port
//!
//! Read-only lookup of entity-to-table mappings consumed by optimizer rules
//! that depend on NULL semantics or referential guarantees.
//!
//! The optimizer only ever reads through the [`EntityMetadata`] trait; the
//! concrete [`MetadataRegistry`] is an immutable in-memory registry built at
//! startup (typically from the host application's entity definitions) and
//! shared for the process lifetime.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Error types for metadata lookups
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    /// No entity registered under this name
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
    /// Entity exists but does not declare this property
    #[error("unknown property '{property}' on entity '{entity}'")]
    UnknownProperty { entity: String, property: String },
}

/// Relationship kind between two entities, as declared on a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    OneToMany,
    ManyToOne,
    OneToOne,
    /// The property is a plain column, not a relation
    None,
}

impl RelationKind {
    /// True for relations that resolve to at most one related row
    pub fn is_to_one(self) -> bool {
        matches!(self, RelationKind::ManyToOne | RelationKind::OneToOne)
    }
}

/// Read-only metadata operations the optimizer consumes
pub trait EntityMetadata {
    /// Whether an entity is registered under this name
    fn entity_exists(&self, entity: &str) -> bool;

    /// Table name backing the entity
    fn table_of(&self, entity: &str) -> Result<&str, MetadataError>;

    /// Property name to column name map for the entity
    fn column_map(&self, entity: &str) -> Result<BTreeMap<String, String>, MetadataError>;

    /// Ordered primary-key properties of the entity
    fn primary_key_columns(&self, entity: &str) -> Result<Vec<String>, MetadataError>;

    /// Whether the column backing a property admits NULL
    fn is_column_nullable(&self, entity: &str, property: &str) -> Result<bool, MetadataError>;

    /// Relationship kind declared on a property. Unknown entities or
    /// properties report [`RelationKind::None`] rather than an error so that
    /// rules can probe speculatively.
    fn relation_kind(&self, entity: &str, property: &str) -> RelationKind;

    /// Target entity of a to-one or to-many relation property, if any
    fn relation_target(&self, entity: &str, property: &str) -> Option<String>;

    /// Entities holding a foreign key to this one
    fn dependent_entities(&self, entity: &str) -> BTreeSet<String>;
}

/// Column declaration for a property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name in the backing table
    pub column: String,
    /// Whether the column is declared NULLable
    pub nullable: bool,
}

/// Relation declaration for a property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    pub kind: RelationKind,
    /// Entity on the other side of the relation
    pub target: String,
}

/// One registered entity: table mapping, columns, keys, relations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    pub table: String,
    /// Property name -> column declaration
    pub columns: BTreeMap<String, ColumnDef>,
    /// Ordered primary-key property names
    pub primary_key: Vec<String>,
    /// Property name -> relation declaration
    #[serde(default)]
    pub relations: BTreeMap<String, RelationDef>,
}

impl EntityDef {
    /// Start a definition for `name` backed by `table`
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        EntityDef {
            name: name.into(),
            table: table.into(),
            columns: BTreeMap::new(),
            primary_key: Vec::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Declare a column-backed property
    pub fn column(
        mut self,
        property: impl Into<String>,
        column: impl Into<String>,
        nullable: bool,
    ) -> Self {
        self.columns.insert(
            property.into(),
            ColumnDef {
                column: column.into(),
                nullable,
            },
        );
        self
    }

    /// Declare the ordered primary-key properties
    pub fn primary_key(mut self, properties: &[&str]) -> Self {
        self.primary_key = properties.iter().map(|p| (*p).to_string()).collect();
        self
    }

    /// Declare a relation property
    pub fn relation(
        mut self,
        property: impl Into<String>,
        kind: RelationKind,
        target: impl Into<String>,
    ) -> Self {
        self.relations.insert(
            property.into(),
            RelationDef {
                kind,
                target: target.into(),
            },
        );
        self
    }
}

/// Immutable in-memory registry of entity metadata.
///
/// Built once at startup and read-only afterwards; lookups are synchronous
/// map reads, so the optimizer never blocks on metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataRegistry {
    entities: BTreeMap<String, EntityDef>,
}

impl MetadataRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        MetadataRegistry {
            entities: BTreeMap::new(),
        }
    }

    /// Register an entity definition, replacing any previous one of the
    /// same name
    pub fn register(&mut self, entity: EntityDef) -> &mut Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Look up a registered entity
    pub fn get(&self, entity: &str) -> Option<&EntityDef> {
        self.entities.get(entity)
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn entity(&self, entity: &str) -> Result<&EntityDef, MetadataError> {
        self.entities
            .get(entity)
            .ok_or_else(|| MetadataError::UnknownEntity(entity.to_string()))
    }
}

impl EntityMetadata for MetadataRegistry {
    fn entity_exists(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    fn table_of(&self, entity: &str) -> Result<&str, MetadataError> {
        Ok(&self.entity(entity)?.table)
    }

    fn column_map(&self, entity: &str) -> Result<BTreeMap<String, String>, MetadataError> {
        Ok(self
            .entity(entity)?
            .columns
            .iter()
            .map(|(prop, def)| (prop.clone(), def.column.clone()))
            .collect())
    }

    fn primary_key_columns(&self, entity: &str) -> Result<Vec<String>, MetadataError> {
        Ok(self.entity(entity)?.primary_key.clone())
    }

    fn is_column_nullable(&self, entity: &str, property: &str) -> Result<bool, MetadataError> {
        let def = self.entity(entity)?;
        def.columns
            .get(property)
            .map(|c| c.nullable)
            .ok_or_else(|| MetadataError::UnknownProperty {
                entity: entity.to_string(),
                property: property.to_string(),
            })
    }

    fn relation_kind(&self, entity: &str, property: &str) -> RelationKind {
        self.entities
            .get(entity)
            .and_then(|def| def.relations.get(property))
            .map_or(RelationKind::None, |rel| rel.kind)
    }

    fn relation_target(&self, entity: &str, property: &str) -> Option<String> {
        self.entities
            .get(entity)
            .and_then(|def| def.relations.get(property))
            .map(|rel| rel.target.clone())
    }

    fn dependent_entities(&self, entity: &str) -> BTreeSet<String> {
        self.entities
            .values()
            .filter(|def| {
                def.relations
                    .values()
                    .any(|rel| rel.kind == RelationKind::ManyToOne && rel.target == entity)
            })
            .map(|def| def.name.clone())
            .collect()
    }
}
