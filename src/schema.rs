//! Key and secondary index declarations for a mapped table.

use aws_sdk_dynamodb::types::{Projection, ProjectionType, ScalarAttributeType};
use std::collections::{BTreeMap, BTreeSet};

/// Scalar type of a key attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeType {
    /// String
    S,
    /// Number
    N,
    /// Binary
    B,
}

impl AttributeType {
    /// The SDK type used in attribute definitions
    pub fn scalar(self) -> ScalarAttributeType {
        match self {
            AttributeType::S => ScalarAttributeType::S,
            AttributeType::N => ScalarAttributeType::N,
            AttributeType::B => ScalarAttributeType::B,
        }
    }
}

/// A named key attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyAttribute {
    /// Attribute name
    pub name: &'static str,
    /// Attribute type
    pub attribute_type: AttributeType,
}

impl KeyAttribute {
    /// String key attribute
    pub const fn string(name: &'static str) -> Self {
        Self {
            name,
            attribute_type: AttributeType::S,
        }
    }

    /// Number key attribute
    pub const fn number(name: &'static str) -> Self {
        Self {
            name,
            attribute_type: AttributeType::N,
        }
    }

    /// Binary key attribute
    pub const fn binary(name: &'static str) -> Self {
        Self {
            name,
            attribute_type: AttributeType::B,
        }
    }
}

/// Global or local secondary index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// Global secondary index, with its own hash key
    Global,
    /// Local secondary index, sharing the table hash key
    Local,
}

/// Attributes projected onto an index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexProjection {
    /// Every attribute
    All,
    /// Table and index keys only
    KeysOnly,
    /// Keys plus the listed attributes
    Include(&'static [&'static str]),
}

impl IndexProjection {
    pub(crate) fn to_projection(self) -> Projection {
        match self {
            IndexProjection::All => Projection::builder()
                .projection_type(ProjectionType::All)
                .build(),
            IndexProjection::KeysOnly => Projection::builder()
                .projection_type(ProjectionType::KeysOnly)
                .build(),
            IndexProjection::Include(attributes) => Projection::builder()
                .projection_type(ProjectionType::Include)
                .set_non_key_attributes(Some(
                    attributes.iter().map(|a| a.to_string()).collect(),
                ))
                .build(),
        }
    }
}

/// Declaration of a secondary index
///
/// ```
/// use dynamo_mapper::schema::{IndexSchema, KeyAttribute};
///
/// const BY_EMAIL: IndexSchema = IndexSchema::global("by-email", KeyAttribute::string("email"));
/// const BY_CREATED: IndexSchema = IndexSchema::local("by-created", KeyAttribute::string("created_at"));
/// const BY_STATUS_DATE: IndexSchema = IndexSchema::global("by-status", KeyAttribute::string("status"))
///     .with_range_key(KeyAttribute::string("created_at"));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexSchema {
    /// Index name
    pub name: &'static str,
    /// Global or local
    pub kind: IndexKind,
    /// Index hash key, `None` for local indexes
    pub hash_key: Option<KeyAttribute>,
    /// Index range key
    pub range_key: Option<KeyAttribute>,
    /// Projected attributes
    pub projection: IndexProjection,
}

impl IndexSchema {
    /// Global secondary index hashed on `hash_key`
    pub const fn global(name: &'static str, hash_key: KeyAttribute) -> Self {
        Self {
            name,
            kind: IndexKind::Global,
            hash_key: Some(hash_key),
            range_key: None,
            projection: IndexProjection::All,
        }
    }

    /// Local secondary index with `range_key`
    pub const fn local(name: &'static str, range_key: KeyAttribute) -> Self {
        Self {
            name,
            kind: IndexKind::Local,
            hash_key: None,
            range_key: Some(range_key),
            projection: IndexProjection::All,
        }
    }

    /// Add a range key (global indexes)
    pub const fn with_range_key(self, range_key: KeyAttribute) -> Self {
        Self {
            range_key: Some(range_key),
            ..self
        }
    }

    /// Change the projection
    pub const fn with_projection(self, projection: IndexProjection) -> Self {
        Self { projection, ..self }
    }

    /// Whether this is a global index
    pub fn is_global(&self) -> bool {
        self.kind == IndexKind::Global
    }
}

/// Key layout of a table and its secondary indexes
///
/// Built from the `DynamoTable` constants; indexes are looked up by the
/// attribute they are keyed on.
#[derive(Clone, Debug)]
pub struct TableKeySchema {
    pub(crate) hash_key: &'static str,
    pub(crate) range_key: Option<&'static str>,
    pub(crate) indexes: IndexCatalog,
}

impl TableKeySchema {
    /// Collect the key layout of `T`
    pub fn of<T: crate::DynamoTable>() -> Self {
        Self::new(T::PARTITION_KEY, T::SORT_KEY, T::INDEXES)
    }

    pub(crate) fn new(
        hash_key: &'static str,
        range_key: Option<&'static str>,
        indexes: &'static [IndexSchema],
    ) -> Self {
        Self {
            hash_key,
            range_key,
            indexes: IndexCatalog::new(indexes),
        }
    }

    /// Table hash key name
    pub fn hash_key(&self) -> &'static str {
        self.hash_key
    }

    /// Table range key name
    pub fn range_key(&self) -> Option<&'static str> {
        self.range_key
    }

    /// Index catalog
    pub fn indexes(&self) -> &IndexCatalog {
        &self.indexes
    }

    /// Whether `name` is the table hash key or the hash key of a global index
    pub(crate) fn is_any_hash_key(&self, name: &str) -> bool {
        name == self.hash_key || !self.indexes.gsis_on_hash_key(name).is_empty()
    }

    /// Whether `name` is the table range key or the range key of any index
    pub(crate) fn is_any_range_key(&self, name: &str) -> bool {
        self.range_key == Some(name)
            || !self.indexes.lsis_on_range_key(name).is_empty()
            || !self.indexes.gsis_on_range_key(name).is_empty()
    }
}

/// Secondary indexes grouped by key attribute
#[derive(Clone, Debug, Default)]
pub struct IndexCatalog {
    indexes: BTreeMap<&'static str, IndexSchema>,
    gsi_by_hash_key: BTreeMap<&'static str, BTreeSet<&'static str>>,
    gsi_by_range_key: BTreeMap<&'static str, BTreeSet<&'static str>>,
    lsi_by_range_key: BTreeMap<&'static str, BTreeSet<&'static str>>,
}

impl IndexCatalog {
    fn new(declared: &'static [IndexSchema]) -> Self {
        let mut catalog = Self::default();

        for index in declared {
            let _ = catalog.indexes.insert(index.name, *index);

            match index.kind {
                IndexKind::Global => {
                    if let Some(hash_key) = index.hash_key {
                        let _ = catalog
                            .gsi_by_hash_key
                            .entry(hash_key.name)
                            .or_default()
                            .insert(index.name);
                    }
                    if let Some(range_key) = index.range_key {
                        let _ = catalog
                            .gsi_by_range_key
                            .entry(range_key.name)
                            .or_default()
                            .insert(index.name);
                    }
                }
                IndexKind::Local => {
                    if let Some(range_key) = index.range_key {
                        let _ = catalog
                            .lsi_by_range_key
                            .entry(range_key.name)
                            .or_default()
                            .insert(index.name);
                    }
                }
            }
        }

        catalog
    }

    /// Look up an index by name
    pub fn get(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.get(name)
    }

    /// All declared indexes
    pub fn iter(&self) -> impl Iterator<Item = &IndexSchema> {
        self.indexes.values()
    }

    /// Names of the global indexes hashed on `attribute`
    pub fn gsis_on_hash_key(&self, attribute: &str) -> BTreeSet<&'static str> {
        self.gsi_by_hash_key
            .get(attribute)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of the global indexes ranged on `attribute`
    pub fn gsis_on_range_key(&self, attribute: &str) -> BTreeSet<&'static str> {
        self.gsi_by_range_key
            .get(attribute)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of the local indexes ranged on `attribute`
    pub fn lsis_on_range_key(&self, attribute: &str) -> BTreeSet<&'static str> {
        self.lsi_by_range_key
            .get(attribute)
            .cloned()
            .unwrap_or_default()
    }
}
