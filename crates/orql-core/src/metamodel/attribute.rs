//! Attribute definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::ScalarType;

/// When an association is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchTiming {
    /// Loaded together with the owner.
    Eager,
    /// Loaded on first access.
    Lazy,
}

/// How an eager association is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchStyle {
    /// Outer join in the owner's statement.
    Join,
    /// Subsequent select after the owner's row set.
    Select,
}

/// Mapping default for loading an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchMode {
    pub timing: FetchTiming,
    pub style: FetchStyle,
}

impl FetchMode {
    /// Eager, joined.
    pub const EAGER_JOIN: FetchMode = FetchMode {
        timing: FetchTiming::Eager,
        style: FetchStyle::Join,
    };

    /// Eager, subsequent select.
    pub const EAGER_SELECT: FetchMode = FetchMode {
        timing: FetchTiming::Eager,
        style: FetchStyle::Select,
    };

    /// Lazy.
    pub const LAZY: FetchMode = FetchMode {
        timing: FetchTiming::Lazy,
        style: FetchStyle::Select,
    };

    /// Whether the association is loaded with its owner.
    pub fn is_eager(&self) -> bool {
        self.timing == FetchTiming::Eager
    }

    /// Whether the association is loaded in the owner's statement.
    pub fn is_eager_join(&self) -> bool {
        self.is_eager() && self.style == FetchStyle::Join
    }
}

/// Physical layout of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionMapping {
    /// Elements are rows of `target` carrying a foreign key to the owner.
    OneToMany { target: String, key_column: String },
    /// Elements are linked through a join table.
    ManyToMany {
        target: String,
        table: String,
        key_column: String,
        element_column: String,
    },
    /// Basic values stored in a collection table.
    Elements {
        table: String,
        key_column: String,
        element_column: String,
        element_type: ScalarType,
    },
}

impl CollectionMapping {
    /// Entity type of the elements, if the elements are entities.
    pub fn element_entity(&self) -> Option<&str> {
        match self {
            CollectionMapping::OneToMany { target, .. }
            | CollectionMapping::ManyToMany { target, .. } => Some(target),
            CollectionMapping::Elements { .. } => None,
        }
    }

    /// Collection table owned by this collection, if any.
    pub fn collection_table(&self) -> Option<(&str, &str)> {
        match self {
            CollectionMapping::OneToMany { .. } => None,
            CollectionMapping::ManyToMany {
                table, key_column, ..
            }
            | CollectionMapping::Elements {
                table, key_column, ..
            } => Some((table, key_column)),
        }
    }
}

/// Kind-specific attribute mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeKind {
    /// Single column scalar.
    Basic {
        column: String,
        scalar: ScalarType,
        #[serde(default)]
        unique: bool,
    },
    /// Embeddable value whose columns live in the owner's table.
    Embedded {
        embeddable: String,
        #[serde(default)]
        column_prefix: String,
    },
    /// Many-to-one or one-to-one through a foreign key column.
    ToOne {
        target: String,
        column: String,
        fetch: FetchMode,
    },
    /// Plural attribute.
    Collection {
        mapping: CollectionMapping,
        fetch: FetchMode,
    },
    /// Polymorphic reference through a type column and a key column.
    Any {
        meta_column: String,
        key_column: String,
        key_type: ScalarType,
        /// Discriminator value (as stored) to entity name.
        meta_values: BTreeMap<String, String>,
    },
}

/// An attribute definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Attribute name (unique within a hierarchy).
    pub name: String,
    /// Mapping.
    pub kind: AttributeKind,
    /// Whether the attribute may be null.
    #[serde(default)]
    pub optional: bool,
    /// Secondary table holding the attribute's columns.
    #[serde(default)]
    pub table: Option<String>,
}

impl AttributeDef {
    fn with_kind(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            table: None,
        }
    }

    /// A basic attribute.
    pub fn basic(name: impl Into<String>, column: impl Into<String>, scalar: ScalarType) -> Self {
        Self::with_kind(
            name,
            AttributeKind::Basic {
                column: column.into(),
                scalar,
                unique: false,
            },
        )
    }

    /// An embedded attribute.
    pub fn embedded(
        name: impl Into<String>,
        embeddable: impl Into<String>,
        column_prefix: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            name,
            AttributeKind::Embedded {
                embeddable: embeddable.into(),
                column_prefix: column_prefix.into(),
            },
        )
    }

    /// A to-one association.
    pub fn to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        column: impl Into<String>,
        fetch: FetchMode,
    ) -> Self {
        Self::with_kind(
            name,
            AttributeKind::ToOne {
                target: target.into(),
                column: column.into(),
                fetch,
            },
        )
    }

    /// A one-to-many collection.
    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        key_column: impl Into<String>,
        fetch: FetchMode,
    ) -> Self {
        Self::with_kind(
            name,
            AttributeKind::Collection {
                mapping: CollectionMapping::OneToMany {
                    target: target.into(),
                    key_column: key_column.into(),
                },
                fetch,
            },
        )
    }

    /// A many-to-many collection.
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        table: impl Into<String>,
        key_column: impl Into<String>,
        element_column: impl Into<String>,
        fetch: FetchMode,
    ) -> Self {
        Self::with_kind(
            name,
            AttributeKind::Collection {
                mapping: CollectionMapping::ManyToMany {
                    target: target.into(),
                    table: table.into(),
                    key_column: key_column.into(),
                    element_column: element_column.into(),
                },
                fetch,
            },
        )
    }

    /// A collection of basic values.
    pub fn elements(
        name: impl Into<String>,
        table: impl Into<String>,
        key_column: impl Into<String>,
        element_column: impl Into<String>,
        element_type: ScalarType,
        fetch: FetchMode,
    ) -> Self {
        Self::with_kind(
            name,
            AttributeKind::Collection {
                mapping: CollectionMapping::Elements {
                    table: table.into(),
                    key_column: key_column.into(),
                    element_column: element_column.into(),
                    element_type,
                },
                fetch,
            },
        )
    }

    /// A polymorphic ANY reference.
    pub fn any(
        name: impl Into<String>,
        meta_column: impl Into<String>,
        key_column: impl Into<String>,
        key_type: ScalarType,
        meta_values: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self::with_kind(
            name,
            AttributeKind::Any {
                meta_column: meta_column.into(),
                key_column: key_column.into(),
                key_type,
                meta_values: meta_values.into_iter().collect(),
            },
        )
    }

    /// Mark the attribute nullable.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark a basic attribute as a unique key.
    pub fn unique(mut self) -> Self {
        if let AttributeKind::Basic { unique, .. } = &mut self.kind {
            *unique = true;
        }
        self
    }

    /// Store the attribute in a secondary table.
    pub fn in_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Whether this is a basic attribute.
    pub fn is_basic(&self) -> bool {
        matches!(self.kind, AttributeKind::Basic { .. })
    }

    /// Whether this is a plural attribute.
    pub fn is_collection(&self) -> bool {
        matches!(self.kind, AttributeKind::Collection { .. })
    }

    /// Whether this basic attribute is a unique key.
    pub fn is_unique_key(&self) -> bool {
        matches!(self.kind, AttributeKind::Basic { unique: true, .. })
    }

    /// Mapping-default fetch mode of an association.
    pub fn fetch_mode(&self) -> Option<FetchMode> {
        match &self.kind {
            AttributeKind::ToOne { fetch, .. } | AttributeKind::Collection { fetch, .. } => {
                Some(*fetch)
            }
            _ => None,
        }
    }
}
