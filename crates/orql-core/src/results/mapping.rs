//! How result-set positions map onto domain results.
//!
//! Built by the compiler next to the statement tree. Every position refers to
//! a selection of the rendered statement.

use std::collections::BTreeMap;

use orql_proto::Value;

use crate::metamodel::ScalarType;
use crate::sql::NavigablePath;

/// Position-to-result mapping of one select statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSetMapping {
    /// One entry per selection of the query, in order.
    pub results: Vec<DomainResult>,
    /// Result aliases; unaliased selections use their index.
    pub aliases: Vec<String>,
    /// Whether any collection is join-fetched, which makes root rows repeat.
    pub collection_fetches: bool,
}

impl ResultSetMapping {
    /// Whether the query returns a single entity per row.
    pub fn is_single_entity(&self) -> bool {
        matches!(self.results.as_slice(), [DomainResult::Entity(_)])
    }
}

/// A top-level result.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainResult {
    Basic { position: usize, scalar: Option<ScalarType> },
    Embeddable(EmbeddableFetch),
    Entity(EntityResult),
}

/// Reads the columns of an embeddable.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddableFetch {
    pub components: Vec<ComponentFetch>,
}

/// One component of an embeddable.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentFetch {
    Basic { position: usize, scalar: ScalarType },
    Embedded(EmbeddableFetch),
}

/// Reads one entity and its fetches from a row.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityResult {
    pub path: NavigablePath,
    /// Queried entity; rows may be of a subtype.
    pub entity: String,
    /// Hierarchy root, the entity name of keys.
    pub root: String,
    pub id_position: usize,
    pub id_scalar: ScalarType,
    pub subtype: SubtypeReader,
    /// Every attribute readable through the queried type, subtype
    /// attributes included.
    pub fetches: Vec<Fetch>,
}

impl EntityResult {
    /// Fetch of `attribute`.
    pub fn fetch(&self, attribute: &str) -> Option<&Fetch> {
        self.fetches.iter().find(|f| f.attribute == attribute)
    }
}

/// How the concrete type of a row is read.
#[derive(Debug, Clone, PartialEq)]
pub enum SubtypeReader {
    Fixed(String),
    Discriminator {
        position: usize,
        scalar: ScalarType,
        values: Vec<(Value, String)>,
    },
    /// Subclass table keys, most derived first; the first non-null key
    /// names the type.
    SubclassKeys {
        keys: Vec<(usize, String)>,
        default: String,
    },
    UnionClass {
        position: usize,
        values: Vec<(i64, String)>,
    },
}

/// One attribute of an entity result.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetch {
    pub attribute: String,
    pub kind: FetchKind,
}

/// How an attribute is read.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchKind {
    Basic {
        position: usize,
        scalar: ScalarType,
    },
    Embedded(EmbeddableFetch),
    /// Target columns are joined into the statement.
    JoinedEntity {
        fk_position: usize,
        optional: bool,
        result: Box<EntityResult>,
    },
    /// Only the foreign key is read. Eager targets are loaded by a
    /// subsequent select.
    EntityKey {
        position: usize,
        target: String,
        eager: bool,
    },
    /// Element rows are joined into the statement.
    JoinedCollection {
        role: String,
        element: CollectionElementResult,
    },
    /// Nothing is read; eager collections are loaded by a subsequent select.
    DelayedCollection { role: String, eager: bool },
    Any {
        meta_position: usize,
        key_position: usize,
        key_scalar: ScalarType,
        meta_values: BTreeMap<String, String>,
    },
}

/// Element reader of a joined collection.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionElementResult {
    Entity(Box<EntityResult>),
    Value { position: usize, scalar: ScalarType },
}
