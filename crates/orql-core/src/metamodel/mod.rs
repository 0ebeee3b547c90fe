//! Domain metadata.
//!
//! A [`MetamodelDef`] is the serde-loadable description of entities,
//! embeddables, filters and fetch profiles. [`Metamodel::build`] validates it
//! once into the read-only [`Metamodel`] every compilation borrows.

pub mod attribute;
pub mod definition;
pub mod entity;
pub mod kind;
pub mod model;
pub mod types;

pub use attribute::{AttributeDef, AttributeKind, CollectionMapping, FetchMode, FetchStyle, FetchTiming};
pub use definition::{
    FetchOverride, FetchProfileDef, FilterDef, FilterParameterDef, MetamodelDef, PolymorphicTypeDef,
};
pub use entity::{EmbeddableDef, EntityDef, FilterUsage, IdentifierDef, InheritanceStrategy, SecondaryTableDef};
pub use kind::{
    discriminator_restriction, EntityCapabilities, EntityKind, SubclassKey, SubtypeResolution,
    TableGroupRequest,
};
pub use model::{collection_role, EmbeddedColumn, EntityFilter, EntityMapping, MappedAttribute, Metamodel};
pub use types::ScalarType;
