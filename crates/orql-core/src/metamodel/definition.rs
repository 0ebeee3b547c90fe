//! Serializable model definition.

use serde::{Deserialize, Serialize};

use super::attribute::FetchStyle;
use super::entity::{EmbeddableDef, EntityDef};
use super::types::ScalarType;
use crate::error::Error;

/// A filter parameter declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParameterDef {
    pub name: String,
    pub scalar: ScalarType,
}

/// A named filter; entities opt in through [`FilterUsage`](super::FilterUsage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDef {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<FilterParameterDef>,
}

impl FilterDef {
    /// Create a filter definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    /// Declare a parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, scalar: ScalarType) -> Self {
        self.parameters.push(FilterParameterDef {
            name: name.into(),
            scalar,
        });
        self
    }

    /// Look up a parameter declaration.
    pub fn parameter(&self, name: &str) -> Option<&FilterParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// One association override in a fetch profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchOverride {
    pub entity: String,
    pub attribute: String,
    pub style: FetchStyle,
}

/// A named set of fetch overrides enabled per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchProfileDef {
    pub name: String,
    pub fetches: Vec<FetchOverride>,
}

impl FetchProfileDef {
    /// Create an empty profile.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fetches: Vec::new(),
        }
    }

    /// Add an override.
    pub fn with_fetch(
        mut self,
        entity: impl Into<String>,
        attribute: impl Into<String>,
        style: FetchStyle,
    ) -> Self {
        self.fetches.push(FetchOverride {
            entity: entity.into(),
            attribute: attribute.into(),
            style,
        });
        self
    }
}

/// A queryable supertype with no mapping of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolymorphicTypeDef {
    pub name: String,
    pub implementors: Vec<String>,
}

/// Complete model definition as loaded from configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetamodelDef {
    #[serde(default)]
    pub entities: Vec<EntityDef>,
    #[serde(default)]
    pub embeddables: Vec<EmbeddableDef>,
    #[serde(default)]
    pub polymorphic_types: Vec<PolymorphicTypeDef>,
    #[serde(default)]
    pub filters: Vec<FilterDef>,
    #[serde(default)]
    pub fetch_profiles: Vec<FetchProfileDef>,
}

impl MetamodelDef {
    /// Create an empty definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    /// Add an embeddable.
    pub fn with_embeddable(mut self, embeddable: EmbeddableDef) -> Self {
        self.embeddables.push(embeddable);
        self
    }

    /// Add an unmapped polymorphic supertype.
    pub fn with_polymorphic_type(
        mut self,
        name: impl Into<String>,
        implementors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.polymorphic_types.push(PolymorphicTypeDef {
            name: name.into(),
            implementors: implementors.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Add a filter definition.
    pub fn with_filter(mut self, filter: FilterDef) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add a fetch profile.
    pub fn with_fetch_profile(mut self, profile: FetchProfileDef) -> Self {
        self.fetch_profiles.push(profile);
        self
    }

    /// Parse a JSON definition.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
