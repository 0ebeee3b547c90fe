//! Entity and embeddable definitions.

use orql_proto::Value;
use serde::{Deserialize, Serialize};

use super::attribute::AttributeDef;
use super::types::ScalarType;

/// Identifier of an entity hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierDef {
    /// Attribute name used in query paths.
    pub name: String,
    /// Column in the root table.
    pub column: String,
    /// Identifier type.
    pub scalar: ScalarType,
}

impl IdentifierDef {
    /// Create an identifier definition.
    pub fn new(name: impl Into<String>, column: impl Into<String>, scalar: ScalarType) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            scalar,
        }
    }
}

/// A secondary table joined to the entity's primary table by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryTableDef {
    pub name: String,
    pub key_column: String,
    /// Whether rows may be missing (outer join).
    #[serde(default = "default_true")]
    pub optional: bool,
}

fn default_true() -> bool {
    true
}

/// Inheritance mapping of a hierarchy, declared on its root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InheritanceStrategy {
    /// All types share one table, told apart by a discriminator column.
    SingleTable {
        discriminator_column: String,
        discriminator_type: ScalarType,
    },
    /// Each type has a table holding its own attributes, keyed by the id.
    Joined,
    /// Each concrete type has a table holding all of its attributes.
    Union,
}

/// A filter applied to an entity when enabled in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterUsage {
    /// Filter definition name.
    pub name: String,
    /// SQL condition template; `{alias}` is replaced by the table alias and
    /// `:param` placeholders by bound filter parameters.
    pub condition: String,
}

/// An entity definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name (unique within the model).
    pub name: String,
    /// Own table. Single-table subclasses have none.
    #[serde(default)]
    pub table: Option<String>,
    /// Identifier; declared on hierarchy roots only.
    #[serde(default)]
    pub identifier: Option<IdentifierDef>,
    /// Key column of a joined subclass table.
    #[serde(default)]
    pub key_column: Option<String>,
    /// Direct supertype.
    #[serde(default)]
    pub superclass: Option<String>,
    /// Inheritance strategy; declared on hierarchy roots only.
    #[serde(default)]
    pub inheritance: Option<InheritanceStrategy>,
    /// Discriminator value for single-table hierarchies.
    #[serde(default)]
    pub discriminator_value: Option<Value>,
    /// Abstract types are never instantiated.
    #[serde(default)]
    pub is_abstract: bool,
    /// Declared attributes (inherited ones excluded).
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    /// Secondary tables.
    #[serde(default)]
    pub secondary_tables: Vec<SecondaryTableDef>,
    /// Filter usages.
    #[serde(default)]
    pub filters: Vec<FilterUsage>,
}

impl EntityDef {
    /// Create a hierarchy root.
    pub fn new(name: impl Into<String>, table: impl Into<String>, identifier: IdentifierDef) -> Self {
        Self {
            name: name.into(),
            table: Some(table.into()),
            identifier: Some(identifier),
            key_column: None,
            superclass: None,
            inheritance: None,
            discriminator_value: None,
            is_abstract: false,
            attributes: Vec::new(),
            secondary_tables: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Create a subclass of `superclass`.
    pub fn subclass(name: impl Into<String>, superclass: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            identifier: None,
            key_column: None,
            superclass: Some(superclass.into()),
            inheritance: None,
            discriminator_value: None,
            is_abstract: false,
            attributes: Vec::new(),
            secondary_tables: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Add multiple attributes.
    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = AttributeDef>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    /// Set the own table (joined and union subclasses).
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Set the key column of a joined subclass table.
    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = Some(column.into());
        self
    }

    /// Declare the inheritance strategy of a hierarchy root.
    pub fn with_inheritance(mut self, strategy: InheritanceStrategy) -> Self {
        self.inheritance = Some(strategy);
        self
    }

    /// Set the discriminator value.
    pub fn with_discriminator_value(mut self, value: impl Into<Value>) -> Self {
        self.discriminator_value = Some(value.into());
        self
    }

    /// Mark the entity abstract.
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Add a secondary table.
    pub fn with_secondary_table(mut self, name: impl Into<String>, key_column: impl Into<String>) -> Self {
        self.secondary_tables.push(SecondaryTableDef {
            name: name.into(),
            key_column: key_column.into(),
            optional: true,
        });
        self
    }

    /// Apply a filter.
    pub fn with_filter(mut self, name: impl Into<String>, condition: impl Into<String>) -> Self {
        self.filters.push(FilterUsage {
            name: name.into(),
            condition: condition.into(),
        });
        self
    }

    /// Get a declared attribute by name.
    pub fn get_attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// An embeddable value type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddableDef {
    pub name: String,
    /// Component attributes; basic or nested embedded only.
    pub attributes: Vec<AttributeDef>,
}

impl EmbeddableDef {
    /// Create an embeddable.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    /// Add a component.
    pub fn with_attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metamodel::attribute::FetchMode;

    #[test]
    fn test_entity_builder() {
        let order = EntityDef::new("Order", "orders", IdentifierDef::new("id", "id", ScalarType::Int64))
            .with_attribute(AttributeDef::basic("total", "total", ScalarType::Float64))
            .with_attribute(AttributeDef::to_one("customer", "Customer", "customer_id", FetchMode::LAZY).optional())
            .with_filter("tenant", "{alias}.tenant_id = :tenantId");

        assert_eq!(order.table.as_deref(), Some("orders"));
        assert!(order.get_attribute("customer").is_some_and(|a| a.optional));
        assert!(order.get_attribute("missing").is_none());
        assert_eq!(order.filters.len(), 1);
    }

    #[test]
    fn test_subclass_has_no_identifier() {
        let dog = EntityDef::subclass("Dog", "Animal").with_discriminator_value("dog");
        assert!(dog.identifier.is_none());
        assert_eq!(dog.superclass.as_deref(), Some("Animal"));
        assert_eq!(dog.discriminator_value, Some(Value::String("dog".into())));
    }
}
