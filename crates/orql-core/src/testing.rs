//! Shared fixture model for unit tests.

use crate::metamodel::{
    AttributeDef, EmbeddableDef, EntityDef, FetchMode, FetchProfileDef, FetchStyle, FilterDef,
    IdentifierDef, InheritanceStrategy, Metamodel, MetamodelDef, ScalarType,
};

fn id() -> IdentifierDef {
    IdentifierDef::new("id", "id", ScalarType::Int64)
}

/// Shop domain plus a joined animal hierarchy.
pub fn shop_def() -> MetamodelDef {
    MetamodelDef::new()
        .with_embeddable(
            EmbeddableDef::new("Address")
                .with_attribute(AttributeDef::basic("street", "street", ScalarType::String))
                .with_attribute(AttributeDef::basic("city", "city", ScalarType::String)),
        )
        .with_entity(
            EntityDef::new("Customer", "customer", id())
                .with_attribute(AttributeDef::basic("name", "name", ScalarType::String))
                .with_attribute(AttributeDef::basic("email", "email", ScalarType::String).unique())
                .with_attribute(AttributeDef::embedded("address", "Address", "addr_").optional())
                .with_attribute(AttributeDef::one_to_many("orders", "Order", "customer_id", FetchMode::LAZY)),
        )
        .with_entity(
            EntityDef::new("Order", "orders", id())
                .with_attribute(AttributeDef::basic("number", "number", ScalarType::String).unique())
                .with_attribute(AttributeDef::basic("total", "total", ScalarType::Float64))
                .with_attribute(AttributeDef::basic("status", "status", ScalarType::String))
                .with_attribute(AttributeDef::to_one("customer", "Customer", "customer_id", FetchMode::LAZY).optional())
                .with_attribute(AttributeDef::one_to_many("lines", "OrderLine", "order_id", FetchMode::LAZY))
                .with_attribute(AttributeDef::elements(
                    "tags",
                    "order_tag",
                    "order_id",
                    "tag",
                    ScalarType::String,
                    FetchMode::LAZY,
                ))
                .with_filter("status", "{alias}.status = :status"),
        )
        .with_entity(
            EntityDef::new("OrderLine", "order_line", id())
                .with_attribute(AttributeDef::basic("quantity", "quantity", ScalarType::Int32))
                .with_attribute(AttributeDef::to_one("product", "Product", "product_id", FetchMode::EAGER_JOIN))
                .with_attribute(AttributeDef::to_one("order", "Order", "order_id", FetchMode::LAZY)),
        )
        .with_entity(
            EntityDef::new("Product", "product", id())
                .with_attribute(AttributeDef::basic("name", "name", ScalarType::String))
                .with_attribute(AttributeDef::basic("price", "price", ScalarType::Float64)),
        )
        .with_entity(
            EntityDef::new("Animal", "animal", id())
                .with_inheritance(InheritanceStrategy::Joined)
                .abstract_type()
                .with_attribute(AttributeDef::basic("name", "name", ScalarType::String)),
        )
        .with_entity(
            EntityDef::subclass("Dog", "Animal")
                .with_table("dog")
                .with_attribute(AttributeDef::basic("barks", "barks", ScalarType::Bool)),
        )
        .with_entity(
            EntityDef::subclass("Cat", "Animal")
                .with_table("cat")
                .with_attribute(AttributeDef::basic("lives", "lives", ScalarType::Int32)),
        )
        .with_polymorphic_type("Named", ["Customer", "Product"])
        .with_filter(FilterDef::new("status").with_parameter("status", ScalarType::String))
        .with_fetch_profile(FetchProfileDef::new("with-customer").with_fetch("Order", "customer", FetchStyle::Join))
}

/// Built shop model.
pub fn shop() -> Metamodel {
    Metamodel::build(shop_def()).unwrap()
}
