//! Domain results and fetch decisions.
//!
//! Every selected entity reads its identifier, the columns telling its
//! concrete type apart, and every attribute readable through its table group.
//! Associations are either joined into the statement or left to a later
//! select; the decision considers, in order, explicit fetch joins, the
//! entity graph, enabled fetch profiles, the internal fetch profile and the
//! mapping default. Default and profile joins stop at the configured depth
//! and at associations cycling back into a hierarchy already being fetched.

use orql_proto::{AttributeNode, FromId, FromNode, FromNodeKind, GraphSemantic, JoinType, SelectTree, TreeExpr};
use tracing::warn;

use crate::error::Error;
use crate::metamodel::{AttributeKind, FetchMode, FetchStyle, MappedAttribute, ScalarType, SubtypeResolution};
use crate::results::{
    CollectionElementResult, ComponentFetch, DomainResult, EmbeddableFetch, EntityResult, Fetch, FetchKind,
    ResultSetMapping, SubtypeReader,
};
use crate::sql::{Expression, TableGroup, TableGroupId, UNION_CLASS_COLUMN};

use super::builder::{reference_alias, JoinRequest, StatementBuilder};
use super::expression::Navigated;

/// Outcome of a fetch decision.
enum Decision<'g> {
    Join(Option<&'g [AttributeNode]>),
    Select { eager: bool },
}

/// Walk state of one entity result tree.
struct FetchContext<'g> {
    depth: u32,
    /// Hierarchy roots of the entities being fetched above this one.
    ancestors: Vec<String>,
    graph: Option<&'g [AttributeNode]>,
}

impl<'c> StatementBuilder<'c> {
    pub(crate) fn domain_results(&mut self, select: &SelectTree) -> Result<ResultSetMapping, Error> {
        let mut results = Vec::new();
        let mut aliases = Vec::new();
        if select.selections.is_empty() {
            for (i, root) in select.roots.iter().enumerate() {
                results.push(self.selection_result(&TreeExpr::entity(*root))?);
                aliases.push(i.to_string());
            }
        } else {
            for (i, selection) in select.selections.iter().enumerate() {
                results.push(self.selection_result(&selection.expr)?);
                aliases.push(selection.alias.clone().unwrap_or_else(|| i.to_string()));
            }
        }
        Ok(ResultSetMapping {
            results,
            aliases,
            collection_fetches: self.collection_fetches,
        })
    }

    fn selection_result(&mut self, expr: &TreeExpr) -> Result<DomainResult, Error> {
        let navigated = match expr {
            TreeExpr::Path { source, attributes } => self.navigate_from(*source, None, attributes, true)?,
            TreeExpr::Treated {
                source,
                target,
                attributes,
            } => self.navigate_from(*source, Some(target), attributes, true)?,
            other => Navigated::Value(self.translate_expr(other)?),
        };
        let source = match expr {
            TreeExpr::Path { source, attributes } | TreeExpr::Treated { source, attributes, .. }
                if attributes.is_empty() =>
            {
                Some(*source)
            }
            _ => None,
        };
        match navigated {
            Navigated::Value(expression) => {
                if let Expression::Tuple(_) = expression {
                    return Err(Error::Parsing("multi-column value cannot be selected".to_string()));
                }
                let scalar = expression.scalar();
                Ok(DomainResult::Basic {
                    position: self.select(expression)?,
                    scalar,
                })
            }
            Navigated::Embedded {
                alias,
                embeddable,
                prefix,
            } => Ok(DomainResult::Embeddable(self.embeddable_fetch(&alias, &embeddable, &prefix)?)),
            Navigated::Entity { gid, entity } => {
                let graph = self.root_graph(&entity);
                let mut context = FetchContext {
                    depth: 0,
                    ancestors: Vec::new(),
                    graph,
                };
                Ok(DomainResult::Entity(self.entity_result(gid, &entity, source, &mut context)?))
            }
        }
    }

    /// Attribute nodes of the entity graph when it applies to `entity`.
    fn root_graph(&self, entity: &str) -> Option<&'c [AttributeNode]> {
        let options = self.options;
        let hint = options.entity_graph.as_ref()?;
        let root = &hint.graph.root;
        (self.model.is_subtype_of(entity, root) || self.model.is_subtype_of(root, entity))
            .then_some(hint.graph.attribute_nodes.as_slice())
    }

    fn entity_result(
        &mut self,
        gid: TableGroupId,
        entity: &str,
        source: Option<FromId>,
        context: &mut FetchContext<'c>,
    ) -> Result<EntityResult, Error> {
        let model = self.model;
        let tree = self.tree;
        let scope = self.current_scope()?;
        let mapping = model.entity(entity)?;
        let root = model.root_of(entity)?;
        let group = self.group(scope, gid)?.clone();

        let id_position = self.select(Expression::column(
            group.primary_alias(),
            &root.identifier.column,
            Some(root.identifier.scalar),
        ))?;
        let subtype = self.subtype_reader(mapping, &group)?;

        let explicit: Vec<&'c FromNode> = match source {
            Some(source) => tree.joins_of(source).filter(|n| n.is_fetch()).collect(),
            None => Vec::new(),
        };
        context.ancestors.push(root.name.clone());
        let mut fetches = Vec::new();
        for attribute in model.polymorphic_state(entity)? {
            let kind = self.attribute_fetch(&group, attribute, &explicit, context)?;
            fetches.push(Fetch {
                attribute: attribute.name().to_string(),
                kind,
            });
        }
        context.ancestors.pop();

        Ok(EntityResult {
            path: group.path.clone(),
            entity: entity.to_string(),
            root: root.name.clone(),
            id_position,
            id_scalar: root.identifier.scalar,
            subtype,
            fetches,
        })
    }

    fn subtype_reader(&mut self, mapping: &crate::metamodel::EntityMapping, group: &TableGroup) -> Result<SubtypeReader, Error> {
        let resolve = mapping.capabilities().resolve_loader;
        Ok(match resolve(self.model, mapping) {
            SubtypeResolution::Fixed => SubtypeReader::Fixed(mapping.name.clone()),
            SubtypeResolution::Discriminator {
                table,
                column,
                scalar,
                values,
            } => SubtypeReader::Discriminator {
                position: self.select(Expression::column(reference_alias(group, &table)?, column, Some(scalar)))?,
                scalar,
                values,
            },
            SubtypeResolution::SubclassKeys { keys } => {
                let mut positions = Vec::with_capacity(keys.len());
                for key in keys {
                    let alias = reference_alias(group, &key.table)?;
                    positions.push((self.select(Expression::column(alias, key.column, None))?, key.entity));
                }
                SubtypeReader::SubclassKeys {
                    keys: positions,
                    default: mapping.name.clone(),
                }
            }
            SubtypeResolution::UnionClass { values } => SubtypeReader::UnionClass {
                position: self.select(Expression::column(
                    group.primary_alias(),
                    UNION_CLASS_COLUMN,
                    Some(ScalarType::Int64),
                ))?,
                values,
            },
        })
    }

    pub(crate) fn embeddable_fetch(&mut self, alias: &str, embeddable: &str, prefix: &str) -> Result<EmbeddableFetch, Error> {
        let model = self.model;
        let def = model.embeddable(embeddable)?;
        let mut components = Vec::with_capacity(def.attributes.len());
        for component in &def.attributes {
            match &component.kind {
                AttributeKind::Basic { column, scalar, .. } => components.push(ComponentFetch::Basic {
                    position: self.select(Expression::column(alias, format!("{}{}", prefix, column), Some(*scalar)))?,
                    scalar: *scalar,
                }),
                AttributeKind::Embedded {
                    embeddable: nested,
                    column_prefix,
                } => components.push(ComponentFetch::Embedded(self.embeddable_fetch(
                    alias,
                    nested,
                    &format!("{}{}", prefix, column_prefix),
                )?)),
                _ => {
                    return Err(Error::Mapping(format!(
                        "embeddable '{}' holds a non-value component '{}'",
                        embeddable, component.name
                    )))
                }
            }
        }
        Ok(EmbeddableFetch { components })
    }

    fn attribute_fetch(
        &mut self,
        group: &TableGroup,
        attribute: &'c MappedAttribute,
        explicit: &[&'c FromNode],
        context: &mut FetchContext<'c>,
    ) -> Result<FetchKind, Error> {
        let model = self.model;
        let scope = self.current_scope()?;
        let alias = reference_alias(group, &attribute.table)?;
        match attribute.kind() {
            AttributeKind::Basic { column, scalar, .. } => Ok(FetchKind::Basic {
                position: self.select(Expression::column(alias, column, Some(*scalar)))?,
                scalar: *scalar,
            }),
            AttributeKind::Embedded {
                embeddable,
                column_prefix,
            } => Ok(FetchKind::Embedded(self.embeddable_fetch(&alias, embeddable, column_prefix)?)),
            AttributeKind::Any {
                meta_column,
                key_column,
                key_type,
                meta_values,
            } => Ok(FetchKind::Any {
                meta_position: self.select(Expression::column(&alias, meta_column, None))?,
                key_position: self.select(Expression::column(&alias, key_column, Some(*key_type)))?,
                key_scalar: *key_type,
                meta_values: meta_values.clone(),
            }),
            AttributeKind::ToOne { target, column, fetch } => {
                let id_scalar = model.root_of(target)?.identifier.scalar;
                let fk_position = self.select(Expression::column(alias, column, Some(id_scalar)))?;
                let optional = attribute.def.optional;
                if let Some(node) = self.explicit_fetch(group, explicit, attribute)? {
                    let (_, target_gid) = self.lookup(node.id)?;
                    let target_entity = self.group_entity(scope, target_gid)?;
                    let subgraph = subgraph_of(context.graph, attribute.name());
                    let result = self.nested_result(target_gid, &target_entity, Some(node.id), subgraph, context)?;
                    return Ok(FetchKind::JoinedEntity {
                        fk_position,
                        optional,
                        result: Box::new(result),
                    });
                }
                match self.decide(attribute, *fetch, Some(target), context) {
                    Decision::Join(subgraph) => {
                        let target_gid = self.join_attribute(scope, group.id, attribute, fetch_join())?;
                        let result = self.nested_result(target_gid, target, None, subgraph, context)?;
                        Ok(FetchKind::JoinedEntity {
                            fk_position,
                            optional,
                            result: Box::new(result),
                        })
                    }
                    Decision::Select { eager } => Ok(FetchKind::EntityKey {
                        position: fk_position,
                        target: target.clone(),
                        eager,
                    }),
                }
            }
            AttributeKind::Collection { mapping, fetch } => {
                let role = attribute.role();
                if let Some(node) = self.explicit_fetch(group, explicit, attribute)? {
                    let (_, element_gid) = self.lookup(node.id)?;
                    let subgraph = subgraph_of(context.graph, attribute.name());
                    let element = self.collection_element(element_gid, Some(node.id), subgraph, context)?;
                    self.collection_fetches = true;
                    return Ok(FetchKind::JoinedCollection { role, element });
                }
                match self.decide(attribute, *fetch, mapping.element_entity(), context) {
                    Decision::Join(subgraph) => {
                        let element_gid = self.join_attribute(scope, group.id, attribute, fetch_join())?;
                        let element = self.collection_element(element_gid, None, subgraph, context)?;
                        self.collection_fetches = true;
                        Ok(FetchKind::JoinedCollection { role, element })
                    }
                    Decision::Select { eager } => Ok(FetchKind::DelayedCollection { role, eager }),
                }
            }
        }
    }

    fn nested_result(
        &mut self,
        gid: TableGroupId,
        entity: &str,
        source: Option<FromId>,
        graph: Option<&'c [AttributeNode]>,
        context: &mut FetchContext<'c>,
    ) -> Result<EntityResult, Error> {
        let outer = std::mem::replace(&mut context.graph, graph);
        context.depth += 1;
        let result = self.entity_result(gid, entity, source, context);
        context.depth -= 1;
        context.graph = outer;
        result
    }

    fn collection_element(
        &mut self,
        element_gid: TableGroupId,
        source: Option<FromId>,
        graph: Option<&'c [AttributeNode]>,
        context: &mut FetchContext<'c>,
    ) -> Result<CollectionElementResult, Error> {
        let scope = self.current_scope()?;
        let group = self.group(scope, element_gid)?;
        if let Some(element) = group.element.clone() {
            let scalar = element
                .scalar
                .ok_or_else(|| Error::SqlTree(format!("element column {} has no type", element.column)))?;
            return Ok(CollectionElementResult::Value {
                position: self.select(Expression::Column(element))?,
                scalar,
            });
        }
        let entity = self.group_entity(scope, element_gid)?;
        let result = self.nested_result(element_gid, &entity, source, graph, context)?;
        Ok(CollectionElementResult::Entity(Box::new(result)))
    }

    fn group_entity(&self, scope: usize, gid: TableGroupId) -> Result<String, Error> {
        let group = self.group(scope, gid)?;
        group
            .entity
            .clone()
            .ok_or_else(|| Error::SqlTree(format!("group {} reads no entity", group.path)))
    }

    /// The explicit fetch join of `attribute`, marking it consumed. Further
    /// fetch joins of the same attribute are dropped with a warning or
    /// rejected, depending on configuration.
    fn explicit_fetch(
        &mut self,
        group: &TableGroup,
        explicit: &[&'c FromNode],
        attribute: &MappedAttribute,
    ) -> Result<Option<&'c FromNode>, Error> {
        let mut matching = explicit.iter().copied().filter(|n| {
            matches!(&n.kind, FromNodeKind::AttributeJoin { attribute: a, .. } if a == attribute.name())
        });
        let first = matching.next();
        let duplicates: Vec<&FromNode> = matching.collect();
        for duplicate in duplicates {
            let path = group.path.append(attribute.name()).to_string();
            if self.config.fail_on_duplicate_fetch {
                return Err(Error::DuplicateFetchParent(path));
            }
            warn!(path = %path, node = %duplicate.id, "Duplicate fetch join ignored");
            self.drop_fetch_join(duplicate)?;
        }
        if let Some(node) = first {
            self.consumed_fetches.insert(node.id);
        }
        Ok(first)
    }

    /// Remove an ignored fetch join and everything joined below it from the
    /// statement. References to them no longer resolve.
    fn drop_fetch_join(&mut self, node: &'c FromNode) -> Result<(), Error> {
        let tree = self.tree;
        let (scope, gid) = self.lookup(node.id)?;
        let mut pending = vec![node];
        while let Some(dropped) = pending.pop() {
            self.consumed_fetches.insert(dropped.id);
            if let Some(registered) = self.scopes.get_mut(scope) {
                registered.groups.remove(&dropped.id);
            }
            pending.extend(tree.joins_of(dropped.id));
        }
        self.from_mut(scope)?.detach(gid);
        Ok(())
    }

    fn decide(
        &self,
        attribute: &MappedAttribute,
        mode: FetchMode,
        target: Option<&str>,
        context: &FetchContext<'c>,
    ) -> Decision<'c> {
        let options = self.options;
        if let (Some(hint), Some(nodes)) = (&options.entity_graph, context.graph) {
            if let Some(node) = nodes.iter().find(|n| n.attribute == attribute.name()) {
                return Decision::Join(Some(node.subgraph.as_slice()));
            }
            if hint.semantic == GraphSemantic::Fetch {
                return Decision::Select { eager: false };
            }
        }

        let joinable = context.depth < self.config.max_fetch_depth
            && !target.is_some_and(|t| {
                self.model
                    .root_of(t)
                    .is_ok_and(|root| context.ancestors.contains(&root.name))
            });

        if let Some(style) = self.profile_style(attribute) {
            return match style {
                FetchStyle::Join if joinable => Decision::Join(None),
                _ => Decision::Select { eager: true },
            };
        }
        let to_one = matches!(attribute.kind(), AttributeKind::ToOne { .. });
        if mode.is_eager_join() || (to_one && mode.is_eager() && self.influencers.internal_fetch_profile.is_some()) {
            return if joinable {
                Decision::Join(None)
            } else {
                Decision::Select { eager: true }
            };
        }
        Decision::Select { eager: mode.is_eager() }
    }

    /// Style an enabled fetch profile sets for `attribute`.
    fn profile_style(&self, attribute: &MappedAttribute) -> Option<FetchStyle> {
        let model = self.model;
        self.influencers
            .enabled_fetch_profiles
            .iter()
            .filter_map(|name| model.fetch_profile(name))
            .flat_map(|profile| profile.fetches.iter())
            .find(|fetch| {
                fetch.attribute == attribute.name()
                    && (model.is_subtype_of(&attribute.declaring, &fetch.entity)
                        || model.is_subtype_of(&fetch.entity, &attribute.declaring))
            })
            .map(|fetch| fetch.style)
    }
}

fn subgraph_of<'g>(graph: Option<&'g [AttributeNode]>, attribute: &str) -> Option<&'g [AttributeNode]> {
    graph
        .and_then(|nodes| nodes.iter().find(|n| n.attribute == attribute))
        .map(|n| n.subgraph.as_slice())
}

fn fetch_join() -> JoinRequest<'static> {
    JoinRequest {
        join_type: JoinType::Left,
        treat: None,
        source_alias: None,
        fetch: true,
    }
}
