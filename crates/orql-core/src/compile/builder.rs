//! Query tree to statement tree conversion.
//!
//! One [`StatementBuilder`] converts one (already split) query tree. It keeps
//! a stack of scopes, one per query specification being built; the bottom
//! scope is the statement itself and every subquery pushes its own. Paths
//! resolve against the innermost scope that registered their from-node, so
//! correlated references reach outward naturally.

use std::collections::{HashMap, HashSet};

use orql_proto::{
    FromId, FromNode, FromNodeKind, JoinType, LoadQueryInfluencers, QueryOptions, QueryTree,
    SelectTree, TreeStatement,
};
use tracing::trace;

use crate::config::SessionFactoryConfig;
use crate::error::Error;
use crate::metamodel::{
    discriminator_restriction, AttributeKind, CollectionMapping, EntityMapping, MappedAttribute,
    Metamodel, ScalarType, TableGroupRequest,
};
use crate::render::ParameterSpec;
use crate::sql::{
    AliasGenerator, Expression, FromClause, NavigablePath, ParameterSource, Predicate, QuerySpec,
    SelectStatement, SortSpecification, TableGroup, TableGroupId, TableReference,
};

use super::{CompiledSelect, CompiledStatement, InMemoryPaging};

/// One query specification under construction.
pub(crate) struct Scope {
    pub(crate) query: QuerySpec,
    pub(crate) groups: HashMap<FromId, TableGroupId>,
    /// Implicit joins created by path navigation, reused per path.
    pub(crate) implicit: HashMap<NavigablePath, TableGroupId>,
    /// Type and filter restrictions, conjoined after the user predicate.
    pub(crate) restrictions: Vec<Predicate>,
}

impl Scope {
    fn new() -> Self {
        Self {
            query: QuerySpec::new(),
            groups: HashMap::new(),
            implicit: HashMap::new(),
            restrictions: Vec::new(),
        }
    }

    pub(crate) fn finish(mut self) -> QuerySpec {
        for restriction in self.restrictions {
            self.query.add_restriction(restriction);
        }
        self.query
    }
}

pub(crate) struct StatementBuilder<'c> {
    pub(crate) model: &'c Metamodel,
    pub(crate) config: &'c SessionFactoryConfig,
    pub(crate) options: &'c QueryOptions,
    pub(crate) influencers: &'c LoadQueryInfluencers,
    pub(crate) tree: &'c QueryTree,
    pub(crate) aliases: AliasGenerator,
    source_aliases: HashSet<String>,
    pub(crate) scopes: Vec<Scope>,
    pub(crate) collection_fetches: bool,
    pub(crate) consumed_fetches: HashSet<FromId>,
    pub(crate) apply_filters: bool,
}

impl<'c> StatementBuilder<'c> {
    pub(crate) fn new(
        model: &'c Metamodel,
        config: &'c SessionFactoryConfig,
        options: &'c QueryOptions,
        influencers: &'c LoadQueryInfluencers,
        tree: &'c QueryTree,
    ) -> Self {
        Self {
            model,
            config,
            options,
            influencers,
            tree,
            aliases: AliasGenerator::new(config.alias_stem_max_length),
            source_aliases: HashSet::new(),
            scopes: Vec::new(),
            collection_fetches: false,
            consumed_fetches: HashSet::new(),
            apply_filters: true,
        }
    }

    pub(crate) fn build(mut self) -> Result<CompiledStatement, Error> {
        let tree = self.tree;
        match &tree.statement {
            TreeStatement::Select(select) => self.build_select(select).map(CompiledStatement::Select),
            TreeStatement::Update(update) => self.build_update(update).map(CompiledStatement::Mutation),
            TreeStatement::Delete(delete) => self.build_delete(delete).map(CompiledStatement::Mutation),
        }
    }

    fn build_select(&mut self, select: &'c SelectTree) -> Result<CompiledSelect, Error> {
        self.push_scope();
        for root in &select.roots {
            self.resolve_root(*root)?;
        }
        let mapping = self.domain_results(select)?;
        self.check_fetches_consumed()?;

        if let Some(predicate) = &select.predicate {
            let predicate = self.translate_predicate(predicate)?;
            self.scope_mut()?.query.add_restriction(predicate);
        }
        for expr in &select.group_by {
            let expression = self.translate_expr(expr)?;
            self.scope_mut()?.query.group_by.push(expression);
        }
        if let Some(having) = &select.having {
            let having = self.translate_predicate(having)?;
            self.scope_mut()?.query.having = Some(having);
        }
        for sort in &select.order_by {
            let expression = self.translate_expr(&sort.expr)?;
            self.scope_mut()?.query.order_by.push(SortSpecification {
                expression,
                direction: sort.direction,
                nulls: sort.nulls,
            });
        }
        self.scope_mut()?.query.select.distinct = select.distinct;

        let (offset, limit) = if self.options.limit.is_empty() {
            (
                select.offset.as_ref().map(|e| self.translate_paging(e)).transpose()?,
                select.limit.as_ref().map(|e| self.translate_paging(e)).transpose()?,
            )
        } else {
            let limit = self.options.limit;
            (
                limit
                    .first_result
                    .map(|_| Expression::parameter(ParameterSource::FirstResult, Some(ScalarType::Int64))),
                limit
                    .max_results
                    .map(|_| Expression::parameter(ParameterSource::MaxResults, Some(ScalarType::Int64))),
            )
        };

        let in_memory_paging = if self.collection_fetches && (offset.is_some() || limit.is_some()) {
            tracing::warn!("Paging applied in memory because the query fetches a collection");
            Some(InMemoryPaging {
                offset: offset.map(paging_spec).transpose()?,
                limit: limit.map(paging_spec).transpose()?,
            })
        } else {
            let query = &mut self.scope_mut()?.query;
            query.offset = offset;
            query.limit = limit;
            None
        };

        let query = self.pop_scope()?.finish();
        let affected_tables = query.from.physical_tables();
        Ok(CompiledSelect {
            statement: SelectStatement {
                query,
                lock_mode: self.options.lock_mode,
                affected_tables,
            },
            mapping,
            in_memory_paging,
        })
    }

    fn translate_paging(&mut self, expr: &orql_proto::TreeExpr) -> Result<Expression, Error> {
        let mut expression = self.translate_expr(expr)?;
        infer_scalar(&mut expression, Some(ScalarType::Int64));
        Ok(expression)
    }

    /// Every fetch join of the statement must hang below a selected entity.
    fn check_fetches_consumed(&self) -> Result<(), Error> {
        let Some(statement) = self.scopes.first() else {
            return Ok(());
        };
        for node in self.tree.nodes() {
            if node.is_fetch() && statement.groups.contains_key(&node.id) && !self.consumed_fetches.contains(&node.id) {
                return Err(Error::Parsing(format!(
                    "query specified join fetching, but the owner of the fetched association {} was not present in the select list",
                    node.id
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    pub(crate) fn pop_scope(&mut self) -> Result<Scope, Error> {
        self.scopes
            .pop()
            .ok_or_else(|| Error::SqlTree("scope stack underflow".to_string()))
    }

    pub(crate) fn scope_mut(&mut self) -> Result<&mut Scope, Error> {
        self.scopes
            .last_mut()
            .ok_or_else(|| Error::SqlTree("no active scope".to_string()))
    }

    pub(crate) fn current_scope(&self) -> Result<usize, Error> {
        self.scopes
            .len()
            .checked_sub(1)
            .ok_or_else(|| Error::SqlTree("no active scope".to_string()))
    }

    pub(crate) fn from_mut(&mut self, scope: usize) -> Result<&mut FromClause, Error> {
        self.scopes
            .get_mut(scope)
            .map(|s| &mut s.query.from)
            .ok_or_else(|| Error::SqlTree(format!("unknown scope {}", scope)))
    }

    /// Innermost scope registering `source`, with its table group.
    pub(crate) fn lookup(&self, source: FromId) -> Result<(usize, TableGroupId), Error> {
        self.scopes
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, scope)| scope.groups.get(&source).map(|gid| (index, *gid)))
            .ok_or_else(|| Error::Parsing(format!("from-element {} is not in scope", source)))
    }

    pub(crate) fn group(&self, scope: usize, gid: TableGroupId) -> Result<&TableGroup, Error> {
        self.scopes
            .get(scope)
            .and_then(|s| s.query.from.group(gid))
            .ok_or_else(|| Error::SqlTree(format!("unknown table group {:?}", gid)))
    }

    /// Add a selection to the current scope, returning its position.
    pub(crate) fn select(&mut self, expression: Expression) -> Result<usize, Error> {
        Ok(self.scope_mut()?.query.resolve_selection(expression))
    }

    fn register_alias(&mut self, alias: Option<&str>) -> Result<(), Error> {
        if let Some(alias) = alias {
            if !self.source_aliases.insert(alias.to_string()) {
                return Err(Error::AliasCollision {
                    alias: alias.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Downcast `declared` to `treat`, which must be one of its subtypes.
    pub(crate) fn treated(&self, declared: &'c EntityMapping, treat: Option<&str>) -> Result<&'c EntityMapping, Error> {
        let model = self.model;
        match treat {
            None => Ok(declared),
            Some(target) => {
                let mapping = model.entity(target)?;
                if !model.is_subtype_of(target, &declared.name) {
                    return Err(Error::Parsing(format!(
                        "cannot treat '{}' as '{}'",
                        declared.name, target
                    )));
                }
                Ok(mapping)
            }
        }
    }

    fn create_entity_group(
        &mut self,
        mapping: &EntityMapping,
        path: NavigablePath,
        source_alias: Option<String>,
    ) -> Result<TableGroup, Error> {
        let create = mapping.capabilities().create_table_group;
        create(
            self.model,
            mapping,
            TableGroupRequest {
                path,
                source_alias,
                aliases: &mut self.aliases,
            },
        )
    }

    /// Discriminator restriction for a group reading `mapping`.
    fn type_restrictions(&self, mapping: &EntityMapping, group: &TableGroup) -> Result<Vec<Predicate>, Error> {
        let Some((column, scalar, values)) = discriminator_restriction(self.model, mapping) else {
            return Ok(Vec::new());
        };
        let alias = reference_alias(group, &mapping.root_table)?;
        Ok(vec![Predicate::InList {
            expr: Expression::column(alias, column, Some(scalar)),
            values: values.into_iter().map(Expression::Literal).collect(),
            negated: false,
        }])
    }

    /// Type restrictions plus the enabled filters of `mapping`.
    fn entity_restrictions(&self, mapping: &EntityMapping, group: &TableGroup) -> Result<Vec<Predicate>, Error> {
        let mut restrictions = self.type_restrictions(mapping, group)?;
        if self.apply_filters {
            for filter in &mapping.filters {
                if self.influencers.enabled_filters.contains_key(&filter.name) {
                    restrictions.push(Predicate::Fragment {
                        filter: filter.name.clone(),
                        alias: group.primary_alias().to_string(),
                        fragment: filter.fragment.clone(),
                    });
                }
            }
        }
        Ok(restrictions)
    }

    pub(crate) fn resolve_root(&mut self, id: FromId) -> Result<TableGroupId, Error> {
        let model = self.model;
        let tree = self.tree;
        let node = tree
            .node(id)
            .ok_or_else(|| Error::Parsing(format!("unknown from-element {}", id)))?;
        let FromNodeKind::Root { entity } = &node.kind else {
            return Err(Error::Parsing(format!("{} is not a query root", id)));
        };
        if model.get_entity(entity).is_none() && model.polymorphic_implementors(entity).is_some() {
            return Err(Error::Parsing(format!(
                "polymorphic type '{}' can only be queried as a top-level root",
                entity
            )));
        }
        let mapping = self.treated(model.entity(entity)?, node.treat_as.as_deref())?;
        self.register_alias(node.alias.as_deref())?;

        let path = NavigablePath::root(&mapping.name, node.alias.as_deref());
        let group = self.create_entity_group(mapping, path, node.alias.clone())?;
        let restrictions = self.entity_restrictions(mapping, &group)?;
        let scope = self.scope_mut()?;
        let gid = scope.query.from.add_root(group);
        scope.groups.insert(id, gid);
        scope.restrictions.extend(restrictions);
        trace!(root = %id, entity = %mapping.name, "Root resolved");

        self.resolve_joins(id, gid)?;
        Ok(gid)
    }

    fn resolve_joins(&mut self, parent: FromId, parent_gid: TableGroupId) -> Result<(), Error> {
        let tree = self.tree;
        let joins: Vec<&'c FromNode> = tree.joins_of(parent).collect();
        for node in joins {
            let gid = self.resolve_join(node, parent_gid)?;
            self.resolve_joins(node.id, gid)?;
        }
        Ok(())
    }

    fn resolve_join(&mut self, node: &'c FromNode, parent_gid: TableGroupId) -> Result<TableGroupId, Error> {
        let model = self.model;
        let scope = self.current_scope()?;
        self.register_alias(node.alias.as_deref())?;
        match &node.kind {
            FromNodeKind::Root { .. } => Err(Error::SqlTree(format!("{} is a root, not a join", node.id))),
            FromNodeKind::EntityJoin { entity, join_type, .. } => {
                let on = node.on.as_ref().ok_or_else(|| {
                    Error::Parsing(format!("entity join to '{}' requires an on clause", entity))
                })?;
                let mapping = self.treated(model.entity(entity)?, node.treat_as.as_deref())?;
                let path = NavigablePath::root(&mapping.name, node.alias.as_deref());
                let group = self.create_entity_group(mapping, path, node.alias.clone())?;
                let restrictions = self.entity_restrictions(mapping, &group)?;
                let gid = self.from_mut(scope)?.add_join(parent_gid, group, *join_type, None);
                self.scope_mut()?.groups.insert(node.id, gid);

                let mut predicates = vec![self.translate_predicate(on)?];
                predicates.extend(restrictions);
                self.and_join_predicate(scope, gid, Predicate::and(predicates))?;
                Ok(gid)
            }
            FromNodeKind::AttributeJoin {
                attribute,
                join_type,
                fetch,
                ..
            } => {
                let parent = self.group(scope, parent_gid)?;
                let parent_entity = parent.entity.clone().ok_or_else(|| {
                    Error::Parsing(format!("cannot join '{}' from a basic collection element", attribute))
                })?;
                let (_, mapped) = model
                    .hierarchy_attribute(&parent_entity, attribute)
                    .ok_or_else(|| Error::unresolved(&parent_entity, attribute))?;
                let gid = self.join_attribute(
                    scope,
                    parent_gid,
                    mapped,
                    JoinRequest {
                        join_type: *join_type,
                        treat: node.treat_as.as_deref(),
                        source_alias: node.alias.clone(),
                        fetch: *fetch,
                    },
                )?;
                self.scope_mut()?.groups.insert(node.id, gid);
                if let Some(on) = &node.on {
                    let on = self.translate_predicate(on)?;
                    self.and_join_predicate(scope, gid, on)?;
                }
                Ok(gid)
            }
        }
    }

    /// Conjoin `predicate` onto the join that attaches `gid`.
    fn and_join_predicate(&mut self, scope: usize, gid: TableGroupId, predicate: Predicate) -> Result<(), Error> {
        let from = self.from_mut(scope)?;
        let owner = from
            .groups()
            .iter()
            .find(|g| g.joins.iter().any(|j| j.group == gid))
            .map(|g| g.id)
            .ok_or_else(|| Error::SqlTree(format!("table group {:?} is not joined", gid)))?;
        let join = from
            .group_mut(owner)
            .and_then(|g| g.joins.iter_mut().find(|j| j.group == gid))
            .ok_or_else(|| Error::SqlTree(format!("table group {:?} is not joined", gid)))?;
        join.predicate = Some(Predicate::conjoin(join.predicate.take(), predicate));
        Ok(())
    }

    /// Join an association of the entity read by `parent_gid`. Returns the
    /// group holding the association target (or collection element).
    pub(crate) fn join_attribute(
        &mut self,
        scope: usize,
        parent_gid: TableGroupId,
        attribute: &'c MappedAttribute,
        request: JoinRequest<'_>,
    ) -> Result<TableGroupId, Error> {
        let model = self.model;
        let name = attribute.name();
        let (parent_path, owner_alias, owner_id) = {
            let parent = self.group(scope, parent_gid)?;
            let owner = model.entity(&attribute.declaring)?;
            (
                parent.path.clone(),
                reference_alias(parent, &attribute.table)?,
                Expression::column(
                    parent.primary_alias(),
                    &owner.identifier.column,
                    Some(owner.identifier.scalar),
                ),
            )
        };
        let path = parent_path.append(name);

        match attribute.kind() {
            AttributeKind::Basic { .. } | AttributeKind::Any { .. } => Err(if request.fetch {
                Error::IllegalFetch {
                    attribute: name.to_string(),
                    reason: "not an association".to_string(),
                }
            } else {
                Error::Parsing(format!("attribute '{}' is not joinable", name))
            }),
            AttributeKind::Embedded { .. } => Err(if request.fetch {
                Error::IllegalFetch {
                    attribute: name.to_string(),
                    reason: "embeddable values are always fetched with their owner".to_string(),
                }
            } else {
                Error::Parsing(format!(
                    "embedded attribute '{}' cannot be joined, navigate its components instead",
                    name
                ))
            }),
            AttributeKind::ToOne { target, column, .. } => {
                let declared = model.entity(target)?;
                let mapping = self.treated(declared, request.treat)?;
                let group = self.create_entity_group(mapping, path, request.source_alias)?;
                let identifier = &model.root_of(target)?.identifier;
                let mut predicates = vec![Predicate::eq(
                    Expression::column(group.primary_alias(), &identifier.column, Some(identifier.scalar)),
                    Expression::column(owner_alias, column, Some(identifier.scalar)),
                )];
                predicates.extend(self.type_restrictions(mapping, &group)?);
                Ok(self.from_mut(scope)?.add_join(
                    parent_gid,
                    group,
                    request.join_type,
                    Some(Predicate::and(predicates)),
                ))
            }
            AttributeKind::Collection { mapping, .. } => {
                let role = attribute.role();
                match mapping {
                    CollectionMapping::OneToMany { target, key_column } => {
                        let declared = model.entity(target)?;
                        let element = self.treated(declared, request.treat)?;
                        let mut group = self.create_entity_group(element, path, request.source_alias)?;
                        group.collection_role = Some(role);
                        let key_alias = reference_alias(&group, declared.primary_table())?;
                        let mut predicates = vec![Predicate::eq(
                            Expression::column(key_alias, key_column, owner_id.scalar()),
                            owner_id,
                        )];
                        predicates.extend(self.entity_restrictions(element, &group)?);
                        Ok(self.from_mut(scope)?.add_join(
                            parent_gid,
                            group,
                            request.join_type,
                            Some(Predicate::and(predicates)),
                        ))
                    }
                    CollectionMapping::ManyToMany {
                        target,
                        table,
                        key_column,
                        element_column,
                    } => {
                        let table_alias = self.aliases.allocate_base(name).next_alias();
                        let mut link = TableGroup::new(
                            TableGroupId(0),
                            path.clone(),
                            TableReference::named(table, table_alias.clone()),
                        );
                        link.collection_role = Some(role);
                        let link_on = Predicate::eq(
                            Expression::column(&table_alias, key_column, owner_id.scalar()),
                            owner_id,
                        );
                        let link_gid = self.from_mut(scope)?.add_join(parent_gid, link, request.join_type, Some(link_on));

                        let declared = model.entity(target)?;
                        let element = self.treated(declared, request.treat)?;
                        let group = self.create_entity_group(element, path.append("{element}"), request.source_alias)?;
                        let identifier = &model.root_of(target)?.identifier;
                        let mut predicates = vec![Predicate::eq(
                            Expression::column(group.primary_alias(), &identifier.column, Some(identifier.scalar)),
                            Expression::column(&table_alias, element_column, Some(identifier.scalar)),
                        )];
                        predicates.extend(self.entity_restrictions(element, &group)?);
                        Ok(self.from_mut(scope)?.add_join(
                            link_gid,
                            group,
                            request.join_type,
                            Some(Predicate::and(predicates)),
                        ))
                    }
                    CollectionMapping::Elements {
                        table,
                        key_column,
                        element_column,
                        element_type,
                    } => {
                        if let Some(target) = request.treat {
                            return Err(Error::Parsing(format!(
                                "cannot treat basic collection '{}' as '{}'",
                                name, target
                            )));
                        }
                        let alias = self.aliases.allocate_base(name).next_alias();
                        let mut group = TableGroup::new(TableGroupId(0), path, TableReference::named(table, alias.clone()));
                        group.source_alias = request.source_alias;
                        group.collection_role = Some(role);
                        group.element = Some(crate::sql::ColumnReference::new(&alias, element_column, Some(*element_type)));
                        let on = Predicate::eq(Expression::column(&alias, key_column, owner_id.scalar()), owner_id);
                        Ok(self.from_mut(scope)?.add_join(parent_gid, group, request.join_type, Some(on)))
                    }
                }
            }
        }
    }

    /// Inner join for a to-one dereferenced by a path, shared by every path
    /// through the same association within a scope.
    pub(crate) fn implicit_join(
        &mut self,
        scope: usize,
        parent_gid: TableGroupId,
        attribute: &'c MappedAttribute,
    ) -> Result<TableGroupId, Error> {
        let path = self.group(scope, parent_gid)?.path.append(attribute.name());
        if let Some(gid) = self.scopes.get(scope).and_then(|s| s.implicit.get(&path)) {
            return Ok(*gid);
        }
        let gid = self.join_attribute(
            scope,
            parent_gid,
            attribute,
            JoinRequest {
                join_type: JoinType::Inner,
                treat: None,
                source_alias: None,
                fetch: false,
            },
        )?;
        if let Some(s) = self.scopes.get_mut(scope) {
            s.implicit.insert(path, gid);
        }
        Ok(gid)
    }
}

/// Options of one attribute join.
pub(crate) struct JoinRequest<'r> {
    pub(crate) join_type: JoinType,
    pub(crate) treat: Option<&'r str>,
    pub(crate) source_alias: Option<String>,
    pub(crate) fetch: bool,
}

/// Alias of the reference of `group` holding `table`.
pub(crate) fn reference_alias(group: &TableGroup, table: &str) -> Result<String, Error> {
    group
        .reference_for_table(table)
        .map(|r| r.alias.clone())
        .ok_or_else(|| Error::SqlTree(format!("table '{}' is not part of group {}", table, group.path)))
}

/// Type an untyped parameter after the expression it meets.
pub(crate) fn infer_scalar(expression: &mut Expression, scalar: Option<ScalarType>) {
    if let Expression::Parameter(parameter) = expression {
        if parameter.scalar.is_none() {
            parameter.scalar = scalar;
        }
    }
}

/// Paging expression moved out of the statement.
fn paging_spec(expression: Expression) -> Result<ParameterSpec, Error> {
    match expression {
        Expression::Parameter(parameter) => Ok(ParameterSpec {
            source: parameter.source,
            scalar: parameter.scalar,
        }),
        Expression::Literal(value) => Ok(ParameterSpec {
            source: ParameterSource::Bound(value),
            scalar: Some(ScalarType::Int64),
        }),
        other => Err(Error::Parsing(format!(
            "paging bound must be a literal or a parameter, found {:?}",
            other
        ))),
    }
}
