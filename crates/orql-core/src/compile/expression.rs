//! Expression, predicate and path translation.

use orql_proto::{FromId, SelectTree, TreeExpr, TreePredicate};

use crate::error::Error;
use crate::metamodel::{AttributeKind, EntityMapping, ScalarType};
use crate::sql::{Expression, JunctionKind, Predicate, QuerySpec, SortSpecification, TableGroup, TableGroupId};

use super::builder::{infer_scalar, reference_alias, StatementBuilder};

/// Scalar functions passed through to SQL.
const FUNCTIONS: &[&str] = &["lower", "upper", "length", "abs", "coalesce", "concat"];

/// Where a navigated path ends.
pub(crate) enum Navigated {
    /// An entity, read through `gid`.
    Entity { gid: TableGroupId, entity: String },
    Value(Expression),
    /// An embeddable whose columns carry `prefix` in the table of `alias`.
    Embedded {
        alias: String,
        embeddable: String,
        prefix: String,
    },
}

fn id_column(group: &TableGroup, mapping: &EntityMapping) -> Expression {
    Expression::column(
        group.primary_alias(),
        &mapping.identifier.column,
        Some(mapping.identifier.scalar),
    )
}

impl<'c> StatementBuilder<'c> {
    pub(crate) fn translate_expr(&mut self, expr: &TreeExpr) -> Result<Expression, Error> {
        match expr {
            TreeExpr::Path { source, attributes } => self.translate_path(*source, None, attributes),
            TreeExpr::Treated {
                source,
                target,
                attributes,
            } => self.translate_path(*source, Some(target), attributes),
            TreeExpr::Literal(value) => Ok(Expression::Literal(value.clone())),
            TreeExpr::Parameter(parameter) => Ok(Expression::parameter(
                crate::sql::ParameterSource::Query(parameter.clone()),
                None,
            )),
            TreeExpr::Arithmetic { op, lhs, rhs } => {
                let mut lhs = self.translate_expr(lhs)?;
                let mut rhs = self.translate_expr(rhs)?;
                infer_scalar(&mut lhs, rhs.scalar());
                infer_scalar(&mut rhs, lhs.scalar());
                Ok(Expression::Arithmetic {
                    op: *op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                })
            }
            TreeExpr::Function { name, arguments } => {
                let name = name.to_ascii_lowercase();
                if !FUNCTIONS.contains(&name.as_str()) {
                    return Err(Error::Parsing(format!("unknown function '{}'", name)));
                }
                let arguments = arguments
                    .iter()
                    .map(|a| self.translate_expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expression::Function { name, arguments })
            }
            TreeExpr::Aggregate {
                function,
                distinct,
                argument,
            } => {
                let argument = match argument {
                    Some(argument) => Some(Box::new(self.translate_expr(argument)?)),
                    None => None,
                };
                Ok(Expression::Aggregate {
                    function: *function,
                    distinct: *distinct,
                    argument,
                })
            }
            TreeExpr::SubQuery(select) => Ok(Expression::SubQuery(Box::new(self.subquery(select)?))),
        }
    }

    pub(crate) fn translate_predicate(&mut self, predicate: &TreePredicate) -> Result<Predicate, Error> {
        Ok(match predicate {
            TreePredicate::Comparison { lhs, op, rhs } => {
                let (lhs, rhs) = self.translate_pair(lhs, rhs)?;
                if lhs.components().len() != rhs.components().len() {
                    return Err(Error::Parsing(format!(
                        "cannot compare a {}-column value with a {}-column value",
                        lhs.components().len(),
                        rhs.components().len()
                    )));
                }
                Predicate::Comparison { lhs, op: *op, rhs }
            }
            TreePredicate::And(predicates) => self.junction(JunctionKind::And, predicates)?,
            TreePredicate::Or(predicates) => self.junction(JunctionKind::Or, predicates)?,
            TreePredicate::Not(inner) => Predicate::Negated(Box::new(self.translate_predicate(inner)?)),
            TreePredicate::IsNull { expr, negated } => Predicate::NullCheck {
                expr: self.translate_expr(expr)?,
                negated: *negated,
            },
            TreePredicate::InList { expr, values, negated } => {
                let expr = self.translate_expr(expr)?;
                let mut translated = Vec::with_capacity(values.len());
                for value in values {
                    let mut value = self.translate_expr(value)?;
                    infer_scalar(&mut value, expr.scalar());
                    translated.push(value);
                }
                if translated.is_empty() {
                    return Err(Error::Parsing("in-list must not be empty".to_string()));
                }
                Predicate::InList {
                    expr,
                    values: translated,
                    negated: *negated,
                }
            }
            TreePredicate::InSubQuery {
                expr,
                subquery,
                negated,
            } => Predicate::InSubQuery {
                expr: self.translate_expr(expr)?,
                subquery: Box::new(self.subquery(subquery)?),
                negated: *negated,
            },
            TreePredicate::Like { expr, pattern, negated } => {
                let expr = self.translate_expr(expr)?;
                let mut pattern = self.translate_expr(pattern)?;
                infer_scalar(&mut pattern, Some(ScalarType::String));
                Predicate::Like {
                    expr,
                    pattern,
                    negated: *negated,
                }
            }
            TreePredicate::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let expr = self.translate_expr(expr)?;
                let mut low = self.translate_expr(low)?;
                let mut high = self.translate_expr(high)?;
                infer_scalar(&mut low, expr.scalar());
                infer_scalar(&mut high, expr.scalar());
                Predicate::Between {
                    expr,
                    low,
                    high,
                    negated: *negated,
                }
            }
            TreePredicate::Exists { subquery, negated } => Predicate::Exists {
                subquery: Box::new(self.subquery(subquery)?),
                negated: *negated,
            },
        })
    }

    fn translate_pair(&mut self, lhs: &TreeExpr, rhs: &TreeExpr) -> Result<(Expression, Expression), Error> {
        let mut lhs = self.translate_expr(lhs)?;
        let mut rhs = self.translate_expr(rhs)?;
        infer_scalar(&mut lhs, rhs.scalar());
        infer_scalar(&mut rhs, lhs.scalar());
        Ok((lhs, rhs))
    }

    fn junction(&mut self, kind: JunctionKind, predicates: &[TreePredicate]) -> Result<Predicate, Error> {
        if predicates.is_empty() {
            return Err(Error::Parsing("empty junction".to_string()));
        }
        let predicates = predicates
            .iter()
            .map(|p| self.translate_predicate(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match kind {
            JunctionKind::And => Predicate::and(predicates),
            JunctionKind::Or => Predicate::Junction { kind, predicates },
        })
    }

    /// Translate a subquery in its own scope.
    pub(crate) fn subquery(&mut self, select: &SelectTree) -> Result<QuerySpec, Error> {
        self.push_scope();
        let filled = self.fill_subquery(select);
        let scope = self.pop_scope()?;
        filled?;
        Ok(scope.finish())
    }

    fn fill_subquery(&mut self, select: &SelectTree) -> Result<(), Error> {
        for root in &select.roots {
            self.resolve_root(*root)?;
        }
        if select.selections.is_empty() {
            let first = select
                .roots
                .first()
                .ok_or_else(|| Error::Parsing("subquery has no roots".to_string()))?;
            let id = self.translate_path(*first, None, &[])?;
            self.select(id)?;
        }
        for selection in &select.selections {
            let expression = self.translate_expr(&selection.expr)?;
            self.select(expression)?;
        }
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
        if let Some(offset) = &select.offset {
            let mut offset = self.translate_expr(offset)?;
            infer_scalar(&mut offset, Some(ScalarType::Int64));
            self.scope_mut()?.query.offset = Some(offset);
        }
        if let Some(limit) = &select.limit {
            let mut limit = self.translate_expr(limit)?;
            infer_scalar(&mut limit, Some(ScalarType::Int64));
            self.scope_mut()?.query.limit = Some(limit);
        }
        self.scope_mut()?.query.select.distinct = select.distinct;
        Ok(())
    }

    /// Translate a path used as a value. Paths ending on an entity yield its
    /// identifier, to-one paths their foreign key.
    pub(crate) fn translate_path(
        &mut self,
        source: FromId,
        treat: Option<&str>,
        attributes: &[String],
    ) -> Result<Expression, Error> {
        match self.navigate_from(source, treat, attributes, false)? {
            Navigated::Value(expression) => Ok(expression),
            Navigated::Entity { entity, .. } | Navigated::Embedded { embeddable: entity, .. } => Err(
                Error::SqlTree(format!("path into '{}' did not resolve to a value", entity)),
            ),
        }
    }

    /// Navigate from a from-node; `select` keeps entity and embeddable
    /// endpoints intact instead of reducing them to columns.
    pub(crate) fn navigate_from(
        &mut self,
        source: FromId,
        treat: Option<&str>,
        attributes: &[String],
        select: bool,
    ) -> Result<Navigated, Error> {
        let model = self.model;
        let (scope, gid) = self.lookup(source)?;
        let group = self.group(scope, gid)?;
        if let Some(element) = &group.element {
            if !attributes.is_empty() {
                return Err(Error::Parsing(format!(
                    "basic collection element '{}' has no attributes",
                    group.path
                )));
            }
            return Ok(Navigated::Value(Expression::Column(element.clone())));
        }
        let entity = group
            .entity
            .clone()
            .ok_or_else(|| Error::SqlTree(format!("group {} reads no entity", group.path)))?;
        let entity = match treat {
            Some(target) => self.treated(model.entity(&entity)?, Some(target))?.name.clone(),
            None => entity,
        };
        self.navigate(scope, gid, entity, attributes, select)
    }

    fn navigate(
        &mut self,
        scope: usize,
        mut gid: TableGroupId,
        mut entity: String,
        attributes: &[String],
        select: bool,
    ) -> Result<Navigated, Error> {
        let model = self.model;
        let mut index = 0;
        loop {
            let mapping = model.entity(&entity)?;
            let group = self.group(scope, gid)?;
            let Some(name) = attributes.get(index) else {
                return Ok(if select {
                    Navigated::Entity { gid, entity }
                } else {
                    Navigated::Value(id_column(group, model.root_of(&entity)?))
                });
            };
            let rest = &attributes[index + 1..];
            if mapping.is_identifier(name) {
                if !rest.is_empty() {
                    return Err(Error::Parsing(format!("identifier '{}' of '{}' has no attributes", name, entity)));
                }
                return Ok(Navigated::Value(id_column(group, model.root_of(&entity)?)));
            }
            let (_, attribute) = model
                .hierarchy_attribute(&entity, name)
                .ok_or_else(|| Error::unresolved(&entity, attributes.join(".")))?;
            let alias = reference_alias(group, &attribute.table)?;
            match attribute.kind() {
                AttributeKind::Basic { column, scalar, .. } => {
                    if !rest.is_empty() {
                        return Err(Error::Parsing(format!("basic attribute '{}' has no attributes", name)));
                    }
                    return Ok(Navigated::Value(Expression::column(alias, column, Some(*scalar))));
                }
                AttributeKind::Embedded {
                    embeddable,
                    column_prefix,
                } => return self.embedded_path(alias, embeddable, column_prefix, rest, select),
                AttributeKind::ToOne { target, column, .. } => {
                    let target_mapping = model.entity(target)?;
                    let fk = Expression::column(alias, column, Some(target_mapping.identifier.scalar));
                    let id_only = matches!(rest, [only] if target_mapping.is_identifier(only));
                    if id_only || (rest.is_empty() && !select) {
                        return Ok(Navigated::Value(fk));
                    }
                    gid = self.implicit_join(scope, gid, attribute)?;
                    entity = target.clone();
                    index += 1;
                }
                AttributeKind::Collection { .. } => {
                    return Err(Error::Parsing(format!(
                        "plural attribute '{}' of '{}' cannot be dereferenced, join it instead",
                        name, entity
                    )))
                }
                AttributeKind::Any {
                    meta_column,
                    key_column,
                    key_type,
                    ..
                } => {
                    if !rest.is_empty() {
                        return Err(Error::Parsing(format!("any-valued attribute '{}' cannot be dereferenced", name)));
                    }
                    return Ok(Navigated::Value(Expression::Tuple(vec![
                        Expression::column(&alias, meta_column, Some(ScalarType::String)),
                        Expression::column(&alias, key_column, Some(*key_type)),
                    ])));
                }
            }
        }
    }

    fn embedded_path(
        &mut self,
        alias: String,
        embeddable: &str,
        prefix: &str,
        rest: &[String],
        select: bool,
    ) -> Result<Navigated, Error> {
        let model = self.model;
        let mut embeddable = embeddable.to_string();
        let mut prefix = prefix.to_string();
        for (i, name) in rest.iter().enumerate() {
            let def = model.embeddable(&embeddable)?;
            let component = def
                .attributes
                .iter()
                .find(|a| a.name == *name)
                .ok_or_else(|| Error::unresolved(&embeddable, name))?;
            match &component.kind {
                AttributeKind::Basic { column, scalar, .. } => {
                    if i + 1 != rest.len() {
                        return Err(Error::Parsing(format!("basic component '{}' has no attributes", name)));
                    }
                    return Ok(Navigated::Value(Expression::column(
                        alias,
                        format!("{}{}", prefix, column),
                        Some(*scalar),
                    )));
                }
                AttributeKind::Embedded {
                    embeddable: nested,
                    column_prefix,
                } => {
                    prefix.push_str(column_prefix);
                    embeddable = nested.clone();
                }
                _ => {
                    return Err(Error::Mapping(format!(
                        "embeddable '{}' holds a non-value component '{}'",
                        embeddable, name
                    )))
                }
            }
        }
        if select {
            return Ok(Navigated::Embedded {
                alias,
                embeddable,
                prefix,
            });
        }
        let columns = model.embedded_columns(&embeddable, &prefix)?;
        Ok(Navigated::Value(Expression::Tuple(
            columns
                .into_iter()
                .map(|c| Expression::column(&alias, c.column, Some(c.scalar)))
                .collect(),
        )))
    }
}
