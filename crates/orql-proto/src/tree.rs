//! Query tree types.
//!
//! The tree is the resolved, typed form of an object query as produced by an
//! external parser. From-elements (roots and joins) live in a flat arena owned
//! by [`QueryTree`] and are referenced everywhere else by [`FromId`], which
//! keeps the tree free of shared pointers and makes whole-tree copies a matter
//! of remapping ids.
//!
//! Note: Expressions and predicates are recursive, so these types use serde
//! only.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;

/// Identifier of a from-node within its owning [`QueryTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FromId(pub u32);

impl FromId {
    /// Arena index of this id.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FromId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// SQL join semantics requested for a join node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    /// Inner join.
    Inner,
    /// Left outer join.
    Left,
    /// Right outer join.
    Right,
}

impl JoinType {
    /// Whether the joined side may produce null rows.
    pub fn is_outer(self) -> bool {
        !matches!(self, JoinType::Inner)
    }
}

/// The kind of a from-node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FromNodeKind {
    /// A query root over an entity (or unmapped polymorphic supertype).
    Root {
        /// Entity name.
        entity: String,
    },
    /// A join through an attribute of the parent node.
    AttributeJoin {
        /// Parent from-node.
        parent: FromId,
        /// Attribute name on the parent's model.
        attribute: String,
        /// Join semantics.
        join_type: JoinType,
        /// Whether the joined association is also fetched into the parent.
        fetch: bool,
    },
    /// An ad-hoc join to an unrelated entity, placed after `parent`.
    EntityJoin {
        /// The from-node this join is attached to.
        parent: FromId,
        /// Entity name.
        entity: String,
        /// Join semantics.
        join_type: JoinType,
    },
}

/// A from-element: a root or a join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FromNode {
    /// Id of this node (equal to its arena index).
    pub id: FromId,
    /// Node kind.
    pub kind: FromNodeKind,
    /// Identification variable assigned in the source query.
    pub alias: Option<String>,
    /// Downcast target (`treat(x as Sub)`).
    pub treat_as: Option<String>,
    /// Join restriction (`on` / `with`).
    pub on: Option<TreePredicate>,
}

impl FromNode {
    /// Parent node for joins, `None` for roots.
    pub fn parent(&self) -> Option<FromId> {
        match &self.kind {
            FromNodeKind::Root { .. } => None,
            FromNodeKind::AttributeJoin { parent, .. } | FromNodeKind::EntityJoin { parent, .. } => {
                Some(*parent)
            }
        }
    }

    /// Whether this node is a fetch join.
    pub fn is_fetch(&self) -> bool {
        matches!(self.kind, FromNodeKind::AttributeJoin { fetch: true, .. })
    }
}

/// Reference to a query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterRef {
    /// `:name` parameter.
    Named(String),
    /// `?1` parameter (1-based).
    Positional(u32),
}

impl fmt::Display for ParameterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterRef::Named(name) => write!(f, ":{}", name),
            ParameterRef::Positional(position) => write!(f, "?{}", position),
        }
    }
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// A value expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeExpr {
    /// Attribute path starting at a from-node. An empty path denotes the
    /// node's entity itself.
    Path {
        source: FromId,
        attributes: Vec<String>,
    },
    /// Attribute path through a downcast of a from-node.
    Treated {
        source: FromId,
        target: String,
        attributes: Vec<String>,
    },
    /// Inline literal.
    Literal(Value),
    /// Query parameter.
    Parameter(ParameterRef),
    /// Binary arithmetic.
    Arithmetic {
        op: ArithmeticOp,
        lhs: Box<TreeExpr>,
        rhs: Box<TreeExpr>,
    },
    /// Scalar function call.
    Function {
        name: String,
        arguments: Vec<TreeExpr>,
    },
    /// Aggregate function call; `argument: None` means `count(*)`.
    Aggregate {
        function: AggregateFunction,
        distinct: bool,
        argument: Option<Box<TreeExpr>>,
    },
    /// Scalar subquery.
    SubQuery(Box<SelectTree>),
}

impl TreeExpr {
    /// The entity of a from-node.
    pub fn entity(source: FromId) -> Self {
        TreeExpr::Path {
            source,
            attributes: vec![],
        }
    }

    /// An attribute path.
    pub fn path<I, S>(source: FromId, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TreeExpr::Path {
            source,
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }

    /// An attribute path through `treat(source as target)`.
    pub fn treated<I, S>(source: FromId, target: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TreeExpr::Treated {
            source,
            target: target.into(),
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }

    /// An inline literal.
    pub fn literal(value: impl Into<Value>) -> Self {
        TreeExpr::Literal(value.into())
    }

    /// A named parameter.
    pub fn named_param(name: impl Into<String>) -> Self {
        TreeExpr::Parameter(ParameterRef::Named(name.into()))
    }

    /// A positional parameter (1-based).
    pub fn positional_param(position: u32) -> Self {
        TreeExpr::Parameter(ParameterRef::Positional(position))
    }

    /// `count(*)`.
    pub fn count_star() -> Self {
        TreeExpr::Aggregate {
            function: AggregateFunction::Count,
            distinct: false,
            argument: None,
        }
    }

    /// An aggregate over an expression.
    pub fn aggregate(function: AggregateFunction, argument: TreeExpr, distinct: bool) -> Self {
        TreeExpr::Aggregate {
            function,
            distinct,
            argument: Some(Box::new(argument)),
        }
    }

    /// A scalar function call.
    pub fn function(name: impl Into<String>, arguments: Vec<TreeExpr>) -> Self {
        TreeExpr::Function {
            name: name.into(),
            arguments,
        }
    }

    /// Binary arithmetic.
    pub fn arithmetic(op: ArithmeticOp, lhs: TreeExpr, rhs: TreeExpr) -> Self {
        TreeExpr::Arithmetic {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Visit every from-node id referenced by this expression, including
    /// those inside subqueries.
    pub fn for_each_from_id(&self, f: &mut dyn FnMut(FromId)) {
        match self {
            TreeExpr::Path { source, .. } | TreeExpr::Treated { source, .. } => f(*source),
            TreeExpr::Literal(_) | TreeExpr::Parameter(_) => {}
            TreeExpr::Arithmetic { lhs, rhs, .. } => {
                lhs.for_each_from_id(f);
                rhs.for_each_from_id(f);
            }
            TreeExpr::Function { arguments, .. } => {
                for argument in arguments {
                    argument.for_each_from_id(f);
                }
            }
            TreeExpr::Aggregate { argument, .. } => {
                if let Some(argument) = argument {
                    argument.for_each_from_id(f);
                }
            }
            TreeExpr::SubQuery(subquery) => subquery.for_each_from_id(f),
        }
    }

    /// Rewrite every from-node id referenced by this expression.
    pub fn remap_from_ids(&mut self, f: &mut dyn FnMut(FromId) -> FromId) {
        match self {
            TreeExpr::Path { source, .. } | TreeExpr::Treated { source, .. } => {
                *source = f(*source)
            }
            TreeExpr::Literal(_) | TreeExpr::Parameter(_) => {}
            TreeExpr::Arithmetic { lhs, rhs, .. } => {
                lhs.remap_from_ids(f);
                rhs.remap_from_ids(f);
            }
            TreeExpr::Function { arguments, .. } => {
                for argument in arguments {
                    argument.remap_from_ids(f);
                }
            }
            TreeExpr::Aggregate { argument, .. } => {
                if let Some(argument) = argument {
                    argument.remap_from_ids(f);
                }
            }
            TreeExpr::SubQuery(subquery) => subquery.remap_from_ids(f),
        }
    }
}

/// A boolean predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreePredicate {
    Comparison {
        lhs: TreeExpr,
        op: ComparisonOp,
        rhs: TreeExpr,
    },
    And(Vec<TreePredicate>),
    Or(Vec<TreePredicate>),
    Not(Box<TreePredicate>),
    IsNull {
        expr: TreeExpr,
        negated: bool,
    },
    InList {
        expr: TreeExpr,
        values: Vec<TreeExpr>,
        negated: bool,
    },
    InSubQuery {
        expr: TreeExpr,
        subquery: Box<SelectTree>,
        negated: bool,
    },
    Like {
        expr: TreeExpr,
        pattern: TreeExpr,
        negated: bool,
    },
    Between {
        expr: TreeExpr,
        low: TreeExpr,
        high: TreeExpr,
        negated: bool,
    },
    Exists {
        subquery: Box<SelectTree>,
        negated: bool,
    },
}

impl TreePredicate {
    /// Build a comparison.
    pub fn compare(lhs: TreeExpr, op: ComparisonOp, rhs: TreeExpr) -> Self {
        TreePredicate::Comparison { lhs, op, rhs }
    }

    /// `lhs = rhs`.
    pub fn eq(lhs: TreeExpr, rhs: TreeExpr) -> Self {
        Self::compare(lhs, ComparisonOp::Eq, rhs)
    }

    /// `lhs <> rhs`.
    pub fn ne(lhs: TreeExpr, rhs: TreeExpr) -> Self {
        Self::compare(lhs, ComparisonOp::Ne, rhs)
    }

    /// `lhs < rhs`.
    pub fn lt(lhs: TreeExpr, rhs: TreeExpr) -> Self {
        Self::compare(lhs, ComparisonOp::Lt, rhs)
    }

    /// `lhs > rhs`.
    pub fn gt(lhs: TreeExpr, rhs: TreeExpr) -> Self {
        Self::compare(lhs, ComparisonOp::Gt, rhs)
    }

    /// `expr is null`.
    pub fn is_null(expr: TreeExpr) -> Self {
        TreePredicate::IsNull {
            expr,
            negated: false,
        }
    }

    /// `expr is not null`.
    pub fn is_not_null(expr: TreeExpr) -> Self {
        TreePredicate::IsNull {
            expr,
            negated: true,
        }
    }

    /// `expr in (values...)`.
    pub fn in_list(expr: TreeExpr, values: Vec<TreeExpr>) -> Self {
        TreePredicate::InList {
            expr,
            values,
            negated: false,
        }
    }

    /// `expr like pattern`.
    pub fn like(expr: TreeExpr, pattern: TreeExpr) -> Self {
        TreePredicate::Like {
            expr,
            pattern,
            negated: false,
        }
    }

    /// `exists (subquery)`.
    pub fn exists(subquery: SelectTree) -> Self {
        TreePredicate::Exists {
            subquery: Box::new(subquery),
            negated: false,
        }
    }

    /// Conjunction.
    pub fn and(predicates: Vec<TreePredicate>) -> Self {
        TreePredicate::And(predicates)
    }

    /// Disjunction.
    pub fn or(predicates: Vec<TreePredicate>) -> Self {
        TreePredicate::Or(predicates)
    }

    /// Negation.
    pub fn not(predicate: TreePredicate) -> Self {
        TreePredicate::Not(Box::new(predicate))
    }

    /// Visit every from-node id referenced by this predicate.
    pub fn for_each_from_id(&self, f: &mut dyn FnMut(FromId)) {
        match self {
            TreePredicate::Comparison { lhs, rhs, .. } => {
                lhs.for_each_from_id(f);
                rhs.for_each_from_id(f);
            }
            TreePredicate::And(predicates) | TreePredicate::Or(predicates) => {
                for predicate in predicates {
                    predicate.for_each_from_id(f);
                }
            }
            TreePredicate::Not(predicate) => predicate.for_each_from_id(f),
            TreePredicate::IsNull { expr, .. } => expr.for_each_from_id(f),
            TreePredicate::InList { expr, values, .. } => {
                expr.for_each_from_id(f);
                for value in values {
                    value.for_each_from_id(f);
                }
            }
            TreePredicate::InSubQuery { expr, subquery, .. } => {
                expr.for_each_from_id(f);
                subquery.for_each_from_id(f);
            }
            TreePredicate::Like { expr, pattern, .. } => {
                expr.for_each_from_id(f);
                pattern.for_each_from_id(f);
            }
            TreePredicate::Between {
                expr, low, high, ..
            } => {
                expr.for_each_from_id(f);
                low.for_each_from_id(f);
                high.for_each_from_id(f);
            }
            TreePredicate::Exists { subquery, .. } => subquery.for_each_from_id(f),
        }
    }

    /// Rewrite every from-node id referenced by this predicate.
    pub fn remap_from_ids(&mut self, f: &mut dyn FnMut(FromId) -> FromId) {
        match self {
            TreePredicate::Comparison { lhs, rhs, .. } => {
                lhs.remap_from_ids(f);
                rhs.remap_from_ids(f);
            }
            TreePredicate::And(predicates) | TreePredicate::Or(predicates) => {
                for predicate in predicates {
                    predicate.remap_from_ids(f);
                }
            }
            TreePredicate::Not(predicate) => predicate.remap_from_ids(f),
            TreePredicate::IsNull { expr, .. } => expr.remap_from_ids(f),
            TreePredicate::InList { expr, values, .. } => {
                expr.remap_from_ids(f);
                for value in values {
                    value.remap_from_ids(f);
                }
            }
            TreePredicate::InSubQuery { expr, subquery, .. } => {
                expr.remap_from_ids(f);
                subquery.remap_from_ids(f);
            }
            TreePredicate::Like { expr, pattern, .. } => {
                expr.remap_from_ids(f);
                pattern.remap_from_ids(f);
            }
            TreePredicate::Between {
                expr, low, high, ..
            } => {
                expr.remap_from_ids(f);
                low.remap_from_ids(f);
                high.remap_from_ids(f);
            }
            TreePredicate::Exists { subquery, .. } => subquery.remap_from_ids(f),
        }
    }
}

/// A selected expression with an optional result alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub expr: TreeExpr,
    pub alias: Option<String>,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Null ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullPrecedence {
    First,
    Last,
}

/// A sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub expr: TreeExpr,
    pub direction: SortDirection,
    pub nulls: Option<NullPrecedence>,
}

impl SortSpec {
    /// Ascending sort.
    pub fn asc(expr: TreeExpr) -> Self {
        Self {
            expr,
            direction: SortDirection::Asc,
            nulls: None,
        }
    }

    /// Descending sort.
    pub fn desc(expr: TreeExpr) -> Self {
        Self {
            expr,
            direction: SortDirection::Desc,
            nulls: None,
        }
    }

    /// Set null precedence.
    pub fn with_nulls(mut self, nulls: NullPrecedence) -> Self {
        self.nulls = Some(nulls);
        self
    }
}

/// A select query (top level or subquery).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectTree {
    /// Root from-nodes; their joins are found through the node arena.
    pub roots: Vec<FromId>,
    pub distinct: bool,
    pub selections: Vec<Selection>,
    pub predicate: Option<TreePredicate>,
    pub group_by: Vec<TreeExpr>,
    pub having: Option<TreePredicate>,
    pub order_by: Vec<SortSpec>,
    pub offset: Option<TreeExpr>,
    pub limit: Option<TreeExpr>,
}

impl SelectTree {
    /// Create a select over the given roots.
    pub fn new(roots: Vec<FromId>) -> Self {
        Self {
            roots,
            distinct: false,
            selections: vec![],
            predicate: None,
            group_by: vec![],
            having: None,
            order_by: vec![],
            offset: None,
            limit: None,
        }
    }

    /// Add a selection.
    pub fn with_selection(mut self, expr: TreeExpr) -> Self {
        self.selections.push(Selection { expr, alias: None });
        self
    }

    /// Add an aliased selection.
    pub fn with_aliased_selection(mut self, expr: TreeExpr, alias: impl Into<String>) -> Self {
        self.selections.push(Selection {
            expr,
            alias: Some(alias.into()),
        });
        self
    }

    /// Set the where predicate.
    pub fn with_predicate(mut self, predicate: TreePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Add a sort key.
    pub fn with_order(mut self, sort: SortSpec) -> Self {
        self.order_by.push(sort);
        self
    }

    /// Add a group-by expression.
    pub fn with_group_by(mut self, expr: TreeExpr) -> Self {
        self.group_by.push(expr);
        self
    }

    /// Set the having predicate.
    pub fn with_having(mut self, predicate: TreePredicate) -> Self {
        self.having = Some(predicate);
        self
    }

    /// Mark the select distinct.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Set offset and limit expressions.
    pub fn with_paging(mut self, offset: Option<TreeExpr>, limit: Option<TreeExpr>) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Visit every from-node id referenced by this select's expressions.
    pub fn for_each_from_id(&self, f: &mut dyn FnMut(FromId)) {
        for root in &self.roots {
            f(*root);
        }
        for selection in &self.selections {
            selection.expr.for_each_from_id(f);
        }
        if let Some(predicate) = &self.predicate {
            predicate.for_each_from_id(f);
        }
        for expr in &self.group_by {
            expr.for_each_from_id(f);
        }
        if let Some(having) = &self.having {
            having.for_each_from_id(f);
        }
        for sort in &self.order_by {
            sort.expr.for_each_from_id(f);
        }
        for expr in self.offset.iter().chain(self.limit.iter()) {
            expr.for_each_from_id(f);
        }
    }

    /// Rewrite every from-node id referenced by this select.
    pub fn remap_from_ids(&mut self, f: &mut dyn FnMut(FromId) -> FromId) {
        for root in &mut self.roots {
            *root = f(*root);
        }
        for selection in &mut self.selections {
            selection.expr.remap_from_ids(f);
        }
        if let Some(predicate) = &mut self.predicate {
            predicate.remap_from_ids(f);
        }
        for expr in &mut self.group_by {
            expr.remap_from_ids(f);
        }
        if let Some(having) = &mut self.having {
            having.remap_from_ids(f);
        }
        for sort in &mut self.order_by {
            sort.expr.remap_from_ids(f);
        }
        for expr in self.offset.iter_mut().chain(self.limit.iter_mut()) {
            expr.remap_from_ids(f);
        }
    }
}

/// A single `set path = value` assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub path: Vec<String>,
    pub value: TreeExpr,
}

/// An update statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTree {
    pub target: FromId,
    pub assignments: Vec<Assignment>,
    pub predicate: Option<TreePredicate>,
}

impl UpdateTree {
    /// Create an update of the given root.
    pub fn new(target: FromId) -> Self {
        Self {
            target,
            assignments: vec![],
            predicate: None,
        }
    }

    /// Add an assignment.
    pub fn set<I, S>(mut self, path: I, value: TreeExpr) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assignments.push(Assignment {
            path: path.into_iter().map(Into::into).collect(),
            value,
        });
        self
    }

    /// Set the where predicate.
    pub fn with_predicate(mut self, predicate: TreePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

/// A delete statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteTree {
    pub target: FromId,
    pub predicate: Option<TreePredicate>,
}

impl DeleteTree {
    /// Create a delete of the given root.
    pub fn new(target: FromId) -> Self {
        Self {
            target,
            predicate: None,
        }
    }

    /// Set the where predicate.
    pub fn with_predicate(mut self, predicate: TreePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

/// Top-level statement of a query tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeStatement {
    Select(SelectTree),
    Update(UpdateTree),
    Delete(DeleteTree),
}

impl TreeStatement {
    /// Short name of the statement kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TreeStatement::Select(_) => "select",
            TreeStatement::Update(_) => "update",
            TreeStatement::Delete(_) => "delete",
        }
    }
}

/// A complete query tree: the from-node arena plus the statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTree {
    nodes: Vec<FromNode>,
    pub statement: TreeStatement,
}

impl QueryTree {
    /// Start building a tree.
    pub fn builder() -> QueryTreeBuilder {
        QueryTreeBuilder::default()
    }

    /// Assemble a tree from an existing arena and statement.
    pub fn from_parts(nodes: Vec<FromNode>, statement: TreeStatement) -> Self {
        Self { nodes, statement }
    }

    /// All from-nodes in declaration order.
    pub fn nodes(&self) -> &[FromNode] {
        &self.nodes
    }

    /// Look up a from-node.
    pub fn node(&self, id: FromId) -> Option<&FromNode> {
        self.nodes.get(id.index())
    }

    /// Joins declared directly on `parent`, in declaration order.
    pub fn joins_of(&self, parent: FromId) -> impl Iterator<Item = &FromNode> {
        self.nodes
            .iter()
            .filter(move |node| node.parent() == Some(parent))
    }

    /// Root entity name of a root node.
    pub fn root_entity(&self, id: FromId) -> Option<&str> {
        match self.node(id).map(|node| &node.kind) {
            Some(FromNodeKind::Root { entity }) => Some(entity),
            _ => None,
        }
    }

    /// Check structural consistency: ids match arena positions, joins come
    /// after their parents and every referenced id exists.
    pub fn validate(&self) -> Result<(), Error> {
        for (index, node) in self.nodes.iter().enumerate() {
            if node.id.index() != index {
                return Err(Error::InvalidTree(format!(
                    "node {} stored at position {}",
                    node.id, index
                )));
            }
            if let Some(parent) = node.parent() {
                if parent.index() >= self.nodes.len() {
                    return Err(Error::UnknownFromNode(parent));
                }
                if parent.index() >= index {
                    return Err(Error::JoinBeforeParent {
                        parent,
                        child: node.id,
                    });
                }
            }
        }

        let mut missing = None;
        let len = self.nodes.len();
        let mut check = |id: FromId| {
            if id.index() >= len && missing.is_none() {
                missing = Some(id);
            }
        };
        for node in &self.nodes {
            if let Some(on) = &node.on {
                on.for_each_from_id(&mut check);
            }
        }
        match &self.statement {
            TreeStatement::Select(select) => {
                select.for_each_from_id(&mut check);
            }
            TreeStatement::Update(update) => {
                check(update.target);
                for assignment in &update.assignments {
                    assignment.value.for_each_from_id(&mut check);
                }
                if let Some(predicate) = &update.predicate {
                    predicate.for_each_from_id(&mut check);
                }
            }
            TreeStatement::Delete(delete) => {
                check(delete.target);
                if let Some(predicate) = &delete.predicate {
                    predicate.for_each_from_id(&mut check);
                }
            }
        }
        if let Some(id) = missing {
            return Err(Error::UnknownFromNode(id));
        }

        let roots: Vec<FromId> = match &self.statement {
            TreeStatement::Select(select) => select.roots.clone(),
            TreeStatement::Update(update) => vec![update.target],
            TreeStatement::Delete(delete) => vec![delete.target],
        };
        for root in roots {
            if self.root_entity(root).is_none() {
                return Err(Error::InvalidTree(format!(
                    "{} is used as a root but is not a root node",
                    root
                )));
            }
        }
        Ok(())
    }
}

/// Incremental builder for [`QueryTree`] arenas.
#[derive(Debug, Default)]
pub struct QueryTreeBuilder {
    nodes: Vec<FromNode>,
}

impl QueryTreeBuilder {
    fn push(&mut self, kind: FromNodeKind, alias: Option<String>) -> FromId {
        let id = FromId(self.nodes.len() as u32);
        self.nodes.push(FromNode {
            id,
            kind,
            alias,
            treat_as: None,
            on: None,
        });
        id
    }

    /// Add a root.
    pub fn root(&mut self, entity: impl Into<String>) -> FromId {
        self.push(
            FromNodeKind::Root {
                entity: entity.into(),
            },
            None,
        )
    }

    /// Add a root with an identification variable.
    pub fn root_as(&mut self, entity: impl Into<String>, alias: impl Into<String>) -> FromId {
        self.push(
            FromNodeKind::Root {
                entity: entity.into(),
            },
            Some(alias.into()),
        )
    }

    /// Add a plain attribute join.
    pub fn join(&mut self, parent: FromId, attribute: impl Into<String>, join_type: JoinType) -> FromId {
        self.push(
            FromNodeKind::AttributeJoin {
                parent,
                attribute: attribute.into(),
                join_type,
                fetch: false,
            },
            None,
        )
    }

    /// Add a fetch join.
    pub fn fetch_join(
        &mut self,
        parent: FromId,
        attribute: impl Into<String>,
        join_type: JoinType,
    ) -> FromId {
        self.push(
            FromNodeKind::AttributeJoin {
                parent,
                attribute: attribute.into(),
                join_type,
                fetch: true,
            },
            None,
        )
    }

    /// Add an entity join attached after `parent`.
    pub fn entity_join(
        &mut self,
        parent: FromId,
        entity: impl Into<String>,
        join_type: JoinType,
        on: TreePredicate,
    ) -> FromId {
        let id = self.push(
            FromNodeKind::EntityJoin {
                parent,
                entity: entity.into(),
                join_type,
            },
            None,
        );
        self.nodes[id.index()].on = Some(on);
        id
    }

    /// Mutable access to a node added earlier, for aliases, treats and join
    /// restrictions.
    ///
    /// # Panics
    ///
    /// Panics if the id was not produced by this builder.
    pub fn node_mut(&mut self, id: FromId) -> &mut FromNode {
        &mut self.nodes[id.index()]
    }

    /// Set the identification variable of a node.
    pub fn alias(&mut self, id: FromId, alias: impl Into<String>) -> &mut Self {
        self.node_mut(id).alias = Some(alias.into());
        self
    }

    /// Downcast a node.
    pub fn treat(&mut self, id: FromId, target: impl Into<String>) -> &mut Self {
        self.node_mut(id).treat_as = Some(target.into());
        self
    }

    /// Finish with a select statement.
    pub fn select(self, select: SelectTree) -> QueryTree {
        QueryTree::from_parts(self.nodes, TreeStatement::Select(select))
    }

    /// Finish with an update statement.
    pub fn update(self, update: UpdateTree) -> QueryTree {
        QueryTree::from_parts(self.nodes, TreeStatement::Update(update))
    }

    /// Finish with a delete statement.
    pub fn delete(self, delete: DeleteTree) -> QueryTree {
        QueryTree::from_parts(self.nodes, TreeStatement::Delete(delete))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_assigns_sequential_ids() {
        let mut builder = QueryTree::builder();
        let order = builder.root("Order");
        let lines = builder.join(order, "lines", JoinType::Inner);
        assert_eq!(order, FromId(0));
        assert_eq!(lines, FromId(1));

        let tree = builder.select(SelectTree::new(vec![order]).with_selection(TreeExpr::entity(order)));
        assert_eq!(tree.joins_of(order).count(), 1);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_dangling_reference() {
        let mut builder = QueryTree::builder();
        let order = builder.root("Order");
        let tree = builder.select(
            SelectTree::new(vec![order]).with_selection(TreeExpr::path(FromId(9), ["id"])),
        );
        assert!(matches!(tree.validate(), Err(Error::UnknownFromNode(FromId(9)))));
    }

    #[test]
    fn test_validate_rejects_join_as_root() {
        let mut builder = QueryTree::builder();
        let order = builder.root("Order");
        let customer = builder.join(order, "customer", JoinType::Inner);
        let tree = builder.select(SelectTree::new(vec![customer]));
        assert!(matches!(tree.validate(), Err(Error::InvalidTree(_))));
    }

    #[test]
    fn test_remap_reaches_subqueries() {
        let mut builder = QueryTree::builder();
        let order = builder.root("Order");
        let line = builder.root("Line");
        let sub = SelectTree::new(vec![line])
            .with_predicate(TreePredicate::eq(
                TreeExpr::path(line, ["order"]),
                TreeExpr::entity(order),
            ));
        let mut predicate = TreePredicate::exists(sub);

        predicate.remap_from_ids(&mut |id| FromId(id.0 + 10));

        let mut seen = Vec::new();
        predicate.for_each_from_id(&mut |id| seen.push(id));
        assert_eq!(seen, vec![FromId(11), FromId(11), FromId(10)]);
    }
}
