//! Relational statement tree.
//!
//! Produced by the compiler, consumed by the renderer. Table groups live in a
//! per-query arena ([`FromClause`]); expressions refer to tables by alias.

pub mod alias;
pub mod ast;
pub mod expression;
pub mod fragment;
pub mod path;
pub mod statement;

pub use alias::{alias_stem, AliasBase, AliasGenerator};
pub use ast::{
    FromClause, TableGroup, TableGroupId, TableGroupJoin, TableReference, TableReferenceJoin,
    TableSource, UnionMember, UnionTable, UNION_CLASS_COLUMN,
};
pub use expression::{
    ColumnReference, Expression, JdbcParameter, JunctionKind, ParameterSource, Predicate,
};
pub use fragment::{FilterFragment, FragmentPiece};
pub use path::NavigablePath;
pub use statement::{
    DeleteStatement, MultiTableMutation, MutationKind, MutationStatement, MutationTable,
    QuerySpec, SelectClause, SelectStatement, SortSpecification, SqlAssignment, SqlSelection,
    UpdateStatement,
};
