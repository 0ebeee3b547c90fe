//! orql input contract.
//!
//! This crate defines the types the compiler core consumes: the resolved,
//! typed query tree produced by an external parser, the runtime values bound
//! into statements, and the per-execution options and influencers.
//!
//! # Modules
//!
//! - [`value`] - Runtime value types for parameters, literals and row values
//! - [`tree`] - Arena-based query tree (roots, joins, selections, predicates)
//! - [`options`] - Query options, lock modes, entity graphs, influencers
//! - [`params`] - Parameter bindings for a single execution
//! - [`error`] - Tree validation errors
//!
//! # Serialization
//!
//! All types derive `serde::Serialize` and `serde::Deserialize`, so trees can
//! be stored as JSON and fingerprinted structurally:
//!
//! ```ignore
//! use orql_proto::{QueryTree, TreeExpr};
//!
//! let mut builder = QueryTree::builder();
//! let order = builder.root("Order");
//! let tree = builder.select(SelectTree::new(vec![order]).with_selection(TreeExpr::entity(order)));
//! let json = serde_json::to_string(&tree).unwrap();
//! ```

pub mod error;
pub mod options;
pub mod params;
pub mod tree;
pub mod value;

pub use error::Error;

pub use options::{
    AttributeNode, EntityGraph, EntityGraphHint, GraphSemantic, InternalFetchProfile, Limit,
    LoadQueryInfluencers, LockMode, QueryOptions, TupleTransformer,
};
pub use params::QueryParameterBindings;
pub use tree::{
    AggregateFunction, ArithmeticOp, Assignment, ComparisonOp, DeleteTree, FromId, FromNode,
    FromNodeKind, JoinType, NullPrecedence, ParameterRef, QueryTree, QueryTreeBuilder, Selection,
    SelectTree, SortDirection, SortSpec, TreeExpr, TreePredicate, TreeStatement, UpdateTree,
};
pub use value::Value;
