//! Query tree validation errors.

use thiserror::Error;

use crate::tree::FromId;

/// Errors raised while building or validating a query tree.
#[derive(Debug, Error)]
pub enum Error {
    /// A node or expression references a from-node that does not exist.
    #[error("unknown from-node {0}")]
    UnknownFromNode(FromId),

    /// A join references a parent that is declared after it.
    #[error("join {child} is declared before its parent {parent}")]
    JoinBeforeParent { parent: FromId, child: FromId },

    /// The tree shape is invalid.
    #[error("invalid query tree: {0}")]
    InvalidTree(String),
}
