//! Core error types.

use thiserror::Error;

/// Errors raised while compiling, rendering, executing or assembling queries.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed query tree or unresolvable path shape.
    #[error("parsing error: {0}")]
    Parsing(String),

    /// Two from-elements requested the same identification variable.
    #[error("alias '{alias}' is already used by another from-element")]
    AliasCollision { alias: String },

    /// The execution mode does not match the statement kind.
    #[error("illegal query operation: {0}")]
    IllegalQueryOperation(String),

    /// Internal invariant violated while building or rendering a statement.
    #[error("sql tree error: {0}")]
    SqlTree(String),

    /// Entity (or polymorphic type) is not part of the metamodel.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// Attribute path does not resolve against the model.
    #[error("could not resolve attribute '{path}' of '{entity}'")]
    UnresolvedPath { entity: String, path: String },

    /// A fetch parent received two fetches for the same target.
    #[error("duplicate fetch of '{0}'")]
    DuplicateFetchParent(String),

    /// Attribute type cannot be join-fetched.
    #[error("cannot join fetch '{attribute}': {reason}")]
    IllegalFetch { attribute: String, reason: String },

    /// Metamodel definition is inconsistent.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// Database constraint violated.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        message: String,
        sql: Option<String>,
    },

    /// Lock could not be acquired in time.
    #[error("lock timeout: {message}")]
    LockTimeout {
        message: String,
        sql: Option<String>,
    },

    /// Statement exceeded its timeout.
    #[error("query timeout: {message}")]
    QueryTimeout {
        message: String,
        sql: Option<String>,
    },

    /// Any other driver error.
    #[error("jdbc error: {message}")]
    Jdbc {
        message: String,
        sql_state: Option<String>,
        vendor_code: Option<i32>,
        sql: Option<String>,
    },

    /// A non-optional association resolved to no data.
    #[error("unresolvable reference {owner}.{attribute} -> {entity}")]
    UnresolvableReference {
        entity: String,
        attribute: String,
        owner: String,
    },

    /// A different instance is already registered for the same identity.
    #[error("a different object with the same identifier is already associated with the session: {0}")]
    NonUniqueObject(String),

    /// No row exists for an identifier that had to be loaded.
    #[error("no row with the given identifier exists: {0}")]
    ObjectNotFound(String),

    /// Filter name not defined in the metamodel.
    #[error("no filter named '{0}'")]
    UnknownFilter(String),

    /// Fetch profile name not defined in the metamodel.
    #[error("no fetch profile named '{0}'")]
    UnknownFetchProfile(String),

    /// No value bound for a statement parameter.
    #[error("no value bound for parameter {0}")]
    MissingParameter(String),

    /// A value could not be converted to the expected column type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] orql_proto::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The session factory was closed.
    #[error("session factory is closed")]
    Closed,
}

impl Error {
    /// Shorthand for [`Error::UnresolvedPath`].
    pub fn unresolved(entity: impl Into<String>, path: impl Into<String>) -> Self {
        Error::UnresolvedPath {
            entity: entity.into(),
            path: path.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
