//! SQL dialects.

use std::fmt::Debug;

use orql_proto::{LockMode, NullPrecedence, Value};

use crate::exec::{DriverError, ErrorCategory};

/// A piece of a rendered paging clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingPiece {
    Text(&'static str),
    Offset,
    Limit,
}

/// Database-specific rendering rules.
///
/// Dialects are shared by every session of a factory.
pub trait Dialect: Send + Sync + Debug {
    /// Short dialect name.
    fn name(&self) -> &'static str;

    /// Render an inline literal.
    fn render_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Bool(b) => self.render_bool(*b).to_string(),
            Value::Int32(i) => i.to_string(),
            Value::Int64(i) | Value::Timestamp(i) => i.to_string(),
            Value::Float64(f) => format!("{:?}", f),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Bytes(bytes) => format!("X'{}'", hex::encode(bytes)),
            Value::Uuid(bytes) => format!("'{}'", hex::encode(bytes)),
        }
    }

    /// Render a boolean literal.
    fn render_bool(&self, value: bool) -> &'static str {
        if value {
            "true"
        } else {
            "false"
        }
    }

    /// Paging clause for the given offset/limit presence, in render order.
    fn paging(&self, offset: bool, limit: bool) -> Vec<PagingPiece>;

    /// Locking clause appended to a select, if the dialect supports one.
    fn for_update(&self, lock_mode: LockMode) -> Option<&'static str>;

    /// Null precedence suffix of a sort key.
    fn nulls_precedence(&self, nulls: NullPrecedence) -> Option<&'static str> {
        Some(match nulls {
            NullPrecedence::First => " nulls first",
            NullPrecedence::Last => " nulls last",
        })
    }

    /// Dialect-specific classification of a driver error.
    fn classify_error(&self, _error: &DriverError) -> Option<ErrorCategory> {
        None
    }
}

/// Standard SQL rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiDialect;

impl Dialect for AnsiDialect {
    fn name(&self) -> &'static str {
        "ansi"
    }

    fn paging(&self, offset: bool, limit: bool) -> Vec<PagingPiece> {
        let mut pieces = Vec::new();
        if offset {
            pieces.extend([
                PagingPiece::Text(" offset "),
                PagingPiece::Offset,
                PagingPiece::Text(" rows"),
            ]);
        }
        if limit {
            pieces.extend([
                PagingPiece::Text(" fetch first "),
                PagingPiece::Limit,
                PagingPiece::Text(" rows only"),
            ]);
        }
        pieces
    }

    fn for_update(&self, lock_mode: LockMode) -> Option<&'static str> {
        match lock_mode {
            LockMode::PessimisticWrite => Some(" for update"),
            LockMode::PessimisticRead => Some(" for share"),
            _ => None,
        }
    }
}

/// SQLite rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

// Primary result codes.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_INTERRUPT: i32 = 9;
const SQLITE_CONSTRAINT: i32 = 19;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn render_bool(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn paging(&self, offset: bool, limit: bool) -> Vec<PagingPiece> {
        match (offset, limit) {
            (false, false) => Vec::new(),
            (false, true) => vec![PagingPiece::Text(" limit "), PagingPiece::Limit],
            (true, false) => vec![PagingPiece::Text(" limit -1 offset "), PagingPiece::Offset],
            (true, true) => vec![
                PagingPiece::Text(" limit "),
                PagingPiece::Limit,
                PagingPiece::Text(" offset "),
                PagingPiece::Offset,
            ],
        }
    }

    fn for_update(&self, _lock_mode: LockMode) -> Option<&'static str> {
        None
    }

    fn classify_error(&self, error: &DriverError) -> Option<ErrorCategory> {
        match error.vendor_code? & 0xff {
            SQLITE_CONSTRAINT => Some(ErrorCategory::ConstraintViolation),
            SQLITE_BUSY | SQLITE_LOCKED => Some(ErrorCategory::LockTimeout),
            SQLITE_INTERRUPT => Some(ErrorCategory::QueryTimeout),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals() {
        let ansi = AnsiDialect;
        assert_eq!(ansi.render_literal(&Value::String("O'Brien".into())), "'O''Brien'");
        assert_eq!(ansi.render_literal(&Value::Bytes(vec![0xab, 0x01])), "X'ab01'");
        assert_eq!(ansi.render_literal(&Value::Bool(true)), "true");
        assert_eq!(SqliteDialect.render_literal(&Value::Bool(true)), "1");
    }

    #[test]
    fn test_sqlite_offset_without_limit() {
        assert_eq!(
            SqliteDialect.paging(true, false),
            vec![PagingPiece::Text(" limit -1 offset "), PagingPiece::Offset]
        );
        assert_eq!(AnsiDialect.paging(true, true).len(), 6);
    }

    #[test]
    fn test_sqlite_error_codes() {
        let error = DriverError::new("UNIQUE constraint failed").with_vendor_code(2067);
        assert_eq!(
            SqliteDialect.classify_error(&error),
            Some(ErrorCategory::ConstraintViolation)
        );
        assert_eq!(AnsiDialect.classify_error(&error), None);
    }
}
