//! Driver error translation.

use crate::error::Error;
use crate::render::Dialect;

use super::driver::{DriverError, ErrorCategory};

/// Translates driver errors into [`Error`] kinds: the dialect decides first,
/// then the SQLState class.
pub struct SqlExceptionConverter<'d> {
    dialect: &'d dyn Dialect,
}

impl<'d> SqlExceptionConverter<'d> {
    /// Create a converter for a dialect.
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self { dialect }
    }

    /// Classify a driver error.
    pub fn categorize(&self, error: &DriverError) -> ErrorCategory {
        if let Some(category) = self.dialect.classify_error(error) {
            return category;
        }
        match error.sql_state.as_deref() {
            Some(state) if state.starts_with("23") => ErrorCategory::ConstraintViolation,
            Some("HYT00") | Some("HYT01") | Some("57014") => ErrorCategory::QueryTimeout,
            Some("40001") | Some("40P01") | Some("55P03") => ErrorCategory::LockTimeout,
            _ => ErrorCategory::Generic,
        }
    }

    /// Translate a driver error raised while running `sql`.
    pub fn convert(&self, error: DriverError, sql: Option<&str>) -> Error {
        let sql = sql.map(str::to_string);
        match self.categorize(&error) {
            ErrorCategory::ConstraintViolation => Error::ConstraintViolation {
                message: error.message,
                sql,
            },
            ErrorCategory::LockTimeout => Error::LockTimeout {
                message: error.message,
                sql,
            },
            ErrorCategory::QueryTimeout => Error::QueryTimeout {
                message: error.message,
                sql,
            },
            ErrorCategory::Generic => Error::Jdbc {
                message: error.message,
                sql_state: error.sql_state,
                vendor_code: error.vendor_code,
                sql,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{AnsiDialect, SqliteDialect};

    #[test]
    fn test_sql_state_fallback() {
        let converter = SqlExceptionConverter::new(&AnsiDialect);
        let error = DriverError::new("duplicate key").with_sql_state("23505");
        assert!(matches!(
            converter.convert(error, Some("insert ...")),
            Error::ConstraintViolation { sql: Some(_), .. }
        ));
        assert_eq!(
            converter.categorize(&DriverError::new("timeout").with_sql_state("HYT00")),
            ErrorCategory::QueryTimeout
        );
        assert_eq!(
            converter.categorize(&DriverError::new("deadlock").with_sql_state("40001")),
            ErrorCategory::LockTimeout
        );
    }

    #[test]
    fn test_dialect_takes_precedence() {
        let converter = SqlExceptionConverter::new(&SqliteDialect);
        let busy = DriverError::new("database is locked").with_vendor_code(5);
        assert!(matches!(converter.convert(busy, None), Error::LockTimeout { .. }));

        let other = DriverError::new("no such table: x").with_vendor_code(1);
        assert!(matches!(
            converter.convert(other, None),
            Error::Jdbc {
                vendor_code: Some(1),
                ..
            }
        ));
    }
}
