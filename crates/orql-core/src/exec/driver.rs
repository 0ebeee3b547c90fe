//! Database driver seam.
//!
//! The executor only talks to these traits. Statement handles are released
//! when dropped, so every exit path of an execution gives them back.

use std::time::Duration;

use orql_proto::Value;

/// Error reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub message: String,
    /// Five character SQLState, when the driver reports one.
    pub sql_state: Option<String>,
    /// Vendor specific error code.
    pub vendor_code: Option<i32>,
}

impl DriverError {
    /// Create an error with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
            vendor_code: None,
        }
    }

    /// Attach a SQLState.
    pub fn with_sql_state(mut self, state: impl Into<String>) -> Self {
        self.sql_state = Some(state.into());
        self
    }

    /// Attach a vendor code.
    pub fn with_vendor_code(mut self, code: i32) -> Self {
        self.vendor_code = Some(code);
        self
    }
}

/// Domain category of a driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ConstraintViolation,
    LockTimeout,
    QueryTimeout,
    Generic,
}

/// Per-statement execution settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementOptions {
    pub timeout: Option<Duration>,
    pub fetch_size: Option<u32>,
}

/// A database connection.
pub trait Connection {
    /// Prepare a statement. The handle is released when dropped.
    fn prepare<'c>(
        &'c self,
        sql: &str,
        options: &StatementOptions,
    ) -> Result<Box<dyn PreparedStatement + 'c>, DriverError>;
}

/// A prepared statement handle.
pub trait PreparedStatement {
    /// Bind a value at a 1-based position.
    fn bind(&mut self, position: usize, value: &Value) -> Result<(), DriverError>;

    /// Run as a query. The cursor must be drained or dropped before the
    /// statement is reused.
    fn query<'s>(&'s mut self) -> Result<Box<dyn RowCursor + 's>, DriverError>;

    /// Run as a mutation, returning the affected row count.
    fn execute(&mut self) -> Result<u64, DriverError>;
}

/// Forward-only row stream.
pub trait RowCursor {
    /// Number of columns per row.
    fn column_count(&self) -> usize;

    /// Next row, `None` once exhausted.
    fn next_row(&mut self) -> Result<Option<Vec<Value>>, DriverError>;
}
