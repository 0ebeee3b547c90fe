//! SQLite driver over `rusqlite`.

use std::path::Path;
use std::time::{Duration, Instant};

use orql_proto::Value;
use rusqlite::types::{Value as SqlValue, ValueRef};

use super::driver::{Connection, DriverError, PreparedStatement, RowCursor, StatementOptions};
use crate::error::Error;

/// SQLState reported when a statement exceeds its timeout.
const TIMEOUT_STATE: &str = "HYT00";

/// Virtual machine instructions between deadline checks.
const PROGRESS_INTERVAL: i32 = 1_000;

/// A SQLite connection.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, Error> {
        rusqlite::Connection::open_in_memory()
            .map(Self::from_connection)
            .map_err(|e| jdbc_error(driver_error(e)))
    }

    /// Open a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        rusqlite::Connection::open(path)
            .map(Self::from_connection)
            .map_err(|e| jdbc_error(driver_error(e)))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Run a batch of semicolon separated statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<(), Error> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| jdbc_error(driver_error(e)))
    }

    /// The wrapped connection.
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

impl Connection for SqliteConnection {
    fn prepare<'c>(
        &'c self,
        sql: &str,
        options: &StatementOptions,
    ) -> Result<Box<dyn PreparedStatement + 'c>, DriverError> {
        let statement = self.conn.prepare(sql).map_err(driver_error)?;
        Ok(Box::new(SqliteStatement {
            conn: &self.conn,
            statement,
            timeout: options.timeout,
            interruptible: false,
        }))
    }
}

struct SqliteStatement<'c> {
    conn: &'c rusqlite::Connection,
    statement: rusqlite::Statement<'c>,
    timeout: Option<Duration>,
    interruptible: bool,
}

impl SqliteStatement<'_> {
    /// Start the statement clock. SQLite interrupts any step still running
    /// past the deadline.
    fn arm_deadline(&mut self) -> Result<Option<Instant>, DriverError> {
        let Some(timeout) = self.timeout else {
            return Ok(None);
        };
        if timeout.is_zero() {
            return Err(timeout_error());
        }
        let deadline = Instant::now() + timeout;
        self.conn
            .progress_handler(PROGRESS_INTERVAL, Some(move || Instant::now() >= deadline));
        self.interruptible = true;
        Ok(Some(deadline))
    }
}

impl Drop for SqliteStatement<'_> {
    fn drop(&mut self) {
        if self.interruptible {
            self.conn.progress_handler(0, None::<fn() -> bool>);
        }
    }
}

impl PreparedStatement for SqliteStatement<'_> {
    fn bind(&mut self, position: usize, value: &Value) -> Result<(), DriverError> {
        self.statement
            .raw_bind_parameter(position, to_sql(value))
            .map_err(driver_error)
    }

    fn query<'s>(&'s mut self) -> Result<Box<dyn RowCursor + 's>, DriverError> {
        let columns = self.statement.column_count();
        let deadline = self.arm_deadline()?;
        Ok(Box::new(SqliteCursor {
            rows: self.statement.raw_query(),
            columns,
            deadline,
        }))
    }

    fn execute(&mut self) -> Result<u64, DriverError> {
        self.arm_deadline()?;
        self.statement
            .raw_execute()
            .map(|n| n as u64)
            .map_err(driver_error)
    }
}

struct SqliteCursor<'s> {
    rows: rusqlite::Rows<'s>,
    columns: usize,
    deadline: Option<Instant>,
}

impl RowCursor for SqliteCursor<'_> {
    fn column_count(&self) -> usize {
        self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>, DriverError> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(timeout_error());
            }
        }
        let Some(row) = self.rows.next().map_err(driver_error)? else {
            return Ok(None);
        };
        let mut values = Vec::with_capacity(self.columns);
        for i in 0..self.columns {
            values.push(from_sql(row.get_ref(i).map_err(driver_error)?));
        }
        Ok(Some(values))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Int32(i) => SqlValue::Integer(*i as i64),
        Value::Int64(i) | Value::Timestamp(i) => SqlValue::Integer(*i),
        Value::Float64(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Uuid(u) => SqlValue::Text(hex::encode(u)),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn timeout_error() -> DriverError {
    DriverError::new("statement timeout exceeded").with_sql_state(TIMEOUT_STATE)
}

fn driver_error(error: rusqlite::Error) -> DriverError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::OperationInterrupted =>
        {
            timeout_error().with_vendor_code(failure.extended_code)
        }
        rusqlite::Error::SqliteFailure(failure, message) => DriverError {
            message: message.clone().unwrap_or_else(|| failure.to_string()),
            sql_state: None,
            vendor_code: Some(failure.extended_code),
        },
        other => DriverError::new(other.to_string()),
    }
}

fn jdbc_error(error: DriverError) -> Error {
    Error::Jdbc {
        message: error.message,
        sql_state: error.sql_state,
        vendor_code: error.vendor_code,
        sql: None,
    }
}
