//! Statement execution.

use std::time::Instant;

use orql_proto::Value;
use tracing::{debug, instrument};

use super::convert::SqlExceptionConverter;
use super::driver::{Connection, StatementOptions};
use crate::error::Error;
use crate::render::{Dialect, JdbcOperation};

/// Binds parameters, runs statements and streams rows.
pub struct StatementExecutor<'c> {
    connection: &'c dyn Connection,
    converter: SqlExceptionConverter<'c>,
    log_sql: bool,
}

impl<'c> StatementExecutor<'c> {
    /// Create an executor over a connection.
    pub fn new(connection: &'c dyn Connection, dialect: &'c dyn Dialect) -> Self {
        Self {
            connection,
            converter: SqlExceptionConverter::new(dialect),
            log_sql: true,
        }
    }

    /// Enable or disable debug logging of statement text.
    pub fn with_log_sql(mut self, log_sql: bool) -> Self {
        self.log_sql = log_sql;
        self
    }

    /// Run a query, handing every row to `on_row`. Returns the row count.
    #[instrument(skip_all, fields(parameters = values.len()))]
    pub fn execute_query(
        &self,
        operation: &JdbcOperation,
        values: &[Value],
        options: &StatementOptions,
        on_row: &mut dyn FnMut(Vec<Value>) -> Result<(), Error>,
    ) -> Result<usize, Error> {
        self.log(operation);
        let start = Instant::now();
        let sql = operation.sql.as_str();
        let mut statement = self
            .connection
            .prepare(sql, options)
            .map_err(|e| self.converter.convert(e, Some(sql)))?;
        for (i, value) in values.iter().enumerate() {
            statement
                .bind(i + 1, value)
                .map_err(|e| self.converter.convert(e, Some(sql)))?;
        }

        let mut cursor = statement
            .query()
            .map_err(|e| self.converter.convert(e, Some(sql)))?;
        let mut rows = 0;
        while let Some(row) = cursor
            .next_row()
            .map_err(|e| self.converter.convert(e, Some(sql)))?
        {
            rows += 1;
            on_row(row)?;
        }

        debug!(
            rows,
            duration_us = start.elapsed().as_micros() as u64,
            "Query executed"
        );
        Ok(rows)
    }

    /// Run a query and collect its rows.
    pub fn query_rows(
        &self,
        operation: &JdbcOperation,
        values: &[Value],
        options: &StatementOptions,
    ) -> Result<Vec<Vec<Value>>, Error> {
        let mut rows = Vec::new();
        self.execute_query(operation, values, options, &mut |row| {
            rows.push(row);
            Ok(())
        })?;
        Ok(rows)
    }

    /// Run a mutation, returning the affected row count.
    #[instrument(skip_all, fields(parameters = values.len()))]
    pub fn execute_update(
        &self,
        operation: &JdbcOperation,
        values: &[Value],
        options: &StatementOptions,
    ) -> Result<u64, Error> {
        self.execute_batch(operation, std::slice::from_ref(&values.to_vec()), options)
    }

    /// Run a mutation once per parameter set, summing affected rows.
    pub fn execute_batch(
        &self,
        operation: &JdbcOperation,
        batch: &[Vec<Value>],
        options: &StatementOptions,
    ) -> Result<u64, Error> {
        self.log(operation);
        let sql = operation.sql.as_str();
        let mut statement = self
            .connection
            .prepare(sql, options)
            .map_err(|e| self.converter.convert(e, Some(sql)))?;
        let mut total = 0;
        for values in batch {
            for (i, value) in values.iter().enumerate() {
                statement
                    .bind(i + 1, value)
                    .map_err(|e| self.converter.convert(e, Some(sql)))?;
            }
            total += statement
                .execute()
                .map_err(|e| self.converter.convert(e, Some(sql)))?;
        }
        debug!(executions = batch.len(), affected = total, "Mutation executed");
        Ok(total)
    }

    fn log(&self, operation: &JdbcOperation) {
        if self.log_sql {
            debug!(sql = %operation.sql, "Executing statement");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording in-memory driver.

    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;
    use crate::exec::driver::{DriverError, PreparedStatement, RowCursor};

    #[derive(Debug, Default)]
    pub struct Recording {
        pub prepared: Vec<String>,
        pub bound: Vec<Vec<Value>>,
        pub released: usize,
    }

    /// Scripted connection: every prepared statement returns the next queued
    /// result set.
    #[derive(Default)]
    pub struct MockConnection {
        pub recording: Rc<RefCell<Recording>>,
        pub results: RefCell<VecDeque<Result<Vec<Vec<Value>>, DriverError>>>,
        pub fail_prepare: Option<DriverError>,
    }

    impl MockConnection {
        pub fn with_rows(rows: Vec<Vec<Value>>) -> Self {
            let connection = Self::default();
            connection.results.borrow_mut().push_back(Ok(rows));
            connection
        }

        pub fn with_error(error: DriverError) -> Self {
            let connection = Self::default();
            connection.results.borrow_mut().push_back(Err(error));
            connection
        }
    }

    struct MockStatement {
        recording: Rc<RefCell<Recording>>,
        result: Option<Result<Vec<Vec<Value>>, DriverError>>,
        values: Vec<Value>,
    }

    impl Drop for MockStatement {
        fn drop(&mut self) {
            self.recording.borrow_mut().released += 1;
        }
    }

    struct MockCursor {
        rows: VecDeque<Vec<Value>>,
    }

    impl Connection for MockConnection {
        fn prepare<'c>(
            &'c self,
            sql: &str,
            _options: &StatementOptions,
        ) -> Result<Box<dyn PreparedStatement + 'c>, DriverError> {
            if let Some(error) = &self.fail_prepare {
                return Err(error.clone());
            }
            self.recording.borrow_mut().prepared.push(sql.to_string());
            Ok(Box::new(MockStatement {
                recording: self.recording.clone(),
                result: self.results.borrow_mut().pop_front(),
                values: Vec::new(),
            }))
        }
    }

    impl PreparedStatement for MockStatement {
        fn bind(&mut self, position: usize, value: &Value) -> Result<(), DriverError> {
            if self.values.len() < position {
                self.values.resize(position, Value::Null);
            }
            self.values[position - 1] = value.clone();
            Ok(())
        }

        fn query<'s>(&'s mut self) -> Result<Box<dyn RowCursor + 's>, DriverError> {
            self.recording.borrow_mut().bound.push(self.values.clone());
            match self.result.take().unwrap_or_else(|| Ok(Vec::new())) {
                Ok(rows) => Ok(Box::new(MockCursor { rows: rows.into() })),
                Err(error) => Err(error),
            }
        }

        fn execute(&mut self) -> Result<u64, DriverError> {
            self.recording.borrow_mut().bound.push(std::mem::take(&mut self.values));
            match &self.result {
                Some(Err(error)) => Err(error.clone()),
                _ => Ok(1),
            }
        }
    }

    impl RowCursor for MockCursor {
        fn column_count(&self) -> usize {
            self.rows.front().map(Vec::len).unwrap_or(0)
        }

        fn next_row(&mut self) -> Result<Option<Vec<Value>>, DriverError> {
            Ok(self.rows.pop_front())
        }
    }
}
