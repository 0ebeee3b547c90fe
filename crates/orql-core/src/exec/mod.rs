//! Statement execution and the driver seam.

pub mod convert;
pub mod driver;
pub mod executor;
pub mod sqlite;

pub use convert::SqlExceptionConverter;
pub use driver::{Connection, DriverError, ErrorCategory, PreparedStatement, RowCursor, StatementOptions};
pub use executor::StatementExecutor;
pub use sqlite::SqliteConnection;
