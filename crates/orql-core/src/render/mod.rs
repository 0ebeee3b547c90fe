//! Statement-to-driver conversion.

pub mod dialect;
pub mod mutation;
pub mod operation;
pub mod translator;

pub use dialect::{AnsiDialect, Dialect, PagingPiece, SqliteDialect};
pub use mutation::{prepare_multi_table, render_bucket, BucketAction, MultiTableOperations, TableBucket};
pub use operation::{ExecutionContext, JdbcOperation, ParameterSpec};
pub use translator::SqlAstTranslator;
