//! Row-level comparison engine
//!
//! Compares table contents across two connections and produces the
//! INSERT, UPDATE and DELETE statements (or XML change records) that make
//! the target match the reference.

pub mod change;
pub mod comparer;
pub mod delete;
pub mod diff;
pub mod literal;
pub mod matcher;
pub mod monitor;
pub mod predicate;
pub mod row;
pub mod sink;
pub mod value;

// Re-export key types
pub use change::{ChangeKind, MigrationFragment, OutputDialect, RowChange};
pub use delete::TableDeleteSync;
pub use diff::{ComparisonStatus, TableDataDiff};
pub use literal::{LiteralFormatter, SqlLiteralFormatter};
pub use monitor::{CancelToken, MessageBuffer, ProgressMonitor};
pub use row::{ColumnDescriptor, ResultShape, Row, TableIdentifier};
pub use sink::{FragmentSink, MemorySink, ScriptSink};
pub use value::Value;
