//! Database module for table_sync
//!
//! The comparison engine only talks to databases through the traits defined
//! here. `DatabaseConnection` implements them on top of sqlx pools,
//! `MemoryDatabase` in-process.

pub mod connection;
pub mod executor;
pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::data::change::RowChange;
use crate::data::predicate::SelectStatement;
use crate::data::row::{ColumnDescriptor, Row, TableIdentifier};
use crate::error::Result;
use crate::utils::naming::SqlDialect;

// Re-export key types
pub use connection::DatabaseConnection;
pub use executor::SqlExecutor;
pub use memory::MemoryDatabase;

/// Catalog lookups
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Find a table, returning its identifier as the catalog spells it
    async fn find_table(&self, table: &TableIdentifier) -> Result<Option<TableIdentifier>>;

    /// The table's columns in ordinal order, primary key columns flagged
    async fn get_columns(&self, table: &TableIdentifier) -> Result<Vec<ColumnDescriptor>>;
}

/// Streams the rows of a query; dropping the stream closes the cursor
pub trait RowSource: Send + Sync {
    fn stream_rows<'a>(&'a self, statement: &'a SelectStatement) -> BoxStream<'a, Result<Row>>;
}

/// Runs generated statements
#[async_trait]
pub trait StatementRunner: Send + Sync {
    /// Apply one change; `sql` is its rendered statement. Returns rows affected.
    async fn execute_dml(&self, change: &RowChange, sql: &str) -> Result<u64>;

    /// Returns false if savepoints are not supported
    async fn set_savepoint(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    async fn release_savepoint(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    async fn rollback_to_savepoint(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Everything a comparison run needs from one side
pub trait Connection: MetadataProvider + RowSource + StatementRunner {
    fn dialect(&self) -> SqlDialect;
}
