//! table_sync: compares tables and schemas across two database connections
//!
//! Given a reference database and a target database, table_sync produces the
//! INSERT, UPDATE and DELETE statements that make a target table's data match
//! the reference table, and the structural changes that make the target
//! schema match the reference schema.

pub mod config;
pub mod data;
pub mod db;
pub mod error;
pub mod schema;
pub mod utils;

use std::sync::Arc;

use serde::Serialize;

// Re-export main types for easier access
pub use config::Config;
pub use data::{CancelToken, ComparisonStatus, FragmentSink, TableDataDiff, TableDeleteSync};
pub use db::connection::DatabaseConnection;
pub use error::{Error, Result};
pub use schema::analyzer::SchemaAnalyzer;
pub use schema::diff::SchemaDiff;
pub use schema::generator::MigrationGenerator;

use data::monitor::LogProgress;
use data::row::TableIdentifier;
use db::{Connection, SqlExecutor};

/// Initialize table_sync with the specified configuration file
pub async fn init(config_path: &str) -> Result<TableSyncClient> {
    let config = config::load_from_file(config_path)?;
    TableSyncClient::new(config).await
}

/// Summary of one data-diff run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataDiffReport {
    pub status: ComparisonStatus,
    pub inserts: u64,
    pub updates: u64,
    pub rows_processed: u64,
    pub cancelled: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Summary of one delete-sync run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteSyncReport {
    pub status: ComparisonStatus,
    pub deleted_rows: u64,
    pub rows_processed: u64,
    pub cancelled: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// The main client: one reference and one target connection
pub struct TableSyncClient {
    config: Config,
    reference: DatabaseConnection,
    target: DatabaseConnection,
    cancel: CancelToken,
}

impl TableSyncClient {
    /// Connect to both databases described by the configuration
    pub async fn new(config: Config) -> Result<Self> {
        let policy = config.data_diff.identifier_policy;
        let reference = DatabaseConnection::connect(&config.reference)
            .await?
            .with_identifier_policy(policy);
        let target = DatabaseConnection::connect(&config.target)
            .await?
            .with_identifier_policy(policy);

        Ok(Self {
            config,
            reference,
            target,
            cancel: CancelToken::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn reference(&self) -> &DatabaseConnection {
        &self.reference
    }

    pub fn target(&self) -> &DatabaseConnection {
        &self.target
    }

    /// Token that stops the run in progress; runs reset it when they start
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn connections(&self) -> (Arc<dyn Connection>, Arc<dyn Connection>) {
        (Arc::new(self.reference.clone()), Arc::new(self.target.clone()))
    }

    /// Compare the data of one table pair, writing INSERTs and UPDATEs to the sinks
    pub async fn data_diff(
        &self,
        reference_table: &str,
        target_table: &str,
        insert_sink: Box<dyn FragmentSink>,
        update_sink: Box<dyn FragmentSink>,
    ) -> Result<DataDiffReport> {
        self.cancel.reset();
        let (reference, target) = self.connections();
        let mut diff = TableDataDiff::new(
            reference,
            target,
            self.config.data_diff.clone(),
            self.config.output.clone(),
        )
        .with_insert_sink(insert_sink)
        .with_update_sink(update_sink)
        .with_progress_monitor(Arc::new(LogProgress))
        .with_cancel_token(self.cancel.clone());

        let status = diff
            .prepare(
                &TableIdentifier::parse(reference_table),
                &TableIdentifier::parse(target_table),
            )
            .await?;
        if status.can_execute() {
            diff.execute().await?;
        }

        Ok(DataDiffReport {
            status,
            inserts: diff.inserts(),
            updates: diff.updates(),
            rows_processed: diff.rows_processed(),
            cancelled: self.cancel.is_cancelled(),
            warnings: diff.messages().warnings().to_vec(),
            errors: diff.messages().errors().to_vec(),
        })
    }

    /// Find target rows missing from the reference; deletes them directly
    /// when `delete_sync.execute_deletes` is set, otherwise writes DELETEs to `sink`
    pub async fn delete_sync(
        &self,
        reference_table: &str,
        target_table: &str,
        sink: Option<Box<dyn FragmentSink>>,
    ) -> Result<DeleteSyncReport> {
        self.cancel.reset();
        let (reference, target) = self.connections();
        let mut sync = TableDeleteSync::new(
            reference,
            target,
            self.config.delete_sync.clone(),
            self.config.output.clone(),
        )
        .with_identifier_policy(self.config.data_diff.identifier_policy)
        .with_progress_monitor(Arc::new(LogProgress), self.config.data_diff.progress_interval)
        .with_cancel_token(self.cancel.clone());
        if let Some(sink) = sink {
            sync = sync.with_output_sink(sink);
        }

        let status = sync
            .prepare(
                &TableIdentifier::parse(reference_table),
                &TableIdentifier::parse(target_table),
            )
            .await?;
        if status.can_execute() {
            sync.execute().await?;
        }

        Ok(DeleteSyncReport {
            status,
            deleted_rows: sync.deleted_rows(),
            rows_processed: sync.rows_processed(),
            cancelled: self.cancel.is_cancelled(),
            warnings: sync.messages().warnings().to_vec(),
            errors: sync.messages().errors().to_vec(),
        })
    }

    /// Compare the reference schema with the target schema
    pub async fn schema_diff(&self) -> Result<SchemaDiff> {
        let reference = SchemaAnalyzer::new(self.reference.clone())
            .analyze(&self.config.schema)
            .await?;
        let target = SchemaAnalyzer::new(self.target.clone())
            .analyze(&self.config.schema)
            .await?;

        let diff = SchemaDiff::generate(&reference, &target, &self.config.schema);
        tracing::info!(changes = diff.change_count(), "Schema comparison finished");
        Ok(diff)
    }

    /// DDL that applies a schema diff to the target
    pub fn generate_migrations(&self, diff: &SchemaDiff) -> Result<Vec<String>> {
        MigrationGenerator::new(self.target.dialect()).generate_migration_sql(diff)
    }

    /// Run a generated script against the target in one transaction
    pub async fn apply_script(&self, script: &str) -> Result<u64> {
        SqlExecutor::new(self.target.clone()).apply_script(script).await
    }

    /// Run several scripts against the target, in order, in one transaction
    pub async fn apply_scripts(&self, scripts: &[&str]) -> Result<u64> {
        SqlExecutor::new(self.target.clone()).apply_scripts(scripts).await
    }
}
