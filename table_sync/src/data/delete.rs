//! Deleting target rows that no longer exist in the reference table.
//!
//! The mirror image of [`TableDataDiff`](crate::data::diff::TableDataDiff):
//! the target table's key columns are streamed in chunks, each chunk is
//! looked up in the reference table and every target row without a
//! counterpart becomes a DELETE.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info};

use crate::config::{DeleteSyncConfig, OutputConfig};
use crate::data::change::{ColumnValue, FragmentRenderer, MigrationFragment, Operation, RowChange};
use crate::data::diff::ComparisonStatus;
use crate::data::literal::LiteralFormatter;
use crate::data::matcher::{find_match, KeyColumns};
use crate::data::monitor::{CancelToken, MessageBuffer, NoProgress, ProgressMonitor};
use crate::data::predicate::{KeyPredicate, SelectStatement};
use crate::data::row::{ColumnDescriptor, ResultShape, Row, TableIdentifier};
use crate::data::sink::{FragmentSink, OutputStream};
use crate::db::Connection;
use crate::error::{Error, Result};
use crate::utils::naming::IdentifierPolicy;

struct PreparedDelete {
    reference_table: TableIdentifier,
    target_table: TableIdentifier,
    target_select: SelectStatement,
    /// Key columns as the target names them
    target_shape: ResultShape,
    reference_key: Vec<ColumnDescriptor>,
    key: KeyColumns,
    renderer: FragmentRenderer,
    reference_formatter: Arc<dyn LiteralFormatter>,
}

/// Finds target rows missing from the reference and deletes them
pub struct TableDeleteSync {
    reference: Arc<dyn Connection>,
    target: Arc<dyn Connection>,
    config: DeleteSyncConfig,
    output: OutputConfig,
    policy: IdentifierPolicy,
    stream: Option<OutputStream>,
    monitor: Arc<dyn ProgressMonitor>,
    progress_interval: u64,
    cancel: CancelToken,
    messages: MessageBuffer,
    prepared: Option<PreparedDelete>,
    status: Option<ComparisonStatus>,
    deleted_rows: u64,
    rows_processed: u64,
}

impl TableDeleteSync {
    pub fn new(
        reference: Arc<dyn Connection>,
        target: Arc<dyn Connection>,
        config: DeleteSyncConfig,
        output: OutputConfig,
    ) -> Self {
        Self {
            reference,
            target,
            config,
            output,
            policy: IdentifierPolicy::default(),
            stream: None,
            monitor: Arc::new(NoProgress),
            progress_interval: 10,
            cancel: CancelToken::new(),
            messages: MessageBuffer::new(),
            prepared: None,
            status: None,
            deleted_rows: 0,
            rows_processed: 0,
        }
    }

    /// Write DELETE statements to `sink`. Ignored when deletes are executed directly.
    pub fn with_output_sink(mut self, sink: Box<dyn FragmentSink>) -> Self {
        self.stream = Some(OutputStream::new(sink));
        self
    }

    pub fn with_identifier_policy(mut self, policy: IdentifierPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress_monitor(mut self, monitor: Arc<dyn ProgressMonitor>, interval: u64) -> Self {
        self.monitor = monitor;
        self.progress_interval = interval.max(1);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn messages(&self) -> &MessageBuffer {
        &self.messages
    }

    pub fn status(&self) -> Option<ComparisonStatus> {
        self.status
    }

    /// Rows deleted (or DELETE statements written) by the last `execute`
    pub fn deleted_rows(&self) -> u64 {
        self.deleted_rows
    }

    pub fn rows_processed(&self) -> u64 {
        self.rows_processed
    }

    pub fn reset(&mut self) {
        self.prepared = None;
        self.status = None;
        self.deleted_rows = 0;
        self.rows_processed = 0;
        self.messages.clear();
        if let Some(stream) = self.stream.as_mut() {
            stream.reset();
        }
    }

    pub async fn prepare(
        &mut self,
        reference_table: &TableIdentifier,
        target_table: &TableIdentifier,
    ) -> Result<ComparisonStatus> {
        self.reset();
        let status = self.resolve(reference_table, target_table).await?;
        info!(
            reference = %reference_table,
            target = %target_table,
            status = ?status,
            "Prepared delete sync"
        );
        self.status = Some(status);
        Ok(status)
    }

    async fn resolve(
        &mut self,
        reference_table: &TableIdentifier,
        target_table: &TableIdentifier,
    ) -> Result<ComparisonStatus> {
        let policy = self.policy;

        let Some(target_table) = self.target.find_table(target_table).await? else {
            self.messages
                .add_error(format!("Target table {} not found", target_table));
            return Ok(ComparisonStatus::TargetTableNotFound);
        };
        let Some(reference_table) = self.reference.find_table(reference_table).await? else {
            self.messages
                .add_error(format!("Reference table {} not found", reference_table));
            return Ok(ComparisonStatus::ReferenceTableNotFound);
        };

        let target_columns = self.target.get_columns(&target_table).await?;
        let reference_columns = self.reference.get_columns(&reference_table).await?;

        let key_names: Vec<String> = match self.config.alternate_key_for(&target_table.name, policy) {
            Some(columns) => columns.to_vec(),
            None => target_columns
                .iter()
                .filter(|c| c.is_primary_key)
                .map(|c| c.name.clone())
                .collect(),
        };
        if key_names.is_empty() {
            self.messages
                .add_error(format!("No primary key found for table {}", target_table));
            return Ok(ComparisonStatus::NoPrimaryKey);
        }

        let mut target_key = Vec::with_capacity(key_names.len());
        let mut reference_key = Vec::with_capacity(key_names.len());
        for name in &key_names {
            let on_target = target_columns.iter().find(|c| policy.matches(&c.name, name));
            let on_reference = reference_columns.iter().find(|c| policy.matches(&c.name, name));
            match (on_target, on_reference) {
                (Some(t), Some(r)) => {
                    target_key.push(t.clone().primary_key());
                    reference_key.push(r.clone().primary_key());
                }
                _ => {
                    self.messages.add_error(format!(
                        "Key column {} must exist in both {} and {}",
                        name, reference_table, target_table
                    ));
                    return Ok(ComparisonStatus::NoPrimaryKey);
                }
            }
        }

        let target_shape = ResultShape::new(target_key).with_table(target_table.clone());
        let reference_shape = ResultShape::new(reference_key.clone());
        let key = KeyColumns::resolve(&key_names, &target_shape, &reference_shape, policy)
            .ok_or_else(|| {
                Error::ValidationError(format!("Could not resolve key columns of {}", target_table))
            })?;

        let target_formatter: Arc<dyn LiteralFormatter> =
            Arc::new(self.output.literal_formatter(self.target.dialect()));
        let reference_formatter: Arc<dyn LiteralFormatter> =
            Arc::new(self.output.literal_formatter(self.reference.dialect()));

        let target_select = SelectStatement::build(
            target_table.clone(),
            target_shape.column_names(),
            None,
            self.target.dialect(),
            target_formatter.as_ref(),
        )?;
        let renderer = FragmentRenderer::new(
            self.output.format,
            self.target.dialect(),
            Operation::DeleteSync,
            target_table.clone(),
            target_formatter,
        )
        .with_line_ending(self.output.line_ending)
        .with_encoding(&self.output.encoding)
        .with_banner(self.output.include_banner);

        self.prepared = Some(PreparedDelete {
            reference_table,
            target_table,
            target_select,
            target_shape,
            reference_key,
            key,
            renderer,
            reference_formatter,
        });
        Ok(ComparisonStatus::Ok)
    }

    /// Find and delete (or script) all orphaned target rows.
    ///
    /// Deletes executed directly are applied chunk by chunk, as soon as the
    /// chunk's reference lookup has finished. Each `prepare` allows one
    /// `execute`.
    pub async fn execute(&mut self) -> Result<()> {
        let Some(prepared) = self.prepared.take() else {
            return Err(Error::ValidationError(
                "Delete sync has not been prepared successfully, or was already executed".into(),
            ));
        };

        let result = self.run(&prepared).await;

        let footer = match self.stream.as_mut() {
            Some(stream) => stream.finish(&prepared.renderer),
            None => Ok(()),
        };
        result?;
        footer?;

        info!(
            rows = self.rows_processed,
            deleted = self.deleted_rows,
            cancelled = self.cancel.is_cancelled(),
            "Delete sync finished"
        );
        Ok(())
    }

    async fn run(&mut self, prepared: &PreparedDelete) -> Result<()> {
        let chunk_size = self.config.chunk_size.max(1);
        let table_name = prepared.target_table.to_string();

        let target = Arc::clone(&self.target);
        debug!(sql = prepared.target_select.sql(), "Reading target keys");
        let mut rows = target.stream_rows(&prepared.target_select);
        let mut chunk: Vec<Row> = Vec::with_capacity(chunk_size);

        while let Some(row) = rows.next().await {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            chunk.push(row?);
            self.rows_processed += 1;
            if self.rows_processed % self.progress_interval == 0 {
                self.monitor.report_progress(&table_name, self.rows_processed);
            }

            if chunk.len() >= chunk_size {
                self.process_chunk(prepared, &chunk).await?;
                chunk.clear();
            }
        }

        if !chunk.is_empty() && !self.cancel.is_cancelled() {
            self.process_chunk(prepared, &chunk).await?;
        }
        Ok(())
    }

    async fn process_chunk(
        &mut self,
        prepared: &PreparedDelete,
        chunk: &[Row],
    ) -> Result<()> {
        let mut predicate = KeyPredicate::new(prepared.reference_key.clone());
        for row in chunk {
            if !predicate.add_tuple(row.project(prepared.key.row_positions())) {
                self.messages.add_warning(format!(
                    "Skipping row of {} with NULL key values",
                    prepared.target_table
                ));
            }
        }
        if predicate.is_empty() {
            return Ok(());
        }

        let statement = SelectStatement::build(
            prepared.reference_table.clone(),
            prepared.reference_key.iter().map(|c| c.name.clone()).collect(),
            Some(predicate),
            self.reference.dialect(),
            prepared.reference_formatter.as_ref(),
        )?;
        debug!(sql = statement.sql(), "Retrieving reference keys");

        let reference = Arc::clone(&self.reference);
        let mut stream = reference.stream_rows(&statement);
        let mut reference_rows = Vec::new();
        while let Some(row) = stream.next().await {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            match row {
                Ok(row) => reference_rows.push(row),
                Err(e) => {
                    self.messages.add_error(format!(
                        "Error retrieving reference rows using: {}\n{}",
                        statement.sql(),
                        e
                    ));
                    return Err(e.with_sql(statement.sql()));
                }
            }
        }
        drop(stream);

        let mut fragments = Vec::new();
        for row in chunk {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            if row.has_null_key(prepared.key.row_positions()) {
                continue;
            }
            if find_match(&reference_rows, row, &prepared.key).is_some() {
                continue;
            }

            let key = prepared
                .key
                .row_positions()
                .iter()
                .map(|&i| ColumnValue::new(prepared.target_shape.column(i).clone(), row.get(i).clone()))
                .collect();
            let change = RowChange::delete(prepared.target_table.clone(), key);
            let row_number = self.deleted_rows + fragments.len() as u64 + 1;
            fragments.push(prepared.renderer.render(change, row_number)?);
        }

        if self.cancel.is_cancelled() {
            return Ok(());
        }
        if self.config.execute_deletes {
            return self.apply(prepared, fragments).await;
        }
        for fragment in fragments {
            if let Some(stream) = self.stream.as_mut() {
                stream.write(&prepared.renderer, &fragment)?;
            }
            self.deleted_rows += 1;
        }
        Ok(())
    }

    /// Runs one chunk's DELETEs. A completed chunk is applied in full even
    /// if cancellation arrives while its statements run.
    async fn apply(&mut self, prepared: &PreparedDelete, fragments: Vec<MigrationFragment>) -> Result<()> {
        for fragment in fragments {
            let sql = prepared.renderer.statement(&fragment.change)?;
            match self.target.execute_dml(&fragment.change, &sql).await {
                Ok(affected) => self.deleted_rows += affected,
                Err(e) => {
                    self.messages
                        .add_error(format!("Error deleting rows using: {}\n{}", sql, e));
                    return Err(e.with_sql(&sql));
                }
            }
        }
        Ok(())
    }
}
