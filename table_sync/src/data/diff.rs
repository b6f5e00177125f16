//! Row-level comparison of one reference table against one target table.
//!
//! Reference rows are streamed and grouped into chunks. For each chunk a
//! single SELECT fetches the target rows with the same keys, every reference
//! row is paired with its counterpart (if any) and the differences are
//! written as INSERT and UPDATE fragments to two separate output streams.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{DataDiffConfig, OutputConfig};
use crate::data::change::{ChangeKind, FragmentRenderer, MigrationFragment, Operation};
use crate::data::comparer::RowComparer;
use crate::data::literal::LiteralFormatter;
use crate::data::matcher::{find_match, KeyColumns};
use crate::data::monitor::{CancelToken, MessageBuffer, NoProgress, ProgressMonitor};
use crate::data::predicate::{KeyPredicate, SelectStatement};
use crate::data::row::{ColumnDescriptor, ResultShape, Row, TableIdentifier};
use crate::data::sink::{FragmentSink, MemorySink, OutputStream};
use crate::db::Connection;
use crate::error::{Error, Result};
use crate::utils::naming::IdentifierPolicy;

const CHUNK_SAVEPOINT: &str = "table_sync_chunk";

/// Outcome of preparing a table pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonStatus {
    Ok,
    ReferenceTableNotFound,
    TargetTableNotFound,
    NoPrimaryKey,
    /// Some reference columns have no counterpart on the target; the
    /// comparison runs over the remaining ones
    ColumnMismatch,
}

impl ComparisonStatus {
    pub fn can_execute(&self) -> bool {
        matches!(self, ComparisonStatus::Ok | ComparisonStatus::ColumnMismatch)
    }
}

/// Everything resolved by `prepare` for one table pair
struct PreparedPair {
    reference_table: TableIdentifier,
    /// None when the target table is missing and tolerated
    target_table: Option<TableIdentifier>,
    reference_select: SelectStatement,
    /// Compared columns as the target names them, keyed by the active key
    shape: ResultShape,
    key: KeyColumns,
    target_columns: Vec<String>,
    ignore: Vec<String>,
    exclude: Vec<String>,
    renderer: FragmentRenderer,
    formatter: Arc<dyn LiteralFormatter>,
}

/// Compares the data of a reference table with a target table
pub struct TableDataDiff {
    reference: Arc<dyn Connection>,
    target: Arc<dyn Connection>,
    config: DataDiffConfig,
    output: OutputConfig,
    insert_stream: OutputStream,
    update_stream: OutputStream,
    monitor: Arc<dyn ProgressMonitor>,
    cancel: CancelToken,
    messages: MessageBuffer,
    prepared: Option<PreparedPair>,
    status: Option<ComparisonStatus>,
    inserts: u64,
    updates: u64,
    rows_processed: u64,
}

impl TableDataDiff {
    pub fn new(
        reference: Arc<dyn Connection>,
        target: Arc<dyn Connection>,
        config: DataDiffConfig,
        output: OutputConfig,
    ) -> Self {
        Self {
            reference,
            target,
            config,
            output,
            insert_stream: OutputStream::new(Box::new(MemorySink::new())),
            update_stream: OutputStream::new(Box::new(MemorySink::new())),
            monitor: Arc::new(NoProgress),
            cancel: CancelToken::new(),
            messages: MessageBuffer::new(),
            prepared: None,
            status: None,
            inserts: 0,
            updates: 0,
            rows_processed: 0,
        }
    }

    pub fn with_insert_sink(mut self, sink: Box<dyn FragmentSink>) -> Self {
        self.insert_stream = OutputStream::new(sink);
        self
    }

    pub fn with_update_sink(mut self, sink: Box<dyn FragmentSink>) -> Self {
        self.update_stream = OutputStream::new(sink);
        self
    }

    pub fn with_progress_monitor(mut self, monitor: Arc<dyn ProgressMonitor>) -> Self {
        self.monitor = monitor;
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

    pub fn inserts(&self) -> u64 {
        self.inserts
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn rows_processed(&self) -> u64 {
        self.rows_processed
    }

    /// Whether the last `prepare` left the run ready to execute and it has not run yet
    pub fn can_execute(&self) -> bool {
        self.prepared.is_some() && self.status.map(|s| s.can_execute()).unwrap_or(false)
    }

    /// Forget everything about the previous table pair
    pub fn reset(&mut self) {
        self.prepared = None;
        self.status = None;
        self.inserts = 0;
        self.updates = 0;
        self.rows_processed = 0;
        self.messages.clear();
        self.insert_stream.reset();
        self.update_stream.reset();
    }

    fn policy(&self) -> IdentifierPolicy {
        self.config.identifier_policy
    }

    /// Resolve both tables, their key and the compared columns
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
            "Prepared table comparison"
        );
        self.status = Some(status);
        if !status.can_execute() {
            self.prepared = None;
        }
        Ok(status)
    }

    async fn resolve(
        &mut self,
        reference_table: &TableIdentifier,
        target_table: &TableIdentifier,
    ) -> Result<ComparisonStatus> {
        let policy = self.policy();

        let Some(reference_table) = self.reference.find_table(reference_table).await? else {
            self.messages
                .add_error(format!("Reference table {} not found", reference_table));
            return Ok(ComparisonStatus::ReferenceTableNotFound);
        };
        let reference_columns = self.reference.get_columns(&reference_table).await?;

        let real_pk: Vec<String> = reference_columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect();

        let alternate = self
            .config
            .alternate_key_for(&reference_table.name)
            .map(|k| k.to_vec());
        let key_names = match &alternate {
            Some(columns) => {
                let mut found = Vec::with_capacity(columns.len());
                for column in columns {
                    match reference_columns.iter().find(|c| policy.matches(&c.name, column)) {
                        Some(c) => found.push(c.name.clone()),
                        None => self.messages.add_warning(format!(
                            "Alternate key column {} not found in {}",
                            column, reference_table
                        )),
                    }
                }
                found
            }
            None => real_pk.clone(),
        };
        if key_names.is_empty() {
            self.messages
                .add_error(format!("No primary key found for table {}", reference_table));
            return Ok(ComparisonStatus::NoPrimaryKey);
        }

        let mut status = ComparisonStatus::Ok;
        let found_target = self.target.find_table(target_table).await?;

        // Pairs of (reference column, column as the target names it)
        let mut pairs: Vec<(ColumnDescriptor, ColumnDescriptor)> = Vec::new();
        let table_for_dml = match &found_target {
            Some(target) => {
                let target_columns = self.target.get_columns(target).await?;
                for column in &reference_columns {
                    match target_columns.iter().find(|t| policy.matches(&t.name, &column.name)) {
                        Some(t) => pairs.push((column.clone(), t.clone())),
                        None => {
                            self.messages.add_warning(format!(
                                "Column {} not found in target table {}, it will be ignored",
                                column.name, target
                            ));
                            status = ComparisonStatus::ColumnMismatch;
                        }
                    }
                }
                target.clone()
            }
            None if self.config.ignore_missing_target => {
                self.messages.add_warning(format!(
                    "Target table {} not found, all rows of {} will be written as INSERT",
                    target_table, reference_table
                ));
                pairs = reference_columns
                    .iter()
                    .map(|c| (c.clone(), c.clone()))
                    .collect();
                target_table.clone()
            }
            None => {
                self.messages
                    .add_error(format!("Target table {} not found", target_table));
                return Ok(ComparisonStatus::TargetTableNotFound);
            }
        };

        for key in &key_names {
            if !pairs.iter().any(|(r, _)| r.name == *key) {
                self.messages.add_error(format!(
                    "Key column {} of {} not found in target table {}",
                    key, reference_table, table_for_dml
                ));
                return Ok(ComparisonStatus::NoPrimaryKey);
            }
        }

        // Translate reference names to the target's spelling
        let to_target = |name: &String| -> Option<String> {
            pairs
                .iter()
                .find(|(r, _)| r.name == *name)
                .map(|(_, t)| t.name.clone())
        };
        let target_key: Vec<String> = key_names.iter().filter_map(to_target).collect();
        let shadowed_pk: Vec<String> = if alternate.is_some() {
            real_pk
                .iter()
                .filter(|pk| !key_names.contains(*pk))
                .filter_map(to_target)
                .collect()
        } else {
            Vec::new()
        };

        let shape = ResultShape::new(pairs.iter().map(|(_, t)| t.clone()).collect())
            .with_table(table_for_dml.clone())
            .with_key_columns(&target_key, policy);
        let key = KeyColumns::resolve(&target_key, &shape, &shape, policy).ok_or_else(|| {
            Error::ValidationError(format!("Could not resolve key columns of {}", table_for_dml))
        })?;

        // A difference in a shadowed real PK is never a data difference
        let mut ignore: Vec<String> = self.config.ignore_columns.clone();
        ignore.extend(shadowed_pk.iter().cloned());
        let mut exclude: Vec<String> = Vec::new();
        if self.config.exclude_ignored_columns {
            exclude.extend(self.config.ignore_columns.iter().cloned());
        }
        if self.config.exclude_real_pk {
            exclude.extend(shadowed_pk.iter().cloned());
        }

        let reference_formatter = self.output.literal_formatter(self.reference.dialect());
        let reference_select = SelectStatement::build(
            reference_table.clone(),
            pairs.iter().map(|(r, _)| r.name.clone()).collect(),
            None,
            self.reference.dialect(),
            &reference_formatter,
        )?;

        let formatter: Arc<dyn LiteralFormatter> =
            Arc::new(self.output.literal_formatter(self.target.dialect()));
        let renderer = FragmentRenderer::new(
            self.output.format,
            self.target.dialect(),
            Operation::DataDiff,
            table_for_dml,
            Arc::clone(&formatter),
        )
        .with_line_ending(self.output.line_ending)
        .with_encoding(&self.output.encoding)
        .with_banner(self.output.include_banner);

        self.prepared = Some(PreparedPair {
            reference_table,
            target_table: found_target,
            reference_select,
            target_columns: shape.column_names(),
            shape,
            key,
            ignore,
            exclude,
            renderer,
            formatter,
        });

        Ok(status)
    }

    /// Stream the reference table and write all differences.
    ///
    /// Returns normally when cancelled; fragments of the chunk being
    /// processed at that moment are dropped. Each `prepare` allows one
    /// `execute`.
    pub async fn execute(&mut self) -> Result<()> {
        let Some(pair) = self.prepared.take() else {
            return Err(Error::ValidationError(
                "Table comparison has not been prepared successfully, or was already executed".into(),
            ));
        };

        let result = self.run(&pair).await;
        let insert_footer = self.insert_stream.finish(&pair.renderer);
        let update_footer = self.update_stream.finish(&pair.renderer);

        result?;
        insert_footer?;
        update_footer?;

        if self.cancel.is_cancelled() {
            info!(rows = self.rows_processed, "Table comparison cancelled");
        } else {
            info!(
                rows = self.rows_processed,
                inserts = self.inserts,
                updates = self.updates,
                "Table comparison finished"
            );
        }
        Ok(())
    }

    async fn run(&mut self, pair: &PreparedPair) -> Result<()> {
        let chunk_size = self.config.chunk_size.max(1);
        let interval = self.config.progress_interval.max(1);
        let table_name = pair.reference_table.to_string();

        let reference = Arc::clone(&self.reference);
        debug!(sql = pair.reference_select.sql(), "Reading reference rows");
        let mut rows = reference.stream_rows(&pair.reference_select);

        let mut chunk: Vec<Row> = Vec::with_capacity(chunk_size);
        let mut chunk_start = 1u64;

        while let Some(row) = rows.next().await {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            chunk.push(row?);
            self.rows_processed += 1;
            if self.rows_processed % interval == 0 {
                self.monitor.report_progress(&table_name, self.rows_processed);
            }

            if chunk.len() >= chunk_size {
                self.process_chunk(pair, &chunk, chunk_start).await?;
                chunk_start += chunk.len() as u64;
                chunk.clear();
            }
        }

        if !chunk.is_empty() && !self.cancel.is_cancelled() {
            self.process_chunk(pair, &chunk, chunk_start).await?;
        }
        Ok(())
    }

    async fn process_chunk(&mut self, pair: &PreparedPair, chunk: &[Row], first_row: u64) -> Result<()> {
        let target_rows = match &pair.target_table {
            Some(target_table) => match self.fetch_target_rows(pair, target_table, chunk).await? {
                Some(rows) => rows,
                None => return Ok(()),
            },
            None => Vec::new(),
        };

        let mut comparer = RowComparer::new(&pair.shape, &pair.renderer, self.policy());
        comparer.ignore_columns(&pair.ignore);
        comparer.exclude_columns(&pair.exclude);

        let mut fragments: Vec<MigrationFragment> = Vec::new();
        for (offset, row) in chunk.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let matched = find_match(&target_rows, row, &pair.key).map(|i| &target_rows[i]);
            comparer.set_rows(row, matched);
            if let Some(fragment) = comparer.get_migration(first_row + offset as u64)? {
                fragments.push(fragment);
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(());
        }
        for fragment in &fragments {
            match fragment.change.kind {
                ChangeKind::Insert => {
                    self.insert_stream.write(&pair.renderer, fragment)?;
                    self.inserts += 1;
                }
                _ => {
                    self.update_stream.write(&pair.renderer, fragment)?;
                    self.updates += 1;
                }
            }
        }
        Ok(())
    }

    /// Fetch the target rows for one chunk, or None if cancelled while reading
    async fn fetch_target_rows(
        &mut self,
        pair: &PreparedPair,
        target_table: &TableIdentifier,
        chunk: &[Row],
    ) -> Result<Option<Vec<Row>>> {
        let key_columns: Vec<ColumnDescriptor> = pair
            .key
            .row_positions()
            .iter()
            .map(|&i| pair.shape.column(i).clone())
            .collect();
        let mut predicate = KeyPredicate::new(key_columns);
        for row in chunk {
            predicate.add_tuple(row.project(pair.key.row_positions()));
        }
        if predicate.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let statement = SelectStatement::build(
            target_table.clone(),
            pair.target_columns.clone(),
            Some(predicate),
            self.target.dialect(),
            pair.formatter.as_ref(),
        )?;
        debug!(sql = statement.sql(), "Retrieving target rows");

        let target = Arc::clone(&self.target);
        let savepoint = target.set_savepoint(CHUNK_SAVEPOINT).await?;

        match read_rows(target.as_ref(), &statement, &self.cancel).await {
            Ok(rows) => {
                if savepoint {
                    target.release_savepoint(CHUNK_SAVEPOINT).await?;
                }
                Ok(rows)
            }
            Err(e) => {
                self.messages.add_error(format!(
                    "Error retrieving target rows using: {}\n{}",
                    statement.sql(),
                    e
                ));
                if savepoint {
                    let _ = target.rollback_to_savepoint(CHUNK_SAVEPOINT).await;
                }
                Err(e.with_sql(statement.sql()))
            }
        }
    }
}

async fn read_rows(
    source: &dyn Connection,
    statement: &SelectStatement,
    cancel: &CancelToken,
) -> Result<Option<Vec<Row>>> {
    let mut stream = source.stream_rows(statement);
    let mut rows = Vec::new();
    while let Some(row) = stream.next().await {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        rows.push(row?);
    }
    Ok(Some(rows))
}
