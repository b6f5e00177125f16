//! In-process database used for offline comparisons and tests.
//!
//! Queries are not parsed: a [`SelectStatement`] carries its projection and
//! key predicate, and a [`RowChange`] its column values, and both are
//! evaluated directly against the stored rows.

use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::data::change::{ChangeKind, ColumnValue, RowChange};
use crate::data::predicate::{KeyPredicate, SelectStatement};
use crate::data::row::{ColumnDescriptor, Row, TableIdentifier};
use crate::data::value::{key_equals, value_equals, Value};
use crate::db::{Connection, MetadataProvider, RowSource, StatementRunner};
use crate::error::{Error, Result};
use crate::utils::naming::{IdentifierPolicy, SqlDialect};

#[derive(Debug, Clone)]
struct MemoryTable {
    id: TableIdentifier,
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn position(&self, name: &str, policy: IdentifierPolicy) -> Option<usize> {
        self.columns.iter().position(|c| policy.matches(&c.name, name))
    }

    fn matches_predicate(&self, row: &Row, predicate: &KeyPredicate, policy: IdentifierPolicy) -> Result<bool> {
        let positions = predicate
            .columns()
            .iter()
            .map(|c| {
                self.position(&c.name, policy).ok_or_else(|| {
                    Error::DatabaseError(format!("column {} does not exist in {}", c.name, self.id))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(predicate.tuples().iter().any(|tuple| {
            positions
                .iter()
                .zip(tuple)
                .all(|(&i, value)| key_equals(row.get(i), value))
        }))
    }

    fn matches_key(&self, row: &Row, key: &[ColumnValue], policy: IdentifierPolicy) -> Result<bool> {
        for cv in key {
            let i = self.position(&cv.column.name, policy).ok_or_else(|| {
                Error::DatabaseError(format!("column {} does not exist in {}", cv.column.name, self.id))
            })?;
            // `col IS NULL` matches NULL, `col = value` never does
            let equal = if cv.value.is_null() {
                row.get(i).is_null()
            } else {
                key_equals(row.get(i), &cv.value)
            };
            if !equal {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// A set of tables held in memory
#[derive(Debug)]
pub struct MemoryDatabase {
    dialect: SqlDialect,
    policy: IdentifierPolicy,
    supports_savepoints: bool,
    tables: RwLock<Vec<MemoryTable>>,
    savepoint_log: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
    failing_table: Mutex<Option<String>>,
}

impl MemoryDatabase {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            policy: IdentifierPolicy::default(),
            supports_savepoints: false,
            tables: RwLock::new(Vec::new()),
            savepoint_log: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            failing_table: Mutex::new(None),
        }
    }

    /// Accept savepoint calls and record them
    pub fn with_savepoints(mut self) -> Self {
        self.supports_savepoints = true;
        self
    }

    pub fn with_identifier_policy(mut self, policy: IdentifierPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<MemoryTable>> {
        self.tables.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<MemoryTable>> {
        self.tables.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log(list: &Mutex<Vec<String>>, entry: String) {
        list.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    /// Create (or replace) a table
    pub fn create_table(&self, table: TableIdentifier, columns: Vec<ColumnDescriptor>) {
        let mut tables = self.write();
        tables.retain(|t| !t.id.matches(&table, self.policy));
        tables.push(MemoryTable {
            id: table,
            columns,
            rows: Vec::new(),
        });
    }

    pub fn insert_row(&self, table: &TableIdentifier, values: Vec<Value>) -> Result<()> {
        let mut tables = self.write();
        let t = tables
            .iter_mut()
            .find(|t| t.id.matches(table, self.policy))
            .ok_or_else(|| Error::DatabaseError(format!("table {} does not exist", table)))?;
        if values.len() != t.columns.len() {
            return Err(Error::DatabaseError(format!(
                "{} expects {} values, got {}",
                t.id,
                t.columns.len(),
                values.len()
            )));
        }
        t.rows.push(Row::new(values));
        Ok(())
    }

    pub fn rows(&self, table: &TableIdentifier) -> Vec<Row> {
        self.read()
            .iter()
            .find(|t| t.id.matches(table, self.policy))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &TableIdentifier) -> usize {
        self.read()
            .iter()
            .find(|t| t.id.matches(table, self.policy))
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Savepoint calls seen so far, e.g. `set table_sync_chunk`
    pub fn savepoint_log(&self) -> Vec<String> {
        self.savepoint_log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// SQL text of every statement run through `execute_dml`
    pub fn executed_statements(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Make every filtered SELECT against `table` fail
    pub fn fail_queries_on(&self, table: Option<&str>) {
        *self
            .failing_table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = table.map(str::to_string);
    }

    fn select(&self, statement: &SelectStatement) -> Result<Vec<Row>> {
        if statement.filter().is_some() {
            let failing = self
                .failing_table
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone();
            if let Some(name) = failing {
                if self.policy.matches(&name, &statement.table().name) {
                    return Err(Error::DatabaseError(format!(
                        "simulated failure reading {}",
                        name
                    )));
                }
            }
        }

        let tables = self.read();
        let table = tables
            .iter()
            .find(|t| t.id.matches(statement.table(), self.policy))
            .ok_or_else(|| {
                Error::DatabaseError(format!("table {} does not exist", statement.table()))
            })?;

        let projection: Vec<usize> = if statement.columns().is_empty() {
            (0..table.columns.len()).collect()
        } else {
            statement
                .columns()
                .iter()
                .map(|name| {
                    table.position(name, self.policy).ok_or_else(|| {
                        Error::DatabaseError(format!("column {} does not exist in {}", name, table.id))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        let mut rows = Vec::new();
        for row in &table.rows {
            let selected = match statement.filter() {
                Some(predicate) => table.matches_predicate(row, predicate, self.policy)?,
                None => true,
            };
            if selected {
                rows.push(Row::new(row.project(&projection)));
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl MetadataProvider for MemoryDatabase {
    async fn find_table(&self, table: &TableIdentifier) -> Result<Option<TableIdentifier>> {
        Ok(self
            .read()
            .iter()
            .find(|t| t.id.matches(table, self.policy))
            .map(|t| t.id.clone()))
    }

    async fn get_columns(&self, table: &TableIdentifier) -> Result<Vec<ColumnDescriptor>> {
        self.read()
            .iter()
            .find(|t| t.id.matches(table, self.policy))
            .map(|t| t.columns.clone())
            .ok_or_else(|| Error::DatabaseError(format!("table {} does not exist", table)))
    }
}

impl RowSource for MemoryDatabase {
    fn stream_rows<'a>(&'a self, statement: &'a SelectStatement) -> BoxStream<'a, Result<Row>> {
        // Rows are copied out so no lock is held while the caller consumes them
        match self.select(statement) {
            Ok(rows) => stream::iter(rows.into_iter().map(Ok)).boxed(),
            Err(e) => stream::iter(std::iter::once(Err(e))).boxed(),
        }
    }
}

#[async_trait]
impl StatementRunner for MemoryDatabase {
    async fn execute_dml(&self, change: &RowChange, sql: &str) -> Result<u64> {
        Self::log(&self.executed, sql.to_string());
        let policy = self.policy;

        let mut tables = self.write();
        let table = tables
            .iter_mut()
            .find(|t| t.id.matches(&change.table, policy))
            .ok_or_else(|| Error::DatabaseError(format!("table {} does not exist", change.table)))?;

        match change.kind {
            ChangeKind::Insert => {
                let mut row = Row::new(vec![Value::Null; table.columns.len()]);
                for cv in &change.values {
                    let i = table.position(&cv.column.name, policy).ok_or_else(|| {
                        Error::DatabaseError(format!(
                            "column {} does not exist in {}",
                            cv.column.name, table.id
                        ))
                    })?;
                    row.set(i, cv.value.clone());
                }
                // Enforce the primary key like a real table would
                let pk: Vec<usize> = table
                    .columns
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.is_primary_key)
                    .map(|(i, _)| i)
                    .collect();
                if !pk.is_empty() && table.rows.iter().any(|r| r.key_equals(&pk, &row, &pk)) {
                    return Err(Error::DatabaseError(format!(
                        "duplicate key value violates primary key of {}",
                        table.id
                    )));
                }
                table.rows.push(row);
                Ok(1)
            }
            ChangeKind::Update => {
                let mut targets = Vec::new();
                for cv in &change.values {
                    let i = table.position(&cv.column.name, policy).ok_or_else(|| {
                        Error::DatabaseError(format!(
                            "column {} does not exist in {}",
                            cv.column.name, table.id
                        ))
                    })?;
                    targets.push((i, cv.value.clone()));
                }
                let mut affected = 0;
                for index in 0..table.rows.len() {
                    if table.matches_key(&table.rows[index], &change.key, policy)? {
                        for (i, value) in &targets {
                            table.rows[index].set(*i, value.clone());
                        }
                        affected += 1;
                    }
                }
                Ok(affected)
            }
            ChangeKind::Delete => {
                let mut doomed = Vec::with_capacity(table.rows.len());
                for row in &table.rows {
                    doomed.push(table.matches_key(row, &change.key, policy)?);
                }
                let affected = doomed.iter().filter(|d| **d).count() as u64;
                let mut doomed = doomed.into_iter();
                table.rows.retain(|_| !doomed.next().unwrap_or(false));
                Ok(affected)
            }
        }
    }

    async fn set_savepoint(&self, name: &str) -> Result<bool> {
        if self.supports_savepoints {
            Self::log(&self.savepoint_log, format!("set {}", name));
        }
        Ok(self.supports_savepoints)
    }

    async fn release_savepoint(&self, name: &str) -> Result<bool> {
        if self.supports_savepoints {
            Self::log(&self.savepoint_log, format!("release {}", name));
        }
        Ok(self.supports_savepoints)
    }

    async fn rollback_to_savepoint(&self, name: &str) -> Result<bool> {
        if self.supports_savepoints {
            Self::log(&self.savepoint_log, format!("rollback {}", name));
        }
        Ok(self.supports_savepoints)
    }
}

impl Connection for MemoryDatabase {
    fn dialect(&self) -> SqlDialect {
        self.dialect
    }
}

/// True if two rows hold value-equal data in every column
pub fn rows_equal(left: &Row, right: &Row) -> bool {
    left.len() == right.len()
        && left
            .values()
            .iter()
            .zip(right.values())
            .all(|(a, b)| value_equals(a, b))
}
