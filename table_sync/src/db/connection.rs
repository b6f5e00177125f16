//! Database connection handling
//!
//! This module provides functionality to establish and manage database connections,
//! and to turn driver rows into [`Value`]s.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use rust_decimal::Decimal;
use sqlx::{
    mysql::{MySqlPoolOptions, MySqlRow},
    postgres::{PgPoolOptions, PgRow},
    sqlite::{SqlitePoolOptions, SqliteRow},
    Column as _, MySql, Pool, Postgres, Row as _, Sqlite, TypeInfo, ValueRef,
};
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::data::change::RowChange;
use crate::data::predicate::SelectStatement;
use crate::data::row::{ColumnDescriptor, Row, TableIdentifier};
use crate::data::value::Value;
use crate::db::{Connection, MetadataProvider, RowSource, StatementRunner};
use crate::error::{Error, Result};
use crate::schema::analyzer::SchemaAnalyzer;
use crate::utils::naming::{IdentifierPolicy, SqlDialect};

/// Enumeration of supported connection pools
#[derive(Debug, Clone)]
pub enum DatabasePool {
    Postgres(Pool<Postgres>),
    MySql(Pool<MySql>),
    Sqlite(Pool<Sqlite>),
}

/// A pooled connection to one database, plus the schema it works in
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: DatabasePool,
    schema: Option<String>,
    policy: IdentifierPolicy,
}

impl DatabaseConnection {
    /// Create a new database connection from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool_size = config.pool_size.unwrap_or(10);
        let timeout = Duration::from_secs(config.timeout_seconds.unwrap_or(30));

        let pool = match config.dialect()? {
            SqlDialect::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await?;

                DatabasePool::Postgres(pool)
            }
            SqlDialect::MySql => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await?;

                DatabasePool::MySql(pool)
            }
            SqlDialect::Sqlite => {
                let pool = SqlitePoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await?;

                DatabasePool::Sqlite(pool)
            }
            other => {
                return Err(Error::DatabaseError(format!(
                    "No connection support for the {:?} dialect (driver {})",
                    other, config.driver
                )))
            }
        };

        tracing::debug!(driver = %config.driver, schema = ?config.schema, "Connected");
        Ok(Self::from_pool(pool, config.schema.clone()))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: DatabasePool, schema: Option<String>) -> Self {
        Self {
            pool,
            schema,
            policy: IdentifierPolicy::default(),
        }
    }

    pub fn with_identifier_policy(mut self, policy: IdentifierPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Get the schema name configured for the connection
    pub fn get_schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Execute a SQL statement, returning the number of rows affected
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        let result = match &self.pool {
            DatabasePool::Postgres(pool) => sqlx::query(sql).execute(pool).await?.rows_affected(),
            DatabasePool::MySql(pool) => sqlx::query(sql).execute(pool).await?.rows_affected(),
            DatabasePool::Sqlite(pool) => sqlx::query(sql).execute(pool).await?.rows_affected(),
        };
        Ok(result)
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        match &self.pool {
            DatabasePool::Postgres(pool) => pool.close().await,
            DatabasePool::MySql(pool) => pool.close().await,
            DatabasePool::Sqlite(pool) => pool.close().await,
        }
    }
}

#[async_trait]
impl MetadataProvider for DatabaseConnection {
    async fn find_table(&self, table: &TableIdentifier) -> Result<Option<TableIdentifier>> {
        let schema = table.schema.as_deref().or(self.get_schema());
        let names = SchemaAnalyzer::new(self.clone()).table_names(schema).await?;

        Ok(names
            .into_iter()
            .find(|name| self.policy.matches(name, &table.name))
            .map(|name| TableIdentifier {
                catalog: table.catalog.clone(),
                schema: schema.map(str::to_string),
                name,
            }))
    }

    async fn get_columns(&self, table: &TableIdentifier) -> Result<Vec<ColumnDescriptor>> {
        let schema = table.schema.as_deref().or(self.get_schema());
        let analyzed = SchemaAnalyzer::new(self.clone())
            .analyze_table(schema, &table.name)
            .await?;
        Ok(analyzed.column_descriptors())
    }
}

impl RowSource for DatabaseConnection {
    fn stream_rows<'a>(&'a self, statement: &'a SelectStatement) -> BoxStream<'a, Result<Row>> {
        let sql = statement.sql();
        match &self.pool {
            DatabasePool::Postgres(pool) => sqlx::query(sql)
                .fetch(pool)
                .map(|row| decode_pg_row(&row?))
                .boxed(),
            DatabasePool::MySql(pool) => sqlx::query(sql)
                .fetch(pool)
                .map(|row| decode_mysql_row(&row?))
                .boxed(),
            DatabasePool::Sqlite(pool) => sqlx::query(sql)
                .fetch(pool)
                .map(|row| decode_sqlite_row(&row?))
                .boxed(),
        }
    }
}

#[async_trait]
impl StatementRunner for DatabaseConnection {
    async fn execute_dml(&self, _change: &RowChange, sql: &str) -> Result<u64> {
        self.execute(sql).await
    }
}

impl Connection for DatabaseConnection {
    fn dialect(&self) -> SqlDialect {
        match self.pool {
            DatabasePool::Postgres(_) => SqlDialect::Postgres,
            DatabasePool::MySql(_) => SqlDialect::MySql,
            DatabasePool::Sqlite(_) => SqlDialect::Sqlite,
        }
    }
}

fn decode_pg_row(row: &PgRow) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        if row.try_get_raw(i)?.is_null() {
            values.push(Value::Null);
            continue;
        }
        let value = match column.type_info().name() {
            "BOOL" => Value::Bool(row.try_get(i)?),
            "INT2" => Value::Int(row.try_get::<i16, _>(i)? as i64),
            "INT4" => Value::Int(row.try_get::<i32, _>(i)? as i64),
            "INT8" => Value::Int(row.try_get(i)?),
            "FLOAT4" => Value::Float(row.try_get::<f32, _>(i)? as f64),
            "FLOAT8" => Value::Float(row.try_get(i)?),
            "NUMERIC" => Value::Decimal(row.try_get::<Decimal, _>(i)?),
            "BYTEA" => Value::Bytes(row.try_get(i)?),
            "DATE" => Value::Date(row.try_get::<NaiveDate, _>(i)?),
            "TIME" => Value::Time(row.try_get::<NaiveTime, _>(i)?),
            "TIMESTAMP" => Value::Timestamp(row.try_get::<NaiveDateTime, _>(i)?),
            "TIMESTAMPTZ" => Value::Timestamp(row.try_get::<DateTime<Utc>, _>(i)?.naive_utc()),
            "UUID" => Value::Uuid(row.try_get::<Uuid, _>(i)?),
            "JSON" | "JSONB" => Value::Text(row.try_get::<serde_json::Value, _>(i)?.to_string()),
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => Value::Text(row.try_get(i)?),
            other => Value::Text(row.try_get_unchecked::<String, _>(i).map_err(|e| {
                Error::Conversion(format!("column {} of type {}: {}", column.name(), other, e))
            })?),
        };
        values.push(value);
    }
    Ok(Row::new(values))
}

fn decode_mysql_row(row: &MySqlRow) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        if row.try_get_raw(i)?.is_null() {
            values.push(Value::Null);
            continue;
        }
        let type_name = column.type_info().name();
        let value = match type_name {
            "BOOLEAN" => Value::Bool(row.try_get(i)?),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => Value::Int(row.try_get(i)?),
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED" => {
                Value::Int(row.try_get::<u32, _>(i)? as i64)
            }
            "BIGINT UNSIGNED" => {
                let v: u64 = row.try_get(i)?;
                i64::try_from(v)
                    .map(Value::Int)
                    .unwrap_or_else(|_| Value::Decimal(Decimal::from(v)))
            }
            "YEAR" => Value::Int(row.try_get_unchecked::<u16, _>(i)? as i64),
            "FLOAT" => Value::Float(row.try_get::<f32, _>(i)? as f64),
            "DOUBLE" => Value::Float(row.try_get(i)?),
            "DECIMAL" => Value::Decimal(row.try_get::<Decimal, _>(i)?),
            "DATE" => Value::Date(row.try_get::<NaiveDate, _>(i)?),
            "TIME" => Value::Time(row.try_get::<NaiveTime, _>(i)?),
            "DATETIME" | "TIMESTAMP" => Value::Timestamp(row.try_get::<NaiveDateTime, _>(i)?),
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
                Value::Bytes(row.try_get(i)?)
            }
            other => Value::Text(row.try_get_unchecked::<String, _>(i).map_err(|e| {
                Error::Conversion(format!("column {} of type {}: {}", column.name(), other, e))
            })?),
        };
        values.push(value);
    }
    Ok(Row::new(values))
}

/// SQLite values are typed by storage class, not by the declared column type
fn decode_sqlite_row(row: &SqliteRow) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        let storage = raw.type_info().name().to_string();
        let value = match storage.as_str() {
            "INTEGER" | "BOOLEAN" => Value::Int(row.try_get_unchecked(i)?),
            "REAL" => Value::Float(row.try_get_unchecked(i)?),
            "BLOB" => Value::Bytes(row.try_get_unchecked(i)?),
            _ => Value::Text(row.try_get_unchecked(i)?),
        };
        values.push(value);
    }
    Ok(Row::new(values))
}
