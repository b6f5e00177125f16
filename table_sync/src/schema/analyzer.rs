//! Database schema analyzer
//!
//! Catalog introspection for PostgreSQL, MySQL and SQLite. Besides feeding
//! the schema comparison, the per-table analysis supplies the column lists
//! the row-level engine works with.

use async_trait::async_trait;
use indexmap::IndexMap;
use sqlx::{FromRow, MySql, Pool, Postgres, Row, Sqlite};

use crate::config::SchemaConfig;
use crate::db::connection::{DatabaseConnection, DatabasePool};
use crate::error::{Error, Result};
use crate::schema::types::{
    Column, Constraint, DatabaseSchema, ForeignKey, Grant, Index, PrimaryKey, Sequence, Table,
    Trigger, View,
};

/// Schema analyzer trait
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Names of the base tables in the schema
    async fn table_names(&self, schema_name: Option<&str>) -> Result<Vec<String>>;

    /// Full definition of one table
    async fn analyze_table(&self, schema_name: Option<&str>, table_name: &str) -> Result<Table>;

    /// Analyze view definitions
    async fn analyze_views(&self, schema_name: Option<&str>) -> Result<IndexMap<String, View>>;

    /// Analyze sequences; databases without sequences have none
    async fn analyze_sequences(&self, _schema_name: Option<&str>) -> Result<IndexMap<String, Sequence>> {
        Ok(IndexMap::new())
    }

    /// Analyze table definitions
    async fn analyze_tables(&self, schema_name: Option<&str>) -> Result<IndexMap<String, Table>> {
        let mut tables = IndexMap::new();
        for name in self.table_names(schema_name).await? {
            let table = self.analyze_table(schema_name, &name).await?;
            tables.insert(name, table);
        }
        Ok(tables)
    }

    /// Analyze the database schema, restricted to the object kinds enabled in `config`
    async fn analyze_schema(&self, schema_name: Option<&str>, config: &SchemaConfig) -> Result<DatabaseSchema> {
        let mut db_schema = DatabaseSchema::new(schema_name.map(str::to_string));
        db_schema.tables = self.analyze_tables(schema_name).await?;

        if config.include_views {
            db_schema.views = self.analyze_views(schema_name).await?;
        }
        if config.include_sequences {
            db_schema.sequences = self.analyze_sequences(schema_name).await?;
        }
        for table in db_schema.tables.values_mut() {
            if !config.include_triggers {
                table.triggers.clear();
            }
            if !config.include_grants {
                table.grants.clear();
            }
        }

        Ok(db_schema)
    }
}

/// Schema analyzer for database schema introspection
pub struct SchemaAnalyzer {
    connection: DatabaseConnection,
}

impl SchemaAnalyzer {
    /// Create a new schema analyzer
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    fn analyzer(&self) -> Box<dyn Analyzer + '_> {
        match self.connection.pool() {
            DatabasePool::Postgres(pool) => Box::new(PostgresAnalyzer { pool }),
            DatabasePool::MySql(pool) => Box::new(MySqlAnalyzer { pool }),
            DatabasePool::Sqlite(pool) => Box::new(SqliteAnalyzer { pool }),
        }
    }

    /// Analyze the configured schema
    pub async fn analyze(&self, config: &SchemaConfig) -> Result<DatabaseSchema> {
        self.analyzer()
            .analyze_schema(self.connection.get_schema(), config)
            .await
    }

    pub async fn table_names(&self, schema_name: Option<&str>) -> Result<Vec<String>> {
        let schema = schema_name.or(self.connection.get_schema());
        self.analyzer().table_names(schema).await
    }

    pub async fn analyze_table(&self, schema_name: Option<&str>, table_name: &str) -> Result<Table> {
        let schema = schema_name.or(self.connection.get_schema());
        self.analyzer().analyze_table(schema, table_name).await
    }
}

// Row types for catalog queries
#[derive(FromRow)]
struct TableRow {
    table_name: String,
}

#[derive(FromRow)]
struct ColumnRow {
    column_name: String,
    data_type: String,
    is_nullable: String,
    column_default: Option<String>,
    character_maximum_length: Option<i64>,
    column_comment: Option<String>,
    generation_expression: Option<String>,
}

impl ColumnRow {
    fn into_column(self) -> Column {
        let (data_type, size) = match self.data_type.as_str() {
            "character varying" | "varchar" => ("varchar".to_string(), self.character_maximum_length),
            "character" | "char" => ("char".to_string(), self.character_maximum_length),
            _ => (self.data_type, None),
        };
        let generation_expression = self.generation_expression.filter(|e| !e.is_empty());

        Column {
            name: self.column_name,
            data_type,
            size,
            nullable: self.is_nullable == "YES",
            default: self.column_default,
            comment: self.column_comment.filter(|c| !c.is_empty()),
            is_unique: false,
            is_generated: generation_expression.is_some(),
            generation_expression,
        }
    }
}

#[derive(FromRow)]
struct PrimaryKeyRow {
    constraint_name: String,
    column_name: String,
}

#[derive(FromRow)]
struct IndexRow {
    index_name: String,
    column_name: String,
    is_unique: Option<bool>,
    index_method: String,
}

#[derive(FromRow)]
struct ForeignKeyRow {
    constraint_name: String,
    column_name: String,
    ref_table: String,
    ref_column: String,
    delete_rule: String,
    update_rule: String,
}

#[derive(FromRow)]
struct ConstraintRow {
    name: String,
    definition: String,
    constraint_type: String,
}

#[derive(FromRow)]
struct GrantRow {
    grantee: String,
    privilege: String,
    grantable: bool,
}

#[derive(FromRow)]
struct TriggerRow {
    name: String,
    timing: String,
    event: String,
    definition: String,
}

#[derive(FromRow)]
struct ViewRow {
    table_name: String,
    view_definition: Option<String>,
}

#[derive(FromRow)]
struct MatViewRow {
    matviewname: String,
    definition: Option<String>,
}

#[derive(FromRow)]
struct SequenceRow {
    name: String,
    start_value: Option<i64>,
    increment: Option<i64>,
    min_value: Option<i64>,
    max_value: Option<i64>,
    cycle: bool,
}

fn primary_key_from(rows: Vec<PrimaryKeyRow>) -> Option<PrimaryKey> {
    let name = rows.first()?.constraint_name.clone();
    Some(PrimaryKey {
        name: Some(name),
        columns: rows.into_iter().map(|r| r.column_name).collect(),
    })
}

fn indexes_from(rows: Vec<IndexRow>) -> Vec<Index> {
    let mut indexes: IndexMap<String, Index> = IndexMap::new();
    for row in rows {
        indexes
            .entry(row.index_name.clone())
            .or_insert_with(|| Index {
                name: row.index_name.clone(),
                columns: Vec::new(),
                is_unique: row.is_unique.unwrap_or(false),
                method: Some(row.index_method.clone()),
            })
            .columns
            .push(row.column_name);
    }
    indexes.into_values().collect()
}

fn foreign_keys_from(rows: Vec<ForeignKeyRow>) -> Vec<ForeignKey> {
    let mut foreign_keys: IndexMap<String, ForeignKey> = IndexMap::new();
    for row in rows {
        let fk = foreign_keys
            .entry(row.constraint_name.clone())
            .or_insert_with(|| ForeignKey {
                name: row.constraint_name.clone(),
                columns: Vec::new(),
                ref_table: row.ref_table.clone(),
                ref_columns: Vec::new(),
                on_delete: Some(row.delete_rule.clone()),
                on_update: Some(row.update_rule.clone()),
            });
        // The catalog joins can repeat a column pair for composite keys
        if !fk.columns.contains(&row.column_name) {
            fk.columns.push(row.column_name);
        }
        if !fk.ref_columns.contains(&row.ref_column) {
            fk.ref_columns.push(row.ref_column);
        }
    }
    foreign_keys.into_values().collect()
}

/// PostgreSQL schema analyzer
struct PostgresAnalyzer<'a> {
    pool: &'a Pool<Postgres>,
}

impl<'a> PostgresAnalyzer<'a> {
    async fn view_columns(&self, schema: &str, view_name: &str) -> Result<Vec<Column>> {
        let sql = r#"
            SELECT
                column_name::text AS column_name,
                data_type::text AS data_type,
                is_nullable::text AS is_nullable,
                NULL::text AS column_default,
                character_maximum_length::bigint AS character_maximum_length,
                NULL::text AS column_comment,
                NULL::text AS generation_expression
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;

        let rows = sqlx::query_as::<_, ColumnRow>(sql)
            .bind(schema)
            .bind(view_name)
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(ColumnRow::into_column).collect())
    }
}

#[async_trait]
impl<'a> Analyzer for PostgresAnalyzer<'a> {
    async fn table_names(&self, schema_name: Option<&str>) -> Result<Vec<String>> {
        let schema = schema_name.unwrap_or("public");
        let sql = r#"
            SELECT table_name::text AS table_name
            FROM information_schema.tables
            WHERE table_schema = $1 AND table_type = 'BASE TABLE'
            ORDER BY table_name
        "#;

        let rows = sqlx::query_as::<_, TableRow>(sql)
            .bind(schema)
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.table_name).collect())
    }

    async fn analyze_table(&self, schema_name: Option<&str>, table_name: &str) -> Result<Table> {
        let schema = schema_name.unwrap_or("public");
        let mut table = Table::new(table_name);

        // Columns
        let sql = r#"
            SELECT
                c.column_name::text AS column_name,
                c.data_type::text AS data_type,
                c.is_nullable::text AS is_nullable,
                c.column_default::text AS column_default,
                c.character_maximum_length::bigint AS character_maximum_length,
                col_description(format('%I.%I', c.table_schema, c.table_name)::regclass,
                                c.ordinal_position::int) AS column_comment,
                c.generation_expression::text AS generation_expression
            FROM information_schema.columns c
            WHERE c.table_schema = $1 AND c.table_name = $2
            ORDER BY c.ordinal_position
        "#;

        let column_rows = sqlx::query_as::<_, ColumnRow>(sql)
            .bind(schema)
            .bind(table_name)
            .fetch_all(self.pool)
            .await?;
        if column_rows.is_empty() {
            return Err(Error::SchemaAnalysisError(format!(
                "Table {}.{} has no columns or does not exist",
                schema, table_name
            )));
        }
        table.columns = column_rows.into_iter().map(ColumnRow::into_column).collect();

        let sql = "SELECT obj_description(format('%I.%I', $1::text, $2::text)::regclass, 'pg_class')";
        table.comment = sqlx::query_scalar::<_, Option<String>>(sql)
            .bind(schema)
            .bind(table_name)
            .fetch_one(self.pool)
            .await?;

        // Primary key
        let sql = r#"
            SELECT
                tc.constraint_name::text AS constraint_name,
                kcu.column_name::text AS column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.constraint_type = 'PRIMARY KEY'
                AND tc.table_schema = $1
                AND tc.table_name = $2
            ORDER BY kcu.ordinal_position
        "#;

        let pk_rows = sqlx::query_as::<_, PrimaryKeyRow>(sql)
            .bind(schema)
            .bind(table_name)
            .fetch_all(self.pool)
            .await?;
        table.primary_key = primary_key_from(pk_rows);

        // Indexes not backing a constraint
        let sql = r#"
            SELECT
                i.relname::text AS index_name,
                a.attname::text AS column_name,
                ix.indisunique AS is_unique,
                am.amname::text AS index_method
            FROM pg_index ix
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
            JOIN pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_am am ON am.oid = i.relam
            WHERE t.relname = $1
                AND n.nspname = $2
                AND NOT ix.indisprimary
                AND NOT EXISTS (SELECT 1 FROM pg_constraint c WHERE c.conindid = ix.indexrelid)
            ORDER BY i.relname, array_position(ix.indkey::int2[], a.attnum)
        "#;

        let index_rows = sqlx::query_as::<_, IndexRow>(sql)
            .bind(table_name)
            .bind(schema)
            .fetch_all(self.pool)
            .await?;
        table.indexes = indexes_from(index_rows);

        // Foreign keys
        let sql = r#"
            SELECT
                tc.constraint_name::text AS constraint_name,
                kcu.column_name::text AS column_name,
                ccu.table_name::text AS ref_table,
                ccu.column_name::text AS ref_column,
                rc.delete_rule::text AS delete_rule,
                rc.update_rule::text AS update_rule
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
                ON ccu.constraint_name = tc.constraint_name
                AND ccu.table_schema = tc.table_schema
            JOIN information_schema.referential_constraints rc
                ON tc.constraint_name = rc.constraint_name
                AND tc.table_schema = rc.constraint_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
                AND tc.table_schema = $1
                AND tc.table_name = $2
            ORDER BY tc.constraint_name, kcu.ordinal_position
        "#;

        let fk_rows = sqlx::query_as::<_, ForeignKeyRow>(sql)
            .bind(schema)
            .bind(table_name)
            .fetch_all(self.pool)
            .await?;
        table.foreign_keys = foreign_keys_from(fk_rows);

        // Check and unique constraints
        let sql = r#"
            SELECT
                con.conname::text AS name,
                pg_get_constraintdef(con.oid) AS definition,
                CASE con.contype WHEN 'c' THEN 'CHECK' ELSE 'UNIQUE' END AS constraint_type
            FROM pg_constraint con
            JOIN pg_class t ON t.oid = con.conrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            WHERE n.nspname = $1 AND t.relname = $2 AND con.contype IN ('c', 'u')
            ORDER BY con.conname
        "#;

        table.constraints = sqlx::query_as::<_, ConstraintRow>(sql)
            .bind(schema)
            .bind(table_name)
            .fetch_all(self.pool)
            .await?
            .into_iter()
            .map(|r| Constraint {
                name: r.name,
                definition: r.definition,
                constraint_type: r.constraint_type,
            })
            .collect();

        // Grants
        let sql = r#"
            SELECT
                grantee::text AS grantee,
                privilege_type::text AS privilege,
                (is_grantable = 'YES') AS grantable
            FROM information_schema.role_table_grants
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY grantee, privilege_type
        "#;

        table.grants = sqlx::query_as::<_, GrantRow>(sql)
            .bind(schema)
            .bind(table_name)
            .fetch_all(self.pool)
            .await?
            .into_iter()
            .map(|r| Grant {
                grantee: r.grantee,
                privilege: r.privilege,
                grantable: r.grantable,
            })
            .collect();

        // Triggers
        let sql = r#"
            SELECT
                trigger_name::text AS name,
                action_timing::text AS timing,
                string_agg(event_manipulation::text, ' OR ' ORDER BY event_manipulation::text) AS event,
                action_statement::text AS definition
            FROM information_schema.triggers
            WHERE event_object_schema = $1 AND event_object_table = $2
            GROUP BY trigger_name, action_timing, action_statement
            ORDER BY trigger_name
        "#;

        table.triggers = sqlx::query_as::<_, TriggerRow>(sql)
            .bind(schema)
            .bind(table_name)
            .fetch_all(self.pool)
            .await?
            .into_iter()
            .map(|r| Trigger {
                name: r.name,
                timing: r.timing,
                event: r.event,
                definition: r.definition,
            })
            .collect();

        Ok(table)
    }

    async fn analyze_views(&self, schema_name: Option<&str>) -> Result<IndexMap<String, View>> {
        let schema = schema_name.unwrap_or("public");
        let mut views = IndexMap::new();

        let sql = r#"
            SELECT table_name::text AS table_name, view_definition::text AS view_definition
            FROM information_schema.views
            WHERE table_schema = $1
            ORDER BY table_name
        "#;

        let view_rows = sqlx::query_as::<_, ViewRow>(sql)
            .bind(schema)
            .fetch_all(self.pool)
            .await?;

        for row in view_rows {
            let columns = self.view_columns(schema, &row.table_name).await?;
            views.insert(
                row.table_name.clone(),
                View {
                    name: row.table_name,
                    definition: row.view_definition.unwrap_or_default(),
                    columns,
                    is_materialized: false,
                },
            );
        }

        // Materialized views are not listed in information_schema
        let sql = r#"
            SELECT matviewname::text AS matviewname, definition
            FROM pg_matviews
            WHERE schemaname = $1
            ORDER BY matviewname
        "#;

        let mat_view_rows = sqlx::query_as::<_, MatViewRow>(sql)
            .bind(schema)
            .fetch_all(self.pool)
            .await?;

        for row in mat_view_rows {
            let columns = self.view_columns(schema, &row.matviewname).await?;
            views.insert(
                row.matviewname.clone(),
                View {
                    name: row.matviewname,
                    definition: row.definition.unwrap_or_default(),
                    columns,
                    is_materialized: true,
                },
            );
        }

        Ok(views)
    }

    async fn analyze_sequences(&self, schema_name: Option<&str>) -> Result<IndexMap<String, Sequence>> {
        let schema = schema_name.unwrap_or("public");
        let sql = r#"
            SELECT
                sequence_name::text AS name,
                start_value::bigint AS start_value,
                increment::bigint AS increment,
                minimum_value::bigint AS min_value,
                maximum_value::numeric::bigint AS max_value,
                (cycle_option = 'YES') AS cycle
            FROM information_schema.sequences
            WHERE sequence_schema = $1
            ORDER BY sequence_name
        "#;

        let rows = sqlx::query_as::<_, SequenceRow>(sql)
            .bind(schema)
            .fetch_all(self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.name.clone(),
                    Sequence {
                        name: r.name,
                        start_value: r.start_value,
                        increment: r.increment,
                        min_value: r.min_value,
                        max_value: r.max_value,
                        cycle: r.cycle,
                    },
                )
            })
            .collect())
    }
}

/// MySQL schema analyzer
struct MySqlAnalyzer<'a> {
    pool: &'a Pool<MySql>,
}

impl<'a> MySqlAnalyzer<'a> {
    /// MySQL schemas are databases; default to the connection's database
    async fn schema(&self, schema_name: Option<&str>) -> Result<String> {
        if let Some(schema) = schema_name {
            return Ok(schema.to_string());
        }
        sqlx::query_scalar::<_, Option<String>>("SELECT DATABASE()")
            .fetch_one(self.pool)
            .await?
            .ok_or_else(|| Error::SchemaAnalysisError("No MySQL database selected".to_string()))
    }
}

#[async_trait]
impl<'a> Analyzer for MySqlAnalyzer<'a> {
    async fn table_names(&self, schema_name: Option<&str>) -> Result<Vec<String>> {
        let schema = self.schema(schema_name).await?;
        let sql = r#"
            SELECT CAST(table_name AS CHAR) AS table_name
            FROM information_schema.tables
            WHERE table_schema = ? AND table_type = 'BASE TABLE'
            ORDER BY table_name
        "#;

        let rows = sqlx::query_as::<_, TableRow>(sql)
            .bind(&schema)
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.table_name).collect())
    }

    async fn analyze_table(&self, schema_name: Option<&str>, table_name: &str) -> Result<Table> {
        let schema = self.schema(schema_name).await?;
        let mut table = Table::new(table_name);

        // Columns
        let sql = r#"
            SELECT
                CAST(column_name AS CHAR) AS column_name,
                CAST(data_type AS CHAR) AS data_type,
                CAST(is_nullable AS CHAR) AS is_nullable,
                CAST(column_default AS CHAR) AS column_default,
                CAST(character_maximum_length AS SIGNED) AS character_maximum_length,
                CAST(column_comment AS CHAR) AS column_comment,
                CAST(generation_expression AS CHAR) AS generation_expression
            FROM information_schema.columns
            WHERE table_schema = ? AND table_name = ?
            ORDER BY ordinal_position
        "#;

        let column_rows = sqlx::query_as::<_, ColumnRow>(sql)
            .bind(&schema)
            .bind(table_name)
            .fetch_all(self.pool)
            .await?;
        if column_rows.is_empty() {
            return Err(Error::SchemaAnalysisError(format!(
                "Table {}.{} has no columns or does not exist",
                schema, table_name
            )));
        }
        table.columns = column_rows.into_iter().map(ColumnRow::into_column).collect();

        // Primary key
        let sql = r#"
            SELECT CAST(k.constraint_name AS CHAR) AS constraint_name,
                   CAST(k.column_name AS CHAR) AS column_name
            FROM information_schema.table_constraints t
            JOIN information_schema.key_column_usage k
                ON t.constraint_name = k.constraint_name
                AND t.table_schema = k.table_schema
                AND t.table_name = k.table_name
            WHERE t.table_schema = ? AND t.table_name = ?
                AND t.constraint_type = 'PRIMARY KEY'
            ORDER BY k.ordinal_position
        "#;

        let pk_rows = sqlx::query_as::<_, PrimaryKeyRow>(sql)
            .bind(&schema)
            .bind(table_name)
            .fetch_all(self.pool)
            .await?;
        table.primary_key = primary_key_from(pk_rows);

        // Indexes
        let sql = r#"
            SELECT CAST(index_name AS CHAR) AS index_name,
                   CAST(column_name AS CHAR) AS column_name,
                   CAST(non_unique AS SIGNED) AS non_unique,
                   CAST(index_type AS CHAR) AS index_method
            FROM information_schema.statistics
            WHERE table_schema = ? AND table_name = ? AND index_name <> 'PRIMARY'
            ORDER BY index_name, seq_in_index
        "#;

        let index_rows = sqlx::query(sql)
            .bind(&schema)
            .bind(table_name)
            .fetch_all(self.pool)
            .await?
            .into_iter()
            .map(|row| {
                Ok(IndexRow {
                    index_name: row.try_get("index_name")?,
                    column_name: row.try_get("column_name")?,
                    is_unique: Some(row.try_get::<i64, _>("non_unique")? == 0),
                    index_method: row.try_get("index_method")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
        table.indexes = indexes_from(index_rows);

        // Foreign keys
        let sql = r#"
            SELECT
                CAST(rc.constraint_name AS CHAR) AS constraint_name,
                CAST(kcu.column_name AS CHAR) AS column_name,
                CAST(kcu.referenced_table_name AS CHAR) AS ref_table,
                CAST(kcu.referenced_column_name AS CHAR) AS ref_column,
                CAST(rc.delete_rule AS CHAR) AS delete_rule,
                CAST(rc.update_rule AS CHAR) AS update_rule
            FROM information_schema.referential_constraints rc
            JOIN information_schema.key_column_usage kcu
                ON rc.constraint_name = kcu.constraint_name
                AND rc.constraint_schema = kcu.table_schema
            WHERE rc.constraint_schema = ? AND kcu.table_name = ?
            ORDER BY rc.constraint_name, kcu.ordinal_position
        "#;

        let fk_rows = sqlx::query_as::<_, ForeignKeyRow>(sql)
            .bind(&schema)
            .bind(table_name)
            .fetch_all(self.pool)
            .await?;
        table.foreign_keys = foreign_keys_from(fk_rows);

        // Triggers
        let sql = r#"
            SELECT CAST(trigger_name AS CHAR) AS name,
                   CAST(action_timing AS CHAR) AS timing,
                   CAST(event_manipulation AS CHAR) AS event,
                   CAST(action_statement AS CHAR) AS definition
            FROM information_schema.triggers
            WHERE event_object_schema = ? AND event_object_table = ?
            ORDER BY trigger_name
        "#;

        table.triggers = sqlx::query_as::<_, TriggerRow>(sql)
            .bind(&schema)
            .bind(table_name)
            .fetch_all(self.pool)
            .await?
            .into_iter()
            .map(|r| Trigger {
                name: r.name,
                timing: r.timing,
                event: r.event,
                definition: r.definition,
            })
            .collect();

        Ok(table)
    }

    async fn analyze_views(&self, schema_name: Option<&str>) -> Result<IndexMap<String, View>> {
        let schema = self.schema(schema_name).await?;
        let mut views = IndexMap::new();

        let sql = r#"
            SELECT CAST(table_name AS CHAR) AS table_name,
                   CAST(view_definition AS CHAR) AS view_definition
            FROM information_schema.views
            WHERE table_schema = ?
            ORDER BY table_name
        "#;

        let view_rows = sqlx::query_as::<_, ViewRow>(sql)
            .bind(&schema)
            .fetch_all(self.pool)
            .await?;

        for row in view_rows {
            let sql = r#"
                SELECT
                    CAST(column_name AS CHAR) AS column_name,
                    CAST(data_type AS CHAR) AS data_type,
                    CAST(is_nullable AS CHAR) AS is_nullable,
                    NULL AS column_default,
                    CAST(character_maximum_length AS SIGNED) AS character_maximum_length,
                    NULL AS column_comment,
                    NULL AS generation_expression
                FROM information_schema.columns
                WHERE table_schema = ? AND table_name = ?
                ORDER BY ordinal_position
            "#;

            let columns = sqlx::query_as::<_, ColumnRow>(sql)
                .bind(&schema)
                .bind(&row.table_name)
                .fetch_all(self.pool)
                .await?
                .into_iter()
                .map(ColumnRow::into_column)
                .collect();

            views.insert(
                row.table_name.clone(),
                View {
                    name: row.table_name,
                    definition: row.view_definition.unwrap_or_default(),
                    columns,
                    is_materialized: false,
                },
            );
        }

        Ok(views)
    }
}

/// SQLite schema analyzer
struct SqliteAnalyzer<'a> {
    pool: &'a Pool<Sqlite>,
}

fn sqlite_quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl<'a> Analyzer for SqliteAnalyzer<'a> {
    async fn table_names(&self, _schema_name: Option<&str>) -> Result<Vec<String>> {
        let sql = r#"
            SELECT name AS table_name
            FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name
        "#;

        let rows = sqlx::query_as::<_, TableRow>(sql).fetch_all(self.pool).await?;
        Ok(rows.into_iter().map(|r| r.table_name).collect())
    }

    async fn analyze_table(&self, _schema_name: Option<&str>, table_name: &str) -> Result<Table> {
        let mut table = Table::new(table_name);
        let quoted = sqlite_quote(table_name);

        let pragma = format!("PRAGMA table_info({})", quoted);
        let columns = sqlx::query(&pragma).fetch_all(self.pool).await?;
        if columns.is_empty() {
            return Err(Error::SchemaAnalysisError(format!(
                "Table {} has no columns or does not exist",
                table_name
            )));
        }

        let mut pk_columns: Vec<(i64, String)> = Vec::new();
        for col in columns {
            let name: String = col.try_get("name")?;
            let data_type: String = col.try_get("type")?;
            let notnull: i64 = col.try_get("notnull")?;
            let dflt_value: Option<String> = col.try_get("dflt_value")?;
            let pk: i64 = col.try_get("pk")?;

            if pk > 0 {
                pk_columns.push((pk, name.clone()));
            }
            table.add_column(Column {
                name,
                data_type,
                size: None,
                nullable: notnull == 0 && pk == 0,
                default: dflt_value,
                comment: None,
                is_unique: false,
                is_generated: false,
                generation_expression: None,
            });
        }
        if !pk_columns.is_empty() {
            pk_columns.sort_by_key(|(position, _)| *position);
            table.set_primary_key(PrimaryKey {
                name: None,
                columns: pk_columns.into_iter().map(|(_, name)| name).collect(),
            });
        }

        // Indexes created explicitly (origin 'c'); pk and unique-constraint indexes are implied
        let pragma = format!("PRAGMA index_list({})", quoted);
        for index in sqlx::query(&pragma).fetch_all(self.pool).await? {
            let origin: String = index.try_get("origin")?;
            if origin != "c" {
                continue;
            }
            let name: String = index.try_get("name")?;
            let unique: i64 = index.try_get("unique")?;

            let pragma = format!("PRAGMA index_info({})", sqlite_quote(&name));
            let mut columns = Vec::new();
            for info in sqlx::query(&pragma).fetch_all(self.pool).await? {
                let column: Option<String> = info.try_get("name")?;
                columns.extend(column);
            }
            table.add_index(Index {
                name,
                columns,
                is_unique: unique != 0,
                method: None,
            });
        }

        // Foreign keys are unnamed in SQLite; name them by their position
        let pragma = format!("PRAGMA foreign_key_list({})", quoted);
        let mut foreign_keys: IndexMap<i64, ForeignKey> = IndexMap::new();
        for fk in sqlx::query(&pragma).fetch_all(self.pool).await? {
            let id: i64 = fk.try_get("id")?;
            let ref_table: String = fk.try_get("table")?;
            let from: String = fk.try_get("from")?;
            let to: Option<String> = fk.try_get("to")?;
            let on_update: String = fk.try_get("on_update")?;
            let on_delete: String = fk.try_get("on_delete")?;

            let entry = foreign_keys.entry(id).or_insert_with(|| ForeignKey {
                name: format!("fk_{}_{}", table_name, id),
                columns: Vec::new(),
                ref_table,
                ref_columns: Vec::new(),
                on_delete: Some(on_delete),
                on_update: Some(on_update),
            });
            entry.columns.push(from);
            entry.ref_columns.extend(to);
        }
        table.foreign_keys = foreign_keys.into_values().collect();

        // Triggers
        let sql = r#"
            SELECT name, sql FROM sqlite_master
            WHERE type = 'trigger' AND tbl_name = ?
            ORDER BY name
        "#;
        for row in sqlx::query(sql).bind(table_name).fetch_all(self.pool).await? {
            let name: String = row.try_get("name")?;
            let definition: Option<String> = row.try_get("sql")?;
            let definition = definition.unwrap_or_default();
            let upper = definition.to_uppercase();
            let timing = ["BEFORE", "AFTER", "INSTEAD OF"]
                .iter()
                .find(|t| upper.contains(*t))
                .unwrap_or(&"BEFORE")
                .to_string();
            let event = ["INSERT", "UPDATE", "DELETE"]
                .iter()
                .find(|e| upper.contains(&format!(" {} ", e)))
                .unwrap_or(&"INSERT")
                .to_string();
            table.triggers.push(Trigger {
                name,
                timing,
                event,
                definition,
            });
        }

        Ok(table)
    }

    async fn analyze_views(&self, _schema_name: Option<&str>) -> Result<IndexMap<String, View>> {
        let mut views = IndexMap::new();

        let sql = r#"SELECT name, sql FROM sqlite_master WHERE type = 'view' ORDER BY name"#;
        let rows = sqlx::query(sql).fetch_all(self.pool).await?;

        for row in rows {
            let view_name: String = row.try_get("name")?;
            let definition: Option<String> = row.try_get("sql")?;

            let pragma = format!("PRAGMA table_info({})", sqlite_quote(&view_name));
            let mut columns = Vec::new();
            for col in sqlx::query(&pragma).fetch_all(self.pool).await? {
                let name: String = col.try_get("name")?;
                let data_type: String = col.try_get("type")?;
                let notnull: i64 = col.try_get("notnull")?;
                columns.push(Column::new(&name, &data_type).nullable(notnull == 0));
            }

            views.insert(
                view_name.clone(),
                View {
                    name: view_name,
                    definition: definition.unwrap_or_default(),
                    columns,
                    is_materialized: false,
                },
            );
        }

        Ok(views)
    }
}
