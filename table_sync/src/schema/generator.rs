//! Migration generator
//!
//! This module generates DDL statements from schema diffs for the target dialect.

use crate::error::{Error, Result};
use crate::schema::diff::{ColumnChange, SchemaDiff, TableChange};
use crate::schema::types::{Column, Constraint, ForeignKey, Grant, Index, Sequence, Table, Trigger, View};
use crate::utils::naming::{format_sql_identifier, quote_if_needed, SqlDialect};

/// Migration SQL generator
pub struct MigrationGenerator {
    dialect: SqlDialect,
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

impl MigrationGenerator {
    /// Create a new migration generator
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Generate migration SQL from a schema diff, one statement per entry
    pub fn generate_migration_sql(&self, diff: &SchemaDiff) -> Result<Vec<String>> {
        if !matches!(
            self.dialect,
            SqlDialect::Postgres | SqlDialect::MySql | SqlDialect::Sqlite
        ) {
            return Err(Error::MigrationError(format!(
                "Unsupported database type: {:?}",
                self.dialect
            )));
        }

        let mut migrations = Vec::new();

        // Views may depend on the tables being changed
        for view in &diff.views_to_update {
            if self.dialect == SqlDialect::Sqlite || view.is_materialized {
                migrations.push(self.drop_view_sql(&view.name, view.is_materialized));
            }
        }
        for name in &diff.views_to_drop {
            migrations.push(self.drop_view_sql(name, false));
        }

        // Foreign keys go first so dropped columns and indexes are free
        for change in &diff.tables_to_modify {
            if !change.foreign_keys_to_drop.is_empty() {
                migrations.extend(self.drop_foreign_keys_sql(&change.table_name, &change.foreign_keys_to_drop)?);
            }
        }

        for table in &diff.tables_to_create {
            migrations.extend(self.create_table_sql(table)?);
        }

        for change in &diff.tables_to_modify {
            migrations.extend(self.modify_table_sql(change)?);
        }

        for table_name in &diff.tables_to_drop {
            migrations.push(self.drop_table_sql(table_name));
        }

        for change in &diff.tables_to_modify {
            if !change.foreign_keys_to_create.is_empty() {
                migrations.extend(self.create_foreign_keys_sql(&change.table_name, &change.foreign_keys_to_create)?);
            }
        }

        for view in &diff.views_to_create {
            migrations.push(self.create_view_sql(view, false));
        }
        for view in &diff.views_to_update {
            let replace = self.dialect != SqlDialect::Sqlite && !view.is_materialized;
            migrations.push(self.create_view_sql(view, replace));
        }

        for sequence in &diff.sequences_to_create {
            migrations.push(self.create_sequence_sql(sequence)?);
        }
        for sequence in &diff.sequences_to_update {
            migrations.push(self.alter_sequence_sql(sequence)?);
        }
        for name in &diff.sequences_to_drop {
            migrations.push(self.drop_sequence_sql(name)?);
        }

        Ok(migrations)
    }

    /// Quote an identifier the way the target dialect expects
    fn ident(&self, name: &str) -> String {
        match self.dialect {
            SqlDialect::Postgres => quote_if_needed(name, self.dialect),
            _ => format_sql_identifier(name, self.dialect),
        }
    }

    fn ident_list(&self, names: &[String]) -> String {
        names.iter().map(|n| self.ident(n)).collect::<Vec<_>>().join(", ")
    }

    fn column_type(&self, column: &Column) -> String {
        let full_type = column.full_type();
        match self.dialect {
            SqlDialect::MySql => translate_data_type_for_mysql(&full_type),
            SqlDialect::Sqlite => translate_data_type_for_sqlite(&full_type),
            _ => full_type,
        }
    }

    fn unsupported(&self, what: &str) -> Error {
        Error::MigrationError(format!(
            "{:?} does not support {}. The table has to be rebuilt instead.",
            self.dialect, what
        ))
    }

    /// Column definition as used in CREATE TABLE and ADD COLUMN
    fn column_definition(&self, column: &Column) -> String {
        let mut definition = format!("{} {}", self.ident(&column.name), self.column_type(column));
        if let Some(expression) = &column.generation_expression {
            definition.push_str(&format!(" GENERATED ALWAYS AS ({}) STORED", expression));
        } else if let Some(default_val) = &column.default {
            definition.push_str(&format!(" DEFAULT {}", default_val));
        }
        match (self.dialect, column.nullable) {
            (SqlDialect::Sqlite, true) => {}
            (_, true) => definition.push_str(" NULL"),
            (_, false) => definition.push_str(" NOT NULL"),
        }
        if self.dialect == SqlDialect::MySql {
            if let Some(comment) = &column.comment {
                definition.push_str(&format!(" COMMENT {}", quote_literal(comment)));
            }
        }
        definition
    }

    /// Generate SQL to create a table with its indexes and comments
    fn create_table_sql(&self, table: &Table) -> Result<Vec<String>> {
        let table_name = self.ident(&table.name);
        let mut definitions: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("  {}", self.column_definition(c)))
            .collect();

        if let Some(pk) = &table.primary_key {
            definitions.push(format!("  PRIMARY KEY ({})", self.ident_list(&pk.columns)));
        }
        for constraint in &table.constraints {
            definitions.push(format!(
                "  CONSTRAINT {} {}",
                self.ident(&constraint.name),
                constraint.definition
            ));
        }
        // SQLite only accepts foreign keys in the table definition
        if self.dialect != SqlDialect::Postgres {
            for fk in &table.foreign_keys {
                definitions.push(format!("  {}", self.foreign_key_clause(fk)));
            }
        }

        let options = match (self.dialect, &table.comment) {
            (SqlDialect::MySql, Some(comment)) => format!(
                " DEFAULT CHARACTER SET=utf8mb4 COLLATE=utf8mb4_unicode_ci COMMENT={}",
                quote_literal(comment)
            ),
            (SqlDialect::MySql, None) => " DEFAULT CHARACTER SET=utf8mb4 COLLATE=utf8mb4_unicode_ci".to_string(),
            _ => String::new(),
        };

        let mut migrations = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n){};",
            table_name,
            definitions.join(",\n"),
            options
        )];

        if self.dialect == SqlDialect::Postgres {
            if let Some(comment) = &table.comment {
                migrations.push(format!("COMMENT ON TABLE {} IS {};", table_name, quote_literal(comment)));
            }
            for column in &table.columns {
                if let Some(comment) = &column.comment {
                    migrations.push(format!(
                        "COMMENT ON COLUMN {}.{} IS {};",
                        table_name,
                        self.ident(&column.name),
                        quote_literal(comment)
                    ));
                }
            }
        }

        for index in &table.indexes {
            migrations.push(self.create_index_sql(&table.name, index));
        }

        if self.dialect == SqlDialect::Postgres && !table.foreign_keys.is_empty() {
            migrations.extend(self.create_foreign_keys_sql(&table.name, &table.foreign_keys)?);
        }
        for trigger in &table.triggers {
            migrations.push(self.create_trigger_sql(&table.name, trigger));
        }
        for grant in &table.grants {
            migrations.push(self.grant_sql(&table.name, grant)?);
        }

        Ok(migrations)
    }

    /// Generate SQL to drop a table
    fn drop_table_sql(&self, table_name: &str) -> String {
        format!("DROP TABLE IF EXISTS {};", self.ident(table_name))
    }

    /// Everything for one modified table except foreign keys
    fn modify_table_sql(&self, change: &TableChange) -> Result<Vec<String>> {
        let table = &change.table_name;
        let table_name = self.ident(table);
        let mut migrations = Vec::new();

        for name in &change.triggers_to_drop {
            migrations.push(self.drop_trigger_sql(table, name));
        }
        for index in &change.indexes_to_drop {
            migrations.push(self.drop_index_sql(table, &index.name));
        }
        for constraint in change.constraints_to_drop.iter().chain(&change.constraints_to_modify) {
            migrations.push(self.drop_constraint_sql(table, constraint)?);
        }

        for column in &change.columns_to_add {
            migrations.extend(self.add_column_sql(table, column)?);
        }
        for column_change in &change.columns_to_alter {
            migrations.extend(self.alter_column_sql(table, column_change)?);
        }
        for column_name in &change.columns_to_drop {
            migrations.push(format!(
                "ALTER TABLE {} DROP COLUMN {};",
                table_name,
                self.ident(column_name)
            ));
        }

        if let Some(pk) = &change.primary_key {
            if self.dialect == SqlDialect::Sqlite {
                return Err(self.unsupported("changing a primary key"));
            }
            if let Some(from) = &pk.from {
                migrations.push(match (self.dialect, &from.name) {
                    (SqlDialect::Postgres, Some(name)) => {
                        format!("ALTER TABLE {} DROP CONSTRAINT {};", table_name, self.ident(name))
                    }
                    _ => format!("ALTER TABLE {} DROP PRIMARY KEY;", table_name),
                });
            }
            if let Some(to) = &pk.to {
                migrations.push(format!(
                    "ALTER TABLE {} ADD PRIMARY KEY ({});",
                    table_name,
                    self.ident_list(&to.columns)
                ));
            }
        }

        for index in &change.indexes_to_create {
            migrations.push(self.create_index_sql(table, index));
        }
        for constraint in change.constraints_to_add.iter().chain(&change.constraints_to_modify) {
            if self.dialect == SqlDialect::Sqlite {
                return Err(self.unsupported("adding constraints"));
            }
            migrations.push(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {};",
                table_name,
                self.ident(&constraint.name),
                constraint.definition
            ));
        }

        for grant in &change.grants_to_revoke {
            migrations.push(self.revoke_sql(table, grant)?);
        }
        for grant in &change.grants_to_add {
            migrations.push(self.grant_sql(table, grant)?);
        }
        for trigger in &change.triggers_to_create {
            migrations.push(self.create_trigger_sql(table, trigger));
        }

        if let Some(comment) = &change.comment {
            match self.dialect {
                SqlDialect::Postgres => migrations.push(format!(
                    "COMMENT ON TABLE {} IS {};",
                    table_name,
                    comment.to.as_deref().map(quote_literal).unwrap_or_else(|| "NULL".to_string())
                )),
                SqlDialect::MySql => migrations.push(format!(
                    "ALTER TABLE {} COMMENT = {};",
                    table_name,
                    quote_literal(comment.to.as_deref().unwrap_or(""))
                )),
                _ => tracing::warn!(table = %table, "Table comments are not supported, skipping"),
            }
        }

        Ok(migrations)
    }

    /// Generate SQL to add a column to a table
    fn add_column_sql(&self, table: &str, column: &Column) -> Result<Vec<String>> {
        // SQLite can only add nullable columns or columns with defaults
        if self.dialect == SqlDialect::Sqlite && !column.nullable && column.default.is_none() {
            return Err(Error::MigrationError(format!(
                "SQLite cannot add NOT NULL column '{}' without default value. \
                 Consider rebuilding the entire table.",
                column.name
            )));
        }

        let table_name = self.ident(table);
        let mut migrations = vec![format!(
            "ALTER TABLE {} ADD COLUMN {};",
            table_name,
            self.column_definition(column)
        )];
        if self.dialect == SqlDialect::Postgres {
            if let Some(comment) = &column.comment {
                migrations.push(format!(
                    "COMMENT ON COLUMN {}.{} IS {};",
                    table_name,
                    self.ident(&column.name),
                    quote_literal(comment)
                ));
            }
        }
        Ok(migrations)
    }

    /// Generate SQL to alter a column in a table
    fn alter_column_sql(&self, table: &str, change: &ColumnChange) -> Result<Vec<String>> {
        let table_name = self.ident(table);
        let column_name = self.ident(&change.column_name);

        match self.dialect {
            SqlDialect::Postgres => {
                let mut migrations = Vec::new();
                let (from_type, to_type) = (change.from.full_type(), change.to.full_type());

                if !from_type.eq_ignore_ascii_case(&to_type) {
                    migrations.push(format!(
                        "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
                        table_name, column_name, to_type, column_name, to_type
                    ));
                }
                if change.from.nullable != change.to.nullable {
                    let action = if change.to.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
                    migrations.push(format!(
                        "ALTER TABLE {} ALTER COLUMN {} {};",
                        table_name, column_name, action
                    ));
                }
                if change.from.default != change.to.default {
                    migrations.push(match &change.to.default {
                        Some(default_val) => format!(
                            "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {};",
                            table_name, column_name, default_val
                        ),
                        None => format!(
                            "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT;",
                            table_name, column_name
                        ),
                    });
                }
                if change.from.comment != change.to.comment {
                    migrations.push(format!(
                        "COMMENT ON COLUMN {}.{} IS {};",
                        table_name,
                        column_name,
                        change.to.comment.as_deref().map(quote_literal).unwrap_or_else(|| "NULL".to_string())
                    ));
                }
                Ok(migrations)
            }
            SqlDialect::MySql => Ok(vec![format!(
                "ALTER TABLE {} MODIFY COLUMN {};",
                table_name,
                self.column_definition(&change.to)
            )]),
            _ => Err(self.unsupported("altering column definitions")),
        }
    }

    fn create_index_sql(&self, table: &str, index: &Index) -> String {
        let unique = if index.is_unique { "UNIQUE " } else { "" };
        let columns = self.ident_list(&index.columns);
        match self.dialect {
            SqlDialect::Postgres => format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} USING {} ({});",
                unique,
                self.ident(&index.name),
                self.ident(table),
                index.method.as_deref().unwrap_or("btree"),
                columns
            ),
            SqlDialect::MySql => format!(
                "CREATE {}INDEX {} ON {} ({});",
                unique,
                self.ident(&index.name),
                self.ident(table),
                columns
            ),
            _ => format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
                unique,
                self.ident(&index.name),
                self.ident(table),
                columns
            ),
        }
    }

    fn drop_index_sql(&self, table: &str, index_name: &str) -> String {
        match self.dialect {
            SqlDialect::MySql => format!("DROP INDEX {} ON {};", self.ident(index_name), self.ident(table)),
            _ => format!("DROP INDEX IF EXISTS {};", self.ident(index_name)),
        }
    }

    fn foreign_key_clause(&self, fk: &ForeignKey) -> String {
        let mut clause = String::new();
        if self.dialect != SqlDialect::Sqlite {
            clause.push_str(&format!("CONSTRAINT {} ", self.ident(&fk.name)));
        }
        clause.push_str(&format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.ident_list(&fk.columns),
            self.ident(&fk.ref_table),
            self.ident_list(&fk.ref_columns)
        ));
        if let Some(action) = &fk.on_delete {
            clause.push_str(&format!(" ON DELETE {}", action));
        }
        if let Some(action) = &fk.on_update {
            clause.push_str(&format!(" ON UPDATE {}", action));
        }
        clause
    }

    /// Generate SQL to create foreign keys on an existing table
    fn create_foreign_keys_sql(&self, table: &str, foreign_keys: &[ForeignKey]) -> Result<Vec<String>> {
        if self.dialect == SqlDialect::Sqlite {
            return Err(self.unsupported("adding foreign keys to existing tables"));
        }
        Ok(foreign_keys
            .iter()
            .map(|fk| format!("ALTER TABLE {} ADD {};", self.ident(table), self.foreign_key_clause(fk)))
            .collect())
    }

    /// Generate SQL to drop foreign keys
    fn drop_foreign_keys_sql(&self, table: &str, foreign_keys: &[ForeignKey]) -> Result<Vec<String>> {
        let keyword = match self.dialect {
            SqlDialect::Postgres => "CONSTRAINT",
            SqlDialect::MySql => "FOREIGN KEY",
            _ => return Err(self.unsupported("dropping foreign keys")),
        };
        Ok(foreign_keys
            .iter()
            .map(|fk| format!("ALTER TABLE {} DROP {} {};", self.ident(table), keyword, self.ident(&fk.name)))
            .collect())
    }

    fn drop_constraint_sql(&self, table: &str, constraint: &Constraint) -> Result<String> {
        let table_name = self.ident(table);
        let name = self.ident(&constraint.name);
        match self.dialect {
            SqlDialect::Postgres => Ok(format!("ALTER TABLE {} DROP CONSTRAINT {};", table_name, name)),
            SqlDialect::MySql if constraint.constraint_type.eq_ignore_ascii_case("UNIQUE") => {
                Ok(format!("ALTER TABLE {} DROP INDEX {};", table_name, name))
            }
            SqlDialect::MySql => Ok(format!("ALTER TABLE {} DROP CHECK {};", table_name, name)),
            _ => Err(self.unsupported("dropping constraints")),
        }
    }

    fn grant_sql(&self, table: &str, grant: &Grant) -> Result<String> {
        if self.dialect == SqlDialect::Sqlite {
            return Err(self.unsupported("grants"));
        }
        Ok(format!(
            "GRANT {} ON {} TO {}{};",
            grant.privilege,
            self.ident(table),
            self.ident(&grant.grantee),
            if grant.grantable { " WITH GRANT OPTION" } else { "" }
        ))
    }

    fn revoke_sql(&self, table: &str, grant: &Grant) -> Result<String> {
        if self.dialect == SqlDialect::Sqlite {
            return Err(self.unsupported("grants"));
        }
        Ok(format!(
            "REVOKE {} ON {} FROM {};",
            grant.privilege,
            self.ident(table),
            self.ident(&grant.grantee)
        ))
    }

    fn create_trigger_sql(&self, table: &str, trigger: &Trigger) -> String {
        // SQLite keeps the whole statement as the definition
        if trigger.definition.trim_start().to_uppercase().starts_with("CREATE") {
            return format!("{};", trigger.definition.trim().trim_end_matches(';'));
        }
        format!(
            "CREATE TRIGGER {} {} {} ON {} FOR EACH ROW {};",
            self.ident(&trigger.name),
            trigger.timing,
            trigger.event,
            self.ident(table),
            trigger.definition.trim().trim_end_matches(';')
        )
    }

    fn drop_trigger_sql(&self, table: &str, name: &str) -> String {
        match self.dialect {
            SqlDialect::Postgres => format!("DROP TRIGGER IF EXISTS {} ON {};", self.ident(name), self.ident(table)),
            _ => format!("DROP TRIGGER IF EXISTS {};", self.ident(name)),
        }
    }

    fn create_view_sql(&self, view: &View, replace: bool) -> String {
        let definition = view.definition.trim().trim_end_matches(';');
        if definition.to_uppercase().starts_with("CREATE") {
            return format!("{};", definition);
        }
        let kind = match (view.is_materialized, replace) {
            (true, _) => "CREATE MATERIALIZED VIEW",
            (false, true) => "CREATE OR REPLACE VIEW",
            (false, false) => "CREATE VIEW",
        };
        format!("{} {} AS {};", kind, self.ident(&view.name), definition)
    }

    fn drop_view_sql(&self, name: &str, materialized: bool) -> String {
        let kind = if materialized { "MATERIALIZED VIEW" } else { "VIEW" };
        format!("DROP {} IF EXISTS {};", kind, self.ident(name))
    }

    fn sequence_options(sequence: &Sequence) -> String {
        let mut options = String::new();
        if let Some(increment) = sequence.increment {
            options.push_str(&format!(" INCREMENT BY {}", increment));
        }
        if let Some(min) = sequence.min_value {
            options.push_str(&format!(" MINVALUE {}", min));
        }
        if let Some(max) = sequence.max_value {
            options.push_str(&format!(" MAXVALUE {}", max));
        }
        options
    }

    fn create_sequence_sql(&self, sequence: &Sequence) -> Result<String> {
        if self.dialect != SqlDialect::Postgres {
            return Err(self.unsupported("sequences"));
        }
        let mut sql = format!(
            "CREATE SEQUENCE IF NOT EXISTS {}{}",
            self.ident(&sequence.name),
            Self::sequence_options(sequence)
        );
        if let Some(start) = sequence.start_value {
            sql.push_str(&format!(" START WITH {}", start));
        }
        sql.push_str(if sequence.cycle { " CYCLE;" } else { " NO CYCLE;" });
        Ok(sql)
    }

    fn alter_sequence_sql(&self, sequence: &Sequence) -> Result<String> {
        if self.dialect != SqlDialect::Postgres {
            return Err(self.unsupported("sequences"));
        }
        Ok(format!(
            "ALTER SEQUENCE {}{}{};",
            self.ident(&sequence.name),
            Self::sequence_options(sequence),
            if sequence.cycle { " CYCLE" } else { " NO CYCLE" }
        ))
    }

    fn drop_sequence_sql(&self, name: &str) -> Result<String> {
        if self.dialect != SqlDialect::Postgres {
            return Err(self.unsupported("sequences"));
        }
        Ok(format!("DROP SEQUENCE IF EXISTS {};", self.ident(name)))
    }
}

/// Translate a PostgreSQL data type to MySQL
fn translate_data_type_for_mysql(pg_type: &str) -> String {
    let pg_type_lower = pg_type.to_lowercase();

    match pg_type_lower.as_str() {
        // Integer types
        "smallint" | "int2" => "SMALLINT".to_string(),
        "integer" | "int" | "int4" => "INT".to_string(),
        "bigint" | "int8" => "BIGINT".to_string(),

        // Floating point types
        "real" | "float4" => "FLOAT".to_string(),
        "double precision" | "float8" => "DOUBLE".to_string(),

        // Character types keep their size
        t if t.starts_with("varchar") || t.starts_with("character varying") => match size_suffix(t) {
            Some(size) => format!("VARCHAR{}", size),
            None => "VARCHAR(255)".to_string(),
        },
        t if t.starts_with("char") || t.starts_with("character") => match size_suffix(t) {
            Some(size) => format!("CHAR{}", size),
            None => "CHAR(1)".to_string(),
        },
        "text" => "TEXT".to_string(),

        // Date/time types
        "date" => "DATE".to_string(),
        "timestamp" | "timestamp without time zone" => "DATETIME".to_string(),
        "timestamp with time zone" | "timestamptz" => "TIMESTAMP".to_string(),
        "time" | "time without time zone" | "time with time zone" | "timetz" => "TIME".to_string(),

        "boolean" | "bool" => "TINYINT(1)".to_string(),
        "bytea" => "BLOB".to_string(),
        "json" | "jsonb" => "JSON".to_string(),
        "uuid" => "CHAR(36)".to_string(),

        t if t.starts_with("numeric") || t.starts_with("decimal") => match size_suffix(t) {
            Some(params) => format!("DECIMAL{}", params),
            None => "DECIMAL(10,2)".to_string(),
        },

        // MySQL has no arrays
        t if t.ends_with("[]") => "JSON".to_string(),

        _ => pg_type.to_string(),
    }
}

/// Translate a PostgreSQL data type to SQLite
fn translate_data_type_for_sqlite(pg_type: &str) -> String {
    let pg_type_lower = pg_type.to_lowercase();

    // SQLite has only 5 storage classes: NULL, INTEGER, REAL, TEXT, and BLOB
    match pg_type_lower.as_str() {
        "smallint" | "integer" | "int" | "int2" | "int4" | "bigint" | "int8" | "serial" | "bigserial"
        | "boolean" | "bool" => "INTEGER".to_string(),
        "real" | "float4" | "double precision" | "float8" => "REAL".to_string(),
        "numeric" | "decimal" => "NUMERIC".to_string(),
        "bytea" | "blob" => "BLOB".to_string(),
        t if t.ends_with("[]") => "TEXT".to_string(),
        t if t.contains('(') => {
            let base_type = t.split('(').next().unwrap_or(t).trim();
            translate_data_type_for_sqlite(base_type)
        }
        // Character, date/time, json and uuid types are all stored as text
        _ => "TEXT".to_string(),
    }
}

/// The `(…)` part of a type such as `varchar(40)`
fn size_suffix(data_type: &str) -> Option<&str> {
    let start = data_type.find('(')?;
    let end = data_type.rfind(')')?;
    (end > start).then(|| &data_type[start..=end])
}
