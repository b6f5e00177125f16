//! SQL executor
//!
//! Runs generated scripts against a live connection.

use crate::db::connection::{DatabaseConnection, DatabasePool};
use crate::error::{Error, Result};

/// SQL executor for running queries
pub struct SqlExecutor {
    connection: DatabaseConnection,
}

macro_rules! run_in_transaction {
    ($pool:expr, $statements:expr) => {{
        let mut tx = $pool.begin().await?;
        let mut affected = 0;
        for statement in $statements {
            affected += sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::from(e).with_sql(statement))?
                .rows_affected();
        }
        tx.commit().await?;
        affected
    }};
}

impl SqlExecutor {
    /// Create a new SQL executor
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Execute a single SQL statement
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        self.connection.execute(sql).await.map_err(|e| e.with_sql(sql))
    }

    /// Execute multiple SQL statements in order
    pub async fn execute_batch(&self, statements: &[String]) -> Result<u64> {
        let mut affected = 0;
        for statement in statements {
            affected += self.execute(statement).await?;
        }

        Ok(affected)
    }

    /// Execute multiple SQL statements in a transaction; nothing is kept if one fails
    pub async fn execute_in_transaction(&self, statements: &[String]) -> Result<u64> {
        let affected = match self.connection.pool() {
            DatabasePool::Postgres(pool) => run_in_transaction!(pool, statements),
            DatabasePool::MySql(pool) => run_in_transaction!(pool, statements),
            DatabasePool::Sqlite(pool) => run_in_transaction!(pool, statements),
        };

        tracing::info!(statements = statements.len(), rows = affected, "Script applied");
        Ok(affected)
    }

    /// Apply a generated script inside one transaction
    pub async fn apply_script(&self, script: &str) -> Result<u64> {
        self.apply_scripts(&[script]).await
    }

    /// Apply several scripts, in the given order, inside one transaction
    pub async fn apply_scripts(&self, scripts: &[&str]) -> Result<u64> {
        let statements: Vec<String> = scripts.iter().flat_map(|s| split_script(s)).collect();
        if statements.is_empty() {
            tracing::info!("Script contains no statements");
            return Ok(0);
        }
        self.execute_in_transaction(&statements).await
    }

    /// Get database connection
    pub fn get_connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// Split a script into statements.
///
/// Semicolons and `--` inside string literals are respected. Comments,
/// blank statements and transaction control (`BEGIN`, `COMMIT`) are dropped.
pub fn split_script(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_string = !in_string;
                current.push(c);
            }
            '-' if !in_string && chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            ';' if !in_string => {
                push_statement(&mut statements, &current);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    push_statement(&mut statements, &current);

    statements
}

fn push_statement(statements: &mut Vec<String>, text: &str) {
    let statement = text.trim();
    if statement.is_empty() {
        return;
    }
    let keyword = statement.to_uppercase();
    if matches!(
        keyword.as_str(),
        "BEGIN" | "BEGIN TRANSACTION" | "START TRANSACTION" | "COMMIT" | "END"
    ) {
        return;
    }
    statements.push(statement.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn test_split_script() {
        let script = "-- Data differences for person\n\
                      -- Generated by table_sync\n\n\
                      INSERT INTO person (id, note) VALUES (1, 'a; b -- c');\n\
                      UPDATE person SET note = 'it''s' WHERE id = 2;\n\
                      \nCOMMIT;\n";

        assert_eq!(
            split_script(script),
            vec![
                "INSERT INTO person (id, note) VALUES (1, 'a; b -- c')".to_string(),
                "UPDATE person SET note = 'it''s' WHERE id = 2".to_string(),
            ]
        );
    }

    #[test]
    fn test_split_script_without_statements() {
        assert!(split_script("-- nothing here\n\nCOMMIT;\n").is_empty());
        assert!(split_script("").is_empty());
    }

    #[tokio::test]
    async fn test_apply_script_is_atomic() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let executor = SqlExecutor::new(DatabaseConnection::from_pool(DatabasePool::Sqlite(pool), None));
        executor
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();

        let applied = executor
            .apply_script("INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\nCOMMIT;\n")
            .await
            .unwrap();
        assert_eq!(applied, 2);

        // The duplicate key fails the whole script
        let result = executor
            .apply_script("INSERT INTO t VALUES (3);\nINSERT INTO t VALUES (1);\n")
            .await;
        assert!(result.is_err());

        let count = executor.execute("DELETE FROM t").await.unwrap();
        assert_eq!(count, 2);
    }
}
