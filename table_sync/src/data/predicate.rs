//! Per-chunk key predicates and the SELECT statements built from them.
//!
//! A chunk of reference rows is looked up on the other side with one
//! statement whose WHERE clause ORs together one term per row:
//!
//! ```text
//! SELECT id1, id2, firstname FROM person
//! WHERE (id1 = 1 AND id2 = 10) OR (id1 = 2 AND id2 = 20)
//! ```
//!
//! The statement keeps the structured predicate next to its SQL text, so a
//! row source that is not a SQL database can evaluate it directly.

use crate::data::literal::LiteralFormatter;
use crate::data::row::{ColumnDescriptor, TableIdentifier};
use crate::data::value::Value;
use crate::error::Result;
use crate::utils::naming::{quote_if_needed, SqlDialect};

/// An OR-of-ANDs predicate over a fixed set of key columns
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPredicate {
    columns: Vec<ColumnDescriptor>,
    tuples: Vec<Vec<Value>>,
}

impl KeyPredicate {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            columns,
            tuples: Vec::new(),
        }
    }

    /// Add one key tuple. Tuples containing NULL can never match and are
    /// rejected (returns false).
    pub fn add_tuple(&mut self, values: Vec<Value>) -> bool {
        if values.len() != self.columns.len() || values.iter().any(Value::is_null) {
            return false;
        }
        self.tuples.push(values);
        true
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn tuples(&self) -> &[Vec<Value>] {
        &self.tuples
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Render the WHERE condition (without the WHERE keyword)
    pub fn to_sql(&self, dialect: SqlDialect, formatter: &dyn LiteralFormatter) -> Result<String> {
        let compound = self.columns.len() > 1;
        let mut terms = Vec::with_capacity(self.tuples.len());

        for tuple in &self.tuples {
            let mut parts = Vec::with_capacity(self.columns.len());
            for (column, value) in self.columns.iter().zip(tuple) {
                parts.push(format!(
                    "{} = {}",
                    quote_if_needed(&column.name, dialect),
                    formatter.format(value, column)?
                ));
            }
            let term = parts.join(" AND ");
            terms.push(if compound { format!("({})", term) } else { term });
        }

        Ok(terms.join(" OR "))
    }
}

/// A projection of one table, optionally restricted by a key predicate
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    table: TableIdentifier,
    columns: Vec<String>,
    filter: Option<KeyPredicate>,
    sql: String,
}

impl SelectStatement {
    /// Build the statement and render its SQL text for `dialect`
    pub fn build(
        table: TableIdentifier,
        columns: Vec<String>,
        filter: Option<KeyPredicate>,
        dialect: SqlDialect,
        formatter: &dyn LiteralFormatter,
    ) -> Result<Self> {
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| quote_if_needed(c, dialect))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!(
            "SELECT {} FROM {}",
            projection,
            table.qualified_name(dialect)
        );
        if let Some(predicate) = &filter {
            sql.push_str(" WHERE ");
            sql.push_str(&predicate.to_sql(dialect, formatter)?);
        }

        Ok(Self {
            table,
            columns,
            filter,
            sql,
        })
    }

    pub fn table(&self) -> &TableIdentifier {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn filter(&self) -> Option<&KeyPredicate> {
        self.filter.as_ref()
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::literal::SqlLiteralFormatter;
    use pretty_assertions::assert_eq;

    fn person_keys() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("id1", "integer").primary_key(),
            ColumnDescriptor::new("id2", "varchar(10)").primary_key(),
        ]
    }

    #[test]
    fn test_compound_key_predicate() {
        let formatter = SqlLiteralFormatter::new(SqlDialect::Postgres);
        let mut predicate = KeyPredicate::new(person_keys());
        assert!(predicate.add_tuple(vec![Value::Int(1), Value::from("a")]));
        assert!(predicate.add_tuple(vec![Value::Int(2), Value::from("b")]));

        let statement = SelectStatement::build(
            TableIdentifier::new("person"),
            vec!["id1".into(), "id2".into(), "firstname".into()],
            Some(predicate),
            SqlDialect::Postgres,
            &formatter,
        )
        .unwrap();

        assert_eq!(
            statement.sql(),
            "SELECT id1, id2, firstname FROM person WHERE (id1 = 1 AND id2 = 'a') OR (id1 = 2 AND id2 = 'b')"
        );
    }

    #[test]
    fn test_single_column_predicate() {
        let formatter = SqlLiteralFormatter::new(SqlDialect::MySql);
        let mut predicate = KeyPredicate::new(vec![ColumnDescriptor::new("id", "int").primary_key()]);
        predicate.add_tuple(vec![Value::Int(5)]);
        predicate.add_tuple(vec![Value::Int(6)]);
        assert_eq!(
            predicate.to_sql(SqlDialect::MySql, &formatter).unwrap(),
            "id = 5 OR id = 6"
        );
    }

    #[test]
    fn test_null_keys_are_rejected() {
        let mut predicate = KeyPredicate::new(person_keys());
        assert!(!predicate.add_tuple(vec![Value::Int(1), Value::Null]));
        assert!(!predicate.add_tuple(vec![Value::Int(1)]));
        assert!(predicate.is_empty());
    }

    #[test]
    fn test_unfiltered_statement() {
        let formatter = SqlLiteralFormatter::new(SqlDialect::Postgres);
        let statement = SelectStatement::build(
            TableIdentifier::with_schema("public", "order"),
            vec!["id".into()],
            None,
            SqlDialect::Postgres,
            &formatter,
        )
        .unwrap();
        assert_eq!(statement.sql(), "SELECT id FROM public.\"order\"");
    }
}
