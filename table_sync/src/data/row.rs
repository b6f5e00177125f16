//! Column metadata, result shapes and rows.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::value::{key_equals, Value};
use crate::utils::naming::{quote_if_needed, strip_quotes, IdentifierPolicy, SqlDialect};

/// Broad type class of a column, derived from the declared DBMS type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Boolean,
    Integer,
    Float,
    Numeric,
    Char,
    Clob,
    Blob,
    Date,
    Time,
    Timestamp,
    Uuid,
    Other,
}

impl SqlType {
    /// Classify a declared type such as `varchar(40)` or `NUMBER(10,2)`
    pub fn from_db_type(db_type: &str) -> Self {
        let lower = db_type.trim().to_lowercase();
        let base = lower.split('(').next().unwrap_or(&lower).trim();

        match base {
            "bool" | "boolean" | "bit" => SqlType::Boolean,
            "smallint" | "integer" | "int" | "int2" | "int4" | "int8" | "bigint" | "tinyint"
            | "mediumint" | "serial" | "bigserial" | "smallserial" => SqlType::Integer,
            "real" | "float" | "float4" | "float8" | "double" | "double precision" => {
                SqlType::Float
            }
            "numeric" | "decimal" | "number" | "money" => SqlType::Numeric,
            "text" | "clob" | "longtext" | "mediumtext" | "tinytext" | "nclob" | "ntext"
            | "json" | "jsonb" | "xml" => SqlType::Clob,
            "bytea" | "blob" | "longblob" | "mediumblob" | "tinyblob" | "binary" | "varbinary"
            | "image" | "raw" => SqlType::Blob,
            "date" => SqlType::Date,
            "time" | "timetz" | "time with time zone" | "time without time zone" => SqlType::Time,
            "timestamp" | "timestamptz" | "datetime" | "datetime2" | "smalldatetime"
            | "timestamp with time zone" | "timestamp without time zone" => SqlType::Timestamp,
            "uuid" | "uniqueidentifier" => SqlType::Uuid,
            t if t.contains("char") || t == "name" || t == "string" => SqlType::Char,
            t if t.ends_with(" unsigned") => SqlType::Integer,
            _ => SqlType::Other,
        }
    }

    pub fn is_lob(&self) -> bool {
        matches!(self, SqlType::Blob | SqlType::Clob)
    }
}

/// One column of a table or query projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub db_type: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub comment: Option<String>,
}

impl ColumnDescriptor {
    /// Create a nullable, non-key column of the given declared type
    pub fn new(name: &str, db_type: &str) -> Self {
        Self {
            name: name.to_string(),
            db_type: db_type.to_string(),
            sql_type: SqlType::from_db_type(db_type),
            nullable: true,
            is_primary_key: false,
            comment: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// A (possibly qualified) table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdentifier {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

impl TableIdentifier {
    pub fn new(name: &str) -> Self {
        Self {
            catalog: None,
            schema: None,
            name: strip_quotes(name).to_string(),
        }
    }

    pub fn with_schema(schema: &str, name: &str) -> Self {
        Self {
            catalog: None,
            schema: Some(strip_quotes(schema).to_string()),
            name: strip_quotes(name).to_string(),
        }
    }

    /// Parse `name`, `schema.name` or `catalog.schema.name`
    pub fn parse(qualified: &str) -> Self {
        let parts: Vec<&str> = qualified.split('.').map(strip_quotes).collect();
        match parts.as_slice() {
            [catalog, schema, name] => Self {
                catalog: Some(catalog.to_string()),
                schema: Some(schema.to_string()),
                name: name.to_string(),
            },
            [schema, name] => Self::with_schema(schema, name),
            _ => Self::new(qualified),
        }
    }

    /// Render the name for use in a statement of the given dialect
    pub fn qualified_name(&self, dialect: SqlDialect) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(catalog) = &self.catalog {
            parts.push(quote_if_needed(catalog, dialect));
        }
        if let Some(schema) = &self.schema {
            parts.push(quote_if_needed(schema, dialect));
        }
        parts.push(quote_if_needed(&self.name, dialect));
        parts.join(".")
    }

    /// Same table under the given identifier policy (schema ignored if either side has none)
    pub fn matches(&self, other: &TableIdentifier, policy: IdentifierPolicy) -> bool {
        let schema_matches = match (&self.schema, &other.schema) {
            (Some(a), Some(b)) => policy.matches(a, b),
            _ => true,
        };
        schema_matches && policy.matches(&self.name, &other.name)
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// The columns of one query projection plus the table they update
#[derive(Debug, Clone, PartialEq)]
pub struct ResultShape {
    columns: Vec<ColumnDescriptor>,
    table: Option<TableIdentifier>,
    key_columns: Vec<usize>,
}

impl ResultShape {
    /// Build a shape; the key columns are the ones flagged as primary key
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        let key_columns = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_primary_key)
            .map(|(i, _)| i)
            .collect();
        Self {
            columns,
            table: None,
            key_columns,
        }
    }

    pub fn with_table(mut self, table: TableIdentifier) -> Self {
        self.table = Some(table);
        self
    }

    /// Replace the effective key with the named columns (alternate key)
    pub fn with_key_columns<S: AsRef<str>>(mut self, names: &[S], policy: IdentifierPolicy) -> Self {
        self.key_columns = names
            .iter()
            .filter_map(|n| self.find_column(n.as_ref(), policy))
            .collect();
        self
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> &ColumnDescriptor {
        &self.columns[index]
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn table(&self) -> Option<&TableIdentifier> {
        self.table.as_ref()
    }

    pub fn key_columns(&self) -> &[usize] {
        &self.key_columns
    }

    pub fn key_column_names(&self) -> Vec<String> {
        self.key_columns
            .iter()
            .map(|&i| self.columns[i].name.clone())
            .collect()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn find_column(&self, name: &str, policy: IdentifierPolicy) -> Option<usize> {
        let wanted = policy.normalize(name);
        self.columns
            .iter()
            .position(|c| policy.normalize(&c.name) == wanted)
    }

    pub fn is_key_column(&self, index: usize) -> bool {
        self.key_columns.contains(&index)
    }
}

/// One row, aligned 1:1 with the [`ResultShape`] it was read with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> &Value {
        self.values.get(index).unwrap_or(&Value::Null)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn set(&mut self, index: usize, value: Value) {
        if index < self.values.len() {
            self.values[index] = value;
        }
    }

    /// True if any of the given columns is NULL; such a row can never be matched by key
    pub fn has_null_key(&self, key_columns: &[usize]) -> bool {
        key_columns.iter().any(|&i| self.get(i).is_null())
    }

    /// The values of the given columns, in order
    pub fn project(&self, columns: &[usize]) -> Vec<Value> {
        columns.iter().map(|&i| self.get(i).clone()).collect()
    }

    /// Key-equality against another row, given the key positions on each side
    pub fn key_equals(&self, own_keys: &[usize], other: &Row, other_keys: &[usize]) -> bool {
        own_keys.len() == other_keys.len()
            && own_keys
                .iter()
                .zip(other_keys)
                .all(|(&a, &b)| key_equals(self.get(a), other.get(b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_classification() {
        assert_eq!(SqlType::from_db_type("varchar(40)"), SqlType::Char);
        assert_eq!(SqlType::from_db_type("character varying"), SqlType::Char);
        assert_eq!(SqlType::from_db_type("NUMERIC(10,2)"), SqlType::Numeric);
        assert_eq!(SqlType::from_db_type("bytea"), SqlType::Blob);
        assert_eq!(SqlType::from_db_type("timestamp with time zone"), SqlType::Timestamp);
        assert_eq!(SqlType::from_db_type("int unsigned"), SqlType::Integer);
        assert_eq!(SqlType::from_db_type("geometry"), SqlType::Other);
    }

    #[test]
    fn test_table_identifier() {
        let t = TableIdentifier::parse("public.\"Person\"");
        assert_eq!(t.schema.as_deref(), Some("public"));
        assert_eq!(t.name, "Person");
        assert_eq!(t.qualified_name(SqlDialect::Postgres), "public.\"Person\"");
        assert!(t.matches(&TableIdentifier::new("PERSON"), IdentifierPolicy::CaseInsensitive));
        assert!(!t.matches(
            &TableIdentifier::with_schema("other", "person"),
            IdentifierPolicy::CaseInsensitive
        ));
    }

    #[test]
    fn test_shape_keys() {
        let shape = ResultShape::new(vec![
            ColumnDescriptor::new("id", "integer").primary_key(),
            ColumnDescriptor::new("firstname", "varchar(20)"),
            ColumnDescriptor::new("lastname", "varchar(20)"),
        ]);
        assert_eq!(shape.key_columns(), &[0]);

        let alt = shape.with_key_columns(&["LASTNAME", "firstname"], IdentifierPolicy::CaseInsensitive);
        assert_eq!(alt.key_columns(), &[2, 1]);
        assert_eq!(alt.key_column_names(), vec!["lastname", "firstname"]);
    }

    #[test]
    fn test_row_key_equality() {
        let a = Row::new(vec![Value::Int(1), Value::Text("x".into())]);
        let b = Row::new(vec![Value::Text("x".into()), Value::Int(1)]);
        assert!(a.key_equals(&[0, 1], &b, &[1, 0]));

        let with_null = Row::new(vec![Value::Null, Value::Text("x".into())]);
        assert!(!with_null.key_equals(&[0], &with_null, &[0]));
        assert!(with_null.has_null_key(&[0]));
    }
}
