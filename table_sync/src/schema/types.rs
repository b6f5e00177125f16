//! Type definitions for database schema objects

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::data::row::ColumnDescriptor;
use crate::utils::naming::IdentifierPolicy;

/// Represents a complete database schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub tables: IndexMap<String, Table>,
    pub views: IndexMap<String, View>,
    pub sequences: IndexMap<String, Sequence>,
    pub schema_name: Option<String>,
}

impl DatabaseSchema {
    /// Create a new empty database schema
    pub fn new(schema_name: Option<String>) -> Self {
        Self {
            tables: IndexMap::new(),
            views: IndexMap::new(),
            sequences: IndexMap::new(),
            schema_name,
        }
    }

    pub fn add_table(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn add_view(&mut self, view: View) {
        self.views.insert(view.name.clone(), view);
    }

    pub fn add_sequence(&mut self, sequence: Sequence) {
        self.sequences.insert(sequence.name.clone(), sequence);
    }

    /// Look a table up ignoring case and quotes
    pub fn find_table(&self, name: &str) -> Option<&Table> {
        let policy = IdentifierPolicy::CaseInsensitive;
        self.tables.values().find(|t| policy.matches(&t.name, name))
    }
}

/// Represents a database table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Option<PrimaryKey>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
    pub constraints: Vec<Constraint>,
    pub grants: Vec<Grant>,
    pub triggers: Vec<Trigger>,
    pub comment: Option<String>,
}

impl Table {
    /// Create a new table with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: None,
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            constraints: Vec::new(),
            grants: Vec::new(),
            triggers: Vec::new(),
            comment: None,
        }
    }

    pub fn add_column(&mut self, column: Column) {
        self.columns.push(column);
    }

    pub fn set_primary_key(&mut self, pk: PrimaryKey) {
        self.primary_key = Some(pk);
    }

    pub fn add_index(&mut self, index: Index) {
        self.indexes.push(index);
    }

    pub fn add_foreign_key(&mut self, fk: ForeignKey) {
        self.foreign_keys.push(fk);
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        let policy = IdentifierPolicy::CaseInsensitive;
        self.columns.iter().find(|c| policy.matches(&c.name, name))
    }

    pub fn is_primary_key_column(&self, name: &str) -> bool {
        let policy = IdentifierPolicy::CaseInsensitive;
        self.primary_key
            .as_ref()
            .map(|pk| pk.columns.iter().any(|c| policy.matches(c, name)))
            .unwrap_or(false)
    }

    /// The columns as the row engine sees them, primary key flagged
    pub fn column_descriptors(&self) -> Vec<ColumnDescriptor> {
        self.columns
            .iter()
            .map(|c| {
                let mut descriptor = ColumnDescriptor::new(&c.name, &c.full_type()).nullable(c.nullable);
                descriptor.is_primary_key = self.is_primary_key_column(&c.name);
                descriptor.comment = c.comment.clone();
                descriptor
            })
            .collect()
    }
}

/// Represents a database column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub size: Option<i64>,
    pub nullable: bool,
    pub default: Option<String>,
    pub comment: Option<String>,
    pub is_unique: bool,
    pub is_generated: bool,
    pub generation_expression: Option<String>,
}

impl Column {
    /// Create a new column with the given name and type
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            size: None,
            nullable: false,
            default: None,
            comment: None,
            is_unique: false,
            is_generated: false,
            generation_expression: None,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    pub fn size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    /// Declared type including the size, e.g. `varchar(40)`
    pub fn full_type(&self) -> String {
        match self.size {
            Some(size) if !self.data_type.contains('(') => format!("{}({})", self.data_type, size),
            _ => self.data_type.clone(),
        }
    }
}

/// Represents a primary key constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub name: Option<String>,
    pub columns: Vec<String>,
}

/// Represents an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub method: Option<String>,
}

/// Represents a foreign key constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

/// Represents a table-level check or unique constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub definition: String,
    pub constraint_type: String,
}

/// A privilege granted on a table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
    pub grantee: String,
    pub privilege: String,
    pub grantable: bool,
}

/// Represents a trigger defined on a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
    pub timing: String,
    pub event: String,
    pub definition: String,
}

/// Represents a database view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    pub definition: String,
    pub columns: Vec<Column>,
    pub is_materialized: bool,
}

/// Represents a sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    pub start_value: Option<i64>,
    pub increment: Option<i64>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub cycle: bool,
}

impl Sequence {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start_value: None,
            increment: None,
            min_value: None,
            max_value: None,
            cycle: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_descriptors_flag_primary_key() {
        let mut table = Table::new("person");
        table.add_column(Column::new("ID", "integer"));
        table.add_column(Column::new("name", "varchar").size(40).nullable(true));
        table.set_primary_key(PrimaryKey {
            name: None,
            columns: vec!["id".into()],
        });

        let descriptors = table.column_descriptors();
        assert!(descriptors[0].is_primary_key);
        assert!(!descriptors[1].is_primary_key);
        assert_eq!(descriptors[1].db_type, "varchar(40)");
        assert!(descriptors[1].nullable);
    }

    #[test]
    fn test_lookups_ignore_case() {
        let mut schema = DatabaseSchema::new(None);
        let mut table = Table::new("Person");
        table.add_column(Column::new("FirstName", "text"));
        schema.add_table(table);

        let table = schema.find_table("\"PERSON\"").unwrap();
        assert!(table.find_column("firstname").is_some());
        assert!(schema.find_table("people").is_none());
    }
}
