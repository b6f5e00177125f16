//! Row changes and their rendering as SQL statements or XML elements.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::literal::LiteralFormatter;
use crate::data::row::{ColumnDescriptor, TableIdentifier};
use crate::data::value::Value;
use crate::error::Result;
use crate::utils::naming::{quote_if_needed, SqlDialect};
use crate::utils::xml::{self, XmlWriter};

/// Output dialect of a comparison run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputDialect {
    #[default]
    #[serde(rename = "sql")]
    SqlText,
    Xml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    #[default]
    Lf,
    Crlf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::Crlf => "\r\n",
        }
    }
}

/// The run producing the output, used for banners and the XML root element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    DataDiff,
    DeleteSync,
}

impl Operation {
    pub fn root_element(&self) -> &'static str {
        match self {
            Operation::DataDiff => "table-data-diff",
            Operation::DeleteSync => "table-delete-sync",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Operation::DataDiff => "Data differences",
            Operation::DeleteSync => "Rows to delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A column together with the value written to it (or matched against)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnValue {
    pub column: ColumnDescriptor,
    pub value: Value,
}

impl ColumnValue {
    pub fn new(column: ColumnDescriptor, value: Value) -> Self {
        Self { column, value }
    }
}

/// One row-level change against the target table.
///
/// For inserts `values` holds every written column; for updates only the
/// changed ones. `key` identifies the row for updates and deletes; for
/// inserts it lists the key columns that are also part of `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub kind: ChangeKind,
    pub table: TableIdentifier,
    pub values: Vec<ColumnValue>,
    pub key: Vec<ColumnValue>,
}

impl RowChange {
    pub fn insert(table: TableIdentifier, values: Vec<ColumnValue>, key: Vec<ColumnValue>) -> Self {
        Self {
            kind: ChangeKind::Insert,
            table,
            values,
            key,
        }
    }

    pub fn update(table: TableIdentifier, values: Vec<ColumnValue>, key: Vec<ColumnValue>) -> Self {
        Self {
            kind: ChangeKind::Update,
            table,
            values,
            key,
        }
    }

    pub fn delete(table: TableIdentifier, key: Vec<ColumnValue>) -> Self {
        Self {
            kind: ChangeKind::Delete,
            table,
            values: Vec::new(),
            key,
        }
    }

    /// Names of the columns in `values`
    pub fn column_names(&self) -> Vec<&str> {
        self.values.iter().map(|cv| cv.column.name.as_str()).collect()
    }
}

/// The rendered output for one row difference
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationFragment {
    pub row_number: u64,
    pub change: RowChange,
    pub text: String,
}

/// Renders changes, headers and footers in the dialect chosen for a run
#[derive(Clone)]
pub struct FragmentRenderer {
    output: OutputDialect,
    dialect: SqlDialect,
    line_ending: LineEnding,
    encoding: String,
    include_banner: bool,
    operation: Operation,
    table: TableIdentifier,
    formatter: Arc<dyn LiteralFormatter>,
}

impl std::fmt::Debug for FragmentRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentRenderer")
            .field("output", &self.output)
            .field("dialect", &self.dialect)
            .field("operation", &self.operation)
            .field("table", &self.table)
            .finish()
    }
}

impl FragmentRenderer {
    pub fn new(
        output: OutputDialect,
        dialect: SqlDialect,
        operation: Operation,
        table: TableIdentifier,
        formatter: Arc<dyn LiteralFormatter>,
    ) -> Self {
        Self {
            output,
            dialect,
            line_ending: LineEnding::default(),
            encoding: "UTF-8".to_string(),
            include_banner: true,
            operation,
            table,
            formatter,
        }
    }

    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    pub fn with_encoding(mut self, encoding: &str) -> Self {
        self.encoding = encoding.to_string();
        self
    }

    pub fn with_banner(mut self, include_banner: bool) -> Self {
        self.include_banner = include_banner;
        self
    }

    pub fn output(&self) -> OutputDialect {
        self.output
    }

    pub fn table(&self) -> &TableIdentifier {
        &self.table
    }

    /// Render one change as a complete fragment
    pub fn render(&self, change: RowChange, row_number: u64) -> Result<MigrationFragment> {
        let text = match self.output {
            OutputDialect::SqlText => self.render_sql(&change)?,
            OutputDialect::Xml => self.render_xml(&change, row_number),
        };
        Ok(MigrationFragment {
            row_number,
            change,
            text,
        })
    }

    /// Text written before the first fragment of a stream
    pub fn header(&self) -> String {
        let le = self.line_ending.as_str();
        match self.output {
            OutputDialect::SqlText if self.include_banner => format!(
                "-- {} for {}{}-- Generated by table_sync on {}{}{}",
                self.operation.title(),
                self.table,
                le,
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                le,
                le
            ),
            OutputDialect::SqlText => String::new(),
            OutputDialect::Xml => {
                let mut out = xml::declaration(&self.encoding);
                out.push_str(le);
                out.push_str(&format!(
                    "<{}{}>{}",
                    self.operation.root_element(),
                    xml::attributes(&[
                        ("name", Some(self.table.name.as_str())),
                        ("schema", self.table.schema.as_deref()),
                        ("catalog", self.table.catalog.as_deref()),
                    ]),
                    le
                ));
                out
            }
        }
    }

    /// Text written after the last fragment, only if a header was written
    pub fn footer(&self) -> String {
        let le = self.line_ending.as_str();
        match self.output {
            OutputDialect::SqlText => format!("{}COMMIT;{}", le, le),
            OutputDialect::Xml => format!("</{}>{}", self.operation.root_element(), le),
        }
    }

    /// The bare SQL statement for a change, without terminator
    pub fn statement(&self, change: &RowChange) -> Result<String> {
        let table = change.table.qualified_name(self.dialect);
        let statement = match change.kind {
            ChangeKind::Insert => {
                let mut columns = Vec::with_capacity(change.values.len());
                let mut values = Vec::with_capacity(change.values.len());
                for cv in &change.values {
                    columns.push(quote_if_needed(&cv.column.name, self.dialect));
                    values.push(self.formatter.format(&cv.value, &cv.column)?);
                }
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    columns.join(", "),
                    values.join(", ")
                )
            }
            ChangeKind::Update => {
                let mut assignments = Vec::with_capacity(change.values.len());
                for cv in &change.values {
                    assignments.push(format!(
                        "{} = {}",
                        quote_if_needed(&cv.column.name, self.dialect),
                        self.formatter.format(&cv.value, &cv.column)?
                    ));
                }
                format!(
                    "UPDATE {} SET {} WHERE {}",
                    table,
                    assignments.join(", "),
                    self.where_clause(&change.key)?
                )
            }
            ChangeKind::Delete => {
                format!("DELETE FROM {} WHERE {}", table, self.where_clause(&change.key)?)
            }
        };
        Ok(statement)
    }

    fn render_sql(&self, change: &RowChange) -> Result<String> {
        Ok(format!("{};{}", self.statement(change)?, self.line_ending.as_str()))
    }

    fn where_clause(&self, key: &[ColumnValue]) -> Result<String> {
        let mut terms = Vec::with_capacity(key.len());
        for cv in key {
            let column = quote_if_needed(&cv.column.name, self.dialect);
            if cv.value.is_null() {
                terms.push(format!("{} IS NULL", column));
            } else {
                terms.push(format!("{} = {}", column, self.formatter.format(&cv.value, &cv.column)?));
            }
        }
        Ok(terms.join(" AND "))
    }

    fn render_xml(&self, change: &RowChange, row_number: u64) -> String {
        let element = match change.kind {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        };
        let row = row_number.to_string();
        let mut w = XmlWriter::new(self.line_ending.as_str()).with_depth(1);
        w.open(element, &[("row", Some(row.as_str()))]);

        match change.kind {
            ChangeKind::Insert => {
                for cv in &change.values {
                    let is_key = change
                        .key
                        .iter()
                        .any(|k| k.column.name == cv.column.name);
                    xml_column(&mut w, cv, if is_key { Some(("pk", "true")) } else { None });
                }
            }
            ChangeKind::Update => {
                for cv in &change.key {
                    xml_column(&mut w, cv, Some(("pk", "true")));
                }
                for cv in &change.values {
                    xml_column(&mut w, cv, Some(("modified", "true")));
                }
            }
            ChangeKind::Delete => {
                for cv in &change.key {
                    xml_column(&mut w, cv, Some(("pk", "true")));
                }
            }
        }

        w.close(element);
        w.finish()
    }
}

fn xml_column(w: &mut XmlWriter, cv: &ColumnValue, flag: Option<(&str, &str)>) {
    let mut attrs: Vec<(&str, Option<&str>)> = vec![
        ("name", Some(cv.column.name.as_str())),
        ("type", Some(cv.column.db_type.as_str())),
    ];
    if let Some((key, value)) = flag {
        attrs.push((key, Some(value)));
    }

    match &cv.value {
        Value::Null => {
            attrs.push(("null", Some("true")));
            w.text_element("col", &attrs, "NULL");
        }
        Value::Bytes(bytes) => {
            use base64::Engine as _;
            attrs.push(("encoding", Some("base64")));
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            w.text_element("col", &attrs, &encoded);
        }
        value => w.text_element("col", &attrs, &value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::literal::SqlLiteralFormatter;
    use pretty_assertions::assert_eq;

    fn renderer(output: OutputDialect) -> FragmentRenderer {
        FragmentRenderer::new(
            output,
            SqlDialect::Postgres,
            Operation::DataDiff,
            TableIdentifier::with_schema("public", "person"),
            Arc::new(SqlLiteralFormatter::new(SqlDialect::Postgres)),
        )
    }

    fn id() -> ColumnDescriptor {
        ColumnDescriptor::new("id", "integer").primary_key()
    }

    fn name() -> ColumnDescriptor {
        ColumnDescriptor::new("firstname", "varchar(20)")
    }

    #[test]
    fn test_sql_statements() {
        let r = renderer(OutputDialect::SqlText);
        let table = TableIdentifier::with_schema("public", "person");

        let insert = RowChange::insert(
            table.clone(),
            vec![
                ColumnValue::new(id(), Value::Int(1)),
                ColumnValue::new(name(), Value::Null),
            ],
            vec![ColumnValue::new(id(), Value::Int(1))],
        );
        assert_eq!(
            r.render(insert, 1).unwrap().text,
            "INSERT INTO public.person (id, firstname) VALUES (1, NULL);\n"
        );

        let update = RowChange::update(
            table.clone(),
            vec![ColumnValue::new(name(), Value::from("Arthur"))],
            vec![ColumnValue::new(id(), Value::Int(1))],
        );
        assert_eq!(
            r.render(update, 2).unwrap().text,
            "UPDATE public.person SET firstname = 'Arthur' WHERE id = 1;\n"
        );

        let delete = RowChange::delete(table, vec![ColumnValue::new(id(), Value::Int(7))]);
        assert_eq!(
            r.render(delete, 3).unwrap().text,
            "DELETE FROM public.person WHERE id = 7;\n"
        );
    }

    #[test]
    fn test_crlf_line_ending() {
        let r = renderer(OutputDialect::SqlText).with_line_ending(LineEnding::Crlf);
        let delete = RowChange::delete(
            TableIdentifier::new("person"),
            vec![ColumnValue::new(id(), Value::Int(7))],
        );
        assert!(r.render(delete, 1).unwrap().text.ends_with(";\r\n"));
    }

    #[test]
    fn test_xml_update() {
        let r = renderer(OutputDialect::Xml);
        let update = RowChange::update(
            TableIdentifier::new("person"),
            vec![ColumnValue::new(name(), Value::Null)],
            vec![ColumnValue::new(id(), Value::Int(4))],
        );
        assert_eq!(
            r.render(update, 12).unwrap().text,
            concat!(
                "  <update row=\"12\">\n",
                "    <col name=\"id\" type=\"integer\" pk=\"true\">4</col>\n",
                "    <col name=\"firstname\" type=\"varchar(20)\" modified=\"true\" null=\"true\">NULL</col>\n",
                "  </update>\n"
            )
        );
    }

    #[test]
    fn test_headers_and_footers() {
        let xml = renderer(OutputDialect::Xml);
        assert_eq!(
            xml.header(),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<table-data-diff name=\"person\" schema=\"public\">\n"
        );
        assert_eq!(xml.footer(), "</table-data-diff>\n");

        let sql = renderer(OutputDialect::SqlText);
        assert!(sql.header().starts_with("-- Data differences for public.person\n"));
        assert_eq!(sql.clone().with_banner(false).header(), "");
        assert_eq!(sql.footer(), "\nCOMMIT;\n");
    }
}
