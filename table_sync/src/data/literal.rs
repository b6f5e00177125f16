//! Rendering values as SQL literals.
//!
//! The comparison engine never builds literal text itself; it hands each
//! value to a [`LiteralFormatter`]. [`SqlLiteralFormatter`] is the default
//! implementation covering the dialects in [`SqlDialect`].

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::data::row::{ColumnDescriptor, SqlType};
use crate::data::value::Value;
use crate::error::{Error, Result};
use crate::utils::naming::SqlDialect;

/// How binary column values are written into generated statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlobMode {
    /// The target dialect's own binary literal (`decode(..,'hex')`, `X'..'`, `0x..`)
    #[default]
    DbmsLiteral,
    /// ANSI hex literal `X'..'`
    AnsiLiteral,
    /// The base64 encoded bytes as a string literal
    Base64,
    /// Write the bytes to a file and reference it from the statement
    File,
}

/// How date and timestamp values are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DateLiteralStyle {
    /// `{d '2024-01-31'}` / `{ts '2024-01-31 10:00:00'}`
    Jdbc,
    /// `DATE '2024-01-31'` / `TIMESTAMP '2024-01-31 10:00:00'`
    #[default]
    Ansi,
    /// A plain string literal, left to the database to convert
    Dbms,
}

/// Renders a typed value as a literal for one SQL dialect
pub trait LiteralFormatter: Send + Sync {
    /// Render `value`; NULL must always come back as the `NULL` keyword
    fn format(&self, value: &Value, column: &ColumnDescriptor) -> Result<String>;
}

/// Literal formatter driven by dialect, blob mode and date style
#[derive(Debug)]
pub struct SqlLiteralFormatter {
    dialect: SqlDialect,
    blob_mode: BlobMode,
    date_style: DateLiteralStyle,
    blob_directory: Option<PathBuf>,
    blob_counter: AtomicUsize,
}

impl SqlLiteralFormatter {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            blob_mode: BlobMode::default(),
            date_style: DateLiteralStyle::default(),
            blob_directory: None,
            blob_counter: AtomicUsize::new(0),
        }
    }

    pub fn with_blob_mode(mut self, blob_mode: BlobMode) -> Self {
        self.blob_mode = blob_mode;
        self
    }

    pub fn with_date_style(mut self, date_style: DateLiteralStyle) -> Self {
        self.date_style = date_style;
        self
    }

    pub fn with_blob_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.blob_directory = Some(directory.into());
        self
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn quote_string(&self, text: &str) -> String {
        let mut escaped = text.replace('\'', "''");
        if self.dialect == SqlDialect::MySql {
            escaped = escaped.replace('\\', "\\\\");
        }
        format!("'{}'", escaped)
    }

    fn format_bool(&self, value: bool) -> String {
        match self.dialect {
            SqlDialect::Postgres => if value { "true" } else { "false" }.to_string(),
            SqlDialect::Ansi => if value { "TRUE" } else { "FALSE" }.to_string(),
            _ => if value { "1" } else { "0" }.to_string(),
        }
    }

    fn format_temporal(&self, keyword: &str, jdbc_tag: &str, text: String) -> String {
        match self.date_style {
            DateLiteralStyle::Jdbc => format!("{{{} '{}'}}", jdbc_tag, text),
            DateLiteralStyle::Ansi => format!("{} '{}'", keyword, text),
            DateLiteralStyle::Dbms => format!("'{}'", text),
        }
    }

    fn format_blob(&self, bytes: &[u8], column: &ColumnDescriptor) -> Result<String> {
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        let literal = match self.blob_mode {
            BlobMode::AnsiLiteral => format!("X'{}'", hex),
            BlobMode::Base64 => {
                format!("'{}'", base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            BlobMode::DbmsLiteral => match self.dialect {
                SqlDialect::Postgres => format!("decode('{}', 'hex')", hex),
                SqlDialect::SqlServer => format!("0x{}", hex),
                SqlDialect::MySql | SqlDialect::Sqlite | SqlDialect::Ansi => format!("X'{}'", hex),
            },
            BlobMode::File => self.write_blob_file(bytes, column)?,
        };
        Ok(literal)
    }

    fn write_blob_file(&self, bytes: &[u8], column: &ColumnDescriptor) -> Result<String> {
        let directory = self.blob_directory.as_ref().ok_or_else(|| {
            Error::Conversion(format!(
                "No blob directory configured for column {}",
                column.name
            ))
        })?;

        let sequence = self.blob_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let file_name = format!(
            "{}_{}.data",
            crate::utils::naming::format_file_name(&column.name),
            sequence
        );
        let path = directory.join(&file_name);
        fs::write(&path, bytes).map_err(|e| {
            Error::Conversion(format!(
                "Could not write blob file {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(format!("{{$blobfile='{}'}}", file_name))
    }
}

impl LiteralFormatter for SqlLiteralFormatter {
    fn format(&self, value: &Value, column: &ColumnDescriptor) -> Result<String> {
        let literal = match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => self.format_bool(*v),
            Value::Int(v) => v.to_string(),
            Value::Float(v) if v.is_finite() => v.to_string(),
            Value::Float(v) => {
                return Err(Error::Conversion(format!(
                    "Column {} holds a non-finite number ({})",
                    column.name, v
                )))
            }
            Value::Decimal(v) => v.normalize().to_string(),
            Value::Text(v) if column.sql_type == SqlType::Blob => {
                self.format_blob(v.as_bytes(), column)?
            }
            Value::Text(v) => self.quote_string(v),
            Value::Bytes(v) => self.format_blob(v, column)?,
            Value::Uuid(v) => self.quote_string(&v.to_string()),
            Value::Date(v) => self.format_temporal("DATE", "d", v.format("%Y-%m-%d").to_string()),
            Value::Time(v) => {
                self.format_temporal("TIME", "t", v.format("%H:%M:%S%.f").to_string())
            }
            Value::Timestamp(v) => self.format_temporal(
                "TIMESTAMP",
                "ts",
                v.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            ),
        };
        Ok(literal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn column(db_type: &str) -> ColumnDescriptor {
        ColumnDescriptor::new("payload", db_type)
    }

    #[test]
    fn test_null_is_keyword() {
        let f = SqlLiteralFormatter::new(SqlDialect::Postgres);
        assert_eq!(f.format(&Value::Null, &column("varchar")).unwrap(), "NULL");
        assert_eq!(f.format(&Value::Text(String::new()), &column("varchar")).unwrap(), "''");
    }

    #[test]
    fn test_strings_are_escaped() {
        let pg = SqlLiteralFormatter::new(SqlDialect::Postgres);
        assert_eq!(pg.format(&Value::from("O'Neil"), &column("text")).unwrap(), "'O''Neil'");

        let mysql = SqlLiteralFormatter::new(SqlDialect::MySql);
        assert_eq!(mysql.format(&Value::from("a\\b"), &column("text")).unwrap(), "'a\\\\b'");
    }

    #[test]
    fn test_date_styles() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let value = Value::Timestamp(ts);

        let ansi = SqlLiteralFormatter::new(SqlDialect::Postgres);
        assert_eq!(
            ansi.format(&value, &column("timestamp")).unwrap(),
            "TIMESTAMP '2024-01-31 10:00:00'"
        );

        let jdbc = SqlLiteralFormatter::new(SqlDialect::Postgres).with_date_style(DateLiteralStyle::Jdbc);
        assert_eq!(
            jdbc.format(&value, &column("timestamp")).unwrap(),
            "{ts '2024-01-31 10:00:00'}"
        );
    }

    #[test]
    fn test_blob_modes() {
        let bytes = Value::Bytes(vec![0xde, 0xad]);
        let pg = SqlLiteralFormatter::new(SqlDialect::Postgres);
        assert_eq!(pg.format(&bytes, &column("bytea")).unwrap(), "decode('dead', 'hex')");

        let ansi = SqlLiteralFormatter::new(SqlDialect::Postgres).with_blob_mode(BlobMode::AnsiLiteral);
        assert_eq!(ansi.format(&bytes, &column("bytea")).unwrap(), "X'dead'");

        let b64 = SqlLiteralFormatter::new(SqlDialect::MySql).with_blob_mode(BlobMode::Base64);
        assert_eq!(b64.format(&bytes, &column("blob")).unwrap(), "'3q0='");
    }

    #[test]
    fn test_blob_file_mode() {
        let dir = tempdir().unwrap();
        let f = SqlLiteralFormatter::new(SqlDialect::Sqlite)
            .with_blob_mode(BlobMode::File)
            .with_blob_directory(dir.path());

        let literal = f.format(&Value::Bytes(vec![1, 2, 3]), &column("blob")).unwrap();
        assert_eq!(literal, "{$blobfile='payload_1.data'}");
        assert_eq!(std::fs::read(dir.path().join("payload_1.data")).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_blob_file_mode_without_directory_is_conversion_error() {
        let f = SqlLiteralFormatter::new(SqlDialect::Sqlite).with_blob_mode(BlobMode::File);
        let err = f.format(&Value::Bytes(vec![1]), &column("blob")).unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));
    }

    #[test]
    fn test_booleans_per_dialect() {
        let pg = SqlLiteralFormatter::new(SqlDialect::Postgres);
        let sqlite = SqlLiteralFormatter::new(SqlDialect::Sqlite);
        assert_eq!(pg.format(&Value::Bool(true), &column("boolean")).unwrap(), "true");
        assert_eq!(sqlite.format(&Value::Bool(true), &column("boolean")).unwrap(), "1");
    }
}
