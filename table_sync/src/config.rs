//! Configuration handling for table_sync

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::data::change::{LineEnding, OutputDialect};
use crate::data::literal::{BlobMode, DateLiteralStyle, SqlLiteralFormatter};
use crate::error::{Error, Result};
use crate::utils::naming::{IdentifierPolicy, SqlDialect};

/// Load configuration from a TOML or YAML file (chosen by extension) and validate it
pub fn load_from_file(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read config file: {}", e)))?;

    let is_yaml = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    let config: Config = if is_yaml {
        serde_yaml::from_str(&config_str)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?
    } else {
        toml::from_str(&config_str)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?
    };

    config.validate()?;
    Ok(config)
}

/// Represents the complete table_sync configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub reference: DatabaseConfig,
    pub target: DatabaseConfig,
    #[serde(default)]
    pub data_diff: DataDiffConfig,
    #[serde(default)]
    pub delete_sync: DeleteSyncConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        self.reference.validate("reference")?;
        self.target.validate("target")?;
        self.data_diff.validate()?;
        self.delete_sync.validate()?;
        self.output.validate()?;
        Ok(())
    }
}

/// Database connection configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub driver: String,
    pub url: String,
    pub pool_size: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub schema: Option<String>,
}

impl DatabaseConfig {
    pub fn dialect(&self) -> Result<SqlDialect> {
        SqlDialect::from_driver(&self.driver)
    }

    fn validate(&self, side: &str) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::ValidationError(format!("{}: url must not be empty", side)));
        }
        self.dialect().map(|_| ())
    }
}

/// Which generated statements come first when both streams go to one script
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatementOrder {
    #[default]
    InsertsFirst,
    UpdatesFirst,
}

/// Row-level diff configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DataDiffConfig {
    pub chunk_size: usize,
    pub progress_interval: u64,
    /// Columns left out of the comparison (e.g. audit timestamps)
    pub ignore_columns: Vec<String>,
    /// Table name to the columns used instead of its primary key
    pub alternate_keys: HashMap<String, Vec<String>>,
    pub exclude_real_pk: bool,
    pub exclude_ignored_columns: bool,
    pub ignore_missing_target: bool,
    pub identifier_policy: IdentifierPolicy,
    pub statement_order: StatementOrder,
}

impl Default for DataDiffConfig {
    fn default() -> Self {
        Self {
            chunk_size: 15,
            progress_interval: 10,
            ignore_columns: Vec::new(),
            alternate_keys: HashMap::new(),
            exclude_real_pk: false,
            exclude_ignored_columns: false,
            ignore_missing_target: false,
            identifier_policy: IdentifierPolicy::default(),
            statement_order: StatementOrder::default(),
        }
    }
}

impl DataDiffConfig {
    /// The alternate key registered for a table, looked up by bare table name
    pub fn alternate_key_for(&self, table: &str) -> Option<&[String]> {
        lookup_alternate_key(&self.alternate_keys, table, self.identifier_policy)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::ValidationError("data_diff.chunk_size must be at least 1".into()));
        }
        if self.progress_interval == 0 {
            return Err(Error::ValidationError(
                "data_diff.progress_interval must be at least 1".into(),
            ));
        }
        validate_alternate_keys("data_diff", &self.alternate_keys)
    }
}

/// Delete-sync configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DeleteSyncConfig {
    pub chunk_size: usize,
    pub alternate_keys: HashMap<String, Vec<String>>,
    /// Run the DELETE statements against the target instead of writing a script
    pub execute_deletes: bool,
}

impl Default for DeleteSyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 15,
            alternate_keys: HashMap::new(),
            execute_deletes: false,
        }
    }
}

impl DeleteSyncConfig {
    pub fn alternate_key_for(&self, table: &str, policy: IdentifierPolicy) -> Option<&[String]> {
        lookup_alternate_key(&self.alternate_keys, table, policy)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::ValidationError(
                "delete_sync.chunk_size must be at least 1".into(),
            ));
        }
        validate_alternate_keys("delete_sync", &self.alternate_keys)
    }
}

fn lookup_alternate_key<'a>(
    keys: &'a HashMap<String, Vec<String>>,
    table: &str,
    policy: IdentifierPolicy,
) -> Option<&'a [String]> {
    keys.iter()
        .find(|(name, _)| policy.matches(name, table))
        .map(|(_, columns)| columns.as_slice())
}

fn validate_alternate_keys(section: &str, keys: &HashMap<String, Vec<String>>) -> Result<()> {
    for (table, columns) in keys {
        if columns.is_empty() {
            return Err(Error::ValidationError(format!(
                "{}.alternate_keys.{} must name at least one column",
                section, table
            )));
        }
    }
    Ok(())
}

/// Script output configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputDialect,
    pub line_ending: LineEnding,
    pub encoding: String,
    pub blob_mode: BlobMode,
    pub blob_directory: Option<PathBuf>,
    pub date_literal_style: DateLiteralStyle,
    pub include_banner: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputDialect::default(),
            line_ending: LineEnding::default(),
            encoding: "UTF-8".to_string(),
            blob_mode: BlobMode::default(),
            blob_directory: None,
            date_literal_style: DateLiteralStyle::default(),
            include_banner: true,
        }
    }
}

impl OutputConfig {
    /// Literal formatter for statements aimed at `dialect`
    pub fn literal_formatter(&self, dialect: SqlDialect) -> SqlLiteralFormatter {
        let formatter = SqlLiteralFormatter::new(dialect)
            .with_blob_mode(self.blob_mode)
            .with_date_style(self.date_literal_style);
        match &self.blob_directory {
            Some(directory) => formatter.with_blob_directory(directory),
            None => formatter,
        }
    }

    fn validate(&self) -> Result<()> {
        let encoding = self.encoding.to_uppercase().replace('_', "-");
        if encoding != "UTF-8" && encoding != "UTF8" {
            return Err(Error::ValidationError(format!(
                "output.encoding {} is not supported, only UTF-8",
                self.encoding
            )));
        }
        if self.blob_mode == BlobMode::File && self.blob_directory.is_none() {
            return Err(Error::ValidationError(
                "output.blob_mode = file requires output.blob_directory".into(),
            ));
        }
        Ok(())
    }
}

/// Schema comparison behavior configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SchemaConfig {
    pub include_views: bool,
    pub include_sequences: bool,
    pub include_triggers: bool,
    pub include_grants: bool,
    pub match_constraints_by_name: bool,
    pub match_indexes_by_name: bool,
    pub allow_table_removal: bool,
    pub allow_column_removal: bool,
    pub allow_view_removal: bool,
    pub allow_sequence_removal: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            include_views: true,
            include_sequences: true,
            include_triggers: true,
            include_grants: false,
            match_constraints_by_name: true,
            match_indexes_by_name: true,
            allow_table_removal: false,
            allow_column_removal: false,
            allow_view_removal: false,
            allow_sequence_removal: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    /// `text` or `json`
    pub format: String,
    /// Log to the console (stderr) when no file is set
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            format: "text".to_string(),
            stdout: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TOML_CONFIG: &str = r#"
[reference]
driver = "postgres"
url = "postgres://localhost/prod"

[target]
driver = "sqlite"
url = "sqlite::memory:"

[data_diff]
chunk_size = 25
ignore_columns = ["modified_at"]

[data_diff.alternate_keys]
person = ["firstname", "lastname"]

[output]
format = "xml"
line_ending = "crlf"
"#;

    fn write_config(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_toml() {
        let file = write_config(".toml", TOML_CONFIG);
        let config = load_from_file(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.data_diff.chunk_size, 25);
        assert_eq!(config.data_diff.progress_interval, 10);
        assert_eq!(config.output.format, OutputDialect::Xml);
        assert_eq!(config.output.line_ending, LineEnding::Crlf);
        assert_eq!(config.delete_sync.chunk_size, 15);
        assert_eq!(
            config.data_diff.alternate_key_for("PERSON"),
            Some(&["firstname".to_string(), "lastname".to_string()][..])
        );
        assert_eq!(config.target.dialect().unwrap(), SqlDialect::Sqlite);
    }

    #[test]
    fn test_load_yaml() {
        let yaml = r#"
reference:
  driver: mysql
  url: mysql://localhost/a
target:
  driver: mysql
  url: mysql://localhost/b
delete_sync:
  execute_deletes: true
"#;
        let file = write_config(".yaml", yaml);
        let config = load_from_file(file.path().to_str().unwrap()).unwrap();
        assert!(config.delete_sync.execute_deletes);
        assert!(config.output.include_banner);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let file = write_config(".toml", TOML_CONFIG);
        let base = load_from_file(file.path().to_str().unwrap()).unwrap();

        let mut config = base.clone();
        config.data_diff.chunk_size = 0;
        assert!(matches!(config.validate(), Err(Error::ValidationError(_))));

        let mut config = base.clone();
        config.output.encoding = "ISO-8859-1".into();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.output.blob_mode = BlobMode::File;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.delete_sync.alternate_keys.insert("person".into(), vec![]);
        assert!(config.validate().is_err());

        let mut config = base;
        config.target.driver = "oracle".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_from_file("/nonexistent/table_sync.toml"),
            Err(Error::ConfigError(_))
        ));
    }
}
