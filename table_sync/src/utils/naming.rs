//! Naming utilities for table_sync
//!
//! Identifier quoting per SQL dialect and the policy used to decide whether
//! two identifiers coming from different databases name the same object.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static SIMPLE_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("static regex"));

/// SQL dialects understood by the generators and literal formatters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    Sqlite,
    #[serde(rename = "mssql")]
    SqlServer,
    #[default]
    Ansi,
}

impl SqlDialect {
    /// Map a configured driver name to its dialect
    pub fn from_driver(driver: &str) -> Result<Self> {
        match driver.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(SqlDialect::Postgres),
            "mysql" | "mariadb" => Ok(SqlDialect::MySql),
            "sqlite" => Ok(SqlDialect::Sqlite),
            "mssql" | "sqlserver" => Ok(SqlDialect::SqlServer),
            "ansi" => Ok(SqlDialect::Ansi),
            other => Err(Error::ConfigError(format!(
                "Unsupported database driver: {}",
                other
            ))),
        }
    }

    /// Does an unquoted identifier fold to lower case in this dialect
    fn folds_to_lower(&self) -> bool {
        matches!(self, SqlDialect::Postgres)
    }
}

/// How identifiers from the reference and target side are matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierPolicy {
    /// Quotes are stripped and case is ignored
    #[default]
    CaseInsensitive,
    /// Quotes are stripped but case must match
    CaseSensitive,
    /// Names must be byte-identical
    Exact,
}

impl IdentifierPolicy {
    /// Normalize a name into the key used for lookups
    pub fn normalize(&self, name: &str) -> String {
        match self {
            IdentifierPolicy::CaseInsensitive => strip_quotes(name).to_lowercase(),
            IdentifierPolicy::CaseSensitive => strip_quotes(name).to_string(),
            IdentifierPolicy::Exact => name.to_string(),
        }
    }

    /// Check whether two names refer to the same object
    pub fn matches(&self, left: &str, right: &str) -> bool {
        self.normalize(left) == self.normalize(right)
    }

    /// Find the position of `name` in a list of names
    pub fn position<S: AsRef<str>>(&self, names: &[S], name: &str) -> Option<usize> {
        let wanted = self.normalize(name);
        names.iter().position(|n| self.normalize(n.as_ref()) == wanted)
    }
}

/// Remove one level of identifier quoting ("x", `x`, [x])
pub fn strip_quotes(name: &str) -> &str {
    let trimmed = name.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"')
            || (first == b'`' && last == b'`')
            || (first == b'[' && last == b']')
        {
            return &trimmed[1..trimmed.len() - 1];
        }
    }
    trimmed
}

/// Format SQL identifier according to database style (quoted, backticks, etc.)
pub fn format_sql_identifier(name: &str, dialect: SqlDialect) -> String {
    match dialect {
        SqlDialect::MySql => format!("`{}`", name.replace('`', "``")),
        SqlDialect::SqlServer => format!("[{}]", name.replace(']', "]]")),
        SqlDialect::Postgres | SqlDialect::Sqlite | SqlDialect::Ansi => {
            format!("\"{}\"", name.replace('"', "\"\""))
        }
    }
}

/// Quote an identifier only when the dialect would otherwise misread it
pub fn quote_if_needed(name: &str, dialect: SqlDialect) -> String {
    let name = strip_quotes(name);
    let needs_quotes = !SIMPLE_IDENTIFIER.is_match(name)
        || is_sql_keyword(name)
        || (dialect.folds_to_lower() && name.chars().any(|c| c.is_uppercase()));

    if needs_quotes {
        format_sql_identifier(name, dialect)
    } else {
        name.to_string()
    }
}

/// Check if a name is a reserved SQL keyword
pub fn is_sql_keyword(name: &str) -> bool {
    // Common SQL keywords across databases
    const SQL_KEYWORDS: &[&str] = &[
        "add", "all", "alter", "and", "any", "as", "asc", "backup", "begin", "between",
        "by", "case", "check", "column", "constraint", "create", "database", "default",
        "delete", "desc", "distinct", "drop", "else", "end", "except", "exec", "exists",
        "foreign", "from", "full", "group", "having", "in", "index", "inner", "insert",
        "intersect", "into", "is", "join", "key", "left", "like", "limit", "not",
        "null", "on", "or", "order", "outer", "primary", "procedure", "right",
        "rownum", "select", "set", "table", "top", "truncate", "union", "unique",
        "update", "user", "values", "view", "where", "with",
    ];

    SQL_KEYWORDS.contains(&name.to_lowercase().as_str())
}

/// Sanitize an arbitrary name for use as a file name
pub fn format_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' { c } else { '_' })
        .collect();

    sanitized.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"Person\""), "Person");
        assert_eq!(strip_quotes("`person`"), "person");
        assert_eq!(strip_quotes("[First Name]"), "First Name");
        assert_eq!(strip_quotes("plain"), "plain");
        assert_eq!(strip_quotes("\""), "\"");
    }

    #[test]
    fn test_identifier_policy() {
        let policy = IdentifierPolicy::CaseInsensitive;
        assert!(policy.matches("\"FIRSTNAME\"", "firstname"));
        assert!(policy.matches("[Id]", "`ID`"));

        let policy = IdentifierPolicy::CaseSensitive;
        assert!(policy.matches("\"Id\"", "Id"));
        assert!(!policy.matches("ID", "id"));

        let policy = IdentifierPolicy::Exact;
        assert!(!policy.matches("\"id\"", "id"));
        assert_eq!(policy.position(&["a", "b"], "b"), Some(1));
    }

    #[test]
    fn test_format_sql_identifier() {
        assert_eq!(format_sql_identifier("select", SqlDialect::Postgres), "\"select\"");
        assert_eq!(format_sql_identifier("from", SqlDialect::MySql), "`from`");
        assert_eq!(format_sql_identifier("a]b", SqlDialect::SqlServer), "[a]]b]");
    }

    #[test]
    fn test_quote_if_needed() {
        assert_eq!(quote_if_needed("username", SqlDialect::Postgres), "username");
        assert_eq!(quote_if_needed("order", SqlDialect::Postgres), "\"order\"");
        assert_eq!(quote_if_needed("First Name", SqlDialect::MySql), "`First Name`");
        assert_eq!(quote_if_needed("MixedCase", SqlDialect::Postgres), "\"MixedCase\"");
        assert_eq!(quote_if_needed("MixedCase", SqlDialect::Sqlite), "MixedCase");
    }

    #[test]
    fn test_from_driver() {
        assert_eq!(SqlDialect::from_driver("PostgreSQL").unwrap(), SqlDialect::Postgres);
        assert_eq!(SqlDialect::from_driver("sqlite").unwrap(), SqlDialect::Sqlite);
        assert!(SqlDialect::from_driver("oracle").is_err());
    }

    #[test]
    fn test_format_file_name() {
        assert_eq!(format_file_name("public.Person/1"), "public.person_1");
    }
}
