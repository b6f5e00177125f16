//! Schema module for table_sync
//!
//! This module handles database schema analysis, comparison, and generation.

pub mod analyzer;
pub mod changelog;
pub mod diff;
pub mod generator;
pub mod types;

// Re-export key types
pub use analyzer::{Analyzer, SchemaAnalyzer};
pub use changelog::render_changelog;
pub use diff::{ColumnChange, SchemaDiff, TableChange};
pub use generator::MigrationGenerator;
pub use types::{
    Column, Constraint, DatabaseSchema, ForeignKey, Grant, Index, PrimaryKey, Sequence, Table,
    Trigger, View,
};
