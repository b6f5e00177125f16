//! Schema difference calculator
//!
//! This module compares two database schemas and calculates the differences.
//! The reference schema is the desired state: objects only found there are
//! created, objects only found in the target are dropped (where removal is
//! allowed) and objects found in both with different attributes are modified.

use serde::Serialize;

use crate::config::SchemaConfig;
use crate::schema::types::{
    Column, Constraint, DatabaseSchema, ForeignKey, Grant, Index, PrimaryKey, Sequence, Table,
    Trigger, View,
};
use crate::utils::naming::IdentifierPolicy;

const NAMES: IdentifierPolicy = IdentifierPolicy::CaseInsensitive;

/// Represents changes needed to bring the target schema in line with the reference
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaDiff {
    pub tables_to_create: Vec<Table>,
    pub tables_to_drop: Vec<String>,
    pub tables_to_modify: Vec<TableChange>,
    pub views_to_create: Vec<View>,
    pub views_to_update: Vec<View>,
    pub views_to_drop: Vec<String>,
    pub sequences_to_create: Vec<Sequence>,
    pub sequences_to_update: Vec<Sequence>,
    pub sequences_to_drop: Vec<String>,
}

/// Changes to a table present on both sides
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableChange {
    /// Table name as the target spells it
    pub table_name: String,
    pub columns_to_add: Vec<Column>,
    pub columns_to_drop: Vec<String>,
    pub columns_to_alter: Vec<ColumnChange>,
    pub primary_key: Option<PrimaryKeyChange>,
    pub indexes_to_create: Vec<Index>,
    pub indexes_to_drop: Vec<Index>,
    pub foreign_keys_to_create: Vec<ForeignKey>,
    pub foreign_keys_to_drop: Vec<ForeignKey>,
    pub constraints_to_add: Vec<Constraint>,
    pub constraints_to_modify: Vec<Constraint>,
    pub constraints_to_drop: Vec<Constraint>,
    pub grants_to_add: Vec<Grant>,
    pub grants_to_revoke: Vec<Grant>,
    pub triggers_to_create: Vec<Trigger>,
    pub triggers_to_drop: Vec<String>,
    pub comment: Option<CommentChange>,
}

/// Represents a column change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnChange {
    pub column_name: String,
    pub from: Column,
    pub to: Column,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimaryKeyChange {
    pub from: Option<PrimaryKey>,
    pub to: Option<PrimaryKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentChange {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl TableChange {
    fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            ..Default::default()
        }
    }

    /// Check if the table needs no changes
    pub fn is_empty(&self) -> bool {
        self.columns_to_add.is_empty()
            && self.columns_to_drop.is_empty()
            && self.columns_to_alter.is_empty()
            && self.primary_key.is_none()
            && self.indexes_to_create.is_empty()
            && self.indexes_to_drop.is_empty()
            && self.foreign_keys_to_create.is_empty()
            && self.foreign_keys_to_drop.is_empty()
            && self.constraints_to_add.is_empty()
            && self.constraints_to_modify.is_empty()
            && self.constraints_to_drop.is_empty()
            && self.grants_to_add.is_empty()
            && self.grants_to_revoke.is_empty()
            && self.triggers_to_create.is_empty()
            && self.triggers_to_drop.is_empty()
            && self.comment.is_none()
    }
}

impl SchemaDiff {
    /// Generate a schema diff between a reference and a target schema
    pub fn generate(
        reference: &DatabaseSchema,
        target: &DatabaseSchema,
        schema_config: &SchemaConfig,
    ) -> Self {
        let mut diff = SchemaDiff::default();

        // Tables
        for reference_table in reference.tables.values() {
            match target.find_table(&reference_table.name) {
                None => diff.tables_to_create.push(reference_table.clone()),
                Some(target_table) => {
                    let change = Self::compare_tables(reference_table, target_table, schema_config);
                    if !change.is_empty() {
                        diff.tables_to_modify.push(change);
                    }
                }
            }
        }
        if schema_config.allow_table_removal {
            diff.tables_to_drop = target
                .tables
                .values()
                .filter(|t| reference.find_table(&t.name).is_none())
                .map(|t| t.name.clone())
                .collect();
        }

        // Views
        for view in reference.views.values() {
            match find_named(target.views.values(), &view.name, |v| &v.name) {
                None => diff.views_to_create.push(view.clone()),
                Some(existing) if !views_equal(view, existing) => diff.views_to_update.push(view.clone()),
                Some(_) => {}
            }
        }
        if schema_config.allow_view_removal {
            diff.views_to_drop = target
                .views
                .values()
                .filter(|v| find_named(reference.views.values(), &v.name, |r| &r.name).is_none())
                .map(|v| v.name.clone())
                .collect();
        }

        // Sequences
        for sequence in reference.sequences.values() {
            match find_named(target.sequences.values(), &sequence.name, |s| &s.name) {
                None => diff.sequences_to_create.push(sequence.clone()),
                Some(existing) if !sequences_equal(sequence, existing) => {
                    diff.sequences_to_update.push(sequence.clone())
                }
                Some(_) => {}
            }
        }
        if schema_config.allow_sequence_removal {
            diff.sequences_to_drop = target
                .sequences
                .values()
                .filter(|s| find_named(reference.sequences.values(), &s.name, |r| &r.name).is_none())
                .map(|s| s.name.clone())
                .collect();
        }

        diff
    }

    fn compare_tables(reference: &Table, target: &Table, schema_config: &SchemaConfig) -> TableChange {
        let mut change = TableChange::new(&target.name);

        // Columns
        for column in &reference.columns {
            match target.find_column(&column.name) {
                None => change.columns_to_add.push(column.clone()),
                Some(existing) if Self::column_needs_alteration(existing, column) => {
                    change.columns_to_alter.push(ColumnChange {
                        column_name: existing.name.clone(),
                        from: existing.clone(),
                        to: column.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        if schema_config.allow_column_removal {
            change.columns_to_drop = target
                .columns
                .iter()
                .filter(|c| reference.find_column(&c.name).is_none())
                .map(|c| c.name.clone())
                .collect();
        }

        // Primary key
        if !primary_keys_equal(reference.primary_key.as_ref(), target.primary_key.as_ref()) {
            change.primary_key = Some(PrimaryKeyChange {
                from: target.primary_key.clone(),
                to: reference.primary_key.clone(),
            });
        }

        // Indexes
        let (create, drop) = diff_replaceable(
            &reference.indexes,
            &target.indexes,
            schema_config.match_indexes_by_name,
            |i| &i.name,
            index_signature,
        );
        change.indexes_to_create = create;
        change.indexes_to_drop = drop;

        // Foreign keys
        let (create, drop) = diff_replaceable(
            &reference.foreign_keys,
            &target.foreign_keys,
            schema_config.match_constraints_by_name,
            |fk| &fk.name,
            foreign_key_signature,
        );
        change.foreign_keys_to_create = create;
        change.foreign_keys_to_drop = drop;

        // Check and unique constraints
        Self::compare_constraints(reference, target, schema_config, &mut change);

        // Grants
        change.grants_to_add = reference
            .grants
            .iter()
            .filter(|g| !target.grants.iter().any(|t| grants_equal(g, t)))
            .cloned()
            .collect();
        change.grants_to_revoke = target
            .grants
            .iter()
            .filter(|g| !reference.grants.iter().any(|r| grants_equal(g, r)))
            .cloned()
            .collect();

        // Triggers: a changed trigger is dropped and created again
        for trigger in &reference.triggers {
            match find_named(target.triggers.iter(), &trigger.name, |t| &t.name) {
                None => change.triggers_to_create.push(trigger.clone()),
                Some(existing) if !triggers_equal(trigger, existing) => {
                    change.triggers_to_drop.push(existing.name.clone());
                    change.triggers_to_create.push(trigger.clone());
                }
                Some(_) => {}
            }
        }
        for trigger in &target.triggers {
            if find_named(reference.triggers.iter(), &trigger.name, |t| &t.name).is_none() {
                change.triggers_to_drop.push(trigger.name.clone());
            }
        }

        if normalize_optional(&reference.comment) != normalize_optional(&target.comment) {
            change.comment = Some(CommentChange {
                from: target.comment.clone(),
                to: reference.comment.clone(),
            });
        }

        change
    }

    fn compare_constraints(
        reference: &Table,
        target: &Table,
        schema_config: &SchemaConfig,
        change: &mut TableChange,
    ) {
        if schema_config.match_constraints_by_name {
            for constraint in &reference.constraints {
                match find_named(target.constraints.iter(), &constraint.name, |c| &c.name) {
                    None => change.constraints_to_add.push(constraint.clone()),
                    Some(existing) if constraint_signature(existing) != constraint_signature(constraint) => {
                        change.constraints_to_modify.push(Constraint {
                            name: existing.name.clone(),
                            ..constraint.clone()
                        })
                    }
                    Some(_) => {}
                }
            }
            change.constraints_to_drop = target
                .constraints
                .iter()
                .filter(|c| find_named(reference.constraints.iter(), &c.name, |r| &r.name).is_none())
                .cloned()
                .collect();
        } else {
            change.constraints_to_add = reference
                .constraints
                .iter()
                .filter(|c| {
                    !target
                        .constraints
                        .iter()
                        .any(|t| constraint_signature(t) == constraint_signature(c))
                })
                .cloned()
                .collect();
            change.constraints_to_drop = target
                .constraints
                .iter()
                .filter(|c| {
                    !reference
                        .constraints
                        .iter()
                        .any(|r| constraint_signature(r) == constraint_signature(c))
                })
                .cloned()
                .collect();
        }
    }

    /// Check if a column needs to be altered
    fn column_needs_alteration(current: &Column, target: &Column) -> bool {
        current.data_type.to_lowercase() != target.data_type.to_lowercase()
            || current.size != target.size
            || current.nullable != target.nullable
            || normalize_optional(&current.default) != normalize_optional(&target.default)
            || normalize_optional(&current.comment) != normalize_optional(&target.comment)
            || current.is_unique != target.is_unique
            || normalize_optional(&current.generation_expression)
                != normalize_optional(&target.generation_expression)
    }

    /// Check if the diff is empty (no changes needed)
    pub fn is_empty(&self) -> bool {
        self.tables_to_create.is_empty()
            && self.tables_to_drop.is_empty()
            && self.tables_to_modify.is_empty()
            && self.views_to_create.is_empty()
            && self.views_to_update.is_empty()
            && self.views_to_drop.is_empty()
            && self.sequences_to_create.is_empty()
            && self.sequences_to_update.is_empty()
            && self.sequences_to_drop.is_empty()
    }

    /// Number of top-level objects affected
    pub fn change_count(&self) -> usize {
        self.tables_to_create.len()
            + self.tables_to_drop.len()
            + self.tables_to_modify.len()
            + self.views_to_create.len()
            + self.views_to_update.len()
            + self.views_to_drop.len()
            + self.sequences_to_create.len()
            + self.sequences_to_update.len()
            + self.sequences_to_drop.len()
    }
}

fn find_named<'a, T, I, F>(mut items: I, name: &str, name_of: F) -> Option<&'a T>
where
    I: Iterator<Item = &'a T>,
    F: Fn(&T) -> &String,
{
    items.find(|item| NAMES.matches(name_of(item), name))
}

/// Objects matched by name (or by signature) that differ are dropped and
/// recreated. Returns `(to_create, to_drop)`.
fn diff_replaceable<T, N, S>(
    reference: &[T],
    target: &[T],
    by_name: bool,
    name_of: N,
    signature: S,
) -> (Vec<T>, Vec<T>)
where
    T: Clone,
    N: Fn(&T) -> &String,
    S: Fn(&T) -> String,
{
    let mut to_create = Vec::new();
    let mut to_drop = Vec::new();

    if by_name {
        for item in reference {
            match target.iter().find(|t| NAMES.matches(name_of(t), name_of(item))) {
                None => to_create.push(item.clone()),
                Some(existing) if signature(existing) != signature(item) => {
                    to_drop.push(existing.clone());
                    to_create.push(item.clone());
                }
                Some(_) => {}
            }
        }
        to_drop.extend(
            target
                .iter()
                .filter(|t| !reference.iter().any(|r| NAMES.matches(name_of(r), name_of(t))))
                .cloned(),
        );
    } else {
        to_create.extend(
            reference
                .iter()
                .filter(|r| !target.iter().any(|t| signature(t) == signature(r)))
                .cloned(),
        );
        to_drop.extend(
            target
                .iter()
                .filter(|t| !reference.iter().any(|r| signature(r) == signature(t)))
                .cloned(),
        );
    }

    (to_create, to_drop)
}

/// Collapse whitespace and case so formatting differences do not count
pub fn normalize_definition(definition: &str) -> String {
    definition
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .to_lowercase()
}

fn normalize_optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(normalize_definition)
        .filter(|v| !v.is_empty())
}

fn normalize_names(names: &[String]) -> Vec<String> {
    names.iter().map(|n| NAMES.normalize(n)).collect()
}

fn index_signature(index: &Index) -> String {
    format!("{}|{}", normalize_names(&index.columns).join(","), index.is_unique)
}

fn foreign_key_signature(fk: &ForeignKey) -> String {
    format!(
        "{}|{}|{}",
        normalize_names(&fk.columns).join(","),
        NAMES.normalize(&fk.ref_table),
        normalize_names(&fk.ref_columns).join(",")
    )
}

fn constraint_signature(constraint: &Constraint) -> String {
    format!(
        "{}|{}",
        constraint.constraint_type.to_uppercase(),
        normalize_definition(&constraint.definition)
    )
}

fn primary_keys_equal(left: Option<&PrimaryKey>, right: Option<&PrimaryKey>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(l), Some(r)) => normalize_names(&l.columns) == normalize_names(&r.columns),
        _ => false,
    }
}

fn grants_equal(left: &Grant, right: &Grant) -> bool {
    NAMES.matches(&left.grantee, &right.grantee)
        && left.privilege.eq_ignore_ascii_case(&right.privilege)
        && left.grantable == right.grantable
}

fn triggers_equal(left: &Trigger, right: &Trigger) -> bool {
    left.timing.eq_ignore_ascii_case(&right.timing)
        && left.event.eq_ignore_ascii_case(&right.event)
        && normalize_definition(&left.definition) == normalize_definition(&right.definition)
}

fn views_equal(left: &View, right: &View) -> bool {
    left.is_materialized == right.is_materialized
        && normalize_definition(&left.definition) == normalize_definition(&right.definition)
}

fn sequences_equal(left: &Sequence, right: &Sequence) -> bool {
    left.start_value == right.start_value
        && left.increment == right.increment
        && left.min_value == right.min_value
        && left.max_value == right.max_value
        && left.cycle == right.cycle
}
