//! Comparing a reference row with its target counterpart.

use std::collections::HashSet;

use crate::data::change::{ColumnValue, FragmentRenderer, MigrationFragment, RowChange};
use crate::data::row::{ResultShape, Row};
use crate::data::value::value_equals;
use crate::error::Result;
use crate::utils::naming::IdentifierPolicy;

/// Decides whether a row pair differs and renders the resulting change.
///
/// Both rows are aligned with the same [`ResultShape`], whose key columns
/// are the active key of the comparison. Ignored columns take no part in the
/// equality check, so they never show up in an UPDATE. Excluded columns are
/// left out of rendered INSERT and UPDATE column lists. Key columns always
/// make up the WHERE clause of an UPDATE, excluded or not.
pub struct RowComparer<'a> {
    shape: &'a ResultShape,
    renderer: &'a FragmentRenderer,
    policy: IdentifierPolicy,
    reference: Option<&'a Row>,
    target: Option<&'a Row>,
    ignored: HashSet<usize>,
    excluded: HashSet<usize>,
}

impl<'a> RowComparer<'a> {
    pub fn new(shape: &'a ResultShape, renderer: &'a FragmentRenderer, policy: IdentifierPolicy) -> Self {
        Self {
            shape,
            renderer,
            policy,
            reference: None,
            target: None,
            ignored: HashSet::new(),
            excluded: HashSet::new(),
        }
    }

    pub fn set_rows(&mut self, reference: &'a Row, target: Option<&'a Row>) {
        self.reference = Some(reference);
        self.target = target;
    }

    /// Columns left out of the equality check; unknown names are skipped
    pub fn ignore_columns<S: AsRef<str>>(&mut self, names: &[S]) {
        self.ignored = self.resolve(names);
    }

    /// Columns left out of generated column lists; unknown names are skipped
    pub fn exclude_columns<S: AsRef<str>>(&mut self, names: &[S]) {
        self.excluded = self.resolve(names);
    }

    fn resolve<S: AsRef<str>>(&self, names: &[S]) -> HashSet<usize> {
        names
            .iter()
            .filter_map(|n| self.shape.find_column(n.as_ref(), self.policy))
            .collect()
    }

    /// Positions of the compared columns whose values differ
    pub fn changed_columns(&self) -> Vec<usize> {
        let (Some(reference), Some(target)) = (self.reference, self.target) else {
            return Vec::new();
        };

        (0..self.shape.column_count())
            .filter(|i| !self.ignored.contains(i))
            .filter(|&i| !value_equals(reference.get(i), target.get(i)))
            .collect()
    }

    /// Render the change for the current pair, or None when there is nothing to do
    pub fn get_migration(&self, row_number: u64) -> Result<Option<MigrationFragment>> {
        let Some(reference) = self.reference else {
            return Ok(None);
        };

        let table = self
            .shape
            .table()
            .cloned()
            .unwrap_or_else(|| self.renderer.table().clone());

        let change = match self.target {
            None => {
                let values = (0..self.shape.column_count())
                    .filter(|i| !self.excluded.contains(i))
                    .map(|i| self.column_value(reference, i))
                    .collect();
                let key = self
                    .shape
                    .key_columns()
                    .iter()
                    .filter(|i| !self.excluded.contains(i))
                    .map(|&i| self.column_value(reference, i))
                    .collect();
                RowChange::insert(table, values, key)
            }
            Some(_) => {
                let values: Vec<ColumnValue> = self
                    .changed_columns()
                    .into_iter()
                    .filter(|i| !self.excluded.contains(i))
                    .map(|i| self.column_value(reference, i))
                    .collect();
                if values.is_empty() {
                    return Ok(None);
                }
                let key = self
                    .shape
                    .key_columns()
                    .iter()
                    .map(|&i| self.column_value(reference, i))
                    .collect();
                RowChange::update(table, values, key)
            }
        };

        self.renderer.render(change, row_number).map(Some)
    }

    fn column_value(&self, row: &Row, index: usize) -> ColumnValue {
        ColumnValue::new(self.shape.column(index).clone(), row.get(index).clone())
    }
}
