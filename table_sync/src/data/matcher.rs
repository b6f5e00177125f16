//! Pairing a row with its counterpart among the rows fetched for a chunk.

use crate::data::row::{ResultShape, Row};
use crate::utils::naming::IdentifierPolicy;

/// Positions of the active key columns on both sides of a comparison.
///
/// The two shapes may order their columns differently, so every key column
/// is looked up by name in each shape separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumns {
    names: Vec<String>,
    row: Vec<usize>,
    candidate: Vec<usize>,
}

impl KeyColumns {
    /// Resolve `names` in both shapes. Returns None if any key column is
    /// missing from either side.
    pub fn resolve<S: AsRef<str>>(
        names: &[S],
        row_shape: &ResultShape,
        candidate_shape: &ResultShape,
        policy: IdentifierPolicy,
    ) -> Option<Self> {
        let mut row = Vec::with_capacity(names.len());
        let mut candidate = Vec::with_capacity(names.len());
        for name in names {
            row.push(row_shape.find_column(name.as_ref(), policy)?);
            candidate.push(candidate_shape.find_column(name.as_ref(), policy)?);
        }

        Some(Self {
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
            row,
            candidate,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Key positions in the shape of the row being looked up
    pub fn row_positions(&self) -> &[usize] {
        &self.row
    }

    /// Key positions in the shape of the candidate rows
    pub fn candidate_positions(&self) -> &[usize] {
        &self.candidate
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Index of the first candidate whose key equals the key of `row`.
///
/// A plain linear scan: chunks are small, and a row with a NULL key column
/// never matches anything.
pub fn find_match(candidates: &[Row], row: &Row, keys: &KeyColumns) -> Option<usize> {
    if keys.is_empty() || row.has_null_key(keys.row_positions()) {
        return None;
    }

    candidates
        .iter()
        .position(|candidate| row.key_equals(keys.row_positions(), candidate, keys.candidate_positions()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::row::ColumnDescriptor;
    use crate::data::value::Value;
    use rust_decimal::Decimal;

    fn reference_shape() -> ResultShape {
        ResultShape::new(vec![
            ColumnDescriptor::new("id1", "integer").primary_key(),
            ColumnDescriptor::new("id2", "integer").primary_key(),
            ColumnDescriptor::new("firstname", "varchar(20)"),
        ])
    }

    fn target_shape() -> ResultShape {
        // Same columns, different order and spelling
        ResultShape::new(vec![
            ColumnDescriptor::new("FIRSTNAME", "varchar(20)"),
            ColumnDescriptor::new("\"ID2\"", "numeric(10,0)").primary_key(),
            ColumnDescriptor::new("Id1", "bigint").primary_key(),
        ])
    }

    #[test]
    fn test_match_across_shapes_and_types() {
        let keys = KeyColumns::resolve(
            &["id1", "id2"],
            &reference_shape(),
            &target_shape(),
            IdentifierPolicy::CaseInsensitive,
        )
        .unwrap();
        assert_eq!(keys.row_positions(), &[0, 1]);
        assert_eq!(keys.candidate_positions(), &[2, 1]);

        let candidates = vec![
            Row::new(vec![Value::from("Ford"), Value::Decimal(Decimal::from(2)), Value::Int(1)]),
            Row::new(vec![Value::from("Arthur"), Value::Decimal(Decimal::from(1)), Value::Int(1)]),
        ];
        let row = Row::new(vec![Value::Int(1), Value::Int(1), Value::from("Arthur")]);
        assert_eq!(find_match(&candidates, &row, &keys), Some(1));

        let missing = Row::new(vec![Value::Int(9), Value::Int(9), Value::from("Zaphod")]);
        assert_eq!(find_match(&candidates, &missing, &keys), None);
    }

    #[test]
    fn test_null_key_never_matches() {
        let keys = KeyColumns::resolve(
            &["id1"],
            &reference_shape(),
            &reference_shape(),
            IdentifierPolicy::CaseInsensitive,
        )
        .unwrap();
        let row = Row::new(vec![Value::Null, Value::Int(1), Value::Null]);
        assert_eq!(find_match(&[row.clone()], &row, &keys), None);
    }

    #[test]
    fn test_first_match_wins() {
        let keys = KeyColumns::resolve(
            &["id1"],
            &reference_shape(),
            &reference_shape(),
            IdentifierPolicy::CaseInsensitive,
        )
        .unwrap();
        let candidates = vec![
            Row::new(vec![Value::Int(1), Value::Int(1), Value::from("a")]),
            Row::new(vec![Value::Int(1), Value::Int(2), Value::from("b")]),
        ];
        let row = Row::new(vec![Value::Int(1), Value::Int(5), Value::Null]);
        assert_eq!(find_match(&candidates, &row, &keys), Some(0));
    }

    #[test]
    fn test_unresolvable_key() {
        assert!(KeyColumns::resolve(
            &["nope"],
            &reference_shape(),
            &target_shape(),
            IdentifierPolicy::CaseInsensitive
        )
        .is_none());
    }
}
