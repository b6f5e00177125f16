//! XML change-log rendering of a [`SchemaDiff`]

use crate::data::change::LineEnding;
use crate::schema::diff::{SchemaDiff, TableChange};
use crate::schema::types::{Column, ForeignKey, Grant, Index, Sequence, Table, View};
use crate::utils::xml::{declaration, XmlWriter};

/// Render the diff as a `<schema-diff>` document
pub fn render_changelog(diff: &SchemaDiff, encoding: &str, line_ending: LineEnding) -> String {
    let mut xml = XmlWriter::new(line_ending.as_str());
    xml.raw_line(&declaration(encoding));
    xml.open("schema-diff", &[]);

    for table in &diff.tables_to_create {
        write_add_table(&mut xml, table);
    }
    for change in &diff.tables_to_modify {
        write_modify_table(&mut xml, change);
    }
    for name in &diff.tables_to_drop {
        xml.empty_element("drop-table", &[("name", Some(name.as_str()))]);
    }

    for view in &diff.views_to_create {
        write_view(&mut xml, "create-view", view);
    }
    for view in &diff.views_to_update {
        write_view(&mut xml, "update-view", view);
    }
    for name in &diff.views_to_drop {
        xml.empty_element("drop-view", &[("name", Some(name.as_str()))]);
    }

    for sequence in &diff.sequences_to_create {
        write_sequence(&mut xml, "create-sequence", sequence);
    }
    for sequence in &diff.sequences_to_update {
        write_sequence(&mut xml, "update-sequence", sequence);
    }
    for name in &diff.sequences_to_drop {
        xml.empty_element("drop-sequence", &[("name", Some(name.as_str()))]);
    }

    xml.close("schema-diff");
    xml.finish()
}

fn flag(value: bool) -> Option<&'static str> {
    value.then_some("true")
}

fn write_column(xml: &mut XmlWriter, element: &str, column: &Column) {
    let data_type = column.full_type();
    xml.empty_element(
        element,
        &[
            ("name", Some(column.name.as_str())),
            ("type", Some(data_type.as_str())),
            ("nullable", Some(if column.nullable { "true" } else { "false" })),
            ("default", column.default.as_deref()),
            ("comment", column.comment.as_deref()),
            ("generated", column.generation_expression.as_deref()),
        ],
    );
}

fn write_index(xml: &mut XmlWriter, element: &str, index: &Index) {
    let columns = index.columns.join(",");
    xml.empty_element(
        element,
        &[
            ("name", Some(index.name.as_str())),
            ("columns", Some(columns.as_str())),
            ("unique", flag(index.is_unique)),
            ("method", index.method.as_deref()),
        ],
    );
}

fn write_foreign_keys(xml: &mut XmlWriter, element: &str, foreign_keys: &[ForeignKey]) {
    if foreign_keys.is_empty() {
        return;
    }
    xml.open(element, &[]);
    for fk in foreign_keys {
        let columns = fk.columns.join(",");
        let ref_columns = fk.ref_columns.join(",");
        xml.empty_element(
            "foreign-key",
            &[
                ("name", Some(fk.name.as_str())),
                ("columns", Some(columns.as_str())),
                ("references", Some(fk.ref_table.as_str())),
                ("ref-columns", Some(ref_columns.as_str())),
                ("on-delete", fk.on_delete.as_deref()),
                ("on-update", fk.on_update.as_deref()),
            ],
        );
    }
    xml.close(element);
}

fn write_grants(xml: &mut XmlWriter, element: &str, grants: &[Grant]) {
    if grants.is_empty() {
        return;
    }
    xml.open(element, &[]);
    for grant in grants {
        xml.empty_element(
            "grant",
            &[
                ("grantee", Some(grant.grantee.as_str())),
                ("privilege", Some(grant.privilege.as_str())),
                ("grantable", flag(grant.grantable)),
            ],
        );
    }
    xml.close(element);
}

fn write_add_table(xml: &mut XmlWriter, table: &Table) {
    xml.open("add-table", &[("name", Some(table.name.as_str()))]);
    for column in &table.columns {
        write_column(xml, "column", column);
    }
    if let Some(pk) = &table.primary_key {
        let columns = pk.columns.join(",");
        xml.empty_element(
            "primary-key",
            &[("name", pk.name.as_deref()), ("columns", Some(columns.as_str()))],
        );
    }
    for index in &table.indexes {
        write_index(xml, "index", index);
    }
    write_foreign_keys(xml, "add-foreign-keys", &table.foreign_keys);
    for constraint in &table.constraints {
        xml.text_element(
            "constraint",
            &[
                ("name", Some(constraint.name.as_str())),
                ("type", Some(constraint.constraint_type.as_str())),
            ],
            &constraint.definition,
        );
    }
    if let Some(comment) = &table.comment {
        xml.text_element("comment", &[], comment);
    }
    xml.close("add-table");
}

fn write_modify_table(xml: &mut XmlWriter, change: &TableChange) {
    xml.open("modify-table", &[("name", Some(change.table_name.as_str()))]);

    for column in &change.columns_to_add {
        write_column(xml, "add-column", column);
    }
    for name in &change.columns_to_drop {
        xml.empty_element("remove-column", &[("name", Some(name.as_str()))]);
    }
    for column in &change.columns_to_alter {
        let from_type = column.from.full_type();
        xml.open(
            "modify-column",
            &[("name", Some(column.column_name.as_str())), ("from-type", Some(from_type.as_str()))],
        );
        write_column(xml, "column", &column.to);
        xml.close("modify-column");
    }

    if let Some(pk) = &change.primary_key {
        let from = pk.from.as_ref().map(|k| k.columns.join(","));
        let to = pk.to.as_ref().map(|k| k.columns.join(","));
        xml.empty_element(
            "modify-primary-key",
            &[("from", from.as_deref()), ("to", to.as_deref())],
        );
    }

    write_foreign_keys(xml, "drop-foreign-keys", &change.foreign_keys_to_drop);
    write_foreign_keys(xml, "add-foreign-keys", &change.foreign_keys_to_create);

    for index in &change.indexes_to_drop {
        xml.empty_element("drop-index", &[("name", Some(index.name.as_str()))]);
    }
    for index in &change.indexes_to_create {
        write_index(xml, "add-index", index);
    }

    let has_constraints = !change.constraints_to_add.is_empty()
        || !change.constraints_to_modify.is_empty()
        || !change.constraints_to_drop.is_empty();
    if has_constraints {
        xml.open("table-constraints", &[]);
        for constraint in &change.constraints_to_drop {
            xml.empty_element("drop-constraint", &[("name", Some(constraint.name.as_str()))]);
        }
        for (element, constraints) in [
            ("add-constraint", &change.constraints_to_add),
            ("modify-constraint", &change.constraints_to_modify),
        ] {
            for constraint in constraints {
                xml.text_element(
                    element,
                    &[
                        ("name", Some(constraint.name.as_str())),
                        ("type", Some(constraint.constraint_type.as_str())),
                    ],
                    &constraint.definition,
                );
            }
        }
        xml.close("table-constraints");
    }

    write_grants(xml, "add-grants", &change.grants_to_add);
    write_grants(xml, "revoke-grants", &change.grants_to_revoke);

    for name in &change.triggers_to_drop {
        xml.empty_element("drop-trigger", &[("name", Some(name.as_str()))]);
    }
    for trigger in &change.triggers_to_create {
        xml.text_element(
            "create-trigger",
            &[
                ("name", Some(trigger.name.as_str())),
                ("timing", Some(trigger.timing.as_str())),
                ("event", Some(trigger.event.as_str())),
            ],
            &trigger.definition,
        );
    }

    if let Some(comment) = &change.comment {
        match &comment.to {
            Some(text) => xml.text_element("comment", &[], text),
            None => xml.empty_element("comment", &[("remove", Some("true"))]),
        }
    }

    xml.close("modify-table");
}

fn write_view(xml: &mut XmlWriter, element: &str, view: &View) {
    xml.text_element(
        element,
        &[
            ("name", Some(view.name.as_str())),
            ("materialized", flag(view.is_materialized)),
        ],
        &view.definition,
    );
}

fn write_sequence(xml: &mut XmlWriter, element: &str, sequence: &Sequence) {
    let start = sequence.start_value.map(|v| v.to_string());
    let increment = sequence.increment.map(|v| v.to_string());
    let min = sequence.min_value.map(|v| v.to_string());
    let max = sequence.max_value.map(|v| v.to_string());
    xml.empty_element(
        element,
        &[
            ("name", Some(sequence.name.as_str())),
            ("start", start.as_deref()),
            ("increment", increment.as_deref()),
            ("min", min.as_deref()),
            ("max", max.as_deref()),
            ("cycle", flag(sequence.cycle)),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaConfig;
    use crate::schema::types::{DatabaseSchema, PrimaryKey};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_changelog_document() {
        let mut table = Table::new("person");
        table.add_column(Column::new("id", "integer"));
        table.set_primary_key(PrimaryKey {
            name: None,
            columns: vec!["id".into()],
        });
        let mut reference = DatabaseSchema::new(None);
        reference.add_table(table.clone());
        reference.add_view(View {
            name: "v".into(),
            definition: "SELECT 1 < 2".into(),
            columns: Vec::new(),
            is_materialized: false,
        });

        let mut current = table;
        current.add_column(Column::new("note", "text").nullable(true));
        current.columns[0] = Column::new("id", "bigint");
        let mut target = DatabaseSchema::new(None);
        target.add_table(current);

        let config = SchemaConfig {
            allow_column_removal: true,
            ..SchemaConfig::default()
        };
        let diff = SchemaDiff::generate(&reference, &target, &config);
        let xml = render_changelog(&diff, "UTF-8", LineEnding::Lf);

        let expected = r#"<?xml version="1.0" encoding="UTF-8"?>
<schema-diff>
  <modify-table name="person">
    <remove-column name="note"/>
    <modify-column name="id" from-type="bigint">
      <column name="id" type="integer" nullable="false"/>
    </modify-column>
  </modify-table>
  <create-view name="v">SELECT 1 &lt; 2</create-view>
</schema-diff>
"#;
        assert_eq!(xml, expected);
    }

    #[test]
    fn test_empty_diff_renders_empty_root() {
        let xml = render_changelog(&SchemaDiff::default(), "UTF-8", LineEnding::Crlf);
        assert_eq!(
            xml,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n<schema-diff>\r\n</schema-diff>\r\n"
        );
    }
}
