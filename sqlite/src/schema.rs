//! DDL generation from a relational model.
//!
//! Generates `CREATE TABLE IF NOT EXISTS` and `CREATE INDEX IF NOT EXISTS`
//! statements, tables in creation order followed by their indexes, so the
//! script can be applied any number of times.
//!
//! Identifiers come from a validated model (see
//! [`validate_identifier`](schemarepo_core::validate_identifier)) and are
//! double-quoted so names such as `order` or `key` stay usable.

use schemarepo_core::{Column, ForeignKey, ForeignKeyAction, Index, RelationalModel, Table};

/// Double-quotes an identifier.
pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

pub(crate) fn quote_list<S: AsRef<str>>(identifiers: &[S]) -> String {
    identifiers
        .iter()
        .map(|i| quote(i.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_sql(column: &Column, inline_primary_key: bool) -> String {
    let mut sql = format!("{} {}", quote(&column.name), column.column_type.sql_name());

    if inline_primary_key && column.primary_key {
        sql.push_str(" PRIMARY KEY");
        if column.autoincrement {
            sql.push_str(" AUTOINCREMENT");
        }
    }
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(&default.to_sql());
    }
    if let Some(check) = &column.check {
        sql.push_str(&format!(" CHECK ({check})"));
    }
    sql
}

fn foreign_key_sql(fk: &ForeignKey) -> String {
    let mut sql = format!(
        "FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_list(&fk.columns),
        quote(&fk.referenced_table),
        quote_list(&fk.referenced_columns)
    );
    if fk.on_delete != ForeignKeyAction::NoAction {
        sql.push_str(&format!(" ON DELETE {}", fk.on_delete.sql()));
    }
    if fk.on_update != ForeignKeyAction::NoAction {
        sql.push_str(&format!(" ON UPDATE {}", fk.on_update.sql()));
    }
    sql
}

/// `CREATE TABLE IF NOT EXISTS` statement for one table.
///
/// A single-column primary key is declared inline so that an `INTEGER`
/// key aliases the rowid; composite keys become a table constraint.
pub fn create_table_sql(table: &Table) -> String {
    let primary_key = table.primary_key();
    let inline_primary_key = primary_key.len() == 1;

    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| column_sql(c, inline_primary_key))
        .collect();

    if primary_key.len() > 1 {
        let names: Vec<&str> = primary_key.iter().map(|c| c.name.as_str()).collect();
        parts.push(format!("PRIMARY KEY ({})", quote_list(&names)));
    }
    for columns in &table.unique_constraints {
        parts.push(format!("UNIQUE ({})", quote_list(columns)));
    }
    for check in &table.checks {
        parts.push(format!("CHECK ({check})"));
    }
    for fk in &table.foreign_keys {
        parts.push(foreign_key_sql(fk));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        quote(&table.name),
        parts.join(",\n    ")
    )
}

/// `CREATE INDEX IF NOT EXISTS` statement for one index.
pub fn create_index_sql(index: &Index) -> String {
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
        if index.unique { "UNIQUE " } else { "" },
        quote(&index.name),
        quote(&index.table),
        quote_list(&index.columns)
    )
}

/// Generates the complete schema script for a model.
///
/// All tables come first, in creation order, then every index. The engine
/// does not check foreign-key targets at creation time, so tables in a
/// reference cycle can be created in any order.
pub fn generate_schema_sql(model: &RelationalModel) -> String {
    let order = model.creation_order();

    let tables = order.iter().map(|t| create_table_sql(t));
    let indexes = order
        .iter()
        .flat_map(|t| t.indexes.iter())
        .map(create_index_sql);

    tables.chain(indexes).collect::<Vec<_>>().join("\n")
}
