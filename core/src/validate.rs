//! Schema validation.
//!
//! Checks the structural invariants of a set of tables before they become a
//! [`RelationalModel`](crate::RelationalModel): unique names, safe
//! identifiers, a single autoincrement primary key, and foreign keys that
//! land on existing tables and columns.
//!
//! # Examples
//!
//! ```
//! use schemarepo_core::*;
//!
//! let users = Table::new("users")
//!     .with_column(Column::new("id", ColumnType::Integer).primary_key());
//! assert!(validate_tables(&[users.clone()]).is_ok());
//!
//! // Foreign key to a table that does not exist
//! let posts = Table::new("posts")
//!     .with_column(Column::new("author_id", ColumnType::Integer))
//!     .with_reference("author_id", "authors", "id");
//! let err = validate_tables(&[users, posts]).unwrap_err();
//! assert!(matches!(err, SchemaError::UnknownTable { .. }));
//! ```

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::Table;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

/// Malformed or inconsistent schema.
///
/// Raised at startup by the parser and by model construction; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The schema declares no tables at all.
    #[error("schema declares no tables")]
    EmptySchema,
    /// A declared column type is outside the supported primitive set.
    #[error("unknown column type '{declared}' for {table}.{column}")]
    UnknownType {
        table: String,
        column: String,
        declared: String,
    },
    /// A foreign key or index names a table that does not exist.
    #[error("{context} references unknown table '{table}'")]
    UnknownTable { context: String, table: String },
    /// A foreign key, key clause or index names a column that does not exist.
    #[error("{context} references unknown column {table}.{column}")]
    UnknownColumn {
        context: String,
        table: String,
        column: String,
    },
    /// Two tables share a name.
    #[error("duplicate table: {0}")]
    DuplicateTable(String),
    /// Two columns in the same table share a name.
    #[error("duplicate column {column} in table {table}")]
    DuplicateColumn { table: String, column: String },
    /// AUTOINCREMENT on a column that is not the sole integer primary key.
    #[error("autoincrement column {table}.{column} must be the table's only INTEGER primary key")]
    InvalidAutoincrement { table: String, column: String },
    /// More than one AUTOINCREMENT column in a table.
    #[error("table {0} declares more than one autoincrement column")]
    MultipleAutoincrement(String),
    /// Owning and referenced column lists differ in length.
    #[error("foreign key {table}({columns}) has {found} referenced columns, expected {expected}")]
    ForeignKeyArity {
        table: String,
        columns: String,
        expected: usize,
        found: usize,
    },
    /// Name cannot be safely used as an SQL identifier.
    #[error("invalid {kind} identifier '{name}': must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidIdentifier { kind: &'static str, name: String },
    /// Text could not be tokenized into a well-formed definition.
    #[error("malformed statement near '{statement}': {reason}")]
    Malformed { statement: String, reason: String },
    /// Foreign keys form a cycle whose every edge is NOT NULL, so no table in
    /// it can ever receive a first row.
    #[error("unsatisfiable foreign-key cycle between tables: {}", .0.join(", "))]
    CyclicSchemaError(Vec<String>),
}

/// Validates that `name` is usable as an unquoted SQL identifier.
///
/// # Errors
///
/// Returns [`SchemaError::InvalidIdentifier`] naming `kind` when it is not.
pub fn validate_identifier(kind: &'static str, name: &str) -> Result<(), SchemaError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier {
            kind,
            name: name.to_string(),
        })
    }
}

/// Validates a set of tables.
///
/// Stops at the first problem found, like the rest of the startup path.
/// Foreign keys with an empty referenced column list are accepted here when
/// the target table has a primary key of matching arity.
///
/// # Errors
///
/// Returns the first [`SchemaError`] found.
pub fn validate_tables(tables: &[Table]) -> Result<(), SchemaError> {
    if tables.is_empty() {
        return Err(SchemaError::EmptySchema);
    }

    let mut seen_tables: HashSet<&str> = HashSet::new();
    for table in tables {
        validate_identifier("table", &table.name)?;
        if !seen_tables.insert(table.name.as_str()) {
            return Err(SchemaError::DuplicateTable(table.name.clone()));
        }
        validate_columns(table)?;
    }

    for table in tables {
        validate_foreign_keys(table, tables)?;
        validate_key_clauses(table)?;
    }

    Ok(())
}

fn validate_columns(table: &Table) -> Result<(), SchemaError> {
    let mut seen: HashSet<&str> = HashSet::new();

    for column in &table.columns {
        validate_identifier("column", &column.name)?;
        if !seen.insert(column.name.as_str()) {
            return Err(SchemaError::DuplicateColumn {
                table: table.name.clone(),
                column: column.name.clone(),
            });
        }
    }

    let autoincrement: Vec<_> = table.columns.iter().filter(|c| c.autoincrement).collect();
    if autoincrement.len() > 1 {
        return Err(SchemaError::MultipleAutoincrement(table.name.clone()));
    }
    if let Some(column) = autoincrement.first() {
        let sole_pk = table.primary_key().len() == 1;
        if !column.primary_key || !sole_pk || column.column_type != crate::ColumnType::Integer {
            return Err(SchemaError::InvalidAutoincrement {
                table: table.name.clone(),
                column: column.name.clone(),
            });
        }
    }

    Ok(())
}

fn validate_foreign_keys(table: &Table, tables: &[Table]) -> Result<(), SchemaError> {
    for fk in &table.foreign_keys {
        let context = format!("foreign key {}({})", table.name, fk.columns.join(", "));

        if let Some(column) = fk.columns.iter().find(|c| !table.has_column(c)) {
            return Err(SchemaError::UnknownColumn {
                context,
                table: table.name.clone(),
                column: column.clone(),
            });
        }

        let Some(target) = tables.iter().find(|t| t.name == fk.referenced_table) else {
            return Err(SchemaError::UnknownTable {
                context,
                table: fk.referenced_table.clone(),
            });
        };

        let referenced: Vec<&str> = if fk.referenced_columns.is_empty() {
            target.primary_key().iter().map(|c| c.name.as_str()).collect()
        } else {
            fk.referenced_columns.iter().map(String::as_str).collect()
        };

        if referenced.len() != fk.columns.len() {
            return Err(SchemaError::ForeignKeyArity {
                table: table.name.clone(),
                columns: fk.columns.join(", "),
                expected: fk.columns.len(),
                found: referenced.len(),
            });
        }

        if let Some(column) = referenced.into_iter().find(|c| !target.has_column(c)) {
            return Err(SchemaError::UnknownColumn {
                context,
                table: target.name.clone(),
                column: column.to_string(),
            });
        }
    }

    Ok(())
}

fn validate_key_clauses(table: &Table) -> Result<(), SchemaError> {
    let index_columns = table
        .indexes
        .iter()
        .map(|i| (format!("index {}", i.name), &i.columns));
    let unique_columns = table
        .unique_constraints
        .iter()
        .map(|cols| (format!("unique constraint on {}", table.name), cols));

    for (context, columns) in index_columns.chain(unique_columns) {
        if let Some(column) = columns.iter().find(|c| !table.has_column(c)) {
            return Err(SchemaError::UnknownColumn {
                context,
                table: table.name.clone(),
                column: column.clone(),
            });
        }
    }

    for index in &table.indexes {
        validate_identifier("index", &index.name)?;
    }

    Ok(())
}
