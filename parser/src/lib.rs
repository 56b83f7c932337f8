//! Schema parser for schemarepo.
//!
//! Turns a schema description into a validated
//! [`RelationalModel`](schemarepo_core::RelationalModel). Two description
//! forms are accepted:
//!
//! - DDL text made of `CREATE TABLE` / `CREATE INDEX` statements in the
//!   embedded engine's dialect;
//! - a [`StructuredSchema`]: ordered table mappings from column name to
//!   declaration, plus optional explicit foreign keys and index requests.
//!
//! Parsing is a pure transform. Nothing touches the database.
//!
//! # Examples
//!
//! ```
//! use schemarepo_parser::{parse, SchemaInput};
//!
//! let model = parse(SchemaInput::from(
//!     "CREATE TABLE customers (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);
//!      CREATE TABLE orders (
//!          id INTEGER PRIMARY KEY AUTOINCREMENT,
//!          customer_id INTEGER REFERENCES customers(id)
//!      );",
//! ))
//! .unwrap();
//!
//! let order: Vec<_> = model.creation_order().iter().map(|t| t.name.as_str()).collect();
//! assert_eq!(order, vec!["customers", "orders"]);
//! ```

mod ddl;
mod lexer;
mod structured;

pub use ddl::parse_ddl;
pub use structured::{StructuredSchema, TableSpec, TableSpecs};

use schemarepo_core::{RelationalModel, SchemaError, Table};
use tracing::debug;

/// Schema description accepted by [`parse`].
#[derive(Debug, Clone)]
pub enum SchemaInput {
    /// DDL statements.
    Text(String),
    /// Table mappings plus explicit foreign keys and index requests.
    Structured(StructuredSchema),
    /// Tables already built in code.
    Tables(Vec<Table>),
}

impl From<&str> for SchemaInput {
    fn from(sql: &str) -> Self {
        Self::Text(sql.to_string())
    }
}

impl From<String> for SchemaInput {
    fn from(sql: String) -> Self {
        Self::Text(sql)
    }
}

impl From<StructuredSchema> for SchemaInput {
    fn from(schema: StructuredSchema) -> Self {
        Self::Structured(schema)
    }
}

impl From<TableSpecs> for SchemaInput {
    fn from(tables: TableSpecs) -> Self {
        Self::Structured(StructuredSchema::new(tables))
    }
}

impl From<Vec<Table>> for SchemaInput {
    fn from(tables: Vec<Table>) -> Self {
        Self::Tables(tables)
    }
}

/// Parses a schema description into its tables without validating them.
///
/// # Errors
///
/// Returns a [`SchemaError`] when the description cannot be parsed.
pub fn parse_tables(input: &SchemaInput) -> Result<Vec<Table>, SchemaError> {
    match input {
        SchemaInput::Text(sql) => parse_ddl(sql),
        SchemaInput::Structured(schema) => schema.to_tables(),
        SchemaInput::Tables(tables) => Ok(tables.clone()),
    }
}

/// Parses and validates a schema description.
///
/// Index requests of a [`StructuredSchema`] are applied to the model.
///
/// # Errors
///
/// Returns a [`SchemaError`] for unparseable text, unknown types, dangling
/// foreign keys, duplicate names or an unsatisfiable foreign-key cycle.
pub fn parse(input: impl Into<SchemaInput>) -> Result<RelationalModel, SchemaError> {
    let input = input.into();
    let tables = parse_tables(&input)?;
    debug!(tables = tables.len(), "Parsed schema");

    let model = RelationalModel::build(tables)?;
    match &input {
        SchemaInput::Structured(schema) if !schema.indexes.is_empty() => {
            model.with_indexes(&schema.indexes)
        }
        _ => Ok(model),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemarepo_core::{Column, ColumnType, IndexSpec};

    #[test]
    fn test_parse_text() {
        let model = parse("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);").unwrap();
        assert_eq!(model.len(), 1);
        assert!(model.table("t").is_some());
    }

    #[test]
    fn test_parse_tables_in_code() {
        let table = Table::new("t").with_column(Column::new("id", ColumnType::Integer));
        let model = parse(vec![table]).unwrap();
        assert_eq!(model.table("t").unwrap().columns.len(), 1);
    }

    #[test]
    fn test_parse_empty_text() {
        assert_eq!(parse("-- nothing here").unwrap_err(), SchemaError::EmptySchema);
    }

    #[test]
    fn test_parse_rejects_dangling_foreign_key() {
        let err = parse("CREATE TABLE posts (user_id INTEGER REFERENCES users(id));").unwrap_err();
        assert!(matches!(err, SchemaError::UnknownTable { table, .. } if table == "users"));
    }

    #[test]
    fn test_parse_rejects_duplicate_table() {
        let err = parse(
            "CREATE TABLE t (id INTEGER);
             CREATE TABLE t (id INTEGER);",
        )
        .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateTable("t".to_string()));
    }

    #[test]
    fn test_parse_structured_applies_indexes() {
        let schema = StructuredSchema {
            tables: TableSpecs::new()
                .with(
                    "users",
                    TableSpec::new()
                        .with("id", "INTEGER PRIMARY KEY")
                        .with("email", "TEXT"),
                )
                .with(
                    "posts",
                    TableSpec::new()
                        .with("id", "INTEGER PRIMARY KEY")
                        .with("user_id", "INTEGER"),
                ),
            foreign_keys: Vec::new(),
            indexes: vec![IndexSpec::column("email")],
        };
        let model = parse(schema).unwrap();
        assert_eq!(model.table("users").unwrap().indexes[0].name, "idx_users_email");
        assert!(model.table("posts").unwrap().indexes.is_empty());
    }
}
