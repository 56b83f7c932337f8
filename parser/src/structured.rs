//! Structured (mapping) schema input.
//!
//! Each table is an ordered mapping from column name to its declaration,
//! e.g. `"email": "TEXT UNIQUE NOT NULL"`. Table-level clauses use the clause
//! itself as the key:
//!
//! ```yaml
//! tables:
//!   orders:
//!     id: INTEGER PRIMARY KEY AUTOINCREMENT
//!     customer_id: INTEGER
//!     FOREIGN KEY(customer_id): REFERENCES customers(id) ON DELETE CASCADE
//!   order_items:
//!     order_id: INTEGER
//!     product_id: INTEGER
//!     PRIMARY KEY: (order_id, product_id)
//! ```
//!
//! Key order is preserved on deserialization because it is the column order
//! of the generated records.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use schemarepo_core::{ForeignKey, IndexSpec, SchemaError, Table};

use crate::ddl::parse_ddl;

/// Declarations of one table, in order: `(column or clause, declaration)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSpec {
    pub entries: Vec<(String, String)>,
}

impl TableSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column or clause.
    pub fn with(mut self, key: impl Into<String>, declaration: impl Into<String>) -> Self {
        self.entries.push((key.into(), declaration.into()));
        self
    }

    /// Renders the table as a `CREATE TABLE` statement.
    pub fn to_ddl(&self, table: &str) -> String {
        let body = self
            .entries
            .iter()
            .map(|(key, declaration)| format!("{key} {declaration}"))
            .collect::<Vec<_>>()
            .join(",\n    ");
        format!("CREATE TABLE {table} (\n    {body}\n);")
    }
}

/// Tables in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSpecs(pub Vec<(String, TableSpec)>);

impl TableSpecs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, table: impl Into<String>, spec: TableSpec) -> Self {
        self.0.push((table.into(), spec));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Structured schema: table mappings plus optional explicit foreign keys and
/// index requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredSchema {
    pub tables: TableSpecs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexSpec>,
}

impl StructuredSchema {
    pub fn new(tables: TableSpecs) -> Self {
        Self {
            tables,
            ..Self::default()
        }
    }

    /// Converts every table mapping to a [`Table`] and attaches the explicit
    /// foreign keys. Index requests are left to the caller.
    ///
    /// # Errors
    ///
    /// Any [`SchemaError`] raised while parsing a table's declarations, or
    /// [`SchemaError::UnknownTable`] for an explicit foreign key whose owning
    /// table is not declared.
    pub fn to_tables(&self) -> Result<Vec<Table>, SchemaError> {
        let mut tables = Vec::with_capacity(self.tables.len());

        for (name, spec) in &self.tables.0 {
            let ddl = spec.to_ddl(name);
            let mut parsed = parse_ddl(&ddl)?;
            let table = match parsed.len() {
                1 => parsed.remove(0),
                _ => {
                    return Err(SchemaError::Malformed {
                        statement: name.clone(),
                        reason: "table declarations must form exactly one table".to_string(),
                    });
                }
            };
            if table.name != *name {
                return Err(SchemaError::Malformed {
                    statement: name.clone(),
                    reason: format!("table key parses as table '{}'", table.name),
                });
            }
            tables.push(table);
        }

        for fk in &self.foreign_keys {
            let Some(owner) = tables.iter_mut().find(|t| t.name == fk.table) else {
                return Err(SchemaError::UnknownTable {
                    context: format!("foreign key ({})", fk.columns.join(", ")),
                    table: fk.table.clone(),
                });
            };
            owner.foreign_keys.push(fk.clone());
        }

        Ok(tables)
    }
}

impl Serialize for TableSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, declaration) in &self.entries {
            map.serialize_entry(key, declaration)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TableSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SpecVisitor;

        impl<'de> Visitor<'de> for SpecVisitor {
            type Value = TableSpec;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping from column name to declaration")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, String>()? {
                    entries.push(entry);
                }
                Ok(TableSpec { entries })
            }
        }

        deserializer.deserialize_map(SpecVisitor)
    }
}

impl Serialize for TableSpecs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, spec) in &self.0 {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TableSpecs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SpecsVisitor;

        impl<'de> Visitor<'de> for SpecsVisitor {
            type Value = TableSpecs;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping from table name to column declarations")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut tables = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, TableSpec>()? {
                    tables.push(entry);
                }
                Ok(TableSpecs(tables))
            }
        }

        deserializer.deserialize_map(SpecsVisitor)
    }
}
