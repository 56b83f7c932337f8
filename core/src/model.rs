//! The validated relational model and its table orderings.
//!
//! A [`RelationalModel`] is built once from a list of tables and is
//! read-only afterwards. Building it validates the tables, resolves implicit
//! foreign-key targets, applies index specs and caches the creation order.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::validate::{SchemaError, validate_identifier, validate_tables};
use crate::{ForeignKey, Index, IndexSpec, Table};

/// Validated tables plus their foreign-key graph.
///
/// # Examples
///
/// ```
/// use schemarepo_core::*;
///
/// let orders = Table::new("orders")
///     .with_column(Column::new("id", ColumnType::Integer).primary_key())
///     .with_column(Column::new("customer_id", ColumnType::Integer))
///     .with_reference("customer_id", "customers", "id");
/// let customers = Table::new("customers")
///     .with_column(Column::new("id", ColumnType::Integer).primary_key());
///
/// // Declared dependents-first; creation order puts customers first.
/// let model = RelationalModel::build(vec![orders, customers]).unwrap();
/// let order: Vec<_> = model.creation_order().iter().map(|t| t.name.as_str()).collect();
/// assert_eq!(order, ["customers", "orders"]);
///
/// let dependents = model.dependents_of("customers");
/// assert_eq!(dependents[0].table, "orders");
/// ```
#[derive(Debug, Clone)]
pub struct RelationalModel {
    tables: Vec<Table>,
    positions: HashMap<String, usize>,
    creation_order: Vec<usize>,
}

impl RelationalModel {
    /// Validates `tables` and builds the model.
    ///
    /// Foreign keys declared without referenced columns are pointed at the
    /// target's primary key.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] found by validation, or
    /// [`SchemaError::CyclicSchemaError`] when no creation order exists.
    pub fn build(mut tables: Vec<Table>) -> Result<Self, SchemaError> {
        validate_tables(&tables)?;

        resolve_implicit_references(&mut tables);

        let positions = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        let creation_order = compute_creation_order(&tables)?;

        debug!(
            tables = tables.len(),
            order = ?creation_order.iter().map(|&i| tables[i].name.as_str()).collect::<Vec<_>>(),
            "Built relational model"
        );

        Ok(Self {
            tables,
            positions,
            creation_order,
        })
    }

    /// Returns a new model with `specs` materialized as table indexes.
    ///
    /// A spec bound to a table must name existing columns; an unbound spec is
    /// applied to every table that has all of its columns and silently skips
    /// the others. Indexes whose name already exists on the table are not
    /// duplicated.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownTable`] or [`SchemaError::UnknownColumn`]
    /// for a bound spec that does not fit, or
    /// [`SchemaError::InvalidIdentifier`] for an unusable index name.
    pub fn with_indexes(mut self, specs: &[IndexSpec]) -> Result<Self, SchemaError> {
        for spec in specs {
            for column in &spec.columns {
                validate_identifier("column", column)?;
            }
            let targets: Vec<usize> = match &spec.table {
                Some(name) => {
                    let &pos = self.positions.get(name).ok_or_else(|| SchemaError::UnknownTable {
                        context: "index spec".to_string(),
                        table: name.clone(),
                    })?;
                    let table = &self.tables[pos];
                    if let Some(missing) = spec.columns.iter().find(|c| !table.has_column(c)) {
                        return Err(SchemaError::UnknownColumn {
                            context: "index spec".to_string(),
                            table: name.clone(),
                            column: missing.clone(),
                        });
                    }
                    vec![pos]
                }
                None => self
                    .tables
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| spec.columns.iter().all(|c| t.has_column(c)))
                    .map(|(i, _)| i)
                    .collect(),
            };

            for pos in targets {
                let table = &mut self.tables[pos];
                let name = match &spec.name {
                    Some(name) if spec.table.is_some() => name.clone(),
                    _ => Index::default_name(&table.name, &spec.columns),
                };
                validate_identifier("index", &name)?;
                if table.indexes.iter().any(|i| i.name == name) {
                    continue;
                }
                table.indexes.push(Index {
                    name,
                    table: table.name.clone(),
                    columns: spec.columns.clone(),
                    unique: spec.unique,
                });
            }
        }
        Ok(self)
    }

    /// Tables in declaration order.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.positions.get(name).map(|&i| &self.tables[i])
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Tables ordered so every table follows the tables it references.
    ///
    /// Ties keep declaration order. Self-references never constrain the
    /// order; a cycle across tables is broken at a nullable foreign key.
    pub fn creation_order(&self) -> Vec<&Table> {
        self.creation_order.iter().map(|&i| &self.tables[i]).collect()
    }

    /// Reverse of [`creation_order`](Self::creation_order): dependents before
    /// the tables they depend on.
    pub fn cascade_order(&self) -> Vec<&Table> {
        self.creation_order
            .iter()
            .rev()
            .map(|&i| &self.tables[i])
            .collect()
    }

    /// Foreign keys in any table that point at `table`, self-references
    /// included, in declaration order.
    pub fn dependents_of(&self, table: &str) -> Vec<&ForeignKey> {
        self.tables
            .iter()
            .flat_map(|t| t.foreign_keys.iter())
            .filter(|fk| fk.referenced_table == table)
            .collect()
    }
}

fn resolve_implicit_references(tables: &mut [Table]) {
    let primary_keys: HashMap<String, Vec<String>> = tables
        .iter()
        .map(|t| {
            let pk = t.primary_key().iter().map(|c| c.name.clone()).collect();
            (t.name.clone(), pk)
        })
        .collect();

    for table in tables.iter_mut() {
        for fk in &mut table.foreign_keys {
            if fk.referenced_columns.is_empty() {
                if let Some(pk) = primary_keys.get(&fk.referenced_table) {
                    fk.referenced_columns = pk.clone();
                }
            }
        }
    }
}

/// Edge strength between an owning table and a referenced table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    /// At least one owning column may be NULL, so rows can be inserted before
    /// the referenced table has any.
    Soft,
    /// Every owning column is NOT NULL.
    Hard,
}

fn compute_creation_order(tables: &[Table]) -> Result<Vec<usize>, SchemaError> {
    let positions: HashMap<&str, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    // deps[i] = (referenced table, strongest edge) for every non-self reference
    let mut deps: Vec<HashMap<usize, Edge>> = vec![HashMap::new(); tables.len()];
    for (i, table) in tables.iter().enumerate() {
        for fk in table.foreign_keys.iter().filter(|fk| !fk.is_self_reference()) {
            let Some(&j) = positions.get(fk.referenced_table.as_str()) else {
                continue;
            };
            let hard = fk
                .columns
                .iter()
                .all(|c| table.column(c).is_some_and(|col| !col.nullable));
            let edge = if hard { Edge::Hard } else { Edge::Soft };
            let entry = deps[i].entry(j).or_insert(edge);
            if edge == Edge::Hard {
                *entry = Edge::Hard;
            }
        }
    }

    let mut emitted = vec![false; tables.len()];
    let mut order = Vec::with_capacity(tables.len());

    while order.len() < tables.len() {
        let ready = (0..tables.len())
            .find(|&i| !emitted[i] && deps[i].keys().all(|&j| emitted[j]));

        let next = match ready {
            Some(i) => i,
            None => {
                let breakable = (0..tables.len()).find(|&i| {
                    !emitted[i]
                        && deps[i]
                            .iter()
                            .all(|(&j, &edge)| emitted[j] || edge == Edge::Soft)
                });
                match breakable {
                    Some(i) => {
                        warn!(
                            table = %tables[i].name,
                            "Breaking foreign-key cycle at nullable reference"
                        );
                        i
                    }
                    None => {
                        let remaining = (0..tables.len())
                            .filter(|&i| !emitted[i])
                            .map(|i| tables[i].name.clone())
                            .collect();
                        return Err(SchemaError::CyclicSchemaError(remaining));
                    }
                }
            }
        };

        emitted[next] = true;
        order.push(next);
    }

    Ok(order)
}
