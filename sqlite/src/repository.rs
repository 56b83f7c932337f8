//! Per-table repositories.
//!
//! A [`Repository`] is bound to one table of the model and the shared
//! [`ConnectionManager`]. It generates every statement from the table
//! definition: column lists, upsert clauses and filters are built from
//! validated identifiers, and values are always bound as parameters.
//!
//! # Cascade delete
//!
//! [`Repository::delete`] removes every row that transitively references a
//! deleted row, whatever `ON DELETE` action the schema declares. Rows are
//! visited depth-first with an explicit stack and a visited set keyed by
//! `(table, rowid)`, so reference cycles between rows terminate. Each row is
//! removed after all of its dependents (post-order), foreign-key checks are
//! deferred to commit, and the whole cascade runs in one transaction.

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::Connection;
use schemarepo_core::{ColumnType, RelationalModel, SchemaError, Table};
use tracing::{debug, info};

use crate::connection::{ConnectionManager, Params, ResultSet, execute_on, query_on};
use crate::error::{RepoError, Result};
use crate::record::{Field, Record, RecordShape};
use crate::schema::quote;
use crate::value::Value;

/// Conjunction of `column = value` constraints.
///
/// A `NULL` value matches rows where the column is `NULL`.
///
/// # Examples
///
/// ```
/// use schemarepo_sqlite::Filters;
///
/// let filters = Filters::new().with("customer_id", 7).with("status", "open");
/// assert_eq!(filters.len(), 2);
///
/// let same: Filters = [("customer_id", 7)].into();
/// assert_eq!(same.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(Vec<(String, Value)>);

impl Filters {
    /// No constraints: matches every row.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((column.into(), value.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Filters {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// `"c1", "c2", ...` for every column of `table`.
fn select_list(table: &Table) -> String {
    table
        .columns
        .iter()
        .map(|c| quote(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds ` WHERE "a" IS ?1 AND ...` (empty without filters) and its values.
fn where_clause(filters: &Filters) -> (String, Vec<Value>) {
    if filters.is_empty() {
        return (String::new(), Vec::new());
    }
    let conditions: Vec<String> = filters
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{} IS ?{}", quote(column), i + 1))
        .collect();
    let values = filters.iter().map(|(_, v)| v.clone()).collect();
    (format!(" WHERE {}", conditions.join(" AND ")), values)
}

/// Rejects filters on columns the table does not have.
fn validate_filters(table: &Table, filters: &Filters) -> Result<()> {
    match filters.iter().find(|(column, _)| !table.has_column(column)) {
        Some((column, _)) => Err(RepoError::FilterError {
            table: table.name.clone(),
            column: column.to_string(),
        }),
        None => Ok(()),
    }
}

/// Selects rows of `table` and decodes them into records.
fn load_rows(
    conn: &Connection,
    table: &Table,
    shape: &Arc<RecordShape>,
    clause: &str,
    values: Vec<Value>,
    limit: Option<usize>,
) -> Result<Vec<Record>> {
    let mut sql = format!("SELECT {} FROM {}{}", select_list(table), quote(&table.name), clause);
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    debug!(statement = %sql, "Loading rows");

    let mut stmt = conn.prepare(&sql)?;
    Params::Positional(values).bind(&mut stmt)?;

    let mut records = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(table.columns.len());
        for (i, column) in table.columns.iter().enumerate() {
            values.push(Value::decode(row.get_ref(i)?, column.column_type));
        }
        records.push(Record::from_values(Arc::clone(shape), values)?);
    }
    Ok(records)
}

fn count_rows(conn: &Connection, table: &Table, filters: &Filters) -> Result<usize> {
    let (clause, values) = where_clause(filters);
    let sql = format!("SELECT COUNT(*) FROM {}{}", quote(&table.name), clause);
    let result = query_on(conn, &sql, &Params::Positional(values))?;
    match result.rows.first().and_then(|r| r.first()) {
        Some(Value::Integer(n)) => Ok(usize::try_from(*n).unwrap_or(0)),
        _ => Ok(0),
    }
}

/// Upsert statement for the given insert columns.
fn upsert_sql(table: &Table, columns: &[&str]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote(&table.name));
    }

    let names: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(&table.name),
        names.join(", "),
        placeholders.join(", ")
    );

    let primary_key = table.primary_key();
    if primary_key.is_empty() {
        return sql;
    }

    let key_names: Vec<String> = primary_key.iter().map(|c| quote(&c.name)).collect();
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !primary_key.iter().any(|k| k.name == **c))
        .map(|c| format!("{0} = excluded.{0}", quote(c)))
        .collect();

    sql.push_str(&format!(" ON CONFLICT ({})", key_names.join(", ")));
    if updates.is_empty() {
        sql.push_str(" DO NOTHING");
    } else {
        sql.push_str(&format!(" DO UPDATE SET {}", updates.join(", ")));
    }
    sql
}

/// Saves one record and reads the stored row back.
fn save_on(
    conn: &Connection,
    table: &Table,
    shape: &Arc<RecordShape>,
    record: &Record,
) -> Result<Record> {
    if **record.shape() != **shape {
        return Err(RepoError::RecordError(format!(
            "record of {} cannot be saved to {}",
            record.shape().name(),
            table.name
        )));
    }

    // NULL in a column the engine can fill means "let the engine fill it".
    let mut columns = Vec::new();
    let mut values = Vec::new();
    for (column, value) in table.columns.iter().zip(record.values()) {
        if value.is_null() && column.engine_assigned() {
            continue;
        }
        columns.push(column.name.as_str());
        values.push(value.clone());
    }

    let sql = upsert_sql(table, &columns);
    debug!(table = %table.name, statement = %sql, "Saving record");
    execute_on(conn, &sql, &Params::Positional(values))?;

    let primary_key = table.primary_key();
    let key_values: Option<Vec<Value>> = primary_key
        .iter()
        .map(|c| record.get(&c.name).filter(|v| !v.is_null()).cloned())
        .collect();

    let (clause, params) = match key_values {
        Some(values) if !primary_key.is_empty() => {
            let filters = primary_key
                .iter()
                .map(|c| c.name.as_str())
                .zip(values)
                .collect::<Filters>();
            where_clause(&filters)
        }
        _ => (
            " WHERE rowid = ?1".to_string(),
            vec![Value::Integer(conn.last_insert_rowid())],
        ),
    };

    load_rows(conn, table, shape, &clause, params, Some(1))?
        .into_iter()
        .next()
        .ok_or_else(|| {
            RepoError::RecordError(format!("saved row of {} could not be read back", table.name))
        })
}

/// A row reached by the cascade, with its raw stored values.
struct RowRef<'m> {
    table: &'m Table,
    rowid: i64,
    values: Vec<Value>,
}

enum Step<'m> {
    Visit(RowRef<'m>),
    Remove(&'m Table, i64),
}

/// Selects `rowid` plus every column, keeping storage-class values so they
/// compare equal when bound back into a statement.
fn select_row_refs<'m>(
    conn: &Connection,
    table: &'m Table,
    clause: &str,
    values: Vec<Value>,
) -> Result<Vec<RowRef<'m>>> {
    let sql = format!(
        "SELECT rowid, {} FROM {}{}",
        select_list(table),
        quote(&table.name),
        clause
    );
    let result = query_on(conn, &sql, &Params::Positional(values))?;

    let mut refs = Vec::with_capacity(result.rows.len());
    for mut row in result.rows {
        let rowid = match row.first() {
            Some(Value::Integer(id)) => *id,
            _ => {
                return Err(RepoError::RecordError(format!(
                    "row of {} has no integer rowid",
                    table.name
                )));
            }
        };
        row.remove(0);
        refs.push(RowRef {
            table,
            rowid,
            values: row,
        });
    }
    Ok(refs)
}

/// Rows of `fk.table` that reference `parent` through `fk`.
fn dependent_rows<'m>(
    conn: &Connection,
    model: &'m RelationalModel,
    fk: &schemarepo_core::ForeignKey,
    parent: &RowRef<'_>,
) -> Result<Vec<RowRef<'m>>> {
    let child = model.table(&fk.table).ok_or_else(|| SchemaError::UnknownTable {
        context: "cascade delete".to_string(),
        table: fk.table.clone(),
    })?;

    let mut conditions = Vec::with_capacity(fk.columns.len());
    let mut values = Vec::with_capacity(fk.columns.len());
    for (i, (column, referenced)) in fk.column_pairs().enumerate() {
        let value = parent
            .table
            .column_index(referenced)
            .map(|idx| parent.values[idx].clone())
            .unwrap_or(Value::Null);
        // NULL never satisfies a foreign key.
        if value.is_null() {
            return Ok(Vec::new());
        }
        conditions.push(format!("{} = ?{}", quote(column), i + 1));
        values.push(value);
    }

    let clause = format!(" WHERE {}", conditions.join(" AND "));
    select_row_refs(conn, child, &clause, values)
}

/// Deletes the rows matching `filters` and everything that depends on them.
fn delete_on(
    conn: &Connection,
    model: &RelationalModel,
    table: &Table,
    filters: &Filters,
) -> Result<usize> {
    conn.execute_batch("PRAGMA defer_foreign_keys = ON;")?;

    let (clause, values) = where_clause(filters);
    let roots = select_row_refs(conn, table, &clause, values)?;

    let mut stack: Vec<Step<'_>> = roots.into_iter().rev().map(Step::Visit).collect();
    let mut visited: HashSet<(&str, i64)> = HashSet::new();
    let mut removed = 0;

    while let Some(step) = stack.pop() {
        match step {
            Step::Visit(row) => {
                if !visited.insert((row.table.name.as_str(), row.rowid)) {
                    continue;
                }
                stack.push(Step::Remove(row.table, row.rowid));

                for fk in model.dependents_of(&row.table.name) {
                    let children = dependent_rows(conn, model, fk, &row)?;
                    for child in children.into_iter().rev() {
                        if !visited.contains(&(child.table.name.as_str(), child.rowid)) {
                            stack.push(Step::Visit(child));
                        }
                    }
                }
            }
            Step::Remove(table, rowid) => {
                let sql = format!("DELETE FROM {} WHERE rowid = ?1", quote(&table.name));
                let count = execute_on(conn, &sql, &Params::Positional(vec![Value::Integer(rowid)]))?;
                debug!(table = %table.name, rowid, "Removed row");
                removed += count;
            }
        }
    }

    Ok(removed)
}

/// Shape of a custom query result: one field per result column, typed by
/// the first non-null value (text when the column is all `NULL`).
fn infer_shape(label: &str, result: &ResultSet) -> RecordShape {
    let fields = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| Field {
            name: name.clone(),
            column_type: result
                .rows
                .iter()
                .find_map(|row| row[i].column_type())
                .unwrap_or(ColumnType::Text),
            nullable: result.rows.iter().any(|row| row[i].is_null()),
        })
        .collect();
    RecordShape::inferred(label, fields)
}

/// Data access for one table.
///
/// Repositories are created by [`build_all`](crate::build_all). They hold no
/// row cache; cloning one yields another handle on the same table and
/// connection.
#[derive(Debug, Clone)]
pub struct Repository {
    model: Arc<RelationalModel>,
    table: Arc<Table>,
    shape: Arc<RecordShape>,
    connection: ConnectionManager,
}

impl Repository {
    /// Repository for `table` of `model`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownTable`] if the model has no such table.
    pub fn new(
        model: Arc<RelationalModel>,
        table: &str,
        connection: ConnectionManager,
    ) -> Result<Self> {
        let definition = model.table(table).ok_or_else(|| SchemaError::UnknownTable {
            context: "repository".to_string(),
            table: table.to_string(),
        })?;
        let shape = Arc::new(RecordShape::from_table(definition));
        let table = Arc::new(definition.clone());
        Ok(Self {
            model,
            table,
            shape,
            connection,
        })
    }

    pub fn name(&self) -> &str {
        &self.table.name
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn shape(&self) -> &Arc<RecordShape> {
        &self.shape
    }

    /// Empty record of this table's shape, ready for [`Record::with`].
    pub fn record(&self) -> Record {
        Record::new(Arc::clone(&self.shape))
    }

    /// Inserts the record, or updates the row with the same primary key.
    ///
    /// Returns the stored row, including engine-assigned keys and defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::RecordError`] for a record of another shape and
    /// [`RepoError::PersistenceError`] for constraint violations.
    pub async fn save_single(&self, record: Record) -> Result<Record> {
        let (table, shape) = (Arc::clone(&self.table), Arc::clone(&self.shape));
        let saved = self
            .connection
            .run(move |conn| save_on(conn, &table, &shape, &record))
            .await?;
        debug!(table = %self.table.name, "Saved record");
        Ok(saved)
    }

    /// Saves every record in one transaction; any failure leaves the table
    /// untouched.
    ///
    /// # Errors
    ///
    /// Same as [`save_single`](Self::save_single).
    pub async fn save_many(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let (table, shape) = (Arc::clone(&self.table), Arc::clone(&self.shape));
        let saved = self
            .connection
            .transaction(move |tx| {
                records
                    .iter()
                    .map(|record| save_on(tx, &table, &shape, record))
                    .collect::<Result<Vec<_>>>()
            })
            .await?;
        info!(table = %self.table.name, count = saved.len(), "Saved records");
        Ok(saved)
    }

    /// Loads the single row matching `filters`.
    ///
    /// Returns `Ok(None)` when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::FilterError`] for an unknown column (before any
    /// engine call) and [`RepoError::AmbiguousResultError`] when more than
    /// one row matches.
    pub async fn load_single(&self, filters: impl Into<Filters>) -> Result<Option<Record>> {
        let filters = filters.into();
        validate_filters(&self.table, &filters)?;

        let (table, shape) = (Arc::clone(&self.table), Arc::clone(&self.shape));
        self.connection
            .run(move |conn| {
                let (clause, values) = where_clause(&filters);
                let mut records = load_rows(conn, &table, &shape, &clause, values, Some(2))?;
                if records.len() > 1 {
                    return Err(RepoError::AmbiguousResultError {
                        table: table.name.clone(),
                        count: count_rows(conn, &table, &filters)?,
                    });
                }
                Ok(records.pop())
            })
            .await
    }

    /// Loads every row matching `filters`, in storage order.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::FilterError`] for an unknown column (before any
    /// engine call).
    pub async fn load_many(&self, filters: impl Into<Filters>) -> Result<Vec<Record>> {
        let filters = filters.into();
        validate_filters(&self.table, &filters)?;

        let (table, shape) = (Arc::clone(&self.table), Arc::clone(&self.shape));
        self.connection
            .run(move |conn| {
                let (clause, values) = where_clause(&filters);
                load_rows(conn, &table, &shape, &clause, values, None)
            })
            .await
    }

    /// Number of rows matching `filters`.
    ///
    /// # Errors
    ///
    /// Same as [`load_many`](Self::load_many).
    pub async fn count(&self, filters: impl Into<Filters>) -> Result<usize> {
        let filters = filters.into();
        validate_filters(&self.table, &filters)?;

        let table = Arc::clone(&self.table);
        self.connection
            .run(move |conn| count_rows(conn, &table, &filters))
            .await
    }

    /// Deletes the rows matching `filters` together with every row that
    /// depends on them, as one atomic unit.
    ///
    /// Returns the number of rows removed across all tables.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::FilterError`] for an unknown column (before any
    /// engine call) and [`RepoError::PersistenceError`] on engine failure,
    /// in which case nothing is removed.
    pub async fn delete(&self, filters: impl Into<Filters>) -> Result<usize> {
        let filters = filters.into();
        validate_filters(&self.table, &filters)?;

        let (model, table) = (Arc::clone(&self.model), Arc::clone(&self.table));
        let removed = self
            .connection
            .transaction(move |tx| delete_on(tx, &model, &table, &filters))
            .await?;
        info!(table = %self.table.name, removed, "Deleted rows with dependents");
        Ok(removed)
    }

    /// Runs an arbitrary parameterized statement and returns one record per
    /// result row, shaped after the result columns.
    ///
    /// No cascade and no filter validation apply.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::PersistenceError`] on engine failure, including
    /// parameters that do not match the statement.
    pub async fn custom_query(
        &self,
        statement: impl Into<String>,
        params: Params,
    ) -> Result<Vec<Record>> {
        let statement = statement.into();
        let result = self
            .connection
            .run(move |conn| query_on(conn, &statement, &params))
            .await?;

        let shape = Arc::new(infer_shape("custom_query", &result));
        debug!(table = %self.table.name, rows = result.rows.len(), "Custom query returned");
        result
            .rows
            .into_iter()
            .map(|values| Record::from_values(Arc::clone(&shape), values))
            .collect()
    }
}
