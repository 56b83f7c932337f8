//! Builds one repository per table of a model.

use std::collections::HashMap;
use std::sync::Arc;

use schemarepo_core::{RelationalModel, SchemaError};
use tracing::debug;

use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::repository::Repository;

/// Repositories of a model, looked up by table name.
///
/// Iteration follows table creation order.
#[derive(Debug, Clone, Default)]
pub struct Repositories {
    by_name: HashMap<String, Repository>,
    order: Vec<String>,
}

impl Repositories {
    pub fn get(&self, table: &str) -> Option<&Repository> {
        self.by_name.get(table)
    }

    /// Like [`get`](Self::get), but an unknown table is an error.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownTable`].
    pub fn table(&self, table: &str) -> Result<&Repository> {
        self.by_name.get(table).ok_or_else(|| {
            SchemaError::UnknownTable {
                context: "repositories".to_string(),
                table: table.to_string(),
            }
            .into()
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Repository> {
        self.order.iter().filter_map(|name| self.by_name.get(name))
    }

    /// Table names in creation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Creates a repository for every table of `model`, all sharing
/// `connection`.
///
/// # Errors
///
/// Returns [`SchemaError::UnknownTable`] only if the model is inconsistent.
pub fn build_all(model: Arc<RelationalModel>, connection: &ConnectionManager) -> Result<Repositories> {
    let mut repositories = Repositories::default();
    for table in model.creation_order() {
        let repository = Repository::new(Arc::clone(&model), &table.name, connection.clone())?;
        repositories.order.push(table.name.clone());
        repositories.by_name.insert(table.name.clone(), repository);
    }
    debug!(count = repositories.len(), "Built repositories");
    Ok(repositories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemarepo_core::{Column, ColumnType, Table};

    #[tokio::test]
    async fn test_build_all_follows_creation_order() {
        let orders = Table::new("orders")
            .with_column(Column::new("id", ColumnType::Integer).primary_key())
            .with_column(Column::new("customer_id", ColumnType::Integer))
            .with_reference("customer_id", "customers", "id");
        let customers =
            Table::new("customers").with_column(Column::new("id", ColumnType::Integer).primary_key());
        let model = Arc::new(RelationalModel::build(vec![orders, customers]).unwrap());

        let connection = ConnectionManager::open_in_memory().await.unwrap();
        let repositories = build_all(model, &connection).unwrap();

        assert_eq!(repositories.len(), 2);
        assert_eq!(repositories.names().collect::<Vec<_>>(), vec!["customers", "orders"]);
        assert_eq!(repositories.get("orders").unwrap().name(), "orders");
        assert!(repositories.get("missing").is_none());
        assert!(repositories.table("missing").is_err());
    }
}
