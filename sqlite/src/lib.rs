//! SQLite repositories generated from a relational schema.
//!
//! Given a schema (DDL text or a structured mapping), this crate creates the
//! tables in a SQLite file and hands out one [`Repository`] per table for
//! saving, loading and deleting records. Deletes cascade through every
//! foreign key pointing at the removed rows, whatever `ON DELETE` action the
//! schema declares.
//!
//! # Architecture
//!
//! - **`connection`**: the single shared connection, serialized behind an
//!   async lock, with statements run on the blocking pool
//! - **`schema`**: `CREATE TABLE` / `CREATE INDEX` generation in creation order
//! - **`value`** / **`record`**: typed values and records shaped after a table
//! - **`repository`** / **`factory`**: per-table CRUD and cascade delete
//! - **`manager`**: lifecycle facade with teardown and an instance registry
//! - **`config`**: folder, database name and index requests, as YAML
//!
//! # Quick start
//!
//! ```no_run
//! use schemarepo_sqlite::{Filters, InstanceRegistry, ManagerConfig, RepositoryManager};
//!
//! # async fn run() -> schemarepo_sqlite::Result<()> {
//! let schema = "
//!     CREATE TABLE customers (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);
//!     CREATE TABLE orders (
//!         id INTEGER PRIMARY KEY AUTOINCREMENT,
//!         customer_id INTEGER NOT NULL REFERENCES customers (id)
//!     );
//! ";
//! let mut manager =
//!     RepositoryManager::open(schema, ManagerConfig::default(), InstanceRegistry::new()).await?;
//!
//! let customers = manager.repository("customers")?;
//! let alice = customers.save_single(customers.record().with("name", "Alice")?).await?;
//! let id: i64 = alice.get_as("id")?;
//!
//! let orders = manager.repository("orders")?;
//! orders.save_single(orders.record().with("customer_id", id)?).await?;
//!
//! // Removes Alice and her orders.
//! assert_eq!(customers.delete(Filters::new().with("id", id)).await?, 2);
//!
//! manager.clean_up(true).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod error;
mod factory;
mod manager;
mod record;
mod repository;
mod schema;
mod value;

pub use config::{DEFAULT_DB_NAME, DEFAULT_FOLDER, ManagerConfig};
pub use connection::{ConnectionManager, Params, ResultSet};
pub use error::{RepoError, Result};
pub use factory::{Repositories, build_all};
pub use manager::{InstanceRegistry, ManagerState, RepositoryManager};
pub use record::{Field, Record, RecordShape};
pub use repository::{Filters, Repository};
pub use schema::{create_index_sql, create_table_sql, generate_schema_sql};
pub use value::{FromValue, TIMESTAMP_FORMAT, Value, parse_timestamp};
