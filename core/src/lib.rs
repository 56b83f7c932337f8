//! Relational model for schema-driven repositories.
//!
//! This crate defines the validated in-memory representation of a database
//! schema:
//!
//! - [`Table`]: ordered [`Column`]s plus owned [`ForeignKey`]s, [`Index`]es,
//!   table-level unique sets and CHECK clauses.
//! - [`ColumnType`]: the fixed primitive type set every declared SQL type is
//!   mapped onto.
//! - [`RelationalModel`]: the immutable model built from a table list, with a
//!   cached creation order (dependencies first), the reverse cascade order and
//!   a dependents lookup used by cascade deletion.
//!
//! Validation ([`validate_tables`]) reports the first [`SchemaError`] found:
//! duplicate names, unsafe identifiers, misplaced autoincrement, and foreign
//! keys pointing at missing tables or columns.
//!
//! # Example
//!
//! ```
//! use schemarepo_core::*;
//!
//! let nodes = Table::new("nodes")
//!     .with_column(Column::new("id", ColumnType::Integer).primary_key().autoincrement())
//!     .with_column(Column::new("parent_id", ColumnType::Integer))
//!     .with_reference("parent_id", "nodes", "id");
//!
//! let model = RelationalModel::build(vec![nodes]).unwrap();
//! assert_eq!(model.creation_order()[0].name, "nodes");
//! assert!(model.dependents_of("nodes")[0].is_self_reference());
//! ```

mod model;
mod types;
mod validate;

pub use model::RelationalModel;
pub use types::*;
pub use validate::{SchemaError, validate_identifier, validate_tables};
