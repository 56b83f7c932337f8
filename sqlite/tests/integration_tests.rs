//! Integration tests for the schemarepo-sqlite crate.

use chrono::{NaiveDate, NaiveDateTime};
use schemarepo_parser::StructuredSchema;
use schemarepo_sqlite::{
    Filters, InstanceRegistry, ManagerConfig, ManagerState, Params, RepoError, RepositoryManager,
    Value,
};
use tempfile::TempDir;

const SHOP: &str = r#"
CREATE TABLE customers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT UNIQUE,
    vip BOOLEAN DEFAULT FALSE,
    joined TIMESTAMP,
    avatar BLOB,
    balance REAL
);

CREATE TABLE orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL,
    status TEXT DEFAULT 'new',
    FOREIGN KEY (customer_id) REFERENCES customers (id)
);

CREATE TABLE order_items (
    order_id INTEGER NOT NULL REFERENCES orders (id),
    line INTEGER NOT NULL,
    product TEXT NOT NULL,
    PRIMARY KEY (order_id, line)
);

CREATE TABLE nodes (
    id INTEGER PRIMARY KEY,
    parent_id INTEGER REFERENCES nodes (id)
);
"#;

fn config(dir: &TempDir) -> ManagerConfig {
    ManagerConfig::new(dir.path().join("hive"), "shop.db")
}

async fn setup() -> (TempDir, RepositoryManager) {
    let dir = tempfile::tempdir().unwrap();
    let manager = RepositoryManager::open(SHOP, config(&dir), InstanceRegistry::new())
        .await
        .unwrap();
    (dir, manager)
}

async fn add_customer(manager: &RepositoryManager, name: &str) -> i64 {
    let customers = manager.repository("customers").unwrap();
    let record = customers.record().with("name", name).unwrap();
    customers
        .save_single(record)
        .await
        .unwrap()
        .get_as("id")
        .unwrap()
}

async fn add_order(manager: &RepositoryManager, customer_id: i64, products: &[&str]) -> i64 {
    let orders = manager.repository("orders").unwrap();
    let order = orders.record().with("customer_id", customer_id).unwrap();
    let order_id: i64 = orders.save_single(order).await.unwrap().get_as("id").unwrap();

    let items = manager.repository("order_items").unwrap();
    let lines = products
        .iter()
        .enumerate()
        .map(|(i, product)| {
            items
                .record()
                .with("order_id", order_id)
                .unwrap()
                .with("line", i as i64 + 1)
                .unwrap()
                .with("product", *product)
                .unwrap()
        })
        .collect();
    items.save_many(lines).await.unwrap();
    order_id
}

// ---------------------------------------------------------------------------
// Save and load
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_round_trip_all_value_types() {
    let (_dir, manager) = setup().await;
    let customers = manager.repository("customers").unwrap();

    let joined: NaiveDateTime = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_milli_opt(9, 30, 0, 250)
        .unwrap();
    let record = customers
        .record()
        .with("name", "Alice")
        .unwrap()
        .with("email", "alice@example.com")
        .unwrap()
        .with("vip", true)
        .unwrap()
        .with("joined", joined)
        .unwrap()
        .with("avatar", vec![0u8, 1, 2, 255])
        .unwrap()
        .with("balance", 12.5)
        .unwrap();

    let saved = customers.save_single(record).await.unwrap();
    assert_eq!(saved.get_as::<i64>("id").unwrap(), 1);

    let loaded = customers
        .load_single(Filters::new().with("id", 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, saved);
    assert_eq!(loaded.get_as::<String>("name").unwrap(), "Alice");
    assert!(loaded.get_as::<bool>("vip").unwrap());
    assert_eq!(loaded.get_as::<NaiveDateTime>("joined").unwrap(), joined);
    assert_eq!(loaded.get("avatar"), Some(&Value::Binary(vec![0, 1, 2, 255])));
    assert_eq!(loaded.get_as::<f64>("balance").unwrap(), 12.5);
}

#[tokio::test]
async fn test_nulls_and_engine_defaults() {
    let (_dir, manager) = setup().await;
    let customers = manager.repository("customers").unwrap();

    let saved = customers
        .save_single(customers.record().with("name", "Bob").unwrap())
        .await
        .unwrap();

    assert_eq!(saved.get("email"), Some(&Value::Null));
    assert_eq!(saved.get_as::<Option<String>>("email").unwrap(), None);
    assert_eq!(saved.get_as::<Option<NaiveDateTime>>("joined").unwrap(), None);
    // Omitted so the declared default applies.
    assert_eq!(saved.get("vip"), Some(&Value::Boolean(false)));

    let orders = manager.repository("orders").unwrap();
    let order = orders
        .save_single(orders.record().with("customer_id", saved.get_as::<i64>("id").unwrap()).unwrap())
        .await
        .unwrap();
    assert_eq!(order.get_as::<String>("status").unwrap(), "new");
}

#[tokio::test]
async fn test_save_updates_existing_row() {
    let (_dir, manager) = setup().await;
    let customers = manager.repository("customers").unwrap();

    let saved = customers
        .save_single(customers.record().with("name", "Alice").unwrap())
        .await
        .unwrap();
    let renamed = saved.with("name", "Alicia").unwrap();
    customers.save_single(renamed.clone()).await.unwrap();

    assert_eq!(customers.count(Filters::new()).await.unwrap(), 1);
    let loaded = customers.load_single(Filters::new().with("id", 1)).await.unwrap();
    assert_eq!(loaded, Some(renamed));
}

#[tokio::test]
async fn test_composite_primary_key_upsert() {
    let (_dir, manager) = setup().await;
    let customer_id = add_customer(&manager, "Alice").await;
    let order_id = add_order(&manager, customer_id, &["pen", "ink"]).await;

    let items = manager.repository("order_items").unwrap();
    let replacement = items
        .record()
        .with("order_id", order_id)
        .unwrap()
        .with("line", 2)
        .unwrap()
        .with("product", "paper")
        .unwrap();
    items.save_single(replacement).await.unwrap();

    let loaded = items
        .load_many(Filters::new().with("order_id", order_id))
        .await
        .unwrap();
    let products: Vec<String> = loaded.iter().map(|r| r.get_as("product").unwrap()).collect();
    assert_eq!(products, vec!["pen", "paper"]);
}

#[tokio::test]
async fn test_load_single_no_match() {
    let (_dir, manager) = setup().await;
    let customers = manager.repository("customers").unwrap();
    let found = customers
        .load_single(Filters::new().with("name", "nobody"))
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_load_single_ambiguous() {
    let (_dir, manager) = setup().await;
    let customer_id = add_customer(&manager, "Alice").await;
    add_order(&manager, customer_id, &[]).await;
    add_order(&manager, customer_id, &[]).await;
    add_order(&manager, customer_id, &[]).await;

    let orders = manager.repository("orders").unwrap();
    let err = orders
        .load_single(Filters::new().with("customer_id", customer_id))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::AmbiguousResultError { count: 3, .. }));
}

#[tokio::test]
async fn test_filter_on_null() {
    let (_dir, manager) = setup().await;
    let nodes = manager.repository("nodes").unwrap();
    for (id, parent) in [(1, None), (2, Some(1)), (3, None)] {
        let node = nodes
            .record()
            .with("id", id)
            .unwrap()
            .with("parent_id", parent.map(i64::from))
            .unwrap();
        nodes.save_single(node).await.unwrap();
    }

    let roots = nodes
        .load_many(Filters::new().with("parent_id", Value::Null))
        .await
        .unwrap();
    assert_eq!(roots.len(), 2);
}

#[tokio::test]
async fn test_unknown_filter_column_on_every_table() {
    let (_dir, manager) = setup().await;

    for repository in manager.repositories().unwrap().iter() {
        let filters = Filters::new().with("no_such_column", 1);
        let err = repository.load_many(filters.clone()).await.unwrap_err();
        assert!(
            matches!(&err, RepoError::FilterError { table, column }
                if table == repository.name() && column == "no_such_column"),
            "{err}"
        );
        assert!(matches!(
            repository.load_single(filters.clone()).await,
            Err(RepoError::FilterError { .. })
        ));
        assert!(matches!(
            repository.delete(filters).await,
            Err(RepoError::FilterError { .. })
        ));
    }
}

#[tokio::test]
async fn test_foreign_key_enforced_on_save() {
    let (_dir, manager) = setup().await;
    let orders = manager.repository("orders").unwrap();
    let err = orders
        .save_single(orders.record().with("customer_id", 42).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::PersistenceError(_)));
}

#[tokio::test]
async fn test_save_many_is_atomic() {
    let (_dir, manager) = setup().await;
    let customers = manager.repository("customers").unwrap();

    let good = customers.record().with("name", "Alice").unwrap();
    // NOT NULL name left unset.
    let bad = customers.record().with("email", "x@example.com").unwrap();

    let err = customers.save_many(vec![good, bad]).await.unwrap_err();
    assert!(matches!(err, RepoError::PersistenceError(_)));
    assert_eq!(customers.count(Filters::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_save_record_of_other_table() {
    let (_dir, manager) = setup().await;
    let customers = manager.repository("customers").unwrap();
    let orders = manager.repository("orders").unwrap();

    let err = orders
        .save_single(customers.record().with("name", "Alice").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::RecordError(_)));
}

#[tokio::test]
async fn test_concurrent_saves_are_serialized() {
    let (_dir, manager) = setup().await;
    let customers = manager.repository("customers").unwrap().clone();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let customers = customers.clone();
            tokio::spawn(async move {
                let record = customers.record().with("name", format!("c{i}")).unwrap();
                customers.save_single(record).await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(customers.count(Filters::new()).await.unwrap(), 8);
}

// ---------------------------------------------------------------------------
// Cascade delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_delete_cascades_through_dependents() {
    let (_dir, manager) = setup().await;
    let alice = add_customer(&manager, "Alice").await;
    let bob = add_customer(&manager, "Bob").await;
    add_order(&manager, alice, &["pen", "ink"]).await;
    add_order(&manager, alice, &["paper", "glue"]).await;
    add_order(&manager, bob, &["stapler"]).await;

    let customers = manager.repository("customers").unwrap();
    let removed = customers
        .delete(Filters::new().with("id", alice))
        .await
        .unwrap();
    // Alice, two orders, four items.
    assert_eq!(removed, 7);

    let orders = manager.repository("orders").unwrap();
    let items = manager.repository("order_items").unwrap();
    assert_eq!(customers.count(Filters::new()).await.unwrap(), 1);
    assert_eq!(orders.count(Filters::new()).await.unwrap(), 1);
    assert_eq!(items.count(Filters::new()).await.unwrap(), 1);
    assert_eq!(
        orders.count(Filters::new().with("customer_id", alice)).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_delete_self_referencing_chain() {
    let (_dir, manager) = setup().await;
    let nodes = manager.repository("nodes").unwrap();
    for (id, parent) in [(1, None), (2, Some(1)), (3, Some(2)), (4, None)] {
        let node = nodes
            .record()
            .with("id", id)
            .unwrap()
            .with("parent_id", parent.map(i64::from))
            .unwrap();
        nodes.save_single(node).await.unwrap();
    }

    let removed = nodes.delete(Filters::new().with("id", 1)).await.unwrap();
    assert_eq!(removed, 3);

    let left = nodes.load_many(Filters::new()).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].get_as::<i64>("id").unwrap(), 4);
}

#[tokio::test]
async fn test_delete_rolls_back_when_engine_aborts() {
    let (_dir, manager) = setup().await;
    let alice = add_customer(&manager, "Alice").await;
    add_order(&manager, alice, &["pen"]).await;
    add_order(&manager, alice, &["ink"]).await;

    manager
        .connection()
        .unwrap()
        .execute(
            "CREATE TRIGGER no_customer_delete BEFORE DELETE ON customers \
             BEGIN SELECT RAISE(ABORT, 'no'); END",
            Params::None,
        )
        .await
        .unwrap();

    let customers = manager.repository("customers").unwrap();
    let err = customers
        .delete(Filters::new().with("id", alice))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::PersistenceError(_)));

    let orders = manager.repository("orders").unwrap();
    let items = manager.repository("order_items").unwrap();
    assert_eq!(orders.count(Filters::new()).await.unwrap(), 2);
    assert_eq!(items.count(Filters::new()).await.unwrap(), 2);
    assert!(
        customers
            .load_single(Filters::new().with("id", alice))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_delete_without_matches() {
    let (_dir, manager) = setup().await;
    add_customer(&manager, "Alice").await;
    let customers = manager.repository("customers").unwrap();
    let removed = customers
        .delete(Filters::new().with("name", "nobody"))
        .await
        .unwrap();
    assert_eq!(removed, 0);
    assert_eq!(customers.count(Filters::new()).await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Custom queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_custom_query_named_params() {
    let (_dir, manager) = setup().await;
    let alice = add_customer(&manager, "Alice").await;
    add_customer(&manager, "Bob").await;
    add_order(&manager, alice, &[]).await;
    add_order(&manager, alice, &[]).await;

    let customers = manager.repository("customers").unwrap();
    let rows = customers
        .custom_query(
            "SELECT c.name AS name, COUNT(o.id) AS order_count \
             FROM customers c LEFT JOIN orders o ON o.customer_id = c.id \
             WHERE c.name = :name GROUP BY c.id",
            Params::named().with("name", "Alice"),
        )
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].shape().name(), "custom_query");
    assert_eq!(rows[0].get_as::<String>("name").unwrap(), "Alice");
    assert_eq!(rows[0].get_as::<i64>("order_count").unwrap(), 2);
}

#[tokio::test]
async fn test_custom_query_positional_params() {
    let (_dir, manager) = setup().await;
    add_customer(&manager, "Alice").await;
    add_customer(&manager, "Bob").await;

    let customers = manager.repository("customers").unwrap();
    let rows = customers
        .custom_query(
            "SELECT id, name FROM customers WHERE id > ?1 ORDER BY id",
            Params::positional([Value::Integer(0)]),
        )
        .await
        .unwrap();
    let names: Vec<String> = rows.iter().map(|r| r.get_as("name").unwrap()).collect();
    assert_eq!(names, vec!["Alice", "Bob"]);
}

#[tokio::test]
async fn test_custom_query_wrong_param_count() {
    let (_dir, manager) = setup().await;
    let customers = manager.repository("customers").unwrap();
    let err = customers
        .custom_query("SELECT * FROM customers WHERE id = ?1", Params::None)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::PersistenceError(_)));
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_second_manager_on_same_database_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let registry = InstanceRegistry::new();

    let mut first = RepositoryManager::open(SHOP, config(&dir), registry.clone())
        .await
        .unwrap();

    let err = RepositoryManager::open(SHOP, config(&dir), registry.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::AlreadyInitializedError(path) if path == config(&dir).db_path()));

    first.clean_up(false).await.unwrap();
    let second = RepositoryManager::open(SHOP, config(&dir), registry)
        .await
        .unwrap();
    assert_eq!(second.state(), ManagerState::Ready);
}

#[tokio::test]
async fn test_clean_up_by_rejected_manager_leaves_active_database() {
    let dir = tempfile::tempdir().unwrap();
    let registry = InstanceRegistry::new();

    let first = RepositoryManager::open(SHOP, config(&dir), registry.clone())
        .await
        .unwrap();

    let mut second = RepositoryManager::new(config(&dir), registry.clone());
    let err = second.init(SHOP).await.unwrap_err();
    assert!(matches!(err, RepoError::AlreadyInitializedError(_)));

    let err = second.clean_up(false).await.unwrap_err();
    assert!(matches!(err, RepoError::AlreadyInitializedError(_)));
    assert!(first.db_path().exists());

    let err = RepositoryManager::open(SHOP, config(&dir), registry)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::AlreadyInitializedError(_)));

    add_customer(&first, "Alice").await;
    let customers = first.repository("customers").unwrap();
    assert_eq!(customers.count(Filters::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_equivalent_paths_share_registry_entry() {
    let dir = tempfile::tempdir().unwrap();
    let registry = InstanceRegistry::new();
    std::fs::create_dir_all(dir.path().join("x")).unwrap();

    let mut first = RepositoryManager::open(SHOP, config(&dir), registry.clone())
        .await
        .unwrap();

    let detour = ManagerConfig::new(dir.path().join("x").join("..").join("hive"), "shop.db");
    let err = RepositoryManager::open(SHOP, detour.clone(), registry.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::AlreadyInitializedError(_)));

    first.clean_up(false).await.unwrap();
    let second = RepositoryManager::open(SHOP, detour, registry).await.unwrap();
    assert_eq!(second.state(), ManagerState::Ready);
}

#[tokio::test]
async fn test_existing_database_keeps_rows() {
    let dir = tempfile::tempdir().unwrap();
    {
        let manager = RepositoryManager::open(SHOP, config(&dir), InstanceRegistry::new())
            .await
            .unwrap();
        add_customer(&manager, "Alice").await;
        manager.connection().unwrap().close().await.unwrap();
    }

    let manager = RepositoryManager::open(SHOP, config(&dir), InstanceRegistry::new())
        .await
        .unwrap();
    let model = manager.model().unwrap().clone();
    manager.connection().unwrap().ensure_schema(&model).await.unwrap();

    let customers = manager.repository("customers").unwrap();
    assert_eq!(customers.count(Filters::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_clean_up_is_idempotent() {
    let (dir, mut manager) = setup().await;
    let customers = manager.repository("customers").unwrap().clone();
    let db_path = manager.db_path();
    assert!(db_path.exists());

    manager.clean_up(false).await.unwrap();
    assert_eq!(manager.state(), ManagerState::Closed);
    assert!(!db_path.exists());
    assert!(dir.path().join("hive").exists());

    manager.clean_up(false).await.unwrap();
    manager.clean_up(true).await.unwrap();
    assert!(!dir.path().join("hive").exists());

    let err = customers.load_many(Filters::new()).await.unwrap_err();
    assert!(matches!(err, RepoError::ConnectionClosed));
    assert!(matches!(
        manager.repository("customers"),
        Err(RepoError::LifecycleError { .. })
    ));
}

#[tokio::test]
async fn test_unknown_repository() {
    let (_dir, manager) = setup().await;
    assert!(matches!(
        manager.repository("invoices"),
        Err(RepoError::SchemaError(_))
    ));
}

#[tokio::test]
async fn test_structured_schema_with_config_indexes() {
    let yaml = r#"
tables:
  users:
    id: INTEGER PRIMARY KEY AUTOINCREMENT
    email: TEXT NOT NULL
  posts:
    id: INTEGER PRIMARY KEY AUTOINCREMENT
    user_id: INTEGER NOT NULL
    title: TEXT
    FOREIGN KEY(user_id): REFERENCES users(id)
"#;
    let schema: StructuredSchema = serde_yaml::from_str(yaml).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir).with_index(schemarepo_core::IndexSpec::column("user_id"));
    let manager = RepositoryManager::open(schema, config, InstanceRegistry::new())
        .await
        .unwrap();

    let names: Vec<&str> = manager.repositories().unwrap().names().collect();
    assert_eq!(names, vec!["users", "posts"]);

    let indexes = manager
        .connection()
        .unwrap()
        .query(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND name = ?1",
            Params::positional([Value::from("idx_posts_user_id")]),
        )
        .await
        .unwrap();
    assert_eq!(indexes.rows.len(), 1);
}
