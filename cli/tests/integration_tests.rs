use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const SCHEMA: &str = "
CREATE TABLE orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER NOT NULL REFERENCES customers (id)
);
CREATE TABLE customers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);
";

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_schemarepo"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run schemarepo")
}

fn write_schema(dir: &Path) -> PathBuf {
    let path = dir.join("shop.sql");
    fs::write(&path, SCHEMA).expect("failed to write schema");
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

#[test]
fn inspect_prints_creation_order_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let schema = write_schema(dir.path());

    let output = run(&["inspect", schema.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["creation_order"], serde_json::json!(["customers", "orders"]));
    assert_eq!(report["tables"][1]["name"], "orders");
}

#[test]
fn inspect_yaml_with_index() {
    let dir = tempfile::tempdir().unwrap();
    let schema = write_schema(dir.path());

    let output = run(&[
        "inspect",
        schema.to_str().unwrap(),
        "--format",
        "yaml",
        "--index",
        "customer_id",
    ]);
    assert!(output.status.success());

    let report: serde_yaml::Value = serde_yaml::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["creation_order"][0].as_str(), Some("customers"));
    assert!(stdout(&output).contains("idx_orders_customer_id"));
}

#[test]
fn inspect_rejects_bad_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.sql");
    fs::write(&path, "CREATE TABLE t (id WIDGET);").unwrap();

    let output = run(&["inspect", path.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
}

// ---------------------------------------------------------------------------
// init / query / clean
// ---------------------------------------------------------------------------

#[test]
fn init_query_and_clean() {
    let dir = tempfile::tempdir().unwrap();
    let schema = write_schema(dir.path());
    let folder = dir.path().join("data");
    let schema = schema.to_str().unwrap();
    let folder_arg = folder.to_str().unwrap();

    let output = run(&["init", schema, "--folder", folder_arg, "--db-name", "shop.db"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("Initialized 2 table(s)"));
    assert!(folder.join("shop.db").exists());

    let output = run(&[
        "query",
        schema,
        "--folder",
        folder_arg,
        "--db-name",
        "shop.db",
        "--table",
        "customers",
        "--sql",
        "INSERT INTO customers (name) VALUES (:name) RETURNING id, name",
        "--param",
        "name=Alice",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let rows: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(rows[0]["name"], "Alice");
    assert_eq!(rows[0]["id"], 1);

    let output = run(&["clean", "--folder", folder_arg, "--db-name", "shop.db"]);
    assert!(output.status.success());
    assert!(!folder.join("shop.db").exists());
    assert!(folder.exists());

    let output = run(&["clean", "--full", "--folder", folder_arg, "--db-name", "shop.db"]);
    assert!(output.status.success());
    assert!(!folder.exists());
}

#[test]
fn init_reads_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let schema = write_schema(dir.path());
    let folder = dir.path().join("hive");
    let config = dir.path().join("repo.yml");
    fs::write(
        &config,
        format!(
            "folder: {}\ndb_name: app.db\nindexes:\n  - columns: [customer_id]\n",
            folder.display()
        ),
    )
    .unwrap();

    let output = run(&[
        "init",
        schema.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(folder.join("app.db").exists());
}

#[test]
fn query_unknown_table_fails() {
    let dir = tempfile::tempdir().unwrap();
    let schema = write_schema(dir.path());
    let folder = dir.path().join("data");

    let output = run(&[
        "query",
        schema.to_str().unwrap(),
        "--folder",
        folder.to_str().unwrap(),
        "--table",
        "invoices",
        "--sql",
        "SELECT 1",
    ]);
    assert!(!output.status.success());
}
