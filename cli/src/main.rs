use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use schemarepo_core::{IndexSpec, Table};
use schemarepo_parser::{SchemaInput, StructuredSchema, TableSpecs};
use schemarepo_sqlite::{InstanceRegistry, ManagerConfig, Params, RepositoryManager, Value};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Output format for `inspect`.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliOutputFormat {
    Json,
    Yaml,
}

#[derive(Debug, Parser)]
#[command(name = "schemarepo")]
#[command(about = "Schema-driven SQLite repositories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse a schema and print its tables in creation order.
    Inspect(InspectArgs),
    /// Create the schema's tables and indexes in the configured database.
    Init(InitArgs),
    /// Run a parameterized statement and print the rows as JSON.
    Query(QueryArgs),
    /// Delete the configured database file, and with --full its folder.
    Clean(CleanArgs),
}

/// Where the database lives. Flags override values from `--config`.
#[derive(Debug, Args)]
struct DatabaseArgs {
    /// YAML manager configuration (folder, db_name, indexes).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Folder holding the database file.
    #[arg(long)]
    folder: Option<PathBuf>,
    /// Database file name inside the folder.
    #[arg(long)]
    db_name: Option<String>,
    /// Extra index on these comma-separated columns, on every table that has them.
    #[arg(long = "index")]
    indexes: Vec<String>,
}

#[derive(Debug, Args)]
struct InspectArgs {
    /// Schema file: .sql for DDL, .json/.yaml/.yml for a structured schema.
    schema: PathBuf,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: CliOutputFormat,
    /// Index requests applied before printing (comma-separated columns).
    #[arg(long = "index")]
    indexes: Vec<String>,
}

#[derive(Debug, Args)]
struct InitArgs {
    /// Schema file: .sql for DDL, .json/.yaml/.yml for a structured schema.
    schema: PathBuf,
    #[command(flatten)]
    database: DatabaseArgs,
}

#[derive(Debug, Args)]
struct QueryArgs {
    /// Schema file: .sql for DDL, .json/.yaml/.yml for a structured schema.
    schema: PathBuf,
    /// Table whose repository runs the statement.
    #[arg(long)]
    table: String,
    /// SQL statement, with `:name` placeholders for --param values.
    #[arg(long)]
    sql: String,
    /// Named parameter as name=value. Integers, reals and `null` are typed;
    /// anything else binds as text.
    #[arg(long = "param")]
    params: Vec<String>,
    #[command(flatten)]
    database: DatabaseArgs,
}

#[derive(Debug, Args)]
struct CleanArgs {
    /// Remove the database folder as well.
    #[arg(long)]
    full: bool,
    #[command(flatten)]
    database: DatabaseArgs,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Inspect(args) => run_inspect(args),
        Command::Init(args) => run_init(args).await,
        Command::Query(args) => run_query(args).await,
        Command::Clean(args) => run_clean(args).await,
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// inspect command
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct InspectReport<'a> {
    creation_order: Vec<&'a str>,
    tables: Vec<&'a Table>,
}

fn run_inspect(args: InspectArgs) -> Result<(), String> {
    let schema = read_schema(&args.schema)?;
    let indexes = parse_index_specs(&args.indexes);
    let model = schemarepo_parser::parse(schema)
        .and_then(|model| model.with_indexes(&indexes))
        .map_err(|e| format!("Failed to parse schema '{}': {e}", args.schema.display()))?;

    let tables = model.creation_order();
    let report = InspectReport {
        creation_order: tables.iter().map(|t| t.name.as_str()).collect(),
        tables,
    };

    let output = match args.format {
        CliOutputFormat::Json => serde_json::to_string_pretty(&report)
            .map_err(|e| format!("Failed to serialize model: {e}"))?,
        CliOutputFormat::Yaml => serde_yaml::to_string(&report)
            .map_err(|e| format!("Failed to serialize model: {e}"))?,
    };
    println!("{output}");
    Ok(())
}

// ---------------------------------------------------------------------------
// init command
// ---------------------------------------------------------------------------

async fn run_init(args: InitArgs) -> Result<(), String> {
    let schema = read_schema(&args.schema)?;
    let config = resolve_config(&args.database)?;
    let db_path = config.db_path();

    let manager = RepositoryManager::open(schema, config, InstanceRegistry::new())
        .await
        .map_err(|e| format!("Failed to initialize '{}': {e}", db_path.display()))?;
    let repositories = manager.repositories().map_err(|e| e.to_string())?;

    println!(
        "Initialized {} table(s) in '{}': {}",
        repositories.len(),
        db_path.display(),
        repositories.names().collect::<Vec<_>>().join(", ")
    );
    close(&manager).await
}

// ---------------------------------------------------------------------------
// query command
// ---------------------------------------------------------------------------

async fn run_query(args: QueryArgs) -> Result<(), String> {
    let schema = read_schema(&args.schema)?;
    let config = resolve_config(&args.database)?;
    let params = parse_params(&args.params)?;
    let db_path = config.db_path();

    let manager = RepositoryManager::open(schema, config, InstanceRegistry::new())
        .await
        .map_err(|e| format!("Failed to open '{}': {e}", db_path.display()))?;
    let repository = manager.repository(&args.table).map_err(|e| e.to_string())?;

    let rows = repository
        .custom_query(args.sql.as_str(), params)
        .await
        .map_err(|e| format!("Query failed: {e}"))?;
    let json = serde_json::to_string_pretty(&rows)
        .map_err(|e| format!("Failed to serialize rows: {e}"))?;
    println!("{json}");

    close(&manager).await
}

// ---------------------------------------------------------------------------
// clean command
// ---------------------------------------------------------------------------

async fn run_clean(args: CleanArgs) -> Result<(), String> {
    let config = resolve_config(&args.database)?;
    let folder = config.folder.clone();
    let db_path = config.db_path();

    let mut manager = RepositoryManager::new(config, InstanceRegistry::new());
    manager
        .clean_up(args.full)
        .await
        .map_err(|e| format!("Clean up failed: {e}"))?;

    if args.full {
        println!("Removed '{}'.", folder.display());
    } else {
        println!("Removed '{}'.", db_path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Reads a schema file, choosing the input form by extension.
///
/// Structured files may either carry a top-level `tables` key or be a bare
/// table mapping.
fn read_schema(path: &Path) -> Result<SchemaInput, String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read schema '{}': {e}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let structured = match extension.as_deref() {
        Some("json") => serde_json::from_str::<StructuredSchema>(&text)
            .or_else(|_| serde_json::from_str::<TableSpecs>(&text).map(StructuredSchema::new))
            .map_err(|e| e.to_string()),
        Some("yaml" | "yml") => serde_yaml::from_str::<StructuredSchema>(&text)
            .or_else(|_| serde_yaml::from_str::<TableSpecs>(&text).map(StructuredSchema::new))
            .map_err(|e| e.to_string()),
        _ => return Ok(SchemaInput::Text(text)),
    };

    debug!(path = %path.display(), "Reading structured schema");
    structured
        .map(SchemaInput::Structured)
        .map_err(|e| format!("Failed to parse schema '{}': {e}", path.display()))
}

/// Builds the manager configuration from `--config` plus flag overrides.
fn resolve_config(args: &DatabaseArgs) -> Result<ManagerConfig, String> {
    let mut config = match &args.config {
        Some(path) => ManagerConfig::load(path)
            .map_err(|e| format!("Failed to load config '{}': {e}", path.display()))?,
        None => ManagerConfig::default(),
    };
    if let Some(folder) = &args.folder {
        config.folder = folder.clone();
    }
    if let Some(db_name) = &args.db_name {
        config.db_name = db_name.clone();
    }
    config.indexes.extend(parse_index_specs(&args.indexes));
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// `"a,b"` becomes an index on columns `a` and `b` of every table that has both.
fn parse_index_specs(raw: &[String]) -> Vec<IndexSpec> {
    raw.iter()
        .map(|spec| IndexSpec {
            columns: spec
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect(),
            ..IndexSpec::default()
        })
        .filter(|spec| !spec.columns.is_empty())
        .collect()
}

fn parse_params(raw: &[String]) -> Result<Params, String> {
    let mut params = Params::None;
    for pair in raw {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid --param '{pair}': expected name=value"))?;
        params = params.with(name.trim(), parse_param_value(value));
    }
    Ok(params)
}

fn parse_param_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(r) = raw.parse::<f64>() {
        Value::Real(r)
    } else {
        Value::Text(raw.to_string())
    }
}

async fn close(manager: &RepositoryManager) -> Result<(), String> {
    let connection = manager.connection().map_err(|e| e.to_string())?;
    connection
        .close()
        .await
        .map_err(|e| format!("Failed to close database: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param_value() {
        assert_eq!(parse_param_value("42"), Value::Integer(42));
        assert_eq!(parse_param_value("2.5"), Value::Real(2.5));
        assert_eq!(parse_param_value("NULL"), Value::Null);
        assert_eq!(parse_param_value("alice"), Value::Text("alice".to_string()));
    }

    #[test]
    fn test_parse_params() {
        let params = parse_params(&["name=Alice".to_string(), ":min=3".to_string()]).unwrap();
        assert_eq!(
            params,
            Params::Named(vec![
                (":name".to_string(), Value::Text("Alice".to_string())),
                (":min".to_string(), Value::Integer(3)),
            ])
        );
        assert!(parse_params(&["oops".to_string()]).is_err());
    }

    #[test]
    fn test_parse_index_specs() {
        let specs = parse_index_specs(&["user_id".to_string(), "a, b".to_string(), ",".to_string()]);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0], IndexSpec::column("user_id"));
        assert_eq!(specs[1].columns, vec!["a", "b"]);
    }

    #[test]
    fn test_read_schema_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let sql = dir.path().join("schema.sql");
        fs::write(&sql, "CREATE TABLE t (id INTEGER PRIMARY KEY);").unwrap();
        assert!(matches!(read_schema(&sql).unwrap(), SchemaInput::Text(_)));

        let bare = dir.path().join("schema.yml");
        fs::write(&bare, "t:\n  id: INTEGER PRIMARY KEY\n").unwrap();
        match read_schema(&bare).unwrap() {
            SchemaInput::Structured(schema) => assert_eq!(schema.tables.len(), 1),
            other => panic!("unexpected input: {other:?}"),
        }

        let wrapped = dir.path().join("schema.json");
        fs::write(&wrapped, r#"{"tables": {"t": {"id": "INTEGER PRIMARY KEY"}}}"#).unwrap();
        assert!(matches!(read_schema(&wrapped).unwrap(), SchemaInput::Structured(_)));
    }
}
