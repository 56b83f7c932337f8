//! Manager facade: owns the model, the connection and the repositories.
//!
//! A [`RepositoryManager`] is an ordinary value owned by the caller. Single
//! activity per database file is enforced through an [`InstanceRegistry`]
//! that the caller passes in, so independent registries (one per test, for
//! instance) never interfere. Registry entries are keyed on the canonical
//! database path.
//!
//! ```text
//! Uninitialized --init--> Initializing --ok--> Ready --clean_up--> Closed
//!                              |
//!                              +--error--> Uninitialized
//! ```

use std::collections::HashSet;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use schemarepo_core::RelationalModel;
use schemarepo_parser::SchemaInput;
use tracing::{info, warn};

use crate::config::ManagerConfig;
use crate::connection::ConnectionManager;
use crate::error::{RepoError, Result};
use crate::factory::{Repositories, build_all};
use crate::repository::Repository;

/// Lifecycle state of a [`RepositoryManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerState::Uninitialized => "uninitialized",
            ManagerState::Initializing => "initializing",
            ManagerState::Ready => "ready",
            ManagerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Set of database paths with an active manager.
///
/// Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `path` active. Returns `false` if it already was.
    pub fn acquire(&self, path: &Path) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf())
    }

    pub fn release(&self, path: &Path) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    pub fn is_active(&self, path: &Path) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }
}

/// Everything a ready manager holds.
struct Active {
    model: Arc<RelationalModel>,
    connection: ConnectionManager,
    repositories: Repositories,
}

/// Parses a schema, materializes it in SQLite and hands out repositories.
///
/// # Examples
///
/// ```no_run
/// use schemarepo_sqlite::{Filters, InstanceRegistry, ManagerConfig, RepositoryManager};
///
/// # async fn run() -> schemarepo_sqlite::Result<()> {
/// let schema = "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);";
/// let mut manager =
///     RepositoryManager::open(schema, ManagerConfig::new("data", "app.db"), InstanceRegistry::new())
///         .await?;
///
/// let users = manager.repository("users")?;
/// let saved = users.save_single(users.record().with("name", "Ada")?).await?;
/// let loaded = users.load_single(Filters::new().with("id", saved.get_as::<i64>("id")?)).await?;
/// assert_eq!(loaded, Some(saved));
///
/// manager.clean_up(true).await?;
/// # Ok(())
/// # }
/// ```
pub struct RepositoryManager {
    config: ManagerConfig,
    registry: InstanceRegistry,
    state: ManagerState,
    active: Option<Active>,
    /// Registry key held by this manager.
    registered: Option<PathBuf>,
}

impl fmt::Debug for RepositoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryManager")
            .field("db_path", &self.config.db_path())
            .field("state", &self.state)
            .finish()
    }
}

impl RepositoryManager {
    /// Creates an uninitialized manager.
    pub fn new(config: ManagerConfig, registry: InstanceRegistry) -> Self {
        Self {
            config,
            registry,
            state: ManagerState::Uninitialized,
            active: None,
            registered: None,
        }
    }

    /// Creates a manager and initializes it with `schema`.
    ///
    /// # Errors
    ///
    /// Same as [`init`](Self::init).
    pub async fn open(
        schema: impl Into<SchemaInput>,
        config: ManagerConfig,
        registry: InstanceRegistry,
    ) -> Result<Self> {
        let mut manager = Self::new(config, registry);
        manager.init(schema).await?;
        Ok(manager)
    }

    /// Parses `schema`, opens the database, creates missing tables and
    /// indexes, and builds a repository per table.
    ///
    /// On failure the registry entry and the connection are released and the
    /// manager returns to [`ManagerState::Uninitialized`].
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::LifecycleError`] unless the manager is
    /// uninitialized, [`RepoError::AlreadyInitializedError`] if another
    /// manager in the registry is active for the same database,
    /// [`RepoError::ConfigError`], [`RepoError::SchemaError`],
    /// [`RepoError::IoError`] or [`RepoError::PersistenceError`].
    pub async fn init(&mut self, schema: impl Into<SchemaInput>) -> Result<&Repositories> {
        if self.state != ManagerState::Uninitialized {
            return Err(RepoError::LifecycleError {
                expected: ManagerState::Uninitialized,
                found: self.state,
            });
        }
        self.config.validate()?;

        tokio::fs::create_dir_all(&self.config.folder).await?;
        let db_path = self.registry_key().await?;
        if !self.registry.acquire(&db_path) {
            return Err(RepoError::AlreadyInitializedError(self.config.db_path()));
        }
        self.registered = Some(db_path.clone());
        self.state = ManagerState::Initializing;
        info!(db_path = %db_path.display(), "Initializing repository manager");

        let schema = schema.into();
        let mut connection = None;
        match self.materialize(schema, &db_path, &mut connection).await {
            Ok(active) => {
                self.active = Some(active);
                self.state = ManagerState::Ready;
                info!(db_path = %db_path.display(), "Repository manager ready");
                self.repositories()
            }
            Err(err) => {
                if let Some(connection) = connection {
                    if let Err(close_err) = connection.close().await {
                        warn!(error = %close_err, "Failed to close connection after init error");
                    }
                }
                if let Some(key) = self.registered.take() {
                    self.registry.release(&key);
                }
                self.state = ManagerState::Uninitialized;
                Err(err)
            }
        }
    }

    /// The fallible part of [`init`](Self::init). A connection that was
    /// opened is left in `opened` so the caller can close it on error.
    async fn materialize(
        &self,
        schema: SchemaInput,
        db_path: &Path,
        opened: &mut Option<ConnectionManager>,
    ) -> Result<Active> {
        let model = schemarepo_parser::parse(schema)?.with_indexes(&self.config.indexes)?;
        let model = Arc::new(model);

        let connection = ConnectionManager::open(db_path).await?;
        *opened = Some(connection.clone());
        connection.ensure_schema(&model).await?;

        let repositories = build_all(Arc::clone(&model), &connection)?;
        Ok(Active {
            model,
            connection,
            repositories,
        })
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn db_path(&self) -> PathBuf {
        self.config.db_path()
    }

    /// Database path with the folder resolved, so that spellings of the same
    /// location share one registry entry. A missing folder is left as
    /// configured.
    async fn registry_key(&self) -> Result<PathBuf> {
        match tokio::fs::canonicalize(&self.config.folder).await {
            Ok(folder) => Ok(folder.join(&self.config.db_name)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(self.config.db_path()),
            Err(err) => Err(err.into()),
        }
    }

    fn active(&self) -> Result<&Active> {
        self.active.as_ref().ok_or(RepoError::LifecycleError {
            expected: ManagerState::Ready,
            found: self.state,
        })
    }

    /// All repositories, in table creation order.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::LifecycleError`] unless the manager is ready.
    pub fn repositories(&self) -> Result<&Repositories> {
        Ok(&self.active()?.repositories)
    }

    /// Repository of one table.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::LifecycleError`] unless the manager is ready and
    /// [`RepoError::SchemaError`] for an unknown table.
    pub fn repository(&self, table: &str) -> Result<&Repository> {
        self.active()?.repositories.table(table)
    }

    /// # Errors
    ///
    /// Returns [`RepoError::LifecycleError`] unless the manager is ready.
    pub fn model(&self) -> Result<&Arc<RelationalModel>> {
        Ok(&self.active()?.model)
    }

    /// # Errors
    ///
    /// Returns [`RepoError::LifecycleError`] unless the manager is ready.
    pub fn connection(&self) -> Result<&ConnectionManager> {
        Ok(&self.active()?.connection)
    }

    /// Closes the connection and deletes the database file; with `full`, the
    /// folder as well.
    ///
    /// Valid from any state and safe to repeat: missing files are ignored.
    /// Repository handles cloned earlier fail with
    /// [`RepoError::ConnectionClosed`] afterwards. A manager that does not
    /// hold the registry entry never touches a database another manager has
    /// active.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::AlreadyInitializedError`] without deleting
    /// anything if another manager in the registry is active for the
    /// database, and [`RepoError::IoError`] if an existing file or folder
    /// cannot be removed.
    pub async fn clean_up(&mut self, full: bool) -> Result<()> {
        let db_path = self.config.db_path();

        if self.registered.is_none() && self.registry.is_active(&self.registry_key().await?) {
            return Err(RepoError::AlreadyInitializedError(db_path));
        }

        if let Some(active) = self.active.take() {
            active.connection.close().await?;
        }
        if let Some(key) = self.registered.take() {
            self.registry.release(&key);
        }
        self.state = ManagerState::Closed;

        for suffix in ["", "-journal", "-wal", "-shm"] {
            let mut file = db_path.clone().into_os_string();
            file.push(suffix);
            remove_if_present(tokio::fs::remove_file(&file).await)?;
        }
        if full {
            remove_if_present(tokio::fs::remove_dir_all(&self.config.folder).await)?;
        }

        info!(db_path = %db_path.display(), full, "Repository manager cleaned up");
        Ok(())
    }
}

fn remove_if_present(result: std::io::Result<()>) -> Result<()> {
    match result {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT);";

    #[test]
    fn test_registry() {
        let registry = InstanceRegistry::new();
        let path = Path::new("data/app.db");
        assert!(registry.acquire(path));
        assert!(!registry.clone().acquire(path));
        assert!(registry.is_active(path));
        registry.release(path);
        assert!(!registry.is_active(path));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ManagerState::Ready.to_string(), "ready");
        assert_eq!(ManagerState::Uninitialized.to_string(), "uninitialized");
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::new(dir.path().join("db"), "notes.db");
        let registry = InstanceRegistry::new();

        let mut manager = RepositoryManager::new(config.clone(), registry.clone());
        assert_eq!(manager.state(), ManagerState::Uninitialized);
        assert!(manager.repositories().is_err());

        manager.init(SCHEMA).await.unwrap();
        assert_eq!(manager.state(), ManagerState::Ready);
        assert!(config.db_path().exists());
        let key = std::fs::canonicalize(&config.folder).unwrap().join("notes.db");
        assert!(registry.is_active(&key));

        let err = manager.init(SCHEMA).await.unwrap_err();
        assert!(matches!(
            err,
            RepoError::LifecycleError {
                found: ManagerState::Ready,
                ..
            }
        ));

        manager.clean_up(false).await.unwrap();
        assert_eq!(manager.state(), ManagerState::Closed);
        assert!(!config.db_path().exists());
        assert!(config.folder.exists());
        assert!(!registry.is_active(&key));

        manager.clean_up(true).await.unwrap();
        assert!(!config.folder.exists());
    }

    #[tokio::test]
    async fn test_failed_init_releases_registry() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::new(dir.path(), "bad.db");
        let registry = InstanceRegistry::new();

        let mut manager = RepositoryManager::new(config.clone(), registry.clone());
        let err = manager.init("CREATE TABLE t (id WIDGET);").await.unwrap_err();
        assert!(matches!(err, RepoError::SchemaError(_)));
        assert_eq!(manager.state(), ManagerState::Uninitialized);
        let key = std::fs::canonicalize(&config.folder).unwrap().join("bad.db");
        assert!(!registry.is_active(&key));

        manager.init(SCHEMA).await.unwrap();
        assert_eq!(manager.state(), ManagerState::Ready);
    }

    #[tokio::test]
    async fn test_clean_up_without_registry_entry_spares_active_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::new(dir.path().join("db"), "notes.db");
        let registry = InstanceRegistry::new();

        let mut owner = RepositoryManager::open(SCHEMA, config.clone(), registry.clone())
            .await
            .unwrap();

        let mut other = RepositoryManager::new(config.clone(), registry.clone());
        let err = other.clean_up(true).await.unwrap_err();
        assert!(matches!(err, RepoError::AlreadyInitializedError(_)));
        assert_eq!(other.state(), ManagerState::Uninitialized);
        assert!(config.db_path().exists());

        owner.clean_up(false).await.unwrap();
        other.clean_up(true).await.unwrap();
        assert!(!config.folder.exists());
    }
}
