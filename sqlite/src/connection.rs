//! Shared connection management.
//!
//! [`ConnectionManager`] owns the single SQLite connection behind an async
//! mutex. Every engine access takes the lock (a suspension point while
//! another statement runs) and then executes on tokio's blocking pool, so
//! at most one statement is ever in flight on the connection.
//!
//! A future that is dropped after its work has reached the blocking pool
//! does not cancel that work: the statement (or transaction) runs to
//! completion and commits or rolls back as a unit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{Connection, Statement, Transaction};
use schemarepo_core::RelationalModel;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{RepoError, Result};
use crate::schema::generate_schema_sql;
use crate::value::Value;

/// Statement parameters.
///
/// Named parameters may be given with or without their `:` prefix.
///
/// # Examples
///
/// ```
/// use schemarepo_sqlite::{Params, Value};
///
/// let named = Params::named().with("email", "ada@example.com");
/// let positional = Params::positional([Value::Integer(1), Value::from("x")]);
/// assert!(Params::None.is_empty());
/// # let _ = (named, positional);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    #[default]
    None,
    /// Bound to `?1`, `?2`, ... in order.
    Positional(Vec<Value>),
    /// Bound by name (`:name`, `@name`, `$name`).
    Named(Vec<(String, Value)>),
}

impl Params {
    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self::Positional(values.into_iter().collect())
    }

    pub fn named() -> Self {
        Self::Named(Vec::new())
    }

    /// Adds a named parameter. Converts [`Params::None`] to named parameters.
    pub fn with(self, name: &str, value: impl Into<Value>) -> Self {
        let name = if name.starts_with([':', '@', '$']) {
            name.to_string()
        } else {
            format!(":{name}")
        };
        match self {
            Self::Named(mut pairs) => {
                pairs.push((name, value.into()));
                Self::Named(pairs)
            }
            Self::None => Self::Named(vec![(name, value.into())]),
            Self::Positional(mut values) => {
                values.push(value.into());
                Self::Positional(values)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::None => true,
            Self::Positional(values) => values.is_empty(),
            Self::Named(pairs) => pairs.is_empty(),
        }
    }

    /// Binds every parameter to `stmt`, which must take exactly these.
    pub(crate) fn bind(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
        let expected = stmt.parameter_count();
        match self {
            Self::None if expected == 0 => Ok(()),
            Self::None => Err(rusqlite::Error::InvalidParameterCount(0, expected)),
            Self::Positional(values) => {
                if values.len() != expected {
                    return Err(rusqlite::Error::InvalidParameterCount(values.len(), expected));
                }
                for (i, value) in values.iter().enumerate() {
                    stmt.raw_bind_parameter(i + 1, value)?;
                }
                Ok(())
            }
            Self::Named(pairs) => {
                if pairs.len() != expected {
                    return Err(rusqlite::Error::InvalidParameterCount(pairs.len(), expected));
                }
                for (name, value) in pairs {
                    let index = stmt
                        .parameter_index(name)?
                        .ok_or_else(|| rusqlite::Error::InvalidParameterName(name.clone()))?;
                    stmt.raw_bind_parameter(index, value)?;
                }
                Ok(())
            }
        }
    }
}

/// Rows returned by a query, with their column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Runs one statement on `conn` and returns the affected row count.
pub(crate) fn execute_on(conn: &Connection, statement: &str, params: &Params) -> Result<usize> {
    debug!(%statement, "Executing statement");
    let mut stmt = conn.prepare(statement)?;
    params.bind(&mut stmt)?;
    Ok(stmt.raw_execute()?)
}

/// Runs one query on `conn`, decoding values by storage class.
pub(crate) fn query_on(conn: &Connection, statement: &str, params: &Params) -> Result<ResultSet> {
    debug!(%statement, "Running query");
    let mut stmt = conn.prepare(statement)?;
    params.bind(&mut stmt)?;

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.raw_query();
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(Value::from_ref(row.get_ref(i)?));
        }
        rows.push(values);
    }
    Ok(ResultSet { columns, rows })
}

struct Session {
    conn: Option<Connection>,
    /// DDL script last applied on this connection.
    materialized: Option<String>,
}

/// Owner of the shared database connection.
///
/// Cloning is cheap and every clone refers to the same connection.
/// Foreign-key enforcement is switched on when the connection opens.
#[derive(Clone)]
pub struct ConnectionManager {
    session: Arc<Mutex<Session>>,
    path: Arc<PathBuf>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Opens (creating if needed) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::PersistenceError`] if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let target = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&target)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(conn)
        })
        .await
        .map_err(|e| RepoError::TaskError(e.to_string()))??;

        info!(path = %path.display(), "Opened database connection");
        Ok(Self::from_connection(conn, path))
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::PersistenceError`] if the engine refuses.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        debug!("Opened in-memory database connection");
        Ok(Self::from_connection(conn, PathBuf::from(":memory:")))
    }

    fn from_connection(conn: Connection, path: PathBuf) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session {
                conn: Some(conn),
                materialized: None,
            })),
            path: Arc::new(path),
        }
    }

    /// Path of the database file (`:memory:` for in-memory databases).
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_session<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut session = self.session.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || f(&mut session))
            .await
            .map_err(|e| RepoError::TaskError(e.to_string()))?
    }

    /// Runs `f` with exclusive use of the connection.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::ConnectionClosed`] after [`close`](Self::close),
    /// [`RepoError::TaskError`] if `f` panics, or whatever `f` returns.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_session(move |session| match session.conn.as_mut() {
            Some(conn) => f(conn),
            None => Err(RepoError::ConnectionClosed),
        })
        .await
    }

    /// Runs `f` inside one transaction. The transaction commits if `f`
    /// returns `Ok` and rolls back otherwise.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await
    }

    /// Executes one statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::PersistenceError`] on engine failure, including
    /// parameters that do not match the statement.
    pub async fn execute(&self, statement: impl Into<String>, params: Params) -> Result<usize> {
        let statement = statement.into();
        self.run(move |conn| execute_on(conn, &statement, &params))
            .await
    }

    /// Runs one query and returns its rows.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::PersistenceError`] on engine failure.
    pub async fn query(&self, statement: impl Into<String>, params: Params) -> Result<ResultSet> {
        let statement = statement.into();
        self.run(move |conn| query_on(conn, &statement, &params))
            .await
    }

    /// Creates the model's tables and indexes if they do not exist.
    ///
    /// Runs in one transaction, tables in creation order. Repeating the call
    /// with the model already applied on this connection is a no-op; a
    /// different model has its missing tables created.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::PersistenceError`] if the engine rejects the
    /// generated DDL.
    pub async fn ensure_schema(&self, model: &RelationalModel) -> Result<()> {
        let sql = generate_schema_sql(model);
        let tables = model.len();

        let created = self
            .with_session(move |session| {
                let conn = session.conn.as_mut().ok_or(RepoError::ConnectionClosed)?;
                if session.materialized.as_deref() == Some(sql.as_str()) {
                    return Ok(false);
                }
                let tx = conn.transaction()?;
                tx.execute_batch(&sql)?;
                tx.commit()?;
                session.materialized = Some(sql);
                Ok(true)
            })
            .await?;

        if created {
            info!(tables, "Schema materialized");
        } else {
            debug!("Model already materialized on this connection");
        }
        Ok(())
    }

    /// Closes the connection. Later operations fail with
    /// [`RepoError::ConnectionClosed`]; closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::PersistenceError`] if the engine fails to close.
    pub async fn close(&self) -> Result<()> {
        let closed = self
            .with_session(|session| match session.conn.take() {
                Some(conn) => {
                    session.materialized = None;
                    conn.close().map_err(|(_, e)| RepoError::from(e))?;
                    Ok(true)
                }
                None => Ok(false),
            })
            .await?;

        if closed {
            info!(path = %self.path.display(), "Closed database connection");
        }
        Ok(())
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub async fn is_closed(&self) -> bool {
        self.session.lock().await.conn.is_none()
    }
}
