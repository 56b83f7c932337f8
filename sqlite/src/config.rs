//! Manager configuration.
//!
//! Where the database lives and which indexes to add on top of the schema.
//! Serializable as YAML so it can sit next to a schema file.
//!
//! # Example YAML
//!
//! ```yaml
//! folder: data
//! db_name: shop.db
//! indexes:
//!   - columns: [customer_id]
//!   - table: customers
//!     columns: [email]
//!     unique: true
//! ```

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use schemarepo_core::IndexSpec;
use serde::{Deserialize, Serialize};

use crate::error::{RepoError, Result};

/// Folder used when none is configured.
pub const DEFAULT_FOLDER: &str = "hive";
/// Database file name used when none is configured.
pub const DEFAULT_DB_NAME: &str = "hive_1.db";

/// Configuration for a [`RepositoryManager`](crate::RepositoryManager).
///
/// # Examples
///
/// ```
/// use schemarepo_core::IndexSpec;
/// use schemarepo_sqlite::ManagerConfig;
///
/// let config = ManagerConfig::new("data", "shop.db").with_index(IndexSpec::column("user_id"));
/// assert_eq!(config.db_path(), std::path::Path::new("data/shop.db"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Folder holding the database file. Created on initialization.
    pub folder: PathBuf,
    /// Database file name inside `folder`.
    pub db_name: String,
    /// Index requests applied to the schema.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexSpec>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from(DEFAULT_FOLDER),
            db_name: DEFAULT_DB_NAME.to_string(),
            indexes: Vec::new(),
        }
    }
}

impl ManagerConfig {
    pub fn new(folder: impl Into<PathBuf>, db_name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            db_name: db_name.into(),
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Full path of the database file.
    pub fn db_path(&self) -> PathBuf {
        self.folder.join(&self.db_name)
    }

    /// Checks that the database name is a plain file name.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::ConfigError`] for an empty name or one that
    /// contains a path separator.
    pub fn validate(&self) -> Result<()> {
        let name = self.db_name.trim();
        if name.is_empty() {
            return Err(RepoError::ConfigError("db_name must not be empty".to_string()));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(RepoError::ConfigError(format!(
                "db_name '{}' must be a file name, not a path",
                self.db_name
            )));
        }
        Ok(())
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::IoError`] if the file cannot be read, or
    /// [`RepoError::YamlError`] if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader)?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::IoError`] if the file cannot be written, or
    /// [`RepoError::YamlError`] if serialization fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.db_path(), PathBuf::from("hive").join("hive_1.db"));
        assert!(config.indexes.is_empty());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: ManagerConfig = serde_yaml::from_str("db_name: shop.db\n").unwrap();
        assert_eq!(config.folder, PathBuf::from("hive"));
        assert_eq!(config.db_name, "shop.db");
    }

    #[test]
    fn test_yaml_indexes() {
        let yaml = "indexes:\n  - columns: [user_id]\n  - table: users\n    columns: [email]\n    unique: true\n";
        let config: ManagerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.indexes[0], IndexSpec::column("user_id"));
        assert_eq!(config.indexes[1], IndexSpec::on("users", &["email"]).unique());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repo.yml");

        let config = ManagerConfig::new("data", "app.db").with_index(IndexSpec::column("owner_id"));
        config.save(&path).unwrap();
        assert_eq!(ManagerConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ManagerConfig::load("/definitely/not/here.yml").unwrap_err();
        assert!(matches!(err, RepoError::IoError(_)));
    }

    #[test]
    fn test_validate_db_name() {
        assert!(ManagerConfig::default().validate().is_ok());
        assert!(ManagerConfig::new("data", "").validate().is_err());
        assert!(ManagerConfig::new("data", "../escape.db").validate().is_err());
    }
}
