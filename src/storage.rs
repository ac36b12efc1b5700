//! Relational store for task types, configurations, and trained model metadata.
//!
//! One `SQLite` file holds every table. Each operation opens its own
//! connection and releases it before returning, so no session outlives the
//! write it was opened for.
//!
//! ```text
//! task_type ─┬─ model_configuration
//!            └─ model ─┬─ model_score         ─ model_score_type
//!                      └─ model_hyperparameter ─ model_hyperparameter_type
//! ```

mod configuration;
mod registry;
mod trained_model;

use std::{fs, io, path::PathBuf, time::Instant};

use rusqlite::{Connection, Transaction};
use tracing::{debug, error, warn};

pub use registry::TaskType;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("task type {task_type_id} has {valid_rows} valid configurations, expected exactly one")]
    ConfigurationIntegrity { task_type_id: i64, valid_rows: usize },

    #[error("model type not registered: {0}")]
    UnknownModelVariant(String),
}

pub type Result<T> = core::result::Result<T, StorageError>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS task_type (
    id  INTEGER PRIMARY KEY,
    key TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS model_type (
    id  INTEGER PRIMARY KEY,
    key TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS model_state (
    id  INTEGER PRIMARY KEY,
    key TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS model_configuration (
    id           INTEGER PRIMARY KEY,
    task_type_id INTEGER NOT NULL REFERENCES task_type(id),
    valid_from   TEXT NOT NULL,
    valid_to     TEXT,
    document     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS model (
    id                     INTEGER PRIMARY KEY,
    model_guid             TEXT NOT NULL,
    last_trained_time      TEXT NOT NULL,
    model_state_id         INTEGER NOT NULL REFERENCES model_state(id),
    task_type_id           INTEGER NOT NULL REFERENCES task_type(id),
    model_type_id          INTEGER NOT NULL REFERENCES model_type(id),
    model_configuration_id INTEGER NOT NULL REFERENCES model_configuration(id)
);
CREATE INDEX IF NOT EXISTS model_task_type ON model(task_type_id);
CREATE TABLE IF NOT EXISTS model_score_type (
    id  INTEGER PRIMARY KEY,
    key TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS model_score (
    model_id            INTEGER NOT NULL REFERENCES model(id) ON DELETE CASCADE,
    model_score_type_id INTEGER NOT NULL REFERENCES model_score_type(id),
    value               REAL NOT NULL,
    PRIMARY KEY (model_id, model_score_type_id)
);
CREATE TABLE IF NOT EXISTS model_hyperparameter_type (
    id  INTEGER PRIMARY KEY,
    key TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS model_hyperparameter (
    model_id                     INTEGER NOT NULL REFERENCES model(id) ON DELETE CASCADE,
    model_hyperparameter_type_id INTEGER NOT NULL REFERENCES model_hyperparameter_type(id),
    value                        TEXT NOT NULL,
    PRIMARY KEY (model_id, model_hyperparameter_type_id)
);
";

/// Handle to the relational store.
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Opens the store at the given path, creating the file and schema if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let store = Self { path };
        store.connect()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    /// Runs `op` inside one transaction on a fresh connection.
    ///
    /// Commits when `op` succeeds. Rolls back and returns the error otherwise.
    pub fn with_transaction<T>(
        &self,
        operation: &str,
        op: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let started = Instant::now();
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        match op(&tx) {
            Ok(value) => {
                if let Err(e) = tx.commit() {
                    error!(operation, error = %e, "commit failed");
                    return Err(e.into());
                }
                debug!(
                    operation,
                    elapsed_ms = started.elapsed().as_millis(),
                    "committed"
                );
                Ok(value)
            }
            Err(e) => {
                error!(operation, error = %e, "rolled back");
                if let Err(rollback) = tx.rollback() {
                    warn!(operation, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Opens a connection with foreign keys enforced.
    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(conn)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use tempfile::TempDir;

    /// A seeded store in a temporary directory.
    pub(crate) fn test_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("lectern.sqlite")).unwrap();
        store.seed_defaults().unwrap();
        (dir, store)
    }

    #[test]
    fn open_is_idempotent() {
        let (dir, store) = test_store();
        store.add_task_type("books").unwrap();

        let reopened = Store::open(dir.path().join("lectern.sqlite")).unwrap();
        assert_eq!(reopened.task_types().unwrap().len(), 1);
    }

    #[test]
    fn transaction_commits_on_success() {
        let (_dir, store) = test_store();

        store
            .with_transaction("insert", |tx| {
                tx.execute("INSERT INTO task_type (key) VALUES ('books')", [])?;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.task_types().unwrap()[0].key, "books");
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let (_dir, store) = test_store();

        let err = store
            .with_transaction("insert then fail", |tx| {
                tx.execute("INSERT INTO task_type (key) VALUES ('books')", [])?;
                Err::<(), _>(StorageError::Corrupt("boom".into()))
            })
            .unwrap_err();

        assert!(matches!(err, StorageError::Corrupt(_)));
        assert!(store.task_types().unwrap().is_empty());
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let (_dir, store) = test_store();

        let err = store
            .with_transaction("orphan configuration", |tx| {
                tx.execute(
                    "INSERT INTO model_configuration (task_type_id, valid_from, document)
                     VALUES (99, '2024-01-01T00:00:00Z', '{}')",
                    [],
                )?;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, StorageError::Sqlite(_)));
    }
}
