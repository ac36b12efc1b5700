//! Registry tables: task types, model types, states, score and hyperparameter kinds.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};

use crate::model::{ModelVariant, metric};

use super::{Result, Store, StorageError};

/// The state every freshly recorded model is stored in.
pub(super) const TRAINED_STATE: &str = "trained";

const DEFAULT_SCORE_KINDS: [&str; 3] = [metric::RMSE, metric::PRECISION_AT_K, metric::RECALL_AT_K];

const DEFAULT_HYPERPARAMETER_KINDS: [&str; 6] = [
    "n_factors",
    "n_epochs",
    "lr_all",
    "reg_all",
    "epochs",
    "learning_rate",
];

/// A registered task type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskType {
    pub id: i64,
    pub key: String,
}

impl Store {
    /// Inserts the default registry rows. Existing rows are left alone.
    pub fn seed_defaults(&self) -> Result<()> {
        self.with_transaction("seed defaults", |tx| {
            for variant in ModelVariant::ALL {
                insert_key(tx, "model_type", variant.key())?;
            }
            insert_key(tx, "model_state", TRAINED_STATE)?;
            for kind in DEFAULT_SCORE_KINDS {
                insert_key(tx, "model_score_type", kind)?;
            }
            for kind in DEFAULT_HYPERPARAMETER_KINDS {
                insert_key(tx, "model_hyperparameter_type", kind)?;
            }
            Ok(())
        })
    }

    // ── Task types ──

    /// Registers a task type and returns its id.
    pub fn add_task_type(&self, key: &str) -> Result<i64> {
        self.with_transaction("add task type", |tx| {
            tx.execute("INSERT INTO task_type (key) VALUES (?1)", [key])?;
            Ok(tx.last_insert_rowid())
        })
    }

    /// Lists every task type ordered by id.
    pub fn task_types(&self) -> Result<Vec<TaskType>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT id, key FROM task_type ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(TaskType {
                id: row.get(0)?,
                key: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Looks up a task type's key by id.
    pub fn find_task_type(&self, id: i64) -> Result<Option<String>> {
        let conn = self.connect()?;
        Ok(conn
            .query_row("SELECT key FROM task_type WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?)
    }

    // ── Model types ──

    /// Resolves the registry id of a model variant.
    pub fn model_variant_id(&self, variant: ModelVariant) -> Result<i64> {
        let conn = self.connect()?;
        key_id(&conn, "model_type", variant.key())?
            .ok_or_else(|| StorageError::UnknownModelVariant(variant.key().to_string()))
    }

    // ── Score and hyperparameter kinds ──

    /// Registers an additional score kind. Already-registered keys are ignored.
    pub fn add_score_kind(&self, key: &str) -> Result<()> {
        self.with_transaction("add score kind", |tx| insert_key(tx, "model_score_type", key))
    }

    /// Registers an additional hyperparameter kind. Already-registered keys are ignored.
    pub fn add_hyperparameter_kind(&self, key: &str) -> Result<()> {
        self.with_transaction("add hyperparameter kind", |tx| {
            insert_key(tx, "model_hyperparameter_type", key)
        })
    }
}

/// Reads a whole registry table as key to id.
pub(super) fn registry(conn: &Connection, table: &str) -> Result<HashMap<String, i64>> {
    let mut stmt = conn.prepare(&format!("SELECT key, id FROM {table}"))?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Reads a registry table keyed by id.
pub(super) fn registry_by_id(conn: &Connection, table: &str) -> Result<HashMap<i64, String>> {
    Ok(registry(conn, table)?
        .into_iter()
        .map(|(key, id)| (id, key))
        .collect())
}

pub(super) fn key_id(conn: &Connection, table: &str, key: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(&format!("SELECT id FROM {table} WHERE key = ?1"), [key], |row| {
            row.get(0)
        })
        .optional()?)
}

fn insert_key(conn: &Connection, table: &str, key: &str) -> Result<()> {
    conn.execute(&format!("INSERT OR IGNORE INTO {table} (key) VALUES (?1)"), [key])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::storage::tests::test_store;

    #[test]
    fn seeding_twice_keeps_one_row_per_key() {
        let (_dir, store) = test_store();
        store.seed_defaults().unwrap();

        let conn = store.connect().unwrap();
        let scores = registry(&conn, "model_score_type").unwrap();
        assert_eq!(scores.len(), 3);
        assert!(scores.contains_key("Precision@K"));
        assert_eq!(registry(&conn, "model_hyperparameter_type").unwrap().len(), 6);
    }

    #[test]
    fn add_and_find_task_type() {
        let (_dir, store) = test_store();
        let id = store.add_task_type("book_recommendation").unwrap();

        assert_eq!(
            store.find_task_type(id).unwrap().as_deref(),
            Some("book_recommendation")
        );
        assert_eq!(store.find_task_type(id + 1).unwrap(), None);
    }

    #[test]
    fn duplicate_task_type_fails() {
        let (_dir, store) = test_store();
        store.add_task_type("books").unwrap();
        let err = store.add_task_type("books").unwrap_err();

        assert!(matches!(err, StorageError::Sqlite(_)));
        assert_eq!(store.task_types().unwrap().len(), 1);
    }

    #[test]
    fn model_variants_resolve_after_seeding() {
        let (_dir, store) = test_store();
        let mf = store
            .model_variant_id(ModelVariant::MatrixFactorization)
            .unwrap();
        let nb = store.model_variant_id(ModelVariant::NeuralBaseline).unwrap();

        assert_ne!(mf, nb);
    }

    #[test]
    fn unseeded_model_variant_is_unknown() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::open(dir.path().join("bare.sqlite")).unwrap();
        let err = store
            .model_variant_id(ModelVariant::NeuralBaseline)
            .unwrap_err();

        assert!(matches!(err, StorageError::UnknownModelVariant(_)));
    }
}
