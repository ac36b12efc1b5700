//! Configuration storage: time-windowed training configurations per task type.

use jiff::Timestamp;

use crate::model::{ConfigurationDocument, TrainingConfiguration, window_contains};

use super::{Result, Store, StorageError};

impl Store {
    /// Stores a configuration document for a task type and returns its id.
    ///
    /// Windows are not checked for overlap here. An overlap surfaces as a
    /// [`StorageError::ConfigurationIntegrity`] when the configuration is read.
    pub fn add_configuration(
        &self,
        task_type_id: i64,
        valid_from: Timestamp,
        valid_to: Option<Timestamp>,
        document: &ConfigurationDocument,
    ) -> Result<i64> {
        let json = serde_json::to_string(document)?;
        self.with_transaction("add configuration", |tx| {
            tx.execute(
                "INSERT INTO model_configuration (task_type_id, valid_from, valid_to, document)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    task_type_id,
                    valid_from.to_string(),
                    valid_to.map(|t| t.to_string()),
                    json,
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })
    }

    /// Returns the single configuration valid for a task type at `at`.
    ///
    /// Zero or several valid rows are a [`StorageError::ConfigurationIntegrity`].
    pub fn current_configuration(
        &self,
        task_type_id: i64,
        at: Timestamp,
    ) -> Result<TrainingConfiguration> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, valid_from, valid_to, document
             FROM model_configuration WHERE task_type_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([task_type_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut valid = Vec::new();
        for (id, from_str, to_str, document) in rows {
            let valid_from = parse_timestamp(&from_str, "valid_from")?;
            let valid_to = to_str
                .as_deref()
                .map(|s| parse_timestamp(s, "valid_to"))
                .transpose()?;
            if window_contains(valid_from, valid_to, at) {
                valid.push((id, valid_from, valid_to, document));
            }
        }

        if valid.len() != 1 {
            return Err(StorageError::ConfigurationIntegrity {
                task_type_id,
                valid_rows: valid.len(),
            });
        }
        let (id, valid_from, valid_to, document) = valid.remove(0);
        let document = serde_json::from_str(&document)
            .map_err(|e| StorageError::Corrupt(format!("configuration {id}: {e}")))?;

        Ok(TrainingConfiguration {
            id,
            task_type_id,
            valid_from,
            valid_to,
            document,
        })
    }
}

fn parse_timestamp(s: &str, column: &str) -> Result<Timestamp> {
    s.parse::<Timestamp>()
        .map_err(|e| StorageError::Corrupt(format!("invalid {column}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::{
        BaselineSearch, Evaluation, HyperparameterSearch, RuntimeParameters,
    };
    use crate::storage::tests::test_store;

    fn sample_document() -> ConfigurationDocument {
        ConfigurationDocument {
            runtime_parameters: RuntimeParameters {
                min_user_ratings: 3,
                min_item_ratings: 2,
            },
            hyperparameter_search: HyperparameterSearch {
                n_factors: vec![5, 10],
                n_epochs: vec![10],
                lr_all: vec![0.005],
                reg_all: vec![0.02],
            },
            baseline_search: BaselineSearch::default(),
            evaluation: Evaluation::default(),
        }
    }

    fn at(seconds: i64) -> Timestamp {
        Timestamp::new(seconds, 0).unwrap()
    }

    #[test]
    fn current_configuration_picks_the_open_window() {
        let (_dir, store) = test_store();
        let task = store.add_task_type("books").unwrap();
        let mut old = sample_document();
        old.runtime_parameters.min_user_ratings = 1;

        store
            .add_configuration(task, at(1_000), Some(at(2_000)), &old)
            .unwrap();
        let current = store
            .add_configuration(task, at(2_000), None, &sample_document())
            .unwrap();

        let config = store.current_configuration(task, at(2_500)).unwrap();
        assert_eq!(config.id, current);
        assert_eq!(config.task_type_id, task);
        assert_eq!(config.document, sample_document());

        let earlier = store.current_configuration(task, at(1_500)).unwrap();
        assert_eq!(earlier.document.runtime_parameters.min_user_ratings, 1);
    }

    #[test]
    fn missing_configuration_is_an_integrity_error() {
        let (_dir, store) = test_store();
        let task = store.add_task_type("books").unwrap();
        store
            .add_configuration(task, at(5_000), None, &sample_document())
            .unwrap();

        let err = store.current_configuration(task, at(1_000)).unwrap_err();
        assert!(matches!(
            err,
            StorageError::ConfigurationIntegrity { valid_rows: 0, .. }
        ));
    }

    #[test]
    fn overlapping_configurations_are_an_integrity_error() {
        let (_dir, store) = test_store();
        let task = store.add_task_type("books").unwrap();
        store
            .add_configuration(task, at(1_000), None, &sample_document())
            .unwrap();
        store
            .add_configuration(task, at(1_500), None, &sample_document())
            .unwrap();

        let err = store.current_configuration(task, at(2_000)).unwrap_err();
        assert!(matches!(
            err,
            StorageError::ConfigurationIntegrity { valid_rows: 2, .. }
        ));
    }

    #[test]
    fn configurations_are_scoped_to_their_task_type() {
        let (_dir, store) = test_store();
        let books = store.add_task_type("books").unwrap();
        let films = store.add_task_type("films").unwrap();
        store
            .add_configuration(books, at(1_000), None, &sample_document())
            .unwrap();

        assert!(store.current_configuration(books, at(2_000)).is_ok());
        assert!(store.current_configuration(films, at(2_000)).is_err());
    }

    #[test]
    fn configuration_for_unknown_task_type_is_rejected() {
        let (_dir, store) = test_store();
        let err = store
            .add_configuration(42, at(1_000), None, &sample_document())
            .unwrap_err();

        assert!(matches!(err, StorageError::Sqlite(_)));
    }
}
