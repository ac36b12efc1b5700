//! Trained model metadata: one model row plus its scores and hyperparameters.
//!
//! Rows are append-only. Redelivery of a command after a crash records a
//! second model for the same command rather than updating the first.

use std::collections::BTreeMap;

use jiff::Timestamp;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::model::{Hyperparameters, Metrics, TrainedModel};

use super::registry::{TRAINED_STATE, key_id, registry, registry_by_id};
use super::{Result, Store, StorageError};

impl Store {
    /// Records a trained model, its scores, and its hyperparameters in one transaction.
    ///
    /// Score and hyperparameter keys are matched against their registries at
    /// call time. Keys with no registry entry are dropped.
    pub fn record(
        &self,
        model_guid: Uuid,
        task_type_id: i64,
        model_variant_id: i64,
        configuration_id: i64,
        params: &Hyperparameters,
        metrics: &Metrics,
    ) -> Result<TrainedModel> {
        let last_trained_time = Timestamp::now();
        self.with_transaction("record trained model", |tx| {
            let state_id = key_id(tx, "model_state", TRAINED_STATE)?
                .ok_or_else(|| StorageError::NotFound(format!("model state {TRAINED_STATE}")))?;
            tx.execute(
                "INSERT INTO model (model_guid, last_trained_time, model_state_id,
                                    task_type_id, model_type_id, model_configuration_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    model_guid.to_string(),
                    last_trained_time.to_string(),
                    state_id,
                    task_type_id,
                    model_variant_id,
                    configuration_id,
                ],
            )?;
            let model_id = tx.last_insert_rowid();

            let score_kinds = registry(tx, "model_score_type")?;
            let mut scores = Metrics::new();
            for (key, value) in metrics {
                let Some(kind) = score_kinds.get(key) else {
                    debug!(key, "score kind not registered, dropped");
                    continue;
                };
                tx.execute(
                    "INSERT INTO model_score (model_id, model_score_type_id, value)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![model_id, kind, value],
                )?;
                scores.insert(key.clone(), *value);
            }

            let hyperparameter_kinds = registry(tx, "model_hyperparameter_type")?;
            let mut hyperparameters = BTreeMap::new();
            for (key, value) in params {
                let Some(kind) = hyperparameter_kinds.get(key) else {
                    debug!(key, "hyperparameter kind not registered, dropped");
                    continue;
                };
                let value = hyperparameter_text(value);
                tx.execute(
                    "INSERT INTO model_hyperparameter
                         (model_id, model_hyperparameter_type_id, value)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![model_id, kind, value],
                )?;
                hyperparameters.insert(key.clone(), value);
            }

            Ok(TrainedModel {
                id: model_id,
                model_guid,
                task_type_id,
                model_variant_id,
                configuration_id,
                last_trained_time,
                scores,
                hyperparameters,
            })
        })
    }

    /// Returns the most recently recorded model for a task type.
    pub fn latest_model(&self, task_type_id: i64) -> Result<Option<TrainedModel>> {
        let conn = self.connect()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM model WHERE task_type_id = ?1 ORDER BY id DESC LIMIT 1",
                [task_type_id],
                |row| row.get(0),
            )
            .optional()?;
        id.map(|id| load_model(&conn, id)).transpose()
    }

    /// Lists recorded models oldest first, optionally for one task type.
    pub fn list_models(&self, task_type_id: Option<i64>) -> Result<Vec<TrainedModel>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM model WHERE ?1 IS NULL OR task_type_id = ?1 ORDER BY id",
        )?;
        let ids = stmt
            .query_map([task_type_id], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids.into_iter().map(|id| load_model(&conn, id)).collect()
    }
}

/// Stored text of a hyperparameter value. Strings are stored without quotes.
fn hyperparameter_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Loads one model row with its scores and hyperparameters.
fn load_model(conn: &Connection, id: i64) -> Result<TrainedModel> {
    let (guid_str, trained_str, task_type_id, model_variant_id, configuration_id) = conn
        .query_row(
            "SELECT model_guid, last_trained_time, task_type_id, model_type_id,
                    model_configuration_id
             FROM model WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("model {id}")))?;

    let model_guid = guid_str
        .parse::<Uuid>()
        .map_err(|e| StorageError::Corrupt(format!("invalid model_guid: {e}")))?;
    let last_trained_time = trained_str
        .parse::<Timestamp>()
        .map_err(|e| StorageError::Corrupt(format!("invalid last_trained_time: {e}")))?;

    let score_names = registry_by_id(conn, "model_score_type")?;
    let mut stmt =
        conn.prepare("SELECT model_score_type_id, value FROM model_score WHERE model_id = ?1")?;
    let mut scores = Metrics::new();
    for row in stmt.query_map([id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)))? {
        let (kind, value) = row?;
        let name = score_names
            .get(&kind)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown score kind {kind}")))?;
        scores.insert(name.clone(), value);
    }

    let hyperparameter_names = registry_by_id(conn, "model_hyperparameter_type")?;
    let mut stmt = conn.prepare(
        "SELECT model_hyperparameter_type_id, value FROM model_hyperparameter WHERE model_id = ?1",
    )?;
    let mut hyperparameters = BTreeMap::new();
    for row in stmt.query_map([id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })? {
        let (kind, value) = row?;
        let name = hyperparameter_names
            .get(&kind)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown hyperparameter kind {kind}")))?;
        hyperparameters.insert(name.clone(), value);
    }

    Ok(TrainedModel {
        id,
        model_guid,
        task_type_id,
        model_variant_id,
        configuration_id,
        last_trained_time,
        scores,
        hyperparameters,
    })
}
