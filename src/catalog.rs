//! Task catalog and command decoding.
//!
//! A command payload is only accepted once its task type resolves to a key in
//! the catalog. Anything else is a [`ValidationError`], which the consumer
//! treats as fail-stop.

use std::collections::HashMap;

use crate::model::{CommandEntry, TaskCommand, TaskDescriptor};
use crate::storage::{Store, StorageError};

/// Errors raised while turning a command entry into a task.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed command payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("unknown task type: {0}")]
    UnknownTaskType(i64),

    #[error("task catalog unavailable: {0}")]
    Catalog(#[from] StorageError),
}

/// Maps task type ids to their human-readable keys.
pub trait TaskCatalog {
    /// Returns the key for a task type, `None` if it isn't registered.
    fn task_type_key(&self, task_type_id: i64) -> Result<Option<String>, StorageError>;
}

impl TaskCatalog for Store {
    fn task_type_key(&self, task_type_id: i64) -> Result<Option<String>, StorageError> {
        self.find_task_type(task_type_id)
    }
}

impl TaskCatalog for HashMap<i64, String> {
    fn task_type_key(&self, task_type_id: i64) -> Result<Option<String>, StorageError> {
        Ok(self.get(&task_type_id).cloned())
    }
}

/// Decodes a command entry's payload and resolves its task type.
pub fn decode(
    entry: &CommandEntry,
    catalog: &dyn TaskCatalog,
) -> Result<TaskDescriptor, ValidationError> {
    let command: TaskCommand =
        serde_json::from_slice(&entry.payload).map_err(ValidationError::MalformedPayload)?;
    let task_type_key = catalog
        .task_type_key(command.task_type_id)?
        .ok_or(ValidationError::UnknownTaskType(command.task_type_id))?;
    Ok(TaskDescriptor {
        task_type_id: command.task_type_id,
        task_type_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_catalog() -> HashMap<i64, String> {
        HashMap::from([(1, "book_recommendation".to_string())])
    }

    fn entry(payload: &str) -> CommandEntry {
        CommandEntry {
            position: 1,
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[test]
    fn decodes_known_task_type() {
        let task = decode(&entry(r#"{"task_type_id": 1}"#), &sample_catalog()).unwrap();

        assert_eq!(
            task,
            TaskDescriptor {
                task_type_id: 1,
                task_type_key: "book_recommendation".into(),
            }
        );
    }

    #[test]
    fn extra_payload_fields_are_ignored() {
        let task = decode(
            &entry(r#"{"task_type_id": 1, "requested_by": "ops"}"#),
            &sample_catalog(),
        )
        .unwrap();
        assert_eq!(task.task_type_id, 1);
    }

    #[test]
    fn unknown_task_type_is_rejected() {
        let err = decode(&entry(r#"{"task_type_id": 7}"#), &sample_catalog()).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownTaskType(7)));
    }

    #[test]
    fn missing_task_type_is_malformed() {
        let err = decode(&entry(r#"{"task": 1}"#), &sample_catalog()).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedPayload(_)));
    }

    #[test]
    fn non_json_payload_is_malformed() {
        let err = decode(&entry("train books please"), &sample_catalog()).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedPayload(_)));
    }

    #[test]
    fn store_backed_catalog() {
        let (_dir, store) = crate::storage::tests::test_store();
        let id = store.add_task_type("books").unwrap();

        let task = decode(&entry(&format!(r#"{{"task_type_id": {id}}}"#)), &store).unwrap();
        assert_eq!(task.task_type_key, "books");
    }
}
