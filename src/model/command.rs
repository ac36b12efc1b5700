//! Command types: what the log delivers and what it decodes to.

use serde::{Deserialize, Serialize};

/// One delivered unit from the command log.
///
/// Positions are unique within a stream and strictly increasing in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEntry {
    pub position: u64,
    pub payload: Vec<u8>,
}

/// The wire shape of a command payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCommand {
    pub task_type_id: i64,
}

/// A validated command: the task type and the catalog key it resolved to.
///
/// Lives for one job and is dropped once the entry is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub task_type_id: i64,
    pub task_type_key: String,
}
