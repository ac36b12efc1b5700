//! Checkpoint store: the durable position cursor for the command log.
//!
//! A checkpoint is an event `{"stream_position": N}` appended to its own
//! stream. The current checkpoint is the last event in that stream; earlier
//! events are history. `N` is the position of the last command entry whose
//! processing was finalized, so a subscription resumes strictly after it.

use serde_json::json;
use tracing::{debug, info};

use crate::eventlog::{EventLog, ExpectedVersion, LogError, NewEvent};

/// Errors raised while reading or advancing a checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint event {position} on {stream} has no stream_position")]
    MissingPosition { stream: String, position: u64 },

    #[error(transparent)]
    Log(#[from] LogError),
}

pub type Result<T> = core::result::Result<T, CheckpointError>;

/// Durable position cursor keyed by a checkpoint stream name.
pub struct CheckpointStore<'a> {
    log: &'a dyn EventLog,
    stream: String,
    event_type: String,
}

impl<'a> CheckpointStore<'a> {
    pub fn new(
        log: &'a dyn EventLog,
        stream: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            log,
            stream: stream.into(),
            event_type: event_type.into(),
        }
    }

    /// Reads the current checkpoint, `None` if the checkpoint stream doesn't exist.
    pub fn read(&self) -> Result<Option<u64>> {
        let events = match self.log.read(&self.stream) {
            Ok(events) => events,
            Err(LogError::StreamNotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(last) = events.last() else {
            return Ok(None);
        };
        let position = last
            .data
            .get("stream_position")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| CheckpointError::MissingPosition {
                stream: self.stream.clone(),
                position: last.position,
            })?;
        Ok(Some(position))
    }

    /// Reads the current checkpoint, creating it at 0 on first run.
    pub fn load_or_create(&self) -> Result<u64> {
        if let Some(position) = self.read()? {
            debug!(stream = %self.stream, position, "checkpoint loaded");
            return Ok(position);
        }
        self.log.append(
            &self.stream,
            ExpectedVersion::NoStream,
            &[self.event(0)],
        )?;
        info!(stream = %self.stream, "checkpoint stream created at position 0");
        Ok(0)
    }

    /// Durably records `position` as the last finalized command entry.
    pub fn advance(&self, position: u64) -> Result<()> {
        self.log
            .append(&self.stream, ExpectedVersion::Any, &[self.event(position)])?;
        debug!(stream = %self.stream, position, "checkpoint advanced");
        Ok(())
    }

    fn event(&self, position: u64) -> NewEvent {
        NewEvent::new(self.event_type.clone(), json!({ "stream_position": position }))
    }
}
