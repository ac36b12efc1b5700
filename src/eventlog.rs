//! Command log transport.
//!
//! The log is a set of named append-only streams. Every event in a stream has a
//! position, unique within the stream and strictly increasing in append order.
//! Consumers either read a whole stream or subscribe to it from a position and
//! receive every later event in order.
//!
//! The [`EventLog`] trait is the seam the consumer and the checkpoint store are
//! written against; [`FileEventLog`] is the local JSON-lines implementation.

mod file;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::model::CommandEntry;

pub use file::FileEventLog;

/// Errors raised by the log transport.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("invalid stream name: {0:?}")]
    InvalidStreamName(String),

    #[error("wrong expected version on {stream}: expected {expected}, stream is at {actual}")]
    WrongExpectedVersion {
        stream: String,
        expected: ExpectedVersion,
        actual: ExpectedVersion,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, LogError>;

/// Optimistic concurrency check applied on append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Append regardless of the stream's state.
    Any,

    /// The stream must not hold any events yet.
    NoStream,

    /// The stream's last event must be at this position.
    Exact(u64),
}

impl ExpectedVersion {
    /// The expectation a stream whose last event is at `last` satisfies exactly.
    pub fn of(last: Option<u64>) -> Self {
        last.map_or(Self::NoStream, Self::Exact)
    }

    /// Whether a stream whose last event is at `last` meets this expectation.
    pub fn admits(self, last: Option<u64>) -> bool {
        match self {
            Self::Any => true,
            Self::NoStream => last.is_none(),
            Self::Exact(position) => last == Some(position),
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::NoStream => f.write_str("no stream"),
            Self::Exact(position) => write!(f, "position {position}"),
        }
    }
}

/// An event to append.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub data: serde_json::Value,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// An event as stored in a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
    pub position: u64,
    pub event_type: String,
    pub data: serde_json::Value,
    pub recorded_at: Timestamp,
}

impl RecordedEvent {
    /// The event as a command entry: its position and raw payload bytes.
    pub fn command_entry(&self) -> Result<CommandEntry> {
        Ok(CommandEntry {
            position: self.position,
            payload: serde_json::to_vec(&self.data)?,
        })
    }
}

/// How a subscription behaves once it reaches the end of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeMode {
    /// Keep waiting for new events, polling at the given interval.
    Follow { poll_interval: Duration },

    /// End at the current end of the stream.
    CatchUp,
}

/// Operator-requested shutdown, shared between the signal handler and the loop.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An ordered, cancellable feed of events from one stream.
///
/// The feed ends when it is stopped, when shutdown is requested, or (in
/// catch-up mode) when it reaches the end of the stream. A transport error is
/// yielded once and ends the feed.
pub trait Subscription: Iterator<Item = Result<RecordedEvent>> {
    /// Stops the subscription. Later calls to `next` return `None`.
    fn stop(&mut self);
}

/// An append-only log of named streams.
pub trait EventLog {
    /// Reads every event in a stream, oldest first.
    ///
    /// Fails with [`LogError::StreamNotFound`] when the stream holds no events.
    fn read(&self, stream: &str) -> Result<Vec<RecordedEvent>>;

    /// Whether the stream holds at least one event.
    fn exists(&self, stream: &str) -> Result<bool> {
        match self.read(stream) {
            Ok(_) => Ok(true),
            Err(LogError::StreamNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Appends events to a stream and returns the position of the last one.
    fn append(&self, stream: &str, expected: ExpectedVersion, events: &[NewEvent]) -> Result<u64>;

    /// Subscribes to a stream, delivering every event positioned after `after`.
    fn subscribe(
        &self,
        stream: &str,
        after: u64,
        mode: SubscribeMode,
        shutdown: Shutdown,
    ) -> Result<Box<dyn Subscription + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_version_admission() {
        assert!(ExpectedVersion::Any.admits(None));
        assert!(ExpectedVersion::Any.admits(Some(3)));
        assert!(ExpectedVersion::NoStream.admits(None));
        assert!(!ExpectedVersion::NoStream.admits(Some(1)));
        assert!(ExpectedVersion::Exact(3).admits(Some(3)));
        assert!(!ExpectedVersion::Exact(3).admits(Some(4)));
        assert!(!ExpectedVersion::Exact(3).admits(None));
    }

    #[test]
    fn shutdown_is_shared_between_clones() {
        let shutdown = Shutdown::new();
        let handle = shutdown.clone();
        assert!(!shutdown.is_requested());

        handle.request();
        assert!(shutdown.is_requested());
    }

    #[test]
    fn command_entry_carries_position_and_payload() {
        let event = RecordedEvent {
            position: 7,
            event_type: "train".into(),
            data: serde_json::json!({"task_type_id": 1}),
            recorded_at: Timestamp::now(),
        };

        let entry = event.command_entry().unwrap();
        assert_eq!(entry.position, 7);
        assert_eq!(entry.payload, br#"{"task_type_id":1}"#);
    }
}
