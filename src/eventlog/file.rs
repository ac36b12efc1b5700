//! File-backed event log: one JSON-lines file per stream.
//!
//! ```text
//! <root>/
//!   <stream>.jsonl    # one RecordedEvent per line, positions 1, 2, 3, ...
//! ```
//!
//! Appends hold an exclusive lock on the stream file from reading the last
//! position until the new lines are synced, so concurrent writers (in this
//! process or another) never hand out the same position twice. A trailing
//! line without a newline is an append still in flight and is not read.

use std::{
    collections::VecDeque,
    fs,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    thread,
};

// Traits must be in scope for `.read_line()` on `BufReader` and `.write_all()` on `File`.
use io::{BufRead, Write};

use jiff::Timestamp;
use tracing::debug;

use super::{
    EventLog, ExpectedVersion, LogError, NewEvent, RecordedEvent, Result, Shutdown,
    SubscribeMode, Subscription,
};

/// Local file-based storage for event streams.
pub struct FileEventLog {
    root: PathBuf,
}

impl FileEventLog {
    /// Creates a log rooted at the given directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn stream_path(&self, stream: &str) -> Result<PathBuf> {
        let valid = !stream.is_empty()
            && stream
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !stream.starts_with('.');
        if !valid {
            return Err(LogError::InvalidStreamName(stream.to_string()));
        }
        Ok(self.root.join(format!("{stream}.jsonl")))
    }
}

/// Bytes read from the end of a stream file when looking for its last event.
const TAIL_WINDOW: u64 = 4096;

/// Position of the last complete event in an open stream file, `None` if it holds none.
///
/// Reads backwards from the end, widening the window until it spans a whole line.
fn last_position(file: &mut fs::File) -> Result<Option<u64>> {
    let len = file.metadata()?.len();
    let mut window = TAIL_WINDOW;
    loop {
        let start = len.saturating_sub(window);
        file.seek(SeekFrom::Start(start))?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail)?;

        // Ignore a trailing partial line.
        let Some(end) = tail.iter().rposition(|b| *b == b'\n') else {
            if start == 0 {
                return Ok(None);
            }
            window *= 2;
            continue;
        };
        let complete = &tail[..end];
        let line = match complete.iter().rposition(|b| *b == b'\n') {
            Some(i) => &complete[i + 1..],
            None if start == 0 => complete,
            None => {
                window *= 2;
                continue;
            }
        };
        if line.trim_ascii().is_empty() {
            // Blank separator lines are never written by `append`; fall back to a full scan.
            file.seek(SeekFrom::Start(0))?;
            return Ok(scan_events(io::BufReader::new(&*file))?
                .last()
                .map(|e| e.position));
        }
        let event: RecordedEvent = serde_json::from_slice(line)?;
        return Ok(Some(event.position));
    }
}

impl EventLog for FileEventLog {
    fn read(&self, stream: &str) -> Result<Vec<RecordedEvent>> {
        let events = read_events(&self.stream_path(stream)?)?;
        if events.is_empty() {
            return Err(LogError::StreamNotFound(stream.to_string()));
        }
        Ok(events)
    }

    fn append(&self, stream: &str, expected: ExpectedVersion, events: &[NewEvent]) -> Result<u64> {
        let path = self.stream_path(stream)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        // Released when `file` is dropped.
        file.lock()?;

        let last = last_position(&mut file)?;
        if !expected.admits(last) {
            return Err(LogError::WrongExpectedVersion {
                stream: stream.to_string(),
                expected,
                actual: ExpectedVersion::of(last),
            });
        }

        let mut position = last.unwrap_or(0);
        let mut buf = String::new();
        for event in events {
            position += 1;
            let recorded = RecordedEvent {
                position,
                event_type: event.event_type.clone(),
                data: event.data.clone(),
                recorded_at: Timestamp::now(),
            };
            buf.push_str(&serde_json::to_string(&recorded)?);
            buf.push('\n');
        }
        if buf.is_empty() {
            return Ok(position);
        }

        file.write_all(buf.as_bytes())?;
        file.sync_data()?;

        debug!(stream, position, count = events.len(), "appended events");
        Ok(position)
    }

    fn subscribe(
        &self,
        stream: &str,
        after: u64,
        mode: SubscribeMode,
        shutdown: Shutdown,
    ) -> Result<Box<dyn Subscription + '_>> {
        let path = self.stream_path(stream)?;
        debug!(stream, after, "subscribed");
        Ok(Box::new(FileSubscription {
            path,
            offset: 0,
            after,
            pending: VecDeque::new(),
            mode,
            shutdown,
            stopped: false,
        }))
    }
}

/// Reads every complete line of a stream file. A missing file is an empty stream.
fn read_events(path: &Path) -> Result<Vec<RecordedEvent>> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    scan_events(io::BufReader::new(file))
}

/// Parses every complete line from a reader positioned at the start of a stream.
fn scan_events(mut reader: impl BufRead) -> Result<Vec<RecordedEvent>> {
    let mut events = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 || !line.ends_with('\n') {
            break;
        }
        let trimmed = line.trim_end();
        if !trimmed.is_empty() {
            events.push(serde_json::from_str(trimmed)?);
        }
    }
    Ok(events)
}

/// Tails a stream file from a byte offset.
struct FileSubscription {
    path: PathBuf,
    offset: u64,
    after: u64,
    pending: VecDeque<RecordedEvent>,
    mode: SubscribeMode,
    shutdown: Shutdown,
    stopped: bool,
}

impl FileSubscription {
    /// Reads newly completed lines into `pending`. Returns how many were queued.
    fn fill(&mut self) -> Result<usize> {
        let mut file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(self.offset))?;
        let mut chunk = String::new();
        file.read_to_string(&mut chunk)?;

        // Only consume up to the last complete line.
        let Some(end) = chunk.rfind('\n') else {
            return Ok(0);
        };
        let complete = &chunk[..=end];
        self.offset += complete.len() as u64;

        let mut queued = 0;
        for line in complete.lines().filter(|l| !l.trim().is_empty()) {
            let event: RecordedEvent = serde_json::from_str(line)?;
            if event.position > self.after {
                self.after = event.position;
                self.pending.push_back(event);
                queued += 1;
            }
        }
        Ok(queued)
    }
}

impl Iterator for FileSubscription {
    type Item = Result<RecordedEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.stopped {
                return None;
            }
            if self.shutdown.is_requested() {
                debug!(path = %self.path.display(), "shutdown requested, ending subscription");
                self.stopped = true;
                return None;
            }
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            match self.fill() {
                Ok(0) => match self.mode {
                    SubscribeMode::CatchUp => {
                        self.stopped = true;
                        return None;
                    }
                    SubscribeMode::Follow { poll_interval } => thread::sleep(poll_interval),
                },
                Ok(_) => {}
                Err(e) => {
                    self.stopped = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl Subscription for FileSubscription {
    fn stop(&mut self) {
        self.stopped = true;
        self.pending.clear();
    }
}
