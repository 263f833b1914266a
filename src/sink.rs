//! Signal sink (§6): display/persistence contracts and an append-only
//! JSON-lines persistence implementation. Each approved signal is written as
//! one record per line under a configurable directory, stamped `_saved_at`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::domain::Signal;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("persistence io failure on {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Receives rendered signals for display. Implementations (TUI, web push)
/// live outside this crate; the core only publishes through this trait.
pub trait DisplaySink: Send {
    fn add(&mut self, signal: &Signal);
}

pub trait PersistenceSink: Send {
    fn save(&mut self, signal: &Signal) -> Result<(), PersistenceError>;
    fn save_pattern(&mut self, stream: &str, record: &Value) -> Result<(), PersistenceError>;
    fn flush(&mut self) -> Result<(), PersistenceError>;
}

#[derive(Serialize)]
struct StampedRecord<'a, T: Serialize> {
    #[serde(rename = "_saved_at")]
    saved_at: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

struct StreamFile {
    path: PathBuf,
    buffer: Vec<String>,
}

/// One append-only file per stream (`signals`, `arbitrage`, `tape_reading`,
/// `system`), each guarded by its own lock so one slow writer never blocks
/// the others. Buffers are drained on `flush`.
pub struct JsonlPersistence {
    dir: PathBuf,
    streams: Mutex<HashMap<&'static str, StreamFile>>,
}

const STREAMS: [&str; 4] = ["signals", "arbitrage", "tape_reading", "system"];

impl JsonlPersistence {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut streams = HashMap::new();
        for name in STREAMS {
            streams.insert(name, StreamFile { path: dir.join(format!("{name}.jsonl")), buffer: Vec::new() });
        }
        Ok(Self { dir, streams: Mutex::new(streams) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn enqueue(&self, stream: &'static str, line: String) {
        let mut streams = self.streams.lock();
        if let Some(s) = streams.get_mut(stream) {
            s.buffer.push(line);
        }
    }

    fn stamped_line<T: Serialize>(body: &T) -> Result<String, PersistenceError> {
        let saved_at = chrono::Utc::now().to_rfc3339();
        let record = StampedRecord { saved_at: &saved_at, body };
        Ok(serde_json::to_string(&record)?)
    }
}

impl PersistenceSink for JsonlPersistence {
    fn save(&mut self, signal: &Signal) -> Result<(), PersistenceError> {
        let line = Self::stamped_line(signal)?;
        let stream = match signal.source {
            crate::domain::SignalSource::Confluence => "arbitrage",
            crate::domain::SignalSource::TapeReading => "tape_reading",
            crate::domain::SignalSource::Manipulation => "signals",
            crate::domain::SignalSource::System => "system",
        };
        self.enqueue(stream, line);
        Ok(())
    }

    fn save_pattern(&mut self, stream: &str, record: &Value) -> Result<(), PersistenceError> {
        let line = Self::stamped_line(record)?;
        let resolved = STREAMS.iter().find(|&&s| s == stream).copied().unwrap_or("system");
        self.enqueue(resolved, line);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PersistenceError> {
        let mut streams = self.streams.lock();
        for s in streams.values_mut() {
            if s.buffer.is_empty() {
                continue;
            }
            let file = open_append(&s.path).map_err(|e| PersistenceError::Io { path: s.path.clone(), source: e })?;
            let mut writer = BufWriter::new(file);
            for line in s.buffer.drain(..) {
                if let Err(e) = writeln!(writer, "{line}") {
                    error!(path = %s.path.display(), error = %e, "failed to write persisted record");
                }
            }
            if let Err(e) = writer.flush() {
                warn!(path = %s.path.display(), error = %e, "failed to flush persistence writer");
            }
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SignalLevel, SignalSource};
    use std::time::SystemTime;

    #[test]
    fn save_and_flush_appends_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut persistence = JsonlPersistence::new(dir.path()).unwrap();
        let mut signal = Signal::new(SignalSource::Confluence, SignalLevel::Alert, "buy confluence");
        signal.timestamp = SystemTime::UNIX_EPOCH;
        persistence.save(&signal).unwrap();
        persistence.flush().unwrap();

        let contents = fs::read_to_string(dir.path().join("arbitrage.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("_saved_at"));
    }

    #[test]
    fn save_pattern_falls_back_to_system_stream_for_unknown_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut persistence = JsonlPersistence::new(dir.path()).unwrap();
        persistence.save_pattern("bogus", &serde_json::json!({"pattern": "X"})).unwrap();
        persistence.flush().unwrap();
        let contents = fs::read_to_string(dir.path().join("system.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
