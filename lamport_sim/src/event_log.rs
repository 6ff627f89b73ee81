//! Per-node event log sinks.
//!
//! Each record is one line: `<event>\t<timestamp>\t<clock>`, where the
//! timestamp is wall-clock nanoseconds since the UNIX epoch. The sinks only
//! append; nothing in the simulator reads the logs back.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lamport_env::NodeId;

/// Append-only destination for formatted event records.
pub trait EventLog: Send {
    /// Appends one record. `line` carries no trailing newline.
    fn append(&mut self, line: &str) -> io::Result<()>;
}

/// Formats one event record.
pub fn format_record(event: &str, timestamp_ns: u128, clock: u64) -> String {
    format!("{event}\t{timestamp_ns}\t{clock}")
}

/// Log file for a node: `<dir>/log<id>.txt`.
pub fn log_path(dir: &Path, id: NodeId) -> PathBuf {
    dir.join(format!("log{id}.txt"))
}

/// Event log backed by a file opened in append mode.
///
/// Every record is flushed as it is written so a killed run still leaves a
/// complete prefix on disk.
pub struct FileEventLog {
    path: PathBuf,
    file: File,
}

impl FileEventLog {
    /// Opens (creating if needed) the log file for `id` under `dir`.
    pub fn open(dir: &Path, id: NodeId) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = log_path(dir, id);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventLog for FileEventLog {
    fn append(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.file, "{line}")?;
        self.file.flush()
    }
}

/// In-memory event log. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryEventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record appended so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl EventLog for MemoryEventLog {
    fn append(&mut self, line: &str) -> io::Result<()> {
        self.lines.lock().unwrap().push(line.to_string());
        Ok(())
    }
}
