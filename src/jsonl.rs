// JSONL log operations

use crate::backend::Change;
use crate::task::{Task, now_ms};
use eyre::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// One line of the task log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entry {
    Tombstone { id: Uuid, deleted: bool, deleted_at: i64 },
    Task(Task),
}

impl Entry {
    pub fn id(&self) -> Uuid {
        match self {
            Entry::Tombstone { id, .. } => *id,
            Entry::Task(task) => task.id,
        }
    }

    fn from_change(change: &Change, at: i64) -> Self {
        match change {
            Change::Insert(task) => Entry::Task(task.clone()),
            Change::Delete(id) => Entry::Tombstone {
                id: *id,
                deleted: true,
                deleted_at: at,
            },
        }
    }
}

/// A batch written to the log, still holding the exclusive file lock
///
/// Dropping it keeps the batch and releases the lock. [`Appended::undo`]
/// truncates the log back to where the batch started.
#[derive(Debug)]
pub struct Appended {
    file: File,
    start: u64,
}

impl Appended {
    /// Log length before the batch was written
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Remove the batch from the log again
    pub fn undo(self) -> Result<()> {
        truncate_to(&self.file, self.start)
    }
}

fn truncate_to(file: &File, len: u64) -> Result<()> {
    file.set_len(len).context("Failed to truncate JSONL file")?;
    file.sync_all()?;
    Ok(())
}

/// True if the file is non-empty and does not end in a newline
fn ends_mid_line(file: &mut File, len: u64) -> Result<bool> {
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Append a batch of changes to a JSONL file
///
/// The batch is written with a single `write_all` under an exclusive lock and
/// flushed to disk before returning. A torn write is truncated away before the
/// error is returned, and a torn line left by an earlier crash is terminated
/// first so the batch always starts on its own line.
///
/// Returns `None` for an empty batch.
pub fn append_changes(path: &Path, changes: &[Change]) -> Result<Option<Appended>> {
    if changes.is_empty() {
        return Ok(None);
    }

    let at = now_ms();
    let mut buf = String::new();
    for change in changes {
        let json = serde_json::to_string(&Entry::from_change(change, at)).context("Failed to serialize log entry")?;
        buf.push_str(&json);
        buf.push('\n');
    }

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .context("Failed to open JSONL file for appending")?;

    // Acquire exclusive lock before writing
    file.lock_exclusive().context("Failed to acquire file lock")?;

    let start = file.metadata()?.len();
    if ends_mid_line(&mut file, start)? {
        warn!(file = ?path, "JSONL file ends mid-line, terminating it");
        buf.insert(0, '\n');
    }

    let written = file.write_all(buf.as_bytes()).and_then(|_| file.sync_all());
    if let Err(e) = written {
        truncate_to(&file, start)?;
        return Err(e).context("Failed to append to JSONL file");
    }

    Ok(Some(Appended { file, start }))
}

/// Replay a JSONL file into the set of live tasks
///
/// Lines are applied in file order: the last entry for an id wins and a
/// tombstone removes the task. Unreadable or malformed lines are skipped.
pub fn replay(path: &Path) -> Result<HashMap<Uuid, Task>> {
    if !path.exists() {
        // File doesn't exist yet, return empty map
        return Ok(HashMap::new());
    }

    let file = File::open(path).context("Failed to open JSONL file")?;
    let reader = BufReader::new(file);
    let mut tasks: HashMap<Uuid, Task> = HashMap::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!(
                    file = ?path,
                    line = line_num + 1,
                    error = ?e,
                    "Failed to read line, skipping"
                );
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let entry: Entry = match serde_json::from_str(&line) {
            Ok(e) => e,
            Err(e) => {
                warn!(
                    file = ?path,
                    line = line_num + 1,
                    error = ?e,
                    "Failed to parse JSON, skipping"
                );
                continue;
            }
        };

        match entry {
            Entry::Task(task) => {
                tasks.insert(task.id, task);
            }
            Entry::Tombstone { id, deleted: true, .. } => {
                tasks.remove(&id);
            }
            Entry::Tombstone { .. } => {}
        }
    }

    info!(file = ?path, count = tasks.len(), "Replayed tasks from JSONL");

    Ok(tasks)
}
