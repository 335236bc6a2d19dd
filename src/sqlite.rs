// Durable backend: JSONL source of truth with a SQLite cache

use crate::backend::{Backend, Change};
use crate::jsonl;
use crate::task::{Task, now_ms};
use eyre::{Context, Result, eyre};
use rusqlite::{Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CURRENT_VERSION: u32 = 1;
const STORE_DIR: &str = ".devote";
const DB_FILE: &str = "devote.db";
const LOG_FILE: &str = "tasks.jsonl";

/// Task backend persisted under a `.devote` directory
pub struct SqliteBackend {
    base_path: PathBuf,
    db: Connection,
}

impl SqliteBackend {
    /// Open or create a backend at the given path
    ///
    /// The data lives in a `.devote` subdirectory of the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let base_path = path.as_ref().join(STORE_DIR);

        // Create directory if it doesn't exist
        fs::create_dir_all(&base_path).context("Failed to create store directory")?;

        // Open SQLite database
        let db_path = base_path.join(DB_FILE);
        let db = Connection::open(&db_path).context("Failed to open SQLite database")?;

        let mut backend = Self { base_path, db };

        backend.create_schema()?;
        backend.create_gitignore()?;
        backend.write_version()?;

        // Sync if stale
        if backend.is_stale()? {
            info!("Database is stale, syncing from JSONL");
            backend.sync()?;
        }

        Ok(backend)
    }

    /// Get the base path of this backend
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// How long a commit waits for other connections' locks before failing
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.db.busy_timeout(timeout).context("Failed to set busy timeout")?;
        Ok(())
    }

    fn log_path(&self) -> PathBuf {
        self.base_path.join(LOG_FILE)
    }

    fn create_schema(&self) -> Result<()> {
        debug!("Creating database schema");

        self.db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY NOT NULL,
                task TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_timestamp ON tasks(timestamp, id);

            -- Sync metadata for staleness detection
            CREATE TABLE IF NOT EXISTS sync_metadata (
                log TEXT PRIMARY KEY,
                last_sync_time INTEGER NOT NULL,
                file_mtime INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    fn create_gitignore(&self) -> Result<()> {
        let gitignore_path = self.base_path.join(".gitignore");
        if !gitignore_path.exists() {
            fs::write(gitignore_path, "devote.db\ndevote.db-shm\ndevote.db-wal\n")?;
        }
        Ok(())
    }

    fn write_version(&self) -> Result<()> {
        let version_path = self.base_path.join(".version");
        if !version_path.exists() {
            fs::write(version_path, CURRENT_VERSION.to_string())?;
        }
        Ok(())
    }

    fn log_mtime(&self) -> Result<Option<i64>> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(file_mtime(&path)?))
    }

    /// Check if the cache needs rebuilding from JSONL
    ///
    /// Returns true if the log has been modified since the last sync, or has
    /// never been synced.
    pub fn is_stale(&self) -> Result<bool> {
        let file_mtime = match self.log_mtime()? {
            Some(mtime) => mtime,
            None => return Ok(false),
        };

        let stored_mtime: Option<i64> = self
            .db
            .query_row(
                "SELECT file_mtime FROM sync_metadata WHERE log = ?1",
                [LOG_FILE],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match stored_mtime {
            None => true,                      // Never synced
            Some(mtime) => file_mtime > mtime, // File modified
        })
    }

    /// Rebuild the SQLite cache from the JSONL log
    ///
    /// Returns the number of live tasks after replay.
    pub fn sync(&mut self) -> Result<usize> {
        info!("Syncing database from JSONL");

        let tasks = jsonl::replay(&self.log_path())?;
        let file_mtime = self.log_mtime()?.unwrap_or(0);

        let tx = self.db.transaction()?;
        tx.execute("DELETE FROM tasks", [])?;
        for task in tasks.values() {
            Self::insert_tx(&tx, task)?;
        }
        Self::record_sync_mtime(&tx, file_mtime)?;
        tx.commit()?;

        info!(count = tasks.len(), "Sync complete");
        Ok(tasks.len())
    }

    fn insert_tx(tx: &rusqlite::Transaction, task: &Task) -> Result<()> {
        tx.execute(
            "INSERT INTO tasks (id, task, timestamp, completed) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![task.id.to_string(), task.task, task.timestamp, task.completed],
        )
        .with_context(|| format!("Failed to insert task {}", task.id))?;
        Ok(())
    }

    /// Record the log's mtime as synced and commit
    fn finish_tx(tx: rusqlite::Transaction, log_path: &Path) -> Result<()> {
        // Our own append must not make the cache look stale
        Self::record_sync_mtime(&tx, file_mtime(log_path)?)?;
        tx.commit().context("Failed to commit SQLite transaction")?;
        Ok(())
    }

    fn record_sync_mtime(tx: &rusqlite::Transaction, file_mtime: i64) -> Result<()> {
        tx.execute(
            "INSERT OR REPLACE INTO sync_metadata (log, last_sync_time, file_mtime)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![LOG_FILE, now_ms(), file_mtime],
        )?;
        Ok(())
    }
}

impl Backend for SqliteBackend {
    fn load(&mut self) -> Result<Vec<Task>> {
        let mut stmt = self
            .db
            .prepare("SELECT id, task, timestamp, completed FROM tasks ORDER BY timestamp ASC, id ASC")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?;

        let mut results = Vec::new();
        for row_result in rows {
            let (id, task, timestamp, completed) = row_result?;
            let id = id
                .parse()
                .map_err(|e| eyre!("Invalid task id {:?} in database: {}", id, e))?;
            results.push(Task {
                id,
                task,
                timestamp,
                completed,
            });
        }

        Ok(results)
    }

    fn apply(&mut self, changes: &[Change]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        debug!(count = changes.len(), "apply: writing batch");

        // 1. Stage everything in SQLite; dropping `tx` rolls back
        let tx = self.db.transaction()?;
        for change in changes {
            match change {
                Change::Insert(task) => Self::insert_tx(&tx, task)?,
                Change::Delete(id) => {
                    tx.execute("DELETE FROM tasks WHERE id = ?1", [id.to_string()])?;
                }
            }
        }

        // 2. Append to JSONL, keeping the lock until SQLite has committed
        let log_path = self.base_path.join(LOG_FILE);
        let appended = match jsonl::append_changes(&log_path, changes)? {
            Some(appended) => appended,
            None => return Ok(()),
        };

        // 3. Commit the cache; on failure the log must not keep the batch
        if let Err(e) = Self::finish_tx(tx, &log_path) {
            warn!(error = %e, start = appended.start(), "apply: cache commit failed, removing batch from JSONL");
            appended
                .undo()
                .context("Failed to remove uncommitted batch from JSONL")?;
            return Err(e);
        }

        Ok(())
    }
}

/// Modification time of a file in seconds since epoch
fn file_mtime(path: &Path) -> Result<i64> {
    let mtime = fs::metadata(path)?
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(mtime)
}
