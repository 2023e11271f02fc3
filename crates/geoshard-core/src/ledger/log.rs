//! Durable per-item progress log.
//!
//! Appends one JSONL entry per recorded outcome and replays the log into a
//! latest-state map on open, giving keyed upsert semantics over an
//! append-only file: repeated failures overwrite, a later success clears a
//! prior failure. A lock file enforces one pipeline run per working
//! directory at a time.

use super::entries::{FailureStep, LedgerEntry, Outcome};
use crate::{Error, LedgerError, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LEDGER_FILE: &str = "ledger.jsonl";
const LOCK_FILE: &str = "ledger.lock";

/// Aggregated ledger statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    /// Items whose latest outcome is success
    pub success_count: u64,
    /// Items whose latest outcome is failure
    pub failed_count: u64,
    /// Failure counts keyed by pipeline step
    pub failed_by_step: BTreeMap<FailureStep, u64>,
}

/// Durable progress ledger for one working directory.
#[derive(Debug)]
pub struct ProgressLedger {
    ledger_path: PathBuf,
    lock_path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    state: Mutex<BTreeMap<String, LedgerEntry>>,
}

impl ProgressLedger {
    /// Open the ledger in `workdir`, creating the directory as needed.
    ///
    /// Fails fast with [`LedgerError::LockHeld`] when another run already
    /// owns the directory.
    pub fn open(workdir: &Path) -> Result<Self> {
        fs::create_dir_all(workdir)
            .map_err(|e| LedgerError::WriteFailed(format!("create {}: {}", workdir.display(), e)))?;

        let lock_path = workdir.join(LOCK_FILE);
        let mut lock_file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LedgerError::LockHeld {
                    path: lock_path.display().to_string(),
                }
                .into());
            }
            Err(e) => {
                return Err(LedgerError::WriteFailed(format!(
                    "acquire {}: {}",
                    lock_path.display(),
                    e
                ))
                .into());
            }
        };
        let _ = writeln!(lock_file, "{}", std::process::id());

        let ledger_path = workdir.join(LEDGER_FILE);
        let state = match Self::replay(&ledger_path) {
            Ok(state) => state,
            Err(e) => {
                // Replay failed before construction; release the lock so a
                // repaired directory can be reopened.
                let _ = fs::remove_file(&lock_path);
                return Err(e);
            }
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&ledger_path)
            .map_err(|e| {
                let _ = fs::remove_file(&lock_path);
                LedgerError::WriteFailed(format!("open {}: {}", ledger_path.display(), e))
            })?;

        if !state.is_empty() {
            info!(
                path = %ledger_path.display(),
                items = state.len(),
                "Progress ledger replayed"
            );
        }

        Ok(Self {
            ledger_path,
            lock_path,
            writer: Mutex::new(BufWriter::new(file)),
            state: Mutex::new(state),
        })
    }

    fn replay(path: &Path) -> Result<BTreeMap<String, LedgerEntry>> {
        let mut state = BTreeMap::new();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(state),
            Err(e) => {
                return Err(
                    LedgerError::WriteFailed(format!("open {}: {}", path.display(), e)).into(),
                )
            }
        };

        let reader = BufReader::new(file);
        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| LedgerError::Corrupted {
                line: line_num as u64 + 1,
                message: e.to_string(),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: LedgerEntry =
                serde_json::from_str(&line).map_err(|e| LedgerError::Corrupted {
                    line: line_num as u64 + 1,
                    message: format!("JSON parse error: {}", e),
                })?;
            // Latest entry per item wins.
            state.insert(entry.item_id.clone(), entry);
        }
        Ok(state)
    }

    /// Record the outcome for one item.
    pub fn record(&self, item_id: &str, outcome: Outcome) -> Result<()> {
        let entry = LedgerEntry {
            item_id: item_id.to_string(),
            outcome,
            recorded_at: Utc::now(),
        };

        let json = serde_json::to_string(&entry).map_err(|e| Error::Serialization(e.to_string()))?;

        {
            let mut writer = self.writer.lock();
            writeln!(writer, "{}", json)
                .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;
            writer
                .flush()
                .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;
        }

        self.state.lock().insert(entry.item_id.clone(), entry);
        Ok(())
    }

    /// Aggregate statistics over the latest outcome of every item.
    pub fn statistics(&self) -> LedgerStats {
        let state = self.state.lock();
        let mut stats = LedgerStats::default();
        for entry in state.values() {
            match entry.outcome {
                Outcome::Success => stats.success_count += 1,
                Outcome::Failed { step } => {
                    stats.failed_count += 1;
                    *stats.failed_by_step.entry(step).or_insert(0) += 1;
                }
            }
        }
        stats
    }

    /// Item ids whose latest outcome is a failure.
    pub fn pending_retries(&self) -> BTreeSet<String> {
        self.state
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.outcome.is_success())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Rewrite the log with one line per item.
    ///
    /// The append log grows with every recorded outcome; compaction at run
    /// finalization keeps replay on the next open proportional to the item
    /// count.
    pub fn compact(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        let state = self.state.lock();

        writer
            .flush()
            .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;

        let tmp_path = self.ledger_path.with_extension("jsonl.tmp");
        {
            let tmp = File::create(&tmp_path)
                .map_err(|e| LedgerError::WriteFailed(format!("create tmp: {}", e)))?;
            let mut tmp_writer = BufWriter::new(tmp);
            for entry in state.values() {
                let json =
                    serde_json::to_string(entry).map_err(|e| Error::Serialization(e.to_string()))?;
                writeln!(tmp_writer, "{}", json)
                    .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;
            }
            tmp_writer
                .flush()
                .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;
            tmp_writer
                .get_ref()
                .sync_all()
                .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;
        }

        fs::rename(&tmp_path, &self.ledger_path)
            .map_err(|e| LedgerError::WriteFailed(format!("rename: {}", e)))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.ledger_path)
            .map_err(|e| LedgerError::WriteFailed(format!("reopen: {}", e)))?;
        *writer = BufWriter::new(file);

        debug!(items = state.len(), "Ledger compacted");
        Ok(())
    }

    /// Path of the on-disk log file.
    pub fn path(&self) -> &Path {
        &self.ledger_path
    }
}

impl Drop for ProgressLedger {
    fn drop(&mut self) {
        let _ = self.writer.lock().flush();
        if let Err(e) = fs::remove_file(&self.lock_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.lock_path.display(), error = %e, "Failed to release ledger lock");
            }
        }
    }
}
