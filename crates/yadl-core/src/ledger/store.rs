//! Durable ledger store: one JSON document per batch.
//!
//! Files live under the XDG state directory
//! (`~/.local/state/yadl/ledgers/<batch-id>.json`). Every write goes
//! through a temp file in the same directory followed by an atomic rename,
//! so an interruption mid-write can never corrupt the previous state.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::BatchJob;

/// Ledger store failure. Everything here is fatal to the run; item-level
/// failures never surface through this type.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("no ledger found for batch {0}")]
    NotFound(String),

    #[error("a ledger already exists for batch {0}; resume it or clear it first")]
    AlreadyExists(String),

    #[error("ledger for batch {id} is corrupt: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("ledger store unwritable: {0}")]
    Unwritable(#[from] std::io::Error),
}

/// Handle to the on-disk ledger directory.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    dir: PathBuf,
}

impl LedgerStore {
    /// Open (or create) the default ledger directory under XDG state home.
    pub fn open_default() -> Result<Self, LedgerError> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("yadl")
            .map_err(|e| LedgerError::Unwritable(std::io::Error::other(e)))?;
        let dir = xdg_dirs.get_state_home().join("yadl").join("ledgers");
        Self::open_at(dir)
    }

    /// Open (or create) a ledger directory at a specific path. Intended for
    /// tests so ledgers can live in a temp directory.
    pub fn open_at(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.path_for(id).exists()
    }

    /// Load the ledger for a batch id.
    pub fn load(&self, id: &str) -> Result<BatchJob, LedgerError> {
        let path = self.path_for(id);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LedgerError::NotFound(id.to_string()))
            }
            Err(e) => return Err(LedgerError::Unwritable(e)),
        };
        serde_json::from_str(&data).map_err(|source| LedgerError::Corrupt {
            id: id.to_string(),
            source,
        })
    }

    /// Write the first ledger for a batch. Refuses to overwrite: an
    /// existing ledger must be resumed or cleared explicitly.
    pub fn create(&self, job: &mut BatchJob) -> Result<(), LedgerError> {
        if self.exists(&job.id) {
            return Err(LedgerError::AlreadyExists(job.id.clone()));
        }
        self.persist(job)
    }

    /// Durably write the ledger: serialize into a temp file in the ledger
    /// directory, flush, then rename over the target.
    pub fn persist(&self, job: &mut BatchJob) -> Result<(), LedgerError> {
        job.touch(unix_timestamp());
        let path = self.path_for(&job.id);
        let json = serde_json::to_vec_pretty(job).map_err(|source| LedgerError::Corrupt {
            id: job.id.clone(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .map_err(|e| LedgerError::Unwritable(e.error))?;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), LedgerError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LedgerError::NotFound(id.to_string()))
            }
            Err(e) => Err(LedgerError::Unwritable(e)),
        }
    }

    /// All readable ledgers in the store, unordered. Corrupt files are
    /// logged and skipped rather than failing the listing.
    pub fn list(&self) -> Result<Vec<BatchJob>, LedgerError> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(id) {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::warn!("skipping unreadable ledger {}: {}", path.display(), e),
            }
        }
        Ok(jobs)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Current time as Unix seconds (ledger timestamps).
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
