use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FilterError, Result};
use crate::identity::Identifier;

/// The two points of the pipeline at which a message is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Received,
    Filtered,
}

impl Checkpoint {
    pub fn extension(self) -> &'static str {
        match self {
            Checkpoint::Received => "in",
            Checkpoint::Filtered => "filtered",
        }
    }
}

/// Snapshot directory shared by every running filter instance. Files are
/// keyed by message identifier, so no locking is done.
#[derive(Debug, Clone)]
pub struct StagingStore {
    dir: PathBuf,
}

pub fn exists(dir: &Path) -> bool {
    dir.is_dir()
}

impl StagingStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !exists(&dir) {
            return Err(FilterError::StagingDirectoryMissing(dir));
        }
        Ok(Self { dir })
    }

    pub fn path_for(&self, id: &Identifier, checkpoint: Checkpoint) -> PathBuf {
        self.dir
            .join(format!("{}.{}", id, checkpoint.extension()))
    }

    /// The directory is checked again on every write: it is provisioned
    /// externally and may disappear between invocations.
    pub fn write(&self, id: &Identifier, checkpoint: Checkpoint, bytes: &[u8]) -> Result<PathBuf> {
        if !exists(&self.dir) {
            return Err(FilterError::StagingDirectoryMissing(self.dir.clone()));
        }
        let path = self.path_for(id, checkpoint);
        info!("[staging] {}: saving email to disk ({})", id, path.display());
        fs::write(&path, bytes)
            .map_err(|e| FilterError::io(format!("writing {}", path.display()), e))?;
        Ok(path)
    }

    pub fn read(&self, id: &Identifier, checkpoint: Checkpoint) -> Result<Vec<u8>> {
        let path = self.path_for(id, checkpoint);
        debug!("[staging] {}: reading {} snapshot from {}", id, checkpoint.extension(), path.display());
        fs::read(&path).map_err(|e| FilterError::io(format!("reading {}", path.display()), e))
    }

    /// Delete every snapshot belonging to `id`. Returns the number of files removed.
    pub fn purge(&self, id: &Identifier) -> Result<usize> {
        let prefix = format!("{}.", id);
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| FilterError::io(format!("listing {}", self.dir.display()), e))?;

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| FilterError::io(format!("listing {}", self.dir.display()), e))?;
            if !entry.file_name().to_string_lossy().starts_with(&prefix) {
                continue;
            }
            let path = entry.path();
            debug!("[staging] {}: removing {}", id, path.display());
            fs::remove_file(&path)
                .map_err(|e| FilterError::io(format!("removing {}", path.display()), e))?;
            removed += 1;
        }
        info!("[staging] {}: deleted {} email file(s) from disk", id, removed);
        Ok(removed)
    }
}
