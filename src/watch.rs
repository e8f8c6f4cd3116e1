/// Change detection for the watched file.
///
/// Polls the file's modification time rather than subscribing to
/// filesystem events; one sample per supervisor poll cycle.
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Fault;

/// The watched file and the modification time recorded at session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredTarget {
    path: PathBuf,
    last_modified_at: SystemTime,
}

impl MonitoredTarget {
    /// Stat `path` and record its current modification time.
    pub fn stat(path: impl Into<PathBuf>) -> Result<Self, Fault> {
        let path = path.into();
        let last_modified_at = modified_at(&path)?;
        Ok(Self {
            path,
            last_modified_at,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_modified_at(&self) -> SystemTime {
        self.last_modified_at
    }
}

fn modified_at(path: &Path) -> Result<SystemTime, Fault> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|source| Fault::FileAccess {
            path: path.to_path_buf(),
            source,
        })
}

/// Take one sample and report whether it differs from the recorded time.
///
/// Equal timestamps never count as a change. A file that can no longer be
/// stat-ed is a fault, not "unchanged".
pub fn observe(target: &MonitoredTarget) -> Result<bool, Fault> {
    let current = modified_at(&target.path)?;
    Ok(current != target.last_modified_at)
}
