use log::debug;

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::{ Duration, SystemTime };

use crate::error::LprError;

/// Snapshots in the scratch directory older than this are deleted.
pub const SCRATCH_MAX_AGE: Duration = Duration::from_secs(10);

/// What a sweep did. Errors are collected, never raised.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub errors: Vec<LprError>,
}

/// Deletes every non-directory entry of `dir` last modified strictly before `now - max_age`.
pub fn sweep(dir: impl AsRef<Path>, max_age: Duration) -> SweepReport {
    sweep_at(dir.as_ref(), max_age, SystemTime::now())
}

fn sweep_at(dir: &Path, max_age: Duration, now: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();
    let threshold = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            report.errors.push(LprError::io(format!("error opening directory {}", dir.display()), e));
            return report;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.errors.push(LprError::io(format!("error reading directory {}", dir.display()), e));
                continue;
            }
        };
        let path = entry.path();
        let modified = fs::metadata(&path).and_then(|meta| {
            if meta.is_dir() { Ok(None) } else { meta.modified().map(Some) }
        });
        match modified {
            Ok(Some(modified)) if modified < threshold => {
                match fs::remove_file(&path) {
                    Ok(()) => report.removed.push(path),
                    Err(e) => report.errors.push(LprError::io(format!("error deleting file {}", path.display()), e)),
                }
            }
            Ok(_) => {}
            Err(e) => report.errors.push(LprError::io(format!("error getting file status {}", path.display()), e)),
        }
    }

    if !report.removed.is_empty() {
        debug!("swept {} stale files from {}", report.removed.len(), dir.display());
    }
    report
}
