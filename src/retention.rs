use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Deletes every file directly inside `dir` last modified before
/// `now - max_age`.
///
/// The directory is treated as owned by the sink: archives, rotated files
/// and anything else that happens to live there are all eligible. A zero
/// `max_age` retains everything. Failures on individual entries are logged
/// and the scan moves on. Returns the paths that were removed.
pub fn prune_expired(dir: &Path, max_age: Duration, now: SystemTime) -> Vec<PathBuf> {
    if max_age.is_zero() {
        return Vec::new();
    }
    let Some(cutoff) = now.checked_sub(max_age) else {
        return Vec::new();
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::warn!("retention scan of {} failed: {err}", dir.display());
            return Vec::new();
        }
    };

    let mut deleted = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("retention scan of {} failed: {err}", dir.display());
                continue;
            }
        };
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            // Raced with compression or another delete.
            Err(_) => continue,
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(err) => {
                log::warn!("no modification time for {}: {err}", path.display());
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("pruned expired {}", path.display());
                deleted.push(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => log::warn!("failed to prune {}: {err}", path.display()),
        }
    }

    deleted.sort_unstable();
    deleted
}

/// Runs [`prune_expired`] on a detached thread.
pub(crate) fn spawn_prune(dir: PathBuf, max_age: Duration, now: SystemTime) {
    let spawned = std::thread::Builder::new()
        .name("logroll-retention".to_string())
        .spawn(move || {
            prune_expired(&dir, max_age, now);
        });
    if let Err(err) = spawned {
        log::error!("failed to spawn retention scan: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(86_400);

    fn touch(path: &Path, modified: SystemTime) {
        let file = File::create(path).unwrap();
        file.set_modified(modified).unwrap();
    }

    #[test]
    fn zero_max_age_keeps_everything() {
        let temp_dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        let old = temp_dir.path().join("old.log");
        touch(&old, now - 30 * DAY);

        let deleted = prune_expired(temp_dir.path(), Duration::ZERO, now);
        assert!(deleted.is_empty());
        assert!(old.exists());
    }

    #[test]
    fn subdirectories_are_left_alone() {
        let temp_dir = TempDir::new().unwrap();
        let now = SystemTime::now() + 30 * DAY;
        let nested = temp_dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        let inner = nested.join("inner.log");
        touch(&inner, SystemTime::now() - 30 * DAY);

        let deleted = prune_expired(temp_dir.path(), DAY, now);
        assert!(deleted.is_empty());
        assert!(inner.exists());
    }

    #[test]
    fn missing_directory_is_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let deleted = prune_expired(&temp_dir.path().join("absent"), DAY, SystemTime::now());
        assert!(deleted.is_empty());
    }
}
