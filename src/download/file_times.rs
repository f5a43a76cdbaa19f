//! File timestamp capability used to stamp downloads with `Last-Modified`.

use std::fs::{File, FileTimes};
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Sets creation, access and modification times on a file.
///
/// `None` leaves the corresponding timestamp unchanged.
pub trait FileTimestamps: Send + Sync {
    /// Applies the given timestamps to `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error when the file cannot be opened or
    /// updated.
    fn set_timestamps(
        &self,
        path: &Path,
        created: Option<SystemTime>,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> io::Result<()>;
}

/// [`FileTimestamps`] implementation over `std::fs::File::set_times`.
///
/// Creation time is only settable on Windows and macOS; elsewhere it is
/// silently left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileTimestamps;

impl FileTimestamps for StdFileTimestamps {
    fn set_timestamps(
        &self,
        path: &Path,
        created: Option<SystemTime>,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> io::Result<()> {
        if created.is_none() && accessed.is_none() && modified.is_none() {
            return Ok(());
        }

        let mut times = FileTimes::new();
        if let Some(accessed) = accessed {
            times = times.set_accessed(accessed);
        }
        if let Some(modified) = modified {
            times = times.set_modified(modified);
        }
        times = with_created(times, created);

        let file = File::options().write(true).open(path)?;
        file.set_times(times)
    }
}

#[cfg(windows)]
fn with_created(times: FileTimes, created: Option<SystemTime>) -> FileTimes {
    use std::os::windows::fs::FileTimesExt;

    match created {
        Some(created) => times.set_created(created),
        None => times,
    }
}

#[cfg(target_os = "macos")]
fn with_created(times: FileTimes, created: Option<SystemTime>) -> FileTimes {
    use std::os::macos::fs::FileTimesExt;

    match created {
        Some(created) => times.set_created(created),
        None => times,
    }
}

#[cfg(not(any(windows, target_os = "macos")))]
fn with_created(times: FileTimes, _created: Option<SystemTime>) -> FileTimes {
    times
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_sets_modified_and_accessed_times() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stamped.txt");
        std::fs::write(&path, b"data").unwrap();
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);

        StdFileTimestamps
            .set_timestamps(&path, Some(when), Some(when), Some(when))
            .unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.modified().unwrap(), when);
    }

    #[test]
    fn test_all_none_is_a_no_op() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.txt");

        // Nothing to set, so the missing file is never opened.
        StdFileTimestamps
            .set_timestamps(&path, None, None, None)
            .unwrap();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.txt");
        let result = StdFileTimestamps.set_timestamps(&path, None, None, Some(SystemTime::now()));
        assert!(result.is_err());
    }
}
