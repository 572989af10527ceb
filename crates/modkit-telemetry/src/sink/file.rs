//! Size-or-daily rotating log file with age-based retention.
//!
//! Rotation is done by `rolling-file`: the active file keeps its name and
//! closed files shift to `{name}.1`, `{name}.2`, and so on. This module adds
//! owner-only permissions and deletes rotated files by age.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use rolling_file::{RollingCondition, RollingConditionBasic, RollingFileAppender};

/// Bytes per megabyte in `size_mb`.
const MEGABYTE: u64 = 1024 * 1024;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Count cap for rotated files; age retention normally removes them first.
const MAX_ROTATED_FILES: usize = 256;

/// When to close the active file and start a new one, and how long to keep
/// the closed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Rotate once the file has reached this size.
    pub max_bytes: u64,
    /// Also rotate when the local date changes.
    pub daily: bool,
    /// Delete rotated files older than this.
    pub retention: Duration,
}

impl RotationPolicy {
    /// Policy from the `size_mb` / `retention_days` configuration fields.
    #[must_use]
    pub fn from_limits(size_mb: u64, retention_days: u64) -> Self {
        Self {
            max_bytes: size_mb.saturating_mul(MEGABYTE),
            daily: true,
            retention: Duration::from_secs(retention_days.saturating_mul(SECS_PER_DAY)),
        }
    }

    fn condition(self) -> RollingConditionBasic {
        let condition = RollingConditionBasic::new().max_size(self.max_bytes);
        if self.daily {
            condition.daily()
        } else {
            condition
        }
    }
}

/// Size/date condition that raises a flag when it fires.
struct Tracked {
    inner: RollingConditionBasic,
    rolled: Arc<AtomicBool>,
}

impl RollingCondition for Tracked {
    fn should_rollover(&mut self, now: &DateTime<Local>, current_filesize: u64) -> bool {
        let rollover = self.inner.should_rollover(now, current_filesize);
        if rollover {
            self.rolled.store(true, Ordering::Relaxed);
        }
        rollover
    }
}

/// An append-only log file that rotates itself.
///
/// Every write is flushed to disk. Owner-only permissions are re-applied to
/// the fresh file right after a rotation.
pub struct RotatingFile {
    path: PathBuf,
    retention: Duration,
    rolled: Arc<AtomicBool>,
    appender: RollingFileAppender<Tracked>,
}

impl fmt::Debug for RotatingFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingFile")
            .field("path", &self.path)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl RotatingFile {
    /// Open (or create) the active file and prune expired rotations.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl Into<PathBuf>, policy: RotationPolicy) -> io::Result<Self> {
        let path = path.into();
        // Create it owner-only before the appender opens it for append.
        drop(open_owner_only(&path)?);

        let rolled = Arc::new(AtomicBool::new(false));
        let condition = Tracked {
            inner: policy.condition(),
            rolled: Arc::clone(&rolled),
        };
        let appender = RollingFileAppender::new(&path, condition, MAX_ROTATED_FILES)?;
        let this = Self {
            path,
            retention: policy.retention,
            rolled,
            appender,
        };
        this.prune();
        Ok(this)
    }

    /// Path of the active file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_at(&mut self, buf: &[u8], now: DateTime<Local>) -> io::Result<usize> {
        let written = self.appender.write_with_datetime(buf, &now)?;
        if self.rolled.swap(false, Ordering::Relaxed) {
            restrict_to_owner(&self.path)?;
            self.prune();
        }
        self.appender.flush()?;
        Ok(written)
    }

    /// Delete rotated siblings older than the retention window.
    /// Failures are ignored; the next rotation tries again.
    fn prune(&self) {
        let (Some(dir), Some(active)) = (self.path.parent(), self.path.file_name()) else {
            return;
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        let prefix = format!("{}.", active.to_string_lossy());
        let now = SystemTime::now();

        for entry in entries.flatten() {
            let name = entry.file_name();
            let is_rotation = name
                .to_string_lossy()
                .strip_prefix(&prefix)
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
            if !is_rotation {
                continue;
            }
            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > self.retention);
            if expired {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(buf, Local::now())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.appender.flush()
    }
}

fn open_owner_only(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn restrict_to_owner(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy(max_bytes: u64) -> RotationPolicy {
        RotationPolicy {
            max_bytes,
            daily: false,
            retention: Duration::from_secs(3600),
        }
    }

    fn rotated(dir: &Path, name: &str) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                let file = p.file_name().unwrap().to_string_lossy().into_owned();
                file.starts_with(&format!("{name}."))
            })
            .collect();
        out.sort();
        out
    }

    fn age(path: &Path, by: Duration) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - by)
            .unwrap();
    }

    #[test]
    fn test_policy_from_limits() {
        let p = RotationPolicy::from_limits(10, 7);
        assert_eq!(p.max_bytes, 10 * 1024 * 1024);
        assert_eq!(p.retention, Duration::from_secs(7 * 86_400));
        assert!(p.daily);
    }

    #[test]
    fn test_rotates_once_size_is_reached() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app_info.log");
        let mut file = RotatingFile::open(&path, policy(16)).unwrap();

        file.write_all(b"0123456789\n").unwrap();
        file.write_all(b"abcdefghij\n").unwrap();
        file.write_all(b"third\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "third\n");
        let old = rotated(temp.path(), "app_info.log");
        assert_eq!(old, vec![temp.path().join("app_info.log.1")]);
        assert_eq!(
            fs::read_to_string(&old[0]).unwrap(),
            "0123456789\nabcdefghij\n"
        );
    }

    #[test]
    fn test_rotates_when_the_date_changes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app_info.log");
        let daily = RotationPolicy {
            daily: true,
            ..policy(1024 * 1024)
        };
        let mut file = RotatingFile::open(&path, daily).unwrap();
        let today = Local::now();

        file.write_at(b"day one\n", today).unwrap();
        file.write_at(b"still day one\n", today).unwrap();
        file.write_at(b"day two\n", today + chrono::Duration::days(1)).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "day two\n");
        assert_eq!(
            fs::read_to_string(temp.path().join("app_info.log.1")).unwrap(),
            "day one\nstill day one\n"
        );
    }

    #[test]
    fn test_oversized_first_write_does_not_rotate_empty_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app_error.log");
        let mut file = RotatingFile::open(&path, policy(4)).unwrap();
        file.write_all(b"a line longer than the limit\n").unwrap();
        assert!(rotated(temp.path(), "app_error.log").is_empty());
    }

    #[test]
    fn test_appends_to_existing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app_info.log");
        fs::write(&path, "first\n").unwrap();
        let mut file = RotatingFile::open(&path, policy(1024)).unwrap();
        file.write_all(b"second\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_prunes_expired_rotations_on_open() {
        let temp = TempDir::new().unwrap();
        let stale = temp.path().join("app_info.log.3");
        let fresh = temp.path().join("app_info.log.1");
        let unrelated = temp.path().join("other.log.3");
        let not_a_rotation = temp.path().join("app_info.log.bak");
        for p in [&stale, &fresh, &unrelated, &not_a_rotation] {
            fs::write(p, "x").unwrap();
        }
        for p in [&stale, &unrelated, &not_a_rotation] {
            age(p, Duration::from_secs(7200));
        }

        let _file = RotatingFile::open(temp.path().join("app_info.log"), policy(1024)).unwrap();

        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(unrelated.exists());
        assert!(not_a_rotation.exists());
    }

    #[test]
    fn test_rotation_prunes_expired_rotations() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app_info.log");
        let mut file = RotatingFile::open(&path, policy(8)).unwrap();

        // Appears after open, so only the rotation can remove it.
        let stale = temp.path().join("app_info.log.7");
        fs::write(&stale, "stale\n").unwrap();
        age(&stale, Duration::from_secs(7200));

        file.write_all(b"0123456789\n").unwrap();
        file.write_all(b"next\n").unwrap();

        let remaining = rotated(temp.path(), "app_info.log");
        assert!(remaining.contains(&temp.path().join("app_info.log.1")));
        assert!(
            remaining
                .iter()
                .all(|p| fs::read_to_string(p).unwrap() != "stale\n"),
            "{remaining:?}"
        );
    }

    #[test]
    fn test_old_active_file_is_kept() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app_info.log");
        fs::write(&path, "old\n").unwrap();
        age(&path, Duration::from_secs(7200));

        let _file = RotatingFile::open(&path, policy(1024)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "old\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only_after_rotation() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app_info.log");
        let mut file = RotatingFile::open(&path, policy(8)).unwrap();
        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&path), 0o600);

        file.write_all(b"0123456789\n").unwrap();
        file.write_all(b"after rotation\n").unwrap();

        assert!(temp.path().join("app_info.log.1").exists());
        assert_eq!(mode(&path), 0o600);
    }
}
