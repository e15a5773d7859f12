//! Cross-process named mutex guarding header read-modify-write.
//!
//! The mutex is keyed by a logical name rather than the slot file path, so
//! every slot file opened under the same name contends for the same lock.
//! Implementations are injected into [`crate::SlotFile::open`].
//!
//! [`PidLockFile`] is the filesystem implementation: an exclusive `flock`
//! on `<lock_dir>/<name>.lck`, held through an open descriptor. The kernel
//! drops the lock when the descriptor closes, so a crashed holder never
//! leaves a stale lock behind. The file carries the holder's process id for
//! diagnostics only.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Result, SlotFileError};

/// Extension appended to the logical name to form the lock file name.
pub const LOCK_EXT: &str = "lck";

/// A mutex shared between processes, identified by a logical name.
pub trait NamedMutex: Send {
    /// Logical name of the lock.
    fn name(&self) -> &str;

    /// Make one attempt at acquiring the lock.
    ///
    /// Returns `Ok(true)` when the caller now holds the lock (including when
    /// it already held it), `Ok(false)` when another holder has it.
    fn try_acquire(&mut self) -> io::Result<bool>;

    /// Release the lock if it is held by this caller. Releasing a lock that
    /// is not held is not an error.
    fn release(&mut self) -> io::Result<()>;
}

// ---------------------------------------------------------------------------
// LockPolicy
// ---------------------------------------------------------------------------

/// Bounded retry schedule for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Total number of acquisition attempts before giving up.
    pub attempts: u32,
    /// Fixed sleep between attempts.
    pub backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Acquire `mutex`, retrying per `policy`.
///
/// # Errors
///
/// Returns [`SlotFileError::LockTimeout`] once every attempt has failed, or
/// [`SlotFileError::Io`] if the mutex implementation reports an I/O error.
pub fn acquire(mutex: &mut dyn NamedMutex, policy: &LockPolicy) -> Result<()> {
    let mut attempt: u32 = 0;
    loop {
        if mutex.try_acquire()? {
            return Ok(());
        }
        attempt = attempt.saturating_add(1);
        if attempt >= policy.attempts {
            warn!(lock = mutex.name(), attempts = attempt, "lock acquisition gave up");
            return Err(SlotFileError::LockTimeout {
                name: mutex.name().to_owned(),
                attempts: attempt,
            });
        }
        debug!(lock = mutex.name(), attempt, "lock busy, retrying");
        thread::sleep(policy.backoff);
    }
}

// ---------------------------------------------------------------------------
// PidLockFile
// ---------------------------------------------------------------------------

/// Exclusive advisory lock on `<lock_dir>/<name>.lck`.
///
/// Every handle opens its own descriptor, so two handles contend even
/// inside one process. Acquiring again through the same handle succeeds.
#[derive(Debug)]
pub struct PidLockFile {
    name: String,
    path: PathBuf,
    held: Option<File>,
}

impl PidLockFile {
    /// Lock named `name` inside `lock_dir`.
    pub fn new(lock_dir: impl AsRef<Path>, name: &str) -> Self {
        let path = lock_dir.as_ref().join(format!("{name}.{LOCK_EXT}"));
        Self {
            name: name.to_owned(),
            path,
            held: None,
        }
    }

    /// Full path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` while this handle holds the lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Process id recorded by the current holder, if any.
    ///
    /// Informational only: the file is emptied on release, and a holder
    /// that crashed leaves its id behind without holding the lock.
    pub fn current_holder(&self) -> io::Result<Option<u32>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text.trim().parse::<u32>().ok()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl NamedMutex for PidLockFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_acquire(&mut self) -> io::Result<bool> {
        if self.held.is_some() {
            return Ok(true);
        }
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        // Not truncated on open: the current holder's id stays readable.
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        if !try_lock_exclusive(&file)? {
            return Ok(false);
        }
        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;
        self.held = Some(file);
        Ok(true)
    }

    fn release(&mut self) -> io::Result<()> {
        let Some(file) = self.held.take() else {
            return Ok(());
        };
        let cleared = file.set_len(0);
        let unlocked = unlock(&file);
        drop(file);
        cleared?;
        unlocked
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "advisory file locks need a unix host",
    ))
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> io::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// NullMutex
// ---------------------------------------------------------------------------

/// A mutex that always succeeds. For files only ever touched by one process.
#[derive(Debug, Clone)]
pub struct NullMutex {
    name: String,
}

impl NullMutex {
    /// Create a no-op mutex with the given logical name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

impl NamedMutex for NullMutex {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_acquire(&mut self) -> io::Result<bool> {
        Ok(true)
    }

    fn release(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quick() -> LockPolicy {
        LockPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn acquire_writes_pid() {
        let tmp = TempDir::new().unwrap();
        let mut lock = PidLockFile::new(tmp.path(), "musicdb");
        assert!(lock.try_acquire().unwrap());
        assert!(lock.is_held());
        assert_eq!(lock.current_holder().unwrap(), Some(std::process::id()));
    }

    #[test]
    fn lock_path_uses_logical_name() {
        let tmp = TempDir::new().unwrap();
        let lock = PidLockFile::new(tmp.path(), "musicdb");
        assert_eq!(lock.path(), tmp.path().join("musicdb.lck"));
    }

    #[test]
    fn reacquire_through_same_handle_succeeds() {
        let tmp = TempDir::new().unwrap();
        let mut lock = PidLockFile::new(tmp.path(), "musicdb");
        assert!(lock.try_acquire().unwrap());
        assert!(lock.try_acquire().unwrap());
    }

    #[test]
    fn handles_in_one_process_contend() {
        let tmp = TempDir::new().unwrap();
        let mut a = PidLockFile::new(tmp.path(), "musicdb");
        let mut b = PidLockFile::new(tmp.path(), "musicdb");
        assert!(a.try_acquire().unwrap());
        assert!(!b.try_acquire().unwrap());
        assert!(!b.is_held());

        a.release().unwrap();
        assert!(b.try_acquire().unwrap());
        assert!(!a.try_acquire().unwrap());
    }

    #[test]
    fn release_by_non_holder_keeps_lock() {
        let tmp = TempDir::new().unwrap();
        let mut holder = PidLockFile::new(tmp.path(), "musicdb");
        holder.try_acquire().unwrap();

        let mut other = PidLockFile::new(tmp.path(), "musicdb");
        other.release().unwrap();
        assert!(other.path().exists());
        assert_eq!(holder.current_holder().unwrap(), Some(std::process::id()));
        assert!(!other.try_acquire().unwrap());
    }

    #[test]
    fn release_empties_but_keeps_file() {
        let tmp = TempDir::new().unwrap();
        let mut lock = PidLockFile::new(tmp.path(), "musicdb");
        lock.try_acquire().unwrap();
        lock.release().unwrap();
        assert!(!lock.is_held());
        assert!(lock.path().exists());
        assert_eq!(lock.current_holder().unwrap(), None);
        lock.release().unwrap();
    }

    #[test]
    fn dropped_holder_frees_lock() {
        let tmp = TempDir::new().unwrap();
        let mut crashed = PidLockFile::new(tmp.path(), "musicdb");
        crashed.try_acquire().unwrap();
        drop(crashed);

        // The previous id is still on disk, but nobody holds the lock.
        let mut lock = PidLockFile::new(tmp.path(), "musicdb");
        assert!(lock.try_acquire().unwrap());
    }

    #[test]
    fn leftover_garbage_does_not_block() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("musicdb.lck"), "not a pid").unwrap();
        let mut lock = PidLockFile::new(tmp.path(), "musicdb");
        assert!(lock.try_acquire().unwrap());
        assert_eq!(lock.current_holder().unwrap(), Some(std::process::id()));
    }

    #[test]
    fn acquire_times_out_against_other_holder() {
        let tmp = TempDir::new().unwrap();
        let mut other = PidLockFile::new(tmp.path(), "musicdb");
        other.try_acquire().unwrap();

        let mut mine = PidLockFile::new(tmp.path(), "musicdb");
        let err = acquire(&mut mine, &quick()).unwrap_err();
        match err {
            SlotFileError::LockTimeout { name, attempts } => {
                assert_eq!(name, "musicdb");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn acquire_creates_lock_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("locks").join("nested");
        let mut lock = PidLockFile::new(&dir, "musicdb");
        acquire(&mut lock, &quick()).unwrap();
        assert!(dir.join("musicdb.lck").exists());
    }

    #[test]
    fn null_mutex_always_acquires() {
        let mut m = NullMutex::new("scratch");
        assert!(m.try_acquire().unwrap());
        assert!(m.try_acquire().unwrap());
        m.release().unwrap();
        assert_eq!(m.name(), "scratch");
    }
}
