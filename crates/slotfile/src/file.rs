//! `SlotFile`: fixed-size-record random access file.
//!
//! Slot `rrn` (1-based) starts at [`rrn_offset`]. Every header mutation and
//! every slot access outside a batch is bracketed by the injected
//! [`NamedMutex`]; inside a batch the lock is held once and fsync is deferred
//! to [`SlotFile::end_batch`].

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::mem;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Result, SlotFileError};
use crate::header::{Header, HEADER_SIZE};
use crate::lock::{self, LockPolicy, NamedMutex};

/// Record reference number: 1-based slot identifier.
pub type Rrn = u32;

/// Passing this RRN to [`SlotFile::write`] allocates a new slot.
pub const NEW_RRN: Rrn = 0;

/// Access mode requested at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Reads only; `write` and `clear` fail with [`SlotFileError::ReadOnly`].
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

/// Byte offset of slot `rrn` in a file with `record_size`-byte slots.
///
/// `rrn` 0 maps to the same offset as `rrn` 1.
#[must_use]
pub fn rrn_offset(rrn: Rrn, record_size: u32) -> u64 {
    u64::from(rrn.saturating_sub(1))
        .saturating_mul(u64::from(record_size))
        .saturating_add(HEADER_SIZE as u64)
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// One slot's worth of bytes as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    rrn: Rrn,
    bytes: Vec<u8>,
}

impl Slot {
    /// Record number the slot was read from.
    #[must_use]
    pub fn rrn(&self) -> Rrn {
        self.rrn
    }

    /// `true` when the slot holds no record (leading NUL byte).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.first().map_or(true, |&b| b == 0)
    }

    /// The stored payload: every byte before the first NUL.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.bytes.len());
        self.bytes.get(..end).unwrap_or_default()
    }

    /// The full slot, including padding.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

// ---------------------------------------------------------------------------
// SlotFile
// ---------------------------------------------------------------------------

/// An open slot file.
///
/// The handle owns its mutex. Dropping the handle ends any open batch and
/// releases the lock; [`SlotFile::close`] does the same but reports errors.
pub struct SlotFile {
    file: File,
    path: PathBuf,
    header: Header,
    mode: OpenMode,
    writable: bool,
    in_batch: bool,
    locked: bool,
    mutex: Box<dyn NamedMutex>,
    policy: LockPolicy,
    nulls: Vec<u8>,
}

impl SlotFile {
    /// Open `path` with the default [`LockPolicy`].
    ///
    /// # Errors
    ///
    /// See [`SlotFile::open_with_policy`].
    pub fn open(
        path: impl AsRef<Path>,
        version: u32,
        mode: OpenMode,
        mutex: Box<dyn NamedMutex>,
    ) -> Result<Self> {
        Self::open_with_policy(path, version, mode, mutex, LockPolicy::default())
    }

    /// Open or create the slot file at `path`.
    ///
    /// A missing or zero-length file is created with a fresh header
    /// (`count = 0`, `version` as given). Otherwise the existing header is
    /// read; its recorded version wins over `version`.
    ///
    /// # Errors
    ///
    /// Returns [`SlotFileError::BadHeader`] if an existing file's header does
    /// not parse, [`SlotFileError::LockTimeout`] if the mutex cannot be taken,
    /// or [`SlotFileError::Io`] on filesystem failure.
    pub fn open_with_policy(
        path: impl AsRef<Path>,
        version: u32,
        mode: OpenMode,
        mutex: Box<dyn NamedMutex>,
        policy: LockPolicy,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let exists = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = if exists {
            OpenOptions::new()
                .read(true)
                .write(mode == OpenMode::ReadWrite)
                .open(&path)?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?
        };

        let mut slot_file = Self {
            file,
            path,
            header: Header::new(version),
            mode,
            writable: !exists || mode == OpenMode::ReadWrite,
            in_batch: false,
            locked: false,
            mutex,
            policy,
            nulls: Vec::new(),
        };

        slot_file.lock()?;
        let loaded = if exists {
            slot_file.read_header()
        } else {
            slot_file.write_header()
        };
        let unlocked = slot_file.unlock();
        loaded?;
        unlocked?;

        if slot_file.header.version != version {
            warn!(
                path = %slot_file.path.display(),
                found = slot_file.header.version,
                expected = version,
                "slot file version differs"
            );
        }
        slot_file.nulls = vec![0u8; slot_file.header.record_size as usize];

        info!(
            path = %slot_file.path.display(),
            count = slot_file.header.count,
            created = !exists,
            "slot file opened"
        );
        Ok(slot_file)
    }

    /// Close the file, ending any open batch and releasing the lock.
    ///
    /// # Errors
    ///
    /// Returns [`SlotFileError::Io`] if the final sync or the lock release
    /// fails. The handle is closed either way.
    pub fn close(mut self) -> Result<()> {
        let ended = self.end_batch();
        let unlocked = self.unlock();
        ended?;
        unlocked
    }

    /// Number of allocated slots.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.header.count
    }

    /// Format version recorded in the header.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.header.version
    }

    /// Slot size in bytes.
    #[must_use]
    pub fn record_size(&self) -> u32 {
        self.header.record_size
    }

    /// Largest payload accepted by [`SlotFile::write`].
    #[must_use]
    pub fn max_payload(&self) -> usize {
        (self.header.record_size as usize).saturating_sub(1)
    }

    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Access mode the file was opened with.
    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// `true` between [`SlotFile::start_batch`] and [`SlotFile::end_batch`].
    #[must_use]
    pub fn is_batch(&self) -> bool {
        self.in_batch
    }

    /// `true` while this handle holds the named mutex.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// The RRN the next append would receive.
    ///
    /// Takes the lock as a side effect and leaves it held; the next
    /// [`SlotFile::write`] or [`SlotFile::end_batch`] releases it. The header
    /// is re-read once the lock is taken, so appends by other handles count.
    ///
    /// # Errors
    ///
    /// Returns [`SlotFileError::LockTimeout`] if the mutex cannot be taken,
    /// or [`SlotFileError::BadHeader`] if the header no longer parses.
    pub fn next_rrn(&mut self) -> Result<Rrn> {
        self.lock_for_update()?;
        Ok(self.header.count.saturating_add(1))
    }

    /// Re-read the header, picking up slots appended by another process.
    ///
    /// # Errors
    ///
    /// Returns [`SlotFileError::BadHeader`] if the header no longer parses.
    pub fn reload_header(&mut self) -> Result<()> {
        self.lock()?;
        let loaded = self.read_header();
        let unlocked = self.unlock();
        loaded?;
        unlocked
    }

    /// Suppress per-write fsync and hold the lock until [`SlotFile::end_batch`].
    ///
    /// # Errors
    ///
    /// Returns [`SlotFileError::LockTimeout`] if the mutex cannot be taken.
    pub fn start_batch(&mut self) -> Result<()> {
        if self.in_batch {
            return Ok(());
        }
        self.lock_for_update()?;
        self.in_batch = true;
        debug!(path = %self.path.display(), "batch started");
        Ok(())
    }

    /// Flush and fsync once, then release the lock.
    ///
    /// # Errors
    ///
    /// Returns [`SlotFileError::Io`] if the sync or the lock release fails.
    pub fn end_batch(&mut self) -> Result<()> {
        if !self.in_batch {
            return Ok(());
        }
        self.in_batch = false;
        let synced = self.sync();
        let unlocked = self.unlock();
        debug!(path = %self.path.display(), "batch ended");
        synced?;
        unlocked
    }

    /// Write `data` into slot `rrn`, or into a new slot when `rrn` is
    /// [`NEW_RRN`]. Returns the RRN written.
    ///
    /// The header is re-read under the lock before a new slot is allocated.
    /// An existing slot is zero-filled first so a shorter payload leaves no
    /// stale tail. Writing past the current count extends it. A new tail
    /// slot is followed by one NUL byte so it has a determinable size.
    ///
    /// # Errors
    ///
    /// Returns [`SlotFileError::ReadOnly`], [`SlotFileError::RecordTooLarge`],
    /// [`SlotFileError::LockTimeout`], or [`SlotFileError::Io`]. A rejected
    /// write still releases a lock left held by [`SlotFile::next_rrn`].
    pub fn write(&mut self, rrn: Rrn, data: &[u8]) -> Result<Rrn> {
        if self.mode == OpenMode::ReadOnly {
            self.unlock()?;
            return Err(SlotFileError::ReadOnly);
        }
        let max = self.max_payload();
        if data.len() > max {
            debug!(len = data.len(), max, "rejecting oversized record");
            self.unlock()?;
            return Err(SlotFileError::RecordTooLarge {
                len: data.len(),
                max,
            });
        }

        self.lock_for_update()?;
        let written = self.write_locked(rrn, data);
        let unlocked = self.unlock();
        let rrn = written?;
        unlocked?;
        Ok(rrn)
    }

    /// Read slot `rrn`.
    ///
    /// A short tail (the last slot of a file written by append) is padded
    /// with zeros.
    ///
    /// # Errors
    ///
    /// Returns [`SlotFileError::RrnOutOfRange`] for an RRN outside
    /// `1..=count`, [`SlotFileError::LockTimeout`], or [`SlotFileError::Io`].
    pub fn read(&mut self, rrn: Rrn) -> Result<Slot> {
        self.check_range(rrn)?;
        self.lock()?;
        let read = self.read_locked(rrn);
        let unlocked = self.unlock();
        let bytes = read?;
        unlocked?;
        Ok(Slot { rrn, bytes })
    }

    /// Zero-fill slot `rrn` in place. The count is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`SlotFileError::ReadOnly`], [`SlotFileError::RrnOutOfRange`],
    /// [`SlotFileError::LockTimeout`], or [`SlotFileError::Io`].
    pub fn clear(&mut self, rrn: Rrn) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(SlotFileError::ReadOnly);
        }
        self.check_range(rrn)?;
        self.lock_for_update()?;
        let cleared = self.clear_locked(rrn);
        let unlocked = self.unlock();
        cleared?;
        unlocked
    }

    fn check_range(&self, rrn: Rrn) -> Result<()> {
        if rrn < 1 || rrn > self.header.count {
            debug!(rrn, count = self.header.count, "rrn out of range");
            return Err(SlotFileError::RrnOutOfRange {
                rrn,
                count: self.header.count,
            });
        }
        Ok(())
    }

    fn write_locked(&mut self, rrn: Rrn, data: &[u8]) -> Result<Rrn> {
        let is_new = rrn == NEW_RRN;
        let rrn = if is_new {
            let next = self
                .header
                .count
                .checked_add(1)
                .ok_or(SlotFileError::RrnOutOfRange {
                    rrn: u32::MAX,
                    count: self.header.count,
                })?;
            self.header.count = next;
            self.write_header()?;
            next
        } else {
            if rrn > self.header.count {
                self.header.count = rrn;
                self.write_header()?;
            }
            rrn
        };

        let offset = self.offset(rrn);
        if !is_new {
            let nulls = mem::take(&mut self.nulls);
            let zeroed = self.write_at(offset, &nulls);
            self.nulls = nulls;
            zeroed?;
        }
        self.write_at(offset, data)?;
        if is_new {
            let tail = self.offset(rrn.saturating_add(1));
            self.write_at(tail, &[0])?;
        }
        if !self.in_batch {
            self.sync()?;
        }
        debug!(rrn, len = data.len(), new = is_new, "slot written");
        Ok(rrn)
    }

    fn read_locked(&mut self, rrn: Rrn) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.header.record_size as usize];
        self.file.seek(SeekFrom::Start(self.offset(rrn)))?;
        let mut filled = 0usize;
        while let Some(rest) = buf.get_mut(filled..) {
            if rest.is_empty() {
                break;
            }
            let n = self.file.read(rest)?;
            if n == 0 {
                break;
            }
            filled = filled.saturating_add(n);
        }
        Ok(buf)
    }

    fn clear_locked(&mut self, rrn: Rrn) -> Result<()> {
        let offset = self.offset(rrn);
        let nulls = mem::take(&mut self.nulls);
        let cleared = self.write_at(offset, &nulls);
        self.nulls = nulls;
        cleared?;
        if !self.in_batch {
            self.sync()?;
        }
        debug!(rrn, "slot cleared");
        Ok(())
    }

    fn offset(&self, rrn: Rrn) -> u64 {
        rrn_offset(rrn, self.header.record_size)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn read_header(&mut self) -> Result<()> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        self.file.seek(SeekFrom::Start(0))?;
        (&mut self.file)
            .take(HEADER_SIZE as u64)
            .read_to_end(&mut buf)?;
        self.header = Header::parse(&buf)?;
        Ok(())
    }

    // Callers hold the lock.
    fn write_header(&mut self) -> Result<()> {
        let encoded = self.header.encode();
        self.write_at(0, &encoded)?;
        if !self.in_batch {
            self.sync()?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if self.writable {
            self.file.flush()?;
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn lock(&mut self) -> Result<()> {
        if self.in_batch || self.locked {
            return Ok(());
        }
        lock::acquire(self.mutex.as_mut(), &self.policy)?;
        self.locked = true;
        Ok(())
    }

    // Take the lock and pick up the on-disk header. Other handles may have
    // appended since this one last held the lock.
    fn lock_for_update(&mut self) -> Result<()> {
        if self.in_batch || self.locked {
            return Ok(());
        }
        self.lock()?;
        let loaded = self.read_header();
        if loaded.is_err() {
            self.unlock()?;
        }
        loaded
    }

    fn unlock(&mut self) -> Result<()> {
        if self.in_batch || !self.locked {
            return Ok(());
        }
        self.mutex.release()?;
        self.locked = false;
        Ok(())
    }

    fn finish(&mut self) {
        if self.in_batch {
            if let Err(e) = self.end_batch() {
                warn!(path = %self.path.display(), error = %e, "failed to end batch on close");
            }
        }
        if self.locked {
            if let Err(e) = self.mutex.release() {
                warn!(path = %self.path.display(), error = %e, "failed to release lock on close");
            }
            self.locked = false;
        }
    }
}

impl Drop for SlotFile {
    fn drop(&mut self) {
        self.finish();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use crate::header::RECORD_SIZE;
    use crate::NullMutex;
    use tempfile::TempDir;

    fn open_rw(dir: &TempDir) -> SlotFile {
        SlotFile::open(
            dir.path().join("musicdb.dat"),
            10,
            OpenMode::ReadWrite,
            Box::new(NullMutex::new("rafile")),
        )
        .unwrap()
    }

    #[test]
    fn offset_formula() {
        assert_eq!(rrn_offset(1, RECORD_SIZE), 128);
        assert_eq!(rrn_offset(2, RECORD_SIZE), 128 + 2048);
        assert_eq!(rrn_offset(10, 100), 128 + 9 * 100);
    }

    #[test]
    fn create_writes_fresh_header() {
        let tmp = TempDir::new().unwrap();
        let sf = open_rw(&tmp);
        assert_eq!(sf.count(), 0);
        assert_eq!(sf.version(), 10);
        assert_eq!(sf.record_size(), RECORD_SIZE);
        drop(sf);
        let bytes = fs::read(tmp.path().join("musicdb.dat")).unwrap();
        assert!(bytes.starts_with(b"#VERSION=10\n"));
    }

    #[test]
    fn append_assigns_dense_rrns() {
        let tmp = TempDir::new().unwrap();
        let mut sf = open_rw(&tmp);
        assert_eq!(sf.write(NEW_RRN, b"first").unwrap(), 1);
        assert_eq!(sf.write(NEW_RRN, b"second").unwrap(), 2);
        assert_eq!(sf.count(), 2);
    }

    #[test]
    fn append_writes_trailing_nul() {
        let tmp = TempDir::new().unwrap();
        let mut sf = open_rw(&tmp);
        sf.write(NEW_RRN, b"abc").unwrap();
        drop(sf);
        let len = fs::metadata(tmp.path().join("musicdb.dat")).unwrap().len();
        assert_eq!(len, rrn_offset(2, RECORD_SIZE) + 1);
    }

    #[test]
    fn overwrite_leaves_no_stale_tail() {
        let tmp = TempDir::new().unwrap();
        let mut sf = open_rw(&tmp);
        let rrn = sf.write(NEW_RRN, b"a much longer value").unwrap();
        sf.write(rrn, b"short").unwrap();
        let slot = sf.read(rrn).unwrap();
        assert_eq!(slot.payload(), b"short");
        assert!(slot.as_bytes()[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn explicit_rrn_past_end_extends_count() {
        let tmp = TempDir::new().unwrap();
        let mut sf = open_rw(&tmp);
        assert_eq!(sf.write(5, b"five").unwrap(), 5);
        assert_eq!(sf.count(), 5);
        assert!(sf.read(3).unwrap().is_empty());
        assert_eq!(sf.read(5).unwrap().payload(), b"five");
    }

    #[test]
    fn oversized_record_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut sf = open_rw(&tmp);
        let data = vec![b'x'; RECORD_SIZE as usize];
        let err = sf.write(NEW_RRN, &data).unwrap_err();
        assert!(matches!(err, SlotFileError::RecordTooLarge { len: 2048, max: 2047 }));
        assert_eq!(sf.count(), 0);

        let fits = vec![b'x'; RECORD_SIZE as usize - 1];
        assert_eq!(sf.write(NEW_RRN, &fits).unwrap(), 1);
        assert_eq!(sf.read(1).unwrap().payload().len(), 2047);
    }

    #[test]
    fn read_out_of_range_is_error() {
        let tmp = TempDir::new().unwrap();
        let mut sf = open_rw(&tmp);
        sf.write(NEW_RRN, b"x").unwrap();
        assert!(matches!(
            sf.read(0).unwrap_err(),
            SlotFileError::RrnOutOfRange { rrn: 0, count: 1 }
        ));
        assert!(matches!(
            sf.read(2).unwrap_err(),
            SlotFileError::RrnOutOfRange { rrn: 2, count: 1 }
        ));
    }

    #[test]
    fn clear_zeroes_slot_and_keeps_count() {
        let tmp = TempDir::new().unwrap();
        let mut sf = open_rw(&tmp);
        sf.write(NEW_RRN, b"one").unwrap();
        sf.write(NEW_RRN, b"two").unwrap();
        sf.clear(1).unwrap();
        assert!(sf.read(1).unwrap().is_empty());
        assert_eq!(sf.read(2).unwrap().payload(), b"two");
        assert_eq!(sf.count(), 2);
    }

    #[test]
    fn clear_out_of_range_is_error() {
        let tmp = TempDir::new().unwrap();
        let mut sf = open_rw(&tmp);
        assert!(matches!(
            sf.clear(1).unwrap_err(),
            SlotFileError::RrnOutOfRange { .. }
        ));
    }

    #[test]
    fn read_only_refuses_mutation() {
        let tmp = TempDir::new().unwrap();
        drop(open_rw(&tmp));
        let mut sf = SlotFile::open(
            tmp.path().join("musicdb.dat"),
            10,
            OpenMode::ReadOnly,
            Box::new(NullMutex::new("rafile")),
        )
        .unwrap();
        assert!(matches!(sf.write(NEW_RRN, b"x").unwrap_err(), SlotFileError::ReadOnly));
        assert!(matches!(sf.clear(1).unwrap_err(), SlotFileError::ReadOnly));
    }

    #[test]
    fn next_rrn_holds_lock_until_write() {
        let tmp = TempDir::new().unwrap();
        let mut sf = open_rw(&tmp);
        assert_eq!(sf.next_rrn().unwrap(), 1);
        assert!(sf.is_locked());
        sf.write(NEW_RRN, b"x").unwrap();
        assert!(!sf.is_locked());
    }

    #[test]
    fn rejected_write_releases_next_rrn_lock() {
        let tmp = TempDir::new().unwrap();
        let mut sf = open_rw(&tmp);
        sf.next_rrn().unwrap();
        let data = vec![b'x'; RECORD_SIZE as usize];
        assert!(sf.write(NEW_RRN, &data).is_err());
        assert!(!sf.is_locked());
    }

    #[test]
    fn batch_holds_lock_until_end() {
        let tmp = TempDir::new().unwrap();
        let mut sf = open_rw(&tmp);
        sf.start_batch().unwrap();
        assert!(sf.is_batch());
        assert!(sf.is_locked());
        sf.write(NEW_RRN, b"x").unwrap();
        assert!(sf.is_locked());
        sf.end_batch().unwrap();
        assert!(!sf.is_batch());
        assert!(!sf.is_locked());
    }

    #[test]
    fn close_ends_open_batch() {
        let tmp = TempDir::new().unwrap();
        let mut sf = open_rw(&tmp);
        sf.start_batch().unwrap();
        sf.write(NEW_RRN, b"pending").unwrap();
        sf.close().unwrap();

        let mut reopened = open_rw(&tmp);
        assert_eq!(reopened.count(), 1);
        assert_eq!(reopened.read(1).unwrap().payload(), b"pending");
    }

    #[test]
    fn append_sees_slots_added_by_another_handle() {
        let tmp = TempDir::new().unwrap();
        let mut a = open_rw(&tmp);
        let mut b = open_rw(&tmp);
        assert_eq!(a.write(NEW_RRN, b"from-a").unwrap(), 1);
        assert_eq!(b.write(NEW_RRN, b"from-b").unwrap(), 2);
        assert_eq!(b.count(), 2);
        assert_eq!(a.read(1).unwrap().payload(), b"from-a");
        assert_eq!(b.read(2).unwrap().payload(), b"from-b");
    }

    #[test]
    fn slot_payload_stops_at_nul() {
        let slot = Slot {
            rrn: 1,
            bytes: b"abc\0def".to_vec(),
        };
        assert_eq!(slot.payload(), b"abc");
        assert!(!slot.is_empty());
        let empty = Slot {
            rrn: 2,
            bytes: vec![0; 4],
        };
        assert!(empty.is_empty());
        assert_eq!(empty.payload(), b"");
    }
}
