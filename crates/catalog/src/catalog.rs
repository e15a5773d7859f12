//! Catalog: name- and index-addressable records over a slot file.
//!
//! # Lifecycle
//!
//! ```text
//! open ──► load (read-only, one batch) ──► slot file closed
//!            │
//!            ▼
//!   lookups / iterate / mark_* (memory only)
//!            │
//!   write_song / remove_song / start_batch ──► slot file reopened read-write
//!            │
//!   end_batch / close ──► slot file closed, temporaries dropped
//! ```
//!
//! The resident copy is authoritative for lookups. Disk is updated eagerly
//! by `write_song` and `remove_song` only; status toggles and renames are
//! in-memory until the caller writes the record.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use slotfile::{NamedMutex, OpenMode, PidLockFile, Rrn, SlotFile, NEW_RRN};
use tracing::{debug, error, info, warn};

use crate::backup;
use crate::codec::{RecordCodec, TagCodec};
use crate::config::CatalogConfig;
use crate::counts::CategoryCounts;
use crate::error::{CatalogError, Result};
use crate::index::RecordIndex;
use crate::record::{Dbidx, Record, RecordStatus};
use crate::source::{AudioSource, LocalAudioSource};

/// Produces a fresh mutex each time the slot file is opened.
pub type MutexFactory = Box<dyn Fn() -> Box<dyn NamedMutex> + Send>;

/// Position in a [`Catalog`] iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    next: Dbidx,
}

// ---------------------------------------------------------------------------
// CatalogBuilder
// ---------------------------------------------------------------------------

/// Overrides for the collaborators a [`Catalog`] calls through.
pub struct CatalogBuilder {
    config: CatalogConfig,
    codec: Option<Box<dyn RecordCodec>>,
    source: Option<Box<dyn AudioSource>>,
    mutex: Option<MutexFactory>,
}

impl CatalogBuilder {
    /// Use `codec` instead of [`TagCodec`].
    #[must_use]
    pub fn codec(mut self, codec: impl RecordCodec + 'static) -> Self {
        self.codec = Some(Box::new(codec));
        self
    }

    /// Use `source` instead of a [`LocalAudioSource`] on the music directory.
    #[must_use]
    pub fn source(mut self, source: impl AudioSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Use `factory` instead of a [`PidLockFile`] in the lock directory.
    #[must_use]
    pub fn mutex_factory(
        mut self,
        factory: impl Fn() -> Box<dyn NamedMutex> + Send + 'static,
    ) -> Self {
        self.mutex = Some(Box::new(factory));
        self
    }

    /// Open the catalog and load every record.
    ///
    /// # Errors
    ///
    /// See [`Catalog::open`].
    pub fn open(self) -> Result<Catalog> {
        let Self {
            config,
            codec,
            source,
            mutex,
        } = self;
        let codec = codec.unwrap_or_else(|| Box::new(TagCodec));
        let source =
            source.unwrap_or_else(|| Box::new(LocalAudioSource::new(config.music_dir.clone())));
        let mutex = mutex.unwrap_or_else(|| {
            let lock_dir = config.lock_dir.clone();
            let lock_name = config.lock_name.clone();
            let factory: MutexFactory = Box::new(move || -> Box<dyn NamedMutex> {
                Box::new(PidLockFile::new(&lock_dir, &lock_name))
            });
            factory
        });

        let mut catalog = Catalog {
            config,
            slot: None,
            mutex,
            index: RecordIndex::default(),
            counts: CategoryCounts::new(),
            codec,
            source,
            update_timestamps: true,
        };
        catalog.load()?;
        Ok(catalog)
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// The in-memory catalog and its lazily opened slot file.
pub struct Catalog {
    config: CatalogConfig,
    slot: Option<SlotFile>,
    mutex: MutexFactory,
    index: RecordIndex,
    counts: CategoryCounts,
    codec: Box<dyn RecordCodec>,
    source: Box<dyn AudioSource>,
    update_timestamps: bool,
}

impl Catalog {
    /// Open and load the catalog described by `config` with the default
    /// collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::SlotFile`] if the file cannot be opened, its
    /// header is malformed, or the lock cannot be taken.
    pub fn open(config: CatalogConfig) -> Result<Self> {
        Self::builder(config).open()
    }

    /// Start building a catalog with custom collaborators.
    pub fn builder(config: CatalogConfig) -> CatalogBuilder {
        CatalogBuilder {
            config,
            codec: None,
            source: None,
            mutex: None,
        }
    }

    fn load(&mut self) -> Result<()> {
        let mut slot = self.open_slot_file(&self.config.path, OpenMode::ReadOnly)?;
        slot.start_batch()?;

        let mut by_name: BTreeMap<String, Record> = BTreeMap::new();
        let mut skipped_missing = 0u32;
        let mut skipped_bad = 0u32;
        for rrn in 1..=slot.count() {
            let data = match slot.read(rrn) {
                Ok(data) => data,
                Err(e) => {
                    error!(rrn, error = %e, "unreadable slot, skipping");
                    skipped_bad = skipped_bad.saturating_add(1);
                    continue;
                }
            };
            if data.is_empty() {
                continue;
            }
            let record = match self.codec.decode(data.payload(), rrn) {
                Ok(record) => record,
                Err(e) => {
                    warn!(rrn, error = %e, "skipping undecodable record");
                    skipped_bad = skipped_bad.saturating_add(1);
                    continue;
                }
            };
            if !self.source.exists(&record) {
                debug!(rrn, name = %record.name, "audio missing, skipping");
                skipped_missing = skipped_missing.saturating_add(1);
                continue;
            }
            if let Some(previous) = by_name.insert(record.name.clone(), record) {
                warn!(name = %previous.name, rrn = previous.rrn, "duplicate name, later slot wins");
            }
        }
        slot.close()?;

        self.counts = CategoryCounts::from_records(by_name.values());
        self.index = RecordIndex::from_sorted(by_name);
        info!(
            path = %self.config.path.display(),
            records = self.index.len(),
            skipped_missing,
            skipped_bad,
            "catalog loaded"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Record named `name`, unless it is removed.
    pub fn get_by_name(&self, name: &str) -> Option<&Record> {
        let dbidx = self.index.dbidx_of(name)?;
        self.get_by_index(dbidx)
    }

    /// Record at `dbidx` (standard or temporary), unless it is removed.
    pub fn get_by_index(&self, dbidx: Dbidx) -> Option<&Record> {
        self.index
            .get(dbidx)
            .filter(|record| record.status != RecordStatus::Removed)
    }

    /// Number of standard dbidx values assigned at load.
    pub fn count(&self) -> u32 {
        u32::try_from(self.index.len()).unwrap_or(u32::MAX)
    }

    /// Number of temporary records registered this session.
    pub fn temporary_count(&self) -> usize {
        self.index.temporary_len()
    }

    /// Live record counts per category.
    pub fn category_counts(&self) -> &CategoryCounts {
        &self.counts
    }

    /// Configuration the catalog was opened with.
    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Path of the catalog file.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// A cursor positioned before the first record.
    pub fn start_iterator(&self) -> Cursor {
        Cursor::default()
    }

    /// Advance `cursor` to the next live record in dbidx order.
    ///
    /// Removed and hard-removed records are skipped, never returned.
    pub fn iterate(&self, cursor: &mut Cursor) -> Option<(Dbidx, &Record)> {
        let (dbidx, record) = self.index.next_visible(cursor.next)?;
        cursor.next = dbidx.saturating_add(1);
        Some((dbidx, record))
    }

    /// Every live standard record in dbidx order.
    pub fn iter(&self) -> impl Iterator<Item = (Dbidx, &Record)> + '_ {
        let mut cursor = self.start_iterator();
        std::iter::from_fn(move || self.iterate(&mut cursor))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Persist `record`, allocating a slot on its first write.
    ///
    /// Returns the RRN written, or `Ok(None)` when the record is not
    /// standard (temporary, removed, or hard-removed) and was not written.
    /// On success `record.rrn` holds the slot and, if the record is
    /// resident, the resident copy is refreshed.
    ///
    /// # Errors
    ///
    /// [`CatalogError::InvalidName`] for an empty name or one holding a line
    /// break or NUL, [`CatalogError::NameInUse`] if the name belongs to
    /// another record, or [`CatalogError::SlotFile`] if the write fails
    /// (including records too large for a slot).
    pub fn write_song(&mut self, record: &mut Record) -> Result<Option<Rrn>> {
        let resident = record.dbidx.filter(|&dbidx| dbidx < self.count());
        let status = match resident {
            Some(dbidx) if self.index.is_detached(dbidx) => RecordStatus::Removed,
            Some(dbidx) => self.index.get(dbidx).map_or(record.status, |r| r.status),
            None => record.status,
        };
        if status != RecordStatus::Standard {
            debug!(name = %record.name, "refusing to write non-standard record");
            return Ok(None);
        }
        if !is_storable_name(&record.name) {
            return Err(CatalogError::InvalidName {
                name: record.name.clone(),
            });
        }
        if let Some(owner) = self.index.dbidx_of(&record.name) {
            if resident != Some(owner) {
                return Err(CatalogError::NameInUse {
                    name: record.name.clone(),
                });
            }
        }

        let now = unix_now();
        if self.update_timestamps {
            record.last_updated = now;
        }
        if record.is_new() && record.date_added.is_none() {
            record.date_added = Some(now);
        }

        let was_new = record.is_new();
        let slot = self.slot_mut(OpenMode::ReadWrite)?;
        if was_new {
            record.rrn = slot.next_rrn()?;
        }
        let data = self.codec.encode(record);
        let slot = self.slot_mut(OpenMode::ReadWrite)?;
        let target = if was_new { NEW_RRN } else { record.rrn };
        let rrn = match slot.write(target, &data) {
            Ok(rrn) => rrn,
            Err(e) => {
                if was_new {
                    record.rrn = NEW_RRN;
                }
                return Err(e.into());
            }
        };
        record.rrn = rrn;

        if let Some(dbidx) = resident {
            self.index.replace(dbidx, record.clone())?;
            self.rebuild_counts();
        }
        debug!(name = %record.name, rrn, new = was_new, "record written");
        Ok(Some(rrn))
    }

    /// Point `new_name` at `dbidx` and forget `old_name`. The dbidx and the
    /// disk are untouched.
    ///
    /// # Errors
    ///
    /// [`CatalogError::NoSuchIndex`], [`CatalogError::NameInUse`] or
    /// [`CatalogError::NameMismatch`]; nothing changes on error.
    pub fn mark_renamed(&mut self, old_name: &str, new_name: &str, dbidx: Dbidx) -> Result<()> {
        self.index.rename(old_name, new_name, dbidx)?;
        debug!(old = old_name, new = new_name, dbidx, "record renamed");
        Ok(())
    }

    /// Hide `dbidx` from lookups and iteration. Returns `false` if it was
    /// not a live standard record.
    pub fn mark_removed(&mut self, dbidx: Dbidx) -> bool {
        let changed = self
            .index
            .transition(dbidx, RecordStatus::Standard, RecordStatus::Removed);
        if changed {
            self.rebuild_counts();
        }
        changed
    }

    /// Undo [`Catalog::mark_removed`]. Returns `false` if `dbidx` was not
    /// soft-removed.
    pub fn clear_removed(&mut self, dbidx: Dbidx) -> bool {
        let changed = self
            .index
            .transition(dbidx, RecordStatus::Removed, RecordStatus::Standard);
        if changed {
            self.rebuild_counts();
        }
        changed
    }

    /// Hard-remove `dbidx`: zero its slot on disk and detach it. The dbidx
    /// stays reserved and can never become live again.
    ///
    /// Intended for non-local records; local files are normally renamed
    /// with [`crate::DELETE_PREFIX`] by the reorganizer instead.
    ///
    /// # Errors
    ///
    /// [`CatalogError::NoSuchIndex`] if `dbidx` is not resident, or
    /// [`CatalogError::SlotFile`] if the slot cannot be cleared.
    pub fn remove_song(&mut self, dbidx: Dbidx) -> Result<()> {
        let (rrn, local, name) = match self.index.get(dbidx) {
            Some(record) if dbidx < self.count() => {
                (record.rrn, record.is_local(), record.name.clone())
            }
            _ => return Err(CatalogError::NoSuchIndex { dbidx }),
        };
        if local {
            warn!(name = %name, dbidx, "hard-removing a local record");
        }
        if rrn != NEW_RRN {
            self.slot_mut(OpenMode::ReadWrite)?.clear(rrn)?;
        }
        self.index.detach(dbidx)?;
        self.rebuild_counts();
        info!(name = %name, dbidx, rrn, "record removed");
        Ok(())
    }

    /// Register a session-only record and return its dbidx. The slot file
    /// is not touched.
    pub fn add_temporary_song(&mut self, record: Record) -> Dbidx {
        let dbidx = self.index.insert_temporary(record);
        debug!(dbidx, "temporary record added");
        dbidx
    }

    /// Re-read the slot behind `dbidx` from disk, keeping its dbidx and
    /// status. Returns `false`, leaving the cached copy alone, if the record
    /// was never written, its slot is now empty, or its audio is gone.
    ///
    /// # Errors
    ///
    /// [`CatalogError::NoSuchIndex`] if `dbidx` is not resident, or any
    /// read or decode failure.
    pub fn load_entry(&mut self, dbidx: Dbidx) -> Result<bool> {
        let rrn = match self.index.get(dbidx) {
            Some(record) if dbidx < self.count() => record.rrn,
            _ => return Err(CatalogError::NoSuchIndex { dbidx }),
        };
        if rrn == NEW_RRN {
            return Ok(false);
        }
        let slot = self.slot_mut(OpenMode::ReadOnly)?;
        slot.reload_header()?;
        let data = slot.read(rrn)?;
        if data.is_empty() {
            return Ok(false);
        }
        let record = self.codec.decode(data.payload(), rrn)?;
        if !self.source.exists(&record) {
            debug!(name = %record.name, dbidx, "audio missing, reload skipped");
            return Ok(false);
        }
        self.index.replace(dbidx, record)?;
        self.rebuild_counts();
        debug!(dbidx, rrn, "record reloaded");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Batching and timestamps
    // -----------------------------------------------------------------------

    /// Hold the lock and defer fsync until [`Catalog::end_batch`].
    ///
    /// # Errors
    ///
    /// [`CatalogError::SlotFile`] if the file cannot be opened or locked.
    pub fn start_batch(&mut self) -> Result<()> {
        self.slot_mut(OpenMode::ReadWrite)?.start_batch()?;
        Ok(())
    }

    /// Sync once, release the lock and close the slot file.
    ///
    /// # Errors
    ///
    /// [`CatalogError::SlotFile`] if the final sync or unlock fails.
    pub fn end_batch(&mut self) -> Result<()> {
        self.close_slot()
    }

    /// Stop bumping `last_updated` on write.
    pub fn disable_last_update_time(&mut self) {
        self.update_timestamps = false;
    }

    /// Resume bumping `last_updated` on write.
    pub fn enable_last_update_time(&mut self) {
        self.update_timestamps = true;
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Rotate `.bak.N` copies of the catalog file, keeping `depth`
    /// generations. Returns the path of the newest backup.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Io`] if a copy or rename fails.
    pub fn backup(&mut self, depth: u32) -> Result<Option<PathBuf>> {
        if let Some(slot) = self.slot.as_mut() {
            if slot.is_batch() {
                slot.end_batch()?;
                slot.start_batch()?;
            }
        }
        let newest = backup::rotate(&self.config.path, depth)?;
        if let Some(path) = &newest {
            info!(backup = %path.display(), depth, "catalog backed up");
        }
        Ok(newest)
    }

    /// Write every live standard record, in dbidx order, into a fresh slot
    /// file at `dest`. Slots are renumbered densely and timestamps are not
    /// touched. Returns the number of records written.
    ///
    /// Any open batch on this catalog is ended first.
    ///
    /// # Errors
    ///
    /// [`CatalogError::TargetExists`] if `dest` already holds data, or any
    /// slot file failure while writing.
    pub fn rebuild_into(&mut self, dest: &Path) -> Result<u32> {
        if fs::metadata(dest).is_ok_and(|m| m.len() > 0) {
            return Err(CatalogError::TargetExists(dest.display().to_string()));
        }
        self.close_slot()?;

        let mut target = self.open_slot_file(dest, OpenMode::ReadWrite)?;
        target.start_batch()?;
        let mut written = 0u32;
        let mut cursor = self.start_iterator();
        while let Some((_, record)) = self.iterate(&mut cursor) {
            let mut copy = record.clone();
            copy.rrn = target.next_rrn()?;
            let data = self.codec.encode(&copy);
            target.write(NEW_RRN, &data)?;
            written = written.saturating_add(1);
        }
        target.close()?;
        info!(dest = %dest.display(), records = written, "catalog rebuilt");
        Ok(written)
    }

    /// Verify the index and the category counts against each other.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Invariant`] describing the first violation.
    pub fn check_invariants(&self) -> Result<()> {
        self.index.check()?;
        let fresh = CategoryCounts::from_records(self.index.standard());
        if fresh != self.counts {
            return Err(CatalogError::Invariant(
                "category counts differ from a fresh recount".to_owned(),
            ));
        }
        Ok(())
    }

    /// Close the slot file and drop temporary records.
    ///
    /// # Errors
    ///
    /// [`CatalogError::SlotFile`] if the final sync or unlock fails.
    pub fn close(mut self) -> Result<()> {
        let temporaries = self.index.temporary_len();
        self.close_slot()?;
        debug!(temporaries, "catalog closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Slot file handling
    // -----------------------------------------------------------------------

    fn open_slot_file(&self, path: &Path, mode: OpenMode) -> Result<SlotFile> {
        let slot = SlotFile::open_with_policy(
            path,
            self.config.version,
            mode,
            (self.mutex)(),
            self.config.lock_policy,
        )?;
        Ok(slot)
    }

    // A read-only handle is upgraded by reopening; a read-write handle
    // serves reads too.
    fn slot_mut(&mut self, mode: OpenMode) -> Result<&mut SlotFile> {
        let upgrade = mode == OpenMode::ReadWrite
            && self
                .slot
                .as_ref()
                .is_some_and(|slot| slot.mode() == OpenMode::ReadOnly);
        if upgrade {
            self.close_slot()?;
        }
        if self.slot.is_none() {
            let path = self.config.path.clone();
            self.slot = Some(self.open_slot_file(&path, mode)?);
        }
        self.slot
            .as_mut()
            .ok_or_else(|| CatalogError::Invariant("slot file not open".to_owned()))
    }

    fn close_slot(&mut self) -> Result<()> {
        if let Some(slot) = self.slot.take() {
            slot.close()?;
        }
        Ok(())
    }

    fn rebuild_counts(&mut self) {
        self.counts = CategoryCounts::from_records(self.index.standard());
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// A line break would split the FILE pair on disk and a NUL would end the slot.
fn is_storable_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['\n', '\r', '\0'])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
