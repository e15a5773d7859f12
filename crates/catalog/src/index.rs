//! RecordIndex: the name ⇄ dbidx ⇄ record mapping behind a `Catalog`.
//!
//! Both directions live in one structure and are only changed through
//! methods that update them together, so a rename or removal cannot leave
//! one side behind. [`RecordIndex::check`] verifies the invariants and is
//! called from tests after every mutation.
//!
//! Standard records occupy dbidx `0..len()` in name order, assigned once
//! by [`RecordIndex::from_sorted`]. Temporary records live above
//! `len() + TEMPORARY_DBIDX_OFFSET` so the two ranges never meet.

use std::collections::BTreeMap;

use crate::config::TEMPORARY_DBIDX_OFFSET;
use crate::error::{CatalogError, Result};
use crate::record::{Dbidx, Record, RecordStatus};

#[derive(Debug, Clone)]
struct Entry {
    record: Record,
    // Hard-removed: slot cleared, name unmapped, dbidx kept reserved.
    detached: bool,
}

/// Bidirectional index over standard and temporary records.
#[derive(Debug, Clone)]
pub struct RecordIndex {
    names: BTreeMap<String, Dbidx>,
    entries: Vec<Entry>,
    temps: BTreeMap<Dbidx, Record>,
    temp_base: Dbidx,
    temp_added: Dbidx,
}

impl Default for RecordIndex {
    fn default() -> Self {
        Self::from_sorted(BTreeMap::new())
    }
}

impl RecordIndex {
    /// Build the index from name-keyed records, assigning dbidx `0..n` in
    /// name order.
    pub fn from_sorted(records: BTreeMap<String, Record>) -> Self {
        let mut names = BTreeMap::new();
        let mut entries = Vec::with_capacity(records.len());
        for (pos, (name, mut record)) in records.into_iter().enumerate() {
            let dbidx = to_dbidx(pos);
            record.dbidx = Some(dbidx);
            record.name.clone_from(&name);
            names.insert(name, dbidx);
            entries.push(Entry {
                record,
                detached: false,
            });
        }
        let temp_base = to_dbidx(entries.len()).saturating_add(TEMPORARY_DBIDX_OFFSET);
        Self {
            names,
            entries,
            temps: BTreeMap::new(),
            temp_base,
            temp_added: 0,
        }
    }

    /// Number of standard dbidx values handed out (including removed ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no standard records were loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of temporary records registered.
    pub fn temporary_len(&self) -> usize {
        self.temps.len()
    }

    /// dbidx mapped to `name`, whatever the record's status.
    pub fn dbidx_of(&self, name: &str) -> Option<Dbidx> {
        self.names.get(name).copied()
    }

    /// Resident record at `dbidx`, whatever its status. Hard-removed
    /// records are not returned.
    pub fn get(&self, dbidx: Dbidx) -> Option<&Record> {
        match self.entries.get(dbidx as usize) {
            Some(entry) if !entry.detached => Some(&entry.record),
            Some(_) => None,
            None => self.temps.get(&dbidx),
        }
    }

    /// `true` if `dbidx` was hard-removed.
    pub fn is_detached(&self, dbidx: Dbidx) -> bool {
        self.entries
            .get(dbidx as usize)
            .is_some_and(|entry| entry.detached)
    }

    /// First standard record at or after `from` that is neither removed nor
    /// detached.
    pub fn next_visible(&self, from: Dbidx) -> Option<(Dbidx, &Record)> {
        self.entries
            .iter()
            .enumerate()
            .skip(from as usize)
            .find(|(_, entry)| !entry.detached && entry.record.is_live())
            .map(|(pos, entry)| (to_dbidx(pos), &entry.record))
    }

    /// Every resident standard record, removed ones included.
    pub fn standard(&self) -> impl Iterator<Item = &Record> + '_ {
        self.entries
            .iter()
            .filter(|entry| !entry.detached)
            .map(|entry| &entry.record)
    }

    /// Move `dbidx` from `old` to `new` in the name map and rename the
    /// record itself. The dbidx does not change.
    ///
    /// Re-applying a rename that is already in effect succeeds.
    ///
    /// # Errors
    ///
    /// [`CatalogError::NoSuchIndex`] if `dbidx` is not a resident standard
    /// record, [`CatalogError::NameInUse`] if `new` maps to another record,
    /// [`CatalogError::NameMismatch`] if `old` does not map to `dbidx`.
    pub fn rename(&mut self, old: &str, new: &str, dbidx: Dbidx) -> Result<()> {
        self.entry(dbidx)?;
        match self.names.get(new) {
            Some(&mapped) if mapped == dbidx => {
                self.entry_mut(dbidx)?.record.name = new.to_owned();
                return Ok(());
            }
            Some(_) => {
                return Err(CatalogError::NameInUse {
                    name: new.to_owned(),
                })
            }
            None => {}
        }
        if self.names.get(old) != Some(&dbidx) {
            return Err(CatalogError::NameMismatch {
                name: old.to_owned(),
                dbidx,
            });
        }
        self.names.remove(old);
        self.names.insert(new.to_owned(), dbidx);
        self.entry_mut(dbidx)?.record.name = new.to_owned();
        Ok(())
    }

    /// Change the status of a resident standard record from `from` to `to`.
    /// Returns `false` (and changes nothing) if the record is not in `from`.
    pub fn transition(&mut self, dbidx: Dbidx, from: RecordStatus, to: RecordStatus) -> bool {
        match self.entry_mut(dbidx) {
            Ok(entry) if entry.record.status == from => {
                entry.record.status = to;
                true
            }
            _ => false,
        }
    }

    /// Replace the resident copy at `dbidx` with `record`.
    ///
    /// The resident status and dbidx are kept. A changed name is applied as
    /// a rename.
    ///
    /// # Errors
    ///
    /// Same as [`RecordIndex::rename`].
    pub fn replace(&mut self, dbidx: Dbidx, mut record: Record) -> Result<()> {
        let current = self.entry(dbidx)?.record.name.clone();
        if record.name != current {
            self.rename(&current, &record.name, dbidx)?;
        }
        let entry = self.entry_mut(dbidx)?;
        record.dbidx = Some(dbidx);
        record.status = entry.record.status;
        entry.record = record;
        Ok(())
    }

    /// Hard-remove `dbidx`: mark it removed, unmap its name, and keep the
    /// dbidx reserved. Returns the detached record.
    ///
    /// # Errors
    ///
    /// [`CatalogError::NoSuchIndex`] if `dbidx` is not a resident standard
    /// record.
    pub fn detach(&mut self, dbidx: Dbidx) -> Result<&Record> {
        let name = self.entry(dbidx)?.record.name.clone();
        if self.names.get(&name) == Some(&dbidx) {
            self.names.remove(&name);
        }
        let entry = self.entry_mut(dbidx)?;
        entry.record.status = RecordStatus::Removed;
        entry.detached = true;
        Ok(&entry.record)
    }

    /// Register a temporary record and return its dbidx.
    pub fn insert_temporary(&mut self, mut record: Record) -> Dbidx {
        let dbidx = self.temp_base.saturating_add(self.temp_added);
        self.temp_added = self.temp_added.saturating_add(1);
        record.status = RecordStatus::Temporary;
        record.dbidx = Some(dbidx);
        self.temps.insert(dbidx, record);
        dbidx
    }

    /// Verify that both directions agree.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Invariant`] describing the first violation found.
    pub fn check(&self) -> Result<()> {
        for (name, &dbidx) in &self.names {
            let entry = self
                .entries
                .get(dbidx as usize)
                .ok_or_else(|| invariant(format!("name '{name}' maps past the end ({dbidx})")))?;
            if entry.detached {
                return Err(invariant(format!("name '{name}' maps to detached {dbidx}")));
            }
            if entry.record.name != *name {
                return Err(invariant(format!(
                    "name '{name}' maps to {dbidx} which is named '{}'",
                    entry.record.name
                )));
            }
        }

        let mut attached = 0usize;
        for (pos, entry) in self.entries.iter().enumerate() {
            let dbidx = to_dbidx(pos);
            if entry.record.dbidx != Some(dbidx) {
                return Err(invariant(format!("entry {dbidx} carries a different dbidx")));
            }
            if entry.record.status == RecordStatus::Temporary {
                return Err(invariant(format!("entry {dbidx} is temporary")));
            }
            if entry.detached {
                continue;
            }
            attached = attached.saturating_add(1);
            if self.names.get(&entry.record.name) != Some(&dbidx) {
                return Err(invariant(format!(
                    "entry {dbidx} ('{}') is not reachable by name",
                    entry.record.name
                )));
            }
        }
        if attached != self.names.len() {
            return Err(invariant(format!(
                "{} names for {attached} attached entries",
                self.names.len()
            )));
        }

        for (&dbidx, record) in &self.temps {
            if dbidx < self.temp_base {
                return Err(invariant(format!("temporary {dbidx} below {}", self.temp_base)));
            }
            if record.dbidx != Some(dbidx) || record.status != RecordStatus::Temporary {
                return Err(invariant(format!("temporary {dbidx} is inconsistent")));
            }
        }
        Ok(())
    }

    fn entry(&self, dbidx: Dbidx) -> Result<&Entry> {
        match self.entries.get(dbidx as usize) {
            Some(entry) if !entry.detached => Ok(entry),
            _ => Err(CatalogError::NoSuchIndex { dbidx }),
        }
    }

    fn entry_mut(&mut self, dbidx: Dbidx) -> Result<&mut Entry> {
        match self.entries.get_mut(dbidx as usize) {
            Some(entry) if !entry.detached => Ok(entry),
            _ => Err(CatalogError::NoSuchIndex { dbidx }),
        }
    }
}

fn to_dbidx(pos: usize) -> Dbidx {
    Dbidx::try_from(pos).unwrap_or(Dbidx::MAX)
}

fn invariant(message: String) -> CatalogError {
    CatalogError::Invariant(message)
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

    fn index_of(names: &[&str]) -> RecordIndex {
        let records = names
            .iter()
            .map(|n| ((*n).to_owned(), Record::new(*n)))
            .collect();
        RecordIndex::from_sorted(records)
    }

    #[test]
    fn dbidx_follows_name_order() {
        let idx = index_of(&["c.mp3", "a.mp3", "b.mp3"]);
        assert_eq!(idx.dbidx_of("a.mp3"), Some(0));
        assert_eq!(idx.dbidx_of("b.mp3"), Some(1));
        assert_eq!(idx.dbidx_of("c.mp3"), Some(2));
        assert_eq!(idx.get(1).unwrap().name, "b.mp3");
        idx.check().unwrap();
    }

    #[test]
    fn rename_moves_name_and_keeps_dbidx() {
        let mut idx = index_of(&["a.mp3", "b.mp3"]);
        idx.rename("a.mp3", "z.mp3", 0).unwrap();
        assert_eq!(idx.dbidx_of("a.mp3"), None);
        assert_eq!(idx.dbidx_of("z.mp3"), Some(0));
        assert_eq!(idx.get(0).unwrap().name, "z.mp3");
        idx.check().unwrap();
    }

    #[test]
    fn rename_is_idempotent() {
        let mut idx = index_of(&["a.mp3"]);
        idx.rename("a.mp3", "b.mp3", 0).unwrap();
        idx.rename("a.mp3", "b.mp3", 0).unwrap();
        assert_eq!(idx.dbidx_of("b.mp3"), Some(0));
        idx.check().unwrap();
    }

    #[test]
    fn rename_onto_other_record_fails() {
        let mut idx = index_of(&["a.mp3", "b.mp3"]);
        let err = idx.rename("a.mp3", "b.mp3", 0).unwrap_err();
        assert!(matches!(err, CatalogError::NameInUse { .. }));
        idx.check().unwrap();
    }

    #[test]
    fn rename_with_wrong_source_fails() {
        let mut idx = index_of(&["a.mp3", "b.mp3"]);
        let err = idx.rename("b.mp3", "c.mp3", 0).unwrap_err();
        assert!(matches!(err, CatalogError::NameMismatch { dbidx: 0, .. }));
        idx.check().unwrap();
    }

    #[test]
    fn transition_requires_expected_status() {
        let mut idx = index_of(&["a.mp3"]);
        assert!(idx.transition(0, RecordStatus::Standard, RecordStatus::Removed));
        assert!(!idx.transition(0, RecordStatus::Standard, RecordStatus::Removed));
        assert!(idx.transition(0, RecordStatus::Removed, RecordStatus::Standard));
        idx.check().unwrap();
    }

    #[test]
    fn detach_unmaps_name_but_keeps_slot() {
        let mut idx = index_of(&["a.mp3", "b.mp3"]);
        idx.detach(0).unwrap();
        assert_eq!(idx.dbidx_of("a.mp3"), None);
        assert!(idx.get(0).is_none());
        assert!(idx.is_detached(0));
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.get(1).unwrap().dbidx, Some(1));
        assert!(!idx.transition(0, RecordStatus::Removed, RecordStatus::Standard));
        idx.check().unwrap();
    }

    #[test]
    fn replace_keeps_status_and_applies_rename() {
        let mut idx = index_of(&["a.mp3"]);
        idx.transition(0, RecordStatus::Standard, RecordStatus::Removed);
        let updated = Record::new("b.mp3").with_tag("TITLE", "New");
        idx.replace(0, updated).unwrap();
        let r = idx.get(0).unwrap();
        assert_eq!(r.status, RecordStatus::Removed);
        assert_eq!(r.tag("TITLE"), Some("New"));
        assert_eq!(idx.dbidx_of("b.mp3"), Some(0));
        idx.check().unwrap();
    }

    #[test]
    fn temporaries_sit_above_offset() {
        let mut idx = index_of(&["a", "b", "c"]);
        let first = idx.insert_temporary(Record::new("t1"));
        let second = idx.insert_temporary(Record::new("t2"));
        assert_eq!(first, 3 + TEMPORARY_DBIDX_OFFSET);
        assert_eq!(second, 3 + TEMPORARY_DBIDX_OFFSET + 1);
        assert_eq!(idx.get(first).unwrap().status, RecordStatus::Temporary);
        assert_eq!(idx.temporary_len(), 2);
        idx.check().unwrap();
    }

    #[test]
    fn next_visible_skips_removed_and_detached() {
        let mut idx = index_of(&["a", "b", "c", "d"]);
        idx.transition(1, RecordStatus::Standard, RecordStatus::Removed);
        idx.detach(2).unwrap();
        assert_eq!(idx.next_visible(0).map(|(i, _)| i), Some(0));
        assert_eq!(idx.next_visible(1).map(|(i, _)| i), Some(3));
        assert_eq!(idx.next_visible(4), None);
    }

    #[test]
    fn check_catches_name_drift() {
        let mut idx = index_of(&["a", "b"]);
        idx.entries[0].record.name = "zzz".to_owned();
        assert!(matches!(idx.check(), Err(CatalogError::Invariant(_))));
    }
}
