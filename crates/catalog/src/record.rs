//! Record: one catalog entry (a song file or a remote stream).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slotfile::{Rrn, NEW_RRN};

/// 0-based logical record identifier, stable for the life of a `Catalog`.
pub type Dbidx = u32;

/// Key of the category a record is counted under (e.g. its dance).
pub type CategoryKey = u32;

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    /// Live, persisted record.
    Standard,
    /// Resident but hidden from lookups and iteration.
    Removed,
    /// Session-only record with no slot behind it.
    Temporary,
}

/// A single catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Unique name: a path relative to the music directory, an absolute
    /// path, or a URI for non-local sources.
    pub name: String,
    /// Category the record is counted under, if any.
    pub category: Option<CategoryKey>,
    /// Unix seconds of the last persisted change.
    pub last_updated: u64,
    /// Unix seconds of the first write.
    pub date_added: Option<u64>,
    /// Backing slot, or [`NEW_RRN`] before the first write.
    pub rrn: Rrn,
    /// Index assigned by the catalog, `None` until loaded or registered.
    pub dbidx: Option<Dbidx>,
    /// Lifecycle state.
    pub status: RecordStatus,
    /// Remaining free-form tags (title, artist, ...).
    pub tags: BTreeMap<String, String>,
}

impl Record {
    /// A fresh, never-written standard record.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: None,
            last_updated: 0,
            date_added: None,
            rrn: NEW_RRN,
            dbidx: None,
            status: RecordStatus::Standard,
            tags: BTreeMap::new(),
        }
    }

    /// Builder-style tag setter.
    #[must_use]
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.set_tag(key, value);
        self
    }

    /// Builder-style category setter.
    #[must_use]
    pub fn with_category(mut self, category: CategoryKey) -> Self {
        self.category = Some(category);
        self
    }

    /// Set a free-form tag.
    pub fn set_tag(&mut self, key: &str, value: &str) {
        self.tags.insert(key.to_owned(), value.to_owned());
    }

    /// Look up a free-form tag.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// `true` until the record has been written to a slot.
    pub fn is_new(&self) -> bool {
        self.rrn == NEW_RRN
    }

    /// `true` for a live standard record.
    pub fn is_live(&self) -> bool {
        self.status == RecordStatus::Standard
    }

    /// `true` when the name refers to a file rather than a `scheme://` URI.
    pub fn is_local(&self) -> bool {
        !self.name.contains("://")
    }
}
