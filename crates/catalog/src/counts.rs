//! Live record counts per category.

use std::collections::BTreeMap;

use crate::record::{CategoryKey, Record};

/// Number of live records per category key.
///
/// Built incrementally while loading and rebuilt from scratch whenever a
/// record's removed state changes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CategoryCounts {
    counts: BTreeMap<CategoryKey, u32>,
}

impl CategoryCounts {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every live record in `records`.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut counts = Self::new();
        for record in records {
            if record.is_live() {
                counts.add(record);
            }
        }
        counts
    }

    /// Count one record under its category, if it has one.
    pub fn add(&mut self, record: &Record) {
        if let Some(key) = record.category {
            let slot = self.counts.entry(key).or_insert(0);
            *slot = slot.saturating_add(1);
        }
    }

    /// Live count for `key` (zero when absent).
    pub fn get(&self, key: CategoryKey) -> u32 {
        self.counts.get(&key).copied().unwrap_or(0)
    }

    /// Categories with a non-zero count, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (CategoryKey, u32)> + '_ {
        self.counts.iter().map(|(&k, &v)| (k, v))
    }

    /// Sum over all categories.
    pub fn total(&self) -> u32 {
        self.counts.values().fold(0u32, |acc, &v| acc.saturating_add(v))
    }

    /// `true` when no record carries a category.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
