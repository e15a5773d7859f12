//! Music catalog: name- and index-addressable records over a slot file.
//!
//! Records are loaded once from a [`slotfile::SlotFile`], sorted by name and
//! given a dense 0-based `dbidx` that stays stable for the life of the
//! [`Catalog`]. Lookups and iteration never return soft-removed records.
//!
//! # Modules
//!
//! - [`catalog`]: `Catalog`, its builder and iteration cursor
//! - [`record`]: `Record` and `RecordStatus`
//! - [`index`]: `RecordIndex`, the name ⇄ dbidx mapping
//! - [`codec`]: `RecordCodec` trait and the `TagCodec` slot format
//! - [`source`]: `AudioSource` existence checks
//! - [`counts`]: per-category live counts
//! - [`config`]: constants and `CatalogConfig`
//! - [`backup`]: `.bak.N` rotation

#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]
#![warn(missing_docs)]

pub mod backup;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod counts;
pub mod error;
pub mod index;
pub mod record;
pub mod source;

pub use catalog::{Catalog, CatalogBuilder, Cursor, MutexFactory};
pub use codec::{RecordCodec, TagCodec};
pub use config::{
    deleted_name, CatalogConfig, BACKUP_DEPTH, CATALOG_VERSION, DEFAULT_FILE_NAME,
    DEFAULT_LOCK_NAME, DELETE_PREFIX, TEMPORARY_DBIDX_OFFSET,
};
pub use counts::CategoryCounts;
pub use error::{CatalogError, Result};
pub use index::RecordIndex;
pub use record::{CategoryKey, Dbidx, Record, RecordStatus};
pub use source::{AnySource, AudioSource, LocalAudioSource};
