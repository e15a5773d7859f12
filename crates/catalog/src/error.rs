//! Error type for catalog operations.

use std::io;

use slotfile::{Rrn, SlotFileError};
use thiserror::Error;

use crate::record::Dbidx;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Failures reported by [`crate::Catalog`] and its collaborators.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The backing slot file failed.
    #[error(transparent)]
    SlotFile(#[from] SlotFileError),

    /// Filesystem I/O outside the slot file (backups, rebuild targets).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored record could not be decoded.
    #[error("cannot decode record at rrn {rrn}: {reason}")]
    Decode {
        /// Slot the record was read from.
        rrn: Rrn,
        /// What was wrong with it.
        reason: String,
    },

    /// The dbidx does not name a resident standard record.
    #[error("no record at dbidx {dbidx}")]
    NoSuchIndex {
        /// Requested index.
        dbidx: Dbidx,
    },

    /// A rename target is already mapped to a different record.
    #[error("name '{name}' already in use")]
    NameInUse {
        /// Conflicting name.
        name: String,
    },

    /// The name cannot be stored: it is empty or holds a line break or NUL.
    #[error("name {name:?} cannot be stored")]
    InvalidName {
        /// Rejected name.
        name: String,
    },

    /// A rename source is not mapped to the given dbidx.
    #[error("name '{name}' is not mapped to dbidx {dbidx}")]
    NameMismatch {
        /// Name the caller supplied.
        name: String,
        /// Index the caller supplied.
        dbidx: Dbidx,
    },

    /// A rebuild target already holds data.
    #[error("rebuild target {0} already exists")]
    TargetExists(String),

    /// The in-memory indices disagree with each other.
    #[error("catalog invariant violated: {0}")]
    Invariant(String),
}
