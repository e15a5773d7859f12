//! Error type for slot file operations.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SlotFileError>;

/// Failures reported by [`crate::SlotFile`] and the lock implementations.
#[derive(Debug, Error)]
pub enum SlotFileError {
    /// Underlying filesystem I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The header region could not be parsed. The file is not a slot file
    /// (or is damaged) and is never silently treated as new.
    #[error("bad slot file header: {reason}")]
    BadHeader {
        /// What part of the header failed to parse.
        reason: String,
    },

    /// The payload does not fit in one slot (one byte is reserved for the
    /// terminating NUL).
    #[error("record of {len} bytes exceeds the {max} byte limit")]
    RecordTooLarge {
        /// Length of the rejected payload.
        len: usize,
        /// Largest accepted payload length.
        max: usize,
    },

    /// The RRN is outside `1..=count`.
    #[error("rrn {rrn} out of range (count {count})")]
    RrnOutOfRange {
        /// Requested record number.
        rrn: u32,
        /// Current record count.
        count: u32,
    },

    /// A mutating call was made on a handle opened read-only.
    #[error("slot file opened read-only")]
    ReadOnly,

    /// The named mutex could not be acquired within the retry budget.
    /// Nothing has been written when this is returned.
    #[error("lock '{name}' not acquired after {attempts} attempts")]
    LockTimeout {
        /// Logical lock name.
        name: String,
        /// Number of attempts made.
        attempts: u32,
    },
}

impl SlotFileError {
    pub(crate) fn bad_header(reason: impl Into<String>) -> Self {
        Self::BadHeader {
            reason: reason.into(),
        }
    }
}
