//! Fixed-record random access storage: the "slot file".
//!
//! A slot file is a small text header followed by `count` fixed-size slots.
//! Each slot holds one NUL-terminated record; an all-zero slot is empty.
//! Header updates are serialised across processes with a [`NamedMutex`]
//! keyed by a logical name.
//!
//! # Modules
//!
//! - [`header`]: header layout, encode and parse
//! - [`file`]: `SlotFile` handle: read, write, clear, batch mode
//! - [`lock`]: `NamedMutex` trait, `PidLockFile`, retry policy
//! - [`error`]: `SlotFileError`

#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]
#![warn(missing_docs)]

pub mod error;
pub mod file;
pub mod header;
pub mod lock;

pub use error::{Result, SlotFileError};
pub use file::{rrn_offset, OpenMode, Rrn, Slot, SlotFile, NEW_RRN};
pub use header::{Header, HEADER_SIZE, RECORD_SIZE};
pub use lock::{LockPolicy, NamedMutex, NullMutex, PidLockFile};
