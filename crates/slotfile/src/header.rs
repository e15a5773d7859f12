//! Text header at the start of every slot file.
//!
//! The header occupies a fixed [`HEADER_SIZE`]-byte region and holds four
//! newline-terminated ASCII lines:
//!
//! ```text
//! #VERSION=<int>\n
//! # Do not edit this file.\n
//! #RASIZE=<int>\n
//! #RACOUNT=<int>\n
//! ```
//!
//! Bytes after the fourth line are don't-care. The header is rewritten in
//! place whenever the record count changes; the count only grows, so the
//! encoded length never shrinks and no stale digits are left behind.

use crate::error::{Result, SlotFileError};

/// Size in bytes of the header region. Slot 1 starts at this offset.
pub const HEADER_SIZE: usize = 128;

/// Slot size used by newly created files.
pub const RECORD_SIZE: u32 = 2048;

const VERSION_KEY: &str = "#VERSION=";
const COMMENT_LINE: &str = "# Do not edit this file.\n";
const SIZE_KEY: &str = "#RASIZE=";
const COUNT_KEY: &str = "#RACOUNT=";

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Parsed header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Format version recorded by the creator of the file.
    pub version: u32,
    /// Fixed size of every slot in bytes.
    pub record_size: u32,
    /// Number of slots currently allocated.
    pub count: u32,
}

impl Header {
    /// Header for a freshly created, empty file.
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self {
            version,
            record_size: RECORD_SIZE,
            count: 0,
        }
    }

    /// Encode the four header lines. The result is always shorter than
    /// [`HEADER_SIZE`] (at most 84 bytes for `u32` fields).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{VERSION_KEY}{}\n{COMMENT_LINE}{SIZE_KEY}{}\n{COUNT_KEY}{}\n",
            self.version, self.record_size, self.count
        )
        .into_bytes()
    }

    /// Parse a header from the start of a file.
    ///
    /// Only the first [`HEADER_SIZE`] bytes are examined.
    ///
    /// # Errors
    ///
    /// Returns [`SlotFileError::BadHeader`] if any of the four lines is
    /// missing, not newline-terminated, has the wrong key, or carries a
    /// value that is not an unsigned integer. A record size other than
    /// [`RECORD_SIZE`] is also rejected: every slot buffer is sized from it.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let region = buf.get(..HEADER_SIZE).unwrap_or(buf);
        let mut lines = region.split_inclusive(|&b| b == b'\n');

        let version = parse_field(lines.next(), VERSION_KEY)?;
        match lines.next() {
            Some(line) if line.ends_with(b"\n") => {}
            _ => return Err(SlotFileError::bad_header("missing comment line")),
        }
        let record_size = parse_field(lines.next(), SIZE_KEY)?;
        let count = parse_field(lines.next(), COUNT_KEY)?;

        if record_size != RECORD_SIZE {
            return Err(SlotFileError::bad_header(format!(
                "record size {record_size}, expected {RECORD_SIZE}"
            )));
        }

        Ok(Self {
            version,
            record_size,
            count,
        })
    }
}

fn parse_field(line: Option<&[u8]>, key: &str) -> Result<u32> {
    let line = line.ok_or_else(|| SlotFileError::bad_header(format!("missing {key} line")))?;
    let body = line
        .strip_suffix(b"\n")
        .ok_or_else(|| SlotFileError::bad_header(format!("unterminated {key} line")))?;
    let value = body
        .strip_prefix(key.as_bytes())
        .ok_or_else(|| SlotFileError::bad_header(format!("expected {key}")))?;
    std::str::from_utf8(value)
        .ok()
        .and_then(|text| text.trim().parse::<u32>().ok())
        .ok_or_else(|| SlotFileError::bad_header(format!("invalid value for {key}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
