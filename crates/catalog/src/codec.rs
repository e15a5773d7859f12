//! Record serialisation for slot storage.
//!
//! [`TagCodec`] stores a record as `KEY\n..value\n` pairs:
//!
//! ```text
//! FILE\n..Artist/Album/01 - Title.mp3\n
//! ARTIST\n..Artist\n          (free-form tags, key order)
//! CATEGORY\n..4\n
//! DBADDDATE\n..1700000000\n
//! LASTUPDATED\n..1700000500\n
//! RRN\n..12\n
//! ```
//!
//! `FILE` is always first and `RRN` always last. Empty values are not
//! written. The output never contains a NUL byte, so it is safe in a
//! NUL-terminated slot.

use slotfile::Rrn;

use crate::error::{CatalogError, Result};
use crate::record::{Record, RecordStatus};

/// Tag holding the record name.
pub const TAG_FILE: &str = "FILE";
/// Tag holding the category key.
pub const TAG_CATEGORY: &str = "CATEGORY";
/// Tag holding the first-write timestamp.
pub const TAG_DATE_ADDED: &str = "DBADDDATE";
/// Tag holding the last-update timestamp.
pub const TAG_LAST_UPDATED: &str = "LASTUPDATED";
/// Tag holding the slot number.
pub const TAG_RRN: &str = "RRN";

const RESERVED: [&str; 5] = [TAG_FILE, TAG_CATEGORY, TAG_DATE_ADDED, TAG_LAST_UPDATED, TAG_RRN];
const VALUE_PREFIX: &str = "..";

/// Converts records to and from slot payloads.
pub trait RecordCodec: Send {
    /// Serialise `record`. The output must not contain NUL bytes.
    fn encode(&self, record: &Record) -> Vec<u8>;

    /// Deserialise a slot payload read from `rrn`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Decode`] if the payload is malformed.
    fn decode(&self, data: &[u8], rrn: Rrn) -> Result<Record>;
}

/// The line-oriented tag format.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagCodec;

impl RecordCodec for TagCodec {
    fn encode(&self, record: &Record) -> Vec<u8> {
        let mut out = String::with_capacity(256);
        push_pair(&mut out, TAG_FILE, &record.name);
        for (key, value) in &record.tags {
            if RESERVED.contains(&key.as_str()) {
                continue;
            }
            push_pair(&mut out, key, value);
        }
        if let Some(category) = record.category {
            push_pair(&mut out, TAG_CATEGORY, &category.to_string());
        }
        if let Some(added) = record.date_added {
            push_pair(&mut out, TAG_DATE_ADDED, &added.to_string());
        }
        push_pair(&mut out, TAG_LAST_UPDATED, &record.last_updated.to_string());
        push_pair(&mut out, TAG_RRN, &record.rrn.to_string());
        out.into_bytes()
    }

    fn decode(&self, data: &[u8], rrn: Rrn) -> Result<Record> {
        let text = std::str::from_utf8(data).map_err(|_| decode_error(rrn, "not UTF-8"))?;
        let mut record = Record::new("");
        let mut have_name = false;
        let mut lines = text.lines();

        while let Some(key) = lines.next() {
            if key.is_empty() {
                continue;
            }
            let value = lines
                .next()
                .and_then(|line| line.strip_prefix(VALUE_PREFIX))
                .ok_or_else(|| decode_error(rrn, &format!("missing value for {key}")))?;

            match key {
                TAG_FILE => {
                    record.name = value.to_owned();
                    have_name = true;
                }
                TAG_CATEGORY => record.category = Some(parse_num(rrn, key, value)?),
                TAG_DATE_ADDED => record.date_added = Some(parse_num(rrn, key, value)?),
                TAG_LAST_UPDATED => record.last_updated = parse_num(rrn, key, value)?,
                // The slot position is authoritative.
                TAG_RRN => {}
                _ => record.set_tag(key, value),
            }
        }

        if !have_name || record.name.is_empty() {
            return Err(decode_error(rrn, "no FILE tag"));
        }
        record.rrn = rrn;
        record.status = RecordStatus::Standard;
        Ok(record)
    }
}

fn push_pair(out: &mut String, key: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    out.push_str(&sanitize(key));
    out.push('\n');
    out.push_str(VALUE_PREFIX);
    out.push_str(&sanitize(value));
    out.push('\n');
}

// Newlines would split a pair and NUL would truncate the slot.
fn sanitize(text: &str) -> String {
    text.replace(['\n', '\r', '\0'], " ")
}

fn parse_num<T: std::str::FromStr>(rrn: Rrn, key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| decode_error(rrn, &format!("invalid number for {key}")))
}

fn decode_error(rrn: Rrn, reason: &str) -> CatalogError {
    CatalogError::Decode {
        rrn,
        reason: reason.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let mut r = Record::new("Portishead/Dummy/02 - Sour Times.flac")
            .with_tag("ARTIST", "Portishead")
            .with_tag("TITLE", "Sour Times")
            .with_category(4);
        r.last_updated = 1_700_000_500;
        r.date_added = Some(1_700_000_000);
        r.rrn = 12;
        r
    }

    #[test]
    fn encode_layout() {
        let text = String::from_utf8(TagCodec.encode(&sample())).unwrap();
        assert_eq!(
            text,
            "FILE\n..Portishead/Dummy/02 - Sour Times.flac\n\
             ARTIST\n..Portishead\n\
             TITLE\n..Sour Times\n\
             CATEGORY\n..4\n\
             DBADDDATE\n..1700000000\n\
             LASTUPDATED\n..1700000500\n\
             RRN\n..12\n"
        );
    }

    #[test]
    fn decode_restores_fields() {
        let original = sample();
        let decoded = TagCodec.decode(&TagCodec.encode(&original), 12).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn decode_forces_slot_rrn() {
        let data = TagCodec.encode(&sample());
        let decoded = TagCodec.decode(&data, 40).unwrap();
        assert_eq!(decoded.rrn, 40);
    }

    #[test]
    fn empty_values_are_skipped() {
        let r = Record::new("a.mp3").with_tag("GENRE", "");
        let text = String::from_utf8(TagCodec.encode(&r)).unwrap();
        assert!(!text.contains("GENRE"));
    }

    #[test]
    fn newlines_in_values_are_flattened() {
        let r = Record::new("a.mp3").with_tag("NOTES", "line one\nline two\0");
        let data = TagCodec.encode(&r);
        assert!(!data.contains(&0));
        let decoded = TagCodec.decode(&data, 1).unwrap();
        assert_eq!(decoded.tag("NOTES"), Some("line one line two "));
    }

    #[test]
    fn reserved_keys_in_tags_do_not_duplicate() {
        let r = Record::new("a.mp3").with_tag("RRN", "99").with_tag("FILE", "b.mp3");
        let text = String::from_utf8(TagCodec.encode(&r)).unwrap();
        assert_eq!(text.matches("FILE\n").count(), 1);
        assert_eq!(text.matches("RRN\n").count(), 1);
    }

    #[test]
    fn decode_without_file_fails() {
        let err = TagCodec.decode(b"TITLE\n..x\n", 3).unwrap_err();
        assert!(matches!(err, CatalogError::Decode { rrn: 3, .. }));
    }

    #[test]
    fn decode_missing_value_prefix_fails() {
        let err = TagCodec.decode(b"FILE\na.mp3\n", 1).unwrap_err();
        assert!(matches!(err, CatalogError::Decode { .. }));
    }

    #[test]
    fn decode_bad_number_fails() {
        let err = TagCodec
            .decode(b"FILE\n..a.mp3\nCATEGORY\n..waltz\n", 1)
            .unwrap_err();
        assert!(matches!(err, CatalogError::Decode { .. }));
    }
}
