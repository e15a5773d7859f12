//! End-to-end tests: Catalog → slot file on disk → reopened Catalog.
//!
//! No mocks. Uses tempfiles. Every test ends with `check_invariants()` after
//! the mutations it performs.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use catalog::{
    backup, AnySource, Catalog, CatalogConfig, CatalogError, Record, RecordCodec, RecordStatus,
    TagCodec, CATALOG_VERSION, TEMPORARY_DBIDX_OFFSET,
};
use proptest::prelude::*;
use slotfile::{NamedMutex, NullMutex, OpenMode, PidLockFile, SlotFile, NEW_RRN};
use tempfile::TempDir;

fn db_path(tmp: &TempDir) -> PathBuf {
    tmp.path().join("musicdb.dat")
}

fn open(path: &Path) -> Catalog {
    Catalog::builder(CatalogConfig::new(path))
        .source(AnySource)
        .mutex_factory(|| Box::new(NullMutex::new("rafile")))
        .open()
        .unwrap()
}

/// Write `names` (with the given categories) into a fresh catalog file.
fn seed(path: &Path, entries: &[(&str, Option<u32>)]) {
    let mut cat = open(path);
    cat.start_batch().unwrap();
    for &(name, category) in entries {
        let mut r = Record::new(name).with_tag("TITLE", name);
        r.category = category;
        cat.write_song(&mut r).unwrap();
    }
    cat.end_batch().unwrap();
    cat.close().unwrap();
}

fn header_count(path: &Path) -> u32 {
    let sf = SlotFile::open(
        path,
        CATALOG_VERSION,
        OpenMode::ReadOnly,
        Box::new(NullMutex::new("rafile")),
    )
    .unwrap();
    sf.count()
}

// ---------------------------------------------------------------------------
// Basic persistence
// ---------------------------------------------------------------------------

#[test]
fn written_record_is_found_after_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);

    let mut cat = open(&path);
    let mut written = Record::new("a.mp3")
        .with_tag("ARTIST", "Someone")
        .with_category(3);
    assert_eq!(cat.write_song(&mut written).unwrap(), Some(1));
    cat.close().unwrap();

    let cat = open(&path);
    let found = cat.get_by_name("a.mp3").unwrap();
    assert_eq!(found.dbidx, Some(0));

    let mut expected = written.clone();
    expected.dbidx = Some(0);
    assert_eq!(*found, expected);
    assert_eq!(cat.get_by_index(0), Some(found));
    cat.check_invariants().unwrap();
}

#[test]
fn dbidx_follows_sorted_names_not_slot_order() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(&path, &[("c.mp3", None), ("a.mp3", None), ("b.mp3", None)]);

    let cat = open(&path);
    let order: Vec<_> = cat.iter().map(|(i, r)| (i, r.name.clone(), r.rrn)).collect();
    assert_eq!(
        order,
        vec![
            (0, "a.mp3".to_owned(), 2),
            (1, "b.mp3".to_owned(), 3),
            (2, "c.mp3".to_owned(), 1),
        ]
    );
    cat.check_invariants().unwrap();
}

#[test]
fn rewrite_keeps_rrn_and_does_not_grow_file() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(&path, &[("a.mp3", None), ("b.mp3", None)]);

    let mut cat = open(&path);
    let mut r = cat.get_by_name("b.mp3").unwrap().clone();
    r.set_tag("TITLE", "Renamed Title");
    assert_eq!(cat.write_song(&mut r).unwrap(), Some(2));
    assert_eq!(cat.get_by_index(1).unwrap().tag("TITLE"), Some("Renamed Title"));
    cat.close().unwrap();

    assert_eq!(header_count(&path), 2);
    let cat = open(&path);
    assert_eq!(cat.get_by_name("b.mp3").unwrap().tag("TITLE"), Some("Renamed Title"));
}

// ---------------------------------------------------------------------------
// Soft removal
// ---------------------------------------------------------------------------

#[test]
fn soft_removed_record_is_invisible_and_uncounted() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(&path, &[("a.mp3", Some(1)), ("b.mp3", Some(1)), ("c.mp3", Some(2))]);

    let mut cat = open(&path);
    assert_eq!(cat.category_counts().get(1), 2);

    assert!(cat.mark_removed(1));
    cat.check_invariants().unwrap();
    assert_eq!(cat.category_counts().get(1), 1);
    assert_eq!(cat.category_counts().get(2), 1);
    assert!(cat.get_by_index(1).is_none());
    assert!(cat.get_by_name("b.mp3").is_none());

    let mut cursor = cat.start_iterator();
    let mut seen = Vec::new();
    while let Some((dbidx, _)) = cat.iterate(&mut cursor) {
        seen.push(dbidx);
    }
    assert_eq!(seen, vec![0, 2]);

    assert!(cat.clear_removed(1));
    cat.check_invariants().unwrap();
    assert_eq!(cat.get_by_name("b.mp3").unwrap().dbidx, Some(1));
    assert_eq!(cat.category_counts().get(1), 2);
}

#[test]
fn removed_record_is_not_written() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(&path, &[("a.mp3", None)]);

    let mut cat = open(&path);
    let mut copy = cat.get_by_index(0).unwrap().clone();
    cat.mark_removed(0);
    copy.set_tag("TITLE", "ignored");
    assert_eq!(cat.write_song(&mut copy).unwrap(), None);
    cat.clear_removed(0);
    assert_eq!(cat.get_by_index(0).unwrap().tag("TITLE"), Some("a.mp3"));
}

#[test]
fn toggling_unknown_or_wrong_state_is_refused() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(&path, &[("a.mp3", None)]);

    let mut cat = open(&path);
    assert!(!cat.mark_removed(7));
    assert!(!cat.clear_removed(0));
    assert!(cat.mark_removed(0));
    assert!(!cat.mark_removed(0));
    cat.check_invariants().unwrap();
}

// ---------------------------------------------------------------------------
// Renames
// ---------------------------------------------------------------------------

#[test]
fn rename_swaps_name_and_keeps_dbidx() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(&path, &[("a.mp3", None), ("b.mp3", None)]);

    let mut cat = open(&path);
    cat.mark_renamed("a.mp3", "z.mp3", 0).unwrap();
    cat.check_invariants().unwrap();
    assert!(cat.get_by_name("a.mp3").is_none());
    assert_eq!(cat.get_by_name("z.mp3").unwrap().dbidx, Some(0));

    let mut r = cat.get_by_index(0).unwrap().clone();
    assert_eq!(r.name, "z.mp3");
    cat.write_song(&mut r).unwrap();
    cat.close().unwrap();

    let cat = open(&path);
    let names: Vec<_> = cat.iter().map(|(_, r)| r.name.clone()).collect();
    assert_eq!(names, vec!["b.mp3".to_owned(), "z.mp3".to_owned()]);
}

#[test]
fn rename_conflicts_change_nothing() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(&path, &[("a.mp3", None), ("b.mp3", None)]);

    let mut cat = open(&path);
    let err = cat.mark_renamed("a.mp3", "b.mp3", 0).unwrap_err();
    assert!(matches!(err, CatalogError::NameInUse { .. }));
    let err = cat.mark_renamed("x.mp3", "y.mp3", 0).unwrap_err();
    assert!(matches!(err, CatalogError::NameMismatch { .. }));
    cat.check_invariants().unwrap();
    assert_eq!(cat.get_by_name("a.mp3").unwrap().dbidx, Some(0));
}

#[test]
fn writing_resident_record_under_taken_name_fails() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(&path, &[("a.mp3", None), ("b.mp3", None)]);

    let mut cat = open(&path);
    let mut r = cat.get_by_index(0).unwrap().clone();
    r.name = "b.mp3".to_owned();
    let err = cat.write_song(&mut r).unwrap_err();
    assert!(matches!(err, CatalogError::NameInUse { .. }));
    cat.check_invariants().unwrap();
}

// ---------------------------------------------------------------------------
// Hard removal
// ---------------------------------------------------------------------------

#[test]
fn hard_remove_clears_slot_and_detaches() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(
        &path,
        &[("a.mp3", Some(1)), ("https://radio.example/live", Some(1)), ("c.mp3", None)],
    );

    let mut cat = open(&path);
    let dbidx = cat
        .get_by_name("https://radio.example/live")
        .unwrap()
        .dbidx
        .unwrap();
    let copy = cat.get_by_index(dbidx).unwrap().clone();
    cat.remove_song(dbidx).unwrap();
    cat.check_invariants().unwrap();

    assert!(cat.get_by_index(dbidx).is_none());
    assert!(cat.get_by_name("https://radio.example/live").is_none());
    assert_eq!(cat.category_counts().get(1), 1);
    assert_eq!(cat.count(), 3);
    assert!(!cat.clear_removed(dbidx));
    assert!(matches!(
        cat.remove_song(dbidx),
        Err(CatalogError::NoSuchIndex { .. })
    ));

    let mut stale = copy;
    assert_eq!(cat.write_song(&mut stale).unwrap(), None);
    cat.close().unwrap();

    assert_eq!(header_count(&path), 3);
    let cat = open(&path);
    assert_eq!(cat.count(), 2);
    assert!(cat.get_by_name("https://radio.example/live").is_none());
}

// ---------------------------------------------------------------------------
// Temporary records
// ---------------------------------------------------------------------------

#[test]
fn temporaries_use_offset_dbidx_and_are_never_persisted() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(
        &path,
        &[("1.mp3", None), ("2.mp3", None), ("3.mp3", None), ("4.mp3", None), ("5.mp3", None)],
    );

    let mut cat = open(&path);
    let first = cat.add_temporary_song(Record::new("/tmp/preview-1.mp3"));
    let second = cat.add_temporary_song(Record::new("/tmp/preview-2.mp3"));
    assert_eq!(first, 5 + TEMPORARY_DBIDX_OFFSET);
    assert_eq!(second, 5 + TEMPORARY_DBIDX_OFFSET + 1);
    cat.check_invariants().unwrap();

    let temp = cat.get_by_index(first).unwrap();
    assert_eq!(temp.status, RecordStatus::Temporary);
    assert!(cat.get_by_name("/tmp/preview-1.mp3").is_none());
    assert_eq!(cat.iter().count(), 5);

    let mut copy = temp.clone();
    assert_eq!(cat.write_song(&mut copy).unwrap(), None);
    assert_eq!(copy.rrn, NEW_RRN);
    cat.close().unwrap();

    assert_eq!(header_count(&path), 5);
    let cat = open(&path);
    assert_eq!(cat.count(), 5);
    assert_eq!(cat.temporary_count(), 0);
    assert!(cat.get_by_index(first).is_none());
}

// ---------------------------------------------------------------------------
// Load filtering
// ---------------------------------------------------------------------------

#[test]
fn records_with_missing_audio_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    fs::write(tmp.path().join("present.mp3"), b"ID3").unwrap();
    seed(
        &path,
        &[("present.mp3", None), ("gone.mp3", None), ("https://radio.example/a", None)],
    );

    // Default collaborators: local files under the catalog's directory and
    // a pid lock file next to it.
    let cat = Catalog::open(CatalogConfig::new(&path)).unwrap();
    let names: BTreeSet<_> = cat.iter().map(|(_, r)| r.name.clone()).collect();
    assert_eq!(
        names,
        ["https://radio.example/a", "present.mp3"]
            .into_iter()
            .map(str::to_owned)
            .collect()
    );
    cat.close().unwrap();
    let mut lock = PidLockFile::new(tmp.path(), "rafile");
    assert!(lock.try_acquire().unwrap());
}

#[test]
fn undecodable_slot_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(&path, &[("a.mp3", None)]);
    {
        let mut sf = SlotFile::open(
            &path,
            CATALOG_VERSION,
            OpenMode::ReadWrite,
            Box::new(NullMutex::new("rafile")),
        )
        .unwrap();
        sf.write(NEW_RRN, b"garbage without a file tag").unwrap();
        sf.close().unwrap();
    }

    let cat = open(&path);
    assert_eq!(cat.count(), 1);
    assert!(cat.get_by_name("a.mp3").is_some());
}

// ---------------------------------------------------------------------------
// Observer reload
// ---------------------------------------------------------------------------

#[test]
fn observer_reloads_single_entry() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(&path, &[("a.mp3", Some(1)), ("b.mp3", Some(1))]);

    let mut writer = open(&path);
    let mut observer = open(&path);

    let mut r = writer.get_by_name("b.mp3").unwrap().clone();
    r.set_tag("TITLE", "Updated elsewhere");
    r.category = Some(2);
    writer.write_song(&mut r).unwrap();
    writer.close().unwrap();

    assert_eq!(observer.get_by_index(1).unwrap().tag("TITLE"), Some("b.mp3"));
    assert!(observer.load_entry(1).unwrap());
    let reloaded = observer.get_by_index(1).unwrap();
    assert_eq!(reloaded.tag("TITLE"), Some("Updated elsewhere"));
    assert_eq!(reloaded.dbidx, Some(1));
    assert_eq!(observer.category_counts().get(2), 1);
    observer.check_invariants().unwrap();

    assert!(matches!(
        observer.load_entry(9),
        Err(CatalogError::NoSuchIndex { dbidx: 9 })
    ));
}

#[test]
fn reload_is_skipped_when_audio_is_gone() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    fs::write(tmp.path().join("a.mp3"), b"ID3").unwrap();
    seed(&path, &[("a.mp3", Some(1))]);

    // Default source: local files next to the catalog.
    let mut observer = Catalog::builder(CatalogConfig::new(&path))
        .mutex_factory(|| Box::new(NullMutex::new("rafile")))
        .open()
        .unwrap();
    assert_eq!(observer.count(), 1);

    let mut writer = open(&path);
    let mut r = writer.get_by_index(0).unwrap().clone();
    r.set_tag("TITLE", "Updated elsewhere");
    writer.write_song(&mut r).unwrap();
    writer.close().unwrap();
    fs::remove_file(tmp.path().join("a.mp3")).unwrap();

    assert!(!observer.load_entry(0).unwrap());
    assert_eq!(observer.get_by_index(0).unwrap().tag("TITLE"), Some("a.mp3"));
    observer.check_invariants().unwrap();
}

#[test]
fn catalogs_sharing_a_file_append_to_distinct_slots() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    let open_locked = || {
        Catalog::builder(CatalogConfig::new(&path))
            .source(AnySource)
            .open()
            .unwrap()
    };
    let mut a = open_locked();
    let mut b = open_locked();

    let mut ra = Record::new("a.mp3");
    let mut rb = Record::new("b.mp3");
    assert_eq!(a.write_song(&mut ra).unwrap(), Some(1));
    assert_eq!(b.write_song(&mut rb).unwrap(), Some(2));
    let mut rc = Record::new("c.mp3");
    assert_eq!(a.write_song(&mut rc).unwrap(), Some(3));
    a.close().unwrap();
    b.close().unwrap();

    let cat = open(&path);
    let names: Vec<_> = cat.iter().map(|(_, r)| r.name.clone()).collect();
    assert_eq!(names, ["a.mp3", "b.mp3", "c.mp3"]);
    cat.check_invariants().unwrap();
}

#[test]
fn reload_keeps_soft_removed_status() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(&path, &[("a.mp3", None)]);

    let mut cat = open(&path);
    cat.mark_removed(0);
    assert!(cat.load_entry(0).unwrap());
    assert!(cat.get_by_index(0).is_none());
    cat.check_invariants().unwrap();
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

#[test]
fn backup_copies_current_file() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(&path, &[("a.mp3", None)]);

    let mut cat = open(&path);
    let newest = cat.backup(2).unwrap().unwrap();
    assert_eq!(newest, backup::backup_path(&path, 1));
    assert_eq!(fs::read(&newest).unwrap(), fs::read(&path).unwrap());

    let mut r = Record::new("b.mp3");
    cat.write_song(&mut r).unwrap();
    cat.backup(2).unwrap();
    assert_eq!(
        fs::read(backup::backup_path(&path, 1)).unwrap(),
        fs::read(&path).unwrap()
    );
    assert!(backup::backup_path(&path, 2).exists());
}

#[test]
fn rebuild_writes_live_records_densely() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(
        &path,
        &[
            ("a.mp3", Some(1)),
            ("b.mp3", Some(1)),
            ("https://radio.example/c", Some(2)),
            ("d.mp3", Some(2)),
        ],
    );

    let mut cat = open(&path);
    cat.mark_removed(1);
    cat.remove_song(2).unwrap();
    let before: Vec<_> = cat.iter().map(|(_, r)| r.clone()).collect();

    let dest = tmp.path().join("compact.dat");
    assert_eq!(cat.rebuild_into(&dest).unwrap(), 2);
    assert!(matches!(
        cat.rebuild_into(&dest),
        Err(CatalogError::TargetExists(_))
    ));

    assert_eq!(header_count(&dest), 2);
    let rebuilt = open(&dest);
    let after: Vec<_> = rebuilt.iter().map(|(_, r)| r.clone()).collect();
    assert_eq!(after.len(), 2);
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.name, new.name);
        assert_eq!(old.last_updated, new.last_updated);
        assert_eq!(old.category, new.category);
    }
    assert_eq!(after.iter().map(|r| r.rrn).collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn records_serialize_for_dumps() {
    let tmp = TempDir::new().unwrap();
    let path = db_path(&tmp);
    seed(&path, &[("a.mp3", Some(4))]);

    let cat = open(&path);
    let json = serde_json::to_string(cat.get_by_index(0).unwrap()).unwrap();
    let back: Record = serde_json::from_str(&json).unwrap();
    assert_eq!(&back, cat.get_by_index(0).unwrap());
    assert!(json.contains("\"name\":\"a.mp3\""));
}

// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------

fn tag_text() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 ./'-]{1,24}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn codec_preserves_catalog_fields(
        name in "[A-Za-z0-9/ _-]{1,40}\\.(mp3|flac|ogg)",
        category in proptest::option::of(0u32..64),
        last_updated in 0u64..4_000_000_000,
        title in tag_text(),
        rrn in 1u32..10_000,
    ) {
        let mut record = Record::new(name).with_tag("TITLE", &title);
        record.category = category;
        record.last_updated = last_updated;
        record.rrn = rrn;

        let decoded = TagCodec.decode(&TagCodec.encode(&record), rrn).unwrap();
        prop_assert_eq!(decoded, record);
    }

    #[test]
    fn load_assigns_dbidx_in_name_order(
        names in prop::collection::btree_set("[a-z]{1,8}\\.mp3", 1..12),
    ) {
        let tmp = TempDir::new().unwrap();
        let path = db_path(&tmp);
        let mut shuffled: Vec<_> = names.iter().map(String::as_str).collect();
        shuffled.reverse();
        let entries: Vec<_> = shuffled.iter().map(|n| (*n, None)).collect();
        seed(&path, &entries);

        let cat = open(&path);
        cat.check_invariants().unwrap();
        for (expected, name) in names.iter().enumerate() {
            let r = cat.get_by_name(name).unwrap();
            prop_assert_eq!(r.dbidx, Some(expected as u32));
        }
    }
}
