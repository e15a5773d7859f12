//! xtask db-import: walk a music folder and add new records to a catalog.
//!
//! Metadata is inferred from folder structure: `{Artist}/{Album}/{NN} - {Title}.{ext}`
//! No tag parsing; records already in the catalog are left alone.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use catalog::{Catalog, CatalogConfig, Record};
use colored::Colorize;
use tracing::debug;
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["flac", "mp3", "wav", "aiff", "ogg", "opus", "m4a"];

/// Entry point called from main.rs
pub fn run(config: CatalogConfig, keep_timestamps: bool) -> Result<()> {
    println!();
    println!(
        "{}",
        format!("🎵 Importing from {}...", config.music_dir.display()).cyan().bold()
    );
    let start = Instant::now();
    let path = config.path.clone();
    let imported = run_import(config, keep_timestamps)?;
    println!(
        "{}",
        format!(
            "  ✓ {imported} new records written to {} in {:.2}s",
            path.display(),
            start.elapsed().as_secs_f64()
        )
        .green()
    );
    Ok(())
}

/// Add every audio file under `config.music_dir` that the catalog does not
/// know yet, in one batch. Returns the number of records written.
pub(crate) fn run_import(config: CatalogConfig, keep_timestamps: bool) -> Result<usize> {
    let music_dir = config.music_dir.clone();
    let files = scan_audio_files(&music_dir)?;
    println!("  Found {} audio files", files.len());

    let mut cat = Catalog::open(config).context("Failed to open catalog")?;
    if keep_timestamps {
        cat.disable_last_update_time();
    }

    cat.start_batch()?;
    let mut imported = 0usize;
    for file in &files {
        let mut record = infer_record_from_path(&music_dir, file)?;
        if cat.get_by_name(&record.name).is_some() {
            debug!(name = %record.name, "already catalogued");
            continue;
        }
        if cat.write_song(&mut record)?.is_some() {
            imported = imported.saturating_add(1);
        }
    }
    cat.end_batch()?;
    cat.close()?;
    Ok(imported)
}

/// Recursively collect all audio file paths under `dir`.
pub(crate) fn scan_audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
                files.push(entry.into_path());
            }
        }
    }
    Ok(files)
}

/// Build a `Record` for `path`, named relative to `music_dir`.
///
/// Expected structure: `{Artist}/{Album}/{NN} - {Title}.{ext}`
/// or fallback to filename as title with no artist/album tags.
pub(crate) fn infer_record_from_path(music_dir: &Path, path: &Path) -> Result<Record> {
    let relative = path.strip_prefix(music_dir).unwrap_or(path);
    let components: Vec<&str> = relative.iter().filter_map(|c| c.to_str()).collect();
    let name = components.join("/");
    if name.is_empty() {
        anyhow::bail!("cannot name {}", path.display());
    }

    let n = components.len();
    let artist = n.checked_sub(3).and_then(|i| components.get(i)).copied();
    let album = n.checked_sub(2).and_then(|i| components.get(i)).copied();
    let filename = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let (track_number, title) = parse_filename(filename);

    let mut record = Record::new(name).with_tag("TITLE", title);
    if let Some(artist) = artist {
        record.set_tag("ARTIST", artist);
    }
    if let Some(album) = album {
        record.set_tag("ALBUM", album);
    }
    if track_number > 0 {
        record.set_tag("TRACKNUMBER", &track_number.to_string());
    }
    Ok(record)
}

/// Parse `"02 - Track Title"` → `(2, "Track Title")`.
/// Returns `(0, filename)` if no leading number found.
fn parse_filename(filename: &str) -> (u16, &str) {
    let digits = filename
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(filename.len());
    if digits == 0 {
        return (0, filename);
    }
    // Every byte before `digits` is an ASCII digit, so it is a char boundary.
    let (num, rest) = filename.split_at(digits);
    let num: u16 = num.parse().unwrap_or(0);
    (num, rest.trim_start_matches([' ', '-', '.']))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_fake_library(dir: &Path) {
        let artist_dir = dir.join("Amon Tobin").join("Foley Room");
        fs::create_dir_all(&artist_dir).unwrap();
        fs::write(artist_dir.join("01 - Foley Room Remix.flac"), b"FAKE").unwrap();
        fs::write(artist_dir.join("02 - Kitchen Sink.flac"), b"FAKE").unwrap();
        fs::write(artist_dir.join("cover.jpg"), b"FAKE").unwrap();

        let b = dir.join("Portishead").join("Dummy");
        fs::create_dir_all(&b).unwrap();
        fs::write(b.join("01 - Mysterons.flac"), b"FAKE").unwrap();
    }

    fn config_for(tmp: &TempDir) -> CatalogConfig {
        let music = tmp.path().join("music");
        fs::create_dir_all(&music).unwrap();
        create_fake_library(&music);
        CatalogConfig::new(tmp.path().join("musicdb.dat")).with_music_dir(music)
    }

    #[test]
    fn scan_finds_all_audio_files() {
        let tmp = TempDir::new().unwrap();
        create_fake_library(tmp.path());
        let entries = scan_audio_files(tmp.path()).unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn infer_record_parses_track_num_from_filename() {
        let path = Path::new("/music/Amon Tobin/Foley Room/02 - Kitchen Sink.flac");
        let r = infer_record_from_path(Path::new("/music"), path).unwrap();
        assert_eq!(r.name, "Amon Tobin/Foley Room/02 - Kitchen Sink.flac");
        assert_eq!(r.tag("TRACKNUMBER"), Some("2"));
        assert_eq!(r.tag("TITLE"), Some("Kitchen Sink"));
        assert_eq!(r.tag("ARTIST"), Some("Amon Tobin"));
        assert_eq!(r.tag("ALBUM"), Some("Foley Room"));
    }

    #[test]
    fn infer_record_handles_no_track_number() {
        let path = Path::new("/music/Artist/Album/song.mp3");
        let r = infer_record_from_path(Path::new("/music"), path).unwrap();
        assert_eq!(r.tag("TRACKNUMBER"), None);
        assert_eq!(r.tag("TITLE"), Some("song"));
    }

    #[test]
    fn infer_record_at_music_root_has_no_artist() {
        let r = infer_record_from_path(Path::new("/music"), Path::new("/music/loose.ogg")).unwrap();
        assert_eq!(r.name, "loose.ogg");
        assert_eq!(r.tag("ARTIST"), None);
        assert_eq!(r.tag("ALBUM"), None);
    }

    #[test]
    fn import_writes_each_file_once() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(&tmp);

        assert_eq!(run_import(config.clone(), false).unwrap(), 3);
        assert_eq!(run_import(config.clone(), false).unwrap(), 0);

        let cat = Catalog::open(config).unwrap();
        assert_eq!(cat.count(), 3);
        assert_eq!(
            cat.get_by_index(0).unwrap().name,
            "Amon Tobin/Foley Room/01 - Foley Room Remix.flac"
        );
    }

    #[test]
    fn import_can_keep_timestamps_untouched() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(&tmp);
        run_import(config.clone(), true).unwrap();

        let cat = Catalog::open(config).unwrap();
        let (_, r) = cat.iter().next().unwrap();
        assert_eq!(r.last_updated, 0);
        assert!(r.date_added.is_some());
    }
}
