//! Audio source existence checks.
//!
//! The catalog drops records whose audio has disappeared when it loads.
//! Only local files are checked; URIs (`scheme://...`) are assumed present so
//! a load never waits on the network.

use std::path::{Path, PathBuf};

use crate::record::Record;

/// Answers whether a record's audio still exists.
pub trait AudioSource: Send {
    /// `true` if the audio behind `record` is still available.
    fn exists(&self, record: &Record) -> bool;
}

/// Resolves relative names against a music directory on the local disk.
#[derive(Debug, Clone)]
pub struct LocalAudioSource {
    music_dir: PathBuf,
}

impl LocalAudioSource {
    /// Source rooted at `music_dir`.
    pub fn new(music_dir: impl Into<PathBuf>) -> Self {
        Self {
            music_dir: music_dir.into(),
        }
    }

    /// Full path of a local record's file.
    pub fn full_path(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.music_dir.join(path)
        }
    }
}

impl AudioSource for LocalAudioSource {
    fn exists(&self, record: &Record) -> bool {
        if !record.is_local() {
            return true;
        }
        self.full_path(&record.name).is_file()
    }
}

/// Treats every record as present.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnySource;

impl AudioSource for AnySource {
    fn exists(&self, _record: &Record) -> bool {
        true
    }
}
