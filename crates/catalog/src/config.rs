//! Catalog constants and open-time configuration.

use std::path::{Path, PathBuf};

use slotfile::LockPolicy;

/// Format version written into new catalog files.
pub const CATALOG_VERSION: u32 = 10;

/// File name used when only a data directory is known.
pub const DEFAULT_FILE_NAME: &str = "musicdb.dat";

/// Logical lock name shared by every process touching the catalog.
pub const DEFAULT_LOCK_NAME: &str = "rafile";

/// Temporary dbidx values start this far above the standard range.
pub const TEMPORARY_DBIDX_OFFSET: u32 = 1_000_000;

/// Number of `.bak.N` generations kept by [`crate::Catalog::backup`].
pub const BACKUP_DEPTH: u32 = 4;

/// Prefix given to local files queued for deletion by the reorganizer.
pub const DELETE_PREFIX: &str = "delete-";

/// Environment variable naming the catalog file.
pub const ENV_CATALOG_PATH: &str = "CATALOG_PATH";
/// Environment variable naming the music directory.
pub const ENV_MUSIC_PATH: &str = "MUSIC_PATH";
/// Environment variable naming the lock directory.
pub const ENV_LOCK_DIR: &str = "CATALOG_LOCK_DIR";

/// Name a local file gets when it is queued for deletion: the file-name
/// component gains [`DELETE_PREFIX`], the directory part is kept.
///
/// ```
/// assert_eq!(catalog::deleted_name("Artist/01.mp3"), "Artist/delete-01.mp3");
/// assert_eq!(catalog::deleted_name("01.mp3"), "delete-01.mp3");
/// ```
pub fn deleted_name(name: &str) -> String {
    match name.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/{DELETE_PREFIX}{file}"),
        None => format!("{DELETE_PREFIX}{name}"),
    }
}

/// Everything [`crate::Catalog::open`] needs to know.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Catalog data file.
    pub path: PathBuf,
    /// Version expected in (and written to) the header.
    pub version: u32,
    /// Directory holding the lock file.
    pub lock_dir: PathBuf,
    /// Logical lock name.
    pub lock_name: String,
    /// Lock retry behaviour.
    pub lock_policy: LockPolicy,
    /// Root that relative record names resolve against.
    pub music_dir: PathBuf,
}

impl CatalogConfig {
    /// Defaults for a catalog stored at `path`. The lock directory and the
    /// music directory default to the file's parent directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let parent = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            path,
            version: CATALOG_VERSION,
            lock_dir: parent.clone(),
            lock_name: DEFAULT_LOCK_NAME.to_owned(),
            lock_policy: LockPolicy::default(),
            music_dir: parent,
        }
    }

    /// Build from `CATALOG_PATH`, `MUSIC_PATH` and `CATALOG_LOCK_DIR`.
    ///
    /// Returns `None` if `CATALOG_PATH` is not set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`CatalogConfig::from_env`] with a caller-supplied lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let mut config = Self::new(lookup(ENV_CATALOG_PATH)?);
        if let Some(music) = lookup(ENV_MUSIC_PATH) {
            config.music_dir = PathBuf::from(music);
        }
        if let Some(lock_dir) = lookup(ENV_LOCK_DIR) {
            config.lock_dir = PathBuf::from(lock_dir);
        }
        Some(config)
    }

    /// Set the expected version.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Set the lock directory.
    #[must_use]
    pub fn with_lock_dir(mut self, lock_dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = lock_dir.into();
        self
    }

    /// Set the logical lock name.
    #[must_use]
    pub fn with_lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = name.into();
        self
    }

    /// Set the lock retry policy.
    #[must_use]
    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    /// Set the music directory.
    #[must_use]
    pub fn with_music_dir(mut self, music_dir: impl Into<PathBuf>) -> Self {
        self.music_dir = music_dir.into();
        self
    }
}
