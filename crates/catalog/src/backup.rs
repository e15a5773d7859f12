//! Rotating `.bak.N` copies of the catalog file.
//!
//! ```text
//! musicdb.dat.bak.3 -> (dropped when depth = 3)
//! musicdb.dat.bak.2 -> musicdb.dat.bak.3
//! musicdb.dat.bak.1 -> musicdb.dat.bak.2
//! musicdb.dat       -> musicdb.dat.bak.1 (copy)
//! ```

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Path of backup generation `generation` for `path`.
pub fn backup_path(path: &Path, generation: u32) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".bak.{generation}"));
    PathBuf::from(name)
}

/// Rotate existing backups and copy `path` to generation 1, keeping at most
/// `depth` generations. Returns the new `.bak.1` path, or `None` when
/// `depth` is zero or `path` does not exist.
///
/// # Errors
///
/// Returns the underlying I/O error if a rename or the copy fails.
pub fn rotate(path: &Path, depth: u32) -> io::Result<Option<PathBuf>> {
    if depth == 0 || !path.is_file() {
        return Ok(None);
    }
    let mut generation = depth;
    while generation > 1 {
        let older = generation.saturating_sub(1);
        let from = backup_path(path, older);
        if from.exists() {
            let to = backup_path(path, generation);
            debug!(from = %from.display(), to = %to.display(), "rotating backup");
            fs::rename(&from, &to)?;
        }
        generation = older;
    }
    let first = backup_path(path, 1);
    fs::copy(path, &first)?;
    Ok(Some(first))
}
