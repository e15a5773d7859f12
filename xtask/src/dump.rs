//! xtask db-dump: one JSON object per live record.

use std::io::{self, Write};

use anyhow::{Context, Result};
use catalog::{AnySource, Catalog, CatalogConfig};

pub fn run(config: CatalogConfig) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let written = dump(config, &mut out)?;
    out.flush()?;
    tracing::info!(records = written, "dump complete");
    Ok(())
}

/// Write every live record of the catalog as JSON lines to `out`.
pub(crate) fn dump(config: CatalogConfig, out: &mut impl Write) -> Result<usize> {
    let cat = Catalog::builder(config)
        .source(AnySource)
        .open()
        .context("Failed to load catalog")?;
    let mut written = 0usize;
    for (_, record) in cat.iter() {
        serde_json::to_writer(&mut *out, record)?;
        out.write_all(b"\n")?;
        written = written.saturating_add(1);
    }
    cat.close()?;
    Ok(written)
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
    use catalog::Record;
    use tempfile::TempDir;

    #[test]
    fn dumps_live_records_in_dbidx_order() {
        let tmp = TempDir::new().unwrap();
        let config = CatalogConfig::new(tmp.path().join("musicdb.dat"));
        {
            let mut cat = Catalog::builder(config.clone()).source(AnySource).open().unwrap();
            for name in ["b.mp3", "a.mp3"] {
                let mut r = Record::new(name).with_tag("TITLE", name);
                cat.write_song(&mut r).unwrap();
            }
            cat.close().unwrap();
        }

        let mut buf = Vec::new();
        assert_eq!(dump(config, &mut buf).unwrap(), 2);
        let text = String::from_utf8(buf).unwrap();
        let records: Vec<Record> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records[0].name, "a.mp3");
        assert_eq!(records[0].dbidx, Some(0));
        assert_eq!(records[1].name, "b.mp3");
    }
}
