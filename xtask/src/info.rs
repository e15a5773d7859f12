//! xtask db-info: header fields, record counts and a checksum.

use std::fs;

use anyhow::{Context, Result};
use catalog::{AnySource, Catalog, CatalogConfig};
use colored::Colorize;
use slotfile::{OpenMode, PidLockFile, SlotFile};

/// What `db-info` reports about one catalog file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DbInfo {
    pub version: u32,
    pub record_size: u32,
    pub slots: u32,
    pub live: u32,
    pub categories: Vec<(u32, u32)>,
    pub crc32: u32,
}

pub fn run(config: CatalogConfig) -> Result<()> {
    let info = collect(config.clone())?;

    println!();
    println!("{}", format!("📀 {}", config.path.display()).cyan().bold());
    println!("  version      {}", info.version);
    println!("  record size  {}", info.record_size);
    println!("  slots        {}", info.slots);
    println!("  live records {}", info.live.to_string().green());
    let empty = info.slots.saturating_sub(info.live);
    if empty > 0 {
        println!("  empty/stale  {}", empty.to_string().yellow());
    }
    println!("  crc32        {:08x}", info.crc32);
    if !info.categories.is_empty() {
        println!("  categories");
        for (key, count) in &info.categories {
            println!("    {key:>5}  {count}");
        }
    }
    println!();
    Ok(())
}

/// Read the header directly, then load the catalog without audio checks.
pub(crate) fn collect(config: CatalogConfig) -> Result<DbInfo> {
    if !config.path.is_file() {
        anyhow::bail!("{} does not exist", config.path.display());
    }
    let slot = SlotFile::open_with_policy(
        &config.path,
        config.version,
        OpenMode::ReadOnly,
        Box::new(PidLockFile::new(&config.lock_dir, &config.lock_name)),
        config.lock_policy,
    )
    .context("Failed to read slot file header")?;
    let (version, record_size, slots) = (slot.version(), slot.record_size(), slot.count());
    slot.close()?;

    let bytes = fs::read(&config.path)?;
    let crc32 = crc32fast::hash(&bytes);

    let cat = Catalog::builder(config)
        .source(AnySource)
        .open()
        .context("Failed to load catalog")?;
    let live = u32::try_from(cat.iter().count()).unwrap_or(u32::MAX);
    let categories = cat.category_counts().iter().collect();
    cat.close()?;

    Ok(DbInfo {
        version,
        record_size,
        slots,
        live,
        categories,
        crc32,
    })
}
