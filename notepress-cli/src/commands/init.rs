//! Init command implementation.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

const DEFAULT_CONFIG: &str = include_str!("../../notepress.yml.example");

/// Write an example notepress.yml into `path`
pub fn init_config(path: Option<&Path>, force: bool) -> Result<()> {
    let root = path.unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(root).with_context(|| format!("Failed to create {:?}", root))?;

    let config_path = root.join("notepress.yml");
    if config_path.exists() && !force {
        println!("notepress.yml already exists at {:?} (use --force to overwrite)", config_path);
        return Ok(());
    }

    fs::write(&config_path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {:?}", config_path))?;
    println!("Created {:?}", config_path);
    println!("  - Set paths.vault and paths.site to your notes and Hugo site");
    println!("  - Mark notes with `publish: true` and run `notepress publish`");
    Ok(())
}
