//! Local preview through the Hugo development server.

use anyhow::Result;
use std::path::Path;

use crate::commands::load_config;
use crate::hugo::Hugo;

pub async fn preview(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let hugo = Hugo::new(config.hugo.binary.clone());
    let version = hugo.ensure_available().await?;
    println!("Using {}", version);
    println!("Serving {:?} with drafts and future posts (Ctrl+C to stop)", config.site_dir());
    hugo.serve(&config.site_dir()).await
}
