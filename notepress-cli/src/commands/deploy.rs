//! Commit the site sources, build with Hugo and push the generated pages.

use anyhow::{Context, Result};
use chrono::Local;
use notepress_core::Config;
use std::fs;
use std::path::Path;

use crate::commands::load_config;
use crate::git::GitRepo;
use crate::hugo::Hugo;

const GITIGNORE_ENTRIES: &[&str] = &["public/", "resources/", ".DS_Store"];

pub async fn deploy_site(config_path: &Path, message: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    run(&config, message).await
}

pub async fn run(config: &Config, message: Option<&str>) -> Result<()> {
    let message = message
        .map(str::to_string)
        .unwrap_or_else(|| format!("Update blog {}", Local::now().format("%Y-%m-%d %H:%M:%S")));
    let site = config.site_dir();

    ensure_gitignore(&site)?;

    match &config.repositories.source {
        Some(source) => {
            let repo = GitRepo::new(&site);
            repo.ensure_init(&source.branch).await?;
            repo.set_remote("origin", &source.url).await?;
            repo.checkout(&source.branch).await?;
            repo.pull(&source.branch).await;
            repo.untrack("public").await;
            repo.add_all().await?;
            if repo.commit(&message, false).await? {
                println!("Committed site sources: {}", message);
            } else {
                println!("Site sources unchanged");
            }
            repo.push(&source.branch)
                .await
                .context("Failed to push site sources")?;
        }
        None => tracing::warn!("repositories.source not configured; site sources are not pushed"),
    }

    let hugo = Hugo::new(config.hugo.binary.clone());
    hugo.ensure_available().await?;
    let public = config.public_dir();
    hugo.build(&site, &public, config.hugo.minify).await?;

    match &config.repositories.pages {
        Some(pages) => {
            let repo = GitRepo::new(&public);
            repo.ensure_init(&pages.branch).await?;
            repo.set_remote("origin", &pages.url).await?;
            repo.add_all().await?;
            repo.commit(&format!("Deploy website: {}", message), true).await?;
            repo.force_push(&pages.branch)
                .await
                .context("Failed to push generated pages")?;
            println!("✓ Deployed {:?} to {} ({})", public, pages.url, pages.branch);
        }
        None => tracing::warn!("repositories.pages not configured; built site left in {:?}", public),
    }
    Ok(())
}

/// Make sure build output never ends up in the source repository.
fn ensure_gitignore(site: &Path) -> Result<()> {
    let path = site.join(".gitignore");
    let existing = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
    };

    let missing: Vec<&str> = GITIGNORE_ENTRIES
        .iter()
        .copied()
        .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    for entry in missing {
        updated.push_str(entry);
        updated.push('\n');
    }
    fs::write(&path, updated).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}
