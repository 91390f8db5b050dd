//! Adding images to posts that are already published.

use anyhow::{Context, Result};
use std::path::Path;

use crate::commands::load_publisher;

pub fn add_image(config_path: &Path, post: &str, image: &Path, alt: &str, dry_run: bool) -> Result<()> {
    let mut publisher = load_publisher(config_path)?;
    let attached = publisher
        .attach_image(post, image, alt, dry_run)
        .with_context(|| format!("Failed to add {:?} to {}", image, post))?;

    if dry_run {
        println!(
            "Would copy {:?} to {:?} and insert {}",
            image, attached.image, attached.markdown
        );
        return Ok(());
    }
    if attached.written {
        println!("Copied {:?} to {:?}", image, attached.image);
    } else {
        println!("{:?} already in place", attached.image);
    }
    println!("Inserted {} at the top of {:?}", attached.markdown, attached.post);
    Ok(())
}
