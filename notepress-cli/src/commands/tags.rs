//! Tag map maintenance.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

use crate::commands::load_publisher;

pub fn learn_tags(config_path: &Path, dry_run: bool) -> Result<()> {
    let mut publisher = load_publisher(config_path)?;
    let learned = publisher.learn_tags()?;

    if learned == 0 {
        println!("No new tags to learn");
        return Ok(());
    }
    if dry_run {
        println!("Would learn {} tag(s) (dry run, map not saved)", learned);
        return Ok(());
    }
    publisher.save_tag_map()?;
    println!(
        "Learned {} tag(s); map saved to {:?}",
        learned,
        publisher.config().tag_map_path()
    );
    Ok(())
}

pub fn show_tags(config_path: &Path, json: bool) -> Result<()> {
    let publisher = load_publisher(config_path)?;
    let map = publisher.tag_map();

    if json {
        let entries: BTreeMap<&str, &[String]> = map.iter().collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for (tag, categories) in map.iter() {
        println!("{}: {}", tag, categories.join(", "));
    }
    println!("\n{} tag(s)", map.len());
    Ok(())
}
