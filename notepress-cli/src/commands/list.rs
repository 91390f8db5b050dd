//! Ledger listing and candidate status.

use anyhow::Result;
use notepress_core::{sort_candidates, CandidateOrder, PublishRecord};
use std::path::Path;

use crate::commands::load_publisher;

pub fn list_published(config_path: &Path, json: bool) -> Result<()> {
    let publisher = load_publisher(config_path)?;
    let records: Vec<&PublishRecord> = publisher.tracker().list_published().collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No published notes");
        return Ok(());
    }
    for record in &records {
        println!(
            "{} -> {} (first {}, last {})",
            record.source,
            record.target.display(),
            record.first_published.format("%Y-%m-%d"),
            record.emitted_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} published note(s)", records.len());
    Ok(())
}

pub fn show_status(config_path: &Path, order: CandidateOrder, json: bool) -> Result<()> {
    let publisher = load_publisher(config_path)?;
    let mut candidates = publisher.candidates()?;
    sort_candidates(&mut candidates, order);

    if json {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
        return Ok(());
    }

    for c in &candidates {
        println!(
            "[{}] {}{} ({}, modified {})",
            if c.tracked { "x" } else { " " },
            c.title,
            if c.draft { " (draft)" } else { "" },
            c.source,
            c.modified.format("%Y-%m-%d %H:%M")
        );
    }
    let tracked = candidates.iter().filter(|c| c.tracked).count();
    println!(
        "\n{} note(s) flagged for publishing, {} published",
        candidates.len(),
        tracked
    );
    Ok(())
}
