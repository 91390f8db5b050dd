//! Publish, unpublish and republish commands.

use anyhow::{bail, Result};
use notepress_core::{BatchResult, PublishOptions, Publisher, UnpublishOptions};
use std::path::Path;

use crate::commands::{deploy, load_publisher};
use crate::report;

/// Flags shared by the commands that change the content tree.
pub struct RunOptions {
    pub draft: bool,
    pub dry_run: bool,
    pub jobs: Option<usize>,
    pub deploy: bool,
    pub message: Option<String>,
}

impl RunOptions {
    fn publish_options(&self, publisher: &Publisher) -> PublishOptions {
        PublishOptions {
            draft: self.draft,
            dry_run: self.dry_run,
            jobs: self.jobs.unwrap_or(publisher.config().jobs).max(1),
        }
    }
}

pub async fn publish(config_path: &Path, files: &[String], opts: RunOptions) -> Result<()> {
    let mut publisher = load_publisher(config_path)?;
    let selection = if files.is_empty() {
        publisher.discover()?
    } else {
        publisher.select(files)?
    };

    let result = publisher.process(&selection, &opts.publish_options(&publisher))?;
    finish(&publisher, result, &opts).await
}

pub async fn unpublish(
    config_path: &Path,
    files: &[String],
    all: bool,
    clear_flag: bool,
    opts: RunOptions,
) -> Result<()> {
    if files.is_empty() && !all {
        bail!("Name the notes to unpublish, or pass --all");
    }

    let mut publisher = load_publisher(config_path)?;
    let selection = (!all).then_some(files);
    let result = publisher.unpublish(
        selection,
        &UnpublishOptions {
            clear_flag,
            dry_run: opts.dry_run,
        },
    )?;
    finish(&publisher, result, &opts).await
}

pub async fn republish(config_path: &Path, files: &[String], opts: RunOptions) -> Result<()> {
    let mut publisher = load_publisher(config_path)?;
    let selection = (!files.is_empty()).then_some(files);
    let options = opts.publish_options(&publisher);
    let result = publisher.republish(selection, &options)?;
    finish(&publisher, result, &opts).await
}

/// Print the report, deploy if asked, and turn failed notes into a non-zero exit.
async fn finish(publisher: &Publisher, result: BatchResult, opts: &RunOptions) -> Result<()> {
    print!("{}", report::render(&result));

    if opts.deploy {
        if opts.dry_run {
            println!("Dry run: skipping deploy");
        } else if result.touched_site() {
            deploy::run(publisher.config(), opts.message.as_deref()).await?;
        } else {
            println!("Nothing changed; skipping deploy");
        }
    }

    if !result.failed.is_empty() {
        bail!("{} of {} note(s) failed", result.failed.len(), result.total());
    }
    Ok(())
}
