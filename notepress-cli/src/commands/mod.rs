//! CLI command implementations.

pub mod deploy;
pub mod image;
pub mod init;
pub mod list;
pub mod preview;
pub mod publish;
pub mod tags;

pub use deploy::deploy_site;
pub use image::add_image;
pub use init::init_config;
pub use list::{list_published, show_status};
pub use preview::preview;
pub use publish::{publish, republish, unpublish, RunOptions};
pub use tags::{learn_tags, show_tags};

use anyhow::{Context, Result};
use notepress_core::{Config, Publisher};
use std::path::Path;

/// Load and validate the config, then open the tag map and ledger.
pub(crate) fn load_publisher(config_path: &Path) -> Result<Publisher> {
    let config = load_config(config_path)?;
    Publisher::open(config).context("Failed to open publish state")
}

pub(crate) fn load_config(config_path: &Path) -> Result<Config> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
