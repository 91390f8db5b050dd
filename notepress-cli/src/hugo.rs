//! Thin wrapper around the `hugo` binary.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::process::Command;

pub struct Hugo {
    binary: String,
}

impl Hugo {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// `hugo version` output, failing when the binary cannot be run.
    pub async fn ensure_available(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("version")
            .output()
            .await
            .with_context(|| format!("`{}` not found; install Hugo or set hugo.binary", self.binary))?;
        if !output.status.success() {
            bail!("`{} version` exited with {:?}", self.binary, output.status.code());
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(%version, "hugo available");
        Ok(version)
    }

    /// Build the site into `destination`.
    pub async fn build(&self, site: &Path, destination: &Path, minify: bool) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(site).arg("--destination").arg(destination);
        if minify {
            cmd.arg("--minify");
        }
        tracing::info!(site = %site.display(), "building site");
        let status = cmd
            .status()
            .await
            .with_context(|| format!("Failed to run {}", self.binary))?;
        if !status.success() {
            bail!("hugo build failed with exit {:?}", status.code());
        }
        Ok(())
    }

    /// Run the development server until it exits.
    pub async fn serve(&self, site: &Path) -> Result<()> {
        let status = Command::new(&self.binary)
            .current_dir(site)
            .args(["server", "--buildDrafts", "--buildFuture"])
            .status()
            .await
            .with_context(|| format!("Failed to run {}", self.binary))?;
        if !status.success() {
            bail!("hugo server exited with {:?}", status.code());
        }
        Ok(())
    }
}
