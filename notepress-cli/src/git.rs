use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tokio::process::Command;
use tracing::{info, warn};

/// A git checkout the deploy flow commits to and pushes from.
#[derive(Debug, Clone)]
pub struct GitRepo {
    workdir: PathBuf,
}

impl GitRepo {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn is_repo(&self) -> bool {
        self.workdir.join(".git").exists()
    }

    /// Initialize the repository on `branch` unless it already exists.
    pub async fn ensure_init(&self, branch: &str) -> Result<()> {
        if self.is_repo() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.workdir)
            .await
            .with_context(|| format!("create repo dir {:?}", self.workdir))?;
        info!(dir = %self.workdir.display(), branch, "initializing git repository");
        self.git(["init"]).await?;
        self.git(["checkout", "-b", branch]).await
    }

    /// Point `name` at `url`, adding the remote when missing.
    pub async fn set_remote(&self, name: &str, url: &str) -> Result<()> {
        let existing = self.git_output(["remote", "get-url", name]).await?;
        if existing.status.success() {
            if String::from_utf8_lossy(&existing.stdout).trim() == url {
                return Ok(());
            }
            self.git(["remote", "set-url", name, url]).await
        } else {
            self.git(["remote", "add", name, url]).await
        }
    }

    /// Switch to `branch`, creating it from the current HEAD if it does not exist.
    pub async fn checkout(&self, branch: &str) -> Result<()> {
        let current = self.git_output(["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        if String::from_utf8_lossy(&current.stdout).trim() == branch {
            return Ok(());
        }
        if self.git(["checkout", branch]).await.is_err() {
            self.git(["checkout", "-b", branch]).await?;
        }
        Ok(())
    }

    /// Pull with rebase. Failure is logged, since a fresh remote has nothing to pull.
    pub async fn pull(&self, branch: &str) {
        if let Err(err) = self.git(["pull", "--rebase", "origin", branch]).await {
            warn!(dir = %self.workdir.display(), "git pull skipped: {}", err);
        }
    }

    /// Drop `path` from the index, keeping the files on disk.
    pub async fn untrack(&self, path: &str) {
        self.git(["rm", "-r", "--cached", "--quiet", "--ignore-unmatch", path])
            .await
            .ok(); // best-effort
    }

    pub async fn add_all(&self) -> Result<()> {
        self.git(["add", "--all"]).await
    }

    /// Whether there are staged or unstaged changes.
    pub async fn has_changes(&self) -> Result<bool> {
        let out = self.git_output(["status", "--porcelain"]).await?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        Ok(!stdout.trim().is_empty())
    }

    /// Commit pending changes. Returns whether a commit was created.
    pub async fn commit(&self, message: &str, allow_empty: bool) -> Result<bool> {
        if !allow_empty && !self.has_changes().await? {
            return Ok(false);
        }

        let mut args = vec!["commit", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.git(args).await?;
        Ok(true)
    }

    pub async fn push(&self, branch: &str) -> Result<()> {
        self.git(["push", "-u", "origin", branch]).await
    }

    /// Replace the remote branch with the local HEAD.
    pub async fn force_push(&self, branch: &str) -> Result<()> {
        self.git(["push", "--force", "origin", &format!("HEAD:{branch}")])
            .await
    }

    async fn git<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();
        let output = self.git_output(&args).await?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }

    async fn git_output<I, S>(&self, args: I) -> Result<std::process::Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        git_in_dir(args, &self.workdir).await
    }
}

async fn git_in_dir<I, S>(args: I, cwd: &Path) -> Result<std::process::Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut cmd = Command::new("git");
    cmd.current_dir(cwd);
    for arg in args {
        cmd.arg(arg.as_ref());
    }
    cmd.output()
        .await
        .with_context(|| format!("run git in {:?}", cwd))
}
