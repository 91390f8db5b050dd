//! Configuration parsing and management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("{what} directory does not exist: {path}")]
    MissingDirectory { what: &'static str, path: PathBuf },

    #[error("Invalid ignore pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Main configuration struct matching the notepress.yml schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,

    #[serde(default)]
    pub repositories: RepositoriesConfig,

    #[serde(default)]
    pub images: ImagesConfig,

    #[serde(default)]
    pub posts: PostsConfig,

    #[serde(default)]
    pub tags: TagsConfig,

    #[serde(default)]
    pub hugo: HugoConfig,

    /// Regexes matched against vault-relative paths of notes to leave alone.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    #[serde(default = "default_jobs")]
    pub jobs: usize,

    // Internal: path to config file (for relative path resolution)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_jobs() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub vault: PathBuf,
    pub site: PathBuf,

    /// Asset directories relative to the vault, highest priority first.
    #[serde(default)]
    pub assets: Vec<PathBuf>,

    /// Post directory relative to the site.
    #[serde(default = "default_content")]
    pub content: PathBuf,

    /// Shared static image directory relative to the site. Unset means images
    /// are copied into each post's bundle.
    #[serde(default)]
    pub static_assets: Option<PathBuf>,
}

fn default_content() -> PathBuf {
    PathBuf::from("content/post")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoriesConfig {
    #[serde(default)]
    pub source: Option<RepositoryConfig>,

    #[serde(default)]
    pub pages: Option<RepositoryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub url: String,

    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    String::from("main")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_link_prefix")]
    pub link_prefix: String,
}

fn default_link_prefix() -> String {
    String::from("/images")
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            link_prefix: default_link_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostsConfig {
    #[serde(default = "default_true")]
    pub cover_image: bool,

    #[serde(default = "default_true")]
    pub admonitions: bool,

    #[serde(default)]
    pub auto_summary: bool,

    #[serde(default = "default_summary_length")]
    pub summary_length: usize,
}

fn default_summary_length() -> usize {
    200
}

impl Default for PostsConfig {
    fn default() -> Self {
        Self {
            cover_image: true,
            admonitions: true,
            auto_summary: false,
            summary_length: default_summary_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagsConfig {
    #[serde(default = "default_tag_map")]
    pub map: PathBuf,

    /// Add unmapped tags to the map under `fallback` after each publish.
    #[serde(default)]
    pub auto_extend: bool,

    #[serde(default = "default_fallback")]
    pub fallback: String,
}

fn default_tag_map() -> PathBuf {
    PathBuf::from("tag_category_mapping.yaml")
}

fn default_fallback() -> String {
    String::from("uncategorized")
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            map: default_tag_map(),
            auto_extend: false,
            fallback: default_fallback(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HugoConfig {
    #[serde(default = "default_hugo_binary")]
    pub binary: String,

    /// Build output relative to the site.
    #[serde(default = "default_public")]
    pub public: PathBuf,

    #[serde(default = "default_true")]
    pub minify: bool,
}

fn default_hugo_binary() -> String {
    String::from("hugo")
}

fn default_public() -> PathBuf {
    PathBuf::from("public")
}

impl Default for HugoConfig {
    fn default() -> Self {
        Self {
            binary: default_hugo_binary(),
            public: default_public(),
            minify: true,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&contents)?;

        // Store config file path for relative path resolution
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Parse configuration without a file location; relative paths stay relative
    /// to the working directory.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        if config.paths.vault.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("paths.vault".into()));
        }
        if config.paths.site.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("paths.site".into()));
        }
        Ok(config)
    }

    /// Build a config for two directories with everything else defaulted.
    pub fn for_dirs(vault: impl Into<PathBuf>, site: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                vault: vault.into(),
                site: site.into(),
                assets: Vec::new(),
                content: default_content(),
                static_assets: None,
            },
            repositories: RepositoriesConfig::default(),
            images: ImagesConfig::default(),
            posts: PostsConfig::default(),
            tags: TagsConfig::default(),
            hugo: HugoConfig::default(),
            ignore_patterns: Vec::new(),
            jobs: default_jobs(),
            config_path: None,
        }
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Get the vault directory, resolved relative to config file
    pub fn vault_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.vault)
    }

    /// Get the site directory, resolved relative to config file
    pub fn site_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.site)
    }

    /// Directory posts are emitted into
    pub fn content_dir(&self) -> PathBuf {
        join_expanded(&self.site_dir(), &self.paths.content)
    }

    /// Shared image directory, if one is configured
    pub fn static_assets_dir(&self) -> Option<PathBuf> {
        self.paths
            .static_assets
            .as_ref()
            .map(|p| join_expanded(&self.site_dir(), p))
    }

    /// Configured asset directories, resolved against the vault
    pub fn asset_dirs(&self) -> Vec<PathBuf> {
        let vault = self.vault_dir();
        self.paths
            .assets
            .iter()
            .map(|p| join_expanded(&vault, p))
            .collect()
    }

    /// Hugo build output directory
    pub fn public_dir(&self) -> PathBuf {
        join_expanded(&self.site_dir(), &self.hugo.public)
    }

    pub fn tag_map_path(&self) -> PathBuf {
        self.resolve_path(&self.tags.map)
    }

    /// Resolve an arbitrary path relative to the config file location
    pub fn resolve_relative(&self, path: &Path) -> PathBuf {
        self.resolve_path(path)
    }

    /// Resolve a path relative to the config file location
    fn resolve_path(&self, path: &Path) -> PathBuf {
        let path = expand_home(path);
        if path.is_absolute() {
            path
        } else if let Some(parent) = self.config_path.as_deref().and_then(Path::parent) {
            parent.join(path)
        } else {
            path
        }
    }

    /// Check that the directories the publisher reads and writes exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let vault = self.vault_dir();
        if !vault.is_dir() {
            return Err(ConfigError::MissingDirectory {
                what: "vault",
                path: vault,
            });
        }
        let site = self.site_dir();
        if !site.is_dir() {
            return Err(ConfigError::MissingDirectory {
                what: "site",
                path: site,
            });
        }
        for pattern in &self.ignore_patterns {
            regex::Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        for dir in self.asset_dirs() {
            if !dir.is_dir() {
                tracing::warn!(dir = %dir.display(), "configured asset directory does not exist");
            }
        }
        Ok(())
    }

    /// Get a nested config value using dotted path (e.g., "paths.vault")
    pub fn get(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        let display = |p: PathBuf| Some(p.display().to_string());
        match parts.as_slice() {
            ["paths", "vault"] => display(self.vault_dir()),
            ["paths", "site"] => display(self.site_dir()),
            ["paths", "content"] => display(self.content_dir()),
            ["paths", "static_assets"] => self.static_assets_dir().and_then(display),
            ["repositories", "source", "url"] => self.repositories.source.as_ref().map(|r| r.url.clone()),
            ["repositories", "source", "branch"] => {
                self.repositories.source.as_ref().map(|r| r.branch.clone())
            }
            ["repositories", "pages", "url"] => self.repositories.pages.as_ref().map(|r| r.url.clone()),
            ["repositories", "pages", "branch"] => {
                self.repositories.pages.as_ref().map(|r| r.branch.clone())
            }
            ["images", "link_prefix"] => Some(self.images.link_prefix.clone()),
            ["posts", "cover_image"] => Some(self.posts.cover_image.to_string()),
            ["posts", "admonitions"] => Some(self.posts.admonitions.to_string()),
            ["posts", "auto_summary"] => Some(self.posts.auto_summary.to_string()),
            ["posts", "summary_length"] => Some(self.posts.summary_length.to_string()),
            ["tags", "map"] => display(self.tag_map_path()),
            ["tags", "auto_extend"] => Some(self.tags.auto_extend.to_string()),
            ["tags", "fallback"] => Some(self.tags.fallback.clone()),
            ["hugo", "binary"] => Some(self.hugo.binary.clone()),
            ["hugo", "public"] => display(self.public_dir()),
            ["hugo", "minify"] => Some(self.hugo.minify.to_string()),
            ["jobs"] => Some(self.jobs.to_string()),
            _ => None,
        }
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

fn join_expanded(base: &Path, path: &Path) -> PathBuf {
    let path = expand_home(path);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
