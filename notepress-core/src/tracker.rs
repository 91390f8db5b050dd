//! Persisted ledger of every note emitted into the content tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::atomic::write_atomic;
use crate::resources::AssetClaims;

const LEDGER_VERSION: &str = "1";
pub const LEDGER_DIR: &str = ".notepress";
const LEDGER_FILENAME: &str = "ledger.json";

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("publish ledger {path} is corrupt: {reason}")]
    Corruption { path: PathBuf, reason: String },

    #[error("failed to read publish ledger {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write publish ledger {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// An asset copied into the content tree on behalf of a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub source: PathBuf,
    pub target: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRecord {
    /// Vault-relative source path with `/` separators.
    pub source: String,
    pub target: PathBuf,
    #[serde(default)]
    pub assets: Vec<AssetRecord>,
    pub first_published: DateTime<Utc>,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct Ledger {
    version: String,
    saved_at: String,
    records: BTreeMap<String, PublishRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishTracker {
    path: PathBuf,
    records: BTreeMap<String, PublishRecord>,
}

impl PublishTracker {
    /// Ledger location for a site directory.
    pub fn ledger_path(site_dir: &Path) -> PathBuf {
        site_dir.join(LEDGER_DIR).join(LEDGER_FILENAME)
    }

    /// Load the ledger at `path`. A missing file is an empty tracker; anything
    /// unreadable is reported as corruption rather than reset.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        let path = path.into();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no publish ledger yet");
                return Ok(Self {
                    path,
                    records: BTreeMap::new(),
                });
            }
            Err(source) => return Err(TrackerError::Read { path, source }),
        };

        let ledger: Ledger = serde_json::from_slice(&data).map_err(|e| TrackerError::Corruption {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if ledger.version != LEDGER_VERSION {
            return Err(TrackerError::Corruption {
                path,
                reason: format!(
                    "unsupported ledger version {:?} (expected {LEDGER_VERSION})",
                    ledger.version
                ),
            });
        }

        tracing::debug!(path = %path.display(), records = ledger.records.len(), "loaded publish ledger");
        Ok(Self {
            path,
            records: ledger.records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the ledger atomically.
    pub fn save(&self) -> Result<(), TrackerError> {
        let ledger = Ledger {
            version: LEDGER_VERSION.to_string(),
            saved_at: Utc::now().to_rfc3339(),
            records: self.records.clone(),
        };
        let json = serde_json::to_vec_pretty(&ledger).map_err(|e| TrackerError::Write {
            path: self.path.clone(),
            source: std::io::Error::other(e),
        })?;
        write_atomic(&self.path, &json).map_err(|source| TrackerError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Record an emission, keeping the first publication time of an existing record.
    pub fn record_published(
        &mut self,
        source: &str,
        target: PathBuf,
        assets: Vec<AssetRecord>,
    ) -> &PublishRecord {
        let now = Utc::now();
        let first_published = self
            .records
            .get(source)
            .map_or(now, |existing| existing.first_published);
        self.records.insert(
            source.to_string(),
            PublishRecord {
                source: source.to_string(),
                target,
                assets,
                first_published,
                emitted_at: now,
            },
        );
        &self.records[source]
    }

    pub fn record_unpublished(&mut self, source: &str) -> Option<PublishRecord> {
        self.records.remove(source)
    }

    /// Put `source` back to `previous` after a change that could not be saved.
    pub fn restore(&mut self, source: &str, previous: Option<PublishRecord>) {
        match previous {
            Some(record) => {
                self.records.insert(source.to_string(), record);
            }
            None => {
                self.records.remove(source);
            }
        }
    }

    /// Records ordered by source path.
    pub fn list_published(&self) -> impl Iterator<Item = &PublishRecord> {
        self.records.values()
    }

    pub fn is_published(&self, source: &str) -> bool {
        self.records.contains_key(source)
    }

    pub fn get(&self, source: &str) -> Option<&PublishRecord> {
        self.records.get(source)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The record, if any, whose target is `target`.
    pub fn owner_of_target(&self, target: &Path) -> Option<&PublishRecord> {
        self.records.values().find(|r| r.target == target)
    }

    /// Every tracked asset target mapped to the source file it came from.
    pub fn asset_claims(&self) -> AssetClaims {
        self.records
            .values()
            .flat_map(|r| r.assets.iter())
            .map(|a| (a.target.clone(), a.source.clone()))
            .collect()
    }

    /// Whether a record other than `source` lists `target` among its assets.
    pub fn asset_shared(&self, target: &Path, source: &str) -> bool {
        self.records
            .values()
            .filter(|r| r.source != source)
            .any(|r| r.assets.iter().any(|a| a.target == target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn asset(name: &str) -> AssetRecord {
        AssetRecord {
            source: PathBuf::from(format!("/vault/assets/{name}")),
            target: PathBuf::from(format!("/site/static/{name}")),
        }
    }

    #[test]
    fn test_missing_ledger_is_empty() {
        let dir = tempdir().unwrap();
        let tracker = PublishTracker::load(PublishTracker::ledger_path(dir.path())).unwrap();
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = PublishTracker::ledger_path(dir.path());

        let mut tracker = PublishTracker::load(&path).unwrap();
        tracker.record_published("notes/a.md", PathBuf::from("/site/content/post/a/index.md"), vec![asset("pic.png")]);
        tracker.record_published("b.md", PathBuf::from("/site/content/post/b/index.md"), Vec::new());
        tracker.save().unwrap();

        let reloaded = PublishTracker::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.is_published("notes/a.md"));
        assert_eq!(reloaded.get("notes/a.md"), tracker.get("notes/a.md"));

        let sources: Vec<_> = reloaded.list_published().map(|r| r.source.as_str()).collect();
        assert_eq!(sources, vec!["b.md", "notes/a.md"]);
    }

    #[test]
    fn test_republish_keeps_first_published() {
        let mut tracker = PublishTracker::default();
        let first = tracker
            .record_published("a.md", PathBuf::from("t1"), Vec::new())
            .first_published;
        let again = tracker.record_published("a.md", PathBuf::from("t2"), Vec::new()).clone();
        assert_eq!(again.first_published, first);
        assert_eq!(again.target, PathBuf::from("t2"));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_unpublish_drops_record() {
        let mut tracker = PublishTracker::default();
        tracker.record_published("a.md", PathBuf::from("t"), Vec::new());
        assert!(tracker.record_unpublished("a.md").is_some());
        assert!(tracker.record_unpublished("a.md").is_none());
        assert!(!tracker.is_published("a.md"));
    }

    #[test]
    fn test_restore_reverts_unsaved_changes() {
        let mut tracker = PublishTracker::default();
        tracker.record_published("a.md", PathBuf::from("t1"), Vec::new());
        let before = tracker.get("a.md").cloned();

        tracker.record_published("a.md", PathBuf::from("t2"), vec![asset("x.png")]);
        tracker.restore("a.md", before.clone());
        assert_eq!(tracker.get("a.md").cloned(), before);

        tracker.record_published("b.md", PathBuf::from("tb"), Vec::new());
        tracker.restore("b.md", None);
        assert!(!tracker.is_published("b.md"));

        let removed = tracker.record_unpublished("a.md");
        tracker.restore("a.md", removed);
        assert!(tracker.is_published("a.md"));
    }

    #[test]
    fn test_unwritable_ledger_reports_write_error() {
        let dir = tempdir().unwrap();
        let path = PublishTracker::ledger_path(dir.path());
        let tracker = PublishTracker::load(&path).unwrap();
        fs::create_dir_all(&path).unwrap();
        assert!(matches!(tracker.save(), Err(TrackerError::Write { .. })));
    }

    #[test]
    fn test_corrupt_ledger_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            PublishTracker::load(&path),
            Err(TrackerError::Corruption { .. })
        ));

        fs::write(&path, br#"{"version":"99","saved_at":"","records":{}}"#).unwrap();
        assert!(matches!(
            PublishTracker::load(&path),
            Err(TrackerError::Corruption { .. })
        ));
    }

    #[test]
    fn test_asset_sharing() {
        let mut tracker = PublishTracker::default();
        tracker.record_published("a.md", PathBuf::from("ta"), vec![asset("shared.png"), asset("a.png")]);
        tracker.record_published("b.md", PathBuf::from("tb"), vec![asset("shared.png")]);

        assert!(tracker.asset_shared(Path::new("/site/static/shared.png"), "a.md"));
        assert!(!tracker.asset_shared(Path::new("/site/static/a.png"), "a.md"));
        assert_eq!(tracker.asset_claims().len(), 2);
        assert_eq!(tracker.owner_of_target(Path::new("tb")).map(|r| r.source.as_str()), Some("b.md"));
    }
}
