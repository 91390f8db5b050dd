//! Publish, unpublish and republish notes into the site content tree.
//!
//! Each selected note goes through
//!
//! ```text
//! SELECTED -> HEADER_PARSED -> {ELIGIBLE, SKIPPED}
//! ELIGIBLE -> RESOURCES_REWRITTEN -> HEADER_SERIALIZED -> EMITTED
//! ```
//!
//! and may fail at any step without affecting the rest of the batch. The
//! prepare half (read, parse, transform, plan) can run on a thread pool; the
//! commit half (copy, write, record) always runs on the calling thread in
//! selection order.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::atomic::{self, write_atomic, write_if_changed};
use crate::body::{convert_callouts, summarize};
use crate::config::{Config, ConfigError};
use crate::header::{self, HeaderError, HeaderRecord, NoteDate};
use crate::resources::{
    self, AssetClaims, AssetTarget, CopiedAsset, ResolvedRef, ResourceError, UnresolvedResource,
};
use crate::slug::slugify;
use crate::tags::{push_unique, TagCategoryMap, TagMapError};
use crate::tracker::{AssetRecord, PublishRecord, PublishTracker, TrackerError, LEDGER_DIR};

/// Why a single note did not make it.
#[derive(Error, Debug)]
pub enum NoteError {
    #[error(transparent)]
    MalformedHeader(#[from] HeaderError),

    #[error("source note no longer exists")]
    SourceMissing,

    #[error("failed to read note: {0}")]
    Read(io::Error),

    #[error("failed to write {path}: {source}")]
    TargetWrite { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("target {target} is already published from {owner}")]
    TargetConflict { target: PathBuf, owner: String },
}

impl NoteError {
    pub fn kind(&self) -> &'static str {
        match self {
            NoteError::MalformedHeader(_) => "MalformedHeader",
            NoteError::SourceMissing => "SourceMissing",
            NoteError::Read(_) => "Read",
            NoteError::TargetWrite { .. } => "TargetWrite",
            NoteError::Resource(_) => "TargetWrite",
            NoteError::TargetConflict { .. } => "TargetConflict",
        }
    }
}

/// Errors that end the whole run.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    TagMap(#[from] TagMapError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to scan vault: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("no note in the vault matches `{0}`")]
    NoMatch(String),

    #[error("failed to start worker pool: {0}")]
    ThreadPool(String),

    #[error("`{0}` is not a published note")]
    NotPublished(String),

    #[error("`{0}` matches more than one published note")]
    Ambiguous(String),

    #[error("image {0} does not exist")]
    ImageMissing(PathBuf),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Header(#[from] HeaderError),
}

#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Force `draft: true` on every emitted note.
    pub draft: bool,
    /// Plan only: no target writes, no ledger updates.
    pub dry_run: bool,
    pub jobs: usize,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            draft: false,
            dry_run: false,
            jobs: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnpublishOptions {
    /// Rewrite the source header with `publish: false`.
    pub clear_flag: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotPublishFlagged,
    NotTracked,
}

impl SkipReason {
    pub fn describe(self) -> &'static str {
        match self {
            SkipReason::NotPublishFlagged => "not flagged for publishing",
            SkipReason::NotTracked => "not published",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmittedNote {
    pub source: String,
    pub target: PathBuf,
    pub title: String,
    /// False when the target already had identical content, or on a dry run.
    pub changed: bool,
    pub assets: usize,
    #[serde(skip)]
    pub unresolved: Vec<UnresolvedResource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovedNote {
    pub source: String,
    pub target: PathBuf,
    pub assets_removed: usize,
    pub flag_cleared: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedNote {
    pub source: String,
    pub reason: SkipReason,
}

#[derive(Debug)]
pub struct FailedNote {
    pub source: String,
    pub error: NoteError,
}

/// Per-note outcomes of one batch, each list in selection order.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub emitted: Vec<EmittedNote>,
    pub removed: Vec<RemovedNote>,
    pub skipped: Vec<SkippedNote>,
    pub failed: Vec<FailedNote>,
    pub dry_run: bool,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.emitted.len() + self.removed.len() + self.skipped.len() + self.failed.len()
    }

    /// Whether anything in the content tree changed.
    pub fn touched_site(&self) -> bool {
        !self.dry_run && (self.emitted.iter().any(|e| e.changed) || !self.removed.is_empty())
    }

    pub fn unresolved_count(&self) -> usize {
        self.emitted.iter().map(|e| e.unresolved.len()).sum()
    }
}

/// An image added to an already published post.
#[derive(Debug, Clone, Serialize)]
pub struct AttachedImage {
    pub source: String,
    pub post: PathBuf,
    pub image: PathBuf,
    /// Markdown inserted at the top of the post body.
    pub markdown: String,
    pub written: bool,
}

/// A publish-flagged note found in the vault.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub source: String,
    pub title: String,
    pub modified: DateTime<Utc>,
    pub draft: bool,
    pub tracked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidateOrder {
    /// Newest first.
    #[default]
    Modified,
    Title,
    Path,
}

pub fn sort_candidates(candidates: &mut [Candidate], order: CandidateOrder) {
    match order {
        CandidateOrder::Modified => candidates.sort_by(|a, b| b.modified.cmp(&a.modified)),
        CandidateOrder::Title => {
            candidates.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
        }
        CandidateOrder::Path => candidates.sort_by(|a, b| a.source.cmp(&b.source)),
    }
}

/// Everything the commit step needs, produced without writing anything.
struct Prepared {
    source: String,
    header: HeaderRecord,
    body: String,
    refs: Vec<ResolvedRef>,
    slug: String,
    unmapped: Vec<String>,
}

enum Preparation {
    Ready(Box<Prepared>),
    Skipped(SkippedNote),
    Failed(FailedNote),
}

pub struct Publisher {
    config: Config,
    tag_map: TagCategoryMap,
    tracker: PublishTracker,
    ignore_patterns: Vec<Regex>,
}

impl Publisher {
    pub fn new(config: Config, tag_map: TagCategoryMap, tracker: PublishTracker) -> Self {
        let ignore_patterns = compile_ignore_patterns(&config.ignore_patterns);
        Self {
            config,
            tag_map,
            tracker,
            ignore_patterns,
        }
    }

    /// Load the tag map and ledger the config points at.
    pub fn open(config: Config) -> Result<Self, PublishError> {
        let tag_map = TagCategoryMap::load(&config.tag_map_path())?;
        let tracker = PublishTracker::load(PublishTracker::ledger_path(&config.site_dir()))?;
        tracing::debug!(
            tags = tag_map.len(),
            records = tracker.len(),
            "publisher ready"
        );
        Ok(Self::new(config, tag_map, tracker))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tracker(&self) -> &PublishTracker {
        &self.tracker
    }

    pub fn tag_map(&self) -> &TagCategoryMap {
        &self.tag_map
    }

    /// Vault-relative paths of every markdown note, sorted.
    pub fn discover(&self) -> Result<Vec<String>, PublishError> {
        let vault_dir = self.config.vault_dir();
        let mut files = Vec::new();

        for entry in WalkDir::new(&vault_dir)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|s| s.to_str()) != Some("md") {
                continue;
            }
            let Ok(rel) = path.strip_prefix(&vault_dir) else {
                continue;
            };
            let rel = rel_string(rel);
            if should_ignore(&rel, &self.ignore_patterns) {
                tracing::debug!("Ignoring {} due to ignore_patterns", rel);
                continue;
            }
            files.push(rel);
        }

        files.sort();
        Ok(files)
    }

    /// Resolve user-supplied names (file name, stem or vault-relative path)
    /// to vault-relative paths, keeping the order they were given in.
    pub fn select(&self, wanted: &[String]) -> Result<Vec<String>, PublishError> {
        let all = self.discover()?;
        let mut selected = Vec::new();
        for name in wanted {
            let name = self.normalize_name(name);
            let matches: Vec<_> = all.iter().filter(|rel| name_matches(rel, &name)).collect();
            if matches.is_empty() {
                return Err(PublishError::NoMatch(name));
            }
            for rel in matches {
                if !selected.contains(rel) {
                    selected.push(rel.clone());
                }
            }
        }
        Ok(selected)
    }

    /// Run the publish pipeline over `selection`.
    pub fn process(
        &mut self,
        selection: &[String],
        options: &PublishOptions,
    ) -> Result<BatchResult, PublishError> {
        tracing::info!(
            notes = selection.len(),
            dry_run = options.dry_run,
            jobs = options.jobs,
            "publishing"
        );

        let prepared = self.prepare_all(selection, options)?;

        let mut result = BatchResult {
            dry_run: options.dry_run,
            ..BatchResult::default()
        };
        let mut claims = self.tracker.asset_claims();
        let mut batch_targets: HashMap<PathBuf, String> = HashMap::new();
        let mut unmapped = Vec::new();

        for preparation in prepared {
            let note = match preparation {
                Preparation::Skipped(skipped) => {
                    tracing::debug!(source = %skipped.source, "skipped: {}", skipped.reason.describe());
                    result.skipped.push(skipped);
                    continue;
                }
                Preparation::Failed(failed) => {
                    tracing::warn!(source = %failed.source, "failed: {}", failed.error);
                    result.failed.push(failed);
                    continue;
                }
                Preparation::Ready(note) => note,
            };

            let source = note.source.clone();
            for tag in &note.unmapped {
                push_unique(&mut unmapped, tag);
            }
            match self.commit(*note, options, &mut claims, &mut batch_targets) {
                Ok(emitted) => {
                    tracing::info!(source = %emitted.source, path = %emitted.target.display(), "emitted");
                    result.emitted.push(emitted);
                }
                Err(error) => {
                    tracing::warn!(source = %source, "failed: {}", error);
                    result.failed.push(FailedNote { source, error });
                }
            }
        }

        self.handle_unmapped_tags(&unmapped, options.dry_run)?;
        Ok(result)
    }

    /// Publish every eligible note in the vault.
    pub fn publish_all(&mut self, options: &PublishOptions) -> Result<BatchResult, PublishError> {
        let selection = self.discover()?;
        self.process(&selection, options)
    }

    /// Replay the pipeline for tracked notes on their current source content.
    pub fn republish(
        &mut self,
        selection: Option<&[String]>,
        options: &PublishOptions,
    ) -> Result<BatchResult, PublishError> {
        let (tracked, untracked) = self.tracked_selection(selection);
        let mut result = self.process(&tracked, options)?;
        result.skipped.extend(untracked.into_iter().map(|source| SkippedNote {
            source,
            reason: SkipReason::NotTracked,
        }));
        Ok(result)
    }

    /// Remove tracked notes from the content tree.
    pub fn unpublish(
        &mut self,
        selection: Option<&[String]>,
        options: &UnpublishOptions,
    ) -> Result<BatchResult, PublishError> {
        let (tracked, untracked) = self.tracked_selection(selection);
        let mut result = BatchResult {
            dry_run: options.dry_run,
            ..BatchResult::default()
        };

        for source in tracked {
            let Some(record) = self.tracker.get(&source).cloned() else {
                continue;
            };

            if options.dry_run {
                result.removed.push(RemovedNote {
                    source,
                    target: record.target,
                    assets_removed: 0,
                    flag_cleared: false,
                });
                continue;
            }

            let target_bytes = match take_file(&record.target) {
                Ok(bytes) => bytes,
                Err(source_err) => {
                    result.failed.push(FailedNote {
                        error: NoteError::TargetWrite {
                            path: record.target.clone(),
                            source: source_err,
                        },
                        source,
                    });
                    continue;
                }
            };

            let dropped = self.tracker.record_unpublished(&source);
            if let Err(err) = self.tracker.save() {
                self.tracker.restore(&source, dropped);
                if let Some(bytes) = &target_bytes {
                    if let Err(e) = write_atomic(&record.target, bytes) {
                        tracing::warn!(path = %record.target.display(), "could not restore target: {}", e);
                    }
                }
                let error = ledger_failure(err);
                tracing::warn!(source = %source, "failed: {}", error);
                result.failed.push(FailedNote { source, error });
                continue;
            }

            let mut assets_removed = 0;
            for asset in &record.assets {
                if self.tracker.asset_shared(&asset.target, &source) {
                    continue;
                }
                match remove_if_exists(&asset.target) {
                    Ok(true) => assets_removed += 1,
                    Ok(false) => {}
                    Err(e) => tracing::warn!(asset = %asset.target.display(), "could not remove asset: {}", e),
                }
            }
            self.remove_empty_bundle(&record.target);

            let flag_cleared = options.clear_flag && self.clear_publish_flag(&source);
            tracing::info!(source = %source, path = %record.target.display(), "unpublished");
            result.removed.push(RemovedNote {
                source,
                target: record.target,
                assets_removed,
                flag_cleared,
            });
        }

        result.skipped.extend(untracked.into_iter().map(|source| SkippedNote {
            source,
            reason: SkipReason::NotTracked,
        }));
        Ok(result)
    }

    /// Copy `image` next to a published post and link it at the top of the
    /// post body. The asset is recorded against the note, so unpublishing
    /// removes it; republishing regenerates the post from its source.
    pub fn attach_image(
        &mut self,
        name: &str,
        image: &Path,
        alt: &str,
        dry_run: bool,
    ) -> Result<AttachedImage, PublishError> {
        let (tracked, _) = self.tracked_selection(Some(&[name.to_string()]));
        let source = match tracked.as_slice() {
            [one] => one.clone(),
            [] => return Err(PublishError::NotPublished(name.to_string())),
            _ => return Err(PublishError::Ambiguous(name.to_string())),
        };
        let Some(record) = self.tracker.get(&source).cloned() else {
            return Err(PublishError::NotPublished(name.to_string()));
        };
        if !image.is_file() {
            return Err(PublishError::ImageMissing(image.to_path_buf()));
        }

        let bundle_dir = record
            .target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.content_dir());
        let asset_target = match self.config.static_assets_dir() {
            Some(dir) => AssetTarget::shared(dir, self.config.images.link_prefix.clone()),
            None => AssetTarget::bundle(bundle_dir),
        };
        let mut claims = self.tracker.asset_claims();
        let (copied, markdown) = resources::attach(image, alt, &asset_target, &mut claims, dry_run)?;

        let attached = AttachedImage {
            source: source.clone(),
            post: record.target.clone(),
            image: copied.target.clone(),
            markdown,
            written: copied.written,
        };
        if dry_run {
            return Ok(attached);
        }

        let raw = fs::read_to_string(&record.target)?;
        let (header, body) = header::parse(&raw)?;
        let content = header::compose(&header, &format!("{}\n\n{}", attached.markdown, body))?;

        let mut assets = record.assets.clone();
        let new_asset = !assets.iter().any(|a| a.target == copied.target);
        if new_asset {
            assets.push(AssetRecord {
                source: copied.source.clone(),
                target: copied.target.clone(),
            });
        }
        self.tracker.record_published(&source, record.target.clone(), assets);
        if let Err(err) = self.tracker.save() {
            self.tracker.restore(&source, Some(record));
            if new_asset && copied.written {
                remove_if_exists(&copied.target).ok();
            }
            return Err(err.into());
        }

        write_atomic(&attached.post, content.as_bytes())?;
        tracing::info!(source = %source, image = %attached.image.display(), "attached image");
        Ok(attached)
    }

    /// Publish-flagged notes in the vault with their tracked state.
    pub fn candidates(&self) -> Result<Vec<Candidate>, PublishError> {
        let vault_dir = self.config.vault_dir();
        let mut candidates = Vec::new();

        for rel in self.discover()? {
            let path = vault_dir.join(&rel);
            let raw = fs::read_to_string(&path)?;
            let header = match header::parse(&raw) {
                Ok((header, _)) => header,
                Err(e) => {
                    tracing::debug!(source = %rel, "not a candidate: {}", e);
                    continue;
                }
            };
            if !header.publish {
                continue;
            }
            let modified = fs::metadata(&path)?.modified()?;
            candidates.push(Candidate {
                title: header.display_title(file_stem(&rel)).to_string(),
                modified: DateTime::<Utc>::from(modified),
                draft: header.draft,
                tracked: self.tracker.is_published(&rel),
                source: rel,
            });
        }
        Ok(candidates)
    }

    /// Learn tag mappings from posts already in the content tree.
    pub fn learn_tags(&mut self) -> Result<usize, PublishError> {
        let content_dir = self.config.content_dir();
        if !content_dir.is_dir() {
            return Ok(0);
        }

        let mut posts = Vec::new();
        for entry in WalkDir::new(&content_dir) {
            let entry = entry?;
            if !entry.file_type().is_file() || entry.path().extension().and_then(|s| s.to_str()) != Some("md") {
                continue;
            }
            let raw = fs::read_to_string(entry.path())?;
            match header::parse(&raw) {
                Ok((header, _)) => posts.push((header.tags, header.categories)),
                Err(e) => tracing::debug!(path = %entry.path().display(), "skipping post: {}", e),
            }
        }

        let learned = self
            .tag_map
            .learn(posts.iter().map(|(t, c)| (t.as_slice(), c.as_slice())));
        tracing::info!(posts = posts.len(), learned, "learned tag mappings");
        Ok(learned)
    }

    pub fn save_tag_map(&self) -> Result<(), PublishError> {
        self.tag_map.save(&self.config.tag_map_path())?;
        Ok(())
    }

    fn prepare_all(
        &self,
        selection: &[String],
        options: &PublishOptions,
    ) -> Result<Vec<Preparation>, PublishError> {
        if options.jobs <= 1 || selection.len() <= 1 {
            return Ok(selection.iter().map(|rel| self.prepare(rel, options)).collect());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs)
            .build()
            .map_err(|e| PublishError::ThreadPool(e.to_string()))?;
        Ok(pool.install(|| {
            selection
                .par_iter()
                .map(|rel| self.prepare(rel, options))
                .collect()
        }))
    }

    fn prepare(&self, rel: &str, options: &PublishOptions) -> Preparation {
        let fail = |error: NoteError| {
            Preparation::Failed(FailedNote {
                source: rel.to_string(),
                error,
            })
        };

        let path = self.config.vault_dir().join(rel);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return fail(NoteError::SourceMissing),
            Err(e) => return fail(NoteError::Read(e)),
        };
        let (mut header, body) = match header::parse(&raw) {
            Ok(parsed) => parsed,
            Err(e) => return fail(e.into()),
        };

        if !header.publish {
            return Preparation::Skipped(SkippedNote {
                source: rel.to_string(),
                reason: SkipReason::NotPublishFlagged,
            });
        }

        let stem = file_stem(rel);
        header.title = header.display_title(stem).to_string();
        if options.draft {
            header.draft = true;
        }

        let fallback = self
            .config
            .tags
            .auto_extend
            .then_some(self.config.tags.fallback.as_str());
        let derived = self.tag_map.derive(&header.tags, &header.categories, fallback);
        header.categories = derived.categories;

        if self.config.posts.auto_summary && header.description.is_none() {
            header.description = summarize(&body, self.config.posts.summary_length);
        }
        let body = if self.config.posts.admonitions {
            convert_callouts(&body)
        } else {
            body
        };

        let mut slug = slugify(&header.title);
        if slug.is_empty() {
            slug = slugify(stem);
        }
        if slug.is_empty() {
            slug = String::from("untitled");
        }

        let mut source_dirs = self.config.asset_dirs();
        if let Some(parent) = path.parent() {
            source_dirs.push(parent.to_path_buf());
        }
        source_dirs.push(self.config.vault_dir());
        let refs = resources::plan(&body, &source_dirs);

        Preparation::Ready(Box::new(Prepared {
            source: rel.to_string(),
            header,
            body,
            refs,
            slug,
            unmapped: derived.unmapped,
        }))
    }

    fn commit(
        &mut self,
        note: Prepared,
        options: &PublishOptions,
        claims: &mut AssetClaims,
        batch_targets: &mut HashMap<PathBuf, String>,
    ) -> Result<EmittedNote, NoteError> {
        let Prepared {
            source,
            mut header,
            body,
            refs,
            slug,
            ..
        } = note;

        let bundle_dir = self.config.content_dir().join(&slug);
        let target = bundle_dir.join("index.md");

        let tracked_owner = self
            .tracker
            .owner_of_target(&target)
            .map(|r| r.source.clone());
        let batch_owner = batch_targets.get(&target).cloned();
        if let Some(owner) = tracked_owner.or(batch_owner).filter(|o| *o != source) {
            return Err(NoteError::TargetConflict { target, owner });
        }
        batch_targets.insert(target.clone(), source.clone());

        let asset_target = match self.config.static_assets_dir() {
            Some(dir) => AssetTarget::shared(dir, self.config.images.link_prefix.clone()),
            None => AssetTarget::bundle(&bundle_dir),
        };
        let rewrite = resources::apply(&body, &refs, &asset_target, claims, options.dry_run)?;

        if self.config.posts.cover_image && !header.extra.contains_key("image") {
            if let Some(link) = &rewrite.first_link {
                let link = link.trim_start_matches('<').trim_end_matches('>');
                header
                    .extra
                    .insert(Value::String("image".into()), Value::String(link.to_string()));
            }
        }

        let previous = self.tracker.get(&source).cloned();
        if header.date.is_none() {
            header.date = Some(
                previous
                    .as_ref()
                    .map(|r| NoteDate::from_timestamp(r.first_published))
                    .unwrap_or_else(NoteDate::today),
            );
        }

        let content = header::compose(&header, &rewrite.body)?;
        let assets: Vec<AssetRecord> = rewrite
            .copied
            .iter()
            .map(|c| AssetRecord {
                source: c.source.clone(),
                target: c.target.clone(),
            })
            .collect();

        let mut emitted = EmittedNote {
            source: source.clone(),
            target: target.clone(),
            title: header.title.clone(),
            changed: false,
            assets: assets.len(),
            unresolved: rewrite.unresolved,
        };
        if options.dry_run {
            return Ok(emitted);
        }

        let replaced = match write_if_changed(&target, content.as_bytes()) {
            Ok(replaced) => replaced,
            Err(e) => {
                self.roll_back_assets(&source, &rewrite.copied, previous.as_ref(), claims);
                batch_targets.remove(&target);
                return Err(NoteError::TargetWrite {
                    path: target,
                    source: e,
                });
            }
        };
        emitted.changed = replaced.written;

        self.tracker.record_published(&source, target.clone(), assets.clone());
        if let Err(err) = self.tracker.save() {
            self.tracker.restore(&source, previous.clone());
            self.roll_back_assets(&source, &rewrite.copied, previous.as_ref(), claims);
            if let Err(e) = atomic::restore(&target, &replaced) {
                tracing::warn!(path = %target.display(), "could not restore target: {}", e);
            }
            self.remove_empty_bundle(&target);
            batch_targets.remove(&target);
            return Err(ledger_failure(err));
        }

        if let Some(previous) = previous {
            self.remove_stale(&source, &previous.target, &previous.assets, &target, &assets);
        }
        Ok(emitted)
    }

    /// Remove assets a failed commit copied in that nothing else accounts for.
    fn roll_back_assets(
        &self,
        source: &str,
        copied: &[CopiedAsset],
        previous: Option<&PublishRecord>,
        claims: &mut AssetClaims,
    ) {
        for asset in copied.iter().filter(|c| c.written) {
            let kept = previous.is_some_and(|p| p.assets.iter().any(|a| a.target == asset.target));
            if kept || self.tracker.asset_shared(&asset.target, source) {
                continue;
            }
            claims.remove(&asset.target);
            if let Err(e) = remove_if_exists(&asset.target) {
                tracing::warn!(asset = %asset.target.display(), "could not remove asset: {}", e);
            }
        }
    }

    /// Drop the old target and assets a republished note no longer uses.
    fn remove_stale(
        &self,
        source: &str,
        old_target: &Path,
        old_assets: &[AssetRecord],
        new_target: &Path,
        new_assets: &[AssetRecord],
    ) {
        for asset in old_assets {
            let still_used = new_assets.iter().any(|a| a.target == asset.target);
            if still_used || self.tracker.asset_shared(&asset.target, source) {
                continue;
            }
            if let Err(e) = remove_if_exists(&asset.target) {
                tracing::warn!(asset = %asset.target.display(), "could not remove stale asset: {}", e);
            }
        }

        if old_target != new_target {
            tracing::info!(from = %old_target.display(), to = %new_target.display(), "target moved");
            if let Err(e) = remove_if_exists(old_target) {
                tracing::warn!(path = %old_target.display(), "could not remove old target: {}", e);
            }
            self.remove_empty_bundle(old_target);
        }
    }

    fn remove_empty_bundle(&self, target: &Path) {
        let Some(bundle) = target.parent() else {
            return;
        };
        if bundle == self.config.content_dir() {
            return;
        }
        let empty = fs::read_dir(bundle).is_ok_and(|mut entries| entries.next().is_none());
        if empty {
            if let Err(e) = fs::remove_dir(bundle) {
                tracing::debug!(dir = %bundle.display(), "could not remove bundle dir: {}", e);
            }
        }
    }

    fn clear_publish_flag(&self, source: &str) -> bool {
        let path = self.config.vault_dir().join(source);
        let result = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| header::parse(&raw).map_err(|e| e.to_string()))
            .and_then(|(mut header, body)| {
                header.publish = false;
                let content = header::compose(&header, &body).map_err(|e| e.to_string())?;
                write_atomic(&path, content.as_bytes()).map_err(|e| e.to_string())
            });
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(source = %source, "could not clear publish flag: {}", e);
                false
            }
        }
    }

    fn handle_unmapped_tags(&mut self, unmapped: &[String], dry_run: bool) -> Result<(), PublishError> {
        if unmapped.is_empty() {
            return Ok(());
        }
        if !self.config.tags.auto_extend {
            tracing::warn!(tags = ?unmapped, "tags without a category mapping");
            return Ok(());
        }
        if dry_run {
            return Ok(());
        }
        let fallback = self.config.tags.fallback.clone();
        let added = self.tag_map.extend_unmapped(unmapped, &fallback);
        if added > 0 {
            tracing::info!(added, fallback = %fallback, "extended tag map");
            self.save_tag_map()?;
        }
        Ok(())
    }

    /// Split a selection into tracked sources and names that match no record.
    fn tracked_selection(&self, selection: Option<&[String]>) -> (Vec<String>, Vec<String>) {
        let all: Vec<String> = self
            .tracker
            .list_published()
            .map(|r| r.source.clone())
            .collect();
        let Some(wanted) = selection else {
            return (all, Vec::new());
        };

        let mut tracked = Vec::new();
        let mut untracked = Vec::new();
        for name in wanted {
            let name = self.normalize_name(name);
            let mut found = false;
            for rel in all.iter().filter(|rel| name_matches(rel, &name)) {
                found = true;
                if !tracked.contains(rel) {
                    tracked.push(rel.clone());
                }
            }
            if !found {
                untracked.push(name);
            }
        }
        (tracked, untracked)
    }

    fn normalize_name(&self, name: &str) -> String {
        let path = Path::new(name.trim());
        let vault_dir = self.config.vault_dir();
        match path.strip_prefix(&vault_dir) {
            Ok(rel) if path.is_absolute() => rel_string(rel),
            _ => name.trim().trim_start_matches("./").replace('\\', "/"),
        }
    }
}

fn compile_ignore_patterns(patterns: &[String]) -> Vec<Regex> {
    let mut compiled = Vec::new();
    for pat in patterns {
        match Regex::new(pat) {
            Ok(re) => compiled.push(re),
            Err(err) => tracing::warn!("Invalid ignore pattern '{}': {}", pat, err),
        }
    }
    compiled
}

fn should_ignore(path: &str, ignores: &[Regex]) -> bool {
    path.starts_with(LEDGER_DIR) || ignores.iter().any(|re| re.is_match(path))
}

fn rel_string(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn file_name(rel: &str) -> &str {
    rel.rsplit('/').next().unwrap_or(rel)
}

fn file_stem(rel: &str) -> &str {
    let name = file_name(rel);
    name.strip_suffix(".md").unwrap_or(name)
}

fn name_matches(rel: &str, wanted: &str) -> bool {
    rel == wanted
        || rel.strip_suffix(".md") == Some(wanted)
        || file_name(rel) == wanted
        || file_stem(rel) == wanted
}

/// A ledger that could not be saved fails the note that changed it.
fn ledger_failure(err: TrackerError) -> NoteError {
    match err {
        TrackerError::Write { path, source } | TrackerError::Read { path, source } => {
            NoteError::TargetWrite { path, source }
        }
        TrackerError::Corruption { path, reason } => NoteError::TargetWrite {
            path,
            source: io::Error::other(reason),
        },
    }
}

/// Remove a file, returning its contents if it existed.
fn take_file(path: &Path) -> io::Result<Option<Vec<u8>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    remove_if_exists(path)?;
    Ok(Some(bytes))
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, Publisher) {
        let dir = tempdir().unwrap();
        let vault = dir.path().join("vault");
        let site = dir.path().join("site");
        fs::create_dir_all(vault.join("sub")).unwrap();
        fs::create_dir_all(vault.join(".obsidian")).unwrap();
        fs::create_dir_all(&site).unwrap();
        fs::write(vault.join("a.md"), "---\ntitle: A\npublish: true\n---\nA body\n").unwrap();
        fs::write(vault.join("sub/b.md"), "---\ntitle: B\n---\nB body\n").unwrap();
        fs::write(vault.join("sub/notes.txt"), "not markdown").unwrap();
        fs::write(vault.join(".obsidian/workspace.md"), "hidden").unwrap();

        let mut config = Config::for_dirs(&vault, &site);
        config.ignore_patterns = vec!["^templates/".into()];
        fs::create_dir_all(vault.join("templates")).unwrap();
        fs::write(vault.join("templates/t.md"), "---\npublish: true\n---\n").unwrap();

        let publisher = Publisher::open(config).unwrap();
        (dir, publisher)
    }

    #[test]
    fn test_discover_skips_hidden_and_ignored() {
        let (_dir, publisher) = setup();
        assert_eq!(publisher.discover().unwrap(), vec!["a.md", "sub/b.md"]);
    }

    #[test]
    fn test_select_by_name_stem_or_path() {
        let (_dir, publisher) = setup();
        let wanted = vec!["b".to_string(), "a.md".to_string(), "sub/b.md".to_string()];
        assert_eq!(publisher.select(&wanted).unwrap(), vec!["sub/b.md", "a.md"]);

        let missing = publisher.select(&["zzz".to_string()]);
        assert!(matches!(missing, Err(PublishError::NoMatch(name)) if name == "zzz"));
    }

    #[test]
    fn test_name_matching() {
        assert!(name_matches("notes/go.md", "go"));
        assert!(name_matches("notes/go.md", "go.md"));
        assert!(name_matches("notes/go.md", "notes/go"));
        assert!(!name_matches("notes/go.md", "notes"));
    }

    #[test]
    fn test_candidates_only_flagged_notes() {
        let (_dir, publisher) = setup();
        let mut candidates = publisher.candidates().unwrap();
        sort_candidates(&mut candidates, CandidateOrder::Path);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source, "a.md");
        assert_eq!(candidates[0].title, "A");
        assert!(!candidates[0].tracked);
    }

    #[test]
    fn test_parallel_prepare_keeps_selection_order() {
        let (dir, mut publisher) = setup();
        for i in 0..6 {
            fs::write(
                dir.path().join(format!("vault/n{i}.md")),
                format!("---\ntitle: Note {i}\npublish: true\n---\nbody {i}\n"),
            )
            .unwrap();
        }
        let selection: Vec<String> = (0..6).rev().map(|i| format!("n{i}.md")).collect();
        let options = PublishOptions {
            jobs: 4,
            ..PublishOptions::default()
        };

        let result = publisher.process(&selection, &options).unwrap();
        let sources: Vec<_> = result.emitted.iter().map(|e| e.source.clone()).collect();
        assert_eq!(sources, selection);
        assert_eq!(publisher.tracker().len(), 6);
    }

    #[test]
    fn test_slug_conflict_in_one_batch() {
        let (dir, mut publisher) = setup();
        fs::write(dir.path().join("vault/dup.md"), "---\ntitle: A\npublish: true\n---\nsame title\n").unwrap();

        let selection = vec!["a.md".to_string(), "dup.md".to_string()];
        let result = publisher.process(&selection, &PublishOptions::default()).unwrap();

        assert_eq!(result.emitted.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].source, "dup.md");
        assert_eq!(result.failed[0].error.kind(), "TargetConflict");
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let (dir, mut publisher) = setup();
        let options = PublishOptions {
            dry_run: true,
            ..PublishOptions::default()
        };
        let result = publisher.publish_all(&options).unwrap();

        assert_eq!(result.emitted.len(), 1);
        assert!(!result.touched_site());
        assert!(!dir.path().join("site/content").exists());
        assert!(!PublishTracker::ledger_path(&dir.path().join("site")).exists());
    }
}
