//! Embedded image references: discovery, resolution, copy and rewrite.
//!
//! Two syntaxes are recognized in note bodies:
//!
//! - wiki embeds: `![[diagram.png]]`, `![[diagram.png|Alt text]]`, `![[diagram.png|300]]`
//! - markdown images: `![alt](images/diagram.png "title")`
//!
//! Rewriting happens in two steps. [`plan`] scans the body and resolves each
//! reference against the candidate source directories without touching the
//! target tree. [`apply`] picks target names, copies files and substitutes the
//! markup. Only `apply` writes, so callers running many notes in parallel can
//! plan concurrently and apply one note at a time.

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

use crate::body::{code_ranges, in_ranges};

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "avif", "tif", "tiff", "ico",
];

static WIKI_EMBED: OnceLock<Regex> = OnceLock::new();
static MARKDOWN_IMAGE: OnceLock<Regex> = OnceLock::new();

fn wiki_embed_regex() -> &'static Regex {
    WIKI_EMBED.get_or_init(|| Regex::new(r"!\[\[([^\[\]\n]+?)\]\]").unwrap())
}

fn markdown_image_regex() -> &'static Regex {
    MARKDOWN_IMAGE.get_or_init(|| {
        Regex::new(
            r#"!\[([^\]\n]*)\]\(\s*(<[^>\n]+>|[^)\s]+)(?:\s+(?:"[^"\n]*"|'[^'\n]*'))?\s*\)"#,
        )
        .unwrap()
    })
}

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("failed to inspect {path}: {source}")]
    Inspect { path: PathBuf, source: io::Error },

    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("no free name for {file} in {dir}")]
    NoFreeName { file: PathBuf, dir: PathBuf },
}

/// Which marker a reference was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefSyntax {
    WikiEmbed,
    Markdown,
}

/// One embedded image marker in a note body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    /// Exact markup, used for replacement.
    pub raw: String,
    /// Byte offset of `raw` in the body.
    pub offset: usize,
    pub syntax: RefSyntax,
    /// Referenced file, URL-decoded with any `#fragment`/`?query` removed.
    pub file: String,
    pub alt: String,
}

impl ResourceRef {
    /// Name the file gets in the target asset directory.
    pub fn target_name(&self) -> String {
        target_file_name(&self.file)
    }
}

/// A reference together with the source file it resolved to, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub reference: ResourceRef,
    pub source: Option<PathBuf>,
}

/// Where copied assets go and how emitted notes link to them.
#[derive(Debug, Clone)]
pub struct AssetTarget {
    pub dir: PathBuf,
    /// URL prefix for a shared static directory; `None` links relative to the note.
    pub link_prefix: Option<String>,
}

impl AssetTarget {
    pub fn bundle(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            link_prefix: None,
        }
    }

    pub fn shared(dir: impl Into<PathBuf>, link_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            link_prefix: Some(link_prefix.into()),
        }
    }

    fn link_for(&self, target: &Path) -> String {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let link = match &self.link_prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), name),
            None => name,
        };
        if link.contains(|c: char| c.is_whitespace() || c == '(' || c == ')') {
            format!("<{link}>")
        } else {
            link
        }
    }
}

/// Target path -> source file that put it there.
pub type AssetClaims = HashMap<PathBuf, PathBuf>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedAsset {
    pub source: PathBuf,
    pub target: PathBuf,
    /// False when an identical file was already in place.
    pub written: bool,
}

/// A reference no candidate directory could satisfy. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedResource {
    pub file: String,
    pub raw: String,
}

impl fmt::Display for UnresolvedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unresolved resource `{}` ({})", self.file, self.raw)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Rewrite {
    pub body: String,
    pub copied: Vec<CopiedAsset>,
    pub unresolved: Vec<UnresolvedResource>,
    /// Link of the first rewritten image, used as a cover.
    pub first_link: Option<String>,
}

/// Find image references in `body`, in the order they appear.
pub fn scan(body: &str) -> Vec<ResourceRef> {
    if !body.contains("![") {
        return Vec::new();
    }
    let skip = code_ranges(body);
    let mut refs = Vec::new();

    for caps in wiki_embed_regex().captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        if in_ranges(&skip, whole.start()) {
            continue;
        }
        let inner = &caps[1];
        let (target, display) = match inner.split_once('|') {
            Some((target, display)) => (target.trim(), Some(display.trim())),
            None => (inner.trim(), None),
        };
        let file = clean_reference(target);
        if !has_image_extension(&file) {
            continue;
        }
        let alt = display
            .filter(|d| !d.is_empty() && !is_size_hint(d))
            .map(str::to_string)
            .unwrap_or_else(|| base_name(&file).to_string());
        refs.push(ResourceRef {
            raw: whole.as_str().to_string(),
            offset: whole.start(),
            syntax: RefSyntax::WikiEmbed,
            file,
            alt,
        });
    }

    for caps in markdown_image_regex().captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        if in_ranges(&skip, whole.start()) {
            continue;
        }
        let dest = caps[2].trim_start_matches('<').trim_end_matches('>');
        if is_external(dest) {
            continue;
        }
        refs.push(ResourceRef {
            raw: whole.as_str().to_string(),
            offset: whole.start(),
            syntax: RefSyntax::Markdown,
            file: clean_reference(dest),
            alt: caps[1].to_string(),
        });
    }

    refs.sort_by_key(|r| r.offset);
    refs
}

/// Find the source file for `file`, searching `dirs` in priority order.
///
/// Within one directory the reference is tried as written first and by its
/// bare file name second; the first directory with a hit wins.
pub fn resolve(file: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let as_written = Path::new(file);
    let bare = Path::new(base_name(file));

    for dir in dirs {
        let direct = dir.join(as_written);
        if direct.is_file() {
            return Some(direct);
        }
        if bare != as_written {
            let by_name = dir.join(bare);
            if by_name.is_file() {
                return Some(by_name);
            }
        }
    }
    None
}

/// Scan and resolve without writing anything.
pub fn plan(body: &str, source_dirs: &[PathBuf]) -> Vec<ResolvedRef> {
    scan(body)
        .into_iter()
        .map(|reference| {
            let source = resolve(&reference.file, source_dirs);
            ResolvedRef { reference, source }
        })
        .collect()
}

/// Copy resolved assets into `target` and substitute their markup in `body`.
///
/// `claims` records which source owns each target file; it is consulted for
/// collisions and updated with every asset this call places. With `dry_run`
/// the names and body are computed but nothing is copied.
pub fn apply(
    body: &str,
    refs: &[ResolvedRef],
    target: &AssetTarget,
    claims: &mut AssetClaims,
    dry_run: bool,
) -> Result<Rewrite, ResourceError> {
    let mut rewrite = Rewrite::default();
    let mut out = String::with_capacity(body.len());
    let mut last = 0;

    for resolved in refs {
        let reference = &resolved.reference;
        let Some(source) = &resolved.source else {
            tracing::warn!(file = %reference.file, "image not found in any asset directory");
            rewrite.unresolved.push(UnresolvedResource {
                file: reference.file.clone(),
                raw: reference.raw.clone(),
            });
            continue;
        };

        let (dest, needs_write) = choose_target(source, &reference.target_name(), &target.dir, claims)?;
        claims.insert(dest.clone(), source.clone());

        let already_listed = rewrite.copied.iter().any(|c| c.target == dest);
        if !already_listed {
            let written = needs_write && !dry_run;
            if written {
                copy_asset(source, &dest)?;
                tracing::debug!(from = %source.display(), to = %dest.display(), "copied asset");
            }
            rewrite.copied.push(CopiedAsset {
                source: source.clone(),
                target: dest.clone(),
                written,
            });
        }

        let link = target.link_for(&dest);
        if rewrite.first_link.is_none() {
            rewrite.first_link = Some(link.clone());
        }

        let start = reference.offset;
        let end = start + reference.raw.len();
        if start < last || body.get(start..end) != Some(reference.raw.as_str()) {
            continue;
        }
        out.push_str(&body[last..start]);
        out.push_str(&format!("![{}]({})", reference.alt, link));
        last = end;
    }

    out.push_str(&body[last..]);
    rewrite.body = out;
    Ok(rewrite)
}

/// `plan` followed by `apply`.
pub fn rewrite(
    body: &str,
    source_dirs: &[PathBuf],
    target: &AssetTarget,
    claims: &mut AssetClaims,
) -> Result<Rewrite, ResourceError> {
    let refs = plan(body, source_dirs);
    apply(body, &refs, target, claims, false)
}

/// Copy a single image into `target` and return it with the markdown that
/// links to it.
pub fn attach(
    image: &Path,
    alt: &str,
    target: &AssetTarget,
    claims: &mut AssetClaims,
    dry_run: bool,
) -> Result<(CopiedAsset, String), ResourceError> {
    let name = target_file_name(&image.to_string_lossy());
    let (dest, needs_write) = choose_target(image, &name, &target.dir, claims)?;
    let written = needs_write && !dry_run;
    if written {
        copy_asset(image, &dest)?;
    }
    claims.insert(dest.clone(), image.to_path_buf());

    let markdown = format!("![{}]({})", alt, target.link_for(&dest));
    let copied = CopiedAsset {
        source: image.to_path_buf(),
        target: dest,
        written,
    };
    Ok((copied, markdown))
}

/// File name with whitespace runs replaced by `-`.
pub fn target_file_name(file: &str) -> String {
    base_name(file).split_whitespace().collect::<Vec<_>>().join("-")
}

enum Slot {
    Free,
    Identical,
    Ours,
    Taken,
}

fn choose_target(
    source: &Path,
    name: &str,
    dir: &Path,
    claims: &AssetClaims,
) -> Result<(PathBuf, bool), ResourceError> {
    let primary = dir.join(name);
    if let Some(choice) = usable(source, &primary, claims)? {
        return Ok(choice);
    }

    let by_path = dir.join(disambiguated_name(name, source.to_string_lossy().as_bytes()));
    tracing::info!(
        wanted = %primary.display(),
        using = %by_path.display(),
        "asset name taken by another file"
    );
    if let Some(choice) = usable(source, &by_path, claims)? {
        return Ok(choice);
    }

    let contents = fs::read(source).map_err(|e| ResourceError::Inspect {
        path: source.to_path_buf(),
        source: e,
    })?;
    let by_contents = dir.join(disambiguated_name(name, &contents));
    tracing::warn!(
        wanted = %by_path.display(),
        using = %by_contents.display(),
        "suffixed asset name also taken"
    );
    usable(source, &by_contents, claims)?.ok_or_else(|| ResourceError::NoFreeName {
        file: source.to_path_buf(),
        dir: dir.to_path_buf(),
    })
}

/// `(path, needs_write)` when `target` can hold `source`.
fn usable(
    source: &Path,
    target: &Path,
    claims: &AssetClaims,
) -> Result<Option<(PathBuf, bool)>, ResourceError> {
    Ok(match slot_state(source, target, claims)? {
        Slot::Free | Slot::Ours => Some((target.to_path_buf(), true)),
        Slot::Identical => Some((target.to_path_buf(), false)),
        Slot::Taken => None,
    })
}

fn slot_state(source: &Path, target: &Path, claims: &AssetClaims) -> Result<Slot, ResourceError> {
    let owner = claims.get(target);
    if !target.exists() {
        return Ok(match owner {
            Some(owner) if owner != source => Slot::Taken,
            _ => Slot::Free,
        });
    }
    if same_contents(source, target)? {
        return Ok(Slot::Identical);
    }
    Ok(match owner {
        Some(owner) if owner == source => Slot::Ours,
        _ => Slot::Taken,
    })
}

fn same_contents(a: &Path, b: &Path) -> Result<bool, ResourceError> {
    let read = |path: &Path| {
        fs::read(path).map_err(|source| ResourceError::Inspect {
            path: path.to_path_buf(),
            source,
        })
    };
    let meta_a = fs::metadata(a).map_err(|source| ResourceError::Inspect {
        path: a.to_path_buf(),
        source,
    })?;
    let meta_b = fs::metadata(b).map_err(|source| ResourceError::Inspect {
        path: b.to_path_buf(),
        source,
    })?;
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }
    Ok(read(a)? == read(b)?)
}

fn disambiguated_name(name: &str, key: &[u8]) -> String {
    let hash = blake3::hash(key).to_hex();
    let suffix = &hash.as_str()[..8];
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{suffix}.{ext}"),
        _ => format!("{name}-{suffix}"),
    }
}

fn copy_asset(source: &Path, dest: &Path) -> Result<(), ResourceError> {
    let wrap = |e: io::Error| ResourceError::Copy {
        from: source.to_path_buf(),
        to: dest.to_path_buf(),
        source: e,
    };
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(wrap)?;
    }
    fs::copy(source, dest).map_err(wrap)?;
    Ok(())
}

fn clean_reference(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_query = trimmed
        .split(['#', '?'])
        .next()
        .unwrap_or(trimmed)
        .trim();
    urlencoding::decode(without_query)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| without_query.to_string())
}

fn base_name(file: &str) -> &str {
    file.rsplit(['/', '\\']).next().unwrap_or(file)
}

fn has_image_extension(file: &str) -> bool {
    Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn is_size_hint(display: &str) -> bool {
    let mut parts = display.splitn(2, 'x');
    let width_ok = parts
        .next()
        .is_some_and(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_digit()));
    let height_ok = parts
        .next()
        .map_or(true, |h| !h.is_empty() && h.chars().all(|c| c.is_ascii_digit()));
    width_ok && height_ok
}

fn is_external(dest: &str) -> bool {
    dest.contains("://") || dest.starts_with("data:") || dest.starts_with('/') || dest.starts_with('#')
}
