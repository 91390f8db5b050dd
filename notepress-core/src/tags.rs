//! Tag to category mapping.
//!
//! The map lives in a small YAML file next to the config:
//!
//! ```yaml
//! go: programming
//! rust: [programming, systems]
//! ```
//!
//! It is loaded once per run and only mutated through [`TagCategoryMap::extend_unmapped`]
//! and [`TagCategoryMap::learn`], which callers persist explicitly with
//! [`TagCategoryMap::save`].

use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::atomic::write_atomic;

#[derive(Error, Debug)]
pub enum TagMapError {
    #[error("failed to read tag map: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse tag map: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("tag map entry `{0}` must be a category name or a list of names")]
    InvalidEntry(String),
}

/// Push `item` unless an entry equal to it ignoring case is already present.
pub(crate) fn push_unique(list: &mut Vec<String>, item: &str) -> bool {
    let lowered = item.to_lowercase();
    if list.iter().any(|existing| existing.to_lowercase() == lowered) {
        return false;
    }
    list.push(item.to_string());
    true
}

/// Categories derived for one note.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedCategories {
    pub categories: Vec<String>,
    /// Tags with no entry in the map, in note order.
    pub unmapped: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TagCategoryMap {
    entries: BTreeMap<String, Vec<String>>,
}

impl TagCategoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the map from `path`. A missing file is an empty map.
    pub fn load(path: &Path) -> Result<Self, TagMapError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no tag map, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, TagMapError> {
        let value: Value = serde_yaml::from_str(contents)?;
        let mapping = match value {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            _ => return Err(TagMapError::InvalidEntry("<root>".to_string())),
        };

        let mut map = Self::new();
        for (key, value) in mapping {
            let tag = match key {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                other => return Err(TagMapError::InvalidEntry(format!("{other:?}"))),
            };
            let categories = match value {
                Value::String(s) => vec![s],
                Value::Sequence(items) => items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(s),
                        _ => Err(TagMapError::InvalidEntry(tag.clone())),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                _ => return Err(TagMapError::InvalidEntry(tag)),
            };
            for category in categories {
                map.insert(&tag, &category);
            }
        }
        Ok(map)
    }

    /// Persist the map, tags sorted case-insensitively.
    pub fn save(&self, path: &Path) -> Result<(), TagMapError> {
        let mut sorted: Vec<_> = self.entries.iter().collect();
        sorted.sort_by_key(|(tag, _)| tag.to_lowercase());

        let mut mapping = Mapping::new();
        for (tag, categories) in sorted {
            let value = match categories.as_slice() {
                [single] => Value::String(single.clone()),
                many => Value::Sequence(many.iter().cloned().map(Value::String).collect()),
            };
            mapping.insert(Value::String(tag.clone()), value);
        }

        let mut out = String::from("# tag -> category mapping used to derive post categories\n");
        out.push_str(&serde_yaml::to_string(&Value::Mapping(mapping))?);
        write_atomic(path, out.as_bytes())?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(tag, cats)| (tag.as_str(), cats.as_slice()))
    }

    /// Add `category` to `tag`. Returns whether the map changed.
    pub fn insert(&mut self, tag: &str, category: &str) -> bool {
        let key = self.key_for(tag).unwrap_or_else(|| tag.to_string());
        push_unique(self.entries.entry(key).or_default(), category)
    }

    /// Categories for `tag`; exact match first, then ignoring case.
    pub fn lookup(&self, tag: &str) -> Option<&[String]> {
        self.key_for(tag)
            .and_then(|key| self.entries.get(&key))
            .map(Vec::as_slice)
    }

    fn key_for(&self, tag: &str) -> Option<String> {
        if self.entries.contains_key(tag) {
            return Some(tag.to_string());
        }
        let lowered = tag.to_lowercase();
        self.entries
            .keys()
            .find(|key| key.to_lowercase() == lowered)
            .cloned()
    }

    /// Derive categories for a note.
    ///
    /// Explicit categories come first; mapped categories of each tag are
    /// unioned after them in order of first appearance. An unmapped tag
    /// contributes `fallback` when one is given, exactly as if the map held
    /// `tag: fallback`.
    pub fn derive(
        &self,
        tags: &[String],
        explicit: &[String],
        fallback: Option<&str>,
    ) -> DerivedCategories {
        let mut derived = DerivedCategories::default();
        for category in explicit {
            push_unique(&mut derived.categories, category);
        }

        for tag in tags {
            match self.lookup(tag) {
                Some(categories) => {
                    for category in categories {
                        push_unique(&mut derived.categories, category);
                    }
                }
                None => {
                    push_unique(&mut derived.unmapped, tag);
                    if let Some(fallback) = fallback {
                        push_unique(&mut derived.categories, fallback);
                    }
                }
            }
        }
        derived
    }

    /// Record unmapped tags under the fallback bucket. Returns how many were added.
    pub fn extend_unmapped<'a>(
        &mut self,
        tags: impl IntoIterator<Item = &'a String>,
        fallback: &str,
    ) -> usize {
        let mut added = 0;
        for tag in tags {
            if self.lookup(tag).is_none() && self.insert(tag, fallback) {
                added += 1;
            }
        }
        added
    }

    /// Learn mappings for tags the map does not know yet from posts that carry
    /// both tags and categories. Existing entries are left alone.
    pub fn learn<'a, I>(&mut self, posts: I) -> usize
    where
        I: IntoIterator<Item = (&'a [String], &'a [String])>,
    {
        let mut learned: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (tags, categories) in posts {
            if categories.is_empty() {
                continue;
            }
            for tag in tags {
                if self.lookup(tag).is_some() {
                    continue;
                }
                let entry = learned.entry(tag.clone()).or_default();
                for category in categories {
                    push_unique(entry, category);
                }
            }
        }

        let added = learned.len();
        for (tag, categories) in learned {
            if categories.len() > 1 {
                tracing::info!(tag = %tag, ?categories, "tag seen under several categories");
            }
            for category in categories {
                self.insert(&tag, &category);
            }
        }
        added
    }
}
