//! Header block parsing and serialization.
//!
//! A note starts with a `---` delimited YAML block. The recognized keys map onto
//! [`HeaderRecord`] fields; every other key is carried in an ordered side
//! mapping so that rewriting a header never loses data.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

use crate::tags::push_unique;

/// Every way a header block can be malformed.
#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("malformed header: no `---` header block at the start of the note")]
    Missing,

    #[error("malformed header: header block is not terminated by a `---` line")]
    Unterminated,

    #[error("malformed header: invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("malformed header: expected a mapping, found {0}")]
    NotAMapping(&'static str),

    #[error("malformed header: field `{field}` {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("failed to render header: {0}")]
    Render(serde_yaml::Error),
}

static HEADER_REGEX: OnceLock<Regex> = OnceLock::new();

fn header_regex() -> &'static Regex {
    HEADER_REGEX.get_or_init(|| {
        Regex::new(r"(?s)\A---[ \t]*\r?\n(?:(.*?)\r?\n)?---[ \t]*(?:\r?\n|\z)(.*)\z").unwrap()
    })
}

/// A header date at the precision the note author wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteDate {
    Day(NaiveDate),
    Local(NaiveDateTime),
    Zoned(DateTime<FixedOffset>),
}

const LOCAL_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

impl NoteDate {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Some(NoteDate::Day(day));
        }
        if let Ok(zoned) = DateTime::parse_from_rfc3339(raw) {
            return Some(NoteDate::Zoned(zoned));
        }
        if let Ok(zoned) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
            return Some(NoteDate::Zoned(zoned));
        }
        LOCAL_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(NoteDate::Local)
    }

    pub fn today() -> Self {
        NoteDate::Day(Local::now().date_naive())
    }

    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        NoteDate::Day(ts.with_timezone(&Local).date_naive())
    }
}

impl fmt::Display for NoteDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteDate::Day(day) => write!(f, "{}", day.format("%Y-%m-%d")),
            NoteDate::Local(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            NoteDate::Zoned(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
        }
    }
}

/// Canonical in-memory form of a note header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeaderRecord {
    pub title: String,
    pub date: Option<NoteDate>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub draft: bool,
    pub publish: bool,
    /// Unrecognized keys, in the order the note declared them.
    pub extra: Mapping,
}

const RECOGNIZED: &[&str] = &[
    "title",
    "date",
    "description",
    "tags",
    "categories",
    "draft",
    "publish",
];

impl HeaderRecord {
    /// Title to emit, falling back to `fallback` (usually the file stem).
    pub fn display_title<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.title.trim().is_empty() {
            fallback
        } else {
            self.title.trim()
        }
    }

    /// Look up an unrecognized key.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    fn from_mapping(mapping: Mapping) -> Result<Self, HeaderError> {
        let mut record = HeaderRecord::default();

        for (key, value) in mapping {
            let Some(name) = key.as_str() else {
                record.extra.insert(key, value);
                continue;
            };
            match name {
                "title" => record.title = scalar_string("title", value)?.unwrap_or_default(),
                "date" => {
                    record.date = match scalar_string("date", value)? {
                        None => None,
                        Some(raw) if raw.trim().is_empty() => None,
                        Some(raw) => Some(NoteDate::parse(&raw).ok_or_else(|| {
                            HeaderError::InvalidField {
                                field: "date",
                                reason: format!("has an unrecognized date format: {raw:?}"),
                            }
                        })?),
                    }
                }
                "description" => record.description = scalar_string("description", value)?,
                "tags" => record.tags = string_list("tags", value)?,
                "categories" => record.categories = string_list("categories", value)?,
                "draft" => record.draft = flag("draft", value)?,
                "publish" => record.publish = flag("publish", value)?,
                _ => {
                    record.extra.insert(key, value);
                }
            }
        }

        Ok(record)
    }

    /// Recognized keys in fixed order, then the unrecognized bag.
    pub fn to_mapping(&self) -> Mapping {
        let mut map = Mapping::new();
        map.insert("title".into(), Value::String(self.title.clone()));
        if let Some(date) = &self.date {
            map.insert("date".into(), Value::String(date.to_string()));
        }
        if let Some(description) = &self.description {
            map.insert("description".into(), Value::String(description.clone()));
        }
        map.insert("tags".into(), string_seq(&self.tags));
        map.insert("categories".into(), string_seq(&self.categories));
        map.insert("draft".into(), Value::Bool(self.draft));
        map.insert("publish".into(), Value::Bool(self.publish));

        for (key, value) in &self.extra {
            let shadowed = key.as_str().is_some_and(|k| RECOGNIZED.contains(&k));
            if !shadowed {
                map.insert(key.clone(), value.clone());
            }
        }
        map
    }
}

/// Split a note into its header record and body.
///
/// ```
/// use notepress_core::header::parse;
///
/// let (header, body) = parse("---\ntitle: Hi\npublish: true\n---\nBody\n").unwrap();
/// assert_eq!(header.title, "Hi");
/// assert!(header.publish);
/// assert_eq!(body, "Body\n");
/// ```
pub fn parse(raw: &str) -> Result<(HeaderRecord, String), HeaderError> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

    let opens_block = raw
        .lines()
        .next()
        .is_some_and(|line| line.trim_end() == "---");
    if !opens_block {
        return Err(HeaderError::Missing);
    }

    let captures = header_regex()
        .captures(raw)
        .ok_or(HeaderError::Unterminated)?;
    let yaml = captures.get(1).map_or("", |m| m.as_str());
    let body = captures.get(2).map_or("", |m| m.as_str());

    let value: Value = if yaml.trim().is_empty() {
        Value::Null
    } else {
        serde_yaml::from_str(yaml)?
    };
    let mapping = match value {
        Value::Mapping(mapping) => mapping,
        Value::Null => Mapping::new(),
        other => return Err(HeaderError::NotAMapping(value_kind(&other))),
    };

    let record = HeaderRecord::from_mapping(mapping)?;
    Ok((record, body.to_string()))
}

/// Render a header block, delimiters included.
pub fn serialize(record: &HeaderRecord) -> Result<String, HeaderError> {
    let yaml = serde_yaml::to_string(&Value::Mapping(record.to_mapping())).map_err(HeaderError::Render)?;
    Ok(format!("---\n{yaml}---\n"))
}

/// Header block followed by the body, exactly as given.
pub fn compose(record: &HeaderRecord, body: &str) -> Result<String, HeaderError> {
    let mut out = serialize(record)?;
    out.push_str(body);
    Ok(out)
}

fn scalar_string(field: &'static str, value: Value) -> Result<Option<String>, HeaderError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(HeaderError::InvalidField {
            field,
            reason: format!("must be a scalar, found {}", value_kind(&other)),
        }),
    }
}

fn string_list(field: &'static str, value: Value) -> Result<Vec<String>, HeaderError> {
    let items = match value {
        Value::Null => Vec::new(),
        Value::Sequence(items) => items,
        scalar => vec![scalar],
    };

    let mut out = Vec::new();
    for item in items {
        if let Some(s) = scalar_string(field, item)? {
            let s = s.trim();
            if !s.is_empty() {
                push_unique(&mut out, s);
            }
        }
    }
    Ok(out)
}

fn flag(field: &'static str, value: Value) -> Result<bool, HeaderError> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" => Ok(true),
            "false" | "no" | "off" | "" => Ok(false),
            _ => Err(HeaderError::InvalidField {
                field,
                reason: format!("must be a boolean, found {s:?}"),
            }),
        },
        other => Err(HeaderError::InvalidField {
            field,
            reason: format!("must be a boolean, found {}", value_kind(&other)),
        }),
    }
}

fn string_seq(items: &[String]) -> Value {
    Value::Sequence(items.iter().cloned().map(Value::String).collect())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
