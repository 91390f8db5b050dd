//! Slug generation for page bundle directories.

use regex::Regex;
use std::sync::OnceLock;
use unicode_segmentation::UnicodeSegmentation;

static DASH_RUNS: OnceLock<Regex> = OnceLock::new();

fn dash_runs() -> &'static Regex {
    DASH_RUNS.get_or_init(|| Regex::new(r"-{2,}").unwrap())
}

/// Convert a note title into the directory name of its page bundle.
///
/// Separators (whitespace, `_`, `/`) become hyphens, punctuation is dropped and
/// letters are lowercased. Non-latin letters survive, so CJK titles keep a
/// readable slug.
///
/// ```
/// use notepress_core::slugify;
///
/// assert_eq!(slugify("Hello World"), "hello-world");
/// assert_eq!(slugify("Rust & Safety"), "rust-safety");
/// assert_eq!(slugify("Go 并发模型"), "go-并发模型");
/// ```
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());

    for grapheme in input.trim().graphemes(true) {
        let Some(first) = grapheme.chars().next() else {
            continue;
        };
        if first.is_whitespace() || matches!(first, '_' | '-' | '/' | '\\') {
            out.push('-');
        } else if first.is_alphanumeric() {
            out.extend(grapheme.chars().flat_map(char::to_lowercase));
        }
    }

    dash_runs()
        .replace_all(&out, "-")
        .trim_matches('-')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("My First Post"), "my-first-post");
    }

    #[test]
    fn test_punctuation_is_dropped() {
        assert_eq!(slugify("C++ Programming"), "c-programming");
        assert_eq!(slugify("Node.js Tips"), "nodejs-tips");
        assert_eq!(slugify("What's new?"), "whats-new");
    }

    #[test]
    fn test_separators_collapse() {
        assert_eq!(slugify("  spaced   out  "), "spaced-out");
        assert_eq!(slugify("snake_case_title"), "snake-case-title");
        assert_eq!(slugify("a / b"), "a-b");
    }

    #[test]
    fn test_non_latin_titles() {
        assert_eq!(slugify("Café"), "café");
        assert_eq!(slugify("读书笔记 2024"), "读书笔记-2024");
    }

    #[test]
    fn test_empty() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("!!!"), "");
    }
}
