//! Body transforms applied before emission.

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

static CALLOUT_REGEX: OnceLock<Regex> = OnceLock::new();
static CALLOUT_MARKER: OnceLock<Regex> = OnceLock::new();
static SUMMARY_NOISE: OnceLock<Regex> = OnceLock::new();

fn callout_regex() -> &'static Regex {
    CALLOUT_REGEX.get_or_init(|| {
        Regex::new(r"(?m)^>[ \t]?\[!([A-Za-z]+)\][+-]?[ \t]*([^\n]*)(?:\n|\z)((?:^>[^\n]*(?:\n|\z))*)")
            .unwrap()
    })
}

fn callout_marker_regex() -> &'static Regex {
    CALLOUT_MARKER.get_or_init(|| Regex::new(r"(?m)^([ \t]*>[ \t]?)\[![A-Za-z]+\][+-]?").unwrap())
}

/// Wiki embeds and shortcodes, neither of which reads as prose.
fn summary_noise_regex() -> &'static Regex {
    SUMMARY_NOISE.get_or_init(|| Regex::new(r"!\[\[[^\[\]\n]*\]\]|\{\{[<%].*?[%>]\}\}").unwrap())
}

/// Byte ranges of fenced/indented code blocks and inline code spans.
pub fn code_ranges(body: &str) -> Vec<Range<usize>> {
    Parser::new(body)
        .into_offset_iter()
        .filter_map(|(event, range)| match event {
            Event::Start(Tag::CodeBlock(_)) | Event::Code(_) => Some(range),
            _ => None,
        })
        .collect()
}

pub(crate) fn in_ranges(ranges: &[Range<usize>], offset: usize) -> bool {
    ranges.iter().any(|r| r.contains(&offset))
}

/// Turn `> [!TYPE] Title` callouts into Hugo admonition shortcodes.
///
/// ```
/// use notepress_core::body::convert_callouts;
///
/// let out = convert_callouts("> [!TIP] Remember\n> Drink water\n");
/// assert_eq!(
///     out,
///     "{{< admonition type=\"tip\" title=\"Remember\" >}}\nDrink water\n{{< /admonition >}}\n"
/// );
/// ```
pub fn convert_callouts(body: &str) -> String {
    if !body.contains("[!") {
        return body.to_string();
    }

    let skip = code_ranges(body);
    let mut out = String::with_capacity(body.len());
    let mut last = 0;

    for caps in callout_regex().captures_iter(body) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if in_ranges(&skip, whole.start()) {
            continue;
        }

        let kind = caps[1].to_lowercase();
        let title = caps
            .get(2)
            .map(|m| m.as_str().trim())
            .filter(|t| !t.is_empty())
            .map(|t| t.replace('"', "'"))
            .unwrap_or_else(|| capitalize(&kind));
        let content = caps
            .get(3)
            .map_or("", |m| m.as_str())
            .lines()
            .map(|line| {
                line.strip_prefix("> ")
                    .or_else(|| line.strip_prefix('>'))
                    .unwrap_or(line)
            })
            .collect::<Vec<_>>()
            .join("\n");

        out.push_str(&body[last..whole.start()]);
        out.push_str(&format!(
            "{{{{< admonition type=\"{kind}\" title=\"{title}\" >}}}}\n"
        ));
        let content = content.trim_end();
        if !content.is_empty() {
            out.push_str(content);
            out.push('\n');
        }
        out.push_str("{{< /admonition >}}");
        if whole.as_str().ends_with('\n') {
            out.push('\n');
        }
        last = whole.end();
    }

    out.push_str(&body[last..]);
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Plain-text summary of the body, cut on a word boundary.
///
/// Image alt text, wiki embeds, shortcodes and callout markers are left out.
pub fn summarize(body: &str, max_chars: usize) -> Option<String> {
    let cleaned = summary_noise_regex().replace_all(body, "");
    let cleaned = callout_marker_regex().replace_all(&cleaned, "$1");

    let mut text = String::new();
    let mut in_code_block = false;
    let mut image_depth = 0usize;

    for event in Parser::new(&cleaned) {
        match event {
            Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => in_code_block = false,
            Event::Start(Tag::Image { .. }) => image_depth += 1,
            Event::End(TagEnd::Image) => image_depth = image_depth.saturating_sub(1),
            Event::Text(t) | Event::Code(t) if !in_code_block && image_depth == 0 => {
                text.push_str(&t);
                text.push(' ');
            }
            Event::SoftBreak | Event::HardBreak => text.push(' '),
            Event::End(TagEnd::Paragraph) | Event::End(TagEnd::Heading(_)) => text.push(' '),
            _ => {}
        }
    }

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(truncate_words(&collapsed, max_chars))
}

fn truncate_words(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }

    let truncated: String = chars[..max_chars].iter().collect();
    match truncated.rfind(' ') {
        Some(last_space) if last_space > 0 => format!("{}...", &truncated[..last_space]),
        _ => format!("{truncated}..."),
    }
}
