//! Post-processing of reconciled Markdown.
//!
//! Even when told not to, models sometimes wrap their whole answer in a
//! ` ```markdown ... ``` ` fence. The fence markers are removed and nothing
//! else is touched. After that, a page whose Markdown opens with a heading
//! gets a `(Page N)` annotation on that first line, so the assembled
//! document shows where each page begins.

use once_cell::sync::Lazy;
use regex::Regex;

/// Strip an outer fence, then annotate a leading heading with the page.
pub fn finalize_page(raw: &str, page: usize) -> String {
    annotate_heading(&strip_outer_fence(raw), page)
}

static RE_OUTER_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```[ \t]*$").unwrap()
});

/// Remove an outer code fence. Content between the markers is kept verbatim;
/// unfenced input is returned unchanged.
pub fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

/// Append ` (Page N)` to the first line if the text starts with `#`.
pub fn annotate_heading(text: &str, page: usize) -> String {
    if !text.starts_with('#') {
        return text.to_string();
    }
    let line_end = text.find('\n').unwrap_or(text.len());
    let (first, rest) = text.split_at(line_end);
    let (first, cr) = match first.strip_suffix('\r') {
        Some(f) => (f, "\r"),
        None => (first, ""),
    };
    format!("{} (Page {page}){cr}{rest}", first.trim_end())
}
