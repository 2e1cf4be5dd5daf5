//! Cleaning OCR text before it goes to the language model.
//!
//! Multi-page OCR output is full of headers, footers, page numbers and
//! OCR garbage that waste model context and confuse extraction. We strip
//! those, normalize whitespace, and cap the text at a safe length.

use std::sync::LazyLock;

use regex::Regex;

use crate::{extract::PageSet, prelude::*};

/// Maximum text length sent to the language model, in characters. A
/// conservative fraction of the model context window.
const MAX_TEXT_LEN: usize = 15_000;

/// Multi-page heuristic: documents longer than this with a dense line
/// structure probably came from a multi-page PDF even if the page structure
/// was lost.
const MULTIPAGE_MIN_LEN: usize = 5_000;

/// Lines matching any of these are headers, footers, or page numbers.
static NOISE_LINE_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*page\s*\d+\s*$",
        r"(?i)^\s*\d+\s*/\s*\d+\s*$",
        r"^\s*\d+\s*$",
        r"(?i)^\s*confidential\s*$",
        r"(?i)^\s*menu\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("failed to compile regex"))
    .collect()
});

/// Short lines are kept only when they look like a price.
static PRICE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[₹$€£]?\d*\.?\d+$").expect("failed to compile regex")
});

static SPACE_RUN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("failed to compile regex"));

static BLANK_RUN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("failed to compile regex"));

/// OCR garbage and symbols that never belong in a menu.
const ARTIFACTS: &[&str] = &["\u{FFFD}", "http://", "https://", "©", "™", "®"];

/// Does this raw text look like it came from a multi-page document?
///
/// Used by the parsing worker to decide whether the full cleaning pass is
/// worth running. Explicit page structure always wins; otherwise we fall
/// back to a length and line-break-density heuristic.
pub fn looks_multipage(pages: &PageSet) -> bool {
    if pages.is_multipage() {
        return true;
    }
    let text = pages.joined();
    text.len() > MULTIPAGE_MIN_LEN && text.matches('\n').count() > text.len() / 100
}

/// Clean multi-page OCR output for LLM consumption.
#[instrument(level = "debug", skip_all)]
pub fn clean_text(pages: &PageSet) -> String {
    let input = pages.pages().join("\n");
    let input_len = input.len();

    let text = remove_noise_lines(&input);
    let text = remove_artifacts(&text);
    let text = normalize_whitespace(&text);
    let text = smart_truncate(&text);

    debug!(
        input_len,
        output_len = text.len(),
        "Cleaned OCR text for parsing"
    );
    text
}

/// Strip page numbers, repeated headers, and short noise lines.
fn remove_noise_lines(text: &str) -> String {
    let mut clean_lines = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if NOISE_LINE_REGEXES.iter().any(|re| re.is_match(trimmed)) {
            continue;
        }
        // Very short lines are usually OCR noise, unless they are a price.
        if !trimmed.is_empty() && trimmed.len() < 3 && !PRICE_REGEX.is_match(trimmed) {
            continue;
        }
        clean_lines.push(line);
    }
    clean_lines.join("\n")
}

fn remove_artifacts(text: &str) -> String {
    let mut text = text.to_owned();
    for artifact in ARTIFACTS {
        text = text.replace(artifact, "");
    }
    text
}

/// Collapse space runs and limit consecutive blank lines to one.
fn normalize_whitespace(text: &str) -> String {
    let text = SPACE_RUN_REGEX.replace_all(text, " ");
    let text = BLANK_RUN_REGEX.replace_all(&text, "\n\n");
    text.lines()
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate to [`MAX_TEXT_LEN`], preferring a paragraph boundary.
fn smart_truncate(text: &str) -> String {
    if text.len() <= MAX_TEXT_LEN {
        return text.to_owned();
    }

    // Cut on a char boundary first, then back off to a paragraph break if
    // one exists in the second half.
    let mut end = MAX_TEXT_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = &text[..end];
    let truncated = match truncated.rfind("\n\n") {
        Some(idx) if idx > MAX_TEXT_LEN / 2 => &truncated[..idx],
        _ => truncated,
    };
    debug!(
        original_len = text.len(),
        truncated_len = truncated.len(),
        "Truncated over-long OCR text"
    );
    truncated.to_owned()
}
