//! Fixed system instructions and per-page prompt builders.
//!
//! Both model calls are grounded by the page's parsed text. Where the two
//! sources disagree, parsed text wins: it comes straight from the document
//! structure, while the vision reading may misread glyphs.

/// System instruction for the vision transcription of one page image.
pub const TRANSCRIPTION_SYSTEM_PROMPT: &str = r#"You are an expert document transcriber. You are given the rendered image of one PDF page together with the text that was extracted from the same page by a PDF parser.

Transcribe the page completely:

1. Read every piece of text visible in the image, in the order a human would read it.
2. Use the parsed text as the reference for spelling, numbers and names. When the image and the parsed text disagree, prefer the parsed text.
3. Describe tables, figures and charts that carry information the parsed text lacks.
4. Ignore page numbers, running headers and footers, and decorative elements.
5. Output only the transcription. Do not add commentary."#;

/// System instruction for merging transcription and parsed text into Markdown.
pub const RECONCILIATION_SYSTEM_PROMPT: &str = r#"You are an expert document converter. You are given two readings of the same PDF page: a transcription produced from the page image, and the text extracted by a PDF parser.

Merge them into clean, well-structured Markdown:

1. Preserve all content from both readings. When they conflict, prefer the parsed text.
2. Use # for the page title (at most one), ## and ### for sections.
3. Use - for unordered lists and 1. 2. 3. for ordered lists.
4. Convert tables to GFM pipe tables.
5. Output ONLY the Markdown content.
6. Do NOT wrap the output in a ``` code fence.
7. Do NOT add commentary, explanations or notes about the merge."#;

/// User prompt for the transcription call.
pub fn transcription_prompt(page: usize, parsed_text: &str) -> String {
    format!(
        "Page {page}.\n\nParsed text:\n\"\"\"\n{}\n\"\"\"",
        parsed_or_placeholder(parsed_text)
    )
}

/// User prompt for the reconciliation call.
pub fn reconciliation_prompt(page: usize, transcription: &str, parsed_text: &str) -> String {
    format!(
        "Page {page}.\n\nTranscription:\n\"\"\"\n{}\n\"\"\"\n\nParsed text:\n\"\"\"\n{}\n\"\"\"",
        transcription.trim(),
        parsed_or_placeholder(parsed_text)
    )
}

fn parsed_or_placeholder(parsed_text: &str) -> &str {
    let trimmed = parsed_text.trim();
    if trimmed.is_empty() {
        "(no text could be extracted from this page)"
    } else {
        trimmed
    }
}
