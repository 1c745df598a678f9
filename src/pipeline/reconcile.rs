//! Reconciliation stage: merge transcription and parsed text into Markdown.
//!
//! Cached per page under [`crate::cache::markdown_key`]. The cache is
//! consulted before transcription is even looked up (see
//! [`crate::convert`]), so a page with final Markdown never touches its
//! transcription cache again.

use super::{postprocess, StageContext};
use crate::cache::markdown_key;
use crate::error::PageStageError;
use crate::model::GenerateRequest;
use crate::prompts::{reconciliation_prompt, RECONCILIATION_SYSTEM_PROMPT};
use tracing::debug;

/// Final Markdown for `page` if a previous attempt already stored it.
pub async fn cached_markdown(ctx: &StageContext<'_>, page: usize) -> Result<Option<String>, PageStageError> {
    let key = markdown_key(ctx.stem, page);
    if ctx.cache.exists(&key).await? {
        debug!(page, "Markdown cache hit: {}", key);
        return Ok(Some(ctx.cache.read(&key).await?));
    }
    Ok(None)
}

/// Ask the model for the page's Markdown, post-process it, and store it.
pub async fn reconcile(
    ctx: &StageContext<'_>,
    page: usize,
    transcription: &str,
    parsed_text: &str,
) -> Result<String, PageStageError> {
    let request = GenerateRequest {
        model: ctx.text_model.to_string(),
        system: RECONCILIATION_SYSTEM_PROMPT.to_string(),
        prompt: reconciliation_prompt(page, transcription, parsed_text),
        images: Vec::new(),
    };

    let raw = ctx.model.generate(&request).await?;
    let markdown = postprocess::finalize_page(&raw, page);

    let key = markdown_key(ctx.stem, page);
    ctx.cache.write(&key, &markdown).await?;
    debug!(page, len = markdown.len(), "Markdown stored: {}", key);
    Ok(markdown)
}
