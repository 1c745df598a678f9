//! Transcription stage: the vision model's reading of one page image.
//!
//! Cached per page under [`crate::cache::transcription_key`]. A present
//! entry is used verbatim; otherwise one request is made and its response
//! stored verbatim before the page moves on.

use super::{encode, PageInput, StageContext, Staged};
use crate::cache::transcription_key;
use crate::error::PageStageError;
use crate::model::GenerateRequest;
use crate::prompts::{transcription_prompt, TRANSCRIPTION_SYSTEM_PROMPT};
use tracing::debug;

/// Transcription for `input.page`, from cache or from the model.
pub async fn transcribe(ctx: &StageContext<'_>, input: &PageInput<'_>) -> Result<Staged, PageStageError> {
    let key = transcription_key(ctx.stem, input.page);

    if ctx.cache.exists(&key).await? {
        debug!(page = input.page, "Transcription cache hit: {}", key);
        let text = ctx.cache.read(&key).await?;
        return Ok(Staged { text, cached: true });
    }

    let image = encode::encode_image_file(input.image_path).await?;
    let request = GenerateRequest {
        model: ctx.vision_model.to_string(),
        system: TRANSCRIPTION_SYSTEM_PROMPT.to_string(),
        prompt: transcription_prompt(input.page, input.parsed_text),
        images: vec![image],
    };

    let text = ctx.model.generate(&request).await?;
    ctx.cache.write(&key, &text).await?;
    debug!(page = input.page, len = text.len(), "Transcription stored: {}", key);
    Ok(Staged { text, cached: false })
}
