//! Image encoding: rendered page file → base64 for the request body.
//!
//! Pages are rendered to PNG because it is lossless; text crispness matters
//! far more than size for the vision reading. The bytes are sent as-is.

use crate::error::PageStageError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use tracing::debug;

/// Read a rendered page and base64-encode it.
pub async fn encode_image_file(path: &Path) -> Result<String, PageStageError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| PageStageError::Image {
            path: path.to_path_buf(),
            source,
        })?;
    let b64 = STANDARD.encode(&bytes);
    debug!("Encoded {} → {} bytes base64", path.display(), b64.len());
    Ok(b64)
}
