use std::path::Path;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::ProviderError;
use crate::types::{CompletionRequest, CompletionResponse, ContentPart};

pub mod openai;
pub mod scripted;

/// A chat-completion endpoint that accepts text plus inline images and answers with text.
///
/// Annotation and evaluation both treat the model as an opaque oracle; nothing in the
/// parsing or synthesis layers depends on an implementation of this trait.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    fn name(&self) -> &'static str;
}

/// Reads an image from disk and wraps it as an inline `data:` URL content part.
pub async fn image_part(path: &Path) -> Result<ContentPart, ProviderError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ProviderError::Image {
            path: path.to_path_buf(),
            source,
        })?;
    let mime_type = match path.extension().and_then(|ext| ext.to_str()) {
        Some("png") => "image/png",
        _ => "image/jpeg",
    };
    Ok(ContentPart::image_base64(mime_type, &STANDARD.encode(bytes)))
}
