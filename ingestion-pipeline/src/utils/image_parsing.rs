use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
    },
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use common::{error::AppError, utils::ingest_limits::DocumentFormat};

use super::file_text_extraction::TextExtractor;

const OCR_PROMPT: &str = r#"Transcribe all text visible in this image verbatim, preserving reading order and paragraph breaks.
Do not describe the image and do not add commentary. If the image contains no readable text, respond with an empty message."#;

/// Text recognition for scanned pages and photos through a vision-capable chat model.
#[derive(Clone)]
pub struct ImageOcrExtractor {
    client: Arc<async_openai::Client<OpenAIConfig>>,
    model: String,
}

impl ImageOcrExtractor {
    pub fn new(client: Arc<async_openai::Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn build_request(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let image_url = format!("data:{};base64,{}", format.as_mime(), STANDARD.encode(bytes));

        CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .max_tokens(6400_u32)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(vec![
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(OCR_PROMPT)
                        .build()?
                        .into(),
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(image_url)
                                .detail(ImageDetail::High)
                                .build()?,
                        )
                        .build()?
                        .into(),
                ])
                .build()?
                .into()])
            .build()
    }
}

fn ocr_error(err: impl std::fmt::Display) -> AppError {
    AppError::Extraction(format!("Image text recognition failed: {err}"))
}

#[async_trait]
impl TextExtractor for ImageOcrExtractor {
    fn name(&self) -> &'static str {
        "ocr"
    }

    async fn extract(&self, bytes: Bytes, format: DocumentFormat) -> Result<String, AppError> {
        if !format.is_image() {
            return Err(ocr_error(format!("{format} is not an image")));
        }

        let request = self.build_request(&bytes, format).map_err(ocr_error)?;
        let response = self.client.chat().create(request).await.map_err(ocr_error)?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ocr_error("no text recognized"));
        }

        Ok(text)
    }
}
