//! services/api/src/adapters/image_llm.rs
//!
//! Image generation through the OpenAI images endpoint.

use async_openai::{
    config::OpenAIConfig,
    types::images::{CreateImageRequestArgs, Image, ImageModel, ImageQuality, ImageSize},
    Client,
};
use async_trait::async_trait;
use bookworm_core::ports::{ImageGenerationService, ImageRequest, PortError, PortResult};
use tracing::debug;

use crate::adapters::chat_llm::provider_error;

/// Sizes accepted on the wire, in the provider's notation.
pub const SUPPORTED_SIZES: &[&str] = &[
    "1024x1024",
    "1024x1792",
    "1792x1024",
    "1024x1536",
    "1536x1024",
    "auto",
];

pub const SUPPORTED_QUALITIES: &[&str] = &["low", "medium", "high", "auto"];

fn parse_size(size: &str) -> PortResult<ImageSize> {
    match size {
        "1024x1024" => Ok(ImageSize::S1024x1024),
        "1024x1792" => Ok(ImageSize::S1024x1792),
        "1792x1024" => Ok(ImageSize::S1792x1024),
        "1024x1536" => Ok(ImageSize::S1024x1536),
        "1536x1024" => Ok(ImageSize::S1536x1024),
        "auto" => Ok(ImageSize::Auto),
        other => Err(PortError::upstream("InvalidArgument", format!("Unsupported size '{}'", other))),
    }
}

fn parse_quality(quality: &str) -> PortResult<ImageQuality> {
    match quality {
        "low" => Ok(ImageQuality::Low),
        "medium" => Ok(ImageQuality::Medium),
        "high" => Ok(ImageQuality::High),
        "auto" => Ok(ImageQuality::Auto),
        other => Err(PortError::upstream(
            "InvalidArgument",
            format!("Unsupported quality '{}'", other),
        )),
    }
}

fn parse_model(model: &str) -> ImageModel {
    match model {
        "gpt-image-1" => ImageModel::GptImage1,
        "dall-e-3" => ImageModel::DallE3,
        "dall-e-2" => ImageModel::DallE2,
        other => ImageModel::Other(other.to_string()),
    }
}

pub struct OpenAiImageAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiImageAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl ImageGenerationService for OpenAiImageAdapter {
    async fn generate_images(&self, request: &ImageRequest) -> PortResult<Vec<String>> {
        let api_request = CreateImageRequestArgs::default()
            .prompt(request.prompt.as_str())
            .model(parse_model(&self.model))
            .size(parse_size(&request.size)?)
            .quality(parse_quality(&request.quality)?)
            .n(request.n)
            .build()
            .map_err(provider_error)?;

        debug!("Requesting {} image(s) at {}", request.n, request.size);
        let response = self
            .client
            .images()
            .generate(api_request)
            .await
            .map_err(provider_error)?;

        // gpt-image models answer with base64 payloads; those become data URLs.
        Ok(response
            .data
            .iter()
            .map(|image| match image.as_ref() {
                Image::Url { url, .. } => url.clone(),
                Image::B64Json { b64_json, .. } => format!("data:image/png;base64,{}", b64_json),
            })
            .collect())
    }
}
