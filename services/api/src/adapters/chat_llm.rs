//! services/api/src/adapters/chat_llm.rs
//!
//! This module contains the adapter for the story-writing chat model.
//! It implements the `TextGenerationService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use bookworm_core::ports::{PortError, PortResult, TextGenerationService};
use bookworm_core::prompt::{PromptMessage, PromptRole};
use tracing::debug;

/// Converts a client error into a port error whose kind names the failure class.
pub(crate) fn provider_error(e: OpenAIError) -> PortError {
    match e {
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.clone().unwrap_or_else(|| "ApiError".to_string());
            PortError::upstream(kind, api.message)
        }
        OpenAIError::Reqwest(inner) => PortError::upstream("HttpError", inner.to_string()),
        OpenAIError::JSONDeserialize(inner, _) => {
            PortError::upstream("DeserializeError", inner.to_string())
        }
        OpenAIError::InvalidArgument(message) => PortError::upstream("InvalidArgument", message),
        other => PortError::upstream("ProviderError", other.to_string()),
    }
}

pub struct OpenAiChatAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiChatAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String, temperature: f32) -> Self {
        Self {
            client,
            model,
            temperature,
        }
    }

    fn to_request_message(message: &PromptMessage) -> PortResult<ChatCompletionRequestMessage> {
        let content = message.content.as_str();
        let built = match message.role {
            PromptRole::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(content)
                .build()
                .map(Into::into),
            PromptRole::User => ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()
                .map(Into::into),
            PromptRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(content)
                .build()
                .map(Into::into),
        };
        built.map_err(provider_error)
    }
}

#[async_trait]
impl TextGenerationService for OpenAiChatAdapter {
    async fn complete(&self, messages: &[PromptMessage]) -> PortResult<String> {
        let request_messages = messages
            .iter()
            .map(Self::to_request_message)
            .collect::<PortResult<Vec<_>>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(request_messages)
            .temperature(self.temperature)
            .build()
            .map_err(provider_error)?;

        debug!("Sending {} messages to {}", messages.len(), self.model);
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(provider_error)?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|text| text.trim().to_string())
            .ok_or_else(|| PortError::upstream("EmptyResponse", "The model returned no text."))
    }
}
