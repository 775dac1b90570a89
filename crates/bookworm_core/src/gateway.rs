//! crates/bookworm_core/src/gateway.rs
//!
//! The generation gateway: builds the bounded prompt, calls the text provider,
//! and always produces an answer for the chat surface.

use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::MessageRole;
use crate::ports::{AnalyticsStore, ContentStore, HistoryStore, PortError, TextGenerationService};
use crate::prompt::{self, Mode, PromptParts, RequestedMode};

pub const GENERATE_EVENT: &str = "generate";
pub const DEFAULT_DEPTH: &str = "deep";

/// Tunables for prompt assembly.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub system_prompt: String,
    pub canon_char_budget: usize,
    pub canon_doc_limit: i64,
    pub history_limit: i64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            system_prompt: prompt::DEFAULT_SYSTEM_PROMPT.to_string(),
            canon_char_budget: 4000,
            canon_doc_limit: 5,
            history_limit: 18,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateCommand {
    pub user_id: Uuid,
    pub prompt: String,
    pub mode: Option<String>,
    pub depth: Option<String>,
    pub tab: Option<String>,
    pub project_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOutcome {
    pub response: String,
    pub mode: Mode,
    pub tab: String,
    /// False when the text is an upstream error message.
    pub ok: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Prompt must not be empty.")]
    EmptyPrompt,
}

/// The chat-facing text for a provider failure.
pub fn provider_error_message(err: &PortError) -> String {
    format!(
        "⚠ Book Worm hit an error talking to the AI provider.\n\nError type: {}\nDetails: {}",
        err.kind(),
        err.detail()
    )
}

#[derive(Clone)]
pub struct GenerationGateway {
    llm: Arc<dyn TextGenerationService>,
    content: Arc<dyn ContentStore>,
    history: Arc<dyn HistoryStore>,
    analytics: Arc<dyn AnalyticsStore>,
    settings: GatewaySettings,
}

impl GenerationGateway {
    pub fn new(
        llm: Arc<dyn TextGenerationService>,
        content: Arc<dyn ContentStore>,
        history: Arc<dyn HistoryStore>,
        analytics: Arc<dyn AnalyticsStore>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            llm,
            content,
            history,
            analytics,
            settings,
        }
    }

    pub async fn generate(&self, cmd: GenerateCommand) -> Result<GenerateOutcome, GatewayError> {
        let prompt_text = cmd.prompt.trim();
        if prompt_text.is_empty() {
            return Err(GatewayError::EmptyPrompt);
        }

        let requested_raw = cmd.mode.as_deref().unwrap_or("auto");
        let requested = prompt::normalize_mode(requested_raw);
        let mode = prompt::resolve_mode(requested, prompt_text);
        let tab = resolve_tab(cmd.tab.as_deref(), requested);
        let depth = cmd
            .depth
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_DEPTH);

        let canon = self.load_canon(cmd.user_id, cmd.project_id).await;
        let history = self.load_history(cmd.user_id, &tab).await;

        let messages = prompt::assemble_messages(&PromptParts {
            base_instruction: &self.settings.system_prompt,
            mode,
            depth,
            canon: canon.as_deref(),
            history: &history,
            prompt: prompt_text,
        });

        let (response, ok) = match self.llm.complete(&messages).await {
            Ok(text) => (text, true),
            Err(e) => {
                error!("Text generation failed for user {}: {}", cmd.user_id, e);
                (provider_error_message(&e), false)
            }
        };

        self.remember(cmd.user_id, &tab, MessageRole::User, prompt_text).await;
        self.remember(cmd.user_id, &tab, MessageRole::Assistant, &response).await;

        let metadata = json!({
            "mode": mode.as_str(),
            "tab": tab,
            "depth": depth,
            "project_id": cmd.project_id,
            "ok": ok,
        });
        if let Err(e) = self
            .analytics
            .record_event(Some(cmd.user_id), GENERATE_EVENT, &metadata)
            .await
        {
            warn!("Failed to record generate event: {}", e);
        }

        info!("Generated response in mode '{}' (tab '{}', ok={})", mode, tab, ok);
        Ok(GenerateOutcome {
            response,
            mode,
            tab,
            ok,
        })
    }

    async fn load_canon(&self, user_id: Uuid, project_id: Option<i64>) -> Option<String> {
        let project_id = project_id?;
        match self
            .content
            .list_canon_documents(user_id, Some(project_id), Some(self.settings.canon_doc_limit))
            .await
        {
            Ok(docs) => prompt::build_canon_context(&docs, self.settings.canon_char_budget),
            Err(e) => {
                warn!("Failed to load canon for project {}: {}", project_id, e);
                None
            }
        }
    }

    /// Recent history in chronological order.
    async fn load_history(&self, user_id: Uuid, tab: &str) -> Vec<crate::domain::Message> {
        match self
            .history
            .recent_messages(user_id, tab, self.settings.history_limit)
            .await
        {
            Ok(mut newest_first) => {
                newest_first.reverse();
                newest_first
            }
            Err(e) => {
                warn!("Failed to load history for tab '{}': {}", tab, e);
                Vec::new()
            }
        }
    }

    async fn remember(&self, user_id: Uuid, tab: &str, role: MessageRole, content: &str) {
        if let Err(e) = self.history.append_message(user_id, tab, role, content).await {
            warn!("Failed to store {} message: {}", role.as_str(), e);
        }
    }
}

/// The explicit tab wins; otherwise the requested (pre-inference) mode names the tab.
fn resolve_tab(tab: Option<&str>, requested: RequestedMode) -> String {
    match tab.map(str::trim).filter(|t| !t.is_empty()) {
        Some(tab) => tab.to_ascii_lowercase(),
        None => match requested {
            RequestedMode::Auto => "auto".to_string(),
            RequestedMode::Fixed(mode) => mode.as_str().to_string(),
        },
    }
}
