//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use bookworm_core::billing::SubscriptionSynchronizer;
use bookworm_core::credentials::CredentialService;
use bookworm_core::gateway::{GatewaySettings, GenerationGateway};
use bookworm_core::ports::{
    BillingService, DatabaseService, ImageGenerationService, PasswordScheme, TextGenerationService,
};
use bookworm_core::prompt::DEFAULT_SYSTEM_PROMPT;
use bookworm_core::session::SessionManager;
use chrono::Duration;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub const SYSTEM_PROMPT_FILE: &str = "system_prompt.txt";

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub sessions: SessionManager,
    pub credentials: CredentialService,
    pub subscriptions: SubscriptionSynchronizer,
    pub gateway: GenerationGateway,
    pub images: Arc<dyn ImageGenerationService>,
    pub billing: Arc<dyn BillingService>,
}

/// The external collaborators the state is assembled from.
pub struct Providers {
    pub text: Arc<dyn TextGenerationService>,
    pub images: Arc<dyn ImageGenerationService>,
    pub billing: Arc<dyn BillingService>,
    pub passwords: Arc<dyn PasswordScheme>,
}

impl AppState {
    /// Wires the core services over one concrete database adapter.
    pub fn new<D>(db: Arc<D>, config: Arc<Config>, providers: Providers, system_prompt: String) -> Self
    where
        D: DatabaseService + 'static,
    {
        let sessions = SessionManager::new(
            db.clone(),
            db.clone(),
            Duration::days(config.session_ttl_days),
            config.owner_unlock_code.clone(),
        );
        let credentials = CredentialService::new(
            db.clone(),
            db.clone(),
            providers.passwords,
            &config.owner_emails,
        );
        let subscriptions =
            SubscriptionSynchronizer::new(db.clone(), db.clone(), config.prices.clone());
        let gateway = GenerationGateway::new(
            providers.text,
            db.clone(),
            db.clone(),
            db.clone(),
            GatewaySettings {
                system_prompt,
                canon_char_budget: config.canon_char_budget,
                canon_doc_limit: config.canon_doc_limit,
                history_limit: config.history_limit,
            },
        );

        Self {
            db,
            config,
            sessions,
            credentials,
            subscriptions,
            gateway,
            images: providers.images,
            billing: providers.billing,
        }
    }

    pub fn trial_window(&self) -> Duration {
        Duration::days(self.config.trial_days)
    }
}

/// Reads `system_prompt.txt` from the prompts directory, falling back to the built-in prompt.
pub fn load_system_prompt(prompts_path: &Path) -> String {
    let path = prompts_path.join(SYSTEM_PROMPT_FILE);
    match std::fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => {
            info!("Loaded system prompt from {}", path.display());
            text
        }
        Ok(_) => {
            warn!("{} is empty; using the built-in system prompt.", path.display());
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
        Err(_) => DEFAULT_SYSTEM_PROMPT.to_string(),
    }
}
