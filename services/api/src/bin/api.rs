//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{Argon2Scheme, DbAdapter, OpenAiChatAdapter, OpenAiImageAdapter, StripeAdapter},
    config::Config,
    error::ApiError,
    web::{
        build_router,
        state::{load_system_prompt, AppState, Providers},
    },
};
use async_openai::{config::OpenAIConfig, Client};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(config.require_openai_api_key()?);
    let openai_client = Client::with_config(openai_config);

    let text_adapter = Arc::new(OpenAiChatAdapter::new(
        openai_client.clone(),
        config.chat_model.clone(),
        config.chat_temperature,
    ));
    let image_adapter = Arc::new(OpenAiImageAdapter::new(
        openai_client,
        config.image_model.clone(),
    ));

    if config.stripe_secret_key.is_none() {
        warn!("STRIPE_SECRET_KEY is not set; checkout requests will fail.");
    }
    if config.stripe_webhook_secret.is_none() {
        warn!("STRIPE_WEBHOOK_SECRET is not set; every webhook delivery will be rejected.");
    }
    let billing_adapter = Arc::new(StripeAdapter::new(
        reqwest::Client::new(),
        config.stripe_secret_key.clone().unwrap_or_default(),
    ));

    // --- 4. Build the Shared AppState ---
    let system_prompt = load_system_prompt(&config.prompts_path);
    let app_state = Arc::new(AppState::new(
        db_adapter,
        config.clone(),
        Providers {
            text: text_adapter,
            images: image_adapter,
            billing: billing_adapter,
            passwords: Arc::new(Argon2Scheme::default()),
        },
        system_prompt,
    ));

    // --- 5. Create the Web Router ---
    let app = build_router(app_state);

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
