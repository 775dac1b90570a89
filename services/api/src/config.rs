//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use bookworm_core::billing::PriceTable;
use std::fmt::Display;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    pub image_model: String,
    pub chat_temperature: f32,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub prices: PriceTable,
    pub public_base_url: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub owner_unlock_code: Option<String>,
    pub owner_emails: Vec<String>,
    pub cors_origins: Vec<String>,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub session_ttl_days: i64,
    pub trial_days: i64,
    pub history_limit: i64,
    pub canon_char_budget: usize,
    pub canon_doc_limit: i64,
}

// Day counts stay far below chrono's `Duration` and `DateTime` limits.
const SESSION_TTL_DAYS_RANGE: RangeInclusive<i64> = 1..=3650;
const TRIAL_DAYS_RANGE: RangeInclusive<i64> = 0..=3650;
const HISTORY_LIMIT_RANGE: RangeInclusive<i64> = 1..=200;
const CANON_CHAR_BUDGET_RANGE: RangeInclusive<usize> = 1..=100_000;
const CANON_DOC_LIMIT_RANGE: RangeInclusive<i64> = 1..=50;
const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=2.0;

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_value<T>(name: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: Display,
{
    match raw {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

fn parsed_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: Display,
{
    parse_value(name, optional_var(name), default)
}

fn check_range<T>(name: &str, value: T, range: RangeInclusive<T>) -> Result<T, ConfigError>
where
    T: PartialOrd + Display,
{
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue(
            name.to_string(),
            format!(
                "{} is outside the allowed range {}..={}",
                value,
                range.start(),
                range.end()
            ),
        ))
    }
}

/// Like `parsed_var`, but rejects values outside `range`.
fn bounded_var<T>(name: &str, default: T, range: RangeInclusive<T>) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Display,
    T::Err: Display,
{
    check_range(name, parsed_var(name, default)?, range)
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a boolean", raw),
        )),
    }
}

fn comma_list(raw: Option<String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            optional_var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:5050".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = optional_var("DATABASE_URL")
            .unwrap_or_else(|| "sqlite://bookworm.db?mode=rwc".to_string());

        let log_level_str = optional_var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = optional_var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./prompts"));

        // --- Load Provider Settings ---
        let openai_api_key = optional_var("OPENAI_API_KEY");
        let chat_model = optional_var("CHAT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let image_model =
            optional_var("IMAGE_MODEL").unwrap_or_else(|| "gpt-image-1".to_string());
        let chat_temperature = bounded_var("CHAT_TEMPERATURE", 0.8_f32, TEMPERATURE_RANGE)?;

        // --- Load Billing Settings ---
        let prices = PriceTable {
            basic: optional_var("STRIPE_PRICE_BASIC"),
            pro: optional_var("STRIPE_PRICE_PRO"),
            patron: optional_var("STRIPE_PRICE_PATRON"),
        };
        let public_base_url = optional_var("PUBLIC_BASE_URL")
            .unwrap_or_else(|| "http://localhost:5050".to_string())
            .trim_end_matches('/')
            .to_string();
        let checkout_success_url = optional_var("CHECKOUT_SUCCESS_URL")
            .unwrap_or_else(|| format!("{}/?checkout=success", public_base_url));
        let checkout_cancel_url = optional_var("CHECKOUT_CANCEL_URL")
            .unwrap_or_else(|| format!("{}/?checkout=cancel", public_base_url));

        // --- Load Auth and Cookie Settings ---
        let cookie_secure = match optional_var("COOKIE_SECURE") {
            Some(raw) => parse_bool("COOKIE_SECURE", &raw)?,
            None => public_base_url.starts_with("https://"),
        };
        let cors_origins = match optional_var("CORS_ORIGINS") {
            Some(raw) => comma_list(Some(raw)),
            None => vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5050".to_string(),
                "http://127.0.0.1:5050".to_string(),
            ],
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            prompts_path,
            openai_api_key,
            chat_model,
            image_model,
            chat_temperature,
            stripe_secret_key: optional_var("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: optional_var("STRIPE_WEBHOOK_SECRET"),
            prices,
            public_base_url,
            checkout_success_url,
            checkout_cancel_url,
            owner_unlock_code: optional_var("OWNER_UNLOCK_CODE"),
            owner_emails: comma_list(optional_var("OWNER_EMAILS")),
            cors_origins,
            cookie_domain: optional_var("COOKIE_DOMAIN"),
            cookie_secure,
            session_ttl_days: bounded_var("SESSION_TTL_DAYS", 30, SESSION_TTL_DAYS_RANGE)?,
            trial_days: bounded_var("TRIAL_DAYS", 30, TRIAL_DAYS_RANGE)?,
            history_limit: bounded_var("HISTORY_LIMIT", 18, HISTORY_LIMIT_RANGE)?,
            canon_char_budget: bounded_var("CANON_CHAR_BUDGET", 4000, CANON_CHAR_BUDGET_RANGE)?,
            canon_doc_limit: bounded_var("CANON_DOC_LIMIT", 5, CANON_DOC_LIMIT_RANGE)?,
        })
    }

    /// The OpenAI key, which the server cannot start without.
    pub fn require_openai_api_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))
    }

    /// A hermetic configuration that never reads the environment.
    pub fn for_tests() -> Self {
        let public_base_url = "http://localhost:5050".to_string();
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url: "sqlite::memory:".to_string(),
            log_level: Level::DEBUG,
            prompts_path: PathBuf::from("./prompts-missing-in-tests"),
            openai_api_key: None,
            chat_model: "test-chat".to_string(),
            image_model: "test-image".to_string(),
            chat_temperature: 0.8,
            stripe_secret_key: None,
            stripe_webhook_secret: Some("whsec_test".to_string()),
            prices: PriceTable {
                basic: Some("price_basic".to_string()),
                pro: Some("price_pro".to_string()),
                patron: Some("price_patron".to_string()),
            },
            checkout_success_url: format!("{}/?checkout=success", public_base_url),
            checkout_cancel_url: format!("{}/?checkout=cancel", public_base_url),
            public_base_url,
            owner_unlock_code: Some("open-sesame".to_string()),
            owner_emails: Vec::new(),
            cors_origins: vec!["http://localhost:3000".to_string()],
            cookie_domain: None,
            cookie_secure: false,
            session_ttl_days: 30,
            trial_days: 30,
            history_limit: 18,
            canon_char_budget: 4000,
            canon_doc_limit: 5,
        }
    }
}
