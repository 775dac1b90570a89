pub mod admin;
pub mod auth;
pub mod billing;
pub mod extract;
pub mod generate;
pub mod middleware;
pub mod owner;
pub mod rest;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use middleware::{require_access, require_auth, require_owner};
use state::AppState;

pub use rest::ApiDoc;

/// Builds the CORS allow-list. Credentialed requests need explicit origins.
pub fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT])
}

/// Assembles every route with its guard layers, plus Swagger UI.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/signup", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/stripe/webhook", post(billing::webhook_handler));

    // Session routes (auth required)
    let session_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route("/owner/unlock", post(owner::unlock_handler))
        .route("/owner/lock", post(owner::lock_handler))
        .route(
            "/projects",
            get(rest::list_projects_handler).post(rest::create_project_handler),
        )
        .route(
            "/docs",
            get(rest::list_docs_handler).post(rest::create_doc_handler),
        )
        .route("/canon/save", post(rest::create_doc_handler))
        .route("/canon/list", get(rest::list_docs_handler))
        .route("/history", get(rest::history_handler))
        .route(
            "/stripe/create-checkout-session",
            post(billing::create_checkout_handler),
        )
        .route("/stripe/checkout", post(billing::create_checkout_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Paid routes (auth + access policy). The last layer added runs first.
    let paid_routes = Router::new()
        .route("/generate", post(generate::generate_handler))
        .route("/api/generate", post(generate::generate_handler))
        .route("/generate_image", post(generate::generate_image_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_access,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Owner routes (auth + owner flag)
    let admin_routes = Router::new()
        .route("/admin/stats", get(admin::stats_handler))
        .route("/admin/subscribers", get(admin::subscribers_handler))
        .route("/admin/events", get(admin::events_handler))
        .route_layer(axum_middleware::from_fn(require_owner))
        .route_layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let cors = cors_layer(&app_state.config);

    let api_router = Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .merge(paid_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .with_state(app_state);

    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
