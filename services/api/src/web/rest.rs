//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the content REST endpoints (projects, canon
//! documents, history) and the master definition for the OpenAPI specification.

use crate::error::HttpError;
use crate::web::extract::ApiJson;
use crate::web::state::AppState;
use crate::web::{admin, auth, billing, generate, owner};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use bookworm_core::domain::{
    CanonDocument, Identity, Message, NewCanonDocument, Project, DEFAULT_CANON_SOURCE,
    DEFAULT_CANON_STATE,
};
use bookworm_core::ports::{ContentStore, HistoryStore, PortError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

pub const DEFAULT_HISTORY_TAB: &str = "auto";
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 200;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        auth::register_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::me_handler,
        owner::unlock_handler,
        owner::lock_handler,
        generate::generate_handler,
        generate::generate_image_handler,
        create_project_handler,
        list_projects_handler,
        create_doc_handler,
        list_docs_handler,
        history_handler,
        billing::create_checkout_handler,
        billing::webhook_handler,
        admin::stats_handler,
        admin::subscribers_handler,
        admin::events_handler,
    ),
    components(
        schemas(
            auth::RegisterRequest,
            auth::LoginRequest,
            auth::AuthResponse,
            auth::MeResponse,
            owner::UnlockRequest,
            owner::OwnerStatusResponse,
            generate::GenerateRequest,
            generate::GenerateResponse,
            generate::GenerateImageRequest,
            generate::GenerateImageResponse,
            CreateProjectRequest,
            ProjectResponse,
            CreateDocRequest,
            DocResponse,
            MessageResponse,
            billing::CheckoutRequestBody,
            billing::CheckoutResponse,
            admin::StatsResponse,
            admin::EventCount,
            admin::SubscriberResponse,
            admin::EventResponse,
        )
    ),
    tags(
        (name = "Book Worm API", description = "Creative writing assistant with canon-aware generation and subscriptions.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ProjectResponse {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// True for projects shared with every user.
    pub global: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Project> for ProjectResponse {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            global: project.owner_id.is_none(),
            name: project.name,
            description: project.description,
            created_at: project.created_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateDocRequest {
    pub project_id: Option<i64>,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub canon_state: Option<String>,
    pub source: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct DocResponse {
    pub id: i64,
    pub project_id: Option<i64>,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub canon_state: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl From<CanonDocument> for DocResponse {
    fn from(doc: CanonDocument) -> Self {
        Self {
            id: doc.id,
            project_id: doc.project_id,
            title: doc.title,
            body: doc.body,
            tags: doc.tags,
            canon_state: doc.canon_state,
            source: doc.source,
            created_at: doc.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content,
            created_at: message.created_at,
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DocsQuery {
    pub project_id: Option<i64>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Defaults to `auto`.
    pub tab: Option<String>,
    /// Defaults to 50, capped at 200.
    pub limit: Option<i64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Loads a project and hides it when it belongs to someone else.
async fn visible_project(
    state: &AppState,
    user_id: Uuid,
    project_id: i64,
) -> Result<Project, HttpError> {
    let not_found = || HttpError::NotFound(format!("Project {} not found.", project_id));
    match state.db.get_project(project_id).await {
        Ok(project) if project.is_visible_to(user_id) => Ok(project),
        Ok(_) | Err(PortError::NotFound(_)) => Err(not_found()),
        Err(e) => Err(e.into()),
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// GET /health - Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// POST /projects - Create a project owned by the caller
#[utoipa::path(
    post,
    path = "/projects",
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created", body = ProjectResponse),
        (status = 400, description = "Missing name"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn create_project_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<CreateProjectRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(HttpError::Validation("Project name is required.".into()));
    }
    let description = non_blank(req.description);

    let project = state
        .db
        .create_project(Some(identity.user_id), name, description.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(ProjectResponse::from(project))))
}

/// GET /projects - The caller's projects plus the global ones
#[utoipa::path(
    get,
    path = "/projects",
    responses(
        (status = 200, description = "Visible projects, newest first", body = [ProjectResponse]),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_projects_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<ProjectResponse>>, HttpError> {
    let projects = state.db.list_projects(identity.user_id).await?;
    Ok(Json(projects.into_iter().map(ProjectResponse::from).collect()))
}

/// POST /docs - Save a canon document (also mounted at /canon/save)
#[utoipa::path(
    post,
    path = "/docs",
    request_body = CreateDocRequest,
    responses(
        (status = 201, description = "Document stored", body = DocResponse),
        (status = 400, description = "Missing title or body"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Project not found")
    )
)]
pub async fn create_doc_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<CreateDocRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let title = req.title.trim().to_string();
    if title.is_empty() || req.body.trim().is_empty() {
        return Err(HttpError::Validation("Title and body are required.".into()));
    }
    if let Some(project_id) = req.project_id {
        visible_project(&state, identity.user_id, project_id).await?;
    }

    let tags = req
        .tags
        .into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();

    let doc = state
        .db
        .create_canon_document(NewCanonDocument {
            project_id: req.project_id,
            owner_id: Some(identity.user_id),
            title,
            body: req.body,
            tags,
            canon_state: non_blank(req.canon_state)
                .unwrap_or_else(|| DEFAULT_CANON_STATE.to_string()),
            source: non_blank(req.source).unwrap_or_else(|| DEFAULT_CANON_SOURCE.to_string()),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(DocResponse::from(doc))))
}

/// GET /docs - Canon documents visible to the caller (also mounted at /canon/list)
#[utoipa::path(
    get,
    path = "/docs",
    params(DocsQuery),
    responses(
        (status = 200, description = "Documents, newest first", body = [DocResponse]),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Project not found")
    )
)]
pub async fn list_docs_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<DocsQuery>,
) -> Result<Json<Vec<DocResponse>>, HttpError> {
    if let Some(project_id) = query.project_id {
        visible_project(&state, identity.user_id, project_id).await?;
    }
    let docs = state
        .db
        .list_canon_documents(identity.user_id, query.project_id, None)
        .await?;
    Ok(Json(docs.into_iter().map(DocResponse::from).collect()))
}

/// GET /history - Recent conversation turns for one tab, oldest first
#[utoipa::path(
    get,
    path = "/history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Chronological messages", body = [MessageResponse]),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageResponse>>, HttpError> {
    let tab = non_blank(query.tab)
        .map(|t| t.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_HISTORY_TAB.to_string());
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let mut messages = state
        .db
        .recent_messages(identity.user_id, &tab, limit)
        .await?;
    messages.reverse();
    Ok(Json(messages.into_iter().map(MessageResponse::from).collect()))
}
