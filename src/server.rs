//! HTTP surface
//!
//! Every failure is converted to `{"error": "..."}` at this boundary. Client
//! errors carry their message; server-side failures are logged and reported
//! generically.

use actix_cors::Cors;
use actix_web::{http::StatusCode, web, App, HttpResponse, HttpServer, ResponseError};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;

use crate::error::Error;
use crate::orchestrator::ChatService;
use crate::store::Message;

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl std::fmt::Debug for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error = if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
            "Internal server error".to_string()
        } else {
            tracing::warn!("Request rejected: {}", self.0);
            self.0.to_string()
        };
        HttpResponse::build(status).json(ErrorBody { error })
    }
}

type ApiResult = Result<HttpResponse, ApiError>;

// ============================================
// REQUEST / RESPONSE BODIES
// ============================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    pub conversation_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub conversation_id: i64,
    pub reply: String,
    pub is_new_branch: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRequest {
    pub message_id: i64,
    #[serde(default)]
    pub selected_text: String,
    /// Accepted for compatibility; the source message already names its conversation
    #[allow(dead_code)]
    pub conversation_id: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchResponse {
    pub conversation_id: i64,
    pub parent_message_id: i64,
    pub chain: Vec<Message>,
    pub message: String,
}

// ============================================
// HANDLERS
// ============================================

async fn list_conversations(service: web::Data<ChatService>) -> ApiResult {
    let conversations = service.store().list_conversations()?;
    Ok(HttpResponse::Ok().json(conversations))
}

async fn list_messages(service: web::Data<ChatService>, path: web::Path<i64>) -> ApiResult {
    let messages = service.store().list_messages(path.into_inner())?;
    Ok(HttpResponse::Ok().json(messages))
}

async fn conversation_chain(service: web::Data<ChatService>, path: web::Path<i64>) -> ApiResult {
    let chain = service.chain(path.into_inner())?;
    Ok(HttpResponse::Ok().json(chain))
}

async fn chat(service: web::Data<ChatService>, req: web::Json<ChatRequest>) -> ApiResult {
    let req = req.into_inner();
    let outcome = service.chat(&req.message, req.conversation_id).await?;
    Ok(HttpResponse::Ok().json(ChatResponse {
        conversation_id: outcome.conversation_id,
        reply: outcome.reply,
        is_new_branch: outcome.is_new_branch,
    }))
}

async fn branch(service: web::Data<ChatService>, req: web::Json<BranchRequest>) -> ApiResult {
    let outcome = service.branch(req.message_id, &req.selected_text)?;
    Ok(HttpResponse::Ok().json(BranchResponse {
        conversation_id: outcome.conversation_id,
        parent_message_id: outcome.parent_message_id,
        chain: outcome.chain,
        message: "Branch created successfully".to_string(),
    }))
}

/// Route table, shared by the server and the integration tests
pub fn app_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/conversations", web::get().to(list_conversations))
            .route("/conversations/{id}/messages", web::get().to(list_messages))
            .route("/conversations/{id}/chain", web::get().to(conversation_chain))
            .route("/chat", web::post().to(chat))
            .route("/branch", web::post().to(branch)),
    );
}

/// Malformed JSON bodies get the same `{"error": ...}` shape as everything else
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let message = err.to_string();
        actix_web::error::InternalError::from_response(
            err,
            HttpResponse::BadRequest().json(ErrorBody { error: message }),
        )
        .into()
    })
}

pub async fn run_server(service: Arc<ChatService>, host: &str, port: u16) -> io::Result<()> {
    tracing::info!("Server is running on {}:{}", host, port);

    let data = web::Data::from(service);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .app_data(json_config())
            .wrap(Cors::permissive())
            .configure(app_config)
    })
    .bind((host, port))?
    .run()
    .await
}
