use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::{AuthService, AuthUser};
use crate::blob::BlobStore;
use crate::chat::{ChatService, LiveResult};
use crate::error::{ChatError, ChatResult};
use crate::events::LiveQuery;
use crate::models::*;

pub struct AppState {
    pub chat: Arc<ChatService>,
    pub auth_service: Arc<AuthService>,
    pub blobs: Arc<dyn BlobStore>,
}

type ApiResult = Result<HttpResponse, ChatError>;

fn ok<T: Serialize>(data: T) -> ApiResult {
    Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
}

fn created<T: Serialize>(data: T) -> ApiResult {
    Ok(HttpResponse::Created().json(ApiResponse::success(data)))
}

fn done() -> ApiResult {
    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success(())))
}

// ==================== Health Check ====================

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

// ==================== Auth Endpoints ====================

pub async fn register(state: web::Data<AppState>, body: web::Json<RegisterRequest>) -> ApiResult {
    let response = state
        .auth_service
        .register(&body.name, &body.email, &body.password)?;
    created(response)
}

pub async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> ApiResult {
    ok(state.auth_service.login(&body.email, &body.password)?)
}

pub async fn get_current_user(state: web::Data<AppState>, auth: AuthUser) -> ApiResult {
    ok(state.chat.current_user(&auth.user_id)?)
}

// ==================== Profile & Search ====================

pub async fn update_profile(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<UpdateProfileRequest>,
) -> ApiResult {
    ok(state.chat.update_profile(
        &auth.user_id,
        body.nickname.as_deref(),
        body.profile_photo_ref.as_deref(),
    )?)
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

pub async fn search_users(
    state: web::Data<AppState>,
    auth: AuthUser,
    query: web::Query<SearchQuery>,
) -> ApiResult {
    let q = query.q.as_deref().unwrap_or_default();
    ok(state.chat.search_users(&auth.user_id, q)?)
}

// ==================== Friends & Blocks ====================

pub async fn list_friends(state: web::Data<AppState>, auth: AuthUser) -> ApiResult {
    ok(state.chat.list_friends(&auth.user_id)?)
}

pub async fn list_friend_requests(state: web::Data<AppState>, auth: AuthUser) -> ApiResult {
    ok(state.chat.list_pending_incoming(&auth.user_id)?)
}

pub async fn send_friend_request(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<TargetUserRequest>,
) -> ApiResult {
    let edge = state
        .chat
        .send_friend_request(&auth.user_id, &body.target_user_id)?;
    created(IdResponse { id: edge.id })
}

pub async fn respond_to_friend_request(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<RespondToFriendRequest>,
) -> ApiResult {
    state
        .chat
        .respond_to_friend_request(&auth.user_id, &path.into_inner(), body.accept)?;
    done()
}

pub async fn block_user(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<TargetUserRequest>,
) -> ApiResult {
    let block = state.chat.block_user(&auth.user_id, &body.target_user_id)?;
    created(IdResponse { id: block.id })
}

// ==================== Groups ====================

pub async fn list_groups(state: web::Data<AppState>, auth: AuthUser) -> ApiResult {
    ok(state.chat.list_user_groups(&auth.user_id)?)
}

pub async fn create_group(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<CreateGroupRequest>,
) -> ApiResult {
    let group = state.chat.create_group(
        &auth.user_id,
        &body.name,
        body.description.as_deref(),
        body.is_private,
    )?;
    created(IdResponse { id: group.id })
}

pub async fn list_members(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    ok(state.chat.list_members(&auth.user_id, &path.into_inner())?)
}

pub async fn add_member(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<AddMemberRequest>,
) -> ApiResult {
    state
        .chat
        .add_member(&auth.user_id, &path.into_inner(), &body.user_id)?;
    Ok(HttpResponse::Created().json(ApiResponse::<()>::success(())))
}

pub async fn remove_member(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<(String, String)>,
) -> ApiResult {
    let (group_id, user_id) = path.into_inner();
    state.chat.remove_member(&auth.user_id, &group_id, &user_id)?;
    done()
}

pub async fn leave_group(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    state.chat.leave_group(&auth.user_id, &path.into_inner())?;
    done()
}

pub async fn list_addable_friends(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    ok(state
        .chat
        .list_addable_friends(&auth.user_id, &path.into_inner())?)
}

// ==================== Messages ====================

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<i64>,
}

pub async fn list_group_messages(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    query: web::Query<MessagesQuery>,
) -> ApiResult {
    ok(state
        .chat
        .list_group_messages(&auth.user_id, &path.into_inner(), query.limit)?)
}

pub async fn list_direct_messages(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    query: web::Query<MessagesQuery>,
) -> ApiResult {
    ok(state
        .chat
        .list_direct_messages(&auth.user_id, &path.into_inner(), query.limit)?)
}

pub async fn send_message(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<SendMessageRequest>,
) -> ApiResult {
    let body = body.into_inner();
    let target = MessageTarget::from_parts(body.group_id, body.recipient_id)?;
    let message = state.chat.send_message(
        &auth.user_id,
        &body.content,
        &target,
        body.reply_to_id.as_deref(),
    )?;
    created(IdResponse { id: message.id })
}

pub async fn send_file_message(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<SendFileMessageRequest>,
) -> ApiResult {
    let body = body.into_inner();
    let target = MessageTarget::from_parts(body.group_id, body.recipient_id)?;
    let attachment = FileAttachment {
        file_ref: body.file_ref,
        file_name: body.file_name,
        file_type: body.file_type,
    };
    let message = state.chat.send_file(&auth.user_id, &attachment, &target)?;
    created(IdResponse { id: message.id })
}

pub async fn edit_message(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<EditMessageRequest>,
) -> ApiResult {
    state
        .chat
        .edit_message(&auth.user_id, &path.into_inner(), &body.content)?;
    done()
}

pub async fn delete_message(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> ApiResult {
    state.chat.delete_message(&auth.user_id, &path.into_inner())?;
    done()
}

// ==================== Files ====================

pub async fn create_upload_url(state: web::Data<AppState>, auth: AuthUser) -> ApiResult {
    ok(state.blobs.create_upload(&auth.user_id)?)
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub storage_id: String,
}

/// The ticket in the path is the credential; no bearer token needed
pub async fn upload_file(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: Result<Bytes, actix_web::Error>,
) -> ApiResult {
    // Bodies past the payload limit fail extraction before the blob store sees them
    let body = body.map_err(|e| {
        log::debug!("Rejected upload body: {}", e);
        ChatError::invalid(format!("Upload rejected: {}", e))
    })?;

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let storage_id = state
        .blobs
        .complete_upload(&path.into_inner(), &content_type, body.to_vec())?;
    created(UploadResponse { storage_id })
}

pub async fn get_file(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult {
    let blob = state.blobs.read(&path.into_inner())?;
    Ok(HttpResponse::Ok()
        .content_type(blob.content_type)
        .insert_header((header::CACHE_CONTROL, "public, max-age=31536000, immutable"))
        .body(blob.data))
}

// ==================== Live Queries ====================

#[derive(Debug, Deserialize)]
pub struct LiveParams {
    pub query: String,
    pub group_id: Option<String>,
    pub other_user_id: Option<String>,
}

/// Server-sent events: one `data:` line per evaluation of the query
pub async fn live(
    state: web::Data<AppState>,
    auth: AuthUser,
    params: web::Query<LiveParams>,
) -> ApiResult {
    let params = params.into_inner();
    let query = LiveQuery::from_params(&params.query, params.group_id, params.other_user_id)?;
    let updates = state.chat.watch(&auth.user_id, query)?;

    let body = updates.map(|result| Ok::<_, actix_web::Error>(sse_frame(result)));
    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(body))
}

fn sse_frame(result: ChatResult<LiveResult>) -> Bytes {
    let frame = match result {
        Ok(data) => match serde_json::to_string(&data) {
            Ok(json) => format!("data: {}\n\n", json),
            Err(e) => {
                log::error!("Failed to serialize live result: {}", e);
                error_frame("Failed to serialize result")
            }
        },
        Err(e) => error_frame(&e.to_string()),
    };
    Bytes::from(frame)
}

fn error_frame(message: &str) -> String {
    format!(
        "event: error\ndata: {}\n\n",
        serde_json::json!({ "error": message })
    )
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check
        .route("/health", web::get().to(health))

        // Auth
        .route("/api/auth/register", web::post().to(register))
        .route("/api/auth/login", web::post().to(login))
        .route("/api/auth/me", web::get().to(get_current_user))

        // Profile & search
        .route("/api/profile", web::put().to(update_profile))
        .route("/api/users/search", web::get().to(search_users))

        // Friends & blocks
        .route("/api/friends", web::get().to(list_friends))
        .route("/api/friends/requests", web::get().to(list_friend_requests))
        .route("/api/friends/requests", web::post().to(send_friend_request))
        .route("/api/friends/requests/{id}/respond", web::post().to(respond_to_friend_request))
        .route("/api/blocks", web::post().to(block_user))

        // Groups
        .route("/api/groups", web::get().to(list_groups))
        .route("/api/groups", web::post().to(create_group))
        .route("/api/groups/{id}/members", web::get().to(list_members))
        .route("/api/groups/{id}/members", web::post().to(add_member))
        .route("/api/groups/{id}/members/{user_id}", web::delete().to(remove_member))
        .route("/api/groups/{id}/leave", web::post().to(leave_group))
        .route("/api/groups/{id}/addable-friends", web::get().to(list_addable_friends))
        .route("/api/groups/{id}/messages", web::get().to(list_group_messages))

        // Messages
        .route("/api/direct/{user_id}/messages", web::get().to(list_direct_messages))
        .route("/api/messages", web::post().to(send_message))
        .route("/api/messages/file", web::post().to(send_file_message))
        .route("/api/messages/{id}", web::put().to(edit_message))
        .route("/api/messages/{id}", web::delete().to(delete_message))

        // Files
        .route("/api/files/upload-url", web::post().to(create_upload_url))
        .route("/api/files/upload/{token}", web::post().to(upload_file))
        .route("/api/files/{id}", web::get().to(get_file))

        // Live queries
        .route("/api/live", web::get().to(live));
}
