use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use chirp_shared::{ConversationId, MessageId, NotificationId, PostId, PrincipalId};
use chirp_store::{
    Conversation, ConversationFilter, Message, MessageType, MessagingSettings, Notification,
    Reaction, ReactionAction, SettingsUpdate,
};

use crate::auth::{require_principal, PrincipalResolver};
use crate::config::ServerConfig;
use crate::dispatch::{
    DeleteScope, Dispatcher, OutgoingMedia, OutgoingMessage, ShareReport, ShareTarget,
};
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub resolver: Arc<dyn PrincipalResolver>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let body_limit = state.config.max_media_size + 64 * 1024;

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/messages/conversations",
            post(get_or_create_conversation).get(list_conversations),
        )
        .route(
            "/api/messages/conversations/group",
            post(create_group_conversation),
        )
        .route("/api/messages", post(send_message))
        .route(
            "/api/messages/conversation/:conversation_id",
            get(list_messages),
        )
        .route(
            "/api/messages/conversation/:conversation_id/read",
            put(mark_read),
        )
        .route("/api/messages/share-post", post(share_post))
        .route(
            "/api/messages/share-post-to-followers",
            post(share_post_to_followers),
        )
        .route(
            "/api/messages/followers-for-sharing",
            get(followers_for_sharing),
        )
        .route(
            "/api/messages/settings",
            get(get_settings).put(update_settings),
        )
        .route(
            "/api/messages/:message_id",
            delete(delete_message).put(edit_message),
        )
        .route("/api/messages/:message_id/reactions", post(toggle_reaction))
        .route("/api/notifications", get(list_notifications))
        .route(
            "/api/notifications/mark-all-read",
            patch(mark_all_notifications_read),
        )
        .route(
            "/api/notifications/:notification_id/read",
            patch(mark_notification_read),
        )
        .route(
            "/api/notifications/:notification_id",
            delete(delete_notification),
        )
        .route("/live/ws", get(crate::ws::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response payloads
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    instance: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationRequest {
    participant_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupRequest {
    participant_ids: Vec<String>,
    group_name: Option<String>,
    group_description: Option<String>,
}

#[derive(Deserialize)]
struct ListConversationsQuery {
    #[serde(rename = "type", default)]
    filter: Option<ConversationFilter>,
    #[serde(default)]
    archived: Option<bool>,
}

#[derive(Serialize)]
struct ConversationResponse {
    conversation: Conversation,
}

#[derive(Serialize)]
struct ConversationsResponse {
    conversations: Vec<Conversation>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: Message,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    /// Last-seen timestamp for the pull-based catch-up path.
    since: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    current_page: u32,
    total_pages: u64,
    total_messages: u64,
    has_more: bool,
}

#[derive(Serialize)]
struct MessagesResponse {
    messages: Vec<Message>,
    pagination: Pagination,
}

#[derive(Serialize)]
struct CatchUpResponse {
    messages: Vec<Message>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadResponse {
    conversation_id: ConversationId,
    read_at: DateTime<Utc>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DeleteMessageRequest {
    #[serde(default)]
    delete_for: DeleteScope,
}

#[derive(Deserialize)]
struct EditMessageRequest {
    content: String,
}

#[derive(Deserialize)]
struct ReactionRequest {
    emoji: String,
}

#[derive(Serialize)]
struct ReactionResponse {
    reactions: Vec<Reaction>,
    action: ReactionAction,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SharePostRequest {
    conversation_id: String,
    post_id: String,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShareToFollowersRequest {
    post_id: String,
    follower_ids: Vec<String>,
    message: Option<String>,
}

#[derive(Serialize)]
struct FollowersForSharingResponse {
    followers: Vec<ShareTarget>,
    total: usize,
}

#[derive(Serialize)]
struct SettingsResponse {
    settings: MessagingSettings,
}

#[derive(Deserialize)]
struct ListNotificationsQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationsResponse {
    notifications: Vec<Notification>,
    unread_count: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instance: state.config.instance_name.clone(),
    })
}

async fn get_or_create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateConversationRequest>,
) -> Result<Json<ConversationResponse>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;
    if request.participant_id.trim().is_empty() {
        return Err(ServerError::Validation(
            "participant ID is required".to_string(),
        ));
    }

    let other = PrincipalId::new(request.participant_id);
    let conversation = state
        .dispatcher
        .get_or_create_direct(&principal, &other)
        .await?;

    Ok(Json(ConversationResponse { conversation }))
}

async fn create_group_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<ConversationResponse>), ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;

    let members: Vec<PrincipalId> = request
        .participant_ids
        .iter()
        .map(|id| PrincipalId::new(id.clone()))
        .collect();

    let conversation = state
        .dispatcher
        .create_group(
            &principal,
            &members,
            request.group_name.as_deref(),
            request.group_description.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ConversationResponse { conversation })))
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListConversationsQuery>,
) -> Result<Json<ConversationsResponse>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;

    let conversations = state
        .dispatcher
        .list_conversations(
            &principal,
            query.filter.unwrap_or(ConversationFilter::All),
            query.archived.unwrap_or(false),
        )
        .await?;

    Ok(Json(ConversationsResponse { conversations }))
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<MessageResponse>), ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;

    let mut conversation_id: Option<String> = None;
    let mut content = String::new();
    let mut message_type = MessageType::Text;
    let mut reply_to: Option<MessageId> = None;
    let mut shared_post_id: Option<PostId> = None;
    let mut is_ghost = false;
    let mut ghost_duration_secs: Option<i64> = None;
    let mut media: Option<OutgoingMedia> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::Validation(format!("multipart error: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "media" => {
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let filename = field.file_name().map(|f| f.to_string());
                let bytes = field.bytes().await.map_err(|e| {
                    ServerError::Validation(format!("failed to read media field: {e}"))
                })?;
                media = Some(OutgoingMedia {
                    bytes: bytes.to_vec(),
                    mime_type,
                    filename,
                });
            }
            "conversationId" => conversation_id = Some(text_field(field).await?),
            "content" => content = text_field(field).await?,
            "messageType" => {
                let value = text_field(field).await?;
                message_type = MessageType::parse(&value).ok_or_else(|| {
                    ServerError::Validation(format!("unknown message type: {value}"))
                })?;
            }
            "replyToId" => {
                let value = text_field(field).await?;
                reply_to = Some(parse_message_id(&value)?);
            }
            "isGhost" => {
                let value = text_field(field).await?;
                is_ghost = matches!(value.as_str(), "true" | "1");
            }
            "ghostDuration" => {
                let value = text_field(field).await?;
                let secs = value.parse::<i64>().map_err(|_| {
                    ServerError::Validation(format!("invalid ghost duration: {value}"))
                })?;
                if secs <= 0 {
                    return Err(ServerError::Validation(
                        "ghost duration must be positive".to_string(),
                    ));
                }
                ghost_duration_secs = Some(secs);
            }
            "sharedPostId" => shared_post_id = Some(PostId::new(text_field(field).await?)),
            _ => {}
        }
    }

    let conversation_id = conversation_id
        .ok_or_else(|| ServerError::Validation("conversation ID is required".to_string()))?;
    let conversation_id = parse_conversation_id(&conversation_id)?;

    let message = state
        .dispatcher
        .send_message(
            &principal,
            OutgoingMessage {
                conversation_id,
                content,
                message_type,
                media,
                reply_to,
                shared_post_id,
                is_ghost,
                ghost_duration_secs,
            },
        )
        .await?;

    info!(message = %message.id, conversation = %conversation_id, "message sent");

    Ok((StatusCode::CREATED, Json(MessageResponse { message })))
}

async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<axum::response::Response, ServerError> {
    use axum::response::IntoResponse;

    let principal = require_principal(&headers, state.resolver.as_ref()).await?;
    let conversation_id = parse_conversation_id(&conversation_id)?;

    // Catch-up mode: everything after the client's last-seen timestamp.
    if let Some(since) = query.since {
        let messages = state
            .dispatcher
            .catch_up(&principal, &conversation_id, since)
            .await?;
        return Ok(Json(CatchUpResponse { messages }).into_response());
    }

    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(50);

    let result = state
        .dispatcher
        .list_messages(&principal, &conversation_id, page, page_size)
        .await?;

    let total_pages = result.total.div_ceil(page_size.max(1) as u64);

    Ok(Json(MessagesResponse {
        pagination: Pagination {
            current_page: page,
            total_pages,
            total_messages: result.total,
            has_more: result.has_more,
        },
        messages: result.messages,
    })
    .into_response())
}

async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> Result<Json<MarkReadResponse>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;
    let conversation_id = parse_conversation_id(&conversation_id)?;

    let read_at = state.dispatcher.mark_read(&principal, &conversation_id).await?;

    Ok(Json(MarkReadResponse {
        conversation_id,
        read_at,
    }))
}

async fn delete_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
    body: Option<Json<DeleteMessageRequest>>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;
    let message_id = parse_message_id(&message_id)?;
    let scope = body.map(|Json(b)| b.delete_for).unwrap_or_default();

    state
        .dispatcher
        .soft_delete(&principal, &message_id, scope)
        .await?;

    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn edit_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
    Json(request): Json<EditMessageRequest>,
) -> Result<Json<MessageResponse>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;
    let message_id = parse_message_id(&message_id)?;

    let message = state
        .dispatcher
        .edit_message(&principal, &message_id, &request.content)
        .await?;

    Ok(Json(MessageResponse { message }))
}

async fn toggle_reaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
    Json(request): Json<ReactionRequest>,
) -> Result<Json<ReactionResponse>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;
    let message_id = parse_message_id(&message_id)?;
    if request.emoji.trim().is_empty() {
        return Err(ServerError::Validation("emoji is required".to_string()));
    }

    let (reactions, action) = state
        .dispatcher
        .toggle_reaction(&principal, &message_id, request.emoji.trim())
        .await?;

    Ok(Json(ReactionResponse { reactions, action }))
}

async fn share_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SharePostRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;
    let conversation_id = parse_conversation_id(&request.conversation_id)?;

    let message = state
        .dispatcher
        .share_post(
            &principal,
            &conversation_id,
            &PostId::new(request.post_id),
            request.message.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(MessageResponse { message })))
}

async fn share_post_to_followers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ShareToFollowersRequest>,
) -> Result<Json<ShareReport>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;

    let targets: Vec<PrincipalId> = request
        .follower_ids
        .iter()
        .map(|id| PrincipalId::new(id.clone()))
        .collect();

    let report = state
        .dispatcher
        .share_post_to_followers(
            &principal,
            &PostId::new(request.post_id),
            &targets,
            request.message.as_deref(),
        )
        .await?;

    Ok(Json(report))
}

async fn followers_for_sharing(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<FollowersForSharingResponse>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;

    let followers = state.dispatcher.followers_for_sharing(&principal).await?;
    let total = followers.len();

    Ok(Json(FollowersForSharingResponse { followers, total }))
}

async fn get_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SettingsResponse>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;

    let db = state.dispatcher.database();
    let db = db.lock().await;
    let settings = db.get_or_create_settings(&principal, Utc::now())?;

    Ok(Json(SettingsResponse { settings }))
}

async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<SettingsResponse>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;

    let db = state.dispatcher.database();
    let db = db.lock().await;
    let settings = db.update_settings(&principal, &update, Utc::now())?;

    Ok(Json(SettingsResponse { settings }))
}

async fn list_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<NotificationsResponse>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;

    let db = state.dispatcher.database();
    let db = db.lock().await;
    let notifications = db.list_notifications_for(
        &principal,
        query.limit.unwrap_or(50).clamp(1, 200),
        query.offset.unwrap_or(0),
    )?;
    let unread_count = db.unread_notification_count(&principal)?;

    Ok(Json(NotificationsResponse {
        notifications,
        unread_count,
    }))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(notification_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;
    let notification_id = parse_notification_id(&notification_id)?;

    let db = state.dispatcher.database();
    let db = db.lock().await;
    db.mark_notification_read(&notification_id, &principal)?;

    Ok(Json(serde_json::json!({ "read": true })))
}

async fn mark_all_notifications_read(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;

    let db = state.dispatcher.database();
    let db = db.lock().await;
    let updated = db.mark_all_notifications_read(&principal)?;

    Ok(Json(serde_json::json!({ "updated": updated })))
}

async fn delete_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(notification_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let principal = require_principal(&headers, state.resolver.as_ref()).await?;
    let notification_id = parse_notification_id(&notification_id)?;

    let db = state.dispatcher.database();
    let db = db.lock().await;
    if !db.delete_notification(&notification_id, &principal)? {
        return Err(ServerError::NotFound("notification not found".to_string()));
    }

    Ok(Json(serde_json::json!({ "deleted": true })))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ServerError> {
    field
        .text()
        .await
        .map_err(|e| ServerError::Validation(format!("failed to read field: {e}")))
}

fn parse_conversation_id(s: &str) -> Result<ConversationId, ServerError> {
    ConversationId::parse(s)
        .map_err(|_| ServerError::Validation(format!("invalid conversation id: {s}")))
}

fn parse_message_id(s: &str) -> Result<MessageId, ServerError> {
    MessageId::parse(s).map_err(|_| ServerError::Validation(format!("invalid message id: {s}")))
}

fn parse_notification_id(s: &str) -> Result<NotificationId, ServerError> {
    NotificationId::parse(s)
        .map_err(|_| ServerError::Validation(format!("invalid notification id: {s}")))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
