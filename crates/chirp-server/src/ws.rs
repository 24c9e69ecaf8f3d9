//! Live channel endpoint.
//!
//! One websocket per principal. Connecting registers the principal with
//! the presence registry (announcing `userOnline` unless their settings
//! hide it); the client then drives channel membership and typing relays
//! with small JSON commands, and receives every [`LiveEvent`] routed to
//! it as JSON text frames. Push delivery here is best-effort — clients
//! reconcile through the catch-up read after a reconnect.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use chirp_live::LiveEvent;
use chirp_shared::{ConversationId, PrincipalId};

use crate::api::AppState;
use crate::auth::bearer_token;
use crate::error::ServerError;

#[derive(Deserialize)]
pub struct WsQuery {
    /// Credential for clients that cannot set an Authorization header on
    /// the upgrade request.
    token: Option<String>,
}

/// Commands a connected client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    JoinConversation { conversation_id: String },
    #[serde(rename_all = "camelCase")]
    LeaveConversation { conversation_id: String },
    #[serde(rename_all = "camelCase")]
    Typing {
        conversation_id: String,
        is_typing: bool,
    },
}

pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(query.token)
        .ok_or_else(|| ServerError::Forbidden("missing credentials".to_string()))?;

    let principal = state
        .resolver
        .resolve(&token)
        .await
        .ok_or_else(|| ServerError::Forbidden("invalid credentials".to_string()))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(state, principal, socket)))
}

async fn handle_socket(state: AppState, principal: PrincipalId, socket: WebSocket) {
    let registry = state.dispatcher.registry().clone();
    let mut ticket = registry.register(&principal).await;

    // Announce presence unless the principal hides their online status.
    let announce = {
        let db = state.dispatcher.database();
        let db = db.lock().await;
        match db.get_settings(&principal) {
            Ok(Some(settings)) => settings.show_online_status,
            Ok(None) => true,
            Err(e) => {
                warn!(principal = %principal, error = %e, "failed to load settings for presence announce");
                true
            }
        }
    };
    if announce {
        registry
            .broadcast_except(
                &principal,
                &LiveEvent::UserOnline {
                    principal: principal.clone(),
                },
            )
            .await;
    }

    debug!(principal = %principal, "live channel attached");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = ticket.events.recv() => {
                match event {
                    Some(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(event = event.name(), error = %e, "failed to serialize live event");
                                continue;
                            }
                        };
                        if sink.send(WsMessage::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    // Receiver closed: this connection was replaced by a
                    // newer one for the same principal.
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_command(&state, &principal, &text).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // A stale disconnect (this handle was already replaced) must not evict
    // the fresh mapping or announce a bogus departure.
    if registry.unregister(&principal, ticket.connection_id).await {
        if announce {
            registry
                .broadcast_except(
                    &principal,
                    &LiveEvent::UserOffline {
                        principal: principal.clone(),
                        last_seen: Utc::now(),
                    },
                )
                .await;
        }
        debug!(principal = %principal, "live channel detached");
    }
}

async fn handle_command(state: &AppState, principal: &PrincipalId, text: &str) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(principal = %principal, error = %e, "ignoring malformed client command");
            return;
        }
    };

    let registry = state.dispatcher.registry();

    match command {
        ClientCommand::JoinConversation { conversation_id } => {
            let Some(conversation_id) = parse_conversation(&conversation_id) else {
                return;
            };
            // Only participants may subscribe to a conversation channel.
            let allowed = {
                let db = state.dispatcher.database();
                let db = db.lock().await;
                db.is_participant(&conversation_id, principal).unwrap_or(false)
            };
            if !allowed {
                debug!(principal = %principal, conversation = %conversation_id, "join refused: not a participant");
                return;
            }
            registry.join_conversation(&conversation_id, principal).await;
        }
        ClientCommand::LeaveConversation { conversation_id } => {
            let Some(conversation_id) = parse_conversation(&conversation_id) else {
                return;
            };
            registry.leave_conversation(&conversation_id, principal).await;
        }
        ClientCommand::Typing {
            conversation_id,
            is_typing,
        } => {
            let Some(conversation_id) = parse_conversation(&conversation_id) else {
                return;
            };
            registry
                .emit_to_conversation(
                    &conversation_id,
                    &LiveEvent::UserTyping {
                        principal: principal.clone(),
                        is_typing,
                        conversation_id,
                    },
                )
                .await;
        }
    }
}

fn parse_conversation(s: &str) -> Option<ConversationId> {
    match ConversationId::parse(s) {
        Ok(id) => Some(id),
        Err(_) => {
            debug!(value = s, "ignoring command with invalid conversation id");
            None
        }
    }
}
