//! Fan-out dispatching.
//!
//! One send is a single logical transaction with several external effects:
//! permission check, media upload, message persistence, conversation
//! pointer update, notification rows, and live emission. The sequence is
//! fixed, and everything after the message row is written is best-effort:
//! a failed pointer update, notification, or emission is logged and
//! swallowed because the persisted message is the durable contract and
//! must never be lost or hidden by a later step.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use chirp_live::{LiveEvent, PresenceRegistry};
use chirp_shared::{ConversationId, MessageId, PostId, PrincipalId};
use chirp_store::{
    Conversation, ConversationFilter, Database, MarkKind, MediaAttachment, Message, MessagePage,
    MessageType, NewMessage, NewNotification, NotificationKind, Reaction, ReactionAction,
};

use crate::error::ServerError;
use crate::graph::SocialGraph;
use crate::media::{media_kind, MediaStore};
use crate::permissions::can_message;
use crate::posts::PostReader;

/// Ghost lifetime applied when the sender asks for one without a duration.
const DEFAULT_GHOST_DURATION_SECS: i64 = 86_400;

/// Upper bound on a single share-to-followers fan-out.
const MAX_FOLLOWER_SHARES: usize = 20;

/// Raw media riding along with a send, not yet uploaded.
#[derive(Debug, Clone)]
pub struct OutgoingMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: Option<String>,
}

/// A send request after transport decoding, before validation.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub conversation_id: ConversationId,
    pub content: String,
    pub message_type: MessageType,
    pub media: Option<OutgoingMedia>,
    pub reply_to: Option<MessageId>,
    pub shared_post_id: Option<PostId>,
    pub is_ghost: bool,
    pub ghost_duration_secs: Option<i64>,
}

impl OutgoingMessage {
    pub fn text(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            content: content.into(),
            message_type: MessageType::Text,
            media: None,
            reply_to: None,
            shared_post_id: None,
            is_ghost: false,
            ghost_duration_secs: None,
        }
    }
}

/// Scope of a soft delete.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    #[default]
    Me,
    Everyone,
}

/// Tally of a multi-recipient share. Partial failure is reported as data,
/// never as an error: four successes and one refusal is a normal outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareReport {
    pub shared_to: usize,
    pub total_attempted: usize,
    pub successful_shares: Vec<ShareOutcome>,
    pub failed_shares: Vec<ShareFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareOutcome {
    pub principal: PrincipalId,
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareFailure {
    pub principal: PrincipalId,
    pub reason: String,
}

/// A follower the caller may share to, with the request classification a
/// first contact would get.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareTarget {
    pub principal: PrincipalId,
    pub is_request: bool,
}

/// Per-recipient fan-out plan computed before any best-effort step runs.
struct RecipientPlan {
    principal: PrincipalId,
    /// Notification row + `newNotification` event. Mute and notification
    /// toggles gate awareness only; delivery is never gated.
    notify: bool,
}

/// Orchestrates the messaging core over the store, the presence registry,
/// and the external collaborators.
#[derive(Clone)]
pub struct Dispatcher {
    db: Arc<Mutex<Database>>,
    registry: PresenceRegistry,
    graph: Arc<dyn SocialGraph>,
    posts: Arc<dyn PostReader>,
    media: Arc<dyn MediaStore>,
}

impl Dispatcher {
    pub fn new(
        db: Arc<Mutex<Database>>,
        registry: PresenceRegistry,
        graph: Arc<dyn SocialGraph>,
        posts: Arc<dyn PostReader>,
        media: Arc<dyn MediaStore>,
    ) -> Self {
        Self {
            db,
            registry,
            graph,
            posts,
            media,
        }
    }

    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// Find the direct conversation between `current` and `other`,
    /// creating it if absent.
    ///
    /// Creation consults the permission evaluator seeded with `other`'s
    /// settings; a disallowed pairing is `Forbidden` and an allowed one
    /// persists the evaluator's request classification.
    pub async fn get_or_create_direct(
        &self,
        current: &PrincipalId,
        other: &PrincipalId,
    ) -> Result<Conversation, ServerError> {
        if current == other {
            return Err(ServerError::Validation(
                "cannot create a conversation with yourself".to_string(),
            ));
        }

        let (existing, settings) = {
            let db = self.db.lock().await;
            let existing = db.find_direct_conversation(current, other)?;
            let settings = db.get_or_create_settings(other, Utc::now())?;
            (existing, settings)
        };

        if let Some(conversation) = existing {
            return Ok(conversation);
        }

        let decision = can_message(self.graph.as_ref(), current, other, Some(&settings)).await;
        if !decision.allowed {
            return Err(ServerError::Forbidden(
                decision.reason.unwrap_or("messaging not allowed").to_string(),
            ));
        }

        let db = self.db.lock().await;
        let conversation =
            db.insert_direct_conversation(current, other, decision.is_request, Utc::now())?;
        Ok(conversation)
    }

    /// Create a group conversation of `{creator} ∪ members`.
    pub async fn create_group(
        &self,
        creator: &PrincipalId,
        members: &[PrincipalId],
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Conversation, ServerError> {
        let db = self.db.lock().await;
        let conversation =
            db.insert_group_conversation(creator, members, name, description, Utc::now())?;
        Ok(conversation)
    }

    pub async fn list_conversations(
        &self,
        principal: &PrincipalId,
        filter: ConversationFilter,
        archived: bool,
    ) -> Result<Vec<Conversation>, ServerError> {
        let db = self.db.lock().await;
        Ok(db.list_conversations_for(principal, filter, archived)?)
    }

    // ------------------------------------------------------------------
    // Send pipeline
    // ------------------------------------------------------------------

    /// The send pipeline.
    ///
    /// 1. conversation + participant validation
    /// 2. media upload (aborts the send on failure, before any row)
    /// 3. ghost stamping (explicit request or conversation config)
    /// 4. message persistence — the point of no return
    /// 5. activity pointer, notifications, delivery stamps, live events —
    ///    all best-effort
    pub async fn send_message(
        &self,
        sender: &PrincipalId,
        request: OutgoingMessage,
    ) -> Result<Message, ServerError> {
        let now = Utc::now();

        let conversation = {
            let db = self.db.lock().await;
            db.get_conversation(&request.conversation_id)
                .map_err(|e| match e {
                    chirp_store::StoreError::NotFound => {
                        ServerError::NotFound("conversation not found".to_string())
                    }
                    other => other.into(),
                })?
        };
        if !conversation.is_participant(sender) {
            return Err(ServerError::Forbidden(
                "not authorized to send messages in this conversation".to_string(),
            ));
        }

        if let Some(ref post_id) = request.shared_post_id {
            if self.posts.get_post(post_id).await.is_none() {
                return Err(ServerError::NotFound("post not found".to_string()));
            }
        }

        // Upload first: a failed upload must abort before any message row
        // exists, so there is never an orphan message with missing media.
        let media = match request.media {
            Some(ref outgoing) => Some(self.upload_media(outgoing).await?),
            None => None,
        };

        let message_type = resolve_message_type(&request, media.as_ref());

        let (is_ghost, expires_at) = if request.is_ghost {
            let duration = request
                .ghost_duration_secs
                .unwrap_or(DEFAULT_GHOST_DURATION_SECS);
            (true, Some(now + Duration::seconds(duration)))
        } else if conversation.disappearing.enabled {
            (
                true,
                Some(now + Duration::seconds(conversation.disappearing.duration_secs)),
            )
        } else {
            (false, None)
        };

        let message = {
            let db = self.db.lock().await;
            db.insert_message(
                NewMessage {
                    conversation_id: conversation.id,
                    sender: sender.clone(),
                    content: request.content,
                    message_type,
                    media,
                    shared_post_id: request.shared_post_id,
                    reply_to: request.reply_to,
                    forwarded_from: None,
                    is_ghost,
                    expires_at,
                },
                now,
            )?
        };

        // The message row exists; from here on nothing may fail the send.
        let message = self.fan_out(&conversation, message, sender).await;

        Ok(message)
    }

    async fn upload_media(&self, outgoing: &OutgoingMedia) -> Result<MediaAttachment, ServerError> {
        let kind = media_kind(&outgoing.mime_type);
        let uploaded = self
            .media
            .upload(&outgoing.bytes, &outgoing.mime_type, kind)
            .await
            .map_err(|e| ServerError::MediaUploadFailed(e.to_string()))?;

        Ok(MediaAttachment {
            thumbnail: Some(uploaded.url.clone()),
            url: uploaded.url,
            kind: kind.to_string(),
            duration_secs: uploaded.duration_secs,
            size_bytes: Some(uploaded.size_bytes),
            filename: outgoing.filename.clone(),
        })
    }

    /// Steps 5-7: everything downstream of the persisted message.
    async fn fan_out(
        &self,
        conversation: &Conversation,
        message: Message,
        sender: &PrincipalId,
    ) -> Message {
        let now = Utc::now();
        let recipients = conversation.other_participants(sender);

        // Plan notification suppression per recipient before touching
        // anything: each recipient's own mute state and toggles gate that
        // recipient only.
        let plans = {
            let db = self.db.lock().await;

            if let Err(e) = db.touch_activity(&conversation.id, &message.id, now) {
                warn!(
                    conversation = %conversation.id,
                    error = %e,
                    "failed to advance conversation activity pointer; stale until next send"
                );
            }

            let mut plans = Vec::with_capacity(recipients.len());
            for recipient in &recipients {
                plans.push(RecipientPlan {
                    principal: recipient.clone(),
                    notify: self.should_notify(&db, conversation, recipient, now),
                });
            }
            plans
        };

        // Notification rows are independent best-effort writes: one
        // recipient's failure must not block the others.
        for plan in &plans {
            if !plan.notify {
                continue;
            }
            let db = self.db.lock().await;
            if let Err(e) = db.insert_notification(
                NewNotification {
                    from: sender.clone(),
                    to: plan.principal.clone(),
                    kind: NotificationKind::Message,
                    message_id: Some(message.id),
                    conversation_id: Some(conversation.id),
                },
                now,
            ) {
                warn!(
                    recipient = %plan.principal,
                    message = %message.id,
                    error = %e,
                    "failed to create notification record"
                );
            }
        }

        // Delivery stamps for recipients with a live connection.
        for plan in &plans {
            if self.registry.is_online(&plan.principal).await {
                let db = self.db.lock().await;
                if let Err(e) = db.mark_delivered(&message.id, &plan.principal, now) {
                    warn!(
                        recipient = %plan.principal,
                        message = %message.id,
                        error = %e,
                        "failed to record delivery"
                    );
                }
            }
        }

        // Pick up receipts stamped above so the response and the events
        // carry them; fall back to the inserted row if the re-read fails.
        let message = {
            let db = self.db.lock().await;
            db.get_message(&message.id).unwrap_or(message)
        };

        let event = LiveEvent::NewMessage {
            message: message.clone(),
            conversation_id: conversation.id,
        };
        self.registry.emit_to_conversation(&conversation.id, &event).await;

        for plan in &plans {
            self.registry.emit_to_principal(&plan.principal, &event).await;

            if plan.notify {
                self.registry
                    .emit_to_principal(
                        &plan.principal,
                        &LiveEvent::NewNotification {
                            kind: NotificationKind::Message,
                            from: sender.clone(),
                            message: message.clone(),
                            conversation_id: conversation.id,
                            created_at: now,
                        },
                    )
                    .await;
            }
        }

        message
    }

    /// Whether `recipient` should get awareness of this message.
    fn should_notify(
        &self,
        db: &Database,
        conversation: &Conversation,
        recipient: &PrincipalId,
        now: DateTime<Utc>,
    ) -> bool {
        let muted = db
            .is_conversation_muted(recipient, &conversation.id, now)
            .unwrap_or(false)
            || db
                .has_conversation_mark(&conversation.id, recipient, MarkKind::Muted, now)
                .unwrap_or(false);
        if muted {
            return false;
        }

        // No settings row means nothing was ever turned off.
        let Ok(Some(settings)) = db.get_settings(recipient) else {
            return true;
        };

        if conversation.is_message_request
            && conversation.request_status == chirp_store::RequestStatus::Pending
        {
            settings.notifications.message_requests
        } else if conversation.is_group {
            settings.notifications.group_messages
        } else {
            settings.notifications.messages
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// One page of history, oldest-first within the page.
    pub async fn list_messages(
        &self,
        viewer: &PrincipalId,
        conversation_id: &ConversationId,
        page: u32,
        page_size: u32,
    ) -> Result<MessagePage, ServerError> {
        let db = self.db.lock().await;
        let conversation = db.get_conversation(conversation_id)?;
        if !conversation.is_participant(viewer) {
            return Err(ServerError::Forbidden(
                "not authorized to view this conversation".to_string(),
            ));
        }
        Ok(db.list_for_conversation(conversation_id, viewer, page, page_size, Utc::now())?)
    }

    /// Pull-based catch-up: everything since the viewer's last-seen
    /// timestamp. Live pushes are a latency optimization; this is the
    /// correctness fallback.
    pub async fn catch_up(
        &self,
        viewer: &PrincipalId,
        conversation_id: &ConversationId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, ServerError> {
        let db = self.db.lock().await;
        let conversation = db.get_conversation(conversation_id)?;
        if !conversation.is_participant(viewer) {
            return Err(ServerError::Forbidden(
                "not authorized to view this conversation".to_string(),
            ));
        }
        Ok(db.list_since(conversation_id, viewer, since, Utc::now())?)
    }

    // ------------------------------------------------------------------
    // Reactions, receipts, deletion, edits: persist then broadcast
    // ------------------------------------------------------------------

    /// Toggle a reaction, then broadcast the resulting set.
    pub async fn toggle_reaction(
        &self,
        principal: &PrincipalId,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<(Vec<Reaction>, ReactionAction), ServerError> {
        let (conversation_id, reactions, action) = {
            let db = self.db.lock().await;
            let message = db.get_message(message_id)?;
            let conversation = db.get_conversation(&message.conversation_id)?;
            if !conversation.is_participant(principal) {
                return Err(ServerError::Forbidden(
                    "not a participant of this conversation".to_string(),
                ));
            }
            let (reactions, action) =
                db.toggle_reaction(message_id, principal, emoji, Utc::now())?;
            (conversation.id, reactions, action)
        };

        self.registry
            .emit_to_conversation(
                &conversation_id,
                &LiveEvent::MessageReaction {
                    message_id: *message_id,
                    conversation_id,
                    reactions: reactions.clone(),
                    action,
                    principal: principal.clone(),
                    emoji: emoji.to_string(),
                },
            )
            .await;

        Ok((reactions, action))
    }

    /// Mark the conversation read for `principal`, then broadcast.
    /// Idempotent: a client retry after a timeout is safe.
    pub async fn mark_read(
        &self,
        principal: &PrincipalId,
        conversation_id: &ConversationId,
    ) -> Result<DateTime<Utc>, ServerError> {
        let read_at = Utc::now();
        {
            let db = self.db.lock().await;
            let conversation = db.get_conversation(conversation_id)?;
            if !conversation.is_participant(principal) {
                return Err(ServerError::Forbidden(
                    "not a participant of this conversation".to_string(),
                ));
            }
            db.mark_read(conversation_id, principal, read_at)?;
        }

        self.registry
            .emit_to_conversation(
                conversation_id,
                &LiveEvent::MessagesRead {
                    conversation_id: *conversation_id,
                    principal: principal.clone(),
                    read_at,
                },
            )
            .await;

        Ok(read_at)
    }

    /// Soft-delete with the requested scope.
    ///
    /// `Me` hides the message for the caller only and repeat calls are
    /// no-ops; `Everyone` is sender-only and leaves a tombstone. Clients
    /// reconcile through the catch-up read; no event is emitted.
    pub async fn soft_delete(
        &self,
        principal: &PrincipalId,
        message_id: &MessageId,
        scope: DeleteScope,
    ) -> Result<(), ServerError> {
        let db = self.db.lock().await;
        let message = db.get_message(message_id)?;
        let conversation = db.get_conversation(&message.conversation_id)?;
        if !conversation.is_participant(principal) {
            return Err(ServerError::Forbidden(
                "not a participant of this conversation".to_string(),
            ));
        }

        match scope {
            DeleteScope::Me => db.delete_for_me(message_id, principal, Utc::now())?,
            DeleteScope::Everyone => {
                db.delete_for_everyone(message_id, principal, Utc::now())?;
            }
        }
        Ok(())
    }

    /// Edit a message's content. Sender-only; the previous revision is
    /// retained.
    pub async fn edit_message(
        &self,
        principal: &PrincipalId,
        message_id: &MessageId,
        new_content: &str,
    ) -> Result<Message, ServerError> {
        let db = self.db.lock().await;
        Ok(db.edit_message(message_id, principal, new_content, Utc::now())?)
    }

    // ------------------------------------------------------------------
    // Post sharing
    // ------------------------------------------------------------------

    /// Share a post into an existing conversation, with an optional
    /// caption.
    pub async fn share_post(
        &self,
        principal: &PrincipalId,
        conversation_id: &ConversationId,
        post_id: &PostId,
        caption: Option<&str>,
    ) -> Result<Message, ServerError> {
        self.send_message(
            principal,
            OutgoingMessage {
                conversation_id: *conversation_id,
                content: caption.unwrap_or_default().to_string(),
                message_type: MessageType::PostShare,
                media: None,
                reply_to: None,
                shared_post_id: Some(post_id.clone()),
                is_ghost: false,
                ghost_duration_secs: None,
            },
        )
        .await
    }

    /// Share a post to up to [`MAX_FOLLOWER_SHARES`] followers at once.
    ///
    /// Each target is attempted independently: a refusal or failure for
    /// one never blocks or rolls back the others. The outcome is a
    /// structured tally, not a single pass/fail.
    pub async fn share_post_to_followers(
        &self,
        principal: &PrincipalId,
        post_id: &PostId,
        targets: &[PrincipalId],
        caption: Option<&str>,
    ) -> Result<ShareReport, ServerError> {
        if targets.is_empty() {
            return Err(ServerError::Validation(
                "at least one follower must be selected".to_string(),
            ));
        }
        if targets.len() > MAX_FOLLOWER_SHARES {
            return Err(ServerError::Validation(format!(
                "cannot share to more than {MAX_FOLLOWER_SHARES} followers at once"
            )));
        }
        if self.posts.get_post(post_id).await.is_none() {
            return Err(ServerError::NotFound("post not found".to_string()));
        }

        let mut report = ShareReport {
            shared_to: 0,
            total_attempted: targets.len(),
            successful_shares: Vec::new(),
            failed_shares: Vec::new(),
        };

        for target in targets {
            if target == principal {
                report.failed_shares.push(ShareFailure {
                    principal: target.clone(),
                    reason: "cannot share to yourself".to_string(),
                });
                continue;
            }
            if !self.graph.is_following(target, principal).await {
                report.failed_shares.push(ShareFailure {
                    principal: target.clone(),
                    reason: "not one of your followers".to_string(),
                });
                continue;
            }

            match self.share_to_one(principal, target, post_id, caption).await {
                Ok(outcome) => report.successful_shares.push(outcome),
                Err(e) => {
                    warn!(
                        target = %target,
                        post = %post_id,
                        error = %e,
                        "follower share failed"
                    );
                    report.failed_shares.push(ShareFailure {
                        principal: target.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.shared_to = report.successful_shares.len();
        Ok(report)
    }

    async fn share_to_one(
        &self,
        sender: &PrincipalId,
        target: &PrincipalId,
        post_id: &PostId,
        caption: Option<&str>,
    ) -> Result<ShareOutcome, ServerError> {
        let conversation = self.get_or_create_direct(sender, target).await?;
        let message = self
            .share_post(sender, &conversation.id, post_id, caption)
            .await?;

        Ok(ShareOutcome {
            principal: target.clone(),
            conversation_id: conversation.id,
            message_id: message.id,
        })
    }

    /// The caller's followers who would currently accept a share, each
    /// with the request classification a first contact would get.
    pub async fn followers_for_sharing(
        &self,
        principal: &PrincipalId,
    ) -> Result<Vec<ShareTarget>, ServerError> {
        let followers = self.graph.followers_of(principal).await;

        let mut targets = Vec::new();
        for follower in followers {
            let settings = {
                let db = self.db.lock().await;
                db.get_or_create_settings(&follower, Utc::now())?
            };
            let decision =
                can_message(self.graph.as_ref(), principal, &follower, Some(&settings)).await;
            if decision.allowed {
                targets.push(ShareTarget {
                    principal: follower,
                    is_request: decision.is_request,
                });
            }
        }
        Ok(targets)
    }
}

/// Derive the stored message type when the client's is missing or stale:
/// a shared post always wins, then uploaded media reclassifies a bare
/// `text`.
fn resolve_message_type(
    request: &OutgoingMessage,
    media: Option<&MediaAttachment>,
) -> MessageType {
    if request.shared_post_id.is_some() {
        return MessageType::PostShare;
    }
    if request.message_type == MessageType::Text {
        if let Some(media) = media {
            return match media.kind.as_str() {
                "image" => MessageType::Image,
                "video" => MessageType::Video,
                "gif" => MessageType::Gif,
                "voice" => MessageType::Voice,
                _ => MessageType::File,
            };
        }
    }
    request.message_type
}
