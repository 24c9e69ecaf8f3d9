//! Messaging permission evaluation.
//!
//! Decides whether a sender may contact a recipient under the recipient's
//! privacy configuration and the current state of the social graph. Free
//! of side effects: callers persist the resulting request classification
//! onto the conversation they create.

use chirp_shared::PrincipalId;
use chirp_store::{MessagingSettings, WhoCanMessage};

use crate::graph::SocialGraph;

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    pub allowed: bool,
    /// When allowed, whether the conversation must start as a pending
    /// message request.
    pub is_request: bool,
    pub reason: Option<&'static str>,
}

impl PermissionDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            is_request: false,
            reason: None,
        }
    }

    fn deny(reason: &'static str) -> Self {
        Self {
            allowed: false,
            is_request: false,
            reason: Some(reason),
        }
    }

    fn allow_as_request(is_request: bool) -> Self {
        Self {
            allowed: true,
            is_request,
            reason: is_request.then_some("Message request sent"),
        }
    }
}

/// Evaluate whether `sender` may message `recipient`.
///
/// A recipient without a settings row allows everything (the deliberate
/// fail-open onboarding default); values a newer or older version might
/// have written are parsed fail-open by the store for the same reason.
///
/// Directionality note: the `following` policy is evaluated exactly as
/// the product behaves — the send is a request unless the *recipient
/// follows the sender*. The edges are read individually; none of the
/// branches assume follow relationships are symmetric.
pub async fn can_message(
    graph: &dyn SocialGraph,
    sender: &PrincipalId,
    recipient: &PrincipalId,
    settings: Option<&MessagingSettings>,
) -> PermissionDecision {
    let Some(settings) = settings else {
        return PermissionDecision::allow();
    };

    // A block wins over every policy, including "everyone".
    if settings.has_blocked(sender) {
        return PermissionDecision::deny("You cannot message this user");
    }

    match settings.who_can_message {
        WhoCanMessage::NoOne => PermissionDecision::deny("This user doesn't accept messages"),

        WhoCanMessage::Everyone => PermissionDecision::allow(),

        WhoCanMessage::Followers => {
            let sender_follows_recipient = graph.is_following(sender, recipient).await;
            PermissionDecision::allow_as_request(!sender_follows_recipient)
        }

        WhoCanMessage::Following => {
            let recipient_follows_sender = graph.is_following(recipient, sender).await;
            PermissionDecision::allow_as_request(!recipient_follows_sender)
        }

        WhoCanMessage::MutualFollowers => {
            let mutual = graph.is_following(sender, recipient).await
                && graph.is_following(recipient, sender).await;
            PermissionDecision::allow_as_request(!mutual)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemorySocialGraph;
    use chrono::Utc;

    fn p(s: &str) -> PrincipalId {
        PrincipalId::new(s)
    }

    fn settings_with(who: WhoCanMessage) -> MessagingSettings {
        let mut settings = MessagingSettings::default_for(p("recipient"), Utc::now());
        settings.who_can_message = who;
        settings
    }

    #[tokio::test]
    async fn missing_settings_fail_open() {
        let graph = InMemorySocialGraph::new();
        let decision = can_message(&graph, &p("sender"), &p("recipient"), None).await;
        assert!(decision.allowed);
        assert!(!decision.is_request);
    }

    #[tokio::test]
    async fn blocked_sender_is_denied_even_under_everyone() {
        let graph = InMemorySocialGraph::new();
        let mut settings = settings_with(WhoCanMessage::Everyone);
        settings.blocked_users.push(chirp_store::BlockedPrincipal {
            principal: p("sender"),
            blocked_at: Utc::now(),
            reason: None,
        });

        let decision = can_message(&graph, &p("sender"), &p("recipient"), Some(&settings)).await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn no_one_denies_regardless_of_follow_state() {
        let graph = InMemorySocialGraph::new();
        graph.follow(&p("sender"), &p("recipient")).await;
        graph.follow(&p("recipient"), &p("sender")).await;

        let settings = settings_with(WhoCanMessage::NoOne);
        let decision = can_message(&graph, &p("sender"), &p("recipient"), Some(&settings)).await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn followers_policy_requests_unless_sender_follows() {
        let graph = InMemorySocialGraph::new();
        let settings = settings_with(WhoCanMessage::Followers);

        // Sender not in recipient's followers: allowed, but as a request.
        let decision = can_message(&graph, &p("sender"), &p("recipient"), Some(&settings)).await;
        assert!(decision.allowed);
        assert!(decision.is_request);

        // Sender follows recipient: a normal conversation.
        graph.follow(&p("sender"), &p("recipient")).await;
        let decision = can_message(&graph, &p("sender"), &p("recipient"), Some(&settings)).await;
        assert!(decision.allowed);
        assert!(!decision.is_request);
    }

    #[tokio::test]
    async fn following_policy_reads_the_reverse_edge() {
        let graph = InMemorySocialGraph::new();
        let settings = settings_with(WhoCanMessage::Following);

        // Sender following recipient is not enough under this policy.
        graph.follow(&p("sender"), &p("recipient")).await;
        let decision = can_message(&graph, &p("sender"), &p("recipient"), Some(&settings)).await;
        assert!(decision.allowed);
        assert!(decision.is_request);

        // The recipient following the sender is what clears the request.
        graph.follow(&p("recipient"), &p("sender")).await;
        let decision = can_message(&graph, &p("sender"), &p("recipient"), Some(&settings)).await;
        assert!(decision.allowed);
        assert!(!decision.is_request);
    }

    #[tokio::test]
    async fn mutual_followers_needs_both_edges() {
        let graph = InMemorySocialGraph::new();
        let settings = settings_with(WhoCanMessage::MutualFollowers);

        graph.follow(&p("sender"), &p("recipient")).await;
        let decision = can_message(&graph, &p("sender"), &p("recipient"), Some(&settings)).await;
        assert!(decision.is_request);

        graph.follow(&p("recipient"), &p("sender")).await;
        let decision = can_message(&graph, &p("sender"), &p("recipient"), Some(&settings)).await;
        assert!(!decision.is_request);
    }
}
