use std::collections::HashSet;

use uuid::Uuid;

use parley_db::{Database, StoreResult};
use parley_types::events::{LiveView, ViewQuery};
use parley_types::models::Millis;

/// Identity of a piece of stored state a view can depend on. Writers report
/// the keys they touched; subscriptions are indexed by the keys they read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// A user record (profile, presence)
    User(Uuid),
    /// The set of conversations a user belongs to
    Membership(Uuid),
    /// A conversation record together with its messages and reactions
    Conversation(Uuid),
    /// Typing records of a conversation
    Typing(Uuid),
    /// Read receipt of (conversation, user)
    ReadState(Uuid, Uuid),
}

/// A computed view plus everything needed to keep it live.
#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    pub view: LiveView,
    /// Keys read while computing the view.
    pub deps: HashSet<EntityKey>,
    /// The view changes by itself at this instant even without writes.
    pub refresh_at: Option<Millis>,
}

pub fn compute(db: &Database, query: &ViewQuery) -> StoreResult<ViewSnapshot> {
    match *query {
        ViewQuery::ConversationList { user_id } => {
            let list = db.list_conversations_for_user(user_id)?;

            let mut deps = HashSet::from([EntityKey::Membership(user_id), EntityKey::User(user_id)]);
            for summary in &list {
                let id = summary.conversation.id;
                deps.insert(EntityKey::Conversation(id));
                deps.insert(EntityKey::ReadState(id, user_id));
                deps.extend(summary.conversation.participant_ids.iter().map(|p| EntityKey::User(*p)));
            }

            Ok(ViewSnapshot {
                view: LiveView::ConversationList(list),
                deps,
                refresh_at: None,
            })
        }

        ViewQuery::MessageFeed { conversation_id } => {
            let feed = db.list_messages(conversation_id)?;

            let mut deps = HashSet::from([EntityKey::Conversation(conversation_id)]);
            deps.extend(feed.iter().map(|m| EntityKey::User(m.message.sender_id)));

            Ok(ViewSnapshot {
                view: LiveView::MessageFeed(feed),
                deps,
                refresh_at: None,
            })
        }

        ViewQuery::TypingRoster { conversation_id, viewer_id } => {
            let typists = db.active_typists(conversation_id, Some(viewer_id))?;

            // Oldest signal expires first
            let refresh_at = typists
                .iter()
                .map(|t| t.updated_at + db.typing_window_ms())
                .min();

            let mut deps = HashSet::from([EntityKey::Typing(conversation_id)]);
            deps.extend(typists.iter().map(|t| EntityKey::User(t.user.id)));

            Ok(ViewSnapshot {
                view: LiveView::TypingRoster(typists.into_iter().map(|t| t.user).collect()),
                deps,
                refresh_at,
            })
        }
    }
}
