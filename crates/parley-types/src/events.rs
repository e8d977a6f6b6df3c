use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConversationSummary, MessageView, User};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is identified
    Ready { user: User },

    /// Fresh value for one of the client's subscriptions
    ViewUpdate {
        subscription_id: Uuid,
        view: LiveView,
    },

    /// A subscription could not be evaluated
    SubscriptionError {
        subscription_id: Uuid,
        message: String,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Bind the connection to a user. Must be the first frame.
    Identify { identity_key: String },

    /// Start a live view. The client picks the id and reuses it to unsubscribe.
    Subscribe {
        subscription_id: Uuid,
        view: ViewQuery,
    },

    Unsubscribe { subscription_id: Uuid },

    /// Keystroke-level typing signal for the identified user
    SetTyping { conversation_id: Uuid, is_typing: bool },

    /// The identified user has the conversation open
    MarkRead { conversation_id: Uuid },
}

/// A derived view a client can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ViewQuery {
    ConversationList { user_id: Uuid },
    MessageFeed { conversation_id: Uuid },
    TypingRoster { conversation_id: Uuid, viewer_id: Uuid },
}

/// The value of a [`ViewQuery`] at some point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum LiveView {
    ConversationList(Vec<ConversationSummary>),
    MessageFeed(Vec<MessageView>),
    TypingRoster(Vec<User>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_command_wire_shape() {
        let sub = Uuid::new_v4();
        let conv = Uuid::new_v4();
        let raw = json!({
            "type": "Subscribe",
            "data": {
                "subscription_id": sub,
                "view": { "kind": "MessageFeed", "conversation_id": conv }
            }
        });

        match serde_json::from_value::<GatewayCommand>(raw).unwrap() {
            GatewayCommand::Subscribe { subscription_id, view } => {
                assert_eq!(subscription_id, sub);
                assert_eq!(view, ViewQuery::MessageFeed { conversation_id: conv });
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn view_update_carries_kind_and_value() {
        let sub = Uuid::nil();
        let event = GatewayEvent::ViewUpdate {
            subscription_id: sub,
            view: LiveView::TypingRoster(vec![]),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "ViewUpdate",
                "data": {
                    "subscription_id": sub,
                    "view": { "kind": "TypingRoster", "value": [] }
                }
            })
        );
    }
}
