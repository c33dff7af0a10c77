use serde::{Deserialize, Serialize};

use crate::store::StoredMessage;

/// The message value fanned out to room members and written to the socket
/// as a JSON text frame.
///
/// `user_id` is the author's id as a string, empty for anonymous or system
/// messages; the frontend ignores fields it does not know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    pub room_id: String,
    pub username: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub is_system: bool,
}

impl From<StoredMessage> for ChatMessage {
    fn from(msg: StoredMessage) -> Self {
        Self {
            content: msg.content,
            room_id: msg.room_id,
            username: msg.username,
            user_id: msg.user_id.unwrap_or_default(),
            is_system: msg.is_system,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_matches_frontend() {
        let msg = ChatMessage {
            content: "hi".into(),
            room_id: "r1".into(),
            username: "ann".into(),
            user_id: String::new(),
            is_system: false,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"], "hi");
        assert_eq!(json["room_id"], "r1");
        assert_eq!(json["username"], "ann");
        assert_eq!(json["user_id"], "");
    }

    #[test]
    fn replayed_message_translates_missing_author_to_empty() {
        let stored = StoredMessage {
            id: "m1".into(),
            room_id: "r1".into(),
            user_id: None,
            username: "ann".into(),
            content: "hello".into(),
            is_system: true,
            created_at: 0,
        };
        let msg = ChatMessage::from(stored);
        assert_eq!(msg.user_id, "");
        assert!(msg.is_system);
    }
}
