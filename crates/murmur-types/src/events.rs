use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ActiveUser, ChatType, GroupSummary, UnreadCounts};

/// Events sent FROM client TO server over the gateway socket.
///
/// Frames look like `{"event": "send_private_message", "data": {...}}`. Event
/// names and payload field names are part of the client contract and must not
/// be renamed.
///
/// User ids are the UUIDs issued by `/api/auth/register`; a payload carrying
/// any other id format fails to parse and the frame is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Bind this connection to a user. `token` is only checked when the
    /// server runs with token enforcement enabled.
    Authenticate {
        user_id: Uuid,
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    LoadPrivateHistory { user_id: Uuid, other_user_id: Uuid },

    LoadGroupHistory { group_name: String },

    MarkPrivateRead { user_id: Uuid, other_user_id: Uuid },

    MarkGroupRead { user_id: Uuid, group_name: String },

    /// When `to_socket_id` is omitted the target connection is looked up by
    /// `to_user_id`.
    SendPrivateMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_socket_id: Option<Uuid>,
        to_user_id: Uuid,
        message: String,
    },

    /// Payload is the bare group name.
    CreateGroup(String),

    /// Payload is the bare group name.
    JoinGroup(String),

    /// `target_id` is a user id for private chats and a group name for groups.
    TypingStart { target_id: String, chat_type: ChatType },

    TypingStop { target_id: String, chat_type: ChatType },

    SendGroupMessage { group_name: String, message: String },
}

impl ClientEvent {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::LoadPrivateHistory { .. } => "load_private_history",
            Self::LoadGroupHistory { .. } => "load_group_history",
            Self::MarkPrivateRead { .. } => "mark_private_read",
            Self::MarkGroupRead { .. } => "mark_group_read",
            Self::SendPrivateMessage { .. } => "send_private_message",
            Self::CreateGroup(_) => "create_group",
            Self::JoinGroup(_) => "join_group",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::SendGroupMessage { .. } => "send_group_message",
        }
    }
}

/// Events sent FROM server TO client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// First frame on every connection; tells the client its own socket id.
    Connected { socket_id: Uuid },

    UpdateUserList(Vec<ActiveUser>),

    UnreadCounts(UnreadCounts),

    PrivateHistory {
        other_user_id: Uuid,
        messages: Vec<HistoryMessage>,
    },

    GroupHistory {
        group_name: String,
        messages: Vec<HistoryMessage>,
    },

    /// The named user read everything this client sent them.
    MessagesRead { by_user_id: Uuid, by_username: String },

    ReceiveMessage(ChatMessage),

    UpdateGroupList(Vec<GroupSummary>),

    JoinedGroup { group_name: String },

    ShowTypingBubble(TypingBubble),

    HideTypingBubble(TypingBubble),
}

/// A live message as delivered by `receive_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message: String,
    pub from: String,
    pub from_socket_id: Uuid,
    pub from_user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_socket_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
    pub timestamp: DateTime<Utc>,
}

/// A stored message as replayed by `private_history` / `group_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub message: String,
    pub from: String,
    pub from_user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingBubble {
    pub from_username: String,
    pub from_user_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_event_uses_wire_names() {
        let user_id = Uuid::new_v4();
        let other = Uuid::new_v4();
        let raw = json!({
            "event": "mark_private_read",
            "data": { "userId": user_id, "otherUserId": other }
        });

        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(
            event,
            ClientEvent::MarkPrivateRead {
                user_id,
                other_user_id: other
            }
        );
        assert_eq!(event.name(), "mark_private_read");
    }

    #[test]
    fn group_commands_take_bare_name() {
        let event: ClientEvent =
            serde_json::from_value(json!({ "event": "join_group", "data": "rustaceans" })).unwrap();
        assert_eq!(event, ClientEvent::JoinGroup("rustaceans".into()));
    }

    #[test]
    fn authenticate_token_is_optional() {
        let user_id = Uuid::new_v4();
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "authenticate",
            "data": { "userId": user_id, "username": "alice" }
        }))
        .unwrap();

        match event {
            ClientEvent::Authenticate { token, username, .. } => {
                assert!(token.is_none());
                assert_eq!(username, "alice");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn non_uuid_user_ids_are_rejected() {
        let raw = json!({
            "event": "authenticate",
            "data": { "userId": "1", "username": "alice" }
        });
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn typing_payload_parses_chat_type() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "typing_start",
            "data": { "targetId": "lobby", "chatType": "group" }
        }))
        .unwrap();

        assert_eq!(
            event,
            ClientEvent::TypingStart {
                target_id: "lobby".into(),
                chat_type: ChatType::Group
            }
        );
    }

    #[test]
    fn receive_message_omits_absent_fields() {
        let event = ServerEvent::ReceiveMessage(ChatMessage {
            message: "hi".into(),
            from: "alice".into(),
            from_socket_id: Uuid::nil(),
            from_user_id: Uuid::nil(),
            to_user_id: None,
            to_socket_id: None,
            group_name: Some("lobby".into()),
            chat_type: ChatType::Group,
            timestamp: Utc::now(),
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "receive_message");
        assert_eq!(value["data"]["type"], "group");
        assert_eq!(value["data"]["groupName"], "lobby");
        assert!(value["data"].get("toUserId").is_none());
        assert!(value["data"].get("fromSocketId").is_some());
    }

    #[test]
    fn user_list_is_a_bare_array() {
        let event = ServerEvent::UpdateUserList(vec![ActiveUser {
            socket_id: Uuid::nil(),
            username: "bob".into(),
            user_id: Uuid::nil(),
        }]);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "update_user_list");
        assert_eq!(value["data"][0]["username"], "bob");
        assert!(value["data"][0].get("socketId").is_some());
    }
}
