use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminates the two conversation shapes. Serialized lowercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Group,
}

/// A persisted chat message.
///
/// The private/group split lives in [`MessageKind`], so a private message can
/// never be missing its receiver and a group message can never carry `is_read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender: Uuid,
    pub sender_username: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageKind {
    Private {
        receiver: Uuid,
        receiver_username: String,
        is_read: bool,
        read_at: Option<DateTime<Utc>>,
    },
    Group {
        group_name: String,
        read_by: Vec<Uuid>,
    },
}

impl Message {
    pub fn chat_type(&self) -> ChatType {
        match self.kind {
            MessageKind::Private { .. } => ChatType::Private,
            MessageKind::Group { .. } => ChatType::Group,
        }
    }
}

/// One entry of the `update_user_list` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUser {
    pub socket_id: Uuid,
    pub username: String,
    pub user_id: Uuid,
}

/// One entry of the `update_group_list` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub group_name: String,
    pub members: Vec<String>,
    pub member_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCounts {
    pub private: Vec<PrivateUnread>,
    pub group: Vec<GroupUnread>,
}

/// Unread private messages from one sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateUnread {
    pub user_id: Uuid,
    pub username: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUnread {
    pub group_name: String,
    pub count: u64,
}

