//! Database row types. These map directly to SQLite rows.
//! Distinct from murmur-types models to keep the DB layer independent.
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use murmur_types::models::{Message, MessageKind};
use uuid::Uuid;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub kind: String,
    pub sender: String,
    pub sender_username: String,
    pub message: String,
    pub receiver: Option<String>,
    pub receiver_username: Option<String>,
    pub group_name: Option<String>,
    pub is_read: Option<bool>,
    pub read_at: Option<String>,
    pub timestamp: String,
    /// Comma-separated user ids from `message_reads`.
    pub read_by: Option<String>,
}

/// Unread private messages aggregated per sender.
pub struct PrivateUnreadRow {
    pub sender: String,
    pub sender_username: String,
    pub count: i64,
}

pub struct GroupUnreadRow {
    pub group_name: String,
    pub count: i64,
}

/// Timestamps are stored as fixed-width RFC 3339 UTC text so that string
/// order matches time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .with_context(|| format!("Corrupt timestamp '{}'", raw))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Corrupt id '{}'", raw))
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        let kind = match self.kind.as_str() {
            "private" => MessageKind::Private {
                receiver: parse_id(
                    self.receiver
                        .as_deref()
                        .ok_or_else(|| anyhow!("Private message {} has no receiver", self.id))?,
                )?,
                receiver_username: self.receiver_username.unwrap_or_default(),
                is_read: self.is_read.unwrap_or(false),
                read_at: self.read_at.as_deref().map(parse_timestamp).transpose()?,
            },
            "group" => MessageKind::Group {
                group_name: self
                    .group_name
                    .ok_or_else(|| anyhow!("Group message {} has no group name", self.id))?,
                read_by: self
                    .read_by
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .map(|s| s.split(',').map(parse_id).collect::<Result<Vec<_>>>())
                    .transpose()?
                    .unwrap_or_default(),
            },
            other => return Err(anyhow!("Unknown message kind '{}' on {}", other, self.id)),
        };

        Ok(Message {
            id: parse_id(&self.id)?,
            sender: parse_id(&self.sender)?,
            sender_username: self.sender_username,
            message: self.message,
            timestamp: parse_timestamp(&self.timestamp)?,
            kind,
        })
    }
}
