use crate::Database;
use crate::models::{GroupUnreadRow, MessageRow, PrivateUnreadRow, UserRow, format_timestamp};
use anyhow::Result;
use chrono::{DateTime, Utc};
use murmur_types::models::{Message, MessageKind};
use rusqlite::{Connection, Row};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "m.id, m.kind, m.sender, m.sender_username, m.message, m.receiver,
    m.receiver_username, m.group_name, m.is_read, m.read_at, m.timestamp,
    (SELECT group_concat(r.user_id) FROM message_reads r WHERE r.message_id = m.id)";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password) VALUES (?1, ?2, ?3, ?4)",
                (id, username, email, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_username_by_id(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let name = conn
                .query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(name)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &Message) -> Result<()> {
        let id = msg.id.to_string();
        let sender = msg.sender.to_string();
        let timestamp = format_timestamp(&msg.timestamp);

        self.with_conn(|conn| {
            match &msg.kind {
                MessageKind::Private {
                    receiver,
                    receiver_username,
                    is_read,
                    read_at,
                } => {
                    conn.execute(
                        "INSERT INTO messages
                            (id, kind, sender, sender_username, message,
                             receiver, receiver_username, is_read, read_at, timestamp)
                         VALUES (?1, 'private', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        rusqlite::params![
                            id,
                            sender,
                            msg.sender_username,
                            msg.message,
                            receiver.to_string(),
                            receiver_username,
                            is_read,
                            read_at.as_ref().map(format_timestamp),
                            timestamp,
                        ],
                    )?;
                }
                MessageKind::Group {
                    group_name,
                    read_by,
                } => {
                    conn.execute(
                        "INSERT INTO messages
                            (id, kind, sender, sender_username, message, group_name, timestamp)
                         VALUES (?1, 'group', ?2, ?3, ?4, ?5, ?6)",
                        rusqlite::params![
                            id,
                            sender,
                            msg.sender_username,
                            msg.message,
                            group_name,
                            timestamp,
                        ],
                    )?;
                    for reader in read_by {
                        conn.execute(
                            "INSERT OR IGNORE INTO message_reads (message_id, user_id) VALUES (?1, ?2)",
                            (&id, reader.to_string()),
                        )?;
                    }
                }
            }
            Ok(())
        })
    }

    #[cfg(test)]
    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages m WHERE m.id = ?1", MESSAGE_COLUMNS);
            let row = conn
                .query_row(&sql, [id.to_string()], map_message_row)
                .optional()?;
            row.map(MessageRow::into_message).transpose()
        })
    }

    /// Latest `limit` private messages exchanged between two users, oldest first.
    pub fn get_private_history(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT * FROM (
                    SELECT {}, m.rowid AS seq FROM messages m
                    WHERE m.kind = 'private'
                      AND ((m.sender = ?1 AND m.receiver = ?2) OR (m.sender = ?2 AND m.receiver = ?1))
                    ORDER BY m.timestamp DESC, m.rowid DESC
                    LIMIT ?3
                 ) ORDER BY timestamp ASC, seq ASC",
                MESSAGE_COLUMNS
            );
            query_messages(
                conn,
                &sql,
                rusqlite::params![user_a.to_string(), user_b.to_string(), limit],
            )
        })
    }

    /// Latest `limit` messages posted to a group, oldest first.
    pub fn get_group_history(&self, group_name: &str, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT * FROM (
                    SELECT {}, m.rowid AS seq FROM messages m
                    WHERE m.kind = 'group' AND m.group_name = ?1
                    ORDER BY m.timestamp DESC, m.rowid DESC
                    LIMIT ?2
                 ) ORDER BY timestamp ASC, seq ASC",
                MESSAGE_COLUMNS
            );
            query_messages(conn, &sql, rusqlite::params![group_name, limit])
        })
    }

    /// Flip every unread private message from `sender` to `receiver` to read.
    /// Returns the number of messages updated.
    pub fn mark_private_read(
        &self,
        sender: Uuid,
        receiver: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET is_read = 1, read_at = ?3
                 WHERE kind = 'private' AND sender = ?1 AND receiver = ?2 AND is_read = 0",
                rusqlite::params![
                    sender.to_string(),
                    receiver.to_string(),
                    format_timestamp(&read_at)
                ],
            )?;
            Ok(updated)
        })
    }

    /// Add `reader` to readBy of every message in the group it did not author.
    /// Returns the number of messages newly marked.
    pub fn mark_group_read(&self, group_name: &str, reader: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id)
                 SELECT id, ?2 FROM messages
                 WHERE kind = 'group' AND group_name = ?1 AND sender != ?2",
                rusqlite::params![group_name, reader.to_string()],
            )?;
            Ok(updated)
        })
    }

    // -- Unread aggregates --

    /// Unread private messages addressed to `user_id`, one row per sender.
    /// The reported username is the one on the sender's newest unread message.
    pub fn unread_private_by_sender(&self, user_id: Uuid) -> Result<Vec<PrivateUnreadRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender, sender_username, COUNT(*), MAX(timestamp)
                 FROM messages
                 WHERE kind = 'private' AND receiver = ?1 AND is_read = 0
                 GROUP BY sender
                 ORDER BY MAX(timestamp) DESC",
            )?;

            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok(PrivateUnreadRow {
                        sender: row.get(0)?,
                        sender_username: row.get(1)?,
                        count: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Group messages not authored by `user_id` and absent from its readBy,
    /// one row per group.
    pub fn unread_group_by_name(&self, user_id: Uuid) -> Result<Vec<GroupUnreadRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.group_name, COUNT(*)
                 FROM messages m
                 WHERE m.kind = 'group' AND m.sender != ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM message_reads r
                       WHERE r.message_id = m.id AND r.user_id = ?1
                   )
                 GROUP BY m.group_name
                 ORDER BY m.group_name",
            )?;

            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok(GroupUnreadRow {
                        group_name: row.get(0)?,
                        count: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, email, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        sender: row.get(2)?,
        sender_username: row.get(3)?,
        message: row.get(4)?,
        receiver: row.get(5)?,
        receiver_username: row.get(6)?,
        group_name: row.get(7)?,
        is_read: row.get(8)?,
        read_at: row.get(9)?,
        timestamp: row.get(10)?,
        read_by: row.get(11)?,
    })
}

fn query_messages(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(MessageRow::into_message).collect()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn private(from: Uuid, to: Uuid, text: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender: from,
            sender_username: format!("user-{}", &from.to_string()[..4]),
            message: text.into(),
            timestamp: at,
            kind: MessageKind::Private {
                receiver: to,
                receiver_username: "peer".into(),
                is_read: false,
                read_at: None,
            },
        }
    }

    fn group(from: Uuid, name: &str, text: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender: from,
            sender_username: "member".into(),
            message: text.into(),
            timestamp: at,
            kind: MessageKind::Group {
                group_name: name.into(),
                read_by: vec![],
            },
        }
    }

    #[test]
    fn user_lookup_by_each_key() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, "alice", "alice@example.com", "hash").unwrap();

        assert_eq!(db.get_user_by_username("alice").unwrap().unwrap().id, id);
        assert_eq!(
            db.get_user_by_email("alice@example.com").unwrap().unwrap().username,
            "alice"
        );
        assert_eq!(db.get_user_by_id(&id).unwrap().unwrap().email, "alice@example.com");
        assert_eq!(db.get_username_by_id(&id).unwrap().as_deref(), Some("alice"));
        assert!(db.get_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&Uuid::new_v4().to_string(), "alice", "a@example.com", "h")
            .unwrap();
        assert!(
            db.create_user(&Uuid::new_v4().to_string(), "alice", "b@example.com", "h")
                .is_err()
        );
    }

    #[test]
    fn private_history_covers_both_directions_in_order() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let t0 = Utc::now();

        db.insert_message(&private(a, b, "one", t0)).unwrap();
        db.insert_message(&private(b, a, "two", t0 + Duration::seconds(1))).unwrap();
        db.insert_message(&private(a, c, "elsewhere", t0 + Duration::seconds(2))).unwrap();
        db.insert_message(&private(a, b, "three", t0 + Duration::seconds(3))).unwrap();

        let history = db.get_private_history(b, a, 100).unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[test]
    fn history_limit_keeps_the_newest() {
        let db = Database::open_in_memory().unwrap();
        let sender = Uuid::new_v4();
        let t0 = Utc::now();

        for i in 0..5 {
            let text = format!("m{}", i);
            db.insert_message(&group(sender, "lobby", &text, t0 + Duration::seconds(i)))
                .unwrap();
        }

        let history = db.get_group_history("lobby", 3).unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn mark_private_read_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        db.insert_message(&private(a, b, "x", Utc::now())).unwrap();
        db.insert_message(&private(a, b, "y", Utc::now())).unwrap();

        assert_eq!(db.mark_private_read(a, b, Utc::now()).unwrap(), 2);
        assert_eq!(db.mark_private_read(a, b, Utc::now()).unwrap(), 0);
        assert!(db.unread_private_by_sender(b).unwrap().is_empty());

        let msg = &db.get_private_history(a, b, 10).unwrap()[0];
        match &msg.kind {
            MessageKind::Private { is_read, read_at, .. } => {
                assert!(*is_read);
                assert!(read_at.is_some());
            }
            other => panic!("expected private message, got {:?}", other),
        }
    }

    #[test]
    fn unread_private_groups_by_sender() {
        let db = Database::open_in_memory().unwrap();
        let me = Uuid::new_v4();
        let senders: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

        for (i, sender) in senders.iter().enumerate() {
            for _ in 0..=i {
                db.insert_message(&private(*sender, me, "ping", Utc::now())).unwrap();
            }
        }
        // Outgoing messages never count against me.
        db.insert_message(&private(me, senders[0], "pong", Utc::now())).unwrap();

        let rows = db.unread_private_by_sender(me).unwrap();
        assert_eq!(rows.len(), 3);
        for (i, sender) in senders.iter().enumerate() {
            let row = rows.iter().find(|r| r.sender == sender.to_string()).unwrap();
            assert_eq!(row.count, i as i64 + 1);
        }
    }

    #[test]
    fn group_read_state_is_per_user() {
        let db = Database::open_in_memory().unwrap();
        let (author, reader, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        db.insert_message(&group(author, "lobby", "a", Utc::now())).unwrap();
        db.insert_message(&group(author, "lobby", "b", Utc::now())).unwrap();
        db.insert_message(&group(author, "random", "c", Utc::now())).unwrap();

        // Authors never see their own messages as unread.
        assert!(db.unread_group_by_name(author).unwrap().is_empty());

        let before = db.unread_group_by_name(reader).unwrap();
        assert_eq!(before.len(), 2);
        assert_eq!(before.iter().find(|r| r.group_name == "lobby").unwrap().count, 2);

        assert_eq!(db.mark_group_read("lobby", reader).unwrap(), 2);
        assert_eq!(db.mark_group_read("lobby", reader).unwrap(), 0);

        let after = db.unread_group_by_name(reader).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].group_name, "random");

        // Someone else's read state is untouched.
        assert_eq!(db.unread_group_by_name(other).unwrap().len(), 2);

        let history = db.get_group_history("lobby", 10).unwrap();
        match &history[0].kind {
            MessageKind::Group { read_by, .. } => assert_eq!(read_by, &vec![reader]),
            other => panic!("expected group message, got {:?}", other),
        }
    }

    #[test]
    fn get_message_round_trips_private_shape() {
        let db = Database::open_in_memory().unwrap();
        let msg = private(Uuid::new_v4(), Uuid::new_v4(), "hi", Utc::now());
        db.insert_message(&msg).unwrap();

        let loaded = db.get_message(msg.id).unwrap().unwrap();
        assert_eq!(loaded.message, "hi");
        assert_eq!(loaded.kind, msg.kind);
        assert!(db.get_message(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn ping_reports_live_connection() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.ping());
    }
}
