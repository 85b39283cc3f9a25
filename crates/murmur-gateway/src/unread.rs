use anyhow::Result;
use tracing::warn;
use uuid::Uuid;

use murmur_db::Database;
use murmur_types::models::{GroupUnread, PrivateUnread, UnreadCounts};

/// Recompute unread counts for a user straight from the store.
///
/// Nothing is cached: every call sees the store as it is right now.
pub fn count_for(db: &Database, user_id: Uuid) -> Result<UnreadCounts> {
    let private = db
        .unread_private_by_sender(user_id)?
        .into_iter()
        .filter_map(|row| match row.sender.parse::<Uuid>() {
            Ok(sender) => Some(PrivateUnread {
                user_id: sender,
                username: row.sender_username,
                count: row.count.max(0) as u64,
            }),
            Err(e) => {
                warn!("Skipping unread row with corrupt sender '{}': {}", row.sender, e);
                None
            }
        })
        .collect();

    let group = db
        .unread_group_by_name(user_id)?
        .into_iter()
        .map(|row| GroupUnread {
            group_name: row.group_name,
            count: row.count.max(0) as u64,
        })
        .collect();

    Ok(UnreadCounts { private, group })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use murmur_types::models::{Message, MessageKind};

    fn unread_from(counts: &UnreadCounts, sender: Uuid) -> u64 {
        counts.private.iter().find(|p| p.user_id == sender).map_or(0, |p| p.count)
    }

    fn unread_in(counts: &UnreadCounts, group_name: &str) -> u64 {
        counts.group.iter().find(|g| g.group_name == group_name).map_or(0, |g| g.count)
    }

    fn send_private(db: &Database, from: Uuid, from_name: &str, to: Uuid) {
        db.insert_message(&Message {
            id: Uuid::new_v4(),
            sender: from,
            sender_username: from_name.into(),
            message: "hey".into(),
            timestamp: Utc::now(),
            kind: MessageKind::Private {
                receiver: to,
                receiver_username: "me".into(),
                is_read: false,
                read_at: None,
            },
        })
        .unwrap();
    }

    fn send_group(db: &Database, from: Uuid, group: &str) {
        db.insert_message(&Message {
            id: Uuid::new_v4(),
            sender: from,
            sender_username: "someone".into(),
            message: "hey all".into(),
            timestamp: Utc::now(),
            kind: MessageKind::Group {
                group_name: group.into(),
                read_by: vec![],
            },
        })
        .unwrap();
    }

    #[test]
    fn counts_match_store_contents() {
        let db = Database::open_in_memory().unwrap();
        let me = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        send_private(&db, alice, "alice", me);
        send_private(&db, alice, "alice", me);
        send_private(&db, bob, "bob", me);
        send_group(&db, alice, "lobby");
        send_group(&db, me, "lobby");

        let counts = count_for(&db, me).unwrap();
        assert_eq!(counts.private.len(), 2);
        assert_eq!(unread_from(&counts, alice), 2);
        assert_eq!(unread_from(&counts, bob), 1);
        assert_eq!(
            counts.private.iter().find(|p| p.user_id == bob).unwrap().username,
            "bob"
        );
        assert_eq!(unread_in(&counts, "lobby"), 1);
    }

    #[test]
    fn empty_store_yields_empty_counts() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(count_for(&db, Uuid::new_v4()).unwrap(), UnreadCounts::default());
    }

    #[test]
    fn counts_follow_read_state() {
        let db = Database::open_in_memory().unwrap();
        let (me, alice) = (Uuid::new_v4(), Uuid::new_v4());
        send_private(&db, alice, "alice", me);
        send_group(&db, alice, "lobby");

        db.mark_private_read(alice, me, Utc::now()).unwrap();
        db.mark_group_read("lobby", me).unwrap();

        assert_eq!(count_for(&db, me).unwrap(), UnreadCounts::default());
        // The author still has nothing unread either.
        assert_eq!(count_for(&db, alice).unwrap(), UnreadCounts::default());
    }
}
