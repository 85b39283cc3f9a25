use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- sender/receiver are not foreign keys: the gateway accepts identities
        -- vouched for by the auth layer without re-reading the users table.
        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,
            kind                TEXT NOT NULL CHECK (kind IN ('private', 'group')),
            sender              TEXT NOT NULL,
            sender_username     TEXT NOT NULL,
            message             TEXT NOT NULL,
            receiver            TEXT,
            receiver_username   TEXT,
            group_name          TEXT,
            is_read             INTEGER,
            read_at             TEXT,
            timestamp           TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            CHECK (
                (kind = 'private' AND receiver IS NOT NULL AND receiver_username IS NOT NULL
                    AND is_read IS NOT NULL AND group_name IS NULL)
                OR
                (kind = 'group' AND group_name IS NOT NULL AND receiver IS NULL
                    AND is_read IS NULL AND read_at IS NULL)
            )
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender, receiver);

        CREATE INDEX IF NOT EXISTS idx_messages_group
            ON messages(group_name);

        CREATE INDEX IF NOT EXISTS idx_messages_timestamp
            ON messages(timestamp DESC);

        -- readBy for group messages
        CREATE TABLE IF NOT EXISTS message_reads (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
