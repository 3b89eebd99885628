use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL UNIQUE,
            name        TEXT NOT NULL,
            image_url   TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS servers (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS members (
            id          TEXT PRIMARY KEY,
            profile_id  TEXT NOT NULL REFERENCES profiles(id),
            server_id   TEXT NOT NULL REFERENCES servers(id),
            role        TEXT NOT NULL DEFAULT 'guest',
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(server_id, profile_id)
        );

        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            server_id   TEXT NOT NULL REFERENCES servers(id),
            name        TEXT NOT NULL,
            kind        TEXT NOT NULL DEFAULT 'text',
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_channels_server
            ON channels(server_id);

        -- AUTOINCREMENT: ids are never reused, so they only ever grow
        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id      TEXT NOT NULL REFERENCES channels(id),
            member_id       TEXT NOT NULL REFERENCES members(id),
            content         TEXT NOT NULL,
            file_url        TEXT,
            deleted         INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        -- Backs the history seek: channel_id = ? AND id < ? ORDER BY id DESC
        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
