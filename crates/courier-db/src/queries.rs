use crate::Database;
use crate::models::{ChannelRow, MemberRow, MessageRow, ProfileRow};
use anyhow::{Result, anyhow};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Row};

/// Hydrated message projection shared by every message read.
const MESSAGE_SELECT: &str = "
    SELECT m.id, m.channel_id, m.content, m.file_url, m.deleted, m.created_at, m.updated_at,
           mb.id, mb.profile_id, mb.server_id, mb.role,
           p.id, p.user_id, p.name, p.image_url
    FROM messages m
    JOIN members mb ON mb.id = m.member_id
    JOIN profiles p ON p.id = mb.profile_id";

impl Database {
    // -- Directory (written by the external membership system) --

    pub fn upsert_profile(
        &self,
        id: &str,
        user_id: &str,
        name: &str,
        image_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, user_id, name, image_url) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, image_url = excluded.image_url",
                rusqlite::params![id, user_id, name, image_url],
            )?;
            Ok(())
        })
    }

    pub fn create_server(&self, id: &str, name: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("INSERT INTO servers (id, name) VALUES (?1, ?2)", (id, name))?;
            Ok(())
        })
    }

    pub fn add_member(&self, id: &str, server_id: &str, profile_id: &str, role: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO members (id, server_id, profile_id, role) VALUES (?1, ?2, ?3, ?4)",
                (id, server_id, profile_id, role),
            )?;
            Ok(())
        })
    }

    pub fn create_channel(&self, id: &str, server_id: &str, name: &str, kind: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO channels (id, server_id, name, kind) VALUES (?1, ?2, ?3, ?4)",
                (id, server_id, name, kind),
            )?;
            Ok(())
        })
    }

    // -- Lookups --

    pub fn get_profile_by_user_id(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_id, name, image_url FROM profiles WHERE user_id = ?1",
                [user_id],
                profile_from_row,
            )
            .optional()
        })
    }

    pub fn get_channel(&self, id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, server_id, name, kind FROM channels WHERE id = ?1",
                [id],
                |row| {
                    Ok(ChannelRow {
                        id: row.get(0)?,
                        server_id: row.get(1)?,
                        name: row.get(2)?,
                        kind: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    /// The membership lookup: `profile_id`'s member record in `server_id`.
    pub fn find_member(&self, server_id: &str, profile_id: &str) -> Result<Option<MemberRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, profile_id, server_id, role FROM members
                 WHERE server_id = ?1 AND profile_id = ?2",
                [server_id, profile_id],
                |row| member_from_row(row, 0),
            )
            .optional()
        })
    }

    /// Channel plus `profile_id`'s member record in the channel's server.
    /// `None` when either is missing; callers must not tell the two apart.
    pub fn channel_access(
        &self,
        channel_id: &str,
        profile_id: &str,
    ) -> Result<Option<(ChannelRow, MemberRow)>> {
        let Some(channel) = self.get_channel(channel_id)? else {
            return Ok(None);
        };
        let Some(member) = self.find_member(&channel.server_id, profile_id)? else {
            return Ok(None);
        };
        Ok(Some((channel, member)))
    }

    // -- Messages --

    /// Append a message and return it hydrated.
    ///
    /// The insert and the read-back happen under one lock acquisition, so
    /// the returned id is exactly the row this call created.
    pub fn insert_message(
        &self,
        channel_id: &str,
        member_id: &str,
        content: &str,
        file_url: Option<&str>,
    ) -> Result<MessageRow> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (channel_id, member_id, content, file_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![channel_id, member_id, content, file_url, now],
            )?;
            let id = conn.last_insert_rowid();
            query_message(conn, id)?.ok_or_else(|| anyhow!("Message {} vanished after insert", id))
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Newest-first slice of a channel. With `before`, only ids strictly
    /// older than it are returned; the (channel_id, id) index turns this
    /// into a seek rather than a scan.
    pub fn page_messages(
        &self,
        channel_id: &str,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_page(conn, channel_id, before, limit))
    }
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
    conn.query_row(&sql, [id], message_from_row).optional()
}

fn query_page(
    conn: &Connection,
    channel_id: &str,
    before: Option<i64>,
    limit: usize,
) -> Result<Vec<MessageRow>> {
    let limit = limit as i64;
    let rows = match before {
        Some(cursor) => {
            let sql = format!(
                "{MESSAGE_SELECT} WHERE m.channel_id = ?1 AND m.id < ?2 ORDER BY m.id DESC LIMIT ?3"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![channel_id, cursor, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let sql = format!("{MESSAGE_SELECT} WHERE m.channel_id = ?1 ORDER BY m.id DESC LIMIT ?2");
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![channel_id, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };

    Ok(rows)
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        image_url: row.get(3)?,
    })
}

fn member_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        id: row.get(offset)?,
        profile_id: row.get(offset + 1)?,
        server_id: row.get(offset + 2)?,
        role: row.get(offset + 3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        content: row.get(2)?,
        file_url: row.get(3)?,
        deleted: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        member: member_from_row(row, 7)?,
        profile: ProfileRow {
            id: row.get(11)?,
            user_id: row.get(12)?,
            name: row.get(13)?,
            image_url: row.get(14)?,
        },
    })
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
