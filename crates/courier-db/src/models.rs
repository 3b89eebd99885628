/// Database row types, mapped directly from SQLite rows.
/// Conversions into courier-types models live here so every reader
/// hydrates messages the same way.
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use courier_types::models::{
    Channel, ChannelKind, Member, MemberRole, MemberWithProfile, Message, MessageId, Profile,
};

pub struct ProfileRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub image_url: Option<String>,
}

pub struct MemberRow {
    pub id: String,
    pub profile_id: String,
    pub server_id: String,
    pub role: String,
}

pub struct ChannelRow {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub kind: String,
}

/// A message joined with its author's member and profile rows.
pub struct MessageRow {
    pub id: i64,
    pub channel_id: String,
    pub content: String,
    pub file_url: Option<String>,
    pub deleted: bool,
    pub created_at: String,
    pub updated_at: String,
    pub member: MemberRow,
    pub profile: ProfileRow,
}

fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

fn parse_timestamp(raw: &str, what: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        DateTime::default()
    })
}

impl ProfileRow {
    pub fn into_profile(self) -> Profile {
        Profile {
            id: parse_uuid(&self.id, "profile id"),
            user_id: self.user_id,
            name: self.name,
            image_url: self.image_url,
        }
    }
}

impl MemberRow {
    pub fn into_member(self) -> Member {
        let role = MemberRole::parse(&self.role).unwrap_or_else(|| {
            warn!("Unknown role '{}' on member '{}'", self.role, self.id);
            MemberRole::Guest
        });
        Member {
            id: parse_uuid(&self.id, "member id"),
            profile_id: parse_uuid(&self.profile_id, "member profile_id"),
            server_id: parse_uuid(&self.server_id, "member server_id"),
            role,
        }
    }
}

impl ChannelRow {
    /// Rows with an unknown kind are skipped rather than guessed.
    pub fn into_channel(self) -> Option<Channel> {
        let Some(kind) = ChannelKind::parse(&self.kind) else {
            warn!("Unknown kind '{}' on channel '{}'", self.kind, self.id);
            return None;
        };
        Some(Channel {
            id: parse_uuid(&self.id, "channel id"),
            name: self.name,
            kind,
            server_id: parse_uuid(&self.server_id, "channel server_id"),
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        let member = self.member.into_member();
        Message {
            id: MessageId(self.id),
            channel_id: parse_uuid(&self.channel_id, "message channel_id"),
            member_id: member.id,
            content: self.content,
            file_url: self.file_url,
            created_at: parse_timestamp(&self.created_at, "message created_at"),
            updated_at: parse_timestamp(&self.updated_at, "message updated_at"),
            deleted: self.deleted,
            member: MemberWithProfile {
                member,
                profile: self.profile.into_profile(),
            },
        }
    }
}
