use chrono::{DateTime, Utc};

/// Outcome of an idempotent create: either a fresh row was written or the
/// key was already present and the call was a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    Created,
    Existing,
}

impl Inserted {
    pub fn is_created(self) -> bool {
        matches!(self, Inserted::Created)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub discord_id: i64,
    pub avatar_url: String,
    pub is_bot: bool,
    pub register_date: DateTime<Utc>,
    pub name: String,
    pub display_name: String,
    pub join_date: DateTime<Utc>,
    pub discriminator: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Channel {
    pub channel_id: i64,
    pub name: String,
    pub topic: String,
    pub is_voice: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Message {
    pub message_id: i64,
    pub content: String,
    pub user_id: i64,
    pub channel_id: i64,
    pub sent_at: DateTime<Utc>,
    pub is_pinned: bool,
    pub has_mentions: bool,
}
