//! Platform-neutral view of the chat service.
//!
//! The gateway connection and REST surface live behind [`ChatApi`]; the
//! ingestion pipeline and avatar sync only ever see these types, which keeps
//! both testable against recording fakes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Snapshot of a user profile as returned by lookup-user-by-id.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: u64,
    pub avatar_url: Option<String>,
    pub is_bot: bool,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub display_name: String,
    pub discriminator: i64,
}

/// A guild member: a profile plus the guild-join timestamp.
#[derive(Debug, Clone)]
pub struct MemberProfile {
    pub profile: UserProfile,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChannelProfile {
    pub id: u64,
    pub name: String,
    pub topic: Option<String>,
    pub is_voice: bool,
}

/// Member-joined gateway notification.
#[derive(Debug, Clone)]
pub struct MemberJoined {
    pub user_id: u64,
    pub joined_at: DateTime<Utc>,
}

/// Message-received gateway notification, with the channel it arrived in.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: u64,
    pub author_id: u64,
    pub channel: ChannelProfile,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub pinned: bool,
    pub mentions: Vec<u64>,
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_user(&self, id: u64) -> Result<UserProfile>;
    async fn list_members(&self) -> Result<Vec<MemberProfile>>;
    async fn list_channels(&self) -> Result<Vec<ChannelProfile>>;
    async fn set_activity(&self, text: &str) -> Result<()>;
    async fn set_own_avatar(&self, image: Vec<u8>) -> Result<()>;
}
