//! Ingestion pipeline: turns gateway notifications and the startup snapshot
//! into store rows, and hands avatar-sync work off to the worker queue.

use crate::avatar::SyncRequest;
use crate::config;
use crate::db::{self, Pool, StoreError};
use crate::model::{Channel, Message, User};
use crate::platform::{ChatApi, ChannelProfile, IncomingMessage, MemberJoined, UserProfile};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("message author {0} unknown to the store")]
    IntegrityGap(i64),
    #[error("platform lookup failed: {0}")]
    Platform(#[source] anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One-shot latch around the single "set activity" side effect. Process
/// lifetime only; a restart re-arms it.
pub struct PresenceGate(AtomicBool);

impl PresenceGate {
    pub fn armed() -> Self {
        Self(AtomicBool::new(true))
    }

    /// Returns true exactly once; every later call observes the spent latch.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

pub struct Ingestor {
    pool: Pool,
    presence: PresenceGate,
    activity_text: String,
    triggers: HashSet<u64>,
    avatar_source: u64,
    sync_tx: mpsc::Sender<SyncRequest>,
}

impl Ingestor {
    pub fn new(pool: Pool, discord: &config::Discord, sync_tx: mpsc::Sender<SyncRequest>) -> Self {
        Self {
            pool,
            presence: PresenceGate::armed(),
            activity_text: discord.activity_text.clone(),
            triggers: discord.avatar_triggers.iter().copied().collect(),
            avatar_source: discord.avatar_source,
            sync_tx,
        }
    }

    /// Record a freshly joined member. The join event only carries the ids,
    /// so the full profile comes from a platform lookup.
    #[instrument(skip_all, fields(user_id = member.user_id))]
    pub async fn on_member_join(
        &self,
        api: &dyn ChatApi,
        member: &MemberJoined,
    ) -> Result<(), IngestError> {
        let profile = api
            .fetch_user(member.user_id)
            .await
            .map_err(IngestError::Platform)?;
        info!(name = %profile.name, "recording new member");
        db::create_user_if_absent(&self.pool, &user_row(&profile, member.joined_at)).await?;
        Ok(())
    }

    /// One-time backfill of members and channels when the store is empty.
    /// A non-empty table is left alone, even if it is only partially filled.
    #[instrument(skip_all)]
    pub async fn on_ready(&self, api: &dyn ChatApi) -> Result<(), IngestError> {
        info!("gateway session ready");

        if db::count_users(&self.pool).await? == 0 {
            let members = api.list_members().await.map_err(IngestError::Platform)?;
            info!(count = members.len(), "backfilling members into empty store");
            for member in &members {
                db::create_user_if_absent(&self.pool, &user_row(&member.profile, member.joined_at))
                    .await?;
            }
        }

        if db::count_channels(&self.pool).await? == 0 {
            let channels = api.list_channels().await.map_err(IngestError::Platform)?;
            info!(count = channels.len(), "backfilling channels into empty store");
            for channel in &channels {
                db::create_channel_if_absent(&self.pool, &channel_row(channel)).await?;
            }
        }

        Ok(())
    }

    #[instrument(skip_all, fields(message_id = msg.id))]
    pub async fn on_message(
        &self,
        api: Arc<dyn ChatApi>,
        msg: &IncomingMessage,
    ) -> Result<(), IngestError> {
        if self.presence.take() {
            info!(text = %self.activity_text, "setting activity status");
            if let Err(err) = api.set_activity(&self.activity_text).await {
                warn!(%err, "failed to set activity status");
            }
        }

        // Dropped messages are logged once, by the gateway handler that
        // receives the returned error.
        let author_id = msg.author_id as i64;
        let author = match db::find_user_by_id(&self.pool, author_id).await {
            Ok(user) => user,
            Err(StoreError::NotFound { .. }) => {
                return Err(IngestError::IntegrityGap(author_id));
            }
            Err(err) => return Err(err.into()),
        };

        let channel_id = msg.channel.id as i64;
        let channel = match db::find_channel_by_id(&self.pool, channel_id).await {
            Ok(channel) => channel,
            Err(StoreError::NotFound { .. }) => {
                info!(channel = channel_id, "channel not yet recorded; creating");
                let row = channel_row(&msg.channel);
                db::create_channel_if_absent(&self.pool, &row).await?;
                row
            }
            Err(err) => return Err(err.into()),
        };

        let has_mentions = !msg.mentions.is_empty();
        debug!(author = %author.name, channel = %channel.name, "recording message");
        db::create_message_if_absent(
            &self.pool,
            &Message {
                message_id: msg.id as i64,
                content: msg.content.clone(),
                user_id: author.discord_id,
                channel_id: channel.channel_id,
                sent_at: msg.sent_at,
                is_pinned: msg.pinned,
                has_mentions,
            },
        )
        .await?;

        if self.triggers.contains(&msg.author_id) {
            let request = SyncRequest {
                target: self.avatar_source,
                api,
            };
            if self.sync_tx.try_send(request).is_err() {
                warn!("avatar sync queue full; dropping request");
            }
        }

        Ok(())
    }
}

fn user_row(profile: &UserProfile, joined_at: DateTime<Utc>) -> User {
    User {
        discord_id: profile.id as i64,
        avatar_url: profile.avatar_url.clone().unwrap_or_default(),
        is_bot: profile.is_bot,
        register_date: profile.created_at,
        name: profile.name.clone(),
        display_name: profile.display_name.clone(),
        join_date: joined_at,
        discriminator: profile.discriminator,
    }
}

fn channel_row(channel: &ChannelProfile) -> Channel {
    Channel {
        channel_id: channel.id as i64,
        name: channel.name.clone(),
        topic: channel.topic.clone().unwrap_or_default(),
        is_voice: channel.is_voice,
    }
}
