//! Discord gateway adapter.
//!
//! Translates serenity events and REST calls into the platform-neutral
//! types in [`crate::platform`]. Everything serenity-specific stays here.

use crate::ingest::Ingestor;
use crate::platform::{ChatApi, ChannelProfile, IncomingMessage, MemberJoined, MemberProfile, UserProfile};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{
    ActivityData, Channel, ChannelType, Context, CreateAttachment, EditProfile, EventHandler,
    GuildChannel, GuildId, Member, Message, Ready, User, UserId,
};
use serenity::gateway::ShardMessenger;
use serenity::http::Http;
use serenity::model::Timestamp;
use std::sync::Arc;
use tracing::error;

pub struct Handler {
    ingest: Ingestor,
    guild_id: GuildId,
}

impl Handler {
    pub fn new(ingest: Ingestor, guild_id: u64) -> Self {
        Self {
            ingest,
            guild_id: GuildId::new(guild_id),
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, _ready: Ready) {
        let api = api_from(&ctx, self.guild_id);
        if let Err(err) = self.ingest.on_ready(api.as_ref()).await {
            error!(%err, "startup backfill failed");
        }
    }

    async fn guild_member_addition(&self, ctx: Context, member: Member) {
        let api = api_from(&ctx, self.guild_id);
        let event = MemberJoined {
            user_id: member.user.id.get(),
            joined_at: member.joined_at.map(timestamp_utc).unwrap_or_else(Utc::now),
        };
        if let Err(err) = self.ingest.on_member_join(api.as_ref(), &event).await {
            error!(%err, "failed to record new member");
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        // Direct messages carry no guild channel; only guild traffic is mirrored.
        if msg.guild_id.is_none() {
            return;
        }
        let channel = match msg.channel_id.to_channel(&ctx).await {
            Ok(Channel::Guild(channel)) => channel_from(&channel),
            Ok(_) => return,
            Err(err) => {
                error!(%err, channel = msg.channel_id.get(), "could not resolve channel");
                return;
            }
        };
        let event = IncomingMessage {
            id: msg.id.get(),
            author_id: msg.author.id.get(),
            channel,
            content: msg.content.clone(),
            sent_at: timestamp_utc(msg.timestamp),
            pinned: msg.pinned,
            mentions: msg.mentions.iter().map(|user| user.id.get()).collect(),
        };
        let api = api_from(&ctx, self.guild_id);
        if let Err(err) = self.ingest.on_message(api, &event).await {
            error!(%err, "failed to ingest message");
        }
    }
}

/// [`ChatApi`] backed by the live gateway session. Cheap to build per event:
/// just an `Arc<Http>` and the shard messenger.
pub struct SerenityApi {
    http: Arc<Http>,
    shard: ShardMessenger,
    guild_id: GuildId,
}

fn api_from(ctx: &Context, guild_id: GuildId) -> Arc<SerenityApi> {
    Arc::new(SerenityApi {
        http: ctx.http.clone(),
        shard: ctx.shard.clone(),
        guild_id,
    })
}

#[async_trait]
impl ChatApi for SerenityApi {
    async fn fetch_user(&self, id: u64) -> Result<UserProfile> {
        let user = self.http.get_user(UserId::new(id)).await?;
        Ok(profile_from(&user))
    }

    async fn list_members(&self) -> Result<Vec<MemberProfile>> {
        let members = self
            .guild_id
            .members(&self.http, None, None::<UserId>)
            .await?;
        Ok(members
            .iter()
            .map(|member| MemberProfile {
                profile: profile_from(&member.user),
                joined_at: member.joined_at.map(timestamp_utc).unwrap_or_else(Utc::now),
            })
            .collect())
    }

    async fn list_channels(&self) -> Result<Vec<ChannelProfile>> {
        let channels = self.guild_id.channels(&self.http).await?;
        Ok(channels.values().map(channel_from).collect())
    }

    async fn set_activity(&self, text: &str) -> Result<()> {
        self.shard.set_activity(Some(ActivityData::playing(text)));
        Ok(())
    }

    async fn set_own_avatar(&self, image: Vec<u8>) -> Result<()> {
        let attachment = CreateAttachment::bytes(image, "avatar.jpg");
        let mut current = self.http.get_current_user().await?;
        current
            .edit(&self.http, EditProfile::new().avatar(&attachment))
            .await
            .context("failed to update bot avatar")?;
        Ok(())
    }
}

fn timestamp_utc(ts: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.unix_timestamp(), 0).unwrap_or_default()
}

fn profile_from(user: &User) -> UserProfile {
    UserProfile {
        id: user.id.get(),
        avatar_url: user.avatar_url(),
        is_bot: user.bot,
        created_at: timestamp_utc(user.created_at()),
        name: user.name.clone(),
        display_name: user
            .global_name
            .clone()
            .unwrap_or_else(|| user.name.clone()),
        discriminator: user.discriminator.map(|d| i64::from(d.get())).unwrap_or(0),
    }
}

fn channel_from(channel: &GuildChannel) -> ChannelProfile {
    ChannelProfile {
        id: channel.id.get(),
        name: channel.name.clone(),
        topic: channel.topic.clone(),
        is_voice: matches!(channel.kind, ChannelType::Voice),
    }
}
