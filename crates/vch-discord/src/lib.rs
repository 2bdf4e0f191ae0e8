//! Discord adapter (serenity).
//!
//! This crate implements the `vch-core` PlatformPort over the Discord HTTP API
//! and gateway cache, and routes gateway events into the reactor/scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use serenity::{
    all::{
        Cache, Channel, ChannelType, Context, GetMessages, Http, PermissionOverwrite,
        PermissionOverwriteType, Permissions, Timestamp,
    },
    Error as SerenityError,
};

pub mod router;

use vch_core::{
    domain::{
        ChannelId, ChannelKind, FetchedMessage, MemberId, MessageId, TextChannelId, VoiceRoomId,
    },
    errors::Error,
    ports::PlatformPort,
    Result,
};

#[derive(Clone)]
pub struct DiscordPlatform {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self { http, cache }
    }

    pub fn from_context(ctx: &Context) -> Self {
        Self::new(ctx.http.clone(), ctx.cache.clone())
    }

    fn dc_channel(id: u64) -> Result<serenity::all::ChannelId> {
        if id == 0 {
            return Err(Error::Resolution { what: "channel", id });
        }
        Ok(serenity::all::ChannelId::new(id))
    }

    fn dc_user(id: MemberId) -> Result<serenity::all::UserId> {
        if id.0 == 0 {
            return Err(Error::Resolution {
                what: "member",
                id: id.0,
            });
        }
        Ok(serenity::all::UserId::new(id.0))
    }

    fn dc_message(id: MessageId) -> Result<serenity::all::MessageId> {
        if id.0 == 0 {
            return Err(Error::Resolution {
                what: "message",
                id: id.0,
            });
        }
        Ok(serenity::all::MessageId::new(id.0))
    }

    async fn guild_channel(&self, id: u64) -> Result<serenity::all::GuildChannel> {
        let channel = Self::dc_channel(id)?
            .to_channel((&self.cache, self.http.as_ref()))
            .await
            .map_err(|e| map_err(e, "channel", id))?;
        match channel {
            Channel::Guild(c) => Ok(c),
            _ => Err(Error::Resolution { what: "guild channel", id }),
        }
    }
}

/// Discord errors with a 404 mean the thing is gone; 403 means we lack rights.
fn map_err(e: SerenityError, what: &'static str, id: u64) -> Error {
    match status_of(&e) {
        Some(404) => Error::Resolution { what, id },
        Some(403) => Error::Permission(format!("discord refused access to {what} {id}: {e}")),
        _ => Error::External(format!("discord error: {e}")),
    }
}

fn status_of(e: &SerenityError) -> Option<u16> {
    match e {
        SerenityError::Http(h) => h.status_code().map(|s| s.as_u16()),
        _ => None,
    }
}

fn kind_of(kind: ChannelType) -> ChannelKind {
    match kind {
        ChannelType::Text | ChannelType::News => ChannelKind::Text,
        ChannelType::Voice | ChannelType::Stage => ChannelKind::Voice,
        _ => ChannelKind::Other,
    }
}

/// Messages with an unrepresentable timestamp are treated as ancient, which
/// only routes them through single deletes.
fn created_at(ts: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.unix_timestamp(), 0).unwrap_or(DateTime::UNIX_EPOCH)
}

#[async_trait]
impl PlatformPort for DiscordPlatform {
    async fn channel_kind(&self, channel: ChannelId) -> Result<ChannelKind> {
        let c = self.guild_channel(channel.0).await?;
        Ok(kind_of(c.kind))
    }

    async fn voice_occupancy(&self, room: VoiceRoomId) -> Result<usize> {
        let channel = self.guild_channel(room.0).await?;
        let room_id = channel.id;

        // The cache has already applied the voice state update being handled.
        let guild = self.cache.guild(channel.guild_id).ok_or(Error::Resolution {
            what: "guild",
            id: channel.guild_id.get(),
        })?;
        let occupants = guild
            .voice_states
            .values()
            .filter(|vs| vs.channel_id == Some(room_id))
            .count();
        Ok(occupants)
    }

    async fn grant_view(&self, channel: TextChannelId, member: MemberId) -> Result<()> {
        let overwrite = PermissionOverwrite {
            allow: Permissions::VIEW_CHANNEL,
            deny: Permissions::empty(),
            kind: PermissionOverwriteType::Member(Self::dc_user(member)?),
        };
        Self::dc_channel(channel.0)?
            .create_permission(&self.http, overwrite)
            .await
            .map_err(|e| map_err(e, "text channel", channel.0))
    }

    async fn revoke_view(&self, channel: TextChannelId, member: MemberId) -> Result<()> {
        let target = PermissionOverwriteType::Member(Self::dc_user(member)?);
        match Self::dc_channel(channel.0)?
            .delete_permission(&self.http, target)
            .await
        {
            Ok(()) => Ok(()),
            // Unknown Overwrite: nothing to revoke.
            Err(e) if status_of(&e) == Some(404) => Ok(()),
            Err(e) => Err(map_err(e, "text channel", channel.0)),
        }
    }

    async fn send_message(&self, channel: TextChannelId, body: &str) -> Result<()> {
        Self::dc_channel(channel.0)?
            .say(&self.http, body)
            .await
            .map_err(|e| map_err(e, "text channel", channel.0))?;
        Ok(())
    }

    async fn fetch_messages(
        &self,
        channel: TextChannelId,
        limit: u8,
    ) -> Result<Vec<FetchedMessage>> {
        let messages = Self::dc_channel(channel.0)?
            .messages(&self.http, GetMessages::new().limit(limit))
            .await
            .map_err(|e| map_err(e, "text channel", channel.0))?;

        Ok(messages
            .into_iter()
            .map(|m| FetchedMessage {
                id: MessageId(m.id.get()),
                created_at: created_at(m.timestamp),
            })
            .collect())
    }

    async fn bulk_delete(&self, channel: TextChannelId, ids: &[MessageId]) -> Result<()> {
        let ids = ids
            .iter()
            .map(|id| Self::dc_message(*id))
            .collect::<Result<Vec<_>>>()?;
        Self::dc_channel(channel.0)?
            .delete_messages(&self.http, ids)
            .await
            .map_err(|e| map_err(e, "text channel", channel.0))
    }

    async fn delete_message(&self, channel: TextChannelId, id: MessageId) -> Result<()> {
        Self::dc_channel(channel.0)?
            .delete_message(&self.http, Self::dc_message(id)?)
            .await
            .map_err(|e| map_err(e, "text channel", channel.0))
    }
}
