use async_trait::async_trait;

use crate::{
    domain::{
        Binding, ChannelId, ChannelKind, FetchedMessage, FlaggedBinding, MemberId, MessageId,
        TextChannelId, VoiceRoomId,
    },
    errors::Error,
    Result,
};

/// Durable table of voice/text bindings.
///
/// Every mutation is a single keyed update so the reactor and the purge loop
/// can hit the store concurrently without locking each other out. Implementors
/// must not turn `set_flag` into a read-modify-write sequence.
#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn list_bindings(&self) -> Result<Vec<Binding>>;
    async fn list_flagged(&self) -> Result<Vec<FlaggedBinding>>;

    /// Set the purge flag of the row keyed by `voice_id`. Missing rows are
    /// left alone; rows are never created here.
    async fn set_flag(&self, voice_id: VoiceRoomId, purge: bool) -> Result<()>;
}

/// Chat platform command sink.
///
/// Discord is the only implementation; the fakes in tests implement the same
/// surface so the reactor and the purge loop can be exercised offline.
#[async_trait]
pub trait PlatformPort: Send + Sync {
    /// Fails with `Error::Resolution` if the channel no longer exists.
    async fn channel_kind(&self, channel: ChannelId) -> Result<ChannelKind>;

    /// Members currently connected to `room`, as of the latest gateway state.
    async fn voice_occupancy(&self, room: VoiceRoomId) -> Result<usize>;

    /// Create (or replace) a member overwrite allowing VIEW_CHANNEL.
    async fn grant_view(&self, channel: TextChannelId, member: MemberId) -> Result<()>;

    /// Remove the member's overwrite. An absent overwrite is not an error.
    async fn revoke_view(&self, channel: TextChannelId, member: MemberId) -> Result<()>;

    async fn send_message(&self, channel: TextChannelId, body: &str) -> Result<()>;

    /// Up to `limit` most recent messages, newest first.
    async fn fetch_messages(
        &self,
        channel: TextChannelId,
        limit: u8,
    ) -> Result<Vec<FetchedMessage>>;

    async fn bulk_delete(&self, channel: TextChannelId, ids: &[MessageId]) -> Result<()>;
    async fn delete_message(&self, channel: TextChannelId, id: MessageId) -> Result<()>;
}

/// Look up `id` and check it really is a text channel.
///
/// A missing channel fails with `Error::Resolution`; a channel of another kind
/// fails with `Error::WrongKind`.
pub async fn resolve_text(
    platform: &dyn PlatformPort,
    id: TextChannelId,
) -> Result<TextChannelId> {
    expect_kind(platform, id.channel(), ChannelKind::Text).await?;
    Ok(id)
}

/// Look up `id` and check it really is a voice room.
pub async fn resolve_voice(
    platform: &dyn PlatformPort,
    id: VoiceRoomId,
) -> Result<VoiceRoomId> {
    expect_kind(platform, id.channel(), ChannelKind::Voice).await?;
    Ok(id)
}

async fn expect_kind(
    platform: &dyn PlatformPort,
    id: ChannelId,
    expected: ChannelKind,
) -> Result<()> {
    let found = platform.channel_kind(id).await?;
    if found != expected {
        return Err(Error::WrongKind {
            id,
            expected,
            found,
        });
    }
    Ok(())
}
